//! The opcode set. One-byte opcodes occupy `[0, 128)`; a byte with the
//! high bit set starts a two-byte little-endian user-word call whose low
//! 15 bits are the callee's code address.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive, Serialize,
)]
#[repr(u8)]
pub enum Opcode {
    Halt = 0,
    Exit = 1,
    ExitMethod = 2,
    Reserve = 3,
    Branch = 4,
    BranchFalse = 5,
    LiteralNumber = 6,
    Literal16 = 7,
    LiteralString = 8,
    LiteralCode = 9,
    Eval = 10,
    Print = 11,
    RawPrint = 12,

    LocalRef = 16,
    GlobalRef = 17,
    InitVar = 18,
    GlobalInit = 19,
    FieldRef = 20,
    Select = 21,
    Fetch = 22,
    Store = 23,
    Ref = 24,
    Unref = 25,
    Walk = 26,

    Dup = 32,
    Drop = 33,
    Swap = 34,
    Over = 35,
    Rot = 36,
    RevRot = 37,
    Nip = 38,
    Tuck = 39,
    Pick = 40,

    OpenList = 48,
    CloseList = 49,
    Length = 50,
    Size = 51,
    Head = 52,
    Tail = 53,
    Uncons = 54,
    Cons = 55,
    DropHead = 56,
    Concat = 57,
    Reverse = 58,
    Pack = 59,
    Unpack = 60,
    Enlist = 61,
    Slot = 62,
    Elem = 63,

    Find = 64,
    Keys = 65,
    Values = 66,

    Add = 80,
    Sub = 81,
    Mul = 82,
    Div = 83,
    Pow = 84,
    Mod = 85,
    Min = 86,
    Max = 87,
    Eq = 88,
    Lt = 89,
    Le = 90,
    Gt = 91,
    Ge = 92,
    Neg = 96,
    Recip = 97,
    Floor = 98,
    Not = 99,
    Sign = 100,
    Sqrt = 101,
    Exp = 102,
    Ln = 103,
    Log = 104,

    OfCmp = 112,
    Mark = 113,
    Forget = 114,
    Dispatch = 115,
}

/// Inline operand layout following an opcode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum OperandKind {
    None,
    I16,
    U16,
    F32,
}

impl Opcode {
    pub fn operand_kind(self) -> OperandKind {
        use Opcode::*;
        match self {
            Reserve | LiteralString | LiteralCode | LocalRef | GlobalRef | InitVar
            | GlobalInit | FieldRef => OperandKind::U16,
            Branch | BranchFalse | Literal16 => OperandKind::I16,
            LiteralNumber => OperandKind::F32,
            _ => OperandKind::None,
        }
    }

    pub fn operand_bytes(self) -> usize {
        match self.operand_kind() {
            OperandKind::None => 0,
            OperandKind::I16 | OperandKind::U16 => 2,
            OperandKind::F32 => 4,
        }
    }

    /// Mnemonic used by the disassembler; matches the surface word where
    /// one exists.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Halt => "halt",
            Exit => "exit",
            ExitMethod => "exit-method",
            Reserve => "reserve",
            Branch => "branch",
            BranchFalse => "branch-false",
            LiteralNumber => "lit-num",
            Literal16 => "lit-16",
            LiteralString => "lit-str",
            LiteralCode => "lit-code",
            Eval => "eval",
            Print => ".",
            RawPrint => "raw",
            LocalRef => "local-ref",
            GlobalRef => "global-ref",
            InitVar => "init-var",
            GlobalInit => "global-init",
            FieldRef => "field-ref",
            Select => "select",
            Fetch => "fetch",
            Store => "store",
            Ref => "ref",
            Unref => "unref",
            Walk => "walk",
            Dup => "dup",
            Drop => "drop",
            Swap => "swap",
            Over => "over",
            Rot => "rot",
            RevRot => "revrot",
            Nip => "nip",
            Tuck => "tuck",
            Pick => "pick",
            OpenList => "open-list",
            CloseList => "close-list",
            Length => "length",
            Size => "size",
            Head => "head",
            Tail => "tail",
            Uncons => "uncons",
            Cons => "cons",
            DropHead => "drop-head",
            Concat => "concat",
            Reverse => "reverse",
            Pack => "pack",
            Unpack => "unpack",
            Enlist => "enlist",
            Slot => "slot",
            Elem => "elem",
            Find => "find",
            Keys => "keys",
            Values => "values",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Pow => "pow",
            Mod => "mod",
            Min => "min",
            Max => "max",
            Eq => "eq",
            Lt => "lt",
            Le => "le",
            Gt => "gt",
            Ge => "ge",
            Neg => "neg",
            Recip => "recip",
            Floor => "floor",
            Not => "not",
            Sign => "sign",
            Sqrt => "sqrt",
            Exp => "exp",
            Ln => "ln",
            Log => "log",
            OfCmp => "of-cmp",
            Mark => "mark",
            Forget => "forget",
            Dispatch => "dispatch",
        }
    }
}
