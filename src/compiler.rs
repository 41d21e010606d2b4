//! The byte-emitting assembler: code pointer management, forward-branch
//! patching, and the compile-time state of open definitions, cases and
//! capsules.

use log::trace;

use crate::error::{vm_err, ErrorKind};
use crate::mem::{CODE_BYTES, MIN_USER_OPCODE};
use crate::opcode::Opcode;
use crate::tagged::Value;
use crate::vm::Vm;
use crate::vm_ensure;

/// Compile-time state of the open `:` definition.
pub struct DefState {
    pub name: String,
    /// Code address of the entry `Reserve`.
    pub entry: usize,
    /// Operand address of the `Branch` that skips the body in straight-line
    /// flow.
    pub skip_patch: usize,
    /// Operand address of the entry `Reserve`, patched with the final
    /// local count.
    pub reserve_patch: usize,
    pub locals: Vec<(String, u16)>,
    pub capsule_pending: bool,
    pub capsule: Option<CapsuleState>,
}

/// Compile-time state of an open `capsule case`.
pub struct CapsuleState {
    /// Operand address of the `Branch` that jumps straight-line flow over
    /// the method bodies.
    pub skip_patch: usize,
    /// (method name digest address, body entry address)
    pub methods: Vec<(u16, usize)>,
    /// The clause currently being compiled.
    pub current: Option<(u16, usize)>,
}

/// Compile-time bookkeeping for one open runtime `case`.
pub struct CaseState {
    pub default_seen: bool,
}

pub struct Compiler {
    /// Next free code byte.
    pub cp: usize,
    /// Base of the transient compilation area; rewound here unless the
    /// line defined something worth preserving.
    pub bcp: usize,
    pub preserve: bool,

    pub def: Option<DefState>,
    /// Locals of the current top-level unit; each unit gets a pseudo
    /// frame whose entry `Reserve` is patched at end of input.
    pub top_locals: Vec<(String, u16)>,
    pub case_stack: Vec<CaseState>,
    /// Open `(` groups at compile time, for end-of-input validation.
    pub paren_depth: u32,
    /// Open `{` blocks.
    pub brace_depth: u32,
    /// Last emitted instruction, used to fold a string literal into a
    /// capsule method name.
    pub last_emit: Option<(usize, Opcode)>,
}

impl Compiler {
    pub fn new() -> Self {
        Compiler {
            cp: MIN_USER_OPCODE,
            bcp: MIN_USER_OPCODE,
            preserve: false,
            def: None,
            top_locals: Vec::new(),
            case_stack: Vec::new(),
            paren_depth: 0,
            brace_depth: 0,
            last_emit: None,
        }
    }

    /// Abandon any partial compilation state after an error.
    pub fn reset(&mut self) {
        self.cp = self.bcp;
        self.preserve = false;
        self.def = None;
        self.top_locals.clear();
        self.case_stack.clear();
        self.paren_depth = 0;
        self.brace_depth = 0;
        self.last_emit = None;
    }

    pub fn in_definition(&self) -> bool {
        self.def.is_some()
    }

    pub fn in_capsule_clause(&self) -> bool {
        self.def
            .as_ref()
            .and_then(|d| d.capsule.as_ref())
            .is_some_and(|c| c.current.is_some())
    }

    /// Slot of a local visible at this point of compilation. Inside a
    /// definition only its own locals are in scope; at top level the
    /// unit's pseudo-frame locals are.
    pub fn local_slot(&self, name: &str) -> Option<u16> {
        let locals = match &self.def {
            Some(def) => &def.locals,
            None => &self.top_locals,
        };
        locals
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|&(_, slot)| slot)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}

impl Vm {
    pub fn compile8(&mut self, b: u8) -> anyhow::Result<()> {
        vm_ensure!(
            self.compiler.cp < CODE_BYTES,
            MemoryFault,
            "code segment full"
        );
        self.mem.write8(self.compiler.cp, b)?;
        self.compiler.cp += 1;
        Ok(())
    }

    pub fn compile16(&mut self, v: u16) -> anyhow::Result<()> {
        let [lo, hi] = v.to_le_bytes();
        self.compile8(lo)?;
        self.compile8(hi)
    }

    pub fn compile_i16(&mut self, v: i16) -> anyhow::Result<()> {
        self.compile16(v as u16)
    }

    pub fn compile_f32(&mut self, v: f32) -> anyhow::Result<()> {
        for b in v.to_bits().to_le_bytes() {
            self.compile8(b)?;
        }
        Ok(())
    }

    pub fn compile_opcode(&mut self, op: Opcode) -> anyhow::Result<()> {
        self.compiler.last_emit = Some((self.compiler.cp, op));
        trace!("emit {} at {}", op.mnemonic(), self.compiler.cp);
        self.compile8(op.into())
    }

    pub fn compile_op_u16(&mut self, op: Opcode, operand: u16) -> anyhow::Result<()> {
        self.compile_opcode(op)?;
        self.compile16(operand)
    }

    pub fn compile_op_i16(&mut self, op: Opcode, operand: i16) -> anyhow::Result<()> {
        self.compile_opcode(op)?;
        self.compile_i16(operand)
    }

    /// Call of the user word whose entry is at `addr`: two bytes, low
    /// seven address bits (with the marker bit) first.
    pub fn compile_user_call(&mut self, addr: usize) -> anyhow::Result<()> {
        vm_ensure!(
            (MIN_USER_OPCODE..CODE_BYTES).contains(&addr),
            Encoding,
            "user word address {addr} out of range"
        );
        self.compiler.last_emit = None;
        self.compile8(0x80 | (addr & 0x7F) as u8)?;
        self.compile8((addr >> 7) as u8)
    }

    /// Emit a branch with a zero offset and return the operand address
    /// for later patching.
    pub fn compile_branch_placeholder(&mut self, op: Opcode) -> anyhow::Result<usize> {
        self.compile_opcode(op)?;
        let at = self.compiler.cp;
        self.compile_i16(0)?;
        Ok(at)
    }

    /// Point the branch operand at `operand_addr` to the current code
    /// pointer. Offsets are relative to the byte after the operand.
    pub fn patch_branch(&mut self, operand_addr: usize) -> anyhow::Result<()> {
        let from = operand_addr + 2;
        let offset = self.compiler.cp as i64 - from as i64;
        vm_ensure!(
            (i16::MIN as i64..=i16::MAX as i64).contains(&offset),
            Encoding,
            "branch offset {offset} out of range"
        );
        self.mem.write16(operand_addr, (offset as i16) as u16)
    }

    pub fn patch16(&mut self, operand_addr: usize, v: u16) -> anyhow::Result<()> {
        self.mem.write16(operand_addr, v)
    }

    /// Push a literal: small integral numbers get the compact form.
    /// Negative zero keeps its sign bit via the full-width form.
    pub fn compile_literal(&mut self, v: Value) -> anyhow::Result<()> {
        if let Some(x) = v.as_number() {
            if x.fract() == 0.0
                && !(x == 0.0 && x.is_sign_negative())
                && (i16::MIN as f32..=i16::MAX as f32).contains(&x)
            {
                return self.compile_op_i16(Opcode::Literal16, x as i16);
            }
        }
        self.compile_opcode(Opcode::LiteralNumber)?;
        self.compile_f32(v.as_f32())
    }

    /// Undo the last emitted instruction; only string literals are ever
    /// retracted (capsule method names).
    pub fn retract_string_literal(&mut self) -> anyhow::Result<u16> {
        match self.compiler.last_emit.take() {
            Some((at, Opcode::LiteralString)) if at + 3 == self.compiler.cp => {
                let addr = self.mem.read16(at + 1)?;
                self.compiler.cp = at;
                Ok(addr)
            }
            _ => Err(vm_err(
                ErrorKind::Syntax,
                "capsule method name must be a string literal",
            )),
        }
    }
}
