//! The dictionary: a linked list of 4-cell records on the heap.
//!
//! ```text
//! cell a+0  payload (BUILTIN, CODE, GLOBAL_REF or any tagged value)
//! cell a+1  STRING ref of the name
//! cell a+2  DATA_REF of the previous entry, or NIL
//! cell a+3  LIST(3) header; entries are addressed by this cell
//! ```
//!
//! The head is a single DATA_REF register; `mark`/`forget` checkpoint and
//! rewind both the head and the heap pointer.

use log::debug;

use crate::immediates::Immediate;
use crate::opcode::Opcode;
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::vm_ensure;

pub const ENTRY_CELLS: usize = 4;

/// Create a dictionary entry. An immediate entry carries the meta bit on
/// its payload.
pub fn define(vm: &mut Vm, name: &str, payload: Value, immediate: bool) -> anyhow::Result<()> {
    let name_addr = vm.digest.add(name)?;
    let base = vm.alloc_data(ENTRY_CELLS)?;
    let payload = if immediate {
        Value::boxed(payload.tag(), payload.payload(), true)
    } else {
        payload
    };
    vm.mem.write_cell(base, payload)?;
    vm.mem
        .write_cell(base + 1, Value::boxed(Tag::String, name_addr, false))?;
    vm.mem.write_cell(base + 2, vm.dict_head)?;
    vm.mem.write_cell(base + 3, Value::list_header(3))?;
    vm.dict_head = Value::boxed(Tag::DataRef, (base + 3) as u16, false);
    debug!("define {name} -> {payload:?}");
    Ok(())
}

/// Find the newest entry for `name` and return its payload (meta bit set
/// for immediates).
pub fn lookup(vm: &Vm, name: &str) -> anyhow::Result<Option<Value>> {
    let Some(name_addr) = vm.digest.find(name) else {
        return Ok(None);
    };
    let mut cur = vm.dict_head;
    while let Some(header) = cur.target_cell() {
        let entry_name = vm.mem.read_cell(header - 2)?;
        if entry_name.tag() == Tag::String && entry_name.payload() == name_addr {
            return Ok(Some(vm.mem.read_cell(header - 3)?));
        }
        cur = vm.mem.read_cell(header - 1)?;
    }
    Ok(None)
}

/// Resolve `name` and push its payload on the data stack.
pub fn push_symbol_ref(vm: &mut Vm, name: &str) -> anyhow::Result<()> {
    match lookup(vm, name)? {
        Some(payload) => vm.push(payload),
        None => crate::vm_bail!(UndefinedWord, "{name} is not defined"),
    }
}

/// Checkpoint the dictionary and heap.
pub fn mark(vm: &mut Vm) -> anyhow::Result<()> {
    vm.marks.push((vm.dict_head, vm.heap_top));
    debug!("mark at heap {}", vm.heap_top);
    Ok(())
}

/// Rewind to the most recent checkpoint, discarding everything defined
/// since.
pub fn forget(vm: &mut Vm) -> anyhow::Result<()> {
    let Some((head, heap_top)) = vm.marks.pop() else {
        crate::vm_bail!(Type, "forget without a mark");
    };
    vm_ensure!(
        heap_top <= vm.heap_top,
        Type,
        "mark is newer than the heap it checkpoints"
    );
    vm.dict_head = head;
    vm.heap_top = heap_top;
    debug!("forget back to heap {heap_top}");
    Ok(())
}

fn builtin(op: Opcode) -> Value {
    Value::boxed(Tag::Builtin, u8::from(op) as u16, false)
}

fn immediate(imm: Immediate) -> Value {
    Value::boxed(Tag::Builtin, u16::from(imm), false)
}

/// Populate the dictionary with every builtin word and immediate. Runs
/// once at startup; the word set is closed afterwards.
pub fn register_builtins(vm: &mut Vm) -> anyhow::Result<()> {
    use Opcode::*;
    let words: &[(&str, Opcode)] = &[
        ("add", Add),
        ("+", Add),
        ("sub", Sub),
        ("-", Sub),
        ("mul", Mul),
        ("*", Mul),
        ("div", Div),
        ("/", Div),
        ("pow", Pow),
        ("mod", Mod),
        ("min", Min),
        ("max", Max),
        ("eq", Eq),
        ("lt", Lt),
        ("le", Le),
        ("gt", Gt),
        ("ge", Ge),
        ("neg", Neg),
        ("recip", Recip),
        ("floor", Floor),
        ("not", Not),
        ("sign", Sign),
        ("sqrt", Sqrt),
        ("exp", Exp),
        ("ln", Ln),
        ("log", Log),
        ("dup", Dup),
        ("drop", Drop),
        ("swap", Swap),
        ("over", Over),
        ("rot", Rot),
        ("revrot", RevRot),
        ("nip", Nip),
        ("tuck", Tuck),
        ("pick", Pick),
        ("length", Length),
        ("size", Size),
        ("head", Head),
        ("tail", Tail),
        ("uncons", Uncons),
        ("cons", Cons),
        ("drop-head", DropHead),
        ("concat", Concat),
        ("reverse", Reverse),
        ("pack", Pack),
        ("unpack", Unpack),
        ("enlist", Enlist),
        ("slot", Slot),
        ("elem", Elem),
        ("fetch", Fetch),
        ("store", Store),
        ("ref", Ref),
        ("unref", Unref),
        ("walk", Walk),
        ("find", Find),
        ("keys", Keys),
        ("values", Values),
        ("select", Select),
        ("eval", Eval),
        ("dispatch", Dispatch),
        ("mark", Mark),
        ("forget", Forget),
        (".", Print),
        ("raw", RawPrint),
    ];
    for &(name, op) in words {
        define(vm, name, builtin(op), false)?;
    }

    use Immediate::*;
    let immediates: &[(&str, Immediate)] = &[
        (":", Colon),
        (";", Semicolon),
        ("if", If),
        ("else", Else),
        ("case", Case),
        ("of", Of),
        ("default", Default),
        ("var", Var),
        ("global", Global),
        ("capsule", Capsule),
        ("does", Does),
        ("include", Include),
    ];
    for &(name, imm) in immediates {
        define(vm, name, immediate(imm), true)?;
    }

    define(vm, "nil", Value::NIL, false)?;
    Ok(())
}
