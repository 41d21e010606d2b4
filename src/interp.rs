//! The fetch/dispatch loop.
//!
//! One byte is fetched per instruction; a set high bit folds the next
//! byte in as a 15-bit user-word call address. Built-ins read their
//! inline operands and run to completion; there are no suspension
//! points.

use log::trace;

use crate::error::{vm_err, ErrorKind};
use crate::opcode::Opcode;
use crate::ops::{arith, dispatch, list, maplist, refs, stack};
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::{dict, parser, printer, vm_bail};

pub fn execute(vm: &mut Vm, entry: usize) -> anyhow::Result<()> {
    vm.ip = entry;
    vm.running = true;
    while vm.running {
        step(vm)?;
    }
    Ok(())
}

/// Call a compiled word and run until it exits; the return address is
/// the `Halt` permanently planted at code address zero.
pub fn execute_word(vm: &mut Vm, entry: usize) -> anyhow::Result<()> {
    vm.rpush(Value::number(vm.bp as f32))?;
    vm.rpush(Value::number(0.0))?;
    vm.bp = vm.rsp;
    execute(vm, entry)
}

fn call(vm: &mut Vm, addr: usize) -> anyhow::Result<()> {
    vm.rpush(Value::number(vm.bp as f32))?;
    vm.rpush(Value::number(vm.ip as f32))?;
    vm.bp = vm.rsp;
    vm.ip = addr;
    Ok(())
}

fn exit(vm: &mut Vm) -> anyhow::Result<()> {
    vm.rsp = vm.bp;
    let ret = vm
        .rpop()?
        .as_number()
        .ok_or_else(|| vm_err(ErrorKind::Type, "return stack frame corrupted"))?;
    let saved_bp = vm
        .rpop()?
        .as_number()
        .ok_or_else(|| vm_err(ErrorKind::Type, "return stack frame corrupted"))?;
    vm.ip = ret as usize;
    vm.bp = saved_bp as usize;
    Ok(())
}

fn fetch8(vm: &mut Vm) -> anyhow::Result<u8> {
    let b = vm.mem.read8(vm.ip)?;
    vm.ip += 1;
    Ok(b)
}

fn fetch16(vm: &mut Vm) -> anyhow::Result<u16> {
    let v = vm.mem.read16(vm.ip)?;
    vm.ip += 2;
    Ok(v)
}

fn fetch_i16(vm: &mut Vm) -> anyhow::Result<i16> {
    Ok(fetch16(vm)? as i16)
}

fn fetch_f32(vm: &mut Vm) -> anyhow::Result<f32> {
    let v = vm.mem.read_f32(vm.ip)?;
    vm.ip += 4;
    Ok(v)
}

fn branch_to(vm: &mut Vm, offset: i16) -> anyhow::Result<()> {
    let target = vm.ip as i64 + offset as i64;
    if !(0..crate::mem::CODE_BYTES as i64).contains(&target) {
        vm_bail!(MemoryFault, "branch to {target} outside the code segment");
    }
    vm.ip = target as usize;
    Ok(())
}

pub fn step(vm: &mut Vm) -> anyhow::Result<()> {
    let b0 = fetch8(vm)?;
    if b0 & 0x80 != 0 {
        let b1 = fetch8(vm)?;
        let addr = (b0 & 0x7F) as usize | ((b1 as usize) << 7);
        return call(vm, addr);
    }
    let op = Opcode::try_from(b0)
        .map_err(|_| vm_err(ErrorKind::MemoryFault, format!("invalid opcode byte {b0}")))?;
    trace!("step {} at {}", op.mnemonic(), vm.ip - 1);
    match op {
        Opcode::Halt => {
            vm.running = false;
            Ok(())
        }
        Opcode::Exit => exit(vm),
        Opcode::ExitMethod => dispatch::exit_method(vm),
        Opcode::Reserve => {
            let n = fetch16(vm)? as usize;
            let top = vm.rsp + n;
            if top > crate::mem::RSTACK_BASE + crate::mem::RSTACK_CELLS {
                vm_bail!(StackOverflow, "no room for {n} locals");
            }
            vm.rsp = top;
            Ok(())
        }
        Opcode::Branch => {
            let off = fetch_i16(vm)?;
            branch_to(vm, off)
        }
        Opcode::BranchFalse => {
            let off = fetch_i16(vm)?;
            let cond = vm.pop()?;
            if !cond.is_truthy() {
                branch_to(vm, off)?;
            }
            Ok(())
        }
        Opcode::LiteralNumber => {
            let x = fetch_f32(vm)?;
            vm.push(Value::number(x))
        }
        Opcode::Literal16 => {
            let x = fetch_i16(vm)?;
            vm.push(Value::number(x as f32))
        }
        Opcode::LiteralString => {
            let addr = fetch16(vm)?;
            vm.push(Value::boxed(Tag::String, addr, false))
        }
        Opcode::LiteralCode => {
            let addr = fetch16(vm)?;
            vm.push(Value::boxed(Tag::Code, addr, false))
        }
        Opcode::LocalRef => {
            let slot = fetch16(vm)?;
            refs::local_ref(vm, slot)
        }
        Opcode::GlobalRef => {
            let addr = fetch16(vm)?;
            refs::global_ref(vm, addr)
        }
        Opcode::InitVar => {
            let slot = fetch16(vm)?;
            refs::init_var(vm, slot)
        }
        Opcode::GlobalInit => {
            let anchor = fetch16(vm)?;
            refs::global_init(vm, anchor)
        }
        Opcode::FieldRef => {
            let slot = fetch16(vm)?;
            refs::field_ref(vm, slot)
        }
        Opcode::Eval => eval(vm),
        _ => run_simple(vm, op),
    }
}

pub fn run_simple(vm: &mut Vm, op: Opcode) -> anyhow::Result<()> {
    match op {
        Opcode::Print => printer::print_top(vm),
        Opcode::RawPrint => printer::print_raw(vm),
        Opcode::Select => refs::select(vm),
        Opcode::Fetch => list::fetch(vm),
        Opcode::Store => list::store(vm),
        Opcode::Ref => list::ref_op(vm),
        Opcode::Unref => list::unref(vm),
        Opcode::Walk => list::walk(vm),
        Opcode::Dup => stack::dup(vm),
        Opcode::Drop => stack::drop(vm),
        Opcode::Swap => stack::swap(vm),
        Opcode::Over => stack::over(vm),
        Opcode::Rot => stack::rot(vm),
        Opcode::RevRot => stack::revrot(vm),
        Opcode::Nip => stack::nip(vm),
        Opcode::Tuck => stack::tuck(vm),
        Opcode::Pick => stack::pick(vm),
        Opcode::OpenList => list::open_list(vm),
        Opcode::CloseList => list::close_list(vm),
        Opcode::Length => list::length(vm),
        Opcode::Size => list::size(vm),
        Opcode::Head => list::head(vm),
        Opcode::Tail | Opcode::DropHead => list::tail(vm),
        Opcode::Uncons => list::uncons(vm),
        Opcode::Cons => list::cons(vm),
        Opcode::Concat => list::concat(vm),
        Opcode::Reverse => list::reverse(vm),
        Opcode::Pack => list::pack(vm),
        Opcode::Unpack => list::unpack(vm),
        Opcode::Enlist => list::enlist(vm),
        Opcode::Slot => list::slot(vm),
        Opcode::Elem => list::elem(vm),
        Opcode::Find => maplist::find(vm),
        Opcode::Keys => maplist::keys(vm),
        Opcode::Values => maplist::values(vm),
        Opcode::OfCmp => arith::of_cmp(vm),
        Opcode::Mark => dict::mark(vm),
        Opcode::Forget => dict::forget(vm),
        Opcode::Dispatch => dispatch::dispatch(vm),
        op if arith::is_binary(op) || arith::is_unary(op) => {
            arith::run_binary_or_unary(vm, op)
        }
        op => vm_bail!(Type, "{} cannot run without operands", op.mnemonic()),
    }
}

fn eval(vm: &mut Vm) -> anyhow::Result<()> {
    let v = vm.pop()?;
    match v.tag() {
        Tag::Code => call(vm, v.payload() as usize),
        Tag::Builtin => {
            let op = Opcode::try_from((v.payload() & 0xFF) as u8)
                .map_err(|_| vm_err(ErrorKind::Type, "eval of an unknown builtin"))?;
            if op.operand_bytes() != 0 {
                vm_bail!(Type, "{} cannot run without operands", op.mnemonic());
            }
            run_simple(vm, op)
        }
        _ => Err(vm_err(ErrorKind::Type, format!("eval of {v:?}"))),
    }
}

/// Compile one source unit, run it, and rewind the transient code
/// unless the unit defined something worth preserving.
pub fn interpret(vm: &mut Vm, src: &str) -> anyhow::Result<()> {
    let entry = vm.compiler.bcp;
    vm.compiler.cp = entry;
    vm.compiler.preserve = false;
    parser::compile_source(vm, src)?;
    // each unit gets a fresh top-level frame
    vm.rsp = crate::mem::RSTACK_BASE;
    vm.bp = crate::mem::RSTACK_BASE;
    execute(vm, entry)?;
    if vm.compiler.preserve {
        vm.compiler.bcp = vm.compiler.cp;
    } else {
        vm.compiler.cp = vm.compiler.bcp;
    }
    Ok(())
}
