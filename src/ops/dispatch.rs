//! Capsule dispatch: resolve the receiver's method table, look the
//! method up by name, and call it with the receiver bound as the frame's
//! field base.
//!
//! The method table reference is always the physically lowest payload
//! cell of the capsule list (the constructor pushes it last, so the
//! closing reversal lands it at `header - slots`).

use log::trace;

use crate::error::{vm_err, ErrorKind};
use crate::ops::{list, maplist};
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::vm_ensure;

/// Chase references until a list header is found.
fn resolve_receiver(vm: &Vm, receiver: Value) -> anyhow::Result<usize> {
    let mut cell = receiver
        .target_cell()
        .ok_or_else(|| vm_err(ErrorKind::Dispatch, "receiver is not a reference"))?;
    for _ in 0..4 {
        let v = vm.mem.read_cell(cell)?;
        if v.is_list() {
            return Ok(cell);
        }
        match v.target_cell() {
            Some(next) => cell = next,
            None => break,
        }
    }
    Err(vm_err(ErrorKind::Dispatch, "receiver is not a capsule"))
}

/// `( args... name receiver -- args... results... )`.
pub fn dispatch(vm: &mut Vm) -> anyhow::Result<()> {
    let receiver = vm.pop()?;
    let name = vm.pop()?;
    vm_ensure!(
        name.tag() == Tag::String,
        Dispatch,
        "method name must be a string"
    );

    let header = resolve_receiver(vm, receiver)?;
    let hdr = vm.mem.read_cell(header)?;
    let slots = hdr.payload() as usize;
    vm_ensure!(slots >= 1, Dispatch, "receiver has no method table");

    let table_ref = vm.mem.read_cell(header - slots)?;
    let table = table_ref
        .target_cell()
        .ok_or_else(|| vm_err(ErrorKind::Dispatch, "receiver has no method table"))?;

    let default_key = vm.digest.find("default");
    let Some(value_cell) = maplist::find_in(vm, table, name, default_key)? else {
        let text = vm.digest.get(name.payload()).unwrap_or("?");
        return Err(vm_err(
            ErrorKind::Dispatch,
            format!("no method {text:?} on receiver"),
        ));
    };
    let method = vm.mem.read_cell(value_cell)?;
    vm_ensure!(
        method.tag() == Tag::Code,
        Dispatch,
        "method table entry is not code"
    );
    trace!("dispatch to {}", method.payload());

    vm.rpush(vm.receiver)?;
    vm.rpush(Value::number(vm.bp as f32))?;
    vm.rpush(Value::number(vm.ip as f32))?;
    vm.bp = vm.rsp;
    vm.receiver = list::make_ref(header)?;
    vm.ip = method.payload() as usize;
    Ok(())
}

/// Counterpart of the method prologue set up by `dispatch`.
pub fn exit_method(vm: &mut Vm) -> anyhow::Result<()> {
    vm.rsp = vm.bp;
    let ret = vm
        .rpop()?
        .as_number()
        .ok_or_else(|| vm_err(ErrorKind::Dispatch, "method frame corrupted"))?;
    let saved_bp = vm
        .rpop()?
        .as_number()
        .ok_or_else(|| vm_err(ErrorKind::Dispatch, "method frame corrupted"))?;
    let saved_receiver = vm.rpop()?;
    vm.ip = ret as usize;
    vm.bp = saved_bp as usize;
    vm.receiver = saved_receiver;
    Ok(())
}
