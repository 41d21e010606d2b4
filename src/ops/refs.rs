//! Variable access: local slots, global anchors, capsule fields and the
//! `select` path walk.
//!
//! A global owns a one-cell anchor on the heap. A simple value lives in
//! the anchor itself; a compound value lives in its own heap span with
//! the anchor holding a DATA_REF to the header. Locals mirror this on
//! the return stack: a compound initialiser is moved above the reserved
//! slots and the slot cell keeps an RSTACK_REF to its header.

use log::debug;

use crate::error::{vm_err, ErrorKind};
use crate::ops::{list, maplist};
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::{vm_bail, vm_ensure};

/// Cell of local slot `k` in the current frame.
pub fn local_cell(vm: &Vm, slot: u16) -> usize {
    vm.bp + 2 + slot as usize
}

pub fn local_ref(vm: &mut Vm, slot: u16) -> anyhow::Result<()> {
    let cell = local_cell(vm, slot);
    vm.push(Value::boxed(Tag::RstackRef, cell as u16, false))
}

pub fn global_ref(vm: &mut Vm, addr: u16) -> anyhow::Result<()> {
    vm.push(Value::boxed(Tag::DataRef, addr, false))
}

/// Reference to field `k` of the receiver of the executing method.
pub fn field_ref(vm: &mut Vm, slot: u16) -> anyhow::Result<()> {
    let header = vm
        .receiver
        .target_cell()
        .ok_or_else(|| vm_err(ErrorKind::Dispatch, "field access outside a method"))?;
    let hdr = vm.mem.read_cell(header)?;
    vm_ensure!(hdr.is_list(), Dispatch, "receiver is not a capsule");
    let n = hdr.payload() as usize;
    vm_ensure!(
        (slot as usize) < n,
        Dispatch,
        "field {slot} outside the receiver"
    );
    let r = list::make_ref(header - 1 - slot as usize)?;
    vm.push(r)
}

/// `var` initialiser: a simple value is written into the slot cell; a
/// compound value moves to the top of the frame's local area and the
/// slot keeps a reference to its header.
pub fn init_var(vm: &mut Vm, slot: u16) -> anyhow::Result<()> {
    let (start, span) = vm.top_element()?;
    let cell = local_cell(vm, slot);
    if span == 1 {
        let v = vm.mem.read_cell(start)?;
        vm.sp = start;
        return vm.mem.write_cell(cell, v);
    }
    let header = vm.rsp + span - 1;
    for i in 0..span {
        let v = vm.mem.read_cell(start + i)?;
        vm.rpush(v)?;
    }
    vm.sp = start;
    vm.mem
        .write_cell(cell, Value::boxed(Tag::RstackRef, header as u16, false))
}

/// `global` initialiser: allocate compound storage on first write.
pub fn global_init(vm: &mut Vm, anchor: u16) -> anyhow::Result<()> {
    let (start, span) = vm.top_element()?;
    if span == 1 {
        let v = vm.mem.read_cell(start)?;
        vm.sp = start;
        return vm.mem.write_cell(anchor as usize, v);
    }
    let base = vm.alloc_data(span)?;
    for i in 0..span {
        let v = vm.mem.read_cell(start + i)?;
        vm.mem.write_cell(base + i, v)?;
    }
    vm.sp = start;
    debug!("global at {anchor} holds {span} cells at {base}");
    vm.mem.write_cell(
        anchor as usize,
        Value::boxed(Tag::DataRef, (base + span - 1) as u16, false),
    )
}

/// `( target path -- target ref|NIL )`: walk a path of element indices
/// and maplist keys down into a nested structure.
pub fn select(vm: &mut Vm) -> anyhow::Result<()> {
    // collect the path; a simple value acts as a one-step path
    let (path_start, path_span) = vm.top_element()?;
    let mut path = Vec::with_capacity(path_span);
    if path_span == 1 {
        let step = vm.mem.read_cell(path_start)?;
        // a lone header is the empty path
        if !step.is_list() {
            path.push(step);
        }
    } else {
        let header = vm.sp - 1;
        let m = vm.logical_size(header)?;
        for j in 0..m {
            let top = vm
                .elem_top_cell(header, j)?
                .ok_or_else(|| vm_err(ErrorKind::Type, "malformed list payload"))?;
            let step = vm.mem.read_cell(top)?;
            vm_ensure!(!step.is_list(), Type, "path elements must be simple");
            path.push(step);
        }
    }
    vm.sp = path_start;

    // the target stays; navigation starts at its cell
    let target = vm.peek()?;
    let mut cell = match target.target_cell() {
        Some(c) => c,
        None => vm.sp - 1,
    };

    let default_key = vm.digest.find("default");
    for step in path {
        let mut v = vm.mem.read_cell(cell)?;
        if v.is_ref() {
            cell = v.target_cell().expect("checked is_ref");
            v = vm.mem.read_cell(cell)?;
        }
        if !v.is_list() {
            return vm.push(Value::NIL);
        }
        let next = if let Some(x) = step.as_number() {
            if x < 0.0 || x.fract() != 0.0 {
                return vm.push(Value::NIL);
            }
            vm.elem_top_cell(cell, x as usize)?
        } else if step.tag() == Tag::String {
            maplist::find_in(vm, cell, step, default_key)?
        } else {
            vm_bail!(Type, "path steps must be numbers or strings");
        };
        match next {
            Some(c) => cell = c,
            None => return vm.push(Value::NIL),
        }
    }
    let r = list::make_ref(cell)?;
    vm.push(r)
}
