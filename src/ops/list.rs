//! List construction, queries and addressing.
//!
//! A list is a contiguous run of cells ending in a LIST header whose
//! payload is the slot count. The header sits at the highest address, so
//! on the data stack it is the top cell; logical elements are walked
//! downward from just below it. One reversal at the close of the
//! outermost `(` puts nested structures into this layout in a single
//! pass.

use num_traits::AsPrimitive;

use crate::error::{vm_err, ErrorKind};
use crate::mem::{segment_of, Segment};
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::{vm_bail, vm_ensure};

pub fn make_ref(cell: usize) -> anyhow::Result<Value> {
    let tag = match segment_of(cell) {
        Segment::Stack => Tag::StackRef,
        Segment::Rstack => Tag::RstackRef,
        Segment::Data => Tag::DataRef,
        Segment::Code => {
            return Err(vm_err(ErrorKind::Type, "cannot reference the code segment"))
        }
    };
    Ok(Value::boxed(tag, cell as u16, false))
}

// --- construction ---

pub fn open_list(vm: &mut Vm) -> anyhow::Result<()> {
    let header = vm.sp;
    vm.push(Value::list_header(0))?;
    vm.rpush(Value::number(header as f32))?;
    vm.list_depth += 1;
    Ok(())
}

pub fn close_list(vm: &mut Vm) -> anyhow::Result<()> {
    vm_ensure!(vm.list_depth > 0, Type, "list close without an open list");
    let header = vm
        .rpop()?
        .as_number()
        .map(|x| x as usize)
        .ok_or_else(|| vm_err(ErrorKind::Type, "list construction state corrupted"))?;
    let payload = vm.sp - header - 1;
    vm.mem
        .write_cell(header, Value::list_header(payload as u16))?;
    vm.list_depth -= 1;
    if vm.list_depth == 0 {
        vm.reverse_cells(header, vm.sp)?;
    }
    Ok(())
}

// --- queries ---

fn pop_list_target(vm: &mut Vm, what: &str) -> anyhow::Result<(usize, bool)> {
    let top = vm.peek()?;
    if top.is_ref() {
        let ref_v = vm.pop()?;
        let cell = ref_v.target_cell().expect("checked is_ref");
        let target = vm.mem.read_cell(cell)?;
        vm_ensure!(target.is_list(), Type, "{what} target is not a list");
        Ok((cell, false))
    } else if top.is_list() {
        Ok((vm.sp - 1, true))
    } else {
        Err(vm_err(ErrorKind::Type, format!("{what} needs a list")))
    }
}

pub fn length(vm: &mut Vm) -> anyhow::Result<()> {
    let (header, direct) = pop_list_target(vm, "length")?;
    let n = vm.mem.read_cell(header)?.payload();
    if direct {
        let (start, _) = vm.top_element()?;
        vm.sp = start;
    }
    vm.push(Value::number(n as f32))
}

pub fn size(vm: &mut Vm) -> anyhow::Result<()> {
    let (header, direct) = pop_list_target(vm, "size")?;
    let m = vm.logical_size(header)?;
    if direct {
        let (start, _) = vm.top_element()?;
        vm.sp = start;
    }
    vm.push(Value::number(m as f32))
}

// --- structural operations (direct lists on the data stack) ---

fn top_list_header(vm: &Vm, what: &str) -> anyhow::Result<usize> {
    let top = vm.peek()?;
    vm_ensure!(top.is_list(), Type, "{what} needs a list");
    Ok(vm.sp - 1)
}

pub fn head(vm: &mut Vm) -> anyhow::Result<()> {
    materialize_if_ref(vm)?;
    let header = top_list_header(vm, "head")?;
    let (start, _) = vm.top_element()?;
    let n = vm.mem.read_cell(header)?.payload() as usize;
    if n == 0 {
        vm.sp = start;
        return vm.push(Value::NIL);
    }
    let s0 = vm.span_at(header - 1)?;
    for i in 0..s0 {
        let v = vm.mem.read_cell(header - s0 + i)?;
        vm.mem.write_cell(start + i, v)?;
    }
    vm.sp = start + s0;
    Ok(())
}

pub fn tail(vm: &mut Vm) -> anyhow::Result<()> {
    materialize_if_ref(vm)?;
    let header = top_list_header(vm, "tail")?;
    let n = vm.mem.read_cell(header)?.payload() as usize;
    if n == 0 {
        return Ok(());
    }
    let s0 = vm.span_at(header - 1)?;
    vm.mem
        .write_cell(header - s0, Value::list_header((n - s0) as u16))?;
    vm.sp = header - s0 + 1;
    Ok(())
}

pub fn uncons(vm: &mut Vm) -> anyhow::Result<()> {
    materialize_if_ref(vm)?;
    let header = top_list_header(vm, "uncons")?;
    let n = vm.mem.read_cell(header)?.payload() as usize;
    if n == 0 {
        return vm.push(Value::NIL);
    }
    let s0 = vm.span_at(header - 1)?;
    vm.rotate_left(header - s0, vm.sp, s0)?;
    vm.mem
        .write_cell(header - s0, Value::list_header((n - s0) as u16))?;
    Ok(())
}

pub fn cons(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, a_span) = vm.top_element()?;
    let header = a_start - 1;
    vm_ensure!(
        header >= crate::mem::STACK_BASE && vm.mem.read_cell(header)?.is_list(),
        Type,
        "cons needs a list under the value"
    );
    let n = vm.mem.read_cell(header)?.payload() as usize;
    // val becomes the new first element
    vm.rotate_left(header, vm.sp, 1)?;
    vm.mem
        .write_cell(vm.sp - 1, Value::list_header((n + a_span) as u16))?;
    Ok(())
}

pub fn concat(vm: &mut Vm) -> anyhow::Result<()> {
    let hb = top_list_header(vm, "concat")?;
    let nb = vm.mem.read_cell(hb)?.payload() as usize;
    let (b_start, _) = vm.top_element()?;
    let ha = b_start - 1;
    vm_ensure!(
        ha >= crate::mem::STACK_BASE && vm.mem.read_cell(ha)?.is_list(),
        Type,
        "concat needs two lists"
    );
    let na = vm.mem.read_cell(ha)?.payload() as usize;
    // a's elements end up nearest the header
    vm.sp -= 1;
    vm.rotate_left(ha - na, vm.sp, na + 1)?;
    vm.mem
        .write_cell(vm.sp - 1, Value::list_header((na + nb) as u16))?;
    Ok(())
}

pub fn reverse(vm: &mut Vm) -> anyhow::Result<()> {
    materialize_if_ref(vm)?;
    let header = top_list_header(vm, "reverse")?;
    let n = vm.mem.read_cell(header)?.payload() as usize;
    let m = vm.logical_size(header)?;
    let build_start = vm.sp;
    for j in 0..m {
        let top = vm
            .elem_top_cell(header, j)?
            .ok_or_else(|| vm_err(ErrorKind::Type, "malformed list payload"))?;
        let span = vm.span_at(top)?;
        vm.copy_span_to_top(top + 1 - span, span)?;
    }
    debug_assert_eq!(vm.sp - build_start, n);
    vm.push(Value::list_header(n as u16))?;
    vm.remove_span(header - n, n + 1)
}

pub fn pack(vm: &mut Vm) -> anyhow::Result<()> {
    let n = vm.pop()?;
    let n = n
        .as_number()
        .filter(|x| *x >= 0.0 && x.fract() == 0.0)
        .ok_or_else(|| vm_err(ErrorKind::Type, "pack count must be a whole number"))?;
    let n: usize = n.as_();
    let mut spans = Vec::with_capacity(n);
    let mut slot = 0usize;
    for _ in 0..n {
        let (next, size) = vm.find_element(slot)?;
        spans.push((vm.sp - next, size));
        slot = next;
    }
    let total: usize = spans.iter().map(|&(_, s)| s).sum();
    let region_start = vm.sp - total;
    for &(start, size) in &spans {
        vm.copy_span_to_top(start, size)?;
    }
    vm.push(Value::list_header(total as u16))?;
    vm.remove_span(region_start, total)
}

pub fn unpack(vm: &mut Vm) -> anyhow::Result<()> {
    materialize_if_ref(vm)?;
    let header = top_list_header(vm, "unpack")?;
    let n = vm.mem.read_cell(header)?.payload() as usize;
    let m = vm.logical_size(header)?;
    for j in 0..m {
        let top = vm
            .elem_top_cell(header, j)?
            .ok_or_else(|| vm_err(ErrorKind::Type, "malformed list payload"))?;
        let span = vm.span_at(top)?;
        vm.copy_span_to_top(top + 1 - span, span)?;
    }
    vm.remove_span(header - n, n + 1)
}

pub fn enlist(vm: &mut Vm) -> anyhow::Result<()> {
    let (_, span) = vm.top_element()?;
    vm.push(Value::list_header(span as u16))
}

// --- addressing ---

/// Target for an addressing operation: a reference is popped, a direct
/// list stays put so the produced reference has something to point at.
pub(crate) fn addressing_target(vm: &mut Vm, what: &str) -> anyhow::Result<usize> {
    let top = vm.peek()?;
    if top.is_ref() {
        let ref_v = vm.pop()?;
        let cell = ref_v.target_cell().expect("checked is_ref");
        let target = vm.mem.read_cell(cell)?;
        vm_ensure!(target.is_list(), Type, "{what} target is not a list");
        Ok(cell)
    } else if top.is_list() {
        Ok(vm.sp - 1)
    } else {
        Err(vm_err(ErrorKind::Type, format!("{what} needs a list")))
    }
}

fn pop_index(vm: &mut Vm, what: &str) -> anyhow::Result<usize> {
    let idx = vm.pop()?;
    let idx = idx
        .as_number()
        .filter(|x| *x >= 0.0 && x.fract() == 0.0)
        .ok_or_else(|| vm_err(ErrorKind::Type, format!("{what} index must be a whole number")))?;
    Ok(idx.as_())
}

pub fn slot(vm: &mut Vm) -> anyhow::Result<()> {
    let idx = pop_index(vm, "slot")?;
    let header = addressing_target(vm, "slot")?;
    let n = vm.mem.read_cell(header)?.payload() as usize;
    if idx >= n {
        return vm.push(Value::NIL);
    }
    let r = make_ref(header - 1 - idx)?;
    vm.push(r)
}

pub fn elem(vm: &mut Vm) -> anyhow::Result<()> {
    let idx = pop_index(vm, "elem")?;
    let header = addressing_target(vm, "elem")?;
    match vm.elem_top_cell(header, idx)? {
        Some(cell) => {
            let r = make_ref(cell)?;
            vm.push(r)
        }
        None => vm.push(Value::NIL),
    }
}

pub fn fetch(vm: &mut Vm) -> anyhow::Result<()> {
    let ref_v = vm.pop()?;
    let cell = ref_v
        .target_cell()
        .ok_or_else(|| vm_err(ErrorKind::Type, "fetch needs a reference"))?;
    let v = vm.mem.read_cell(cell)?;
    if v.is_list() {
        let n = v.payload() as usize;
        vm.copy_span_to_top(cell - n, n + 1)
    } else {
        vm.push(v)
    }
}

/// `( val ref -- )`. Stores chase one level of indirection so variables
/// holding a reference to their compound data accept writes through it.
pub fn store(vm: &mut Vm) -> anyhow::Result<()> {
    let ref_v = vm.pop()?;
    if ref_v.is_nil() {
        vm_bail!(AssignmentShape, "store through NIL");
    }
    let mut cell = ref_v
        .target_cell()
        .ok_or_else(|| vm_err(ErrorKind::Type, "store needs a reference"))?;
    let mut target = vm.mem.read_cell(cell)?;
    if target.is_ref() {
        cell = target.target_cell().expect("checked is_ref");
        target = vm.mem.read_cell(cell)?;
    }

    let (val_start, val_span) = vm.top_element()?;
    if val_span == 1 {
        let v = vm.mem.read_cell(val_start)?;
        vm.sp = val_start;
        if target.is_list() {
            // compound targets are not overwritten scalar-wise
            return Ok(());
        }
        return vm.mem.write_cell(cell, v);
    }

    // compound value: shapes must agree exactly
    let val_header = vm.mem.read_cell(vm.sp - 1)?;
    vm_ensure!(
        target.is_list(),
        AssignmentShape,
        "compound value stored into a simple cell"
    );
    vm_ensure!(
        target.payload() == val_header.payload(),
        AssignmentShape,
        "list of {} slots stored into list of {} slots",
        val_header.payload(),
        target.payload()
    );
    let n = target.payload() as usize;
    for i in 0..=n {
        let v = vm.mem.read_cell(val_start + i)?;
        vm.mem.write_cell(cell - n + i, v)?;
    }
    vm.sp = val_start;
    Ok(())
}

pub fn ref_op(vm: &mut Vm) -> anyhow::Result<()> {
    let top = vm.peek()?;
    if top.is_list() {
        let r = make_ref(vm.sp - 1)?;
        vm.push(r)?;
    }
    Ok(())
}

pub fn unref(vm: &mut Vm) -> anyhow::Result<()> {
    if vm.peek()?.is_ref() {
        return fetch(vm);
    }
    Ok(())
}

fn materialize_if_ref(vm: &mut Vm) -> anyhow::Result<()> {
    unref(vm)
}

pub fn walk(vm: &mut Vm) -> anyhow::Result<()> {
    let idx = pop_index(vm, "walk")?;
    let ref_v = vm.pop()?;
    let header = ref_v
        .target_cell()
        .ok_or_else(|| vm_err(ErrorKind::Type, "walk needs a reference"))?;
    let hdr = vm.mem.read_cell(header)?;
    vm_ensure!(hdr.is_list(), Type, "walk target is not a list");
    let n = hdr.payload() as usize;
    if idx >= n {
        vm.push(Value::NIL)?;
        return vm.push(Value::number(0.0));
    }
    let cell = header - 1 - idx;
    let span = vm.span_at(cell)?;
    let r = make_ref(cell)?;
    vm.push(r)?;
    vm.push(Value::number((idx + span) as f32))
}
