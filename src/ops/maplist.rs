//! Maplists: lists read as alternating key/value pairs.

use crate::error::{vm_err, ErrorKind};
use crate::ops::list::{addressing_target, make_ref};
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::vm_ensure;

fn values_equal(a: Value, b: Value) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

pub fn find_in(vm: &Vm, header: usize, key: Value, default_key: Option<u16>) -> anyhow::Result<Option<usize>> {
    let hdr = vm.mem.read_cell(header)?;
    vm_ensure!(hdr.is_list(), Type, "find target is not a list");
    let payload = hdr.payload() as usize;
    let mut cursor = header; // one above the next element's top cell
    let mut used = 0usize;
    let mut fallback = None;
    loop {
        if used >= payload {
            return Ok(fallback);
        }
        let key_cell = cursor - 1;
        let key_span = vm.span_at(key_cell)?;
        used += key_span;
        if used >= payload {
            // dangling key with no value
            return Ok(fallback);
        }
        let val_cell = cursor - 1 - key_span;
        let val_span = vm.span_at(val_cell)?;
        used += val_span;
        vm_ensure!(used <= payload, Type, "malformed maplist payload");

        if key_span == 1 {
            let k = vm.mem.read_cell(key_cell)?;
            if values_equal(k, key) {
                return Ok(Some(val_cell));
            }
            if fallback.is_none()
                && k.tag() == Tag::String
                && Some(k.payload()) == default_key
            {
                fallback = Some(val_cell);
            }
        }
        cursor = val_cell + 1 - val_span;
    }
}

pub fn find(vm: &mut Vm) -> anyhow::Result<()> {
    let key = vm.pop()?;
    vm_ensure!(!key.is_list(), Type, "find key must be a simple value");
    let header = addressing_target(vm, "find")?;
    let default_key = vm.digest.find("default");
    match find_in(vm, header, key, default_key)? {
        Some(cell) => {
            let r = make_ref(cell)?;
            vm.push(r)
        }
        None => vm.push(Value::NIL),
    }
}

fn collect_alternating(vm: &mut Vm, what: &str, odd: bool) -> anyhow::Result<()> {
    let header = addressing_target(vm, what)?;
    let m = vm.logical_size(header)?;
    let mut picked = Vec::new();
    let mut j = if odd { 1 } else { 0 };
    while j < m {
        let top = vm
            .elem_top_cell(header, j)?
            .ok_or_else(|| vm_err(ErrorKind::Type, "malformed maplist payload"))?;
        let span = vm.span_at(top)?;
        picked.push((top + 1 - span, span));
        j += 2;
    }
    // last logical element ends up deepest
    let mut total = 0usize;
    for &(start, span) in picked.iter().rev() {
        vm.copy_span_to_top(start, span)?;
        total += span;
    }
    vm.push(Value::list_header(total as u16))
}

pub fn keys(vm: &mut Vm) -> anyhow::Result<()> {
    collect_alternating(vm, "keys", false)
}

pub fn values(vm: &mut Vm) -> anyhow::Result<()> {
    collect_alternating(vm, "values", true)
}
