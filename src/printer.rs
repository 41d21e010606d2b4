//! Console formatting for `.`, `raw` and error snapshots. The core only
//! appends to the VM's output buffer; the host decides where it goes.

use crate::opcode::Opcode;
use crate::tagged::{Tag, Value};
use crate::vm::Vm;

/// One simple cell. Lists are handled by [`format_element`].
pub fn format_simple(vm: &Vm, v: Value) -> String {
    match v.tag() {
        Tag::Number => format_number(v.as_f32()),
        Tag::Sentinel => match v.payload_i16() {
            0 => "NIL".into(),
            1 => "DEFAULT".into(),
            n => format!("SENTINEL({n})"),
        },
        Tag::String => vm
            .digest
            .get(v.payload())
            .map(str::to_owned)
            .unwrap_or_else(|_| format!("<string {}>", v.payload())),
        Tag::Code => format!("<code {}>", v.payload()),
        Tag::Builtin => match Opcode::try_from((v.payload() & 0xFF) as u8) {
            Ok(op) if !v.meta() => format!("<builtin {}>", op.mnemonic()),
            _ => format!("<immediate {}>", v.payload()),
        },
        Tag::Local => format!("<local {}>", v.payload()),
        Tag::List => format!("LIST({})", v.payload()),
        Tag::StackRef => format!("<stack-ref {}>", v.payload()),
        Tag::RstackRef => format!("<rstack-ref {}>", v.payload()),
        Tag::GlobalRef | Tag::DataRef => format!("<data-ref {}>", v.payload()),
    }
}

fn format_number(x: f32) -> String {
    if x.fract() == 0.0 && x.abs() < 1e9 {
        format!("{}", x as i64)
    } else {
        format!("{x}")
    }
}

/// The element whose top cell is `top`, recursing into list payloads.
pub fn format_element(vm: &Vm, top: usize) -> anyhow::Result<String> {
    let v = vm.mem.read_cell(top)?;
    if !v.is_list() {
        return Ok(format_simple(vm, v));
    }
    let mut parts = Vec::new();
    let m = vm.logical_size(top)?;
    for j in 0..m {
        let elem = vm
            .elem_top_cell(top, j)?
            .expect("logical_size bounds the walk");
        parts.push(format_element(vm, elem)?);
    }
    if parts.is_empty() {
        Ok("( )".into())
    } else {
        Ok(format!("( {} )", parts.join(" ")))
    }
}

/// `.`: pop one element (a list with its whole payload) and print it.
pub fn print_top(vm: &mut Vm) -> anyhow::Result<()> {
    let (start, _) = vm.top_element()?;
    let text = format_element(vm, vm.sp - 1)?;
    vm.sp = start;
    vm.output.push_str(&text);
    vm.output.push('\n');
    Ok(())
}

/// `raw`: pop one cell and print its undecoded bits next to its decoded
/// form.
pub fn print_raw(vm: &mut Vm) -> anyhow::Result<()> {
    let v = vm.pop()?;
    vm.output
        .push_str(&format!("{:#010x} {v:?}\n", v.bits()));
    Ok(())
}

/// Raw-cell view of the data stack, bottom to top, for error reports and
/// the dump tools.
pub fn stack_snapshot(vm: &Vm) -> String {
    let cells = vm.stack_data();
    let parts: Vec<String> = cells.iter().map(|v| format_simple(vm, *v)).collect();
    format!("[{}]", parts.join(", "))
}

/// At most the top `limit` cells, for one-line error context.
pub fn stack_snapshot_top(vm: &Vm, limit: usize) -> String {
    let cells = vm.stack_data();
    let skipped = cells.len().saturating_sub(limit);
    let parts: Vec<String> = cells[skipped..]
        .iter()
        .map(|v| format_simple(vm, *v))
        .collect();
    if skipped > 0 {
        format!("[... {}]", parts.join(", "))
    } else {
        format!("[{}]", parts.join(", "))
    }
}
