//! Scalar arithmetic with binary flat broadcasting.
//!
//! Results are constructed directly on the data stack above the operands
//! (elements pushed in reverse logical order so each header lands on top
//! of its payload), then slid down over the operand spans. No storage
//! outside the stack region is used.

use crate::error::{vm_err, ErrorKind};
use crate::opcode::Opcode;
use crate::tagged::Value;
use crate::vm::Vm;
use crate::vm_bail;

fn scalar_binary(op: Opcode, a: f32, b: f32) -> f32 {
    match op {
        Opcode::Add => a + b,
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        Opcode::Pow => a.powf(b),
        Opcode::Mod => a % b,
        Opcode::Min => a.min(b),
        Opcode::Max => a.max(b),
        Opcode::Eq => (a == b) as u8 as f32,
        Opcode::Lt => (a < b) as u8 as f32,
        Opcode::Le => (a <= b) as u8 as f32,
        Opcode::Gt => (a > b) as u8 as f32,
        Opcode::Ge => (a >= b) as u8 as f32,
        _ => unreachable!("not a binary scalar opcode"),
    }
}

fn scalar_unary(op: Opcode, a: f32) -> f32 {
    match op {
        Opcode::Neg => -a,
        Opcode::Recip => 1.0 / a,
        Opcode::Floor => a.floor(),
        Opcode::Not => (a == 0.0) as u8 as f32,
        Opcode::Sign => {
            if a > 0.0 {
                1.0
            } else if a < 0.0 {
                -1.0
            } else {
                0.0
            }
        }
        Opcode::Sqrt => a.sqrt(),
        Opcode::Exp => a.exp(),
        Opcode::Ln => a.ln(),
        Opcode::Log => a.log10(),
        _ => unreachable!("not a unary scalar opcode"),
    }
}

pub fn is_binary(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::Div
            | Opcode::Pow
            | Opcode::Mod
            | Opcode::Min
            | Opcode::Max
            | Opcode::Eq
            | Opcode::Lt
            | Opcode::Le
            | Opcode::Gt
            | Opcode::Ge
    )
}

pub fn is_unary(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::Neg
            | Opcode::Recip
            | Opcode::Floor
            | Opcode::Not
            | Opcode::Sign
            | Opcode::Sqrt
            | Opcode::Exp
            | Opcode::Ln
            | Opcode::Log
    )
}

fn require_number(v: Value, op: Opcode) -> anyhow::Result<f32> {
    v.as_number().ok_or_else(|| {
        vm_err(
            ErrorKind::BroadcastTypeMismatch,
            format!("{} applied to {v:?}", op.mnemonic()),
        )
    })
}

fn elem_of(vm: &Vm, header: usize, index: usize) -> anyhow::Result<usize> {
    vm.elem_top_cell(header, index)?
        .ok_or_else(|| vm_err(ErrorKind::Type, "malformed list payload"))
}

/// Push `op(a, b)` for the elements topped by the given cells, recursing
/// into lists and cycling the shorter operand.
fn broadcast_pair(vm: &mut Vm, op: Opcode, a_top: usize, b_top: usize) -> anyhow::Result<()> {
    let a = vm.mem.read_cell(a_top)?;
    let b = vm.mem.read_cell(b_top)?;
    match (a.is_list(), b.is_list()) {
        (false, false) => {
            let x = require_number(a, op)?;
            let y = require_number(b, op)?;
            vm.push(Value::number(scalar_binary(op, x, y)))
        }
        (true, false) => {
            let m = vm.logical_size(a_top)?;
            let start = vm.sp;
            for j in (0..m).rev() {
                let at = elem_of(vm, a_top, j)?;
                broadcast_pair(vm, op, at, b_top)?;
            }
            let payload = vm.sp - start;
            vm.push(Value::list_header(payload as u16))
        }
        (false, true) => {
            let m = vm.logical_size(b_top)?;
            let start = vm.sp;
            for j in (0..m).rev() {
                let bt = elem_of(vm, b_top, j)?;
                broadcast_pair(vm, op, a_top, bt)?;
            }
            let payload = vm.sp - start;
            vm.push(Value::list_header(payload as u16))
        }
        (true, true) => {
            let ma = vm.logical_size(a_top)?;
            let mb = vm.logical_size(b_top)?;
            let m = if ma == 0 || mb == 0 { 0 } else { ma.max(mb) };
            let start = vm.sp;
            for j in (0..m).rev() {
                let at = elem_of(vm, a_top, j % ma)?;
                let bt = elem_of(vm, b_top, j % mb)?;
                broadcast_pair(vm, op, at, bt)?;
            }
            let payload = vm.sp - start;
            vm.push(Value::list_header(payload as u16))
        }
    }
}

fn unary_pair(vm: &mut Vm, op: Opcode, a_top: usize) -> anyhow::Result<()> {
    let a = vm.mem.read_cell(a_top)?;
    if !a.is_list() {
        let x = require_number(a, op)?;
        return vm.push(Value::number(scalar_unary(op, x)));
    }
    let m = vm.logical_size(a_top)?;
    let start = vm.sp;
    for j in (0..m).rev() {
        let at = elem_of(vm, a_top, j)?;
        unary_pair(vm, op, at)?;
    }
    let payload = vm.sp - start;
    vm.push(Value::list_header(payload as u16))
}

/// `( a b -- a.op.b )` with flat broadcasting.
pub fn binary(vm: &mut Vm, op: Opcode) -> anyhow::Result<()> {
    let (b_start, _) = vm.top_element()?;
    let (a_start, _) = vm.element_ending_at(b_start)?;
    let result_start = vm.sp;
    if let Err(e) = broadcast_pair(vm, op, b_start - 1, vm.sp - 1) {
        // leave the operands untouched
        vm.sp = result_start;
        return Err(e);
    }
    let len = vm.sp - result_start;
    for i in 0..len {
        let v = vm.mem.read_cell(result_start + i)?;
        vm.mem.write_cell(a_start + i, v)?;
    }
    vm.sp = a_start + len;
    Ok(())
}

/// `( a -- op.a )` with the unary analogue of broadcasting.
pub fn unary(vm: &mut Vm, op: Opcode) -> anyhow::Result<()> {
    let (a_start, _) = vm.top_element()?;
    let result_start = vm.sp;
    if let Err(e) = unary_pair(vm, op, vm.sp - 1) {
        vm.sp = result_start;
        return Err(e);
    }
    let len = vm.sp - result_start;
    for i in 0..len {
        let v = vm.mem.read_cell(result_start + i)?;
        vm.mem.write_cell(a_start + i, v)?;
    }
    vm.sp = a_start + len;
    Ok(())
}

/// Case-clause comparison: pop the predicate, test it against the case
/// value beneath without consuming it. DEFAULT matches anything.
pub fn of_cmp(vm: &mut Vm) -> anyhow::Result<()> {
    let pred = vm.pop()?;
    if pred.is_default() {
        return vm.push(Value::number(1.0));
    }
    let case_value = vm.peek()?;
    let matched = match (pred.as_number(), case_value.as_number()) {
        (Some(x), Some(y)) => x == y,
        _ => pred == case_value,
    };
    vm.push(Value::number(matched as u8 as f32))
}

pub fn run_binary_or_unary(vm: &mut Vm, op: Opcode) -> anyhow::Result<()> {
    if is_binary(op) {
        binary(vm, op)
    } else if is_unary(op) {
        unary(vm, op)
    } else {
        vm_bail!(Type, "{} is not an arithmetic opcode", op.mnemonic())
    }
}
