use num_traits::AsPrimitive;

use crate::error::{vm_err, ErrorKind};
use crate::vm::Vm;

pub fn dup(vm: &mut Vm) -> anyhow::Result<()> {
    let (start, span) = vm.top_element()?;
    vm.copy_span_to_top(start, span)
}

pub fn drop(vm: &mut Vm) -> anyhow::Result<()> {
    let (start, _) = vm.top_element()?;
    vm.sp = start;
    Ok(())
}

pub fn swap(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, _) = vm.top_element()?;
    let (b_start, b_span) = vm.element_ending_at(a_start)?;
    vm.rotate_left(b_start, vm.sp, b_span)
}

pub fn over(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, _) = vm.top_element()?;
    let (b_start, b_span) = vm.element_ending_at(a_start)?;
    vm.copy_span_to_top(b_start, b_span)
}

pub fn rot(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, _) = vm.top_element()?;
    let (b_start, _) = vm.element_ending_at(a_start)?;
    let (c_start, c_span) = vm.element_ending_at(b_start)?;
    vm.rotate_left(c_start, vm.sp, c_span)
}

pub fn revrot(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, _) = vm.top_element()?;
    let (b_start, b_span) = vm.element_ending_at(a_start)?;
    let (c_start, c_span) = vm.element_ending_at(b_start)?;
    vm.rotate_left(c_start, vm.sp, c_span + b_span)
}

pub fn nip(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, _) = vm.top_element()?;
    let (b_start, b_span) = vm.element_ending_at(a_start)?;
    vm.remove_span(b_start, b_span)
}

pub fn tuck(vm: &mut Vm) -> anyhow::Result<()> {
    let (a_start, a_span) = vm.top_element()?;
    let (b_start, b_span) = vm.element_ending_at(a_start)?;
    vm.copy_span_to_top(a_start, a_span)?;
    vm.rotate_left(b_start, vm.sp, b_span + a_span)
}

pub fn pick(vm: &mut Vm) -> anyhow::Result<()> {
    let n = vm.pop()?;
    let n = n
        .as_number()
        .filter(|x| *x >= 0.0 && x.fract() == 0.0)
        .ok_or_else(|| vm_err(ErrorKind::Type, "pick index must be a whole number"))?;
    let n: usize = n.as_();
    let mut slot = 0usize;
    for _ in 0..n {
        let (next, _) = vm.find_element(slot)?;
        slot = next;
    }
    let (_, size) = vm.find_element(slot)?;
    let start = vm
        .sp
        .checked_sub(slot + size)
        .ok_or_else(|| vm_err(ErrorKind::StackUnderflow, "pick past stack base"))?;
    vm.copy_span_to_top(start, size)
}
