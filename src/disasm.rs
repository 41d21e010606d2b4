//! Bytecode listing for the dump tools.

use serde::Serialize;

use crate::opcode::{Opcode, OperandKind};
use crate::vm::Vm;

#[derive(Clone, Debug, Serialize)]
pub struct DisasmLine {
    pub addr: usize,
    pub mnemonic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operand: Option<String>,
}

/// Decode `[start, end)` of the code segment into one line per
/// instruction.
pub fn disassemble(vm: &Vm, start: usize, end: usize) -> anyhow::Result<Vec<DisasmLine>> {
    let mut lines = Vec::new();
    let mut at = start;
    while at < end {
        let addr = at;
        let b0 = vm.mem.read8(at)?;
        at += 1;
        if b0 & 0x80 != 0 {
            let b1 = vm.mem.read8(at)?;
            at += 1;
            let target = (b0 & 0x7F) as usize | ((b1 as usize) << 7);
            lines.push(DisasmLine {
                addr,
                mnemonic: "call".into(),
                operand: Some(format!("{target}")),
            });
            continue;
        }
        let Ok(op) = Opcode::try_from(b0) else {
            lines.push(DisasmLine {
                addr,
                mnemonic: format!("?{b0}"),
                operand: None,
            });
            continue;
        };
        let operand = match op.operand_kind() {
            OperandKind::None => None,
            OperandKind::U16 => {
                let v = vm.mem.read16(at)?;
                at += 2;
                Some(format!("{v}"))
            }
            OperandKind::I16 => {
                let v = vm.mem.read_i16(at)?;
                at += 2;
                // branches read nicer with their resolved target
                if matches!(op, Opcode::Branch | Opcode::BranchFalse) {
                    Some(format!("{v} -> {}", at as i64 + v as i64))
                } else {
                    Some(format!("{v}"))
                }
            }
            OperandKind::F32 => {
                let v = vm.mem.read_f32(at)?;
                at += 4;
                Some(format!("{v}"))
            }
        };
        lines.push(DisasmLine {
            addr,
            mnemonic: op.mnemonic().into(),
            operand,
        });
    }
    Ok(lines)
}
