use std::path::PathBuf;

use anyhow::Result;

use tacit::disasm::disassemble;
use tacit::parser::compile_source;
use tacit::Vm;

pub fn dump_bytecode(file: PathBuf) -> Result<()> {
    let source = std::fs::read_to_string(&file)?;
    let mut vm = Vm::new()?;
    let start = vm.compiler.cp;
    compile_source(&mut vm, &source)?;
    for line in disassemble(&vm, start, vm.compiler.cp)? {
        match line.operand {
            Some(operand) => println!("{:5}  {} {}", line.addr, line.mnemonic, operand),
            None => println!("{:5}  {}", line.addr, line.mnemonic),
        }
    }
    Ok(())
}
