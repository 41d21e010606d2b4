use anyhow::Result;

use tacit::printer;
use tacit::{interpret, Vm};

pub fn eval_expr(expr: &str) -> Result<()> {
    let mut vm = Vm::new()?;
    interpret(&mut vm, expr)?;
    let output = vm.take_output();
    print!("{output}");
    println!("{}", printer::stack_snapshot(&vm));
    Ok(())
}
