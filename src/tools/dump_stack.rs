use std::path::PathBuf;

use anyhow::Result;

use tacit::printer;

use super::run_file::run_file;

pub fn dump_stack(file: PathBuf) -> Result<()> {
    let vm = run_file(&file)?;
    println!("{}", printer::stack_snapshot(&vm));
    Ok(())
}
