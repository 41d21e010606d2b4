use std::path::{Path, PathBuf};

use anyhow::Result;

use tacit::{interpret, FsIncludeHost, Vm};

pub fn vm_for_file(file: &Path) -> Result<Vm> {
    let mut vm = Vm::new()?;
    vm.include_host = Some(Box::new(FsIncludeHost {
        root: file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }));
    vm.current_source = Some(file.to_string_lossy().into_owned());
    Ok(vm)
}

pub fn run_file(file: &Path) -> Result<Vm> {
    let source = std::fs::read_to_string(file)?;
    let mut vm = vm_for_file(file)?;
    interpret(&mut vm, &source)?;
    Ok(vm)
}

pub fn run_file_cmd(file: PathBuf) -> Result<()> {
    let mut vm = run_file(&file)?;
    print!("{}", vm.take_output());
    Ok(())
}
