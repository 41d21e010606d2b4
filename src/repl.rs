//! The REPL driver: evaluate one unit at a time, report errors as
//! `Kind: message` with a stack snapshot, and reset to a known good
//! state afterwards. Also hosts the include-resolution boundary.

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::VmError;
use crate::vm::Vm;
use crate::{interp, parser, printer, vm_bail};

/// Resolves `include` requests on behalf of the core, which never touches
/// the filesystem itself.
pub trait IncludeHost {
    /// Returns the canonical path and the source text.
    fn resolve_include(&self, path: &str, from: &str) -> Result<(String, String)>;
}

/// Filesystem-backed host used by the CLI: absolute paths are taken
/// verbatim, relative paths resolve against the including file's
/// directory (or the configured root at the top level).
pub struct FsIncludeHost {
    pub root: PathBuf,
}

impl IncludeHost for FsIncludeHost {
    fn resolve_include(&self, path: &str, from: &str) -> Result<(String, String)> {
        let requested = Path::new(path);
        let resolved = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            let base = Path::new(from)
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.root.clone());
            base.join(requested)
        };
        let canonical = resolved
            .canonicalize()
            .unwrap_or(resolved)
            .to_string_lossy()
            .into_owned();
        let source = std::fs::read_to_string(&canonical)?;
        Ok((canonical, source))
    }
}

/// Run an included source unit at the current code pointer. Includes are
/// idempotent per canonical path and only legal between top-level
/// commands.
pub fn run_include(vm: &mut Vm, path: &str) -> Result<()> {
    if vm.compiler.in_definition()
        || !vm.compiler.case_stack.is_empty()
        || vm.compiler.paren_depth > 0
        || vm.compiler.brace_depth > 0
    {
        vm_bail!(Syntax, "include inside an open construct");
    }
    let from = vm.current_source.clone().unwrap_or_default();
    let Some(host) = vm.include_host.take() else {
        vm_bail!(Syntax, "no include host configured");
    };
    let resolved = host.resolve_include(path, &from);
    vm.include_host = Some(host);
    let (canonical, source) = resolved?;
    if !vm.included.insert(canonical.clone()) {
        return Ok(());
    }

    let saved_source = vm.current_source.replace(canonical);
    let saved_preserve = vm.compiler.preserve;
    let saved_locals = std::mem::take(&mut vm.compiler.top_locals);
    // the including line's control flow jumps over the included unit
    let skip_patch = vm.compile_branch_placeholder(crate::opcode::Opcode::Branch)?;
    let entry = vm.compiler.cp;
    vm.compiler.preserve = false;
    let result =
        parser::compile_source(vm, &source).and_then(|()| interp::execute(vm, entry));
    vm.current_source = saved_source;
    vm.compiler.top_locals = saved_locals;
    result?;
    if vm.compiler.preserve {
        // protect the included definitions (and the partial line below
        // them) from the end-of-line rewind
        vm.compiler.bcp = vm.compiler.cp;
    } else {
        vm.compiler.cp = entry;
    }
    vm.patch_branch(skip_patch)?;
    vm.compiler.preserve = saved_preserve;
    Ok(())
}

/// Format an error the way the REPL reports it.
pub fn error_report(vm: &Vm, err: &anyhow::Error) -> String {
    let line = match err.downcast_ref::<VmError>() {
        Some(e) => e.to_string(),
        None => err.to_string(),
    };
    format!("{line}\n  stack: {}", printer::stack_snapshot_top(vm, 8))
}

pub struct Repl {
    pub vm: Vm,
}

impl Repl {
    pub fn new() -> Result<Repl> {
        Ok(Repl { vm: Vm::new()? })
    }

    /// Evaluate one unit; on success return the printed output, on error
    /// return the report and reset the VM.
    pub fn eval(&mut self, src: &str) -> Result<String, String> {
        match interp::interpret(&mut self.vm, src) {
            Ok(()) => Ok(self.vm.take_output()),
            Err(err) => {
                let report = error_report(&self.vm, &err);
                self.vm.output.clear();
                self.vm.reset();
                Err(report)
            }
        }
    }
}
