mod repl_shell;
use repl_shell::repl_shell;
mod run_file;
use run_file::run_file_cmd;
mod eval_expr;
use eval_expr::eval_expr;
mod dump_tokens;
use dump_tokens::dump_tokens;
mod dump_bytecode;
use dump_bytecode::dump_bytecode;
mod dump_stack;
use dump_stack::dump_stack;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// Run and inspect Tacit programs
#[derive(Clone, Debug, Parser)]
struct Args {
    // operation to execute
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Clone, Debug, Subcommand)]
enum Operation {
    /// Interactive read-eval-print loop
    Repl,
    /// Run a source file
    Run { file: PathBuf },
    /// Evaluate one expression and show the final stack
    Eval { expr: String },
    /// Dump the token stream of a source file
    DumpTokens { file: PathBuf },
    /// Compile a source file and dump the emitted bytecode
    DumpBytecode { file: PathBuf },
    /// Run a source file and dump the final data stack
    DumpStack { file: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = match args.operation {
        Operation::Repl => repl_shell(),
        Operation::Run { file } => run_file_cmd(file),
        Operation::Eval { expr } => eval_expr(&expr),
        Operation::DumpTokens { file } => dump_tokens(file),
        Operation::DumpBytecode { file } => dump_bytecode(file),
        Operation::DumpStack { file } => dump_stack(file),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<tacit::VmError>() {
                Some(e) => eprintln!("{e}"),
                None => eprintln!("{err}"),
            }
            ExitCode::FAILURE
        }
    }
}
