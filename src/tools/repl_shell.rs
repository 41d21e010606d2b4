use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Result;

use tacit::{FsIncludeHost, Repl};

pub fn repl_shell() -> Result<()> {
    let mut repl = Repl::new()?;
    repl.vm.include_host = Some(Box::new(FsIncludeHost {
        root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }));

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("tacit> ");
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        match repl.eval(&line) {
            Ok(output) => print!("{output}"),
            Err(report) => eprintln!("{report}"),
        }
    }
    Ok(())
}
