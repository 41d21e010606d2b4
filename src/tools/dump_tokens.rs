use std::path::PathBuf;

use anyhow::Result;

use tacit::lexer::Lexer;

pub fn dump_tokens(file: PathBuf) -> Result<()> {
    let source = std::fs::read_to_string(&file)?;
    let mut lex = Lexer::new(&source);
    while let Some(token) = lex.next()? {
        println!("{token}");
    }
    Ok(())
}
