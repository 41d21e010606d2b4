//! The tokenizer: a hand-rolled byte scanner over one source string.

use std::fmt;

use serde::Serialize;

use crate::error::{vm_err, ErrorKind};
use crate::vm_bail;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Token {
    Number(f32),
    /// `"…"`, `` `sym `` and `'sym` all compile to string literals.
    Str(String),
    Word(String),
    /// `@name`
    CodeRef(String),
    /// `&name`
    VarRef(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    /// `->`
    Arrow,
    /// `+>`
    PlusArrow,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(x) => write!(f, "{x}"),
            Token::Str(s) => write!(f, "{s:?}"),
            Token::Word(w) => write!(f, "{w}"),
            Token::CodeRef(w) => write!(f, "@{w}"),
            Token::VarRef(w) => write!(f, "&{w}"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Arrow => write!(f, "->"),
            Token::PlusArrow => write!(f, "+>"),
        }
    }
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || matches!(b, b'_' | b'?' | b'!')
}

fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'?' | b'!' | b'-')
}

pub struct Lexer<'src> {
    src: &'src [u8],
    pos: usize,
}

impl<'src> Lexer<'src> {
    pub fn new(src: &'src str) -> Self {
        Lexer {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn at(&self, off: usize) -> Option<u8> {
        self.src.get(self.pos + off).copied()
    }

    fn skip_blank(&mut self) {
        while let Some(b) = self.at(0) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'\\' {
                // line comment
                while let Some(b) = self.at(0) {
                    self.pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn scan_word(&mut self) -> String {
        let start = self.pos;
        while self.at(0).is_some_and(is_word_char) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn scan_number(&mut self) -> anyhow::Result<Token> {
        let start = self.pos;
        if self.at(0) == Some(b'-') {
            self.pos += 1;
        }
        while self.at(0).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.at(0) == Some(b'.') {
            self.pos += 1;
            while self.at(0).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.at(0), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.at(0), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while self.at(0).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos])
            .expect("numeric bytes are ASCII");
        text.parse::<f32>()
            .map(Token::Number)
            .map_err(|_| vm_err(ErrorKind::Syntax, format!("bad number {text:?} at {start}")))
    }

    fn scan_string(&mut self) -> anyhow::Result<Token> {
        let start = self.pos;
        self.pos += 1; // opening quote
        let mut out = String::new();
        loop {
            match self.at(0) {
                None => vm_bail!(Syntax, "unterminated string starting at {start}"),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(Token::Str(out));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.at(0) {
                        Some(b'n') => out.push('\n'),
                        Some(b't') => out.push('\t'),
                        Some(b'"') => out.push('"'),
                        Some(b'\\') => out.push('\\'),
                        Some(other) => out.push(other as char),
                        None => vm_bail!(Syntax, "unterminated string starting at {start}"),
                    }
                    self.pos += 1;
                }
                Some(b) => {
                    out.push(b as char);
                    self.pos += 1;
                }
            }
        }
    }

    fn sigil_name(&mut self, sigil: char) -> anyhow::Result<String> {
        self.pos += 1;
        if !self.at(0).is_some_and(is_word_start) {
            vm_bail!(Syntax, "{sigil} must be followed by a name at {}", self.pos);
        }
        Ok(self.scan_word())
    }

    pub fn next(&mut self) -> anyhow::Result<Option<Token>> {
        self.skip_blank();
        let Some(b) = self.at(0) else {
            return Ok(None);
        };
        let token = match b {
            b'(' => {
                self.pos += 1;
                Token::LParen
            }
            b')' => {
                self.pos += 1;
                Token::RParen
            }
            b'{' => {
                self.pos += 1;
                Token::LBrace
            }
            b'}' => {
                self.pos += 1;
                Token::RBrace
            }
            b'[' => {
                self.pos += 1;
                Token::LBracket
            }
            b']' => {
                self.pos += 1;
                Token::RBracket
            }
            b'"' => self.scan_string()?,
            b'`' | b'\'' => {
                let name = self.sigil_name(b as char)?;
                Token::Str(name)
            }
            b'@' => Token::CodeRef(self.sigil_name('@')?),
            b'&' => Token::VarRef(self.sigil_name('&')?),
            b'-' => match self.at(1) {
                Some(b'>') => {
                    self.pos += 2;
                    Token::Arrow
                }
                Some(n) if n.is_ascii_digit() || n == b'.' => self.scan_number()?,
                _ => {
                    self.pos += 1;
                    Token::Word("-".into())
                }
            },
            b'+' => match self.at(1) {
                Some(b'>') => {
                    self.pos += 2;
                    Token::PlusArrow
                }
                _ => {
                    self.pos += 1;
                    Token::Word("+".into())
                }
            },
            b'*' | b'/' | b':' | b';' | b'.' => {
                self.pos += 1;
                Token::Word((b as char).to_string())
            }
            b if b.is_ascii_digit() => self.scan_number()?,
            b if is_word_start(b) => Token::Word(self.scan_word()),
            other => vm_bail!(
                Syntax,
                "unexpected character {:?} at {}",
                other as char,
                self.pos
            ),
        };
        Ok(Some(token))
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> anyhow::Result<Option<Token>> {
        let saved = self.pos;
        let token = self.next()?;
        self.pos = saved;
        Ok(token)
    }

    /// Next token, required to be a bare word.
    pub fn expect_word(&mut self, what: &str) -> anyhow::Result<String> {
        match self.next()? {
            Some(Token::Word(w)) => Ok(w),
            Some(other) => Err(vm_err(
                ErrorKind::Syntax,
                format!("{what} expected a name, found {other}"),
            )),
            None => Err(vm_err(
                ErrorKind::Syntax,
                format!("{what} expected a name, found end of input"),
            )),
        }
    }

    /// Next token, required to be a string literal.
    pub fn expect_string(&mut self, what: &str) -> anyhow::Result<String> {
        match self.next()? {
            Some(Token::Str(s)) => Ok(s),
            Some(other) => Err(vm_err(
                ErrorKind::Syntax,
                format!("{what} expected a string, found {other}"),
            )),
            None => Err(vm_err(
                ErrorKind::Syntax,
                format!("{what} expected a string, found end of input"),
            )),
        }
    }
}
