//! The parser: a token-driven compile loop. Literals compile to literal
//! opcodes, words resolve through the dictionary, and immediates run on
//! the spot.

use crate::dict;
use crate::error::{vm_err, ErrorKind};
use crate::immediates::{self, Immediate};
use crate::lexer::{Lexer, Token};
use crate::opcode::Opcode;
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::{vm_bail, vm_ensure};

/// Compile a complete source unit, ending with `Halt`. Structure left
/// open at end of input is a syntax error.
///
/// Every unit opens with a `Reserve` patched to cover any top-level
/// `var` slots, so the unit body runs in a pseudo frame of its own.
pub fn compile_source(vm: &mut Vm, src: &str) -> anyhow::Result<()> {
    vm.compiler.top_locals.clear();
    vm.compile_opcode(Opcode::Reserve)?;
    let reserve_patch = vm.compiler.cp;
    vm.compile16(0)?;

    let mut lex = Lexer::new(src);
    while let Some(token) = lex.next()? {
        compile_token(vm, &mut lex, token)?;
    }
    if let Some(def) = &vm.compiler.def {
        vm_bail!(Syntax, "definition of {} never closed", def.name);
    }
    vm_ensure!(
        vm.compiler.case_stack.is_empty(),
        Syntax,
        "case never closed"
    );
    vm_ensure!(vm.compiler.paren_depth == 0, Syntax, "'(' never closed");
    vm_ensure!(vm.compiler.brace_depth == 0, Syntax, "'{{' never closed");
    let top_locals = vm.compiler.top_locals.len() as u16;
    if top_locals > 0 {
        // two dummy cells stand in for the saved frame words
        vm.patch16(reserve_patch, top_locals + 2)?;
    }
    vm.compile_opcode(Opcode::Halt)
}

fn compile_token(vm: &mut Vm, lex: &mut Lexer, token: Token) -> anyhow::Result<()> {
    match token {
        Token::Number(x) => vm.compile_literal(Value::number(x)),
        Token::Str(s) => {
            let addr = vm.digest.add(&s)?;
            vm.compile_op_u16(Opcode::LiteralString, addr)
        }
        Token::LParen => immediates::run(vm, lex, Immediate::OpenParen),
        Token::RParen => immediates::run(vm, lex, Immediate::CloseParen),
        Token::LBrace => immediates::run(vm, lex, Immediate::OpenBrace),
        Token::RBrace => immediates::run(vm, lex, Immediate::CloseBrace),
        Token::Arrow => immediates::run(vm, lex, Immediate::Arrow),
        Token::PlusArrow => immediates::run(vm, lex, Immediate::PlusArrow),
        Token::LBracket | Token::RBracket => {
            vm_bail!(Syntax, "brackets belong after an assignment target")
        }
        Token::CodeRef(name) => compile_code_ref(vm, &name),
        Token::VarRef(name) => immediates::compile_name_ref(vm, &name),
        Token::Word(name) => compile_word(vm, lex, &name),
    }
}

/// `@name`: push the named word itself.
fn compile_code_ref(vm: &mut Vm, name: &str) -> anyhow::Result<()> {
    let payload = dict::lookup(vm, name)?
        .ok_or_else(|| vm_err(ErrorKind::UndefinedWord, format!("{name} is not defined")))?;
    match payload.tag() {
        Tag::Code => vm.compile_op_u16(Opcode::LiteralCode, payload.payload()),
        Tag::Builtin if !payload.meta() => vm.compile_literal(payload),
        _ => Err(vm_err(
            ErrorKind::Syntax,
            format!("@{name} does not name runnable code"),
        )),
    }
}

fn compile_word(vm: &mut Vm, lex: &mut Lexer, name: &str) -> anyhow::Result<()> {
    // locals shadow the dictionary inside a definition
    if let Some(slot) = vm.compiler.local_slot(name) {
        if vm.compiler.in_capsule_clause() {
            vm.compile_op_u16(Opcode::FieldRef, slot)?;
        } else {
            vm.compile_op_u16(Opcode::LocalRef, slot)?;
        }
        return vm.compile_opcode(Opcode::Fetch);
    }

    let payload = dict::lookup(vm, name)?
        .ok_or_else(|| vm_err(ErrorKind::UndefinedWord, format!("{name} is not defined")))?;

    if payload.tag() == Tag::Builtin && payload.meta() {
        let imm = Immediate::try_from(payload.payload())
            .map_err(|_| vm_err(ErrorKind::Syntax, format!("{name} is not usable here")))?;
        return immediates::run(vm, lex, imm);
    }

    match payload.tag() {
        Tag::Builtin => {
            let op = Opcode::try_from((payload.payload() & 0xFF) as u8)
                .map_err(|_| vm_err(ErrorKind::Syntax, format!("{name} has no opcode")))?;
            vm.compile_opcode(op)
        }
        Tag::Code => vm.compile_user_call(payload.payload() as usize),
        Tag::GlobalRef => {
            vm.compile_op_u16(Opcode::GlobalRef, payload.payload())?;
            vm.compile_opcode(Opcode::Fetch)
        }
        // any other tagged value is itself the definition
        _ => vm.compile_literal(payload),
    }
}
