//! Immediate words: dictionary entries that run at compile time and emit
//! bytecode instead of being compiled as calls.
//!
//! Structured constructs keep their unresolved state on the data stack:
//! a placeholder cell holding the operand address to patch, topped by a
//! BUILTIN-tagged closer sentinel (meta bit set). `;` pops the closer and
//! dispatches to it, so one word ends definitions, conditionals, case
//! clauses and method bodies alike.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::compiler::{CapsuleState, CaseState, DefState};
use crate::dict;
use crate::error::{vm_err, ErrorKind};
use crate::lexer::{Lexer, Token};
use crate::opcode::Opcode;
use crate::tagged::{Tag, Value};
use crate::vm::Vm;
use crate::{vm_bail, vm_ensure};

#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum Immediate {
    Colon = 0,
    Semicolon = 1,
    If = 2,
    Else = 3,
    Case = 4,
    Of = 5,
    Default = 6,
    Var = 7,
    Global = 8,
    Capsule = 9,
    Does = 10,
    OpenParen = 11,
    CloseParen = 12,
    OpenBrace = 13,
    CloseBrace = 14,
    Arrow = 15,
    PlusArrow = 16,
    Include = 17,
    // closer sentinels, never named in source
    EndDefinition = 32,
    EndIf = 33,
    EndOf = 34,
    EndMethod = 35,
    EndCase = 36,
    EndCapsule = 37,
    EndBrace = 38,
}

fn closer(imm: Immediate) -> Value {
    Value::boxed(Tag::Builtin, u16::from(imm), true)
}

fn is_closer(v: Value, imm: Immediate) -> bool {
    v.tag() == Tag::Builtin && v.meta() && v.payload() == u16::from(imm)
}

fn pop_closer(vm: &mut Vm) -> anyhow::Result<Immediate> {
    let v = vm.pop().map_err(|_| {
        vm_err(ErrorKind::Syntax, "';' with nothing open")
    })?;
    if v.tag() == Tag::Builtin && v.meta() {
        if let Ok(imm) = Immediate::try_from(v.payload()) {
            return Ok(imm);
        }
    }
    Err(vm_err(ErrorKind::Syntax, "';' with nothing open"))
}

fn pop_placeholder(vm: &mut Vm) -> anyhow::Result<usize> {
    let v = vm.pop()?;
    v.as_number()
        .map(|x| x as usize)
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "compile stack corrupted"))
}

pub fn run(vm: &mut Vm, lex: &mut Lexer, imm: Immediate) -> anyhow::Result<()> {
    match imm {
        Immediate::Colon => colon(vm, lex),
        Immediate::Semicolon => semicolon(vm),
        Immediate::If => begin_if(vm),
        Immediate::Else => begin_else(vm),
        Immediate::Case => begin_case(vm),
        Immediate::Of => begin_of(vm),
        Immediate::Default => default_literal(vm),
        Immediate::Var => var(vm, lex),
        Immediate::Global => global(vm, lex),
        Immediate::Capsule | Immediate::Does => capsule(vm),
        Immediate::OpenParen => open_paren(vm),
        Immediate::CloseParen => close_paren(vm),
        Immediate::OpenBrace => open_brace(vm),
        Immediate::CloseBrace => close_brace(vm),
        Immediate::Arrow => store_to(vm, lex, false),
        Immediate::PlusArrow => store_to(vm, lex, true),
        Immediate::Include => include(vm, lex),
        _ => Err(vm_err(ErrorKind::Syntax, "closer sentinel used as a word")),
    }
}

// --- definitions ---

fn colon(vm: &mut Vm, lex: &mut Lexer) -> anyhow::Result<()> {
    let name = lex.expect_word(":")?;
    vm_ensure!(
        !vm.compiler.in_definition(),
        Syntax,
        "definition of {name} inside another definition"
    );
    let skip_patch = vm.compile_branch_placeholder(Opcode::Branch)?;
    let entry = vm.compiler.cp;
    vm.compile_opcode(Opcode::Reserve)?;
    let reserve_patch = vm.compiler.cp;
    vm.compile16(0)?;
    vm.compiler.def = Some(DefState {
        name,
        entry,
        skip_patch,
        reserve_patch,
        locals: Vec::new(),
        capsule_pending: false,
        capsule: None,
    });
    vm.compiler.preserve = true;
    vm.push(closer(Immediate::EndDefinition))
}

fn end_definition(vm: &mut Vm) -> anyhow::Result<()> {
    vm.compile_opcode(Opcode::Exit)?;
    let def = vm
        .compiler
        .def
        .take()
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "';' with no open definition"))?;
    vm_ensure!(
        !def.capsule_pending,
        Syntax,
        "capsule without a method table"
    );
    // slot k sits at bp + 2 + k, so the reservation covers the two
    // frame cells the slot area skips
    let locals = def.locals.len() as u16;
    let reserve = if locals > 0 { locals + 2 } else { 0 };
    vm.patch16(def.reserve_patch, reserve)?;
    vm.patch_branch(def.skip_patch)?;
    let payload = Value::boxed(Tag::Code, def.entry as u16, false);
    dict::define(vm, &def.name, payload, false)
}

fn semicolon(vm: &mut Vm) -> anyhow::Result<()> {
    match pop_closer(vm)? {
        Immediate::EndDefinition => end_definition(vm),
        Immediate::EndIf => end_if(vm),
        Immediate::EndOf => end_of(vm),
        Immediate::EndMethod => end_method(vm),
        Immediate::EndCase => end_case(vm),
        Immediate::EndCapsule => end_capsule(vm),
        _ => Err(vm_err(ErrorKind::Syntax, "';' with nothing open")),
    }
}

// --- conditionals ---

fn begin_if(vm: &mut Vm) -> anyhow::Result<()> {
    let patch = vm.compile_branch_placeholder(Opcode::BranchFalse)?;
    vm.push(Value::number(patch as f32))?;
    vm.push(closer(Immediate::EndIf))
}

fn begin_else(vm: &mut Vm) -> anyhow::Result<()> {
    let top = vm.peek().map_err(|_| {
        vm_err(ErrorKind::Syntax, "'else' without a matching 'if'")
    })?;
    vm_ensure!(
        is_closer(top, Immediate::EndIf),
        Syntax,
        "'else' without a matching 'if'"
    );
    vm.pop()?;
    let false_patch = pop_placeholder(vm)?;
    let end_patch = vm.compile_branch_placeholder(Opcode::Branch)?;
    vm.patch_branch(false_patch)?;
    vm.push(Value::number(end_patch as f32))?;
    vm.push(closer(Immediate::EndIf))
}

fn end_if(vm: &mut Vm) -> anyhow::Result<()> {
    let patch = pop_placeholder(vm)?;
    vm.patch_branch(patch)
}

// --- case ---

fn begin_case(vm: &mut Vm) -> anyhow::Result<()> {
    if vm
        .compiler
        .def
        .as_ref()
        .is_some_and(|d| d.capsule_pending)
    {
        return begin_capsule_case(vm);
    }
    vm.compiler.case_stack.push(CaseState {
        default_seen: false,
    });
    vm.push(Value::number(0.0))?;
    vm.push(closer(Immediate::EndCase))
}

/// The runtime test shared by `of` and `default`: compare against the
/// case value, skip the body on mismatch, discard the case value on
/// match.
fn emit_of_clause(vm: &mut Vm) -> anyhow::Result<()> {
    vm.compile_opcode(Opcode::OfCmp)?;
    let patch = vm.compile_branch_placeholder(Opcode::BranchFalse)?;
    vm.compile_opcode(Opcode::Drop)?;
    vm.push(Value::number(patch as f32))?;
    vm.push(closer(Immediate::EndOf))
}

fn begin_of(vm: &mut Vm) -> anyhow::Result<()> {
    let top = vm
        .peek()
        .map_err(|_| vm_err(ErrorKind::Syntax, "'of' outside a case"))?;
    if is_closer(top, Immediate::EndCapsule) {
        return begin_method(vm);
    }
    vm_ensure!(
        is_closer(top, Immediate::EndCase),
        Syntax,
        "'of' outside a case"
    );
    let state = vm
        .compiler
        .case_stack
        .last()
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "'of' outside a case"))?;
    vm_ensure!(!state.default_seen, Syntax, "clause after default");
    emit_of_clause(vm)
}

fn end_of(vm: &mut Vm) -> anyhow::Result<()> {
    let false_patch = pop_placeholder(vm)?;
    let exit_patch = vm.compile_branch_placeholder(Opcode::Branch)?;
    vm.patch_branch(false_patch)?;
    // thread the exit under the case marker
    let marker = vm.pop()?;
    vm_ensure!(
        is_closer(marker, Immediate::EndCase),
        Syntax,
        "case clause closed out of order"
    );
    let count = pop_placeholder(vm)?;
    vm.push(Value::number(exit_patch as f32))?;
    vm.push(Value::number(count as f32 + 1.0))?;
    vm.push(marker)
}

fn end_case(vm: &mut Vm) -> anyhow::Result<()> {
    let count = pop_placeholder(vm)?;
    // fall-through: no clause matched, discard the case value
    vm.compile_opcode(Opcode::Drop)?;
    for _ in 0..count {
        let exit_patch = pop_placeholder(vm)?;
        vm.patch_branch(exit_patch)?;
    }
    vm.compiler
        .case_stack
        .pop()
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "case closed twice"))?;
    Ok(())
}

/// `default` in clause position opens a clause whose predicate matches
/// anything; elsewhere it is just the DEFAULT literal.
fn default_literal(vm: &mut Vm) -> anyhow::Result<()> {
    let in_clause_position = vm
        .peek()
        .map(|top| is_closer(top, Immediate::EndCase))
        .unwrap_or(false);
    if !in_clause_position {
        return vm.compile_literal(Value::DEFAULT);
    }
    let state = vm
        .compiler
        .case_stack
        .last_mut()
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "case state corrupted"))?;
    vm_ensure!(!state.default_seen, Syntax, "case with two defaults");
    state.default_seen = true;
    vm.compile_literal(Value::DEFAULT)?;
    emit_of_clause(vm)
}

// --- capsules ---

fn capsule(vm: &mut Vm) -> anyhow::Result<()> {
    let def = vm
        .compiler
        .def
        .as_mut()
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "capsule outside a definition"))?;
    vm_ensure!(
        !def.capsule_pending && def.capsule.is_none(),
        Syntax,
        "definition already has a capsule"
    );
    def.capsule_pending = true;
    Ok(())
}

fn begin_capsule_case(vm: &mut Vm) -> anyhow::Result<()> {
    let skip_patch = vm.compile_branch_placeholder(Opcode::Branch)?;
    let def = vm.compiler.def.as_mut().expect("capsule_pending implies def");
    def.capsule_pending = false;
    def.capsule = Some(CapsuleState {
        skip_patch,
        methods: Vec::new(),
        current: None,
    });
    vm.push(closer(Immediate::EndCapsule))
}

fn begin_method(vm: &mut Vm) -> anyhow::Result<()> {
    let name_addr = vm.retract_string_literal()?;
    let entry = vm.compiler.cp;
    let capsule = vm
        .compiler
        .def
        .as_mut()
        .and_then(|d| d.capsule.as_mut())
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "method clause outside a capsule"))?;
    vm_ensure!(
        capsule.current.is_none(),
        Syntax,
        "method clause inside another method"
    );
    capsule.current = Some((name_addr, entry));
    vm.push(closer(Immediate::EndMethod))
}

fn end_method(vm: &mut Vm) -> anyhow::Result<()> {
    vm.compile_opcode(Opcode::ExitMethod)?;
    let capsule = vm
        .compiler
        .def
        .as_mut()
        .and_then(|d| d.capsule.as_mut())
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "method closed outside a capsule"))?;
    let current = capsule
        .current
        .take()
        .ok_or_else(|| vm_err(ErrorKind::Syntax, "method closed twice"))?;
    capsule.methods.push(current);
    Ok(())
}

/// Close the method table: lay the name/code maplist out on the heap,
/// then emit the constructor epilogue that packs the locals and a table
/// reference into the capsule list.
fn end_capsule(vm: &mut Vm) -> anyhow::Result<()> {
    let (skip_patch, methods, local_count) = {
        let def = vm
            .compiler
            .def
            .as_mut()
            .ok_or_else(|| vm_err(ErrorKind::Syntax, "capsule closed outside a definition"))?;
        let capsule = def
            .capsule
            .as_mut()
            .ok_or_else(|| vm_err(ErrorKind::Syntax, "capsule closed twice"))?;
        vm_ensure!(
            capsule.current.is_none(),
            Syntax,
            "capsule closed inside a method"
        );
        (
            capsule.skip_patch,
            std::mem::take(&mut capsule.methods),
            def.locals.len() as u16,
        )
    };
    vm_ensure!(!methods.is_empty(), Syntax, "capsule with no methods");

    // maplist ( name0 code0 name1 code1 ... ) with the header on top
    let slots = methods.len() * 2;
    let base = vm.alloc_data(slots + 1)?;
    let header = base + slots;
    vm.mem.write_cell(header, Value::list_header(slots as u16))?;
    for (i, (name_addr, entry)) in methods.iter().enumerate() {
        let name_cell = header - 1 - 2 * i;
        vm.mem
            .write_cell(name_cell, Value::boxed(Tag::String, *name_addr, false))?;
        vm.mem.write_cell(
            name_cell - 1,
            Value::boxed(Tag::Code, *entry as u16, false),
        )?;
    }

    vm.patch_branch(skip_patch)?;
    vm.compile_opcode(Opcode::OpenList)?;
    for slot in 0..local_count {
        vm.compile_op_u16(Opcode::LocalRef, slot)?;
        vm.compile_opcode(Opcode::Fetch)?;
        vm.compile_opcode(Opcode::Unref)?;
    }
    vm.compile_op_u16(Opcode::GlobalRef, header as u16)?;
    vm.compile_opcode(Opcode::CloseList)
}

// --- variables ---

fn var(vm: &mut Vm, lex: &mut Lexer) -> anyhow::Result<()> {
    let name = lex.expect_word("var")?;
    vm_ensure!(
        !vm.compiler.in_capsule_clause(),
        Syntax,
        "var inside a capsule method"
    );
    let locals = match vm.compiler.def.as_mut() {
        Some(def) => &mut def.locals,
        // top level: the unit's pseudo frame
        None => &mut vm.compiler.top_locals,
    };
    let slot = locals.len() as u16;
    locals.push((name, slot));
    vm.compile_op_u16(Opcode::InitVar, slot)
}

fn global(vm: &mut Vm, lex: &mut Lexer) -> anyhow::Result<()> {
    let name = lex.expect_word("global")?;
    vm_ensure!(
        !vm.compiler.in_definition(),
        Syntax,
        "global inside a definition"
    );
    let anchor = vm.alloc_data(1)?;
    vm.mem.write_cell(anchor, Value::NIL)?;
    dict::define(
        vm,
        &name,
        Value::boxed(Tag::GlobalRef, anchor as u16, false),
        false,
    )?;
    vm.compiler.preserve = true;
    vm.compile_op_u16(Opcode::GlobalInit, anchor as u16)
}

// --- grouping ---

fn open_paren(vm: &mut Vm) -> anyhow::Result<()> {
    vm.compiler.paren_depth += 1;
    vm.compile_opcode(Opcode::OpenList)
}

fn close_paren(vm: &mut Vm) -> anyhow::Result<()> {
    vm_ensure!(vm.compiler.paren_depth > 0, Syntax, "')' without '('");
    vm.compiler.paren_depth -= 1;
    vm.compile_opcode(Opcode::CloseList)
}

fn open_brace(vm: &mut Vm) -> anyhow::Result<()> {
    vm.compiler.brace_depth += 1;
    let skip_patch = vm.compile_branch_placeholder(Opcode::Branch)?;
    let entry = vm.compiler.cp;
    vm.push(Value::number(skip_patch as f32))?;
    vm.push(Value::number(entry as f32))?;
    vm.push(closer(Immediate::EndBrace))
}

fn close_brace(vm: &mut Vm) -> anyhow::Result<()> {
    let top = vm
        .peek()
        .map_err(|_| vm_err(ErrorKind::Syntax, "'}' without '{'"))?;
    vm_ensure!(is_closer(top, Immediate::EndBrace), Syntax, "'}}' without '{{'");
    vm.pop()?;
    vm.compiler.brace_depth -= 1;
    let entry = pop_placeholder(vm)?;
    let skip_patch = pop_placeholder(vm)?;
    vm.compile_opcode(Opcode::Exit)?;
    vm.patch_branch(skip_patch)?;
    vm.compile_op_u16(Opcode::LiteralCode, entry as u16)
}

// --- assignment ---

/// Emit a reference to a named variable: a capsule field, a local slot
/// or a global anchor.
pub fn compile_name_ref(vm: &mut Vm, name: &str) -> anyhow::Result<()> {
    if let Some(slot) = vm.compiler.local_slot(name) {
        if vm.compiler.in_capsule_clause() {
            return vm.compile_op_u16(Opcode::FieldRef, slot);
        }
        return vm.compile_op_u16(Opcode::LocalRef, slot);
    }
    match dict::lookup(vm, name)? {
        Some(payload) if payload.tag() == Tag::GlobalRef => {
            vm.compile_op_u16(Opcode::GlobalRef, payload.payload())
        }
        Some(_) => Err(vm_err(
            ErrorKind::Syntax,
            format!("{name} is not a variable"),
        )),
        None => Err(vm_err(
            ErrorKind::UndefinedWord,
            format!("{name} is not defined"),
        )),
    }
}

/// `->` and `+>`: parse `name` or `name[i j ...]`, then emit the
/// reference walk and the store (with a fetch-add for `+>`).
fn store_to(vm: &mut Vm, lex: &mut Lexer, fetch_add: bool) -> anyhow::Result<()> {
    let name = lex.expect_word("->")?;
    compile_name_ref(vm, &name)?;

    if lex.peek()? == Some(Token::LBracket) {
        lex.next()?;
        // navigate from the variable's current target
        vm.compile_opcode(Opcode::Fetch)?;
        vm.compile_opcode(Opcode::OpenList)?;
        loop {
            match lex.next()? {
                Some(Token::RBracket) => break,
                Some(Token::Number(x)) => vm.compile_literal(Value::number(x))?,
                Some(Token::Str(s)) => {
                    let addr = vm.digest.add(&s)?;
                    vm.compile_op_u16(Opcode::LiteralString, addr)?;
                }
                Some(other) => vm_bail!(Syntax, "bad path element {other}"),
                None => vm_bail!(Syntax, "unterminated assignment path"),
            }
        }
        vm.compile_opcode(Opcode::CloseList)?;
        vm.compile_opcode(Opcode::Select)?;
        vm.compile_opcode(Opcode::Nip)?;
    }

    if fetch_add {
        vm.compile_opcode(Opcode::Dup)?;
        vm.compile_opcode(Opcode::Fetch)?;
        vm.compile_opcode(Opcode::Rot)?;
        vm.compile_opcode(Opcode::Add)?;
        vm.compile_opcode(Opcode::Swap)?;
    }
    vm.compile_opcode(Opcode::Store)
}

fn include(vm: &mut Vm, lex: &mut Lexer) -> anyhow::Result<()> {
    let path = lex.expect_string("include")?;
    crate::repl::run_include(vm, &path)
}
