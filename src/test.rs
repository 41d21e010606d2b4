use rstest::rstest;

use crate::dict;
use crate::error::{ErrorKind, VmError};
use crate::interp::interpret;
use crate::mem::{Memory, DATA_CELLS, MEMORY_BYTES, RSTACK_BASE, STACK_BASE};
use crate::printer;
use crate::repl::{FsIncludeHost, Repl};
use crate::tagged::{encode, encode_number, Tag, Value};
use crate::vm::Vm;

fn fresh() -> Vm {
    Vm::new().expect("vm construction")
}

fn run(src: &str) -> Vm {
    let mut vm = fresh();
    interpret(&mut vm, src).unwrap_or_else(|e| panic!("{src:?} failed: {e}"));
    vm
}

fn stack(src: &str) -> Vec<Value> {
    run(src).stack_data()
}

fn n(x: f32) -> Value {
    Value::number(x)
}

fn hdr(slots: u16) -> Value {
    Value::list_header(slots)
}

fn error_kind(src: &str) -> ErrorKind {
    let mut vm = fresh();
    let err = interpret(&mut vm, src).expect_err("expected failure");
    err.downcast_ref::<VmError>()
        .unwrap_or_else(|| panic!("{src:?} raised a foreign error: {err}"))
        .kind
}

// --- tagged value codec ---

#[test]
fn tagged_round_trip_all_tags() {
    let tags: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
    let unsigned_payloads: &[i32] = &[0, 1, 255, 256, 4095, 32767, 32768, 65535];
    for &tag in tags {
        let payloads: Vec<i32> = if tag == Tag::Sentinel as u8 {
            vec![-32768, -1, 0, 1, 32767]
        } else {
            unsigned_payloads.to_vec()
        };
        for payload in payloads {
            for meta in [false, true] {
                let v = encode(tag, payload, meta).expect("legal encoding");
                let d = v.decode();
                assert_eq!(d.tag as u8, tag);
                assert_eq!(d.meta, meta);
                if tag == Tag::Sentinel as u8 {
                    assert_eq!(v.payload_i16() as i32, payload);
                } else {
                    assert_eq!(d.payload as i32, payload);
                }
            }
        }
    }
}

#[test]
fn number_identity() {
    let samples = [
        0.0f32,
        -0.0,
        1.0,
        -1.0,
        3.14,
        -1e-6,
        1e30,
        f32::INFINITY,
        f32::NEG_INFINITY,
        f32::MIN_POSITIVE,
    ];
    for x in samples {
        let v = encode_number(x).expect("non-NaN number");
        assert_eq!(v.bits(), x.to_bits());
        assert_eq!(v.tag(), Tag::Number);
        assert!(!v.meta());
    }
}

#[test]
fn encoding_rejections() {
    assert!(encode_number(f32::NAN).is_err());
    assert!(encode(Tag::Number as u8, 0, false).is_err());
    assert!(encode(63, 0, false).is_err());
    assert!(encode(Tag::Code as u8, 65536, false).is_err());
    assert!(encode(Tag::Code as u8, -1, false).is_err());
    assert!(encode(Tag::Sentinel as u8, 32768, false).is_err());
}

#[test]
fn arithmetic_nan_reads_as_number() {
    let v = Value::number(0.0f32 / 0.0f32);
    assert_eq!(v.tag(), Tag::Number);
    assert!(!v.is_truthy());
}

#[test]
fn nil_and_default_are_distinct_sentinels() {
    assert_eq!(Value::NIL.tag(), Tag::Sentinel);
    assert_eq!(Value::NIL.payload_i16(), 0);
    assert_eq!(Value::DEFAULT.payload_i16(), 1);
    assert_ne!(Value::NIL, Value::DEFAULT);
}

// --- memory ---

#[test]
fn memory_bounds_are_checked() {
    let mut m = Memory::new();
    assert!(m.read8(MEMORY_BYTES).is_err());
    assert!(m.read16(MEMORY_BYTES - 1).is_err());
    assert!(m.write8(MEMORY_BYTES, 0).is_err());
    m.write16(100, 0xBEEF).unwrap();
    assert_eq!(m.read16(100).unwrap(), 0xBEEF);
    assert_eq!(m.read8(100).unwrap(), 0xEF);
}

#[test]
fn cells_preserve_nan_boxes_bit_exactly() {
    let mut m = Memory::new();
    let v = Value::boxed(Tag::String, 0xABCD, true);
    m.write_cell(STACK_BASE, v).unwrap();
    assert_eq!(m.read_cell(STACK_BASE).unwrap().bits(), v.bits());
}

// --- digest ---

#[test]
fn digest_interns_strings() {
    let mut vm = fresh();
    let a = vm.digest.add("hello").unwrap();
    let b = vm.digest.add("world").unwrap();
    let c = vm.digest.add("hello").unwrap();
    assert_eq!(a, c);
    assert_ne!(a, b);
    assert_eq!(vm.digest.get(a).unwrap(), "hello");
    assert_eq!(vm.digest.length(b).unwrap(), 5);
}

// --- end-to-end scenarios ---

#[rstest]
#[case(": square dup mul ; 3 square", &[9.0])]
#[case(": double 2 mul ; : quadruple double double ; 5 quadruple", &[20.0])]
#[case("1 0 lt if -1 else 1 ;", &[1.0])]
#[case("-7 0 lt if -1 else 1 ;", &[-1.0])]
#[case("100 global a a 200 -> a a", &[100.0, 200.0])]
#[case("5 0 gt if 10 ;", &[10.0])]
#[case("0 5 gt if 10 ;", &[])]
#[case("1 2 3 3 pack unpack", &[1.0, 2.0, 3.0])]
#[case("3 { dup mul } eval", &[9.0])]
#[case(": square dup mul ; 4 @square eval", &[16.0])]
#[case("2 case 1 of 10 ; 2 of 20 ; ;", &[20.0])]
#[case("3 case 1 of 10 ; 2 of 20 ; ;", &[])]
#[case("9 case 1 of 10 ; default 77 ; ;", &[77.0])]
#[case("nil if 10 ;", &[])]
#[case(": abs? dup 0 lt if neg ; ; 5 abs? -7 abs?", &[5.0, 7.0])]
#[case("1 2 3 1 pick", &[1.0, 2.0, 3.0, 2.0])]
fn scenario_number_stacks(#[case] src: &str, #[case] expected: &[f32]) {
    let got = stack(src);
    let want: Vec<Value> = expected.iter().map(|&x| n(x)).collect();
    assert_eq!(got, want, "program {src:?}");
}

#[test]
fn scenario_reverse_list() {
    assert_eq!(
        stack("( 1 2 3 ) reverse"),
        vec![n(1.0), n(2.0), n(3.0), hdr(3)]
    );
}

#[test]
fn scenario_find_fetch() {
    assert_eq!(
        stack("( 1 100 2 200 ) 2 find fetch"),
        vec![n(200.0), n(2.0), n(100.0), n(1.0), hdr(4), n(200.0)]
    );
}

#[test]
fn scenario_nested_neg() {
    assert_eq!(
        stack("( ( 1 2 ) 3 ) neg"),
        vec![n(-3.0), n(-2.0), n(-1.0), hdr(2), hdr(4)]
    );
}

#[test]
fn scenario_counter_capsule() {
    let src = r#"
        : make-counter 0 var count capsule case
            "inc" of 1 +> count ;
            "get" of count ; ; ;
        make-counter var c
        "inc" &c dispatch
        "inc" &c dispatch
        "get" &c dispatch
    "#;
    assert_eq!(stack(src), vec![n(2.0)]);
}

// --- lists ---

#[test]
fn list_layout_is_reversed_with_header_on_top() {
    assert_eq!(stack("( 1 2 3 )"), vec![n(3.0), n(2.0), n(1.0), hdr(3)]);
    assert_eq!(
        stack("( ( 1 2 ) 3 )"),
        vec![n(3.0), n(2.0), n(1.0), hdr(2), hdr(4)]
    );
    assert_eq!(stack("( )"), vec![hdr(0)]);
}

#[test]
fn length_counts_slots_size_counts_elements() {
    assert_eq!(stack("( ( 1 2 ) 3 ) length"), vec![n(4.0)]);
    assert_eq!(stack("( ( 1 2 ) 3 ) size"), vec![n(2.0)]);
    assert_eq!(stack("( ) length"), vec![n(0.0)]);
    assert_eq!(stack("( 1 2 3 ) length"), vec![n(3.0)]);
}

#[test]
fn reverse_is_an_involution() {
    let original = stack("( 1 ( 2 3 ) 4 )");
    let round = stack("( 1 ( 2 3 ) 4 ) reverse reverse");
    assert_eq!(original, round);
}

#[test]
fn reverse_preserves_nested_elements() {
    assert_eq!(stack("( 1 ( 2 3 ) 4 ) reverse"), stack("( 4 ( 2 3 ) 1 )"));
}

#[test]
fn cons_uncons_are_inverse() {
    assert_eq!(stack("( 1 2 ) 9 cons uncons"), stack("( 1 2 ) 9"));
    assert_eq!(stack("( 1 2 ) 9 cons"), stack("( 9 1 2 )"));
}

#[test]
fn head_and_tail() {
    assert_eq!(stack("( 7 8 9 ) head"), vec![n(7.0)]);
    assert_eq!(stack("( ( 1 2 ) 3 ) head"), stack("( 1 2 )"));
    assert_eq!(stack("( 7 8 9 ) tail"), stack("( 8 9 )"));
    assert_eq!(stack("( 7 8 9 ) drop-head"), stack("( 8 9 )"));
    assert_eq!(stack("( ) head"), vec![Value::NIL]);
    assert_eq!(stack("( 1 2 ) uncons"), stack("( 2 ) 1"));
}

#[test]
fn concat_joins_element_runs() {
    assert_eq!(stack("( 1 2 ) ( 3 4 ) concat"), stack("( 1 2 3 4 )"));
    assert_eq!(stack("( ) ( 3 ) concat"), stack("( 3 )"));
    assert_eq!(stack("( 1 ( 2 ) ) ( 3 ) concat"), stack("( 1 ( 2 ) 3 )"));
}

#[test]
fn enlist_wraps_one_element() {
    assert_eq!(stack("5 enlist"), stack("( 5 )"));
    assert_eq!(stack("( 1 2 ) enlist"), stack("( ( 1 2 ) )"));
}

#[test]
fn pack_gathers_compound_elements() {
    assert_eq!(stack("( 1 2 ) 3 2 pack"), stack("( ( 1 2 ) 3 )"));
}

#[test]
fn drop_releases_whole_spans() {
    assert_eq!(stack("( 1 2 3 ) drop"), vec![]);
    assert_eq!(stack("7 ( 1 2 ) drop"), vec![n(7.0)]);
}

#[test]
fn element_aware_stack_ops() {
    assert_eq!(stack("1 ( 2 3 ) swap"), stack("( 2 3 ) 1"));
    assert_eq!(stack("( 1 2 ) 7 over"), stack("( 1 2 ) 7 ( 1 2 )"));
    assert_eq!(stack("( 1 2 ) 3 4 rot"), stack("3 4 ( 1 2 )"));
    assert_eq!(stack("1 2 ( 3 4 ) revrot"), stack("( 3 4 ) 1 2"));
    assert_eq!(stack("( 1 2 ) 7 nip"), vec![n(7.0)]);
    assert_eq!(stack("( 1 2 ) 7 tuck"), stack("7 ( 1 2 ) 7"));
    assert_eq!(stack("( 1 2 ) 8 9 2 pick"), stack("( 1 2 ) 8 9 ( 1 2 )"));
    assert_eq!(stack("( 1 2 ) dup"), stack("( 1 2 ) ( 1 2 )"));
}

// --- addressing ---

#[test]
fn slot_and_elem_references() {
    let got = stack("( 1 2 3 ) 0 slot fetch");
    assert_eq!(got.last(), Some(&n(1.0)));
    let got = stack("( ( 1 2 ) 3 ) 1 elem fetch");
    assert_eq!(got.last(), Some(&n(3.0)));
    // element 0 is compound: fetch materializes the whole span
    let got = stack("( ( 1 2 ) 3 ) 0 elem fetch");
    let len = got.len();
    assert_eq!(&got[len - 3..], &[n(2.0), n(1.0), hdr(2)]);
    assert_eq!(stack("( 1 2 ) 9 slot").last(), Some(&Value::NIL));
}

#[test]
fn walk_steps_payload_slots() {
    let got = stack("( 1 2 3 ) ref 0 walk");
    let len = got.len();
    assert_eq!(got[len - 1], n(1.0));
    assert_eq!(
        got[len - 2],
        Value::boxed(Tag::StackRef, (STACK_BASE + 2) as u16, false)
    );
    let got = stack("( 1 2 3 ) ref 3 walk");
    let len = got.len();
    assert_eq!(got[len - 1], n(0.0));
    assert_eq!(got[len - 2], Value::NIL);
}

#[test]
fn select_walks_paths() {
    let got = stack("( ( 10 20 ) 3 ) ( 0 1 ) select fetch");
    assert_eq!(got.last(), Some(&n(20.0)));
    let got = stack("( 10 20 ) ( 5 ) select");
    assert_eq!(got.last(), Some(&Value::NIL));
}

#[test]
fn maplist_find_with_default() {
    let got = stack(r#"( "a" 1 "default" 99 ) "zzz" find fetch"#);
    assert_eq!(got.last(), Some(&n(99.0)));
    let got = stack(r#"( "a" 1 "default" 99 ) "a" find fetch"#);
    assert_eq!(got.last(), Some(&n(1.0)));
    let got = stack(r#"( "a" 1 ) "b" find"#);
    assert_eq!(got.last(), Some(&Value::NIL));
}

#[test]
fn maplist_keys_and_values() {
    let got = stack("( 1 100 2 200 ) keys");
    assert_eq!(&got[5..], &[n(2.0), n(1.0), hdr(2)]);
    let got = stack("( 1 100 2 200 ) values");
    assert_eq!(&got[5..], &[n(200.0), n(100.0), hdr(2)]);
}

// --- broadcasting ---

#[test]
fn broadcasting_identities() {
    assert_eq!(stack("( 1 2 3 ) 0 add"), stack("( 1 2 3 )"));
    assert_eq!(stack("( 1 2 3 ) 1 mul"), stack("( 1 2 3 )"));
    assert_eq!(stack("( 1 ( 2 3 ) ) 0 add"), stack("( 1 ( 2 3 ) )"));
}

#[test]
fn broadcasting_shapes() {
    assert_eq!(stack("( 1 2 3 ) 10 mul"), stack("( 10 20 30 )"));
    assert_eq!(stack("10 ( 1 2 ) add"), stack("( 11 12 )"));
    assert_eq!(stack("( 1 2 3 4 ) ( 10 20 ) add"), stack("( 11 22 13 24 )"));
    assert_eq!(stack("( ) 5 add"), stack("( )"));
    assert_eq!(stack("( ) ( ) add"), stack("( )"));
    // nothing to cycle: empty against non-empty stays empty
    assert_eq!(stack("( ) ( 1 2 3 ) add"), stack("( )"));
    assert_eq!(stack("( 1 2 3 ) ( ) add"), stack("( )"));
    assert_eq!(stack("( ( 1 2 ) 3 ) 1 add"), stack("( ( 2 3 ) 4 )"));
}

#[test]
fn broadcasting_comparisons_and_unaries() {
    assert_eq!(stack("( 1 5 3 ) 3 lt"), stack("( 1 0 0 )"));
    assert_eq!(stack("2 8 max"), vec![n(8.0)]);
    assert_eq!(stack("( 4 9 ) sqrt"), stack("( 2 3 )"));
    assert_eq!(stack("( 1 0 2 ) not"), stack("( 0 1 0 )"));
    assert_eq!(stack("( -3 0 5 ) sign"), stack("( -1 0 1 )"));
    assert_eq!(stack("7 2 mod"), vec![n(1.0)]);
    assert_eq!(stack("2 recip"), vec![n(0.5)]);
    assert_eq!(stack("3.7 floor"), vec![n(3.0)]);
}

#[test]
fn broadcast_mismatch_leaves_operands() {
    let mut vm = fresh();
    let err = interpret(&mut vm, r#"( 1 2 ) "x" add"#).expect_err("mismatch");
    assert_eq!(
        err.downcast_ref::<VmError>().unwrap().kind,
        ErrorKind::BroadcastTypeMismatch
    );
    let cells = vm.stack_data();
    assert_eq!(cells.len(), 4);
    assert_eq!(cells[..3], [n(2.0), n(1.0), hdr(2)]);
}

// --- variables and frames ---

#[test]
fn locals_read_and_update() {
    assert_eq!(stack(": f 10 var x x x add ; f"), vec![n(20.0)]);
    assert_eq!(stack(": f 1 var x 5 -> x x ; f"), vec![n(5.0)]);
    assert_eq!(stack(": f 1 var x 4 +> x x ; f"), vec![n(5.0)]);
}

#[test]
fn compound_locals_are_referenced_through_their_slot() {
    assert_eq!(stack(": f ( 1 2 3 ) var xs xs fetch ; f"), stack("( 1 2 3 )"));
    assert_eq!(
        stack(": f ( 1 2 3 ) var xs &xs fetch fetch ; f"),
        stack("( 1 2 3 )")
    );
    assert_eq!(
        stack(": f ( 1 2 3 ) var xs 9 -> xs[1] xs fetch ; f"),
        stack("( 1 9 3 )")
    );
}

#[test]
fn top_level_vars_live_for_the_unit() {
    assert_eq!(stack("7 var x x x mul"), vec![n(49.0)]);
    assert_eq!(stack("( 1 2 ) var xs xs fetch"), stack("( 1 2 )"));
}

#[test]
fn frame_discipline_restores_pointers() {
    let mut vm = fresh();
    interpret(&mut vm, ": f 1 var x ( 1 2 ) var ys x drop ;").unwrap();
    interpret(&mut vm, "f f f").unwrap();
    assert_eq!(vm.bp, RSTACK_BASE);
    assert_eq!(vm.rsp, RSTACK_BASE);
}

#[test]
fn globals_hold_simple_and_compound_values() {
    assert_eq!(stack("( 1 2 ) global xs xs fetch"), stack("( 1 2 )"));
    assert_eq!(
        stack("( 1 2 ) global xs 5 -> xs[0] xs fetch"),
        stack("( 5 2 )")
    );
    // scalar store over a compound global is a silent no-op
    assert_eq!(stack("( 1 2 ) global xs 9 -> xs xs fetch"), stack("( 1 2 )"));
    assert_eq!(stack("3 global g 4 +> g g"), vec![n(7.0)]);
}

#[test]
fn globals_persist_across_units() {
    let mut vm = fresh();
    interpret(&mut vm, "100 global a").unwrap();
    interpret(&mut vm, "a").unwrap();
    assert_eq!(vm.stack_data(), vec![n(100.0)]);
}

// --- dictionary ---

#[test]
fn dictionary_shadowing_and_forget() {
    let mut vm = fresh();
    dict::define(&mut vm, "x", n(1.0), false).unwrap();
    dict::mark(&mut vm).unwrap();
    dict::define(&mut vm, "x", n(2.0), false).unwrap();
    assert_eq!(dict::lookup(&vm, "x").unwrap(), Some(n(2.0)));
    dict::forget(&mut vm).unwrap();
    assert_eq!(dict::lookup(&vm, "x").unwrap(), Some(n(1.0)));
}

#[test]
fn forget_reverts_whole_definitions() {
    let mut vm = fresh();
    interpret(&mut vm, "mark").unwrap();
    interpret(&mut vm, ": f 42 ;").unwrap();
    assert!(dict::lookup(&vm, "f").unwrap().is_some());
    interpret(&mut vm, "forget").unwrap();
    assert!(dict::lookup(&vm, "f").unwrap().is_none());
}

#[test]
fn push_symbol_ref_resolves_builtins_and_words() {
    let mut vm = fresh();
    dict::push_symbol_ref(&mut vm, "add").unwrap();
    assert_eq!(vm.peek().unwrap().tag(), Tag::Builtin);
    interpret(&mut vm, ": g 1 ;").unwrap();
    dict::push_symbol_ref(&mut vm, "g").unwrap();
    assert_eq!(vm.peek().unwrap().tag(), Tag::Code);
}

// --- error surface ---

#[rstest]
#[case("drop", ErrorKind::StackUnderflow)]
#[case("no-such-word", ErrorKind::UndefinedWord)]
#[case("else", ErrorKind::Syntax)]
#[case("5 of 1 ; ;", ErrorKind::Syntax)]
#[case(": f 1", ErrorKind::Syntax)]
#[case("( 1 2", ErrorKind::Syntax)]
#[case("{ 1", ErrorKind::Syntax)]
#[case(": f 1 global g ;", ErrorKind::Syntax)]
#[case("1 case default 5 ; 2 of 6 ; ;", ErrorKind::Syntax)]
#[case(r#"1 "x" add"#, ErrorKind::BroadcastTypeMismatch)]
#[case("5 head", ErrorKind::Type)]
#[case("forget", ErrorKind::Type)]
#[case(r#""m" 5 dispatch"#, ErrorKind::Dispatch)]
#[case("&no-such-var", ErrorKind::UndefinedWord)]
#[case(": f : g ; ;", ErrorKind::Syntax)]
fn error_kinds(#[case] src: &str, #[case] expected: ErrorKind) {
    assert_eq!(error_kind(src), expected, "program {src:?}");
}

#[test]
fn data_stack_overflow_is_reported() {
    let src = "1 ".repeat(1100);
    assert_eq!(error_kind(&src), ErrorKind::StackOverflow);
}

#[test]
fn heap_exhaustion_is_reported() {
    let mut vm = fresh();
    let err = vm.alloc_data(DATA_CELLS + 1).expect_err("too large");
    assert_eq!(
        err.downcast_ref::<VmError>().unwrap().kind,
        ErrorKind::HeapExhausted
    );
}

#[test]
fn assignment_shape_is_enforced() {
    assert_eq!(
        error_kind("( 1 2 ) global xs ( 1 2 3 ) -> xs"),
        ErrorKind::AssignmentShape
    );
    assert_eq!(
        error_kind("1 global g ( 1 2 ) -> g"),
        ErrorKind::AssignmentShape
    );
}

#[test]
fn repl_reports_and_recovers() {
    let mut repl = Repl::new().unwrap();
    let report = repl.eval("drop").expect_err("underflow");
    assert!(report.starts_with("StackUnderflow:"), "report: {report}");
    assert!(report.contains("stack:"), "report: {report}");
    let out = repl.eval("1 2 add .").expect("recovered");
    assert_eq!(out, "3\n");
    assert_eq!(repl.vm.stack_data(), vec![]);
}

// --- printer ---

#[test]
fn print_formats_values() {
    let mut vm = run("( 1 ( 2 3 ) 4 ) .");
    insta::assert_snapshot!(vm.take_output().trim_end(), @"( 1 ( 2 3 ) 4 )");
    let mut vm = run("3.5 . 7 . \"hi\" . nil .");
    insta::assert_snapshot!(vm.take_output().trim_end(), @r"
    3.5
    7
    hi
    NIL
    ");
}

#[test]
fn print_pops_the_whole_span() {
    let vm = run("( 1 2 3 ) .");
    assert_eq!(vm.stack_data(), vec![]);
}

#[test]
fn case_selects_by_string_keys() {
    let src = r#"
        : judge case "one" of 1 ; "two" of 2 ; default 0 ; ; ;
        "two" judge .
        "seven" judge .
    "#;
    let mut vm = run(src);
    insta::assert_snapshot!(vm.take_output().trim_end(), @r"
    2
    0
    ");
}

#[test]
fn stack_snapshot_shows_raw_cells() {
    let vm = run("( 1 2 ) 7");
    assert_eq!(printer::stack_snapshot(&vm), "[2, 1, LIST(2), 7]");
}

// --- disassembler ---

#[test]
fn disassembles_linear_code() {
    let mut vm = fresh();
    let start = vm.compiler.cp;
    crate::parser::compile_source(&mut vm, "1 2 add").unwrap();
    let lines = crate::disasm::disassemble(&vm, start, vm.compiler.cp).unwrap();
    let mnemonics: Vec<&str> = lines.iter().map(|l| l.mnemonic.as_str()).collect();
    assert_eq!(mnemonics, ["reserve", "lit-16", "lit-16", "add", "halt"]);
    assert_eq!(lines[1].operand.as_deref(), Some("1"));
}

#[test]
fn disassembles_user_calls() {
    let mut vm = fresh();
    let start = vm.compiler.cp;
    crate::parser::compile_source(&mut vm, ": sq dup mul ; 3 sq").unwrap();
    let lines = crate::disasm::disassemble(&vm, start, vm.compiler.cp).unwrap();
    assert!(lines.iter().any(|l| l.mnemonic == "call"));
    assert!(lines.iter().any(|l| l.mnemonic == "exit"));
}

// --- lexer ---

#[test]
fn lexer_token_stream() {
    use crate::lexer::{Lexer, Token};
    let mut lex =
        Lexer::new(": sq dup * ; \\ comment\n( -2.5 ) \"s\" @w &v `sym -> +> 1e3");
    let mut tokens = Vec::new();
    while let Some(t) = lex.next().unwrap() {
        tokens.push(t);
    }
    assert_eq!(
        tokens,
        vec![
            Token::Word(":".into()),
            Token::Word("sq".into()),
            Token::Word("dup".into()),
            Token::Word("*".into()),
            Token::Word(";".into()),
            Token::LParen,
            Token::Number(-2.5),
            Token::RParen,
            Token::Str("s".into()),
            Token::CodeRef("w".into()),
            Token::VarRef("v".into()),
            Token::Str("sym".into()),
            Token::Arrow,
            Token::PlusArrow,
            Token::Number(1000.0),
        ]
    );
}

#[test]
fn lexer_rejects_unknown_characters() {
    use crate::lexer::Lexer;
    let mut lex = Lexer::new("1 ~ 2");
    lex.next().unwrap();
    assert!(lex.next().is_err());
}

// --- include ---

#[test]
fn include_loads_definitions_once() {
    let dir = std::env::temp_dir().join(format!("tacit-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let lib = dir.join("lib.tct");
    std::fs::write(&lib, ": inc2 2 add ;\n").unwrap();

    let mut vm = fresh();
    vm.include_host = Some(Box::new(FsIncludeHost { root: dir.clone() }));
    interpret(&mut vm, "include \"lib.tct\" include \"lib.tct\" 5 inc2").unwrap();
    assert_eq!(vm.stack_data(), vec![n(7.0)]);

    let _ = std::fs::remove_file(&lib);
    let _ = std::fs::remove_dir(&dir);
}

// --- misc semantics ---

#[test]
fn string_literals_are_interned() {
    let vm = run(r#""alpha" "alpha""#);
    let cells = vm.stack_data();
    assert_eq!(cells.len(), 2);
    assert_eq!(cells[0], cells[1]);
    assert_eq!(cells[0].tag(), Tag::String);
}

#[test]
fn backtick_symbols_are_string_literals() {
    assert_eq!(stack("`alpha"), stack(r#""alpha""#));
}

#[test]
fn eval_runs_builtin_references() {
    assert_eq!(stack("2 3 @add eval"), vec![n(5.0)]);
}

#[test]
fn mod_and_pow() {
    assert_eq!(stack("2 10 pow"), vec![n(1024.0)]);
    assert_eq!(stack("( 1 2 3 ) ( 2 2 2 ) pow"), stack("( 1 4 9 )"));
    assert_eq!(stack("0 recip"), vec![n(f32::INFINITY)]);
}

#[test]
fn definitions_persist_across_units() {
    let mut vm = fresh();
    interpret(&mut vm, ": sq dup mul ;").unwrap();
    interpret(&mut vm, "5 sq").unwrap();
    assert_eq!(vm.stack_data(), vec![n(25.0)]);
    interpret(&mut vm, ": quad sq sq ;").unwrap();
    interpret(&mut vm, "2 quad").unwrap();
    assert_eq!(vm.stack_data(), vec![n(25.0), n(16.0)]);
}

#[test]
fn execute_word_runs_until_the_outermost_exit() {
    let mut vm = fresh();
    interpret(&mut vm, ": sq dup mul ;").unwrap();
    let payload = dict::lookup(&vm, "sq").unwrap().expect("defined");
    vm.push(n(6.0)).unwrap();
    crate::interp::execute_word(&mut vm, payload.payload() as usize).unwrap();
    assert_eq!(vm.stack_data(), vec![n(36.0)]);
}

#[test]
fn peek_at_reads_cells_below_the_top() {
    let mut vm = fresh();
    interpret(&mut vm, "1 2 3").unwrap();
    assert_eq!(vm.peek_at(0).unwrap(), n(3.0));
    assert_eq!(vm.peek_at(2).unwrap(), n(1.0));
    assert!(vm.peek_at(3).is_err());
}

#[test]
fn raw_prints_undecoded_bits() {
    let mut vm = run("7 raw");
    assert_eq!(vm.take_output(), "0x40e00000 7\n");
}

#[test]
fn broadcasting_recurses_through_deep_nesting() {
    assert_eq!(
        stack("( ( 1 ( 2 3 ) ) 4 ) 1 add"),
        stack("( ( 2 ( 3 4 ) ) 5 )")
    );
}

#[test]
fn addressing_works_through_references() {
    let got = stack("( 1 100 2 200 ) ref keys");
    let len = got.len();
    assert_eq!(&got[len - 3..], &[n(2.0), n(1.0), hdr(2)]);
    assert_eq!(stack("( 7 8 9 ) ref length"), {
        let mut cells = stack("( 7 8 9 )");
        cells.push(n(3.0));
        cells
    });
}

#[test]
fn forget_rewinds_the_heap_pointer() {
    let mut vm = fresh();
    let before = vm.heap_top;
    dict::mark(&mut vm).unwrap();
    dict::define(&mut vm, "scratch", n(1.0), false).unwrap();
    assert!(vm.heap_top > before);
    dict::forget(&mut vm).unwrap();
    assert_eq!(vm.heap_top, before);
}

#[test]
fn undefined_word_reports_its_name() {
    let mut repl = Repl::new().unwrap();
    let report = repl.eval("no-such-word").expect_err("undefined");
    assert!(report.contains("no-such-word"), "report: {report}");
}
