//! Parser tests

use super::*;
use crate::ir::{format_module, Value};

const SAMPLE: &str = r#"; ModuleID = 'sample'

@globalPtr = global i32* null
@globalPtrPtr = global i32** @globalPtr
@greeting = constant [4 x i8] c"hi\0A\00"

declare i32 @printf(i8* nocapture readonly, ...) nounwind

define i32 @main(i32 %argc) {
entry:
  %slot = alloca i32*
  %p = load i32*, i32** @globalPtr, !loc(7, 3)
  store i32* %p, i32** %slot
  %v = load i32, i32* %p, !loc(8, 10)
  %c = icmp slt i32 %v, 0
  br i1 %c, label %neg, label %done
neg:
  %s = bitcast [4 x i8]* @greeting to i8*
  %n = call i32 @printf(i8* %s)
  br label %done
done:
  ret i32 %v
}
"#;

#[test]
fn test_parse_sample_module() {
    let module = parse_module(SAMPLE).unwrap();
    assert_eq!(module.name, "sample");
    assert_eq!(module.globals.len(), 3);
    assert_eq!(module.functions.len(), 2);

    let printf = &module.functions[0];
    assert!(printf.is_declaration());
    assert!(printf.is_var_arg);
    assert_eq!(printf.params[0].attrs, vec![ParamAttr::NoCapture, ParamAttr::ReadOnly]);
    assert_eq!(printf.attrs, vec![FnAttr::NoUnwind]);

    let main = &module.functions[1];
    assert_eq!(main.blocks.len(), 3);
    assert_eq!(main.params[0].name, "argc");
    assert_eq!(module.count_loads(), 2);
}

#[test]
fn test_parse_load_with_location() {
    let module = parse_module(SAMPLE).unwrap();
    let inst = &module.functions[1].blocks[0].instructions[3];
    assert_eq!(inst.loc, Some(SourceLoc::new(8, 10)));
    match &inst.kind {
        InstKind::Load { dest, ty, addr } => {
            assert_eq!(dest, "v");
            assert_eq!(*ty, Type::I32);
            assert_eq!(addr.ty, Type::I32.ptr_to());
            assert_eq!(addr.value, Value::Local("p".to_string()));
        }
        other => panic!("expected load, found {other:?}"),
    }
}

#[test]
fn test_parse_globals() {
    let module = parse_module(SAMPLE).unwrap();
    assert_eq!(module.globals[0].initializer, Some(Initializer::Null));
    assert_eq!(
        module.globals[1].initializer,
        Some(Initializer::Address("globalPtr".to_string()))
    );
    assert_eq!(module.globals[2].initializer, Some(Initializer::Bytes(b"hi\n\0".to_vec())));
    assert!(module.globals[2].is_constant);
}

#[test]
fn test_format_parse_round_trip() {
    let module = parse_module(SAMPLE).unwrap();
    let printed = format_module(&module);
    let reparsed = parse_module(&printed).unwrap();
    assert_eq!(reparsed, module);
    assert_eq!(format_module(&reparsed), printed);
}

#[test]
fn test_default_module_name() {
    let module = parse_module("declare void @exit(i32) noreturn\n").unwrap();
    assert_eq!(module.name, DEFAULT_MODULE_NAME);
    assert_eq!(module.functions[0].attrs, vec![FnAttr::NoReturn]);
}

#[test]
fn test_binary_rhs_takes_lhs_type() {
    let module = parse_module("define i64 @f(i64 %x) {\nentry:\n  %y = add i64 %x, 1\n  ret i64 %y\n}\n").unwrap();
    match &module.functions[0].blocks[0].instructions[0].kind {
        InstKind::Binary { rhs, .. } => assert_eq!(*rhs, Operand::int(Type::I64, 1)),
        other => panic!("expected add, found {other:?}"),
    }
}

#[test]
fn test_error_unknown_instruction() {
    let source = "define void @f() {\nentry:\n  %x = frobnicate i32 1\n  ret void\n}\n";
    let err = parse_module(source).unwrap_err();
    assert_eq!(err.message(), "unknown instruction `frobnicate`");
    let span = err.span().unwrap();
    assert_eq!(&source[span.start..span.end], "frobnicate");
}

#[test]
fn test_error_load_without_dest() {
    let err = parse_module("define void @f(i32* %p) {\nentry:\n  load i32, i32* %p\n  ret void\n}\n").unwrap_err();
    assert_eq!(err.message(), "`load` must define a value");
}

#[test]
fn test_error_unexpected_eof() {
    let err = parse_module("define void @f() {\nentry:\n").unwrap_err();
    assert!(err.message().contains("end of input"));
}

#[test]
fn test_error_empty_body() {
    let err = parse_module("define void @f() {\n}\n").unwrap_err();
    assert_eq!(err.message(), "function `@f` has no blocks");
}

#[test]
fn test_error_negative_array_length() {
    let source = "@g = global [-2 x i8] zeroinitializer\n";
    let err = parse_module(source).unwrap_err();
    assert_eq!(err.message(), "array length must not be negative");
    let span = err.span().unwrap();
    assert_eq!(&source[span.start..span.end], "[-2");
}

#[test]
fn test_error_unknown_type() {
    let err = parse_module("@g = global f64 0\n").unwrap_err();
    assert_eq!(err.message(), "unknown type `f64`");
}
