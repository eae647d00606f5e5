//! Built-in C runtime functions
//!
//! Calls to a declared but undefined function dispatch here by name.

use std::collections::HashMap;

use super::error::{InterpResult, RuntimeError};
use super::memory::{Memory, SlotKind};
use super::value::{Address, Value};

/// Machine state a built-in may touch
#[derive(Debug, Default)]
pub struct Runtime {
    pub memory: Memory,
    /// Captured standard output
    pub stdout: Vec<u8>,
}

/// Builtin function type
pub type BuiltinFn = fn(&mut Runtime, &[Value]) -> InterpResult<Value>;

/// All built-ins by symbol name
pub fn builtins() -> HashMap<&'static str, BuiltinFn> {
    let mut table: HashMap<&'static str, BuiltinFn> = HashMap::new();
    table.insert("printf", builtin_printf);
    table.insert("puts", builtin_puts);
    table.insert("malloc", builtin_malloc);
    table.insert("free", builtin_free);
    table.insert("exit", builtin_exit);
    table
}

fn expect_args(name: &str, args: &[Value], n: usize) -> InterpResult<()> {
    if args.len() != n {
        return Err(RuntimeError::arity_mismatch(name, n, args.len()));
    }
    Ok(())
}

fn int_arg(args: &[Value], i: usize) -> InterpResult<i64> {
    args[i]
        .as_int()
        .ok_or_else(|| RuntimeError::type_error("integer", args[i].type_name()))
}

fn ptr_arg(args: &[Value], i: usize) -> InterpResult<Address> {
    args[i]
        .as_ptr()
        .ok_or_else(|| RuntimeError::type_error("pointer", args[i].type_name()))
}

/// printf(fmt: i8*, ...) -> i32
fn builtin_printf(rt: &mut Runtime, args: &[Value]) -> InterpResult<Value> {
    if args.is_empty() {
        return Err(RuntimeError::arity_mismatch("printf", 1, 0));
    }
    let format = rt.memory.read_c_string(ptr_arg(args, 0)?)?;
    let text = format_printf(&rt.memory, &format, &args[1..])?;
    rt.stdout.extend_from_slice(&text);
    Ok(Value::Int(text.len() as i64))
}

/// puts(s: i8*) -> i32
fn builtin_puts(rt: &mut Runtime, args: &[Value]) -> InterpResult<Value> {
    expect_args("puts", args, 1)?;
    let text = rt.memory.read_c_string(ptr_arg(args, 0)?)?;
    rt.stdout.extend_from_slice(&text);
    rt.stdout.push(b'\n');
    Ok(Value::Int(0))
}

/// malloc(size: i64) -> i8*
fn builtin_malloc(rt: &mut Runtime, args: &[Value]) -> InterpResult<Value> {
    expect_args("malloc", args, 1)?;
    let size = int_arg(args, 0)?;
    if size < 0 {
        return Err(RuntimeError::invalid_access(&format!("malloc of negative size {size}")));
    }
    // a request no object can satisfy fails the way C's malloc does
    match rt.memory.allocate(SlotKind::Heap, size as u64) {
        Ok(addr) => Ok(Value::Ptr(addr)),
        Err(_) => Ok(Value::Ptr(Address::NULL)),
    }
}

/// free(p: i8*)
fn builtin_free(rt: &mut Runtime, args: &[Value]) -> InterpResult<Value> {
    expect_args("free", args, 1)?;
    rt.memory.free(ptr_arg(args, 0)?)?;
    Ok(Value::Void)
}

/// exit(status: i32), never returns
fn builtin_exit(_rt: &mut Runtime, args: &[Value]) -> InterpResult<Value> {
    expect_args("exit", args, 1)?;
    Err(RuntimeError::exit(int_arg(args, 0)? as i32))
}

#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    long: bool,
}

/// Expand a printf format against `args`
pub fn format_printf(memory: &Memory, format: &[u8], args: &[Value]) -> InterpResult<Vec<u8>> {
    let mut out = Vec::with_capacity(format.len());
    let mut args = args.iter();
    let mut bytes = format.iter().copied().peekable();

    while let Some(b) = bytes.next() {
        if b != b'%' {
            out.push(b);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = bytes.peek() {
            match flag {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                b'+' => spec.plus = true,
                b' ' => {}
                _ => break,
            }
            bytes.next();
        }
        while let Some(&d) = bytes.peek()
            && d.is_ascii_digit()
        {
            spec.width = spec.width * 10 + (d - b'0') as usize;
            bytes.next();
        }
        while let Some(&m) = bytes.peek() {
            match m {
                b'l' | b'z' | b'j' => spec.long = true,
                b'h' => {}
                _ => break,
            }
            bytes.next();
        }

        let conv = bytes
            .next()
            .ok_or_else(|| RuntimeError::format_error("format ends inside a conversion"))?;
        if conv == b'%' {
            out.push(b'%');
            continue;
        }

        let arg = args
            .next()
            .ok_or_else(|| RuntimeError::format_error(&format!("missing argument for %{}", conv as char)))?;
        let (body, numeric) = match conv {
            b'd' | b'i' => {
                let n = int_value(arg)?;
                let n = if spec.long { n } else { n as i32 as i64 };
                let sign = if spec.plus && n >= 0 { "+" } else { "" };
                (format!("{sign}{n}").into_bytes(), true)
            }
            b'u' => (unsigned_value(arg, spec.long)?.to_string().into_bytes(), true),
            b'x' => (format!("{:x}", unsigned_value(arg, spec.long)?).into_bytes(), true),
            b'X' => (format!("{:X}", unsigned_value(arg, spec.long)?).into_bytes(), true),
            b'c' => (vec![int_value(arg)? as u8], false),
            b's' => match arg {
                Value::Ptr(a) if a.is_null() => (b"(null)".to_vec(), false),
                Value::Ptr(a) => (memory.read_c_string(*a)?, false),
                other => return Err(RuntimeError::type_error("string pointer", other.type_name())),
            },
            b'p' => match arg {
                Value::Ptr(a) => (format!("0x{:x}", a.0).into_bytes(), false),
                other => return Err(RuntimeError::type_error("pointer", other.type_name())),
            },
            other => {
                return Err(RuntimeError::format_error(&format!(
                    "unsupported conversion %{}",
                    other as char
                )));
            }
        };
        pad(&mut out, body, &spec, numeric);
    }

    Ok(out)
}

fn int_value(arg: &Value) -> InterpResult<i64> {
    arg.as_int()
        .ok_or_else(|| RuntimeError::format_error(&format!("expected integer argument, got {}", arg.type_name())))
}

fn unsigned_value(arg: &Value, long: bool) -> InterpResult<u64> {
    let n = int_value(arg)?;
    Ok(if long { n as u64 } else { n as u32 as u64 })
}

fn pad(out: &mut Vec<u8>, body: Vec<u8>, spec: &Spec, numeric: bool) {
    let fill = spec.width.saturating_sub(body.len());
    if spec.left {
        out.extend_from_slice(&body);
        out.extend(std::iter::repeat_n(b' ', fill));
    } else if spec.zero && numeric {
        let sign = usize::from(matches!(body.first(), Some(b'-' | b'+')));
        out.extend_from_slice(&body[..sign]);
        out.extend(std::iter::repeat_n(b'0', fill));
        out.extend_from_slice(&body[sign..]);
    } else {
        out.extend(std::iter::repeat_n(b' ', fill));
        out.extend_from_slice(&body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ErrorKind;

    fn printf(format: &str, args: &[Value]) -> String {
        String::from_utf8(format_printf(&Memory::new(), format.as_bytes(), args).unwrap()).unwrap()
    }

    #[test]
    fn test_printf_integers() {
        assert_eq!(printf("min=%d max=%i\n", &[Value::Int(-3), Value::Int(9)]), "min=-3 max=9\n");
        assert_eq!(printf("%u", &[Value::Int(-1)]), "4294967295");
        assert_eq!(printf("%lu", &[Value::Int(-1)]), "18446744073709551615");
        assert_eq!(printf("%lld", &[Value::Int(i64::MIN)]), "-9223372036854775808");
        assert_eq!(printf("%x %X", &[Value::Int(255), Value::Int(255)]), "ff FF");
    }

    #[test]
    fn test_printf_width_and_flags() {
        assert_eq!(printf("[%5d]", &[Value::Int(42)]), "[   42]");
        assert_eq!(printf("[%-5d]", &[Value::Int(42)]), "[42   ]");
        assert_eq!(printf("[%05d]", &[Value::Int(-42)]), "[-0042]");
        assert_eq!(printf("%+d", &[Value::Int(7)]), "+7");
    }

    #[test]
    fn test_printf_chars_and_percent() {
        assert_eq!(printf("%c%c 100%%", &[Value::Int(b'o' as i64), Value::Int(b'k' as i64)]), "ok 100%");
    }

    #[test]
    fn test_printf_strings() {
        let mut mem = Memory::new();
        let s = mem.allocate(SlotKind::Global, 6).unwrap();
        mem.write_bytes(s, b"world\0").unwrap();
        let out = format_printf(&mem, b"hello %s, %s", &[Value::Ptr(s), Value::Ptr(Address::NULL)]).unwrap();
        assert_eq!(out, b"hello world, (null)");
    }

    #[test]
    fn test_printf_missing_argument() {
        let err = format_printf(&Memory::new(), b"%d %d", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::FormatError);
    }

    #[test]
    fn test_exit_diverges() {
        let mut rt = Runtime::default();
        let err = builtin_exit(&mut rt, &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_malloc_and_free() {
        let mut rt = Runtime::default();
        let p = builtin_malloc(&mut rt, &[Value::Int(16)]).unwrap();
        assert_eq!(builtin_free(&mut rt, &[p]).unwrap(), Value::Void);
        assert_eq!(builtin_free(&mut rt, &[p]).unwrap_err().kind, ErrorKind::InvalidFree);
    }

    #[test]
    fn test_malloc_too_large_returns_null() {
        let mut rt = Runtime::default();
        let p = builtin_malloc(&mut rt, &[Value::Int(i64::MAX)]).unwrap();
        assert_eq!(p, Value::Ptr(Address::NULL));
        let p = builtin_malloc(&mut rt, &[Value::Int(1 << 33)]).unwrap();
        assert_eq!(p, Value::Ptr(Address::NULL));
        // freeing the failed allocation is a no-op
        assert_eq!(builtin_free(&mut rt, &[p]).unwrap(), Value::Void);
    }

    #[test]
    fn test_puts_appends_newline() {
        let mut rt = Runtime::default();
        let s = rt.memory.allocate(SlotKind::Global, 3).unwrap();
        rt.memory.write_bytes(s, b"ok\0").unwrap();
        builtin_puts(&mut rt, &[Value::Ptr(s)]).unwrap();
        assert_eq!(rt.stdout, b"ok\n");
    }
}
