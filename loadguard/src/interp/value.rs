//! Runtime values for the interpreter

use std::fmt;

use crate::ir::Type;

/// Runtime value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// Integer of any width, kept sign-extended to 64 bits
    Int(i64),
    /// Pointer
    Ptr(Address),
    /// Result of a void call
    Void,
}

impl Value {
    /// Get type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Ptr(_) => "pointer",
            Value::Void => "void",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ptr(&self) -> Option<Address> {
        match self {
            Value::Ptr(a) => Some(*a),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Ptr(a) => !a.is_null(),
            Value::Void => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Ptr(a) => write!(f, "{a}"),
            Value::Void => write!(f, "void"),
        }
    }
}

/// Pointer into interpreter memory: memory slot in the high 32 bits
/// (1-based, 0 is null), byte offset in the low 32 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl Address {
    pub const NULL: Address = Address(0);

    pub fn new(slot: usize, offset: u32) -> Self {
        Address(((slot as u64 + 1) << 32) | offset as u64)
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Slot index, or None for addresses in the null page
    pub fn slot(&self) -> Option<usize> {
        match self.0 >> 32 {
            0 => None,
            n => Some(n as usize - 1),
        }
    }

    pub fn offset(&self) -> u32 {
        self.0 as u32
    }

    /// Move by `delta` bytes within the same slot
    pub fn offset_by(&self, delta: i64) -> Address {
        let offset = (self.offset() as i64).wrapping_add(delta) as u32;
        Address((self.0 & !0xffff_ffff) | offset as u64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot() {
            None if self.is_null() => write!(f, "null"),
            None => write!(f, "0x{:x}", self.0),
            Some(slot) => write!(f, "#{slot}+{}", self.offset()),
        }
    }
}

/// Size in bytes of a value of type `ty` in memory
pub fn type_size(ty: &Type) -> u64 {
    match ty {
        Type::Void => 0,
        Type::I1 | Type::I8 => 1,
        Type::I32 => 4,
        Type::I64 | Type::Ptr(_) => 8,
        Type::Array { element, len } => type_size(element).saturating_mul(*len),
    }
}

/// Truncate `n` to the width of `ty`, sign-extending back to 64 bits.
/// `i1` is kept as 0 or 1.
pub fn wrap(ty: &Type, n: i64) -> i64 {
    match ty {
        Type::I1 => n & 1,
        Type::I8 => n as i8 as i64,
        Type::I32 => n as i32 as i64,
        _ => n,
    }
}

/// Zero-extended view of `n` at the width of `ty`
pub fn unsigned(ty: &Type, n: i64) -> u64 {
    match ty {
        Type::I1 => n as u64 & 1,
        Type::I8 => n as u8 as u64,
        Type::I32 => n as u32 as u64,
        _ => n as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parts() {
        let a = Address::new(3, 16);
        assert_eq!(a.slot(), Some(3));
        assert_eq!(a.offset(), 16);
        assert_eq!(a.offset_by(-4).offset(), 12);
        assert_eq!(a.offset_by(-4).slot(), Some(3));
        assert!(Address::NULL.is_null());
        assert_eq!(Address::NULL.slot(), None);
        assert_eq!(Address::NULL.to_string(), "null");
    }

    #[test]
    fn test_address_underflow_stays_in_slot() {
        let a = Address::new(0, 0).offset_by(-1);
        assert_eq!(a.slot(), Some(0));
        assert_eq!(a.offset(), u32::MAX);
    }

    #[test]
    fn test_wrap_widths() {
        assert_eq!(wrap(&Type::I8, 200), -56);
        assert_eq!(wrap(&Type::I32, i32::MAX as i64 + 1), i32::MIN as i64);
        assert_eq!(wrap(&Type::I1, 3), 1);
        assert_eq!(unsigned(&Type::I32, -1), u32::MAX as u64);
        assert_eq!(unsigned(&Type::I8, -1), 255);
    }

    #[test]
    fn test_type_size() {
        assert_eq!(type_size(&Type::array_of(Type::I32, 4)), 16);
        assert_eq!(type_size(&Type::byte_ptr()), 8);
    }

    #[test]
    fn test_huge_array_size_saturates() {
        let huge = Type::array_of(Type::I32, 1 << 62);
        assert_eq!(type_size(&huge), u64::MAX);
        assert_eq!(type_size(&Type::array_of(huge, 2)), u64::MAX);
    }
}
