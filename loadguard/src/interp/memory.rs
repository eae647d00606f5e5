//! Slot-based memory
//!
//! Every alloca, global and heap allocation is one slot holding raw bytes.
//! Integers are stored little-endian at their type's width and pointers as
//! their 8-byte encoded address.

use crate::ir::Type;

use super::error::{InterpResult, RuntimeError};
use super::value::{type_size, wrap, Address, Value};

/// Largest object an `Address` offset can span
pub const MAX_OBJECT_SIZE: u64 = u32::MAX as u64;

/// What created a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Stack,
    Global,
    Heap,
}

#[derive(Debug)]
struct Slot {
    kind: SlotKind,
    bytes: Vec<u8>,
    live: bool,
}

/// Interpreter memory
#[derive(Debug, Default)]
pub struct Memory {
    slots: Vec<Slot>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed object of `size` bytes
    pub fn allocate(&mut self, kind: SlotKind, size: u64) -> InterpResult<Address> {
        if size > MAX_OBJECT_SIZE {
            return Err(RuntimeError::out_of_memory(size));
        }
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(size as usize)
            .map_err(|_| RuntimeError::out_of_memory(size))?;
        bytes.resize(size as usize, 0);

        self.slots.push(Slot { kind, bytes, live: true });
        Ok(Address::new(self.slots.len() - 1, 0))
    }

    /// Release a stack object at function exit
    pub fn release(&mut self, addr: Address) {
        if let Some(slot) = addr.slot().and_then(|s| self.slots.get_mut(s)) {
            slot.live = false;
            slot.bytes = Vec::new();
        }
    }

    /// `free`: only live heap objects, at their start, may be released
    pub fn free(&mut self, addr: Address) -> InterpResult<()> {
        if addr.is_null() {
            return Ok(());
        }
        let slot = addr
            .slot()
            .and_then(|s| self.slots.get_mut(s))
            .filter(|s| s.live && s.kind == SlotKind::Heap && addr.offset() == 0)
            .ok_or_else(|| RuntimeError::invalid_free(&addr.to_string()))?;
        slot.live = false;
        slot.bytes = Vec::new();
        Ok(())
    }

    fn bytes(&self, addr: Address, len: u64, op: &str) -> InterpResult<&[u8]> {
        if addr.is_null() {
            return Err(RuntimeError::null_dereference(op));
        }
        let slot = addr
            .slot()
            .and_then(|s| self.slots.get(s))
            .filter(|s| s.live)
            .ok_or_else(|| RuntimeError::invalid_access(&format!("{op} of dangling pointer {addr}")))?;
        let start = addr.offset() as usize;
        let end = start + len as usize;
        slot.bytes.get(start..end).ok_or_else(|| {
            RuntimeError::invalid_access(&format!("{op} of {len} byte(s) at {addr} outside its object"))
        })
    }

    fn bytes_mut(&mut self, addr: Address, len: u64, op: &str) -> InterpResult<&mut [u8]> {
        // bounds and liveness checked on the shared path
        self.bytes(addr, len, op)?;
        let slot = &mut self.slots[addr.slot().unwrap_or_default()];
        let start = addr.offset() as usize;
        Ok(&mut slot.bytes[start..start + len as usize])
    }

    /// Load a value of type `ty`
    pub fn load(&self, addr: Address, ty: &Type) -> InterpResult<Value> {
        match ty {
            Type::Ptr(_) => {
                let bytes = self.bytes(addr, 8, "load")?;
                Ok(Value::Ptr(Address(u64::from_le_bytes(to_array(bytes)))))
            }
            Type::I1 | Type::I8 | Type::I32 | Type::I64 => {
                let size = type_size(ty);
                let bytes = self.bytes(addr, size, "load")?;
                let mut buf = [0u8; 8];
                buf[..size as usize].copy_from_slice(bytes);
                Ok(Value::Int(wrap(ty, i64::from_le_bytes(buf))))
            }
            other => Err(RuntimeError::type_error("scalar type", &other.to_string())),
        }
    }

    /// Store `value` as type `ty`
    pub fn store(&mut self, addr: Address, ty: &Type, value: Value) -> InterpResult<()> {
        let raw = match (ty, value) {
            (Type::Ptr(_), Value::Ptr(a)) => a.0.to_le_bytes(),
            (Type::I1 | Type::I8 | Type::I32 | Type::I64, Value::Int(n)) => n.to_le_bytes(),
            (ty, value) => return Err(RuntimeError::type_error(&ty.to_string(), value.type_name())),
        };
        let size = type_size(ty);
        self.bytes_mut(addr, size, "store")?.copy_from_slice(&raw[..size as usize]);
        Ok(())
    }

    pub fn write_bytes(&mut self, addr: Address, data: &[u8]) -> InterpResult<()> {
        self.bytes_mut(addr, data.len() as u64, "store")?.copy_from_slice(data);
        Ok(())
    }

    /// Bytes from `addr` up to, not including, the next NUL
    pub fn read_c_string(&self, addr: Address) -> InterpResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut at = addr;
        loop {
            let byte = self.bytes(at, 1, "string read")?[0];
            if byte == 0 {
                return Ok(out);
            }
            out.push(byte);
            at = at.offset_by(1);
        }
    }
}

fn to_array(bytes: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::ErrorKind;

    #[test]
    fn test_store_then_load_widths() {
        let mut mem = Memory::new();
        let a = mem.allocate(SlotKind::Stack, 8).unwrap();
        mem.store(a, &Type::I32, Value::Int(-2)).unwrap();
        assert_eq!(mem.load(a, &Type::I32).unwrap(), Value::Int(-2));
        assert_eq!(mem.load(a, &Type::I8).unwrap(), Value::Int(-2));
        assert_eq!(mem.load(a.offset_by(4), &Type::I32).unwrap(), Value::Int(0));
    }

    #[test]
    fn test_pointer_round_trip() {
        let mut mem = Memory::new();
        let target = mem.allocate(SlotKind::Global, 4).unwrap();
        let cell = mem.allocate(SlotKind::Stack, 8).unwrap();
        mem.store(cell, &Type::I32.ptr_to(), Value::Ptr(target)).unwrap();
        assert_eq!(mem.load(cell, &Type::I32.ptr_to()).unwrap(), Value::Ptr(target));
    }

    #[test]
    fn test_null_load_traps() {
        let mem = Memory::new();
        let err = mem.load(Address::NULL, &Type::I32).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NullDereference);
    }

    #[test]
    fn test_out_of_bounds_and_dangling() {
        let mut mem = Memory::new();
        let a = mem.allocate(SlotKind::Heap, 4).unwrap();
        assert_eq!(mem.load(a.offset_by(2), &Type::I32).unwrap_err().kind, ErrorKind::InvalidAccess);
        mem.free(a).unwrap();
        assert_eq!(mem.load(a, &Type::I8).unwrap_err().kind, ErrorKind::InvalidAccess);
        assert_eq!(mem.free(a).unwrap_err().kind, ErrorKind::InvalidFree);
    }

    #[test]
    fn test_free_rejects_stack_objects() {
        let mut mem = Memory::new();
        let a = mem.allocate(SlotKind::Stack, 4).unwrap();
        assert_eq!(mem.free(a).unwrap_err().kind, ErrorKind::InvalidFree);
        assert!(mem.free(Address::NULL).is_ok());
    }

    #[test]
    fn test_oversized_object_is_refused() {
        let mut mem = Memory::new();
        let err = mem.allocate(SlotKind::Global, MAX_OBJECT_SIZE + 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfMemory);
        let err = mem.allocate(SlotKind::Heap, u64::MAX).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfMemory);
        assert!(mem.allocate(SlotKind::Heap, 0).is_ok());
    }

    #[test]
    fn test_read_c_string() {
        let mut mem = Memory::new();
        let a = mem.allocate(SlotKind::Global, 4).unwrap();
        mem.write_bytes(a, b"hi\0\0").unwrap();
        assert_eq!(mem.read_c_string(a).unwrap(), b"hi");
    }
}
