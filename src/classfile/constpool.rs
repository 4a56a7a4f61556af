//! Constant pool and constants for Java class files.
//!
//! The pool is an append/lookup arena with deduplicating insert: indices are
//! 1-based, `Long` and `Double` entries occupy two slots, and entries are
//! never mutated in place with a single exception, the placeholder swap used
//! to add method handle constants (a fresh `Integer` is appended and its
//! payload is then overwritten with the handle).

use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

mod constant_tags {
    pub const CONSTANT_UTF8: u8 = 1;
    pub const CONSTANT_INTEGER: u8 = 3;
    pub const CONSTANT_FLOAT: u8 = 4;
    pub const CONSTANT_LONG: u8 = 5;
    pub const CONSTANT_DOUBLE: u8 = 6;
    pub const CONSTANT_CLASS: u8 = 7;
    pub const CONSTANT_STRING: u8 = 8;
    pub const CONSTANT_FIELDREF: u8 = 9;
    pub const CONSTANT_METHODREF: u8 = 10;
    pub const CONSTANT_INTERFACEMETHODREF: u8 = 11;
    pub const CONSTANT_NAMEANDTYPE: u8 = 12;
    pub const CONSTANT_METHODHANDLE: u8 = 15;
    pub const CONSTANT_METHODTYPE: u8 = 16;
    pub const CONSTANT_INVOKEDYNAMIC: u8 = 18;
}

impl Constant {
    /// True for entries that occupy two pool slots.
    fn is_wide(&self) -> bool {
        matches!(self, Constant::Long(_) | Constant::Double(_))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        use constant_tags::*;
        let mut bytes = Vec::new();
        match self {
            Constant::Utf8(value) => {
                bytes.push(CONSTANT_UTF8);
                let utf8_bytes = value.as_bytes();
                bytes.extend_from_slice(&(utf8_bytes.len() as u16).to_be_bytes());
                bytes.extend_from_slice(utf8_bytes);
            }
            Constant::Integer(value) => {
                bytes.push(CONSTANT_INTEGER);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Float(value) => {
                bytes.push(CONSTANT_FLOAT);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Long(value) => {
                bytes.push(CONSTANT_LONG);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Double(value) => {
                bytes.push(CONSTANT_DOUBLE);
                bytes.extend_from_slice(&value.to_be_bytes());
            }
            Constant::Class(name_index) => {
                bytes.push(CONSTANT_CLASS);
                bytes.extend_from_slice(&name_index.to_be_bytes());
            }
            Constant::String(string_index) => {
                bytes.push(CONSTANT_STRING);
                bytes.extend_from_slice(&string_index.to_be_bytes());
            }
            Constant::FieldRef(class_index, name_and_type_index) => {
                bytes.push(CONSTANT_FIELDREF);
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::MethodRef(class_index, name_and_type_index) => {
                bytes.push(CONSTANT_METHODREF);
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::InterfaceMethodRef(class_index, name_and_type_index) => {
                bytes.push(CONSTANT_INTERFACEMETHODREF);
                bytes.extend_from_slice(&class_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
            Constant::NameAndType(name_index, descriptor_index) => {
                bytes.push(CONSTANT_NAMEANDTYPE);
                bytes.extend_from_slice(&name_index.to_be_bytes());
                bytes.extend_from_slice(&descriptor_index.to_be_bytes());
            }
            Constant::MethodHandle(reference_kind, reference_index) => {
                bytes.push(CONSTANT_METHODHANDLE);
                bytes.push(*reference_kind);
                bytes.extend_from_slice(&reference_index.to_be_bytes());
            }
            Constant::MethodType(descriptor_index) => {
                bytes.push(CONSTANT_METHODTYPE);
                bytes.extend_from_slice(&descriptor_index.to_be_bytes());
            }
            Constant::InvokeDynamic(bootstrap_method_attr_index, name_and_type_index) => {
                bytes.push(CONSTANT_INVOKEDYNAMIC);
                bytes.extend_from_slice(&bootstrap_method_attr_index.to_be_bytes());
                bytes.extend_from_slice(&name_and_type_index.to_be_bytes());
            }
        }
        bytes
    }
}

/// Bit-exact, hashable mirror of a constant, used as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    InvokeDynamic(u16, u16),
}

impl Key {
    fn of(constant: &Constant) -> Self {
        match constant {
            Constant::Utf8(v) => Key::Utf8(v.clone()),
            Constant::Integer(v) => Key::Integer(*v),
            Constant::Float(v) => Key::Float(v.to_bits()),
            Constant::Long(v) => Key::Long(*v),
            Constant::Double(v) => Key::Double(v.to_bits()),
            Constant::Class(a) => Key::Class(*a),
            Constant::String(a) => Key::String(*a),
            Constant::FieldRef(a, b) => Key::FieldRef(*a, *b),
            Constant::MethodRef(a, b) => Key::MethodRef(*a, *b),
            Constant::InterfaceMethodRef(a, b) => Key::InterfaceMethodRef(*a, *b),
            Constant::NameAndType(a, b) => Key::NameAndType(*a, *b),
            Constant::MethodHandle(a, b) => Key::MethodHandle(*a, *b),
            Constant::MethodType(a) => Key::MethodType(*a),
            Constant::InvokeDynamic(a, b) => Key::InvokeDynamic(*a, *b),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    /// Entries indexed by slot; `None` marks the phantom second slot of a
    /// wide entry and the unused slot 0.
    entries: Vec<Option<Constant>>,
    lookup: HashMap<Key, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self { entries: vec![None], lookup: HashMap::new() }
    }

    /// The number of pool slots, as written in the classfile header.
    pub fn len(&self) -> u16 {
        self.entries.len() as u16
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    fn add(&mut self, constant: Constant) -> Result<u16> {
        let key = Key::of(&constant);
        if let Some(&index) = self.lookup.get(&key) {
            return Ok(index);
        }
        let wide = constant.is_wide();
        // the classfile header counts slots in a u16; a fresh entry past that
        // limit would alias an existing index
        if self.entries.len() + if wide { 2 } else { 1 } > u16::MAX as usize {
            return Err(Error::codegen_error("constant pool exceeds 65535 slots"));
        }
        let index = self.entries.len() as u16;
        self.entries.push(Some(constant));
        if wide {
            self.entries.push(None);
        }
        self.lookup.insert(key, index);
        Ok(index)
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16> {
        self.add(Constant::Utf8(value.to_string()))
    }

    pub fn class(&mut self, name: &str) -> Result<u16> {
        let name_index = self.utf8(name)?;
        self.add(Constant::Class(name_index))
    }

    pub fn string(&mut self, value: &str) -> Result<u16> {
        let utf8_index = self.utf8(value)?;
        self.add(Constant::String(utf8_index))
    }

    pub fn integer(&mut self, value: i32) -> Result<u16> {
        self.add(Constant::Integer(value))
    }

    pub fn long(&mut self, value: i64) -> Result<u16> {
        self.add(Constant::Long(value))
    }

    pub fn float(&mut self, value: f32) -> Result<u16> {
        self.add(Constant::Float(value))
    }

    pub fn double(&mut self, value: f64) -> Result<u16> {
        self.add(Constant::Double(value))
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.add(Constant::NameAndType(name_index, descriptor_index))
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class(class)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(Constant::FieldRef(class_index, name_and_type_index))
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class(class)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(Constant::MethodRef(class_index, name_and_type_index))
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class(class)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(Constant::InterfaceMethodRef(class_index, name_and_type_index))
    }

    pub fn method_type(&mut self, descriptor: &str) -> Result<u16> {
        let descriptor_index = self.utf8(descriptor)?;
        self.add(Constant::MethodType(descriptor_index))
    }

    pub fn invoke_dynamic(&mut self, bootstrap_index: u16, name: &str, descriptor: &str) -> Result<u16> {
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.add(Constant::InvokeDynamic(bootstrap_index, name_and_type_index))
    }

    /// Adds a method handle constant. There is no direct way to append one in
    /// the underlying table discipline, so a fresh integer placeholder is
    /// appended first and its payload is then overwritten with the handle.
    pub fn method_handle(&mut self, reference_kind: u8, reference_index: u16) -> Result<u16> {
        let key = Key::MethodHandle(reference_kind, reference_index);
        if let Some(&index) = self.lookup.get(&key) {
            return Ok(index);
        }

        // an integer that is certainly not in the pool yet
        let mut counter = 0i32;
        let before = self.entries.len();
        let mut index = self.integer(counter)?;
        while self.entries.len() == before {
            counter += 1;
            index = self.integer(counter)?;
        }

        self.lookup.remove(&Key::Integer(counter));
        self.entries[index as usize] = Some(Constant::MethodHandle(reference_kind, reference_index));
        self.lookup.insert(key, index);
        Ok(index)
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize).and_then(Option::as_ref)
    }

    fn expect(&self, index: u16, what: &str) -> Result<&Constant> {
        self.get(index)
            .ok_or_else(|| Error::illegal_module(format!("missing constant pool entry {index} ({what} expected)")))
    }

    /// The string of the Utf8 entry at the given index.
    pub fn utf8_at(&self, index: u16) -> Result<&str> {
        match self.expect(index, "Utf8")? {
            Constant::Utf8(value) => Ok(value),
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, Utf8 expected"))),
        }
    }

    /// The internal name of the Class entry at the given index.
    pub fn class_name_at(&self, index: u16) -> Result<&str> {
        match self.expect(index, "Class")? {
            Constant::Class(name_index) => self.utf8_at(*name_index),
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, Class expected"))),
        }
    }

    /// The (name, descriptor) pair of the NameAndType entry at the given index.
    pub fn name_and_type_at(&self, index: u16) -> Result<(&str, &str)> {
        match self.expect(index, "NameAndType")? {
            Constant::NameAndType(name_index, descriptor_index) => {
                Ok((self.utf8_at(*name_index)?, self.utf8_at(*descriptor_index)?))
            }
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, NameAndType expected"))),
        }
    }

    /// The (class, name, descriptor) triple of the method or interface method
    /// reference at the given index.
    pub fn method_ref_at(&self, index: u16) -> Result<(&str, &str, &str)> {
        match self.expect(index, "MethodRef")? {
            Constant::MethodRef(class_index, nat_index)
            | Constant::InterfaceMethodRef(class_index, nat_index) => {
                let class = self.class_name_at(*class_index)?;
                let (name, descriptor) = self.name_and_type_at(*nat_index)?;
                Ok((class, name, descriptor))
            }
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, MethodRef expected"))),
        }
    }

    /// The (class, name, descriptor) triple of the field reference at the given index.
    pub fn field_ref_at(&self, index: u16) -> Result<(&str, &str, &str)> {
        match self.expect(index, "FieldRef")? {
            Constant::FieldRef(class_index, nat_index) => {
                let class = self.class_name_at(*class_index)?;
                let (name, descriptor) = self.name_and_type_at(*nat_index)?;
                Ok((class, name, descriptor))
            }
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, FieldRef expected"))),
        }
    }

    /// The (reference kind, reference index) pair of the method handle at the given index.
    pub fn method_handle_at(&self, index: u16) -> Result<(u8, u16)> {
        match self.expect(index, "MethodHandle")? {
            Constant::MethodHandle(kind, reference_index) => Ok((*kind, *reference_index)),
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, MethodHandle expected"))),
        }
    }

    /// The descriptor string of the MethodType entry at the given index.
    pub fn method_type_at(&self, index: u16) -> Result<&str> {
        match self.expect(index, "MethodType")? {
            Constant::MethodType(descriptor_index) => self.utf8_at(*descriptor_index),
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, MethodType expected"))),
        }
    }

    /// The (bootstrap index, name, descriptor) triple of the InvokeDynamic
    /// entry at the given index.
    pub fn invoke_dynamic_at(&self, index: u16) -> Result<(u16, &str, &str)> {
        match self.expect(index, "InvokeDynamic")? {
            Constant::InvokeDynamic(bootstrap_index, nat_index) => {
                let (name, descriptor) = self.name_and_type_at(*nat_index)?;
                Ok((*bootstrap_index, name, descriptor))
            }
            other => Err(Error::illegal_module(format!("constant {index} is {other:?}, InvokeDynamic expected"))),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.len().to_be_bytes());
        for constant in self.entries.iter().flatten() {
            bytes.extend_from_slice(&constant.to_bytes());
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::defs::ref_kinds;

    #[test]
    fn test_deduplicating_insert() {
        let mut cp = ConstantPool::new();
        let a = cp.utf8("hello").unwrap();
        let b = cp.utf8("hello").unwrap();
        assert_eq!(a, b);
        let m1 = cp.method_ref("Foo", "bar", "()V").unwrap();
        let m2 = cp.method_ref("Foo", "bar", "()V").unwrap();
        assert_eq!(m1, m2);
    }

    #[test]
    fn test_wide_entries_take_two_slots() {
        let mut cp = ConstantPool::new();
        let l = cp.long(42).unwrap();
        let next = cp.integer(7).unwrap();
        assert_eq!(next, l + 2);
        assert_eq!(cp.long(42).unwrap(), l);
    }

    #[test]
    fn test_placeholder_swap_for_method_handles() {
        let mut cp = ConstantPool::new();
        let mref = cp.method_ref("Foo", "bar", "()V").unwrap();
        let h1 = cp.method_handle(ref_kinds::REF_INVOKE_SPECIAL, mref).unwrap();
        assert!(matches!(cp.get(h1), Some(Constant::MethodHandle(_, _))));
        // deduplicated on re-insertion
        let h2 = cp.method_handle(ref_kinds::REF_INVOKE_SPECIAL, mref).unwrap();
        assert_eq!(h1, h2);
        // a different kind yields a different entry
        let h3 = cp.method_handle(ref_kinds::REF_INVOKE_STATIC, mref).unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn test_typed_accessors_reject_mismatches() {
        let mut cp = ConstantPool::new();
        let i = cp.integer(3).unwrap();
        assert!(cp.utf8_at(i).is_err());
        assert!(cp.method_ref_at(i).is_err());
        assert!(cp.method_ref_at(999).is_err());
    }

    #[test]
    fn test_method_ref_resolution() {
        let mut cp = ConstantPool::new();
        let m = cp.method_ref("a/B", "run", "(I)J").unwrap();
        let (class, name, descriptor) = cp.method_ref_at(m).unwrap();
        assert_eq!((class, name, descriptor), ("a/B", "run", "(I)J"));
    }

    #[test]
    fn test_insertion_past_the_slot_limit_is_rejected() {
        let mut cp = ConstantPool::new();
        let mut seen = std::collections::HashSet::new();
        let mut overflowed = false;
        for i in 0..70_000u32 {
            match cp.utf8(&format!("s{i}")) {
                Ok(index) => assert!(seen.insert(index), "index {index} handed out twice"),
                Err(err) => {
                    assert!(matches!(err, Error::CodeGen { .. }));
                    overflowed = true;
                    break;
                }
            }
        }
        assert!(overflowed);
        assert_eq!(cp.len(), u16::MAX);
        // a deduplicated hit still resolves after the pool is full
        assert_eq!(cp.utf8("s1").unwrap(), 2);
    }

    #[test]
    fn test_clones_compare_equal() {
        let mut cp = ConstantPool::new();
        cp.method_ref("Foo", "bar", "()V").unwrap();
        cp.double(1.5).unwrap();
        assert_eq!(cp.clone(), cp);
    }
}
