//! Method declarations.

use super::code::Code;
use super::defs::access_flags::*;
use super::descriptor::MethodType;

/// One method of a class. Like fields, name and descriptor are carried
/// resolved and interned at write time. Abstract methods carry no body.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: MethodType,
    pub code: Option<Code>,
    /// Internal names of the declared thrown exception classes.
    pub exceptions: Vec<String>,
    /// Generic signature attribute, if any. Dropped by the assembler.
    pub generic_signature: Option<String>,
}

impl MethodInfo {
    pub fn new(access_flags: u16, name: impl Into<String>, descriptor: MethodType, code: Code) -> Self {
        Self {
            access_flags,
            name: name.into(),
            descriptor,
            code: Some(code),
            exceptions: Vec::new(),
            generic_signature: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags & ACC_ABSTRACT != 0
    }

    /// The number of local variable slots occupied by the arguments,
    /// including the receiver of an instance method.
    pub fn arg_slots(&self) -> u16 {
        let receiver = if self.is_static() { 0 } else { 1 };
        receiver + self.descriptor.arg_slots()
    }
}
