//! Field declarations.

use super::defs::access_flags::*;
use super::descriptor::JvmType;

/// One field of a class. Name and type are carried resolved; they are
/// interned into the constant pool only when the class is serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name: String,
    pub ty: JvmType,
    /// Generic signature attribute, if any. Dropped by the assembler.
    pub generic_signature: Option<String>,
}

impl FieldInfo {
    pub fn new(access_flags: u16, name: impl Into<String>, ty: JvmType) -> Self {
        Self { access_flags, name: name.into(), ty, generic_signature: None }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_final(&self) -> bool {
        self.access_flags & ACC_FINAL != 0
    }

    pub fn is_transient(&self) -> bool {
        self.access_flags & ACC_TRANSIENT != 0
    }

    /// Clears the final flag, so that a loader method may write the field
    /// after construction.
    pub fn make_mutable(&mut self) {
        self.access_flags &= !ACC_FINAL;
    }

    pub fn descriptor(&self) -> String {
        self.ty.descriptor()
    }
}
