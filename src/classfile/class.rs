//! The in-memory class model that the instrumentation passes rewrite.

use super::bootstrap::BootstrapMethod;
use super::constpool::ConstantPool;
use super::defs::{major_versions, access_flags::*};
use super::field::FieldInfo;
use super::method::MethodInfo;

/// A JVM class file, held structurally: members carry resolved names, method
/// bodies are structured instruction lists, and the constant pool holds the
/// entries referenced by those bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub access_flags: u16,
    /// Internal name, e.g. `com/acme/Token`.
    pub name: String,
    /// Internal name of the superclass; `None` only for `java/lang/Object`.
    pub superclass: Option<String>,
    pub interfaces: Vec<String>,
    pub pool: ConstantPool,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub bootstrap_methods: Vec<BootstrapMethod>,
    pub source_file: Option<String>,
    /// Generic signature attribute of the class itself. Dropped by the
    /// assembler.
    pub generic_signature: Option<String>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>, superclass: impl Into<String>) -> Self {
        Self {
            minor_version: 0,
            major_version: major_versions::JAVA_11,
            access_flags: ACC_PUBLIC | ACC_SUPER,
            name: name.into(),
            superclass: Some(superclass.into()),
            interfaces: Vec::new(),
            pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            bootstrap_methods: Vec::new(),
            source_file: None,
            generic_signature: None,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_mut(&mut self, name: &str) -> Option<&mut FieldInfo> {
        self.fields.iter_mut().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor.descriptor() == descriptor)
    }

    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.method(name, descriptor).is_some()
    }
}
