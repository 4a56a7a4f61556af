//! The surface consumed from the verifier.
//!
//! Verification itself happens upstream; this module defines the data it
//! hands over per class: semantic classifications, ordered field lists of the
//! storage superclass chain, bootstrap classifications and the white-listing
//! proof obligations of invoked methods. Everything here is plain data, so
//! callers and tests construct it directly.

use crate::classfile::ClassFile;
use std::collections::{HashMap, HashSet};

/// One declared instance field, as reported by the verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    /// Field descriptor, e.g. `I` or `Ljava/lang/String;`.
    pub descriptor: String,
    pub flags: u16,
}

/// The declared instance fields of one class of the storage superclass chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFields {
    /// Internal name of the declaring class.
    pub class_name: String,
    pub fields: Vec<FieldDecl>,
}

/// Classification of a bootstrap method with respect to caller-context
/// threading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapTag {
    /// The closure never reaches a context-requiring method.
    Neither,
    /// The closure target is a plain static method that transitively calls a
    /// context-requiring method.
    LeadsToContextRequiring,
    /// The closure target is itself a context-requiring method or constructor.
    IsContextRequiring,
}

/// One white-listing proof obligation attached to a value flowing into an
/// invoked method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueObligation {
    /// Position of the obligated value among the stacked arguments of the
    /// call: the receiver of an instance call is position 0, the first
    /// declared argument follows.
    pub position: usize,
    /// Internal name of the predicate class the runtime evaluates.
    pub predicate: String,
    /// Human-readable text reported when the predicate rejects the value.
    pub description: String,
}

/// All proof obligations of one invoked method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodObligations {
    pub values: Vec<ValueObligation>,
}

/// The canonical key under which obligations and check forwarders are
/// looked up for an invoked method.
pub fn invoke_key(class: &str, name: &str, descriptor: &str) -> String {
    format!("{class}.{name}{descriptor}")
}

/// The canonical key of an `invokedynamic` call site. The bootstrap table
/// index is part of the key: two sites agree only if they share the same
/// bootstrap entry and dynamic signature.
pub fn dynamic_invoke_key(bootstrap_index: u16, name: &str, descriptor: &str) -> String {
    format!("dynamic#{bootstrap_index}.{name}{descriptor}")
}

/// Everything the verifier derived about one class.
#[derive(Debug, Clone, Default)]
pub struct ClassTags {
    /// True if the class extends the storage root, hence persists.
    pub is_storage: bool,
    /// True if the class is a contract, hence receives callers and funds.
    pub is_contract: bool,
    /// Verification failures; non-empty means the class must not be
    /// instrumented and the first entry is surfaced.
    pub errors: Vec<String>,
    /// The storage superclass chain: root storage class first, the class
    /// itself last, each with its declared instance fields. Empty for
    /// non-storage classes.
    pub hierarchy: Vec<ClassFields>,
    /// The declared instance fields of every storage class of the program,
    /// keyed by internal name. Drives the rewriting of lazy field accesses
    /// into accessor calls: the declared flags tell which fields of a foreign
    /// storage class actually carry accessors (transient fields never do,
    /// final fields have no setter).
    pub storage_classes: HashMap<String, Vec<FieldDecl>>,
    /// Declared instance field counts per class, for the RAM cost of `new`.
    pub instance_fields_of: HashMap<String, u32>,
    /// One tag per entry of the class's bootstrap method table.
    pub bootstraps: Vec<BootstrapTag>,
    /// Proof obligations of invoked methods, keyed by [`invoke_key`].
    pub proof_obligations: HashMap<String, MethodObligations>,
    /// Canonical keys of fields carrying obligations. The classifier never
    /// produces these for well-formed programs; any occurrence is an error.
    pub field_obligations: HashSet<String>,
}

/// A class that passed verification, paired with the verifier's findings.
#[derive(Debug, Clone)]
pub struct VerifiedClass {
    pub class: ClassFile,
    pub tags: ClassTags,
}

impl VerifiedClass {
    pub fn new(class: ClassFile, tags: ClassTags) -> Self {
        Self { class, tags }
    }

    pub fn name(&self) -> &str {
        &self.class.name
    }
}
