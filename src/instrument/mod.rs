//! The instrumentation pipeline.
//!
//! A verified class passes through six stages: field partitioning, the
//! white-listing check pre-pass, closure desugaring, lazy-access rewriting,
//! gas metering and persistence synthesis; serialization then strips stale
//! metadata and recomputes the structural tables. Each class is rewritten in
//! its own [`Instrumentation`] scope, so classes can be instrumented in
//! parallel against a shared cost model.

pub mod assemble;
pub mod desugar;
pub mod fields;
pub mod metering;
pub mod persistence;

use crate::classfile::{class_file_to_bytes, ClassFile};
use crate::config::GasCostModel;
use crate::error::{Error, Result};
use crate::jar::InstrumentedJar;
use crate::verification::{ClassTags, VerifiedClass};
use fields::FieldPartition;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};

/// The mutable state of one class being instrumented: the class under
/// rewrite, the verifier's read-only findings, the cost model, the field
/// partition and the caches shared by the passes.
pub struct Instrumentation<'a> {
    pub class: ClassFile,
    pub tags: &'a ClassTags,
    pub gas: &'a GasCostModel,
    pub partition: FieldPartition,
    /// Indices into the bootstrap method table whose call sites now receive
    /// extra context arguments. Consumed by the caller-threading collaborator.
    pub bootstraps_with_extra_context: BTreeSet<u16>,
    /// White-listing forwarders already synthesized, keyed by the canonical
    /// invoke key. Reuse is mandatory for relocated `invokedynamic` sites.
    pub check_cache: HashMap<String, String>,
    next_synthetic: u32,
}

impl<'a> Instrumentation<'a> {
    /// Opens an instrumentation scope for a class, partitioning its fields.
    pub fn new(class: ClassFile, tags: &'a ClassTags, gas: &'a GasCostModel) -> Result<Self> {
        let partition = fields::partition(tags)?;
        Ok(Self {
            class,
            tags,
            gas,
            partition,
            bootstraps_with_extra_context: BTreeSet::new(),
            check_cache: HashMap::new(),
            next_synthetic: 0,
        })
    }

    /// A fresh, per-class-unique name for a synthesized member.
    pub fn fresh_synthetic(&mut self, prefix: &str) -> String {
        let n = self.next_synthetic;
        self.next_synthetic += 1;
        format!("{prefix}{n}")
    }
}

/// The result of instrumenting one class.
#[derive(Debug, Clone)]
pub struct InstrumentedClass {
    class: ClassFile,
    bootstraps_with_extra_context: BTreeSet<u16>,
}

impl InstrumentedClass {
    /// Internal name of the instrumented class.
    pub fn name(&self) -> &str {
        &self.class.name
    }

    /// The rewritten class model.
    pub fn class(&self) -> &ClassFile {
        &self.class
    }

    /// Bootstrap table indices whose closures now thread caller context.
    pub fn bootstraps_with_extra_context(&self) -> &BTreeSet<u16> {
        &self.bootstraps_with_extra_context
    }

    /// Serializes the instrumented class to classfile bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        class_file_to_bytes(&self.class)
    }
}

/// Instruments one verified class against the given cost model.
pub fn instrument_class(verified: VerifiedClass, gas: &GasCostModel) -> Result<InstrumentedClass> {
    let VerifiedClass { class, tags } = verified;
    if let Some(first) = tags.errors.first() {
        return Err(Error::verification_failed(format!("{}: {first}", class.name)));
    }

    let mut scope = Instrumentation::new(class, &tags, gas)?;

    metering::add_whitelist_checks(&mut scope)?;
    debug!("{}: white-listing checks in place", scope.class.name);
    desugar::desugar_bootstraps(&mut scope)?;
    persistence::rewrite_lazy_accesses(&mut scope)?;
    metering::add_gas_charges(&mut scope)?;
    debug!("{}: gas charges injected", scope.class.name);
    persistence::synthesize(&mut scope)?;
    assemble::strip_stale_metadata(&mut scope.class);

    info!("instrumented {}", scope.class.name);
    Ok(InstrumentedClass {
        class: scope.class,
        bootstraps_with_extra_context: scope.bootstraps_with_extra_context,
    })
}

/// Instruments a whole set of verified classes, stopping at the first
/// failing one, and collects the results into an archive.
pub fn instrument_all(classes: Vec<VerifiedClass>, gas: &GasCostModel) -> Result<InstrumentedJar> {
    let mut instrumented = Vec::with_capacity(classes.len());
    for verified in classes {
        instrumented.push(instrument_class(verified, gas)?);
    }
    Ok(InstrumentedJar::new(instrumented))
}
