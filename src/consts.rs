//! Names of the runtime-support contract and of the synthesized class members.
//!
//! All synthesized member names start with `§`, which cannot appear in
//! identifiers of source programs, hence they never collide with user code.

use once_cell::sync::Lazy;
use std::collections::HashSet;

/// The runtime support class that receives gas charges, lazy-field fetches
/// and white-listing predicate checks.
pub const RUNTIME_CLASS: &str = "terminos/rt/Runtime";

/// The opaque handle identifying a persisted object.
pub const STORAGE_REFERENCE_CLASS: &str = "terminos/rt/StorageReference";

/// The trailing marker parameter of the reconstruction constructor. Its only
/// purpose is to keep the constructor's descriptor disjoint from anything the
/// programmer could have written.
pub const DUMMY_CLASS: &str = "terminos/rt/Dummy";

/// Name of the runtime method charging CPU gas.
pub const CHARGE_CPU: &str = "charge";

/// Name of the runtime method charging RAM gas.
pub const CHARGE_RAM: &str = "chargeRam";

/// Name of the runtime method fetching the latest persisted value of a
/// mutable lazy field.
pub const LATEST_LAZY_UPDATE: &str = "latestLazyUpdate";

/// Name of the runtime method fetching the persisted value of a lazy field
/// declared final. Distinct from [`LATEST_LAZY_UPDATE`] since immutable fields
/// can be resolved from older state.
pub const LATEST_LAZY_UPDATE_OF_FINAL: &str = "latestLazyUpdateOfFinal";

/// Name of the runtime method validating a white-listing proof obligation.
pub const CHECK_WHITE_LISTING_PREDICATE: &str = "checkWhiteListingPredicate";

/// Costs up to this value are charged through pre-baked `charge<N>()` runtime
/// entry points, which keeps the instrumented code smaller.
pub const MAX_COMPACT_CHARGE: u64 = 20;

/// Prefix of the shadow fields holding the last-persisted value.
pub const OLD_PREFIX: &str = "§old_";

/// Prefix of the flags recording that a lazy field has been loaded.
pub const LOADED_PREFIX: &str = "§loaded_";

/// Prefix of the on-demand loaders of lazy fields.
pub const ENSURE_LOADED_PREFIX: &str = "§ensureLoaded_";

/// Prefix of the getters of lazy fields.
pub const GETTER_PREFIX: &str = "§get_";

/// Prefix of the setters of mutable lazy fields.
pub const SETTER_PREFIX: &str = "§set_";

/// Prefix of the synthesized closure targets.
pub const LAMBDA_PREFIX: &str = "§lambda";

/// Prefix of the synthesized array allocators.
pub const ALLOCATOR_PREFIX: &str = "§alloc";

/// Prefix of the synthesized white-listing check forwarders.
pub const VERIFIER_PREFIX: &str = "§check";

/// Field of the root storage class holding the opaque handle of the
/// persisted object.
pub const HANDLE_FIELD: &str = "§handle";

/// Field of the root storage class recording whether the object is resident
/// in the store.
pub const IN_STORE_FIELD: &str = "§inStore";

/// Reference types whose underlying representation is self-contained, hence
/// loaded eagerly with their owning storage object.
pub static EAGER_VALUE_TYPES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "java/lang/String",
        "java/math/BigInteger",
        "java/lang/Boolean",
        "java/lang/Byte",
        "java/lang/Character",
        "java/lang/Short",
        "java/lang/Integer",
        "java/lang/Long",
        "java/lang/Float",
        "java/lang/Double",
    ]
    .into_iter()
    .collect()
});

/// Getter name for a lazy field. The declaring class name is part of the name,
/// in order to disambiguate fields with the same name in sub and superclass.
pub fn getter_name_for(class_name: &str, field_name: &str) -> String {
    format!("{}{}_{}", GETTER_PREFIX, class_name.replace('/', "_"), field_name)
}

/// Setter name for a lazy field. The declaring class name is part of the name,
/// in order to disambiguate fields with the same name in sub and superclass.
pub fn setter_name_for(class_name: &str, field_name: &str) -> String {
    format!("{}{}_{}", SETTER_PREFIX, class_name.replace('/', "_"), field_name)
}
