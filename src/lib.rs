//! Terminos contract instrumentation (tolin)
//!
//! Rewrites compiled, verified Terminos contract classes into the form the
//! node executes: deterministic, gas-metered and persistent.
//!
//! ## Architecture
//!
//! The pipeline runs one class at a time over a structural classfile model:
//!
//! - **classfile**: in-memory class model (constant pool, members, labeled
//!   instruction lists) and the deterministic writer
//! - **verification**: the read-only per-class findings consumed from the
//!   verifier (storage hierarchy, bootstrap tags, proof obligations)
//! - **instrument**: the rewriting passes (field partitioning, white-listing
//!   checks, closure desugaring, lazy-access rewriting, gas metering,
//!   persistence synthesis, final assembly)
//! - **config**: the gas cost model
//! - **jar**: the deterministic stored-zip output archive
//!
//! ## Instrumentation Flow
//!
//! ```text
//! VerifiedClass → whitelist checks → closure desugaring → lazy accessors
//!              → gas charges → persistence synthesis → InstrumentedClass
//!              → InstrumentedJar (stored zip, zeroed timestamps)
//! ```

pub mod classfile;
pub mod config;
pub mod consts;
pub mod error;
pub mod instrument;
pub mod jar;
pub mod verification;

pub use config::GasCostModel;
pub use error::{Error, Result};
pub use instrument::{instrument_all, instrument_class, InstrumentedClass};
pub use jar::InstrumentedJar;
pub use verification::{ClassTags, VerifiedClass};
