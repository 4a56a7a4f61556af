//! In-memory model of JVM class files.
//!
//! Classes are held structurally: the constant pool as a deduplicating arena,
//! members with resolved names and typed descriptors, and method bodies as
//! label-carrying instruction lists that the rewriting passes can splice
//! without breaking branch targets. [`writer`] turns the model back into
//! deterministic classfile bytes, recomputing stack maps on the way.

pub mod bootstrap;
pub mod class;
pub mod code;
pub mod constpool;
pub mod defs;
pub mod descriptor;
pub mod field;
pub mod frame;
pub mod method;
pub mod opcodes;
pub mod writer;

pub use bootstrap::{BootstrapMethod, METAFACTORY_TARGET_ARG};
pub use class::ClassFile;
pub use code::{ArithOp, CmpKind, Code, ExceptionHandler, GasCategory, IfCond, Insn, InvokeKind, Label, SlotType};
pub use constpool::{Constant, ConstantPool};
pub use descriptor::{JvmType, MethodType};
pub use field::FieldInfo;
pub use method::MethodInfo;
pub use writer::class_file_to_bytes;
