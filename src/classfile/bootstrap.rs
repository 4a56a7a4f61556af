//! Bootstrap method descriptors, the per-class table that `invokedynamic`
//! call sites point into.

/// One entry of the `BootstrapMethods` attribute. Under the standard
/// metafactory shape, `args[1]` is the MethodHandle naming the method that
/// implements the closure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    /// Pool index of the MethodHandle of the bootstrap method itself.
    pub method_ref: u16,
    /// Pool indices of the static bootstrap arguments.
    pub args: Vec<u16>,
}

/// Position of the closure target handle in metafactory bootstrap arguments.
pub const METAFACTORY_TARGET_ARG: usize = 1;
