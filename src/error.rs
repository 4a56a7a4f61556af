use thiserror::Error;

/// Result type for tolin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the instrumentation pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("illegal module: {message}")]
    IllegalModule { message: String },

    #[error("verification failed: {message}")]
    VerificationFailed { message: String },

    #[error("unknown type: {name}")]
    UnknownType { name: String },

    #[error("code generation error: {message}")]
    CodeGen { message: String },

    #[error("configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Create an illegal-module error. The input class or one of its call-site
    /// descriptors is structurally malformed; instrumentation of the class stops.
    pub fn illegal_module(message: impl Into<String>) -> Self {
        Self::IllegalModule { message: message.into() }
    }

    /// Create a verification-failure error, surfacing the first failure
    /// reported by the verifier.
    pub fn verification_failed(message: impl Into<String>) -> Self {
        Self::VerificationFailed { message: message.into() }
    }

    /// Create an unknown-type error
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Create a code generation error
    pub fn codegen_error(message: impl Into<String>) -> Self {
        Self::CodeGen { message: message.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config { message: message.into() }
    }
}
