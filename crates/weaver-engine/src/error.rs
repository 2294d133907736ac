//! Engine error taxonomy
//!
//! Resolution-level failures ([`InjectError`]) are per-registration and
//! non-fatal: the driver reports them and skips that one hook. Failures of the
//! incoming class bytes ([`TransformError`]) abort the class's transformation;
//! the host keeps its original bytes.

use thiserror::Error;
use weaver_bytecode::{ClassName, DecodeError, DescriptorError, MethodDescriptor, MethodSig};

/// Per-registration failures raised while resolving or applying a hook
#[derive(Debug, Error)]
pub enum InjectError {
    /// The signature string did not parse; rejected at registration time
    #[error("Malformed signature: {0}")]
    MalformedSignature(#[from] DescriptorError),

    /// The target method does not exist on the loaded class
    #[error("Method not found: {0}")]
    MethodNotFound(MethodDescriptor),

    /// No call instruction in the target method matches the requested triple
    #[error("Call site not found: {owner}.{name}{sig} in {target}")]
    CallSiteNotFound {
        /// Target method being instrumented
        target: MethodDescriptor,
        /// Requested callee owner
        owner: ClassName,
        /// Requested callee name
        name: String,
        /// Requested callee signature
        sig: MethodSig,
    },

    /// The target method body contains no return instruction
    #[error("No return site in {0}")]
    NoReturnSite(MethodDescriptor),

    /// The packaged hook has no recognizable non-bridge entry point
    #[error("Callback body not found for hook targeting {0}")]
    CallbackBodyNotFound(MethodDescriptor),
}

/// Failures of a whole class-transformation pass
#[derive(Debug, Error)]
pub enum TransformError {
    /// The class-format collaborator rejected the incoming bytes
    #[error("Failed to read class {name}: {source}")]
    Read {
        /// Qualified class name as given by the host
        name: String,
        /// Underlying decode failure
        #[source]
        source: DecodeError,
    },
}
