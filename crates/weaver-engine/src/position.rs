//! Injection positions

use weaver_bytecode::{ClassName, MethodSig};

/// Whether an [`InjectPosition::Invoke`] splice lands before the call or
/// after its result has been produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokePhase {
    /// Immediately before the call instruction
    Before,
    /// Immediately after the call instruction
    After,
}

/// Where inside a method body a hook is spliced
#[derive(Debug, Clone, PartialEq)]
pub enum InjectPosition {
    /// At method entry, before any original instruction
    BeforeAll,
    /// Immediately before every return instruction
    BeforeReturn,
    /// Around the first call instruction matching the triple
    Invoke {
        /// Callee owner
        owner: ClassName,
        /// Callee name
        name: String,
        /// Callee signature
        sig: MethodSig,
        /// Before or after the call
        phase: InvokePhase,
    },
}

impl InjectPosition {
    /// Splice at method entry.
    pub fn before_all() -> Self {
        InjectPosition::BeforeAll
    }

    /// Splice before every return instruction.
    pub fn before_return() -> Self {
        InjectPosition::BeforeReturn
    }

    /// Splice around the first call matching `owner`, `name` and `sig`.
    pub fn around_call(
        owner: impl Into<ClassName>,
        name: impl Into<String>,
        sig: MethodSig,
        phase: InvokePhase,
    ) -> Self {
        InjectPosition::Invoke {
            owner: owner.into(),
            name: name.into(),
            sig,
            phase,
        }
    }
}

impl std::fmt::Display for InjectPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectPosition::BeforeAll => f.write_str("before-all"),
            InjectPosition::BeforeReturn => f.write_str("before-return"),
            InjectPosition::Invoke {
                owner,
                name,
                sig,
                phase,
            } => write!(
                f,
                "{}-invoke {}.{}{}",
                match phase {
                    InvokePhase::Before => "before",
                    InvokePhase::After => "after",
                },
                owner,
                name,
                sig
            ),
        }
    }
}
