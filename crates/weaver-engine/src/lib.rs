//! Weaver instrumentation engine
//!
//! Splices user-supplied callback logic into specific points of
//! already-compiled method bodies at load time: at method entry, before every
//! return, or around a designated call instruction. Hooks observe a snapshot
//! of the target's arguments and fields and may cancel the remaining body,
//! optionally overriding the return value.
//!
//! The engine operates on the instruction-list model from `weaver-bytecode`;
//! the host supplies the class bytes (and receives them back) through the
//! [`driver::ClassFormat`] and [`driver::ClassDefiner`] seams.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod driver;
pub mod error;
pub mod hook;
pub mod marshal;
pub mod position;
pub mod registry;
pub mod resolver;

pub use driver::{ClassDefiner, ClassFormat, DriverConfig, EncodeError, StockFormat, TransformDriver};
pub use error::{InjectError, TransformError};
pub use position::{InjectPosition, InvokePhase};
pub use registry::{HookBody, HookHandle, MethodHook, Registry};
pub use resolver::{resolve, Resolution};
