//! Weaver class, method and instruction model
//!
//! This crate provides the in-memory representation the Weaver engine splices
//! instruction sequences into: descriptor grammar, symbolic instruction lists,
//! class structures, and a binary container codec.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod class;
pub mod descriptor;
pub mod encoder;
pub mod insn;

pub use class::{ClassNode, FieldNode};
pub use descriptor::{ClassName, DescriptorError, MethodDescriptor, MethodSig, TypeDesc};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use insn::{Insn, InvokeKind, Label, MethodBody, SlotKind};
