//! Symbolic instruction model
//!
//! Method bodies are held as ordered, mutable lists of symbolic instructions:
//! owners, names and signatures are resolved strings rather than constant-pool
//! indices, so splicing new sequences into a body never invalidates the rest
//! of the list. Control flow uses [`Label`] marks referenced by jumps.

use crate::descriptor::{ClassName, MethodSig, TypeDesc};
use crate::class::flags;

/// Category of a local-variable slot access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// 32-bit integer family (also boolean, byte, short, char)
    Int,
    /// 64-bit integer (two slots)
    Long,
    /// 32-bit float
    Float,
    /// 64-bit float (two slots)
    Double,
    /// Reference or array
    Ref,
}

impl SlotKind {
    /// Slot kind used to load or store a value of the given type.
    ///
    /// `Void` has no slot kind and returns `None`.
    pub fn for_type(ty: &TypeDesc) -> Option<SlotKind> {
        match ty {
            TypeDesc::Void => None,
            TypeDesc::Long => Some(SlotKind::Long),
            TypeDesc::Float => Some(SlotKind::Float),
            TypeDesc::Double => Some(SlotKind::Double),
            TypeDesc::Object(_) | TypeDesc::Array(_) => Some(SlotKind::Ref),
            _ => Some(SlotKind::Int),
        }
    }
}

/// Dispatch kind of a call instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// Virtual dispatch through an instance
    Virtual,
    /// Direct dispatch (constructors, private methods)
    Special,
    /// Static dispatch, no receiver
    Static,
    /// Interface dispatch
    Interface,
}

/// A branch target within one method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(
    /// Identifier, unique within the enclosing body
    pub u32,
);

/// One instruction in a method body
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// No operation
    Nop,
    /// Duplicate the top stack value
    Dup,
    /// Discard the top stack value
    Pop,
    /// Swap the top two stack values
    Swap,

    /// Push a 32-bit integer constant
    PushInt(i32),
    /// Push a 64-bit integer constant
    PushLong(i64),
    /// Push a 32-bit float constant
    PushFloat(f32),
    /// Push a 64-bit float constant
    PushDouble(f64),
    /// Push a string constant
    PushStr(String),
    /// Push the null reference
    PushNull,

    /// Load a local variable onto the stack
    Load {
        /// Value category
        kind: SlotKind,
        /// Local-variable slot index
        slot: u16,
    },
    /// Store the top of the stack into a local variable
    Store {
        /// Value category
        kind: SlotKind,
        /// Local-variable slot index
        slot: u16,
    },

    /// Allocate an uninitialized instance of a class
    New {
        /// Class to instantiate
        class: ClassName,
    },
    /// Checked reference cast
    CheckCast {
        /// Target type (object or array)
        ty: TypeDesc,
    },
    /// Read an instance field (receiver on stack)
    GetField {
        /// Declaring class
        owner: ClassName,
        /// Field name
        name: String,
        /// Field type
        ty: TypeDesc,
    },
    /// Write an instance field (receiver and value on stack)
    PutField {
        /// Declaring class
        owner: ClassName,
        /// Field name
        name: String,
        /// Field type
        ty: TypeDesc,
    },
    /// Read a static field
    GetStatic {
        /// Declaring class
        owner: ClassName,
        /// Field name
        name: String,
        /// Field type
        ty: TypeDesc,
    },
    /// Write a static field
    PutStatic {
        /// Declaring class
        owner: ClassName,
        /// Field name
        name: String,
        /// Field type
        ty: TypeDesc,
    },

    /// Call a method
    Invoke {
        /// Dispatch kind
        kind: InvokeKind,
        /// Declaring class of the callee
        owner: ClassName,
        /// Callee name
        name: String,
        /// Callee signature
        sig: MethodSig,
    },

    /// Unconditional jump
    Jump {
        /// Branch target
        target: Label,
    },
    /// Pop an int and jump if it is zero
    JumpIfZero {
        /// Branch target
        target: Label,
    },
    /// Position marker referenced by jumps
    Mark(Label),

    /// Return from the method; `None` returns no value
    Return(Option<SlotKind>),
}

impl Insn {
    /// Whether this instruction leaves the method.
    pub fn is_return(&self) -> bool {
        matches!(self, Insn::Return(_))
    }
}

/// One method body: access flags, shape, and its instruction list
#[derive(Debug, Clone, PartialEq)]
pub struct MethodBody {
    /// Access flags (see [`crate::class::flags`])
    pub access: u16,
    /// Method name
    pub name: String,
    /// Parameter/return shape
    pub sig: MethodSig,
    /// Size of the local-variable space in slots
    pub max_locals: u16,
    /// Ordered instruction list
    pub insns: Vec<Insn>,
}

impl MethodBody {
    /// Create a body sized to hold the receiver (if any) plus parameters.
    pub fn new(access: u16, name: impl Into<String>, sig: MethodSig) -> Self {
        let receiver = if access & flags::ACC_STATIC != 0 { 0 } else { 1 };
        let max_locals = receiver + sig.param_slots();
        Self {
            access,
            name: name.into(),
            sig,
            max_locals,
            insns: Vec::new(),
        }
    }

    /// Whether the method has no receiver slot.
    pub fn is_static(&self) -> bool {
        self.access & flags::ACC_STATIC != 0
    }

    /// A label not used anywhere in the current instruction list.
    pub fn fresh_label(&self) -> Label {
        let mut next = 0;
        for insn in &self.insns {
            let id = match insn {
                Insn::Jump { target } | Insn::JumpIfZero { target } => target.0,
                Insn::Mark(label) => label.0,
                _ => continue,
            };
            next = next.max(id + 1);
        }
        Label(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MethodSig;

    #[test]
    fn test_slot_kind_for_type() {
        assert_eq!(SlotKind::for_type(&TypeDesc::Boolean), Some(SlotKind::Int));
        assert_eq!(SlotKind::for_type(&TypeDesc::Long), Some(SlotKind::Long));
        assert_eq!(
            SlotKind::for_type(&TypeDesc::Object("java/lang/String".into())),
            Some(SlotKind::Ref)
        );
        assert_eq!(SlotKind::for_type(&TypeDesc::Void), None);
    }

    #[test]
    fn test_new_body_sizes_locals() {
        let sig = MethodSig::parse("(IJ)V").unwrap();
        let instance = MethodBody::new(flags::ACC_PUBLIC, "m", sig.clone());
        assert_eq!(instance.max_locals, 4); // this + int + long(2)

        let stat = MethodBody::new(flags::ACC_PUBLIC | flags::ACC_STATIC, "m", sig);
        assert_eq!(stat.max_locals, 3);
        assert!(stat.is_static());
    }

    #[test]
    fn test_fresh_label_skips_existing() {
        let mut body = MethodBody::new(flags::ACC_PUBLIC, "m", MethodSig::parse("()V").unwrap());
        assert_eq!(body.fresh_label(), Label(0));
        body.insns.push(Insn::Mark(Label(3)));
        body.insns.push(Insn::JumpIfZero { target: Label(7) });
        assert_eq!(body.fresh_label(), Label(8));
    }
}
