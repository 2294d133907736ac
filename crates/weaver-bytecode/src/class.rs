//! In-memory class structure

use crate::descriptor::{ClassName, MethodSig, TypeDesc};
use crate::insn::MethodBody;

/// Access and property flags
pub mod flags {
    /// Declared public
    pub const ACC_PUBLIC: u16 = 0x0001;
    /// Declared static
    pub const ACC_STATIC: u16 = 0x0008;
    /// Declared final
    pub const ACC_FINAL: u16 = 0x0010;
    /// Compiler-generated bridge method
    pub const ACC_BRIDGE: u16 = 0x0040;
    /// Not present in source
    pub const ACC_SYNTHETIC: u16 = 0x1000;
}

/// One declared field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldNode {
    /// Access flags
    pub access: u16,
    /// Field name
    pub name: String,
    /// Field type
    pub ty: TypeDesc,
}

impl FieldNode {
    /// Whether the field is read without an instance.
    pub fn is_static(&self) -> bool {
        self.access & flags::ACC_STATIC != 0
    }
}

/// A parsed class: the unit the transformation driver operates on
#[derive(Debug, Clone, PartialEq)]
pub struct ClassNode {
    /// Access flags
    pub access: u16,
    /// This class's internal name
    pub name: ClassName,
    /// Superclass internal name
    pub super_name: ClassName,
    /// Declared fields
    pub fields: Vec<FieldNode>,
    /// Declared methods
    pub methods: Vec<MethodBody>,
}

impl ClassNode {
    /// Create an empty public class extending `java/lang/Object`.
    pub fn new(name: ClassName) -> Self {
        Self {
            access: flags::ACC_PUBLIC,
            name,
            super_name: ClassName::new("java/lang/Object"),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Find a method by name and signature.
    pub fn method(&self, name: &str, sig: &MethodSig) -> Option<&MethodBody> {
        self.methods.iter().find(|m| m.name == name && &m.sig == sig)
    }

    /// Find a method by name and signature, mutably.
    pub fn method_mut(&mut self, name: &str, sig: &MethodSig) -> Option<&mut MethodBody> {
        self.methods
            .iter_mut()
            .find(|m| m.name == name && &m.sig == sig)
    }
}
