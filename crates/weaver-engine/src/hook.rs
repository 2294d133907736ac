//! Hook splicer
//!
//! Extracts a packaged hook's executable body (its `invoke` method, skipping
//! compiler-synthesized bridge variants) and hoists it into a synthetic
//! container class as a plain static method. The hoisted calling convention
//! passes the receiver and context explicitly, so every local slot shifts
//! down by one: the packaged `invoke` held its closure object in slot 0,
//! which disappears once the body is static.
//!
//! One container is created per target class per transformation pass and
//! shared by every hook applied to that class, so the target itself is never
//! polluted with bridge methods.

use crate::error::InjectError;
use crate::marshal::HookCall;
use weaver_bytecode::class::flags;
use weaver_bytecode::{ClassName, ClassNode, Insn, MethodBody, MethodDescriptor};

/// Namespace prefix of synthetic hook containers; the driver never
/// retransforms classes under it
pub const HOOK_NAMESPACE: &str = "weaver$";

/// Find the packaged hook's single non-bridge entry point.
pub fn extract_invoke<'a>(
    packaged: &'a ClassNode,
    target: &MethodDescriptor,
) -> Result<&'a MethodBody, InjectError> {
    packaged
        .methods
        .iter()
        .find(|m| {
            m.name == "invoke" && m.access & (flags::ACC_BRIDGE | flags::ACC_SYNTHETIC) == 0
        })
        .ok_or_else(|| InjectError::CallbackBodyNotFound(target.clone()))
}

/// Synthetic class accumulating hoisted hook methods for one target class
#[derive(Debug)]
pub struct HookContainer {
    node: ClassNode,
    next_method: usize,
}

impl HookContainer {
    /// Create the container for `target`; `index` is the process-wide
    /// container counter, keeping names unique across passes.
    pub fn new(target: &ClassName, index: usize) -> Self {
        let name = ClassName::new(format!("{}/{}_Hook_{}", HOOK_NAMESPACE, target, index));
        let mut node = ClassNode::new(name);
        node.access |= flags::ACC_SYNTHETIC;
        Self {
            node,
            next_method: 0,
        }
    }

    /// The container's class name.
    pub fn name(&self) -> &ClassName {
        &self.node.name
    }

    /// Whether any hook body was hoisted into this container.
    pub fn is_used(&self) -> bool {
        !self.node.methods.is_empty()
    }

    /// The finished container class.
    pub fn into_node(self) -> ClassNode {
        self.node
    }

    /// Copy `invoke_body` into a fresh `public static` method, rewriting
    /// local slots for the hoisted calling convention.
    pub fn hoist(&mut self, invoke_body: &MethodBody) -> HookCall {
        let method_name = format!("hook$method{}", self.next_method);
        self.next_method += 1;

        let mut hoisted = MethodBody::new(
            flags::ACC_PUBLIC | flags::ACC_STATIC | flags::ACC_SYNTHETIC,
            method_name.clone(),
            invoke_body.sig.clone(),
        );
        hoisted.max_locals = invoke_body.max_locals.saturating_sub(1);
        hoisted.insns = invoke_body
            .insns
            .iter()
            .map(|insn| match insn {
                Insn::Load { kind, slot } => Insn::Load {
                    kind: *kind,
                    slot: slot.saturating_sub(1),
                },
                Insn::Store { kind, slot } => Insn::Store {
                    kind: *kind,
                    slot: slot.saturating_sub(1),
                },
                other => other.clone(),
            })
            .collect();
        hoisted.max_locals = hoisted.max_locals.max(hoisted.sig.param_slots());

        // Two parameters mean (receiver, context); one means (context).
        let takes_receiver = invoke_body.sig.params.len() == 2;

        self.node.methods.push(hoisted);
        HookCall {
            container: self.node.name.clone(),
            method: method_name,
            sig: invoke_body.sig.clone(),
            takes_receiver,
        }
    }
}
