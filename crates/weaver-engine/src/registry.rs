//! Hook registry
//!
//! Process-wide, thread-safe collection of pending hook registrations. Class
//! loads can arrive from several threads at once, so registration, lookup and
//! consumption all go through one lock; sequence numbers come from an atomic
//! counter and fix the application order when several hooks target the same
//! method and position.

use crate::error::InjectError;
use crate::position::InjectPosition;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use weaver_bytecode::{ClassName, ClassNode, MethodDescriptor};

/// The packaged callback: a class whose non-bridge `invoke` method carries
/// the hook's instruction body
///
/// The `invoke` descriptor fixes the calling convention: two parameters mean
/// `(receiver, context)`, one means `(context)` for hooks on static targets
/// or hooks that never touch the instance.
#[derive(Debug, Clone)]
pub struct HookBody {
    /// The packaged representation the splicer extracts the body from
    pub class: ClassNode,
}

impl HookBody {
    /// Wrap a packaged callback class.
    pub fn new(class: ClassNode) -> Self {
        Self { class }
    }
}

/// One pending registration
#[derive(Debug)]
pub struct MethodHook {
    /// The method to instrument
    pub target: MethodDescriptor,
    /// Where to splice
    pub position: InjectPosition,
    /// The callback logic
    pub body: HookBody,
    /// Registration order; strictly increasing process-wide
    pub sequence: u64,
}

/// Handle to a registration, usable to consume it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(u64);

/// Process-wide set of pending hooks
#[derive(Debug, Default)]
pub struct Registry {
    hooks: Mutex<Vec<Arc<MethodHook>>>,
    next_sequence: AtomicU64,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; returns a handle for later consumption.
    ///
    /// The descriptor and position are taken as already-parsed values, so a
    /// malformed signature never reaches the registry.
    pub fn register(
        &self,
        target: MethodDescriptor,
        position: InjectPosition,
        body: HookBody,
    ) -> HookHandle {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.hooks.lock().push(Arc::new(MethodHook {
            target,
            position,
            body,
            sequence,
        }));
        HookHandle(sequence)
    }

    /// Register a hook from free-form strings.
    ///
    /// The owner accepts `a.b.C` or `a/b/C`; a malformed signature is
    /// rejected here, before anything reaches the registry.
    pub fn register_str(
        &self,
        owner: &str,
        method: &str,
        descriptor: &str,
        position: InjectPosition,
        body: HookBody,
    ) -> Result<HookHandle, InjectError> {
        let target = MethodDescriptor::parse(owner, method, descriptor)?;
        Ok(self.register(target, position, body))
    }

    /// Pending hooks for one method, in ascending sequence order.
    pub fn pending_for(&self, target: &MethodDescriptor) -> Vec<Arc<MethodHook>> {
        let mut matched: Vec<_> = self
            .hooks
            .lock()
            .iter()
            .filter(|h| &h.target == target)
            .cloned()
            .collect();
        matched.sort_by_key(|h| h.sequence);
        matched
    }

    /// Pending hooks whose target owner is `class`, in ascending sequence
    /// order. This is the driver's per-class view.
    pub fn pending_for_class(&self, class: &ClassName) -> Vec<Arc<MethodHook>> {
        let mut matched: Vec<_> = self
            .hooks
            .lock()
            .iter()
            .filter(|h| &h.target.owner == class)
            .cloned()
            .collect();
        matched.sort_by_key(|h| h.sequence);
        matched
    }

    /// Remove a registration. Removing an already-consumed handle is a no-op.
    pub fn consume(&self, handle: HookHandle) {
        self.hooks.lock().retain(|h| h.sequence != handle.0);
    }

    /// Handle for an existing hook (used by the driver after application).
    pub fn handle_of(hook: &MethodHook) -> HookHandle {
        HookHandle(hook.sequence)
    }
}
