//! Transformation driver
//!
//! Orchestrates one class-load event: parse the incoming bytes through the
//! class-format collaborator, look up pending hooks, resolve each hook's
//! anchors, splice the marshalling blocks in, hoist hook bodies into the
//! synthetic container, and serialize the result. Per class the outcome is
//! either new bytes or a "no change" signal; a hook is applied whole or
//! skipped whole, and a skipped hook never aborts its siblings.
//!
//! Class loads may arrive concurrently from several threads. The registry and
//! the per-class bytes cache are the only shared state; each class's
//! instruction model stays confined to the thread transforming it.

use crate::error::{InjectError, TransformError};
use crate::hook::{extract_invoke, HookContainer, HOOK_NAMESPACE};
use crate::marshal::{emit_hook_invocation, SCRATCH_SLOTS};
use crate::registry::{HookHandle, MethodHook, Registry};
use crate::resolver::resolve;
use dashmap::DashMap;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};
use weaver_bytecode::{ClassName, ClassNode, DecodeError, Insn, Label, MethodSig};

/// The external binary writer rejected a mutated instruction model
#[derive(Debug, Error)]
#[error("Serialization failure: {0}")]
pub struct EncodeError(
    /// Reason reported by the writer or definer
    pub String,
);

/// The class-format collaborator: parses raw bytes into the instruction-list
/// model and serializes the model back
pub trait ClassFormat: Send + Sync {
    /// Parse container bytes into a class.
    fn read(&self, bytes: &[u8]) -> Result<ClassNode, DecodeError>;
    /// Serialize a class back to container bytes.
    fn write(&self, class: &ClassNode) -> Result<Vec<u8>, EncodeError>;
}

/// The stock [`ClassFormat`]: the `weaver-bytecode` container codec
#[derive(Debug, Default)]
pub struct StockFormat;

impl ClassFormat for StockFormat {
    fn read(&self, bytes: &[u8]) -> Result<ClassNode, DecodeError> {
        ClassNode::decode(bytes)
    }

    fn write(&self, class: &ClassNode) -> Result<Vec<u8>, EncodeError> {
        Ok(class.encode())
    }
}

/// Makes a synthesized container class loadable in the running process.
///
/// Definition is a single atomic operation the driver treats as
/// non-retryable; its mechanism is host-specific.
pub trait ClassDefiner: Send + Sync {
    /// Define `bytes` under `name` in the host runtime.
    fn define(&self, name: &ClassName, bytes: &[u8]) -> Result<(), EncodeError>;
}

/// Driver configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DriverConfig {
    /// When set, every transformed class's post-splice bytes are written
    /// under this directory for offline inspection
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
    /// Whether a registration whose target method is never found stays
    /// pending for a future (re)definition of the same name
    #[serde(default = "default_retain")]
    pub retain_unmatched: bool,
    /// Class-name prefixes never transformed (dot or slash form)
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
}

fn default_retain() -> bool {
    true
}

fn default_exclusions() -> Vec<String> {
    ["java.", "javax.", "jdk.", "sun.", "kotlin."]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dump_dir: None,
            retain_unmatched: default_retain(),
            exclusions: default_exclusions(),
        }
    }
}

/// One planned splice: a block to insert at an anchor of a method
struct Splice {
    anchor: usize,
    sequence: u64,
    block: Vec<Insn>,
}

/// Applies pending hooks to classes as they are (re)loaded
pub struct TransformDriver {
    registry: Arc<Registry>,
    format: Arc<dyn ClassFormat>,
    definer: Arc<dyn ClassDefiner>,
    config: DriverConfig,
    /// Latest emitted bytes per class, seeded with the first-seen bytes.
    /// A retransformation starts from this copy, so splices applied in
    /// earlier passes survive later ones. Never explicitly invalidated.
    cache: DashMap<String, Vec<u8>>,
    container_index: AtomicUsize,
}

impl TransformDriver {
    /// Create a driver over the shared registry and collaborator seams.
    pub fn new(
        registry: Arc<Registry>,
        format: Arc<dyn ClassFormat>,
        definer: Arc<dyn ClassDefiner>,
        config: DriverConfig,
    ) -> Self {
        Self {
            registry,
            format,
            definer,
            config,
            cache: DashMap::new(),
            container_index: AtomicUsize::new(0),
        }
    }

    /// The shared hook registry this driver applies from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn is_excluded(&self, name: &ClassName) -> bool {
        if name.as_str().starts_with(HOOK_NAMESPACE) {
            return true;
        }
        self.config
            .exclusions
            .iter()
            .any(|prefix| name.as_str().starts_with(&prefix.replace('.', "/")))
    }

    /// Transform one class-load event.
    ///
    /// `Ok(None)` means "no transformation needed": the host keeps the
    /// original bytes. Serialization failures also fall back to the original
    /// bytes; nothing is ever partially emitted.
    pub fn transform(
        &self,
        class_name: &str,
        bytes: &[u8],
    ) -> Result<Option<Vec<u8>>, TransformError> {
        let name = ClassName::new(class_name);
        if self.is_excluded(&name) {
            return Ok(None);
        }

        let pending = self.registry.pending_for_class(&name);

        // Transform from the last emitted copy so instrumentation accumulates
        // across passes; the incoming bytes seed the cache on first sight.
        let basis = self
            .cache
            .entry(name.as_str().to_string())
            .or_insert_with(|| bytes.to_vec())
            .value()
            .clone();

        if pending.is_empty() {
            return Ok(None);
        }

        let mut class = self
            .format
            .read(&basis)
            .map_err(|source| TransformError::Read {
                name: class_name.to_string(),
                source,
            })?;

        let mut container = HookContainer::new(
            &name,
            self.container_index.fetch_add(1, Ordering::Relaxed),
        );
        let mut applied: Vec<HookHandle> = Vec::new();

        for (method_name, sig, hooks) in group_by_method(pending) {
            self.apply_to_method(
                &mut class,
                &mut container,
                &method_name,
                &sig,
                &hooks,
                &mut applied,
            );
        }

        if applied.is_empty() {
            return Ok(None);
        }

        let class_bytes = match self.format.write(&class) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(class = %name, %err, "serialization failed, keeping original bytes");
                return Ok(None);
            }
        };

        if container.is_used() {
            let container_name = container.name().clone();
            let container_node = container.into_node();
            let container_bytes = match self.format.write(&container_node) {
                Ok(bytes) => bytes,
                Err(err) => {
                    error!(class = %name, container = %container_name, %err,
                        "container serialization failed, keeping original bytes");
                    return Ok(None);
                }
            };
            if let Err(err) = self.definer.define(&container_name, &container_bytes) {
                error!(class = %name, container = %container_name, %err,
                    "container definition failed, keeping original bytes");
                return Ok(None);
            }
            self.dump(&container_name, &container_bytes);
        }

        for handle in applied {
            self.registry.consume(handle);
        }
        self.cache
            .insert(name.as_str().to_string(), class_bytes.clone());
        self.dump(&name, &class_bytes);
        Ok(Some(class_bytes))
    }

    /// Plan and apply every hook targeting one method. Anchors are resolved
    /// against the pre-splice instruction list; splices go in from the highest
    /// anchor down, same-anchor blocks in descending sequence order, so the
    /// final list executes blocks in ascending sequence and no splice shifts
    /// another hook's anchor.
    fn apply_to_method(
        &self,
        class: &mut ClassNode,
        container: &mut HookContainer,
        method_name: &str,
        sig: &MethodSig,
        hooks: &[Arc<MethodHook>],
        applied: &mut Vec<HookHandle>,
    ) {
        let Some(snapshot) = class.method(method_name, sig).cloned() else {
            for hook in hooks {
                self.report(&InjectError::MethodNotFound(hook.target.clone()));
                if !self.config.retain_unmatched {
                    self.registry.consume(Registry::handle_of(hook));
                }
            }
            return;
        };

        let base_label = snapshot.fresh_label();
        let mut label_offset = 0u32;
        let mut splices: Vec<Splice> = Vec::new();
        let mut planned: Vec<HookHandle> = Vec::new();

        for hook in hooks {
            let invoke = match extract_invoke(&hook.body.class, &hook.target) {
                Ok(body) => body,
                Err(err) => {
                    self.report(&err);
                    continue;
                }
            };
            // A receiver-shaped hook cannot be fed from a static target.
            if invoke.sig.params.len() == 2 && snapshot.is_static() {
                self.report(&InjectError::CallbackBodyNotFound(hook.target.clone()));
                continue;
            }
            let resolution = match resolve(&snapshot, &hook.position, &hook.target) {
                Ok(resolution) => resolution,
                Err(err) => {
                    self.report(&err);
                    continue;
                }
            };

            let call = container.hoist(invoke);
            for anchor in resolution.anchors {
                let resume = Label(base_label.0 + label_offset);
                label_offset += 1;
                let block = emit_hook_invocation(class, &snapshot, &call, resume);
                splices.push(Splice {
                    anchor,
                    sequence: hook.sequence,
                    block,
                });
            }
            planned.push(Registry::handle_of(hook));
            debug!(target_method = %hook.target, position = %hook.position, "hook applied");
        }

        if splices.is_empty() {
            return;
        }

        splices.sort_by(|a, b| {
            b.anchor
                .cmp(&a.anchor)
                .then(b.sequence.cmp(&a.sequence))
        });

        if let Some(body) = class.method_mut(method_name, sig) {
            for splice in splices {
                body.insns.splice(splice.anchor..splice.anchor, splice.block);
            }
            body.max_locals += SCRATCH_SLOTS;
            applied.extend(planned);
        }
    }

    fn report(&self, err: &InjectError) {
        warn!(%err, "hook skipped");
    }

    fn dump(&self, name: &ClassName, bytes: &[u8]) {
        let Some(dir) = &self.config.dump_dir else {
            return;
        };
        let path = dir.join(format!("{}.class", name));
        let write = || -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)
        };
        if let Err(err) = write() {
            warn!(path = %path.display(), %err, "debug dump failed");
        }
    }
}

/// Group hooks by target method, preserving ascending sequence order within
/// each group and first-seen group order.
fn group_by_method(
    pending: Vec<Arc<MethodHook>>,
) -> Vec<(String, MethodSig, Vec<Arc<MethodHook>>)> {
    let mut groups: Vec<(String, MethodSig, Vec<Arc<MethodHook>>)> = Vec::new();
    for hook in pending {
        let key_name = hook.target.name.clone();
        let key_sig = hook.target.sig.clone();
        match groups
            .iter_mut()
            .find(|(name, sig, _)| *name == key_name && *sig == key_sig)
        {
            Some((_, _, group)) => group.push(hook),
            None => groups.push((key_name, key_sig, vec![hook])),
        }
    }
    groups
}
