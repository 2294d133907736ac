//! Position resolver
//!
//! Turns an abstract [`InjectPosition`] into concrete splice anchors: indices
//! into the method's instruction list at which the marshalling block is
//! inserted. Anchors are always resolved against the pristine instruction
//! list of the current pass, so a splice applied for one hook never shifts
//! the anchor another hook resolved.

use crate::error::InjectError;
use crate::position::{InjectPosition, InvokePhase};
use weaver_bytecode::{Insn, MethodBody, MethodDescriptor, MethodSig};

/// Concrete splice points for one hook
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Instruction indices to insert the splice block at
    pub anchors: Vec<usize>,
    /// For call-site positions, the matched callee's signature; lets the
    /// caller reason about what the evaluation stack holds at an
    /// [`InvokePhase::After`] anchor
    pub call_sig: Option<MethodSig>,
}

/// Compute the splice anchors for `position` inside `body`.
///
/// `target` only labels the diagnostics.
pub fn resolve(
    body: &MethodBody,
    position: &InjectPosition,
    target: &MethodDescriptor,
) -> Result<Resolution, InjectError> {
    match position {
        InjectPosition::BeforeAll => Ok(Resolution {
            anchors: vec![0],
            call_sig: None,
        }),

        InjectPosition::BeforeReturn => {
            let anchors: Vec<usize> = body
                .insns
                .iter()
                .enumerate()
                .filter(|(_, insn)| insn.is_return())
                .map(|(index, _)| index)
                .collect();
            if anchors.is_empty() {
                return Err(InjectError::NoReturnSite(target.clone()));
            }
            Ok(Resolution {
                anchors,
                call_sig: None,
            })
        }

        InjectPosition::Invoke {
            owner,
            name,
            sig,
            phase,
        } => {
            // First occurrence only; a recurring triple is matched once, by
            // design.
            let found = body.insns.iter().enumerate().find(|(_, insn)| {
                matches!(
                    insn,
                    Insn::Invoke {
                        owner: o,
                        name: n,
                        sig: s,
                        ..
                    } if o == owner && n == name && s == sig
                )
            });
            let (index, _) = found.ok_or_else(|| InjectError::CallSiteNotFound {
                target: target.clone(),
                owner: owner.clone(),
                name: name.clone(),
                sig: sig.clone(),
            })?;
            let anchor = match phase {
                InvokePhase::Before => index,
                InvokePhase::After => index + 1,
            };
            Ok(Resolution {
                anchors: vec![anchor],
                call_sig: Some(sig.clone()),
            })
        }
    }
}
