//! Marshalling generator
//!
//! Synthesizes the instruction block spliced into a target method: it boxes
//! the current argument values into an ordered list, snapshots the enclosing
//! class's fields into a name→value map, builds a return-control cell and a
//! context around all three, invokes the hoisted hook method, and branches on
//! cancellation: either it falls through to the original code, or it unboxes
//! the override value and returns it.
//!
//! The snapshots are taken by the emitted instructions themselves, so every
//! execution of the block observes the argument values current at that point.
//! For after-call anchors the callee's result stays untouched on the
//! evaluation stack beneath the block and is not exposed to the hook.

use weaver_bytecode::{
    ClassName, ClassNode, Insn, InvokeKind, Label, MethodBody, MethodSig, SlotKind, TypeDesc,
};

/// Internal name of the runtime context class handed to hooks
pub const CONTEXT_CLASS: &str = "weaver/runtime/Context";
/// Internal name of the runtime return-control cell
pub const RETURN_CELL_CLASS: &str = "weaver/runtime/ReturnCell";

const ARRAY_LIST: &str = "java/util/ArrayList";
const HASH_MAP: &str = "java/util/HashMap";
const MAP: &str = "java/util/Map";
const OBJECT: &str = "java/lang/Object";

/// Scratch ref slots appended to the target's local-variable space: the
/// argument list, the field map, the return cell and the context.
pub const SCRATCH_SLOTS: u16 = 4;

/// The hoisted hook method a splice block invokes
#[derive(Debug, Clone, PartialEq)]
pub struct HookCall {
    /// Synthetic container class holding the hoisted method
    pub container: ClassName,
    /// Hoisted method name
    pub method: String,
    /// Hoisted method signature
    pub sig: MethodSig,
    /// Whether the hook receives the enclosing instance before the context
    pub takes_receiver: bool,
}

fn object_ty() -> TypeDesc {
    TypeDesc::Object(OBJECT.into())
}

fn ctor(owner: &str, params: Vec<TypeDesc>) -> Insn {
    Insn::Invoke {
        kind: InvokeKind::Special,
        owner: ClassName::new(owner),
        name: "<init>".into(),
        sig: MethodSig::new(TypeDesc::Void, params),
    }
}

fn load_ref(slot: u16) -> Insn {
    Insn::Load {
        kind: SlotKind::Ref,
        slot,
    }
}

/// Append instructions that box the stack top of type `ty` into its wrapper.
///
/// Reference and array values pass through unchanged.
fn emit_box_top(insns: &mut Vec<Insn>, ty: &TypeDesc) {
    if let Some(owner) = ty.box_owner() {
        insns.push(Insn::Invoke {
            kind: InvokeKind::Static,
            owner: ClassName::new(owner),
            name: "valueOf".into(),
            sig: MethodSig::new(TypeDesc::Object(owner.into()), vec![ty.clone()]),
        });
    }
}

/// Append instructions that load the local at `slot` and box it.
fn emit_boxed_load(insns: &mut Vec<Insn>, slot: u16, ty: &TypeDesc) {
    // Params are value types, so SlotKind is always present here.
    if let Some(kind) = SlotKind::for_type(ty) {
        insns.push(Insn::Load { kind, slot });
        emit_box_top(insns, ty);
    }
}

/// Append the cast/unbox/return sequence for an override value of type `ty`.
///
/// The boxed value must already be on the stack. Unboxing casts to exactly
/// the wrapper the snapshot phase boxed to; reference and array types get a
/// plain checked cast.
fn emit_unbox_and_return(insns: &mut Vec<Insn>, ty: &TypeDesc) {
    match ty.box_owner() {
        Some(owner) => {
            insns.push(Insn::CheckCast {
                ty: TypeDesc::Object(owner.into()),
            });
            insns.push(Insn::Invoke {
                kind: InvokeKind::Virtual,
                owner: ClassName::new(owner),
                name: ty.unbox_accessor().unwrap_or("intValue").into(),
                sig: MethodSig::new(ty.clone(), vec![]),
            });
            insns.push(Insn::Return(SlotKind::for_type(ty)));
        }
        None => {
            insns.push(Insn::CheckCast { ty: ty.clone() });
            insns.push(Insn::Return(Some(SlotKind::Ref)));
        }
    }
}

/// Generate the splice block for one hook at one anchor.
///
/// `resume` must be a label unused anywhere in the target body (and distinct
/// per block when several blocks land in the same method). The caller widens
/// the target's `max_locals` by [`SCRATCH_SLOTS`] once per touched method.
pub fn emit_hook_invocation(
    class: &ClassNode,
    method: &MethodBody,
    hook: &HookCall,
    resume: Label,
) -> Vec<Insn> {
    let base = method.max_locals;
    let args_slot = base;
    let fields_slot = base + 1;
    let cell_slot = base + 2;
    let ctx_slot = base + 3;

    let mut insns = Vec::new();

    // args = new ArrayList()
    insns.push(Insn::New {
        class: ClassName::new(ARRAY_LIST),
    });
    insns.push(Insn::Dup);
    insns.push(ctor(ARRAY_LIST, vec![]));
    insns.push(Insn::Store {
        kind: SlotKind::Ref,
        slot: args_slot,
    });

    // fields = new HashMap()
    insns.push(Insn::New {
        class: ClassName::new(HASH_MAP),
    });
    insns.push(Insn::Dup);
    insns.push(ctor(HASH_MAP, vec![]));
    insns.push(Insn::Store {
        kind: SlotKind::Ref,
        slot: fields_slot,
    });

    // args.add(boxed param) for each parameter, tracking the cumulative slot
    // offset; longs and doubles advance by two.
    let mut slot = if method.is_static() { 0 } else { 1 };
    for ty in &method.sig.params {
        insns.push(load_ref(args_slot));
        emit_boxed_load(&mut insns, slot, ty);
        insns.push(Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: ClassName::new(ARRAY_LIST),
            name: "add".into(),
            sig: MethodSig::new(TypeDesc::Boolean, vec![object_ty()]),
        });
        insns.push(Insn::Pop);
        slot += ty.slot_width();
    }

    // fields.put(name, boxed value) for each declared field. Instance fields
    // need the receiver, so a static target only snapshots static fields.
    for field in &class.fields {
        if !field.is_static() && method.is_static() {
            continue;
        }
        insns.push(load_ref(fields_slot));
        insns.push(Insn::PushStr(field.name.clone()));
        if field.is_static() {
            insns.push(Insn::GetStatic {
                owner: class.name.clone(),
                name: field.name.clone(),
                ty: field.ty.clone(),
            });
        } else {
            insns.push(load_ref(0));
            insns.push(Insn::GetField {
                owner: class.name.clone(),
                name: field.name.clone(),
                ty: field.ty.clone(),
            });
        }
        emit_box_top(&mut insns, &field.ty);
        insns.push(Insn::Invoke {
            kind: InvokeKind::Interface,
            owner: ClassName::new(MAP),
            name: "put".into(),
            sig: MethodSig::new(object_ty(), vec![object_ty(), object_ty()]),
        });
        insns.push(Insn::Pop);
    }

    // cell = new ReturnCell()  (cancelled = false)
    insns.push(Insn::New {
        class: ClassName::new(RETURN_CELL_CLASS),
    });
    insns.push(Insn::Dup);
    insns.push(ctor(RETURN_CELL_CLASS, vec![]));
    insns.push(Insn::Store {
        kind: SlotKind::Ref,
        slot: cell_slot,
    });

    // ctx = new Context(args, fields, cell)
    insns.push(Insn::New {
        class: ClassName::new(CONTEXT_CLASS),
    });
    insns.push(Insn::Dup);
    insns.push(load_ref(args_slot));
    insns.push(load_ref(fields_slot));
    insns.push(load_ref(cell_slot));
    insns.push(ctor(
        CONTEXT_CLASS,
        vec![
            TypeDesc::Object("java/util/List".into()),
            TypeDesc::Object(MAP.into()),
            TypeDesc::Object(RETURN_CELL_CLASS.into()),
        ],
    ));
    insns.push(Insn::Store {
        kind: SlotKind::Ref,
        slot: ctx_slot,
    });

    // container.hook$method{n}(this?, ctx)
    if hook.takes_receiver {
        insns.push(load_ref(0));
    }
    insns.push(load_ref(ctx_slot));
    insns.push(Insn::Invoke {
        kind: InvokeKind::Static,
        owner: hook.container.clone(),
        name: hook.method.clone(),
        sig: hook.sig.clone(),
    });

    // if (cell.getCancelled()) return override; else fall through
    insns.push(load_ref(cell_slot));
    insns.push(Insn::Invoke {
        kind: InvokeKind::Virtual,
        owner: ClassName::new(RETURN_CELL_CLASS),
        name: "getCancelled".into(),
        sig: MethodSig::new(TypeDesc::Boolean, vec![]),
    });
    insns.push(Insn::JumpIfZero { target: resume });

    if method.sig.ret == TypeDesc::Void {
        insns.push(Insn::Return(None));
    } else {
        insns.push(load_ref(cell_slot));
        insns.push(Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: ClassName::new(RETURN_CELL_CLASS),
            name: "getReturnValue".into(),
            sig: MethodSig::new(object_ty(), vec![]),
        });
        emit_unbox_and_return(&mut insns, &method.sig.ret);
    }
    insns.push(Insn::Mark(resume));

    insns
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver_bytecode::class::flags;
    use weaver_bytecode::FieldNode;

    fn hook_call(takes_receiver: bool) -> HookCall {
        let params = if takes_receiver {
            vec![object_ty(), TypeDesc::Object(CONTEXT_CLASS.into())]
        } else {
            vec![TypeDesc::Object(CONTEXT_CLASS.into())]
        };
        HookCall {
            container: ClassName::new("weaver$/demo/Target_Hook_0"),
            method: "hook$method0".into(),
            sig: MethodSig::new(TypeDesc::Void, params),
            takes_receiver,
        }
    }

    fn class_with_fields() -> ClassNode {
        let mut class = ClassNode::new(ClassName::new("demo/Target"));
        class.fields.push(FieldNode {
            access: flags::ACC_PUBLIC,
            name: "label".into(),
            ty: TypeDesc::Object("java/lang/String".into()),
        });
        class.fields.push(FieldNode {
            access: flags::ACC_PUBLIC | flags::ACC_STATIC,
            name: "total".into(),
            ty: TypeDesc::Long,
        });
        class
    }

    fn loads_of(insns: &[Insn]) -> Vec<(SlotKind, u16)> {
        insns
            .iter()
            .filter_map(|i| match i {
                Insn::Load { kind, slot } => Some((*kind, *slot)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_argument_slots_account_for_wide_types() {
        let class = class_with_fields();
        let method = MethodBody::new(
            flags::ACC_PUBLIC,
            "calc",
            MethodSig::parse("(IJD)V").unwrap(),
        );
        let block = emit_hook_invocation(&class, &method, &hook_call(true), Label(0));

        let loads = loads_of(&block);
        // this=0, int at 1, long at 2 (two slots), double at 4
        assert!(loads.contains(&(SlotKind::Int, 1)));
        assert!(loads.contains(&(SlotKind::Long, 2)));
        assert!(loads.contains(&(SlotKind::Double, 4)));
    }

    #[test]
    fn test_static_target_skips_receiver_slot_and_instance_fields() {
        let class = class_with_fields();
        let method = MethodBody::new(
            flags::ACC_PUBLIC | flags::ACC_STATIC,
            "calc",
            MethodSig::parse("(I)V").unwrap(),
        );
        let block = emit_hook_invocation(&class, &method, &hook_call(false), Label(0));

        let loads = loads_of(&block);
        assert!(loads.contains(&(SlotKind::Int, 0)));
        // No receiver read anywhere in the block.
        assert!(!loads.contains(&(SlotKind::Ref, 0)));
        // Only the static field is snapshotted.
        assert!(block
            .iter()
            .any(|i| matches!(i, Insn::GetStatic { name, .. } if name == "total")));
        assert!(!block.iter().any(|i| matches!(i, Insn::GetField { .. })));
    }

    #[test]
    fn test_void_target_returns_bare() {
        let class = class_with_fields();
        let method =
            MethodBody::new(flags::ACC_PUBLIC, "run", MethodSig::parse("()V").unwrap());
        let block = emit_hook_invocation(&class, &method, &hook_call(true), Label(7));

        let jump_at = block
            .iter()
            .position(|i| matches!(i, Insn::JumpIfZero { target } if *target == Label(7)))
            .unwrap();
        assert_eq!(block[jump_at + 1], Insn::Return(None));
        assert_eq!(block[jump_at + 2], Insn::Mark(Label(7)));
    }

    #[test]
    fn test_override_unboxes_with_declared_return_type() {
        let class = class_with_fields();
        let method =
            MethodBody::new(flags::ACC_PUBLIC, "count", MethodSig::parse("()I").unwrap());
        let block = emit_hook_invocation(&class, &method, &hook_call(true), Label(0));

        assert!(block.iter().any(|i| matches!(
            i,
            Insn::CheckCast { ty: TypeDesc::Object(o) } if o == "java/lang/Integer"
        )));
        assert!(block.iter().any(|i| matches!(
            i,
            Insn::Invoke { name, .. } if name == "intValue"
        )));
        assert!(block.contains(&Insn::Return(Some(SlotKind::Int))));
    }

    #[test]
    fn test_reference_return_uses_plain_cast() {
        let class = class_with_fields();
        let method = MethodBody::new(
            flags::ACC_PUBLIC,
            "name",
            MethodSig::parse("()Ljava/lang/String;").unwrap(),
        );
        let block = emit_hook_invocation(&class, &method, &hook_call(true), Label(0));

        assert!(block.iter().any(|i| matches!(
            i,
            Insn::CheckCast { ty: TypeDesc::Object(o) } if o == "java/lang/String"
        )));
        assert!(block.contains(&Insn::Return(Some(SlotKind::Ref))));
    }

    #[test]
    fn test_receiver_passed_before_context() {
        let class = class_with_fields();
        let method =
            MethodBody::new(flags::ACC_PUBLIC, "run", MethodSig::parse("()V").unwrap());
        let block = emit_hook_invocation(&class, &method, &hook_call(true), Label(0));

        let invoke_at = block
            .iter()
            .position(|i| matches!(i, Insn::Invoke { name, .. } if name == "hook$method0"))
            .unwrap();
        let ctx_slot = method.max_locals + 3;
        assert_eq!(block[invoke_at - 2], load_ref(0));
        assert_eq!(block[invoke_at - 1], load_ref(ctx_slot));
    }
}
