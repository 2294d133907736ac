//! End-to-end transformation tests
//!
//! Each test drives the full pipeline: encode a target class, register hooks,
//! run the driver, decode the result, and assert on the spliced instruction
//! list and on the synthetic container handed to the definer.

use parking_lot::Mutex;
use std::sync::Arc;
use weaver_bytecode::class::flags;
use weaver_bytecode::{
    ClassName, ClassNode, FieldNode, Insn, InvokeKind, Label, MethodBody, MethodDescriptor,
    MethodSig, SlotKind, TypeDesc,
};
use weaver_engine::{
    ClassDefiner, DriverConfig, EncodeError, HookBody, InjectPosition, InvokePhase, Registry,
    StockFormat, TransformDriver, TransformError,
};

/// Captures every class handed to the definition collaborator.
#[derive(Default)]
struct RecordingDefiner {
    defined: Mutex<Vec<(ClassName, Vec<u8>)>>,
}

impl ClassDefiner for RecordingDefiner {
    fn define(&self, name: &ClassName, bytes: &[u8]) -> Result<(), EncodeError> {
        self.defined.lock().push((name.clone(), bytes.to_vec()));
        Ok(())
    }
}

fn println_call() -> Insn {
    Insn::Invoke {
        kind: InvokeKind::Virtual,
        owner: ClassName::new("java/io/PrintStream"),
        name: "println".into(),
        sig: MethodSig::parse("(Ljava/lang/String;)V").unwrap(),
    }
}

/// `demo/Target` with one instance and one static field and three methods:
/// `greet()Ljava/lang/String;` (prints "A", returns "orig"),
/// `calc(IJ)J`, and `pick(Z)I` with two return paths.
fn target_class() -> ClassNode {
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

    let mut greet = MethodBody::new(
        flags::ACC_PUBLIC,
        "greet",
        MethodSig::parse("()Ljava/lang/String;").unwrap(),
    );
    greet.insns = vec![
        Insn::GetStatic {
            owner: ClassName::new("java/lang/System"),
            name: "out".into(),
            ty: TypeDesc::Object("java/io/PrintStream".into()),
        },
        Insn::PushStr("A".into()),
        println_call(),
        Insn::PushStr("orig".into()),
        Insn::Return(Some(SlotKind::Ref)),
    ];
    class.methods.push(greet);

    let mut calc = MethodBody::new(flags::ACC_PUBLIC, "calc", MethodSig::parse("(IJ)J").unwrap());
    calc.insns = vec![
        Insn::Load {
            kind: SlotKind::Long,
            slot: 2,
        },
        Insn::Return(Some(SlotKind::Long)),
    ];
    class.methods.push(calc);

    let mut pick = MethodBody::new(flags::ACC_PUBLIC, "pick", MethodSig::parse("(Z)I").unwrap());
    pick.insns = vec![
        Insn::Load {
            kind: SlotKind::Int,
            slot: 1,
        },
        Insn::JumpIfZero { target: Label(0) },
        Insn::PushInt(1),
        Insn::Return(Some(SlotKind::Int)),
        Insn::Mark(Label(0)),
        Insn::PushInt(0),
        Insn::Return(Some(SlotKind::Int)),
    ];
    class.methods.push(pick);
    class
}

/// A packaged hook whose `invoke` takes `(Ldemo/Target;Lweaver/runtime/Context;)V`.
fn instance_hook() -> HookBody {
    let mut class = ClassNode::new(ClassName::new("hooks/EntryHook"));
    let mut invoke = MethodBody::new(
        flags::ACC_PUBLIC,
        "invoke",
        MethodSig::parse("(Ldemo/Target;Lweaver/runtime/Context;)V").unwrap(),
    );
    invoke.insns = vec![
        Insn::Load {
            kind: SlotKind::Ref,
            slot: 2,
        },
        Insn::Pop,
        Insn::Return(None),
    ];
    invoke.max_locals = 3;
    class.methods.push(invoke);
    HookBody::new(class)
}

fn setup(config: DriverConfig) -> (Arc<Registry>, Arc<RecordingDefiner>, TransformDriver) {
    let registry = Arc::new(Registry::new());
    let definer = Arc::new(RecordingDefiner::default());
    let driver = TransformDriver::new(
        Arc::clone(&registry),
        Arc::new(StockFormat),
        Arc::clone(&definer) as Arc<dyn ClassDefiner>,
        config,
    );
    (registry, definer, driver)
}

fn descriptor(name: &str, desc: &str) -> MethodDescriptor {
    MethodDescriptor::parse("demo.Target", name, desc).unwrap()
}

fn transform(driver: &TransformDriver) -> Option<ClassNode> {
    let bytes = target_class().encode();
    driver
        .transform("demo/Target", &bytes)
        .unwrap()
        .map(|out| ClassNode::decode(&out).unwrap())
}

fn method<'a>(class: &'a ClassNode, name: &str, desc: &str) -> &'a MethodBody {
    class.method(name, &MethodSig::parse(desc).unwrap()).unwrap()
}

fn container_invocations(body: &MethodBody) -> Vec<usize> {
    body.insns
        .iter()
        .enumerate()
        .filter_map(|(i, insn)| match insn {
            Insn::Invoke { kind: InvokeKind::Static, owner, name, .. }
                if owner.as_str().starts_with("weaver$/") && name.starts_with("hook$method") =>
            {
                Some(i)
            }
            _ => None,
        })
        .collect()
}

#[test]
fn entry_injection_runs_before_original_code() {
    let (_, definer, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let greet = method(&class, "greet", "()Ljava/lang/String;");

    let invocations = container_invocations(greet);
    assert_eq!(invocations.len(), 1);
    let print_at = greet
        .insns
        .iter()
        .position(|i| matches!(i, Insn::PushStr(s) if s == "A"))
        .unwrap();
    assert!(invocations[0] < print_at, "hook must precede original code");

    // The hoisted body landed in a defined container class.
    let defined = definer.defined.lock();
    assert_eq!(defined.len(), 1);
    let container = ClassNode::decode(&defined[0].1).unwrap();
    assert!(container.name.as_str().starts_with("weaver$/demo/Target_Hook_"));
    let hoisted = &container.methods[0];
    assert_eq!(hoisted.name, "hook$method0");
    assert_ne!(hoisted.access & flags::ACC_STATIC, 0);
    // Slot indices shifted down by one during hoisting.
    assert_eq!(
        hoisted.insns[0],
        Insn::Load {
            kind: SlotKind::Ref,
            slot: 1
        }
    );
}

#[test]
fn return_injection_covers_every_path() {
    let (_, _, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("pick", "(Z)I"),
        InjectPosition::before_return(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let pick = method(&class, "pick", "(Z)I");

    // One hook invocation per return site.
    assert_eq!(container_invocations(pick).len(), 2);

    // Each original return is still immediately preceded by a resume mark,
    // i.e. the splice block ends right before the return instruction.
    let returns: Vec<usize> = pick
        .insns
        .iter()
        .enumerate()
        .filter(|(_, i)| matches!(i, Insn::Return(Some(SlotKind::Int))))
        .map(|(i, _)| i)
        .collect();
    let original_returns: Vec<usize> = returns
        .iter()
        .copied()
        .filter(|&i| matches!(pick.insns[i - 1], Insn::Mark(_)))
        .collect();
    assert_eq!(original_returns.len(), 2);
}

#[test]
fn cancellation_branch_overrides_with_declared_type() {
    let (_, _, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_return(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let greet = method(&class, "greet", "()Ljava/lang/String;");

    // The block lands after the "A" print and before the original return.
    let print_at = greet
        .insns
        .iter()
        .position(|i| matches!(i, Insn::PushStr(s) if s == "A"))
        .unwrap();
    let invocations = container_invocations(greet);
    assert_eq!(invocations.len(), 1);
    assert!(invocations[0] > print_at);

    // Override path: fetch the cell value, cast to the declared return type,
    // return it without touching the rest of the method.
    let cast_at = greet
        .insns
        .iter()
        .position(|i| {
            matches!(i, Insn::CheckCast { ty: TypeDesc::Object(o) } if o == "java/lang/String")
        })
        .expect("override cast present");
    assert_eq!(greet.insns[cast_at + 1], Insn::Return(Some(SlotKind::Ref)));
    assert!(greet
        .insns
        .iter()
        .any(|i| matches!(i, Insn::Invoke { name, .. } if name == "getCancelled")));
}

#[test]
fn argument_snapshot_reads_correct_slots_in_order() {
    let (_, _, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("calc", "(IJ)J"),
        InjectPosition::before_all(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let calc = method(&class, "calc", "(IJ)J");

    let int_box = calc
        .insns
        .iter()
        .position(|i| matches!(
            i,
            Insn::Invoke { owner, name, .. }
                if owner.as_str() == "java/lang/Integer" && name == "valueOf"
        ))
        .expect("int argument boxed");
    let long_box = calc
        .insns
        .iter()
        .position(|i| matches!(
            i,
            Insn::Invoke { owner, name, .. }
                if owner.as_str() == "java/lang/Long" && name == "valueOf"
        ))
        .expect("long argument boxed");
    assert!(int_box < long_box, "snapshot preserves declaration order");

    // this=0, int at 1, long at 2.
    assert_eq!(
        calc.insns[int_box - 1],
        Insn::Load {
            kind: SlotKind::Int,
            slot: 1
        }
    );
    assert_eq!(
        calc.insns[long_box - 1],
        Insn::Load {
            kind: SlotKind::Long,
            slot: 2
        }
    );
    // Scratch slots were appended to the local space.
    assert_eq!(calc.max_locals, 4 + 4);
}

#[test]
fn field_snapshot_covers_instance_and_static_fields() {
    let (_, _, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let greet = method(&class, "greet", "()Ljava/lang/String;");

    assert!(greet.insns.iter().any(|i| matches!(
        i,
        Insn::GetField { owner, name, .. }
            if owner.as_str() == "demo/Target" && name == "label"
    )));
    assert!(greet.insns.iter().any(|i| matches!(
        i,
        Insn::GetStatic { owner, name, .. }
            if owner.as_str() == "demo/Target" && name == "total"
    )));
    // Static long field gets boxed before the map put.
    assert!(greet.insns.iter().any(|i| matches!(
        i,
        Insn::Invoke { owner, name, .. }
            if owner.as_str() == "java/lang/Long" && name == "valueOf"
    )));
    let puts = greet
        .insns
        .iter()
        .filter(|i| matches!(i, Insn::Invoke { name, .. } if name == "put"))
        .count();
    assert_eq!(puts, 2);
}

#[test]
fn hooks_at_same_position_run_in_registration_order() {
    let (_, _, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let greet = method(&class, "greet", "()Ljava/lang/String;");

    let order: Vec<String> = greet
        .insns
        .iter()
        .filter_map(|i| match i {
            Insn::Invoke { name, .. } if name.starts_with("hook$method") => Some(name.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(order, vec!["hook$method0", "hook$method1"]);
}

#[test]
fn hooks_at_different_positions_keep_their_anchors() {
    let (_, _, driver) = setup(DriverConfig::default());
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_return(),
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let greet = method(&class, "greet", "()Ljava/lang/String;");

    let invocations = container_invocations(greet);
    assert_eq!(invocations.len(), 2);

    // The original instruction run survives contiguously: neither splice
    // shifted the other's anchor into it.
    let get_out = greet
        .insns
        .iter()
        .position(|i| matches!(
            i,
            Insn::GetStatic { owner, name, .. }
                if owner.as_str() == "java/lang/System" && name == "out"
        ))
        .unwrap();
    assert_eq!(greet.insns[get_out + 1], Insn::PushStr("A".into()));
    assert!(matches!(&greet.insns[get_out + 2], Insn::Invoke { name, .. } if name == "println"));
    assert_eq!(greet.insns[get_out + 3], Insn::PushStr("orig".into()));

    // Entry block ahead of the original code, return block between the
    // original push and its return, which stays the final instruction.
    assert!(invocations[0] < get_out);
    assert!(invocations[1] > get_out + 3);
    assert_eq!(greet.insns.last(), Some(&Insn::Return(Some(SlotKind::Ref))));
}

#[test]
fn retransformation_accumulates_earlier_splices() {
    let (registry, definer, driver) = setup(DriverConfig::default());
    let target = descriptor("greet", "()Ljava/lang/String;");

    registry.register(target.clone(), InjectPosition::before_all(), instance_hook());
    let first = transform(&driver).expect("first pass transformed");
    assert_eq!(
        container_invocations(method(&first, "greet", "()Ljava/lang/String;")).len(),
        1
    );

    // A hook registered after the first pass lands on top of it, not instead
    // of it.
    registry.register(target.clone(), InjectPosition::before_all(), instance_hook());
    let second = transform(&driver).expect("second pass transformed");
    let greet = method(&second, "greet", "()Ljava/lang/String;");
    assert_eq!(
        container_invocations(greet).len(),
        2,
        "first pass splice survives retransformation"
    );

    // Each pass defined its own container.
    let defined = definer.defined.lock();
    assert_eq!(defined.len(), 2);
    assert_ne!(defined[0].0, defined[1].0);
}

#[test]
fn around_call_splices_before_and_after_first_match() {
    let (_, _, driver) = setup(DriverConfig::default());
    let position = InjectPosition::around_call(
        "java/io/PrintStream",
        "println",
        MethodSig::parse("(Ljava/lang/String;)V").unwrap(),
        InvokePhase::After,
    );
    driver.registry().register(
        descriptor("greet", "()Ljava/lang/String;"),
        position,
        instance_hook(),
    );

    let class = transform(&driver).expect("class transformed");
    let greet = method(&class, "greet", "()Ljava/lang/String;");

    let println_at = greet
        .insns
        .iter()
        .position(|i| matches!(i, Insn::Invoke { name, .. } if name == "println"))
        .unwrap();
    let invocations = container_invocations(greet);
    assert_eq!(invocations.len(), 1);
    assert!(
        invocations[0] > println_at,
        "after-phase block lands past the call"
    );
    // Original code between the call and the splice block is untouched.
    assert_eq!(greet.insns[println_at - 1], Insn::PushStr("A".into()));
}

#[test]
fn missing_call_site_skips_hook_and_keeps_bytes() {
    let (registry, _, driver) = setup(DriverConfig::default());
    let position = InjectPosition::around_call(
        "java/io/PrintStream",
        "flush",
        MethodSig::parse("()V").unwrap(),
        InvokePhase::Before,
    );
    registry.register(
        descriptor("greet", "()Ljava/lang/String;"),
        position,
        instance_hook(),
    );

    assert!(transform(&driver).is_none());
}

#[test]
fn missing_method_keeps_bytes_and_honors_retention_policy() {
    // Default policy: the registration stays pending.
    let (registry, _, driver) = setup(DriverConfig::default());
    registry.register(
        descriptor("absent", "()V"),
        InjectPosition::before_all(),
        instance_hook(),
    );
    assert!(transform(&driver).is_none());
    assert_eq!(
        registry.pending_for(&descriptor("absent", "()V")).len(),
        1
    );

    // Drop policy: the registration is consumed on the failed match.
    let config = DriverConfig {
        retain_unmatched: false,
        ..DriverConfig::default()
    };
    let (registry, _, driver) = setup(config);
    registry.register(
        descriptor("absent", "()V"),
        InjectPosition::before_all(),
        instance_hook(),
    );
    assert!(transform(&driver).is_none());
    assert!(registry.pending_for(&descriptor("absent", "()V")).is_empty());
}

#[test]
fn applied_registrations_are_consumed() {
    let (registry, _, driver) = setup(DriverConfig::default());
    let target = descriptor("greet", "()Ljava/lang/String;");
    registry.register(target.clone(), InjectPosition::before_all(), instance_hook());

    assert!(transform(&driver).is_some());
    assert!(registry.pending_for(&target).is_empty());

    // A second pass over the same class has nothing left to apply.
    assert!(transform(&driver).is_none());
}

#[test]
fn unreadable_bytes_surface_a_read_error() {
    let (registry, _, driver) = setup(DriverConfig::default());
    registry.register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );

    let err = driver.transform("demo/Target", b"not a container").unwrap_err();
    assert!(matches!(err, TransformError::Read { .. }));
}

#[test]
fn excluded_prefixes_are_never_touched() {
    let (registry, _, driver) = setup(DriverConfig::default());
    registry.register(
        MethodDescriptor::parse("java.lang.String", "length", "()I").unwrap(),
        InjectPosition::before_all(),
        instance_hook(),
    );
    assert!(driver
        .transform("java/lang/String", &target_class().encode())
        .unwrap()
        .is_none());
}

#[test]
fn debug_dump_writes_transformed_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let config = DriverConfig {
        dump_dir: Some(dir.path().to_path_buf()),
        ..DriverConfig::default()
    };
    let (registry, _, driver) = setup(config);
    registry.register(
        descriptor("greet", "()Ljava/lang/String;"),
        InjectPosition::before_all(),
        instance_hook(),
    );

    let transformed = transform(&driver).expect("class transformed");
    let dumped = std::fs::read(dir.path().join("demo/Target.class")).unwrap();
    assert_eq!(ClassNode::decode(&dumped).unwrap(), transformed);
}
