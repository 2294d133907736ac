//! Integration tests for the container codec

use weaver_bytecode::class::flags;
use weaver_bytecode::{
    ClassName, ClassNode, FieldNode, Insn, InvokeKind, MethodBody, MethodSig, SlotKind, TypeDesc,
};

fn printer_class() -> ClassNode {
    let mut class = ClassNode::new(ClassName::new("demo.Printer"));
    class.fields.push(FieldNode {
        access: flags::ACC_PUBLIC,
        name: "prefix".into(),
        ty: TypeDesc::Object("java/lang/String".into()),
    });
    class.fields.push(FieldNode {
        access: flags::ACC_PUBLIC | flags::ACC_STATIC,
        name: "total".into(),
        ty: TypeDesc::Long,
    });

    let mut print = MethodBody::new(
        flags::ACC_PUBLIC,
        "print",
        MethodSig::parse("(Ljava/lang/String;)V").unwrap(),
    );
    print.insns = vec![
        Insn::GetStatic {
            owner: ClassName::new("java/lang/System"),
            name: "out".into(),
            ty: TypeDesc::Object("java/io/PrintStream".into()),
        },
        Insn::Load {
            kind: SlotKind::Ref,
            slot: 1,
        },
        Insn::Invoke {
            kind: InvokeKind::Virtual,
            owner: ClassName::new("java/io/PrintStream"),
            name: "println".into(),
            sig: MethodSig::parse("(Ljava/lang/String;)V").unwrap(),
        },
        Insn::Return(None),
    ];
    class.methods.push(print);
    class
}

#[test]
fn test_dotted_name_is_normalized() {
    let class = printer_class();
    assert_eq!(class.name.as_str(), "demo/Printer");
}

#[test]
fn test_encode_decode_preserves_structure() {
    let class = printer_class();
    let bytes = class.encode();
    let decoded = ClassNode::decode(&bytes).unwrap();

    assert_eq!(decoded, class);
    assert_eq!(decoded.fields.len(), 2);
    assert!(decoded.fields[1].is_static());

    let sig = MethodSig::parse("(Ljava/lang/String;)V").unwrap();
    let method = decoded.method("print", &sig).expect("method survives");
    assert_eq!(method.insns.len(), 4);
    assert!(method.insns[3].is_return());
}

#[test]
fn test_reencode_is_stable() {
    let class = printer_class();
    let once = class.encode();
    let twice = ClassNode::decode(&once).unwrap().encode();
    assert_eq!(once, twice);
}
