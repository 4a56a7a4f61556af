mod common;

use common::{class_from_tags, field_decl, static_method, storage_tags};
use tolin::classfile::defs::ref_kinds;
use tolin::classfile::{BootstrapMethod, ClassFile, Insn, InvokeKind, SlotType};
use tolin::config::GasCostModel;
use tolin::error::Error;
use tolin::instrument::{instrument_all, instrument_class};
use tolin::verification::{invoke_key, BootstrapTag, ClassTags, MethodObligations, ValueObligation, VerifiedClass};

#[test]
fn verification_failures_abort_instrumentation() {
    let class = ClassFile::new("test/Broken", "java/lang/Object");
    let tags = ClassTags { errors: vec!["uses finalize()".to_string()], ..Default::default() };
    let gas = GasCostModel::default();
    let err = instrument_class(VerifiedClass::new(class, tags), &gas).unwrap_err();
    assert!(matches!(err, Error::VerificationFailed { .. }));
    assert!(err.to_string().contains("uses finalize()"));
}

#[test]
fn instrumenting_twice_is_byte_identical() {
    let tags = storage_tags(vec![(
        "test/Entry",
        vec![field_decl("a", "I", 0), field_decl("b", "Ljava/util/LinkedList;", 0)],
    )]);
    let gas = GasCostModel::default();
    let build = || {
        let mut class = class_from_tags(&tags);
        static_method(
            &mut class,
            "sum",
            "(II)I",
            vec![
                Insn::Load(SlotType::Int, 0),
                Insn::Load(SlotType::Int, 1),
                Insn::Arith(SlotType::Int, tolin::classfile::ArithOp::Add),
                Insn::Return(Some(SlotType::Int)),
            ],
        );
        instrument_class(VerifiedClass::new(class, tags.clone()), &gas)
            .expect("instrumentation")
            .to_bytes()
            .expect("serialization")
    };
    assert_eq!(build(), build());
}

#[test]
fn archive_round_trip_is_deterministic() {
    let gas = GasCostModel::default();
    let build = || {
        let classes = ["test/B", "test/A"]
            .iter()
            .map(|name| {
                let mut class = ClassFile::new(*name, "java/lang/Object");
                static_method(&mut class, "run", "()V", vec![Insn::Return(None)]);
                VerifiedClass::new(class, ClassTags::default())
            })
            .collect();
        instrument_all(classes, &gas).expect("instrumentation")
    };
    let jar = build();
    let names: Vec<_> = jar.classes().map(|c| c.name()).collect();
    assert_eq!(names, vec!["test/A", "test/B"]);
    assert_eq!(jar.to_bytes().expect("archive"), build().to_bytes().expect("archive"));
}

// The whitelist forwarder performs the obligated call on the caller's
// behalf; the call site's own gas pass charges the forwarder invocation, so
// the forwarder body itself stays uncharged.
#[test]
fn whitelist_forwarder_is_shared_and_unmetered() {
    let mut class = ClassFile::new("test/M", "java/lang/Object");
    let target = class.pool.method_ref("java/util/Random", "nextInt", "(I)I").expect("method ref");
    let call = vec![
        Insn::Load(SlotType::Ref, 0),
        Insn::Iconst(7),
        Insn::Invoke(InvokeKind::Virtual, target),
        Insn::Return(Some(SlotType::Int)),
    ];
    static_method(&mut class, "a", "(Ljava/util/Random;)I", call.clone());
    static_method(&mut class, "b", "(Ljava/util/Random;)I", call);
    let mut tags = ClassTags::default();
    tags.proof_obligations.insert(
        invoke_key("java/util/Random", "nextInt", "(I)I"),
        MethodObligations {
            values: vec![ValueObligation {
                position: 0,
                predicate: "terminos/wl/MustBeDeterministic".to_string(),
                description: "random source".to_string(),
            }],
        },
    );
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");

    let forwarders: Vec<_> =
        result.class().methods.iter().filter(|m| m.name.starts_with("§check")).collect();
    assert_eq!(forwarders.len(), 1);
    let (cpu, ram) = common::charged_amounts(
        result.class(),
        forwarders[0].code.as_ref().expect("forwarder body"),
    );
    assert_eq!((cpu, ram), (0, 0));
}

#[test]
fn desugared_bootstraps_are_flagged_for_context_threading() {
    let mut class = ClassFile::new("test/Caller", "java/lang/Object");
    let target = class.pool.method_ref("test/Account", "pay", "(I)V").expect("method ref");
    let handle =
        class.pool.method_handle(ref_kinds::REF_INVOKE_VIRTUAL, target).expect("method handle");
    let bootstrap = class
        .pool
        .method_ref("java/lang/invoke/LambdaMetafactory", "metafactory", "()V")
        .expect("method ref");
    let bootstrap_handle =
        class.pool.method_handle(ref_kinds::REF_INVOKE_STATIC, bootstrap).expect("method handle");
    let sam = class.pool.method_type("(I)V").expect("method type");
    class
        .bootstrap_methods
        .push(BootstrapMethod { method_ref: bootstrap_handle, args: vec![sam, handle, sam] });
    let tags = ClassTags {
        bootstraps: vec![BootstrapTag::IsContextRequiring],
        ..Default::default()
    };
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");

    assert!(result.bootstraps_with_extra_context().contains(&0));
    assert!(result.class().method("§lambda0", "(Ltest/Account;I)V").is_some());
}
