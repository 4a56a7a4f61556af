mod common;

use common::{class_from_tags, field_decl, storage_tags};
use tolin::classfile::defs::access_flags::ACC_FINAL;
use tolin::classfile::{Insn, InvokeKind};
use tolin::config::GasCostModel;
use tolin::consts::{LATEST_LAZY_UPDATE, RUNTIME_CLASS};
use tolin::instrument::instrument_class;
use tolin::verification::VerifiedClass;

// The canonical mixed-field scenario: `a` is eager, `b` is lazy. After
// instrumentation the class carries one shadow field for `a`, a shadow field
// plus a loaded flag for `b`, accessors and a loader for `b` only, and the
// reconstruction constructor takes the handle and the eager value.
#[test]
fn mixed_eager_lazy_class_gets_the_expected_members() {
    let tags = storage_tags(vec![(
        "test/Entry",
        vec![field_decl("a", "I", 0), field_decl("b", "Ljava/util/LinkedList;", 0)],
    )]);
    let class = class_from_tags(&tags);
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");
    let class = result.class();

    assert!(class.field("§old_a").is_some());
    assert!(class.field("§old_b").is_some());
    assert!(class.field("§loaded_b").is_some());
    assert!(class.field("§loaded_a").is_none());

    assert!(class.method("§get_test_Entry_b", "()Ljava/util/LinkedList;").is_some());
    assert!(class.method("§set_test_Entry_b", "(Ljava/util/LinkedList;)V").is_some());
    assert!(class.method("§ensureLoaded_b", "()V").is_some());
    assert!(class.method("§get_test_Entry_a", "()I").is_none());
    assert!(class.method("§ensureLoaded_a", "()V").is_none());

    assert!(class.has_method("<init>", "(Lterminos/rt/StorageReference;ILterminos/rt/Dummy;)V"));
    // the root storage class carries the handle and the residence flag
    assert!(class.field("§handle").is_some());
    assert!(class.field("§inStore").is_some());
}

// The loader guards on the loaded flag before fetching, marks the field
// loaded before the fetch, and stores the fetched value into both the field
// and its shadow. A second call therefore performs no further load.
#[test]
fn loader_is_idempotent_by_construction() {
    let tags = storage_tags(vec![(
        "test/Entry",
        vec![field_decl("b", "Ljava/util/LinkedList;", 0)],
    )]);
    let class = class_from_tags(&tags);
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");
    let loader = result.class().method("§ensureLoaded_b", "()V").expect("loader");
    let insns = &loader.code.as_ref().expect("loader body").insns;

    let flag_guard = insns
        .iter()
        .position(|i| matches!(i, Insn::If(..)))
        .expect("loaded-flag guard");
    let mark_loaded = insns
        .iter()
        .position(|i| matches!(i, Insn::PutField(_)))
        .expect("loaded-flag store");
    let fetch = insns
        .iter()
        .position(|i| {
            matches!(i, Insn::Invoke(InvokeKind::Static, index)
                if result.class().pool.method_ref_at(*index)
                    .map(|(c, n, _)| c == RUNTIME_CLASS && n == LATEST_LAZY_UPDATE)
                    .unwrap_or(false))
        })
        .expect("runtime fetch");
    assert!(flag_guard < mark_loaded);
    assert!(mark_loaded < fetch);
    // the fetched value lands in the field and in its shadow
    let stores_after_fetch =
        insns[fetch..].iter().filter(|i| matches!(i, Insn::PutField(_))).count();
    assert_eq!(stores_after_fetch, 2);
}

// The setter invokes the loader before writing, so the shadow of an already
// persisted value is fetched before being overwritten; the loader's guards
// make the call a no-op once the field is loaded. The assigned value then
// lands in both the field and its shadow.
#[test]
fn setter_loads_first_then_writes_field_and_shadow() {
    let tags = storage_tags(vec![(
        "test/Entry",
        vec![field_decl("b", "Ljava/util/LinkedList;", 0)],
    )]);
    let class = class_from_tags(&tags);
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");
    let setter =
        result.class().method("§set_test_Entry_b", "(Ljava/util/LinkedList;)V").expect("setter");
    let insns = &setter.code.as_ref().expect("setter body").insns;

    let load_call = insns
        .iter()
        .position(|i| {
            matches!(i, Insn::Invoke(InvokeKind::Special, index)
                if result.class().pool.method_ref_at(*index)
                    .map(|(_, n, _)| n == "§ensureLoaded_b")
                    .unwrap_or(false))
        })
        .expect("loader call");
    let first_store = insns
        .iter()
        .position(|i| matches!(i, Insn::PutField(_)))
        .expect("field store");
    assert!(load_call < first_store);
    // field and shadow
    let stores = insns.iter().filter(|i| matches!(i, Insn::PutField(_))).count();
    assert_eq!(stores, 2);
}

// Final lazy fields keep their getter but get no setter, and lose the final
// flag so the loader may write them.
#[test]
fn final_lazy_field_has_no_setter_and_is_made_mutable() {
    let tags = storage_tags(vec![(
        "test/Entry",
        vec![field_decl("frozen", "Ljava/util/Map;", ACC_FINAL)],
    )]);
    let class = class_from_tags(&tags);
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");
    let class = result.class();

    assert!(class.method("§get_test_Entry_frozen", "()Ljava/util/Map;").is_some());
    assert!(class.method("§set_test_Entry_frozen", "(Ljava/util/Map;)V").is_none());
    assert!(!class.field("frozen").expect("declared field").is_final());
}

// Reconstruction parameters follow the partitioner's order through the whole
// chain: handle, superclass eager fields, own eager fields, marker.
#[test]
fn reconstruction_parameters_follow_hierarchy_order() {
    let tags = storage_tags(vec![
        ("test/Base", vec![field_decl("x", "I", 0)]),
        ("test/Derived", vec![field_decl("b", "Ljava/lang/String;", 0), field_decl("a", "D", 0)]),
    ]);
    let mut class = class_from_tags(&tags);
    class.superclass = Some("test/Base".to_string());
    let gas = GasCostModel::default();
    let result = instrument_class(VerifiedClass::new(class, tags), &gas).expect("instrumentation");

    // own fields ordered by name: a (D) before b (String)
    let descriptor = "(Lterminos/rt/StorageReference;IDLjava/lang/String;Lterminos/rt/Dummy;)V";
    assert!(result.class().has_method("<init>", descriptor));
    // only the root declares the handle
    assert!(result.class().field("§handle").is_none());
}
