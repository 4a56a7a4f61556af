//! Persistence synthesis for storage classes.
//!
//! A storage class receives shadow `§old_` fields recording the values seen
//! at load time, `§loaded_` flags and `§ensureLoaded_` loaders for its lazy
//! fields, public accessors that funnel every cross-class lazy access through
//! the loader, and the reconstruction constructor that the runtime calls to
//! revive a persisted object from its handle and eager values. The root
//! storage class additionally carries the handle itself and the residence
//! flag.

use super::Instrumentation;
use crate::classfile::defs::access_flags::{
    ACC_FINAL, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_SYNTHETIC, ACC_TRANSIENT,
};
use crate::classfile::defs::CONSTRUCTOR_METHOD_NAME;
use crate::classfile::{
    Code, FieldInfo, IfCond, Insn, InvokeKind, JvmType, MethodInfo, MethodType, SlotType,
};
use crate::consts::{
    getter_name_for, setter_name_for, DUMMY_CLASS, ENSURE_LOADED_PREFIX, HANDLE_FIELD,
    IN_STORE_FIELD, LATEST_LAZY_UPDATE, LATEST_LAZY_UPDATE_OF_FINAL, LOADED_PREFIX, OLD_PREFIX,
    RUNTIME_CLASS, STORAGE_REFERENCE_CLASS,
};
use crate::error::{Error, Result};
use crate::instrument::fields::is_eager;
use crate::verification::FieldDecl;

const LAZY_UPDATE_DESCRIPTOR: &str =
    "(Ljava/lang/Object;Ljava/lang/Class;Ljava/lang/String;Ljava/lang/Class;)Ljava/lang/Object;";

/// Rewrites getfield/putfield on lazy fields of storage classes into calls
/// of the corresponding accessors, so that every such access passes through
/// the on-demand loader of the declaring class. The declared flags decide
/// eligibility the same way for every storage class: transient fields are
/// not persisted and get no accessors, final fields get no setter.
pub fn rewrite_lazy_accesses(scope: &mut Instrumentation<'_>) -> Result<()> {
    let tags = scope.tags;
    for m in 0..scope.class.methods.len() {
        let Some(mut code) = scope.class.methods[m].code.take() else { continue };
        for i in 0..code.insns.len() {
            let (index, is_put) = match code.insns[i] {
                Insn::GetField(index) => (index, false),
                Insn::PutField(index) => (index, true),
                _ => continue,
            };
            let (class, name, descriptor) = {
                let (c, n, d) = scope.class.pool.field_ref_at(index)?;
                (c.to_string(), n.to_string(), d.to_string())
            };
            let Some(decl) = tags
                .storage_classes
                .get(&class)
                .and_then(|fields| fields.iter().find(|f| f.name == name))
            else {
                continue;
            };
            if decl.flags & ACC_TRANSIENT != 0 {
                continue;
            }
            if is_put && decl.flags & ACC_FINAL != 0 {
                continue;
            }
            let ty = JvmType::parse(&descriptor)?;
            if is_eager(&ty) {
                continue;
            }
            let accessor = if is_put {
                let setter = setter_name_for(&class, &name);
                scope.class.pool.method_ref(&class, &setter, &format!("({descriptor})V"))?
            } else {
                let getter = getter_name_for(&class, &name);
                scope.class.pool.method_ref(&class, &getter, &format!("(){descriptor}"))?
            };
            code.insns[i] = Insn::Invoke(InvokeKind::Virtual, accessor);
        }
        scope.class.methods[m].code = Some(code);
    }
    Ok(())
}

/// Adds the persistence machinery to a storage class. Non-storage classes
/// are left untouched.
pub fn synthesize(scope: &mut Instrumentation<'_>) -> Result<()> {
    if !scope.tags.is_storage {
        return Ok(());
    }
    add_shadow_fields(scope)?;
    if scope.partition.super_levels().is_empty() {
        add_root_fields(scope);
    }
    add_reconstruction_constructor(scope)?;
    add_lazy_machinery(scope)?;
    Ok(())
}

/// Shadow fields for every persisted field declared by the class, plus a
/// loaded flag per lazy field. All private synthetic transient, so they are
/// invisible to the partitioning of subclasses.
fn add_shadow_fields(scope: &mut Instrumentation<'_>) -> Result<()> {
    let flags = ACC_PRIVATE | ACC_SYNTHETIC | ACC_TRANSIENT;
    let mut shadows = Vec::new();
    for field in scope.partition.eager_own().iter().chain(scope.partition.lazy.iter()) {
        let ty = JvmType::parse(&field.descriptor)?;
        shadows.push(FieldInfo::new(flags, format!("{OLD_PREFIX}{}", field.name), ty));
    }
    for field in &scope.partition.lazy {
        shadows.push(FieldInfo::new(flags, format!("{LOADED_PREFIX}{}", field.name), JvmType::Boolean));
    }
    scope.class.fields.extend(shadows);
    Ok(())
}

/// The root storage class holds the opaque handle and the residence flag,
/// visible to the loaders of every subclass.
fn add_root_fields(scope: &mut Instrumentation<'_>) {
    let flags = ACC_PROTECTED | ACC_SYNTHETIC | ACC_TRANSIENT;
    scope
        .class
        .fields
        .push(FieldInfo::new(flags, HANDLE_FIELD, JvmType::object(STORAGE_REFERENCE_CLASS)));
    scope.class.fields.push(FieldInfo::new(flags, IN_STORE_FIELD, JvmType::Boolean));
}

/// The constructor the runtime calls to revive a persisted object:
/// `(StorageReference, eager fields superclass-first, Dummy)`. The trailing
/// marker keeps the descriptor disjoint from user constructors; a collision
/// nevertheless aborts instead of silently replacing user code.
fn add_reconstruction_constructor(scope: &mut Instrumentation<'_>) -> Result<()> {
    let own = scope.class.name.clone();

    let mut params = vec![JvmType::object(STORAGE_REFERENCE_CLASS)];
    let mut eager_types = Vec::new();
    for field in scope.partition.all_eager() {
        eager_types.push(JvmType::parse(&field.descriptor)?);
    }
    params.extend(eager_types.iter().cloned());
    params.push(JvmType::object(DUMMY_CLASS));
    let descriptor = MethodType::new(params, JvmType::Void);
    let descriptor_text = descriptor.descriptor();
    if scope.class.has_method(CONSTRUCTOR_METHOD_NAME, &descriptor_text) {
        return Err(Error::illegal_module(format!(
            "{own} already declares a constructor {descriptor_text}"
        )));
    }

    // slot layout: 0 = this, 1 = handle, then the eager values, dummy last
    let mut slots = Vec::with_capacity(eager_types.len());
    let mut next_slot = 2u16;
    for ty in &eager_types {
        slots.push(next_slot);
        next_slot += ty.slot_size();
    }
    let dummy_slot = next_slot;

    let super_eager_count = scope.partition.all_eager().count() - scope.partition.eager_own().len();
    let is_root = scope.partition.super_levels().is_empty();

    let mut code = Code::new();
    code.push(Insn::Load(SlotType::Ref, 0));
    if is_root {
        let superclass = scope.class.superclass.clone().unwrap_or_else(|| "java/lang/Object".to_string());
        let super_init = scope.class.pool.method_ref(&superclass, CONSTRUCTOR_METHOD_NAME, "()V")?;
        code.push(Insn::Invoke(InvokeKind::Special, super_init));
        let handle = scope.class.pool.field_ref(&own, HANDLE_FIELD, &JvmType::object(STORAGE_REFERENCE_CLASS).descriptor())?;
        let in_store = scope.class.pool.field_ref(&own, IN_STORE_FIELD, "Z")?;
        code.extend([
            Insn::Load(SlotType::Ref, 0),
            Insn::Load(SlotType::Ref, 1),
            Insn::PutField(handle),
            Insn::Load(SlotType::Ref, 0),
            Insn::Iconst(1),
            Insn::PutField(in_store),
        ]);
    } else {
        code.push(Insn::Load(SlotType::Ref, 1));
        for (ty, slot) in eager_types.iter().zip(&slots).take(super_eager_count) {
            code.push(Insn::load(ty, *slot));
        }
        code.push(Insn::Load(SlotType::Ref, dummy_slot));
        let mut super_descriptor = format!("(L{STORAGE_REFERENCE_CLASS};");
        for field in scope.partition.super_levels().iter().flat_map(|l| l.eager.iter()) {
            super_descriptor.push_str(&field.descriptor);
        }
        super_descriptor.push_str(&format!("L{DUMMY_CLASS};)V"));
        let superclass = scope.class.superclass.clone().unwrap_or_else(|| "java/lang/Object".to_string());
        let super_init =
            scope.class.pool.method_ref(&superclass, CONSTRUCTOR_METHOD_NAME, &super_descriptor)?;
        code.push(Insn::Invoke(InvokeKind::Special, super_init));
    }

    let own_fields: Vec<FieldDecl> = scope.partition.eager_own().to_vec();
    for (field, (ty, slot)) in own_fields
        .iter()
        .zip(eager_types.iter().zip(&slots).skip(super_eager_count))
    {
        let target = scope.class.pool.field_ref(&own, &field.name, &field.descriptor)?;
        let shadow =
            scope.class.pool.field_ref(&own, &format!("{OLD_PREFIX}{}", field.name), &field.descriptor)?;
        code.extend([
            Insn::Load(SlotType::Ref, 0),
            Insn::load(ty, *slot),
            Insn::PutField(target),
            Insn::Load(SlotType::Ref, 0),
            Insn::load(ty, *slot),
            Insn::PutField(shadow),
        ]);
    }
    code.push(Insn::Return(None));

    scope.class.methods.push(MethodInfo::new(
        ACC_PUBLIC | ACC_SYNTHETIC,
        CONSTRUCTOR_METHOD_NAME,
        descriptor,
        code,
    ));
    Ok(())
}

/// Per lazy field: drop the final flag (the loader writes the field after
/// construction), then synthesize the loader, the getter and, for mutable
/// fields, the setter.
fn add_lazy_machinery(scope: &mut Instrumentation<'_>) -> Result<()> {
    let lazy: Vec<FieldDecl> = scope.partition.lazy.clone();
    for field in &lazy {
        if let Some(declared) = scope.class.field_mut(&field.name) {
            declared.make_mutable();
        }
        add_loader(scope, field)?;
        add_getter(scope, field)?;
        if field.flags & ACC_FINAL == 0 {
            add_setter(scope, field)?;
        }
    }
    Ok(())
}

/// The class constant naming a lazy field's type: a plain internal name for
/// object types, the array descriptor for arrays.
fn type_class_name(descriptor: &str) -> Result<String> {
    match JvmType::parse(descriptor)? {
        JvmType::Object(name) => Ok(name),
        ty @ JvmType::Array(_) => Ok(ty.descriptor()),
        other => Err(Error::illegal_module(format!("lazy field of non-reference type {other}"))),
    }
}

/// `§ensureLoaded_<f>`: if the object is resident and the field was not
/// fetched yet, mark it loaded, fetch the latest persisted value through the
/// runtime and store it into both the field and its shadow.
fn add_loader(scope: &mut Instrumentation<'_>, field: &FieldDecl) -> Result<()> {
    let own = scope.class.name.clone();
    let root = scope
        .partition
        .levels
        .first()
        .map(|l| l.class_name.clone())
        .unwrap_or_else(|| own.clone());
    let fetch_method = if field.flags & ACC_FINAL != 0 {
        LATEST_LAZY_UPDATE_OF_FINAL
    } else {
        LATEST_LAZY_UPDATE
    };

    let pool = &mut scope.class.pool;
    let in_store = pool.field_ref(&root, IN_STORE_FIELD, "Z")?;
    let loaded = pool.field_ref(&own, &format!("{LOADED_PREFIX}{}", field.name), "Z")?;
    let target = pool.field_ref(&own, &field.name, &field.descriptor)?;
    let shadow = pool.field_ref(&own, &format!("{OLD_PREFIX}{}", field.name), &field.descriptor)?;
    let own_class = pool.class(&own)?;
    let field_name = pool.string(&field.name)?;
    let field_class = {
        let name = type_class_name(&field.descriptor)?;
        pool.class(&name)?
    };
    let fetch = pool.method_ref(RUNTIME_CLASS, fetch_method, LAZY_UPDATE_DESCRIPTOR)?;

    let mut code = Code::new();
    let done = code.fresh_label();
    code.extend([
        Insn::Load(SlotType::Ref, 0),
        Insn::GetField(in_store),
        Insn::If(IfCond::Eq, done),
        Insn::Load(SlotType::Ref, 0),
        Insn::GetField(loaded),
        Insn::If(IfCond::Ne, done),
        Insn::Load(SlotType::Ref, 0),
        Insn::Dup,
        Insn::Iconst(1),
        Insn::PutField(loaded),
        // stack: [this]; the fetch needs (this, class, name, type)
        Insn::Dup,
        Insn::Dup,
        Insn::Ldc(own_class),
        Insn::Ldc(field_name),
        Insn::Ldc(field_class),
        Insn::Invoke(InvokeKind::Static, fetch),
        Insn::Checkcast(field_class),
        Insn::DupX1,
        Insn::PutField(target),
        Insn::PutField(shadow),
        Insn::Label(done),
        Insn::Return(None),
    ]);

    scope.class.methods.push(MethodInfo::new(
        ACC_PRIVATE | ACC_SYNTHETIC,
        format!("{ENSURE_LOADED_PREFIX}{}", field.name),
        MethodType::parse("()V")?,
        code,
    ));
    Ok(())
}

fn add_getter(scope: &mut Instrumentation<'_>, field: &FieldDecl) -> Result<()> {
    let own = scope.class.name.clone();
    let loader = scope.class.pool.method_ref(
        &own,
        &format!("{ENSURE_LOADED_PREFIX}{}", field.name),
        "()V",
    )?;
    let target = scope.class.pool.field_ref(&own, &field.name, &field.descriptor)?;

    let mut code = Code::new();
    code.extend([
        Insn::Load(SlotType::Ref, 0),
        Insn::Invoke(InvokeKind::Special, loader),
        Insn::Load(SlotType::Ref, 0),
        Insn::GetField(target),
        Insn::Return(Some(SlotType::Ref)),
    ]);

    let descriptor = MethodType::new(Vec::new(), JvmType::parse(&field.descriptor)?);
    scope.class.methods.push(MethodInfo::new(
        ACC_PUBLIC | ACC_FINAL | ACC_SYNTHETIC,
        getter_name_for(&own, &field.name),
        descriptor,
        code,
    ));
    Ok(())
}

/// The setter loads first, like the getter; the loader's guards make that a
/// no-op once the field is loaded. The assigned value then lands in both the
/// field and its shadow.
fn add_setter(scope: &mut Instrumentation<'_>, field: &FieldDecl) -> Result<()> {
    let own = scope.class.name.clone();
    let loader = scope.class.pool.method_ref(
        &own,
        &format!("{ENSURE_LOADED_PREFIX}{}", field.name),
        "()V",
    )?;
    let target = scope.class.pool.field_ref(&own, &field.name, &field.descriptor)?;
    let shadow =
        scope.class.pool.field_ref(&own, &format!("{OLD_PREFIX}{}", field.name), &field.descriptor)?;

    let mut code = Code::new();
    code.extend([
        Insn::Load(SlotType::Ref, 0),
        Insn::Invoke(InvokeKind::Special, loader),
        Insn::Load(SlotType::Ref, 0),
        Insn::Load(SlotType::Ref, 1),
        Insn::PutField(target),
        Insn::Load(SlotType::Ref, 0),
        Insn::Load(SlotType::Ref, 1),
        Insn::PutField(shadow),
        Insn::Return(None),
    ]);

    let param = JvmType::parse(&field.descriptor)?;
    scope.class.methods.push(MethodInfo::new(
        ACC_PUBLIC | ACC_FINAL | ACC_SYNTHETIC,
        setter_name_for(&own, &field.name),
        MethodType::new(vec![param], JvmType::Void),
        code,
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::defs::access_flags::ACC_STATIC;
    use crate::classfile::ClassFile;
    use crate::config::GasCostModel;
    use crate::verification::{ClassFields, ClassTags};

    fn storage_tags(levels: Vec<(&str, Vec<FieldDecl>)>) -> ClassTags {
        let mut tags = ClassTags { is_storage: true, ..Default::default() };
        for (name, fields) in levels {
            tags.storage_classes.insert(name.to_string(), fields.clone());
            tags.hierarchy.push(ClassFields { class_name: name.to_string(), fields });
        }
        tags
    }

    fn decl(name: &str, descriptor: &str, flags: u16) -> FieldDecl {
        FieldDecl { name: name.to_string(), descriptor: descriptor.to_string(), flags }
    }

    fn declared_class(tags: &ClassTags) -> ClassFile {
        let level = tags.hierarchy.last().unwrap();
        let mut class = ClassFile::new(level.class_name.clone(), "java/lang/Object");
        for field in &level.fields {
            class.fields.push(FieldInfo::new(
                field.flags,
                field.name.clone(),
                JvmType::parse(&field.descriptor).unwrap(),
            ));
        }
        class
    }

    #[test]
    fn test_shadow_fields_and_loaded_flags() {
        let tags = storage_tags(vec![(
            "test/Token",
            vec![
                decl("amount", "I", 0),
                decl("name", "Ljava/lang/String;", 0),
                decl("holders", "Ljava/util/List;", ACC_FINAL),
            ],
        )]);
        let gas = GasCostModel::default();
        let mut scope = Instrumentation::new(declared_class(&tags), &tags, &gas).unwrap();
        synthesize(&mut scope).unwrap();

        for shadow in ["§old_amount", "§old_name", "§old_holders", "§loaded_holders"] {
            let field = scope.class.field(shadow).unwrap_or_else(|| panic!("missing {shadow}"));
            assert!(field.is_transient());
        }
        // the loader writes the field after construction
        assert!(!scope.class.field("holders").unwrap().is_final());
        // root class carries the handle
        assert!(scope.class.field("§handle").is_some());
        assert!(scope.class.field("§inStore").is_some());
    }

    #[test]
    fn test_reconstruction_constructor_signature_and_body() {
        let tags = storage_tags(vec![
            ("test/Base", vec![decl("x", "I", 0)]),
            ("test/Derived", vec![decl("b", "Ljava/lang/String;", 0), decl("a", "D", 0)]),
        ]);
        let gas = GasCostModel::default();
        let mut class = declared_class(&tags);
        class.name = "test/Derived".to_string();
        class.superclass = Some("test/Base".to_string());
        let mut scope = Instrumentation::new(class, &tags, &gas).unwrap();
        synthesize(&mut scope).unwrap();

        // handle, super's x, own (a, D) then (b, String) in name order, dummy
        let descriptor = "(Lterminos/rt/StorageReference;IDLjava/lang/String;Lterminos/rt/Dummy;)V";
        let ctor = scope.class.method("<init>", descriptor).expect("reconstruction constructor");
        let code = ctor.code.as_ref().unwrap();
        // the super call passes handle, x and the dummy through
        let super_call = code.insns.iter().find_map(|i| match i {
            Insn::Invoke(InvokeKind::Special, index) => {
                scope.class.pool.method_ref_at(*index).ok()
            }
            _ => None,
        });
        assert_eq!(
            super_call,
            Some((
                "test/Base",
                "<init>",
                "(Lterminos/rt/StorageReference;ILterminos/rt/Dummy;)V"
            ))
        );
        // non-root classes do not re-declare the handle
        assert!(scope.class.field("§handle").is_none());
    }

    #[test]
    fn test_constructor_collision_is_rejected() {
        let tags = storage_tags(vec![("test/Clash", vec![decl("v", "I", 0)])]);
        let gas = GasCostModel::default();
        let mut class = declared_class(&tags);
        let mut code = Code::new();
        code.push(Insn::Return(None));
        class.methods.push(MethodInfo::new(
            ACC_PUBLIC,
            "<init>",
            MethodType::parse("(Lterminos/rt/StorageReference;ILterminos/rt/Dummy;)V").unwrap(),
            code,
        ));
        let mut scope = Instrumentation::new(class, &tags, &gas).unwrap();
        let err = synthesize(&mut scope).unwrap_err();
        assert!(matches!(err, Error::IllegalModule { .. }));
    }

    #[test]
    fn test_lazy_accessors_and_loader() {
        let tags = storage_tags(vec![(
            "test/Box",
            vec![decl("items", "Ljava/util/List;", 0), decl("frozen", "Ljava/util/Map;", ACC_FINAL)],
        )]);
        let gas = GasCostModel::default();
        let mut scope = Instrumentation::new(declared_class(&tags), &tags, &gas).unwrap();
        synthesize(&mut scope).unwrap();

        assert!(scope.class.method("§get_test_Box_items", "()Ljava/util/List;").is_some());
        assert!(scope.class.method("§set_test_Box_items", "(Ljava/util/List;)V").is_some());
        assert!(scope.class.method("§get_test_Box_frozen", "()Ljava/util/Map;").is_some());
        // final fields get no setter
        assert!(scope.class.method("§set_test_Box_frozen", "(Ljava/util/Map;)V").is_none());

        let loader = scope.class.method("§ensureLoaded_frozen", "()V").unwrap();
        let code = loader.code.as_ref().unwrap();
        let fetch = code.insns.iter().find_map(|i| match i {
            Insn::Invoke(InvokeKind::Static, index) => scope.class.pool.method_ref_at(*index).ok(),
            _ => None,
        });
        let (class, name, _) = fetch.expect("loader fetches through the runtime");
        assert_eq!(class, RUNTIME_CLASS);
        assert_eq!(name, LATEST_LAZY_UPDATE_OF_FINAL);
    }

    #[test]
    fn test_lazy_access_rewriting() {
        let tags = storage_tags(vec![(
            "test/Box",
            vec![decl("items", "Ljava/util/List;", 0)],
        )]);
        let gas = GasCostModel::default();
        let mut class = declared_class(&tags);
        let target = class.pool.field_ref("test/Box", "items", "Ljava/util/List;").unwrap();
        let mut code = Code::new();
        code.extend([
            Insn::Load(SlotType::Ref, 0),
            Insn::GetField(target),
            Insn::Return(Some(SlotType::Ref)),
        ]);
        class.methods.push(MethodInfo::new(
            ACC_PUBLIC | ACC_STATIC,
            "peek",
            MethodType::parse("(Ltest/Box;)Ljava/util/List;").unwrap(),
            code,
        ));
        let mut scope = Instrumentation::new(class, &tags, &gas).unwrap();
        rewrite_lazy_accesses(&mut scope).unwrap();

        let code = scope.class.methods[0].code.as_ref().unwrap();
        let rewritten = code.insns.iter().find_map(|i| match i {
            Insn::Invoke(InvokeKind::Virtual, index) => scope.class.pool.method_ref_at(*index).ok(),
            _ => None,
        });
        assert_eq!(rewritten, Some(("test/Box", "§get_test_Box_items", "()Ljava/util/List;")));
        assert!(!code.insns.iter().any(|i| matches!(i, Insn::GetField(_))));
    }

    #[test]
    fn test_transient_lazy_fields_keep_plain_accesses() {
        // the declaring class synthesizes no accessor for a transient field,
        // so accesses from other classes must stay plain field accesses
        let declaring_tags = storage_tags(vec![(
            "test/A",
            vec![decl("t", "Ljava/util/LinkedList;", ACC_TRANSIENT)],
        )]);
        let gas = GasCostModel::default();
        let mut declaring =
            Instrumentation::new(declared_class(&declaring_tags), &declaring_tags, &gas).unwrap();
        synthesize(&mut declaring).unwrap();
        assert!(declaring.class.method("§get_test_A_t", "()Ljava/util/LinkedList;").is_none());

        let mut reader = ClassFile::new("test/Reader", "java/lang/Object");
        let target = reader.pool.field_ref("test/A", "t", "Ljava/util/LinkedList;").unwrap();
        let mut code = Code::new();
        code.extend([
            Insn::Load(SlotType::Ref, 0),
            Insn::GetField(target),
            Insn::Return(Some(SlotType::Ref)),
        ]);
        reader.methods.push(MethodInfo::new(
            ACC_PUBLIC | ACC_STATIC,
            "peek",
            MethodType::parse("(Ltest/A;)Ljava/util/LinkedList;").unwrap(),
            code,
        ));
        let reader_tags = ClassTags {
            storage_classes: declaring_tags.storage_classes.clone(),
            ..Default::default()
        };
        let mut scope = Instrumentation::new(reader, &reader_tags, &gas).unwrap();
        rewrite_lazy_accesses(&mut scope).unwrap();

        let code = scope.class.methods[0].code.as_ref().unwrap();
        assert!(code.insns.contains(&Insn::GetField(target)));
        assert!(!code.insns.iter().any(|i| matches!(i, Insn::Invoke(..))));
    }
}
