// Common test utilities

use std::sync::Once;
use tolin::classfile::{ClassFile, Code, FieldInfo, Insn, InvokeKind, JvmType, MethodInfo, MethodType};
use tolin::consts::RUNTIME_CLASS;
use tolin::verification::{ClassFields, ClassTags, FieldDecl};

static LOG_INIT: Once = Once::new();

/// Routes `log` output through `RUST_LOG` when debugging a failing test.
pub fn init_logging() {
    LOG_INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// A field declaration as the verifier would report it.
pub fn field_decl(name: &str, descriptor: &str, flags: u16) -> FieldDecl {
    FieldDecl { name: name.to_string(), descriptor: descriptor.to_string(), flags }
}

/// Tags of a storage class with the given superclass chain, root first.
pub fn storage_tags(levels: Vec<(&str, Vec<FieldDecl>)>) -> ClassTags {
    init_logging();
    let mut tags = ClassTags { is_storage: true, ..Default::default() };
    for (name, fields) in levels {
        tags.storage_classes.insert(name.to_string(), fields.clone());
        tags.hierarchy.push(ClassFields { class_name: name.to_string(), fields });
    }
    tags
}

/// A class declaring the fields of the last level of the tagged hierarchy.
pub fn class_from_tags(tags: &ClassTags) -> ClassFile {
    let level = tags.hierarchy.last().expect("tagged hierarchy is empty");
    let mut class = ClassFile::new(level.class_name.clone(), "java/lang/Object");
    for field in &level.fields {
        class.fields.push(FieldInfo::new(
            field.flags,
            field.name.clone(),
            JvmType::parse(&field.descriptor).expect("field descriptor"),
        ));
    }
    class
}

/// Appends a public static method with the given body.
pub fn static_method(class: &mut ClassFile, name: &str, descriptor: &str, insns: Vec<Insn>) {
    use tolin::classfile::defs::access_flags::{ACC_PUBLIC, ACC_STATIC};
    init_logging();
    let mut code = Code::new();
    code.extend(insns);
    class.methods.push(MethodInfo::new(
        ACC_PUBLIC | ACC_STATIC,
        name,
        MethodType::parse(descriptor).expect("method descriptor"),
        code,
    ));
}

/// Sums the CPU and RAM amounts charged through the runtime in one body.
/// Compact entry points carry their amount in the name; the general entry
/// points take it from the constant pushed just before the call.
pub fn charged_amounts(class: &ClassFile, code: &Code) -> (u64, u64) {
    let mut cpu = 0u64;
    let mut ram = 0u64;
    for (i, insn) in code.insns.iter().enumerate() {
        let Insn::Invoke(InvokeKind::Static, index) = insn else { continue };
        let (target, name, _) = class.pool.method_ref_at(*index).expect("method ref");
        if target != RUNTIME_CLASS {
            continue;
        }
        let (bucket, rest) = if let Some(rest) = name.strip_prefix("chargeRam") {
            (&mut ram, rest)
        } else if let Some(rest) = name.strip_prefix("charge") {
            (&mut cpu, rest)
        } else {
            continue;
        };
        if rest.is_empty() {
            *bucket += match code.insns.get(i - 1) {
                Some(Insn::Iconst(v)) => *v as u64,
                Some(Insn::Lconst(v)) => *v as u64,
                other => panic!("charge call without a pushed amount: {other:?}"),
            };
        } else {
            *bucket += rest.parse::<u64>().expect("compact charge amount");
        }
    }
    (cpu, ram)
}
