//! Final assembly of an instrumented class.
//!
//! The rewriting passes renumber locals and splice instructions, so the
//! generic signatures and debug tables carried over from the input would
//! describe a layout that no longer exists. They are dropped here; the
//! writer then recomputes max stack, max locals and stack maps from the
//! final bodies.

use crate::classfile::ClassFile;

/// Strips the metadata invalidated by the rewriting passes.
pub fn strip_stale_metadata(class: &mut ClassFile) {
    class.generic_signature = None;
    for field in &mut class.fields {
        field.generic_signature = None;
    }
    for method in &mut class.methods {
        method.generic_signature = None;
        if let Some(code) = method.code.as_mut() {
            code.line_numbers.clear();
            code.local_variables.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::code::LocalVariable;
    use crate::classfile::defs::access_flags::ACC_PUBLIC;
    use crate::classfile::{Code, FieldInfo, Insn, JvmType, MethodInfo, MethodType};

    #[test]
    fn test_signatures_and_debug_tables_are_dropped() {
        let mut class = ClassFile::new("test/C", "java/lang/Object");
        class.generic_signature = Some("<T:Ljava/lang/Object;>Ljava/lang/Object;".to_string());
        class.source_file = Some("C.java".to_string());
        let mut field = FieldInfo::new(0, "items", JvmType::object("java/util/List"));
        field.generic_signature = Some("Ljava/util/List<Ljava/lang/String;>;".to_string());
        class.fields.push(field);
        let mut code = Code::new();
        code.push(Insn::Return(None));
        code.line_numbers.push((0, 7));
        code.local_variables.push(LocalVariable {
            name: "this".to_string(),
            descriptor: "Ltest/C;".to_string(),
            slot: 0,
        });
        let mut method = MethodInfo::new(ACC_PUBLIC, "run", MethodType::parse("()V").unwrap(), code);
        method.generic_signature = Some("<T:Ljava/lang/Object;>()V".to_string());
        class.methods.push(method);

        strip_stale_metadata(&mut class);

        assert!(class.generic_signature.is_none());
        assert!(class.fields[0].generic_signature.is_none());
        assert!(class.methods[0].generic_signature.is_none());
        let code = class.methods[0].code.as_ref().unwrap();
        assert!(code.line_numbers.is_empty());
        assert!(code.local_variables.is_empty());
        // the source file name is not stale, it survives
        assert_eq!(class.source_file.as_deref(), Some("C.java"));
    }
}
