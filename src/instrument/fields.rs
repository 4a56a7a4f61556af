//! Eager/lazy partitioning of persisted fields.
//!
//! The partition fixes the positional contract of the reconstruction
//! constructor: eager fields are ordered superclass-first, and inside each
//! class by name and then by descriptor text, so that the synthesized
//! constructor and the runtime agree on parameter positions without any
//! further negotiation.

use crate::classfile::defs::access_flags::{ACC_STATIC, ACC_TRANSIENT};
use crate::classfile::descriptor::JvmType;
use crate::consts::EAGER_VALUE_TYPES;
use crate::error::Result;
use crate::verification::{ClassTags, FieldDecl};

/// True if values of this type are stored together with their owning object.
/// Primitives and a closed set of immutable library value types qualify;
/// everything else, arrays included, is loaded lazily through a handle.
pub fn is_eager(ty: &JvmType) -> bool {
    match ty {
        JvmType::Object(name) => EAGER_VALUE_TYPES.contains(name.as_str()),
        JvmType::Array(_) | JvmType::Void => false,
        _ => true,
    }
}

/// The eager fields declared at one level of the storage superclass chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFields {
    pub class_name: String,
    pub eager: Vec<FieldDecl>,
}

/// The partitioned persisted fields of one storage class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPartition {
    /// Eager fields per hierarchy level, root storage class first and the
    /// class itself last. Empty for non-storage classes.
    pub levels: Vec<LevelFields>,
    /// Lazy fields declared by the class itself, in (name, descriptor) order.
    pub lazy: Vec<FieldDecl>,
}

impl FieldPartition {
    /// The eager fields declared by the class itself.
    pub fn eager_own(&self) -> &[FieldDecl] {
        self.levels.last().map(|level| level.eager.as_slice()).unwrap_or(&[])
    }

    /// The hierarchy levels above the class itself, root first.
    pub fn super_levels(&self) -> &[LevelFields] {
        match self.levels.len() {
            0 => &[],
            n => &self.levels[..n - 1],
        }
    }

    /// All eager fields in constructor-parameter order.
    pub fn all_eager(&self) -> impl Iterator<Item = &FieldDecl> {
        self.levels.iter().flat_map(|level| level.eager.iter())
    }

    /// True if the class and its chain persist no fields at all.
    pub fn is_empty(&self) -> bool {
        self.lazy.is_empty() && self.levels.iter().all(|level| level.eager.is_empty())
    }
}

fn qualifies(field: &FieldDecl) -> bool {
    field.flags & (ACC_STATIC | ACC_TRANSIENT) == 0
}

fn ordered(mut fields: Vec<FieldDecl>) -> Vec<FieldDecl> {
    fields.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.descriptor.cmp(&b.descriptor)));
    fields
}

/// Partitions the persisted fields reported in the verifier's hierarchy.
pub fn partition(tags: &ClassTags) -> Result<FieldPartition> {
    let mut levels = Vec::with_capacity(tags.hierarchy.len());
    let mut lazy = Vec::new();
    for (i, level) in tags.hierarchy.iter().enumerate() {
        let mut eager = Vec::new();
        let mut lazy_here = Vec::new();
        for field in level.fields.iter().filter(|f| qualifies(f)) {
            let ty = JvmType::parse(&field.descriptor)?;
            if is_eager(&ty) {
                eager.push(field.clone());
            } else {
                lazy_here.push(field.clone());
            }
        }
        levels.push(LevelFields { class_name: level.class_name.clone(), eager: ordered(eager) });
        if i == tags.hierarchy.len() - 1 {
            lazy = ordered(lazy_here);
        }
    }
    Ok(FieldPartition { levels, lazy })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::defs::access_flags::*;
    use crate::verification::ClassFields;

    fn decl(name: &str, descriptor: &str, flags: u16) -> FieldDecl {
        FieldDecl { name: name.to_string(), descriptor: descriptor.to_string(), flags }
    }

    #[test]
    fn test_split_and_ordering() {
        let tags = ClassTags {
            hierarchy: vec![ClassFields {
                class_name: "test/C".to_string(),
                fields: vec![
                    decl("b", "Ljava/lang/String;", 0),
                    decl("a", "I", 0),
                    decl("a", "D", 0),
                    decl("items", "[I", 0),
                    decl("owner", "test/Other", ACC_STATIC),
                ],
            }],
            ..Default::default()
        };
        // the static field's bad descriptor is never parsed: it is filtered first
        let partition = partition(&tags).unwrap();
        let names: Vec<_> = partition.eager_own().iter().map(|f| (&f.name, &f.descriptor)).collect();
        assert_eq!(
            names,
            vec![
                (&"a".to_string(), &"D".to_string()),
                (&"a".to_string(), &"I".to_string()),
                (&"b".to_string(), &"Ljava/lang/String;".to_string()),
            ]
        );
        assert_eq!(partition.lazy.len(), 1);
        assert_eq!(partition.lazy[0].name, "items");
    }

    #[test]
    fn test_superclass_fields_come_first() {
        let tags = ClassTags {
            hierarchy: vec![
                ClassFields {
                    class_name: "test/Base".to_string(),
                    fields: vec![decl("x", "I", 0)],
                },
                ClassFields {
                    class_name: "test/Derived".to_string(),
                    fields: vec![decl("y", "J", 0), decl("cache", "Ljava/util/List;", ACC_TRANSIENT)],
                },
            ],
            ..Default::default()
        };
        let partition = partition(&tags).unwrap();
        let all: Vec<_> = partition.all_eager().map(|f| f.name.as_str()).collect();
        assert_eq!(all, vec!["x", "y"]);
        assert_eq!(partition.super_levels().len(), 1);
        assert!(partition.lazy.is_empty());
    }

    #[test]
    fn test_empty_hierarchy_is_empty_partition() {
        let partition = partition(&ClassTags::default()).unwrap();
        assert!(partition.is_empty());
        assert!(partition.eager_own().is_empty());
    }

    #[test]
    fn test_eager_type_table() {
        assert!(is_eager(&JvmType::Int));
        assert!(is_eager(&JvmType::object("java/lang/String")));
        assert!(is_eager(&JvmType::object("java/math/BigInteger")));
        assert!(!is_eager(&JvmType::object("java/util/ArrayList")));
        assert!(!is_eager(&JvmType::parse("[I").unwrap()));
    }
}
