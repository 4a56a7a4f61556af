//! Typed field and method descriptors.
//!
//! The instrumentation passes must walk parameter lists, compute slot sizes
//! and build new signatures, so descriptors are parsed into a typed form
//! instead of being handled as raw strings.

use crate::error::{Error, Result};
use std::fmt;

/// A JVM value type, as it appears in a field or method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JvmType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    /// A class type; the name is in internal form, e.g. `java/lang/String`.
    Object(String),
    Array(Box<JvmType>),
}

impl JvmType {
    /// Shorthand for an object type with the given internal name.
    pub fn object(name: impl Into<String>) -> Self {
        JvmType::Object(name.into())
    }

    /// Parses a single field descriptor.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut chars = descriptor.chars().peekable();
        let ty = Self::read(&mut chars)?;
        if chars.next().is_some() {
            return Err(Error::illegal_module(format!("trailing characters in descriptor '{descriptor}'")));
        }
        Ok(ty)
    }

    fn read(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Self> {
        match chars.next() {
            Some('Z') => Ok(JvmType::Boolean),
            Some('B') => Ok(JvmType::Byte),
            Some('C') => Ok(JvmType::Char),
            Some('S') => Ok(JvmType::Short),
            Some('I') => Ok(JvmType::Int),
            Some('J') => Ok(JvmType::Long),
            Some('F') => Ok(JvmType::Float),
            Some('D') => Ok(JvmType::Double),
            Some('V') => Ok(JvmType::Void),
            Some('[') => Ok(JvmType::Array(Box::new(Self::read(chars)?))),
            Some('L') => {
                let mut name = String::new();
                for c in chars.by_ref() {
                    if c == ';' {
                        return Ok(JvmType::Object(name));
                    }
                    name.push(c);
                }
                Err(Error::illegal_module("unterminated class type in descriptor"))
            }
            other => Err(Error::illegal_module(format!("unexpected character {other:?} in descriptor"))),
        }
    }

    /// The number of operand stack or local variable slots taken by a value
    /// of this type.
    pub fn slot_size(&self) -> u16 {
        match self {
            JvmType::Long | JvmType::Double => 2,
            JvmType::Void => 0,
            _ => 1,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, JvmType::Object(_) | JvmType::Array(_))
    }

    /// The internal class name referenced by this type, if any.
    pub fn class_name(&self) -> Option<&str> {
        match self {
            JvmType::Object(name) => Some(name),
            _ => None,
        }
    }

    /// The descriptor of this type, e.g. `Ljava/lang/String;` or `I`.
    pub fn descriptor(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmType::Boolean => write!(f, "Z"),
            JvmType::Byte => write!(f, "B"),
            JvmType::Char => write!(f, "C"),
            JvmType::Short => write!(f, "S"),
            JvmType::Int => write!(f, "I"),
            JvmType::Long => write!(f, "J"),
            JvmType::Float => write!(f, "F"),
            JvmType::Double => write!(f, "D"),
            JvmType::Void => write!(f, "V"),
            JvmType::Object(name) => write!(f, "L{name};"),
            JvmType::Array(inner) => write!(f, "[{inner}"),
        }
    }
}

/// The parsed form of a method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodType {
    pub params: Vec<JvmType>,
    pub ret: JvmType,
}

impl MethodType {
    pub fn new(params: Vec<JvmType>, ret: JvmType) -> Self {
        Self { params, ret }
    }

    /// Parses a method descriptor such as `(ILjava/lang/String;)V`.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut chars = descriptor.chars().peekable();
        if chars.next() != Some('(') {
            return Err(Error::illegal_module(format!("method descriptor '{descriptor}' does not start with '('")));
        }
        let mut params = Vec::new();
        loop {
            match chars.peek() {
                Some(')') => {
                    chars.next();
                    break;
                }
                Some(_) => params.push(JvmType::read(&mut chars)?),
                None => return Err(Error::illegal_module(format!("unterminated method descriptor '{descriptor}'"))),
            }
        }
        let ret = JvmType::read(&mut chars)?;
        if chars.next().is_some() {
            return Err(Error::illegal_module(format!("trailing characters in method descriptor '{descriptor}'")));
        }
        Ok(Self { params, ret })
    }

    /// The descriptor of this method type.
    pub fn descriptor(&self) -> String {
        let mut d = String::from("(");
        for p in &self.params {
            d.push_str(&p.descriptor());
        }
        d.push(')');
        d.push_str(&self.ret.descriptor());
        d
    }

    /// The number of local variable slots taken by the parameters, not
    /// counting any implicit receiver.
    pub fn arg_slots(&self) -> u16 {
        self.params.iter().map(JvmType::slot_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_descriptor_round_trip() {
        for desc in ["I", "J", "Z", "Ljava/lang/String;", "[[D", "[Ljava/math/BigInteger;"] {
            assert_eq!(JvmType::parse(desc).unwrap().descriptor(), desc);
        }
    }

    #[test]
    fn test_method_descriptor_round_trip() {
        let mt = MethodType::parse("(ILjava/lang/String;[J)Lterminos/rt/Dummy;").unwrap();
        assert_eq!(mt.params.len(), 3);
        assert_eq!(mt.arg_slots(), 3);
        assert_eq!(mt.descriptor(), "(ILjava/lang/String;[J)Lterminos/rt/Dummy;");
    }

    #[test]
    fn test_malformed_descriptors_are_rejected() {
        assert!(JvmType::parse("Ljava/lang/String").is_err());
        assert!(JvmType::parse("II").is_err());
        assert!(MethodType::parse("I)V").is_err());
        assert!(MethodType::parse("(I").is_err());
    }

    #[test]
    fn test_slot_sizes() {
        assert_eq!(JvmType::Long.slot_size(), 2);
        assert_eq!(JvmType::Double.slot_size(), 2);
        assert_eq!(JvmType::object("java/lang/Object").slot_size(), 1);
        assert_eq!(MethodType::parse("(JID)V").unwrap().arg_slots(), 5);
    }
}
