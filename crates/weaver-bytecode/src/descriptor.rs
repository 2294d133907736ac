//! Type and method descriptors
//!
//! Implements the compact JVM-style descriptor grammar: single letters for
//! primitives and void, `L<name>;` for reference types, `[` prefixes for
//! arrays, and `(<params>)<ret>` for method shapes. Encoding and parsing
//! round-trip exactly.

use std::fmt;
use thiserror::Error;

/// Errors raised while parsing a descriptor string
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// The descriptor ended before a complete type was read
    #[error("Truncated descriptor: {0:?}")]
    Truncated(String),

    /// An unknown type code was encountered
    #[error("Unknown type code {code:?} in descriptor {input:?}")]
    UnknownCode {
        /// The offending character
        code: char,
        /// The full input string
        input: String,
    },

    /// A method descriptor was missing its parenthesized parameter list
    #[error("Missing parameter list in method descriptor {0:?}")]
    MissingParams(String),

    /// Trailing characters were left after a complete type was parsed
    #[error("Trailing characters in descriptor {0:?}")]
    TrailingInput(String),

    /// `void` appeared where a value type is required
    #[error("Void is not allowed as a parameter type in {0:?}")]
    VoidParameter(String),
}

/// A field or value type in descriptor form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDesc {
    /// No value (`V`), only valid as a return type
    Void,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `S`
    Short,
    /// `C`
    Char,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `L<internal name>;`
    Object(String),
    /// `[<element>`
    Array(Box<TypeDesc>),
}

impl TypeDesc {
    /// Parse a single type descriptor, rejecting trailing input.
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let mut chars = input.char_indices().peekable();
        let ty = Self::parse_from(input, &mut chars)?;
        if chars.next().is_some() {
            return Err(DescriptorError::TrailingInput(input.to_string()));
        }
        Ok(ty)
    }

    fn parse_from(
        input: &str,
        chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    ) -> Result<Self, DescriptorError> {
        let (_, code) = chars
            .next()
            .ok_or_else(|| DescriptorError::Truncated(input.to_string()))?;
        match code {
            'V' => Ok(TypeDesc::Void),
            'Z' => Ok(TypeDesc::Boolean),
            'B' => Ok(TypeDesc::Byte),
            'S' => Ok(TypeDesc::Short),
            'C' => Ok(TypeDesc::Char),
            'I' => Ok(TypeDesc::Int),
            'J' => Ok(TypeDesc::Long),
            'F' => Ok(TypeDesc::Float),
            'D' => Ok(TypeDesc::Double),
            '[' => Ok(TypeDesc::Array(Box::new(Self::parse_from(input, chars)?))),
            'L' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, ';')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err(DescriptorError::Truncated(input.to_string())),
                    }
                }
                Ok(TypeDesc::Object(name))
            }
            other => Err(DescriptorError::UnknownCode {
                code: other,
                input: input.to_string(),
            }),
        }
    }

    /// Number of local-variable slots a value of this type occupies.
    ///
    /// Longs and doubles take two slots, void none, everything else one.
    pub fn slot_width(&self) -> u16 {
        match self {
            TypeDesc::Void => 0,
            TypeDesc::Long | TypeDesc::Double => 2,
            _ => 1,
        }
    }

    /// Whether this is a reference type (object or array).
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeDesc::Object(_) | TypeDesc::Array(_))
    }

    /// Internal name of the reference wrapper class for a primitive type.
    ///
    /// Reference and array types have no wrapper and return `None`; `Void`
    /// cannot be boxed either.
    pub fn box_owner(&self) -> Option<&'static str> {
        match self {
            TypeDesc::Int => Some("java/lang/Integer"),
            TypeDesc::Float => Some("java/lang/Float"),
            TypeDesc::Long => Some("java/lang/Long"),
            TypeDesc::Double => Some("java/lang/Double"),
            TypeDesc::Boolean => Some("java/lang/Boolean"),
            TypeDesc::Short => Some("java/lang/Short"),
            TypeDesc::Byte => Some("java/lang/Byte"),
            TypeDesc::Char => Some("java/lang/Character"),
            _ => None,
        }
    }

    /// Accessor method on [`Self::box_owner`] that yields the primitive back.
    ///
    /// Symmetric with boxing: whatever wrapper `box_owner` names is the exact
    /// type the unboxing cast targets.
    pub fn unbox_accessor(&self) -> Option<&'static str> {
        match self {
            TypeDesc::Int => Some("intValue"),
            TypeDesc::Float => Some("floatValue"),
            TypeDesc::Long => Some("longValue"),
            TypeDesc::Double => Some("doubleValue"),
            TypeDesc::Boolean => Some("booleanValue"),
            TypeDesc::Short => Some("shortValue"),
            TypeDesc::Byte => Some("byteValue"),
            TypeDesc::Char => Some("charValue"),
            _ => None,
        }
    }
}

impl fmt::Display for TypeDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeDesc::Void => f.write_str("V"),
            TypeDesc::Boolean => f.write_str("Z"),
            TypeDesc::Byte => f.write_str("B"),
            TypeDesc::Short => f.write_str("S"),
            TypeDesc::Char => f.write_str("C"),
            TypeDesc::Int => f.write_str("I"),
            TypeDesc::Long => f.write_str("J"),
            TypeDesc::Float => f.write_str("F"),
            TypeDesc::Double => f.write_str("D"),
            TypeDesc::Object(name) => write!(f, "L{};", name),
            TypeDesc::Array(elem) => write!(f, "[{}", elem),
        }
    }
}

/// A method shape: parameter types plus return type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Parameter types, in declaration order
    pub params: Vec<TypeDesc>,
    /// Return type, possibly [`TypeDesc::Void`]
    pub ret: TypeDesc,
}

impl MethodSig {
    /// Build a signature compositionally from a return type and parameters.
    pub fn new(ret: TypeDesc, params: Vec<TypeDesc>) -> Self {
        Self { params, ret }
    }

    /// Parse a `(<params>)<ret>` method descriptor.
    pub fn parse(input: &str) -> Result<Self, DescriptorError> {
        let rest = input
            .strip_prefix('(')
            .ok_or_else(|| DescriptorError::MissingParams(input.to_string()))?;
        let close = rest
            .find(')')
            .ok_or_else(|| DescriptorError::MissingParams(input.to_string()))?;
        let (param_str, ret_str) = rest.split_at(close);
        let ret = TypeDesc::parse(&ret_str[1..])?;

        let mut params = Vec::new();
        let mut chars = param_str.char_indices().peekable();
        while chars.peek().is_some() {
            let ty = TypeDesc::parse_from(input, &mut chars)?;
            if ty == TypeDesc::Void {
                return Err(DescriptorError::VoidParameter(input.to_string()));
            }
            params.push(ty);
        }
        Ok(Self { params, ret })
    }

    /// Total local-variable slots consumed by the parameters.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(TypeDesc::slot_width).sum()
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.params {
            write!(f, "{}", p)?;
        }
        write!(f, "){}", self.ret)
    }
}

/// A qualified class name in internal (slash-separated) form
///
/// Accepts either `a.b.C` or `a/b/C` on construction and normalizes to the
/// slash form before storage or comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassName(String);

impl ClassName {
    /// Normalize a free-form qualified name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(name.as_ref().replace('.', "/"))
    }

    /// The internal (slash) form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClassName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Identifies one method: owner class, name, and signature
///
/// Identity is structural equality of all three fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Owning class
    pub owner: ClassName,
    /// Method name
    pub name: String,
    /// Parameter/return shape
    pub sig: MethodSig,
}

impl MethodDescriptor {
    /// Build a descriptor from a raw encoded signature string.
    pub fn parse(
        owner: impl AsRef<str>,
        name: impl Into<String>,
        descriptor: &str,
    ) -> Result<Self, DescriptorError> {
        Ok(Self {
            owner: ClassName::new(owner),
            name: name.into(),
            sig: MethodSig::parse(descriptor)?,
        })
    }

    /// Build a descriptor from an already-parsed signature.
    pub fn new(owner: ClassName, name: impl Into<String>, sig: MethodSig) -> Self {
        Self {
            owner,
            name: name.into(),
            sig,
        }
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.sig)
    }
}
