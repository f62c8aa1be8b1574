use std::fmt;

/// The closed set of types known to the type checker
///
/// There is no subtyping, but [Type::Any] is compatible with every other type. It is used for
/// externally declared symbols whose precise type is never verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Any,
    Bool,
    Int,
    Str,
    Void,
}

impl Type {
    /// Whether a value of type `self` may be used where `other` is expected
    pub fn is_compatible(self, other: Type) -> bool {
        self == other || self == Type::Any || other == Type::Any
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "Any"),
            Type::Bool => write!(f, "Bool"),
            Type::Int => write!(f, "Int"),
            Type::Str => write!(f, "String"),
            Type::Void => write!(f, "Void"),
        }
    }
}
