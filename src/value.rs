use std::fmt;
use std::sync::Arc;

/// Value is the closed set of payloads a field slot can hold.
///
/// Text and byte payloads are wrapped in `Arc`, so cloning a value never
/// copies the underlying buffer.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// The unset state every field starts in.
    #[default]
    None,
    /// A boolean payload.
    Bool(bool),
    /// A signed integer payload.
    Int(i64),
    /// A floating point payload.
    Float(f64),
    /// A shared string payload.
    Text(Arc<str>),
    /// A shared binary payload.
    Bytes(Arc<[u8]>),
}

impl Value {
    /// Build a text value from anything string-like.
    pub fn text(text: impl Into<Arc<str>>) -> Self {
        Value::Text(text.into())
    }

    /// Build a bytes value from anything buffer-like.
    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Value::Bytes(bytes.into())
    }

    /// Returns true if this is the unset state.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// The kind of this value, or `None` for the unset state.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::None => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) => Some(ValueKind::Int),
            Value::Float(_) => Some(ValueKind::Float),
            Value::Text(_) => Some(ValueKind::Text),
            Value::Bytes(_) => Some(ValueKind::Bytes),
        }
    }

    /// Returns true if this value can be stored in a slot declared with
    /// `kind`. The unset state fits every declaration.
    pub fn fits(&self, kind: ValueKind) -> bool {
        match self.kind() {
            None => true,
            Some(own) => own == kind,
        }
    }
}

/// ValueKind is the declared payload kind of a field, checked at the write
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueKind {
    /// Boolean fields.
    Bool,
    /// Signed integer fields.
    Int,
    /// Floating point fields.
    Float,
    /// String fields.
    Text,
    /// Binary fields.
    Bytes,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::Text => write!(f, "text"),
            ValueKind::Bytes => write!(f, "bytes"),
        }
    }
}
