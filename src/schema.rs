use std::sync::Arc;

use crate::ValueKind;

/// AccessMode declares what a container may do with one of its own fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessMode {
    /// The field can be read locally but only changed by propagation.
    ReadOnly,
    /// The field can be read and written locally.
    ReadWrite,
}

/// FieldDef is the static description of one field: its name, its access
/// mode, and the payload kind its slot accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FieldDef {
    /// The field name, unique within its schema.
    pub name: Arc<str>,
    /// What the owning container may do with the field.
    pub mode: AccessMode,
    /// The payload kind the slot accepts.
    pub kind: ValueKind,
}

impl FieldDef {
    /// A field the owning container can read and write.
    pub fn read_write(name: impl Into<Arc<str>>, kind: ValueKind) -> Self {
        FieldDef {
            name: name.into(),
            mode: AccessMode::ReadWrite,
            kind,
        }
    }

    /// A field the owning container can only read.
    pub fn read_only(name: impl Into<Arc<str>>, kind: ValueKind) -> Self {
        FieldDef {
            name: name.into(),
            mode: AccessMode::ReadOnly,
            kind,
        }
    }

    /// Returns true if the owning container may read this field.
    pub fn is_readable(&self) -> bool {
        matches!(self.mode, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    /// Returns true if the owning container may write this field.
    pub fn is_writable(&self) -> bool {
        matches!(self.mode, AccessMode::ReadWrite)
    }
}

/// Schema is an ordered, immutable list of field definitions, shared by
/// cheap clone across every container built from it.
///
/// Field order is load-bearing: it is the global lock order used when a
/// batch of field locks must be taken at once. Name uniqueness is assumed,
/// not enforced. Lookup is linear; schemas are small.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Schema(Arc<Vec<FieldDef>>);

impl Schema {
    /// New schema from a list of field definitions.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Schema(Arc::new(fields))
    }

    /// Look up a field definition by name.
    pub fn lookup(&self, name: &str) -> Option<&FieldDef> {
        self.0.iter().find(|field| &*field.name == name)
    }

    /// The positional index of a field, which is also its slot index.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|field| &*field.name == name)
    }

    /// The field definition at a positional index.
    pub fn get(&self, index: usize) -> Option<&FieldDef> {
        self.0.get(index)
    }

    /// Returns true if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the field definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.0.iter()
    }

    /// Iterate over the readable field definitions in declaration order.
    pub fn readable(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.0.iter().filter(|field| field.is_readable())
    }

    /// Iterate over the writable field definitions in declaration order.
    pub fn writable(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.0.iter().filter(|field| field.is_writable())
    }
}

impl FromIterator<FieldDef> for Schema {
    fn from_iter<T: IntoIterator<Item = FieldDef>>(iter: T) -> Self {
        Schema(Arc::new(iter.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(vec![
            FieldDef::read_write("name", ValueKind::Text),
            FieldDef::read_only("serial", ValueKind::Int),
            FieldDef::read_write("notes", ValueKind::Text),
        ])
    }

    #[test]
    fn test_lookup_and_index_agree() {
        let schema = sample();
        assert_eq!(schema.index_of("serial"), Some(1));
        let def = schema.lookup("serial").unwrap();
        assert_eq!(def.kind, ValueKind::Int);
        assert!(!def.is_writable());
        assert!(schema.lookup("missing").is_none());
        assert_eq!(schema.index_of("missing"), None);
    }

    #[test]
    fn test_filters_preserve_declaration_order() {
        let schema = sample();
        let writable: Vec<_> = schema.writable().map(|f| &*f.name).collect();
        assert_eq!(writable, ["name", "notes"]);
        let readable: Vec<_> = schema.readable().map(|f| &*f.name).collect();
        assert_eq!(readable, ["name", "serial", "notes"]);
    }

    #[test]
    fn test_clone_is_shallow() {
        let schema = sample();
        let copy = schema.clone();
        assert!(Arc::ptr_eq(&schema.0, &copy.0));
    }
}
