//! Field Projection
//!
//! A projection names which proto fields a transposed chunk should
//! materialize. Each field is a path of field numbers from the record root,
//! optionally ending in an existence-only marker: the field is then decoded
//! as present but with a zero-like value of its wire type.
//!
//! An empty projection (no fields) includes everything.

/// Marks the tail of a path as "keep presence, drop the value".
pub const EXISTENCE_ONLY: u32 = u32::MAX;

/// One projected field: a path of field numbers from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    path: Vec<u32>,
}

impl Field {
    pub fn new(path: impl Into<Vec<u32>>) -> Self {
        Self { path: path.into() }
    }

    /// A path whose value is dropped but whose presence survives.
    pub fn existence_only(path: impl Into<Vec<u32>>) -> Self {
        let mut path = path.into();
        path.push(EXISTENCE_ONLY);
        Self { path }
    }

    pub fn path(&self) -> &[u32] {
        &self.path
    }
}

/// A set of projected field paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldProjection {
    fields: Vec<Field>,
}

impl FieldProjection {
    /// Includes every field.
    pub fn all() -> Self {
        Self {
            fields: vec![Field::new(Vec::new())],
        }
    }

    /// Includes only the given fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn add(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// True when the projection keeps everything (some path is empty).
    pub fn includes_all(&self) -> bool {
        self.fields.iter().any(|field| field.path.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_includes_all() {
        assert!(FieldProjection::all().includes_all());
    }

    #[test]
    fn test_specific_fields_do_not_include_all() {
        let projection = FieldProjection::new(vec![Field::new([1]), Field::new([2, 3])]);
        assert!(!projection.includes_all());
        assert_eq!(projection.fields().len(), 2);
    }

    #[test]
    fn test_existence_only_marker() {
        let field = Field::existence_only([4, 2]);
        assert_eq!(field.path(), &[4, 2, EXISTENCE_ONLY]);
    }

    #[test]
    fn test_add() {
        let mut projection = FieldProjection::default();
        projection.add(Field::new([7]));
        assert_eq!(projection.fields().len(), 1);
        assert!(!projection.includes_all());
    }
}
