use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::field::{Field, FieldReference, PropertyKey};
use crate::statement;

/// Foreign key constraint assembled from the fields sharing a constraint name
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Mapping between one entity type and one table.
///
/// Fields are owned by the table and reachable both by column name and by
/// property key. Every mutator updates both views or neither.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    pub auto_increment: bool,
    fields: Vec<Field>,
    by_name: IndexMap<String, usize>,
    by_property: HashMap<PropertyKey, usize>,
    indexes: IndexMap<String, IndexDefinition>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            auto_increment: false,
            fields: Vec::new(),
            by_name: IndexMap::new(),
            by_property: HashMap::new(),
            indexes: IndexMap::new(),
        }
    }

    pub fn with_auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    /// Registry key and SQL table name; fixed at construction
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quoted_name(&self) -> String {
        statement::quote_identifier(&self.name)
    }

    /// Adds a field, rejecting a column name that is already in use
    pub fn add_table_field(&mut self, field: Field) -> Result<()> {
        self.check_name_free(&field)?;
        self.check_property_free(&field)?;
        self.insert_field(field)
    }

    /// Adds a field, rejecting a property key that is already mapped
    pub fn add_property_field(&mut self, field: Field) -> Result<()> {
        self.check_property_free(&field)?;
        self.check_name_free(&field)?;
        self.insert_field(field)
    }

    /// Rejects a column name already in use, or one whose placeholder would
    /// collide with an existing column's (`my col` and `my_col` both bind to
    /// `:my_col`)
    fn check_name_free(&self, field: &Field) -> Result<()> {
        let placeholder = field.placeholder();
        if self.by_name.contains_key(&field.name)
            || self.fields.iter().any(|f| f.placeholder() == placeholder)
        {
            return Err(Error::DuplicateField {
                table: self.name.clone(),
                field: field.name.clone(),
            });
        }
        Ok(())
    }

    fn check_property_free(&self, field: &Field) -> Result<()> {
        if self.by_property.contains_key(&field.property_key) {
            return Err(Error::DuplicateProperty {
                table: self.name.clone(),
                property: field.property_key.to_string(),
            });
        }
        Ok(())
    }

    fn insert_field(&mut self, field: Field) -> Result<()> {
        for (constraint, reference) in field.foreign_keys() {
            self.check_foreign_key(constraint, reference)?;
        }
        let index = self.fields.len();
        self.by_name.insert(field.name.clone(), index);
        self.by_property.insert(field.property_key.clone(), index);
        self.fields.push(field);
        Ok(())
    }

    pub fn get_table_field(&self, name: &str) -> Result<&Field> {
        self.by_name
            .get(name)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| self.field_not_found(name))
    }

    pub fn get_property_field(&self, key: &PropertyKey) -> Result<&Field> {
        self.by_property
            .get(key)
            .map(|&i| &self.fields[i])
            .ok_or_else(|| Error::PropertyNotFound {
                table: self.name.clone(),
                property: key.to_string(),
            })
    }

    pub fn has_table_field(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn has_property_field(&self, key: &PropertyKey) -> bool {
        self.by_property.contains_key(key)
    }

    fn field_not_found(&self, name: &str) -> Error {
        Error::FieldNotFound {
            table: self.name.clone(),
            field: name.to_string(),
        }
    }

    /// Fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn identity_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_identity)
    }

    /// The identity column that receives engine-generated ids, if any
    pub fn autoincrement_field(&self) -> Option<&Field> {
        if !self.auto_increment {
            return None;
        }
        let mut identity = self.identity_fields();
        match (identity.next(), identity.next()) {
            (Some(field), None) if field.is_autoincrement_eligible() => Some(field),
            _ => None,
        }
    }

    /// Marks the field mapped to `key` as part of the primary key
    pub fn set_identity(&mut self, key: &PropertyKey) -> Result<()> {
        let index = self.property_index(key)?;
        self.fields[index].is_identity = true;
        Ok(())
    }

    /// Attaches a foreign key reference to the field mapped to `key`.
    ///
    /// All fields sharing a constraint name must reference the same table.
    pub fn add_foreign_key(
        &mut self,
        key: &PropertyKey,
        constraint: &str,
        reference: FieldReference,
    ) -> Result<()> {
        let index = self.property_index(key)?;
        self.check_foreign_key(constraint, &reference)?;
        self.fields[index].add_foreign_key_field(constraint, reference)
    }

    fn check_foreign_key(&self, constraint: &str, reference: &FieldReference) -> Result<()> {
        let conflicting = self
            .fields
            .iter()
            .filter_map(|f| f.get_foreign_key_field(constraint).ok())
            .find(|existing| existing.table_name != reference.table_name);
        match conflicting {
            Some(existing) => Err(Error::ForeignKeyConflict {
                constraint: constraint.to_string(),
                reason: format!(
                    "table '{}' already references '{}', not '{}'",
                    self.name, existing.table_name, reference.table_name
                ),
            }),
            None => Ok(()),
        }
    }

    fn property_index(&self, key: &PropertyKey) -> Result<usize> {
        self.by_property
            .get(key)
            .copied()
            .ok_or_else(|| Error::PropertyNotFound {
                table: self.name.clone(),
                property: key.to_string(),
            })
    }

    /// Foreign key constraints, one per constraint name, ordered by the first
    /// field declaring each name
    pub fn foreign_key_constraints(&self) -> Vec<ForeignKey> {
        let mut constraints: IndexMap<&str, ForeignKey> = IndexMap::new();
        for field in &self.fields {
            for (name, reference) in field.foreign_keys() {
                let fk = constraints.entry(name).or_insert_with(|| ForeignKey {
                    name: name.to_string(),
                    columns: Vec::new(),
                    foreign_table: reference.table_name.clone(),
                    foreign_columns: Vec::new(),
                });
                fk.columns.push(field.name.clone());
                fk.foreign_columns.push(reference.col_name.clone());
            }
        }
        constraints.into_values().collect()
    }

    /// Adds the column of the field mapped to `key` to index `name`
    pub fn add_index(&mut self, key: &PropertyKey, name: &str, unique: bool) -> Result<()> {
        let column = self.get_property_field(key)?.name.clone();
        let table = self.name.clone();
        let index = self
            .indexes
            .entry(name.to_string())
            .or_insert_with(|| IndexDefinition {
                name: name.to_string(),
                columns: Vec::new(),
                unique,
            });
        if index.unique != unique {
            return Err(Error::DuplicateIndex {
                table,
                index: name.to_string(),
            });
        }
        if !index.columns.contains(&column) {
            index.columns.push(column);
        }
        Ok(())
    }

    pub fn get_index(&self, name: &str) -> Result<&IndexDefinition> {
        self.indexes.get(name).ok_or_else(|| Error::IndexNotFound {
            table: self.name.clone(),
            index: name.to_string(),
        })
    }

    pub fn indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.indexes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new("PARENTTABLE");
        table
            .add_table_field(Field::new("id").with_name("ID").with_identity(true))
            .unwrap();
        table.add_table_field(Field::new("name").with_name("NAME")).unwrap();
        table
    }

    #[test]
    fn test_duplicate_column_leaves_table_unchanged() {
        let mut table = sample();
        let before = table.clone();
        let err = table
            .add_table_field(Field::new("other").with_name("NAME"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateField { .. }));
        assert_eq!(table, before);
        assert!(!table.has_property_field(&"other".into()));
    }

    #[test]
    fn test_colliding_placeholder_is_rejected() {
        let mut table = sample();
        table
            .add_table_field(Field::new("spaced").with_name("my col"))
            .unwrap();
        let before = table.clone();
        let err = table
            .add_table_field(Field::new("underscored").with_name("my_col"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateField { .. }));
        assert_eq!(table, before);
        assert!(matches!(
            table.add_property_field(Field::new("dashed").with_name("my-col")),
            Err(Error::DuplicateField { .. })
        ));
        table
            .add_table_field(Field::new("other").with_name("my_col2"))
            .unwrap();
    }

    #[test]
    fn test_duplicate_property_leaves_table_unchanged() {
        let mut table = sample();
        let before = table.clone();
        let err = table
            .add_property_field(Field::new("name").with_name("NAME2"))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateProperty { .. }));
        assert_eq!(table, before);
        assert!(!table.has_table_field("NAME2"));
    }

    #[test]
    fn test_views_stay_in_lockstep() {
        let mut table = sample();
        table
            .add_property_field(Field::new("dyn").with_name("TESTADDCOL").with_dbtype("INTEGER"))
            .unwrap();
        assert!(table.has_table_field("TESTADDCOL"));
        assert!(table.has_property_field(&"dyn".into()));
        assert_eq!(
            table.get_table_field("TESTADDCOL").unwrap(),
            table.get_property_field(&"dyn".into()).unwrap()
        );
    }

    #[test]
    fn test_lookups() {
        let table = sample();
        assert!(table.get_table_field("ID").unwrap().is_identity);
        assert!(!table.get_table_field("NAME").unwrap().is_identity);
        assert!(matches!(
            table.get_table_field("MISSING"),
            Err(Error::FieldNotFound { .. })
        ));
        assert!(matches!(
            table.get_property_field(&"missing".into()),
            Err(Error::PropertyNotFound { .. })
        ));
        let names: Vec<_> = table.fields().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["ID", "NAME"]);
    }

    #[test]
    fn test_autoincrement_field() {
        let mut table = Table::new("T").with_auto_increment(true);
        table
            .add_table_field(
                Field::new("id")
                    .with_name("ID")
                    .with_dbtype("INTEGER NOT NULL")
                    .with_identity(true),
            )
            .unwrap();
        assert_eq!(table.autoincrement_field().map(|f| f.name.as_str()), Some("ID"));
        table.auto_increment = false;
        assert!(table.autoincrement_field().is_none());
    }

    #[test]
    fn test_composite_foreign_key() {
        let mut table = Table::new("CHILD");
        table.add_table_field(Field::new("a").with_name("A")).unwrap();
        table.add_table_field(Field::new("b").with_name("B")).unwrap();
        table
            .add_foreign_key(&"a".into(), "FK", FieldReference::new("PARENT", "X"))
            .unwrap();
        table
            .add_foreign_key(&"b".into(), "FK", FieldReference::new("PARENT", "Y"))
            .unwrap();
        let err = table
            .add_foreign_key(&"b".into(), "FK2", FieldReference::new("OTHER", "Y"))
            .and_then(|_| table.add_foreign_key(&"a".into(), "FK2", FieldReference::new("ELSE", "Z")))
            .unwrap_err();
        assert!(matches!(err, Error::ForeignKeyConflict { .. }));

        let fks = table.foreign_key_constraints();
        assert_eq!(fks[0].name, "FK");
        assert_eq!(fks[0].columns, ["A", "B"]);
        assert_eq!(fks[0].foreign_columns, ["X", "Y"]);
    }

    #[test]
    fn test_indexes() {
        let mut table = sample();
        table.add_index(&"name".into(), "IDX_NAME", true).unwrap();
        table.add_index(&"name".into(), "IDX_NAME", true).unwrap();
        assert_eq!(table.get_index("IDX_NAME").unwrap().columns, ["NAME"]);
        assert!(matches!(
            table.add_index(&"id".into(), "IDX_NAME", false),
            Err(Error::DuplicateIndex { .. })
        ));
        assert!(matches!(
            table.get_index("NOPE"),
            Err(Error::IndexNotFound { .. })
        ));
    }
}
