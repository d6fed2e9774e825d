//! Catalog of declared tables.
//!
//! A [`Schema`] is an owned context object. It is populated through the
//! `declare_*` calls while the application starts up and is then shared
//! read-only, typically as `Arc<Schema>`. Adding columns later goes through
//! `Arc::make_mut`, so readers holding the old `Arc` keep a consistent
//! snapshot. Running statements never mutates the catalog.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::engine::SqlEngine;
use crate::error::{Error, Result};
use crate::field::{Field, FieldOptions, FieldReference, PropertyKey};
use crate::statement;
use crate::table::Table;
use crate::value::Params;

/// Table-level declaration options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableOptions {
    pub auto_increment: bool,
}

/// Facts declared for a property before its column was declared
#[derive(Debug, Clone, Default, PartialEq)]
struct PendingProperty {
    identity: bool,
    foreign_keys: Vec<(String, FieldReference)>,
    indexes: Vec<(String, bool)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    tables: IndexMap<String, Table>,
    pending: HashMap<(String, PropertyKey), PendingProperty>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_table(&mut self, name: &str, options: TableOptions) -> Result<&mut Table> {
        self.add_table(Table::new(name).with_auto_increment(options.auto_increment))?;
        self.get_table_mut(name)
    }

    /// Registers a fully built table
    pub fn add_table(&mut self, table: Table) -> Result<()> {
        if self.tables.contains_key(table.name()) {
            return Err(Error::DuplicateTable(table.name().to_string()));
        }
        tracing::debug!(table = %table.name(), "table declared");
        self.tables.insert(table.name().to_string(), table);
        Ok(())
    }

    /// Maps `property_key` of `table` to a new column.
    ///
    /// Identity, foreign key and index facts declared earlier for the same
    /// property are applied to the new field. On error the table is left as
    /// it was.
    pub fn declare_field(
        &mut self,
        table: &str,
        property_key: impl Into<PropertyKey>,
        options: FieldOptions,
    ) -> Result<()> {
        let key = property_key.into();
        let pending_key = (table.to_string(), key.clone());
        let mut updated = self.get_table(table)?.clone();
        updated.add_property_field(Field::from_options(key.clone(), options))?;

        if let Some(pending) = self.pending.get(&pending_key) {
            if pending.identity {
                updated.set_identity(&key)?;
            }
            for (constraint, reference) in &pending.foreign_keys {
                updated.add_foreign_key(&key, constraint, reference.clone())?;
            }
            for (index, unique) in &pending.indexes {
                updated.add_index(&key, index, *unique)?;
            }
        }

        self.pending.remove(&pending_key);
        *self.get_table_mut(table)? = updated;
        Ok(())
    }

    /// Marks `property_key` of `table` as part of the primary key
    pub fn declare_identity(&mut self, table: &str, property_key: impl Into<PropertyKey>) -> Result<()> {
        let key = property_key.into();
        let target = self.get_table_mut(table)?;
        if target.has_property_field(&key) {
            return target.set_identity(&key);
        }
        self.pending_for(table, key).identity = true;
        Ok(())
    }

    /// Declares that `property_key` of `table` references
    /// `target_table(target_column)` under `constraint`
    pub fn declare_foreign_key(
        &mut self,
        table: &str,
        property_key: impl Into<PropertyKey>,
        constraint: &str,
        target_table: &str,
        target_column: &str,
    ) -> Result<()> {
        let key = property_key.into();
        let reference = FieldReference::new(target_table, target_column);
        let target = self.get_table_mut(table)?;
        if target.has_property_field(&key) {
            return target.add_foreign_key(&key, constraint, reference);
        }
        let pending = self.pending_for(table, key);
        let existing = pending
            .foreign_keys
            .iter()
            .find(|(c, _)| c == constraint)
            .map(|(_, r)| r.clone());
        match existing {
            Some(existing) if existing != reference => Err(Error::ForeignKeyConflict {
                constraint: constraint.to_string(),
                reason: format!(
                    "already declared as {}({})",
                    existing.table_name, existing.col_name
                ),
            }),
            Some(_) => Ok(()),
            None => {
                pending.foreign_keys.push((constraint.to_string(), reference));
                Ok(())
            }
        }
    }

    /// Adds the column of `property_key` to index `index_name` of `table`
    pub fn declare_index(
        &mut self,
        table: &str,
        property_key: impl Into<PropertyKey>,
        index_name: &str,
        unique: bool,
    ) -> Result<()> {
        let key = property_key.into();
        let target = self.get_table_mut(table)?;
        if target.has_property_field(&key) {
            return target.add_index(&key, index_name, unique);
        }
        self.pending_for(table, key)
            .indexes
            .push((index_name.to_string(), unique));
        Ok(())
    }

    fn pending_for(&mut self, table: &str, key: PropertyKey) -> &mut PendingProperty {
        self.pending.entry((table.to_string(), key)).or_default()
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Tables in declaration order
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub async fn create_table<E: SqlEngine + ?Sized>(&self, engine: &E, name: &str) -> Result<()> {
        let table = self.get_table(name)?;
        let sql = statement::create_table(table);
        tracing::info!(table = %name, "creating table");
        engine.execute(&sql, &Params::new()).await?;
        Ok(())
    }

    /// Drops the table in the engine; the catalog entry stays
    pub async fn drop_table<E: SqlEngine + ?Sized>(&self, engine: &E, name: &str) -> Result<()> {
        let table = self.get_table(name)?;
        let sql = statement::drop_table(table);
        tracing::info!(table = %name, "dropping table");
        engine.execute(&sql, &Params::new()).await?;
        Ok(())
    }

    /// Adds a column that was already added to the table model
    pub async fn alter_table_add_column<E: SqlEngine + ?Sized>(
        &self,
        engine: &E,
        table_name: &str,
        column_name: &str,
    ) -> Result<()> {
        let table = self.get_table(table_name)?;
        let field = table.get_table_field(column_name)?;
        let sql = statement::alter_table_add_column(table, field);
        tracing::info!(table = %table_name, column = %column_name, "adding column");
        engine.execute(&sql, &Params::new()).await?;
        Ok(())
    }

    pub async fn create_index<E: SqlEngine + ?Sized>(
        &self,
        engine: &E,
        table_name: &str,
        index_name: &str,
    ) -> Result<()> {
        let table = self.get_table(table_name)?;
        let index = table.get_index(index_name)?;
        let sql = statement::create_index(table, index);
        tracing::info!(table = %table_name, index = %index_name, "creating index");
        engine.execute(&sql, &Params::new()).await?;
        Ok(())
    }

    pub async fn drop_index<E: SqlEngine + ?Sized>(
        &self,
        engine: &E,
        table_name: &str,
        index_name: &str,
    ) -> Result<()> {
        let index = self.get_table(table_name)?.get_index(index_name)?;
        let sql = statement::drop_index(index);
        tracing::info!(table = %table_name, index = %index_name, "dropping index");
        engine.execute(&sql, &Params::new()).await?;
        Ok(())
    }

    /// Creates every table in declaration order, each followed by its indexes
    pub async fn create_all_tables<E: SqlEngine + ?Sized>(&self, engine: &E) -> Result<()> {
        for table in self.tables() {
            self.create_table(engine, table.name()).await?;
            for index in table.indexes() {
                self.create_index(engine, table.name(), &index.name).await?;
            }
        }
        Ok(())
    }

    /// Drops every table in reverse declaration order
    pub async fn drop_all_tables<E: SqlEngine + ?Sized>(&self, engine: &E) -> Result<()> {
        for table in self.tables.values().rev() {
            self.drop_table(engine, table.name()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::{PropertyType, Transformer};

    #[test]
    fn test_declarations_before_field() {
        let mut schema = Schema::new();
        schema.declare_table("CHILD", TableOptions::default()).unwrap();
        schema
            .declare_foreign_key("CHILD", "parentId", "PARENT", "PARENTTABLE", "ID")
            .unwrap();
        schema.declare_identity("CHILD", "parentId").unwrap();
        schema.declare_index("CHILD", "parentId", "IDX_PARENT", false).unwrap();
        assert!(!schema.get_table("CHILD").unwrap().has_table_field("PARENT_ID"));

        schema
            .declare_field(
                "CHILD",
                "parentId",
                FieldOptions::new("PARENT_ID")
                    .with_dbtype("INTEGER NOT NULL")
                    .with_property_type(PropertyType::Number),
            )
            .unwrap();
        let table = schema.get_table("CHILD").unwrap();
        let field = table.get_table_field("PARENT_ID").unwrap();
        assert!(field.is_identity);
        assert_eq!(field.transformer, Transformer::NumberDefault);
        assert_eq!(
            field.get_foreign_key_field("PARENT").unwrap(),
            &FieldReference::new("PARENTTABLE", "ID")
        );
        assert_eq!(table.get_index("IDX_PARENT").unwrap().columns, ["PARENT_ID"]);
        assert!(schema.pending.is_empty());
    }

    #[test]
    fn test_duplicate_declarations() {
        let mut schema = Schema::new();
        schema.declare_table("T", TableOptions::default()).unwrap();
        assert!(matches!(
            schema.declare_table("T", TableOptions::default()),
            Err(Error::DuplicateTable(_))
        ));
        schema.declare_field("T", "a", FieldOptions::new("A")).unwrap();
        let before = schema.clone();
        assert!(matches!(
            schema.declare_field("T", "b", FieldOptions::new("A")),
            Err(Error::DuplicateField { .. })
        ));
        assert!(matches!(
            schema.declare_field("T", "a", FieldOptions::new("B")),
            Err(Error::DuplicateProperty { .. })
        ));
        assert_eq!(schema, before);
    }

    #[test]
    fn test_failed_pending_application_keeps_state() {
        let mut schema = Schema::new();
        schema.declare_table("T", TableOptions::default()).unwrap();
        schema.declare_field("T", "a", FieldOptions::new("A")).unwrap();
        schema.declare_foreign_key("T", "a", "FK", "P", "X").unwrap();
        schema.declare_foreign_key("T", "b", "FK", "Q", "Y").unwrap();
        let before = schema.clone();
        assert!(matches!(
            schema.declare_field("T", "b", FieldOptions::new("B")),
            Err(Error::ForeignKeyConflict { .. })
        ));
        assert_eq!(schema, before);
    }

    #[test]
    fn test_unknown_table() {
        let mut schema = Schema::new();
        assert!(matches!(schema.get_table("NOPE"), Err(Error::TableNotFound(_))));
        assert!(matches!(
            schema.declare_field("NOPE", "a", FieldOptions::new("A")),
            Err(Error::TableNotFound(_))
        ));
    }
}
