use std::fmt;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::statement;
use crate::transformer::{PropertyType, Transformer};

/// Opaque token identifying an entity property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey(String);

impl PropertyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PropertyKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target of a foreign key: a column of another table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldReference {
    pub table_name: String,
    pub col_name: String,
}

impl FieldReference {
    pub fn new(table_name: impl Into<String>, col_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            col_name: col_name.into(),
        }
    }
}

/// Column options given when a property is declared
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldOptions {
    /// Column name; defaults to the property key
    pub name: Option<String>,
    /// DDL type fragment, e.g. `"INTEGER NOT NULL"`
    pub dbtype: Option<String>,
    pub property_type: Option<PropertyType>,
    /// Explicit transformer, overriding the one derived from `property_type`
    pub transformer: Option<Transformer>,
}

impl FieldOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_dbtype(mut self, dbtype: impl Into<String>) -> Self {
        self.dbtype = Some(dbtype.into());
        self
    }

    pub fn with_property_type(mut self, property_type: PropertyType) -> Self {
        self.property_type = Some(property_type);
        self
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = Some(transformer);
        self
    }
}

/// Mapping between one entity property and one table column
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub property_key: PropertyKey,
    pub name: String,
    pub dbtype: String,
    pub is_identity: bool,
    pub transformer: Transformer,
    foreign_keys: IndexMap<String, FieldReference>,
}

impl Field {
    /// New non-identity `TEXT` column named after the property, using the
    /// passthrough transformer
    pub fn new(property_key: impl Into<PropertyKey>) -> Self {
        let property_key = property_key.into();
        Self {
            name: property_key.as_str().to_string(),
            property_key,
            dbtype: "TEXT".to_string(),
            is_identity: false,
            transformer: Transformer::UnknownDefault,
            foreign_keys: IndexMap::new(),
        }
    }

    /// Builds a field from declaration options
    pub fn from_options(property_key: impl Into<PropertyKey>, options: FieldOptions) -> Self {
        let mut field = Field::new(property_key);
        if let Some(name) = options.name {
            field.name = name;
        }
        let property_type = options.property_type.unwrap_or(PropertyType::Unknown);
        field.dbtype = options
            .dbtype
            .unwrap_or_else(|| default_dbtype(property_type).to_string());
        field.transformer = options
            .transformer
            .unwrap_or_else(|| Transformer::for_property(property_type, &field.dbtype));
        field
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dbtype(mut self, dbtype: impl Into<String>) -> Self {
        self.dbtype = dbtype.into();
        self
    }

    pub fn with_identity(mut self, is_identity: bool) -> Self {
        self.is_identity = is_identity;
        self
    }

    pub fn with_transformer(mut self, transformer: Transformer) -> Self {
        self.transformer = transformer;
        self
    }

    /// Only a column declared exactly as `INTEGER` aliases the rowid and may
    /// carry `AUTOINCREMENT`
    pub fn is_autoincrement_eligible(&self) -> bool {
        self.dbtype
            .split_whitespace()
            .next()
            .is_some_and(|ty| ty.eq_ignore_ascii_case("INTEGER"))
    }

    /// Named placeholder used for this column in generated statements
    pub fn placeholder(&self) -> String {
        statement::placeholder(&self.name)
    }

    /// Column name as emitted in SQL text
    pub fn quoted_name(&self) -> String {
        statement::quote_identifier(&self.name)
    }

    /// Attaches a foreign key reference under `constraint`.
    ///
    /// Redeclaring the same reference is accepted; pointing an existing
    /// constraint elsewhere is rejected.
    pub fn add_foreign_key_field(
        &mut self,
        constraint: impl Into<String>,
        reference: FieldReference,
    ) -> Result<()> {
        let constraint = constraint.into();
        match self.foreign_keys.get(&constraint) {
            Some(existing) if *existing == reference => Ok(()),
            Some(existing) => Err(Error::ForeignKeyConflict {
                reason: format!(
                    "field '{}' already references {}({}), not {}({})",
                    self.name,
                    existing.table_name,
                    existing.col_name,
                    reference.table_name,
                    reference.col_name
                ),
                constraint,
            }),
            None => {
                self.foreign_keys.insert(constraint, reference);
                Ok(())
            }
        }
    }

    pub fn get_foreign_key_field(&self, constraint: &str) -> Result<&FieldReference> {
        self.foreign_keys
            .get(constraint)
            .ok_or_else(|| Error::ForeignKeyNotFound {
                field: self.name.clone(),
                constraint: constraint.to_string(),
            })
    }

    pub fn has_foreign_key_field(&self, constraint: &str) -> bool {
        self.foreign_keys.contains_key(constraint)
    }

    /// Foreign key references in declaration order
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &FieldReference)> {
        self.foreign_keys.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn default_dbtype(property_type: PropertyType) -> &'static str {
    match property_type {
        PropertyType::Boolean | PropertyType::Date => "INTEGER",
        PropertyType::Number => "REAL",
        PropertyType::String | PropertyType::Json | PropertyType::Unknown => "TEXT",
    }
}
