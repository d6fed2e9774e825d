//! Conversion between entity instances and bind parameters or result rows.

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::field::{Field, PropertyKey};
use crate::statement::{self, Query, QueryOperator};
use crate::table::Table;
use crate::value::{AppValue, Params, Row, Value};

/// Typed property access for a persistent entity.
///
/// Each property key declared on the entity's table resolves to one member.
/// An entity that does not back a property (a partial entity) reports it
/// through [`Entity::has_property`] and that column is skipped on writes.
pub trait Entity: Default {
    fn has_property(&self, key: &PropertyKey) -> bool {
        let _ = key;
        true
    }

    fn get_property(&self, key: &PropertyKey) -> Option<AppValue>;

    fn set_property(&mut self, key: &PropertyKey, value: Option<AppValue>);
}

/// Dynamic entity holding whatever properties were set on it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    pub properties: IndexMap<PropertyKey, Option<AppValue>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, key: &str, value: impl Into<AppValue>) -> Self {
        self.properties.insert(key.into(), Some(value.into()));
        self
    }

    pub fn with_absent(mut self, key: &str) -> Self {
        self.properties.insert(key.into(), None);
        self
    }

    pub fn get(&self, key: &str) -> Option<&AppValue> {
        self.properties
            .get(&PropertyKey::from(key))
            .and_then(Option::as_ref)
    }
}

impl Entity for Record {
    fn has_property(&self, key: &PropertyKey) -> bool {
        self.properties.contains_key(key)
    }

    fn get_property(&self, key: &PropertyKey) -> Option<AppValue> {
        self.properties.get(key).cloned().flatten()
    }

    fn set_property(&mut self, key: &PropertyKey, value: Option<AppValue>) {
        self.properties.insert(key.clone(), value);
    }
}

/// Fields of `table` backed by a property of `entity`, in declaration order
pub fn backed_fields<'t, E: Entity>(table: &'t Table, entity: &E) -> Vec<&'t Field> {
    table
        .fields()
        .filter(|f| entity.has_property(&f.property_key))
        .collect()
}

/// Binds every backed property of `entity` under its column placeholder
pub fn bind_entity<E: Entity>(table: &Table, entity: &E) -> Params {
    let mut params = Params::new();
    for field in backed_fields(table, entity) {
        bind_field(&mut params, field, entity);
    }
    params
}

/// Binds only the identity columns; fails if one of them has no value
pub fn bind_identity<E: Entity>(table: &Table, entity: &E) -> Result<Params> {
    let mut params = Params::new();
    for field in table.identity_fields() {
        let value = field.transformer.to_db(entity.get_property(&field.property_key).as_ref());
        if value.is_null() {
            return Err(Error::MissingIdentity {
                table: table.name().to_string(),
                field: field.name.clone(),
            });
        }
        params.insert(&field.placeholder(), value);
    }
    Ok(params)
}

/// Binds identity values given in identity-column order
pub fn bind_identity_values(table: &Table, values: &[AppValue]) -> Result<Params> {
    let mut params = Params::new();
    let mut values = values.iter();
    for field in table.identity_fields() {
        let value = values.next().ok_or_else(|| Error::MissingIdentity {
            table: table.name().to_string(),
            field: field.name.clone(),
        })?;
        params.insert(&field.placeholder(), field.transformer.to_db(Some(value)));
    }
    Ok(params)
}

fn bind_field<E: Entity>(params: &mut Params, field: &Field, entity: &E) {
    let value = entity.get_property(&field.property_key);
    params.insert(&field.placeholder(), field.transformer.to_db(value.as_ref()));
}

/// Binds the condition values of `query`, each converted by the transformer
/// of the column it filters
pub fn bind_query(table: &Table, query: &Query) -> Result<Params> {
    let mut params = Params::new();
    for (i, (column, op)) in query.conditions.iter().enumerate() {
        let field = table.get_table_field(column)?;
        let values: Vec<Value> = match op {
            QueryOperator::Equal(v)
            | QueryOperator::NotEqual(v)
            | QueryOperator::GreaterThan(v)
            | QueryOperator::GreaterThanOrEqual(v)
            | QueryOperator::LessThan(v)
            | QueryOperator::LessThanOrEqual(v) => vec![field.transformer.to_db(Some(v))],
            // patterns are matched against stored text as given
            QueryOperator::Like(pattern) => vec![Value::Text(pattern.clone())],
            QueryOperator::In(vs) => vs.iter().map(|v| field.transformer.to_db(Some(v))).collect(),
            QueryOperator::IsNull | QueryOperator::IsNotNull => Vec::new(),
        };
        for (j, value) in values.into_iter().enumerate() {
            params.insert(&statement::condition_placeholder(i, j), value);
        }
    }
    Ok(params)
}

/// Builds an entity from a result row.
///
/// Columns unknown to `table` are ignored, so rows read from a newer schema
/// still map.
pub fn read_entity<E: Entity>(table: &Table, row: &Row) -> E {
    let mut entity = E::default();
    for (column, value) in row {
        if let Ok(field) = table.get_table_field(column) {
            entity.set_property(&field.property_key, field.transformer.from_db(value));
        }
    }
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::Transformer;

    fn table() -> Table {
        let mut table = Table::new("T");
        table
            .add_table_field(
                Field::new("id")
                    .with_name("ID")
                    .with_dbtype("INTEGER")
                    .with_identity(true)
                    .with_transformer(Transformer::NumberDefault),
            )
            .unwrap();
        table
            .add_table_field(
                Field::new("flag")
                    .with_name("FLAG")
                    .with_transformer(Transformer::BooleanText),
            )
            .unwrap();
        table
    }

    #[test]
    fn test_bind_partial_entity() {
        let table = table();
        let record = Record::new().with_value("flag", true);
        let params = bind_entity(&table, &record);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get(":FLAG"), Some(&Value::Text("1".into())));

        let record = Record::new().with_value("id", 3i64).with_absent("flag");
        let params = bind_entity(&table, &record);
        assert_eq!(params.get(":ID"), Some(&Value::Integer(3)));
        assert_eq!(params.get(":FLAG"), Some(&Value::Null));
    }

    #[test]
    fn test_bind_identity() {
        let table = table();
        assert!(matches!(
            bind_identity(&table, &Record::new()),
            Err(Error::MissingIdentity { .. })
        ));
        let params = bind_identity(&table, &Record::new().with_value("id", 9i64)).unwrap();
        assert_eq!(params.get(":ID"), Some(&Value::Integer(9)));
    }

    #[test]
    fn test_read_entity_ignores_unknown_columns() {
        let table = table();
        let mut row = Row::new();
        row.insert("ID".to_string(), Value::Integer(1));
        row.insert("FLAG".to_string(), Value::Text("maybe".into()));
        row.insert("EXTRA".to_string(), Value::Text("x".into()));
        let record: Record = read_entity(&table, &row);
        assert_eq!(record.get("id"), Some(&AppValue::Integer(1)));
        assert_eq!(record.get("flag"), None);
        assert!(record.has_property(&"flag".into()));
        assert!(!record.has_property(&"EXTRA".into()));
    }

    #[test]
    fn test_bind_query() {
        let table = table();
        let query = Query::new()
            .with_condition("FLAG", QueryOperator::Equal(AppValue::Bool(false)))
            .with_condition("ID", QueryOperator::In(vec![1i64.into(), 2i64.into()]));
        let params = bind_query(&table, &query).unwrap();
        assert_eq!(params.get(":w0_0"), Some(&Value::Text("0".into())));
        assert_eq!(params.get(":w1_1"), Some(&Value::Integer(2)));
    }
}
