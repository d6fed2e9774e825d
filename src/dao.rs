use std::marker::PhantomData;

use crate::engine::{ExecuteResult, SqlEngine};
use crate::error::{Error, Result};
use crate::field::Field;
use crate::mapper::{self, Entity};
use crate::schema::Schema;
use crate::statement::{self, Query};
use crate::table::Table;
use crate::value::{AppValue, Params, Value};

/// CRUD access to the rows of one table as entities of type `E`
#[derive(Debug)]
pub struct Dao<'s, E> {
    table: &'s Table,
    _entity: PhantomData<fn() -> E>,
}

impl<'s, E: Entity> Dao<'s, E> {
    pub fn new(schema: &'s Schema, table_name: &str) -> Result<Self> {
        Ok(Self {
            table: schema.get_table(table_name)?,
            _entity: PhantomData,
        })
    }

    pub fn table(&self) -> &'s Table {
        self.table
    }

    fn require_identity(&self) -> Result<()> {
        match self.table.identity_fields().next() {
            Some(_) => Ok(()),
            None => Err(Error::MissingIdentity {
                table: self.table.name().to_string(),
                field: "<primary key>".to_string(),
            }),
        }
    }

    /// Inserts `entity`.
    ///
    /// On an autoincrement table an absent identity is left to the engine and
    /// the generated id is written back into the entity.
    pub async fn insert(&self, engine: &dyn SqlEngine, entity: &mut E) -> Result<ExecuteResult> {
        let generated = self
            .table
            .autoincrement_field()
            .filter(|f| entity.get_property(&f.property_key).is_none());
        let columns: Vec<&Field> = mapper::backed_fields(self.table, entity)
            .into_iter()
            .filter(|f| generated.map_or(true, |g| g.name != f.name))
            .collect();
        let sql = statement::insert(self.table, &columns);
        let mut params = mapper::bind_entity(self.table, entity);
        params.values.retain(|name, _| sql.placeholders.contains(name));
        let result = engine.execute(&sql.statement, &params).await?;
        if let Some(field) = generated {
            entity.set_property(
                &field.property_key,
                field.transformer.from_db(&Value::Integer(result.inserted_id)),
            );
        }
        Ok(result)
    }

    /// Updates the row matching the entity's identity with its backed
    /// properties
    pub async fn update(&self, engine: &dyn SqlEngine, entity: &E) -> Result<()> {
        self.require_identity()?;
        let identity = mapper::bind_identity(self.table, entity)?;
        let columns = mapper::backed_fields(self.table, entity);
        let sql = statement::update_by_id(self.table, &columns);
        let mut params = mapper::bind_entity(self.table, entity);
        params.values.retain(|name, _| sql.placeholders.contains(name));
        params.values.extend(identity.values);
        let result = engine.execute(&sql.statement, &params).await?;
        if result.rows_affected == 0 {
            return Err(Error::NoRowsAffected(self.table.name().to_string()));
        }
        Ok(())
    }

    /// Deletes the row matching the entity's identity
    pub async fn delete(&self, engine: &dyn SqlEngine, entity: &E) -> Result<()> {
        self.require_identity()?;
        let params = mapper::bind_identity(self.table, entity)?;
        self.delete_with(engine, params).await
    }

    /// Deletes the row whose identity columns equal `id`, given in identity
    /// declaration order
    pub async fn delete_by_id(&self, engine: &dyn SqlEngine, id: &[AppValue]) -> Result<()> {
        self.require_identity()?;
        let params = mapper::bind_identity_values(self.table, id)?;
        self.delete_with(engine, params).await
    }

    async fn delete_with(&self, engine: &dyn SqlEngine, params: Params) -> Result<()> {
        let sql = statement::delete_by_id(self.table);
        let result = engine.execute(&sql.statement, &params).await?;
        if result.rows_affected == 0 {
            return Err(Error::NoRowsAffected(self.table.name().to_string()));
        }
        Ok(())
    }

    pub async fn select_by_id(&self, engine: &dyn SqlEngine, id: &[AppValue]) -> Result<Option<E>> {
        self.require_identity()?;
        let params = mapper::bind_identity_values(self.table, id)?;
        let sql = statement::select_by_id(self.table);
        let row = engine.query_one(&sql.statement, &params).await?;
        Ok(row.map(|row| mapper::read_entity(self.table, &row)))
    }

    /// Reloads the row matching the entity's identity
    pub async fn select(&self, engine: &dyn SqlEngine, entity: &E) -> Result<Option<E>> {
        self.require_identity()?;
        let params = mapper::bind_identity(self.table, entity)?;
        let sql = statement::select_by_id(self.table);
        let row = engine.query_one(&sql.statement, &params).await?;
        Ok(row.map(|row| mapper::read_entity(self.table, &row)))
    }

    pub async fn select_all(&self, engine: &dyn SqlEngine, query: &Query) -> Result<Vec<E>> {
        let sql = statement::select(self.table, query)?;
        let params = mapper::bind_query(self.table, query)?;
        let rows = engine.query_all(&sql.statement, &params).await?;
        Ok(rows
            .iter()
            .map(|row| mapper::read_entity(self.table, row))
            .collect())
    }

    /// Deletes every row matching the conditions of `query`, returning how
    /// many were removed
    pub async fn delete_all(&self, engine: &dyn SqlEngine, query: &Query) -> Result<usize> {
        let sql = statement::delete(self.table, query)?;
        let params = mapper::bind_query(self.table, query)?;
        let result = engine.execute(&sql.statement, &params).await?;
        Ok(result.rows_affected)
    }

    pub async fn count(&self, engine: &dyn SqlEngine, query: &Query) -> Result<i64> {
        let sql = statement::count(self.table, query)?;
        let params = mapper::bind_query(self.table, query)?;
        let row = engine.query_one(&sql.statement, &params).await?;
        Ok(match row.as_ref().and_then(|r| r.get("COUNT")) {
            Some(Value::Integer(n)) => *n,
            _ => 0,
        })
    }
}
