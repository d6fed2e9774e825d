//! Declarative object-relational mapping over SQLite.
//!
//! # Intention
//!
//! - Declare tables, columns, primary and foreign keys once, at startup, in a
//!   [`Schema`].
//! - Derive DDL and parameterized CRUD statements from those declarations.
//! - Convert typed entity properties to SQLite cells and back through a
//!   closed set of [`Transformer`]s.
//!
//! # Architectural Boundaries
//!
//! - SQL execution is reached only through the [`SqlEngine`] capability;
//!   [`SqliteDatabase`] is the rusqlite implementation.
//! - Schema lookups, statement generation and value conversion are pure and
//!   synchronous. Executing statements never mutates the schema.

pub mod dao;
pub mod engine;
pub mod error;
pub mod field;
pub mod mapper;
pub mod schema;
pub mod sqlite;
pub mod statement;
pub mod table;
pub mod transformer;
pub mod value;

pub use dao::Dao;
pub use engine::{with_transaction, ExecuteResult, SqlEngine, Transaction};
pub use error::{Error, Result};
pub use field::{Field, FieldOptions, FieldReference, PropertyKey};
pub use mapper::{Entity, Record};
pub use schema::{Schema, TableOptions};
pub use sqlite::{DatabaseSettings, ExecutionMode, SqliteConfig, SqliteDatabase, SQL_MEMORY_DB_PRIVATE};
pub use statement::{Query, QueryOperator, SqlQuery};
pub use table::{ForeignKey, IndexDefinition, Table};
pub use transformer::{Affinity, PropertyType, Transformer};
pub use value::{AppValue, Params, Row, Timestamp, Value};
