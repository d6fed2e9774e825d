//! Error types for schema declaration, statement execution and mapping.

use thiserror::Error;

/// Errors surfaced by the mapping layer.
///
/// Lookup and registration failures are detected synchronously at the call
/// that caused them. Engine failures are passed through untouched.
#[derive(Error, Debug)]
pub enum Error {
    /// Table was never declared
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// Column not found in table
    #[error("field '{field}' not found in table '{table}'")]
    FieldNotFound { table: String, field: String },

    /// Property is not mapped to any column
    #[error("property '{property}' not mapped in table '{table}'")]
    PropertyNotFound { table: String, property: String },

    /// Foreign key constraint not declared on field
    #[error("foreign key constraint '{constraint}' not found on field '{field}'")]
    ForeignKeyNotFound { field: String, constraint: String },

    /// Index not declared on table
    #[error("index '{index}' not found in table '{table}'")]
    IndexNotFound { table: String, index: String },

    /// Table already declared
    #[error("table '{0}' already declared")]
    DuplicateTable(String),

    /// Column name already used in table
    #[error("field '{field}' already declared in table '{table}'")]
    DuplicateField { table: String, field: String },

    /// Property already mapped to a column
    #[error("property '{property}' already mapped in table '{table}'")]
    DuplicateProperty { table: String, property: String },

    /// Foreign key constraint redeclared with different facts
    #[error("foreign key constraint '{constraint}' conflicts with an earlier declaration: {reason}")]
    ForeignKeyConflict { constraint: String, reason: String },

    /// Index redeclared with different uniqueness
    #[error("index '{index}' already declared in table '{table}' with different options")]
    DuplicateIndex { table: String, index: String },

    /// Malformed connection setting
    #[error("invalid setting '{name}': {reason}")]
    InvalidSetting { name: String, reason: String },

    /// The entity does not carry a value for an identity column
    #[error("identity column '{field}' of table '{table}' has no value")]
    MissingIdentity { table: String, field: String },

    /// Update or delete by identity matched nothing
    #[error("no row affected in table '{0}'")]
    NoRowsAffected(String),

    /// A transaction is already open on the connection
    #[error("a transaction is already open on this connection")]
    TransactionActive,

    /// Connection was closed
    #[error("database connection is closed")]
    DatabaseClosed,

    /// Failure reported by the SQLite engine
    #[error(transparent)]
    Engine(#[from] rusqlite::Error),

    /// Application failure raised inside a unit of work
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
