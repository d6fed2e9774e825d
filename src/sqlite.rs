use std::time::Duration;

use async_trait::async_trait;
use futures::lock::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;

use crate::engine::{ExecuteResult, SqlEngine};
use crate::error::{Error, Result};
use crate::value::{Params, Row, Value};

/// Path of a private in-memory database
pub const SQL_MEMORY_DB_PRIVATE: &str = ":memory:";

/// Connection pragmas applied when a database is opened.
///
/// List-valued settings accept an optional schema qualifier, e.g.
/// `"main.FULL"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub journal_mode: Option<String>,
    /// Busy handler timeout in milliseconds
    pub busy_timeout: Option<u64>,
    pub synchronous: Vec<String>,
    pub case_sensitive_like: Option<String>,
    pub foreign_keys: Option<String>,
    pub ignore_check_constraints: Option<String>,
    pub query_only: Option<String>,
    pub read_uncommitted: Option<String>,
    pub recursive_triggers: Option<String>,
    pub secure_delete: Vec<String>,
    /// `PARALLELIZE` or `SERIALIZE`; selects the connection's threading mode
    pub execution_mode: Option<String>,
}

/// Threading mode the connection is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// No connection mutex; access is serialized by [`SqliteDatabase`]
    Parallelize,
    /// SQLite's own full mutex on the connection
    Serialize,
}

impl ExecutionMode {
    fn apply(self, flags: OpenFlags) -> OpenFlags {
        match self {
            ExecutionMode::Parallelize => {
                (flags - OpenFlags::SQLITE_OPEN_FULL_MUTEX) | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
            ExecutionMode::Serialize => {
                (flags - OpenFlags::SQLITE_OPEN_NO_MUTEX) | OpenFlags::SQLITE_OPEN_FULL_MUTEX
            }
        }
    }
}

impl DatabaseSettings {
    /// `PRAGMA` statements for these settings, in a fixed order
    pub fn pragmas(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if let Some(mode) = &self.journal_mode {
            out.push(pragma("journal_mode", mode)?);
        }
        for value in &self.synchronous {
            out.push(pragma("synchronous", value)?);
        }
        let flags = [
            ("case_sensitive_like", &self.case_sensitive_like),
            ("foreign_keys", &self.foreign_keys),
            ("ignore_check_constraints", &self.ignore_check_constraints),
            ("query_only", &self.query_only),
            ("read_uncommitted", &self.read_uncommitted),
            ("recursive_triggers", &self.recursive_triggers),
        ];
        for (name, value) in flags {
            if let Some(value) = value {
                out.push(pragma(name, value)?);
            }
        }
        for value in &self.secure_delete {
            out.push(pragma("secure_delete", value)?);
        }
        Ok(out)
    }

    /// Parsed `execution_mode`, matched case-insensitively
    pub fn execution_mode(&self) -> Result<Option<ExecutionMode>> {
        let Some(mode) = &self.execution_mode else {
            return Ok(None);
        };
        match mode.trim().to_ascii_uppercase().as_str() {
            "PARALLELIZE" => Ok(Some(ExecutionMode::Parallelize)),
            "SERIALIZE" => Ok(Some(ExecutionMode::Serialize)),
            _ => Err(invalid(
                "execution_mode",
                format!("expected PARALLELIZE or SERIALIZE, got '{mode}'"),
            )),
        }
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidSetting {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn is_pragma_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Renders `PRAGMA [schema.]name = value` from an optionally
/// schema-qualified value
fn pragma(name: &str, value: &str) -> Result<String> {
    let value = value.trim();
    let parts: Vec<&str> = value.split('.').collect();
    match parts.as_slice() {
        [value] if is_pragma_token(value) => Ok(format!("PRAGMA {name} = {value}")),
        [schema, value] if is_pragma_token(schema) && is_pragma_token(value) => {
            Ok(format!("PRAGMA {schema}.{name} = {value}"))
        }
        [_] | [_, _] => Err(invalid(name, format!("malformed value '{value}'"))),
        _ => Err(invalid(name, format!("too many schema qualifiers in '{value}'"))),
    }
}

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Path to the SQLite database file, or [`SQL_MEMORY_DB_PRIVATE`]
    pub db_path: String,
    pub read_only: bool,
    pub settings: DatabaseSettings,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            db_path: SQL_MEMORY_DB_PRIVATE.to_string(),
            read_only: false,
            settings: DatabaseSettings::default(),
        }
    }
}

impl SqliteConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn with_settings(mut self, settings: DatabaseSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

/// [`SqlEngine`] over a single rusqlite connection.
///
/// The engine serializes access to the connection; statements run on the
/// calling task.
#[derive(Debug)]
pub struct SqliteDatabase {
    connection: Mutex<Option<Connection>>,
}

impl SqliteDatabase {
    /// Opens the database and applies the configured settings
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let pragmas = config.settings.pragmas()?;
        let mode = config.settings.execution_mode()?;
        let mut flags = if config.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::default()
        };
        if let Some(mode) = mode {
            flags = mode.apply(flags);
        }
        tracing::info!(
            path = %config.db_path,
            read_only = config.read_only,
            mode = ?mode,
            "opening database"
        );
        let connection = Connection::open_with_flags(&config.db_path, flags)?;
        if let Some(ms) = config.settings.busy_timeout {
            connection.busy_timeout(Duration::from_millis(ms))?;
        }
        for sql in &pragmas {
            tracing::debug!(%sql, "applying setting");
            connection.execute_batch(sql)?;
        }
        Ok(Self {
            connection: Mutex::new(Some(connection)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(&SqliteConfig::default())
    }

    /// Closes the connection; later calls fail with [`Error::DatabaseClosed`]
    pub async fn close(&self) -> Result<()> {
        let connection = self.connection.lock().await.take();
        match connection {
            Some(connection) => {
                tracing::info!("closing database");
                connection.close().map_err(|(_, err)| Error::Engine(err))
            }
            None => Err(Error::DatabaseClosed),
        }
    }

    pub async fn is_open(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    pub async fn user_version(&self) -> Result<i64> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(Error::DatabaseClosed)?;
        Ok(connection.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }

    pub async fn set_user_version(&self, version: i64) -> Result<()> {
        self.execute_batch(&format!("PRAGMA user_version = {version}"))
            .await
    }
}

fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> Result<Row> {
    let mut out = Row::with_capacity(columns.len());
    for (i, name) in columns.iter().enumerate() {
        out.insert(name.clone(), Value::from(row.get_ref(i)?));
    }
    Ok(out)
}

fn column_names(stmt: &rusqlite::Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(String::from).collect()
}

#[async_trait]
impl SqlEngine for SqliteDatabase {
    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecuteResult> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(Error::DatabaseClosed)?;
        tracing::debug!(%sql, params = params.len(), "execute");
        let mut stmt = connection.prepare_cached(sql)?;
        let rows_affected = stmt.execute(params.as_named().as_slice())?;
        Ok(ExecuteResult {
            rows_affected,
            inserted_id: connection.last_insert_rowid(),
        })
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(Error::DatabaseClosed)?;
        tracing::debug!(%sql, "execute batch");
        connection.execute_batch(sql)?;
        Ok(())
    }

    async fn query_one(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(Error::DatabaseClosed)?;
        tracing::debug!(%sql, params = params.len(), "query one");
        let mut stmt = connection.prepare_cached(sql)?;
        let columns = column_names(&stmt);
        let named = params.as_named();
        let mut rows = stmt.query(named.as_slice())?;
        match rows.next()? {
            Some(row) => Ok(Some(read_row(row, &columns)?)),
            None => Ok(None),
        }
    }

    async fn query_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(Error::DatabaseClosed)?;
        tracing::debug!(%sql, params = params.len(), "query all");
        let mut stmt = connection.prepare_cached(sql)?;
        let columns = column_names(&stmt);
        let named = params.as_named();
        let mut rows = stmt.query(named.as_slice())?;
        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(read_row(row, &columns)?);
        }
        Ok(result)
    }

    async fn begin(&self) -> Result<()> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(Error::DatabaseClosed)?;
        if !connection.is_autocommit() {
            return Err(Error::TransactionActive);
        }
        tracing::debug!("begin transaction");
        connection.execute_batch("BEGIN IMMEDIATE TRANSACTION")?;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.execute_batch("COMMIT TRANSACTION").await
    }

    async fn rollback(&self) -> Result<()> {
        self.execute_batch("ROLLBACK TRANSACTION").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pragmas() {
        let settings = DatabaseSettings {
            journal_mode: Some("WAL".to_string()),
            synchronous: vec!["main.FULL".to_string()],
            foreign_keys: Some("TRUE".to_string()),
            secure_delete: vec!["FAST".to_string(), "temp.TRUE".to_string()],
            ..DatabaseSettings::default()
        };
        assert_eq!(
            settings.pragmas().unwrap(),
            [
                "PRAGMA journal_mode = WAL",
                "PRAGMA main.synchronous = FULL",
                "PRAGMA foreign_keys = TRUE",
                "PRAGMA secure_delete = FAST",
                "PRAGMA temp.secure_delete = TRUE",
            ]
        );
    }

    #[test]
    fn test_invalid_pragmas() {
        for bad in ["", "NOTEXIST.YYY.FULL", "main.", "FULL; DROP TABLE X"] {
            let settings = DatabaseSettings {
                synchronous: vec![bad.to_string()],
                ..DatabaseSettings::default()
            };
            assert!(
                matches!(settings.pragmas(), Err(Error::InvalidSetting { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_config_deserialize() {
        let config: SqliteConfig = serde_json::from_str(
            r#"{"db_path": "app.db", "settings": {"busy_timeout": 300, "synchronous": ["main.FULL"]}}"#,
        )
        .unwrap();
        assert_eq!(config.db_path, "app.db");
        assert!(!config.read_only);
        assert_eq!(config.settings.busy_timeout, Some(300));
        assert_eq!(config.settings.synchronous, ["main.FULL"]);
        assert_eq!(config.settings.execution_mode().unwrap(), None);
    }

    #[test]
    fn test_execution_mode() {
        let mode = |value: &str| DatabaseSettings {
            execution_mode: Some(value.to_string()),
            ..DatabaseSettings::default()
        };
        assert_eq!(
            mode("PARALLELIZE").execution_mode().unwrap(),
            Some(ExecutionMode::Parallelize)
        );
        assert_eq!(
            mode("serialize").execution_mode().unwrap(),
            Some(ExecutionMode::Serialize)
        );
        assert!(matches!(
            mode("NOTEXIST").execution_mode(),
            Err(Error::InvalidSetting { .. })
        ));

        let serialized = ExecutionMode::Serialize.apply(OpenFlags::default());
        assert!(serialized.contains(OpenFlags::SQLITE_OPEN_FULL_MUTEX));
        assert!(!serialized.contains(OpenFlags::SQLITE_OPEN_NO_MUTEX));
        let parallel = ExecutionMode::Parallelize.apply(serialized);
        assert!(parallel.contains(OpenFlags::SQLITE_OPEN_NO_MUTEX));
        assert!(!parallel.contains(OpenFlags::SQLITE_OPEN_FULL_MUTEX));
    }
}
