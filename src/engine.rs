//! Capability the mapping layer needs from a SQL execution engine.

use std::future::Future;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::value::{Params, Row};

/// Outcome of a data-modifying statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    pub rows_affected: usize,
    /// Rowid of the most recent successful insert on the connection
    pub inserted_id: i64,
}

/// Parameterized statement execution against a SQL engine.
///
/// Engine failures are returned unchanged; implementations add no retries.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Runs one DDL or DML statement
    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecuteResult>;

    /// Runs several `;`-separated statements without parameters
    async fn execute_batch(&self, sql: &str) -> Result<()>;

    /// First row of the result, if any
    async fn query_one(&self, sql: &str, params: &Params) -> Result<Option<Row>>;

    async fn query_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>>;

    /// Opens a transaction; fails with [`Error::TransactionActive`] when one
    /// is already open on the connection
    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Number of enclosing units of work; zero outside [`with_transaction`]
    fn transaction_depth(&self) -> u32 {
        0
    }
}

/// Engine handle passed to the body of [`with_transaction`].
///
/// Statements run on the underlying engine. Nested units of work started
/// from this handle become savepoints. Raw `begin`/`commit`/`rollback` are
/// refused while the handle is live.
#[derive(Clone, Copy)]
pub struct Transaction<'e> {
    engine: &'e dyn SqlEngine,
    depth: u32,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("depth", &self.depth).finish()
    }
}

impl Transaction<'_> {
    fn savepoint(&self) -> String {
        format!("sp_{}", self.depth - 1)
    }
}

#[async_trait]
impl SqlEngine for Transaction<'_> {
    async fn execute(&self, sql: &str, params: &Params) -> Result<ExecuteResult> {
        self.engine.execute(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<()> {
        self.engine.execute_batch(sql).await
    }

    async fn query_one(&self, sql: &str, params: &Params) -> Result<Option<Row>> {
        self.engine.query_one(sql, params).await
    }

    async fn query_all(&self, sql: &str, params: &Params) -> Result<Vec<Row>> {
        self.engine.query_all(sql, params).await
    }

    async fn begin(&self) -> Result<()> {
        Err(Error::TransactionActive)
    }

    async fn commit(&self) -> Result<()> {
        Err(Error::TransactionActive)
    }

    async fn rollback(&self) -> Result<()> {
        Err(Error::TransactionActive)
    }

    fn transaction_depth(&self) -> u32 {
        self.depth
    }
}

async fn open(tx: &Transaction<'_>) -> Result<()> {
    match tx.depth {
        1 => tx.engine.begin().await,
        _ => {
            tx.engine
                .execute_batch(&format!("SAVEPOINT {}", tx.savepoint()))
                .await
        }
    }
}

async fn commit(tx: &Transaction<'_>) -> Result<()> {
    match tx.depth {
        1 => tx.engine.commit().await,
        _ => {
            tx.engine
                .execute_batch(&format!("RELEASE SAVEPOINT {}", tx.savepoint()))
                .await
        }
    }
}

async fn rollback(tx: &Transaction<'_>) -> Result<()> {
    match tx.depth {
        1 => tx.engine.rollback().await,
        _ => {
            let savepoint = tx.savepoint();
            tx.engine
                .execute_batch(&format!(
                    "ROLLBACK TO SAVEPOINT {savepoint}; RELEASE SAVEPOINT {savepoint}"
                ))
                .await
        }
    }
}

/// Runs `work` inside a transaction: committed when it returns `Ok`, rolled
/// back when it returns `Err`.
///
/// `work` receives a [`Transaction`] handle. Calling `with_transaction` again
/// with that handle nests a savepoint, which is released or rolled back on
/// its own without ending the outer unit of work. Calling it with the raw
/// engine while a unit of work is open fails with
/// [`Error::TransactionActive`] instead of waiting.
///
/// The transaction belongs to the connection, not to the task. A statement
/// issued by another task through the same engine while `work` is running
/// executes inside this transaction and is committed or rolled back with it.
///
/// A failed commit is rolled back as well. A failed rollback is logged and
/// the original error is returned.
pub async fn with_transaction<'e, F, Fut, T>(engine: &'e dyn SqlEngine, work: F) -> Result<T>
where
    F: FnOnce(Transaction<'e>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tx = Transaction {
        engine,
        depth: engine.transaction_depth() + 1,
    };
    open(&tx).await?;
    tracing::debug!(depth = tx.depth, "unit of work started");
    let outcome = match work(tx).await {
        Ok(value) => commit(&tx).await.map(|_| value),
        Err(err) => Err(err),
    };
    if outcome.is_err() {
        if let Err(rollback_err) = rollback(&tx).await {
            tracing::warn!(depth = tx.depth, error = %rollback_err, "rollback failed");
        }
    }
    outcome
}
