//! Storage capability used by the migrator.
//!
//! The migrator never opens connections itself. It is handed something
//! that implements [`Storage`]: a statement executor plus transaction
//! control, all on one session.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::StorageResult;
use async_trait::async_trait;
use std::collections::HashMap;

/// One result row, keyed by column name.
pub type Record = HashMap<String, serde_json::Value>;

/// Dynamic value type for statement bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

/// A single database session able to run statements and control
/// transactions.
///
/// `begin`, `commit` and `rollback` default to issuing the plain SQL
/// commands through [`execute`](Storage::execute), which is correct for
/// any implementation that keeps one session for its whole lifetime.
#[async_trait]
pub trait Storage: Send {
    /// Run raw SQL without bindings. May contain several statements.
    async fn execute(&mut self, sql: &str) -> StorageResult<()>;

    /// Run one statement with positional bindings (`$1`, `$2`, ...).
    /// Returns the number of affected rows.
    async fn execute_with(&mut self, sql: &str, binds: &[SqlValue]) -> StorageResult<u64>;

    /// Run one query with positional bindings and return every row.
    async fn fetch_all(&mut self, sql: &str, binds: &[SqlValue]) -> StorageResult<Vec<Record>>;

    async fn begin(&mut self) -> StorageResult<()> {
        self.execute("BEGIN").await
    }

    async fn commit(&mut self) -> StorageResult<()> {
        self.execute("COMMIT").await
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        self.execute("ROLLBACK").await
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for Box<S> {
    async fn execute(&mut self, sql: &str) -> StorageResult<()> {
        (**self).execute(sql).await
    }

    async fn execute_with(&mut self, sql: &str, binds: &[SqlValue]) -> StorageResult<u64> {
        (**self).execute_with(sql, binds).await
    }

    async fn fetch_all(&mut self, sql: &str, binds: &[SqlValue]) -> StorageResult<Vec<Record>> {
        (**self).fetch_all(sql, binds).await
    }

    async fn begin(&mut self) -> StorageResult<()> {
        (**self).begin().await
    }

    async fn commit(&mut self) -> StorageResult<()> {
        (**self).commit().await
    }

    async fn rollback(&mut self) -> StorageResult<()> {
        (**self).rollback().await
    }
}
