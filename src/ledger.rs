//! The ledger: a table recording which migrations have been applied.
//!
//! ```text
//! _schema_migrations
//! ├── id          SERIAL PRIMARY KEY
//! ├── name        VARCHAR(255) NOT NULL UNIQUE
//! └── applied_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! ```
//!
//! Rows are only ever inserted, and only by the applier on a successful
//! migration.

use crate::error::{MigrateError, MigrateResult, StorageResult};
use crate::store::{Record, SqlValue, Storage};

use serde::Serialize;
use tracing::{debug, warn};

/// Table name used when none is configured.
pub const DEFAULT_LEDGER_TABLE: &str = "_schema_migrations";

/// One applied migration as persisted in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub applied_at: Option<String>,
}

impl LedgerEntry {
    fn from_record(record: &Record) -> Option<Self> {
        let name = record.get("name")?.as_str()?.to_string();
        Some(Self {
            id: record.get("id").and_then(|v| v.as_i64()).unwrap_or_default(),
            name,
            applied_at: record
                .get("applied_at")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }
}

/// Builds and runs the ledger's SQL against a [`Storage`].
#[derive(Debug, Clone)]
pub struct Ledger {
    table: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            table: DEFAULT_LEDGER_TABLE.to_string(),
        }
    }
}

impl Ledger {
    /// Create a ledger over `table`, which must be a plain identifier
    /// (optionally schema-qualified).
    pub fn new(table: &str) -> MigrateResult<Self> {
        if !is_plain_identifier(table) {
            return Err(MigrateError::InvalidIdentifier(table.to_string()));
        }
        Ok(Self {
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
             id SERIAL PRIMARY KEY,\n    \
             name VARCHAR(255) NOT NULL UNIQUE,\n    \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()\n)",
            self.table
        )
    }

    pub fn select_sql(&self) -> String {
        format!(
            "SELECT id, name, applied_at FROM {} ORDER BY id ASC",
            self.table
        )
    }

    pub fn exists_sql(&self) -> String {
        format!(
            "SELECT to_regclass('{}') IS NOT NULL AS present",
            self.table
        )
    }

    pub fn insert_sql(&self) -> String {
        format!("INSERT INTO {} (name) VALUES ($1)", self.table)
    }

    /// Create the ledger table if it does not exist yet.
    pub async fn ensure<S: Storage + ?Sized>(&self, storage: &mut S) -> MigrateResult<()> {
        storage
            .execute(&self.create_sql())
            .await
            .map_err(|e| MigrateError::LedgerUnavailable(e.to_string()))?;
        debug!(table = %self.table, "ledger ready");
        Ok(())
    }

    /// Whether the ledger table has been created. Never creates it.
    pub async fn exists<S: Storage + ?Sized>(&self, storage: &mut S) -> MigrateResult<bool> {
        let records = storage
            .fetch_all(&self.exists_sql(), &[])
            .await
            .map_err(|e| MigrateError::LedgerUnavailable(e.to_string()))?;
        Ok(records
            .first()
            .and_then(|r| r.get("present"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Every ledger row, ordered by application.
    pub async fn entries<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
    ) -> MigrateResult<Vec<LedgerEntry>> {
        let records = storage
            .fetch_all(&self.select_sql(), &[])
            .await
            .map_err(|e| MigrateError::LedgerUnavailable(e.to_string()))?;
        Ok(records.iter().filter_map(LedgerEntry::from_record).collect())
    }

    /// Applied identifiers, ordered by application.
    pub async fn list_applied<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
    ) -> MigrateResult<Vec<String>> {
        Ok(self
            .entries(storage)
            .await?
            .into_iter()
            .map(|e| e.name)
            .collect())
    }

    /// Like [`list_applied`](Self::list_applied), but a failed read is
    /// logged and reported as an empty ledger.
    pub async fn list_applied_or_empty<S: Storage + ?Sized>(&self, storage: &mut S) -> Vec<String> {
        match self.list_applied(storage).await {
            Ok(names) => names,
            Err(e) => {
                warn!(table = %self.table, error = %e, "could not read ledger, treating as empty");
                Vec::new()
            }
        }
    }

    /// Insert the row marking `name` as applied. Callers run this inside
    /// the migration's own transaction.
    pub async fn record<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        name: &str,
    ) -> StorageResult<()> {
        storage
            .execute_with(&self.insert_sql(), &[SqlValue::from(name)])
            .await?;
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, optionally once dot-qualified.
fn is_plain_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() > 2 {
        return false;
    }
    parts.iter().all(|part| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_identifier_validation() {
        assert!(Ledger::new("_schema_migrations").is_ok());
        assert!(Ledger::new("ops.schema_migrations").is_ok());
        assert!(Ledger::new("").is_err());
        assert!(Ledger::new("1table").is_err());
        assert!(Ledger::new("bad; DROP TABLE users").is_err());
        assert!(Ledger::new("a.b.c").is_err());
    }

    #[test]
    fn test_create_sql_is_idempotent_ddl() {
        let sql = Ledger::default().create_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS _schema_migrations"));
        assert!(sql.contains("name VARCHAR(255) NOT NULL UNIQUE"));
        assert!(sql.contains("DEFAULT NOW()"));
    }

    #[tokio::test]
    async fn test_ensure_twice() {
        let ledger = Ledger::default();
        let mut store = MemoryStore::new();
        ledger.ensure(&mut store).await.unwrap();
        ledger.ensure(&mut store).await.unwrap();
        assert!(store.ledger_exists());
        assert!(ledger.list_applied(&mut store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_applied_in_application_order() {
        let ledger = Ledger::default();
        let mut store = MemoryStore::new().with_applied(["0003_c", "0001_a"]);
        assert_eq!(
            ledger.list_applied(&mut store).await.unwrap(),
            vec!["0003_c", "0001_a"]
        );
    }

    #[tokio::test]
    async fn test_read_failure_degrades_to_empty() {
        let ledger = Ledger::default();
        let mut store = MemoryStore::new().with_applied(["0001_a"]).fail_ledger_read();

        assert!(matches!(
            ledger.list_applied(&mut store).await,
            Err(MigrateError::LedgerUnavailable(_))
        ));
        assert!(ledger.list_applied_or_empty(&mut store).await.is_empty());
    }

    #[tokio::test]
    async fn test_exists_tracks_creation() {
        let ledger = Ledger::default();
        let mut store = MemoryStore::new();
        assert!(!ledger.exists(&mut store).await.unwrap());
        ledger.ensure(&mut store).await.unwrap();
        assert!(ledger.exists(&mut store).await.unwrap());
    }

    #[tokio::test]
    async fn test_exists_propagates_read_failure() {
        let ledger = Ledger::default();
        let mut store = MemoryStore::new().fail_ledger_read();
        assert!(matches!(
            ledger.exists(&mut store).await,
            Err(MigrateError::LedgerUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_create_failure_propagates() {
        let ledger = Ledger::default();
        let mut store = MemoryStore::new().fail_ledger_create();
        assert!(matches!(
            ledger.ensure(&mut store).await,
            Err(MigrateError::LedgerUnavailable(_))
        ));
    }
}
