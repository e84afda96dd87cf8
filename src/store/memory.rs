//! In-process storage with an in-memory ledger and stub execution.
//!
//! Statements that mention the ledger table are interpreted (create,
//! select, insert). Everything else is recorded verbatim in an execution
//! log, one entry per `;`-separated statement, unless it matches an
//! injected failure pattern. Transactions snapshot the whole state, so a
//! rollback discards both ledger rows and logged statements.

use super::{Record, SqlValue, Storage};
use crate::error::{StorageError, StorageResult};
use crate::ledger::DEFAULT_LEDGER_TABLE;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
struct LedgerRow {
    id: i64,
    name: String,
    applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct State {
    ledger_exists: bool,
    rows: Vec<LedgerRow>,
    executed: Vec<String>,
    next_id: i64,
}

/// Storage double used by tests and by callers embedding the migrator
/// without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger_table: String,
    state: State,
    snapshot: Option<State>,
    fail_patterns: Vec<String>,
    fail_ledger_create: bool,
    fail_ledger_read: bool,
    fail_commit: bool,
    fail_rollback: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_ledger_table(DEFAULT_LEDGER_TABLE)
    }

    pub fn with_ledger_table(table: &str) -> Self {
        Self {
            ledger_table: table.to_string(),
            state: State {
                next_id: 1,
                ..State::default()
            },
            ..Self::default()
        }
    }

    /// Any non-ledger statement containing `pattern` fails.
    pub fn fail_on(mut self, pattern: &str) -> Self {
        self.fail_patterns.push(pattern.to_string());
        self
    }

    /// Drop every injected failure, keeping ledger and log intact.
    pub fn clear_failures(&mut self) {
        self.fail_patterns.clear();
        self.fail_ledger_create = false;
        self.fail_ledger_read = false;
        self.fail_commit = false;
        self.fail_rollback = false;
    }

    pub fn fail_ledger_create(mut self) -> Self {
        self.fail_ledger_create = true;
        self
    }

    pub fn fail_ledger_read(mut self) -> Self {
        self.fail_ledger_read = true;
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    /// `ROLLBACK` reports an error. The open transaction is still
    /// discarded, as when the server aborts it but the reply is lost.
    pub fn fail_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    /// Seed the ledger as if `names` had been applied by an earlier run.
    pub fn with_applied<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state.ledger_exists = true;
        for name in names {
            self.push_row(name.into());
        }
        self
    }

    /// Committed ledger identifiers, in application order.
    pub fn applied(&self) -> Vec<String> {
        self.state.rows.iter().map(|r| r.name.clone()).collect()
    }

    /// Committed non-ledger statements, in execution order.
    pub fn executed(&self) -> &[String] {
        &self.state.executed
    }

    pub fn ledger_exists(&self) -> bool {
        self.state.ledger_exists
    }

    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    fn push_row(&mut self, name: String) {
        let id = self.state.next_id;
        self.state.next_id += 1;
        self.state.rows.push(LedgerRow {
            id,
            name,
            applied_at: Utc::now(),
        });
    }

    fn begin_tx(&mut self) -> StorageResult<()> {
        if self.snapshot.is_some() {
            return Err(StorageError::Transaction(
                "there is already a transaction in progress".into(),
            ));
        }
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit_tx(&mut self) -> StorageResult<()> {
        if self.snapshot.is_none() {
            return Err(StorageError::Transaction(
                "there is no transaction in progress".into(),
            ));
        }
        if self.fail_commit {
            return Err(StorageError::Transaction("could not serialize access".into()));
        }
        self.snapshot = None;
        Ok(())
    }

    fn rollback_tx(&mut self) -> StorageResult<()> {
        if let Some(saved) = self.snapshot.take() {
            self.state = saved;
        }
        if self.fail_rollback {
            return Err(StorageError::Transaction("server closed the connection".into()));
        }
        Ok(())
    }

    fn touches_ledger(&self, sql: &str) -> bool {
        sql.contains(&self.ledger_table)
    }

    fn missing_ledger(&self) -> StorageError {
        StorageError::Execution(format!(
            "relation \"{}\" does not exist",
            self.ledger_table
        ))
    }

    fn run_ledger_statement(&mut self, sql: &str, binds: &[SqlValue]) -> StorageResult<u64> {
        let upper = sql.trim_start().to_uppercase();

        if upper.starts_with("CREATE TABLE") {
            if self.fail_ledger_create {
                return Err(StorageError::Execution("permission denied for schema public".into()));
            }
            self.state.ledger_exists = true;
            return Ok(0);
        }

        if !self.state.ledger_exists {
            return Err(self.missing_ledger());
        }

        if upper.starts_with("INSERT") {
            let name = match binds.first() {
                Some(SqlValue::Text(name)) => name.clone(),
                _ => {
                    return Err(StorageError::Execution(
                        "null value in column \"name\" violates not-null constraint".into(),
                    ));
                }
            };
            if self.state.rows.iter().any(|r| r.name == name) {
                return Err(StorageError::Execution(format!(
                    "duplicate key value violates unique constraint \"{}_name_key\"",
                    self.ledger_table
                )));
            }
            self.push_row(name);
            return Ok(1);
        }

        Err(StorageError::Execution(format!(
            "unsupported ledger statement: {}",
            sql.trim()
        )))
    }

    fn run_body(&mut self, sql: &str) -> StorageResult<()> {
        for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(pattern) = self
                .fail_patterns
                .iter()
                .find(|p| statement.contains(p.as_str()))
            {
                return Err(StorageError::Execution(format!(
                    "statement failed near \"{}\"",
                    pattern
                )));
            }
            self.state.executed.push(statement.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn execute(&mut self, sql: &str) -> StorageResult<()> {
        match sql.trim().to_uppercase().as_str() {
            "BEGIN" => return self.begin_tx(),
            "COMMIT" => return self.commit_tx(),
            "ROLLBACK" => return self.rollback_tx(),
            _ => {}
        }
        if self.touches_ledger(sql) {
            return self.run_ledger_statement(sql, &[]).map(|_| ());
        }
        self.run_body(sql)
    }

    async fn execute_with(&mut self, sql: &str, binds: &[SqlValue]) -> StorageResult<u64> {
        if self.touches_ledger(sql) {
            return self.run_ledger_statement(sql, binds);
        }
        self.run_body(sql)?;
        Ok(0)
    }

    async fn fetch_all(&mut self, sql: &str, _binds: &[SqlValue]) -> StorageResult<Vec<Record>> {
        if !self.touches_ledger(sql) {
            return Ok(Vec::new());
        }
        if self.fail_ledger_read {
            return Err(StorageError::Connection("connection reset by peer".into()));
        }
        if sql.to_uppercase().contains("TO_REGCLASS") {
            let mut record = Record::new();
            record.insert("present".into(), self.state.ledger_exists.into());
            return Ok(vec![record]);
        }
        if !self.state.ledger_exists {
            return Err(self.missing_ledger());
        }

        let mut rows = self.state.rows.clone();
        rows.sort_by_key(|r| r.id);
        Ok(rows
            .into_iter()
            .map(|r| {
                let mut record = Record::new();
                record.insert("id".into(), r.id.into());
                record.insert("name".into(), r.name.into());
                record.insert("applied_at".into(), r.applied_at.to_rfc3339().into());
                record
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_discards_statements_and_rows() {
        let mut store = MemoryStore::new().with_applied(["0001_init"]);

        store.begin().await.unwrap();
        store.execute("CREATE TABLE users (id int)").await.unwrap();
        store
            .execute_with(
                "INSERT INTO _schema_migrations (name) VALUES ($1)",
                &["0002_users".into()],
            )
            .await
            .unwrap();
        assert!(store.in_transaction());
        store.rollback().await.unwrap();

        assert!(!store.in_transaction());
        assert_eq!(store.applied(), vec!["0001_init"]);
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name() {
        let mut store = MemoryStore::new().with_applied(["0001_init"]);
        let err = store
            .execute_with(
                "INSERT INTO _schema_migrations (name) VALUES ($1)",
                &["0001_init".into()],
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("duplicate key"));
    }

    #[tokio::test]
    async fn test_failure_pattern_stops_mid_body() {
        let mut store = MemoryStore::new().fail_on("BROKEN");
        let err = store
            .execute("CREATE TABLE a (id int); BROKEN STATEMENT; CREATE TABLE b (id int)")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("BROKEN"));
        assert_eq!(store.executed(), ["CREATE TABLE a (id int)"]);
    }

    #[tokio::test]
    async fn test_failed_rollback_still_discards_transaction() {
        let mut store = MemoryStore::new().fail_rollback();

        store.begin().await.unwrap();
        store.execute("CREATE TABLE users (id int)").await.unwrap();
        assert!(store.rollback().await.is_err());

        assert!(!store.in_transaction());
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_select_before_create_fails() {
        let mut store = MemoryStore::new();
        assert!(
            store
                .fetch_all("SELECT name FROM _schema_migrations", &[])
                .await
                .is_err()
        );
    }
}
