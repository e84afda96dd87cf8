//! Applying one migration inside its own transaction.
//!
//! `BEGIN` → body → ledger insert → `COMMIT`. Any failing step rolls the
//! whole transaction back, so the ledger and the schema always agree.

use crate::definition::MigrationDefinition;
use crate::error::StorageError;
use crate::ledger::Ledger;
use crate::store::Storage;

use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What happened to one migration.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Applied {
        identifier: String,
        elapsed: Duration,
    },
    Failed {
        identifier: String,
        step: Step,
        error: String,
    },
}

impl Outcome {
    pub fn identifier(&self) -> &str {
        match self {
            Outcome::Applied { identifier, .. } | Outcome::Failed { identifier, .. } => identifier,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

/// The transactional step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Begin,
    Body,
    Record,
    Commit,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Begin => write!(f, "begin"),
            Step::Body => write!(f, "body"),
            Step::Record => write!(f, "record"),
            Step::Commit => write!(f, "commit"),
        }
    }
}

/// Applies definitions one at a time against a storage session.
#[derive(Debug, Clone, Default)]
pub struct Applier {
    ledger: Ledger,
}

impl Applier {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    /// Apply `definition`, never returning a storage error to the caller.
    pub async fn apply<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        definition: &MigrationDefinition,
    ) -> Outcome {
        let identifier = definition.identifier.as_str();
        info!(migration = %identifier, "applying migration");
        let started = Instant::now();

        match self.run_transaction(storage, definition).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                info!(
                    migration = %identifier,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "migration applied"
                );
                Outcome::Applied {
                    identifier: identifier.to_string(),
                    elapsed,
                }
            }
            Err((step, e)) => {
                error!(migration = %identifier, %step, error = %e, "migration failed");
                if step != Step::Begin {
                    if let Err(rollback_err) = storage.rollback().await {
                        warn!(
                            migration = %identifier,
                            error = %rollback_err,
                            "rollback failed"
                        );
                    }
                }
                Outcome::Failed {
                    identifier: identifier.to_string(),
                    step,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn run_transaction<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        definition: &MigrationDefinition,
    ) -> Result<(), (Step, StorageError)> {
        storage.begin().await.map_err(|e| (Step::Begin, e))?;
        storage
            .execute(&definition.body)
            .await
            .map_err(|e| (Step::Body, e))?;
        self.ledger
            .record(&mut *storage, &definition.identifier)
            .await
            .map_err(|e| (Step::Record, e))?;
        storage.commit().await.map_err(|e| (Step::Commit, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn def(id: &str, body: &str) -> MigrationDefinition {
        MigrationDefinition::new(id, body)
    }

    async fn ready_store(mut store: MemoryStore) -> MemoryStore {
        Ledger::default().ensure(&mut store).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_apply_records_and_commits() {
        let mut store = ready_store(MemoryStore::new()).await;
        let outcome = Applier::default()
            .apply(&mut store, &def("0001_users", "CREATE TABLE users (id int)"))
            .await;

        assert!(outcome.is_applied());
        assert_eq!(outcome.identifier(), "0001_users");
        assert_eq!(store.applied(), vec!["0001_users"]);
        assert_eq!(store.executed(), ["CREATE TABLE users (id int)"]);
        assert!(!store.in_transaction());
    }

    #[tokio::test]
    async fn test_partial_body_is_rolled_back() {
        let mut store = ready_store(MemoryStore::new().fail_on("BOOM")).await;
        let outcome = Applier::default()
            .apply(
                &mut store,
                &def("0001_half", "CREATE TABLE half (id int); BOOM;"),
            )
            .await;

        match outcome {
            Outcome::Failed { step, error, .. } => {
                assert_eq!(step, Step::Body);
                assert!(error.contains("BOOM"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(store.applied().is_empty());
        assert!(store.executed().is_empty());
        assert!(!store.in_transaction());
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_original_error() {
        let mut store = ready_store(MemoryStore::new().fail_on("BOOM").fail_rollback()).await;
        let outcome = Applier::default()
            .apply(&mut store, &def("0001_half", "CREATE TABLE half (id int); BOOM;"))
            .await;

        match outcome {
            Outcome::Failed { step, error, .. } => {
                assert_eq!(step, Step::Body);
                assert!(error.contains("BOOM"));
                assert!(!error.contains("server closed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(store.applied().is_empty());
        assert!(!store.in_transaction());
    }

    #[tokio::test]
    async fn test_missing_ledger_fails_at_record() {
        let mut store = MemoryStore::new();
        let outcome = Applier::default()
            .apply(&mut store, &def("0001_a", "CREATE TABLE a (id int)"))
            .await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                step: Step::Record,
                ..
            }
        ));
        assert!(store.executed().is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_leaves_nothing_applied() {
        let mut store = ready_store(MemoryStore::new().fail_commit()).await;
        let outcome = Applier::default()
            .apply(&mut store, &def("0001_a", "CREATE TABLE a (id int)"))
            .await;

        assert!(matches!(
            outcome,
            Outcome::Failed {
                step: Step::Commit,
                ..
            }
        ));
        assert!(store.applied().is_empty());
        assert!(!store.in_transaction());
    }
}
