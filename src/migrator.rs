//! The orchestrator: works out what is pending and applies it in order.
//!
//! ```text
//! run()
//!  ├── ledger.ensure()           create table if absent (fatal on error)
//!  ├── ledger.list_applied()     what is already done
//!  ├── source.list_definitions() what exists, sorted
//!  └── for each pending, in order
//!       └── applier.apply()      BEGIN → body → record → COMMIT
//! ```
//!
//! A failed migration is counted and the run moves on to the next one.

use crate::applier::{Applier, Outcome};
use crate::config::LedgerReadPolicy;
use crate::definition::MigrationDefinition;
use crate::error::MigrateResult;
use crate::ledger::{Ledger, LedgerEntry};
use crate::source::Source;
use crate::store::Storage;

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A migration that failed during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub identifier: String,
    pub step: String,
    pub error: String,
}

/// Tally of one `run()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunResult {
    /// Identifiers applied by this run, in application order.
    pub applied: Vec<String>,
    pub failed: Vec<Failure>,
}

impl RunResult {
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Applied,
    Pending,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationState::Applied => write!(f, "applied"),
            MigrationState::Pending => write!(f, "pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub identifier: String,
    pub state: MigrationState,
    pub applied_at: Option<String>,
}

/// Read-only snapshot of the schema state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    /// Number of known definitions.
    pub total: usize,
    /// Number of known definitions present in the ledger.
    pub applied: usize,
    pub pending: Vec<String>,
    /// Every known definition, in source order.
    pub migrations: Vec<MigrationStatus>,
    /// Ledger identifiers with no matching definition.
    pub orphaned: Vec<String>,
    /// False when the ledger could not be read and was treated as empty.
    pub ledger_available: bool,
}

/// Keep `definitions` absent from `applied`, preserving order.
pub fn pending_set(
    definitions: Vec<MigrationDefinition>,
    applied: &[String],
) -> Vec<MigrationDefinition> {
    let applied: HashSet<&str> = applied.iter().map(String::as_str).collect();
    definitions
        .into_iter()
        .filter(|d| !applied.contains(d.identifier.as_str()))
        .collect()
}

/// Drives migrations from a [`Source`] into a [`Storage`].
pub struct Migrator<S, Src> {
    storage: S,
    source: Src,
    ledger: Ledger,
    applier: Applier,
    ledger_read: LedgerReadPolicy,
}

impl<S: Storage, Src: Source> Migrator<S, Src> {
    pub fn new(storage: S, source: Src) -> Self {
        Self {
            storage,
            source,
            ledger: Ledger::default(),
            applier: Applier::default(),
            ledger_read: LedgerReadPolicy::default(),
        }
    }

    pub fn with_ledger(mut self, ledger: Ledger) -> Self {
        self.applier = Applier::new(ledger.clone());
        self.ledger = ledger;
        self
    }

    pub fn with_ledger_read(mut self, policy: LedgerReadPolicy) -> Self {
        self.ledger_read = policy;
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    async fn applied_identifiers(&mut self) -> MigrateResult<Vec<String>> {
        match self.ledger_read {
            LedgerReadPolicy::Abort => self.ledger.list_applied(&mut self.storage).await,
            LedgerReadPolicy::Degrade => {
                Ok(self.ledger.list_applied_or_empty(&mut self.storage).await)
            }
        }
    }

    async fn existing_entries(&mut self) -> MigrateResult<Vec<LedgerEntry>> {
        if !self.ledger.exists(&mut self.storage).await? {
            debug!(table = %self.ledger.table(), "ledger not created yet");
            return Ok(Vec::new());
        }
        self.ledger.entries(&mut self.storage).await
    }

    /// Definitions not yet in the ledger, in application order.
    pub async fn pending(&mut self) -> MigrateResult<Vec<MigrationDefinition>> {
        let applied = self.applied_identifiers().await?;
        let definitions = self.source.list_definitions()?;
        Ok(pending_set(definitions, &applied))
    }

    /// Apply every pending migration, one at a time.
    ///
    /// Returns `Err` only if the ledger cannot be created, read (under
    /// [`LedgerReadPolicy::Abort`]) or the source cannot be listed. Failed
    /// migrations are reported in the [`RunResult`].
    pub async fn run(&mut self) -> MigrateResult<RunResult> {
        self.ledger.ensure(&mut self.storage).await?;
        let pending = self.pending().await?;

        info!(pending = pending.len(), "starting migration run");
        let mut result = RunResult::default();

        for definition in &pending {
            match self.applier.apply(&mut self.storage, definition).await {
                Outcome::Applied { identifier, .. } => result.applied.push(identifier),
                Outcome::Failed {
                    identifier,
                    step,
                    error,
                } => result.failed.push(Failure {
                    identifier,
                    step: step.to_string(),
                    error,
                }),
            }
        }

        info!(
            applied = result.applied_count(),
            failed = result.failed_count(),
            "migration run finished"
        );
        Ok(result)
    }

    /// Report applied and pending migrations without changing anything.
    ///
    /// An absent ledger counts as empty. An unreadable one also counts as
    /// empty, with `ledger_available` cleared.
    pub async fn status(&mut self) -> MigrateResult<Status> {
        let (entries, ledger_available) = match self.existing_entries().await {
            Ok(entries) => (entries, true),
            Err(e) => {
                warn!(error = %e, "could not read ledger, reporting nothing as applied");
                (Vec::new(), false)
            }
        };
        let definitions = self.source.list_definitions()?;

        let by_name: HashMap<&str, &LedgerEntry> =
            entries.iter().map(|e| (e.name.as_str(), e)).collect();
        let known: HashSet<&str> = definitions.iter().map(|d| d.identifier.as_str()).collect();

        let migrations: Vec<MigrationStatus> = definitions
            .iter()
            .map(|d| match by_name.get(d.identifier.as_str()) {
                Some(entry) => MigrationStatus {
                    identifier: d.identifier.clone(),
                    state: MigrationState::Applied,
                    applied_at: entry.applied_at.clone(),
                },
                None => MigrationStatus {
                    identifier: d.identifier.clone(),
                    state: MigrationState::Pending,
                    applied_at: None,
                },
            })
            .collect();

        let pending: Vec<String> = migrations
            .iter()
            .filter(|m| m.state == MigrationState::Pending)
            .map(|m| m.identifier.clone())
            .collect();

        let orphaned = entries
            .iter()
            .filter(|e| !known.contains(e.name.as_str()))
            .map(|e| e.name.clone())
            .collect();

        Ok(Status {
            total: definitions.len(),
            applied: definitions.len() - pending.len(),
            pending,
            migrations,
            orphaned,
            ledger_available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: &str) -> MigrationDefinition {
        MigrationDefinition::new(id, format!("CREATE TABLE t_{} (id int)", id))
    }

    #[test]
    fn test_pending_set_preserves_order() {
        let defs = vec![def("0001_a"), def("0002_b"), def("0003_c"), def("0004_d")];
        let applied = vec!["0003_c".to_string(), "0001_a".to_string()];
        let ids: Vec<String> = pending_set(defs, &applied)
            .into_iter()
            .map(|d| d.identifier)
            .collect();
        assert_eq!(ids, vec!["0002_b", "0004_d"]);
    }

    #[test]
    fn test_pending_set_ignores_unknown_ledger_rows() {
        let applied = vec!["9999_gone".to_string()];
        assert_eq!(pending_set(vec![def("0001_a")], &applied).len(), 1);
    }

    #[test]
    fn test_run_result_counts() {
        let result = RunResult {
            applied: vec!["a".into(), "c".into()],
            failed: vec![Failure {
                identifier: "b".into(),
                step: "body".into(),
                error: "boom".into(),
            }],
        };
        assert_eq!(result.applied_count(), 2);
        assert_eq!(result.failed_count(), 1);
        assert!(!result.is_clean());
    }

    #[test]
    fn test_run_result_json_shape() {
        let result = RunResult {
            applied: vec!["0001_a".into()],
            failed: vec![Failure {
                identifier: "0002_b".into(),
                step: "commit".into(),
                error: "could not serialize access".into(),
            }],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["applied"], serde_json::json!(["0001_a"]));
        assert_eq!(json["failed"][0]["identifier"], "0002_b");
        assert_eq!(json["failed"][0]["step"], "commit");
    }
}
