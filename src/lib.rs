//! # schemaledger: SQL migrations tracked in a ledger
//!
//! Every `.sql` file in the migrations directory is a migration. Its file
//! name (minus the suffix) is its identifier, and identifiers are applied
//! in lexical order, so timestamp prefixes give chronological order.
//! A migration runs once: on success its identifier is written to the
//! ledger table in the same transaction as its body.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use schemaledger::prelude::*;
//!
//! let store = PgStore::connect("postgres://localhost/app").await?;
//! let mut migrator = Migrator::new(store, DirSource::new("migrations"));
//!
//! let result = migrator.run().await?;
//! println!("{} applied, {} failed", result.applied_count(), result.failed_count());
//! ```
//!
//! ## Lifecycle of one identifier
//!
//! | State    | Meaning                                   |
//! |----------|-------------------------------------------|
//! | pending  | file exists, no ledger row                |
//! | applying | transaction open                          |
//! | applied  | body and ledger row committed (terminal)  |
//! | failed   | rolled back; pending again next run       |

pub mod applier;
pub mod config;
pub mod definition;
pub mod error;
pub mod ledger;
pub mod migrator;
pub mod source;
pub mod store;

pub mod prelude {
    pub use crate::applier::{Applier, Outcome, Step};
    pub use crate::config::{Config, LedgerReadPolicy};
    pub use crate::definition::MigrationDefinition;
    pub use crate::error::*;
    pub use crate::ledger::{Ledger, LedgerEntry};
    pub use crate::migrator::{MigrationState, Migrator, RunResult, Status};
    pub use crate::source::{DirSource, MemorySource, Source};
    pub use crate::store::{MemoryStore, PgStore, Storage};
}
