//! Migration definitions and creating new ones on disk.

use crate::error::{MigrateError, MigrateResult};

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Layout of the identifier prefix; sorts lexically in time order.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// One named, ordered unit of schema-changing SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationDefinition {
    /// Sortable identifier, e.g. `20240101120000_add_users`.
    pub identifier: String,
    /// Executable SQL, possibly several statements.
    pub body: String,
}

impl MigrationDefinition {
    pub fn new(identifier: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            body: body.into(),
        }
    }
}

/// Lowercase `name`, collapsing every run of non-alphanumerics into one
/// `_` and trimming them from both ends.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }

    out
}

/// Build `<timestamp>_<normalized name>` for a migration created at `at`.
pub fn new_identifier(name: &str, at: DateTime<Utc>) -> MigrateResult<String> {
    let normalized = normalize_name(name);
    if normalized.is_empty() {
        return Err(MigrateError::usage(
            "migration name must contain at least one letter or digit",
        ));
    }
    Ok(format!("{}_{}", at.format(TIMESTAMP_FORMAT), normalized))
}

/// Write a new, empty migration file into `dir` and return its path.
///
/// The directory is created if needed. An existing file with the same
/// name is never overwritten.
pub fn create_definition_file(
    dir: &Path,
    name: &str,
    extension: &str,
    at: DateTime<Utc>,
) -> MigrateResult<PathBuf> {
    let identifier = new_identifier(name, at)?;

    std::fs::create_dir_all(dir)?;

    let path = dir.join(format!("{}{}", identifier, extension));
    if path.exists() {
        return Err(MigrateError::usage(format!(
            "{} already exists",
            path.display()
        )));
    }

    let content = format!(
        "-- Migration: {}\n-- Created: {}\n\n",
        identifier,
        at.to_rfc3339()
    );
    std::fs::write(&path, content)?;

    Ok(path)
}
