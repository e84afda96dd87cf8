//! Where migration definitions come from.

use crate::definition::MigrationDefinition;
use crate::error::{MigrateError, MigrateResult};

use std::path::{Path, PathBuf};
use tracing::debug;

/// Default file suffix for migration files.
pub const DEFAULT_EXTENSION: &str = ".sql";

/// Produces every known migration definition, sorted by identifier.
pub trait Source {
    fn list_definitions(&self) -> MigrateResult<Vec<MigrationDefinition>>;
}

/// Scans one directory for migration files.
///
/// The identifier is the file name without its suffix, so
/// `20240101120000_add_users.sql` becomes `20240101120000_add_users`.
#[derive(Debug, Clone)]
pub struct DirSource {
    dir: PathBuf,
    extension: String,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_extension(dir, DEFAULT_EXTENSION)
    }

    pub fn with_extension(dir: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn identifier_for(&self, file_name: &str) -> Option<String> {
        let stem = file_name.strip_suffix(&self.extension)?;
        if stem.is_empty() || stem.starts_with('.') {
            return None;
        }
        Some(stem.to_string())
    }
}

impl Source for DirSource {
    fn list_definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        if !self.dir.exists() {
            debug!(dir = %self.dir.display(), "migrations directory missing, nothing to list");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| read_error(&self.dir, e))?;

        let mut definitions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| read_error(&self.dir, e))?;
            let path = entry.path();
            let file_name = entry.file_name();
            let Some(identifier) = file_name.to_str().and_then(|n| self.identifier_for(n)) else {
                continue;
            };
            // Follows symlinks, so linked migration files count as files.
            let metadata = std::fs::metadata(&path).map_err(|e| read_error(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let body = std::fs::read_to_string(&path).map_err(|e| read_error(&path, e))?;
            definitions.push(MigrationDefinition::new(identifier, body));
        }

        definitions.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        debug!(dir = %self.dir.display(), count = definitions.len(), "listed migrations");
        Ok(definitions)
    }
}

fn read_error(path: &Path, e: std::io::Error) -> MigrateError {
    MigrateError::Source(format!("Failed to read {}: {}", path.display(), e))
}

/// Definitions held in memory, in any order.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    definitions: Vec<MigrationDefinition>,
}

impl MemorySource {
    pub fn new(definitions: Vec<MigrationDefinition>) -> Self {
        Self { definitions }
    }

    pub fn push(&mut self, definition: MigrationDefinition) {
        self.definitions.push(definition);
    }
}

impl<I, B> FromIterator<(I, B)> for MemorySource
where
    I: Into<String>,
    B: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (I, B)>>(iter: T) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(id, body)| MigrationDefinition::new(id, body))
                .collect(),
        )
    }
}

impl Source for MemorySource {
    fn list_definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        let mut definitions = self.definitions.clone();
        definitions.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(definitions)
    }
}

impl<S: Source + ?Sized> Source for Box<S> {
    fn list_definitions(&self) -> MigrateResult<Vec<MigrationDefinition>> {
        (**self).list_definitions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(defs: &[MigrationDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.identifier.as_str()).collect()
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirSource::new(tmp.path().join("does-not-exist"));
        assert!(source.list_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_dir_listing_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path();
        std::fs::write(dir.join("20240103_c.sql"), "CREATE TABLE c (id int);").unwrap();
        std::fs::write(dir.join("20240101_a.sql"), "CREATE TABLE a (id int);").unwrap();
        std::fs::write(dir.join("20240102_b.sql"), "CREATE TABLE b (id int);").unwrap();
        std::fs::write(dir.join("README.md"), "notes").unwrap();
        std::fs::write(dir.join(".sql"), "").unwrap();
        std::fs::create_dir(dir.join("20240104_dir.sql")).unwrap();

        let defs = DirSource::new(dir).list_definitions().unwrap();
        assert_eq!(ids(&defs), vec!["20240101_a", "20240102_b", "20240103_c"]);
        assert_eq!(defs[0].body, "CREATE TABLE a (id int);");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_is_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = tmp.path().join("shared");
        let dir = tmp.path().join("migrations");
        std::fs::create_dir(&shared).unwrap();
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(shared.join("a.sql"), "CREATE TABLE a (id int);").unwrap();
        std::os::unix::fs::symlink(shared.join("a.sql"), dir.join("20240101_a.sql")).unwrap();

        let defs = DirSource::new(&dir).list_definitions().unwrap();
        assert_eq!(ids(&defs), vec!["20240101_a"]);
        assert_eq!(defs[0].body, "CREATE TABLE a (id int);");
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_a_source_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(
            tmp.path().join("gone.sql"),
            tmp.path().join("20240101_a.sql"),
        )
        .unwrap();

        let err = DirSource::new(tmp.path()).list_definitions().unwrap_err();
        assert!(matches!(err, MigrateError::Source(ref msg) if msg.contains("20240101_a.sql")));
    }

    #[test]
    fn test_custom_extension() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("0001_a.up.sql"), "SELECT 1").unwrap();
        std::fs::write(tmp.path().join("0002_b.sql"), "SELECT 2").unwrap();

        let defs = DirSource::with_extension(tmp.path(), ".up.sql")
            .list_definitions()
            .unwrap();
        assert_eq!(ids(&defs), vec!["0001_a"]);
    }

    #[test]
    fn test_memory_source_sorts() {
        let source: MemorySource = [("20240102_b", "b"), ("20240101_a", "a")]
            .into_iter()
            .collect();
        assert_eq!(
            ids(&source.list_definitions().unwrap()),
            vec!["20240101_a", "20240102_b"]
        );
    }
}
