//! Resolution of stored local file references.
//!
//! Upload references written by older deployments are absolute paths into
//! directories that no longer exist. Resolution tries, in order:
//!
//! 1. the reference as given (absolute, or relative to the working directory)
//! 2. the reference relative to canonical storage
//! 3. the file name alone in canonical storage
//! 4. a stored file whose name ends in `-<name>` or `_<name>` (uploads are
//!    saved with a unique prefix); the most recently modified match wins

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;

use bindery_shared::ItemError;

/// Maps item `sourceRef` values to files on disk.
#[derive(Debug, Clone)]
pub struct PathResolver {
    storage_dir: PathBuf,
}

impl PathResolver {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
        }
    }

    /// Resolve `reference` to an existing file.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, ItemError> {
        let missing = || ItemError::MissingLocalFile {
            reference: reference.to_string(),
        };

        let cleaned = reference.trim();
        let cleaned = cleaned.strip_prefix("file://").unwrap_or(cleaned);
        if cleaned.is_empty() {
            return Err(missing());
        }

        let direct = Path::new(cleaned);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }

        if direct.is_relative() {
            let stored = self.storage_dir.join(direct);
            if stored.is_file() {
                return Ok(stored);
            }
        }

        let name = file_name(cleaned).ok_or_else(missing)?;
        let by_name = self.storage_dir.join(name);
        if by_name.is_file() {
            debug!(reference, resolved = %by_name.display(), "resolved by file name");
            return Ok(by_name);
        }

        let found = self.find_prefixed(name).ok_or_else(missing)?;
        debug!(reference, resolved = %found.display(), "resolved by suffix match");
        Ok(found)
    }

    fn find_prefixed(&self, name: &str) -> Option<PathBuf> {
        let dash = format!("-{name}");
        let underscore = format!("_{name}");

        std::fs::read_dir(&self.storage_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let entry_name = entry.file_name();
                let entry_name = entry_name.to_string_lossy();
                entry_name.ends_with(&dash) || entry_name.ends_with(&underscore)
            })
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                meta.is_file().then(|| {
                    let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                    (modified, entry.path())
                })
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
            .map(|(_, path)| path)
    }
}

/// Last component of a path written with either separator.
fn file_name(reference: &str) -> Option<&str> {
    reference
        .rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
}
