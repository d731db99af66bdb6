/// Last-block file: the one integer carried between probe runs.
///
/// Holds the decimal best block number seen by the last run that evaluated a
/// stall and found the chain had advanced. Uses atomic write pattern: write
/// to temp file then rename.
use std::path::{Path, PathBuf};

/// Errors that can occur reading or writing the last-block file.
#[derive(Debug)]
pub enum StateError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateError::Read { path, source } => {
                write!(f, "failed to read state file {}: {}", path.display(), source)
            }
            StateError::Write { path, source } => {
                write!(f, "failed to write state file {}: {}", path.display(), source)
            }
            StateError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
        }
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StateError::Read { source, .. } => Some(source),
            StateError::Write { source, .. } => Some(source),
            StateError::Rename { source, .. } => Some(source),
        }
    }
}

/// Handle on the persisted last-block file.
#[derive(Debug, Clone)]
pub struct LastBlockFile {
    path: PathBuf,
}

impl LastBlockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make sure the file exists, seeding it with `0` on first run.
    ///
    /// Any read failure counts as a first run. A failed seed write is logged
    /// and otherwise ignored: the probe must still run.
    /// Returns true if the file was (re)initialized.
    pub fn ensure_initialized(&self) -> bool {
        if std::fs::read(&self.path).is_ok() {
            return false;
        }

        tracing::info!(path = %self.path.display(), "initializing last-block file");
        if let Err(e) = self.write(0) {
            tracing::warn!(error = %e, "could not initialize last-block file");
        }
        true
    }

    /// Read the stored block number.
    ///
    /// Returns `Ok(None)` when the file holds something that is not a
    /// non-negative integer; callers treat that as "no prior value".
    pub fn read(&self) -> Result<Option<u64>, StateError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| StateError::Read {
            path: self.path.clone(),
            source: e,
        })?;

        match contents.trim().parse::<u64>() {
            Ok(n) => Ok(Some(n)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "last-block file is not a block number, ignoring its contents"
                );
                Ok(None)
            }
        }
    }

    /// Atomically replace the stored block number.
    pub fn write(&self, block: u64) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "lastblock".to_string());
        let tmp_path = dir.join(format!(".{name}.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, block.to_string()).map_err(|e| StateError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            StateError::Rename {
                from: tmp_path.clone(),
                to: self.path.clone(),
                source: e,
            }
        })?;

        tracing::debug!(block, path = %self.path.display(), "last-block file updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_run_seeds_zero() {
        let dir = tempdir().unwrap();
        let file = LastBlockFile::new(dir.path().join("nodeup.lastblock"));

        assert!(file.ensure_initialized());
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "0");
        assert_eq!(file.read().unwrap(), Some(0));
    }

    #[test]
    fn existing_file_is_left_alone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodeup.lastblock");
        std::fs::write(&path, "4242").unwrap();
        let file = LastBlockFile::new(&path);

        assert!(!file.ensure_initialized());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "4242");
    }

    #[test]
    fn unwritable_location_does_not_panic() {
        let dir = tempdir().unwrap();
        let file = LastBlockFile::new(dir.path().join("missing-dir").join("nodeup.lastblock"));

        assert!(file.ensure_initialized());
        assert!(file.read().is_err());
    }

    #[test]
    fn read_tolerates_trailing_newline() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodeup.lastblock");
        std::fs::write(&path, "1200\n").unwrap();

        assert_eq!(LastBlockFile::new(&path).read().unwrap(), Some(1200));
    }

    #[test]
    fn garbage_reads_as_no_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodeup.lastblock");
        std::fs::write(&path, "not-a-number").unwrap();

        assert_eq!(LastBlockFile::new(&path).read().unwrap(), None);
    }

    #[test]
    fn write_replaces_contents_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let file = LastBlockFile::new(dir.path().join("nodeup.lastblock"));
        file.write(7).unwrap();
        file.write(1_000_001).unwrap();

        assert_eq!(file.read().unwrap(), Some(1_000_001));
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
