//! JSON persistence for the archive.
//!
//! The snapshot is the archive serialized with `serde_json`. Writes go to a
//! sibling temp file that is then renamed over the target, so a crash mid-write
//! never leaves a truncated snapshot behind. Any failure here is fatal for the
//! run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::Archive;
use crate::error::ArchiveError;

/// File name of the live snapshot inside the output directory.
pub const SNAPSHOT_FILE: &str = "archive.json";

/// Path of the live snapshot for an output directory.
pub fn snapshot_path(output_dir: &Path) -> PathBuf {
    output_dir.join(SNAPSHOT_FILE)
}

impl Archive {
    /// Atomically write the snapshot to `path`.
    pub fn save(&self, path: &Path) -> Result<(), ArchiveError> {
        let io_err = |source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_vec_pretty(self).map_err(|e| ArchiveError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(io_err)?;
            file.write_all(&json).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp, path).map_err(io_err)?;

        tracing::debug!(
            path = %path.display(),
            candidates = self.len(),
            iteration = self.iteration(),
            "Archive snapshot written"
        );
        Ok(())
    }

    /// Load and validate a snapshot.
    pub fn load(path: &Path) -> Result<Self, ArchiveError> {
        let contents = fs::read_to_string(path).map_err(|source| ArchiveError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let archive: Archive =
            serde_json::from_str(&contents).map_err(|e| ArchiveError::Malformed {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        archive
            .check_invariants()
            .map_err(|message| ArchiveError::Malformed {
                path: path.to_path_buf(),
                message,
            })?;

        tracing::info!(
            path = %path.display(),
            run_id = %archive.run_id(),
            iteration = archive.iteration(),
            candidates = archive.len(),
            "Archive snapshot loaded"
        );
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::sample_config;
    use tempfile::TempDir;

    #[test]
    fn save_then_load_preserves_state() {
        let tmp = TempDir::new().expect("tempdir");
        let path = snapshot_path(tmp.path());

        let mut archive = Archive::new(42);
        let a = archive.mint(sample_config("alpha"), None, 1);
        let b = archive.mint(sample_config("beta"), Some(a), 1);
        archive.activate(a).unwrap();
        archive.retire(b, "validation failed").unwrap();
        archive.apply_observation(a, 0.75).unwrap();
        archive.record_tokens(a, 1200).unwrap();
        archive.advance_iteration();
        archive.set_quiet_iterations(2);

        archive.save(&path).unwrap();
        let loaded = Archive::load(&path).unwrap();

        assert_eq!(loaded.run_id(), archive.run_id());
        assert_eq!(loaded.seed(), 42);
        assert_eq!(loaded.iteration(), 1);
        assert_eq!(loaded.total_pulls(), 1);
        assert_eq!(loaded.quiet_iterations(), 2);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(a).unwrap().stats, archive.get(a).unwrap().stats);
        assert_eq!(loaded.get(b).unwrap().parent, Some(a));

        // Ids keep increasing after a reload.
        let mut loaded = loaded;
        let c = loaded.mint(sample_config("gamma"), None, 2);
        assert!(c > b);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = snapshot_path(tmp.path());
        Archive::new(1).save(&path).unwrap();

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![SNAPSHOT_FILE.to_string()]);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let tmp = TempDir::new().expect("tempdir");
        let err = Archive::load(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn load_rejects_corrupt_json() {
        let tmp = TempDir::new().expect("tempdir");
        let path = snapshot_path(tmp.path());
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Archive::load(&path).unwrap_err(),
            ArchiveError::Malformed { .. }
        ));
    }

    #[test]
    fn load_rejects_inconsistent_counters() {
        let tmp = TempDir::new().expect("tempdir");
        let path = snapshot_path(tmp.path());

        let mut archive = Archive::new(1);
        let a = archive.mint(sample_config("alpha"), None, 1);
        archive.activate(a).unwrap();
        archive.apply_observation(a, 1.0).unwrap();
        archive.save(&path).unwrap();

        let mut value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        value["total_pulls"] = serde_json::json!(10);
        fs::write(&path, value.to_string()).unwrap();

        let err = Archive::load(&path).unwrap_err();
        assert!(err.to_string().contains("total_pulls"));
    }
}
