//! ---
//! upd_section: "01-core-functionality"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Update lifecycle controller and session state."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use updraft_common::{SkipPersistence, UpdateConfig};

#[derive(Debug, Error)]
pub enum SkipStoreError {
    #[error("failed to access skipped versions at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("skipped versions file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Where declined versions are remembered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipStore {
    /// Only for the running process.
    Session,
    /// JSON array on disk, rewritten atomically on every change.
    Disk(PathBuf),
}

impl SkipStore {
    pub fn from_config(config: &UpdateConfig) -> Self {
        match config.skip_persistence {
            SkipPersistence::Session => SkipStore::Session,
            SkipPersistence::Disk => SkipStore::Disk(config.skipped_path.clone()),
        }
    }

    pub fn load(&self) -> Result<BTreeSet<String>, SkipStoreError> {
        let SkipStore::Disk(path) = self else {
            return Ok(BTreeSet::new());
        };
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => {
                return Err(SkipStoreError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        let versions: Vec<String> =
            serde_json::from_str(&raw).map_err(|source| SkipStoreError::Corrupt {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), count = versions.len(), "loaded skipped versions");
        Ok(versions.into_iter().collect())
    }

    pub fn save(&self, skipped: &BTreeSet<String>) -> Result<(), SkipStoreError> {
        let SkipStore::Disk(path) = self else {
            return Ok(());
        };
        write_atomic(path, skipped).map_err(|source| SkipStoreError::Io {
            path: path.clone(),
            source,
        })
    }

    pub fn clear(&self) -> Result<(), SkipStoreError> {
        self.save(&BTreeSet::new())
    }
}

fn write_atomic(path: &Path, skipped: &BTreeSet<String>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(&skipped.iter().collect::<Vec<_>>())
        .map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&body)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_store_never_touches_disk() {
        let store = SkipStore::Session;
        let set: BTreeSet<String> = ["2.0.0".to_owned()].into();
        store.save(&set).expect("save");
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn disk_store_round_trips_and_clears() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SkipStore::Disk(dir.path().join("state/skipped.json"));
        assert!(store.load().expect("missing file is empty").is_empty());

        let set: BTreeSet<String> = ["2.0.0".to_owned(), "2.1.0".to_owned()].into();
        store.save(&set).expect("save");
        assert_eq!(store.load().expect("load"), set);
        assert!(!dir.path().join("state/skipped.json.tmp").exists());

        store.clear().expect("clear");
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("skipped.json");
        fs::write(&path, "{not json").expect("write");
        let err = SkipStore::Disk(path).load().expect_err("corrupt");
        assert!(matches!(err, SkipStoreError::Corrupt { .. }));
    }
}
