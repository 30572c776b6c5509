//! [`RegistryStore`]: whole-file JSON persistence of the key registry.

use std::path::{Path, PathBuf};

use common::{KeyError, RegistryDocument};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors produced by the registry layer.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The file exists but does not hold a valid registry document.
    #[error("registry file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Reading, writing or renaming the file failed.
    #[error("registry file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document could not be serialised.
    #[error("failed to serialise registry: {0}")]
    Serialise(#[from] serde_json::Error),

    /// The file read back after a save differs from what was written.
    #[error("registry file {0} does not match the saved contents")]
    VerifyFailed(PathBuf),
}

impl From<RegistryError> for KeyError {
    fn from(err: RegistryError) -> Self {
        match &err {
            RegistryError::Corrupt { path, source } => KeyError::RegistryCorrupt {
                path: path.display().to_string(),
                detail: source.to_string(),
            },
            _ => KeyError::Registry(err.to_string()),
        }
    }
}

/// What to do when the registry file exists but cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
    /// Surface [`RegistryError::Corrupt`] to the caller.
    #[default]
    Fail,
    /// Move the file aside to `<path>.corrupt` and start from an empty registry.
    /// Earlier quarantined files are kept; later ones get a numeric suffix.
    Quarantine,
}

/// File-backed registry with an in-memory mirror of the last loaded contents.
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    on_corrupt: CorruptPolicy,
    entries: RegistryDocument,
    loaded: bool,
}

impl RegistryStore {
    /// Create a store for `path`. Nothing is read until [`RegistryStore::load`].
    pub fn new(path: impl Into<PathBuf>, on_corrupt: CorruptPolicy) -> Self {
        Self {
            path: path.into(),
            on_corrupt,
            entries: RegistryDocument::new(),
            loaded: false,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory mirror as of the last load or save.
    pub fn entries(&self) -> &RegistryDocument {
        &self.entries
    }

    /// (Re)load the registry from disk.
    ///
    /// A missing file yields an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Corrupt`] if the file is not a valid document
    /// and the policy is [`CorruptPolicy::Fail`], or [`RegistryError::Io`] if
    /// it cannot be read.
    pub async fn load(&mut self) -> Result<&RegistryDocument, RegistryError> {
        self.entries = match read_document(&self.path).await {
            Ok(doc) => doc,
            Err(RegistryError::Corrupt { .. }) if self.on_corrupt == CorruptPolicy::Quarantine => {
                let target = quarantine_target(&self.path).await?;
                tokio::fs::rename(&self.path, &target)
                    .await
                    .map_err(|source| RegistryError::Io {
                        path: self.path.clone(),
                        source,
                    })?;
                warn!(
                    path = %self.path.display(),
                    quarantined = %target.display(),
                    "corrupt key registry moved aside; starting empty"
                );
                RegistryDocument::new()
            }
            Err(e) => return Err(e),
        };
        self.loaded = true;
        debug!(path = %self.path.display(), entries = self.entries.len(), "key registry loaded");
        Ok(&self.entries)
    }

    /// Merge `entries` into the registry and rewrite the whole file.
    ///
    /// Existing names are overwritten; the file is loaded first if this store
    /// has not read it yet, so earlier entries are never dropped. The file is written to a sibling temp
    /// file and renamed into place, then read back and compared with the
    /// in-memory mirror.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation, the write, or the read-back fails,
    /// or if the read-back contents differ.
    pub async fn save(&mut self, entries: RegistryDocument) -> Result<(), RegistryError> {
        if !self.loaded {
            self.load().await?;
        }
        let mut merged = self.entries.clone();
        merged.extend(entries);

        let json = serde_json::to_vec(&merged)?;
        let tmp = temp_path(&self.path);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|source| RegistryError::Io {
                path: tmp.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            if let Err(e) = tokio::fs::remove_file(&tmp).await {
                warn!(path = %tmp.display(), error = %e, "failed to remove temp registry file");
            }
            return Err(RegistryError::Io {
                path: self.path.clone(),
                source,
            });
        }

        let reread = read_document(&self.path).await?;
        if reread != merged {
            self.entries = reread;
            return Err(RegistryError::VerifyFailed(self.path.clone()));
        }
        self.entries = reread;
        info!(path = %self.path.display(), entries = self.entries.len(), "key registry saved");
        Ok(())
    }
}

async fn read_document(path: &Path) -> Result<RegistryDocument, RegistryError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RegistryDocument::new()),
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| RegistryError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

fn quarantine_path(path: &Path) -> PathBuf {
    with_suffix(path, ".corrupt")
}

/// First of `<path>.corrupt`, `<path>.corrupt.1`, ... that does not exist yet.
async fn quarantine_target(path: &Path) -> Result<PathBuf, RegistryError> {
    let mut target = quarantine_path(path);
    let mut n = 1u32;
    while tokio::fs::try_exists(&target)
        .await
        .map_err(|source| RegistryError::Io {
            path: target.clone(),
            source,
        })?
    {
        target = with_suffix(path, &format!(".corrupt.{n}"));
        n += 1;
    }
    Ok(target)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RegistryEntry;
    use serde_json::json;

    fn doc(pairs: &[(&str, RegistryEntry)]) -> RegistryDocument {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RegistryStore::new(dir.path().join("cmk.json"), CorruptPolicy::Fail);
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_fails_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        std::fs::write(&path, b"{not json").unwrap();
        let mut store = RegistryStore::new(&path, CorruptPolicy::Fail);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, RegistryError::Corrupt { .. }));
        assert!(matches!(KeyError::from(err), KeyError::RegistryCorrupt { .. }));
    }

    #[tokio::test]
    async fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        std::fs::write(&path, b"[1, 2").unwrap();
        let mut store = RegistryStore::new(&path, CorruptPolicy::Quarantine);
        assert!(store.load().await.unwrap().is_empty());
        assert!(!path.exists());
        assert_eq!(
            std::fs::read(dir.path().join("cmk.json.corrupt")).unwrap(),
            b"[1, 2"
        );
    }

    #[tokio::test]
    async fn repeated_quarantine_keeps_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        let mut store = RegistryStore::new(&path, CorruptPolicy::Quarantine);

        std::fs::write(&path, b"first").unwrap();
        store.load().await.unwrap();
        std::fs::write(&path, b"second").unwrap();
        store.load().await.unwrap();
        std::fs::write(&path, b"third").unwrap();
        store.load().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("cmk.json.corrupt")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("cmk.json.corrupt.1")).unwrap(), b"second");
        assert_eq!(std::fs::read(dir.path().join("cmk.json.corrupt.2")).unwrap(), b"third");
    }

    #[tokio::test]
    async fn failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        let mut store = RegistryStore::new(&path, CorruptPolicy::Fail);
        store.load().await.unwrap();

        // A non-empty directory in place of the registry file makes the rename fail.
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupant"), b"x").unwrap();

        let err = store
            .save(doc(&[("id-A", RegistryEntry::wrapped_key(vec![1]))]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Io { .. }));
        assert!(!dir.path().join("cmk.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_creates_file_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        let mut store = RegistryStore::new(&path, CorruptPolicy::Fail);
        store.load().await.unwrap();

        store
            .save(doc(&[("id-A", RegistryEntry::wrapped_key(vec![0xBB; 4]))]))
            .await
            .unwrap();
        store
            .save(doc(&[("webBoxIP", json!("10.10.10.12").into())]))
            .await
            .unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            json!({
                "id-A": {"type": "Buffer", "data": [187, 187, 187, 187]},
                "webBoxIP": "10.10.10.12"
            })
        );
        assert!(!dir.path().join("cmk.json.tmp").exists());
    }

    #[tokio::test]
    async fn save_overwrites_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RegistryStore::new(dir.path().join("cmk.json"), CorruptPolicy::Fail);
        store
            .save(doc(&[("k", json!(1).into())]))
            .await
            .unwrap();
        store
            .save(doc(&[("k", json!(2).into())]))
            .await
            .unwrap();
        assert_eq!(store.entries().len(), 1);
        assert_eq!(store.entries()["k"], RegistryEntry::Item(json!(2)));
    }

    #[tokio::test]
    async fn save_without_load_keeps_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        std::fs::write(&path, br#"{"id-A":{"type":"Buffer","data":[9]}}"#).unwrap();

        let mut store = RegistryStore::new(&path, CorruptPolicy::Fail);
        store
            .save(doc(&[("note", json!("x").into())]))
            .await
            .unwrap();
        assert_eq!(store.entries().len(), 2);
        assert_eq!(store.entries()["id-A"].as_wrapped_key(), Some(&[9u8][..]));
    }

    #[tokio::test]
    async fn load_save_reload_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmk.json");
        std::fs::write(
            &path,
            br#"{"id-A":{"type":"Buffer","data":[1,2,3]},"note":"x"}"#,
        )
        .unwrap();

        let mut store = RegistryStore::new(&path, CorruptPolicy::Fail);
        let first = store.load().await.unwrap().clone();
        store.save(first.clone()).await.unwrap();
        let second = store.load().await.unwrap().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn suffix_paths() {
        let p = Path::new("/var/lib/keyman/cmk.json");
        assert_eq!(temp_path(p), PathBuf::from("/var/lib/keyman/cmk.json.tmp"));
        assert_eq!(
            quarantine_path(p),
            PathBuf::from("/var/lib/keyman/cmk.json.corrupt")
        );
    }
}
