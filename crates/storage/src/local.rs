use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::backend::StorageBackend;
use crate::StorageError;

const PARTIAL_MARKER: &str = ".partial-";

/// Storage backend rooted at a local directory.
///
/// Writes land in a hidden sibling first and are renamed into place, so readers never observe a
/// half-written object.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StorageError::io(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let trimmed = key.trim_end_matches('/');
        if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
            return Err(StorageError::InvalidKey(key.to_owned()));
        }
        let mut path = self.root.clone();
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StorageError::InvalidKey(key.to_owned()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    fn partial_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        dest.with_file_name(format!(".{name}{PARTIAL_MARKER}{}", Uuid::new_v4().simple()))
    }

    async fn ensure_parent(&self, key: &str, dest: &Path) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(key, e))?;
        }
        Ok(())
    }

    async fn commit(&self, key: &str, partial: &Path, dest: &Path) -> Result<(), StorageError> {
        if let Err(e) = tokio::fs::rename(partial, dest).await {
            let _ = tokio::fs::remove_file(partial).await;
            return Err(StorageError::io(key, e));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for LocalStorage {
    async fn put_file(&self, key: &str, source: &Path) -> Result<u64, StorageError> {
        let dest = self.resolve(key)?;
        self.ensure_parent(key, &dest).await?;
        let partial = Self::partial_path(&dest);
        let written = match tokio::fs::copy(source, &partial).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(StorageError::io(key, e));
            }
        };
        self.commit(key, &partial, &dest).await?;
        Ok(written)
    }

    async fn put_file_new(&self, key: &str, source: &Path) -> Result<u64, StorageError> {
        let dest = self.resolve(key)?;
        self.ensure_parent(key, &dest).await?;
        let partial = Self::partial_path(&dest);
        let linked = match tokio::fs::copy(source, &partial).await {
            // hard_link refuses an existing destination, unlike rename
            Ok(n) => tokio::fs::hard_link(&partial, &dest).await.map(|()| n),
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&partial).await;
        linked.map_err(|e| StorageError::io(key, e))
    }

    async fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let dest = self.resolve(key)?;
        self.ensure_parent(key, &dest).await?;
        let partial = Self::partial_path(&dest);
        if let Err(e) = tokio::fs::write(&partial, bytes).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(StorageError::io(key, e));
        }
        self.commit(key, &partial, &dest).await
    }

    async fn get_to_file(&self, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let source = self.resolve(key)?;
        tokio::fs::copy(&source, dest)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let source = self.resolve(key)?;
        tokio::fs::read(&source)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn size(&self, key: &str) -> Result<u64, StorageError> {
        let path = self.resolve(key)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StorageError::io(key, e))?;
        Ok(meta.len())
    }

    async fn last_modified(&self, key: &str) -> Result<DateTime<Utc>, StorageError> {
        let path = self.resolve(key)?;
        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map_err(|e| StorageError::io(key, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.resolve(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.resolve(prefix)?;
        let prefix = prefix.trim_end_matches('/').to_owned();
        tokio::task::spawn_blocking(move || {
            let mut keys = Vec::new();
            walk(&base, &prefix, &mut keys).map_err(|e| StorageError::io(&prefix, e))?;
            keys.sort();
            Ok(keys)
        })
        .await?
    }

    async fn make_directory(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StorageError::io(key, e))
    }
}

fn walk(dir: &Path, key_prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let key = format!("{key_prefix}/{name}");
        if entry.file_type()?.is_dir() {
            walk(&entry.path(), &key, out)?;
        } else if !name.contains(PARTIAL_MARKER) {
            out.push(key);
        }
    }
    Ok(())
}
