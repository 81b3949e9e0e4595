//! On-disk cache of the reading schema document.
//!
//! The collector serves `GetSchema` from this cache and the watcher keeps a
//! local copy of the collector's answer. A cached document is fresh while the
//! file's modification time is younger than the configured maximum age.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::collector::SchemaDocument;

#[derive(thiserror::Error, Debug)]
pub enum SchemaCacheError {
    #[error("schema cache io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema document encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serializable form of a schema document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSnapshot {
    pub fields: BTreeMap<String, String>,
    pub generated_at: String,
}

impl SchemaSnapshot {
    pub fn new(fields: BTreeMap<String, String>) -> Self {
        Self {
            fields,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl From<SchemaSnapshot> for SchemaDocument {
    fn from(snapshot: SchemaSnapshot) -> Self {
        SchemaDocument {
            fields: snapshot.fields.into_iter().collect::<HashMap<_, _>>(),
            generated_at: snapshot.generated_at,
        }
    }
}

impl From<SchemaDocument> for SchemaSnapshot {
    fn from(document: SchemaDocument) -> Self {
        SchemaSnapshot {
            fields: document.fields.into_iter().collect(),
            generated_at: document.generated_at,
        }
    }
}

/// File backed schema document cache
#[derive(Debug)]
pub struct SchemaCache {
    path: PathBuf,
    max_age: Duration,
    refresh_lock: Mutex<()>,
}

impl SchemaCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SchemaCacheError {
        SchemaCacheError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// The cached document if the file exists, is fresh and decodes.
    pub async fn load_fresh(&self) -> Result<Option<SchemaSnapshot>, SchemaCacheError> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let modified = metadata.modified().map_err(|e| self.io_error(e))?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            debug!(path = %self.path.display(), age_secs = age.as_secs(), "Schema cache is stale");
            return Ok(None);
        }

        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable schema cache");
                Ok(None)
            }
        }
    }

    /// Write the document, replacing any previous file atomically
    pub async fn store(&self, snapshot: &SchemaSnapshot) -> Result<(), SchemaCacheError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        Ok(())
    }

    /// Serve the cached document while fresh, otherwise run `refresh` and
    /// store its result.
    ///
    /// Concurrent callers with a stale cache refresh once.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<SchemaSnapshot, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SchemaSnapshot, E>>,
        E: From<SchemaCacheError>,
    {
        if let Some(snapshot) = self.load_fresh().await? {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(snapshot) = self.load_fresh().await? {
            return Ok(snapshot);
        }

        let snapshot = refresh().await?;
        self.store(&snapshot).await?;
        debug!(path = %self.path.display(), fields = snapshot.fields.len(), "Schema cache refreshed");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn sample() -> SchemaSnapshot {
        let mut fields = BTreeMap::new();
        fields.insert("location_id".to_string(), "integer".to_string());
        fields.insert("temperature".to_string(), "decimal".to_string());
        SchemaSnapshot::new(fields)
    }

    fn age_file(path: &Path, age: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_missing_cache_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SchemaCache::new(dir.path().join("schema.json"), Duration::from_secs(60));
        assert!(cache.load_fresh().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_cache_is_served_without_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SchemaCache::new(dir.path().join("nested/schema.json"), Duration::from_secs(60));

        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let refresh = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SchemaCacheError>(sample())
        };

        let first = cache.get_or_refresh(refresh).await.unwrap();
        let second = cache.get_or_refresh(refresh).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let document_a = SchemaDocument::from(first);
        let document_b = SchemaDocument::from(second);
        assert_eq!(document_a, document_b);
    }

    #[tokio::test]
    async fn test_stale_cache_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        let cache = SchemaCache::new(&path, Duration::from_secs(5 * 86_400));

        let mut old = sample();
        old.generated_at = "2020-01-01T00:00:00+00:00".to_string();
        cache.store(&old).await.unwrap();
        age_file(&path, Duration::from_secs(6 * 86_400));

        let refreshed: SchemaSnapshot = cache
            .get_or_refresh(|| async { Ok::<_, SchemaCacheError>(sample()) })
            .await
            .unwrap();
        assert_ne!(refreshed.generated_at, old.generated_at);

        let on_disk = cache.load_fresh().await.unwrap().unwrap();
        assert_eq!(on_disk, refreshed);
    }

    #[tokio::test]
    async fn test_corrupt_cache_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, b"{broken").unwrap();
        let cache = SchemaCache::new(&path, Duration::from_secs(60));

        assert!(cache.load_fresh().await.unwrap().is_none());
        let snapshot: SchemaSnapshot = cache
            .get_or_refresh(|| async { Ok::<_, SchemaCacheError>(sample()) })
            .await
            .unwrap();
        assert_eq!(snapshot.fields.len(), 2);
    }

    #[test]
    fn test_document_conversion() {
        let snapshot = sample();
        let document = SchemaDocument::from(snapshot.clone());
        assert_eq!(document.fields.get("temperature").map(String::as_str), Some("decimal"));
        assert_eq!(SchemaSnapshot::from(document), snapshot);
    }
}
