//! Event producer seam and offset persistence
//!
//! The producer is the external process or library that captures upstream
//! changes and hands them over as JSON strings. The engine only pulls:
//! fetch a batch, read or write the opaque offset, stop. Offset strings are
//! persisted verbatim to a per-connector file so a restarted producer can
//! resume where the last applied event left off.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::common::{EngineError, Result};
use crate::config::ConnectorConfig;

/// Pull interface over the upstream change producer.
#[async_trait]
pub trait EventProducer: Send {
    /// Blocking initialization; called once before the first fetch.
    async fn start(&mut self, config: &ConnectorConfig) -> Result<()>;

    /// Non-blocking pull of the next batch; may return empty.
    async fn fetch_events(&mut self) -> Result<Vec<String>>;

    /// Opaque offset descriptor for the last delivered event.
    async fn get_offset(&mut self) -> Result<String>;

    /// Rewind or advance the producer to a stored offset.
    async fn set_offset(&mut self, offset: &str) -> Result<()>;

    /// Ask for the current batch to be delivered again. Producers that
    /// cannot redeliver return `false` and the retry strategy degrades to
    /// skip.
    async fn request_redelivery(&mut self) -> bool {
        false
    }

    /// Idempotent shutdown.
    async fn stop(&mut self) -> Result<()>;
}

/// Per-connector offset file: `<metadata_dir>/<flavor>_<name>_offsets.dat`.
///
/// Writes go to a temp file first and rename into place, so a crash never
/// leaves a half-written offset behind.
#[derive(Debug, Clone)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(metadata_dir: &Path, file_name: &str) -> Self {
        Self {
            path: metadata_dir.join(file_name),
        }
    }

    pub fn for_connector(config: &ConnectorConfig) -> Self {
        Self::new(&config.metadata_dir, &config.offset_file_name())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the metadata directory; an existing one is fine.
    pub async fn ensure_dir(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await.map_err(|e| {
                EngineError::config(format!(
                    "cannot create metadata directory {}: {e}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }

    /// Load the stored offset, `None` when no file exists yet.
    pub async fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::producer(format!(
                "cannot read offset file {}: {e}",
                self.path.display()
            ))),
        }
    }

    /// Persist an offset string atomically.
    pub async fn save(&self, offset: &str) -> Result<()> {
        let tmp = self.path.with_extension("dat.tmp");
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(offset.as_bytes()).await?;
        file.sync_all().await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "persisted offset");
        Ok(())
    }

    /// Remove the offset file; missing files are tolerated.
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                info!(path = %self.path.display(), "cleared offset file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path(), "mysql_conn_offsets.dat");
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path(), "mysql_conn_offsets.dat");
        store.ensure_dir().await.unwrap();
        store
            .save(r#"{"file":"mysql-bin.000003","pos":"12345"}"#)
            .await
            .unwrap();
        assert_eq!(
            store.load().await.unwrap().as_deref(),
            Some(r#"{"file":"mysql-bin.000003","pos":"12345"}"#)
        );
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path(), "o.dat");
        store.save("first").await.unwrap();
        store.save("second").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_ensure_dir_tolerates_existing() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("meta");
        let store = OffsetStore::new(&nested, "o.dat");
        store.ensure_dir().await.unwrap();
        store.ensure_dir().await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_clear_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path(), "o.dat");
        store.clear().await.unwrap();
        store.save("x").await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }
}
