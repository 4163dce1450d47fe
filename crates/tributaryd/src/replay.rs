//! Replay producer: newline-delimited JSON events from a file.
//!
//! Stands in for a live capture process. The offset is the line cursor,
//! which makes restart semantics easy to see: the engine persists the
//! cursor after each applied event and hands it back on the next start.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use tributary::common::{EngineError, Result};
use tributary::config::ConnectorConfig;
use tributary::producer::EventProducer;

const BATCH_SIZE: usize = 64;

/// [`EventProducer`] over an ndjson file.
#[derive(Debug)]
pub struct ReplayProducer {
    path: PathBuf,
    lines: Vec<String>,
    cursor: usize,
    last_batch_start: Option<usize>,
}

impl ReplayProducer {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lines: Vec::new(),
            cursor: 0,
            last_batch_start: None,
        }
    }
}

#[async_trait]
impl EventProducer for ReplayProducer {
    async fn start(&mut self, config: &ConnectorConfig) -> Result<()> {
        let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            EngineError::producer(format!("cannot read {}: {e}", self.path.display()))
        })?;
        self.lines = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        info!(
            connector = %config.name,
            path = %self.path.display(),
            events = self.lines.len(),
            "replay producer loaded"
        );
        Ok(())
    }

    async fn fetch_events(&mut self) -> Result<Vec<String>> {
        if self.cursor >= self.lines.len() {
            return Ok(Vec::new());
        }
        let end = (self.cursor + BATCH_SIZE).min(self.lines.len());
        let batch = self.lines[self.cursor..end].to_vec();
        self.last_batch_start = Some(self.cursor);
        self.cursor = end;
        Ok(batch)
    }

    async fn get_offset(&mut self) -> Result<String> {
        Ok(self.cursor.to_string())
    }

    async fn set_offset(&mut self, offset: &str) -> Result<()> {
        self.cursor = offset
            .trim()
            .parse::<usize>()
            .map_err(|_| EngineError::producer(format!("bad replay offset '{offset}'")))?;
        Ok(())
    }

    async fn request_redelivery(&mut self) -> bool {
        match self.last_batch_start.take() {
            Some(start) => {
                self.cursor = start;
                true
            }
            None => false,
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.lines.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> ConnectorConfig {
        serde_yaml::from_str(
            r#"
name: c1
flavor: mysql
host: h
port: 3306
user: u
credential: p
source_database: s
destination_database: d
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_replay_and_offsets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"a\":1}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"b\":2}}").unwrap();

        let mut producer = ReplayProducer::new(file.path().to_path_buf());
        producer.start(&sample_config()).await.unwrap();

        let batch = producer.fetch_events().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(producer.get_offset().await.unwrap(), "2");
        assert!(producer.fetch_events().await.unwrap().is_empty());

        // rewinding replays from the stored cursor
        producer.set_offset("1").await.unwrap();
        assert_eq!(producer.fetch_events().await.unwrap(), vec!["{\"b\":2}"]);
    }

    #[tokio::test]
    async fn test_redelivery_rewinds_once() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{}}").unwrap();

        let mut producer = ReplayProducer::new(file.path().to_path_buf());
        producer.start(&sample_config()).await.unwrap();
        producer.fetch_events().await.unwrap();
        assert!(producer.request_redelivery().await);
        assert_eq!(producer.fetch_events().await.unwrap().len(), 1);
        producer.fetch_events().await.unwrap();
        producer.request_redelivery().await;
        assert!(!producer.request_redelivery().await);
    }
}
