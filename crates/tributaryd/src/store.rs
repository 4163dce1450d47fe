//! Config store: the persistent half of the admin surface.
//!
//! Add/delete verbs edit the daemon's YAML file in place, so the connector
//! set survives restarts. Running supervisors are not touched; changes take
//! effect on the next daemon start (or an explicit restart request).

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::config::{ConnectorEntry, DaemonConfig};

/// Reads and rewrites the daemon's YAML config.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn load(&self) -> Result<DaemonConfig> {
        if !self.path.exists() {
            return Ok(DaemonConfig::default());
        }
        DaemonConfig::from_file(&self.path)
    }

    fn save(&self, config: &DaemonConfig) -> Result<()> {
        let text = serde_yaml::to_string(config).context("cannot serialize config")?;
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, text)
            .with_context(|| format!("cannot write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("cannot replace {}", self.path.display()))?;
        Ok(())
    }

    pub fn add_connector(&self, entry: ConnectorEntry) -> Result<()> {
        entry.engine.check().map_err(|e| anyhow::anyhow!("{e}"))?;
        let mut config = self.load()?;
        if config
            .connectors
            .iter()
            .any(|c| c.engine.name == entry.engine.name)
        {
            bail!("connector '{}' already exists", entry.engine.name);
        }
        config.connectors.push(entry);
        self.save(&config)
    }

    pub fn delete_connector(&self, name: &str) -> Result<()> {
        let mut config = self.load()?;
        let before = config.connectors.len();
        config.connectors.retain(|c| c.engine.name != name);
        if config.connectors.len() == before {
            bail!("no such connector: {name}");
        }
        self.save(&config)
    }

    pub fn attach_rules(&self, name: &str, rules: &Path) -> Result<()> {
        self.edit(name, |entry| {
            entry.engine.rules_file = Some(rules.to_path_buf());
            Ok(())
        })
    }

    pub fn detach_rules(&self, name: &str) -> Result<()> {
        self.edit(name, |entry| {
            entry.engine.rules_file = None;
            Ok(())
        })
    }

    pub fn set_extra(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.edit(name, |entry| {
            entry.extras.insert(key.to_string(), value.to_string());
            Ok(())
        })
    }

    pub fn unset_extra(&self, name: &str, key: &str) -> Result<()> {
        self.edit(name, |entry| {
            if entry.extras.remove(key).is_none() {
                bail!("connector '{}' has no extra '{key}'", entry.engine.name);
            }
            Ok(())
        })
    }

    fn edit(&self, name: &str, f: impl FnOnce(&mut ConnectorEntry) -> Result<()>) -> Result<()> {
        let mut config = self.load()?;
        let entry = config
            .connectors
            .iter_mut()
            .find(|c| c.engine.name == name)
            .with_context(|| format!("no such connector: {name}"))?;
        f(entry)?;
        self.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: &str = r#"
name: c1
flavor: mysql
host: h
port: 3306
user: u
credential: p
source_database: s
destination_database: d
events_file: /tmp/events.ndjson
"#;

    fn entry() -> ConnectorEntry {
        serde_yaml::from_str(ENTRY).unwrap()
    }

    #[test]
    fn test_add_and_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("t.yaml"));

        store.add_connector(entry()).unwrap();
        let config = store.load().unwrap();
        assert_eq!(config.connectors.len(), 1);
        assert_eq!(config.connectors[0].engine.name, "c1");

        // duplicate names are rejected
        assert!(store.add_connector(entry()).is_err());

        store.delete_connector("c1").unwrap();
        assert!(store.load().unwrap().connectors.is_empty());
        assert!(store.delete_connector("c1").is_err());
    }

    #[test]
    fn test_attach_and_detach_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("t.yaml"));
        store.add_connector(entry()).unwrap();

        store.attach_rules("c1", Path::new("/etc/rules.json")).unwrap();
        let config = store.load().unwrap();
        assert_eq!(
            config.connectors[0].engine.rules_file.as_deref(),
            Some(Path::new("/etc/rules.json"))
        );

        store.detach_rules("c1").unwrap();
        assert!(store.load().unwrap().connectors[0].engine.rules_file.is_none());
        assert!(store.attach_rules("ghost", Path::new("/x")).is_err());
    }

    #[test]
    fn test_extras_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("t.yaml"));
        store.add_connector(entry()).unwrap();

        store.set_extra("c1", "snapshot.fetch.size", "1024").unwrap();
        let config = store.load().unwrap();
        assert_eq!(
            config.connectors[0].extras.get("snapshot.fetch.size"),
            Some(&"1024".to_string())
        );

        store.unset_extra("c1", "snapshot.fetch.size").unwrap();
        assert!(store.load().unwrap().connectors[0].extras.is_empty());
        assert!(store.unset_extra("c1", "missing").is_err());
    }
}
