//! Entity registry: one independent series per observed entity.
//!
//! A registry maps raw entity identifiers (an interface name, a disk name, a
//! UPS name) to their series, creating each lazily on first sighting. Raw
//! ids can be hierarchical (`ide/host0/bus0/target0/lun0/disc`), so they are
//! sanitized into storage-safe keys; two distinct raw ids that sanitize to
//! the same key are a hard collision error, never a silent merge. The
//! key→raw mapping is persisted so collisions are detected across runs.
//!
//! Exclusion filtering (loopback interfaces, ramdisks, …) is deliberately
//! not the registry's business — callers filter before registering. Entries
//! are never removed automatically: an entity that disappears from the live
//! system keeps its history until an explicit prune.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};
use crate::schema::SeriesSpec;
use crate::series::Series;
use crate::storage;

/// Name of the entity index file in a data directory.
pub const ENTITY_INDEX_FILE: &str = "entities.json";

/// Persisted sanitized-key → raw-id mapping.
#[derive(Debug, Default, Serialize, Deserialize)]
struct EntityIndex {
    entities: BTreeMap<String, String>,
}

/// Registry of entities sharing one schema within one data directory.
#[derive(Debug)]
pub struct Registry {
    dir: PathBuf,
    spec: SeriesSpec,
    entities: BTreeMap<String, String>,
    open: HashMap<String, Series>,
}

impl Registry {
    /// Opens (provisioning if needed) a data directory for `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid, the directory cannot be
    /// provisioned, the directory was provisioned with a different schema,
    /// or the entity index is corrupted.
    pub fn open<P: AsRef<Path>>(dir: P, spec: SeriesSpec) -> Result<Self> {
        spec.validate()?;
        let dir = dir.as_ref().to_path_buf();
        storage::ensure_dir(&dir)?;
        storage::ensure_spec_sidecar(&dir, &spec)?;

        let index_path = dir.join(ENTITY_INDEX_FILE);
        let entities = if index_path.exists() {
            let json =
                fs::read_to_string(&index_path).map_err(|e| RegistryError::IndexIo {
                    path: index_path.display().to_string(),
                    source: e,
                })?;
            let index: EntityIndex =
                serde_json::from_str(&json).map_err(|e| RegistryError::IndexCorrupted {
                    path: index_path.display().to_string(),
                    source: e,
                })?;
            index.entities
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            dir,
            spec,
            entities,
            open: HashMap::new(),
        })
    }

    /// Sanitizes a raw entity id into a storage-safe key.
    ///
    /// Path separators and other characters unsafe in a file name are
    /// replaced with `.`, the same flattening the hierarchical device names
    /// of old kernels get (`ide/host0/.../disc` → `ide.host0....disc`).
    pub fn sanitize_key(raw: &str) -> String {
        raw.chars()
            .map(|c| {
                if c == '/' || c == '\\' || c == ':' || c.is_whitespace() || c.is_control() {
                    '.'
                } else {
                    c
                }
            })
            .collect()
    }

    /// Returns the series for `raw_id`, creating its artifact on first
    /// sighting.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidEntityId`] for an empty id.
    /// - [`RegistryError::KeyCollision`] if a different raw id already owns
    ///   the sanitized key.
    /// - Artifact errors from provisioning or schema validation.
    pub fn get_or_create(&mut self, raw_id: &str) -> Result<&mut Series> {
        if raw_id.is_empty() {
            return Err(RegistryError::InvalidEntityId {
                id: raw_id.to_string(),
                reason: "entity id cannot be empty".to_string(),
            }
            .into());
        }

        let key = Self::sanitize_key(raw_id);
        match self.entities.get(&key) {
            Some(existing) if existing != raw_id => {
                return Err(RegistryError::KeyCollision {
                    key,
                    existing: existing.clone(),
                    id: raw_id.to_string(),
                }
                .into());
            }
            Some(_) => {}
            None => {
                self.entities.insert(key.clone(), raw_id.to_string());
                self.save_index()?;
            }
        }

        match self.open.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let series = storage::ensure_series_artifact(&self.dir, entry.key(), &self.spec)?;
                Ok(entry.insert(series))
            }
        }
    }

    /// Returns the already-open series for `raw_id`, if any.
    pub fn get(&self, raw_id: &str) -> Option<&Series> {
        self.open.get(&Self::sanitize_key(raw_id))
    }

    /// Iterates `(sanitized_key, raw_id)` pairs of every known entity,
    /// including ones from previous runs that have not been opened yet.
    pub fn entities(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entities
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of known entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entity has ever been registered.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the schema shared by every series in this registry.
    pub fn spec(&self) -> &SeriesSpec {
        &self.spec
    }

    /// Returns the data directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Flushes every open series artifact to disk.
    ///
    /// # Errors
    ///
    /// Returns the first sync failure encountered.
    pub fn sync_all(&self) -> Result<()> {
        for series in self.open.values() {
            series.sync()?;
        }
        Ok(())
    }

    fn save_index(&self) -> Result<()> {
        let index_path = self.dir.join(ENTITY_INDEX_FILE);
        let index = EntityIndex {
            entities: self.entities.clone(),
        };
        let json = serde_json::to_string_pretty(&index).map_err(|e| {
            RegistryError::IndexCorrupted {
                path: index_path.display().to_string(),
                source: e,
            }
        })?;
        fs::write(&index_path, json).map_err(|e| {
            RegistryError::IndexIo {
                path: index_path.display().to_string(),
                source: e,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArchiveSpec, DataSourceSpec};
    use std::time::Duration;
    use tempfile::tempdir;

    fn spec() -> SeriesSpec {
        let step = Duration::from_secs(300);
        SeriesSpec::new(
            step,
            vec![DataSourceSpec::gauge("v", step * 2)],
            vec![ArchiveSpec::new(step, Duration::from_secs(86_400))],
        )
        .unwrap()
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(Registry::sanitize_key("eth0"), "eth0");
        assert_eq!(
            Registry::sanitize_key("ide/host0/bus0/target0/lun0/disc"),
            "ide.host0.bus0.target0.lun0.disc"
        );
        assert_eq!(Registry::sanitize_key("ups one"), "ups.one");
        assert_eq!(Registry::sanitize_key("a:b\\c"), "a.b.c");
    }

    #[test]
    fn test_lazy_creation_and_reuse() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::open(dir.path().join("disks"), spec()).unwrap();
        assert!(registry.is_empty());

        registry.get_or_create("sda").unwrap();
        registry.get_or_create("sdb").unwrap();
        assert_eq!(registry.len(), 2);

        // Same id returns the same series, not a new artifact.
        let series = registry.get_or_create("sda").unwrap();
        series.record("v", 1.0, 3000).unwrap();
        assert_eq!(registry.get("sda").unwrap().last_update(), 3000);
    }

    #[test]
    fn test_collision_is_an_error() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::open(dir.path().join("disks"), spec()).unwrap();

        registry.get_or_create("ide/disc").unwrap();
        let result = registry.get_or_create("ide.disc");
        assert!(matches!(
            result.unwrap_err(),
            crate::GlimpseError::Registry(RegistryError::KeyCollision { .. })
        ));
    }

    #[test]
    fn test_collision_detected_across_runs() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("disks");

        {
            let mut registry = Registry::open(&data_dir, spec()).unwrap();
            registry.get_or_create("ide/disc").unwrap();
        }

        // A fresh process must still refuse the colliding id.
        let mut registry = Registry::open(&data_dir, spec()).unwrap();
        assert_eq!(registry.len(), 1);
        let result = registry.get_or_create("ide.disc");
        assert!(matches!(
            result.unwrap_err(),
            crate::GlimpseError::Registry(RegistryError::KeyCollision { .. })
        ));
    }

    #[test]
    fn test_empty_id_rejected() {
        let dir = tempdir().unwrap();
        let mut registry = Registry::open(dir.path().join("disks"), spec()).unwrap();
        assert!(registry.get_or_create("").is_err());
    }

    #[test]
    fn test_history_survives_reopen() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("counters");

        {
            let mut registry = Registry::open(&data_dir, spec()).unwrap();
            let series = registry.get_or_create("eth0").unwrap();
            series.record("v", 1.0, 3000).unwrap();
            series.record("v", 2.0, 3300).unwrap();
            registry.sync_all().unwrap();
        }

        let mut registry = Registry::open(&data_dir, spec()).unwrap();
        let series = registry.get_or_create("eth0").unwrap();
        assert_eq!(series.last_update(), 3300);
        let points = series.query("v", 2700, None).unwrap().collect_points();
        assert_eq!(points, vec![(3300, Some(1.0))]);
    }

    #[test]
    fn test_schema_change_rejected() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("counters");

        {
            Registry::open(&data_dir, spec()).unwrap();
        }

        let step = Duration::from_secs(60);
        let other = SeriesSpec::new(
            step,
            vec![DataSourceSpec::gauge("v", step * 2)],
            vec![ArchiveSpec::new(step, Duration::from_secs(86_400))],
        )
        .unwrap();
        assert!(Registry::open(&data_dir, other).is_err());
    }
}
