//! Agent configuration.
//!
//! One immutable [`AgentConfig`] is built in `main` from command-line
//! arguments and passed by reference into every probe — there is no
//! process-wide mutable configuration. The refresh interval doubles as the
//! series step, so it is validated up front and checked against existing
//! data directories before any collection happens.

use std::path::{Path, PathBuf};
use std::time::Duration;

use glimpse::registry::Registry;
use glimpse::schema::{ArchiveSpec, DataSourceSpec, SeriesSpec};
use glimpse::storage;
use serde::Deserialize;

use crate::error::AgentError;

/// Optional settings file overriding the built-in defaults.
///
/// Everything not present keeps its default; the refresh interval and data
/// directory are deliberately command-line-only so the scheduler entry and
/// the store step cannot drift apart silently.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    /// Interface names to exclude (exact match).
    pub exclude_interfaces: Option<Vec<String>>,
    /// Disk name prefixes to exclude when followed by digits.
    pub exclude_disks: Option<Vec<String>>,
    /// Archive ladder replacing the stock tiers.
    pub archives: Option<Vec<ArchiveSpec>>,
}

impl SettingsFile {
    /// Loads settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SourceRead`] or [`AgentError::SourceParse`].
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        let text = std::fs::read_to_string(path).map_err(|e| AgentError::SourceRead {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| AgentError::SourceParse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Immutable configuration for one collection run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Base directory for all component data.
    pub data_dir: PathBuf,
    /// Refresh interval; equal to the primary step of every series.
    pub refresh: Duration,
    /// Heartbeat applied to every source (twice the refresh interval).
    pub heartbeat: Duration,
    /// Archive ladder shared by every component.
    pub tiers: Vec<ArchiveSpec>,
    /// Interface names excluded from collection (exact match).
    pub exclude_interfaces: Vec<String>,
    /// Disk name prefixes excluded when followed by digits (ram0, loop3, …).
    pub exclude_disks: Vec<String>,
    /// upsd endpoint, or `None` to skip UPS collection entirely.
    pub upsd_addr: Option<String>,
}

impl AgentConfig {
    /// Builds a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::InvalidRefresh`] if `refresh_minutes` cannot
    /// express the archive ladder (it must divide the 15-minute tier).
    pub fn new(data_dir: PathBuf, refresh_minutes: u64) -> Result<Self, AgentError> {
        if refresh_minutes == 0 || 900 % (refresh_minutes * 60) != 0 {
            return Err(AgentError::InvalidRefresh {
                minutes: refresh_minutes,
            });
        }

        let refresh = Duration::from_secs(refresh_minutes * 60);
        Ok(Self {
            data_dir,
            refresh,
            heartbeat: refresh * 2,
            tiers: Self::default_tiers(refresh),
            exclude_interfaces: vec!["lo".to_string()],
            exclude_disks: vec!["ram".to_string(), "fd".to_string(), "loop".to_string()],
            upsd_addr: Some("localhost:3493".to_string()),
        })
    }

    /// Applies a settings file on top of the defaults.
    ///
    /// A replacement archive ladder is validated immediately so a bad file
    /// is reported as a configuration error, not as a per-component failure
    /// halfway through a run.
    ///
    /// # Errors
    ///
    /// Returns a schema validation error for an unusable archive ladder.
    pub fn apply_settings(&mut self, settings: SettingsFile) -> Result<(), AgentError> {
        if let Some(interfaces) = settings.exclude_interfaces {
            self.exclude_interfaces = interfaces;
        }
        if let Some(disks) = settings.exclude_disks {
            self.exclude_disks = disks;
        }
        if let Some(tiers) = settings.archives {
            self.tiers = tiers;
            self.series_spec(vec![self.gauge("probe")])?;
        }
        Ok(())
    }

    /// The stock archive ladder: a day of per-step averages, a week of
    /// quarter-hour averages, a month of one-hour averages, and a year of
    /// half-day averages.
    pub fn default_tiers(refresh: Duration) -> Vec<ArchiveSpec> {
        vec![
            ArchiveSpec::new(refresh, Duration::from_secs(86_400)),
            ArchiveSpec::new(Duration::from_secs(900), Duration::from_secs(604_800)),
            ArchiveSpec::new(Duration::from_secs(3600), Duration::from_secs(2_678_400)),
            ArchiveSpec::new(Duration::from_secs(43_200), Duration::from_secs(31_536_000)),
        ]
    }

    /// A counter source with this configuration's heartbeat.
    pub fn counter(&self, name: &str) -> DataSourceSpec {
        DataSourceSpec::counter(name, self.heartbeat)
    }

    /// A gauge source with this configuration's heartbeat.
    pub fn gauge(&self, name: &str) -> DataSourceSpec {
        DataSourceSpec::gauge(name, self.heartbeat)
    }

    /// Builds the series schema for a component from its sources.
    ///
    /// # Errors
    ///
    /// Returns a schema validation error from the store library.
    pub fn series_spec(&self, sources: Vec<DataSourceSpec>) -> Result<SeriesSpec, AgentError> {
        Ok(SeriesSpec::new(self.refresh, sources, self.tiers.clone())?)
    }

    /// Opens the registry for one component, rejecting a data directory
    /// created with a different refresh interval before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RefreshMismatch`] on a step mismatch, or store
    /// errors from provisioning.
    pub fn open_registry(
        &self,
        component: &str,
        sources: Vec<DataSourceSpec>,
    ) -> Result<Registry, AgentError> {
        let dir = self.data_dir.join(component);
        if dir.join(storage::SPEC_SIDECAR_FILE).is_file() {
            let existing = storage::read_spec_sidecar(&dir)?;
            if existing.step != self.refresh {
                return Err(AgentError::RefreshMismatch {
                    component: component.to_string(),
                    existing_secs: existing.step.as_secs(),
                    configured_secs: self.refresh.as_secs(),
                });
            }
        }

        let spec = self.series_spec(sources)?;
        Ok(Registry::open(dir, spec)?)
    }

    /// Whether an interface is excluded from collection.
    pub fn interface_excluded(&self, name: &str) -> bool {
        self.exclude_interfaces.iter().any(|n| n == name)
    }

    /// Whether a disk is excluded from collection (`ram0`, `fd0`, `loop7`).
    pub fn disk_excluded(&self, name: &str) -> bool {
        self.exclude_disks.iter().any(|prefix| {
            name.strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        })
    }
}

/// Convenience used by probes to ignore missing optional files.
pub fn source_exists(path: &str) -> bool {
    Path::new(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig::new(PathBuf::from("/tmp/glimpse-test"), 5).unwrap()
    }

    #[test]
    fn test_refresh_validation() {
        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 1).is_ok());
        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 3).is_ok());
        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 5).is_ok());
        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 15).is_ok());

        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 0).is_err());
        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 2).is_err());
        assert!(AgentConfig::new(PathBuf::from("/tmp/x"), 7).is_err());
    }

    #[test]
    fn test_default_tiers_match_refresh() {
        let config = config();
        let spec = config
            .series_spec(vec![config.gauge("v")])
            .unwrap();
        assert_eq!(spec.step_secs(), 300);
        assert_eq!(spec.archives.len(), 4);
        // 1 day of per-step points, then 15m/1h/12h consolidation.
        assert_eq!(spec.archives[0].rows(), 288);
        assert_eq!(spec.points_per_step(1), 3);
        assert_eq!(spec.points_per_step(2), 12);
        assert_eq!(spec.points_per_step(3), 144);
    }

    #[test]
    fn test_disk_exclusion() {
        let config = config();
        assert!(config.disk_excluded("ram0"));
        assert!(config.disk_excluded("loop12"));
        assert!(config.disk_excluded("fd0"));
        assert!(!config.disk_excluded("sda"));
        assert!(!config.disk_excluded("ram")); // bare prefix is a real name
        assert!(!config.disk_excluded("fdisk1"));
    }

    #[test]
    fn test_interface_exclusion() {
        let config = config();
        assert!(config.interface_excluded("lo"));
        assert!(!config.interface_excluded("eth0"));
    }

    #[test]
    fn test_settings_file_overrides() {
        let mut config = config();
        let settings: SettingsFile = serde_json::from_str(
            r#"{
                "exclude_interfaces": ["lo", "docker0"],
                "archives": [
                    {"interval": 300, "retention": 86400},
                    {"interval": 3600, "retention": 31536000}
                ]
            }"#,
        )
        .unwrap();

        config.apply_settings(settings).unwrap();
        assert!(config.interface_excluded("docker0"));
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(config.tiers[1].interval.as_secs(), 3600);
        // Disk exclusions were not mentioned and keep their defaults.
        assert!(config.disk_excluded("ram0"));
    }

    #[test]
    fn test_settings_with_bad_ladder_rejected() {
        let mut config = config();
        // 100s is not a multiple of the 300s step.
        let settings: SettingsFile = serde_json::from_str(
            r#"{"archives": [{"interval": 100, "retention": 86400}]}"#,
        )
        .unwrap();
        assert!(config.apply_settings(settings).is_err());
    }

    #[test]
    fn test_unknown_settings_keys_rejected() {
        let result: Result<SettingsFile, _> =
            serde_json::from_str(r#"{"refresh": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_refresh_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.data_dir = dir.path().to_path_buf();

        let registry = config
            .open_registry("cpu", vec![config.counter("user")])
            .unwrap();
        drop(registry);

        let mut other = AgentConfig::new(dir.path().to_path_buf(), 1).unwrap();
        other.data_dir = dir.path().to_path_buf();
        let result = other.open_registry("cpu", vec![other.counter("user")]);
        assert!(matches!(
            result.unwrap_err(),
            AgentError::RefreshMismatch { .. }
        ));
    }
}
