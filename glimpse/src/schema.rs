//! Schema types for glimpse series.
//!
//! A [`SeriesSpec`] fixes, for the lifetime of the on-disk artifact, the
//! primary step duration, the named data sources, and the archive
//! (resolution/retention) ladder. Changing any of it requires migrating or
//! discarding history — artifacts carry a stable hash of their schema and
//! reject mismatched opens.

use std::hash::{DefaultHasher, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// Maximum number of ring rows allowed in any single archive.
///
/// This prevents excessive disk usage from misconfigured durations/intervals.
/// With 8 bytes per row per source this allows multi-gigabyte archives, far
/// beyond anything a statistics collector needs.
const MAX_ROWS_PER_ARCHIVE: u64 = 1_000_000_000;

/// Default fraction of a consolidation window that may be unknown before the
/// consolidated point itself becomes unknown.
pub const DEFAULT_UNKNOWN_TOLERANCE: f64 = 0.5;

/// Input semantics of a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A free-running, monotonically increasing counter (until wraparound).
    /// The stored quantity is its rate of change per second.
    Counter,
    /// An instantaneous reading, stored as-is.
    Gauge,
}

/// One named numeric channel within a series.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use glimpse::schema::DataSourceSpec;
///
/// // A byte counter with rrdtool-style "0:U" bounds and a 10-minute heartbeat.
/// let ds = DataSourceSpec::counter("rx_bytes", Duration::from_secs(600));
/// assert_eq!(ds.min_value, Some(0.0));
/// assert_eq!(ds.max_value, None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceSpec {
    /// Source name, unique within the series.
    pub name: String,

    /// Whether raw values are differenced (counter) or stored as-is (gauge).
    pub kind: SourceKind,

    /// Lower validity bound; raw values below it are recorded as unknown.
    pub min_value: Option<f64>,

    /// Upper validity bound; raw values above it are recorded as unknown.
    pub max_value: Option<f64>,

    /// Maximum tolerated gap between updates before a step is unknown
    /// rather than interpolated.
    #[serde(with = "duration_serde")]
    pub heartbeat: Duration,

    /// Width, in bits, at which a counter source wraps. Ignored for gauges.
    #[serde(default = "default_counter_width")]
    pub counter_width_bits: u32,
}

fn default_counter_width() -> u32 {
    64
}

impl DataSourceSpec {
    /// Creates a counter source with a `[0, unbounded)` validity range.
    pub fn counter(name: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Counter,
            min_value: Some(0.0),
            max_value: None,
            heartbeat,
            counter_width_bits: 64,
        }
    }

    /// Creates a gauge source with a `[0, unbounded)` validity range.
    pub fn gauge(name: impl Into<String>, heartbeat: Duration) -> Self {
        Self {
            name: name.into(),
            kind: SourceKind::Gauge,
            min_value: Some(0.0),
            max_value: None,
            heartbeat,
            counter_width_bits: 64,
        }
    }

    /// Replaces the validity bounds.
    #[must_use]
    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    /// Sets the counter wrap width in bits.
    #[must_use]
    pub fn with_counter_width(mut self, bits: u32) -> Self {
        self.counter_width_bits = bits;
        self
    }

    /// Validates this source definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SchemaError::InvalidSource {
                name: self.name.clone(),
                reason: "name cannot be empty".to_string(),
            }
            .into());
        }

        if self.heartbeat.is_zero() {
            return Err(SchemaError::InvalidSource {
                name: self.name.clone(),
                reason: "heartbeat cannot be zero".to_string(),
            }
            .into());
        }

        if let (Some(min), Some(max)) = (self.min_value, self.max_value)
            && min >= max
        {
            return Err(SchemaError::InvalidSource {
                name: self.name.clone(),
                reason: format!("min_value ({min}) must be below max_value ({max})"),
            }
            .into());
        }

        if self.counter_width_bits == 0 || self.counter_width_bits > 64 {
            return Err(SchemaError::InvalidSource {
                name: self.name.clone(),
                reason: format!(
                    "counter_width_bits must be in 1..=64 (found {})",
                    self.counter_width_bits
                ),
            }
            .into());
        }

        Ok(())
    }

    /// The value at which a counter of this width rolls over (2^bits).
    pub(crate) fn wrap_modulus(&self) -> f64 {
        // 2^64 is not representable as u64; go through f64 exponentiation.
        2f64.powi(i32::try_from(self.counter_width_bits).unwrap_or(64))
    }
}

/// Configuration for a single archive (resolution tier).
///
/// Each archive keeps `retention / interval` consolidated points in a fixed
/// ring; `interval / step` primary steps are averaged into each point. The
/// first archive of a series must have `interval == step` (one point per
/// primary step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSpec {
    /// Time covered by one consolidated point in this archive.
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// How long this archive retains data. Determines the ring size
    /// (`retention / interval` rows); older points are overwritten.
    #[serde(with = "duration_serde")]
    pub retention: Duration,

    /// Fraction of a consolidation window that may be unknown before the
    /// consolidated point itself becomes unknown.
    #[serde(default = "default_tolerance")]
    pub unknown_tolerance: f64,
}

fn default_tolerance() -> f64 {
    DEFAULT_UNKNOWN_TOLERANCE
}

impl ArchiveSpec {
    /// Creates an archive spec with the default unknown tolerance.
    pub fn new(interval: Duration, retention: Duration) -> Self {
        Self {
            interval,
            retention,
            unknown_tolerance: DEFAULT_UNKNOWN_TOLERANCE,
        }
    }

    /// Number of ring rows (`retention / interval`).
    pub fn rows(&self) -> u64 {
        let interval = self.interval.as_secs();
        if interval == 0 {
            return 0;
        }
        self.retention.as_secs() / interval
    }
}

/// Complete schema for one series: step, data sources, and archive ladder.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use glimpse::schema::{ArchiveSpec, DataSourceSpec, SeriesSpec};
///
/// let step = Duration::from_secs(300);
/// let spec = SeriesSpec::new(
///     step,
///     vec![
///         DataSourceSpec::counter("rx_bytes", step * 2),
///         DataSourceSpec::counter("tx_bytes", step * 2),
///     ],
///     vec![
///         // one day of per-step averages
///         ArchiveSpec::new(step, Duration::from_secs(86_400)),
///         // a week of 15-minute averages
///         ArchiveSpec::new(Duration::from_secs(900), Duration::from_secs(604_800)),
///     ],
/// )?;
/// assert_eq!(spec.points_per_step(1), 3);
/// # Ok::<(), glimpse::GlimpseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSpec {
    /// The primary step: the finest granularity at which samples are accepted.
    #[serde(with = "duration_serde")]
    pub step: Duration,

    /// Data sources, in fixed creation order.
    pub sources: Vec<DataSourceSpec>,

    /// Archives, ordered finest-resolution first. The first entry is the
    /// primary archive and must have `interval == step`.
    pub archives: Vec<ArchiveSpec>,
}

impl SeriesSpec {
    /// Creates and validates a series schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if the configuration is invalid.
    pub fn new(
        step: Duration,
        sources: Vec<DataSourceSpec>,
        archives: Vec<ArchiveSpec>,
    ) -> Result<Self> {
        let spec = Self {
            step,
            sources,
            archives,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Validates the schema.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] if validation fails.
    pub fn validate(&self) -> Result<()> {
        if self.step.is_zero() {
            return Err(SchemaError::InvalidStep {
                reason: "step cannot be zero".to_string(),
            }
            .into());
        }
        if self.step.subsec_nanos() != 0 {
            return Err(SchemaError::InvalidStep {
                reason: "step must be a whole number of seconds".to_string(),
            }
            .into());
        }

        if self.sources.is_empty() {
            return Err(SchemaError::NoSources.into());
        }
        for (i, source) in self.sources.iter().enumerate() {
            source.validate()?;
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(SchemaError::DuplicateSource {
                    name: source.name.clone(),
                }
                .into());
            }
        }

        if self.archives.is_empty() {
            return Err(SchemaError::NoArchives.into());
        }

        let step_secs = self.step.as_secs();
        for (index, archive) in self.archives.iter().enumerate() {
            let interval = archive.interval.as_secs();
            if archive.interval.is_zero() || archive.interval.subsec_nanos() != 0 {
                return Err(SchemaError::InvalidArchive {
                    index,
                    reason: "interval must be a whole, non-zero number of seconds".to_string(),
                }
                .into());
            }
            if interval % step_secs != 0 {
                return Err(SchemaError::InvalidArchive {
                    index,
                    reason: format!(
                        "interval ({interval}s) must be a multiple of the step ({step_secs}s)"
                    ),
                }
                .into());
            }
            if archive.retention < archive.interval {
                return Err(SchemaError::InvalidArchive {
                    index,
                    reason: format!(
                        "retention ({:?}) must be >= interval ({:?})",
                        archive.retention, archive.interval
                    ),
                }
                .into());
            }
            if !(0.0..=1.0).contains(&archive.unknown_tolerance) {
                return Err(SchemaError::InvalidArchive {
                    index,
                    reason: format!(
                        "unknown_tolerance must be within [0, 1] (found {})",
                        archive.unknown_tolerance
                    ),
                }
                .into());
            }
            let rows = archive.rows();
            if rows > MAX_ROWS_PER_ARCHIVE {
                return Err(SchemaError::TooManyRows {
                    index,
                    rows,
                    max_rows: MAX_ROWS_PER_ARCHIVE,
                }
                .into());
            }
        }

        let first_ppr = self.points_per_step(0);
        if first_ppr != 1 {
            return Err(SchemaError::PrimaryNotPerStep {
                points_per_step: first_ppr,
            }
            .into());
        }

        // Consolidation stays monotone only if coarser archives never sit
        // between finer ones.
        for pair in self.archives.windows(2) {
            if pair[0].interval > pair[1].interval {
                return Err(SchemaError::ArchivesNotOrdered.into());
            }
        }

        Ok(())
    }

    /// The step duration in whole seconds.
    pub fn step_secs(&self) -> u64 {
        self.step.as_secs()
    }

    /// Number of primary steps consolidated into one point of `archive`.
    ///
    /// # Panics
    ///
    /// Panics if `archive` is out of range.
    pub fn points_per_step(&self, archive: usize) -> u64 {
        self.archives[archive].interval.as_secs() / self.step_secs()
    }

    /// Position of a source by name, or `None` if not defined.
    pub fn source_index(&self, name: &str) -> Option<usize> {
        self.sources.iter().position(|s| s.name == name)
    }

    /// Computes a stable hash of this schema.
    ///
    /// The hash is stored in artifact headers and sidecars to detect schema
    /// changes on reopen. Every field that affects storage layout or data
    /// interpretation participates.
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        hasher.write_u64(self.step_secs());
        hasher.write_usize(self.sources.len());
        for source in &self.sources {
            hasher.write(source.name.as_bytes());
            hasher.write_u8(match source.kind {
                SourceKind::Counter => 0,
                SourceKind::Gauge => 1,
            });
            hash_bound(&mut hasher, source.min_value);
            hash_bound(&mut hasher, source.max_value);
            hasher.write_u64(source.heartbeat.as_secs());
            hasher.write_u32(source.counter_width_bits);
        }
        hasher.write_usize(self.archives.len());
        for (index, archive) in self.archives.iter().enumerate() {
            hasher.write_u64(self.points_per_step(index));
            hasher.write_u64(archive.rows());
            hasher.write_u64(archive.unknown_tolerance.to_bits());
        }

        hasher.finish()
    }
}

fn hash_bound(hasher: &mut DefaultHasher, bound: Option<f64>) {
    match bound {
        Some(v) => {
            hasher.write_u8(1);
            hasher.write_u64(v.to_bits());
        }
        None => hasher.write_u8(0),
    }
}

/// Serde support for Duration fields.
///
/// Durations are serialized as total seconds for human readability in JSON
/// sidecar files.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> Duration {
        Duration::from_secs(300)
    }

    fn valid_spec() -> SeriesSpec {
        SeriesSpec::new(
            step(),
            vec![
                DataSourceSpec::counter("rx_bytes", step() * 2),
                DataSourceSpec::gauge("load", step() * 2),
            ],
            vec![
                ArchiveSpec::new(step(), Duration::from_secs(86_400)),
                ArchiveSpec::new(Duration::from_secs(900), Duration::from_secs(604_800)),
                ArchiveSpec::new(Duration::from_secs(3600), Duration::from_secs(2_678_400)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_valid_spec() {
        let spec = valid_spec();
        assert_eq!(spec.step_secs(), 300);
        assert_eq!(spec.points_per_step(0), 1);
        assert_eq!(spec.points_per_step(1), 3);
        assert_eq!(spec.points_per_step(2), 12);
        assert_eq!(spec.archives[0].rows(), 288);
        assert_eq!(spec.archives[1].rows(), 672);
        assert_eq!(spec.source_index("load"), Some(1));
        assert_eq!(spec.source_index("missing"), None);
    }

    #[test]
    fn test_rejects_zero_step() {
        let result = SeriesSpec::new(
            Duration::ZERO,
            vec![DataSourceSpec::gauge("v", Duration::from_secs(600))],
            vec![ArchiveSpec::new(step(), Duration::from_secs(86_400))],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_duplicate_sources() {
        let result = SeriesSpec::new(
            step(),
            vec![
                DataSourceSpec::gauge("v", step() * 2),
                DataSourceSpec::counter("v", step() * 2),
            ],
            vec![ArchiveSpec::new(step(), Duration::from_secs(86_400))],
        );
        assert!(matches!(
            result.unwrap_err(),
            crate::GlimpseError::Schema(SchemaError::DuplicateSource { .. })
        ));
    }

    #[test]
    fn test_rejects_non_primary_first_archive() {
        let result = SeriesSpec::new(
            step(),
            vec![DataSourceSpec::gauge("v", step() * 2)],
            vec![ArchiveSpec::new(
                Duration::from_secs(900),
                Duration::from_secs(86_400),
            )],
        );
        assert!(matches!(
            result.unwrap_err(),
            crate::GlimpseError::Schema(SchemaError::PrimaryNotPerStep { .. })
        ));
    }

    #[test]
    fn test_rejects_unordered_archives() {
        let result = SeriesSpec::new(
            step(),
            vec![DataSourceSpec::gauge("v", step() * 2)],
            vec![
                ArchiveSpec::new(step(), Duration::from_secs(86_400)),
                ArchiveSpec::new(Duration::from_secs(3600), Duration::from_secs(86_400)),
                ArchiveSpec::new(Duration::from_secs(900), Duration::from_secs(604_800)),
            ],
        );
        assert!(matches!(
            result.unwrap_err(),
            crate::GlimpseError::Schema(SchemaError::ArchivesNotOrdered)
        ));
    }

    #[test]
    fn test_rejects_interval_not_multiple_of_step() {
        let result = SeriesSpec::new(
            step(),
            vec![DataSourceSpec::gauge("v", step() * 2)],
            vec![
                ArchiveSpec::new(step(), Duration::from_secs(86_400)),
                ArchiveSpec::new(Duration::from_secs(450), Duration::from_secs(86_400)),
            ],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_bad_bounds() {
        let ds = DataSourceSpec::gauge("v", Duration::from_secs(600))
            .with_bounds(Some(10.0), Some(5.0));
        assert!(ds.validate().is_err());
    }

    #[test]
    fn test_wrap_modulus() {
        let ds =
            DataSourceSpec::counter("c", Duration::from_secs(600)).with_counter_width(8);
        assert_eq!(ds.wrap_modulus(), 256.0);

        let ds64 = DataSourceSpec::counter("c", Duration::from_secs(600));
        assert_eq!(ds64.wrap_modulus(), 2f64.powi(64));
    }

    #[test]
    fn test_stable_hash_tracks_layout() {
        let a = valid_spec();
        let b = valid_spec();
        assert_eq!(a.stable_hash(), b.stable_hash());

        let mut c = valid_spec();
        c.sources[0].kind = SourceKind::Gauge;
        assert_ne!(a.stable_hash(), c.stable_hash());

        let mut d = valid_spec();
        d.archives[1].retention = Duration::from_secs(1_209_600);
        assert_ne!(a.stable_hash(), d.stable_hash());
    }

    #[test]
    fn test_serde_round_trip() {
        let spec = valid_spec();
        let json = serde_json::to_string(&spec).unwrap();
        let back: SeriesSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
        assert_eq!(spec.stable_hash(), back.stable_hash());
    }
}
