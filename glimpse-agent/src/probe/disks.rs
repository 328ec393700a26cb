//! Per-disk I/O statistics from `/proc/diskstats`.
//!
//! Whole disks only: a device entry has 14+ fields, and ramdisks, floppies,
//! and loop devices are excluded by the configured predicate. Sector read
//! and write totals are counters, so the store holds sectors-per-second
//! rates. Hierarchical device names (as older kernels produced) are
//! flattened by the registry's key sanitization.

use glimpse::registry::Registry;

use crate::config::{AgentConfig, source_exists};
use crate::error::AgentError;
use crate::probe::read_source;

const DATA_SOURCE: &str = "/proc/diskstats";

/// Minimum field count of a parseable device entry.
const DEV_FIELD_COUNT: usize = 14;

/// One disk's counter snapshot.
#[derive(Debug, PartialEq)]
pub struct DiskCounters {
    /// Device name (`sda`, `nvme0n1`, …).
    pub name: String,
    /// Sectors read since boot.
    pub sector_reads: f64,
    /// Sectors written since boot.
    pub sector_writes: f64,
}

/// Disk I/O probe.
pub struct DiskProbe {
    registry: Registry,
}

impl DiskProbe {
    /// Opens the disks component, failing if `/proc/diskstats` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingSource`] or store errors.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        if !source_exists(DATA_SOURCE) {
            return Err(AgentError::MissingSource {
                path: DATA_SOURCE.to_string(),
            });
        }
        let registry = config.open_registry(
            "disks",
            vec![
                config.counter("sector_reads"),
                config.counter("sector_writes"),
            ],
        )?;
        Ok(Self { registry })
    }

    /// Records one sample per non-excluded disk; returns how many were
    /// updated.
    ///
    /// # Errors
    ///
    /// Returns source or store errors.
    pub fn collect(&mut self, config: &AgentConfig, now: u64) -> Result<usize, AgentError> {
        let text = read_source(DATA_SOURCE)?;
        let mut updated = 0;

        for disk in parse_diskstats(&text) {
            if config.disk_excluded(&disk.name) {
                continue;
            }
            let series = self.registry.get_or_create(&disk.name)?;
            series.record_batch(
                &[
                    ("sector_reads", disk.sector_reads),
                    ("sector_writes", disk.sector_writes),
                ],
                now,
            )?;
            updated += 1;
        }

        self.registry.sync_all()?;
        Ok(updated)
    }
}

/// Parses `/proc/diskstats`, keeping entries with the full field count.
///
/// Partition entries on 2.6 kernels have fewer fields and drop out here;
/// partitions on newer kernels are filtered by the caller's exclusion
/// predicate or simply tracked alongside their disk.
fn parse_diskstats(text: &str) -> Vec<DiskCounters> {
    text.lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < DEV_FIELD_COUNT {
                return None;
            }
            Some(DiskCounters {
                name: fields[2].to_string(),
                sector_reads: fields[5].parse().ok()?,
                sector_writes: fields[9].parse().ok()?,
            })
        })
        .collect()
}
