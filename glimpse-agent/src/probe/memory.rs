//! Memory usage from `/proc/meminfo`.
//!
//! Buffers and page cache are split out of "used" the way `free` does it:
//! `memused = MemTotal - (MemFree + Buffers + Cached)`. Everything is
//! recorded in bytes as gauges.

use glimpse::registry::Registry;

use crate::config::{AgentConfig, source_exists};
use crate::error::AgentError;
use crate::probe::{parse_error, read_source};

const DATA_SOURCE: &str = "/proc/meminfo";

/// One parsed snapshot of memory usage, in bytes.
#[derive(Debug, PartialEq)]
pub struct MemoryReading {
    /// Memory in real use (excluding buffers and cache).
    pub memused: f64,
    /// Block-device buffers.
    pub buffers: f64,
    /// Page cache.
    pub cached: f64,
    /// Swap in use.
    pub swapused: f64,
}

/// Memory usage probe.
pub struct MemoryProbe {
    registry: Registry,
}

impl MemoryProbe {
    /// Opens the memory component, failing if `/proc/meminfo` is absent.
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
            "memory",
            vec![
                config.gauge("memused"),
                config.gauge("buffers"),
                config.gauge("cached"),
                config.gauge("swapused"),
            ],
        )?;
        Ok(Self { registry })
    }

    /// Records one sample; returns the number of entities updated.
    ///
    /// # Errors
    ///
    /// Returns source or store errors.
    pub fn collect(&mut self, now: u64) -> Result<usize, AgentError> {
        let text = read_source(DATA_SOURCE)?;
        let reading = parse_meminfo(&text)?;

        let series = self.registry.get_or_create("memory")?;
        series.record_batch(
            &[
                ("memused", reading.memused),
                ("buffers", reading.buffers),
                ("cached", reading.cached),
                ("swapused", reading.swapused),
            ],
            now,
        )?;
        self.registry.sync_all()?;
        Ok(1)
    }
}

/// Parses `/proc/meminfo` (values are in KiB) into byte readings.
fn parse_meminfo(text: &str) -> Result<MemoryReading, AgentError> {
    let field = |name: &str| -> Result<f64, AgentError> {
        text.lines()
            .find_map(|line| {
                let rest = line.strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next()?.parse::<f64>().ok()
            })
            .ok_or_else(|| parse_error(DATA_SOURCE, format!("missing field '{name}'")))
    };

    let memtotal = field("MemTotal")?;
    let memfree = field("MemFree")?;
    let buffers = field("Buffers")?;
    let cached = field("Cached")?;
    let swaptotal = field("SwapTotal")?;
    let swapfree = field("SwapFree")?;

    Ok(MemoryReading {
        memused: (memtotal - (memfree + buffers + cached)) * 1024.0,
        buffers: buffers * 1024.0,
        cached: cached * 1024.0,
        swapused: (swaptotal - swapfree) * 1024.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
MemTotal:        2048000 kB
MemFree:          512000 kB
Buffers:          128000 kB
Cached:           256000 kB
SwapCached:            0 kB
Active:           900000 kB
SwapTotal:       1024000 kB
SwapFree:        1000000 kB
";

    #[test]
    fn test_parse_meminfo() {
        let reading = parse_meminfo(FIXTURE).unwrap();
        assert_eq!(
            reading,
            MemoryReading {
                memused: (2_048_000.0 - (512_000.0 + 128_000.0 + 256_000.0)) * 1024.0,
                buffers: 128_000.0 * 1024.0,
                cached: 256_000.0 * 1024.0,
                swapused: 24_000.0 * 1024.0,
            }
        );
    }

    #[test]
    fn test_missing_field_is_an_error() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_err());
    }

    #[test]
    fn test_prefix_fields_do_not_shadow() {
        // "SwapCached" must not satisfy the "Cached" lookup.
        let text = "\
MemTotal: 100 kB
MemFree: 10 kB
Buffers: 5 kB
SwapCached: 999 kB
Cached: 20 kB
SwapTotal: 50 kB
SwapFree: 40 kB
";
        let reading = parse_meminfo(text).unwrap();
        assert_eq!(reading.cached, 20.0 * 1024.0);
    }
}
