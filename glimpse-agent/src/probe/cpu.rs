//! CPU time statistics from `/proc/stat`.
//!
//! The aggregate `cpu` line carries accumulated jiffies since boot for each
//! mode; `user`, `nice`, and `system` are recorded as counters so the store
//! holds per-second rates.

use glimpse::registry::Registry;

use crate::config::{AgentConfig, source_exists};
use crate::error::AgentError;
use crate::probe::{parse_error, read_source};

const DATA_SOURCE: &str = "/proc/stat";

/// CPU usage probe.
pub struct CpuProbe {
    registry: Registry,
}

impl CpuProbe {
    /// Opens the CPU component, failing if `/proc/stat` is absent.
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
            "cpu",
            vec![
                config.counter("user"),
                config.counter("nice"),
                config.counter("system"),
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
        let (user, nice, system) = parse_cpu_times(&text)?;

        let series = self.registry.get_or_create("cpu")?;
        series.record_batch(
            &[("user", user), ("nice", nice), ("system", system)],
            now,
        )?;
        self.registry.sync_all()?;
        Ok(1)
    }
}

/// Parses the aggregate `cpu` line: accumulated user/nice/system jiffies.
fn parse_cpu_times(text: &str) -> Result<(f64, f64, f64), AgentError> {
    let line = text
        .lines()
        .next()
        .ok_or_else(|| parse_error(DATA_SOURCE, "empty file"))?;

    let mut fields = line.split_whitespace();
    if fields.next() != Some("cpu") {
        return Err(parse_error(DATA_SOURCE, "first line is not the cpu summary"));
    }

    let mut next_value = || -> Result<f64, AgentError> {
        fields
            .next()
            .and_then(|f| f.parse::<f64>().ok())
            .ok_or_else(|| parse_error(DATA_SOURCE, "missing or non-numeric cpu field"))
    };

    Ok((next_value()?, next_value()?, next_value()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = "\
cpu  361822 1480 99425 12399646 54238 0 2897 0 0 0
cpu0 90455 370 24856 3099911 13559 0 724 0 0 0
cpu1 90456 370 24857 3099912 13560 0 725 0 0 0
intr 93828469 27 0 0 0
ctxt 189853365
";

    #[test]
    fn test_parse_cpu_times() {
        let (user, nice, system) = parse_cpu_times(FIXTURE).unwrap();
        assert_eq!(user, 361_822.0);
        assert_eq!(nice, 1480.0);
        assert_eq!(system, 99_425.0);
    }

    #[test]
    fn test_rejects_unexpected_first_line() {
        assert!(parse_cpu_times("intr 93828469 27\n").is_err());
        assert!(parse_cpu_times("").is_err());
        assert!(parse_cpu_times("cpu  x y z\n").is_err());
    }
}
