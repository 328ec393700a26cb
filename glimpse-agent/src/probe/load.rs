//! Load averages and process creation from `/proc/loadavg`.
//!
//! The three load averages are gauges. Process creation has no direct
//! counter, but the last-allocated pid is monotonically increasing (until
//! the pid space wraps), so it is recorded as a counter and the store turns
//! it into a forks-per-second rate.

use glimpse::registry::Registry;

use crate::config::{AgentConfig, source_exists};
use crate::error::AgentError;
use crate::probe::{parse_error, read_source};

const DATA_SOURCE: &str = "/proc/loadavg";

/// Load average / process creation probe.
pub struct LoadProbe {
    registry: Registry,
}

impl LoadProbe {
    /// Opens the processes component, failing if `/proc/loadavg` is absent.
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
            "processes",
            vec![
                config.gauge("avg_1min"),
                config.gauge("avg_5min"),
                config.gauge("avg_15min"),
                config.counter("proc"),
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
        let (avg_1, avg_5, avg_15, last_pid) = parse_loadavg(&text)?;

        let series = self.registry.get_or_create("processes")?;
        series.record_batch(
            &[
                ("avg_1min", avg_1),
                ("avg_5min", avg_5),
                ("avg_15min", avg_15),
                ("proc", last_pid),
            ],
            now,
        )?;
        self.registry.sync_all()?;
        Ok(1)
    }
}

/// Parses `/proc/loadavg`: three averages, running/total, last pid.
fn parse_loadavg(text: &str) -> Result<(f64, f64, f64, f64), AgentError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields.len() < 5 {
        return Err(parse_error(DATA_SOURCE, "expected five fields"));
    }

    let parse = |i: usize| -> Result<f64, AgentError> {
        fields[i]
            .parse::<f64>()
            .map_err(|_| parse_error(DATA_SOURCE, format!("non-numeric field '{}'", fields[i])))
    };

    Ok((parse(0)?, parse(1)?, parse(2)?, parse(4)?))
}
