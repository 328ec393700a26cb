//! Per-interface traffic counters from `/proc/net/dev`.
//!
//! Byte and packet totals in both directions, recorded as counters so the
//! store holds bytes/sec and packets/sec rates. The loopback interface (and
//! anything else on the exclusion list) is skipped.

use glimpse::registry::Registry;

use crate::config::{AgentConfig, source_exists};
use crate::error::AgentError;
use crate::probe::read_source;

const DATA_SOURCE: &str = "/proc/net/dev";

/// One interface's counter snapshot.
#[derive(Debug, PartialEq)]
pub struct InterfaceCounters {
    /// Interface name (`eth0`, `wlan0`, …).
    pub name: String,
    /// Bytes received since boot.
    pub rx_bytes: f64,
    /// Bytes transmitted since boot.
    pub tx_bytes: f64,
    /// Packets received since boot.
    pub rx_packets: f64,
    /// Packets transmitted since boot.
    pub tx_packets: f64,
}

/// Network interface probe.
pub struct InterfaceProbe {
    registry: Registry,
}

impl InterfaceProbe {
    /// Opens the counters component, failing if `/proc/net/dev` is absent.
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
            "counters",
            vec![
                config.counter("rx_bytes"),
                config.counter("tx_bytes"),
                config.counter("rx_packets"),
                config.counter("tx_packets"),
            ],
        )?;
        Ok(Self { registry })
    }

    /// Records one sample per non-excluded interface; returns how many were
    /// updated.
    ///
    /// # Errors
    ///
    /// Returns source or store errors.
    pub fn collect(&mut self, config: &AgentConfig, now: u64) -> Result<usize, AgentError> {
        let text = read_source(DATA_SOURCE)?;
        let mut updated = 0;

        for interface in parse_net_dev(&text) {
            if config.interface_excluded(&interface.name) {
                continue;
            }
            let series = self.registry.get_or_create(&interface.name)?;
            series.record_batch(
                &[
                    ("rx_bytes", interface.rx_bytes),
                    ("tx_bytes", interface.tx_bytes),
                    ("rx_packets", interface.rx_packets),
                    ("tx_packets", interface.tx_packets),
                ],
                now,
            )?;
            updated += 1;
        }

        self.registry.sync_all()?;
        Ok(updated)
    }
}

/// Parses `/proc/net/dev`: two header lines, then
/// `  name: rx_bytes rx_packets ... tx_bytes tx_packets ...` per interface.
fn parse_net_dev(text: &str) -> Vec<InterfaceCounters> {
    text.lines()
        .skip(2)
        .filter_map(|line| {
            let (name, values) = line.split_once(':')?;
            let fields: Vec<&str> = values.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            Some(InterfaceCounters {
                name: name.trim().to_string(),
                rx_bytes: fields[0].parse().ok()?,
                rx_packets: fields[1].parse().ok()?,
                tx_bytes: fields[8].parse().ok()?,
                tx_packets: fields[9].parse().ok()?,
            })
        })
        .collect()
}
