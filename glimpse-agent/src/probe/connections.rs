//! Tracked connection counts from the netfilter connection table.
//!
//! Reads `/proc/net/nf_conntrack` (or the older `/proc/net/ip_conntrack`)
//! and counts entries by protocol. The counts are instantaneous, so all
//! three sources are gauges.

use glimpse::registry::Registry;

use crate::config::{AgentConfig, source_exists};
use crate::error::AgentError;
use crate::probe::read_source;

const DATA_SOURCE: &str = "/proc/net/nf_conntrack";
const DATA_SOURCE_OLD: &str = "/proc/net/ip_conntrack";

/// Connection counts by protocol.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConnectionCounts {
    /// Tracked TCP connections.
    pub tcp: u64,
    /// Tracked UDP flows.
    pub udp: u64,
    /// Everything else (icmp, sctp, …).
    pub other: u64,
}

/// Tracked-connections probe.
pub struct ConnectionsProbe {
    registry: Registry,
    source: &'static str,
}

impl ConnectionsProbe {
    /// Opens the connections component, failing if the kernel exposes no
    /// connection-tracking table (the conntrack module may not be loaded).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::MissingSource`] or store errors.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let source = if source_exists(DATA_SOURCE) {
            DATA_SOURCE
        } else if source_exists(DATA_SOURCE_OLD) {
            DATA_SOURCE_OLD
        } else {
            return Err(AgentError::MissingSource {
                path: DATA_SOURCE.to_string(),
            });
        };

        let registry = config.open_registry(
            "connections",
            vec![
                config.gauge("proto_tcp"),
                config.gauge("proto_udp"),
                config.gauge("proto_other"),
            ],
        )?;
        Ok(Self { registry, source })
    }

    /// Records one sample; returns the number of entities updated.
    ///
    /// # Errors
    ///
    /// Returns source or store errors.
    #[allow(clippy::cast_precision_loss)] // connection counts are small
    pub fn collect(&mut self, now: u64) -> Result<usize, AgentError> {
        let text = read_source(self.source)?;
        let counts = parse_conntrack(&text);

        let series = self.registry.get_or_create("connections")?;
        series.record_batch(
            &[
                ("proto_tcp", counts.tcp as f64),
                ("proto_udp", counts.udp as f64),
                ("proto_other", counts.other as f64),
            ],
            now,
        )?;
        self.registry.sync_all()?;
        Ok(1)
    }
}

/// Counts conntrack entries by protocol.
///
/// `ip_conntrack` lines lead with the protocol name; `nf_conntrack` lines
/// lead with the l3 protocol (`ipv4 2 tcp 6 ...`), putting it third.
fn parse_conntrack(text: &str) -> ConnectionCounts {
    let mut counts = ConnectionCounts::default();

    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let proto = match fields.first() {
            Some(&"ipv4" | &"ipv6") => fields.get(2).copied(),
            Some(first) => Some(*first),
            None => None,
        };

        match proto {
            Some("tcp") => counts.tcp += 1,
            Some("udp") => counts.udp += 1,
            Some(_) => counts.other += 1,
            None => {}
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_old_format() {
        let text = "\
tcp      6 431999 ESTABLISHED src=10.0.0.2 dst=10.0.0.1 sport=45182 dport=22
tcp      6 80 TIME_WAIT src=10.0.0.2 dst=10.0.0.9 sport=51310 dport=80
udp      17 170 src=10.0.0.2 dst=10.0.0.1 sport=123 dport=123
icmp     1 29 src=10.0.0.2 dst=10.0.0.1 type=8 code=0 id=1024
";
        assert_eq!(
            parse_conntrack(text),
            ConnectionCounts {
                tcp: 2,
                udp: 1,
                other: 1
            }
        );
    }

    #[test]
    fn test_parse_new_format() {
        let text = "\
ipv4     2 tcp      6 431999 ESTABLISHED src=10.0.0.2 dst=10.0.0.1 sport=45182 dport=22
ipv4     2 udp      17 170 src=10.0.0.2 dst=10.0.0.1 sport=123 dport=123
ipv6     10 icmpv6  58 29 src=::1 dst=::1 type=128 code=0 id=1
";
        assert_eq!(
            parse_conntrack(text),
            ConnectionCounts {
                tcp: 1,
                udp: 1,
                other: 1
            }
        );
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(parse_conntrack(""), ConnectionCounts::default());
    }
}
