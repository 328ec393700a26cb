//! UPS voltages via the NUT `upsd` line protocol.
//!
//! Talks plain TCP to `upsd` (default port 3493): `VER` to confirm what is
//! listening, `LIST UPS` to discover units, then `GET VAR <ups>
//! input.voltage` / `output.voltage` per unit. Voltages are gauges; each UPS
//! is its own entity.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use glimpse::registry::Registry;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Line-oriented client for one upsd session.
struct UpsClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    addr: String,
}

impl UpsClient {
    fn connect(addr: &str) -> Result<Self, AgentError> {
        let stream = TcpStream::connect(addr).map_err(|e| AgentError::Upsd {
            addr: addr.to_string(),
            reason: format!("connect failed: {e}"),
        })?;
        let writer = stream.try_clone().map_err(|e| AgentError::Upsd {
            addr: addr.to_string(),
            reason: format!("cannot clone stream: {e}"),
        })?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            addr: addr.to_string(),
        })
    }

    fn error(&self, reason: impl Into<String>) -> AgentError {
        AgentError::Upsd {
            addr: self.addr.clone(),
            reason: reason.into(),
        }
    }

    fn send(&mut self, command: &str) -> Result<(), AgentError> {
        self.writer
            .write_all(format!("{command}\n").as_bytes())
            .map_err(|e| self.error(format!("write failed: {e}")))
    }

    fn read_line(&mut self) -> Result<String, AgentError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| self.error(format!("read failed: {e}")))?;
        if n == 0 {
            return Err(self.error("connection closed"));
        }
        Ok(line.trim_end().to_string())
    }

    /// Sends a command and returns the first response line.
    fn command(&mut self, command: &str) -> Result<String, AgentError> {
        self.send(command)?;
        self.read_line()
    }

    /// Returns the names of all configured UPS units.
    fn list_ups(&mut self) -> Result<Vec<String>, AgentError> {
        self.send("LIST UPS")?;
        let mut names = Vec::new();
        loop {
            let line = self.read_line()?;
            if line.starts_with("END LIST") {
                break;
            }
            if let Some(name) = parse_ups_entry(&line) {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    /// Reads one numeric variable of one UPS.
    fn get_var(&mut self, ups: &str, var: &str) -> Result<f64, AgentError> {
        let response = self.command(&format!("GET VAR {ups} {var}"))?;
        parse_var_value(&response)
            .ok_or_else(|| self.error(format!("unexpected response '{response}'")))
    }
}

/// UPS statistics probe.
pub struct UpsProbe {
    registry: Registry,
    client: UpsClient,
}

impl UpsProbe {
    /// Connects to upsd and opens the ups component. Fails — skipping the
    /// resource type — when no endpoint is configured, nothing answers, or
    /// the listener is not upsd.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Upsd`], [`AgentError::MissingSource`], or store
    /// errors.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let Some(addr) = config.upsd_addr.as_deref() else {
            return Err(AgentError::MissingSource {
                path: "upsd".to_string(),
            });
        };

        let mut client = UpsClient::connect(addr)?;
        let version = client.command("VER")?;
        if !version.starts_with("Network UPS Tools") {
            return Err(client.error("the listening service is not upsd"));
        }

        let registry = config.open_registry(
            "ups",
            vec![config.gauge("v_in"), config.gauge("v_out")],
        )?;
        Ok(Self { registry, client })
    }

    /// Records input/output voltage for every UPS; returns how many were
    /// updated.
    ///
    /// # Errors
    ///
    /// Returns protocol or store errors.
    pub fn collect(&mut self, now: u64) -> Result<usize, AgentError> {
        let names = self.client.list_ups()?;
        let mut updated = 0;

        for name in names {
            let v_in = self.client.get_var(&name, "input.voltage")?;
            let v_out = self.client.get_var(&name, "output.voltage")?;

            let series = self.registry.get_or_create(&name)?;
            series.record_batch(&[("v_in", v_in), ("v_out", v_out)], now)?;
            updated += 1;
        }

        self.registry.sync_all()?;
        Ok(updated)
    }
}

/// Parses one `LIST UPS` entry: `UPS <name> "<description>"`.
fn parse_ups_entry(line: &str) -> Option<&str> {
    line.strip_prefix("UPS ")?.split_whitespace().next()
}

/// Parses a `GET VAR` response: `VAR <ups> <var> "<value>"`.
fn parse_var_value(line: &str) -> Option<f64> {
    if !line.starts_with("VAR ") {
        return None;
    }
    let quoted = line.split('"').nth(1)?;
    quoted.trim().parse().ok()
}
