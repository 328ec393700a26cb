//! Per-resource probes: read a system counter source, parse it, and feed the
//! component's registry.
//!
//! Every parser takes `&str` so the text formats are tested against captured
//! fixtures without touching the live system.

pub mod connections;
pub mod cpu;
pub mod disks;
pub mod interfaces;
pub mod load;
pub mod memory;
pub mod ups;

use crate::error::AgentError;

/// Reads a counter source file in full.
pub(crate) fn read_source(path: &str) -> Result<String, AgentError> {
    std::fs::read_to_string(path).map_err(|e| AgentError::SourceRead {
        path: path.to_string(),
        source: e,
    })
}

/// Builds a parse error for a counter source.
pub(crate) fn parse_error(path: &str, reason: impl Into<String>) -> AgentError {
    AgentError::SourceParse {
        path: path.to_string(),
        reason: reason.into(),
    }
}
