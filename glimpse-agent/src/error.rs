//! Agent error types.
//!
//! The split mirrors how a run degrades: configuration problems stop the
//! whole run before any collection; a missing counter source stops one
//! resource type only; store errors bubble up from the library per entity.

use thiserror::Error;

/// Errors surfaced by the collection agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// The refresh interval cannot express the configured archive ladder.
    #[error(
        "invalid refresh interval: {minutes} minutes (must divide the 15-minute tier; use 1, 3, 5, or 15)"
    )]
    InvalidRefresh {
        /// The rejected refresh interval in minutes.
        minutes: u64,
    },

    /// The data directory was created with a different refresh interval.
    ///
    /// This is a user-facing configuration error: the store's step and the
    /// collector's refresh interval must match exactly.
    #[error(
        "component '{component}' was created with a {existing_secs}s step but the configured refresh is {configured_secs}s"
    )]
    RefreshMismatch {
        /// The affected component directory.
        component: String,
        /// Step recorded in the component's schema sidecar.
        existing_secs: u64,
        /// Step implied by the configured refresh interval.
        configured_secs: u64,
    },

    /// A required counter source is absent; the resource type is skipped.
    #[error("counter source '{path}' is not available")]
    MissingSource {
        /// The missing file or endpoint.
        path: String,
    },

    /// A counter source exists but could not be read.
    #[error("cannot read '{path}': {source}")]
    SourceRead {
        /// The source path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A counter source produced text the probe cannot understand.
    #[error("cannot parse '{path}': {reason}")]
    SourceParse {
        /// The source path.
        path: String,
        /// What was wrong with the text.
        reason: String,
    },

    /// The upsd endpoint misbehaved.
    #[error("upsd at '{addr}': {reason}")]
    Upsd {
        /// The configured endpoint.
        addr: String,
        /// What went wrong.
        reason: String,
    },

    /// An error from the store library.
    #[error(transparent)]
    Store(#[from] glimpse::GlimpseError),
}
