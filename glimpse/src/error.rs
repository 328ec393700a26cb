//! Error types for the glimpse time-series store.

use thiserror::Error;

/// The main error type for all glimpse operations.
///
/// This enum covers all failure conditions a caller can observe, from series
/// schema validation through artifact I/O to queries. Per-cycle data problems
/// (a sample out of bounds, a counter wrap resolved to nonsense, a stale
/// source) are *not* errors — they become unknown data points and never abort
/// collection.
#[derive(Error, Debug)]
pub enum GlimpseError {
    /// Error during schema validation or processing.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Error accessing or validating an on-disk series artifact.
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Error during a record operation (write path).
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error during a query operation (read path).
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error in the entity registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Errors that can occur during schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// The series step duration is zero or not whole seconds.
    #[error("invalid step duration: {reason}")]
    InvalidStep {
        /// Description of what makes the step invalid.
        reason: String,
    },

    /// No data sources are configured.
    #[error("at least one data source must be configured")]
    NoSources,

    /// Two data sources share a name.
    #[error("duplicate data source name '{name}'")]
    DuplicateSource {
        /// The conflicting source name.
        name: String,
    },

    /// A data source definition is invalid.
    #[error("invalid data source '{name}': {reason}")]
    InvalidSource {
        /// The source name.
        name: String,
        /// Description of the problem.
        reason: String,
    },

    /// No archives are configured.
    #[error("at least one archive must be configured")]
    NoArchives,

    /// The first archive must store one point per primary step.
    #[error("the first archive must have one point per step (found {points_per_step})")]
    PrimaryNotPerStep {
        /// The offending points-per-step value.
        points_per_step: u64,
    },

    /// An archive configuration is invalid.
    #[error("invalid archive {index}: {reason}")]
    InvalidArchive {
        /// The archive index.
        index: usize,
        /// Description of the problem.
        reason: String,
    },

    /// Archive resolutions must be non-decreasing (finest first).
    #[error("archives must be ordered from finest to coarsest resolution")]
    ArchivesNotOrdered,

    /// Archive dimensions would result in too many ring slots.
    #[error("archive {index} would have {rows} rows (max {max_rows})")]
    TooManyRows {
        /// The archive index.
        index: usize,
        /// The computed row count.
        rows: u64,
        /// The maximum allowed row count.
        max_rows: u64,
    },
}

/// Errors that can occur accessing an on-disk series artifact.
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// An I/O operation on the artifact or its directory failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The path involved.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The artifact file is corrupted or has an invalid format.
    #[error("artifact '{path}' is corrupted: {reason}")]
    Corrupted {
        /// The artifact path.
        path: String,
        /// Description of the corruption.
        reason: String,
    },

    /// The artifact was created with a different series schema.
    ///
    /// This is unrecoverable for the affected entity: the history must be
    /// migrated or discarded before the new schema can be used.
    #[error(
        "schema mismatch for '{path}': artifact hash {existing:016x}, expected {expected:016x}"
    )]
    SchemaMismatch {
        /// The artifact path.
        path: String,
        /// Hash stored in the artifact.
        existing: u64,
        /// Hash of the schema being opened with.
        expected: u64,
    },

    /// Failed to serialize or parse the schema sidecar.
    #[error("sidecar error for '{path}': {source}")]
    Sidecar {
        /// The sidecar path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Failed to sync the artifact to disk.
    #[error("failed to sync '{path}': {source}")]
    SyncFailed {
        /// The artifact path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during record operations (write path).
#[derive(Error, Debug)]
pub enum RecordError {
    /// The named data source does not exist in this series.
    #[error("unknown data source '{name}'")]
    UnknownSource {
        /// The requested source name.
        name: String,
    },

    /// The sample is older than the last finalized step.
    ///
    /// Steps are finalized strictly in order; a sample for an
    /// already-finalized step usually means two collectors are driving the
    /// same series, which the single-writer contract forbids.
    #[error("stale sample at {at}: step already finalized (last update {last_update})")]
    StaleSample {
        /// The sample timestamp.
        at: u64,
        /// The series' last update timestamp.
        last_update: u64,
    },
}

/// Errors that can occur during query operations (read path).
#[derive(Error, Debug)]
pub enum QueryError {
    /// The named data source does not exist in this series.
    #[error("unknown data source '{name}'")]
    UnknownSource {
        /// The requested source name.
        name: String,
    },
}

/// Errors that can occur in the entity registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The entity id is empty or unusable.
    #[error("invalid entity id '{id}': {reason}")]
    InvalidEntityId {
        /// The raw entity id.
        id: String,
        /// Why it is invalid.
        reason: String,
    },

    /// Two distinct raw entity ids sanitize to the same storage key.
    ///
    /// Silently merging their histories would corrupt both, so this is a
    /// hard error the caller must resolve (typically by renaming).
    #[error("entity id '{id}' collides with '{existing}' (both sanitize to '{key}')")]
    KeyCollision {
        /// The sanitized key both ids map to.
        key: String,
        /// The raw id already registered under the key.
        existing: String,
        /// The raw id that collided.
        id: String,
    },

    /// The entity index file could not be read or written.
    #[error("entity index I/O error on '{path}': {source}")]
    IndexIo {
        /// The index file path.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The entity index file could not be parsed.
    #[error("entity index '{path}' is corrupted: {source}")]
    IndexCorrupted {
        /// The index file path.
        path: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Type alias for `Result<T, GlimpseError>`.
pub type Result<T> = std::result::Result<T, GlimpseError>;
