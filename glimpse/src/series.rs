//! Series: the per-entity ingestion and consolidation pipeline.
//!
//! A series owns one slab artifact and drives the whole write path: raw
//! samples are processed per source (counter differencing, heartbeat,
//! bounds), averaged within their primary step, and — once a step is left
//! behind — finalized into the primary archive and cascaded into every
//! coarser archive. All of that state lives in the slab, so a collector
//! that runs once per refresh cycle and exits resumes exactly where the
//! previous invocation stopped.
//!
//! One logical writer drives a series at a time; concurrent writers to the
//! same series are outside the contract. Different series are fully
//! independent.

use std::path::Path;
use std::time::Duration;

use crate::archive::Archive;
use crate::error::{ArtifactError, RecordError, Result};
use crate::ingest;
use crate::query::{self, QueryResult};
use crate::schema::SeriesSpec;
use crate::slab::{FLAG_STEP_INITIALIZED, Slab};

/// Number of skipped primary steps filled by holding the last known value
/// when a collection gap stays within the source heartbeat.
///
/// Gaps are normally scheduler jitter: the next cycle arrives a little late
/// and one step went by without a sample. Holding the previous value across
/// exactly one successor step keeps such jitter from punching unknown holes
/// into otherwise continuous data. Anything longer — and every step beyond
/// the first — is a real gap and stays unknown; the hold is never propagated
/// into coarser archives except through the ordinary cascade of that one
/// primary point.
pub const JITTER_HOLD_STEPS: u64 = 1;

/// One entity's time-series: fixed schema, one slab, an archive ladder.
#[derive(Debug)]
pub struct Series {
    spec: SeriesSpec,
    archives: Vec<Archive>,
    slab: Slab,
}

impl Series {
    /// Creates a new series artifact at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema is invalid or the artifact cannot be
    /// created.
    pub fn create<P: AsRef<Path>>(path: P, spec: &SeriesSpec) -> Result<Self> {
        spec.validate()?;
        let slab = Slab::create(
            path,
            spec.stable_hash(),
            spec.step_secs(),
            source_count(spec),
            &archive_dims(spec),
        )?;
        Ok(Self::assemble(spec.clone(), slab))
    }

    /// Opens an existing series artifact, validating its schema hash.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::SchemaMismatch`] if the artifact was created
    /// with a different schema, and [`ArtifactError`] variants for I/O or
    /// corruption problems.
    pub fn open<P: AsRef<Path>>(path: P, spec: &SeriesSpec) -> Result<Self> {
        spec.validate()?;
        let slab = Slab::open(path)?;

        let expected = spec.stable_hash();
        if slab.schema_hash() != expected {
            return Err(ArtifactError::SchemaMismatch {
                path: slab.path().to_string(),
                existing: slab.schema_hash(),
                expected,
            }
            .into());
        }
        if slab.source_count() != source_count(spec)
            || slab.archive_count() as usize != spec.archives.len()
        {
            return Err(ArtifactError::Corrupted {
                path: slab.path().to_string(),
                reason: "artifact dimensions do not match its schema hash".to_string(),
            }
            .into());
        }

        Ok(Self::assemble(spec.clone(), slab))
    }

    /// Opens the artifact at `path`, creating it first if absent.
    ///
    /// # Errors
    ///
    /// See [`Series::open`] and [`Series::create`].
    pub fn open_or_create<P: AsRef<Path>>(path: P, spec: &SeriesSpec) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, spec)
        } else {
            Self::create(path, spec)
        }
    }

    fn assemble(spec: SeriesSpec, slab: Slab) -> Self {
        let archives = (0..spec.archives.len())
            .map(|i| Archive::from_spec(i, &spec))
            .collect();
        Self {
            spec,
            archives,
            slab,
        }
    }

    /// Returns the series schema.
    pub fn spec(&self) -> &SeriesSpec {
        &self.spec
    }

    /// Returns the archive ladder.
    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    /// Returns the primary step in seconds.
    pub fn step_secs(&self) -> u64 {
        self.spec.step_secs()
    }

    /// Returns the timestamp of the most recently accepted sample, or 0 if
    /// none was accepted yet.
    pub fn last_update(&self) -> u64 {
        self.slab.last_update()
    }

    /// Returns the fixed on-disk size of the artifact in bytes.
    pub fn artifact_size(&self) -> usize {
        self.slab.file_size()
    }

    /// Start of the step currently accumulating samples. Queries must not
    /// report anything at or past this point — it is still changing.
    pub fn current_step_start(&self) -> u64 {
        if self.slab.flags() & FLAG_STEP_INITIALIZED == 0 {
            0
        } else {
            self.slab.current_step() * self.step_secs()
        }
    }

    /// Records one raw observation for one data source.
    ///
    /// Data problems (out-of-range values, counter wrap nonsense, stale
    /// sources) are not errors: they record as unknown and collection of
    /// everything else continues.
    ///
    /// # Errors
    ///
    /// - [`RecordError::UnknownSource`] if the source is not in the schema.
    /// - [`RecordError::StaleSample`] if the sample's step was already
    ///   finalized (two writers, or a clock running backwards).
    pub fn record(&mut self, source: &str, raw: f64, at: u64) -> Result<()> {
        let Some(index) = self.spec.source_index(source) else {
            return Err(RecordError::UnknownSource {
                name: source.to_string(),
            }
            .into());
        };

        let step = at / self.step_secs();

        let flags = self.slab.flags();
        if flags & FLAG_STEP_INITIALIZED == 0 {
            self.slab.set_current_step(step);
            self.slab.set_flags(flags | FLAG_STEP_INITIALIZED);
        }

        let current = self.slab.current_step();
        if step < current {
            return Err(RecordError::StaleSample {
                at,
                last_update: self.slab.last_update(),
            }
            .into());
        }
        if step > current {
            self.advance_to(step);
        }

        #[allow(clippy::cast_possible_truncation)] // source count fits u32 by layout
        let column = index as u32;
        let mut state = self.slab.source_state(column);
        if let Some(value) = ingest::process_sample(&self.spec.sources[index], &mut state, raw, at)
        {
            state.step_sum += value;
            state.step_count += 1;
        }
        self.slab.set_source_state(column, &state);

        if at > self.slab.last_update() {
            self.slab.set_last_update(at);
        }

        Ok(())
    }

    /// Records several sources at one timestamp.
    ///
    /// All names are validated before anything is written, so a typo does
    /// not leave a half-recorded step behind.
    ///
    /// # Errors
    ///
    /// See [`Series::record`].
    pub fn record_batch(&mut self, samples: &[(&str, f64)], at: u64) -> Result<()> {
        for (name, _) in samples {
            if self.spec.source_index(name).is_none() {
                return Err(RecordError::UnknownSource {
                    name: (*name).to_string(),
                }
                .into());
            }
        }
        for (name, raw) in samples {
            self.record(name, *raw, at)?;
        }
        Ok(())
    }

    /// Finalizes every step up to (excluding) `target` and makes `target`
    /// the accumulating step.
    fn advance_to(&mut self, target: u64) {
        let current = self.slab.current_step();
        let values = self.finalize_accumulators();
        self.absorb_step(current, &values);

        // Steps in (current, target) saw no samples at all. Within the
        // heartbeat such a gap is treated as scheduler jitter and the first
        // JITTER_HOLD_STEPS of it hold the last known value; everything
        // else is unknown, never extrapolated.
        let gap_secs = (target - current) * self.step_secs();
        for (offset, step) in (current + 1..target).enumerate() {
            let values = self.gap_values(offset as u64, gap_secs);
            self.absorb_step(step, &values);
        }

        self.slab.set_current_step(target);
    }

    /// Drains the per-source step accumulators into per-source values for
    /// the step being finalized.
    fn finalize_accumulators(&mut self) -> Vec<Option<f64>> {
        let mut values = Vec::with_capacity(self.spec.sources.len());
        for column in 0..source_count(&self.spec) {
            let mut state = self.slab.source_state(column);
            let value = if state.step_count > 0 {
                Some(state.step_sum / f64::from(state.step_count))
            } else {
                None
            };
            if let Some(v) = value {
                state.last_known = v;
            }
            state.step_sum = 0.0;
            state.step_count = 0;
            self.slab.set_source_state(column, &state);
            values.push(value);
        }
        values
    }

    /// Values for the `offset`-th skipped step of a gap spanning `gap_secs`.
    fn gap_values(&self, offset: u64, gap_secs: u64) -> Vec<Option<f64>> {
        self.spec
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                #[allow(clippy::cast_possible_truncation)]
                let state = self.slab.source_state(index as u32);
                let hold = offset < JITTER_HOLD_STEPS
                    && gap_secs <= source.heartbeat.as_secs()
                    && state.last_known.is_finite();
                if hold { Some(state.last_known) } else { None }
            })
            .collect()
    }

    /// Feeds one finalized primary step into every archive.
    fn absorb_step(&mut self, step: u64, values: &[Option<f64>]) {
        for archive in &self.archives {
            archive.absorb(&mut self.slab, step, values);
        }
    }

    /// Queries a window of consolidated values for one source.
    ///
    /// The finest archive whose retained history covers `start` answers.
    /// `end` defaults to the start of the in-progress step, which is still
    /// accumulating and must never be reported as a finished value.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::QueryError::UnknownSource`] for a name not in
    /// the schema.
    pub fn query(&self, source: &str, start: u64, end: Option<u64>) -> Result<QueryResult<'_>> {
        self.query_impl(source, start, end, None)
    }

    /// Queries a window at a caller-chosen resolution (seconds per point).
    ///
    /// Selection is restricted to archives at least as coarse as the
    /// requested resolution.
    ///
    /// # Errors
    ///
    /// See [`Series::query`].
    pub fn query_at(
        &self,
        source: &str,
        start: u64,
        end: Option<u64>,
        resolution: Duration,
    ) -> Result<QueryResult<'_>> {
        self.query_impl(source, start, end, Some(resolution.as_secs()))
    }

    fn query_impl(
        &self,
        source: &str,
        start: u64,
        end: Option<u64>,
        resolution: Option<u64>,
    ) -> Result<QueryResult<'_>> {
        let Some(index) = self.spec.source_index(source) else {
            return Err(crate::error::QueryError::UnknownSource {
                name: source.to_string(),
            }
            .into());
        };
        let end = end.unwrap_or_else(|| self.current_step_start());

        #[allow(clippy::cast_possible_truncation)] // source count fits u32 by layout
        let column = index as u32;
        Ok(query::run_query(
            &self.archives,
            &self.slab,
            column,
            start,
            end,
            resolution,
        ))
    }

    /// Flushes the artifact to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::SyncFailed`] if the flush fails.
    pub fn sync(&self) -> Result<()> {
        self.slab.sync()
    }
}

fn source_count(spec: &SeriesSpec) -> u32 {
    #[allow(clippy::cast_possible_truncation)] // schemas have a handful of sources
    {
        spec.sources.len() as u32
    }
}

fn archive_dims(spec: &SeriesSpec) -> Vec<(u32, u32)> {
    #[allow(clippy::cast_possible_truncation)] // validated against MAX_ROWS_PER_ARCHIVE
    (0..spec.archives.len())
        .map(|i| (spec.points_per_step(i) as u32, spec.archives[i].rows() as u32))
        .collect()
}
