//! Archive ring semantics over a slab region.
//!
//! An [`Archive`] is one fixed-size, fixed-resolution ring of consolidated
//! values inside a series slab. The series feeds every finalized primary
//! step into every archive; each archive accumulates `points_per_step`
//! contributions per source, then emits one consolidated point (AVERAGE over
//! the known subset) and advances its ring cursor, unconditionally
//! overwriting the oldest point.
//!
//! Slots are dense in time: the newest slot corresponds to the archive's
//! last consolidated window and each step backwards through the ring moves
//! exactly one window into the past, so no per-slot timestamp is stored.
//! Timestamps reported to readers mark the *end* of a consolidation window.

use crate::schema::SeriesSpec;
use crate::slab::{CdpState, Slab};

/// One resolution tier of a series.
///
/// `Archive` itself is plain metadata; all state lives in the slab, so the
/// series can hand `&mut Slab` to one archive at a time.
#[derive(Debug, Clone, Copy)]
pub struct Archive {
    /// Position in the series' archive list (and in the slab).
    pub index: usize,
    /// Primary steps consolidated into one point.
    pub points_per_step: u64,
    /// Ring size in rows; fixed for the archive's lifetime.
    pub rows: u32,
    /// Fraction of a window that may be unknown before the consolidated
    /// point itself becomes unknown.
    pub unknown_tolerance: f64,
}

impl Archive {
    /// Builds the archive metadata for `spec.archives[index]`.
    #[allow(clippy::cast_possible_truncation)] // rows validated against MAX_ROWS_PER_ARCHIVE
    pub(crate) fn from_spec(index: usize, spec: &SeriesSpec) -> Self {
        Self {
            index,
            points_per_step: spec.points_per_step(index),
            rows: spec.archives[index].rows() as u32,
            unknown_tolerance: spec.archives[index].unknown_tolerance,
        }
    }

    /// Seconds covered by one point of this archive.
    pub fn period_secs(&self, step_secs: u64) -> u64 {
        self.points_per_step * step_secs
    }

    /// Total time span the ring can hold.
    pub fn retention_secs(&self, step_secs: u64) -> u64 {
        self.period_secs(step_secs) * u64::from(self.rows)
    }

    /// Feeds one finalized primary step (one value-or-unknown per source)
    /// into this archive's open window, emitting a consolidated point when
    /// the window completes.
    ///
    /// Re-feeding a step that was already consolidated is a no-op, guarded
    /// by the persisted last-consolidated step.
    pub(crate) fn absorb(&self, slab: &mut Slab, step: u64, values: &[Option<f64>]) {
        let state = slab.archive_state(self.index);
        if step < state.last_step {
            return;
        }

        for (source, value) in values.iter().enumerate() {
            if let Some(v) = value {
                #[allow(clippy::cast_possible_truncation)] // source count fits u32 by layout
                let source = source as u32;
                let mut cdp = slab.cdp_state(self.index, source);
                cdp.sum += v;
                cdp.known += 1;
                slab.set_cdp_state(self.index, source, &cdp);
            }
        }

        // Windows are aligned to multiples of points_per_step, so the window
        // closes exactly when its last primary step arrives — including when
        // the series started mid-window (the missing lead-in counts as
        // unknown).
        if (step + 1) % self.points_per_step == 0 {
            self.emit(slab, step + 1);
        }
    }

    /// Emits the open window as one consolidated point ending at `end_step`.
    fn emit(&self, slab: &mut Slab, end_step: u64) {
        let state = slab.archive_state(self.index);
        let slot = if state.points_written == 0 {
            0
        } else {
            (state.write_cursor + 1) % self.rows
        };

        for source in 0..slab.source_count() {
            let cdp = slab.cdp_state(self.index, source);
            let unknown = self.points_per_step - u64::from(cdp.known);
            #[allow(clippy::cast_precision_loss)]
            let unknown_fraction = unknown as f64 / self.points_per_step as f64;
            let value = if cdp.known == 0 || unknown_fraction > self.unknown_tolerance {
                f64::NAN
            } else {
                cdp.sum / f64::from(cdp.known)
            };
            slab.write_value(self.index, source, slot, value);
            slab.set_cdp_state(self.index, source, &CdpState::empty());
        }

        slab.set_archive_progress(self.index, slot, state.points_written + 1, end_step);
    }

    /// End-of-window timestamp of the newest consolidated point, or `None`
    /// if nothing has been consolidated yet.
    pub fn latest_time(&self, slab: &Slab, step_secs: u64) -> Option<u64> {
        let state = slab.archive_state(self.index);
        if state.points_written == 0 {
            None
        } else {
            Some(state.last_step * step_secs)
        }
    }

    /// End-of-window timestamp of the oldest point still retained.
    pub fn earliest_time(&self, slab: &Slab, step_secs: u64) -> Option<u64> {
        let state = slab.archive_state(self.index);
        if state.points_written == 0 {
            return None;
        }
        let valid = state.points_written.min(u64::from(self.rows));
        Some(state.last_step * step_secs - (valid - 1) * self.period_secs(step_secs))
    }

    /// Reads the point whose window ends at `t`.
    ///
    /// `t` must be aligned to the archive period. Returns `None` for unknown
    /// points, for times newer than the last consolidated window (stale),
    /// and for times older than the retained history.
    pub fn value_at(&self, slab: &Slab, column: u32, t: u64, step_secs: u64) -> Option<f64> {
        let state = slab.archive_state(self.index);
        if state.points_written == 0 {
            return None;
        }
        let latest = state.last_step * step_secs;
        let earliest = self.earliest_time(slab, step_secs)?;
        if t > latest || t < earliest {
            return None;
        }

        let period = self.period_secs(step_secs);
        let back = (latest - t) / period;
        #[allow(clippy::cast_possible_truncation)] // back < rows, which is u32
        let back = (back % u64::from(self.rows)) as u32;
        let slot = (state.write_cursor + self.rows - back) % self.rows;

        let value = slab.read_value(self.index, column, slot);
        if value.is_nan() { None } else { Some(value) }
    }

    /// Iterates `(window_end_timestamp, value-or-unknown)` over the aligned
    /// timestamps in `(start, end]`.
    pub fn iter<'a>(
        &self,
        slab: &'a Slab,
        column: u32,
        start: u64,
        end: u64,
        step_secs: u64,
    ) -> ArchiveIter<'a> {
        let period = self.period_secs(step_secs);
        // First aligned window end strictly after `start`.
        let first = (start / period + 1) * period;
        ArchiveIter {
            slab,
            archive: *self,
            column,
            step_secs,
            period,
            next_t: first,
            end,
        }
    }
}

/// Iterator over one archive column, yielding `(timestamp, value-or-unknown)`
/// pairs in chronological order.
#[derive(Debug)]
pub struct ArchiveIter<'a> {
    slab: &'a Slab,
    archive: Archive,
    column: u32,
    step_secs: u64,
    period: u64,
    next_t: u64,
    end: u64,
}

impl Iterator for ArchiveIter<'_> {
    type Item = (u64, Option<f64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_t > self.end {
            return None;
        }
        let t = self.next_t;
        self.next_t += self.period;
        Some((
            t,
            self.archive.value_at(self.slab, self.column, t, self.step_secs),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArchiveSpec, DataSourceSpec, SeriesSpec};
    use std::time::Duration;
    use tempfile::tempdir;

    const STEP: u64 = 10;

    fn test_spec() -> SeriesSpec {
        let step = Duration::from_secs(STEP);
        SeriesSpec::new(
            step,
            vec![DataSourceSpec::gauge("v", step * 2)],
            vec![
                ArchiveSpec::new(step, Duration::from_secs(STEP * 6)),
                ArchiveSpec::new(Duration::from_secs(STEP * 2), Duration::from_secs(STEP * 8)),
            ],
        )
        .unwrap()
    }

    fn test_slab(dir: &tempfile::TempDir, spec: &SeriesSpec) -> Slab {
        #[allow(clippy::cast_possible_truncation)]
        let dims: Vec<(u32, u32)> = (0..spec.archives.len())
            .map(|i| (spec.points_per_step(i) as u32, spec.archives[i].rows() as u32))
            .collect();
        Slab::create(
            dir.path().join("t.slab"),
            spec.stable_hash(),
            STEP,
            1,
            &dims,
        )
        .unwrap()
    }

    #[test]
    fn test_cascade_average() {
        let dir = tempdir().unwrap();
        let spec = test_spec();
        let mut slab = test_slab(&dir, &spec);
        let secondary = Archive::from_spec(1, &spec);

        // Primary values 10, 20, 30, 40 with points_per_step = 2 must
        // consolidate to [15, 35].
        secondary.absorb(&mut slab, 0, &[Some(10.0)]);
        secondary.absorb(&mut slab, 1, &[Some(20.0)]);
        secondary.absorb(&mut slab, 2, &[Some(30.0)]);
        secondary.absorb(&mut slab, 3, &[Some(40.0)]);

        assert_eq!(secondary.value_at(&slab, 0, 2 * STEP, STEP), Some(15.0));
        assert_eq!(secondary.value_at(&slab, 0, 4 * STEP, STEP), Some(35.0));
        assert_eq!(secondary.latest_time(&slab, STEP), Some(4 * STEP));
        assert_eq!(secondary.earliest_time(&slab, STEP), Some(2 * STEP));
    }

    #[test]
    fn test_unknown_tolerance() {
        let dir = tempdir().unwrap();
        let mut spec = test_spec();
        spec.archives[1].interval = Duration::from_secs(STEP * 4);
        spec.archives[1].retention = Duration::from_secs(STEP * 16);
        let spec = SeriesSpec::new(spec.step, spec.sources, spec.archives).unwrap();
        let mut slab = test_slab(&dir, &spec);
        let archive = Archive::from_spec(1, &spec);

        // Window 1: one known out of four (75% unknown) exceeds the default
        // tolerance of one half — consolidated point is unknown.
        archive.absorb(&mut slab, 0, &[Some(8.0)]);
        archive.absorb(&mut slab, 1, &[None]);
        archive.absorb(&mut slab, 2, &[None]);
        archive.absorb(&mut slab, 3, &[None]);
        assert_eq!(archive.value_at(&slab, 0, 4 * STEP, STEP), None);

        // Window 2: two known out of four is exactly at the tolerance and
        // survives as the average of the known subset.
        archive.absorb(&mut slab, 4, &[Some(10.0)]);
        archive.absorb(&mut slab, 5, &[None]);
        archive.absorb(&mut slab, 6, &[Some(20.0)]);
        archive.absorb(&mut slab, 7, &[None]);
        assert_eq!(archive.value_at(&slab, 0, 8 * STEP, STEP), Some(15.0));
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let dir = tempdir().unwrap();
        let spec = test_spec();
        let mut slab = test_slab(&dir, &spec);
        let primary = Archive::from_spec(0, &spec);
        assert_eq!(primary.rows, 6);

        for step in 0..9u64 {
            #[allow(clippy::cast_precision_loss)]
            primary.absorb(&mut slab, step, &[Some(step as f64)]);
        }

        // 9 points into a 6-row ring: steps 0..2 are gone.
        assert_eq!(primary.latest_time(&slab, STEP), Some(9 * STEP));
        assert_eq!(primary.earliest_time(&slab, STEP), Some(4 * STEP));
        assert_eq!(primary.value_at(&slab, 0, 3 * STEP, STEP), None);
        assert_eq!(primary.value_at(&slab, 0, 4 * STEP, STEP), Some(3.0));
        assert_eq!(primary.value_at(&slab, 0, 9 * STEP, STEP), Some(8.0));
    }

    #[test]
    fn test_absorb_is_idempotent() {
        let dir = tempdir().unwrap();
        let spec = test_spec();
        let mut slab = test_slab(&dir, &spec);
        let secondary = Archive::from_spec(1, &spec);

        secondary.absorb(&mut slab, 0, &[Some(10.0)]);
        secondary.absorb(&mut slab, 1, &[Some(20.0)]);

        let state_before = slab.archive_state(1);
        let value_before = secondary.value_at(&slab, 0, 2 * STEP, STEP);

        // Re-presenting already-consolidated steps must leave the ring
        // byte-for-byte unchanged.
        secondary.absorb(&mut slab, 0, &[Some(99.0)]);
        secondary.absorb(&mut slab, 1, &[Some(99.0)]);

        let state_after = slab.archive_state(1);
        assert_eq!(state_before.write_cursor, state_after.write_cursor);
        assert_eq!(state_before.points_written, state_after.points_written);
        assert_eq!(state_before.last_step, state_after.last_step);
        assert_eq!(secondary.value_at(&slab, 0, 2 * STEP, STEP), value_before);
    }

    #[test]
    fn test_iter_marks_stale_tail_unknown() {
        let dir = tempdir().unwrap();
        let spec = test_spec();
        let mut slab = test_slab(&dir, &spec);
        let primary = Archive::from_spec(0, &spec);

        primary.absorb(&mut slab, 0, &[Some(1.0)]);
        primary.absorb(&mut slab, 1, &[Some(2.0)]);

        let points: Vec<_> = primary.iter(&slab, 0, 0, 4 * STEP, STEP).collect();
        assert_eq!(
            points,
            vec![
                (STEP, Some(1.0)),
                (2 * STEP, Some(2.0)),
                (3 * STEP, None),
                (4 * STEP, None),
            ]
        );
    }

    #[test]
    fn test_mid_window_start_counts_lead_in_as_unknown() {
        let dir = tempdir().unwrap();
        let mut spec = test_spec();
        spec.archives[1].interval = Duration::from_secs(STEP * 4);
        spec.archives[1].retention = Duration::from_secs(STEP * 16);
        let spec = SeriesSpec::new(spec.step, spec.sources, spec.archives).unwrap();
        let mut slab = test_slab(&dir, &spec);
        let archive = Archive::from_spec(1, &spec);

        // Series starts at step 3: only the final quarter of the first
        // window exists, so the window is 75% unknown and consolidates to
        // unknown.
        archive.absorb(&mut slab, 3, &[Some(100.0)]);
        assert_eq!(archive.value_at(&slab, 0, 4 * STEP, STEP), None);
    }
}
