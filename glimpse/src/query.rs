//! Query interface for reading consolidated data out of a series.
//!
//! The query engine is a routing layer over the archive rings: it picks the
//! finest archive able to answer a time window (optionally constrained to a
//! caller-chosen resolution), clips the window to the retained history, and
//! wraps the resulting iterator together with metadata a renderer needs —
//! which archive answered, whether the request was truncated, and what range
//! was actually available.
//!
//! Queries are pure reads: running one twice returns the same sequence, and
//! an empty requested window yields an empty sequence rather than an error.

use crate::archive::{Archive, ArchiveIter};
use crate::slab::Slab;

/// Result of a series query.
///
/// Implements `Iterator` over `(window_end_timestamp, value-or-unknown)`
/// pairs in chronological order. Unknown points are `None` — explicitly
/// distinct from zero — and appear wherever data is missing or stale inside
/// the returned range. Times before the retained history are *not* padded
/// with unknowns; they are cut off and reported via [`QueryResult::truncated`].
#[derive(Debug)]
pub struct QueryResult<'a> {
    /// The underlying archive iterator; `None` for an empty window.
    iter: Option<ArchiveIter<'a>>,

    /// Which archive index answered this query.
    archive_index: usize,

    /// Whether the requested window starts before the earliest retained
    /// point, i.e. the result is the intersection with available history.
    truncated: bool,

    /// The requested time range `(start, end]`.
    requested: (u64, u64),

    /// End-of-window timestamps actually available in the chosen archive.
    available: (Option<u64>, Option<u64>),
}

impl<'a> QueryResult<'a> {
    /// Returns the archive index that answered this query
    /// (0 = primary resolution).
    pub fn archive_index(&self) -> usize {
        self.archive_index
    }

    /// Returns whether the result was truncated to the retained history.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Returns the requested `(start, end]` range.
    pub fn requested_range(&self) -> (u64, u64) {
        self.requested
    }

    /// Returns the `(earliest, latest)` window-end timestamps available in
    /// the archive that answered, or `None`s if it holds no data.
    pub fn available_range(&self) -> (Option<u64>, Option<u64>) {
        self.available
    }

    /// Collects the remaining points into a vector.
    pub fn collect_points(self) -> Vec<(u64, Option<f64>)> {
        self.collect()
    }
}

impl<'a> Iterator for QueryResult<'a> {
    type Item = (u64, Option<f64>);

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.as_mut()?.next()
    }
}

/// Selects an archive and runs a query against it.
///
/// `resolution` (seconds per point), when given, restricts selection to
/// archives at least that coarse; the finest qualifying archive whose
/// retained history covers `start` wins. When no archive reaches back to
/// `start`, the one with the longest history answers and the result is
/// flagged truncated.
pub(crate) fn run_query<'a>(
    archives: &[Archive],
    slab: &'a Slab,
    column: u32,
    start: u64,
    end: u64,
    resolution: Option<u64>,
) -> QueryResult<'a> {
    let step_secs = slab.step_secs();

    let coarse_enough = |a: &&Archive| {
        resolution.is_none_or(|r| a.period_secs(step_secs) >= r)
    };
    let candidates: Vec<&Archive> = archives.iter().filter(coarse_enough).collect();
    // A resolution coarser than every archive falls back to the coarsest one.
    let candidates = if candidates.is_empty() {
        archives.iter().rev().take(1).collect()
    } else {
        candidates
    };

    // Finest candidate that still reaches back to `start`.
    let covering = candidates
        .iter()
        .find(|a| a.earliest_time(slab, step_secs).is_some_and(|e| e <= start));

    let (archive, truncated) = match covering {
        Some(archive) => (**archive, false),
        None => {
            // Longest available history wins; the request is clipped to it.
            let fallback = candidates
                .iter()
                .filter(|a| a.earliest_time(slab, step_secs).is_some())
                .min_by_key(|a| a.earliest_time(slab, step_secs));
            match fallback {
                Some(archive) => (**archive, true),
                None => {
                    // No archive holds any data yet.
                    return QueryResult {
                        iter: None,
                        archive_index: candidates[0].index,
                        truncated: start < end,
                        requested: (start, end),
                        available: (None, None),
                    };
                }
            }
        }
    };

    let earliest = archive.earliest_time(slab, step_secs);
    let latest = archive.latest_time(slab, step_secs);

    if start >= end {
        return QueryResult {
            iter: None,
            archive_index: archive.index,
            truncated: false,
            requested: (start, end),
            available: (earliest, latest),
        };
    }

    // Clip the start so the iterator's first point is the earliest retained
    // one — truncation never pads fabricated leading values.
    let period = archive.period_secs(step_secs);
    let effective_start = match earliest {
        Some(e) if e > start => e.saturating_sub(period),
        _ => start,
    };

    QueryResult {
        iter: Some(archive.iter(slab, column, effective_start, end, step_secs)),
        archive_index: archive.index,
        truncated,
        requested: (start, end),
        available: (earliest, latest),
    }
}
