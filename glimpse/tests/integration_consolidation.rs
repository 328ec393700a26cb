//! Integration tests for the consolidation cascade.
//!
//! These verify that finalized primary steps cascade into coarser archives
//! as window averages, that windows with too many unknowns consolidate to
//! unknown, that already-finalized periods are never rewritten, and that the
//! cascade spans the whole archive ladder.

use std::time::Duration;

use glimpse::schema::{ArchiveSpec, DataSourceSpec, SeriesSpec};
use glimpse::series::Series;
use tempfile::tempdir;

const STEP: u64 = 300;

/// 1-step -> 2-step(avg) -> 6-step(avg) ladder.
fn three_tier_spec() -> SeriesSpec {
    let step = Duration::from_secs(STEP);
    SeriesSpec::new(
        step,
        vec![DataSourceSpec::gauge("v", step * 2)],
        vec![
            ArchiveSpec::new(step, Duration::from_secs(STEP * 24)),
            ArchiveSpec::new(Duration::from_secs(STEP * 2), Duration::from_secs(STEP * 48)),
            ArchiveSpec::new(Duration::from_secs(STEP * 6), Duration::from_secs(STEP * 144)),
        ],
    )
    .unwrap()
}

/// Timestamp in the middle of step `n`.
fn at_step(n: u64) -> u64 {
    n * STEP + STEP / 2
}

#[test]
fn test_pairwise_average_cascade() {
    let dir = tempdir().unwrap();
    let mut series =
        Series::create(dir.path().join("c.slab"), &three_tier_spec()).unwrap();

    // Primary values 10, 20, 30, 40 -> the 2-step archive must hold
    // exactly [15, 35].
    for (step, value) in [(0u64, 10.0), (1, 20.0), (2, 30.0), (3, 40.0), (4, 0.0)] {
        series.record("v", value, at_step(step)).unwrap();
    }

    let points = series
        .query_at("v", 0, Some(4 * STEP), Duration::from_secs(2 * STEP))
        .unwrap()
        .collect_points();
    assert_eq!(points, vec![(2 * STEP, Some(15.0)), (4 * STEP, Some(35.0))]);
}

#[test]
fn test_window_with_too_many_unknowns_is_unknown() {
    let dir = tempdir().unwrap();
    let step = Duration::from_secs(STEP);
    // 4-step windows at the default tolerance (half may be unknown).
    let spec = SeriesSpec::new(
        step,
        vec![DataSourceSpec::gauge("v", step * 2)],
        vec![
            ArchiveSpec::new(step, Duration::from_secs(STEP * 24)),
            ArchiveSpec::new(Duration::from_secs(STEP * 4), Duration::from_secs(STEP * 96)),
        ],
    )
    .unwrap();
    let mut series = Series::create(dir.path().join("c.slab"), &spec).unwrap();

    // Steps 0 and 1 have data; then silence until step 4. The gap exceeds
    // the heartbeat, so steps 2 and 3 are unknown: the first 4-step window
    // is half known and survives, at the tolerance boundary.
    series.record("v", 10.0, at_step(0)).unwrap();
    series.record("v", 20.0, at_step(1)).unwrap();
    series.record("v", 1.0, at_step(4)).unwrap();
    // The sample at step 4 was itself stale, and the silence resumes until
    // step 8 -> the second window is entirely unknown and dies.
    series.record("v", 2.0, at_step(8)).unwrap();
    series.record("v", 2.0, at_step(9)).unwrap();

    let points = series
        .query_at("v", 0, Some(8 * STEP), Duration::from_secs(4 * STEP))
        .unwrap()
        .collect_points();
    assert_eq!(
        points,
        vec![(4 * STEP, Some(15.0)), (8 * STEP, None)]
    );
}

#[test]
fn test_finalized_periods_never_rewritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.slab");
    let spec = three_tier_spec();

    {
        let mut series = Series::create(&path, &spec).unwrap();
        for step in 0..6u64 {
            #[allow(clippy::cast_precision_loss)]
            series.record("v", step as f64, at_step(step)).unwrap();
        }
        series.sync().unwrap();
    }

    let bytes_before = std::fs::read(&path).unwrap();

    // A sample for an already-finalized step is rejected before touching
    // anything: the artifact stays byte-for-byte identical.
    {
        let mut series = Series::open(&path, &spec).unwrap();
        assert!(series.record("v", 99.0, at_step(2)).is_err());
        series.sync().unwrap();
    }

    let bytes_after = std::fs::read(&path).unwrap();
    assert_eq!(bytes_before, bytes_after);
}

#[test]
fn test_cascade_spans_all_tiers() {
    let dir = tempdir().unwrap();
    let mut series =
        Series::create(dir.path().join("c.slab"), &three_tier_spec()).unwrap();

    // 13 steps of value 6.0: finalizes steps 0..12, completing six 2-step
    // windows and two 6-step windows.
    for step in 0..13u64 {
        series.record("v", 6.0, at_step(step)).unwrap();
    }

    let coarse = series
        .query_at("v", 0, Some(12 * STEP), Duration::from_secs(6 * STEP))
        .unwrap()
        .collect_points();
    assert_eq!(
        coarse,
        vec![(6 * STEP, Some(6.0)), (12 * STEP, Some(6.0))]
    );

    let middle = series
        .query_at("v", 7 * STEP, Some(12 * STEP), Duration::from_secs(2 * STEP))
        .unwrap()
        .collect_points();
    assert_eq!(
        middle,
        vec![(8 * STEP, Some(6.0)), (10 * STEP, Some(6.0)), (12 * STEP, Some(6.0))]
    );
}

#[test]
fn test_consolidation_continues_across_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("c.slab");
    let spec = three_tier_spec();

    // First run covers half a 2-step window.
    {
        let mut series = Series::create(&path, &spec).unwrap();
        series.record("v", 10.0, at_step(0)).unwrap();
        series.record("v", 20.0, at_step(1)).unwrap();
        series.sync().unwrap();
    }

    // Second run completes it; the open window crossed the restart.
    {
        let mut series = Series::open(&path, &spec).unwrap();
        series.record("v", 0.0, at_step(2)).unwrap();
        series.sync().unwrap();
    }

    let series = Series::open(&path, &spec).unwrap();
    let points = series
        .query_at("v", 0, Some(2 * STEP), Duration::from_secs(2 * STEP))
        .unwrap()
        .collect_points();
    assert_eq!(points, vec![(2 * STEP, Some(15.0))]);
}
