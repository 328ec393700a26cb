//! Demonstration of write-time consolidation in glimpse.
//!
//! Feeds a simulated hour of per-second samples into a series with a
//! three-tier archive ladder and shows what each resolution retains.

use std::time::Duration;

use glimpse::schema::{ArchiveSpec, DataSourceSpec, SeriesSpec};
use glimpse::series::Series;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let step = Duration::from_secs(1);
    let spec = SeriesSpec::new(
        step,
        vec![DataSourceSpec::gauge("cpu_busy", step * 2)],
        vec![
            // 10 minutes of per-second values
            ArchiveSpec::new(step, Duration::from_secs(600)),
            // 6 hours of 10-second averages
            ArchiveSpec::new(Duration::from_secs(10), Duration::from_secs(21_600)),
            // a week of 5-minute averages
            ArchiveSpec::new(Duration::from_secs(300), Duration::from_secs(604_800)),
        ],
    )?;

    let path = std::env::temp_dir().join("glimpse_consolidation_demo.slab");
    let _ = std::fs::remove_file(&path);
    let mut series = Series::create(&path, &spec)?;

    println!("Schema: 1s -> 10s(avg) -> 5m(avg), one gauge source");

    // One simulated hour of a sawtooth load pattern.
    let base = 1_700_000_000u64;
    for i in 0..3600u64 {
        let value = f64::from(u32::try_from(i % 100)?);
        series.record("cpu_busy", value, base + i)?;
    }

    for (label, resolution) in [("10s", 10u64), ("5m", 300)] {
        let points = series
            .query_at(
                "cpu_busy",
                base,
                None,
                Duration::from_secs(resolution),
            )?
            .collect_points();
        let known = points.iter().filter(|(_, v)| v.is_some()).count();
        println!("{label:>4} resolution: {} points retained, {known} known", points.len());
        if let Some((t, Some(v))) = points.last() {
            println!("      newest: t={t} value={v:.2}");
        }
    }

    let _ = std::fs::remove_file(&path);
    Ok(())
}
