//! CLI for glimpse data directories.
//!
//! Provides commands for inspecting, querying, and benchmarking the
//! round-robin stores written by the collection agent. Query output is a
//! finite `(timestamp, value-or-unknown)` sequence a chart renderer can
//! consume directly; unknown points print as empty CSV cells or JSON nulls
//! so a plotted line gaps instead of dropping to zero.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use clap::{Parser, Subcommand, ValueEnum};
use glimpse::registry::Registry;
use glimpse::schema::{ArchiveSpec, DataSourceSpec, SeriesSpec, SourceKind};
use glimpse::storage;

/// glimpse — round-robin system statistics store CLI.
#[derive(Parser)]
#[command(name = "glimpse", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Display components, schemas, entities, and artifact usage.
    Info {
        /// Path to the data directory.
        data_dir: PathBuf,
    },

    /// Query consolidated values for one entity and source.
    Query {
        /// Path to the data directory.
        data_dir: PathBuf,

        /// Component subdirectory (e.g. "counters", "disks").
        component: String,

        /// Entity id (e.g. "eth0", "sda").
        entity: String,

        /// Data source name (e.g. "rx_bytes").
        source: String,

        /// Time range to query, counted back from now (e.g. "1h", "7d").
        #[arg(long, default_value = "1d")]
        range: String,

        /// Desired resolution per point (e.g. "15m"); finest available if omitted.
        #[arg(long)]
        resolution: Option<String>,

        /// Output format.
        #[arg(long, default_value = "csv")]
        format: OutputFormat,
    },

    /// Run a write-path microbenchmark against a throwaway store.
    Bench {
        /// Number of samples to write.
        #[arg(long, default_value = "1000000")]
        samples: u64,

        /// Number of entities to spread them across.
        #[arg(long, default_value = "16")]
        entities: u32,
    },
}

/// Output format for query results.
#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Comma-separated values; unknown prints as an empty cell.
    Csv,
    /// JSON object with a data array; unknown prints as null.
    Json,
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { data_dir } => cmd_info(&data_dir),
        Commands::Query {
            data_dir,
            component,
            entity,
            source,
            range,
            resolution,
            format,
        } => cmd_query(
            &data_dir,
            &component,
            &entity,
            &source,
            &range,
            resolution.as_deref(),
            &format,
        ),
        Commands::Bench { samples, entities } => cmd_bench(samples, entities),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `glimpse info <data_dir>`.
fn cmd_info(data_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !data_dir.is_dir() {
        return Err(format!("No data directory at '{}'", data_dir.display()).into());
    }

    println!("Data directory: {}", data_dir.display());
    println!();

    let mut components: Vec<PathBuf> = std::fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir() && p.join(storage::SPEC_SIDECAR_FILE).is_file())
        .collect();
    components.sort();

    if components.is_empty() {
        println!("No components found.");
        return Ok(());
    }

    for dir in &components {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let spec = storage::read_spec_sidecar(dir)?;

        println!("Component \"{name}\"");
        println!("  Step: {}", format_duration_secs(spec.step_secs()));
        println!("  Sources:");
        for source in &spec.sources {
            let kind = match source.kind {
                SourceKind::Counter => "counter",
                SourceKind::Gauge => "gauge",
            };
            println!(
                "    {} ({kind}, heartbeat {})",
                source.name,
                format_duration_secs(source.heartbeat.as_secs())
            );
        }
        println!("  Archives:");
        for (i, archive) in spec.archives.iter().enumerate() {
            println!(
                "    Archive {i}: {} per point, {} retained",
                format_duration_secs(archive.interval.as_secs()),
                format_duration_secs(archive.retention.as_secs())
            );
        }

        let registry = Registry::open(dir, spec)?;
        let entities: Vec<_> = registry.entities().collect();
        println!("  Entities: {}", entities.len());
        for (key, raw) in entities {
            let artifact = storage::artifact_path(dir, key);
            let size = std::fs::metadata(&artifact).map(|m| m.len()).unwrap_or(0);
            if key == raw {
                println!("    {raw} ({})", format_bytes(size));
            } else {
                println!("    {raw} -> {key} ({})", format_bytes(size));
            }
        }
        println!();
    }

    println!(
        "Total disk usage: {}",
        format_bytes(dir_size(data_dir)?)
    );

    Ok(())
}

/// Implements `glimpse query <data_dir> <component> <entity> <source>`.
fn cmd_query(
    data_dir: &Path,
    component: &str,
    entity: &str,
    source: &str,
    range: &str,
    resolution: Option<&str>,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = data_dir.join(component);
    if !dir.join(storage::SPEC_SIDECAR_FILE).is_file() {
        return Err(format!("No component '{component}' under '{}'", data_dir.display()).into());
    }

    let spec = storage::read_spec_sidecar(&dir)?;
    let mut registry = Registry::open(&dir, spec)?;

    if !registry.entities().any(|(_, raw)| raw == entity) {
        return Err(format!("Entity '{entity}' not found in component '{component}'").into());
    }
    let series = registry.get_or_create(entity)?;

    let range_secs = parse_duration_secs(range)?;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)?
        .as_secs();
    let start = now.saturating_sub(range_secs);

    let result = match resolution {
        Some(r) => series.query_at(
            source,
            start,
            None,
            Duration::from_secs(parse_duration_secs(r)?),
        )?,
        None => series.query(source, start, None)?,
    };

    let archive_index = result.archive_index();
    let truncated = result.truncated();
    let points = result.collect_points();

    match format {
        OutputFormat::Csv => {
            println!(
                "# component={component}, entity={entity}, source={source}, archive={archive_index}, truncated={truncated}, points={}",
                points.len()
            );
            println!("timestamp,value");
            for (t, value) in &points {
                match value {
                    Some(v) => println!("{t},{v}"),
                    None => println!("{t},"),
                }
            }
        }
        OutputFormat::Json => {
            let data: Vec<serde_json::Value> = points
                .iter()
                .map(|(t, value)| {
                    serde_json::json!({
                        "timestamp": t,
                        "value": value,
                    })
                })
                .collect();

            let output = serde_json::json!({
                "component": component,
                "entity": entity,
                "source": source,
                "archive": archive_index,
                "truncated": truncated,
                "count": data.len(),
                "data": data,
            });

            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Implements `glimpse bench`.
#[allow(clippy::cast_precision_loss)] // benchmark statistics are display-only
fn cmd_bench(samples: u64, entities: u32) -> Result<(), Box<dyn std::error::Error>> {
    println!("glimpse write-path benchmark");
    println!("  Samples: {samples}");
    println!("  Entities: {entities}");
    println!();

    let temp_dir = std::env::temp_dir().join("glimpse_bench");
    let _ = std::fs::remove_dir_all(&temp_dir);

    let step = Duration::from_secs(1);
    let spec = SeriesSpec::new(
        step,
        vec![
            DataSourceSpec::counter("rx_bytes", step * 2),
            DataSourceSpec::counter("tx_bytes", step * 2),
        ],
        vec![
            ArchiveSpec::new(step, Duration::from_secs(3600)),
            ArchiveSpec::new(Duration::from_secs(60), Duration::from_secs(86_400)),
        ],
    )?;

    let mut registry = Registry::open(&temp_dir, spec)?;
    for i in 0..entities {
        registry.get_or_create(&format!("eth{i}"))?;
    }

    let base = 1_700_000_000u64;
    let rounds = samples / u64::from(entities);

    let start = Instant::now();
    let mut raw = 0.0;
    for round in 0..rounds {
        let ts = base + round;
        raw += 1500.0;
        for i in 0..entities {
            let series = registry.get_or_create(&format!("eth{i}"))?;
            series.record_batch(&[("rx_bytes", raw), ("tx_bytes", raw / 3.0)], ts)?;
        }
    }
    let elapsed = start.elapsed();

    let total_writes = rounds * u64::from(entities) * 2;
    let ns_per_write = elapsed.as_nanos() as f64 / total_writes as f64;
    let writes_per_sec = total_writes as f64 / elapsed.as_secs_f64();

    println!("Results:");
    println!("  Total writes: {total_writes}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_write:.1} ns/write");
    println!("  Throughput: {writes_per_sec:.0} writes/sec");

    let _ = std::fs::remove_dir_all(&temp_dir);

    Ok(())
}

/// Parses a human-readable duration string (e.g. "1h", "30m", "7d") into
/// seconds.
fn parse_duration_secs(s: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = s.trim();
    if s.len() < 2 {
        return Err(format!("Cannot parse duration '{s}'").into());
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str.parse()?;

    let secs = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86_400,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, h, or d.").into()),
    };

    Ok(secs)
}

/// Formats seconds as a human-readable duration.
fn format_duration_secs(secs: u64) -> String {
    if secs >= 86_400 && secs.is_multiple_of(86_400) {
        format!("{}d", secs / 86_400)
    } else if secs >= 3600 && secs.is_multiple_of(3600) {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs.is_multiple_of(60) {
        format!("{}m", secs / 60)
    } else {
        format!("{secs}s")
    }
}

/// Formats a byte count as a human-readable string.
#[allow(clippy::cast_precision_loss)] // byte counts are display-only
fn format_bytes(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

/// Recursively calculates directory size.
fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path)?;
            } else {
                total += entry.metadata()?.len();
            }
        }
    }
    Ok(total)
}
