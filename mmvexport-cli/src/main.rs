//! CLI for the mmvexport metrics writer.
//!
//! Provides commands for planning layouts, classifying units, publishing a
//! live demo file, and benchmarking the update path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use mmvexport::{
    BridgeConfig, FormatVariant, MetricValue, Monitorable, MonitoredConstant, MonitoredCounter,
    MonitoredGauge, MmvWriter, Semantics, Unit, UnitMappingTable, UpdateBridge, WriterConfig,
};
use tracing_subscriber::EnvFilter;

/// mmvexport — Export in-process metrics through a memory-mapped file.
#[derive(Parser)]
#[command(name = "mmvexport", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Print the file layout a JSON writer config would produce.
    Layout {
        /// Path to the writer config (JSON).
        #[arg(long)]
        config: PathBuf,
    },

    /// Classify unit strings into dimension words.
    Units {
        /// Units to classify (e.g., "byte/second", "KiB", "count/ms").
        #[arg(required = true)]
        units: Vec<String>,
    },

    /// Publish a live demo file updated through the update bridge.
    Demo {
        /// Path of the metrics file to create.
        #[arg(long, default_value = "./demo.mmv")]
        path: PathBuf,

        /// Wire format.
        #[arg(long, default_value = "mmv")]
        variant: Variant,

        /// How long to run (e.g., "10s", "2m").
        #[arg(long, default_value = "10s")]
        duration: String,

        /// Milliseconds between updates.
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },

    /// Run an update-path microbenchmark.
    Bench {
        /// Number of updates to write.
        #[arg(long, default_value = "10000000")]
        updates: u64,

        /// Number of metrics to register.
        #[arg(long, default_value = "30")]
        metrics: u32,

        /// Wire format.
        #[arg(long, default_value = "mmv")]
        variant: Variant,
    },
}

/// Wire format selector.
#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    /// Self-describing MMV file.
    Mmv,
    /// Packed file with a text sidecar.
    Legacy,
}

impl From<Variant> for FormatVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Mmv => FormatVariant::Mmv,
            Variant::Legacy => FormatVariant::Legacy,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Layout { config } => cmd_layout(&config),
        Commands::Units { units } => cmd_units(&units),
        Commands::Demo {
            path,
            variant,
            duration,
            interval_ms,
        } => cmd_demo(&path, variant.into(), &duration, interval_ms),
        Commands::Bench {
            updates,
            metrics,
            variant,
        } => cmd_bench(updates, metrics, variant.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `mmvexport layout --config <file>`.
fn cmd_layout(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = WriterConfig::from_json_file(config_path)?;
    tracing::debug!(config = %config_path.display(), metrics = config.metrics.len(), "loaded writer config");
    let writer = MmvWriter::from_config(&config)?;
    let layout = writer.format().plan(writer.metrics())?;

    let metrics: Vec<serde_json::Value> = writer
        .metrics()
        .iter()
        .zip(layout.offsets())
        .map(|(metric, offsets)| {
            serde_json::json!({
                "name": metric.name(),
                "type": metric.handler().type_name(),
                "width": metric.handler().data_length(),
                "unit": metric.unit().symbol(),
                "dimension": format!("{:?}", metric.mapping().dimension_set()),
                "dimension_code": format!("{:#010x}", metric.mapping().dimension_code()),
                "offsets": offsets,
            })
        })
        .collect();

    let report = serde_json::json!({
        "path": config.path,
        "variant": config.variant,
        "length": layout.length(),
        "blocks": layout.blocks(),
        "metrics": metrics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Implements `mmvexport units <unit>...`.
fn cmd_units(units: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let table = UnitMappingTable::new();

    println!("{:<24} {:<14} {:<28} {:<28} CODE", "UNIT", "DIMENSION", "NUMERATOR", "DENOMINATOR");
    for text in units {
        let unit: Unit = text.parse()?;
        let mapping = table.find_unit_mapping(&unit);
        let denominator = mapping
            .denominator()
            .map_or_else(|| "-".to_string(), |d| format!("{d:?}"));
        println!(
            "{:<24} {:<14} {:<28} {:<28} {:#010x}",
            text,
            format!("{:?}", mapping.dimension_set()),
            format!("{:?}", mapping.numerator()),
            denominator,
            mapping.dimension_code()
        );
    }
    Ok(())
}

/// Implements `mmvexport demo`.
fn cmd_demo(
    path: &Path,
    variant: FormatVariant,
    duration: &str,
    interval_ms: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let run_for = parse_duration(duration)?;
    let interval = Duration::from_millis(interval_ms.max(1));

    let ticks = Arc::new(MonitoredCounter::new("demo.ticks"));
    let uptime = Arc::new(MonitoredGauge::new("demo.uptime", "s".parse()?, 0.0));
    let version = MonitoredConstant::new("demo.version", Unit::COUNT, env!("CARGO_PKG_VERSION"));

    let mut writer = MmvWriter::new(path, variant.format());
    writer.add_monitorable(ticks.as_ref(), ticks.unit().clone(), ticks.semantics())?;
    writer.add_monitorable(uptime.as_ref(), uptime.unit().clone(), uptime.semantics())?;
    writer.add_monitorable(&version, version.unit().clone(), version.semantics())?;
    writer.start()?;
    let writer = Arc::new(writer);

    println!("Publishing {} ({variant:?}) for {run_for:?}", path.display());
    if let Some(sidecar) = writer.sidecar_path() {
        println!("  Sidecar: {}", sidecar.display());
    }
    println!("  Generation: {}", writer.generation());

    let mut bridge = UpdateBridge::new(BridgeConfig::default())?;
    bridge.start(Arc::clone(&writer))?;
    let notifier = bridge.notifier();

    let started = Instant::now();
    while started.elapsed() < run_for {
        thread::sleep(interval);
        ticks.inc();
        uptime.set(started.elapsed().as_secs_f64());
        notifier.notify(Arc::clone(&ticks) as Arc<dyn Monitorable>);
        notifier.notify(Arc::clone(&uptime) as Arc<dyn Monitorable>);
    }

    bridge.stop()?;
    writer.stop()?;

    println!();
    println!("Results:");
    println!("  Ticks: {}", ticks.get());
    println!("  Applied updates: {}", bridge.applied_updates());
    println!("  Dropped signals: {}", bridge.dropped_signals());
    Ok(())
}

/// Implements `mmvexport bench`.
#[allow(clippy::cast_precision_loss)] // Timings are display-only
fn cmd_bench(updates: u64, metric_count: u32, variant: FormatVariant) -> Result<(), Box<dyn std::error::Error>> {
    println!("mmvexport update benchmark");
    println!("  Updates: {updates}");
    println!("  Metrics: {metric_count}");
    println!("  Variant: {variant:?}");
    println!();

    let metric_count = metric_count.max(1);
    let temp_dir = std::env::temp_dir().join("mmvexport_bench");
    std::fs::create_dir_all(&temp_dir)?;
    let path = temp_dir.join("bench.mmv");

    let mut writer = MmvWriter::new(&path, variant.format());
    let names: Vec<String> = (0..metric_count).map(|i| format!("metric.{i}")).collect();
    for name in &names {
        writer.add_metric(name, Unit::COUNT, Semantics::Counter, 0i64)?;
    }
    writer.start()?;

    println!("Writing {updates} updates across {metric_count} metrics...");

    let per_metric = updates / u64::from(metric_count);
    let start = Instant::now();
    let mut value = 0i64;
    for _ in 0..per_metric {
        value += 1;
        for name in &names {
            writer.update_metric(name, &MetricValue::I64(value))?;
        }
    }
    let elapsed = start.elapsed();

    let total = per_metric * u64::from(metric_count);
    let ns_per_update = elapsed.as_nanos() as f64 / total.max(1) as f64;
    let updates_per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("Results:");
    println!("  Total updates: {total}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_update:.1} ns/update");
    println!("  Throughput: {updates_per_sec:.0} updates/sec");
    println!();

    writer.stop()?;
    let _ = std::fs::remove_dir_all(&temp_dir);
    Ok(())
}

/// Parses a human-readable duration string (e.g., "10s", "2m", "1h").
fn parse_duration(s: &str) -> Result<Duration, Box<dyn std::error::Error>> {
    let s = s.trim();
    let Some((split, _)) = s.char_indices().last() else {
        return Err("Empty duration string".into());
    };
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str.parse()?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => return Err(format!("Unknown duration unit: '{unit}'. Use s, m, or h.").into()),
    };
    let secs = num
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration too large: '{s}'"))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("xs").is_err());
    }

    #[test]
    fn test_parse_duration_rejects_bad_suffix_and_overflow() {
        assert!(parse_duration("5µ").is_err());
        assert!(parse_duration("µ").is_err());
        assert!(parse_duration(&format!("{}h", u64::MAX)).is_err());
        assert_eq!(
            parse_duration(&format!("{}s", u64::MAX)).unwrap(),
            Duration::from_secs(u64::MAX)
        );
    }

    #[test]
    fn test_variant_maps_to_format() {
        assert_eq!(FormatVariant::from(Variant::Mmv), FormatVariant::Mmv);
        assert_eq!(FormatVariant::from(Variant::Legacy), FormatVariant::Legacy);
    }
}
