use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "vise workspace automation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the lock benchmarks and render a throughput report
    Bench {
        /// Run quickly (lower sample size/time)
        #[arg(long, default_value_t = false)]
        quick: bool,

        /// Generate report only (skip running benchmarks)
        #[arg(long, default_value_t = false)]
        report_only: bool,
    },
}

const BENCHES: &[&str] = &["locks", "flat_combining"];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Bench { quick, report_only } => {
            if !report_only {
                run_benchmarks(quick)?;
            }
            generate_report()?;
        }
    }

    Ok(())
}

fn run_benchmarks(quick: bool) -> Result<()> {
    for bench in BENCHES {
        println!(">>> Running bench: {}", bench);
        let start = Instant::now();

        let mut cmd = Command::new("cargo");
        cmd.env("CARGO_INCREMENTAL", "0");
        cmd.arg("bench").arg("--bench").arg(bench);

        // Args after -- go to the Criterion runner.
        cmd.arg("--");
        if quick {
            cmd.arg("--measurement-time").arg("0.5");
            cmd.arg("--sample-size").arg("10");
            cmd.arg("--noplot");
        }

        let status = cmd
            .status()
            .context(format!("Failed to run bench {}", bench))?;

        if !status.success() {
            eprintln!("Warning: bench {} failed", bench);
        } else {
            println!("Finished {} in {:.2?}", bench, start.elapsed());
        }
    }

    Ok(())
}

fn generate_report() -> Result<()> {
    println!("\n>>> Generating report...");

    let criterion_dir = Path::new("target/criterion");
    if !criterion_dir.exists() {
        eprintln!("No criterion output found at {}", criterion_dir.display());
        return Ok(());
    }

    // group -> benchmark id -> ops/s
    let mut results: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
    collect_results(criterion_dir, criterion_dir, &mut results);

    let report_path = Path::new("benchmark_results/report.md");
    if let Some(parent) = report_path.parent() {
        fs::create_dir_all(parent)?;
    }

    use std::io::Write;
    let mut file = fs::File::create(report_path)?;

    writeln!(file, "# Lock Throughput Report")?;

    for (group, entries) in &results {
        writeln!(file, "\n## {}\n", group)?;
        writeln!(file, "| Variant | Ops/s |")?;
        writeln!(file, "|---|---|")?;
        for (id, ops) in entries {
            let ops_str = if *ops > 1_000_000.0 {
                format!("{:.2}M", ops / 1_000_000.0)
            } else if *ops > 1_000.0 {
                format!("{:.2}K", ops / 1_000.0)
            } else {
                format!("{:.0}", ops)
            };
            writeln!(file, "| {} | {} |", id, ops_str)?;
        }
    }

    println!("Report written to {}", report_path.display());
    Ok(())
}

fn collect_results(
    root: &Path,
    dir: &Path,
    results: &mut BTreeMap<String, BTreeMap<String, f64>>,
) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_results(root, &path, results);
            continue;
        }
        if path.file_name().and_then(|s| s.to_str()) != Some("estimates.json") {
            continue;
        }
        // Structure: target/criterion/<group>/<id...>/new/estimates.json
        let Some(parent) = path.parent() else { continue };
        if parent.file_name().and_then(|s| s.to_str()) != Some("new") {
            continue;
        }
        let Some(bench_dir) = parent.parent() else { continue };
        let Ok(rel) = bench_dir.strip_prefix(root) else { continue };
        let mut parts = rel.iter().filter_map(|p| p.to_str());
        let Some(group) = parts.next() else { continue };
        if group == "report" {
            continue;
        }
        let id = parts.collect::<Vec<_>>().join("/");
        if id.is_empty() {
            continue;
        }

        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) else {
            continue;
        };
        if let Some(mean) = json.get("mean").and_then(|m| m.get("point_estimate")) {
            let time_ns = mean.as_f64().unwrap_or(0.0);
            if time_ns > 0.0 {
                results
                    .entry(group.to_string())
                    .or_default()
                    .insert(id, 1e9 / time_ns);
            }
        }
    }
}
