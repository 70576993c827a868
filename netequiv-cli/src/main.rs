//! netequiv CLI - compare transistor netlists from the command line.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use netequiv::processing::merge::merge_devices;
use netequiv::{
    load_design, render_human, AbortSignal, CompareOptions, HierarchyComparison, NetEquivCore,
    Netlist,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netequiv")]
#[command(about = "Hierarchical netlist equivalence (LVS) checker", long_about = None)]
#[command(version)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two or more design libraries
    Compare {
        /// Design library JSON files; the first is the reference
        #[arg(value_name = "FILE", num_args = 2.., required = true)]
        files: Vec<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Cell to compare (defaults to each design's top cell)
        #[arg(long)]
        cell: Option<String>,

        /// Compare transistor sizes
        #[arg(long)]
        check_sizes: bool,

        /// Disable parallel and series merging
        #[arg(long)]
        no_merge: bool,

        /// Flatten everything instead of comparing sub-cells first
        #[arg(long)]
        flat: bool,

        /// Seed for symmetry-breaking group codes
        #[arg(long)]
        seed: Option<u64>,

        /// Maximum items printed per report section
        #[arg(long, value_name = "N")]
        max_print: Option<usize>,

        /// Options file (JSON); flags override it
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Exit with error code unless the comparison meets this bar
        #[arg(long, value_enum)]
        fail_on: Option<FailOn>,
    },

    /// Show the flattened netlist of one cell
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Cell to show (defaults to the top cell)
        #[arg(long)]
        cell: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for CI/CD
    Json,
}

#[derive(Clone, ValueEnum)]
enum FailOn {
    /// Fail unless the top cell matches
    Mismatch,
    /// Also fail when the match relies on forced or guessed classes
    Unproven,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Compare {
            files,
            format,
            cell,
            check_sizes,
            no_merge,
            flat,
            seed,
            max_print,
            config,
            fail_on,
        } => load_options(config.as_deref()).and_then(|mut options| {
            options.check_sizes |= check_sizes;
            if no_merge {
                options.merge_parallel = false;
                options.merge_series = false;
            }
            if flat {
                options.hierarchical = false;
            }
            if let Some(seed) = seed {
                options.seed = seed;
            }
            if let Some(max) = max_print {
                options.max_items_to_print = max;
            }
            handle_compare(&files, cell.as_deref(), &options, format, fail_on)
        }),
        Commands::Inspect { file, cell, format } => handle_inspect(&file, cell.as_deref(), format),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(exit_code);
}

fn load_options(config: Option<&Path>) -> Result<CompareOptions> {
    match config {
        Some(path) => CompareOptions::from_json_file(path)
            .with_context(|| format!("reading options from {}", path.display())),
        None => Ok(CompareOptions::default()),
    }
}

fn handle_compare(
    files: &[PathBuf],
    cell: Option<&str>,
    options: &CompareOptions,
    format: OutputFormat,
    fail_on: Option<FailOn>,
) -> Result<i32> {
    let paths: Vec<&Path> = files.iter().map(PathBuf::as_path).collect();
    let result = NetEquivCore::compare_files(&paths, cell, options, &AbortSignal::new())
        .context("comparison failed")?;

    match format {
        OutputFormat::Human => output_human(&result, options.max_items_to_print),
        OutputFormat::Json => output_json(&result)?,
    }

    let failed = match fail_on {
        Some(FailOn::Mismatch) => !result.is_match(),
        Some(FailOn::Unproven) => !result.is_proven(),
        None => false,
    };
    Ok(if failed { 1 } else { 0 })
}

fn output_human(result: &HierarchyComparison, max_items: usize) {
    for run in &result.cells {
        if let Some(ref cmp) = run.comparison {
            print!("{}", render_human(cmp, max_items));
        } else if let Some(ref failure) = run.failure {
            println!("\nCell: {} ({})", run.cell, result.designs.join(" vs "));
            println!("{}", "─".repeat(60));
            println!("  Outcome: FAILED");
            println!("    - {}", failure);
        }
    }

    let verdict = if result.aborted {
        "ABORTED".to_string()
    } else {
        match result.top() {
            Some(top) => match top.outcome() {
                Some(outcome) => outcome.to_string(),
                None => "FAILED".to_string(),
            },
            None => "FAILED".to_string(),
        }
    };
    println!("\n{}", "═".repeat(60));
    println!(
        "Result: {} ({} cells compared{})",
        verdict,
        result.cells.len(),
        if result.is_match() && !result.is_proven() {
            ", unproven classes present"
        } else {
            ""
        }
    );
}

fn output_json(result: &HierarchyComparison) -> Result<()> {
    let output = serde_json::json!({
        "designs": result.designs,
        "cells": result.cells,
        "aborted": result.aborted,
        "summary": {
            "match": result.is_match(),
            "proven": result.is_proven(),
            "cells": result.cells.len(),
            "failures": result.failures().count(),
        }
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn handle_inspect(file: &Path, cell: Option<&str>, format: OutputFormat) -> Result<i32> {
    let design =
        load_design(file).with_context(|| format!("loading design {}", file.display()))?;
    let cell = match cell {
        Some(c) => c.to_string(),
        None => design.top_cell()?.name.clone(),
    };
    let options = CompareOptions::default();
    let mut netlist = NetEquivCore::build_flat(&design, &cell, &options)?;
    let before = netlist.stats();
    let merged = merge_devices(&mut netlist, true, true, options.size_tolerance);

    match format {
        OutputFormat::Human => {
            println!("\nDesign: {}  Cell: {}", design.name, cell);
            println!("{}", "─".repeat(60));
            println!(
                "  Parts: {}  Wires: {}  Exports: {}",
                before.parts, before.wires, before.ports
            );
            println!(
                "  After merging: {} parts ({} parallel, {} series merges)",
                netlist.stats().parts,
                merged.parallel,
                merged.series
            );
            print_netlist(&netlist);
        }
        OutputFormat::Json => {
            let parts: Vec<serde_json::Value> = netlist
                .parts()
                .map(|p| {
                    let part = netlist.part(p);
                    let pins: Vec<&str> =
                        part.pins.iter().map(|&w| netlist.wire(w).name.as_str()).collect();
                    serde_json::json!({
                        "name": part.name,
                        "type": part.type_label(),
                        "pins": pins,
                        "width": part.width,
                        "length": part.length,
                    })
                })
                .collect();
            let exports: Vec<serde_json::Value> = netlist
                .ports()
                .map(|p| {
                    let port = netlist.port(p);
                    serde_json::json!({
                        "names": port.name_list(),
                        "wire": netlist.wire(port.wire).name,
                        "characteristic": port.characteristic().to_string(),
                    })
                })
                .collect();
            let output = serde_json::json!({
                "design": design.name,
                "cell": cell,
                "stats": before,
                "merged": merged,
                "parts": parts,
                "exports": exports,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(0)
}

fn print_netlist(netlist: &Netlist) {
    println!("\n  EXPORTS:");
    for p in netlist.ports() {
        let port = netlist.port(p);
        println!(
            "    - {} ({}) on {}",
            port.name_list().join(", "),
            port.characteristic(),
            netlist.wire(port.wire).name
        );
    }
    println!("\n  PARTS:");
    for p in netlist.parts() {
        let part = netlist.part(p);
        let pins: Vec<&str> = part
            .pins
            .iter()
            .map(|&w| netlist.wire(w).name.as_str())
            .collect();
        println!(
            "    - {} {} [{}]",
            part.name,
            part.type_label(),
            pins.join(" ")
        );
    }
}
