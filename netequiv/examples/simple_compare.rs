//! Simple comparison example: compare two design libraries and print results.

use netequiv::prelude::*;
use std::path::Path;

fn main() -> Result<(), NetEquivError> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("Usage: cargo run --example simple_compare <schematic.json> <layout.json>");
        std::process::exit(1);
    }
    let paths: Vec<&Path> = args.iter().map(Path::new).collect();

    let result = NetEquivCore::compare_files(
        &paths,
        None,
        &CompareOptions::default(),
        &AbortSignal::new(),
    )?;

    for run in &result.cells {
        match (&run.comparison, &run.failure) {
            (Some(cmp), _) => {
                println!("{}: {}", run.cell, cmp.outcome);
                for issue in cmp.errors() {
                    println!("  - {}", issue.message);
                }
            }
            (None, Some(failure)) => println!("{}: not compared ({})", run.cell, failure),
            (None, None) => {}
        }
    }

    if !result.is_match() {
        println!("\nDesigns differ.");
        std::process::exit(1);
    }
    if result.is_proven() {
        println!("\nDesigns are equivalent.");
    } else {
        println!("\nDesigns match, but some classes were forced or guessed.");
    }
    Ok(())
}
