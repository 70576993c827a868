//! Comparison engine
//!
//! One call of [`compare_cell`] runs the whole pipeline for one cell:
//! device merging, export name matching, local signatures, forced matches,
//! hash propagation, escalation, verification and reporting.

pub mod escalate;
pub mod export_checker;
pub mod hash;
pub mod hierarchy;
pub mod merge;
pub mod propagate;
pub mod signature;

use chrono::Utc;

use crate::abort::AbortSignal;
use crate::core::{CompareOptions, NetEquivError};
use crate::netlist::Netlist;
use crate::partition::{Confidence, Partition, RecordState};
use crate::report::{
    CellComparison, ComparisonStats, EquivClass, Issue, IssueLog, Outcome, Verdict,
};
use export_checker::ExportChecker;
use propagate::{Fixpoint, Refiner};

/// Compares one cell across `netlists` (at least two).
pub fn compare_cell(
    cell: &str,
    mut netlists: Vec<Netlist>,
    options: &CompareOptions,
    abort: &AbortSignal,
) -> Result<CellComparison, NetEquivError> {
    if netlists.len() < 2 {
        return Err(NetEquivError::TooFewDesigns(netlists.len()));
    }
    tracing::info!("comparing cell {} across {} designs", cell, netlists.len());

    let mut stats = ComparisonStats::default();
    for n in netlists.iter_mut() {
        let merged = merge::merge_devices(
            n,
            options.merge_parallel,
            options.merge_series,
            options.size_tolerance,
        );
        stats.parallel_merges += merged.parallel;
        stats.series_merges += merged.series;
    }
    stats.netlists = netlists.iter().map(Netlist::stats).collect();

    let mut log = IssueLog::new();
    let checker = ExportChecker::new(&netlists);
    let names = checker.match_by_name(&mut log);

    let partition = Partition::new(&netlists, options.seed);
    let mut refiner = Refiner::new(
        &netlists,
        partition,
        options.rehash_stamp_capacity,
        abort.clone(),
    );

    let aborted = run_passes(&mut refiner, options, &mut log, &mut stats);
    if !aborted {
        escalate::verify_matches(&mut refiner, &mut log);
    }

    stats.rehashes = refiner.stats.rehashes;
    stats.worklist_pops = refiner.stats.worklist_pops;
    let partition = refiner.into_partition();
    stats.records = partition.len();

    let mut suggestions = Vec::new();
    if !aborted {
        checker.check_equivalent(&partition, &names, &mut log);
        suggestions = checker.suggest(&partition, &names);
    }

    let classes = collect_classes(&partition, &netlists);
    for class in &classes {
        match class.verdict {
            Verdict::Mismatched => {
                stats.mismatched += 1;
                log.push(
                    Issue::error(
                        "imbalance",
                        format!(
                            "Mismatched {} class [{}]: counts {:?}",
                            class.kind,
                            class.label.as_deref().unwrap_or("-"),
                            class.counts()
                        ),
                    )
                    .with_object(
                        class
                            .members
                            .iter()
                            .flatten()
                            .next()
                            .cloned()
                            .unwrap_or_default(),
                    ),
                );
            }
            Verdict::Unresolved => stats.unresolved += 1,
            _ => stats.matched += 1,
        }
    }

    let outcome = if aborted {
        Outcome::Aborted
    } else if log.has_errors() {
        Outcome::Mismatch
    } else if stats.unresolved > 0 {
        Outcome::Unresolved
    } else {
        Outcome::Match
    };
    let subcircuits = if outcome == Outcome::Match {
        Some(checker.subcircuit_tables(&partition, cell))
    } else {
        None
    };

    tracing::info!(
        "cell {}: {} ({} matched, {} mismatched, {} unresolved classes)",
        cell,
        outcome,
        stats.matched,
        stats.mismatched,
        stats.unresolved
    );

    Ok(CellComparison {
        cell: cell.to_string(),
        designs: netlists.iter().map(|n| n.name.clone()).collect(),
        outcome,
        issues: log.into_issues(),
        classes,
        stats,
        export_suggestions: suggestions,
        subcircuits,
        finished_at: Utc::now(),
    })
}

/// Local pass, forced matches and the escalation ladder, each followed by
/// propagation. Returns true when aborted.
fn run_passes(
    refiner: &mut Refiner,
    options: &CompareOptions,
    log: &mut IssueLog,
    stats: &mut ComparisonStats,
) -> bool {
    escalate::local_pass(refiner);
    stats.forced_matches = escalate::force_match_pass(refiner, log);
    if refiner.propagate() == Fixpoint::Aborted {
        return true;
    }

    if refiner.partition().has_active() {
        let split = escalate::export_name_pass(refiner);
        tracing::debug!("export names split {} records", split);
        if refiner.propagate() == Fixpoint::Aborted {
            return true;
        }
    }

    if options.check_sizes && refiner.partition().has_active() {
        if refiner.is_aborted() {
            return true;
        }
        let split = escalate::size_pass(refiner, options.size_tolerance);
        tracing::debug!("sizes split {} records", split);
        if refiner.propagate() == Fixpoint::Aborted {
            return true;
        }
    }

    if options.random_match && refiner.partition().has_active() {
        let random = escalate::random_match_pass(refiner, log);
        stats.random_matches = random.guesses;
        if random.aborted {
            return true;
        }
    }
    false
}

fn collect_classes(partition: &Partition, netlists: &[Netlist]) -> Vec<EquivClass> {
    partition
        .leaves()
        .map(|id| partition.record(id))
        .filter(|r| r.size() > 0)
        .map(|r| {
            let verdict = match (r.state, r.confidence) {
                (RecordState::Mismatched, _) => Verdict::Mismatched,
                (RecordState::Active, _) => Verdict::Unresolved,
                (RecordState::Matched, Confidence::Proven) => Verdict::Matched,
                (RecordState::Matched, Confidence::Forced) => Verdict::Forced,
                (RecordState::Matched, Confidence::Guessed) => Verdict::Guessed,
            };
            EquivClass {
                kind: r.kind,
                verdict,
                cause: r.cause,
                label: r.label.clone(),
                members: r
                    .circuits
                    .iter()
                    .enumerate()
                    .map(|(d, c)| c.members.iter().map(|&o| netlists[d].describe(o)).collect())
                    .collect(),
            }
        })
        .collect()
}
