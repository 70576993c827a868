//! Partitioning passes beyond hash propagation
//!
//! The local-signature pass seeds the tree. When hashing stalls, the engine
//! escalates: forced matches from annotations, export names, device sizes
//! and finally random symmetry breaking. Every match, injected or proven, is
//! re-checked against topology once refinement is over.

use std::collections::{BTreeMap, BTreeSet};

use super::propagate::{Fixpoint, Refiner};
use super::signature::{signature, text_key};
use crate::netlist::{sizes_match, NetObj, ObjectKind, PartKind};
use crate::partition::{Confidence, RecordId, RecordState, SplitCause};
use crate::report::{Issue, IssueLog};

/// Splits both roots by local signature and queues every resulting leaf.
pub fn local_pass(refiner: &mut Refiner) {
    let netlists = refiner.netlists();
    let roots = refiner.partition().roots().to_vec();
    for root in roots {
        let mut labels = BTreeMap::new();
        let keys: Vec<Vec<u64>> = refiner
            .partition()
            .record(root)
            .circuits
            .iter()
            .enumerate()
            .map(|(d, c)| {
                c.members
                    .iter()
                    .map(|&obj| {
                        let (key, text) = signature(&netlists[d], obj);
                        labels.insert(key, text);
                        key
                    })
                    .collect()
            })
            .collect();
        let born = refiner.split(root, &keys, SplitCause::LocalSignature, Some(&labels));
        if born.is_empty() {
            if let Some(text) = labels.into_values().next() {
                refiner.partition_mut().set_label(root, text);
            }
            refiner.partition_mut().reclassify(root);
            refiner.enqueue(&[root]);
        }
    }
    let (active, matched, mismatched) = refiner.partition().census();
    tracing::debug!(
        "local pass: {} active, {} matched, {} mismatched",
        active,
        matched,
        mismatched
    );
}

/// Pulls the named object of every design into a record of its own.
fn isolate(
    refiner: &mut Refiner,
    name: &str,
    found: Vec<Option<NetObj>>,
    log: &mut IssueLog,
) -> bool {
    let designs: Vec<String> = refiner.netlists().iter().map(|n| n.name.clone()).collect();
    let mut objs = Vec::with_capacity(found.len());
    for (d, obj) in found.into_iter().enumerate() {
        match obj {
            Some(o) => objs.push(o),
            None => {
                log.push(Issue::warning(
                    "force_match",
                    format!("Force-match name {} not found in {}", name, designs[d]),
                ));
                return false;
            }
        }
    }

    let owners: BTreeSet<Option<RecordId>> = objs
        .iter()
        .enumerate()
        .map(|(d, &o)| refiner.partition().owner(d, o))
        .collect();
    let owner = match owners.into_iter().collect::<Vec<_>>().as_slice() {
        [Some(r)] => *r,
        _ => {
            log.push(
                Issue::error(
                    "force_match",
                    format!("Forced name {} found in non-equivalent classes", name),
                )
                .with_object(name),
            );
            return false;
        }
    };

    let state = refiner.partition().record(owner).state;
    match state {
        RecordState::Matched => {
            refiner
                .partition_mut()
                .set_confidence(owner, Confidence::Forced);
            true
        }
        RecordState::Mismatched => false,
        RecordState::Active => {
            let keys: Vec<Vec<u64>> = refiner
                .partition()
                .record(owner)
                .circuits
                .iter()
                .zip(&objs)
                .map(|(c, o)| c.members.iter().map(|m| u64::from(m == o)).collect())
                .collect();
            let born = refiner.split(owner, &keys, SplitCause::ForceMatch, None);
            mark_injected(refiner, &born, Confidence::Forced);
            if let Some(&chosen) = born.iter().find(|&&r| refiner.partition().record(r).key == 1) {
                refiner
                    .partition_mut()
                    .set_label(chosen, format!("forced {}", name));
            }
            true
        }
    }
}

/// Marks the chosen child of a forced or guessed split, and a sibling left
/// with one member per design, which is then matched only by elimination.
fn mark_injected(refiner: &mut Refiner, born: &[RecordId], confidence: Confidence) {
    for &id in born {
        let record = refiner.partition().record(id);
        if record.key == 1 || record.state == RecordState::Matched {
            refiner.partition_mut().set_confidence(id, confidence);
        }
    }
}

/// Applies `force_wire_match` and `force_part_match` annotations of every
/// design. Returns the number of objects forced.
pub fn force_match_pass(refiner: &mut Refiner, log: &mut IssueLog) -> usize {
    let netlists = refiner.netlists();
    let wires: BTreeSet<&str> = netlists
        .iter()
        .flat_map(|n| n.force_wire_match.iter().map(String::as_str))
        .collect();
    let parts: BTreeSet<&str> = netlists
        .iter()
        .flat_map(|n| n.force_part_match.iter().map(String::as_str))
        .collect();

    let mut forced = 0;
    for name in wires {
        let found = netlists
            .iter()
            .map(|n| n.find_wire(name).map(NetObj::Wire))
            .collect();
        if isolate(refiner, name, found, log) {
            forced += 1;
        }
    }
    for name in parts {
        let found = netlists
            .iter()
            .map(|n| n.find_part(name).map(NetObj::Part))
            .collect();
        if isolate(refiner, name, found, log) {
            forced += 1;
        }
    }
    if forced > 0 {
        tracing::debug!("forced {} matches", forced);
    }
    forced
}

/// Splits active wire records by the smallest export name that every design
/// of the record carries. Returns the number of records split.
pub fn export_name_pass(refiner: &mut Refiner) -> usize {
    let netlists = refiner.netlists();
    let mut split = 0;
    for id in refiner.partition().active_leaves() {
        let record = refiner.partition().record(id);
        if record.kind != ObjectKind::Wire {
            continue;
        }

        let names_of = |d: usize, obj: NetObj| -> Vec<&str> {
            match obj {
                NetObj::Wire(w) => netlists[d]
                    .wire(w)
                    .port()
                    .map(|p| {
                        netlists[d]
                            .port(p)
                            .names
                            .iter()
                            .filter(|n| !n.to_be_renamed)
                            .map(|n| n.name.as_str())
                            .collect()
                    })
                    .unwrap_or_default(),
                NetObj::Part(_) => Vec::new(),
            }
        };
        let per_design: Vec<BTreeSet<&str>> = record
            .circuits
            .iter()
            .enumerate()
            .map(|(d, c)| c.members.iter().flat_map(|&o| names_of(d, o)).collect())
            .collect();
        let mut common = per_design[0].clone();
        for names in &per_design[1..] {
            common.retain(|n| names.contains(n));
        }
        if common.is_empty() {
            continue;
        }

        let mut labels = BTreeMap::new();
        let keys: Vec<Vec<u64>> = record
            .circuits
            .iter()
            .enumerate()
            .map(|(d, c)| {
                c.members
                    .iter()
                    .map(|&o| {
                        match names_of(d, o).into_iter().filter(|n| common.contains(n)).min() {
                            Some(name) => {
                                let key = text_key(name);
                                labels.insert(key, format!("export {}", name));
                                key
                            }
                            None => 0,
                        }
                    })
                    .collect()
            })
            .collect();
        if !refiner
            .split(id, &keys, SplitCause::ExportName, Some(&labels))
            .is_empty()
        {
            split += 1;
        }
    }
    split
}

/// Cluster index per value: sorted values start a new cluster once they no
/// longer match the cluster's first value within `tolerance`.
fn size_clusters(values: &[f64], tolerance: f64) -> Vec<(f64, usize)> {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut clusters: Vec<(f64, usize)> = Vec::new();
    for v in sorted {
        match clusters.last() {
            Some(&(start, _)) if sizes_match(start, v, tolerance) => {}
            _ => clusters.push((v, clusters.len())),
        }
    }
    clusters
}

fn cluster_of(clusters: &[(f64, usize)], v: f64, tolerance: f64) -> usize {
    clusters
        .iter()
        .rev()
        .find(|(start, _)| *start <= v || sizes_match(*start, v, tolerance))
        .map(|&(_, i)| i)
        .unwrap_or(0)
}

/// Splits active part records by (width, length) within `tolerance`.
pub fn size_pass(refiner: &mut Refiner, tolerance: f64) -> usize {
    let netlists = refiner.netlists();
    let mut split = 0;
    for id in refiner.partition().active_leaves() {
        let record = refiner.partition().record(id);
        if record.kind != ObjectKind::Part {
            continue;
        }
        let sizes: Vec<Vec<(f64, f64)>> = record
            .circuits
            .iter()
            .enumerate()
            .map(|(d, c)| {
                c.members
                    .iter()
                    .map(|&o| match o {
                        NetObj::Part(p) => {
                            let part = netlists[d].part(p);
                            match part.kind {
                                PartKind::Subcircuit { .. } => (0.0, 0.0),
                                _ => (part.width, part.length),
                            }
                        }
                        NetObj::Wire(_) => (0.0, 0.0),
                    })
                    .collect()
            })
            .collect();
        let all: Vec<(f64, f64)> = sizes.iter().flatten().copied().collect();
        if all.iter().all(|&(w, l)| w == 0.0 && l == 0.0) {
            continue;
        }
        let widths: Vec<f64> = all.iter().map(|s| s.0).collect();
        let lengths: Vec<f64> = all.iter().map(|s| s.1).collect();
        let wc = size_clusters(&widths, tolerance);
        let lc = size_clusters(&lengths, tolerance);

        let mut labels = BTreeMap::new();
        let keys: Vec<Vec<u64>> = sizes
            .iter()
            .map(|design| {
                design
                    .iter()
                    .map(|&(w, l)| {
                        let wi = cluster_of(&wc, w, tolerance);
                        let li = cluster_of(&lc, l, tolerance);
                        let key = ((wi as u64) << 32) | li as u64;
                        labels.insert(key, format!("W={} L={}", wc[wi].0, lc[li].0));
                        key
                    })
                    .collect()
            })
            .collect();
        if !refiner.split(id, &keys, SplitCause::Size, Some(&labels)).is_empty() {
            split += 1;
        }
    }
    split
}

/// Result of random symmetry breaking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomOutcome {
    pub guesses: usize,
    pub aborted: bool,
}

/// Repeatedly takes the smallest active record, matches its first member
/// of every design at once and propagates the consequences.
pub fn random_match_pass(refiner: &mut Refiner, log: &mut IssueLog) -> RandomOutcome {
    let mut guesses = 0;
    loop {
        if refiner.is_aborted() {
            return RandomOutcome {
                guesses,
                aborted: true,
            };
        }
        let smallest = refiner
            .partition()
            .active_leaves()
            .into_iter()
            .min_by_key(|&r| (refiner.partition().record(r).size(), r));
        let Some(id) = smallest else {
            break;
        };

        let record = refiner.partition().record(id);
        let kind = record.kind;
        let keys: Vec<Vec<u64>> = record
            .circuits
            .iter()
            .map(|c| (0..c.len()).map(|i| u64::from(i == 0)).collect())
            .collect();
        let picked: Vec<String> = record
            .circuits
            .iter()
            .enumerate()
            .map(|(d, c)| refiner.netlists()[d].describe(c.members[0]))
            .collect();

        let born = refiner.split(id, &keys, SplitCause::RandomMatch, None);
        mark_injected(refiner, &born, Confidence::Guessed);
        guesses += 1;
        log.push(
            Issue::warning(
                "random_match",
                format!(
                    "Symmetric {}s matched by guess: {}",
                    kind,
                    picked.join(" <-> ")
                ),
            )
            .with_object(picked[0].clone()),
        );

        if refiner.propagate() == Fixpoint::Aborted {
            return RandomOutcome {
                guesses,
                aborted: true,
            };
        }
    }
    RandomOutcome {
        guesses,
        aborted: false,
    }
}

/// Re-keys every matched leaf against the final group codes; members whose
/// keys disagree are marked mismatched. A record matched on counts alone is
/// never rehashed during refinement, so this is where a wrong pin order
/// around it shows up. Returns the number of contradicted records.
pub fn verify_matches(refiner: &mut Refiner, log: &mut IssueLog) -> usize {
    let suspects: Vec<RecordId> = refiner
        .partition()
        .leaves()
        .filter(|&r| refiner.partition().record(r).state == RecordState::Matched)
        .collect();

    let mut contradicted = 0;
    for id in suspects {
        let keys = refiner.member_keys(id);
        let first = keys.first().and_then(|k| k.first()).copied();
        if keys.iter().all(|k| k.first().copied() == first) {
            continue;
        }
        let record = refiner.partition().record(id);
        let (check, how) = match record.confidence {
            Confidence::Forced => ("force_match", "forced match"),
            Confidence::Guessed => ("force_match", "guessed match"),
            Confidence::Proven => ("topology", "match"),
        };
        let members: Vec<String> = record
            .circuits
            .iter()
            .enumerate()
            .flat_map(|(d, c)| {
                c.members
                    .iter()
                    .map(move |&o| (d, o))
                    .collect::<Vec<_>>()
            })
            .map(|(d, o)| refiner.netlists()[d].describe(o))
            .collect();
        log.push(
            Issue::error(
                check,
                format!(
                    "{} of {} {} is contradicted by topology",
                    how,
                    record.kind,
                    members.join(" <-> ")
                ),
            )
            .with_object(members.first().cloned().unwrap_or_default()),
        );
        refiner.partition_mut().mark_mismatched(id);
        contradicted += 1;
    }
    contradicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abort::AbortSignal;
    use crate::netlist::{MosType, Netlist, PortCharacteristic};
    use crate::partition::Partition;

    fn mos(ty: MosType, stack: usize) -> PartKind {
        PartKind::Mos { ty, stack }
    }

    /// NAND2 pull-down stack with gates `first` then `second` counted from y.
    fn pull_down(design: &str, first: &str, second: &str) -> Netlist {
        let mut n = Netlist::new(design);
        let [y, a, b, gnd] = ["y", "a", "b", "gnd"].map(|w| n.add_wire(w));
        let gate = |name: &str| if name == "a" { a } else { b };
        let pins = vec![y, gate(first), gate(second), gnd];
        n.add_part("N1", mos(MosType::Nmos, 2), "nch", pins, 0.0, 0.0)
            .unwrap();
        for (wire, name) in [(y, "y"), (a, "a"), (b, "b"), (gnd, "gnd")] {
            n.add_export(wire, name, PortCharacteristic::Unknown, false);
        }
        n
    }

    #[test]
    fn test_verify_rejects_swapped_stack_gates() {
        let nets = vec![pull_down("sch", "a", "b"), pull_down("lay", "b", "a")];
        let mut r = Refiner::new(&nets, Partition::new(&nets, 204), 64, AbortSignal::new());
        let mut log = IssueLog::new();
        local_pass(&mut r);
        // names pair every wire before any rehash sees the stack
        assert!(export_name_pass(&mut r) > 0);
        assert!(!r.partition().has_active());

        assert!(verify_matches(&mut r, &mut log) > 0);
        assert!(log.issues().iter().any(|i| i.check == "topology"));
    }

    #[test]
    fn test_verify_accepts_reversed_stack() {
        let mut lay = Netlist::new("lay");
        let [y, a, b, gnd] = ["y", "a", "b", "gnd"].map(|w| lay.add_wire(w));
        lay.add_part("N1", mos(MosType::Nmos, 2), "nch", vec![gnd, b, a, y], 0.0, 0.0)
            .unwrap();
        for (wire, name) in [(y, "y"), (a, "a"), (b, "b"), (gnd, "gnd")] {
            lay.add_export(wire, name, PortCharacteristic::Unknown, false);
        }
        let nets = vec![pull_down("sch", "a", "b"), lay];
        let mut r = Refiner::new(&nets, Partition::new(&nets, 204), 64, AbortSignal::new());
        let mut log = IssueLog::new();
        local_pass(&mut r);
        export_name_pass(&mut r);

        assert_eq!(verify_matches(&mut r, &mut log), 0);
        assert!(!log.has_errors());
    }

    fn transistor(design: &str) -> Netlist {
        let mut n = Netlist::new(design);
        let pins = ["d", "g", "s"].iter().map(|w| n.add_wire(*w)).collect();
        n.add_part("M1", mos(MosType::Nmos, 1), "nch", pins, 0.0, 0.0)
            .unwrap();
        n
    }

    #[test]
    fn test_guess_marks_the_eliminated_sibling() {
        let nets = vec![transistor("a"), transistor("b")];
        let mut r = Refiner::new(&nets, Partition::new(&nets, 204), 64, AbortSignal::new());
        let mut log = IssueLog::new();
        local_pass(&mut r);
        assert_eq!(r.propagate(), Fixpoint::Converged);
        assert!(r.partition().has_active());

        let outcome = random_match_pass(&mut r, &mut log);
        assert_eq!(outcome.guesses, 1);
        assert_eq!(verify_matches(&mut r, &mut log), 0);

        let guessed: Vec<RecordId> = r
            .partition()
            .leaves()
            .filter(|&l| r.partition().record(l).cause == SplitCause::RandomMatch)
            .collect();
        assert_eq!(guessed.len(), 2);
        for id in guessed {
            let record = r.partition().record(id);
            assert_eq!(record.state, RecordState::Matched);
            assert_eq!(record.confidence, Confidence::Guessed, "key {}", record.key);
        }
    }

    #[test]
    fn test_forced_match_marks_the_eliminated_sibling() {
        let mut sch = transistor("sch");
        sch.force_wire_match = vec!["d".to_string()];
        let nets = vec![sch, transistor("lay")];
        let mut r = Refiner::new(&nets, Partition::new(&nets, 204), 64, AbortSignal::new());
        let mut log = IssueLog::new();
        local_pass(&mut r);
        assert_eq!(force_match_pass(&mut r, &mut log), 1);

        let forced = r
            .partition()
            .leaves()
            .filter(|&l| r.partition().record(l).confidence == Confidence::Forced)
            .count();
        assert_eq!(forced, 2);
    }

    #[test]
    fn test_leaves_never_span_local_signatures() {
        let mut sch = pull_down("sch", "a", "b");
        let mut lay = pull_down("lay", "a", "b");
        let vdd = sch.add_wire("vdd");
        let y = sch.find_wire("y").unwrap();
        let a = sch.find_wire("a").unwrap();
        sch.add_part("MP", mos(MosType::Pmos, 1), "pch", vec![y, a, vdd], 0.0, 0.0)
            .unwrap();
        // same position, wrong channel type
        let vdd = lay.add_wire("vdd");
        let y = lay.find_wire("y").unwrap();
        let a = lay.find_wire("a").unwrap();
        lay.add_part("MP", mos(MosType::Nmos, 1), "nch", vec![y, a, vdd], 0.0, 0.0)
            .unwrap();
        let nets = vec![sch, lay];

        let mut r = Refiner::new(&nets, Partition::new(&nets, 204), 64, AbortSignal::new());
        let mut log = IssueLog::new();
        local_pass(&mut r);
        r.propagate();
        export_name_pass(&mut r);
        r.propagate();
        random_match_pass(&mut r, &mut log);
        verify_matches(&mut r, &mut log);

        let netlists = r.netlists();
        let p = r.partition();
        assert!(p.census().2 > 0, "the channel type difference must show");
        for leaf in p.leaves() {
            let record = p.record(leaf);
            let signatures: BTreeSet<u64> = record
                .circuits
                .iter()
                .enumerate()
                .flat_map(|(d, c)| {
                    c.members
                        .iter()
                        .map(move |&o| signature(&netlists[d], o).0)
                })
                .collect();
            assert!(signatures.len() <= 1, "leaf {:?} spans signatures", leaf);

            let mut cursor = Some(leaf);
            let mut local = false;
            while let Some(id) = cursor {
                local |= p.record(id).cause == SplitCause::LocalSignature;
                cursor = p.record(id).parent;
            }
            assert!(local, "leaf {:?} does not descend from a local split", leaf);
        }
    }

    #[test]
    fn test_size_clusters() {
        let clusters = size_clusters(&[1.0, 2.0, 1.005, 2.01], 0.01);
        assert_eq!(clusters.len(), 2);
        assert_eq!(cluster_of(&clusters, 1.005, 0.01), 0);
        assert_eq!(cluster_of(&clusters, 2.01, 0.01), 1);
    }
}
