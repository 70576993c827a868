//! Integration tests for the netequiv library

use netequiv::netlist::{NetObj, PortCharacteristic};
use netequiv::prelude::*;
use netequiv::processing::merge::merge_devices;
use netequiv::{load_design, render_human, MosType, PartKind};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn compare_fixtures(a: &str, b: &str, options: &CompareOptions) -> HierarchyComparison {
    let (pa, pb) = (fixture_path(a), fixture_path(b));
    NetEquivCore::compare_files(&[pa.as_path(), pb.as_path()], None, options, &AbortSignal::new())
        .expect("comparison should run")
}

fn compare_pair(
    cell: &str,
    sch: Netlist,
    lay: Netlist,
    options: &CompareOptions,
) -> CellComparison {
    NetEquivCore::compare_netlists(cell, vec![sch, lay], options, &AbortSignal::new())
        .expect("comparison should run")
}

fn top(result: &HierarchyComparison) -> &CellComparison {
    result
        .top()
        .and_then(|run| run.comparison.as_ref())
        .expect("top cell should have been compared")
}

fn nmos() -> PartKind {
    PartKind::Mos {
        ty: MosType::Nmos,
        stack: 1,
    }
}

/// One transistor with drain, gate and source wires named as given.
fn single_transistor(design: &str, wires: [&str; 3]) -> Netlist {
    let mut n = Netlist::new(design);
    let pins = wires.iter().map(|w| n.add_wire(*w)).collect();
    n.add_part("M1", nmos(), "nch", pins, 0.0, 0.0).unwrap();
    n
}

/// Rebuilds `source` with every name replaced and objects added in reverse.
fn renamed_copy(source: &Netlist, design: &str) -> Netlist {
    let mut copy = Netlist::new(design);
    let wires: Vec<_> = source.wires().collect();
    let mut map = std::collections::HashMap::new();
    for (i, &w) in wires.iter().enumerate().rev() {
        map.insert(w, copy.add_wire(format!("net_{}", i)));
    }
    let parts: Vec<_> = source.parts().collect();
    for (i, &p) in parts.iter().enumerate().rev() {
        let part = source.part(p);
        let pins = part.pins.iter().map(|w| map[w]).collect();
        copy.add_part(
            format!("D{}", i),
            part.kind.clone(),
            part.model.clone(),
            pins,
            part.width,
            part.length,
        )
        .unwrap();
    }
    for port in source.ports() {
        let port = source.port(port);
        for name in &port.names {
            copy.add_port_name(map[&port.wire], name.clone());
        }
    }
    copy
}

#[test]
fn test_single_transistor_with_renamed_wires_matches() {
    let nets = vec![
        single_transistor("sch", ["d", "g", "s"]),
        single_transistor("lay", ["x", "gate", "y"]),
    ];
    let result = NetEquivCore::compare_netlists(
        "single",
        nets,
        &CompareOptions::default(),
        &AbortSignal::new(),
    )
    .unwrap();

    assert_eq!(result.outcome, Outcome::Match);
    assert_eq!(
        result.classes_with(Verdict::Guessed).count(),
        2,
        "symmetric diffusions can only be paired by a guess"
    );
    assert!(result.issues.iter().any(|i| i.severity == Severity::Warning));
    assert!(!result.fully_proven());
    assert_eq!(result.stats.random_matches, 1);
}

#[test]
fn test_forced_wire_match_replaces_guess() {
    let mut sch = single_transistor("sch", ["d", "g", "s"]);
    sch.force_wire_match = vec!["d".to_string()];
    let lay = single_transistor("lay", ["s", "g", "d"]);
    let result = NetEquivCore::compare_netlists(
        "single",
        vec![sch, lay],
        &CompareOptions::default(),
        &AbortSignal::new(),
    )
    .unwrap();

    assert_eq!(result.outcome, Outcome::Match);
    // d is forced; s is then matched only by elimination
    assert_eq!(result.classes_with(Verdict::Forced).count(), 2);
    assert_eq!(result.classes_with(Verdict::Guessed).count(), 0);
    assert_eq!(result.stats.forced_matches, 1);
}

#[test]
fn test_series_pair_matches_stacked_device() {
    let result = compare_fixtures(
        "nand_series.json",
        "nand_stacked.json",
        &CompareOptions::default(),
    );
    let cmp = top(&result);

    assert_eq!(cmp.outcome, Outcome::Match, "issues: {:?}", cmp.issues);
    assert_eq!(cmp.stats.series_merges, 1);
    assert_eq!(cmp.stats.netlists[0].parts, 3);
    assert!(result.is_match());
}

#[test]
fn test_series_pair_without_merging_mismatches() {
    let options = CompareOptions {
        merge_series: false,
        ..Default::default()
    };
    let result = compare_fixtures("nand_series.json", "nand_stacked.json", &options);
    assert_eq!(top(&result).outcome, Outcome::Mismatch);
}

/// Exported NAND2 whose pull-down gates sit in `order`, counted from y. The
/// pull-down is one stacked device or two single transistors.
fn nand2(design: &str, stacked: bool, order: [&str; 2]) -> Netlist {
    let mut n = Netlist::new(design);
    let [y, a, b, vdd, gnd] = ["y", "a", "b", "vdd", "gnd"].map(|w| n.add_wire(w));
    let gate = |name: &str| if name == "a" { a } else { b };
    let pmos = PartKind::Mos {
        ty: MosType::Pmos,
        stack: 1,
    };
    n.add_part("MPA", pmos.clone(), "pch", vec![y, a, vdd], 0.0, 0.0).unwrap();
    n.add_part("MPB", pmos, "pch", vec![y, b, vdd], 0.0, 0.0).unwrap();
    if stacked {
        let kind = PartKind::Mos {
            ty: MosType::Nmos,
            stack: 2,
        };
        let pins = vec![y, gate(order[0]), gate(order[1]), gnd];
        n.add_part("MN", kind, "nch", pins, 0.0, 0.0).unwrap();
    } else {
        let mid = n.add_wire("mid");
        n.add_part("MN1", nmos(), "nch", vec![y, gate(order[0]), mid], 0.0, 0.0)
            .unwrap();
        n.add_part("MN2", nmos(), "nch", vec![mid, gate(order[1]), gnd], 0.0, 0.0)
            .unwrap();
    }
    for (wire, name, characteristic) in [
        (y, "y", PortCharacteristic::Output),
        (a, "a", PortCharacteristic::Input),
        (b, "b", PortCharacteristic::Input),
        (vdd, "vdd", PortCharacteristic::Power),
        (gnd, "gnd", PortCharacteristic::Ground),
    ] {
        n.add_export(wire, name, characteristic, false);
    }
    n
}

#[test]
fn test_stacked_nand_with_swapped_gates_mismatches() {
    let options = CompareOptions::default();
    let same = compare_pair(
        "nand2",
        nand2("sch", true, ["a", "b"]),
        nand2("lay", true, ["a", "b"]),
        &options,
    );
    assert!(same.fully_proven(), "issues: {:?}", same.issues);

    let swapped = compare_pair(
        "nand2",
        nand2("sch", true, ["a", "b"]),
        nand2("lay", true, ["b", "a"]),
        &options,
    );
    assert_eq!(swapped.outcome, Outcome::Mismatch, "issues: {:?}", swapped.issues);
    assert!(!swapped.fully_proven());
}

#[test]
fn test_series_nand_with_swapped_gates_mismatches() {
    let merged = compare_pair(
        "nand2",
        nand2("sch", false, ["a", "b"]),
        nand2("lay", false, ["b", "a"]),
        &CompareOptions::default(),
    );
    assert_eq!(merged.stats.series_merges, 2);
    assert_eq!(merged.outcome, Outcome::Mismatch, "issues: {:?}", merged.issues);

    let unmerged = compare_pair(
        "nand2",
        nand2("sch", false, ["a", "b"]),
        nand2("lay", false, ["b", "a"]),
        &CompareOptions {
            merge_series: false,
            ..Default::default()
        },
    );
    assert_eq!(unmerged.outcome, Outcome::Mismatch);

    let stacked = compare_pair(
        "nand2",
        nand2("sch", false, ["a", "b"]),
        nand2("lay", true, ["a", "b"]),
        &CompareOptions::default(),
    );
    assert_eq!(stacked.outcome, Outcome::Match, "issues: {:?}", stacked.issues);
}

#[test]
fn test_missing_export_is_reported() {
    let result = compare_fixtures(
        "buffer_schematic.json",
        "buffer_layout_no_vdd.json",
        &CompareOptions::default(),
    );
    let cmp = top(&result);

    assert_ne!(cmp.outcome, Outcome::Match);
    assert!(
        cmp.errors()
            .any(|i| i.check == "export_name" && i.message.contains("vdd")),
        "expected an export_name error for vdd, got {:?}",
        cmp.issues
    );
    assert!(cmp.subcircuits.is_none());
}

#[test]
fn test_hierarchical_buffer_reuses_inverter() {
    let result = compare_fixtures(
        "buffer_schematic.json",
        "buffer_layout.json",
        &CompareOptions::default(),
    );

    assert_eq!(result.cells.len(), 2);
    assert_eq!(result.cells[0].cell, "inv");
    assert_eq!(result.cells[0].outcome(), Some(Outcome::Match));
    assert!(result.is_proven(), "top: {:?}", top(&result).issues);

    let tables = result.cells[0]
        .comparison
        .as_ref()
        .and_then(|c| c.subcircuits.as_ref())
        .expect("matched sub-cell should yield pin tables");
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0].pin_names, tables[1].pin_names);

    let parts: Vec<&String> = top(&result)
        .classes
        .iter()
        .filter(|c| c.kind == netequiv::netlist::ObjectKind::Part)
        .flat_map(|c| c.members.iter().flatten())
        .collect();
    assert_eq!(parts.len(), 4);
    assert!(parts.iter().all(|p| p.contains("subcircuit")));
}

#[test]
fn test_flat_buffer_matches() {
    let options = CompareOptions {
        hierarchical: false,
        check_sizes: true,
        ..Default::default()
    };
    let result = compare_fixtures("buffer_schematic.json", "buffer_layout.json", &options);

    assert_eq!(result.cells.len(), 1);
    assert_eq!(top(&result).stats.netlists[0].parts, 4);
    assert!(result.is_proven());
}

#[test]
fn test_imbalance_is_a_mismatch() {
    let result = compare_fixtures(
        "buffer_schematic.json",
        "buffer_layout_flat_broken.json",
        &CompareOptions::default(),
    );
    let cmp = top(&result);

    assert_eq!(cmp.outcome, Outcome::Mismatch);
    assert!(cmp.classes_with(Verdict::Mismatched).count() >= 2);
    assert!(cmp.errors().any(|i| i.check == "imbalance"));
    assert!(
        cmp.classes_with(Verdict::Mismatched)
            .any(|c| c.counts() != vec![1, 1]),
        "some mismatched class should be unbalanced"
    );
}

#[test]
fn test_bounded_report() {
    let result = compare_fixtures(
        "buffer_schematic.json",
        "buffer_layout_flat_broken.json",
        &CompareOptions::default(),
    );
    let cmp = top(&result);
    let errors = cmp.errors().count();
    assert!(errors > 2);

    let text = render_human(cmp, 2);
    assert!(text.contains(&format!("too many to print, showing first 2 of {}", errors)));
    assert!(text.contains("MISMATCH"));
}

#[test]
fn test_renamed_copy_round_trip() {
    let design = load_design(&fixture_path("buffer_schematic.json")).unwrap();
    let options = CompareOptions::default();
    let original = NetEquivCore::build_flat(&design, "buffer", &options).unwrap();
    let copy = renamed_copy(&original, "copy");

    let result = compare_pair("buffer", original, copy, &options);
    assert!(result.fully_proven(), "issues: {:?}", result.issues);
}

/// Verdict and per-design member counts of every class, sorted.
fn class_profile(cmp: &CellComparison) -> Vec<(String, Vec<usize>)> {
    let mut profile: Vec<(String, Vec<usize>)> = cmp
        .classes
        .iter()
        .map(|c| (format!("{:?} {}", c.verdict, c.kind), c.counts()))
        .collect();
    profile.sort();
    profile
}

#[test]
fn test_result_is_independent_of_object_order() {
    let options = CompareOptions::default();
    let sch = load_design(&fixture_path("buffer_schematic.json")).unwrap();
    for (file, cell) in [
        ("buffer_layout.json", "buffer"),
        ("buffer_layout_flat_broken.json", "buffer"),
    ] {
        let lay = load_design(&fixture_path(file)).unwrap();
        let build = || {
            (
                NetEquivCore::build_flat(&sch, "buffer", &options).unwrap(),
                NetEquivCore::build_flat(&lay, cell, &options).unwrap(),
            )
        };

        let (a, b) = build();
        let direct = compare_pair("buffer", a, b, &options);
        let (a, b) = build();
        let shuffled = renamed_copy(&b, "shuffled");
        let permuted = compare_pair("buffer", a, shuffled, &options);

        assert_eq!(direct.outcome, permuted.outcome, "{}", file);
        assert_eq!(class_profile(&direct), class_profile(&permuted), "{}", file);
    }
}

#[test]
fn test_result_is_deterministic() {
    let design = load_design(&fixture_path("buffer_schematic.json")).unwrap();
    let options = CompareOptions::default();
    let run = || {
        let a = NetEquivCore::build_flat(&design, "buffer", &options).unwrap();
        let b = renamed_copy(&a, "copy");
        let cmp = compare_pair("buffer", a, b, &options);
        cmp.classes
            .iter()
            .map(|c| (c.verdict, c.members.clone()))
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_three_way_comparison() {
    let nets = vec![
        single_transistor("a", ["d", "g", "s"]),
        single_transistor("b", ["d", "g", "s"]),
        single_transistor("c", ["p", "q", "r"]),
    ];
    let result = NetEquivCore::compare_netlists(
        "single",
        nets,
        &CompareOptions::default(),
        &AbortSignal::new(),
    )
    .unwrap();
    assert_eq!(result.outcome, Outcome::Match);
    assert!(result.classes.iter().all(|c| c.counts() == vec![1, 1, 1]));
}

/// Three inverters in a chain with no exports.
fn inverter_chain(design: &str, nodes: [&str; 4]) -> Netlist {
    let mut n = Netlist::new(design);
    let vdd = n.add_wire("vdd");
    let gnd = n.add_wire("gnd");
    let wires: Vec<_> = nodes.iter().map(|name| n.add_wire(*name)).collect();
    let pmos = PartKind::Mos {
        ty: MosType::Pmos,
        stack: 1,
    };
    for i in 0..3 {
        let (input, output) = (wires[i], wires[i + 1]);
        n.add_part(format!("MP{}", i), pmos.clone(), "pch", vec![output, input, vdd], 0.0, 0.0)
            .unwrap();
        n.add_part(format!("MN{}", i), nmos(), "nch", vec![output, input, gnd], 0.0, 0.0)
            .unwrap();
    }
    n
}

#[test]
fn test_contradicted_force_match_is_a_mismatch() {
    let mut sch = inverter_chain("sch", ["in", "n1", "n2", "out"]);
    sch.force_wire_match = vec!["n1".to_string()];
    // the wire named n1 in the layout sits where n2 is in the schematic
    let lay = inverter_chain("lay", ["in", "n2", "n1", "out"]);

    let result = NetEquivCore::compare_netlists(
        "chain",
        vec![sch, lay],
        &CompareOptions::default(),
        &AbortSignal::new(),
    )
    .unwrap();
    assert_eq!(result.outcome, Outcome::Mismatch, "issues: {:?}", result.issues);
    assert!(result.errors().count() > 0);
}

#[test]
fn test_abort_returns_partial_result() {
    let abort = AbortSignal::new();
    abort.abort();
    let nets = vec![
        inverter_chain("a", ["in", "n1", "n2", "out"]),
        inverter_chain("b", ["i", "x", "y", "o"]),
    ];
    let result =
        NetEquivCore::compare_netlists("chain", nets, &CompareOptions::default(), &abort).unwrap();
    assert_eq!(result.outcome, Outcome::Aborted);
    assert!(result.subcircuits.is_none());

    let (pa, pb) = (
        fixture_path("buffer_schematic.json"),
        fixture_path("buffer_layout.json"),
    );
    let hier = NetEquivCore::compare_files(
        &[pa.as_path(), pb.as_path()],
        None,
        &CompareOptions::default(),
        &abort,
    )
    .unwrap();
    assert!(hier.aborted);
    assert!(!hier.is_match());
}

#[test]
fn test_merge_is_idempotent_on_fixture() {
    let design = load_design(&fixture_path("nand_series.json")).unwrap();
    let mut netlist =
        NetEquivCore::build_flat(&design, "nand2", &CompareOptions::default()).unwrap();
    let first = merge_devices(&mut netlist, true, true, 0.01);
    assert_eq!(first.series, 1);
    let second = merge_devices(&mut netlist, true, true, 0.01);
    assert_eq!(second.total(), 0);

    let stacked = netlist
        .parts()
        .find(|&p| netlist.part(p).kind == PartKind::Mos { ty: MosType::Nmos, stack: 2 });
    assert!(stacked.is_some());
    let part = netlist.describe(NetObj::Part(stacked.unwrap()));
    assert!(part.contains("x2"));
}

#[test]
fn test_recursive_hierarchy_is_an_error() {
    let path = fixture_path("recursive.json");
    let result = NetEquivCore::compare_files(
        &[path.as_path(), path.as_path()],
        None,
        &CompareOptions::default(),
        &AbortSignal::new(),
    );
    assert!(matches!(result, Err(NetEquivError::RecursiveHierarchy { .. })));
}

#[test]
fn test_export_global_conflict_fails_cell() {
    let path = fixture_path("export_global_conflict.json");
    let result = NetEquivCore::compare_files(
        &[path.as_path(), path.as_path()],
        None,
        &CompareOptions::default(),
        &AbortSignal::new(),
    )
    .unwrap();
    let run = result.top().unwrap();
    assert!(run.comparison.is_none());
    assert!(run.failure.as_deref().unwrap_or("").contains("disagree"));
    assert!(!result.is_match());
}

#[test]
fn test_unknown_cell_is_an_error() {
    let (pa, pb) = (
        fixture_path("buffer_schematic.json"),
        fixture_path("buffer_layout.json"),
    );
    let result = NetEquivCore::compare_files(
        &[pa.as_path(), pb.as_path()],
        Some("nand2"),
        &CompareOptions::default(),
        &AbortSignal::new(),
    );
    assert!(matches!(result, Err(NetEquivError::UnknownCell { .. })));
}

#[test]
fn test_options_file() {
    let options = CompareOptions::from_json_file(&fixture_path("options.json")).unwrap();
    assert!(options.check_sizes);
    assert_eq!(options.seed, 11);
    assert_eq!(options.max_items_to_print, 5);
    assert!(options.hierarchical);
}

#[test]
fn test_design_name_defaults_to_file_stem() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("layout_v2.json");
    std::fs::write(&path, r#"{"name": "", "cells": [{"name": "empty"}]}"#).unwrap();

    let design = load_design(&path).unwrap();
    assert_eq!(design.name, "layout_v2");
    assert_eq!(design.top_cell().unwrap().name, "empty");
}

#[test]
fn test_export_characteristic_mismatch_is_a_warning() {
    let mut sch = single_transistor("sch", ["d", "g", "s"]);
    let mut lay = single_transistor("lay", ["d", "g", "s"]);
    let g0 = sch.find_wire("g").unwrap();
    let g1 = lay.find_wire("g").unwrap();
    sch.add_export(g0, "g", PortCharacteristic::Input, false);
    lay.add_export(g1, "g", PortCharacteristic::Output, false);

    let result = NetEquivCore::compare_netlists(
        "single",
        vec![sch, lay],
        &CompareOptions::default(),
        &AbortSignal::new(),
    )
    .unwrap();
    assert!(result
        .issues
        .iter()
        .any(|i| i.check == "export_characteristic" && i.severity == Severity::Warning));
    assert_eq!(result.outcome, Outcome::Match);
}
