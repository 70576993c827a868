//! Core comparison API shared by the CLI and library callers.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::abort::AbortSignal;
use crate::netlist::builder::NetlistBuilder;
use crate::netlist::schema::DesignDescription;
use crate::netlist::Netlist;
use crate::processing::compare_cell;
use crate::processing::hierarchy::HierarchyInfo;
use crate::report::{CellComparison, Outcome};

#[derive(Debug, thiserror::Error)]
pub enum NetEquivError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Device {device}: unsupported device kind '{kind}'")]
    UnsupportedDevice { device: String, kind: String },
    #[error("Device {device} ({kind}): expected {expected} pins, found {found}")]
    BadPinCount {
        device: String,
        kind: String,
        expected: usize,
        found: usize,
    },
    #[error("Device {device}: pin {pin} is not connected")]
    DisconnectedPin { device: String, pin: String },
    #[error("Cell {cell}: export and global '{name}' disagree on net or characteristic")]
    ExportGlobalConflict { cell: String, name: String },
    #[error("Instance {instance} of {cell}: exports declared connected are on different nets")]
    ExportAssertion { instance: String, cell: String },
    #[error("Subcircuit instance {instance}: pin {pin} is not connected")]
    SubcircuitPinDisconnected { instance: String, pin: String },
    #[error("Subcircuit instance {instance}: exports of pin {pin} connect to different nets")]
    SubcircuitPinConflict { instance: String, pin: String },
    #[error("Design {design}: unknown cell '{cell}'")]
    UnknownCell { design: String, cell: String },
    #[error("Cell {cell} has no export '{port}'")]
    UnknownPort { cell: String, port: String },
    #[error("Design {design}: recursive hierarchy at cell {cell}")]
    RecursiveHierarchy { design: String, cell: String },
    #[error("Design {design}: cannot pick a top cell among {candidates:?}")]
    AmbiguousTop {
        design: String,
        candidates: Vec<String>,
    },
    #[error("At least two designs are needed, got {0}")]
    TooFewDesigns(usize),
}

/// Options for comparison runs (CLI or library).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompareOptions {
    /// Keep transistor sizes and use them to split and report
    pub check_sizes: bool,
    /// Relative tolerance for size comparisons
    pub size_tolerance: f64,
    pub merge_parallel: bool,
    pub merge_series: bool,
    /// Compare shared sub-cells first and reuse them as subcircuits
    pub hierarchical: bool,
    /// Break residual symmetry by guessing
    pub random_match: bool,
    pub max_items_to_print: usize,
    pub rehash_stamp_capacity: usize,
    pub seed: u64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            check_sizes: false,
            size_tolerance: 0.01,
            merge_parallel: true,
            merge_series: true,
            hierarchical: true,
            random_match: true,
            max_items_to_print: 20,
            rehash_stamp_capacity: 4096,
            seed: 204,
        }
    }
}

impl CompareOptions {
    pub fn from_json_file(path: &Path) -> Result<Self, NetEquivError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Result for one cell of a hierarchical run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRun {
    pub cell: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<CellComparison>,
    /// Structural failure that stopped this cell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// True for the top cell
    pub top: bool,
}

impl CellRun {
    pub fn outcome(&self) -> Option<Outcome> {
        self.comparison.as_ref().map(|c| c.outcome)
    }
}

/// Every cell compared in one run, sub-cells first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyComparison {
    pub designs: Vec<String>,
    pub cells: Vec<CellRun>,
    pub aborted: bool,
}

impl HierarchyComparison {
    pub fn top(&self) -> Option<&CellRun> {
        self.cells.iter().find(|c| c.top)
    }

    /// True when the top cell compared as a match.
    pub fn is_match(&self) -> bool {
        !self.aborted && self.top().and_then(CellRun::outcome) == Some(Outcome::Match)
    }

    /// True when the top cell matched without forced or guessed classes.
    pub fn is_proven(&self) -> bool {
        self.is_match()
            && self
                .top()
                .and_then(|c| c.comparison.as_ref())
                .map(CellComparison::fully_proven)
                .unwrap_or(false)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CellRun> {
        self.cells.iter().filter(|c| c.failure.is_some())
    }
}

/// Load one design library from a JSON file.
pub fn load_design(path: &Path) -> Result<DesignDescription, NetEquivError> {
    DesignDescription::from_json_file(path)
}

/// Cells reachable from `top`, children before parents.
fn bottom_up_cells(design: &DesignDescription, top: &str) -> Result<Vec<String>, NetEquivError> {
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for cell in &design.cells {
        nodes.insert(cell.name.as_str(), graph.add_node(cell.name.clone()));
    }
    for cell in &design.cells {
        for inst in &cell.instances {
            let child = nodes.get(inst.cell.as_str()).ok_or_else(|| NetEquivError::UnknownCell {
                design: design.name.clone(),
                cell: inst.cell.clone(),
            })?;
            graph.update_edge(nodes[cell.name.as_str()], *child, ());
        }
    }
    let order = toposort(&graph, None).map_err(|cycle| NetEquivError::RecursiveHierarchy {
        design: design.name.clone(),
        cell: graph[cycle.node_id()].clone(),
    })?;

    let mut reachable: BTreeSet<NodeIndex> = BTreeSet::new();
    if let Some(&start) = nodes.get(top) {
        let mut dfs = petgraph::visit::Dfs::new(&graph, start);
        while let Some(n) = dfs.next(&graph) {
            reachable.insert(n);
        }
    }
    Ok(order
        .into_iter()
        .rev()
        .filter(|n| reachable.contains(n))
        .map(|n| graph[n].clone())
        .collect())
}

/// Core comparison API.
pub struct NetEquivCore;

impl NetEquivCore {
    /// Compare prebuilt netlists of one cell.
    pub fn compare_netlists(
        cell: &str,
        netlists: Vec<Netlist>,
        options: &CompareOptions,
        abort: &AbortSignal,
    ) -> Result<CellComparison, NetEquivError> {
        compare_cell(cell, netlists, options, abort)
    }

    /// Build one cell of every design against `hierarchy`.
    pub fn build_netlists(
        designs: &[DesignDescription],
        cells: &[&str],
        hierarchy: &HierarchyInfo,
        options: &CompareOptions,
    ) -> Result<Vec<Netlist>, NetEquivError> {
        designs
            .iter()
            .zip(cells)
            .enumerate()
            .map(|(i, (design, cell))| NetlistBuilder::build(design, i, cell, hierarchy, options))
            .collect()
    }

    /// Build one cell of a design fully flattened.
    pub fn build_flat(
        design: &DesignDescription,
        cell: &str,
        options: &CompareOptions,
    ) -> Result<Netlist, NetEquivError> {
        NetlistBuilder::build(design, 0, cell, &HierarchyInfo::new(), options)
    }

    /// Compare designs hierarchically: shared sub-cells bottom-up, then the
    /// top cells.
    pub fn compare_designs(
        designs: &[DesignDescription],
        options: &CompareOptions,
        abort: &AbortSignal,
    ) -> Result<HierarchyComparison, NetEquivError> {
        let tops: Vec<String> = designs
            .iter()
            .map(|d| d.top_cell().map(|c| c.name.clone()))
            .collect::<Result<_, _>>()?;
        Self::compare_cells(designs, &tops, options, abort)
    }

    /// Like [`compare_designs`](Self::compare_designs) with the top cell
    /// named explicitly (the same name in every design).
    pub fn compare_designs_at(
        designs: &[DesignDescription],
        cell: &str,
        options: &CompareOptions,
        abort: &AbortSignal,
    ) -> Result<HierarchyComparison, NetEquivError> {
        let tops = vec![cell.to_string(); designs.len()];
        Self::compare_cells(designs, &tops, options, abort)
    }

    fn compare_cells(
        designs: &[DesignDescription],
        tops: &[String],
        options: &CompareOptions,
        abort: &AbortSignal,
    ) -> Result<HierarchyComparison, NetEquivError> {
        if designs.len() < 2 {
            return Err(NetEquivError::TooFewDesigns(designs.len()));
        }
        for (design, top) in designs.iter().zip(tops) {
            design.require_cell(top)?;
        }
        let mut result = HierarchyComparison {
            designs: designs.iter().map(|d| d.name.clone()).collect(),
            cells: Vec::new(),
            aborted: false,
        };
        let mut hierarchy = HierarchyInfo::new();

        if options.hierarchical {
            for cell in bottom_up_cells(&designs[0], &tops[0])? {
                if tops.contains(&cell) {
                    continue;
                }
                if abort.is_aborted() {
                    result.aborted = true;
                    return Ok(result);
                }
                let present = designs.iter().all(|d| d.cell(&cell).is_some());
                let excluded = designs.iter().any(|d| {
                    d.cell(&cell)
                        .map(|c| c.annotations.not_subcircuit)
                        .unwrap_or(false)
                });
                if !present || excluded {
                    continue;
                }
                let names = vec![cell.as_str(); designs.len()];
                let run =
                    Self::compare_one(designs, &names, &mut hierarchy, options, abort, false);
                if run.outcome() == Some(Outcome::Aborted) {
                    result.aborted = true;
                    result.cells.push(run);
                    return Ok(result);
                }
                result.cells.push(run);
            }
        }

        let top_names: Vec<&str> = tops.iter().map(String::as_str).collect();
        let run = Self::compare_one(designs, &top_names, &mut hierarchy, options, abort, true);
        result.aborted = run.outcome() == Some(Outcome::Aborted);
        result.cells.push(run);
        Ok(result)
    }

    /// Compares one cell; structural failures are recorded, not returned.
    fn compare_one(
        designs: &[DesignDescription],
        cells: &[&str],
        hierarchy: &mut HierarchyInfo,
        options: &CompareOptions,
        abort: &AbortSignal,
        top: bool,
    ) -> CellRun {
        let name = cells[0].to_string();
        let compared = Self::build_netlists(designs, cells, hierarchy, options)
            .and_then(|netlists| compare_cell(&name, netlists, options, abort));
        match compared {
            Ok(mut comparison) => {
                if let Some(tables) = comparison.subcircuits.as_mut() {
                    let id = hierarchy.next_subcircuit_id();
                    for t in tables.iter_mut() {
                        t.id = id;
                    }
                    if !top {
                        hierarchy.record(tables.clone());
                    }
                }
                CellRun {
                    cell: name,
                    comparison: Some(comparison),
                    failure: None,
                    top,
                }
            }
            Err(e) => {
                tracing::warn!("cell {} not compared: {}", name, e);
                CellRun {
                    cell: name,
                    comparison: None,
                    failure: Some(e.to_string()),
                    top,
                }
            }
        }
    }

    /// Load design files and compare them.
    pub fn compare_files(
        paths: &[&Path],
        cell: Option<&str>,
        options: &CompareOptions,
        abort: &AbortSignal,
    ) -> Result<HierarchyComparison, NetEquivError> {
        let designs = paths
            .iter()
            .map(|p| load_design(p))
            .collect::<Result<Vec<_>, _>>()?;
        match cell {
            Some(cell) => Self::compare_designs_at(&designs, cell, options, abort),
            None => Self::compare_designs(&designs, options, abort),
        }
    }
}
