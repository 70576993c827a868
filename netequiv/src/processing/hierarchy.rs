//! Sub-cells proven equivalent, reused as opaque parts by their parents

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How one design sees a matched cell when it is instantiated: one pin per
/// reference port, and the pin each export or global name lands on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcircuitInfo {
    pub id: usize,
    pub cell: String,
    /// Display name per pin, taken from the reference design
    pub pin_names: Vec<String>,
    pub pin_of_name: BTreeMap<String, usize>,
    pub globals: BTreeSet<String>,
}

impl SubcircuitInfo {
    pub fn port_count(&self) -> usize {
        self.pin_names.len()
    }

    pub fn pin_of(&self, name: &str) -> Option<usize> {
        self.pin_of_name.get(name).copied()
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    /// Names landing on `pin`, in name order.
    pub fn names_on_pin(&self, pin: usize) -> Vec<&str> {
        self.pin_of_name
            .iter()
            .filter(|(_, &p)| p == pin)
            .map(|(n, _)| n.as_str())
            .collect()
    }
}

/// Per-design record of the cells that have become primitives
#[derive(Debug, Clone, Default)]
pub struct HierarchyInfo {
    next_id: usize,
    infos: HashMap<(usize, String), SubcircuitInfo>,
}

impl HierarchyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves an id shared by all designs' views of one cell.
    pub fn next_subcircuit_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Records the tables for one matched cell, one entry per design.
    pub fn record(&mut self, tables: Vec<SubcircuitInfo>) {
        for (design, info) in tables.into_iter().enumerate() {
            self.infos.insert((design, info.cell.clone()), info);
        }
    }

    pub fn is_primitive(&self, design: usize, cell: &str) -> bool {
        self.infos.contains_key(&(design, cell.to_string()))
    }

    pub fn subcircuit(&self, design: usize, cell: &str) -> Option<&SubcircuitInfo> {
        self.infos.get(&(design, cell.to_string()))
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}
