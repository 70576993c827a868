//! Partition tree
//!
//! Equivalence classes of parts and wires across N designs. Every live object
//! belongs to exactly one leaf [`EquivRecord`]; a leaf holds one [`Circuit`]
//! (member list) per design. Records are only ever split, never recombined.
//! The owner tables map each object back to its leaf so hashing can look up
//! neighbour codes in constant time.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::netlist::{NetObj, Netlist, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// Balanced and still refinable
    Active,
    /// One object per design
    Matched,
    /// Counts differ between designs; terminal
    Mismatched,
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordState::Active => write!(f, "active"),
            RecordState::Matched => write!(f, "matched"),
            RecordState::Mismatched => write!(f, "mismatched"),
        }
    }
}

/// How much a match can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Proven,
    Forced,
    Guessed,
}

/// Why a record was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitCause {
    Root,
    LocalSignature,
    HashCode,
    ExportName,
    Size,
    ForceMatch,
    RandomMatch,
}

impl fmt::Display for SplitCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SplitCause::Root => "root",
            SplitCause::LocalSignature => "local signature",
            SplitCause::HashCode => "hash code",
            SplitCause::ExportName => "export name",
            SplitCause::Size => "size",
            SplitCause::ForceMatch => "force match",
            SplitCause::RandomMatch => "random match",
        };
        write!(f, "{}", s)
    }
}

/// The members of one record coming from one design
#[derive(Debug, Clone, Default)]
pub struct Circuit {
    pub members: Vec<NetObj>,
}

impl Circuit {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct EquivRecord {
    pub kind: ObjectKind,
    pub parent: Option<RecordId>,
    pub children: Vec<RecordId>,
    /// One per design while the record is a leaf; empty once split
    pub circuits: Vec<Circuit>,
    pub state: RecordState,
    /// Random group code fed into neighbours' hash keys
    pub code: u64,
    /// Key value that selected this record's members out of its parent
    pub key: u64,
    pub cause: SplitCause,
    pub confidence: Confidence,
    pub label: Option<String>,
}

impl EquivRecord {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.is_leaf() && self.state == RecordState::Active
    }

    pub fn counts(&self) -> Vec<usize> {
        self.circuits.iter().map(Circuit::len).collect()
    }

    pub fn size(&self) -> usize {
        self.circuits.iter().map(Circuit::len).sum()
    }
}

/// State implied by member counts alone.
pub fn classify(circuits: &[Circuit]) -> RecordState {
    let first = circuits.first().map(Circuit::len).unwrap_or(0);
    if circuits.iter().any(|c| c.len() != first) {
        RecordState::Mismatched
    } else if first <= 1 {
        RecordState::Matched
    } else {
        RecordState::Active
    }
}

/// The partition tree for one comparison
#[derive(Debug)]
pub struct Partition {
    records: Vec<EquivRecord>,
    part_owner: Vec<Vec<Option<RecordId>>>,
    wire_owner: Vec<Vec<Option<RecordId>>>,
    roots: Vec<RecordId>,
    rng: StdRng,
}

impl Partition {
    /// One root record for all parts and one for all wires. Roots start
    /// active so the local pass can localize an imbalance before it becomes
    /// terminal.
    pub fn new(netlists: &[Netlist], seed: u64) -> Self {
        let mut partition = Partition {
            records: Vec::new(),
            part_owner: netlists
                .iter()
                .map(|n| vec![None; n.parts().last().map(|p| p.0 + 1).unwrap_or(0)])
                .collect(),
            wire_owner: netlists
                .iter()
                .map(|n| vec![None; n.wires().last().map(|w| w.0 + 1).unwrap_or(0)])
                .collect(),
            roots: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        };
        for kind in [ObjectKind::Part, ObjectKind::Wire] {
            let circuits: Vec<Circuit> = netlists
                .iter()
                .map(|n| Circuit {
                    members: n.objects(kind),
                })
                .collect();
            let code = partition.rng.gen();
            let id = partition.push(EquivRecord {
                kind,
                parent: None,
                children: Vec::new(),
                circuits,
                state: RecordState::Active,
                code,
                key: 0,
                cause: SplitCause::Root,
                confidence: Confidence::Proven,
                label: None,
            });
            partition.roots.push(id);
        }
        partition
    }

    fn push(&mut self, record: EquivRecord) -> RecordId {
        let id = RecordId(self.records.len());
        for (design, circuit) in record.circuits.iter().enumerate() {
            for &obj in &circuit.members {
                self.set_owner(design, obj, id);
            }
        }
        self.records.push(record);
        id
    }

    fn set_owner(&mut self, design: usize, obj: NetObj, id: RecordId) {
        match obj {
            NetObj::Part(p) => self.part_owner[design][p.0] = Some(id),
            NetObj::Wire(w) => self.wire_owner[design][w.0] = Some(id),
        }
    }

    pub fn design_count(&self) -> usize {
        self.part_owner.len()
    }

    pub fn roots(&self) -> &[RecordId] {
        &self.roots
    }

    pub fn record(&self, id: RecordId) -> &EquivRecord {
        &self.records[id.0]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Leaf record currently owning `obj` of design `design`.
    pub fn owner(&self, design: usize, obj: NetObj) -> Option<RecordId> {
        match obj {
            NetObj::Part(p) => self.part_owner[design].get(p.0).copied().flatten(),
            NetObj::Wire(w) => self.wire_owner[design].get(w.0).copied().flatten(),
        }
    }

    /// Group code of the record owning `obj`, zero for unowned objects.
    pub fn code_of(&self, design: usize, obj: NetObj) -> u64 {
        self.owner(design, obj)
            .map(|r| self.records[r.0].code)
            .unwrap_or(0)
    }

    pub fn leaves(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_leaf())
            .map(|(i, _)| RecordId(i))
    }

    pub fn active_leaves(&self) -> Vec<RecordId> {
        self.leaves()
            .filter(|&r| self.records[r.0].state == RecordState::Active)
            .collect()
    }

    pub fn has_active(&self) -> bool {
        self.records.iter().any(|r| r.is_active())
    }

    /// Regroups the leaf `id` by `keys[design][member]`. Children are created
    /// in ascending key order; a key with unequal counts across designs gives
    /// a mismatched child, and every child of a mismatched record stays
    /// mismatched. Returns the newborn leaves, or nothing when all members
    /// share one key.
    pub fn split(
        &mut self,
        id: RecordId,
        keys: &[Vec<u64>],
        cause: SplitCause,
        labels: Option<&BTreeMap<u64, String>>,
    ) -> Vec<RecordId> {
        let record = &self.records[id.0];
        if !record.is_leaf() || record.state == RecordState::Matched {
            return Vec::new();
        }
        let designs = record.circuits.len();
        let mut groups: BTreeMap<u64, Vec<Circuit>> = BTreeMap::new();
        for (design, circuit) in record.circuits.iter().enumerate() {
            for (i, &obj) in circuit.members.iter().enumerate() {
                let key = keys[design][i];
                groups
                    .entry(key)
                    .or_insert_with(|| vec![Circuit::default(); designs])[design]
                    .members
                    .push(obj);
            }
        }
        if groups.len() <= 1 {
            return Vec::new();
        }

        let parent_state = record.state;
        let kind = record.kind;
        let confidence = record.confidence;
        let mut born = Vec::with_capacity(groups.len());
        for (key, circuits) in groups {
            let state = if parent_state == RecordState::Mismatched {
                RecordState::Mismatched
            } else {
                classify(&circuits)
            };
            let code = self.rng.gen();
            let child = self.push(EquivRecord {
                kind,
                parent: Some(id),
                children: Vec::new(),
                circuits,
                state,
                code,
                key,
                cause,
                confidence,
                label: labels.and_then(|l| l.get(&key).cloned()),
            });
            born.push(child);
        }
        let record = &mut self.records[id.0];
        record.children = born.clone();
        record.circuits.clear();
        born
    }

    /// Recomputes the state of a leaf from its counts, keeping mismatched
    /// terminal.
    pub fn reclassify(&mut self, id: RecordId) {
        let record = &mut self.records[id.0];
        if record.is_leaf() && record.state != RecordState::Mismatched {
            record.state = classify(&record.circuits);
        }
    }

    pub fn mark_mismatched(&mut self, id: RecordId) {
        self.records[id.0].state = RecordState::Mismatched;
    }

    pub fn set_confidence(&mut self, id: RecordId, confidence: Confidence) {
        self.records[id.0].confidence = confidence;
    }

    pub fn set_label(&mut self, id: RecordId, label: impl Into<String>) {
        self.records[id.0].label = Some(label.into());
    }

    /// Number of leaves per state: (active, matched, mismatched)
    pub fn census(&self) -> (usize, usize, usize) {
        self.leaves().fold((0, 0, 0), |(a, m, x), r| {
            match self.records[r.0].state {
                RecordState::Active => (a + 1, m, x),
                RecordState::Matched => (a, m + 1, x),
                RecordState::Mismatched => (a, m, x + 1),
            }
        })
    }
}
