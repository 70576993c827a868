//! Incremental propagation
//!
//! Newborn records go on a worklist stamped with their birthday. Popping a
//! record rehashes every active neighbour record that has not been rehashed
//! since that birthday; whatever splits off is pushed in turn. The loop ends
//! at a fixed point or when the abort flag is raised.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use super::hash;
use crate::abort::AbortSignal;
use crate::netlist::{NetObj, Netlist};
use crate::partition::{Partition, RecordId, RecordState, SplitCause};

/// How a propagation run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixpoint {
    Converged,
    Aborted,
}

/// Three FIFO queues popped in the order matched, active, mismatched
#[derive(Debug, Default)]
struct Worklist {
    matched: VecDeque<(RecordId, u64)>,
    active: VecDeque<(RecordId, u64)>,
    mismatched: VecDeque<(RecordId, u64)>,
}

impl Worklist {
    fn push(&mut self, id: RecordId, birthday: u64, state: RecordState) {
        match state {
            RecordState::Matched => self.matched.push_back((id, birthday)),
            RecordState::Active => self.active.push_back((id, birthday)),
            RecordState::Mismatched => self.mismatched.push_back((id, birthday)),
        }
    }

    fn pop(&mut self) -> Option<(RecordId, u64)> {
        self.matched
            .pop_front()
            .or_else(|| self.active.pop_front())
            .or_else(|| self.mismatched.pop_front())
    }

    fn len(&self) -> usize {
        self.matched.len() + self.active.len() + self.mismatched.len()
    }
}

/// Last rehash time per record. Bounded: once over capacity the map is
/// cleared, which only costs redundant rehashes.
#[derive(Debug)]
pub struct RehashStamps {
    stamps: HashMap<RecordId, u64>,
    capacity: usize,
    clears: usize,
}

impl RehashStamps {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: HashMap::new(),
            capacity: capacity.max(1),
            clears: 0,
        }
    }

    pub fn rehashed_since(&self, id: RecordId, time: u64) -> bool {
        self.stamps.get(&id).map(|&t| t > time).unwrap_or(false)
    }

    pub fn stamp(&mut self, id: RecordId, time: u64) {
        if self.stamps.len() >= self.capacity && !self.stamps.contains_key(&id) {
            self.stamps.clear();
            self.clears += 1;
        }
        self.stamps.insert(id, time);
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn clears(&self) -> usize {
        self.clears
    }
}

#[derive(Debug, Clone, Default)]
pub struct RefineStats {
    pub rehashes: usize,
    pub worklist_pops: usize,
    pub records_created: usize,
}

/// Owns the partition while it is refined against the netlists.
pub struct Refiner<'a> {
    netlists: &'a [Netlist],
    partition: Partition,
    worklist: Worklist,
    stamps: RehashStamps,
    clock: u64,
    abort: AbortSignal,
    pub stats: RefineStats,
}

impl<'a> Refiner<'a> {
    pub fn new(
        netlists: &'a [Netlist],
        partition: Partition,
        stamp_capacity: usize,
        abort: AbortSignal,
    ) -> Self {
        Self {
            netlists,
            partition,
            worklist: Worklist::default(),
            stamps: RehashStamps::new(stamp_capacity),
            clock: 0,
            abort,
            stats: RefineStats::default(),
        }
    }

    pub fn netlists(&self) -> &'a [Netlist] {
        self.netlists
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn partition_mut(&mut self) -> &mut Partition {
        &mut self.partition
    }

    pub fn into_partition(self) -> Partition {
        self.partition
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn pending(&self) -> usize {
        self.worklist.len()
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Puts records on the worklist with a fresh birthday.
    pub fn enqueue(&mut self, records: &[RecordId]) {
        for &id in records {
            let birthday = self.tick();
            let state = self.partition.record(id).state;
            self.worklist.push(id, birthday, state);
        }
    }

    /// Splits a leaf and queues whatever is born.
    pub fn split(
        &mut self,
        id: RecordId,
        keys: &[Vec<u64>],
        cause: SplitCause,
        labels: Option<&BTreeMap<u64, String>>,
    ) -> Vec<RecordId> {
        let born = self.partition.split(id, keys, cause, labels);
        self.stats.records_created += born.len();
        self.enqueue(&born);
        born
    }

    /// Hash key of one object against the current group codes.
    pub fn key_of(&self, design: usize, obj: NetObj) -> u64 {
        let netlist = &self.netlists[design];
        let partition = &self.partition;
        match obj {
            NetObj::Part(p) => hash::part_key(netlist, p, |w| {
                partition.code_of(design, NetObj::Wire(w))
            }),
            NetObj::Wire(w) => hash::wire_key(
                netlist,
                w,
                |p| partition.code_of(design, NetObj::Part(p)),
                |w| partition.code_of(design, NetObj::Wire(w)),
            ),
        }
    }

    /// Keys of every member of a leaf, one list per design.
    pub fn member_keys(&self, id: RecordId) -> Vec<Vec<u64>> {
        self.partition
            .record(id)
            .circuits
            .iter()
            .enumerate()
            .map(|(d, c)| c.members.iter().map(|&obj| self.key_of(d, obj)).collect())
            .collect()
    }

    pub fn rehash(&mut self, id: RecordId) -> Vec<RecordId> {
        self.stats.rehashes += 1;
        let keys = self.member_keys(id);
        self.split(id, &keys, SplitCause::HashCode, None)
    }

    /// Active leaves adjacent to any member of `id`, in id order.
    fn active_neighbours(&self, id: RecordId) -> BTreeSet<RecordId> {
        let mut out = BTreeSet::new();
        let record = self.partition.record(id);
        for (design, circuit) in record.circuits.iter().enumerate() {
            let netlist = &self.netlists[design];
            for &obj in &circuit.members {
                match obj {
                    NetObj::Part(p) => {
                        for &w in &netlist.part(p).pins {
                            if let Some(r) = self.partition.owner(design, NetObj::Wire(w)) {
                                out.insert(r);
                            }
                        }
                    }
                    NetObj::Wire(w) => {
                        for p in netlist.connected_parts(w) {
                            if let Some(r) = self.partition.owner(design, NetObj::Part(p)) {
                                out.insert(r);
                            }
                        }
                    }
                }
            }
        }
        out.retain(|&r| self.partition.record(r).is_active());
        out
    }

    /// Runs the worklist to a fixed point.
    pub fn propagate(&mut self) -> Fixpoint {
        while let Some((id, birthday)) = self.worklist.pop() {
            if self.abort.is_aborted() {
                tracing::debug!("propagation aborted with {} records pending", self.pending());
                return Fixpoint::Aborted;
            }
            self.stats.worklist_pops += 1;
            if !self.partition.record(id).is_leaf() {
                continue;
            }
            for neighbour in self.active_neighbours(id) {
                // an earlier neighbour's split may have retired this one
                if !self.partition.record(neighbour).is_active() {
                    continue;
                }
                if self.stamps.rehashed_since(neighbour, birthday) {
                    continue;
                }
                let now = self.tick();
                self.stamps.stamp(neighbour, now);
                self.rehash(neighbour);
            }
        }
        Fixpoint::Converged
    }
}
