//! Parallel and series device merging
//!
//! Rounds alternate until one full round merges nothing, then the netlist is
//! put in final form. A second run over the result merges nothing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::netlist::{Netlist, PartId, PartKind, WireId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub parallel: usize,
    pub series: usize,
}

impl MergeStats {
    pub fn total(&self) -> usize {
        self.parallel + self.series
    }
}

/// Merges parallel devices: same type and pins up to symmetry.
pub fn merge_parallel(netlist: &mut Netlist, tolerance: f64) -> usize {
    let mut groups: HashMap<(String, Vec<WireId>), Vec<PartId>> = HashMap::new();
    let parts: Vec<PartId> = netlist.parts().collect();
    for p in parts {
        let part = netlist.part(p);
        if matches!(part.kind, PartKind::Subcircuit { .. }) {
            continue;
        }
        groups
            .entry((part.type_label(), part.canonical_pins()))
            .or_default()
            .push(p);
    }

    let mut merged = 0;
    let mut keys: Vec<&(String, Vec<WireId>)> = groups.keys().collect();
    keys.sort();
    for key in keys {
        let members = &groups[key];
        let mut kept: Vec<PartId> = Vec::new();
        for &p in members {
            // lengths may differ within a group, so try every survivor
            match kept
                .iter()
                .copied()
                .find(|&k| netlist.part(k).can_parallel_merge(netlist.part(p), tolerance))
            {
                Some(k) => {
                    if netlist.parallel_merge(k, p, tolerance) {
                        merged += 1;
                    }
                }
                None => kept.push(p),
            }
        }
    }
    merged
}

/// Merges MOS pairs in series across an un-exported two-pin wire.
pub fn merge_series(netlist: &mut Netlist, tolerance: f64) -> usize {
    // earlier series merges may leave repeated adjacency entries
    netlist.put_in_final_form();
    let mut merged = 0;
    let wires: Vec<WireId> = netlist.wires().collect();
    for w in wires {
        if netlist.wire(w).is_deleted() || netlist.is_exported(w) {
            continue;
        }
        let mut pins: Vec<(PartId, usize)> = Vec::new();
        let mut previous = None;
        for p in netlist.connected_parts(w) {
            if previous == Some(p) {
                continue;
            }
            previous = Some(p);
            let part = netlist.part(p);
            pins.extend(
                part.pins
                    .iter()
                    .enumerate()
                    .filter(|(_, &pw)| pw == w)
                    .map(|(i, _)| (p, i)),
            );
            if pins.len() > 2 {
                break;
            }
        }
        let [(a, pa), (b, pb)] = match pins.as_slice() {
            [x, y] => [*x, *y],
            _ => continue,
        };
        if a == b {
            continue;
        }
        let (part_a, part_b) = (netlist.part(a), netlist.part(b));
        let both_mos = matches!(part_a.kind, PartKind::Mos { .. })
            && matches!(part_b.kind, PartKind::Mos { .. });
        if !both_mos || !part_a.kind.is_diffusion_pin(pa) || !part_b.kind.is_diffusion_pin(pb) {
            continue;
        }
        if netlist.series_merge(a, b, w, tolerance) {
            merged += 1;
        }
    }
    merged
}

/// Alternates parallel and series rounds to a fixed point, then sweeps
/// tombstones.
pub fn merge_devices(
    netlist: &mut Netlist,
    parallel: bool,
    series: bool,
    tolerance: f64,
) -> MergeStats {
    let mut stats = MergeStats::default();
    loop {
        let p = if parallel {
            merge_parallel(netlist, tolerance)
        } else {
            0
        };
        let s = if series {
            merge_series(netlist, tolerance)
        } else {
            0
        };
        stats.parallel += p;
        stats.series += s;
        if p + s == 0 {
            break;
        }
    }
    netlist.put_in_final_form();
    if stats.total() > 0 {
        tracing::debug!(
            "{}: merged {} parallel, {} series",
            netlist.name,
            stats.parallel,
            stats.series
        );
    }
    stats
}
