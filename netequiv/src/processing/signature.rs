//! Local signatures
//!
//! The first, purely local split. Parts are grouped by type label; wires by
//! the multiset of (part type, pin role) they touch. Every signature comes with
//! readable text that becomes the record label.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::netlist::{NetObj, Netlist, PartId, WireId};

pub fn text_key(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

pub fn part_signature(netlist: &Netlist, part: PartId) -> String {
    netlist.part(part).type_label()
}

pub fn wire_signature(netlist: &Netlist, wire: WireId) -> String {
    let mut pins: BTreeMap<String, usize> = BTreeMap::new();
    for p in netlist.connected_parts(wire) {
        let part = netlist.part(p);
        for (i, &w) in part.pins.iter().enumerate() {
            if w == wire {
                let entry = format!("{}.{}", part.type_label(), part.kind.pin_role(i));
                *pins.entry(entry).or_insert(0) += 1;
            }
        }
    }
    if pins.is_empty() {
        return "unconnected".to_string();
    }
    pins.into_iter()
        .map(|(pin, count)| {
            if count == 1 {
                pin
            } else {
                format!("{} x{}", pin, count)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Signature text and key of any object.
pub fn signature(netlist: &Netlist, obj: NetObj) -> (u64, String) {
    let text = match obj {
        NetObj::Part(p) => part_signature(netlist, p),
        NetObj::Wire(w) => wire_signature(netlist, w),
    };
    (text_key(&text), text)
}
