//! Netlist model
//!
//! A [`Netlist`] is one design's flattened view of one cell: Parts (devices),
//! Wires (nets) and Ports (export/global names on a wire). Objects live in
//! arenas and are addressed by integer handles. Deletion is a tombstone flag so
//! handles stay valid while merge passes iterate; [`Netlist::put_in_final_form`]
//! sweeps the tombstones out of the wire adjacency lists.

pub mod builder;
pub mod part;
pub mod schema;
pub mod wire;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::NetEquivError;
pub use part::{sizes_match, BipolarType, MosType, Part, PartKind};
pub use wire::{Port, PortCharacteristic, PortName, Wire};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub usize);

/// The partitionable kinds of net object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Part,
    Wire,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Part => write!(f, "part"),
            ObjectKind::Wire => write!(f, "wire"),
        }
    }
}

/// Handle to a partitionable object of one design
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetObj {
    Part(PartId),
    Wire(WireId),
}

impl NetObj {
    pub fn kind(&self) -> ObjectKind {
        match self {
            NetObj::Part(_) => ObjectKind::Part,
            NetObj::Wire(_) => ObjectKind::Wire,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            NetObj::Part(p) => p.0,
            NetObj::Wire(w) => w.0,
        }
    }
}

/// Counts of live objects, used by reports and `inspect`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetlistStats {
    pub parts: usize,
    pub wires: usize,
    pub ports: usize,
}

/// One design's netlist for the cell under comparison
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    pub name: String,
    parts: Vec<Part>,
    wires: Vec<Wire>,
    ports: Vec<Port>,
    /// Wire names (or export names) that must be matched across designs
    pub force_wire_match: Vec<String>,
    /// Part names that must be matched across designs
    pub force_part_match: Vec<String>,
}

impl Netlist {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_wire(&mut self, name: impl Into<String>) -> WireId {
        let id = WireId(self.wires.len());
        self.wires.push(Wire::new(name));
        id
    }

    /// Adds a device. Every pin must name an existing wire and the pin count
    /// must fit the device kind.
    pub fn add_part(
        &mut self,
        name: impl Into<String>,
        kind: PartKind,
        model: impl Into<String>,
        pins: Vec<WireId>,
        width: f64,
        length: f64,
    ) -> Result<PartId, NetEquivError> {
        let name = name.into();
        if pins.len() != kind.pin_count() {
            return Err(NetEquivError::BadPinCount {
                device: name,
                kind: kind.kind_name(),
                expected: kind.pin_count(),
                found: pins.len(),
            });
        }
        if let Some(pin) = pins.iter().position(|w| w.0 >= self.wires.len()) {
            return Err(NetEquivError::DisconnectedPin {
                device: name,
                pin: kind.pin_role(pin),
            });
        }

        let id = PartId(self.parts.len());
        for &w in &pins {
            // pins of one part are added together, so a repeat is always last
            let adjacency = &mut self.wires[w.0].parts;
            if adjacency.last() != Some(&id) {
                adjacency.push(id);
            }
        }
        self.parts.push(Part {
            name,
            kind,
            model: model.into(),
            pins,
            width,
            length,
            deleted: false,
        });
        Ok(id)
    }

    /// Attaches an export or global name to `wire`. Repeating a name is a
    /// no-op; the port characteristic is recomputed on demand.
    pub fn add_export(
        &mut self,
        wire: WireId,
        name: impl Into<String>,
        characteristic: PortCharacteristic,
        global: bool,
    ) -> PortId {
        self.add_port_name(
            wire,
            PortName {
                name: name.into(),
                characteristic,
                global,
                to_be_renamed: false,
            },
        )
    }

    pub fn add_port_name(&mut self, wire: WireId, name: PortName) -> PortId {
        let port = match self.wires[wire.0].port {
            Some(p) => p,
            None => {
                let p = PortId(self.ports.len());
                self.ports.push(Port::new(wire));
                self.wires[wire.0].port = Some(p);
                p
            }
        };
        self.ports[port.0].add_name(name);
        port
    }

    pub fn part(&self, id: PartId) -> &Part {
        &self.parts[id.0]
    }

    pub fn wire(&self, id: WireId) -> &Wire {
        &self.wires[id.0]
    }

    pub fn port(&self, id: PortId) -> &Port {
        &self.ports[id.0]
    }

    /// Live parts
    pub fn parts(&self) -> impl Iterator<Item = PartId> + '_ {
        self.parts
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.deleted)
            .map(|(i, _)| PartId(i))
    }

    /// Live wires
    pub fn wires(&self) -> impl Iterator<Item = WireId> + '_ {
        self.wires
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.deleted)
            .map(|(i, _)| WireId(i))
    }

    /// Ports on live wires
    pub fn ports(&self) -> impl Iterator<Item = PortId> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| !self.wires[p.wire.0].deleted)
            .map(|(i, _)| PortId(i))
    }

    pub fn objects(&self, kind: ObjectKind) -> Vec<NetObj> {
        match kind {
            ObjectKind::Part => self.parts().map(NetObj::Part).collect(),
            ObjectKind::Wire => self.wires().map(NetObj::Wire).collect(),
        }
    }

    /// Live parts touching `wire`. The iterator can be restarted by calling
    /// again; it never yields tombstoned parts.
    pub fn connected_parts(&self, wire: WireId) -> impl Iterator<Item = PartId> + '_ {
        self.wires[wire.0]
            .parts
            .iter()
            .copied()
            .filter(move |p| !self.parts[p.0].deleted)
    }

    pub fn pin_at(&self, part: PartId, pin: usize) -> Option<WireId> {
        self.parts.get(part.0).and_then(|p| p.pins.get(pin)).copied()
    }

    pub fn object_name(&self, obj: NetObj) -> &str {
        match obj {
            NetObj::Part(p) => &self.parts[p.0].name,
            NetObj::Wire(w) => &self.wires[w.0].name,
        }
    }

    /// Wire display name followed by its export names, if any.
    pub fn describe_wire(&self, wire: WireId) -> String {
        let w = &self.wires[wire.0];
        match w.port {
            Some(p) => {
                let names = self.ports[p.0].name_list();
                if names.len() == 1 && names[0] == w.name {
                    w.name.clone()
                } else {
                    format!("{} (exports: {})", w.name, names.join(", "))
                }
            }
            None => w.name.clone(),
        }
    }

    pub fn describe(&self, obj: NetObj) -> String {
        match obj {
            NetObj::Part(p) => {
                let part = &self.parts[p.0];
                format!("{} {}", part.type_label(), part.name)
            }
            NetObj::Wire(w) => self.describe_wire(w),
        }
    }

    pub fn is_exported(&self, wire: WireId) -> bool {
        self.wires[wire.0].port.is_some()
    }

    /// Finds a live wire by wire name, falling back to export names.
    pub fn find_wire(&self, name: &str) -> Option<WireId> {
        self.wires()
            .find(|&w| self.wires[w.0].name == name)
            .or_else(|| self.find_port(name).map(|p| self.ports[p.0].wire))
    }

    pub fn find_part(&self, name: &str) -> Option<PartId> {
        self.parts().find(|&p| self.parts[p.0].name == name)
    }

    pub fn find_port(&self, name: &str) -> Option<PortId> {
        self.ports().find(|&p| self.ports[p.0].has_name(name))
    }

    /// Merges `other` into `keep` when the two are parallel-compatible:
    /// widths add up and `other` is tombstoned.
    pub fn parallel_merge(&mut self, keep: PartId, other: PartId, tolerance: f64) -> bool {
        if keep == other || self.parts[keep.0].deleted || self.parts[other.0].deleted {
            return false;
        }
        if !self.parts[keep.0].can_parallel_merge(&self.parts[other.0], tolerance) {
            return false;
        }
        let width = self.parts[other.0].width;
        self.parts[keep.0].width += width;
        self.parts[other.0].deleted = true;
        true
    }

    /// Folds MOS `other` into `keep` across the internal wire `junction`,
    /// producing one taller stack. Both must be untied MOS parts of the same
    /// channel type and model with `junction` on one diffusion pin each.
    pub fn series_merge(
        &mut self,
        keep: PartId,
        other: PartId,
        junction: WireId,
        tolerance: f64,
    ) -> bool {
        if keep == other || self.parts[keep.0].deleted || self.parts[other.0].deleted {
            return false;
        }
        let (a, b) = (&self.parts[keep.0], &self.parts[other.0]);
        let (ty_a, ty_b) = match (&a.kind, &b.kind) {
            (PartKind::Mos { ty: ta, .. }, PartKind::Mos { ty: tb, .. }) => (*ta, *tb),
            _ => return false,
        };
        if ty_a != ty_b || a.model != b.model || !sizes_match(a.width, b.width, tolerance) {
            return false;
        }

        // orient a so the junction is its last pin, b so it is its first
        let mut a_pins = a.pins.clone();
        let mut b_pins = b.pins.clone();
        if a_pins.last() != Some(&junction) {
            a_pins.reverse();
        }
        if b_pins.first() != Some(&junction) {
            b_pins.reverse();
        }
        if a_pins.last() != Some(&junction) || b_pins.first() != Some(&junction) {
            return false;
        }

        let mut pins = a_pins[..a_pins.len() - 1].to_vec();
        pins.extend_from_slice(&b_pins[1..]);
        let stack = pins.len() - 2;
        let length = a.length + b.length;
        let gained: Vec<WireId> = b.pins.clone();

        let part = &mut self.parts[keep.0];
        part.pins = pins;
        part.kind = PartKind::Mos { ty: ty_a, stack };
        part.length = length;
        self.parts[other.0].deleted = true;
        self.wires[junction.0].deleted = true;
        for w in gained {
            if w != junction {
                self.wires[w.0].parts.push(keep);
            }
        }
        true
    }

    /// Sweeps tombstoned parts out of wire adjacency lists and collapses
    /// duplicate part references.
    pub fn put_in_final_form(&mut self) {
        let parts = &self.parts;
        for wire in self.wires.iter_mut().filter(|w| !w.deleted) {
            wire.parts.retain(|p| !parts[p.0].deleted);
            wire.parts.sort();
            wire.parts.dedup();
        }
    }

    pub fn stats(&self) -> NetlistStats {
        NetlistStats {
            parts: self.parts().count(),
            wires: self.wires().count(),
            ports: self.ports().count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nmos() -> PartKind {
        PartKind::Mos {
            ty: MosType::Nmos,
            stack: 1,
        }
    }

    fn create_test_netlist() -> Netlist {
        // two parallel nmos between out and gnd driven by a
        let mut n = Netlist::new("test");
        let out = n.add_wire("out");
        let a = n.add_wire("a");
        let gnd = n.add_wire("gnd");
        n.add_part("M1", nmos(), "nch", vec![out, a, gnd], 1.0, 0.1)
            .unwrap();
        n.add_part("M2", nmos(), "nch", vec![gnd, a, out], 2.0, 0.1)
            .unwrap();
        n.add_export(out, "out", PortCharacteristic::Output, false);
        n
    }

    #[test]
    fn test_add_part_rejects_bad_pin_count() {
        let mut n = Netlist::new("test");
        let a = n.add_wire("a");
        let err = n.add_part("M1", nmos(), "nch", vec![a, a], 1.0, 1.0);
        assert!(matches!(err, Err(NetEquivError::BadPinCount { .. })));
    }

    #[test]
    fn test_add_part_rejects_unknown_wire() {
        let mut n = Netlist::new("test");
        let a = n.add_wire("a");
        let err = n.add_part("M1", nmos(), "nch", vec![a, a, WireId(7)], 1.0, 1.0);
        assert!(matches!(err, Err(NetEquivError::DisconnectedPin { .. })));
    }

    #[test]
    fn test_connected_parts_restartable() {
        let n = create_test_netlist();
        let a = n.find_wire("a").unwrap();
        assert_eq!(n.connected_parts(a).count(), 2);
        assert_eq!(n.connected_parts(a).count(), 2);
    }

    #[test]
    fn test_add_export_idempotent() {
        let mut n = create_test_netlist();
        let out = n.find_wire("out").unwrap();
        let p1 = n.add_export(out, "out", PortCharacteristic::Output, false);
        let p2 = n.add_export(out, "y", PortCharacteristic::Output, false);
        assert_eq!(p1, p2);
        assert_eq!(n.port(p1).names.len(), 2);
        assert_eq!(n.find_wire("y"), Some(out));
    }

    #[test]
    fn test_parallel_merge_sums_width() {
        let mut n = create_test_netlist();
        assert!(n.parallel_merge(PartId(0), PartId(1), 0.01));
        assert_eq!(n.part(PartId(0)).width, 3.0);
        assert!(n.part(PartId(1)).is_deleted());
        let a = n.find_wire("a").unwrap();
        assert_eq!(n.connected_parts(a).count(), 1);
        // already merged
        assert!(!n.parallel_merge(PartId(0), PartId(1), 0.01));
    }

    #[test]
    fn test_series_merge_builds_stack() {
        let mut n = Netlist::new("stack");
        let out = n.add_wire("out");
        let a = n.add_wire("a");
        let b = n.add_wire("b");
        let mid = n.add_wire("mid");
        let gnd = n.add_wire("gnd");
        let m1 = n.add_part("M1", nmos(), "nch", vec![out, a, mid], 1.0, 0.1).unwrap();
        let m2 = n.add_part("M2", nmos(), "nch", vec![gnd, b, mid], 1.0, 0.1).unwrap();

        assert!(n.series_merge(m1, m2, mid, 0.01));
        n.put_in_final_form();

        let part = n.part(m1);
        assert_eq!(part.kind, PartKind::Mos { ty: MosType::Nmos, stack: 2 });
        assert_eq!(part.pins, vec![out, a, b, gnd]);
        assert!((part.length - 0.2).abs() < 1e-12);
        assert!(n.wire(mid).is_deleted());
        assert_eq!(n.connected_parts(gnd).collect::<Vec<_>>(), vec![m1]);
        assert_eq!(n.stats().parts, 1);
        assert_eq!(n.stats().wires, 4);
    }
}
