//! Hash keys
//!
//! A key is a pure function of one object and a snapshot of its neighbours'
//! group codes. Arithmetic wraps; equal keys in different designs are the
//! evidence that two objects play the same role.
//!
//! MOS pins are weighted by position, so a stack `[y, a, b, gnd]` and one
//! wired `[y, b, a, gnd]` hash apart. A stack still reads the same from
//! either end: its key is the smaller of the two readings, and wires see it
//! in the direction that reading picked.

use std::cmp::Ordering;

use crate::netlist::{Netlist, Part, PartId, WireId};

/// Direction in which a reversible part was read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Forward,
    Reversed,
    /// Both readings give the same sum
    Either,
}

fn pin_sum(part: &Part, wire_code: &impl Fn(WireId) -> u64, reversed: bool) -> u64 {
    let last = part.pins.len().saturating_sub(1);
    part.pins.iter().enumerate().fold(0u64, |acc, (i, &w)| {
        let pin = if reversed { last - i } else { i };
        acc.wrapping_add(part.kind.pin_coefficient(pin).wrapping_mul(wire_code(w)))
    })
}

/// Reading direction and key of one part.
pub fn orient(part: &Part, wire_code: &impl Fn(WireId) -> u64) -> (Orientation, u64) {
    let forward = pin_sum(part, wire_code, false);
    if !part.kind.is_reversible() {
        return (Orientation::Forward, forward);
    }
    let reversed = pin_sum(part, wire_code, true);
    match forward.cmp(&reversed) {
        Ordering::Less => (Orientation::Forward, forward),
        Ordering::Greater => (Orientation::Reversed, reversed),
        Ordering::Equal => (Orientation::Either, forward),
    }
}

/// Sum over pins of pin coefficient times the code of the wire on that pin,
/// in the part's reading direction.
pub fn part_key(netlist: &Netlist, part: PartId, wire_code: impl Fn(WireId) -> u64) -> u64 {
    orient(netlist.part(part), &wire_code).1
}

/// Summed coefficients of the pins of `part` sitting on `wire`. With
/// `Either`, a pin weighs as much as its mirror image.
pub fn weight_on(part: &Part, wire: WireId, orientation: Orientation) -> u64 {
    let last = part.pins.len().saturating_sub(1);
    part.pins
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w == wire)
        .fold(0u64, |acc, (i, _)| {
            let weight = match orientation {
                Orientation::Forward => part.kind.pin_coefficient(i),
                Orientation::Reversed => part.kind.pin_coefficient(last - i),
                Orientation::Either => part
                    .kind
                    .pin_coefficient(i)
                    .wrapping_add(part.kind.pin_coefficient(last - i)),
            };
            acc.wrapping_add(weight)
        })
}

/// Sum over distinct connected parts of the part's code times the weight of
/// its pins on this wire. Adjacency lists keep repeats of a part next to each
/// other.
pub fn wire_key(
    netlist: &Netlist,
    wire: WireId,
    part_code: impl Fn(PartId) -> u64,
    wire_code: impl Fn(WireId) -> u64,
) -> u64 {
    let mut previous: Option<PartId> = None;
    let mut key = 0u64;
    for p in netlist.connected_parts(wire) {
        if previous == Some(p) {
            continue;
        }
        previous = Some(p);
        let part = netlist.part(p);
        let (orientation, _) = orient(part, &wire_code);
        let weight = weight_on(part, wire, orientation);
        key = key.wrapping_add(part_code(p).wrapping_mul(weight));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlist::{MosType, PartKind};

    fn nmos(stack: usize) -> PartKind {
        PartKind::Mos {
            ty: MosType::Nmos,
            stack,
        }
    }

    #[test]
    fn test_symmetric_pins_give_equal_keys() {
        let mut n = Netlist::new("t");
        let a = n.add_wire("a");
        let g = n.add_wire("g");
        let b = n.add_wire("b");
        let m = n.add_part("M1", nmos(1), "nch", vec![a, g, b], 0.0, 0.0).unwrap();
        let part_code = |_p: PartId| 0x1234_5678u64;
        let same = |_w: WireId| 99u64;
        assert_eq!(wire_key(&n, a, part_code, same), wire_key(&n, b, part_code, same));
        assert_ne!(wire_key(&n, a, part_code, same), wire_key(&n, g, part_code, same));

        let codes = [11u64, 22, 33];
        let forward = part_key(&n, m, |w| codes[w.0]);
        let swapped = part_key(&n, m, |w| codes[[2, 1, 0][w.0]]);
        assert_eq!(forward, swapped);
    }

    #[test]
    fn test_key_depends_on_neighbour_codes() {
        let mut n = Netlist::new("t");
        let a = n.add_wire("a");
        let g = n.add_wire("g");
        let b = n.add_wire("b");
        let m = n.add_part("M1", nmos(1), "nch", vec![a, g, b], 0.0, 0.0).unwrap();
        let k1 = part_key(&n, m, |w| if w == g { 5 } else { 7 });
        let k2 = part_key(&n, m, |w| if w == g { 7 } else { 5 });
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_stack_keys_see_gate_order() {
        let mut n = Netlist::new("t");
        let wires: Vec<WireId> = ["y", "a", "b", "gnd"].iter().map(|w| n.add_wire(*w)).collect();
        let (y, a, b, gnd) = (wires[0], wires[1], wires[2], wires[3]);
        let forward = n.add_part("N1", nmos(2), "nch", vec![y, a, b, gnd], 0.0, 0.0).unwrap();
        let swapped = n.add_part("N2", nmos(2), "nch", vec![y, b, a, gnd], 0.0, 0.0).unwrap();
        let reversed = n.add_part("N3", nmos(2), "nch", vec![gnd, b, a, y], 0.0, 0.0).unwrap();

        let codes = [101u64, 202, 303, 404];
        let code = |w: WireId| codes[w.0];
        assert_ne!(part_key(&n, forward, code), part_key(&n, swapped, code));
        assert_eq!(part_key(&n, forward, code), part_key(&n, reversed, code));
    }

    #[test]
    fn test_wire_weight_follows_reading_direction() {
        let mut n = Netlist::new("t");
        let wires: Vec<WireId> = ["y", "a", "b", "gnd"].iter().map(|w| n.add_wire(*w)).collect();
        let (y, a, b, gnd) = (wires[0], wires[1], wires[2], wires[3]);
        n.add_part("N1", nmos(2), "nch", vec![y, a, b, gnd], 0.0, 0.0).unwrap();

        let mut m = Netlist::new("u");
        let wires: Vec<WireId> = ["y", "a", "b", "gnd"].iter().map(|w| m.add_wire(*w)).collect();
        let (y2, a2, b2, gnd2) = (wires[0], wires[1], wires[2], wires[3]);
        m.add_part("N1", nmos(2), "nch", vec![gnd2, b2, a2, y2], 0.0, 0.0).unwrap();

        let codes = [101u64, 202, 303, 404];
        let part_code = |_p: PartId| 7u64;
        let wire_code = |w: WireId| codes[w.0];
        for (w1, w2) in [(y, y2), (a, a2), (b, b2), (gnd, gnd2)] {
            assert_eq!(
                wire_key(&n, w1, part_code, wire_code),
                wire_key(&m, w2, part_code, wire_code)
            );
        }
        assert_ne!(
            wire_key(&n, a, part_code, wire_code),
            wire_key(&n, b, part_code, wire_code)
        );
    }

    #[test]
    fn test_weight_on_sums_pins() {
        let mut n = Netlist::new("t");
        let d = n.add_wire("d");
        let g = n.add_wire("g");
        let other = n.add_wire("other");
        let m = n.add_part("M1", nmos(1), "nch", vec![d, g, d], 0.0, 0.0).unwrap();
        let part = n.part(m);
        let c0 = part.kind.pin_coefficient(0);
        let c2 = part.kind.pin_coefficient(2);
        assert_eq!(weight_on(part, d, Orientation::Forward), c0.wrapping_add(c2));
        assert_eq!(weight_on(part, other, Orientation::Forward), 0);
    }
}
