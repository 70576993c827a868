//! Device variants
//!
//! Every Part is a fixed-arity device. The variant decides the pin count, the
//! per-pin hash coefficients, which devices read the same reversed and how two
//! devices may be merged in parallel.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::WireId;

/// Channel type of a MOS transistor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MosType {
    Nmos,
    Pmos,
}

impl fmt::Display for MosType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MosType::Nmos => write!(f, "nmos"),
            MosType::Pmos => write!(f, "pmos"),
        }
    }
}

/// Polarity of a bipolar transistor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BipolarType {
    Npn,
    Pnp,
}

impl fmt::Display for BipolarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BipolarType::Npn => write!(f, "npn"),
            BipolarType::Pnp => write!(f, "pnp"),
        }
    }
}

/// The device variant of a Part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartKind {
    /// Transistor with `stack` gates in series: `[diffusion, gate1..gateN, diffusion]`
    Mos { ty: MosType, stack: usize },
    /// Transistor whose source and drain sit on one net: `[diffusion, gate]`
    TiedMos { ty: MosType },
    /// `[emitter, base, collector]`
    Bipolar { ty: BipolarType },
    /// Two interchangeable terminals
    Resistor,
    /// Instance of a cell already proven equivalent, one pin per port
    Subcircuit {
        id: usize,
        cell: String,
        pins: Vec<String>,
    },
}

// Pin classes feeding the coefficient generator. Interchangeable pins share
// a class. MOS pins are numbered by position; the hash keys fold the
// reversal of a stack.
const CLASS_TIED_DIFFUSION: u64 = 2;
const CLASS_TIED_GATE: u64 = 3;
const CLASS_EMITTER: u64 = 4;
const CLASS_BASE: u64 = 5;
const CLASS_COLLECTOR: u64 = 6;
const CLASS_RESISTOR: u64 = 7;
const CLASS_MOS_PIN_BASE: u64 = 0x100;
const CLASS_SUBCIRCUIT_BASE: u64 = 0x10000;

/// Odd, well-mixed weight for a pin class (splitmix64 finalizer).
fn coefficient(class: u64) -> u64 {
    let mut z = class.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (z ^ (z >> 31)) | 1
}

impl PartKind {
    pub fn pin_count(&self) -> usize {
        match self {
            PartKind::Mos { stack, .. } => stack + 2,
            PartKind::TiedMos { .. } => 2,
            PartKind::Bipolar { .. } => 3,
            PartKind::Resistor => 2,
            PartKind::Subcircuit { pins, .. } => pins.len(),
        }
    }

    fn pin_class(&self, pin: usize) -> u64 {
        match self {
            PartKind::Mos { .. } => CLASS_MOS_PIN_BASE + pin as u64,
            PartKind::TiedMos { .. } => {
                if pin == 0 {
                    CLASS_TIED_DIFFUSION
                } else {
                    CLASS_TIED_GATE
                }
            }
            PartKind::Bipolar { .. } => match pin {
                0 => CLASS_EMITTER,
                1 => CLASS_BASE,
                _ => CLASS_COLLECTOR,
            },
            PartKind::Resistor => CLASS_RESISTOR,
            PartKind::Subcircuit { .. } => CLASS_SUBCIRCUIT_BASE + pin as u64,
        }
    }

    /// Hash weight of pin `pin`. Interchangeable pins get equal weights.
    pub fn pin_coefficient(&self, pin: usize) -> u64 {
        coefficient(self.pin_class(pin))
    }

    /// True when the pin sequence read backwards is the same device.
    pub fn is_reversible(&self) -> bool {
        matches!(self, PartKind::Mos { .. })
    }

    pub fn is_diffusion_pin(&self, pin: usize) -> bool {
        match self {
            PartKind::Mos { stack, .. } => pin == 0 || pin == stack + 1,
            PartKind::TiedMos { .. } => pin == 0,
            _ => false,
        }
    }

    /// Role label of a pin, used by local signatures and diagnostics.
    pub fn pin_role(&self, pin: usize) -> String {
        match self {
            PartKind::Mos { stack, .. } => {
                if self.is_diffusion_pin(pin) {
                    "diffusion".to_string()
                } else if *stack == 1 {
                    "gate".to_string()
                } else {
                    let gate = pin - 1;
                    format!("gate{}", gate.min(stack - 1 - gate) + 1)
                }
            }
            PartKind::TiedMos { .. } => {
                if pin == 0 {
                    "diffusion".to_string()
                } else {
                    "gate".to_string()
                }
            }
            PartKind::Bipolar { .. } => match pin {
                0 => "emitter".to_string(),
                1 => "base".to_string(),
                _ => "collector".to_string(),
            },
            PartKind::Resistor => "terminal".to_string(),
            PartKind::Subcircuit { pins, .. } => pins
                .get(pin)
                .cloned()
                .unwrap_or_else(|| format!("pin{}", pin)),
        }
    }

    /// Short kind name without model or size information.
    pub fn kind_name(&self) -> String {
        match self {
            PartKind::Mos { ty, .. } => ty.to_string(),
            PartKind::TiedMos { ty } => format!("{}-tied", ty),
            PartKind::Bipolar { ty } => ty.to_string(),
            PartKind::Resistor => "resistor".to_string(),
            PartKind::Subcircuit { cell, .. } => format!("subcircuit {}", cell),
        }
    }
}

/// One device of a netlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub name: String,
    pub kind: PartKind,
    pub model: String,
    pub pins: Vec<WireId>,
    pub width: f64,
    pub length: f64,
    #[serde(skip)]
    pub(crate) deleted: bool,
}

impl Part {
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn pin_count(&self) -> usize {
        self.kind.pin_count()
    }

    /// Label used to split parts during the local pass: kind, model and
    /// stack height or subcircuit id.
    pub fn type_label(&self) -> String {
        match &self.kind {
            PartKind::Mos { ty, stack } => format!("{}({})x{}", ty, self.model, stack),
            PartKind::TiedMos { ty } => format!("{}-tied({})", ty, self.model),
            PartKind::Bipolar { ty } => format!("{}({})", ty, self.model),
            PartKind::Resistor => format!("resistor({})", self.model),
            PartKind::Subcircuit { id, cell, .. } => format!("subcircuit#{}({})", id, cell),
        }
    }

    /// Pins in a canonical order under the device's symmetry.
    pub fn canonical_pins(&self) -> Vec<WireId> {
        match &self.kind {
            PartKind::Mos { .. } => {
                let reversed: Vec<WireId> = self.pins.iter().rev().copied().collect();
                if reversed < self.pins {
                    reversed
                } else {
                    self.pins.clone()
                }
            }
            PartKind::Resistor => {
                let mut pins = self.pins.clone();
                pins.sort();
                pins
            }
            _ => self.pins.clone(),
        }
    }

    /// Parallel merge compatibility: same type, same length, same pin wires
    /// up to symmetry. Subcircuits never merge.
    pub fn can_parallel_merge(&self, other: &Part, tolerance: f64) -> bool {
        if matches!(self.kind, PartKind::Subcircuit { .. }) {
            return false;
        }
        self.type_label() == other.type_label()
            && sizes_match(self.length, other.length, tolerance)
            && self.canonical_pins() == other.canonical_pins()
    }
}

/// Relative size comparison. Two zero sizes match.
pub fn sizes_match(a: f64, b: f64, tolerance: f64) -> bool {
    let largest = a.abs().max(b.abs());
    if largest == 0.0 {
        return true;
    }
    (a - b).abs() <= largest * tolerance
}
