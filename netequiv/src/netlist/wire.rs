//! Nets and the export/global names attached to them

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{PartId, PortId, WireId};

/// Electrical role declared for an export or global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortCharacteristic {
    Input,
    Output,
    Bidirectional,
    Power,
    Ground,
    Clock,
    Reference,
    Unknown,
}

impl Default for PortCharacteristic {
    fn default() -> Self {
        PortCharacteristic::Unknown
    }
}

impl fmt::Display for PortCharacteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortCharacteristic::Input => "input",
            PortCharacteristic::Output => "output",
            PortCharacteristic::Bidirectional => "bidirectional",
            PortCharacteristic::Power => "power",
            PortCharacteristic::Ground => "ground",
            PortCharacteristic::Clock => "clock",
            PortCharacteristic::Reference => "reference",
            PortCharacteristic::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// One electrical net within one design
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wire {
    pub name: String,
    pub(crate) parts: Vec<PartId>,
    pub(crate) port: Option<PortId>,
    #[serde(skip)]
    pub(crate) deleted: bool,
}

impl Wire {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
            port: None,
            deleted: false,
        }
    }

    pub fn port(&self) -> Option<PortId> {
        self.port
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// A single export or global name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortName {
    pub name: String,
    pub characteristic: PortCharacteristic,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub to_be_renamed: bool,
}

/// All export and global names sitting on one wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub wire: WireId,
    pub names: Vec<PortName>,
}

impl Port {
    pub fn new(wire: WireId) -> Self {
        Self {
            wire,
            names: Vec::new(),
        }
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.name == name)
    }

    /// Adds a name; a repeated name is ignored.
    pub fn add_name(&mut self, name: PortName) {
        if !self.has_name(&name.name) {
            self.names.push(name);
        }
    }

    pub fn name_list(&self) -> Vec<&str> {
        self.names.iter().map(|n| n.name.as_str()).collect()
    }

    /// Alphabetically smallest name, used as the port's display name.
    pub fn display_name(&self) -> &str {
        self.names
            .iter()
            .map(|n| n.name.as_str())
            .min()
            .unwrap_or("")
    }

    pub fn is_global(&self) -> bool {
        self.names.iter().any(|n| n.global)
    }

    /// Majority vote over the characteristics of all names. Ties prefer a
    /// known characteristic, then the smaller one.
    pub fn characteristic(&self) -> PortCharacteristic {
        let mut counts: Vec<(PortCharacteristic, usize)> = Vec::new();
        for n in &self.names {
            match counts.iter_mut().find(|(c, _)| *c == n.characteristic) {
                Some((_, count)) => *count += 1,
                None => counts.push((n.characteristic, 1)),
            }
        }
        counts
            .into_iter()
            .max_by(|(ca, na), (cb, nb)| {
                na.cmp(nb)
                    .then_with(|| {
                        let a_known = *ca != PortCharacteristic::Unknown;
                        let b_known = *cb != PortCharacteristic::Unknown;
                        a_known.cmp(&b_known)
                    })
                    .then_with(|| cb.cmp(ca))
            })
            .map(|(c, _)| c)
            .unwrap_or_default()
    }
}
