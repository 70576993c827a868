//! Cell library schema
//!
//! A design is a JSON document listing cells. Each cell holds already
//! extracted devices, instances of other cells, exports, globals and the
//! annotations that steer comparison.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::wire::PortCharacteristic;
use crate::core::NetEquivError;

/// One design (schematic, layout, ...) as a library of cells
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignDescription {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<String>,
    #[serde(default)]
    pub cells: Vec<CellDescription>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellDescription {
    pub name: String,
    #[serde(default)]
    pub exports: Vec<ExportDescription>,
    #[serde(default)]
    pub globals: Vec<ExportDescription>,
    #[serde(default)]
    pub devices: Vec<DeviceDescription>,
    #[serde(default)]
    pub instances: Vec<InstanceDescription>,
    #[serde(default)]
    pub annotations: CellAnnotations,
}

/// An export (or global) name bound to a local net
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportDescription {
    pub name: String,
    /// Local net; defaults to the export name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<String>,
    #[serde(default)]
    pub characteristic: PortCharacteristic,
}

impl ExportDescription {
    pub fn net(&self) -> &str {
        self.net.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceDescription {
    pub name: String,
    /// `nmos`, `pmos`, `npn`, `pnp` or `resistor`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub pins: Vec<String>,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub length: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub name: String,
    pub cell: String,
    /// Child export name -> local net
    #[serde(default)]
    pub connections: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CellAnnotations {
    pub force_wire_match: Vec<String>,
    pub force_part_match: Vec<String>,
    /// Groups of export name patterns that are connected outside the cell
    pub exports_connected: Vec<Vec<String>>,
    /// Instances that are always flattened, never abstracted
    pub flatten_instances: Vec<String>,
    /// Never compare this cell on its own
    pub not_subcircuit: bool,
    /// Export name patterns expected to differ between designs
    pub rename_exports: Vec<String>,
    pub transistor_type: Option<String>,
    pub resistor_type: Option<String>,
}

/// Glob pattern over names: `*` matches any run, `?` one character
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern(String);

impl NamePattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn matches(&self, name: &str) -> bool {
        let p: Vec<char> = self.0.chars().collect();
        let s: Vec<char> = name.chars().collect();
        let (mut pi, mut si) = (0, 0);
        let mut star: Option<(usize, usize)> = None;
        while si < s.len() {
            if pi < p.len() && (p[pi] == '?' || p[pi] == s[si]) {
                pi += 1;
                si += 1;
            } else if pi < p.len() && p[pi] == '*' {
                star = Some((pi, si));
                pi += 1;
            } else if let Some((sp, ss)) = star {
                pi = sp + 1;
                si = ss + 1;
                star = Some((sp, ss + 1));
            } else {
                return false;
            }
        }
        p[pi..].iter().all(|&c| c == '*')
    }

    pub fn any_matches(patterns: &[String], name: &str) -> bool {
        patterns.iter().any(|p| NamePattern::new(p.as_str()).matches(name))
    }
}

impl DesignDescription {
    pub fn from_json_str(text: &str) -> Result<Self, NetEquivError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, NetEquivError> {
        let text = std::fs::read_to_string(path)?;
        let mut design = Self::from_json_str(&text)?;
        if design.name.is_empty() {
            design.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("design")
                .to_string();
        }
        Ok(design)
    }

    pub fn cell(&self, name: &str) -> Option<&CellDescription> {
        self.cells.iter().find(|c| c.name == name)
    }

    pub fn require_cell(&self, name: &str) -> Result<&CellDescription, NetEquivError> {
        self.cell(name).ok_or_else(|| NetEquivError::UnknownCell {
            design: self.name.clone(),
            cell: name.to_string(),
        })
    }

    /// `top` if given, else the only cell nobody instantiates.
    pub fn top_cell(&self) -> Result<&CellDescription, NetEquivError> {
        if let Some(top) = &self.top {
            return self.require_cell(top);
        }
        let used: BTreeSet<&str> = self
            .cells
            .iter()
            .flat_map(|c| c.instances.iter().map(|i| i.cell.as_str()))
            .collect();
        let roots: Vec<&CellDescription> = self
            .cells
            .iter()
            .filter(|c| !used.contains(c.name.as_str()))
            .collect();
        match roots.as_slice() {
            [only] => Ok(only),
            _ => Err(NetEquivError::AmbiguousTop {
                design: self.name.clone(),
                candidates: roots.iter().map(|c| c.name.clone()).collect(),
            }),
        }
    }
}
