//! netequiv - hierarchical netlist equivalence checking
//!
//! This library decides whether two or more transistor-level netlists
//! describe the same circuit, the way layout-versus-schematic tools do.
//! Devices and nets are refined into equivalence classes until every class
//! holds exactly one object per design, or an imbalance proves the designs
//! differ.
//!
//! # Quick Start
//!
//! ```no_run
//! use netequiv::{AbortSignal, CompareOptions, NetEquivCore};
//! use std::path::Path;
//!
//! let result = NetEquivCore::compare_files(
//!     &[Path::new("schematic.json"), Path::new("layout.json")],
//!     None,
//!     &CompareOptions::default(),
//!     &AbortSignal::new(),
//! ).unwrap();
//!
//! for run in &result.cells {
//!     println!("{}: {:?}", run.cell, run.outcome());
//! }
//! ```
//!
//! # Features
//!
//! - **Partition refinement**: local signatures, hash propagation, forced
//!   matches, export names, sizes and seeded symmetry breaking
//! - **Device merging**: parallel transistors and series stacks
//! - **Hierarchy**: matched sub-cells become subcircuit parts of their parents
//! - **Diagnostics**: export checks, mismatched classes, bounded text reports

pub mod abort;
pub mod core;
pub mod netlist;
pub mod partition;
pub mod processing;
pub mod report;

// Re-export main types
pub use abort::AbortSignal;
pub use core::{
    load_design, CellRun, CompareOptions, HierarchyComparison, NetEquivCore, NetEquivError,
};
pub use netlist::schema::DesignDescription;
pub use netlist::{
    MosType, NetObj, Netlist, PartId, PartKind, PortCharacteristic, WireId,
};
pub use report::{render_human, CellComparison, Issue, Outcome, Severity, Verdict};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        AbortSignal, CellComparison, CompareOptions, HierarchyComparison, Issue, NetEquivCore,
        NetEquivError, Netlist, Outcome, Severity, Verdict,
    };
}
