//! Export checks
//!
//! Design 0 is the reference. Before refinement every export and global name
//! is looked up in each other design, in both directions; missing names and
//! ambiguous networks are errors. After refinement the name-matched exports
//! must sit in the same leaf record. Exports that could not be matched by name
//! get a topology-based suggestion, and a matched cell yields the pin tables
//! its parents use to instantiate it as a subcircuit.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::netlist::{NetObj, Netlist, PortId, WireId};
use crate::partition::{Partition, RecordState};
use crate::processing::hierarchy::SubcircuitInfo;
use crate::report::{ExportSuggestion, Issue, IssueLog};

/// An export name present on the reference design and on design `design`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch {
    pub design: usize,
    pub name: String,
    pub reference: PortId,
    pub other: PortId,
}

/// A port name of `design` with no counterpart in `other`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedName {
    pub design: usize,
    pub port: PortId,
    pub name: String,
    pub other: usize,
    /// Flagged "to be renamed"; not an error
    pub renamed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NameMatching {
    pub matches: Vec<NameMatch>,
    pub unmatched: Vec<UnmatchedName>,
}

pub struct ExportChecker<'a> {
    netlists: &'a [Netlist],
}

impl<'a> ExportChecker<'a> {
    pub fn new(netlists: &'a [Netlist]) -> Self {
        Self { netlists }
    }

    fn name_index(&self, design: usize) -> HashMap<&'a str, PortId> {
        let netlist: &'a Netlist = &self.netlists[design];
        let mut index = HashMap::new();
        for p in netlist.ports() {
            for n in &netlist.port(p).names {
                index.entry(n.name.as_str()).or_insert(p);
            }
        }
        index
    }

    /// Matches names reference-to-other and other-to-reference for every
    /// other design.
    pub fn match_by_name(&self, log: &mut IssueLog) -> NameMatching {
        let mut result = NameMatching::default();
        let reference_index = self.name_index(0);
        for other in 1..self.netlists.len() {
            let other_index = self.name_index(other);
            for (from, to, to_index) in [(0, other, &other_index), (other, 0, &reference_index)] {
                self.match_direction(from, to, to_index, log, &mut result);
            }
        }
        for m in &result.matches {
            let c0 = self.netlists[0].port(m.reference).characteristic();
            let ci = self.netlists[m.design].port(m.other).characteristic();
            if c0 != ci {
                log.push(
                    Issue::warning(
                        "export_characteristic",
                        format!(
                            "Export {} is {} in {} but {} in {}",
                            m.name,
                            c0,
                            self.netlists[0].name,
                            ci,
                            self.netlists[m.design].name
                        ),
                    )
                    .with_object(m.name.clone()),
                );
            }
        }
        result
    }

    fn match_direction(
        &self,
        from: usize,
        to: usize,
        to_index: &HashMap<&str, PortId>,
        log: &mut IssueLog,
        result: &mut NameMatching,
    ) {
        let (src, dst) = (&self.netlists[from], &self.netlists[to]);
        for p in src.ports() {
            let port = src.port(p);
            let mut targets: BTreeSet<PortId> = BTreeSet::new();
            for n in &port.names {
                if n.to_be_renamed {
                    result.unmatched.push(UnmatchedName {
                        design: from,
                        port: p,
                        name: n.name.clone(),
                        other: to,
                        renamed: true,
                    });
                    continue;
                }
                match to_index.get(n.name.as_str()) {
                    Some(&target) => {
                        targets.insert(target);
                        if from == 0 {
                            result.matches.push(NameMatch {
                                design: to,
                                name: n.name.clone(),
                                reference: p,
                                other: target,
                            });
                        }
                    }
                    None => {
                        log.push(
                            Issue::error(
                                "export_name",
                                format!(
                                    "{} {} in {} has no counterpart in {}",
                                    if n.global { "Global" } else { "Export" },
                                    n.name,
                                    src.name,
                                    dst.name
                                ),
                            )
                            .with_object(n.name.clone()),
                        );
                        result.unmatched.push(UnmatchedName {
                            design: from,
                            port: p,
                            name: n.name.clone(),
                            other: to,
                            renamed: false,
                        });
                    }
                }
            }
            if targets.len() > 1 {
                let names: Vec<String> = targets
                    .iter()
                    .map(|&t| dst.port(t).display_name().to_string())
                    .collect();
                log.push(
                    Issue::error(
                        "export_name",
                        format!(
                            "Exports {} on one network in {} match {} networks in {}: {}",
                            port.name_list().join(", "),
                            src.name,
                            targets.len(),
                            dst.name,
                            names.join(", ")
                        ),
                    )
                    .with_object(port.display_name().to_string()),
                );
            }
        }
    }

    /// Wire of design `other` matched to `wire` of design `design`, if the
    /// wire's record is matched.
    fn counterpart(
        &self,
        partition: &Partition,
        design: usize,
        wire: WireId,
        other: usize,
    ) -> Option<WireId> {
        let owner = partition.owner(design, NetObj::Wire(wire))?;
        let record = partition.record(owner);
        if record.state != RecordState::Matched {
            return None;
        }
        match record.circuits.get(other)?.members.first()? {
            NetObj::Wire(w) => Some(*w),
            NetObj::Part(_) => None,
        }
    }

    /// Exports matched by name must lie in the same leaf record.
    pub fn check_equivalent(
        &self,
        partition: &Partition,
        matching: &NameMatching,
        log: &mut IssueLog,
    ) -> usize {
        let mut seen: BTreeSet<(usize, PortId, PortId)> = BTreeSet::new();
        let mut failures = 0;
        for m in &matching.matches {
            if !seen.insert((m.design, m.reference, m.other)) {
                continue;
            }
            let w0 = self.netlists[0].port(m.reference).wire;
            let wi = self.netlists[m.design].port(m.other).wire;
            let r0 = partition.owner(0, NetObj::Wire(w0));
            let ri = partition.owner(m.design, NetObj::Wire(wi));
            if r0.is_some() && r0 == ri {
                continue;
            }
            failures += 1;
            let mut issue = Issue::error(
                "export_equivalence",
                format!(
                    "Exports named {} are not on equivalent nets: {}:{} vs {}:{}",
                    m.name,
                    self.netlists[0].name,
                    self.netlists[0].describe_wire(w0),
                    self.netlists[m.design].name,
                    self.netlists[m.design].describe_wire(wi)
                ),
            )
            .with_object(m.name.clone());
            if let Some(w) = self.counterpart(partition, 0, w0, m.design) {
                issue = issue.with_suggestion(format!(
                    "{}:{} is equivalent to {}:{}",
                    self.netlists[m.design].name,
                    self.netlists[m.design].describe_wire(w),
                    self.netlists[0].name,
                    self.netlists[0].describe_wire(w0)
                ));
            }
            log.push(issue);
        }
        failures
    }

    /// Best-guess correspondences for names that found no partner.
    pub fn suggest(&self, partition: &Partition, matching: &NameMatching) -> Vec<ExportSuggestion> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<(usize, String, usize)> = BTreeSet::new();
        for u in &matching.unmatched {
            if !seen.insert((u.design, u.name.clone(), u.other)) {
                continue;
            }
            let wire = self.netlists[u.design].port(u.port).wire;
            if let Some(w) = self.counterpart(partition, u.design, wire, u.other) {
                out.push(ExportSuggestion {
                    design: self.netlists[u.design].name.clone(),
                    export: u.name.clone(),
                    other_design: self.netlists[u.other].name.clone(),
                    suggested: self.netlists[u.other].describe_wire(w),
                });
            }
        }
        out
    }

    /// Pin tables of a matched cell, one per design; pins follow the
    /// reference design's ports.
    pub fn subcircuit_tables(&self, partition: &Partition, cell: &str) -> Vec<SubcircuitInfo> {
        let reference = &self.netlists[0];
        let ports: Vec<PortId> = reference.ports().collect();
        let pin_names: Vec<String> = ports
            .iter()
            .map(|&p| reference.port(p).display_name().to_string())
            .collect();

        (0..self.netlists.len())
            .map(|d| {
                let netlist = &self.netlists[d];
                let mut pin_of_name = BTreeMap::new();
                let mut globals = BTreeSet::new();
                for (pin, &p0) in ports.iter().enumerate() {
                    let w0 = reference.port(p0).wire;
                    let wire = if d == 0 {
                        Some(w0)
                    } else {
                        self.counterpart(partition, 0, w0, d)
                    };
                    let Some(port) = wire.and_then(|w| netlist.wire(w).port()) else {
                        continue;
                    };
                    for n in &netlist.port(port).names {
                        pin_of_name.insert(n.name.clone(), pin);
                        if n.global {
                            globals.insert(n.name.clone());
                        }
                    }
                }
                SubcircuitInfo {
                    id: 0,
                    cell: cell.to_string(),
                    pin_names: pin_names.clone(),
                    pin_of_name,
                    globals,
                }
            })
            .collect()
    }
}
