//! Netlist Builder
//!
//! Turns one cell of a [`DesignDescription`] into a flat [`Netlist`]. Child
//! instances are either flattened (their nets get an `inst/` path prefix) or,
//! when the child has already been proven equivalent, abstracted as a single
//! subcircuit part. Nets are merged with a union-find; export assertions and
//! subcircuit pin checks are deferred until every merge is known.

use petgraph::unionfind::UnionFind;
use std::collections::HashMap;

use super::schema::{CellDescription, DesignDescription, DeviceDescription, NamePattern};
use super::wire::PortName;
use super::{BipolarType, MosType, Netlist, PartKind, WireId};
use crate::core::{CompareOptions, NetEquivError};
use crate::processing::hierarchy::HierarchyInfo;

/// Deepest instance nesting followed before giving up
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone)]
struct NetNode {
    name: String,
    depth: usize,
}

#[derive(Debug, Clone)]
struct PendingDevice {
    name: String,
    kind: PartKind,
    model: String,
    nets: Vec<usize>,
    width: f64,
    length: f64,
}

#[derive(Debug, Clone)]
struct PendingPort {
    net: usize,
    name: PortName,
}

/// Nets that must end up merged, with the error to raise otherwise
#[derive(Debug)]
struct Deferred {
    nets: Vec<usize>,
    error: NetEquivError,
}

/// Flattening walker for one cell of one design
pub struct NetlistBuilder<'a> {
    design: &'a DesignDescription,
    design_index: usize,
    hierarchy: &'a HierarchyInfo,
    check_sizes: bool,
    nets: Vec<NetNode>,
    net_index: HashMap<String, usize>,
    unions: Vec<(usize, usize)>,
    devices: Vec<PendingDevice>,
    ports: Vec<PendingPort>,
    deferred: Vec<Deferred>,
}

impl<'a> NetlistBuilder<'a> {
    /// Build the netlist of `cell` as seen by design number `design_index`.
    pub fn build(
        design: &'a DesignDescription,
        design_index: usize,
        cell: &str,
        hierarchy: &'a HierarchyInfo,
        options: &CompareOptions,
    ) -> Result<Netlist, NetEquivError> {
        let root = design.require_cell(cell)?;
        let mut builder = NetlistBuilder {
            design,
            design_index,
            hierarchy,
            check_sizes: options.check_sizes,
            nets: Vec::new(),
            net_index: HashMap::new(),
            unions: Vec::new(),
            devices: Vec::new(),
            ports: Vec::new(),
            deferred: Vec::new(),
        };

        // Step 1: walk the hierarchy below the root, collecting nets and merges
        let local = builder.walk(root, "", 0)?;

        // Step 2: root exports become ports; connected exports are merged
        for export in &root.exports {
            let net = local[export.net()];
            builder.ports.push(PendingPort {
                net,
                name: PortName {
                    name: export.name.clone(),
                    characteristic: export.characteristic,
                    global: false,
                    to_be_renamed: NamePattern::any_matches(
                        &root.annotations.rename_exports,
                        &export.name,
                    ),
                },
            });
        }
        for group in builder.connected_export_nets(root, &local) {
            for pair in group.windows(2) {
                builder.unions.push((pair[0], pair[1]));
            }
        }

        // Step 3: resolve net classes and assemble the netlist
        let netlist = builder.finish(&design.name, root)?;
        tracing::debug!(
            "built {}:{} with {} parts, {} wires",
            design.name,
            cell,
            netlist.stats().parts,
            netlist.stats().wires
        );
        Ok(netlist)
    }

    fn intern(&mut self, name: String, depth: usize) -> usize {
        if let Some(&i) = self.net_index.get(&name) {
            return i;
        }
        let i = self.nets.len();
        self.nets.push(NetNode {
            name: name.clone(),
            depth,
        });
        self.net_index.insert(name, i);
        i
    }

    /// Visits one cell instance. Returns the net index of every local net
    /// name used by the cell.
    fn walk(
        &mut self,
        cell: &CellDescription,
        prefix: &str,
        depth: usize,
    ) -> Result<HashMap<String, usize>, NetEquivError> {
        if depth > MAX_DEPTH {
            return Err(NetEquivError::RecursiveHierarchy {
                design: self.design.name.clone(),
                cell: cell.name.clone(),
            });
        }

        let design = self.design;
        let hierarchy = self.hierarchy;
        let mut local: HashMap<String, usize> = HashMap::new();
        let mut net = |b: &mut Self, name: &str| -> usize {
            if let Some(&i) = local.get(name) {
                return i;
            }
            let i = b.intern(format!("{}{}", prefix, name), depth);
            local.insert(name.to_string(), i);
            i
        };

        for export in &cell.exports {
            net(self, export.net());
        }

        // globals join the root net of the same name
        for global in &cell.globals {
            if let Some(export) = cell.exports.iter().find(|e| e.name == global.name) {
                if export.net() != global.net() || export.characteristic != global.characteristic
                {
                    return Err(NetEquivError::ExportGlobalConflict {
                        cell: cell.name.clone(),
                        name: global.name.clone(),
                    });
                }
                continue;
            }
            let local_net = net(self, global.net());
            let root_net = self.intern(global.name.clone(), 0);
            self.unions.push((local_net, root_net));
            self.ports.push(PendingPort {
                net: root_net,
                name: PortName {
                    name: global.name.clone(),
                    characteristic: global.characteristic,
                    global: true,
                    to_be_renamed: false,
                },
            });
        }

        for device in &cell.devices {
            let (kind, model) = self.device_kind(cell, device)?;
            let nets = device.pins.iter().map(|p| net(self, p)).collect();
            let (width, length) = if self.check_sizes {
                (device.width, device.length)
            } else {
                (0.0, 0.0)
            };
            self.devices.push(PendingDevice {
                name: format!("{}{}", prefix, device.name),
                kind,
                model,
                nets,
                width,
                length,
            });
        }

        for instance in &cell.instances {
            let child = design.require_cell(&instance.cell)?;
            let path = format!("{}{}", prefix, instance.name);
            let abstracted = hierarchy
                .subcircuit(self.design_index, &child.name)
                .filter(|_| {
                    !NamePattern::any_matches(&cell.annotations.flatten_instances, &instance.name)
                });

            if let Some(info) = abstracted {
                let mut pins: Vec<Option<usize>> = vec![None; info.port_count()];
                for (port, parent_net) in &instance.connections {
                    let pin = info.pin_of(port).ok_or_else(|| NetEquivError::UnknownPort {
                        cell: child.name.clone(),
                        port: port.clone(),
                    })?;
                    let n = net(self, parent_net);
                    match pins[pin] {
                        Some(existing) if existing != n => self.deferred.push(Deferred {
                            nets: vec![existing, n],
                            error: NetEquivError::SubcircuitPinConflict {
                                instance: path.clone(),
                                pin: info.pin_names[pin].clone(),
                            },
                        }),
                        Some(_) => {}
                        None => pins[pin] = Some(n),
                    }
                }
                for global in &info.globals {
                    if let Some(pin) = info.pin_of(global) {
                        let n = self.intern(global.clone(), 0);
                        match pins[pin] {
                            Some(existing) if existing != n => self.unions.push((existing, n)),
                            Some(_) => {}
                            None => pins[pin] = Some(n),
                        }
                    }
                }
                let nets = pins
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        p.ok_or_else(|| NetEquivError::SubcircuitPinDisconnected {
                            instance: path.clone(),
                            pin: info.pin_names[i].clone(),
                        })
                    })
                    .collect::<Result<Vec<usize>, NetEquivError>>()?;
                self.devices.push(PendingDevice {
                    name: path,
                    kind: PartKind::Subcircuit {
                        id: info.id,
                        cell: child.name.clone(),
                        pins: info.pin_names.clone(),
                    },
                    model: child.name.clone(),
                    nets,
                    width: 0.0,
                    length: 0.0,
                });
                continue;
            }

            let child_local = self.walk(child, &format!("{}/", path), depth + 1)?;
            for (port, parent_net) in &instance.connections {
                let export = child
                    .exports
                    .iter()
                    .find(|e| &e.name == port)
                    .ok_or_else(|| NetEquivError::UnknownPort {
                        cell: child.name.clone(),
                        port: port.clone(),
                    })?;
                let n = net(self, parent_net);
                self.unions.push((child_local[export.net()], n));
            }
            for group in self.connected_export_nets(child, &child_local) {
                self.deferred.push(Deferred {
                    nets: group,
                    error: NetEquivError::ExportAssertion {
                        instance: path.clone(),
                        cell: child.name.clone(),
                    },
                });
            }
        }

        Ok(local)
    }

    fn device_kind(
        &self,
        cell: &CellDescription,
        device: &DeviceDescription,
    ) -> Result<(PartKind, String), NetEquivError> {
        let bad_count = |expected: usize| NetEquivError::BadPinCount {
            device: device.name.clone(),
            kind: device.kind.clone(),
            expected,
            found: device.pins.len(),
        };
        let transistor_model = || {
            device
                .model
                .clone()
                .or_else(|| cell.annotations.transistor_type.clone())
                .unwrap_or_else(|| device.kind.clone())
        };
        let kind = match device.kind.as_str() {
            "nmos" | "pmos" => {
                if device.pins.len() < 3 {
                    return Err(bad_count(3));
                }
                let ty = if device.kind == "nmos" {
                    MosType::Nmos
                } else {
                    MosType::Pmos
                };
                return Ok((
                    PartKind::Mos {
                        ty,
                        stack: device.pins.len() - 2,
                    },
                    transistor_model(),
                ));
            }
            "npn" => PartKind::Bipolar {
                ty: BipolarType::Npn,
            },
            "pnp" => PartKind::Bipolar {
                ty: BipolarType::Pnp,
            },
            "resistor" => {
                if device.pins.len() != 2 {
                    return Err(bad_count(2));
                }
                let model = device
                    .model
                    .clone()
                    .or_else(|| cell.annotations.resistor_type.clone())
                    .unwrap_or_else(|| device.kind.clone());
                return Ok((PartKind::Resistor, model));
            }
            other => {
                return Err(NetEquivError::UnsupportedDevice {
                    device: device.name.clone(),
                    kind: other.to_string(),
                })
            }
        };
        if device.pins.len() != 3 {
            return Err(bad_count(3));
        }
        Ok((kind, transistor_model()))
    }

    /// Net indices of the exports named by each `exports_connected` group.
    fn connected_export_nets(
        &self,
        cell: &CellDescription,
        local: &HashMap<String, usize>,
    ) -> Vec<Vec<usize>> {
        cell.annotations
            .exports_connected
            .iter()
            .map(|patterns| {
                cell.exports
                    .iter()
                    .filter(|e| NamePattern::any_matches(patterns, &e.name))
                    .map(|e| local[e.net()])
                    .collect::<Vec<usize>>()
            })
            .filter(|nets| nets.len() > 1)
            .collect()
    }

    fn finish(self, design: &str, root: &CellDescription) -> Result<Netlist, NetEquivError> {
        let mut classes = UnionFind::<usize>::new(self.nets.len());
        for &(a, b) in &self.unions {
            classes.union(a, b);
        }

        for check in self.deferred {
            let first = classes.find(check.nets[0]);
            if check.nets.iter().any(|&n| classes.find(n) != first) {
                return Err(check.error);
            }
        }

        // representative: shallowest, then shortest, then smallest name
        let mut best: HashMap<usize, usize> = HashMap::new();
        for (i, node) in self.nets.iter().enumerate() {
            let root = classes.find(i);
            let better = match best.get(&root) {
                None => true,
                Some(&b) => {
                    let cur = &self.nets[b];
                    (node.depth, node.name.len(), &node.name)
                        < (cur.depth, cur.name.len(), &cur.name)
                }
            };
            if better {
                best.insert(root, i);
            }
        }

        let mut netlist = Netlist::new(design);
        let mut wire_of: HashMap<usize, WireId> = HashMap::new();
        for i in 0..self.nets.len() {
            let root = classes.find(i);
            if !wire_of.contains_key(&root) {
                let name = self.nets[best[&root]].name.clone();
                wire_of.insert(root, netlist.add_wire(name));
            }
        }
        let resolve = |n: usize| wire_of[&classes.find(n)];

        for device in self.devices {
            let mut pins: Vec<WireId> = device.nets.iter().map(|&n| resolve(n)).collect();
            let kind = match device.kind {
                PartKind::Mos { ty, stack: 1 } if pins[0] == pins[2] => {
                    pins = vec![pins[0], pins[1]];
                    PartKind::TiedMos { ty }
                }
                kind => kind,
            };
            netlist.add_part(
                device.name,
                kind,
                device.model,
                pins,
                device.width,
                device.length,
            )?;
        }

        for port in self.ports {
            netlist.add_port_name(resolve(port.net), port.name);
        }

        netlist.force_wire_match = root.annotations.force_wire_match.clone();
        netlist.force_part_match = root.annotations.force_part_match.clone();
        Ok(netlist)
    }
}
