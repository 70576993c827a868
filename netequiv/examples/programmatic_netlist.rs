//! Build two netlists in code and compare them without any input files.
//!
//! The schematic has a NAND2 pull-down as two series transistors; the
//! layout draws it as one stacked device. Series merging makes them match.

use anyhow::{bail, Context, Result};
use netequiv::netlist::PortCharacteristic;
use netequiv::prelude::*;
use netequiv::{render_human, MosType, PartKind};

fn mos(ty: MosType, stack: usize) -> PartKind {
    PartKind::Mos { ty, stack }
}

fn export_all(n: &mut Netlist, names: &[(&str, PortCharacteristic)]) -> Result<()> {
    for (name, characteristic) in names {
        let wire = n
            .find_wire(name)
            .with_context(|| format!("no wire named {}", name))?;
        n.add_export(wire, *name, *characteristic, false);
    }
    Ok(())
}

fn schematic() -> Result<Netlist> {
    let mut n = Netlist::new("schematic");
    let [y, a, b, mid, vdd, gnd] = ["y", "a", "b", "mid", "vdd", "gnd"].map(|w| n.add_wire(w));
    n.add_part("MP1", mos(MosType::Pmos, 1), "pch", vec![y, a, vdd], 2.0, 0.18)?;
    n.add_part("MP2", mos(MosType::Pmos, 1), "pch", vec![y, b, vdd], 2.0, 0.18)?;
    n.add_part("MN1", mos(MosType::Nmos, 1), "nch", vec![y, a, mid], 1.0, 0.18)?;
    n.add_part("MN2", mos(MosType::Nmos, 1), "nch", vec![mid, b, gnd], 1.0, 0.18)?;
    Ok(n)
}

fn layout() -> Result<Netlist> {
    let mut n = Netlist::new("layout");
    let [out, in_a, in_b, pwr, vss] = ["y", "a", "b", "vdd", "gnd"].map(|w| n.add_wire(w));
    n.add_part("P_a", mos(MosType::Pmos, 1), "pch", vec![pwr, in_a, out], 2.0, 0.18)?;
    n.add_part("P_b", mos(MosType::Pmos, 1), "pch", vec![pwr, in_b, out], 2.0, 0.18)?;
    n.add_part("N_ab", mos(MosType::Nmos, 2), "nch", vec![out, in_a, in_b, vss], 1.0, 0.36)?;
    Ok(n)
}

fn main() -> Result<()> {
    let ports = [
        ("a", PortCharacteristic::Input),
        ("b", PortCharacteristic::Input),
        ("y", PortCharacteristic::Output),
        ("vdd", PortCharacteristic::Power),
        ("gnd", PortCharacteristic::Ground),
    ];
    let mut sch = schematic()?;
    let mut lay = layout()?;
    export_all(&mut sch, &ports)?;
    export_all(&mut lay, &ports)?;

    let options = CompareOptions {
        check_sizes: true,
        ..Default::default()
    };
    let result =
        NetEquivCore::compare_netlists("nand2", vec![sch, lay], &options, &AbortSignal::new())
            .context("comparing nand2")?;
    print!("{}", render_human(&result, options.max_items_to_print));

    if !result.is_match() {
        bail!("nand2 netlists are not equivalent");
    }
    Ok(())
}
