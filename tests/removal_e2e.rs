use neuronkit::{
    Cell, Filter, Removable, Sec, SectionSpec, SimulationContext, SynapseSpec,
};

struct Fixture {
    ctx: SimulationContext,
    cell: Cell,
    soma: Sec,
    dend1: Sec,
}

fn fixture() -> Fixture {
    let ctx = SimulationContext::seeded(1).unwrap();
    let cell = Cell::new(&ctx, "cell");
    let soma = cell
        .add_sec(SectionSpec::new("soma").diam(10.0).length(10.0).nseg(10))
        .unwrap();
    let dend1 = cell
        .add_sec(SectionSpec::new("dend1").diam(1.0).length(10.0).nseg(10))
        .unwrap();
    let dend2 = cell
        .add_sec(SectionSpec::new("dend2").diam(1.0).length(10.0).nseg(10))
        .unwrap();
    cell.connect_secs(&dend1, &soma, 0.0, 0.1).unwrap();
    cell.connect_secs(&dend2, &soma, 0.0, 0.9).unwrap();
    Fixture {
        ctx,
        cell,
        soma,
        dend1,
    }
}

fn add_dend3(f: &Fixture) -> Sec {
    let dend3 = f
        .cell
        .add_sec(SectionSpec::new("dend3").diam(1.0).length(10.0).nseg(10))
        .unwrap();
    f.cell.connect_secs(&dend3, &f.soma, 0.0, 0.5).unwrap();
    dend3
}

#[test]
fn removing_synapse_keeps_its_section_in_the_cell() {
    let f = fixture();
    let dend3 = add_dend3(&f);
    let syn = f
        .cell
        .add_synapse(&dend3.seg(0.5).unwrap(), &SynapseSpec::new("Exp2Syn"))
        .unwrap();
    drop(dend3);
    assert_eq!(f.ctx.section_count(), 4);

    syn.remove_now();
    assert_eq!(f.ctx.section_count(), 4);
}

#[test]
fn synapse_then_soma_leaves_three_sections() {
    let f = fixture();
    let dend3 = add_dend3(&f);
    let syn = f
        .cell
        .add_synapse(&dend3.seg(0.5).unwrap(), &SynapseSpec::new("Exp2Syn"))
        .unwrap();
    drop(dend3);

    syn.remove_now();
    f.soma.remove_now();
    assert_eq!(f.ctx.section_count(), 3);
}

#[test]
fn live_synapse_keeps_removed_section_in_engine() {
    let f = fixture();
    let dend3 = add_dend3(&f);
    let syn = f
        .cell
        .add_synapse(&dend3.seg(0.5).unwrap(), &SynapseSpec::new("Exp2Syn"))
        .unwrap();
    drop(dend3);

    assert_eq!(f.cell.remove_secs(&Filter::name("dend3")).unwrap(), 1);
    assert_eq!(f.cell.secs().unwrap().len(), 3);
    assert_eq!(f.ctx.section_count(), 4);

    syn.remove_now();
    assert_eq!(f.ctx.section_count(), 3);
}

#[test]
fn section_without_other_references_is_freed() {
    let f = fixture();
    drop(add_dend3(&f));
    assert_eq!(f.ctx.section_count(), 4);

    f.cell.remove_secs(&Filter::name("dend3")).unwrap();
    assert_eq!(f.cell.secs().unwrap().len(), 3);
    assert_eq!(f.ctx.section_count(), 3);
}

#[test]
fn removing_point_process_clears_it_in_synapse() {
    let f = fixture();
    let dend2 = f.cell.sec("dend2").unwrap();
    let syn = f
        .cell
        .add_synapse(&dend2.seg(0.5).unwrap(), &SynapseSpec::new("Exp2Syn"))
        .unwrap();
    syn.point_process().unwrap().remove_now();

    let from_cell = &f.cell.synapses().unwrap()[0];
    assert!(from_cell.point_process().unwrap().is_removed());
    // the synapse's connection still targets it
    assert_eq!(f.ctx.point_process_count(), 1);

    syn.remove_now();
    assert_eq!(f.ctx.point_process_count(), 0);
}

#[test]
fn removing_parent_keeps_children() {
    let f = fixture();
    f.soma.remove_now();
    assert_eq!(f.ctx.section_count(), 2);

    f.dend1.remove_now();
    assert_eq!(f.ctx.section_count(), 1);
}

#[test]
fn removing_child_only() {
    let f = fixture();
    f.dend1.remove_now();
    assert_eq!(f.ctx.section_count(), 2);
    assert_eq!(f.cell.secs().unwrap().len(), 2);
}

#[test]
fn removing_cell_removes_everything() {
    let f = fixture();
    let dend3 = add_dend3(&f);
    f.cell
        .add_synapse(&dend3.seg(0.5).unwrap(), &SynapseSpec::new("ExpSyn"))
        .unwrap();
    f.cell.make_spike_detector(&f.soma.seg(0.5).unwrap(), 0.0).unwrap();

    f.cell.remove_now();
    assert!(f.cell.is_removed());
    assert!(f.ctx.is_empty());
    assert!(f.cell.secs().unwrap_err().is_lookup());
}

#[test]
fn engine_reference_keeps_section_alive() {
    let f = fixture();
    let hoc_soma = f.soma.hoc().unwrap();
    f.soma.remove_now();
    assert_eq!(f.ctx.section_count(), 3);
    assert!(f.soma.hoc().unwrap_err().is_lookup());

    drop(hoc_soma);
    assert_eq!(f.ctx.section_count(), 2);
}

#[test]
fn removal_is_idempotent() {
    let f = fixture();
    f.dend1.remove_now();
    f.dend1.remove_now();
    assert!(f.dend1.is_removed());
    assert_eq!(f.ctx.section_count(), 2);
}

#[test]
fn second_cell_removal_leaves_first_untouched() {
    let f = fixture();
    let other = Cell::new(&f.ctx, "other");
    for name in ["soma", "dend1", "dend2"] {
        other.add_sec(SectionSpec::new(name)).unwrap();
    }
    assert_eq!(f.ctx.section_count(), 6);

    other.remove_now();
    assert_eq!(f.ctx.section_count(), 3);
}
