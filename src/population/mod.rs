//! Populations of cells built from one template, and the connectors wiring
//! them.
//!
//! ```ignore
//! let mut pop = Population::new(&ctx, "pop_0");
//! pop.add_cells(10, |ctx| template(ctx))?;
//! let targets: Vec<Sec> = ...;
//! pop.connect(ConnParams::new().cell_connection_proba(0.5))
//!     .set_source([stim])
//!     .set_target(targets)
//!     .add_synapse(SynAdder::new("Exp2Syn").add_netcon(NetconParams::new().weight(0.01)))
//!     .build()?;
//! ```

mod connector;
mod params;

use std::cell::Cell as Flag;

use tracing::debug;

use crate::cell::Cell;
use crate::error::{ModelError, ModelResult, ValidationError};
use crate::filter::{self, Filter};
use crate::simulator::SimulationContext;
use crate::wrappers::{AnySynapse, Removable};

pub use connector::{Connector, Target};
pub use params::{ConnParams, NetconParams, Rule, SpineParams, SynAdder};

/// Named cells and every synapse its connectors made.
#[derive(Debug)]
pub struct Population {
    ctx: SimulationContext,
    name: String,
    cells: Vec<Cell>,
    syns: Vec<AnySynapse>,
    cell_counter: usize,
    removed: Flag<bool>,
}

impl Population {
    /// Empty population in `ctx`.
    #[must_use]
    pub fn new(ctx: &SimulationContext, name: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            name: name.into(),
            cells: Vec::new(),
            syns: Vec::new(),
            cell_counter: 0,
            removed: Flag::new(false),
        }
    }

    /// Population name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds `num` cells made by `template`, renamed `pop[cell][i]`. A blank
    /// template name becomes `cell`. Fails once the population is removed.
    pub fn add_cells<F>(&mut self, num: usize, mut template: F) -> ModelResult<Vec<Cell>>
    where
        F: FnMut(&SimulationContext) -> ModelResult<Cell>,
    {
        if self.removed.get() {
            return Err(ModelError::removed(format!("population '{}'", self.name)));
        }
        let mut added = Vec::with_capacity(num);
        for _ in 0..num {
            let cell = template(&self.ctx)?;
            if !cell.ctx().same_as(&self.ctx) {
                return Err(ValidationError::InvalidConfig {
                    reason: format!(
                        "cell '{}' was made in another context than population '{}'",
                        cell.name(),
                        self.name
                    ),
                }
                .into());
            }
            let base = cell.name();
            let base = if base.trim().is_empty() { "cell" } else { base.as_str() };
            cell.set_name(format!("{}[{base}][{}]", self.name, self.cell_counter));
            self.cell_counter += 1;
            self.cells.push(cell.clone());
            added.push(cell);
        }
        debug!(population = %self.name, added = added.len(), "cells added");
        Ok(added)
    }

    /// Live cells in creation order.
    #[must_use]
    pub fn cells(&self) -> Vec<Cell> {
        self.cells.iter().filter(|c| !c.is_removed()).cloned().collect()
    }

    /// Cells matching `filter`.
    pub fn filter_cells(&self, filter: &Filter<Cell>) -> ModelResult<Vec<Cell>> {
        filter::filter(&format!("{}.cells", self.name), &self.cells(), filter)
    }

    /// Live synapses made by the connectors, groups counted once.
    #[must_use]
    pub fn syns(&self) -> Vec<AnySynapse> {
        self.syns.iter().filter(|s| !s.is_removed()).cloned().collect()
    }

    /// Starts a connection request targeting this population.
    pub fn connect(&mut self, params: ConnParams) -> Connector<'_> {
        Connector::new(self, params)
    }
}

impl Removable for Population {
    fn remove_now(&self) {
        self.syns.remove_now();
        self.cells.remove_now();
        self.removed.set(true);
        debug!(population = %self.name, "population removed");
    }

    fn is_removed(&self) -> bool {
        self.removed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SectionSpec;
    use crate::dist::{ConnectionProba, SegDist};
    use crate::simulator::NetStimParams;
    use crate::wrappers::Synapse;
    use crate::StimCell;

    fn template(ctx: &SimulationContext) -> ModelResult<Cell> {
        let cell = Cell::new(ctx, "cell");
        cell.add_sec(SectionSpec::new("soma").length(20.0).diam(20.0))?;
        let dend = cell.add_sec(SectionSpec::new("dend").length(200.0).nseg(4))?;
        cell.connect_secs(&dend, &cell.sec("soma")?, 0.0, 1.0)?;
        Ok(cell)
    }

    fn dends(pop: &Population) -> Vec<crate::Sec> {
        pop.cells().iter().map(|c| c.sec("dend").unwrap()).collect()
    }

    #[test]
    fn test_cell_names() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let mut pop = Population::new(&ctx, "pop_1");
        pop.add_cells(2, |ctx| Ok(Cell::new(ctx, "  "))).unwrap();
        pop.add_cells(1, |ctx| Ok(Cell::new(ctx, "pyr"))).unwrap();
        let names: Vec<String> = pop.cells().iter().map(Cell::name).collect();
        assert_eq!(names, ["pop_1[cell][0]", "pop_1[cell][1]", "pop_1[pyr][2]"]);
    }

    #[test]
    fn test_build_on_empty_population_fails() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let mut pop = Population::new(&ctx, "empty");
        let err = pop
            .connect(ConnParams::new())
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap_err();
        assert!(err.is_lookup());
    }

    #[test]
    fn test_all_rule_connects_every_pair() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let mut src = Population::new(&ctx, "src");
        src.add_cells(3, template).unwrap();
        let sources: Vec<_> = src
            .cells()
            .iter()
            .map(|c| c.sec("soma").unwrap().seg(0.5).unwrap())
            .collect();

        let mut pop = Population::new(&ctx, "dst");
        pop.add_cells(4, template).unwrap();
        let targets = dends(&pop);
        let syns = pop
            .connect(ConnParams::new())
            .set_source(sources)
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap();
        assert_eq!(syns.len(), 12);
        assert_eq!(pop.syns().len(), 12);
        assert_eq!(ctx.netcon_count(), 12);
    }

    #[test]
    fn test_one_rule_needs_equal_sizes() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let stim = StimCell::new(&ctx, "stim");
        let stims: Vec<_> = (0..2)
            .map(|_| stim.make_netstim(NetStimParams::default()).unwrap())
            .collect();

        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(3, template).unwrap();
        let targets = dends(&pop);
        let err = pop
            .connect(ConnParams::new().rule(Rule::One))
            .set_source(stims.clone())
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap_err();
        assert!(err.is_validation());

        let targets: Vec<_> = dends(&pop).into_iter().take(2).collect();
        let syns = pop
            .connect(ConnParams::new().rule(Rule::One))
            .set_source(stims)
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap();
        assert_eq!(syns.len(), 2);
        let first = syns[0].as_single().unwrap().sources().unwrap();
        assert_eq!(first[0].to_string(), "stim[NetStim][0]");
    }

    #[test]
    fn test_zero_probability_connects_nothing() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(5, template).unwrap();
        let targets = dends(&pop);
        let syns = pop
            .connect(ConnParams::new().cell_connection_proba(0.0))
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap();
        assert!(syns.is_empty());

        let targets = dends(&pop);
        let err = pop
            .connect(ConnParams::new().cell_connection_proba(ConnectionProba::Fixed(1.5)))
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_seg_dist_all_and_syn_num() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(2, template).unwrap();
        let targets = dends(&pop);
        let syns = pop
            .connect(ConnParams::new().seg_dist(SegDist::All))
            .syn_num_per_cell_source(2_usize)
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap();
        // 2 cells x 2 rounds x 4 inner segments
        assert_eq!(syns.len(), 16);
    }

    #[test]
    fn test_spines_tags_groups_and_synaptic_function() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(2, template).unwrap();
        let sections_before = ctx.section_count();
        let targets = dends(&pop);

        let mut seen = 0;
        let syns = pop
            .connect(ConnParams::new())
            .set_target(targets)
            .set_tag("glu")
            .add_synapse(
                SynAdder::new("ExpSyn")
                    .add_netcon(NetconParams::new().weight(0.5))
                    .add_netcon(NetconParams::new().weight(2.0)),
            )
            .add_synapse(SynAdder::new("Exp2Syn").add_point_process_params("tau2", 4.0))
            .set_synaptic_function(|syns| seen += syns.len())
            .group_synapses(Some("ampa_nmda"))
            .build()
            .unwrap();

        assert_eq!(seen, 4);
        assert_eq!(syns.len(), 2);
        let group = syns[0].as_group().unwrap();
        assert_eq!(group.name(), "ExpSyn_Exp2Syn[ampa_nmda]");
        assert_eq!(group.tag(), Some("glu"));
        let expsyn = group.get("ExpSyn").unwrap().unwrap();
        assert_eq!(expsyn.netcons().unwrap().len(), 2);
        let exp2syn = group.get("Exp2Syn").unwrap().unwrap();
        let tau2 = exp2syn.point_process().unwrap().param("tau2").unwrap();
        assert!((tau2 - 4.0).abs() < 1e-12);
        assert_eq!(ctx.section_count(), sections_before);

        let targets = dends(&pop);
        pop.connect(ConnParams::new())
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn").spine_params(2, 1))
            .build()
            .unwrap();
        assert_eq!(ctx.section_count(), sections_before + 4);
    }

    #[test]
    fn test_remove_population() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(3, template).unwrap();
        let targets = dends(&pop);
        pop.connect(ConnParams::new())
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap();
        assert_eq!(ctx.section_count(), 6);

        assert!(!pop.is_removed());
        pop.remove_now();
        assert!(pop.is_removed());
        assert!(pop.cells().is_empty());
        assert_eq!(ctx.section_count(), 0);
        assert_eq!(ctx.point_process_count(), 0);
        assert!(pop.add_cells(1, template).unwrap_err().is_lookup());
    }

    #[test]
    fn test_fresh_population_is_not_removed() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let mut pop = Population::new(&ctx, "pop");
        assert!(!pop.is_removed());

        let cells = pop.add_cells(2, template).unwrap();
        // removing every cell by hand does not remove the population
        cells.remove_now();
        assert!(!pop.is_removed());
        pop.add_cells(1, template).unwrap();
        assert_eq!(pop.cells().len(), 1);
        assert_eq!(pop.cells()[0].name(), "pop[cell][2]");

        pop.remove_now();
        pop.remove_now();
        assert!(pop.is_removed());
    }

    #[test]
    fn test_spine_counts_drawn_per_spine() {
        let ctx = SimulationContext::seeded(8).unwrap();
        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(3, template).unwrap();
        let targets = dends(&pop);
        pop.connect(ConnParams::new().seg_dist(SegDist::All))
            .set_target(targets)
            .add_synapse(
                SynAdder::new("ExpSyn").spine_params(crate::Dist::uniform(1.0, 6.0).unwrap(), 1),
            )
            .build()
            .unwrap();

        let heads: Vec<usize> = pop
            .cells()
            .iter()
            .flat_map(|c| c.spines().unwrap())
            .map(|s| s.head().unwrap().props().unwrap().nseg)
            .collect();
        // 3 cells x 4 inner segments
        assert_eq!(heads.len(), 12);
        assert!(heads.iter().all(|n| (1..=6).contains(n)));
        assert!(heads.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn test_vecstim_sources() {
        let ctx = SimulationContext::seeded(3).unwrap();
        let stim = StimCell::new(&ctx, "player");
        let vecstim = stim.make_vecstim(&[5.0, 10.0, 20.0]).unwrap();

        let mut pop = Population::new(&ctx, "pop");
        pop.add_cells(2, template).unwrap();
        let targets = dends(&pop);
        let syns = pop
            .connect(ConnParams::new())
            .set_source([vecstim.clone()])
            .set_target(targets)
            .add_synapse(SynAdder::new("ExpSyn"))
            .build()
            .unwrap();
        assert_eq!(syns.len(), 2);

        let single = syns[0].as_single().unwrap();
        let crate::ConnSource::VecStim(source) = &single.sources().unwrap()[0] else {
            panic!("expected a vecstim source");
        };
        assert!(source.same_as(&vecstim));
        let nc = single.netcons().unwrap()[0].hoc().unwrap();
        assert!(matches!(
            nc.source(),
            crate::simulator::HocNetConSource::VecStim(hoc) if hoc.times() == vec![5.0, 10.0, 20.0]
        ));
        assert!(single.netcons().unwrap()[0].name().starts_with("player[VecStim][0]->"));
    }
}
