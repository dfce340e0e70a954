//! Expansion of a connection request into synapses.

use std::fmt;

use tracing::{debug, info};

use super::params::{ConnParams, Rule, SynAdder};
use super::Population;
use crate::cell::Cell;
use crate::error::{LookupError, ModelError, ModelResult, ValidationError};
use crate::wrappers::{AnySynapse, ConnSource, Sec, Seg, SingleSynapse};

/// Where synapses may be placed.
///
/// Sections and cells stand for their segments without the 0 and 1 ends.
#[derive(Debug, Clone)]
pub enum Target {
    /// Explicit segments.
    Segs(Vec<Seg>),
    /// Inner segments of these sections.
    Secs(Vec<Sec>),
    /// Inner segments of every section of these cells.
    Cells(Vec<Cell>),
}

impl Target {
    fn into_segs(self) -> ModelResult<Vec<Seg>> {
        match self {
            Self::Segs(segs) => Ok(segs),
            Self::Secs(secs) => {
                let mut segs = Vec::new();
                for sec in &secs {
                    segs.extend(sec.inner_segs()?);
                }
                Ok(segs)
            }
            Self::Cells(cells) => {
                let mut segs = Vec::new();
                for cell in &cells {
                    for sec in cell.secs()? {
                        segs.extend(sec.inner_segs()?);
                    }
                }
                Ok(segs)
            }
        }
    }
}

impl From<Seg> for Target {
    fn from(seg: Seg) -> Self {
        Self::Segs(vec![seg])
    }
}

impl From<Vec<Seg>> for Target {
    fn from(segs: Vec<Seg>) -> Self {
        Self::Segs(segs)
    }
}

impl From<Sec> for Target {
    fn from(sec: Sec) -> Self {
        Self::Secs(vec![sec])
    }
}

impl From<Vec<Sec>> for Target {
    fn from(secs: Vec<Sec>) -> Self {
        Self::Secs(secs)
    }
}

impl From<Cell> for Target {
    fn from(cell: Cell) -> Self {
        Self::Cells(vec![cell])
    }
}

impl From<Vec<Cell>> for Target {
    fn from(cells: Vec<Cell>) -> Self {
        Self::Cells(cells)
    }
}

type SynapticFn<'p> = Box<dyn FnMut(&[SingleSynapse]) + 'p>;

/// Builder of one connection request on a [`Population`].
///
/// Obtained from [`Population::connect`]. Nothing is created until
/// [`build`](Self::build), which consumes the connector.
#[must_use = "a connector does nothing until built"]
pub struct Connector<'p> {
    population: &'p mut Population,
    params: ConnParams,
    sources: Vec<ConnSource>,
    target: Option<Target>,
    adders: Vec<SynAdder>,
    tag: Option<String>,
    synaptic_fn: Option<SynapticFn<'p>>,
    group: Option<Option<String>>,
}

impl<'p> Connector<'p> {
    pub(crate) fn new(population: &'p mut Population, params: ConnParams) -> Self {
        Self {
            population,
            params,
            sources: Vec::new(),
            target: None,
            adders: Vec::new(),
            tag: None,
            synaptic_fn: None,
            group: None,
        }
    }

    /// Sources of the connections. Without sources every synapse gets a
    /// sourceless connection and the rule is not used.
    pub fn set_source<S: Into<ConnSource>>(mut self, sources: impl IntoIterator<Item = S>) -> Self {
        self.sources = sources
            .into_iter()
            .map(Into::into)
            .filter(|s: &ConnSource| !s.is_none())
            .collect();
        self
    }

    /// Candidate segments for the synapses, grouped by owning cell.
    pub fn set_target(mut self, target: impl Into<Target>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Registers a mechanism placed on every chosen target segment.
    pub fn add_synapse(mut self, adder: SynAdder) -> Self {
        self.adders.push(adder);
        self
    }

    /// Tags every point process and synapse made.
    pub fn set_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Calls `f` with the synapses made on each target segment, before
    /// grouping.
    pub fn set_synaptic_function(mut self, f: impl FnMut(&[SingleSynapse]) + 'p) -> Self {
        self.synaptic_fn = Some(Box::new(f));
        self
    }

    /// Groups the synapses made on each target segment into one
    /// [`SynapticGroup`](crate::SynapticGroup).
    pub fn group_synapses(mut self, name: Option<&str>) -> Self {
        self.group = Some(name.map(ToString::to_string));
        self
    }

    /// Overrides the synapse count per connected pair.
    pub fn syn_num_per_cell_source(mut self, count: impl Into<crate::dist::SynCount>) -> Self {
        self.params.syn_num_per_cell_source = count.into();
        self
    }

    /// Creates the synapses and adds them to the population.
    ///
    /// Random parameters are drawn here, once per object made.
    pub fn build(mut self) -> ModelResult<Vec<AnySynapse>> {
        if self.population.cells.is_empty() {
            return Err(LookupError::EmptyPopulation {
                population: self.population.name.clone(),
            }
            .into());
        }
        self.params.cell_connection_proba.validate()?;

        let segs = match self.target.take() {
            Some(target) => target.into_segs()?,
            None => Vec::new(),
        };
        let by_cell = group_by_cell(segs)?;

        if self.params.rule == Rule::One
            && !self.sources.is_empty()
            && self.sources.len() != by_cell.len()
        {
            return Err(ValidationError::RuleSizeMismatch {
                sources: self.sources.len(),
                targets: by_cell.len(),
            }
            .into());
        }

        let mut result = Vec::new();
        for (i, (cell, segs)) in by_cell.iter().enumerate() {
            let current: Vec<ConnSource> = if self.sources.is_empty() {
                vec![ConnSource::None]
            } else {
                match self.params.rule {
                    Rule::All => self.sources.clone(),
                    Rule::One => vec![self.sources[i].clone()],
                }
            };

            for source in &current {
                let drawn = {
                    let mut rng = cell.ctx().rng();
                    if self.params.cell_connection_proba.decide(&mut *rng)? {
                        let mean = self.params.seg_dist.draw_mean(&mut *rng);
                        let syn_num = self.params.syn_num_per_cell_source.resolve(&mut *rng)?;
                        Some((mean, syn_num))
                    } else {
                        None
                    }
                };
                let Some((mean, syn_num)) = drawn else {
                    continue;
                };

                for _ in 0..syn_num {
                    let picked = {
                        let mut rng = cell.ctx().rng();
                        self.params.seg_dist.select(segs.len(), mean, &mut *rng)?
                    };
                    for index in picked {
                        let syns = self.make_synapses(cell, &segs[index], source)?;
                        result.extend(self.finish_segment(cell, syns)?);
                    }
                }
            }
        }

        info!(
            population = %self.population.name,
            rule = %self.params.rule,
            target_cells = by_cell.len(),
            synapses = result.len(),
            "connector built"
        );
        self.population.syns.extend(result.iter().cloned());
        Ok(result)
    }

    /// One synapse per adder on `seg`, each on its own spine if asked.
    fn make_synapses(
        &self,
        cell: &Cell,
        seg: &Seg,
        source: &ConnSource,
    ) -> ModelResult<Vec<SingleSynapse>> {
        let mut syns = Vec::with_capacity(self.adders.len());
        for adder in &self.adders {
            let target = match &adder.spine {
                Some(spine) => {
                    let (head_nseg, neck_nseg) = spine.resolve(&mut *cell.ctx().rng())?;
                    let spine = cell
                        .add_spines(std::slice::from_ref(seg), head_nseg, neck_nseg)?
                        .into_iter()
                        .next()
                        .ok_or_else(|| ModelError::internal("spine was not created"))?;
                    spine.head()?.seg(1.0)?
                }
                None => seg.clone(),
            };

            let params: Vec<(&str, f64)> =
                adder.params.iter().map(|(k, v)| (k.as_str(), *v)).collect();
            let pp = cell.add_point_process(&adder.mod_name, &target, self.tag.as_deref(), &params)?;

            let mut netcons = Vec::new();
            let mut sources = Vec::new();
            for nc_params in adder.netcon_params() {
                let nc_source = nc_params.custom_source.clone().unwrap_or_else(|| source.clone());
                let (weight, delay, threshold) = {
                    let mut rng = cell.ctx().rng();
                    (
                        nc_params.weight.resolve(&mut *rng)?,
                        nc_params.delay.resolve(&mut *rng)?,
                        nc_params.threshold.resolve(&mut *rng)?,
                    )
                };
                netcons.push(cell.add_netcon(nc_source.clone(), Some(&pp), weight, delay, threshold)?);
                sources.push(nc_source);
            }
            syns.push(cell.compose_synapse(pp, netcons, sources)?);
        }
        Ok(syns)
    }

    fn finish_segment(
        &mut self,
        cell: &Cell,
        syns: Vec<SingleSynapse>,
    ) -> ModelResult<Vec<AnySynapse>> {
        if let Some(f) = self.synaptic_fn.as_mut() {
            f(&syns);
        }
        match &self.group {
            Some(name) if !syns.is_empty() => {
                let group = cell.group_synapses(syns, name.as_deref(), self.tag.as_deref())?;
                debug!(cell = %cell.name(), group = %group, "segment synapses grouped");
                Ok(vec![AnySynapse::Group(group)])
            }
            _ => Ok(syns.into_iter().map(AnySynapse::Single).collect()),
        }
    }
}

impl fmt::Debug for Connector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("population", &self.population.name)
            .field("params", &self.params)
            .field("sources", &self.sources.len())
            .field("adders", &self.adders)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

/// Splits `segs` by owning cell, cells in order of first appearance.
fn group_by_cell(segs: Vec<Seg>) -> ModelResult<Vec<(Cell, Vec<Seg>)>> {
    let mut groups: Vec<(Cell, Vec<Seg>)> = Vec::new();
    for seg in segs {
        let cell = seg
            .cell()
            .ok_or_else(|| ModelError::removed(format!("cell of {seg}")))?;
        match groups.iter_mut().find(|(c, _)| c.same_as(&cell)) {
            Some((_, members)) => members.push(seg),
            None => groups.push((cell, vec![seg])),
        }
    }
    Ok(groups)
}
