use rand::Rng;
use tracing::debug;

use super::Cell;
use crate::dist::Param;
use crate::error::ModelResult;
use crate::filter::Filter;
use crate::wrappers::{
    ConnSource, NetCon, PointProcess, Sec, Seg, SingleSynapse, Synapse, SynapticGroup,
};

/// Description of a synapse: a point process and one incoming connection.
#[derive(Debug, Clone)]
pub struct SynapseSpec {
    mod_name: String,
    source: ConnSource,
    weight: Param,
    delay: Param,
    threshold: Param,
    tag: Option<String>,
    params: Vec<(String, f64)>,
}

impl SynapseSpec {
    /// Synapse of mechanism `mod_name` with no source, weight 1, delay 1 ms
    /// and threshold 10 mV.
    #[must_use]
    pub fn new(mod_name: impl Into<String>) -> Self {
        Self {
            mod_name: mod_name.into(),
            source: ConnSource::None,
            weight: Param::Fixed(1.0),
            delay: Param::Fixed(1.0),
            threshold: Param::Fixed(10.0),
            tag: None,
            params: Vec::new(),
        }
    }

    /// Connection source.
    #[must_use]
    pub fn source(mut self, source: impl Into<ConnSource>) -> Self {
        self.source = source.into();
        self
    }

    /// Connection weight.
    #[must_use]
    pub fn weight(mut self, weight: impl Into<Param>) -> Self {
        self.weight = weight.into();
        self
    }

    /// Connection delay in ms.
    #[must_use]
    pub fn delay(mut self, delay: impl Into<Param>) -> Self {
        self.delay = delay.into();
        self
    }

    /// Source threshold in mV.
    #[must_use]
    pub fn threshold(mut self, threshold: impl Into<Param>) -> Self {
        self.threshold = threshold.into();
        self
    }

    /// Tag of the point process and synapse.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// A RANGE parameter of the point process.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.push((name.into(), value));
        self
    }
}

impl Cell {
    /// Wraps an existing point process and its connections as a synapse.
    ///
    /// The name is the point process name plus a per-mechanism number.
    pub(crate) fn compose_synapse(
        &self,
        point_process: PointProcess,
        netcons: Vec<NetCon>,
        sources: Vec<ConnSource>,
    ) -> ModelResult<SingleSynapse> {
        let n = self.next_number(&format!("syn:{}", point_process.mod_name()))?;
        let name = format!("{}[{n}]", point_process.name());
        let syn = SingleSynapse::new(name, point_process, netcons, sources, self.downgrade());
        self.push(|p| &mut p.syns, syn.clone())?;
        debug!(cell = %self.name(), syn = syn.name(), "synapse added");
        Ok(syn)
    }

    /// Places a synapse on `seg`. Distribution parameters are sampled here.
    pub fn add_synapse(&self, seg: &Seg, spec: &SynapseSpec) -> ModelResult<SingleSynapse> {
        let params: Vec<(&str, f64)> = spec.params.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let pp = self.add_point_process(&spec.mod_name, seg, spec.tag.as_deref(), &params)?;
        let (weight, delay, threshold) = {
            let mut rng = self.ctx().rng();
            (
                spec.weight.resolve(&mut *rng)?,
                spec.delay.resolve(&mut *rng)?,
                spec.threshold.resolve(&mut *rng)?,
            )
        };
        let nc = self.add_netcon(spec.source.clone(), Some(&pp), weight, delay, threshold)?;
        self.compose_synapse(pp, vec![nc], vec![spec.source.clone()])
    }

    /// Places `number` synapses at locations drawn uniformly along the total
    /// length of `secs`.
    pub fn add_random_uniform_synapses(
        &self,
        number: usize,
        secs: &[Sec],
        spec: &SynapseSpec,
    ) -> ModelResult<Vec<SingleSynapse>> {
        let lengths = secs
            .iter()
            .map(|s| s.props().map(|p| p.length))
            .collect::<ModelResult<Vec<f64>>>()?;
        let total: f64 = lengths.iter().sum();
        if secs.is_empty() || total <= 0.0 {
            return Ok(Vec::new());
        }

        let mut result = Vec::with_capacity(number);
        for _ in 0..number {
            let at = self.ctx().rng().gen::<f64>() * total;
            let mut start = 0.0;
            for (sec, length) in secs.iter().zip(&lengths) {
                if start + length > at {
                    let loc = ((at - start) / length).clamp(0.0, 1.0);
                    result.push(self.add_synapse(&sec.seg(loc)?, spec)?);
                    break;
                }
                start += length;
            }
        }
        Ok(result)
    }

    /// Live synapses in creation order.
    pub fn synapses(&self) -> ModelResult<Vec<SingleSynapse>> {
        self.live(|p| &mut p.syns)
    }

    /// Synapses matching `filter`.
    pub fn filter_synapses(&self, filter: &Filter<SingleSynapse>) -> ModelResult<Vec<SingleSynapse>> {
        self.filter_in("syns", |p| &mut p.syns, filter)
    }

    /// Removes the synapses matching `filter`, with their point processes and
    /// connections.
    pub fn remove_synapses(&self, filter: &Filter<SingleSynapse>) -> ModelResult<usize> {
        self.remove_in("syns", |p| &mut p.syns, filter)
    }

    /// Groups synapses sharing one segment. Without a name the group is
    /// numbered per combination of mechanisms.
    pub fn group_synapses(
        &self,
        synapses: Vec<SingleSynapse>,
        name: Option<&str>,
        tag: Option<&str>,
    ) -> ModelResult<SynapticGroup> {
        self.parts()?;
        let mods: Vec<&str> = synapses.iter().map(Synapse::mod_name).collect();
        let key = format!("group:{}", mods.join("+"));
        let name = match name {
            Some(name) => name.to_string(),
            None => self.next_number(&key)?.to_string(),
        };
        let group = SynapticGroup::new(synapses, &name, tag.map(ToString::to_string), self.downgrade())?;
        self.push(|p| &mut p.groups, group.clone())?;
        debug!(cell = %self.name(), group = group.name(), "synaptic group added");
        Ok(group)
    }

    /// Live synaptic groups in creation order.
    pub fn synaptic_groups(&self) -> ModelResult<Vec<SynapticGroup>> {
        self.live(|p| &mut p.groups)
    }

    /// Synaptic groups matching `filter`.
    pub fn filter_synaptic_groups(
        &self,
        filter: &Filter<SynapticGroup>,
    ) -> ModelResult<Vec<SynapticGroup>> {
        self.filter_in("group_syns", |p| &mut p.groups, filter)
    }

    /// Removes the synaptic groups matching `filter` with their members.
    pub fn remove_synaptic_groups(&self, filter: &Filter<SynapticGroup>) -> ModelResult<usize> {
        self.remove_in("group_syns", |p| &mut p.groups, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SectionSpec;
    use crate::dist::Dist;
    use crate::simulator::SimulationContext;
    use crate::wrappers::Removable;

    fn cell_with_soma() -> (Cell, Sec) {
        let cell = Cell::new(&SimulationContext::seeded(5).unwrap(), "cell");
        let soma = cell
            .add_sec(SectionSpec::new("soma").length(100.0).nseg(10))
            .unwrap();
        (cell, soma)
    }

    #[test]
    fn test_add_synapse_composes_parts() {
        let (cell, soma) = cell_with_soma();
        let spec = SynapseSpec::new("Exp2Syn").weight(0.3).tag("ampa");
        let syn = cell.add_synapse(&soma.seg(0.5).unwrap(), &spec).unwrap();

        assert_eq!(syn.name(), "Exp2Syn[soma(0.55)][0][ampa][0]");
        assert_eq!(syn.tag(), Some("ampa"));
        let ncs = syn.netcons().unwrap();
        assert_eq!(ncs.len(), 1);
        assert!((ncs[0].weight().unwrap() - 0.3).abs() < 1e-12);
        assert!(syn.sources().unwrap().is_empty());
        assert_eq!(cell.point_processes().unwrap().len(), 1);
        assert_eq!(cell.netcons().unwrap().len(), 1);
    }

    #[test]
    fn test_synapse_weights_are_drawn_per_synapse() {
        let (cell, soma) = cell_with_soma();
        let spec = SynapseSpec::new("ExpSyn").weight(Dist::uniform(0.0, 1.0).unwrap());
        let a = cell.add_synapse(&soma.seg(0.5).unwrap(), &spec).unwrap();
        let b = cell.add_synapse(&soma.seg(0.5).unwrap(), &spec).unwrap();
        let wa = a.netcons().unwrap()[0].weight().unwrap();
        let wb = b.netcons().unwrap()[0].weight().unwrap();
        assert!((wa - wb).abs() > f64::EPSILON);
    }

    #[test]
    fn test_add_netcon_to_synapse_records_source() {
        let (cell, soma) = cell_with_soma();
        let syn = cell
            .add_synapse(&soma.seg(0.5).unwrap(), &SynapseSpec::new("ExpSyn"))
            .unwrap();
        syn.add_netcon(ConnSource::Seg(soma.seg(0.1).unwrap()), 1.0, 1.0, 10.0)
            .unwrap();
        assert_eq!(syn.netcons().unwrap().len(), 2);
        assert_eq!(syn.sources().unwrap().len(), 1);
    }

    #[test]
    fn test_random_uniform_synapses() {
        let (cell, soma) = cell_with_soma();
        let dend = cell.add_sec(SectionSpec::new("dend").length(300.0)).unwrap();
        let syns = cell
            .add_random_uniform_synapses(20, &[soma, dend], &SynapseSpec::new("ExpSyn"))
            .unwrap();
        assert_eq!(syns.len(), 20);
        assert_eq!(cell.ctx().point_process_count(), 20);
    }

    #[test]
    fn test_remove_synapse_removes_its_parts() {
        let (cell, soma) = cell_with_soma();
        let syn = cell
            .add_synapse(&soma.seg(0.5).unwrap(), &SynapseSpec::new("ExpSyn"))
            .unwrap();
        assert_eq!(cell.remove_synapses(&Filter::new().field("mod_name", "ExpSyn")).unwrap(), 1);
        assert!(syn.is_removed());
        assert_eq!(cell.ctx().point_process_count(), 0);
        assert_eq!(cell.ctx().netcon_count(), 0);
        assert!(cell.point_processes().unwrap().is_empty());
    }

    #[test]
    fn test_group_synapses() {
        let (cell, soma) = cell_with_soma();
        let seg = soma.seg(0.5).unwrap();
        let ampa = cell.add_synapse(&seg, &SynapseSpec::new("ExpSyn")).unwrap();
        let nmda = cell.add_synapse(&seg, &SynapseSpec::new("Exp2Syn")).unwrap();
        let group = cell.group_synapses(vec![ampa, nmda], None, Some("glu")).unwrap();
        assert_eq!(group.name(), "ExpSyn_Exp2Syn[0]");
        assert!(group.get("Exp2Syn").unwrap().is_some());

        let other = cell
            .add_synapse(&soma.seg(0.1).unwrap(), &SynapseSpec::new("ExpSyn"))
            .unwrap();
        let mixed = cell.add_synapse(&seg, &SynapseSpec::new("Exp2Syn")).unwrap();
        let err = cell.group_synapses(vec![other, mixed], None, None).unwrap_err();
        assert!(err.is_type());
        assert!(cell.group_synapses(Vec::new(), None, None).unwrap_err().is_validation());

        assert_eq!(cell.remove_synaptic_groups(&Filter::tag("glu")).unwrap(), 1);
        assert_eq!(cell.synapses().unwrap().len(), 2);
    }
}
