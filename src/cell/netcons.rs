use tracing::debug;

use super::Cell;
use crate::error::{LookupError, ModelResult, ValidationError};
use crate::filter::Filter;
use crate::wrappers::{ConnSource, NetCon, PointProcess, Seg};

impl Cell {
    fn make_netcon(
        &self,
        name: Option<String>,
        source: ConnSource,
        target: Option<&PointProcess>,
        weight: f64,
        delay: f64,
        threshold: f64,
    ) -> ModelResult<NetCon> {
        self.parts()?;
        if delay < 0.0 {
            return Err(ValidationError::Negative {
                field: "delay".to_string(),
                value: delay,
            }
            .into());
        }
        let hoc_target = target.map(PointProcess::hoc).transpose()?;
        let hoc = self.ctx().create_netcon(source.to_hoc()?, hoc_target)?;
        hoc.set_weight(weight);
        hoc.set_delay(delay);
        hoc.set_threshold(threshold);
        let nc = NetCon::new(
            name,
            hoc,
            self.ctx().clone(),
            source,
            target.cloned(),
            self.downgrade(),
        );
        self.push(|p| &mut p.ncs, nc.clone())?;
        debug!(cell = %self.name(), netcon = nc.name(), "netcon added");
        Ok(nc)
    }

    /// Connects `source` to `target`. A `None` target makes a connection
    /// that only watches its source.
    pub fn add_netcon(
        &self,
        source: impl Into<ConnSource>,
        target: Option<&PointProcess>,
        weight: f64,
        delay: f64,
        threshold: f64,
    ) -> ModelResult<NetCon> {
        self.make_netcon(None, source.into(), target, weight, delay, threshold)
    }

    /// Creates the cell's spike detector on `seg`. A cell has at most one.
    pub fn make_spike_detector(&self, seg: &Seg, threshold: f64) -> ModelResult<NetCon> {
        if self.parts()?.spike_detector.is_some() {
            return Err(ValidationError::SpikeDetectorExists { cell: self.name() }.into());
        }
        let name = format!("SpikeDetector[{}]", self.name());
        let nc = self.make_netcon(
            Some(name),
            ConnSource::Seg(seg.clone()),
            None,
            1.0,
            0.0,
            threshold,
        )?;
        nc.hoc()?.record();
        self.with_parts(|p| p.spike_detector = Some(nc.clone()))?;
        Ok(nc)
    }

    /// The spike detector made by [`make_spike_detector`](Self::make_spike_detector).
    pub fn spike_detector(&self) -> ModelResult<NetCon> {
        self.parts()?
            .spike_detector
            .clone()
            .filter(|nc| !crate::wrappers::Removable::is_removed(nc))
            .ok_or_else(|| {
                LookupError::NotFound {
                    collection: self.collection("spike_detector"),
                    filter: "{all}".to_string(),
                }
                .into()
            })
    }

    /// Spike times seen by the spike detector.
    pub fn spikes(&self) -> ModelResult<Vec<f64>> {
        Ok(self.spike_detector()?.recorded()?.unwrap_or_default())
    }

    /// Live connections in creation order, spike detector included.
    pub fn netcons(&self) -> ModelResult<Vec<NetCon>> {
        self.live(|p| &mut p.ncs)
    }

    /// Connections matching `filter`.
    pub fn filter_netcons(&self, filter: &Filter<NetCon>) -> ModelResult<Vec<NetCon>> {
        self.filter_in("ncs", |p| &mut p.ncs, filter)
    }

    /// Removes the connections matching `filter`.
    pub fn remove_netcons(&self, filter: &Filter<NetCon>) -> ModelResult<usize> {
        self.remove_in("ncs", |p| &mut p.ncs, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SectionSpec;
    use crate::simulator::{Simulation, SimulationContext};

    #[test]
    fn test_netcon_name_and_params() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let cell = Cell::new(&ctx, "cell");
        let soma = cell.add_sec(SectionSpec::new("soma")).unwrap();
        let seg = soma.seg(0.5).unwrap();
        let pp = cell.add_point_process("ExpSyn", &seg, None, &[]).unwrap();

        let nc = cell.add_netcon(seg.clone(), Some(&pp), 0.5, 2.0, -20.0).unwrap();
        assert_eq!(nc.name(), "cell[soma(0.5)]->cell[ExpSyn[soma(0.5)][0]]");
        assert!((nc.weight().unwrap() - 0.5).abs() < 1e-12);
        assert!((nc.delay().unwrap() - 2.0).abs() < 1e-12);
        assert!(cell.add_netcon(ConnSource::None, Some(&pp), 1.0, -1.0, 10.0).is_err());
    }

    #[test]
    fn test_make_event_needs_running_clock() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let cell = Cell::new(&ctx, "cell");
        let soma = cell.add_sec(SectionSpec::new("soma")).unwrap();
        let pp = cell
            .add_point_process("ExpSyn", &soma.seg(0.5).unwrap(), None, &[])
            .unwrap();
        let nc = cell.add_netcon(ConnSource::None, Some(&pp), 1.0, 1.0, 10.0).unwrap();
        assert!(nc.make_event(5.0, true, true).unwrap_err().is_validation());

        Simulation::new(&ctx).run(2.0).unwrap();
        nc.make_event(5.0, true, true).unwrap();
        nc.make_event(5.0, false, false).unwrap();
        let events = nc.hoc().unwrap().pending_events();
        assert_eq!(events.len(), 2);
        assert!((events[0] - 8.0).abs() < 1e-6);
        assert!((events[1] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_spike_detector() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let cell = Cell::new(&ctx, "cell");
        let soma = cell.add_sec(SectionSpec::new("soma")).unwrap();
        assert!(cell.spike_detector().unwrap_err().is_lookup());

        let seg = soma.seg(0.5).unwrap();
        let detector = cell.make_spike_detector(&seg, 0.0).unwrap();
        assert_eq!(detector.name(), "SpikeDetector[cell]");
        assert!(cell.make_spike_detector(&seg, 0.0).unwrap_err().is_validation());
        assert!(cell.spikes().unwrap().is_empty());
    }
}
