use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{ModelResult, ValidationError};
use crate::filter::{self, Filter};
use crate::simulator::{NetStimParams, SimulationContext};
use crate::wrappers::{NetStim, Release, Removable, Slot, VecStim};

struct StimParts {
    stims: Vec<NetStim>,
    vstims: Vec<VecStim>,
}

impl Release for StimParts {
    fn release(self) {
        self.stims.remove_now();
        self.vstims.remove_now();
    }
}

struct StimInner {
    ctx: SimulationContext,
    name: RefCell<String>,
    parts: Slot<StimParts>,
}

/// A cell made only of spike train generators and spike time players.
#[derive(Clone)]
pub struct StimCell {
    inner: Rc<StimInner>,
}

impl StimCell {
    /// Creates an empty stimulus cell in `ctx`.
    #[must_use]
    pub fn new(ctx: &SimulationContext, name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(StimInner {
                ctx: ctx.clone(),
                name: RefCell::new(name.into()),
                parts: Slot::new(StimParts {
                    stims: Vec::new(),
                    vstims: Vec::new(),
                }),
            }),
        }
    }

    /// Cell name.
    #[must_use]
    pub fn name(&self) -> String {
        self.inner.name.borrow().clone()
    }

    pub(crate) fn set_name(&self, name: String) {
        *self.inner.name.borrow_mut() = name;
    }

    /// Adds a generator. Generators must exist before the clock starts.
    pub fn make_netstim(&self, params: NetStimParams) -> ModelResult<NetStim> {
        if self.inner.ctx.t() > 0.0 {
            return Err(ValidationError::StimulusAfterRun.into());
        }
        let hoc = self.inner.ctx.create_netstim(params)?;
        self.inner.parts.with_mut(self, |p| {
            let stim = NetStim::new(p.stims.len().to_string(), self.name(), hoc);
            p.stims.push(stim.clone());
            debug!(cell = %self.name(), stim = stim.name(), "netstim added");
            stim
        })
    }

    /// Adds a player of the given spike times in ms. Times must be finite,
    /// non-negative and ascending. Players must exist before the clock starts.
    pub fn make_vecstim(&self, times: &[f64]) -> ModelResult<VecStim> {
        if self.inner.ctx.t() > 0.0 {
            return Err(ValidationError::StimulusAfterRun.into());
        }
        if let Some(bad) = times.iter().find(|t| !(t.is_finite() && **t >= 0.0)) {
            return Err(ValidationError::InvalidSpikeTimes {
                reason: format!("time {bad}"),
            }
            .into());
        }
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(ValidationError::InvalidSpikeTimes {
                reason: "unsorted times".to_string(),
            }
            .into());
        }
        let hoc = self.inner.ctx.create_vecstim(times.to_vec())?;
        self.inner.parts.with_mut(self, |p| {
            let stim = VecStim::new(p.vstims.len().to_string(), self.name(), hoc);
            p.vstims.push(stim.clone());
            debug!(cell = %self.name(), stim = stim.name(), spikes = times.len(), "vecstim added");
            stim
        })
    }

    /// Live spike time players in creation order.
    pub fn vecstims(&self) -> ModelResult<Vec<VecStim>> {
        self.inner.parts.with_mut(self, |p| {
            p.vstims.retain(|s| !s.is_removed());
            p.vstims.clone()
        })
    }

    /// Players matching `filter`.
    pub fn filter_vecstims(&self, filter: &Filter<VecStim>) -> ModelResult<Vec<VecStim>> {
        filter::filter(&format!("{}.vss", self.name()), &self.vecstims()?, filter)
    }

    /// Live generators in creation order.
    pub fn netstims(&self) -> ModelResult<Vec<NetStim>> {
        self.inner.parts.with_mut(self, |p| {
            p.stims.retain(|s| !s.is_removed());
            p.stims.clone()
        })
    }

    /// Generators matching `filter`.
    pub fn filter_netstims(&self, filter: &Filter<NetStim>) -> ModelResult<Vec<NetStim>> {
        filter::filter(&format!("{}.nss", self.name()), &self.netstims()?, filter)
    }
}

impl Removable for StimCell {
    fn remove_now(&self) {
        self.inner.parts.release();
    }

    fn is_removed(&self) -> bool {
        self.inner.parts.is_empty()
    }
}

impl fmt::Display for StimCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name.borrow())
    }
}

impl fmt::Debug for StimCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StimCell")
            .field("name", &*self.inner.name.borrow())
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::Simulation;

    #[test]
    fn test_netstims_are_numbered() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let stim = StimCell::new(&ctx, "stim");
        let a = stim.make_netstim(NetStimParams::default()).unwrap();
        let b = stim
            .make_netstim(NetStimParams {
                start: 10.0,
                ..NetStimParams::default()
            })
            .unwrap();
        assert_eq!(a.name(), "0");
        assert_eq!(b.to_string(), "stim[NetStim][1]");
        assert_eq!(stim.filter_netstims(&Filter::name("1")).unwrap().len(), 1);
        assert_eq!(ctx.netstim_count(), 2);

        stim.remove_now();
        assert_eq!(ctx.netstim_count(), 0);
        assert!(a.is_removed());
    }

    #[test]
    fn test_no_netstim_after_run() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let stim = StimCell::new(&ctx, "stim");
        Simulation::new(&ctx).run(1.0).unwrap();
        let err = stim.make_netstim(NetStimParams::default()).unwrap_err();
        assert!(err.is_validation());
        assert!(stim.make_vecstim(&[5.0]).unwrap_err().is_validation());
        assert_eq!(ctx.vecstim_count(), 0);
    }

    #[test]
    fn test_vecstims_are_numbered_apart_from_netstims() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let stim = StimCell::new(&ctx, "stim");
        stim.make_netstim(NetStimParams::default()).unwrap();
        let a = stim.make_vecstim(&[1.0, 5.0, 5.0, 12.5]).unwrap();
        let b = stim.make_vecstim(&[]).unwrap();
        assert_eq!(a.name(), "0");
        assert_eq!(b.to_string(), "stim[VecStim][1]");
        assert_eq!(a.times().unwrap(), vec![1.0, 5.0, 5.0, 12.5]);
        assert_eq!(stim.filter_vecstims(&Filter::name("1")).unwrap().len(), 1);
        assert_eq!(ctx.vecstim_count(), 2);

        b.remove_now();
        assert_eq!(stim.vecstims().unwrap().len(), 1);
        stim.remove_now();
        assert!(a.is_removed());
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_vecstim_rejects_bad_times() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let stim = StimCell::new(&ctx, "stim");
        let bad: [&[f64]; 4] = [&[-1.0], &[f64::NAN], &[f64::INFINITY], &[3.0, 2.0]];
        for times in bad {
            assert!(stim.make_vecstim(times).unwrap_err().is_validation());
        }
        assert_eq!(ctx.vecstim_count(), 0);
        assert!(stim.vecstims().unwrap().is_empty());
    }
}
