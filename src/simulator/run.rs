use std::time::{Duration, Instant};

use tracing::{debug, info};

use super::SimulationContext;
use crate::error::{ModelResult, ValidationError};

/// Number of steps a warmup is split into.
const WARMUP_STEPS: u32 = 10;

/// Drives the clock of a [`SimulationContext`].
///
/// The first call to [`run`](Self::run) re-initialises the clock and performs
/// the configured warmup. Every handle shares the context clock, so two
/// `Simulation` values over one context see the same time.
#[derive(Debug, Clone)]
pub struct Simulation {
    ctx: SimulationContext,
}

impl Simulation {
    /// Wraps a context.
    #[must_use]
    pub fn new(ctx: &SimulationContext) -> Self {
        Self { ctx: ctx.clone() }
    }

    /// Current simulation time in ms.
    #[must_use]
    pub fn t(&self) -> f64 {
        self.ctx.t()
    }

    /// Number of live sections in the engine.
    #[must_use]
    pub fn size(&self) -> usize {
        self.ctx.section_count()
    }

    /// Returns true when the engine holds no sections.
    #[must_use]
    pub fn is_neuron_empty(&self) -> bool {
        self.size() == 0
    }

    /// Restarts the clock at 0 and drops queued events. Objects are kept.
    pub fn reinit(&self) {
        self.ctx.reset_clock();
        debug!(init_v = self.ctx.config().init_v, "simulation reinitialised");
    }

    fn step_to(&self, until: f64, dt: f64) {
        // tolerate float drift on the last step
        while self.ctx.t() + dt * 0.5 < until {
            self.ctx.advance(dt);
        }
    }

    fn warmup(&self) {
        self.reinit();
        let warmup = self.ctx.config().warmup;
        if warmup > 0.0 {
            self.step_to(warmup, warmup / f64::from(WARMUP_STEPS));
            debug!(warmup, "warmup done");
        }
        self.ctx.set_warmed_up();
    }

    /// Advances the clock by `runtime` ms in one chunk.
    pub fn run(&self, runtime: f64) -> ModelResult<f64> {
        self.run_chunked(runtime, None)
    }

    /// Advances the clock by `runtime` ms in chunks of `stepsize` ms, pausing
    /// between chunks for the configured `step_delay_ms` minus the time the
    /// chunk took.
    ///
    /// Returns the clock time after the run.
    pub fn run_chunked(&self, runtime: f64, stepsize: Option<f64>) -> ModelResult<f64> {
        if !(runtime.is_finite() && runtime >= 0.0) {
            return Err(ValidationError::Negative {
                field: "runtime".to_string(),
                value: runtime,
            }
            .into());
        }
        if let Some(step) = stepsize {
            if !(step.is_finite() && step > 0.0) {
                return Err(ValidationError::Negative {
                    field: "stepsize".to_string(),
                    value: step,
                }
                .into());
            }
        }
        if !self.ctx.warmed_up() {
            self.warmup();
        }

        let config = self.ctx.config();
        let pause = Duration::from_millis(config.step_delay_ms);
        let stepsize = stepsize.unwrap_or(runtime).max(config.dt);
        let end = self.ctx.t() + runtime;

        let mut before = Instant::now();
        while self.ctx.t() + config.dt * 0.5 < end {
            let chunk_end = (self.ctx.t() + stepsize).min(end);
            self.step_to(chunk_end, config.dt);
            if !pause.is_zero() {
                std::thread::sleep(pause.saturating_sub(before.elapsed()));
                before = Instant::now();
            }
        }

        info!(t = self.ctx.t(), runtime, "simulation run finished");
        Ok(self.ctx.t())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    #[test]
    fn test_run_advances_clock() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let sim = Simulation::new(&ctx);
        let t = sim.run(10.0).unwrap();
        assert!((t - 10.0).abs() < 1e-6);
        let t = sim.run_chunked(5.0, Some(1.0)).unwrap();
        assert!((t - 15.0).abs() < 1e-6);
        assert!(ctx.is_started());
    }

    #[test]
    fn test_warmup_runs_once() {
        let mut config = SimulationConfig::seeded(1);
        config.warmup = 20.0;
        let ctx = SimulationContext::init(config).unwrap();
        let sim = Simulation::new(&ctx);
        let t = sim.run(5.0).unwrap();
        assert!((t - 25.0).abs() < 1e-6);
        let t = sim.run(5.0).unwrap();
        assert!((t - 30.0).abs() < 1e-6);

        sim.reinit();
        assert!(ctx.t().abs() < f64::EPSILON);
        let t = sim.run(1.0).unwrap();
        assert!((t - 21.0).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_negative_runtime() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let sim = Simulation::new(&ctx);
        assert!(sim.run(-1.0).unwrap_err().is_validation());
        assert!(sim.run_chunked(1.0, Some(0.0)).unwrap_err().is_validation());
    }

    #[test]
    fn test_size_tracks_sections() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let sim = Simulation::new(&ctx);
        assert!(sim.is_neuron_empty());
        let _soma = ctx.create_section("soma").unwrap();
        assert_eq!(sim.size(), 1);
    }
}
