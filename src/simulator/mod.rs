//! In-process simulation engine.
//!
//! The [`SimulationContext`] owns everything the engine treats as global: the
//! clock, the random number generator, the mechanism registry and the tables of
//! live engine objects. Handles are cheap to clone and share one context.
//!
//! Object tables hold [`Weak`] references only. An engine object lives as long
//! as some wrapper (or another engine object) holds an `Rc` to it, and the
//! context merely observes it.

pub mod import3d;
pub mod mechanisms;
pub mod objects;
mod run;

use std::cell::{Cell, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::error::{LookupError, ModelError, ModelResult, TypeMismatch};

pub use mechanisms::{Mechanism, MechanismKind, MechanismRegistry};
pub use objects::{
    HocNetCon, HocNetConSource, HocNetStim, HocPointProcess, HocSection, HocVecStim, HocVector,
    NetStimParams, ObjectId, RecordTarget, SectionProps,
};
pub use run::Simulation;

/// Unique identifier of a simulation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    /// Creates a new random context ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx:{}", self.0)
    }
}

fn live<T>(table: &RefCell<Vec<Weak<T>>>) -> Vec<Rc<T>> {
    let mut table = table.borrow_mut();
    table.retain(|w| w.strong_count() > 0);
    table.iter().filter_map(Weak::upgrade).collect()
}

fn live_count<T>(table: &RefCell<Vec<Weak<T>>>) -> usize {
    let mut table = table.borrow_mut();
    table.retain(|w| w.strong_count() > 0);
    table.len()
}

struct ContextInner {
    id: ContextId,
    config: RefCell<SimulationConfig>,
    t: Cell<f64>,
    started: Cell<bool>,
    warmed_up: Cell<bool>,
    rng: RefCell<StdRng>,
    mechanisms: RefCell<MechanismRegistry>,
    sections: RefCell<Vec<Weak<HocSection>>>,
    point_processes: RefCell<Vec<Weak<HocPointProcess>>>,
    netcons: RefCell<Vec<Weak<HocNetCon>>>,
    netstims: RefCell<Vec<Weak<HocNetStim>>>,
    vecstims: RefCell<Vec<Weak<HocVecStim>>>,
    vectors: RefCell<Vec<Weak<HocVector>>>,
    loaded_mod_paths: RefCell<Vec<PathBuf>>,
    next_object_id: Cell<ObjectId>,
    torn_down: Cell<bool>,
}

/// Handle to an engine instance.
///
/// Single-threaded: the handle is `!Send` and every clone refers to the same
/// engine.
#[derive(Clone)]
pub struct SimulationContext {
    inner: Rc<ContextInner>,
}

impl fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationContext")
            .field("id", &self.inner.id)
            .field("t", &self.inner.t.get())
            .field("torn_down", &self.inner.torn_down.get())
            .finish_non_exhaustive()
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

impl SimulationContext {
    /// Validates the configuration and starts a fresh engine.
    pub fn init(config: SimulationConfig) -> ModelResult<Self> {
        config.validate()?;
        let id = ContextId::new();
        info!(%id, dt = config.dt, seed = ?config.seed, "simulation context initialised");
        Ok(Self {
            inner: Rc::new(ContextInner {
                id,
                rng: RefCell::new(make_rng(config.seed)),
                config: RefCell::new(config),
                t: Cell::new(0.0),
                started: Cell::new(false),
                warmed_up: Cell::new(false),
                mechanisms: RefCell::new(MechanismRegistry::with_builtins()),
                sections: RefCell::new(Vec::new()),
                point_processes: RefCell::new(Vec::new()),
                netcons: RefCell::new(Vec::new()),
                netstims: RefCell::new(Vec::new()),
                vecstims: RefCell::new(Vec::new()),
                vectors: RefCell::new(Vec::new()),
                loaded_mod_paths: RefCell::new(Vec::new()),
                next_object_id: Cell::new(1),
                torn_down: Cell::new(false),
            }),
        })
    }

    /// Starts an engine with the default configuration.
    pub fn with_defaults() -> ModelResult<Self> {
        Self::init(SimulationConfig::default())
    }

    /// Starts an engine with the default configuration and a fixed seed.
    pub fn seeded(seed: u64) -> ModelResult<Self> {
        Self::init(SimulationConfig::seeded(seed))
    }

    /// Context identifier.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Returns true if both handles refer to the same engine.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the configuration.
    #[must_use]
    pub fn config(&self) -> SimulationConfig {
        self.inner.config.borrow().clone()
    }

    /// Current simulation time in ms.
    #[must_use]
    pub fn t(&self) -> f64 {
        self.inner.t.get()
    }

    /// Integration time step in ms.
    #[must_use]
    pub fn dt(&self) -> f64 {
        self.inner.config.borrow().dt
    }

    /// Returns true once the clock has been started by a run.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.started.get()
    }

    pub(crate) fn advance(&self, dt: f64) {
        self.inner.started.set(true);
        self.inner.t.set(self.inner.t.get() + dt);
        self.sample_vectors();
    }

    fn sample_vectors(&self) {
        let t = self.inner.t.get();
        let init_v = self.inner.config.borrow().init_v;
        for vec in live(&self.inner.vectors) {
            vec.sample(t, init_v);
        }
    }

    pub(crate) fn warmed_up(&self) -> bool {
        self.inner.warmed_up.get()
    }

    pub(crate) fn set_warmed_up(&self) {
        self.inner.warmed_up.set(true);
    }

    /// Borrows the context RNG. All randomized parameters draw from it.
    ///
    /// # Panics
    ///
    /// Panics if the RNG is already borrowed, which only happens when a draw
    /// is attempted from inside another draw.
    pub fn rng(&self) -> RefMut<'_, StdRng> {
        self.inner.rng.borrow_mut()
    }

    /// Re-seeds the context RNG. The same seed restarts the same sequence.
    pub fn set_seed(&self, seed: u64) {
        self.inner.config.borrow_mut().seed = Some(seed);
        *self.inner.rng.borrow_mut() = StdRng::seed_from_u64(seed);
        debug!(seed, "rng re-seeded");
    }

    /// Resets the clock to 0, re-seeds the RNG from the configuration and
    /// drops queued events. Model objects are kept.
    pub fn reset(&self) {
        self.reset_clock();
        *self.inner.rng.borrow_mut() = make_rng(self.inner.config.borrow().seed);
        debug!(id = %self.inner.id, "simulation context reset");
    }

    pub(crate) fn reset_clock(&self) {
        self.inner.t.set(0.0);
        self.inner.started.set(false);
        self.inner.warmed_up.set(false);
        for nc in live(&self.inner.netcons) {
            nc.clear_events();
        }
        for vec in live(&self.inner.vectors) {
            vec.clear();
        }
        self.sample_vectors();
    }

    /// Forgets every engine object and loaded mechanism.
    ///
    /// Creating objects on a torn down context fails.
    pub fn teardown(&self) {
        self.inner.sections.borrow_mut().clear();
        self.inner.point_processes.borrow_mut().clear();
        self.inner.netcons.borrow_mut().clear();
        self.inner.netstims.borrow_mut().clear();
        self.inner.vecstims.borrow_mut().clear();
        self.inner.vectors.borrow_mut().clear();
        self.inner.loaded_mod_paths.borrow_mut().clear();
        *self.inner.mechanisms.borrow_mut() = MechanismRegistry::with_builtins();
        self.inner.torn_down.set(true);
        info!(id = %self.inner.id, "simulation context torn down");
    }

    /// Returns true after [`teardown`](Self::teardown).
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    fn ensure_live(&self) -> ModelResult<()> {
        if self.inner.torn_down.get() {
            return Err(ModelError::internal(format!(
                "simulation context {} has been torn down",
                self.inner.id
            )));
        }
        Ok(())
    }

    fn next_id(&self) -> ObjectId {
        let id = self.inner.next_object_id.get();
        self.inner.next_object_id.set(id + 1);
        id
    }

    // ----- mechanisms -----

    /// Returns true if the mechanism is known to the engine.
    #[must_use]
    pub fn has_mechanism(&self, name: &str) -> bool {
        self.inner.mechanisms.borrow().contains(name)
    }

    /// Looks up a registered mechanism.
    pub fn mechanism(&self, name: &str) -> ModelResult<Mechanism> {
        self.inner
            .mechanisms
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| {
                LookupError::UnknownMechanism {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Registers a mechanism with the engine.
    pub fn register_mechanism(&self, mechanism: Mechanism) {
        debug!(name = %mechanism.name, kind = ?mechanism.kind, "mechanism registered");
        self.inner.mechanisms.borrow_mut().register(mechanism);
    }

    /// Names of all registered mechanisms.
    #[must_use]
    pub fn mechanism_names(&self) -> Vec<String> {
        self.inner.mechanisms.borrow().names()
    }

    /// Returns true if mechanisms from `path` are already loaded.
    #[must_use]
    pub fn is_mod_path_loaded(&self, path: &Path) -> bool {
        self.inner
            .loaded_mod_paths
            .borrow()
            .iter()
            .any(|p| p == path)
    }

    /// Number of mechanism folders loaded so far.
    #[must_use]
    pub fn loaded_mod_path_count(&self) -> usize {
        self.inner.loaded_mod_paths.borrow().len()
    }

    pub(crate) fn mark_mod_path_loaded(&self, path: PathBuf) {
        let mut paths = self.inner.loaded_mod_paths.borrow_mut();
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    // ----- object creation -----

    /// Creates a section with default geometry.
    pub fn create_section(&self, name: &str) -> ModelResult<Rc<HocSection>> {
        self.ensure_live()?;
        let sec = Rc::new(HocSection::new(self.next_id(), name));
        self.inner.sections.borrow_mut().push(Rc::downgrade(&sec));
        debug!(name, id = sec.id(), "section created");
        Ok(sec)
    }

    /// Inserts a density mechanism into a section.
    pub fn insert_mechanism(&self, section: &HocSection, name: &str) -> ModelResult<()> {
        self.ensure_live()?;
        let mechanism = self.mechanism(name)?;
        if mechanism.kind != MechanismKind::Density {
            return Err(TypeMismatch::NotADensityMechanism {
                mechanism: name.to_string(),
            }
            .into());
        }
        section.insert_mechanism(name, &mechanism.params);
        Ok(())
    }

    /// Creates a point process of a registered `POINT_PROCESS` mechanism.
    pub fn create_point_process(
        &self,
        mechanism: &str,
        section: &Rc<HocSection>,
        x: f64,
    ) -> ModelResult<Rc<HocPointProcess>> {
        self.ensure_live()?;
        let mech = self.mechanism(mechanism)?;
        if mech.kind != MechanismKind::PointProcess {
            return Err(TypeMismatch::NotAPointProcess {
                mechanism: mechanism.to_string(),
            }
            .into());
        }
        let x = section.segment_x(x);
        let pp = Rc::new(HocPointProcess::new(
            self.next_id(),
            mechanism,
            Rc::clone(section),
            x,
            mech.params,
        ));
        self.inner.point_processes.borrow_mut().push(Rc::downgrade(&pp));
        debug!(mechanism, section = section.name(), x, "point process created");
        Ok(pp)
    }

    /// Creates a network connection.
    pub fn create_netcon(
        &self,
        source: HocNetConSource,
        target: Option<Rc<HocPointProcess>>,
    ) -> ModelResult<Rc<HocNetCon>> {
        self.ensure_live()?;
        let nc = Rc::new(HocNetCon::new(self.next_id(), source, target));
        self.inner.netcons.borrow_mut().push(Rc::downgrade(&nc));
        Ok(nc)
    }

    /// Creates a spike train generator.
    pub fn create_netstim(&self, params: NetStimParams) -> ModelResult<Rc<HocNetStim>> {
        self.ensure_live()?;
        if !self.has_mechanism("NetStim") {
            return Err(LookupError::UnknownMechanism {
                name: "NetStim".to_string(),
            }
            .into());
        }
        let stim = Rc::new(HocNetStim::new(self.next_id(), params));
        self.inner.netstims.borrow_mut().push(Rc::downgrade(&stim));
        Ok(stim)
    }

    /// Creates a generator replaying `times`.
    pub fn create_vecstim(&self, times: Vec<f64>) -> ModelResult<Rc<HocVecStim>> {
        self.ensure_live()?;
        if !self.has_mechanism("VecStim") {
            return Err(LookupError::UnknownMechanism {
                name: "VecStim".to_string(),
            }
            .into());
        }
        let stim = Rc::new(HocVecStim::new(self.next_id(), times));
        self.inner.vecstims.borrow_mut().push(Rc::downgrade(&stim));
        Ok(stim)
    }

    /// Creates a vector sampling `target` on every time step.
    pub fn create_vector(&self, target: RecordTarget) -> ModelResult<Rc<HocVector>> {
        self.ensure_live()?;
        let vec = Rc::new(HocVector::new(self.next_id(), target));
        self.inner.vectors.borrow_mut().push(Rc::downgrade(&vec));
        Ok(vec)
    }

    // ----- observation -----

    /// Number of sections alive in the engine.
    #[must_use]
    pub fn section_count(&self) -> usize {
        live_count(&self.inner.sections)
    }

    /// Number of point processes alive in the engine.
    #[must_use]
    pub fn point_process_count(&self) -> usize {
        live_count(&self.inner.point_processes)
    }

    /// Number of network connections alive in the engine.
    #[must_use]
    pub fn netcon_count(&self) -> usize {
        live_count(&self.inner.netcons)
    }

    /// Number of stimulus generators alive in the engine.
    #[must_use]
    pub fn netstim_count(&self) -> usize {
        live_count(&self.inner.netstims)
    }

    /// Number of spike time players alive in the engine.
    #[must_use]
    pub fn vecstim_count(&self) -> usize {
        live_count(&self.inner.vecstims)
    }

    /// Number of recording vectors alive in the engine.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        live_count(&self.inner.vectors)
    }

    /// Names of the live sections, in creation order.
    #[must_use]
    pub fn section_names(&self) -> Vec<String> {
        live(&self.inner.sections)
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Live network connections, in creation order.
    #[must_use]
    pub fn netcons(&self) -> Vec<Rc<HocNetCon>> {
        live(&self.inner.netcons)
    }

    /// Returns true when no model object is alive. Recording vectors do not
    /// count.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.section_count() == 0
            && self.point_process_count() == 0
            && self.netcon_count() == 0
            && self.netstim_count() == 0
            && self.vecstim_count() == 0
    }

    /// Live object counts by kind.
    #[must_use]
    pub fn object_counts(&self) -> BTreeMap<&'static str, usize> {
        BTreeMap::from([
            ("sections", self.section_count()),
            ("point_processes", self.point_process_count()),
            ("netcons", self.netcon_count()),
            ("netstims", self.netstim_count()),
            ("vecstims", self.vecstim_count()),
            ("vectors", self.vector_count()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut config = SimulationConfig::default();
        config.dt = -1.0;
        assert!(SimulationContext::init(config).unwrap_err().is_validation());
    }

    #[test]
    fn test_counts_follow_rc_lifetimes() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let soma = ctx.create_section("soma").unwrap();
        let dend = ctx.create_section("dend").unwrap();
        assert_eq!(ctx.section_count(), 2);

        let pp = ctx.create_point_process("ExpSyn", &dend, 0.5).unwrap();
        drop(dend);
        assert_eq!(ctx.section_count(), 2);
        drop(pp);
        assert_eq!(ctx.section_count(), 1);
        assert_eq!(ctx.section_names(), vec!["soma".to_string()]);
        drop(soma);
        assert!(ctx.is_empty());
    }

    #[test]
    fn test_unknown_and_wrong_kind_mechanisms() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let sec = ctx.create_section("soma").unwrap();

        let err = ctx.create_point_process("Syn4P", &sec, 0.5).unwrap_err();
        assert!(err.is_lookup());
        assert!(format!("{err}").contains("compile"));

        let err = ctx.create_point_process("pas", &sec, 0.5).unwrap_err();
        assert!(err.is_type());

        ctx.insert_mechanism(&sec, "hh").unwrap();
        assert!(sec.has_mechanism("hh"));
    }

    #[test]
    fn test_insert_point_mechanism_is_type_error() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let sec = ctx.create_section("soma").unwrap();

        for name in ["ExpSyn", "NetStim"] {
            let err = ctx.insert_mechanism(&sec, name).unwrap_err();
            assert!(err.is_type(), "{name}: {err}");
            assert!(!err.is_internal());
            assert!(matches!(
                err,
                ModelError::Type(TypeMismatch::NotADensityMechanism { .. })
            ));
        }
        assert!(sec.mechanism_names().is_empty());
        assert!(ctx.insert_mechanism(&sec, "Syn4P").unwrap_err().is_lookup());
    }

    #[test]
    fn test_insert_after_teardown_fails() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let sec = ctx.create_section("soma").unwrap();
        ctx.teardown();
        assert!(ctx.insert_mechanism(&sec, "pas").unwrap_err().is_internal());
        assert!(!sec.has_mechanism("pas"));
    }

    #[test]
    fn test_vectors_sample_each_step() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let time = ctx.create_vector(RecordTarget::Time).unwrap();
        ctx.reset_clock();
        ctx.advance(0.5);
        ctx.advance(0.5);
        assert_eq!(time.samples(), vec![0.0, 0.5, 1.0]);

        ctx.reset_clock();
        assert_eq!(time.samples(), vec![0.0]);
        assert!(ctx.is_empty());
        assert_eq!(ctx.vector_count(), 1);
        drop(time);
        assert_eq!(ctx.vector_count(), 0);
    }

    #[test]
    fn test_vecstim_needs_mechanism_and_live_context() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let stim = ctx.create_vecstim(vec![1.0, 2.0]).unwrap();
        assert_eq!(stim.times(), vec![1.0, 2.0]);
        assert_eq!(ctx.vecstim_count(), 1);
        assert!(!ctx.is_empty());
        drop(stim);
        assert!(ctx.is_empty());

        ctx.teardown();
        assert!(ctx.create_vecstim(vec![]).unwrap_err().is_internal());
    }

    #[test]
    fn test_reseed_restarts_sequence() {
        let ctx = SimulationContext::seeded(13).unwrap();
        let a: Vec<f64> = (0..5).map(|_| ctx.rng().gen::<f64>()).collect();
        ctx.set_seed(13);
        let b: Vec<f64> = (0..5).map(|_| ctx.rng().gen::<f64>()).collect();
        assert_eq!(a, b);

        ctx.reset();
        let c: Vec<f64> = (0..5).map(|_| ctx.rng().gen::<f64>()).collect();
        assert_eq!(a, c);
    }

    #[test]
    fn test_teardown_blocks_creation() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let _soma = ctx.create_section("soma").unwrap();
        ctx.teardown();
        assert!(ctx.is_torn_down());
        assert_eq!(ctx.section_count(), 0);
        assert!(ctx.create_section("dend").unwrap_err().is_internal());
    }

    #[test]
    fn test_contexts_are_independent() {
        let a = SimulationContext::seeded(1).unwrap();
        let b = SimulationContext::seeded(1).unwrap();
        let _s = a.create_section("soma").unwrap();
        assert_eq!(a.section_count(), 1);
        assert_eq!(b.section_count(), 0);
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.clone()));
    }
}
