//! Engine-side objects.
//!
//! These are the handles the engine hands out. They are reference counted:
//! an object stays alive in the engine for as long as any `Rc` to it exists,
//! whoever holds it. Wrappers in [`crate::wrappers`] own such handles and
//! release them on removal.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

/// Engine-unique object number, stable for the life of a context.
pub type ObjectId = u64;

/// Geometry and passive properties of a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionProps {
    /// Length in um.
    pub length: f64,
    /// Diameter in um.
    pub diam: f64,
    /// Number of segments.
    pub nseg: usize,
    /// Specific membrane capacitance in uF/cm2.
    pub cm: f64,
    /// Axial resistivity in ohm*cm.
    pub ra: f64,
}

impl Default for SectionProps {
    fn default() -> Self {
        Self {
            length: 100.0,
            diam: 500.0,
            nseg: 1,
            cm: 1.0,
            ra: 35.4,
        }
    }
}

#[derive(Debug, Clone)]
struct ParentLink {
    section: Weak<HocSection>,
    parent_x: f64,
    child_end: f64,
}

/// A cable section owned by the engine.
pub struct HocSection {
    id: ObjectId,
    name: String,
    props: RefCell<SectionProps>,
    mechanisms: RefCell<BTreeMap<String, BTreeMap<String, f64>>>,
    parent: RefCell<Option<ParentLink>>,
}

impl HocSection {
    pub(crate) fn new(id: ObjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            props: RefCell::new(SectionProps::default()),
            mechanisms: RefCell::new(BTreeMap::new()),
            parent: RefCell::new(None),
        }
    }

    /// Engine object number.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Engine-level name of the section.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the section properties.
    #[must_use]
    pub fn props(&self) -> SectionProps {
        self.props.borrow().clone()
    }

    /// Mutates the section properties in place.
    pub fn update_props(&self, f: impl FnOnce(&mut SectionProps)) {
        let mut props = self.props.borrow_mut();
        f(&mut props);
        if props.nseg == 0 {
            props.nseg = 1;
        }
    }

    /// Total membrane area in um2.
    #[must_use]
    pub fn area(&self) -> f64 {
        let p = self.props.borrow();
        PI * p.length * p.diam
    }

    /// Inserts a density mechanism with its default parameters.
    ///
    /// Inserting an already present mechanism keeps its current values.
    pub fn insert_mechanism(&self, name: &str, defaults: &BTreeMap<String, f64>) {
        self.mechanisms
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| defaults.clone());
    }

    /// Returns true if the density mechanism is inserted.
    #[must_use]
    pub fn has_mechanism(&self, name: &str) -> bool {
        self.mechanisms.borrow().contains_key(name)
    }

    /// Names of the inserted density mechanisms.
    #[must_use]
    pub fn mechanism_names(&self) -> Vec<String> {
        self.mechanisms.borrow().keys().cloned().collect()
    }

    /// Reads a density mechanism parameter, eg. `g_pas`.
    #[must_use]
    pub fn mechanism_param(&self, mechanism: &str, param: &str) -> Option<f64> {
        self.mechanisms
            .borrow()
            .get(mechanism)
            .and_then(|m| m.get(param).copied())
    }

    /// Sets a density mechanism parameter. Returns false when the mechanism
    /// is not inserted or does not declare the parameter.
    pub fn set_mechanism_param(&self, mechanism: &str, param: &str, value: f64) -> bool {
        let mut mechanisms = self.mechanisms.borrow_mut();
        match mechanisms.get_mut(mechanism).and_then(|m| m.get_mut(param)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Attaches the `child_end` (0 or 1) of this section to `parent` at `parent_x`.
    ///
    /// The link is weak: a child does not keep its parent alive.
    pub fn connect(&self, parent: &Rc<HocSection>, parent_x: f64, child_end: f64) {
        *self.parent.borrow_mut() = Some(ParentLink {
            section: Rc::downgrade(parent),
            parent_x,
            child_end,
        });
    }

    /// Parent section, if connected and still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Rc<HocSection>> {
        self.parent
            .borrow()
            .as_ref()
            .and_then(|link| link.section.upgrade())
    }

    /// Location on the parent this section is attached to.
    #[must_use]
    pub fn parent_x(&self) -> Option<f64> {
        let link = self.parent.borrow();
        link.as_ref()
            .filter(|l| l.section.upgrade().is_some())
            .map(|l| l.parent_x)
    }

    /// The end (0 or 1) of this section attached to its parent.
    #[must_use]
    pub fn orientation(&self) -> f64 {
        self.parent.borrow().as_ref().map_or(0.0, |l| l.child_end)
    }

    /// Maps a location in [0, 1] to the engine segment that contains it.
    ///
    /// Interior locations snap to the centre of their segment; the two ends
    /// stay at 0 and 1.
    #[must_use]
    pub fn segment_x(&self, loc: f64) -> f64 {
        if loc <= 0.0 {
            return 0.0;
        }
        if loc >= 1.0 {
            return 1.0;
        }
        let nseg = self.props.borrow().nseg;
        #[allow(clippy::cast_precision_loss)]
        let n = nseg as f64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = ((loc * n).floor() as usize).min(nseg - 1);
        #[allow(clippy::cast_precision_loss)]
        let centre = (index as f64 + 0.5) / n;
        centre
    }

    /// Positions of all segments, including the 0 and 1 ends.
    #[must_use]
    pub fn segment_positions(&self) -> Vec<f64> {
        let nseg = self.props.borrow().nseg;
        #[allow(clippy::cast_precision_loss)]
        let n = nseg as f64;
        let mut out = Vec::with_capacity(nseg + 2);
        out.push(0.0);
        #[allow(clippy::cast_precision_loss)]
        out.extend((0..nseg).map(|i| (i as f64 + 0.5) / n));
        out.push(1.0);
        out
    }

    /// Reads a geometry property or any parameter of an inserted density
    /// mechanism, eg. `diam` or `g_pas`.
    #[must_use]
    pub fn range_variable(&self, name: &str) -> Option<f64> {
        let p = self.props.borrow();
        match name {
            "diam" => Some(p.diam),
            "L" => Some(p.length),
            "cm" => Some(p.cm),
            "Ra" => Some(p.ra),
            _ => self
                .mechanisms
                .borrow()
                .values()
                .find_map(|m| m.get(name).copied()),
        }
    }

    /// Membrane area of the segment at `x` in um2. The ends have no area.
    #[must_use]
    pub fn segment_area(&self, x: f64) -> f64 {
        if x <= 0.0 || x >= 1.0 {
            return 0.0;
        }
        let p = self.props.borrow();
        #[allow(clippy::cast_precision_loss)]
        let area = PI * p.diam * p.length / p.nseg as f64;
        area
    }
}

impl fmt::Debug for HocSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HocSection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("props", &*self.props.borrow())
            .finish_non_exhaustive()
    }
}

/// A point process instance placed on a section.
///
/// Holds a strong reference to its section, so the section outlives every
/// point process placed on it.
pub struct HocPointProcess {
    id: ObjectId,
    mechanism: String,
    section: Rc<HocSection>,
    x: f64,
    params: RefCell<BTreeMap<String, f64>>,
}

impl HocPointProcess {
    pub(crate) fn new(
        id: ObjectId,
        mechanism: impl Into<String>,
        section: Rc<HocSection>,
        x: f64,
        params: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id,
            mechanism: mechanism.into(),
            section,
            x,
            params: RefCell::new(params),
        }
    }

    /// Engine object number.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Mechanism (mod) name.
    #[must_use]
    pub fn mechanism(&self) -> &str {
        &self.mechanism
    }

    /// Section the point process is placed on.
    #[must_use]
    pub fn section(&self) -> &Rc<HocSection> {
        &self.section
    }

    /// Segment location on the section.
    #[must_use]
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Reads a RANGE parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<f64> {
        self.params.borrow().get(name).copied()
    }

    /// Sets a declared RANGE parameter. Returns false if it is not declared.
    pub fn set_param(&self, name: &str, value: f64) -> bool {
        match self.params.borrow_mut().get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HocPointProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HocPointProcess")
            .field("id", &self.id)
            .field("mechanism", &self.mechanism)
            .field("section", &self.section.name())
            .field("x", &self.x)
            .finish_non_exhaustive()
    }
}

/// Parameters of a spike train generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetStimParams {
    /// First spike time in ms.
    pub start: f64,
    /// Number of spikes.
    pub number: f64,
    /// Mean interval between spikes in ms.
    pub interval: f64,
    /// Fraction of randomness, 0 to 1.
    pub noise: f64,
}

impl Default for NetStimParams {
    fn default() -> Self {
        Self {
            start: 50.0,
            number: 10.0,
            interval: 10.0,
            noise: 0.0,
        }
    }
}

/// A stand-alone spike train generator.
#[derive(Debug)]
pub struct HocNetStim {
    id: ObjectId,
    params: RefCell<NetStimParams>,
}

impl HocNetStim {
    pub(crate) fn new(id: ObjectId, params: NetStimParams) -> Self {
        Self {
            id,
            params: RefCell::new(params),
        }
    }

    /// Engine object number.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Current generator parameters.
    #[must_use]
    pub fn params(&self) -> NetStimParams {
        *self.params.borrow()
    }

    /// Replaces the generator parameters.
    pub fn set_params(&self, params: NetStimParams) {
        *self.params.borrow_mut() = params;
    }
}

/// A generator replaying a fixed list of spike times.
#[derive(Debug)]
pub struct HocVecStim {
    id: ObjectId,
    times: RefCell<Vec<f64>>,
}

impl HocVecStim {
    pub(crate) fn new(id: ObjectId, times: Vec<f64>) -> Self {
        Self {
            id,
            times: RefCell::new(times),
        }
    }

    /// Engine object number.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Spike times in ms, ascending.
    #[must_use]
    pub fn times(&self) -> Vec<f64> {
        self.times.borrow().clone()
    }

    /// Replaces the played spike times.
    pub fn play(&self, times: Vec<f64>) {
        *self.times.borrow_mut() = times;
    }
}

/// What a recording vector samples.
#[derive(Debug, Clone)]
pub enum RecordTarget {
    /// The simulation clock.
    Time,
    /// A variable of a segment. The link is weak: recording does not keep
    /// the section alive, and a removed section samples as NaN.
    Segment {
        /// Recorded section.
        section: Weak<HocSection>,
        /// Segment location.
        x: f64,
        /// Variable name, eg. `v`.
        variable: String,
    },
}

/// A vector filled once per time step.
#[derive(Debug)]
pub struct HocVector {
    id: ObjectId,
    target: RecordTarget,
    samples: RefCell<Vec<f64>>,
}

impl HocVector {
    pub(crate) fn new(id: ObjectId, target: RecordTarget) -> Self {
        Self {
            id,
            target,
            samples: RefCell::new(Vec::new()),
        }
    }

    /// Engine object number.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Recorded quantity.
    #[must_use]
    pub fn target(&self) -> &RecordTarget {
        &self.target
    }

    /// Samples taken since the last reinitialisation.
    #[must_use]
    pub fn samples(&self) -> Vec<f64> {
        self.samples.borrow().clone()
    }

    // membrane voltage is not integrated and stays at init_v
    pub(crate) fn sample(&self, t: f64, init_v: f64) {
        let value = match &self.target {
            RecordTarget::Time => t,
            RecordTarget::Segment {
                section, variable, ..
            } => match section.upgrade() {
                Some(_) if variable == "v" => init_v,
                Some(sec) => sec.range_variable(variable).unwrap_or(f64::NAN),
                None => f64::NAN,
            },
        };
        self.samples.borrow_mut().push(value);
    }

    pub(crate) fn clear(&self) {
        self.samples.borrow_mut().clear();
    }
}

/// What a network connection listens to.
#[derive(Debug, Clone)]
pub enum HocNetConSource {
    /// No source: events are injected by hand.
    None,
    /// Membrane voltage threshold crossing at a segment.
    Segment {
        /// Watched section.
        section: Rc<HocSection>,
        /// Segment location.
        x: f64,
    },
    /// A spike train generator.
    Stim(Rc<HocNetStim>),
    /// A generator replaying fixed spike times.
    VecStim(Rc<HocVecStim>),
}

/// Event delivery link from a source to a point process.
pub struct HocNetCon {
    id: ObjectId,
    source: HocNetConSource,
    target: Option<Rc<HocPointProcess>>,
    weight: Cell<f64>,
    delay: Cell<f64>,
    threshold: Cell<f64>,
    events: RefCell<Vec<f64>>,
    recording: RefCell<Option<Vec<f64>>>,
}

impl HocNetCon {
    pub(crate) fn new(
        id: ObjectId,
        source: HocNetConSource,
        target: Option<Rc<HocPointProcess>>,
    ) -> Self {
        Self {
            id,
            source,
            target,
            weight: Cell::new(0.0),
            delay: Cell::new(1.0),
            threshold: Cell::new(10.0),
            events: RefCell::new(Vec::new()),
            recording: RefCell::new(None),
        }
    }

    /// Engine object number.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Event source.
    #[must_use]
    pub fn source(&self) -> &HocNetConSource {
        &self.source
    }

    /// Target point process, `None` for spike detectors.
    #[must_use]
    pub fn target(&self) -> Option<&Rc<HocPointProcess>> {
        self.target.as_ref()
    }

    /// Synaptic weight.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight.get()
    }

    /// Sets the synaptic weight.
    pub fn set_weight(&self, weight: f64) {
        self.weight.set(weight);
    }

    /// Delivery delay in ms.
    #[must_use]
    pub fn delay(&self) -> f64 {
        self.delay.get()
    }

    /// Sets the delivery delay in ms.
    pub fn set_delay(&self, delay: f64) {
        self.delay.set(delay);
    }

    /// Source voltage threshold in mV.
    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold.get()
    }

    /// Sets the source voltage threshold in mV.
    pub fn set_threshold(&self, threshold: f64) {
        self.threshold.set(threshold);
    }

    /// Queues an event for delivery at absolute time `t`.
    pub fn event(&self, t: f64) {
        self.events.borrow_mut().push(t);
    }

    /// Events queued so far, in absolute ms.
    #[must_use]
    pub fn pending_events(&self) -> Vec<f64> {
        self.events.borrow().clone()
    }

    pub(crate) fn clear_events(&self) {
        self.events.borrow_mut().clear();
        if let Some(rec) = self.recording.borrow_mut().as_mut() {
            rec.clear();
        }
    }

    /// Starts recording source spike times.
    pub fn record(&self) {
        let mut rec = self.recording.borrow_mut();
        if rec.is_none() {
            *rec = Some(Vec::new());
        }
    }

    /// Recorded spike times, if recording.
    #[must_use]
    pub fn recorded(&self) -> Option<Vec<f64>> {
        self.recording.borrow().clone()
    }
}

impl fmt::Debug for HocNetCon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HocNetCon")
            .field("id", &self.id)
            .field("weight", &self.weight.get())
            .field("delay", &self.delay.get())
            .field("threshold", &self.threshold.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let sec = HocSection::new(1, "soma");
        let p = sec.props();
        assert!((p.length - 100.0).abs() < f64::EPSILON);
        assert!((p.diam - 500.0).abs() < f64::EPSILON);
        assert!((p.ra - 35.4).abs() < f64::EPSILON);
        assert_eq!(p.nseg, 1);
    }

    #[test]
    fn test_segment_positions() {
        let sec = HocSection::new(1, "dend");
        sec.update_props(|p| p.nseg = 4);
        assert_eq!(sec.segment_positions(), vec![0.0, 0.125, 0.375, 0.625, 0.875, 1.0]);
        assert!((sec.segment_x(0.3) - 0.375).abs() < 1e-12);
        assert!((sec.segment_x(0.0)).abs() < 1e-12);
        assert!((sec.segment_x(1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_nseg_is_clamped() {
        let sec = HocSection::new(1, "dend");
        sec.update_props(|p| p.nseg = 0);
        assert_eq!(sec.props().nseg, 1);
    }

    #[test]
    fn test_child_does_not_keep_parent_alive() {
        let parent = Rc::new(HocSection::new(1, "soma"));
        let child = HocSection::new(2, "dend");
        child.connect(&parent, 0.5, 0.0);
        assert_eq!(child.parent().map(|p| p.id()), Some(1));
        assert_eq!(child.parent_x(), Some(0.5));

        drop(parent);
        assert!(child.parent().is_none());
        assert!(child.parent_x().is_none());
    }

    #[test]
    fn test_point_process_keeps_section_alive() {
        let sec = Rc::new(HocSection::new(1, "dend"));
        let weak = Rc::downgrade(&sec);
        let pp = HocPointProcess::new(2, "ExpSyn", Rc::clone(&sec), 0.5, BTreeMap::new());
        drop(sec);
        assert!(weak.upgrade().is_some());
        drop(pp);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_vector_samples_weak_section() {
        let sec = Rc::new(HocSection::new(1, "soma"));
        let mut defaults = BTreeMap::new();
        defaults.insert("g_pas".to_string(), 0.001);
        sec.insert_mechanism("pas", &defaults);

        let target = |variable: &str| RecordTarget::Segment {
            section: Rc::downgrade(&sec),
            x: 0.5,
            variable: variable.to_string(),
        };
        let v = HocVector::new(2, target("v"));
        let g = HocVector::new(3, target("g_pas"));
        let t = HocVector::new(4, RecordTarget::Time);
        for vec in [&v, &g, &t] {
            vec.sample(0.5, -65.0);
        }
        assert_eq!(v.samples(), vec![-65.0]);
        assert_eq!(g.samples(), vec![0.001]);
        assert_eq!(t.samples(), vec![0.5]);

        drop(sec);
        v.sample(1.0, -65.0);
        assert!(v.samples()[1].is_nan());
        v.clear();
        assert!(v.samples().is_empty());
    }

    #[test]
    fn test_range_variable() {
        let sec = HocSection::new(1, "soma");
        assert_eq!(sec.range_variable("diam"), Some(500.0));
        assert_eq!(sec.range_variable("gnabar_hh"), None);
        let mut defaults = BTreeMap::new();
        defaults.insert("gnabar_hh".to_string(), 0.12);
        sec.insert_mechanism("hh", &defaults);
        assert_eq!(sec.range_variable("gnabar_hh"), Some(0.12));
    }

    #[test]
    fn test_mechanism_params() {
        let sec = HocSection::new(1, "soma");
        let mut defaults = BTreeMap::new();
        defaults.insert("g_pas".to_string(), 0.001);
        sec.insert_mechanism("pas", &defaults);
        assert_eq!(sec.mechanism_param("pas", "g_pas"), Some(0.001));
        assert!(sec.set_mechanism_param("pas", "g_pas", 0.002));
        assert!(!sec.set_mechanism_param("pas", "nope", 1.0));
        assert!(!sec.set_mechanism_param("hh", "g_pas", 1.0));
        // reinserting keeps the value
        sec.insert_mechanism("pas", &defaults);
        assert_eq!(sec.mechanism_param("pas", "g_pas"), Some(0.002));
    }
}
