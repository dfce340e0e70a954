//! Recording of segment variables over the simulation clock.
//!
//! A [`Record`] samples its variables once per time step, starting from the
//! reinitialisation done by the first run. Voltage is reported at `init_v`
//! because membrane equations are not integrated. Other variables read the
//! section geometry or a parameter of an inserted density mechanism.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{LookupError, ModelResult, ValidationError};
use crate::simulator::{HocVector, RecordTarget, SimulationContext};
use crate::wrappers::{Release, Removable, Seg, Slot};

struct RecordFields {
    time: Rc<HocVector>,
    // variable -> (element name, vector), in element order
    recs: BTreeMap<String, Vec<(String, Rc<HocVector>)>>,
}

impl Release for RecordFields {}

/// Variables of a set of segments recorded on every time step.
pub struct Record {
    variables: Vec<String>,
    slot: Slot<RecordFields>,
}

fn element_name(seg: &Seg) -> String {
    match seg.sec().cell_name() {
        Some(cell) => format!("{cell}[{}]", seg.name()),
        None => seg.name(),
    }
}

impl Record {
    /// Records the space separated `variables` (eg. `"v"` or `"v g_pas"`) of
    /// every segment in `elements`.
    ///
    /// Fails on an empty element list, once the clock has started, or when a
    /// variable cannot be read from a segment.
    pub fn new(ctx: &SimulationContext, elements: &[Seg], variables: &str) -> ModelResult<Self> {
        if ctx.t() > 0.0 {
            return Err(ValidationError::RecordAfterRun.into());
        }
        if elements.is_empty() {
            return Err(ValidationError::EmptyRecord.into());
        }
        let mut names: Vec<String> = Vec::new();
        for var in variables.split_whitespace() {
            if !names.iter().any(|n| n == var) {
                names.push(var.to_string());
            }
        }
        if names.is_empty() {
            names.push("v".to_string());
        }

        let mut targets = Vec::with_capacity(elements.len() * names.len());
        for seg in elements {
            let section = seg.hoc_section()?;
            for var in &names {
                if var != "v" && section.range_variable(var).is_none() {
                    return Err(LookupError::UnknownVariable {
                        variable: var.clone(),
                        element: element_name(seg),
                    }
                    .into());
                }
                targets.push((
                    var.clone(),
                    element_name(seg),
                    RecordTarget::Segment {
                        section: Rc::downgrade(&section),
                        x: seg.x(),
                        variable: var.clone(),
                    },
                ));
            }
        }

        let mut recs: BTreeMap<String, Vec<(String, Rc<HocVector>)>> = BTreeMap::new();
        for (var, name, target) in targets {
            let vec = ctx.create_vector(target)?;
            recs.entry(var).or_default().push((name, vec));
        }
        let time = ctx.create_vector(RecordTarget::Time)?;
        debug!(elements = elements.len(), variables = ?names, "record created");
        Ok(Self {
            variables: names,
            slot: Slot::new(RecordFields { time, recs }),
        })
    }

    /// Recorded variables in the order given.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Sample times in ms.
    pub fn time(&self) -> ModelResult<Vec<f64>> {
        Ok(self.slot.get(self)?.time.samples())
    }

    /// `(element name, samples)` of every recorded element for `variable`.
    pub fn records(&self, variable: &str) -> ModelResult<Vec<(String, Vec<f64>)>> {
        let fields = self.slot.get(self)?;
        let recs = fields.recs.get(variable).ok_or_else(|| LookupError::UnknownVariable {
            variable: variable.to_string(),
            element: self.to_string(),
        })?;
        Ok(recs
            .iter()
            .map(|(name, vec)| (name.clone(), vec.samples()))
            .collect())
    }

    /// Samples of one element, `variable` defaulting to the first recorded.
    pub fn output(&self, variable: Option<&str>, element: &str) -> ModelResult<RecordOutput> {
        let variable = variable.unwrap_or_else(|| self.variables.first().map_or("v", String::as_str));
        let records = self
            .records(variable)?
            .into_iter()
            .find(|(name, _)| name == element)
            .map(|(_, samples)| samples)
            .ok_or_else(|| LookupError::NotFound {
                collection: format!("record of '{variable}'"),
                filter: element.to_string(),
            })?;
        Ok(RecordOutput {
            variable: variable.to_string(),
            records,
            time: self.time()?,
        })
    }
}

impl Removable for Record {
    fn remove_now(&self) {
        self.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.slot.is_empty()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record[{}]", self.variables.join(" "))
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("variables", &self.variables)
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Samples of one recorded element with their times.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutput {
    /// Recorded variable.
    pub variable: String,
    /// One sample per time step.
    pub records: Vec<f64>,
    /// Sample times in ms.
    pub time: Vec<f64>,
}

impl RecordOutput {
    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true before the first sample.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Samples taken at `ms` or later.
    #[must_use]
    pub fn from_time(&self, ms: f64) -> &[f64] {
        let start = self.time.partition_point(|t| *t < ms).min(self.records.len());
        &self.records[start..]
    }

    /// Samples taken at `ms` or earlier.
    #[must_use]
    pub fn to_time(&self, ms: f64) -> &[f64] {
        let end = self.time.partition_point(|t| *t <= ms).min(self.records.len());
        &self.records[..end]
    }

    /// Samples taken between `from_ms` and `to_ms`, both inclusive.
    #[must_use]
    pub fn by_time(&self, from_ms: f64, to_ms: f64) -> &[f64] {
        let len = self.records.len();
        let start = self.time.partition_point(|t| *t < from_ms).min(len);
        let end = self.time.partition_point(|t| *t <= to_ms).clamp(start, len);
        &self.records[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Cell, SectionSpec};
    use crate::config::SimulationConfig;
    use crate::filter::Filter;
    use crate::simulator::Simulation;

    fn cell(ctx: &SimulationContext) -> Cell {
        let cell = Cell::new(ctx, "cell");
        cell.add_sec(SectionSpec::new("soma").diam(20.0)).unwrap();
        cell.add_sec(SectionSpec::new("dend").nseg(3)).unwrap();
        cell.insert("pas", &Filter::all(), &[("g_pas", 0.002)]).unwrap();
        cell
    }

    fn ctx() -> SimulationContext {
        let mut config = SimulationConfig::seeded(1);
        config.dt = 0.5;
        config.init_v = -70.0;
        SimulationContext::init(config).unwrap()
    }

    #[test]
    fn test_samples_every_step_from_zero() {
        let ctx = ctx();
        let cell = cell(&ctx);
        let soma = cell.sec("soma").unwrap().seg(0.5).unwrap();
        let dend = cell.sec("dend").unwrap().seg(0.5).unwrap();
        let rec = Record::new(&ctx, &[soma, dend], "v g_pas diam").unwrap();
        assert_eq!(rec.variables(), ["v", "g_pas", "diam"]);

        Simulation::new(&ctx).run(2.0).unwrap();
        assert_eq!(rec.time().unwrap(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);

        let v = rec.records("v").unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].0, "cell[soma(0.5)]");
        assert!(v[0].1.iter().all(|x| (x + 70.0).abs() < 1e-12));
        let diam = rec.records("diam").unwrap();
        assert!((diam[0].1[0] - 20.0).abs() < 1e-12);
        assert!(rec.records("gnabar_hh").unwrap_err().is_lookup());
    }

    #[test]
    fn test_rejects_empty_late_and_unknown() {
        let ctx = ctx();
        let cell = cell(&ctx);
        let soma = cell.sec("soma").unwrap().seg(0.5).unwrap();

        assert!(Record::new(&ctx, &[], "v").unwrap_err().is_validation());
        let err = Record::new(&ctx, &[soma.clone()], "v gkbar_hh").unwrap_err();
        assert!(err.is_lookup());
        assert!(err.to_string().contains("gkbar_hh"));
        assert_eq!(ctx.vector_count(), 0);

        Simulation::new(&ctx).run(1.0).unwrap();
        assert!(Record::new(&ctx, &[soma], "v").unwrap_err().is_validation());
    }

    #[test]
    fn test_removed_section_samples_nan() {
        let ctx = ctx();
        let cell = cell(&ctx);
        let dend = cell.sec("dend").unwrap().seg(0.5).unwrap();
        let rec = Record::new(&ctx, &[dend.clone()], "g_pas").unwrap();
        let sim = Simulation::new(&ctx);
        sim.run(1.0).unwrap();

        drop(dend);
        cell.remove_secs(&Filter::name("dend")).unwrap();
        sim.run(1.0).unwrap();
        let out = rec.output(None, "cell[dend(0.5)]").unwrap();
        assert_eq!(out.len(), 5);
        assert!((out.records[2] - 0.002).abs() < 1e-12);
        assert!(out.records[3..].iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_reinit_restarts_samples() {
        let ctx = ctx();
        let cell = cell(&ctx);
        let soma = cell.sec("soma").unwrap().seg(0.5).unwrap();
        let rec = Record::new(&ctx, &[soma], "v").unwrap();
        let sim = Simulation::new(&ctx);
        sim.run(2.0).unwrap();
        sim.reinit();
        assert_eq!(rec.time().unwrap(), vec![0.0]);

        rec.remove_now();
        assert!(rec.time().unwrap_err().is_lookup());
        assert_eq!(ctx.vector_count(), 0);
    }

    #[test]
    fn test_output_time_windows() {
        let out = RecordOutput {
            variable: "v".to_string(),
            records: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            time: vec![0.0, 0.5, 1.0, 1.5, 2.0],
        };
        assert_eq!(out.from_time(1.0), [3.0, 4.0, 5.0]);
        assert_eq!(out.to_time(1.0), [1.0, 2.0, 3.0]);
        assert_eq!(out.by_time(0.5, 1.5), [2.0, 3.0, 4.0]);
        assert!(out.by_time(1.8, 0.2).is_empty());
    }
}
