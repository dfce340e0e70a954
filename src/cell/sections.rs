use std::path::Path;
use std::rc::Rc;

use tracing::{debug, info};

use super::Cell;
use crate::dist::Param;
use crate::error::{LookupError, ModelResult, TypeMismatch, ValidationError};
use crate::filter::{Filter, Selection};
use crate::simulator::import3d;
use crate::simulator::{HocSection, MechanismKind};
use crate::wrappers::Sec;

/// Parameters of a new section. Unset values keep the engine defaults.
///
/// Numeric values may be distributions; they are sampled when the section is
/// created.
#[derive(Debug, Clone)]
pub struct SectionSpec {
    name: String,
    length: Option<Param>,
    diam: Option<Param>,
    nseg: Option<usize>,
    cm: Option<Param>,
    ra: Option<Param>,
    rm: Option<Param>,
    g_pas: Option<Param>,
    e_rest: Option<Param>,
    add_pas: bool,
}

impl SectionSpec {
    /// A section called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            length: None,
            diam: None,
            nseg: None,
            cm: None,
            ra: None,
            rm: None,
            g_pas: None,
            e_rest: None,
            add_pas: false,
        }
    }

    /// Length in um.
    #[must_use]
    pub fn length(mut self, length: impl Into<Param>) -> Self {
        self.length = Some(length.into());
        self
    }

    /// Diameter in um.
    #[must_use]
    pub fn diam(mut self, diam: impl Into<Param>) -> Self {
        self.diam = Some(diam.into());
        self
    }

    /// Number of segments.
    #[must_use]
    pub fn nseg(mut self, nseg: usize) -> Self {
        self.nseg = Some(nseg);
        self
    }

    /// Membrane capacitance in uF/cm2.
    #[must_use]
    pub fn cm(mut self, cm: impl Into<Param>) -> Self {
        self.cm = Some(cm.into());
        self
    }

    /// Axial resistance in ohm*cm.
    #[must_use]
    pub fn ra(mut self, ra: impl Into<Param>) -> Self {
        self.ra = Some(ra.into());
        self
    }

    /// Membrane resistance; sets `g_pas = 1 / rm`.
    #[must_use]
    pub fn rm(mut self, rm: impl Into<Param>) -> Self {
        self.rm = Some(rm.into());
        self
    }

    /// Passive conductance in S/cm2.
    #[must_use]
    pub fn g_pas(mut self, g_pas: impl Into<Param>) -> Self {
        self.g_pas = Some(g_pas.into());
        self
    }

    /// Passive reversal potential in mV.
    #[must_use]
    pub fn e_rest(mut self, e_rest: impl Into<Param>) -> Self {
        self.e_rest = Some(e_rest.into());
        self
    }

    /// Inserts `pas` even when no passive value is given.
    #[must_use]
    pub fn add_pas(mut self, add_pas: bool) -> Self {
        self.add_pas = add_pas;
        self
    }
}

fn positive(field: &str, value: Option<f64>) -> Result<Option<f64>, ValidationError> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(ValidationError::Negative {
            field: field.to_string(),
            value: v,
        }),
        _ => Ok(value),
    }
}

fn check_loc(field: &str, loc: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&loc) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value: loc,
            min: 0.0,
            max: 1.0,
        })
    }
}

impl Cell {
    fn ensure_free_name(&self, name: &str) -> ModelResult<()> {
        let taken = self.live(|p| &mut p.secs)?.iter().any(|s| s.name() == name);
        if taken {
            return Err(LookupError::DuplicateName {
                name: name.to_string(),
                owner: format!("cell '{}'", self.name()),
            }
            .into());
        }
        Ok(())
    }

    fn wrap_section(&self, hoc: Rc<HocSection>, name: &str) -> ModelResult<Sec> {
        let sec = Sec::new(name, hoc, self.downgrade());
        self.push(|p| &mut p.secs, sec.clone())?;
        Ok(sec)
    }

    /// Creates a section. The name must not be taken in this cell.
    pub fn add_sec(&self, spec: SectionSpec) -> ModelResult<Sec> {
        self.parts()?;
        self.ensure_free_name(&spec.name)?;

        let (length, diam, cm, ra, rm, mut g_pas, e_rest) = {
            let mut rng = self.ctx().rng();
            let mut draw = |p: Option<Param>| p.map(|p| p.resolve(&mut *rng)).transpose();
            (
                draw(spec.length)?,
                draw(spec.diam)?,
                draw(spec.cm)?,
                draw(spec.ra)?,
                draw(spec.rm)?,
                draw(spec.g_pas)?,
                draw(spec.e_rest)?,
            )
        };
        let length = positive("length", length)?;
        let diam = positive("diam", diam)?;
        if let Some(rm) = positive("rm", rm)? {
            g_pas = Some(1.0 / rm);
        }

        let hoc = self.ctx().create_section(&spec.name)?;
        hoc.update_props(|p| {
            if let Some(v) = length {
                p.length = v;
            }
            if let Some(v) = diam {
                p.diam = v;
            }
            if let Some(v) = spec.nseg {
                p.nseg = v;
            }
            if let Some(v) = cm {
                p.cm = v;
            }
            if let Some(v) = ra {
                p.ra = v;
            }
        });
        if spec.add_pas || g_pas.is_some() || e_rest.is_some() {
            self.ctx().insert_mechanism(&hoc, "pas")?;
            if let Some(v) = g_pas {
                hoc.set_mechanism_param("pas", "g_pas", v);
            }
            if let Some(v) = e_rest {
                hoc.set_mechanism_param("pas", "e_pas", v);
            }
        }

        debug!(cell = %self.name(), sec = %spec.name, "section added");
        self.wrap_section(hoc, &spec.name)
    }

    /// Connects the `child_loc` end of `child` (0 or 1) to `parent` at
    /// `parent_loc` in [0, 1].
    pub fn connect_secs(
        &self,
        child: &Sec,
        parent: &Sec,
        child_loc: f64,
        parent_loc: f64,
    ) -> ModelResult<()> {
        if child_loc != 0.0 && child_loc != 1.0 {
            return Err(ValidationError::OutOfRange {
                field: "child_loc".to_string(),
                value: child_loc,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        check_loc("parent_loc", parent_loc)?;
        let parent_x = parent.seg(parent_loc)?.x();
        child.hoc()?.connect(&parent.hoc()?, parent_x, child_loc);
        Ok(())
    }

    /// Live sections in creation order.
    pub fn secs(&self) -> ModelResult<Vec<Sec>> {
        self.live(|p| &mut p.secs)
    }

    /// The section named exactly `name`.
    pub fn sec(&self, name: &str) -> ModelResult<Sec> {
        self.secs()?
            .into_iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| {
                LookupError::NotFound {
                    collection: self.collection("secs"),
                    filter: format!("{{name=='{name}'}}"),
                }
                .into()
            })
    }

    /// Sections matching `filter`.
    pub fn filter_secs(&self, filter: &Filter<Sec>) -> ModelResult<Vec<Sec>> {
        self.filter_in("secs", |p| &mut p.secs, filter)
    }

    /// Like [`filter_secs`](Self::filter_secs), unwrapping a single match.
    pub fn select_secs(&self, filter: &Filter<Sec>) -> ModelResult<Selection<Sec>> {
        self.select_in("secs", |p| &mut p.secs, filter)
    }

    /// Removes the sections matching `filter`. Returns how many were removed.
    pub fn remove_secs(&self, filter: &Filter<Sec>) -> ModelResult<usize> {
        self.remove_in("secs", |p| &mut p.secs, filter)
    }

    /// Inserts a density mechanism into the matching sections and sets its
    /// parameters. Nothing is inserted unless the mechanism declares every
    /// parameter.
    pub fn insert(
        &self,
        mechanism: &str,
        filter: &Filter<Sec>,
        params: &[(&str, f64)],
    ) -> ModelResult<()> {
        let mech = self.ctx().mechanism(mechanism)?;
        if mech.kind != MechanismKind::Density {
            return Err(TypeMismatch::NotADensityMechanism {
                mechanism: mechanism.to_string(),
            }
            .into());
        }
        if let Some((name, _)) = params.iter().find(|(name, _)| !mech.has_param(name)) {
            return Err(LookupError::UnknownParameter {
                mechanism: mechanism.to_string(),
                parameter: (*name).to_string(),
            }
            .into());
        }
        for sec in self.filter_secs(filter)? {
            let hoc = sec.hoc()?;
            self.ctx().insert_mechanism(&hoc, mechanism)?;
            for (name, value) in params {
                if !hoc.set_mechanism_param(mechanism, name, *value) {
                    return Err(LookupError::UnknownParameter {
                        mechanism: mechanism.to_string(),
                        parameter: (*name).to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Sets passive properties of the matching sections, inserting `pas`
    /// where missing. `rm` takes precedence over `g_pas`.
    pub fn set_pas(
        &self,
        filter: &Filter<Sec>,
        rm: Option<f64>,
        g_pas: Option<f64>,
        e_rest: Option<f64>,
    ) -> ModelResult<()> {
        let g_pas = positive("rm", rm)?.map(|rm| 1.0 / rm).or(g_pas);
        for sec in self.filter_secs(filter)? {
            let hoc = sec.hoc()?;
            if !hoc.has_mechanism("pas") {
                self.ctx().insert_mechanism(&hoc, "pas")?;
            }
            if let Some(v) = g_pas {
                hoc.set_mechanism_param("pas", "g_pas", v);
            }
            if let Some(v) = e_rest {
                hoc.set_mechanism_param("pas", "e_pas", v);
            }
        }
        Ok(())
    }

    /// Imports an SWC morphology and wraps the created sections.
    ///
    /// Fails before creating anything if a section name is already taken.
    pub fn load_morpho(&self, path: impl AsRef<Path>) -> ModelResult<Vec<Sec>> {
        let path = path.as_ref();
        let imported = import3d::import_file(path)?;
        for section in &imported {
            self.ensure_free_name(&section.name)?;
        }

        let mut created: Vec<Rc<HocSection>> = Vec::with_capacity(imported.len());
        let mut secs = Vec::with_capacity(imported.len());
        for section in &imported {
            let hoc = self.ctx().create_section(&section.name)?;
            hoc.update_props(|p| {
                p.length = section.length;
                p.diam = section.diam;
            });
            if let Some((parent, x)) = section.parent {
                if let Some(parent) = created.get(parent) {
                    hoc.connect(parent, x, 0.0);
                }
            }
            secs.push(self.wrap_section(Rc::clone(&hoc), &section.name)?);
            created.push(hoc);
        }
        info!(cell = %self.name(), path = %path.display(), sections = secs.len(), "morphology loaded");
        Ok(secs)
    }
}
