use tracing::debug;

use super::Cell;
use crate::dist::Param;
use crate::error::{LookupError, ModelResult, ValidationError};
use crate::filter::Filter;
use crate::wrappers::{fmt_loc, PointProcess, Seg};

impl Cell {
    /// Places a point process of mechanism `mod_name` on `seg`.
    ///
    /// The name is `Mod[sec(x)][n]`, numbered per mechanism and section, with
    /// a `[tag]` suffix when tagged. Parameters must be RANGE variables of the
    /// mechanism.
    pub fn add_point_process(
        &self,
        mod_name: &str,
        seg: &Seg,
        tag: Option<&str>,
        params: &[(&str, f64)],
    ) -> ModelResult<PointProcess> {
        self.parts()?;
        let hoc = self
            .ctx()
            .create_point_process(mod_name, &seg.hoc_section()?, seg.x())?;
        for (name, value) in params {
            if !hoc.set_param(name, *value) {
                return Err(LookupError::UnknownParameter {
                    mechanism: mod_name.to_string(),
                    parameter: (*name).to_string(),
                }
                .into());
            }
        }

        let sec_name = seg.sec().name();
        let n = self.next_number(&format!("pp:{mod_name}_{sec_name}"))?;
        let mut name = format!("{mod_name}[{sec_name}({})][{n}]", fmt_loc(hoc.x()));
        if let Some(tag) = tag {
            name = format!("{name}[{tag}]");
        }

        let pp = PointProcess::new(
            name,
            tag.map(ToString::to_string),
            hoc,
            seg.clone(),
            self.downgrade(),
        );
        self.push(|p| &mut p.pps, pp.clone())?;
        debug!(cell = %self.name(), pp = pp.name(), "point process added");
        Ok(pp)
    }

    /// Live point processes in creation order.
    pub fn point_processes(&self) -> ModelResult<Vec<PointProcess>> {
        self.live(|p| &mut p.pps)
    }

    /// Point processes matching `filter`.
    pub fn filter_point_processes(
        &self,
        filter: &Filter<PointProcess>,
    ) -> ModelResult<Vec<PointProcess>> {
        self.filter_in("pps", |p| &mut p.pps, filter)
    }

    /// Removes the point processes matching `filter`.
    pub fn remove_point_processes(&self, filter: &Filter<PointProcess>) -> ModelResult<usize> {
        self.remove_in("pps", |p| &mut p.pps, filter)
    }

    /// Places a current clamp on `seg` injecting `amp` nA from `delay` ms
    /// for `dur` ms. Distributions are drawn once per clamp.
    ///
    /// The clamp is an `IClamp` point process of this cell.
    pub fn add_iclamp(
        &self,
        seg: &Seg,
        delay: impl Into<Param>,
        dur: impl Into<Param>,
        amp: impl Into<Param>,
    ) -> ModelResult<PointProcess> {
        let (delay, dur, amp) = {
            let mut rng = self.ctx().rng();
            (
                delay.into().resolve(&mut *rng)?,
                dur.into().resolve(&mut *rng)?,
                amp.into().resolve(&mut *rng)?,
            )
        };
        for (field, value) in [("delay", delay), ("dur", dur)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ValidationError::Negative {
                    field: field.to_string(),
                    value,
                }
                .into());
            }
        }
        self.add_point_process("IClamp", seg, None, &[("del", delay), ("dur", dur), ("amp", amp)])
    }

    /// Live current clamps in creation order.
    pub fn iclamps(&self) -> ModelResult<Vec<PointProcess>> {
        Ok(self
            .point_processes()?
            .into_iter()
            .filter(|pp| pp.mod_name() == "IClamp")
            .collect())
    }
}
