use std::fmt;
use std::rc::Rc;

use super::{NetStim, PointProcess, Release, Removable, Seg, Slot, VecStim};
use crate::cell::{Cell, WeakCell};
use crate::error::{ModelResult, ValidationError};
use crate::filter::{FieldValue, Filterable};
use crate::simulator::{HocNetCon, HocNetConSource, SimulationContext};

/// What a connection listens to.
#[derive(Clone, Debug)]
pub enum ConnSource {
    /// No source. Events are injected with [`NetCon::make_event`].
    None,
    /// Voltage threshold crossing at a segment.
    Seg(Seg),
    /// A spike train generator.
    NetStim(NetStim),
    /// A player of fixed spike times.
    VecStim(VecStim),
}

impl ConnSource {
    pub(crate) fn to_hoc(&self) -> ModelResult<HocNetConSource> {
        Ok(match self {
            Self::None => HocNetConSource::None,
            Self::Seg(seg) => HocNetConSource::Segment {
                section: seg.hoc_section()?,
                x: seg.x(),
            },
            Self::NetStim(stim) => HocNetConSource::Stim(stim.hoc()?),
            Self::VecStim(stim) => HocNetConSource::VecStim(stim.hoc()?),
        })
    }

    /// Returns true for [`ConnSource::None`].
    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    fn label(&self) -> String {
        match self {
            Self::None => "None".to_string(),
            Self::Seg(seg) => match seg.sec().cell_name() {
                Some(cell) => format!("{cell}[{}]", seg.name()),
                None => seg.name(),
            },
            Self::NetStim(stim) => stim.to_string(),
            Self::VecStim(stim) => stim.to_string(),
        }
    }
}

impl From<Seg> for ConnSource {
    fn from(seg: Seg) -> Self {
        Self::Seg(seg)
    }
}

impl From<NetStim> for ConnSource {
    fn from(stim: NetStim) -> Self {
        Self::NetStim(stim)
    }
}

impl From<VecStim> for ConnSource {
    fn from(stim: VecStim) -> Self {
        Self::VecStim(stim)
    }
}

impl<S: Into<ConnSource>> From<Option<S>> for ConnSource {
    fn from(source: Option<S>) -> Self {
        source.map_or(Self::None, Into::into)
    }
}

impl fmt::Display for ConnSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

struct NetConFields {
    hoc: Rc<HocNetCon>,
    ctx: SimulationContext,
    // endpoints belong to other owners
    source: ConnSource,
    target: Option<PointProcess>,
    cell: WeakCell,
}

impl Release for NetConFields {}

struct NetConInner {
    name: String,
    slot: Slot<NetConFields>,
}

/// A network connection from a source to a point process.
#[derive(Clone)]
pub struct NetCon(Rc<NetConInner>);

impl NetCon {
    pub(crate) fn new(
        name: Option<String>,
        hoc: Rc<HocNetCon>,
        ctx: SimulationContext,
        source: ConnSource,
        target: Option<PointProcess>,
        cell: WeakCell,
    ) -> Self {
        let name = name.unwrap_or_else(|| {
            let target = target.as_ref().map_or("None".to_string(), ToString::to_string);
            format!("{}->{target}", source.label())
        });
        Self(Rc::new(NetConInner {
            name,
            slot: Slot::new(NetConFields {
                hoc,
                ctx,
                source,
                target,
                cell,
            }),
        }))
    }

    /// Name in the `source->target` form.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Engine connection.
    pub fn hoc(&self) -> ModelResult<Rc<HocNetCon>> {
        Ok(Rc::clone(&self.0.slot.get(self)?.hoc))
    }

    /// Connection source.
    pub fn source(&self) -> ModelResult<ConnSource> {
        Ok(self.0.slot.get(self)?.source.clone())
    }

    /// Target point process, `None` for spike detectors.
    pub fn target(&self) -> ModelResult<Option<PointProcess>> {
        Ok(self.0.slot.get(self)?.target.clone())
    }

    /// Owning cell.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.0.slot.get(self).ok().and_then(|f| f.cell.upgrade())
    }

    /// Returns true if both handles are the same connection.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Synaptic weight.
    pub fn weight(&self) -> ModelResult<f64> {
        Ok(self.hoc()?.weight())
    }

    /// Sets the synaptic weight.
    pub fn set_weight(&self, weight: f64) -> ModelResult<()> {
        self.hoc()?.set_weight(weight);
        Ok(())
    }

    /// Delivery delay in ms.
    pub fn delay(&self) -> ModelResult<f64> {
        Ok(self.hoc()?.delay())
    }

    /// Sets the delivery delay in ms.
    pub fn set_delay(&self, delay: f64) -> ModelResult<()> {
        if delay < 0.0 {
            return Err(ValidationError::Negative {
                field: "delay".to_string(),
                value: delay,
            }
            .into());
        }
        self.hoc()?.set_delay(delay);
        Ok(())
    }

    /// Source voltage threshold in mV.
    pub fn threshold(&self) -> ModelResult<f64> {
        Ok(self.hoc()?.threshold())
    }

    /// Sets the source voltage threshold in mV.
    pub fn set_threshold(&self, threshold: f64) -> ModelResult<()> {
        self.hoc()?.set_threshold(threshold);
        Ok(())
    }

    /// Spike times recorded so far, if recording is on.
    pub fn recorded(&self) -> ModelResult<Option<Vec<f64>>> {
        Ok(self.hoc()?.recorded())
    }

    /// Queues an event `time` ms from now.
    ///
    /// With `use_global_time` the current clock is added to `time`; with
    /// `use_delay` the connection delay is added as well. Fails before the
    /// clock has started.
    pub fn make_event(&self, time: f64, use_global_time: bool, use_delay: bool) -> ModelResult<()> {
        let fields = self.0.slot.get(self)?;
        let now = fields.ctx.t();
        if now <= 0.0 {
            return Err(ValidationError::EventBeforeRun.into());
        }
        let mut at = time;
        if use_delay {
            at += fields.hoc.delay();
        }
        if use_global_time {
            at += now;
        }
        fields.hoc.event(at);
        Ok(())
    }
}

impl Removable for NetCon {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for NetCon {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "mod_name" => self
                .target()
                .ok()
                .flatten()
                .map(|pp| pp.mod_name().into()),
            "source" => self.source().ok().map(|s| s.label().into()),
            "target" => self.target().ok().flatten().map(|pp| pp.name().into()),
            "cell" => self.cell().map(|c| c.name().into()),
            _ => None,
        }
    }
}

impl fmt::Display for NetCon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for NetCon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetCon")
            .field("name", &self.name())
            .field("removed", &self.is_removed())
            .finish()
    }
}
