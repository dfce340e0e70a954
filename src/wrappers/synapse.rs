//! Synapses: a point process with its incoming connections, and groups of
//! such synapses sharing one segment.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::{ConnSource, NetCon, PointProcess, Release, Removable, Seg, Slot};
use crate::cell::{Cell, WeakCell};
use crate::error::{LookupError, ModelError, ModelResult, TypeMismatch, ValidationError};
use crate::filter::{FieldValue, Filterable};

/// Common operations of single synapses and synaptic groups.
pub trait Synapse {
    /// Synapse name.
    fn name(&self) -> &str;

    /// Mechanism name. Groups join their members' names with `_`.
    fn mod_name(&self) -> &str;

    /// User tag.
    fn tag(&self) -> Option<&str>;

    /// Queues an event on every connection of the synapse.
    fn make_event(&self, time: f64, use_global_time: bool) -> ModelResult<()>;

    /// Adds a connection from `source` to the synapse.
    fn add_netcon(
        &self,
        source: ConnSource,
        weight: f64,
        delay: f64,
        threshold: f64,
    ) -> ModelResult<()>;
}

struct SingleFields {
    point_process: PointProcess,
    netcons: Vec<NetCon>,
    // owned by other cells or stimulus cells
    sources: Vec<ConnSource>,
    cell: WeakCell,
}

impl Release for SingleFields {
    fn release(self) {
        self.netcons.remove_now();
        self.point_process.remove_now();
    }
}

struct SingleInner {
    name: String,
    mod_name: String,
    tag: Option<String>,
    slot: Slot<SingleFields>,
}

/// One point process and the connections targeting it.
#[derive(Clone)]
pub struct SingleSynapse(Rc<SingleInner>);

impl SingleSynapse {
    pub(crate) fn new(
        name: String,
        point_process: PointProcess,
        netcons: Vec<NetCon>,
        sources: Vec<ConnSource>,
        cell: WeakCell,
    ) -> Self {
        Self(Rc::new(SingleInner {
            name,
            mod_name: point_process.mod_name().to_string(),
            tag: point_process.tag().map(ToString::to_string),
            slot: Slot::new(SingleFields {
                point_process,
                netcons,
                sources: sources.into_iter().filter(|s| !s.is_none()).collect(),
                cell,
            }),
        }))
    }

    /// The synapse's point process.
    pub fn point_process(&self) -> ModelResult<PointProcess> {
        Ok(self.0.slot.get(self)?.point_process.clone())
    }

    /// Connections targeting the point process, in creation order.
    pub fn netcons(&self) -> ModelResult<Vec<NetCon>> {
        Ok(self.0.slot.get(self)?.netcons.clone())
    }

    /// Sources of the connections, without the empty ones.
    pub fn sources(&self) -> ModelResult<Vec<ConnSource>> {
        Ok(self.0.slot.get(self)?.sources.clone())
    }

    /// Segment the synapse sits on.
    pub fn parent(&self) -> ModelResult<Seg> {
        self.point_process()?.seg()
    }

    /// Owning cell.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.0.slot.get(self).ok().and_then(|f| f.cell.upgrade())
    }

    /// Returns true if both handles are the same synapse.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Synapse for SingleSynapse {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn mod_name(&self) -> &str {
        &self.0.mod_name
    }

    fn tag(&self) -> Option<&str> {
        self.0.tag.as_deref()
    }

    fn make_event(&self, time: f64, use_global_time: bool) -> ModelResult<()> {
        for nc in self.netcons()? {
            nc.make_event(time, use_global_time, true)?;
        }
        Ok(())
    }

    fn add_netcon(
        &self,
        source: ConnSource,
        weight: f64,
        delay: f64,
        threshold: f64,
    ) -> ModelResult<()> {
        let (point_process, cell) = {
            let fields = self.0.slot.get(self)?;
            (fields.point_process.clone(), fields.cell.upgrade())
        };
        let cell = cell.ok_or_else(|| ModelError::removed(format!("cell of {self}")))?;
        let nc = cell.add_netcon(source.clone(), Some(&point_process), weight, delay, threshold)?;
        self.0.slot.with_mut(self, |f| {
            f.netcons.push(nc);
            if !source.is_none() {
                f.sources.push(source);
            }
        })
    }
}

impl Removable for SingleSynapse {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for SingleSynapse {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "mod_name" => Some(self.mod_name().into()),
            "tag" => self.tag().map(Into::into),
            "parent" | "seg" => self.parent().ok().map(|s| s.name().into()),
            "point_process" => self.point_process().ok().map(|pp| pp.name().into()),
            "source" => {
                let sources = self.sources().ok()?;
                let labels: Vec<String> = sources.iter().map(ToString::to_string).collect();
                (!labels.is_empty()).then(|| labels.join(",").into())
            }
            "cell" => self.cell().map(|c| c.name().into()),
            _ => None,
        }
    }
}

impl fmt::Display for SingleSynapse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell() {
            Some(cell) => write!(f, "{}[SingleSynapse][{}]", cell.name(), self.name()),
            None => write!(f, "SingleSynapse[{}]", self.name()),
        }
    }
}

impl fmt::Debug for SingleSynapse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleSynapse")
            .field("name", &self.name())
            .field("removed", &self.is_removed())
            .finish()
    }
}

struct GroupFields {
    synapses: BTreeMap<String, SingleSynapse>,
    parent: Seg,
    cell: WeakCell,
}

impl Release for GroupFields {
    fn release(self) {
        for syn in self.synapses.values() {
            syn.remove_now();
        }
    }
}

struct GroupInner {
    name: String,
    mod_name: String,
    tag: Option<String>,
    slot: Slot<GroupFields>,
}

/// Synapses of different mechanisms on one segment, keyed by mechanism name.
#[derive(Clone)]
pub struct SynapticGroup(Rc<GroupInner>);

impl SynapticGroup {
    /// Groups `synapses`, which must be non-empty, share one parent segment
    /// and use distinct mechanisms.
    pub(crate) fn new(
        synapses: Vec<SingleSynapse>,
        name: &str,
        tag: Option<String>,
        cell: WeakCell,
    ) -> ModelResult<Self> {
        let first = synapses
            .first()
            .ok_or(ValidationError::EmptySynapticGroup)?
            .parent()?;

        let mut by_mod = BTreeMap::new();
        let mut mod_names = Vec::with_capacity(synapses.len());
        for syn in synapses {
            let parent = syn.parent()?;
            if !parent.same_as(&first) {
                return Err(TypeMismatch::MixedSynapseParents {
                    first: first.name(),
                    other: parent.name(),
                }
                .into());
            }
            let mod_name = syn.mod_name().to_string();
            if by_mod.contains_key(&mod_name) {
                return Err(LookupError::DuplicateName {
                    name: mod_name,
                    owner: format!("synaptic group '{name}'"),
                }
                .into());
            }
            mod_names.push(mod_name.clone());
            by_mod.insert(mod_name, syn);
        }

        let mod_name = mod_names.join("_");
        Ok(Self(Rc::new(GroupInner {
            name: format!("{mod_name}[{name}]"),
            mod_name,
            tag,
            slot: Slot::new(GroupFields {
                synapses: by_mod,
                parent: first,
                cell,
            }),
        })))
    }

    /// Member synapse of mechanism `mod_name`.
    pub fn get(&self, mod_name: &str) -> ModelResult<Option<SingleSynapse>> {
        Ok(self.0.slot.get(self)?.synapses.get(mod_name).cloned())
    }

    /// Member synapses ordered by mechanism name.
    pub fn synapses(&self) -> ModelResult<Vec<SingleSynapse>> {
        Ok(self.0.slot.get(self)?.synapses.values().cloned().collect())
    }

    /// The shared parent segment.
    pub fn parent(&self) -> ModelResult<Seg> {
        Ok(self.0.slot.get(self)?.parent.clone())
    }

    /// Owning cell.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.0.slot.get(self).ok().and_then(|f| f.cell.upgrade())
    }
}

impl Synapse for SynapticGroup {
    fn name(&self) -> &str {
        &self.0.name
    }

    fn mod_name(&self) -> &str {
        &self.0.mod_name
    }

    fn tag(&self) -> Option<&str> {
        self.0.tag.as_deref()
    }

    fn make_event(&self, time: f64, use_global_time: bool) -> ModelResult<()> {
        for syn in self.synapses()? {
            syn.make_event(time, use_global_time)?;
        }
        Ok(())
    }

    fn add_netcon(
        &self,
        source: ConnSource,
        weight: f64,
        delay: f64,
        threshold: f64,
    ) -> ModelResult<()> {
        for syn in self.synapses()? {
            syn.add_netcon(source.clone(), weight, delay, threshold)?;
        }
        Ok(())
    }
}

impl Removable for SynapticGroup {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for SynapticGroup {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "mod_name" => Some(self.mod_name().into()),
            "tag" => self.tag().map(Into::into),
            "parent" | "seg" => self.parent().ok().map(|s| s.name().into()),
            "cell" => self.cell().map(|c| c.name().into()),
            _ => None,
        }
    }
}

impl fmt::Display for SynapticGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members = self
            .synapses()
            .map(|s| s.iter().map(|m| m.mod_name().to_string()).collect::<Vec<_>>().join("+"))
            .unwrap_or_default();
        write!(f, "SynapticGroup[{}][{members}]", self.name())
    }
}

impl fmt::Debug for SynapticGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynapticGroup")
            .field("name", &self.name())
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Either kind of synapse, as produced by population builds.
#[derive(Clone, Debug)]
pub enum AnySynapse {
    /// A single synapse.
    Single(SingleSynapse),
    /// A group of synapses on one segment.
    Group(SynapticGroup),
}

impl AnySynapse {
    /// The single synapse, if this is one.
    #[must_use]
    pub fn as_single(&self) -> Option<&SingleSynapse> {
        match self {
            Self::Single(s) => Some(s),
            Self::Group(_) => None,
        }
    }

    /// The group, if this is one.
    #[must_use]
    pub fn as_group(&self) -> Option<&SynapticGroup> {
        match self {
            Self::Group(g) => Some(g),
            Self::Single(_) => None,
        }
    }

    /// Segment the synapse sits on.
    pub fn parent(&self) -> ModelResult<Seg> {
        match self {
            Self::Single(s) => s.parent(),
            Self::Group(g) => g.parent(),
        }
    }

    /// Owning cell.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        match self {
            Self::Single(s) => s.cell(),
            Self::Group(g) => g.cell(),
        }
    }

    fn inner(&self) -> &dyn Synapse {
        match self {
            Self::Single(s) => s,
            Self::Group(g) => g,
        }
    }
}

impl From<SingleSynapse> for AnySynapse {
    fn from(s: SingleSynapse) -> Self {
        Self::Single(s)
    }
}

impl From<SynapticGroup> for AnySynapse {
    fn from(g: SynapticGroup) -> Self {
        Self::Group(g)
    }
}

impl Synapse for AnySynapse {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn mod_name(&self) -> &str {
        self.inner().mod_name()
    }

    fn tag(&self) -> Option<&str> {
        self.inner().tag()
    }

    fn make_event(&self, time: f64, use_global_time: bool) -> ModelResult<()> {
        self.inner().make_event(time, use_global_time)
    }

    fn add_netcon(
        &self,
        source: ConnSource,
        weight: f64,
        delay: f64,
        threshold: f64,
    ) -> ModelResult<()> {
        self.inner().add_netcon(source, weight, delay, threshold)
    }
}

impl Removable for AnySynapse {
    fn remove_now(&self) {
        match self {
            Self::Single(s) => s.remove_now(),
            Self::Group(g) => g.remove_now(),
        }
    }

    fn is_removed(&self) -> bool {
        match self {
            Self::Single(s) => s.is_removed(),
            Self::Group(g) => g.is_removed(),
        }
    }
}

impl Filterable for AnySynapse {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match self {
            Self::Single(s) => s.field(name),
            Self::Group(g) => g.field(name),
        }
    }
}

impl fmt::Display for AnySynapse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(s) => fmt::Display::fmt(s, f),
            Self::Group(g) => fmt::Display::fmt(g, f),
        }
    }
}
