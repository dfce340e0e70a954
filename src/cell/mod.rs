//! Cells: named owners of sections and everything placed on them.
//!
//! A [`Cell`] is one concrete type composed of component collections
//! (sections, point processes, connections, synapses, synaptic groups and
//! spines). Each component has its own file with the `add_*`, `filter_*` and
//! `remove_*` operations for it.
//!
//! Parts refer back to their cell through a [`WeakCell`], so a cell is freed
//! when the last `Cell` handle goes even if its parts are still referenced.

mod netcons;
mod point_processes;
mod sections;
mod spines;
mod stim;
mod synapses;

use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::ModelResult;
use crate::filter::{self, Filter, Filterable, Selection};
use crate::simulator::SimulationContext;
use crate::wrappers::{
    NetCon, PointProcess, Release, Removable, Sec, SingleSynapse, Slot, Spine, SynapticGroup,
};

pub use sections::SectionSpec;
pub use stim::StimCell;
pub use synapses::SynapseSpec;

#[derive(Default)]
struct CellParts {
    secs: Vec<Sec>,
    pps: Vec<PointProcess>,
    ncs: Vec<NetCon>,
    syns: Vec<SingleSynapse>,
    groups: Vec<SynapticGroup>,
    spines: Vec<Spine>,
    spike_detector: Option<NetCon>,
    counters: HashMap<String, usize>,
}

impl Release for CellParts {
    fn release(self) {
        self.groups.remove_now();
        self.syns.remove_now();
        self.ncs.remove_now();
        if let Some(detector) = &self.spike_detector {
            detector.remove_now();
        }
        self.pps.remove_now();
        self.spines.remove_now();
        self.secs.remove_now();
    }
}

pub(crate) struct CellInner {
    ctx: SimulationContext,
    name: RefCell<String>,
    parts: Slot<CellParts>,
}

/// Handle to a cell. Clones share the same cell.
#[derive(Clone)]
pub struct Cell {
    inner: Rc<CellInner>,
}

/// Non-owning reference from a part to its cell.
#[derive(Clone, Default)]
pub(crate) struct WeakCell(Weak<CellInner>);

impl WeakCell {
    /// A reference to no cell.
    pub(crate) fn detached() -> Self {
        Self(Weak::new())
    }

    pub(crate) fn upgrade(&self) -> Option<Cell> {
        self.0.upgrade().map(|inner| Cell { inner })
    }

    pub(crate) fn name(&self) -> Option<String> {
        self.0.upgrade().map(|inner| inner.name.borrow().clone())
    }
}

impl Cell {
    /// Creates an empty cell in `ctx`.
    #[must_use]
    pub fn new(ctx: &SimulationContext, name: impl Into<String>) -> Self {
        let name = name.into();
        debug!(cell = %name, "cell created");
        Self {
            inner: Rc::new(CellInner {
                ctx: ctx.clone(),
                name: RefCell::new(name),
                parts: Slot::new(CellParts::default()),
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

    /// Context the cell lives in.
    #[must_use]
    pub fn ctx(&self) -> &SimulationContext {
        &self.inner.ctx
    }

    /// Returns true if both handles are the same cell.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakCell {
        WeakCell(Rc::downgrade(&self.inner))
    }

    fn parts(&self) -> ModelResult<Ref<'_, CellParts>> {
        self.inner.parts.get(self)
    }

    fn with_parts<R>(&self, f: impl FnOnce(&mut CellParts) -> R) -> ModelResult<R> {
        self.inner.parts.with_mut(self, f)
    }

    /// Takes the next number of a per-cell counter.
    fn next_number(&self, key: &str) -> ModelResult<usize> {
        self.with_parts(|p| {
            let n = p.counters.entry(key.to_string()).or_insert(0);
            let current = *n;
            *n += 1;
            current
        })
    }

    fn collection(&self, what: &str) -> String {
        format!("{}.{what}", self.name())
    }

    /// Live members of a collection. Removed handles are dropped on the way.
    fn live<T: Removable + Clone>(
        &self,
        pick: fn(&mut CellParts) -> &mut Vec<T>,
    ) -> ModelResult<Vec<T>> {
        self.with_parts(|p| {
            let items = pick(p);
            items.retain(|item| !item.is_removed());
            items.clone()
        })
    }

    fn filter_in<T: Filterable + Removable + Clone>(
        &self,
        what: &str,
        pick: fn(&mut CellParts) -> &mut Vec<T>,
        f: &Filter<T>,
    ) -> ModelResult<Vec<T>> {
        filter::filter(&self.collection(what), &self.live(pick)?, f)
    }

    fn select_in<T: Filterable + Removable + Clone>(
        &self,
        what: &str,
        pick: fn(&mut CellParts) -> &mut Vec<T>,
        f: &Filter<T>,
    ) -> ModelResult<Selection<T>> {
        filter::select(&self.collection(what), &self.live(pick)?, f)
    }

    fn remove_in<T: Filterable + Removable>(
        &self,
        what: &str,
        pick: fn(&mut CellParts) -> &mut Vec<T>,
        f: &Filter<T>,
    ) -> ModelResult<usize> {
        let mut items = self.with_parts(|p| std::mem::take(pick(p)))?;
        items.retain(|item| !item.is_removed());
        let removed = filter::remove(&self.collection(what), &mut items, f);
        self.with_parts(|p| {
            let added = std::mem::replace(pick(p), items);
            pick(p).extend(added);
        })?;
        let removed = removed?;
        debug!(cell = %self.name(), collection = what, removed, "removed from cell");
        Ok(removed)
    }

    fn push<T>(&self, pick: fn(&mut CellParts) -> &mut Vec<T>, item: T) -> ModelResult<()> {
        self.with_parts(|p| pick(p).push(item))
    }
}

impl Removable for Cell {
    fn remove_now(&self) {
        if !self.inner.parts.is_empty() {
            debug!(cell = %self.name(), "cell removed");
        }
        self.inner.parts.release();
    }

    fn is_removed(&self) -> bool {
        self.inner.parts.is_empty()
    }
}

impl Filterable for Cell {
    fn field(&self, name: &str) -> Option<crate::filter::FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            _ => None,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name.borrow())
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Cell");
        s.field("name", &*self.inner.name.borrow());
        match self.parts() {
            Ok(p) => s
                .field("secs", &p.secs.len())
                .field("syns", &p.syns.len())
                .finish(),
            Err(_) => s.field("removed", &true).finish(),
        }
    }
}
