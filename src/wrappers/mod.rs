//! Handles wrapping engine objects.
//!
//! Every wrapper is a cheap, cloneable handle: clones share one field table.
//! [`Removable::remove_now`] empties that table for every clone at once,
//! removes the owned sub-wrappers it held and drops its engine references.
//! Back-references (owning cell, parent segment, connection sources and
//! targets) are dropped without being removed, so removing a part never
//! removes its owner.
//!
//! The engine object itself disappears only when its last `Rc` goes, which
//! may be held elsewhere (eg. a point process keeps its section alive).

mod netcon;
mod netstim;
mod point_process;
mod sec;
mod spine;
mod synapse;
mod vecstim;

use std::cell::{Ref, RefCell};
use std::fmt;

use crate::error::{ModelError, ModelResult};

pub use netcon::{ConnSource, NetCon};
pub use netstim::NetStim;
pub use point_process::PointProcess;
pub use sec::{Sec, Seg};
pub use spine::Spine;
pub use synapse::{AnySynapse, SingleSynapse, Synapse, SynapticGroup};
pub use vecstim::VecStim;

/// Objects supporting deterministic removal.
///
/// States: live, then removed. Removal is terminal and idempotent.
pub trait Removable {
    /// Releases the fields of this object, removing the sub-objects it owns.
    fn remove_now(&self);

    /// Returns true once [`remove_now`](Self::remove_now) has run.
    fn is_removed(&self) -> bool;
}

impl<T: Removable> Removable for Vec<T> {
    fn remove_now(&self) {
        for item in self {
            item.remove_now();
        }
    }

    fn is_removed(&self) -> bool {
        self.iter().all(Removable::is_removed)
    }
}

/// Field tables that know which of their fields they own.
pub(crate) trait Release: Sized {
    /// Removes owned sub-wrappers. Everything else is dropped with `self`.
    fn release(self) {}
}

/// A wrapper's field table.
pub(crate) struct Slot<F> {
    fields: RefCell<Option<F>>,
}

impl<F: Release> Slot<F> {
    pub(crate) fn new(fields: F) -> Self {
        Self {
            fields: RefCell::new(Some(fields)),
        }
    }

    /// Borrows the fields, or fails with [`LookupError::Removed`](crate::error::LookupError::Removed).
    pub(crate) fn get(&self, what: &dyn fmt::Display) -> ModelResult<Ref<'_, F>> {
        Ref::filter_map(self.fields.borrow(), Option::as_ref)
            .map_err(|_| ModelError::removed(what.to_string()))
    }

    pub(crate) fn with_mut<R>(
        &self,
        what: &dyn fmt::Display,
        f: impl FnOnce(&mut F) -> R,
    ) -> ModelResult<R> {
        let mut fields = self.fields.borrow_mut();
        let fields = fields
            .as_mut()
            .ok_or_else(|| ModelError::removed(what.to_string()))?;
        Ok(f(fields))
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fields.borrow().is_none()
    }

    pub(crate) fn release(&self) {
        // take first: releasing may reach back into this slot through a clone
        let taken = self.fields.borrow_mut().take();
        if let Some(fields) = taken {
            fields.release();
        }
    }
}

/// Formats a location the way section names carry it, eg. `0.5`.
pub(crate) fn fmt_loc(x: f64) -> String {
    let s = format!("{x:.4}");
    let s = s.trim_end_matches('0');
    let s = s.strip_suffix('.').map_or(s, |t| t);
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}
