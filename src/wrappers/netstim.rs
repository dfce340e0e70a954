use std::fmt;
use std::rc::Rc;

use super::{Release, Removable, Slot};
use crate::error::ModelResult;
use crate::filter::{FieldValue, Filterable};
use crate::simulator::{HocNetStim, NetStimParams};

struct NetStimFields {
    hoc: Rc<HocNetStim>,
}

impl Release for NetStimFields {}

struct NetStimInner {
    name: String,
    owner: String,
    slot: Slot<NetStimFields>,
}

/// A spike train generator owned by a [`StimCell`](crate::StimCell).
#[derive(Clone)]
pub struct NetStim(Rc<NetStimInner>);

impl NetStim {
    pub(crate) fn new(name: String, owner: String, hoc: Rc<HocNetStim>) -> Self {
        Self(Rc::new(NetStimInner {
            name,
            owner,
            slot: Slot::new(NetStimFields { hoc }),
        }))
    }

    /// Index-like name, unique within the owner.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Name of the owning stimulus cell.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.0.owner
    }

    /// Engine generator.
    pub fn hoc(&self) -> ModelResult<Rc<HocNetStim>> {
        Ok(Rc::clone(&self.0.slot.get(self)?.hoc))
    }

    /// Current generator parameters.
    pub fn params(&self) -> ModelResult<NetStimParams> {
        Ok(self.hoc()?.params())
    }

    /// Returns true if both handles are the same generator.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Removable for NetStim {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for NetStim {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "owner" | "cell" => Some(self.owner().into()),
            _ => None,
        }
    }
}

impl fmt::Display for NetStim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[NetStim][{}]", self.owner(), self.name())
    }
}

impl fmt::Debug for NetStim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetStim")
            .field("name", &self.name())
            .field("owner", &self.owner())
            .finish()
    }
}
