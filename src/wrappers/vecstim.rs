use std::fmt;
use std::rc::Rc;

use super::{Release, Removable, Slot};
use crate::error::ModelResult;
use crate::filter::{FieldValue, Filterable};
use crate::simulator::HocVecStim;

struct VecStimFields {
    hoc: Rc<HocVecStim>,
}

impl Release for VecStimFields {}

struct VecStimInner {
    name: String,
    owner: String,
    slot: Slot<VecStimFields>,
}

/// A generator replaying fixed spike times, owned by a
/// [`StimCell`](crate::StimCell).
#[derive(Clone)]
pub struct VecStim(Rc<VecStimInner>);

impl VecStim {
    pub(crate) fn new(name: String, owner: String, hoc: Rc<HocVecStim>) -> Self {
        Self(Rc::new(VecStimInner {
            name,
            owner,
            slot: Slot::new(VecStimFields { hoc }),
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

    /// Engine player.
    pub fn hoc(&self) -> ModelResult<Rc<HocVecStim>> {
        Ok(Rc::clone(&self.0.slot.get(self)?.hoc))
    }

    /// Played spike times in ms.
    pub fn times(&self) -> ModelResult<Vec<f64>> {
        Ok(self.hoc()?.times())
    }

    /// Returns true if both handles are the same player.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Removable for VecStim {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for VecStim {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "owner" | "cell" => Some(self.owner().into()),
            _ => None,
        }
    }
}

impl fmt::Display for VecStim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[VecStim][{}]", self.owner(), self.name())
    }
}

impl fmt::Debug for VecStim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecStim")
            .field("name", &self.name())
            .field("owner", &self.owner())
            .finish()
    }
}
