use std::fmt;
use std::rc::Rc;

use super::{Release, Removable, Seg, Slot};
use crate::cell::{Cell, WeakCell};
use crate::error::{LookupError, ModelResult};
use crate::filter::{FieldValue, Filterable};
use crate::simulator::HocPointProcess;

struct PointProcessFields {
    hoc: Rc<HocPointProcess>,
    // back-references, never removed from here
    seg: Seg,
    cell: WeakCell,
}

impl Release for PointProcessFields {}

struct PointProcessInner {
    name: String,
    mod_name: String,
    tag: Option<String>,
    slot: Slot<PointProcessFields>,
}

/// A point process placed on a segment.
#[derive(Clone)]
pub struct PointProcess(Rc<PointProcessInner>);

impl PointProcess {
    pub(crate) fn new(
        name: String,
        tag: Option<String>,
        hoc: Rc<HocPointProcess>,
        seg: Seg,
        cell: WeakCell,
    ) -> Self {
        Self(Rc::new(PointProcessInner {
            name,
            mod_name: hoc.mechanism().to_string(),
            tag,
            slot: Slot::new(PointProcessFields { hoc, seg, cell }),
        }))
    }

    /// Name in the `Mod[sec(x)][n]` form, with a `[tag]` suffix when tagged.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Mechanism name.
    #[must_use]
    pub fn mod_name(&self) -> &str {
        &self.0.mod_name
    }

    /// User tag.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.0.tag.as_deref()
    }

    /// Engine point process.
    pub fn hoc(&self) -> ModelResult<Rc<HocPointProcess>> {
        Ok(Rc::clone(&self.0.slot.get(self)?.hoc))
    }

    /// Segment the point process sits on.
    pub fn seg(&self) -> ModelResult<Seg> {
        Ok(self.0.slot.get(self)?.seg.clone())
    }

    /// Owning cell.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.0.slot.get(self).ok().and_then(|f| f.cell.upgrade())
    }

    /// Returns true if both handles are the same point process.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Reads a RANGE parameter.
    pub fn param(&self, name: &str) -> ModelResult<f64> {
        self.hoc()?.param(name).ok_or_else(|| self.unknown_param(name))
    }

    /// Sets a RANGE parameter.
    pub fn set_param(&self, name: &str, value: f64) -> ModelResult<()> {
        if self.hoc()?.set_param(name, value) {
            Ok(())
        } else {
            Err(self.unknown_param(name))
        }
    }

    fn unknown_param(&self, name: &str) -> crate::error::ModelError {
        LookupError::UnknownParameter {
            mechanism: self.mod_name().to_string(),
            parameter: name.to_string(),
        }
        .into()
    }
}

impl Removable for PointProcess {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for PointProcess {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "mod_name" => Some(self.mod_name().into()),
            "tag" => self.tag().map(Into::into),
            "parent" | "seg" => self.seg().ok().map(|s| s.name().into()),
            "sec" => self.seg().ok().map(|s| s.sec().name().into()),
            "cell" => self.cell().map(|c| c.name().into()),
            _ => None,
        }
    }
}

impl fmt::Display for PointProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell() {
            Some(cell) => write!(f, "{}[{}]", cell.name(), self.name()),
            None => f.write_str(self.name()),
        }
    }
}

impl fmt::Debug for PointProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointProcess")
            .field("name", &self.name())
            .field("mod_name", &self.mod_name())
            .field("removed", &self.is_removed())
            .finish()
    }
}
