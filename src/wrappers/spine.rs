use std::fmt;
use std::rc::Rc;

use super::{Release, Removable, Sec, Slot};
use crate::error::ModelResult;
use crate::filter::{FieldValue, Filterable};

struct SpineFields {
    head: Sec,
    neck: Sec,
}

impl Release for SpineFields {
    fn release(self) {
        self.head.remove_now();
        self.neck.remove_now();
    }
}

struct SpineInner {
    name: String,
    slot: Slot<SpineFields>,
}

/// A head and neck section pair. The head sits on the 1.0 end of the neck.
#[derive(Clone)]
pub struct Spine(Rc<SpineInner>);

impl Spine {
    pub(crate) fn new(name: String, head: Sec, neck: Sec) -> Self {
        Self(Rc::new(SpineInner {
            name,
            slot: Slot::new(SpineFields { head, neck }),
        }))
    }

    /// Spine name, eg. `spine[3]`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Head section.
    pub fn head(&self) -> ModelResult<Sec> {
        Ok(self.0.slot.get(self)?.head.clone())
    }

    /// Neck section.
    pub fn neck(&self) -> ModelResult<Sec> {
        Ok(self.0.slot.get(self)?.neck.clone())
    }

    /// Name of the section the neck is attached to.
    pub fn parent_name(&self) -> ModelResult<Option<String>> {
        self.neck()?.parent_name()
    }
}

impl Removable for Spine {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for Spine {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "parent" => self.parent_name().ok().flatten().map(Into::into),
            "head" => self.head().ok().map(|s| s.name().into()),
            "neck" => self.neck().ok().map(|s| s.name().into()),
            "cell" => self.head().ok().and_then(|s| s.cell_name()).map(Into::into),
            _ => None,
        }
    }
}

impl fmt::Display for Spine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Spine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spine")
            .field("name", &self.name())
            .field("removed", &self.is_removed())
            .finish()
    }
}
