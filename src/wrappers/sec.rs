use std::fmt;
use std::rc::Rc;

use super::{fmt_loc, Release, Removable, Slot};
use crate::cell::{Cell, WeakCell};
use crate::error::{ModelResult, ValidationError};
use crate::filter::{FieldValue, Filterable};
use crate::simulator::{HocSection, SectionProps};

struct SecFields {
    hoc: Rc<HocSection>,
    cell: WeakCell,
}

impl Release for SecFields {}

struct SecInner {
    name: String,
    slot: Slot<SecFields>,
}

/// A section owned by a cell.
#[derive(Clone)]
pub struct Sec(Rc<SecInner>);

impl Sec {
    pub(crate) fn new(name: impl Into<String>, hoc: Rc<HocSection>, cell: WeakCell) -> Self {
        Self(Rc::new(SecInner {
            name: name.into(),
            slot: Slot::new(SecFields { hoc, cell }),
        }))
    }

    /// Section name, unique within its cell.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Engine section.
    pub fn hoc(&self) -> ModelResult<Rc<HocSection>> {
        Ok(Rc::clone(&self.0.slot.get(self)?.hoc))
    }

    /// Owning cell, while both are alive.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.0.slot.get(self).ok().and_then(|f| f.cell.upgrade())
    }

    /// Name of the owning cell.
    #[must_use]
    pub fn cell_name(&self) -> Option<String> {
        self.0.slot.get(self).ok().and_then(|f| f.cell.name())
    }

    /// Returns true if both handles are the same section.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Segment containing `loc`, which must lie in [0, 1].
    pub fn seg(&self, loc: f64) -> ModelResult<Seg> {
        if !(0.0..=1.0).contains(&loc) {
            return Err(ValidationError::OutOfRange {
                field: "loc".to_string(),
                value: loc,
                min: 0.0,
                max: 1.0,
            }
            .into());
        }
        let x = self.hoc()?.segment_x(loc);
        Ok(Seg {
            sec: self.clone(),
            x,
        })
    }

    /// All segments including the 0 and 1 ends.
    pub fn segs(&self) -> ModelResult<Vec<Seg>> {
        Ok(self
            .hoc()?
            .segment_positions()
            .into_iter()
            .map(|x| Seg {
                sec: self.clone(),
                x,
            })
            .collect())
    }

    /// Segments without the 0 and 1 ends.
    pub fn inner_segs(&self) -> ModelResult<Vec<Seg>> {
        let mut segs = self.segs()?;
        segs.pop();
        segs.remove(0);
        Ok(segs)
    }

    /// Geometry and passive properties.
    pub fn props(&self) -> ModelResult<SectionProps> {
        Ok(self.hoc()?.props())
    }

    /// Updates geometry and passive properties.
    pub fn set_props(&self, f: impl FnOnce(&mut SectionProps)) -> ModelResult<()> {
        self.hoc()?.update_props(f);
        Ok(())
    }

    /// Membrane area in um2.
    pub fn area(&self) -> ModelResult<f64> {
        Ok(self.hoc()?.area())
    }

    /// Name of the parent section, if connected to a live one.
    pub fn parent_name(&self) -> ModelResult<Option<String>> {
        Ok(self.hoc()?.parent().map(|p| p.name().to_string()))
    }
}

impl Removable for Sec {
    fn remove_now(&self) {
        self.0.slot.release();
    }

    fn is_removed(&self) -> bool {
        self.0.slot.is_empty()
    }
}

impl Filterable for Sec {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "cell" => self.cell_name().map(Into::into),
            "parent" => self.parent_name().ok().flatten().map(Into::into),
            "length" | "l" => self.props().ok().map(|p| p.length.into()),
            "diam" => self.props().ok().map(|p| p.diam.into()),
            "nseg" => self.props().ok().map(|p| p.nseg.into()),
            "cm" => self.props().ok().map(|p| p.cm.into()),
            "ra" => self.props().ok().map(|p| p.ra.into()),
            _ => None,
        }
    }
}

impl fmt::Display for Sec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell_name() {
            Some(cell) => write!(f, "{cell}[Sec][{}]", self.name()),
            None => write!(f, "Sec[{}]", self.name()),
        }
    }
}

impl fmt::Debug for Sec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sec")
            .field("name", &self.name())
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// A location on a section.
///
/// A segment is a view: it holds its section handle and becomes unusable
/// when the section is removed.
#[derive(Clone)]
pub struct Seg {
    sec: Sec,
    x: f64,
}

impl Seg {
    /// Parent section.
    #[must_use]
    pub fn sec(&self) -> &Sec {
        &self.sec
    }

    /// Normalised location on the section.
    #[must_use]
    pub fn x(&self) -> f64 {
        self.x
    }

    /// Name in the `sec(x)` form, eg. `dend[0](0.5)`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}({})", self.sec.name(), fmt_loc(self.x))
    }

    /// Owning cell of the parent section.
    #[must_use]
    pub fn cell(&self) -> Option<Cell> {
        self.sec.cell()
    }

    /// Engine section of this segment.
    pub fn hoc_section(&self) -> ModelResult<Rc<HocSection>> {
        self.sec.hoc()
    }

    /// Membrane area of the segment in um2.
    pub fn area(&self) -> ModelResult<f64> {
        Ok(self.sec.hoc()?.segment_area(self.x))
    }

    /// Returns true for the same location on the same section.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.sec.same_as(&other.sec) && (self.x - other.x).abs() < f64::EPSILON
    }
}

impl Filterable for Seg {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(self.name().into()),
            "x" => Some(self.x.into()),
            "sec" => Some(self.sec.name().into()),
            "cell" => self.sec.cell_name().map(Into::into),
            _ => None,
        }
    }
}

impl fmt::Display for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Debug for Seg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seg")
            .field("sec", &self.sec.name())
            .field("x", &self.x)
            .finish()
    }
}
