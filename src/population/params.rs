//! Parameter types of population connectors.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::dist::{ConnectionProba, DType, Param, SegDist, SynCount};
use crate::error::{ModelResult, TypeMismatch, ValidationError};
use crate::wrappers::ConnSource;

/// How sources are paired with target cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rule {
    /// Every source to every target cell.
    #[default]
    All,
    /// Source `i` to target cell `i`.
    One,
}

impl FromStr for Rule {
    type Err = TypeMismatch;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "one" => Ok(Self::One),
            other => Err(TypeMismatch::InvalidRule {
                provided: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::One => f.write_str("one"),
        }
    }
}

/// Connection-level parameters of one [`Connector`](super::Connector).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnParams {
    /// Pairing rule.
    pub rule: Rule,
    /// Gate deciding whether a (source, target cell) pair is connected.
    pub cell_connection_proba: ConnectionProba,
    /// Choice of target segments within a connected cell.
    pub seg_dist: SegDist,
    /// Synapses made per connected pair.
    pub syn_num_per_cell_source: SynCount,
}

impl ConnParams {
    /// All-to-all, always connected, one uniformly chosen segment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pairing rule.
    #[must_use]
    pub fn rule(mut self, rule: Rule) -> Self {
        self.rule = rule;
        self
    }

    /// Sets the connection gate.
    #[must_use]
    pub fn cell_connection_proba(mut self, proba: impl Into<ConnectionProba>) -> Self {
        self.cell_connection_proba = proba.into();
        self
    }

    /// Sets the segment choice.
    #[must_use]
    pub fn seg_dist(mut self, seg_dist: SegDist) -> Self {
        self.seg_dist = seg_dist;
        self
    }

    /// Sets the number of synapses per connected pair.
    #[must_use]
    pub fn syn_num_per_cell_source(mut self, count: impl Into<SynCount>) -> Self {
        self.syn_num_per_cell_source = count.into();
        self
    }
}

/// One connection made for every synapse of an adder.
#[derive(Debug, Clone)]
pub struct NetconParams {
    pub(crate) weight: Param,
    pub(crate) delay: Param,
    pub(crate) threshold: Param,
    pub(crate) custom_source: Option<ConnSource>,
}

impl Default for NetconParams {
    fn default() -> Self {
        Self {
            weight: Param::Fixed(1.0),
            delay: Param::Fixed(1.0),
            threshold: Param::Fixed(10.0),
            custom_source: None,
        }
    }
}

impl NetconParams {
    /// Weight 1, delay 1 ms, threshold 10 mV, connector's source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection weight.
    #[must_use]
    pub fn weight(mut self, weight: impl Into<Param>) -> Self {
        self.weight = weight.into();
        self
    }

    /// Delay in ms.
    #[must_use]
    pub fn delay(mut self, delay: impl Into<Param>) -> Self {
        self.delay = delay.into();
        self
    }

    /// Source threshold in mV.
    #[must_use]
    pub fn threshold(mut self, threshold: impl Into<Param>) -> Self {
        self.threshold = threshold.into();
        self
    }

    /// Uses `source` instead of the connector's source, eg. `ConnSource::None`
    /// for a connection driven only by injected events.
    #[must_use]
    pub fn custom_source(mut self, source: impl Into<ConnSource>) -> Self {
        self.custom_source = Some(source.into());
        self
    }
}

/// Segment counts of a spine put between target and synapse.
///
/// Distributions are drawn as integers, once for each spine made.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpineParams {
    /// Segments of the head.
    pub head_nseg: Param,
    /// Segments of the neck.
    pub neck_nseg: Param,
}

impl Default for SpineParams {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

fn integer(param: Param) -> Param {
    match param {
        Param::Dist(d) => Param::Dist(d.with_dtype(DType::Int)),
        fixed @ Param::Fixed(_) => fixed,
    }
}

fn resolve_nseg<R: Rng + ?Sized>(field: &str, param: &Param, rng: &mut R) -> ModelResult<usize> {
    let value = param.resolve(rng)?.round();
    if !(value.is_finite() && value >= 1.0) {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min: 1.0,
            max: f64::MAX,
        }
        .into());
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let count = value as usize;
    Ok(count)
}

impl SpineParams {
    /// Head and neck segment counts, literal or drawn.
    #[must_use]
    pub fn new(head_nseg: impl Into<Param>, neck_nseg: impl Into<Param>) -> Self {
        Self {
            head_nseg: integer(head_nseg.into()),
            neck_nseg: integer(neck_nseg.into()),
        }
    }

    /// Draws the `(head, neck)` segment counts of one spine. Both must
    /// round to at least 1.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> ModelResult<(usize, usize)> {
        Ok((
            resolve_nseg("head_nseg", &self.head_nseg, rng)?,
            resolve_nseg("neck_nseg", &self.neck_nseg, rng)?,
        ))
    }
}

/// A point process mechanism placed on every chosen target, with its
/// connections.
///
/// An adder without any [`add_netcon`](Self::add_netcon) call makes one
/// connection with [`NetconParams::default`].
#[derive(Debug, Clone)]
pub struct SynAdder {
    pub(crate) mod_name: String,
    pub(crate) netcons: Vec<NetconParams>,
    pub(crate) spine: Option<SpineParams>,
    pub(crate) params: Vec<(String, f64)>,
}

impl SynAdder {
    /// Adder for mechanism `mod_name`.
    #[must_use]
    pub fn new(mod_name: impl Into<String>) -> Self {
        Self {
            mod_name: mod_name.into(),
            netcons: Vec::new(),
            spine: None,
            params: Vec::new(),
        }
    }

    /// Adds a connection to every synapse.
    #[must_use]
    pub fn add_netcon(mut self, params: NetconParams) -> Self {
        self.netcons.push(params);
        self
    }

    /// Puts every synapse on the head of a new spine with the given segment
    /// counts.
    #[must_use]
    pub fn spine_params(mut self, head_nseg: impl Into<Param>, neck_nseg: impl Into<Param>) -> Self {
        self.spine = Some(SpineParams::new(head_nseg, neck_nseg));
        self
    }

    /// Sets a RANGE parameter of every point process.
    #[must_use]
    pub fn add_point_process_params(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.push((name.into(), value));
        self
    }

    pub(crate) fn netcon_params(&self) -> Vec<NetconParams> {
        if self.netcons.is_empty() {
            vec![NetconParams::default()]
        } else {
            self.netcons.clone()
        }
    }
}
