//! Random parameter descriptors.
//!
//! A [`Dist`] is not a value: it is sampled each time a concrete object is
//! built, from the RNG of the [`SimulationContext`](crate::SimulationContext).
//! Two objects built from the same `Dist` therefore draw independent values.

use std::fmt;

use rand::Rng;
use rand_distr::{Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{ModelResult, TypeMismatch, ValidationError};

/// Numeric type of sampled values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DType {
    /// Samples are used as drawn.
    #[default]
    Float,
    /// Samples are rounded to the nearest integer.
    Int,
}

/// Shape of a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistKind {
    /// Uniform over `[low, high)`.
    Uniform {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
    /// Gaussian.
    Normal {
        /// Mean.
        mean: f64,
        /// Standard deviation.
        std: f64,
    },
    /// Log-normal, parameterised by the underlying normal.
    LogNormal {
        /// Mean of the underlying normal.
        mean: f64,
        /// Standard deviation of the underlying normal.
        std: f64,
    },
}

/// A random value descriptor.
///
/// Truncated distributions return the absolute value of each draw and reject
/// negative parameters at construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    kind: DistKind,
    truncated: bool,
    dtype: DType,
}

fn non_negative(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::Negative {
            field: field.to_string(),
            value,
        })
    }
}

fn finite(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min: f64::MIN,
            max: f64::MAX,
        })
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

impl Dist {
    fn uniform_checked(low: f64, high: f64, truncated: bool) -> Result<Self, ValidationError> {
        finite("low", low)?;
        finite("high", high)?;
        if truncated {
            non_negative("low", low)?;
        }
        if high < low {
            return Err(ValidationError::OutOfRange {
                field: "high".to_string(),
                value: high,
                min: low,
                max: f64::MAX,
            });
        }
        Ok(Self {
            kind: DistKind::Uniform { low, high },
            truncated,
            dtype: DType::Float,
        })
    }

    fn normal_checked(mean: f64, std: f64, truncated: bool, log: bool) -> Result<Self, ValidationError> {
        finite("mean", mean)?;
        non_negative("std", std)?;
        if truncated {
            non_negative("mean", mean)?;
        }
        let kind = if log {
            DistKind::LogNormal { mean, std }
        } else {
            DistKind::Normal { mean, std }
        };
        Ok(Self {
            kind,
            truncated,
            dtype: DType::Float,
        })
    }

    /// Uniform over `[low, high)`.
    pub fn uniform(low: f64, high: f64) -> Result<Self, ValidationError> {
        Self::uniform_checked(low, high, false)
    }

    /// Uniform over `[low, high)` with `low >= 0`.
    pub fn uniform_truncated(low: f64, high: f64) -> Result<Self, ValidationError> {
        Self::uniform_checked(low, high, true)
    }

    /// Normal with the given mean and standard deviation.
    pub fn normal(mean: f64, std: f64) -> Result<Self, ValidationError> {
        Self::normal_checked(mean, std, false, false)
    }

    /// Absolute value of a normal draw. Mean and std must be >= 0.
    pub fn normal_truncated(mean: f64, std: f64) -> Result<Self, ValidationError> {
        Self::normal_checked(mean, std, true, false)
    }

    /// Log-normal over an underlying normal(mean, std).
    pub fn log_normal(mean: f64, std: f64) -> Result<Self, ValidationError> {
        Self::normal_checked(mean, std, false, true)
    }

    /// Log-normal with non-negative parameters.
    pub fn log_normal_truncated(mean: f64, std: f64) -> Result<Self, ValidationError> {
        Self::normal_checked(mean, std, true, true)
    }

    /// Sets the numeric type of samples.
    #[must_use]
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = dtype;
        self
    }

    /// Distribution shape.
    #[must_use]
    pub const fn kind(&self) -> DistKind {
        self.kind
    }

    /// Returns true for truncated variants.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Numeric type of samples.
    #[must_use]
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Draws one value.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ModelResult<f64> {
        let mut value = match self.kind {
            DistKind::Uniform { low, high } => {
                if high > low {
                    rng.gen_range(low..high)
                } else {
                    low
                }
            }
            DistKind::Normal { mean, std } => Normal::new(mean, std)
                .map_err(|e| ValidationError::InvalidConfig {
                    reason: format!("normal({mean}, {std}): {e}"),
                })?
                .sample(rng),
            DistKind::LogNormal { mean, std } => LogNormal::new(mean, std)
                .map_err(|e| ValidationError::InvalidConfig {
                    reason: format!("lognormal({mean}, {std}): {e}"),
                })?
                .sample(rng),
        };
        if self.truncated {
            value = value.abs();
        }
        if self.dtype == DType::Int {
            value = value.round();
        }
        Ok(value)
    }
}

impl fmt::Display for Dist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.truncated { "truncated " } else { "" };
        match self.kind {
            DistKind::Uniform { low, high } => write!(f, "{prefix}uniform({low}, {high})"),
            DistKind::Normal { mean, std } => write!(f, "{prefix}normal({mean}, {std})"),
            DistKind::LogNormal { mean, std } => write!(f, "{prefix}lognormal({mean}, {std})"),
        }
    }
}

/// A numeric parameter given either literally or as a distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    /// Used as is.
    Fixed(f64),
    /// Sampled once per built object.
    Dist(Dist),
}

impl Param {
    /// Resolves the parameter, drawing from `rng` when it is a distribution.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> ModelResult<f64> {
        match self {
            Self::Fixed(v) => Ok(*v),
            Self::Dist(d) => d.sample(rng),
        }
    }

    /// Returns true when resolving draws from the RNG.
    #[must_use]
    pub const fn is_random(&self) -> bool {
        matches!(self, Self::Dist(_))
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Fixed(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Self::Fixed(f64::from(v))
    }
}

impl From<Dist> for Param {
    fn from(d: Dist) -> Self {
        Self::Dist(d)
    }
}

/// Probability that a (source, target cell) pair gets connected.
///
/// The pair is connected when the draw is below `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ConnectionProba {
    /// Uniform draw against a fixed probability. 1.0 connects without drawing.
    Fixed(f64),
    /// Uniform draw in [0, 1).
    Uniform {
        /// Connection threshold in [0, 1].
        threshold: f64,
    },
    /// Absolute value of a normal draw.
    Normal {
        /// Connection threshold in [0, 1].
        threshold: f64,
        /// Mean in [0, 1].
        mean: f64,
        /// Standard deviation in [0, 1].
        std: f64,
    },
    /// Absolute value of a log-normal draw.
    LogNormal {
        /// Connection threshold in [0, 1].
        threshold: f64,
        /// Mean of the underlying normal in [0, 1].
        mean: f64,
        /// Standard deviation of the underlying normal in [0, 1].
        std: f64,
    },
}

impl Default for ConnectionProba {
    fn default() -> Self {
        Self::Fixed(1.0)
    }
}

impl From<f64> for ConnectionProba {
    fn from(p: f64) -> Self {
        Self::Fixed(p)
    }
}

impl ConnectionProba {
    /// Uniform gate with the given threshold.
    pub fn uniform(threshold: f64) -> Result<Self, ValidationError> {
        unit_interval("threshold", threshold)?;
        Ok(Self::Uniform { threshold })
    }

    /// Normal gate.
    pub fn normal(threshold: f64, mean: f64, std: f64) -> Result<Self, ValidationError> {
        unit_interval("threshold", threshold)?;
        unit_interval("mean", mean)?;
        unit_interval("std", std)?;
        Ok(Self::Normal { threshold, mean, std })
    }

    /// Log-normal gate.
    pub fn log_normal(threshold: f64, mean: f64, std: f64) -> Result<Self, ValidationError> {
        unit_interval("threshold", threshold)?;
        unit_interval("mean", mean)?;
        unit_interval("std", std)?;
        Ok(Self::LogNormal { threshold, mean, std })
    }

    /// The connection threshold.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        match self {
            Self::Fixed(t) | Self::Uniform { threshold: t } => *t,
            Self::Normal { threshold, .. } | Self::LogNormal { threshold, .. } => *threshold,
        }
    }

    /// Checks the threshold range. Needed for [`ConnectionProba::Fixed`],
    /// which can be built without a constructor.
    pub fn validate(&self) -> Result<(), ValidationError> {
        unit_interval("cell_connection_proba", self.threshold())
    }

    /// Decides one pair.
    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> ModelResult<bool> {
        self.validate()?;
        let draw = match *self {
            Self::Fixed(p) if p >= 1.0 => return Ok(true),
            Self::Fixed(_) | Self::Uniform { .. } => rng.gen::<f64>(),
            Self::Normal { mean, std, .. } => Dist::normal(mean, std)?.sample(rng)?.abs(),
            Self::LogNormal { mean, std, .. } => Dist::log_normal(mean, std)?.sample(rng)?.abs(),
        };
        Ok(draw < self.threshold())
    }
}

/// How one target segment is chosen among the candidate segments of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SegDist {
    /// Every candidate segment.
    All,
    /// One segment, uniformly.
    Uniform,
    /// One segment, clustered around a normalised position.
    Normal {
        /// Spread of the cluster, in normalised units.
        std: f64,
        /// Normalised centre in [0, 1]; drawn uniformly per source when absent.
        mean: Option<f64>,
    },
}

impl Default for SegDist {
    fn default() -> Self {
        Self::Uniform
    }
}

impl SegDist {
    /// Clustered choice. `mean` must lie in [0, 1] and `std` be >= 0.
    pub fn normal(std: f64, mean: Option<f64>) -> Result<Self, ValidationError> {
        non_negative("std", std)?;
        if let Some(m) = mean {
            unit_interval("mean", m)?;
        }
        Ok(Self::Normal { std, mean })
    }

    /// Parses the string forms `"all"` and `"uniform"`.
    pub fn parse(s: &str) -> Result<Self, TypeMismatch> {
        match s {
            "all" => Ok(Self::All),
            "uniform" => Ok(Self::Uniform),
            other => Err(TypeMismatch::InvalidSegmentDistribution {
                provided: other.to_string(),
            }),
        }
    }

    /// Draws the cluster centre used for one source, if this distribution
    /// needs one drawn.
    pub fn draw_mean<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<f64> {
        match self {
            Self::Normal { mean: None, .. } => Some(rng.gen::<f64>()),
            _ => None,
        }
    }

    /// Picks indices into a list of `n` candidate segments.
    ///
    /// For [`SegDist::Normal`], `drawn_mean` replaces an absent mean. A draw
    /// above 1 is reflected back below 1.
    pub fn select<R: Rng + ?Sized>(
        &self,
        n: usize,
        drawn_mean: Option<f64>,
        rng: &mut R,
    ) -> ModelResult<Vec<usize>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        match *self {
            Self::All => Ok((0..n).collect()),
            Self::Uniform => Ok(vec![rng.gen_range(0..n)]),
            Self::Normal { std, mean } => {
                let mean = mean.or(drawn_mean).unwrap_or(0.5);
                let mut value = Dist::normal(mean, std)?.sample(rng)?.abs();
                if value > 1.0 {
                    value = 1.0 - value % 1.0;
                }
                if n == 1 {
                    return Ok(vec![0]);
                }
                #[allow(
                    clippy::cast_precision_loss,
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss
                )]
                let index = (((n - 1) as f64) * value).round() as usize;
                Ok(vec![index.min(n - 1)])
            }
        }
    }
}

/// Number of synapses made per connected (source, target cell) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SynCount {
    /// A fixed count.
    Fixed(usize),
    /// Drawn from a truncated distribution and rounded.
    Dist(Dist),
}

impl Default for SynCount {
    fn default() -> Self {
        Self::Fixed(1)
    }
}

impl From<usize> for SynCount {
    fn from(n: usize) -> Self {
        Self::Fixed(n)
    }
}

impl SynCount {
    /// Count drawn from `dist`, which must be truncated.
    pub fn dist(dist: Dist) -> Result<Self, TypeMismatch> {
        if !dist.is_truncated() {
            return Err(TypeMismatch::InvalidSynapseCount {
                provided: dist.to_string(),
            });
        }
        Ok(Self::Dist(dist))
    }

    /// Resolves the count.
    pub fn resolve<R: Rng + ?Sized>(&self, rng: &mut R) -> ModelResult<usize> {
        match self {
            Self::Fixed(n) => Ok(*n),
            Self::Dist(d) => {
                let v = d.sample(rng)?.round().abs();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let count = v as usize;
                Ok(count)
            }
        }
    }
}
