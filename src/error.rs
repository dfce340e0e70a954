//! Error types for neuronkit.
//!
//! All errors are strongly typed using thiserror. The categories mirror the
//! ways a modeling call can go wrong: a lookup that finds nothing, a value of
//! the wrong kind, a value out of range, or a failure reported by the external
//! engine and its compiler toolchain.

use thiserror::Error;

/// Lookup errors: a name, filter or mechanism could not be resolved.
#[derive(Debug, Error)]
pub enum LookupError {
    /// A non-trivial filter matched nothing.
    #[error("Nothing in {collection} matches filter {filter}")]
    NotFound {
        /// Searched collection, eg. `cell.secs`.
        collection: String,
        /// Filter in its display form.
        filter: String,
    },

    /// A name is already used by a sibling object.
    #[error("The name '{name}' is already taken in {owner}")]
    DuplicateName {
        /// Clashing name.
        name: String,
        /// Owner of the existing object.
        owner: String,
    },

    /// The engine has no mechanism of that name.
    #[error("There is no mechanism named '{name}'. Did you compile and load the mod files?")]
    UnknownMechanism {
        /// Requested mechanism.
        name: String,
    },

    /// A mechanism does not declare the parameter.
    #[error("Mechanism '{mechanism}' has no parameter '{parameter}'. Check that it is declared as RANGE")]
    UnknownParameter {
        /// Mechanism name.
        mechanism: String,
        /// Requested parameter.
        parameter: String,
    },

    /// A variable cannot be read from an object.
    #[error("There is no variable '{variable}' on {element}. Is the mechanism inserted?")]
    UnknownVariable {
        /// Requested variable.
        variable: String,
        /// Object it was requested on.
        element: String,
    },

    /// A connection was requested on a population without cells.
    #[error("Population '{population}' has no cells, cannot make connections. Add cells first")]
    EmptyPopulation {
        /// Population name.
        population: String,
    },

    /// A filter expected to match one object matched several.
    #[error("Filter {filter} on {collection} must match exactly one object, matched {count}")]
    Ambiguous {
        /// Searched collection.
        collection: String,
        /// Filter in its display form.
        filter: String,
        /// Number of matches.
        count: usize,
    },

    /// A wrapper was used after removal.
    #[error("{what} has been removed")]
    Removed {
        /// The removed wrapper.
        what: String,
    },

    /// A file does not exist.
    #[error("File not found: {path}")]
    FileNotFound {
        /// Missing path.
        path: String,
    },
}

/// Type errors: a parameter is not one of the documented allowed kinds.
#[derive(Debug, Error)]
pub enum TypeMismatch {
    /// Unknown segment distribution name.
    #[error("Segment distribution can be only 'all', 'uniform' or a normal distribution, but provided: {provided}")]
    InvalidSegmentDistribution {
        /// Rejected value.
        provided: String,
    },

    /// Unknown connection rule.
    #[error("The only allowed rules are 'all' or 'one', but provided: {provided}")]
    InvalidRule {
        /// Rejected value.
        provided: String,
    },

    /// A connection source of an unsupported kind.
    #[error("Connection source can be a stimulus generator, a segment or none, but provided: {provided}")]
    InvalidSource {
        /// Rejected value.
        provided: String,
    },

    /// A synapse count that is neither a number nor a truncated distribution.
    #[error("Synapse count can be a number or a truncated distribution, but provided: {provided}")]
    InvalidSynapseCount {
        /// Rejected value.
        provided: String,
    },

    /// A density or artificial mechanism used where a point process is needed.
    #[error("Mechanism '{mechanism}' is not a point process")]
    NotAPointProcess {
        /// Mechanism name.
        mechanism: String,
    },

    /// A point or artificial mechanism inserted into a section.
    #[error("Mechanism '{mechanism}' is not a density mechanism and cannot be inserted into a section")]
    NotADensityMechanism {
        /// Mechanism name.
        mechanism: String,
    },

    /// Synapses of one group placed on different segments.
    #[error("All synapses of a group must share one parent segment, got '{first}' and '{other}'")]
    MixedSynapseParents {
        /// Parent of the first synapse.
        first: String,
        /// First differing parent.
        other: String,
    },

    /// A morphology file of an unknown format.
    #[error("Morphology format of '{path}' is not recognized")]
    UnsupportedMorphology {
        /// Morphology file.
        path: String,
    },
}

/// Value errors: a numeric or structural parameter is out of its valid range.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A value outside a closed range.
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Parameter name.
        field: String,
        /// Rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// A negative value where only non-negative ones make sense.
    #[error("{field} cannot be < 0, got {value}")]
    Negative {
        /// Parameter name.
        field: String,
        /// Rejected value.
        value: f64,
    },

    /// Rule `one` with differently sized sources and targets.
    #[error("For rule 'one' sources and targets need to be of the same size, got {sources} sources and {targets} targets")]
    RuleSizeMismatch {
        /// Number of sources.
        sources: usize,
        /// Number of target cells.
        targets: usize,
    },

    /// A regular expression that does not compile.
    #[error("Invalid filter pattern '{pattern}': {reason}")]
    InvalidFilterPattern {
        /// Pattern text.
        pattern: String,
        /// Compiler message.
        reason: String,
    },

    /// An invalid setting.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// A malformed morphology record.
    #[error("Invalid morphology at line {line}: {reason}")]
    InvalidMorphology {
        /// 1-based line number.
        line: usize,
        /// What is wrong.
        reason: String,
    },

    /// A second spike detector on one cell.
    #[error("Spike detector has been created already for the cell {cell}")]
    SpikeDetectorExists {
        /// Cell name.
        cell: String,
    },

    /// A synaptic group without members.
    #[error("A synaptic group needs at least one synapse")]
    EmptySynapticGroup,

    /// An event injected while the clock is at 0.
    #[error("Events cannot be scheduled before the simulation clock has started")]
    EventBeforeRun,

    /// A stimulus generator created once the clock has started.
    #[error("Stimulus generators cannot be created after the simulation clock has started")]
    StimulusAfterRun,

    /// Spike times of a vector stimulus that are negative, not finite or unsorted.
    #[error("Vector stimulus times must be finite, >= 0 and sorted, got {reason}")]
    InvalidSpikeTimes {
        /// What is wrong.
        reason: String,
    },

    /// A recording with nothing to record.
    #[error("The list of elements to record is empty")]
    EmptyRecord,

    /// A recording created once the clock has started.
    #[error("Recordings cannot be created after the simulation clock has started")]
    RecordAfterRun,
}

/// Errors surfaced by the external engine or its compiler toolchain.
#[derive(Debug, Error)]
pub enum ExternalError {
    /// The compiler reported an error.
    #[error("Mod compilation error: {output}")]
    CompileFailed {
        /// Combined compiler output.
        output: String,
    },

    /// A source folder holds no mod file.
    #[error("No mod files found on path: {path}")]
    NoModFiles {
        /// Source folder.
        path: String,
    },

    /// A filesystem or process failure.
    #[error("I/O error while {context}: {message}")]
    Io {
        /// Operation that failed.
        context: String,
        /// Operating system message.
        message: String,
    },

    /// Mechanisms could not be loaded.
    #[error("Failed to load mechanisms from {path} after {attempts} attempts: {reason}")]
    LoadFailed {
        /// Compiled folder.
        path: String,
        /// Attempts made.
        attempts: u32,
        /// Last failure.
        reason: String,
    },
}

impl ExternalError {
    /// Wraps an I/O error with the operation that produced it.
    #[must_use]
    pub fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Top-level error type for neuronkit.
#[derive(Debug, Error)]
pub enum ModelError {
    /// See [`LookupError`].
    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    /// See [`TypeMismatch`].
    #[error("Type error: {0}")]
    Type(#[from] TypeMismatch),

    /// See [`ValidationError`].
    #[error("Value error: {0}")]
    Validation(#[from] ValidationError),

    /// See [`ExternalError`].
    #[error("External error: {0}")]
    External(#[from] ExternalError),

    /// A broken internal invariant or a torn down context.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl ModelError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates the error returned when a removed wrapper is used.
    #[must_use]
    pub fn removed(what: impl Into<String>) -> Self {
        Self::Lookup(LookupError::Removed { what: what.into() })
    }

    /// Returns true if this is a lookup error.
    #[must_use]
    pub const fn is_lookup(&self) -> bool {
        matches!(self, Self::Lookup(_))
    }

    /// Returns true if this is a type error.
    #[must_use]
    pub const fn is_type(&self) -> bool {
        matches!(self, Self::Type(_))
    }

    /// Returns true if this is a value error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this error came from the engine or compiler toolchain.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::External(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for neuronkit operations.
pub type ModelResult<T> = Result<T, ModelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_not_found() {
        let err = LookupError::NotFound {
            collection: "cell.secs".to_string(),
            filter: "name=apic".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("cell.secs"));
        assert!(msg.contains("name=apic"));
    }

    #[test]
    fn test_unknown_mechanism_has_hint() {
        let err = LookupError::UnknownMechanism {
            name: "Syn4P".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("Syn4P"));
        assert!(msg.contains("compile"));
    }

    #[test]
    fn test_validation_error_out_of_range() {
        let err = ValidationError::OutOfRange {
            field: "parent_loc".to_string(),
            value: 1.5,
            min: 0.0,
            max: 1.0,
        };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("parent_loc"));
    }

    #[test]
    fn test_rule_size_mismatch() {
        let err = ValidationError::RuleSizeMismatch {
            sources: 3,
            targets: 4,
        };
        let msg = format!("{err}");
        assert!(msg.contains("rule 'one'"));
        assert!(msg.contains('3'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_compile_failed_carries_output() {
        let err = ExternalError::CompileFailed {
            output: "syntax error near line 3".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("line 3"));
    }

    #[test]
    fn test_model_error_conversions() {
        let err: ModelError = LookupError::EmptyPopulation {
            population: "pop".to_string(),
        }
        .into();
        assert!(err.is_lookup());
        assert!(!err.is_validation());

        let err: ModelError = TypeMismatch::InvalidRule {
            provided: "some".to_string(),
        }
        .into();
        assert!(err.is_type());

        let err: ModelError = ValidationError::EventBeforeRun.into();
        assert!(err.is_validation());

        let err: ModelError = ExternalError::NoModFiles {
            path: "/tmp".to_string(),
        }
        .into();
        assert!(err.is_external());
    }

    #[test]
    fn test_model_error_internal() {
        let err = ModelError::internal("context torn down");
        assert!(err.is_internal());
        assert!(format!("{err}").contains("torn down"));
    }

    #[test]
    fn test_removed_is_lookup() {
        let err = ModelError::removed("Sec[soma]");
        assert!(err.is_lookup());
        assert!(format!("{err}").contains("Sec[soma]"));
    }
}
