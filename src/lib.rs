//! # neuronkit - modeling layer for compartmental neuron simulations
//!
//! neuronkit wraps the objects of a compartmental simulation engine
//! (sections, point processes, network connections, spike generators) in
//! named, filterable handles grouped into cells and populations.
//!
//! ## Core Concepts
//!
//! - **SimulationContext**: the engine instance. Holds the clock, the RNG and
//!   the mechanism registry, and counts the engine objects still alive
//! - **Cell**: owner of sections and of everything placed on them
//! - **Filter**: name, tag and field predicates selecting wrappers from a
//!   collection
//! - **Removable**: deterministic release of a wrapper and what it owns
//! - **Population / Connector**: cells built from one template and wired by
//!   declarative connection requests
//! - **Record**: per-step samples of segment variables over the clock
//!
//! ## Usage
//!
//! ```rust,ignore
//! use neuronkit::{Cell, Filter, SectionSpec, SimulationContext, SynapseSpec};
//!
//! let ctx = SimulationContext::seeded(13)?;
//! let cell = Cell::new(&ctx, "pyr");
//! let soma = cell.add_sec(SectionSpec::new("soma").length(20.0).diam(20.0))?;
//! let dend = cell.add_sec(SectionSpec::new("dend").length(300.0).nseg(10))?;
//! cell.connect_secs(&dend, &soma, 0.0, 1.0)?;
//! cell.insert("hh", &Filter::name("soma"), &[])?;
//!
//! let syn = cell.add_synapse(&dend.seg(0.8)?, &SynapseSpec::new("Exp2Syn").weight(0.01))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cell;
pub mod compile;
pub mod config;
pub mod dist;
pub mod error;
pub mod filter;
pub mod population;
pub mod record;
pub mod simulator;
pub mod wrappers;

// Re-export primary types at crate root for convenience
pub use cell::{Cell, SectionSpec, StimCell, SynapseSpec};
pub use compile::{compile_mods, load_mods, ModCompiler};
pub use config::{CompileConfig, SimulationConfig};
pub use dist::{ConnectionProba, DType, Dist, Param, SegDist, SynCount};
pub use error::{
    ExternalError, LookupError, ModelError, ModelResult, TypeMismatch, ValidationError,
};
pub use filter::{FieldValue, Filter, Filterable, Pattern, Selection};
pub use population::{
    ConnParams, Connector, NetconParams, Population, Rule, SpineParams, SynAdder, Target,
};
pub use record::{Record, RecordOutput};
pub use simulator::{NetStimParams, Simulation, SimulationContext};
pub use wrappers::{
    AnySynapse, ConnSource, NetCon, NetStim, PointProcess, Removable, Sec, Seg, SingleSynapse,
    Spine, Synapse, SynapticGroup, VecStim,
};
