//! Mechanism registry.
//!
//! The engine knows a mechanism only once it is registered: the built-ins
//! are present from the start, compiled mod files add more through
//! [`crate::compile::load_mods`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ModelResult;
use crate::filter::cached_regex;

/// How a mechanism is placed in the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MechanismKind {
    /// Distributed over a whole section (`SUFFIX`).
    Density,
    /// Placed at a single segment (`POINT_PROCESS`).
    PointProcess,
    /// Stand-alone event generator (`ARTIFICIAL_CELL`).
    ArtificialCell,
}

impl MechanismKind {
    /// Returns true for mechanisms instantiated as point objects.
    #[must_use]
    pub const fn is_point(self) -> bool {
        matches!(self, Self::PointProcess | Self::ArtificialCell)
    }
}

/// A registered mechanism with its RANGE parameters and their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mechanism {
    /// Mechanism name (`SUFFIX` or `POINT_PROCESS` name).
    pub name: String,
    /// Placement kind.
    pub kind: MechanismKind,
    /// RANGE parameters. Density parameters carry the `_suffix` form, eg. `g_pas`.
    pub params: BTreeMap<String, f64>,
}

impl Mechanism {
    fn builtin(name: &str, kind: MechanismKind, params: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            params: params.iter().map(|(k, v)| ((*k).to_string(), *v)).collect(),
        }
    }

    /// Returns true if the mechanism declares the parameter.
    #[must_use]
    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }
}

/// Name to mechanism table.
#[derive(Debug, Clone)]
pub struct MechanismRegistry {
    by_name: HashMap<String, Mechanism>,
}

impl Default for MechanismRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl MechanismRegistry {
    /// Creates a registry holding only the built-in mechanisms.
    #[must_use]
    pub fn with_builtins() -> Self {
        let builtins = [
            Mechanism::builtin("pas", MechanismKind::Density, &[("g_pas", 0.001), ("e_pas", -70.0)]),
            Mechanism::builtin(
                "hh",
                MechanismKind::Density,
                &[
                    ("gnabar_hh", 0.12),
                    ("gkbar_hh", 0.036),
                    ("gl_hh", 0.0003),
                    ("el_hh", -54.3),
                ],
            ),
            Mechanism::builtin(
                "ExpSyn",
                MechanismKind::PointProcess,
                &[("tau", 0.1), ("e", 0.0), ("i", 0.0)],
            ),
            Mechanism::builtin(
                "Exp2Syn",
                MechanismKind::PointProcess,
                &[("tau1", 0.1), ("tau2", 10.0), ("e", 0.0), ("i", 0.0)],
            ),
            Mechanism::builtin(
                "IClamp",
                MechanismKind::PointProcess,
                &[("del", 0.0), ("dur", 0.0), ("amp", 0.0), ("i", 0.0)],
            ),
            Mechanism::builtin(
                "NetStim",
                MechanismKind::ArtificialCell,
                &[("interval", 10.0), ("number", 10.0), ("start", 50.0), ("noise", 0.0)],
            ),
            Mechanism::builtin("VecStim", MechanismKind::ArtificialCell, &[]),
        ];
        Self {
            by_name: builtins.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    /// Registers a mechanism, replacing one with the same name.
    pub fn register(&mut self, mechanism: Mechanism) {
        self.by_name.insert(mechanism.name.clone(), mechanism);
    }

    /// Looks up a mechanism by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Mechanism> {
        self.by_name.get(name)
    }

    /// Returns true if the mechanism is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Number of registered mechanisms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

const BLOCK_PATTERN: &str = r"(?s)\b(NEURON|PARAMETER)\s*\{(.*?)\}";
const COMMENT_PATTERN: &str = r"(?m):.*$";
const ASSIGNMENT_PATTERN: &str =
    r"^\s*([A-Za-z_]\w*)\s*=\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)";

/// Extracts the mechanism declared by a mod file source.
///
/// Reads the `NEURON` block for `SUFFIX`, `POINT_PROCESS` or `ARTIFICIAL_CELL`
/// and `RANGE`, and the `PARAMETER` block for default values. RANGE names
/// without a PARAMETER default start at 0. Returns `None` when no mechanism
/// name is declared.
pub fn parse_mod_source(source: &str) -> ModelResult<Option<Mechanism>> {
    let block = cached_regex(BLOCK_PATTERN)?;
    let assignment = cached_regex(ASSIGNMENT_PATTERN)?;
    let source = cached_regex(COMMENT_PATTERN)?.replace_all(source, "");

    let mut name = None;
    let mut kind = MechanismKind::Density;
    let mut ranges: Vec<String> = Vec::new();
    let mut defaults: HashMap<String, f64> = HashMap::new();

    for caps in block.captures_iter(&source) {
        let body = &caps[2];
        if &caps[1] == "PARAMETER" {
            for line in body.lines() {
                if let Some(a) = assignment.captures(line) {
                    if let Ok(v) = a[2].parse::<f64>() {
                        defaults.insert(a[1].to_string(), v);
                    }
                }
            }
            continue;
        }

        for statement in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut words = statement.split_whitespace();
            match words.next() {
                Some("SUFFIX") => {
                    name = words.next().map(str::to_string);
                    kind = MechanismKind::Density;
                }
                Some("POINT_PROCESS") => {
                    name = words.next().map(str::to_string);
                    kind = MechanismKind::PointProcess;
                }
                Some("ARTIFICIAL_CELL") => {
                    name = words.next().map(str::to_string);
                    kind = MechanismKind::ArtificialCell;
                }
                Some("RANGE") => {
                    let rest = statement.trim_start_matches("RANGE");
                    ranges.extend(
                        rest.split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string),
                    );
                }
                _ => {}
            }
        }
    }

    let Some(name) = name else {
        return Ok(None);
    };
    let params = ranges
        .into_iter()
        .map(|p| {
            let value = defaults.get(&p).copied().unwrap_or(0.0);
            let key = if kind == MechanismKind::Density && !p.ends_with(&format!("_{name}")) {
                format!("{p}_{name}")
            } else {
                p
            };
            (key, value)
        })
        .collect();

    Ok(Some(Mechanism { name, kind, params }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXP_SYN_NMDA: &str = r"
TITLE NMDA synapse
: a comment { with a brace }
NEURON {
    POINT_PROCESS ExpSynNMDA
    RANGE tau, e, i
    RANGE mg
    NONSPECIFIC_CURRENT i
}

PARAMETER {
    tau = 0.5 (ms) <1e-9,1e9>
    e = 0 (mV)
    mg = 1.2e0
}
";

    const KA: &str = r"
NEURON {
    SUFFIX ka
    USEION k READ ek WRITE ik
    RANGE gbar, ik
}
PARAMETER {
    gbar = 0.008 (mho/cm2)
}
";

    #[test]
    fn test_builtins() {
        let reg = MechanismRegistry::with_builtins();
        assert!(reg.contains("pas"));
        assert!(reg.contains("hh"));
        assert_eq!(reg.get("ExpSyn").map(|m| m.kind), Some(MechanismKind::PointProcess));
        assert_eq!(reg.get("NetStim").map(|m| m.kind), Some(MechanismKind::ArtificialCell));
        assert_eq!(reg.get("VecStim").map(|m| m.kind), Some(MechanismKind::ArtificialCell));
        assert!(reg.get("pas").is_some_and(|m| m.has_param("g_pas")));
        assert!(!reg.contains("Syn4P"));
    }

    #[test]
    fn test_parse_point_process() {
        let m = parse_mod_source(EXP_SYN_NMDA).unwrap().unwrap();
        assert_eq!(m.name, "ExpSynNMDA");
        assert_eq!(m.kind, MechanismKind::PointProcess);
        assert_eq!(m.params.get("tau"), Some(&0.5));
        assert_eq!(m.params.get("mg"), Some(&1.2));
        assert_eq!(m.params.get("i"), Some(&0.0));
    }

    #[test]
    fn test_parse_density_suffixes_params() {
        let m = parse_mod_source(KA).unwrap().unwrap();
        assert_eq!(m.name, "ka");
        assert_eq!(m.kind, MechanismKind::Density);
        assert_eq!(m.params.get("gbar_ka"), Some(&0.008));
        assert!(m.params.contains_key("ik_ka"));
    }

    #[test]
    fn test_parse_without_name() {
        assert!(parse_mod_source("PARAMETER { a = 1 }").unwrap().is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut reg = MechanismRegistry::with_builtins();
        let before = reg.len();
        reg.register(parse_mod_source(KA).unwrap().unwrap());
        reg.register(parse_mod_source(KA).unwrap().unwrap());
        assert_eq!(reg.len(), before + 1);
        assert!(reg.names().contains(&"ka".to_string()));
    }
}
