//! Simulation and compilation settings.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Settings for compiling and loading mechanism (mod) files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Name of the platform-specific folder produced by the compiler.
    pub compiled_folder_name: String,
    /// Command run inside the target folder to compile the mod files.
    pub compile_command: String,
    /// Root folder under which compiled mechanism folders are created.
    pub output_root: String,
    /// Put every compilation under a random sub-folder of `output_root`.
    pub random_subfolder: bool,
    /// Recompile when the target folder already exists.
    pub override_existing: bool,
    /// How many times loading compiled mechanisms is attempted.
    pub load_attempts: u32,
    /// Wait between load attempts.
    pub load_wait_ms: u64,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            compiled_folder_name: "x86_64".to_string(),
            compile_command: "nrnivmodl".to_string(),
            output_root: "compiled".to_string(),
            random_subfolder: true,
            override_existing: true,
            load_attempts: 10,
            load_wait_ms: 2000,
        }
    }
}

/// Settings of a [`SimulationContext`](crate::SimulationContext).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Integration time step in ms.
    pub dt: f64,
    /// Initial membrane potential in mV.
    pub init_v: f64,
    /// Temperature in degrees Celsius.
    pub celsius: f64,
    /// Seed of the context RNG. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Warmup run in ms, performed once before the first run.
    pub warmup: f64,
    /// Real-time pause between simulation steps, used to pace live plots.
    pub step_delay_ms: u64,
    /// Mechanism compilation settings.
    pub compile: CompileConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt: 0.025,
            init_v: -65.0,
            celsius: 6.3,
            seed: None,
            warmup: 0.0,
            step_delay_ms: 0,
            compile: CompileConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Returns the default configuration with a fixed RNG seed.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ValidationError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// This is called by `SimulationContext::init`.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("dt must be > 0, got {}", self.dt),
            });
        }
        if !(self.warmup.is_finite() && self.warmup >= 0.0) {
            return Err(ValidationError::InvalidConfig {
                reason: format!("warmup time must be >= 0, got {}", self.warmup),
            });
        }
        if !self.init_v.is_finite() || !self.celsius.is_finite() {
            return Err(ValidationError::InvalidConfig {
                reason: "init_v and celsius must be finite".to_string(),
            });
        }
        if self.compile.load_attempts == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "load_attempts must be > 0".to_string(),
            });
        }
        if self.compile.compile_command.trim().is_empty() {
            return Err(ValidationError::InvalidConfig {
                reason: "compile_command cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        SimulationConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut c = SimulationConfig::default();
        c.dt = 0.0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.warmup = -1.0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.compile.load_attempts = 0;
        assert!(c.validate().is_err());

        let mut c = SimulationConfig::default();
        c.compile.compile_command = "  ".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let c = SimulationConfig::from_json_str(r#"{"dt": 0.1, "seed": 13}"#).unwrap();
        assert!((c.dt - 0.1).abs() < f64::EPSILON);
        assert_eq!(c.seed, Some(13));
        assert_eq!(c.compile.compile_command, "nrnivmodl");
        assert!((c.celsius - 6.3).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(SimulationConfig::from_json_str(r#"{"dt": -0.1}"#).is_err());
        assert!(SimulationConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_seeded() {
        assert_eq!(SimulationConfig::seeded(7).seed, Some(7));
    }
}
