//! Compilation and loading of mechanism (mod) files.
//!
//! Compilation is delegated to an external command run in a folder holding
//! copies of the mod files. Loading registers the mechanisms those files
//! declare with a [`SimulationContext`].

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::CompileConfig;
use crate::error::{ExternalError, ModelResult, ValidationError};
use crate::simulator::mechanisms::parse_mod_source;
use crate::simulator::SimulationContext;

/// Runs the configured compile command over folders of mod files.
#[derive(Debug, Clone, Default)]
pub struct ModCompiler {
    config: CompileConfig,
}

impl ModCompiler {
    /// Compiler using `config`.
    #[must_use]
    pub fn new(config: CompileConfig) -> Self {
        Self { config }
    }

    /// Settings in use.
    #[must_use]
    pub fn config(&self) -> &CompileConfig {
        &self.config
    }

    /// Copies the mod files of every source folder into `target` and runs
    /// the compile command there.
    ///
    /// `target` is emptied first. Output containing `error` or `failed`, or
    /// a non-zero exit, fails with the captured output.
    pub fn compile(&self, sources: &[PathBuf], target: &Path) -> ModelResult<()> {
        let target = self.strip_compiled_folder(target);
        if target.exists() {
            fs::remove_dir_all(&target)
                .map_err(|e| ExternalError::io(format!("clearing {}", target.display()), &e))?;
        }
        fs::create_dir_all(&target)
            .map_err(|e| ExternalError::io(format!("creating {}", target.display()), &e))?;

        for source in sources {
            let copied = self.copy_mods(source, &target)?;
            debug!(source = %source.display(), copied, "mod files copied");
        }

        let mut words = self.config.compile_command.split_whitespace();
        let program = words.next().ok_or_else(|| ValidationError::InvalidConfig {
            reason: "compile_command is empty".to_string(),
        })?;
        let output = Command::new(program)
            .args(words)
            .current_dir(&target)
            .output()
            .map_err(|e| ExternalError::io(format!("running '{program}'"), &e))?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let lowered = text.to_lowercase();
        if !output.status.success() || lowered.contains("error") || lowered.contains("failed") {
            return Err(ExternalError::CompileFailed { output: text }.into());
        }
        if lowered.contains("warning") {
            warn!(dir = %target.display(), output = %text.trim(), "mod compilation warnings");
        }
        info!(dir = %target.display(), "mod files compiled");
        Ok(())
    }

    fn strip_compiled_folder(&self, target: &Path) -> PathBuf {
        match target.file_name() {
            Some(name) if name == self.config.compiled_folder_name.as_str() => target
                .parent()
                .map_or_else(|| target.to_path_buf(), Path::to_path_buf),
            _ => target.to_path_buf(),
        }
    }

    fn copy_mods(&self, source: &Path, target: &Path) -> ModelResult<usize> {
        let entries = fs::read_dir(source)
            .map_err(|e| ExternalError::io(format!("reading {}", source.display()), &e))?;
        let mut found = 0;
        for entry in entries {
            let entry =
                entry.map_err(|e| ExternalError::io(format!("reading {}", source.display()), &e))?;
            let path = entry.path();
            if path.is_dir() || path.extension().map_or(true, |ext| ext != "mod") {
                continue;
            }
            fs::copy(&path, target.join(entry.file_name()))
                .map_err(|e| ExternalError::io(format!("copying {}", path.display()), &e))?;
            found += 1;
        }
        if found == 0 {
            return Err(ExternalError::NoModFiles {
                path: source.display().to_string(),
            }
            .into());
        }
        Ok(found)
    }

    /// Folder the next compilation goes to:
    /// `<output_root>/<8 hex>/mods<N>` or `<output_root>/mods<N>`, where N is
    /// the number of folders loaded in `ctx`.
    #[must_use]
    pub fn target_path(&self, ctx: &SimulationContext) -> PathBuf {
        let leaf = format!("mods{}", ctx.loaded_mod_path_count());
        let root = PathBuf::from(&self.config.output_root);
        if self.config.random_subfolder {
            let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
            let hash = blake3::hash(stamp.to_string().as_bytes()).to_hex();
            root.join(&hash.as_str()[..8]).join(leaf)
        } else {
            root.join(leaf)
        }
    }

    /// Compiles and loads the folders not loaded in `ctx` yet.
    ///
    /// Returns the compiled folder, or `None` when every folder was already
    /// loaded. An existing target is kept as is unless `override_existing`.
    pub fn compile_mods(
        &self,
        ctx: &SimulationContext,
        folders: &[PathBuf],
    ) -> ModelResult<Option<PathBuf>> {
        let pending: Vec<PathBuf> = folders
            .iter()
            .filter(|f| !ctx.is_mod_path_loaded(f))
            .cloned()
            .collect();
        if pending.is_empty() {
            debug!("mod folders already loaded");
            return Ok(None);
        }

        let target = self.target_path(ctx);
        if target.exists() && !self.config.override_existing {
            info!(dir = %target.display(), "target exists, compilation skipped");
        } else {
            self.compile(&pending, &target)?;
        }
        self.load_mods(ctx, &target)?;
        for folder in pending {
            ctx.mark_mod_path_loaded(folder);
        }
        Ok(Some(target))
    }

    /// Registers the mechanisms declared by the mod files in `path` (or in
    /// its parent, when `path` is the compiled folder itself).
    ///
    /// Retries up to `load_attempts` times, waiting `load_wait_ms` plus up to
    /// a second of jitter between attempts.
    pub fn load_mods(&self, ctx: &SimulationContext, path: &Path) -> ModelResult<usize> {
        let folder = self.strip_compiled_folder(path);
        let attempts = self.config.load_attempts.max(1);
        let mut last = String::new();
        for attempt in 1..=attempts {
            match register_folder(ctx, &folder) {
                Ok(count) => {
                    ctx.mark_mod_path_loaded(path.to_path_buf());
                    info!(path = %path.display(), mechanisms = count, "mechanisms loaded");
                    return Ok(count);
                }
                Err(reason) => {
                    warn!(path = %path.display(), attempt, attempts, %reason, "loading mechanisms failed");
                    last = reason;
                    if attempt < attempts {
                        let jitter = ctx.rng().gen_range(0..1000);
                        thread::sleep(Duration::from_millis(self.config.load_wait_ms + jitter));
                    }
                }
            }
        }
        Err(ExternalError::LoadFailed {
            path: path.display().to_string(),
            attempts,
            reason: last,
        }
        .into())
    }
}

/// Parses every mod file of `folder`; registers nothing unless all parse.
fn register_folder(ctx: &SimulationContext, folder: &Path) -> Result<usize, String> {
    let entries = fs::read_dir(folder).map_err(|e| e.to_string())?;
    let mut mechanisms = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| e.to_string())?.path();
        if path.extension().map_or(true, |ext| ext != "mod") {
            continue;
        }
        let source = fs::read_to_string(&path).map_err(|e| e.to_string())?;
        if let Some(mechanism) = parse_mod_source(&source).map_err(|e| e.to_string())? {
            mechanisms.push(mechanism);
        }
    }
    if mechanisms.is_empty() {
        return Err(format!("no mechanisms declared in {}", folder.display()));
    }
    let count = mechanisms.len();
    for mechanism in mechanisms {
        ctx.register_mechanism(mechanism);
    }
    Ok(count)
}

/// Compiles and loads `folders` with the context's compile settings.
pub fn compile_mods(ctx: &SimulationContext, folders: &[PathBuf]) -> ModelResult<Option<PathBuf>> {
    ModCompiler::new(ctx.config().compile).compile_mods(ctx, folders)
}

/// Loads compiled mechanisms from `path` with the context's compile settings.
pub fn load_mods(ctx: &SimulationContext, path: &Path) -> ModelResult<usize> {
    ModCompiler::new(ctx.config().compile).load_mods(ctx, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;

    const SYN4P: &str = "NEURON {\n  POINT_PROCESS Syn4P\n  RANGE tau_a, w\n}\nPARAMETER {\n  tau_a = 0.2\n}\n";

    fn config(root: &Path, command: &str) -> CompileConfig {
        CompileConfig {
            compile_command: command.to_string(),
            output_root: root.display().to_string(),
            random_subfolder: false,
            load_attempts: 1,
            load_wait_ms: 0,
            ..CompileConfig::default()
        }
    }

    fn mod_folder(dir: &Path) -> PathBuf {
        let folder = dir.join("mods");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("syn4p.mod"), SYN4P).unwrap();
        fs::write(folder.join("README"), "not a mod").unwrap();
        folder
    }

    #[test]
    fn test_compile_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let folder = mod_folder(dir.path());
        let ctx = SimulationContext::init(SimulationConfig::seeded(1)).unwrap();
        let compiler = ModCompiler::new(config(&dir.path().join("out"), "echo built"));

        let target = compiler.compile_mods(&ctx, &[folder.clone()]).unwrap().unwrap();
        assert!(target.ends_with("mods0"));
        assert!(target.join("syn4p.mod").exists());
        assert!(!target.join("README").exists());
        assert!(ctx.has_mechanism("Syn4P"));
        assert!(ctx.is_mod_path_loaded(&folder));

        assert!(compiler.compile_mods(&ctx, &[folder]).unwrap().is_none());
    }

    #[test]
    fn test_compile_failure_carries_output() {
        let dir = tempfile::tempdir().unwrap();
        let folder = mod_folder(dir.path());
        let compiler = ModCompiler::new(config(&dir.path().join("out"), "echo Error in syn4p.mod"));
        let err = compiler
            .compile(&[folder], &dir.path().join("out").join("x86_64"))
            .unwrap_err();
        assert!(err.is_external());
        assert!(err.to_string().contains("syn4p.mod"));
        assert!(dir.path().join("out").join("syn4p.mod").exists());
    }

    #[test]
    fn test_no_mod_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        let compiler = ModCompiler::new(config(dir.path(), "echo ok"));
        let err = compiler.compile(&[empty], &dir.path().join("t")).unwrap_err();
        assert!(err.to_string().contains("No mod files"));
    }

    #[test]
    fn test_load_fails_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SimulationContext::seeded(1).unwrap();
        let mut cfg = config(dir.path(), "echo ok");
        cfg.load_attempts = 2;
        let err = ModCompiler::new(cfg)
            .load_mods(&ctx, &dir.path().join("missing"))
            .unwrap_err();
        assert!(err.is_external());
        assert!(err.to_string().contains("2 attempts"));
    }

    #[test]
    fn test_random_target_path() {
        let ctx = SimulationContext::seeded(1).unwrap();
        let compiler = ModCompiler::new(CompileConfig {
            output_root: "compiled".to_string(),
            ..CompileConfig::default()
        });
        let path = compiler.target_path(&ctx);
        let parts: Vec<_> = path.components().collect();
        assert_eq!(parts.len(), 3);
        let random = parts[1].as_os_str().to_string_lossy().into_owned();
        assert_eq!(random.len(), 8);
        assert!(random.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
