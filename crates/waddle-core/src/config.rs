//! Explicit runtime configuration, built once and passed by reference.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_NUM_ENVS: u32 = 4096;
pub const MIN_NUM_ENVS: u32 = 1;
pub const MAX_NUM_ENVS: u32 = 8192;

/// Configuration errors, each naming its source variable or field.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid duration '{value}': {source}")]
    InvalidDuration {
        var: String,
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("{var} must not be empty")]
    Empty { var: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("num_envs bounds are inconsistent: min {min}, default {default}, max {max}")]
    InvalidBounds { min: u32, default: u32, max: u32 },
}

/// Timeout and poll interval of one completion wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn generation() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_millis(500))
    }

    pub fn training() -> Self {
        Self::new(Duration::from_secs(2 * 60 * 60), Duration::from_secs(5))
    }
}

/// Accepted range and default for the trainer's parallel environment count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumEnvsBounds {
    pub default: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for NumEnvsBounds {
    fn default() -> Self {
        Self {
            default: DEFAULT_NUM_ENVS,
            min: MIN_NUM_ENVS,
            max: MAX_NUM_ENVS,
        }
    }
}

impl NumEnvsBounds {
    pub fn contains(&self, n: i64) -> bool {
        n >= i64::from(self.min) && n <= i64::from(self.max)
    }
}

/// Paths, launcher and timing for both pipeline capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeConfig {
    pub workspace_root: PathBuf,
    pub taxonomy_dir: PathBuf,
    /// Publish root of generated motions.
    pub motions_root: PathBuf,
    /// Publish root of trained models.
    pub models_root: PathBuf,
    /// Working directory of the motion generator tool.
    pub generator_dir: PathBuf,
    /// Working directory of the trainer; also the mirror target.
    pub playground_dir: PathBuf,
    /// Command prefix for every external stage.
    pub launcher: Vec<String>,
    pub generation_wait: WaitPolicy,
    pub training_wait: WaitPolicy,
    pub num_envs: NumEnvsBounds,
}

impl ForgeConfig {
    /// Defaults laid out under `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            taxonomy_dir: root.join("config").join("entities"),
            motions_root: root.join("output").join("generated_motions"),
            models_root: root.join("output").join("trained_models"),
            generator_dir: root
                .join("submodules")
                .join("open_duck_reference_motion_generator"),
            playground_dir: root.join("submodules").join("open_duck_playground"),
            launcher: vec!["uv".to_string(), "run".to_string(), "--active".to_string()],
            generation_wait: WaitPolicy::generation(),
            training_wait: WaitPolicy::training(),
            num_envs: NumEnvsBounds::default(),
            workspace_root: root,
        }
    }

    /// Build from `WADDLE_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ForgeConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = lookup("WADDLE_ROOT")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::with_root(root);

        let paths: [(&str, &mut PathBuf); 5] = [
            ("WADDLE_TAXONOMY_DIR", &mut config.taxonomy_dir),
            ("WADDLE_MOTIONS_DIR", &mut config.motions_root),
            ("WADDLE_MODELS_DIR", &mut config.models_root),
            ("WADDLE_GENERATOR_DIR", &mut config.generator_dir),
            ("WADDLE_PLAYGROUND_DIR", &mut config.playground_dir),
        ];
        for (var, slot) in paths {
            if let Some(value) = lookup(var) {
                if value.trim().is_empty() {
                    return Err(ConfigError::Empty { var: var.to_string() });
                }
                *slot = PathBuf::from(value);
            }
        }

        if let Some(value) = lookup("WADDLE_LAUNCHER") {
            let launcher: Vec<String> = value.split_whitespace().map(str::to_string).collect();
            if launcher.is_empty() {
                return Err(ConfigError::Empty {
                    var: "WADDLE_LAUNCHER".to_string(),
                });
            }
            config.launcher = launcher;
        }

        if let Some(t) = parse_duration(&lookup, "WADDLE_WAIT_TIMEOUT")? {
            config.generation_wait.timeout = t;
        }
        if let Some(p) = parse_duration(&lookup, "WADDLE_POLL_INTERVAL")? {
            config.generation_wait.poll_interval = p;
        }
        if let Some(t) = parse_duration(&lookup, "WADDLE_TRAINING_TIMEOUT")? {
            config.training_wait.timeout = t;
        }

        config.validate()?;
        Ok(config)
    }

    /// Re-derive every path from `root`, keeping launcher and timing settings.
    pub fn rebase(mut self, root: &Path) -> Self {
        let defaults = Self::with_root(root);
        self.taxonomy_dir = defaults.taxonomy_dir;
        self.motions_root = defaults.motions_root;
        self.models_root = defaults.models_root;
        self.generator_dir = defaults.generator_dir;
        self.playground_dir = defaults.playground_dir;
        self.workspace_root = defaults.workspace_root;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, policy) in [
            ("generation_wait", &self.generation_wait),
            ("training_wait", &self.training_wait),
        ] {
            if policy.timeout.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
            if policy.poll_interval.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        let b = self.num_envs;
        if !(b.min <= b.default && b.default <= b.max) {
            return Err(ConfigError::InvalidBounds {
                min: b.min,
                default: b.default,
                max: b.max,
            });
        }
        if self.launcher.is_empty() {
            return Err(ConfigError::Empty {
                var: "launcher".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self::with_root(".")
    }
}

fn parse_duration<F>(lookup: &F, var: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => humantime::parse_duration(value.trim())
            .map(Some)
            .map_err(|source| ConfigError::InvalidDuration {
                var: var.to_string(),
                value,
                source,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ForgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.generation_wait, WaitPolicy::generation());
        assert_eq!(config.generation_wait.timeout, Duration::from_secs(30));
        assert_eq!(config.num_envs.default, 4096);
        assert_eq!(config.launcher, vec!["uv", "run", "--active"]);
        assert_eq!(config.taxonomy_dir, PathBuf::from("./config/entities"));
    }

    #[test]
    fn test_env_overrides() {
        let config = ForgeConfig::from_lookup(lookup(&[
            ("WADDLE_ROOT", "/srv/waddle"),
            ("WADDLE_MODELS_DIR", "/data/models"),
            ("WADDLE_LAUNCHER", "python3  -u"),
            ("WADDLE_WAIT_TIMEOUT", "2m"),
            ("WADDLE_POLL_INTERVAL", "250ms"),
        ]))
        .unwrap();

        assert_eq!(config.motions_root, PathBuf::from("/srv/waddle/output/generated_motions"));
        assert_eq!(config.models_root, PathBuf::from("/data/models"));
        assert_eq!(config.launcher, vec!["python3", "-u"]);
        assert_eq!(config.generation_wait.timeout, Duration::from_secs(120));
        assert_eq!(config.generation_wait.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_duration_names_variable() {
        let err = ForgeConfig::from_lookup(lookup(&[("WADDLE_TRAINING_TIMEOUT", "soon")]))
            .unwrap_err();
        assert!(err.to_string().starts_with("WADDLE_TRAINING_TIMEOUT"));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = ForgeConfig::from_lookup(lookup(&[("WADDLE_POLL_INTERVAL", "0s")])).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { field: "generation_wait" }));
    }

    #[test]
    fn test_empty_launcher_rejected() {
        let err = ForgeConfig::from_lookup(lookup(&[("WADDLE_LAUNCHER", "   ")])).unwrap_err();
        assert!(matches!(err, ConfigError::Empty { .. }));
    }

    #[test]
    fn test_num_envs_bounds() {
        let b = NumEnvsBounds::default();
        assert!(b.contains(1));
        assert!(b.contains(8192));
        assert!(!b.contains(0));
        assert!(!b.contains(8193));
    }
}
