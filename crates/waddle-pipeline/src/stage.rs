//! Argument templates of the external stages.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use waddle_core::{ParamValue, RunId, RunMode, RunRequest};

use crate::pattern::FilePattern;
use crate::pipeline::PipelineError;
use crate::runner::CommandSpec;

pub const AUTO_GENERATOR_SCRIPT: &str = "scripts/auto_waddle.py";
pub const GAIT_GENERATOR_SCRIPT: &str = "open_duck_reference_motion_generator/gait_generator.py";
pub const FIT_SCRIPT: &str = "scripts/fit_poly.py";
pub const TRAINING_SCRIPT: &str = "playground/runner.py";

pub const MOTION_GLOB: &str = "*.json";
pub const COEFFICIENTS_FILE: &str = "polynomial_coefficients.pkl";
pub const MODEL_GLOB: &str = "*.onnx";

pub const DEFAULT_RANDOM_MOTIONS: i64 = 10;
pub const DEFAULT_MOTION_LENGTH: i64 = 5;
pub const DEFAULT_TRAINING_TASK: &str = "DucklingCommand";

/// Gait parameters forwarded verbatim in advanced mode, in this order.
pub const ADVANCED_PARAMS: [&str; 10] = [
    "dx",
    "dy",
    "dtheta",
    "walk_com_height",
    "walk_foot_height",
    "walk_trunk_pitch",
    "walk_foot_rise_ratio",
    "single_support_duration",
    "feet_spacing",
    "zmp_margin",
];

/// Auto-mode sub-mode, chosen by the `generation_type` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationKind {
    Single,
    Random,
    Sweep,
}

impl GenerationKind {
    /// Anything other than `random` or `sweep` means a single motion.
    pub fn from_request(request: &RunRequest) -> Self {
        match request.param("generation_type").map(ParamValue::to_string) {
            Some(kind) if kind.eq_ignore_ascii_case("sweep") => GenerationKind::Sweep,
            Some(kind) if kind.eq_ignore_ascii_case("random") => GenerationKind::Random,
            _ => GenerationKind::Single,
        }
    }
}

/// Builds stage command lines behind a common launcher prefix.
#[derive(Debug, Clone)]
pub struct StageTemplates {
    launcher: Vec<String>,
}

impl StageTemplates {
    pub fn new(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    fn launch(&self, script: &str) -> CommandSpec {
        match self.launcher.split_first() {
            Some((program, rest)) => CommandSpec::new(program.as_str()).args(rest.iter().cloned()).arg(script),
            None => CommandSpec::new(script),
        }
    }

    /// Stage 1: reference motion generation into `output_dir`.
    pub fn generation_command(
        &self,
        request: &RunRequest,
        internal_name: &str,
        run_id: &RunId,
        output_dir: &Path,
    ) -> Result<CommandSpec, PipelineError> {
        let command = match request.mode {
            RunMode::Auto => {
                let base = self
                    .launch(AUTO_GENERATOR_SCRIPT)
                    .args(["--duck", internal_name]);
                match GenerationKind::from_request(request) {
                    GenerationKind::Sweep => base.arg("--sweep"),
                    GenerationKind::Random => {
                        let num = positive_int(request, "num_motions", DEFAULT_RANDOM_MOTIONS)?;
                        base.args(["--num".to_string(), num.to_string()])
                    }
                    GenerationKind::Single => base.args(["--num", "1"]),
                }
            }
            RunMode::Advanced => {
                let mut cmd = self
                    .launch(GAIT_GENERATOR_SCRIPT)
                    .args(["--duck", internal_name])
                    .args(["--name".to_string(), format!("motion_{run_id}")]);
                for name in ADVANCED_PARAMS {
                    if let Some(value) = request.param(name) {
                        cmd = cmd.args([format!("--{name}"), numeric(name, value)?]);
                    }
                }
                let length = match request.param("duration") {
                    Some(value) => numeric("duration", value)?,
                    None => DEFAULT_MOTION_LENGTH.to_string(),
                };
                cmd.args(["--length".to_string(), length])
            }
        };
        Ok(command.args(["--output_dir".to_string(), path_arg(output_dir)]))
    }

    /// Stage 2: polynomial fit over the generated motions.
    pub fn fit_command(&self, motion_files: &[PathBuf]) -> CommandSpec {
        self.launch(FIT_SCRIPT)
            .arg("--ref_motion")
            .args(motion_files.iter().map(|p| path_arg(p)))
    }

    /// Policy training against a coefficients file.
    pub fn training_command(
        &self,
        internal_name: &str,
        task: &str,
        num_envs: u32,
        motion_file: &Path,
        output_dir: &Path,
    ) -> CommandSpec {
        self.launch(TRAINING_SCRIPT).args([
            "--task".to_string(),
            task.to_string(),
            "--num_envs".to_string(),
            num_envs.to_string(),
            "--cfg_env".to_string(),
            format!("playground/{internal_name}/duckling_command.yaml"),
            "--cfg_train".to_string(),
            format!("playground/{internal_name}/train/amp_duckling_task.yaml"),
            "--motion_file".to_string(),
            path_arg(motion_file),
            "--output_dir".to_string(),
            path_arg(output_dir),
        ])
    }

    pub fn motion_pattern(&self) -> FilePattern {
        FilePattern::constant(MOTION_GLOB)
    }

    pub fn coefficients_pattern(&self) -> FilePattern {
        FilePattern::constant(COEFFICIENTS_FILE)
    }

    pub fn model_pattern(&self) -> FilePattern {
        FilePattern::constant(MODEL_GLOB)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn numeric(name: &str, value: &ParamValue) -> Result<String, PipelineError> {
    if value.is_numeric() {
        Ok(value.to_string().trim().to_string())
    } else {
        Err(PipelineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a number, got '{value}'"),
        })
    }
}

pub(crate) fn positive_int(request: &RunRequest, name: &str, default: i64) -> Result<i64, PipelineError> {
    match request.param(name) {
        None => Ok(default),
        Some(value) => match value.as_i64() {
            Some(n) if n >= 1 => Ok(n),
            _ => Err(PipelineError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a positive integer, got '{value}'"),
            }),
        },
    }
}
