//! Scripted command runner for exercising orchestrators without external tools.
//!
//! `ScriptedRunner` answers each invocation with the next `ScriptedStep`,
//! records what it was asked to run, and can drop output files into the
//! stage's output directory after a delay, the way a real generator or
//! trainer would.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::runner::{CommandOutput, CommandRunner, CommandSpec};

/// Where a scripted output file is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// The command's `--output_dir` argument, or its working directory when absent.
    OutputDir,
    /// The command's working directory.
    WorkingDir,
    /// A fixed directory.
    Dir(PathBuf),
}

/// A file a scripted step produces.
#[derive(Debug, Clone)]
pub struct ScriptedOutput {
    pub target: OutputTarget,
    pub file_name: String,
    pub content: Vec<u8>,
    /// Delay after the command returns; zero writes before returning.
    pub delay: Duration,
}

/// The scripted answer to one invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStep {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub outputs: Vec<ScriptedOutput>,
}

impl ScriptedStep {
    pub fn succeed() -> Self {
        Self::default()
    }

    pub fn fail(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Write `file_name` into the output directory after `delay`.
    pub fn writes(self, file_name: &str, content: impl Into<Vec<u8>>, delay: Duration) -> Self {
        self.writes_to(OutputTarget::OutputDir, file_name, content, delay)
    }

    pub fn writes_to(
        mut self,
        target: OutputTarget,
        file_name: &str,
        content: impl Into<Vec<u8>>,
        delay: Duration,
    ) -> Self {
        self.outputs.push(ScriptedOutput {
            target,
            file_name: file_name.to_string(),
            content: content.into(),
            delay,
        });
        self
    }
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: CommandSpec,
    pub working_dir: PathBuf,
}

#[derive(Debug, Default)]
pub struct ScriptedRunner {
    steps: Mutex<VecDeque<ScriptedStep>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(steps: impl IntoIterator<Item = ScriptedStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining_steps(&self) -> usize {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec, working_dir: &Path) -> CommandOutput {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                command: command.clone(),
                working_dir: working_dir.to_path_buf(),
            });

        let step = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(step) = step else {
            return CommandOutput {
                command: command.display(),
                working_dir: working_dir.to_path_buf(),
                exit_code: Some(127),
                stdout: String::new(),
                stderr: "no scripted step left".to_string(),
                duration_ms: 0,
                success: false,
            };
        };

        for output in step.outputs {
            let dir = match &output.target {
                OutputTarget::OutputDir => command
                    .flag_value("--output_dir")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| working_dir.to_path_buf()),
                OutputTarget::WorkingDir => working_dir.to_path_buf(),
                OutputTarget::Dir(dir) => dir.clone(),
            };
            let path = dir.join(&output.file_name);
            if output.delay.is_zero() {
                let _ = std::fs::write(&path, &output.content);
            } else {
                tokio::spawn(async move {
                    tokio::time::sleep(output.delay).await;
                    // The run may already be over and its scratch dir gone.
                    let _ = std::fs::write(&path, &output.content);
                });
            }
        }

        CommandOutput {
            command: command.display(),
            working_dir: working_dir.to_path_buf(),
            exit_code: Some(step.exit_code),
            stdout: step.stdout,
            stderr: step.stderr,
            duration_ms: 0,
            success: step.exit_code == 0,
        }
    }
}
