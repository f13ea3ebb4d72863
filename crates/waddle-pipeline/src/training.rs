//! Policy training against published motion coefficients.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, Instrument};
use waddle_core::{
    obs, ArtifactPublisher, ForgeConfig, NameResolver, NumEnvsBounds, PublishError,
    ResolvedEntity, RunIdGenerator, RunRequest,
};

use crate::context::{scratch_failure, RunContext};
use crate::pipeline::{
    await_outputs, run_stage, Completed, PipelineError, PipelineOutcome, PipelineState,
};
use crate::runner::CommandRunner;
use crate::stage::{StageTemplates, COEFFICIENTS_FILE, DEFAULT_TRAINING_TASK};
use crate::waiter::StageWaiter;

const CAPABILITY: &str = "training";
const SUCCESS_MESSAGE: &str = "Training completed successfully";
const FAILURE_PREFIX: &str = "Training failed";

/// Sequences `INIT → TRAINING → AWAITING_MODEL → PUBLISHING → DONE`.
///
/// Request parameters:
/// - `num_envs`: parallel simulation environments, within the configured bounds
/// - `task`: trainer task name, default `DucklingCommand`
/// - `motion_file`: coefficients file; defaults to the latest published
///   generation run of the same entity
pub struct TrainingPipeline {
    resolver: NameResolver,
    runner: Arc<dyn CommandRunner>,
    motions: Arc<dyn ArtifactPublisher>,
    models: Arc<dyn ArtifactPublisher>,
    waiter: StageWaiter,
    templates: StageTemplates,
    playground_dir: PathBuf,
    num_envs: NumEnvsBounds,
    run_ids: RunIdGenerator,
}

impl TrainingPipeline {
    pub fn new(
        config: &ForgeConfig,
        resolver: NameResolver,
        runner: Arc<dyn CommandRunner>,
        motions: Arc<dyn ArtifactPublisher>,
        models: Arc<dyn ArtifactPublisher>,
    ) -> Self {
        Self {
            resolver,
            runner,
            motions,
            models,
            waiter: StageWaiter::new(config.training_wait),
            templates: StageTemplates::new(config.launcher.clone()),
            playground_dir: config.playground_dir.clone(),
            num_envs: config.num_envs,
            run_ids: RunIdGenerator::new(),
        }
    }

    /// Execute one run to completion. Failures are reported in the outcome.
    pub async fn run(&self, request: &RunRequest) -> PipelineOutcome {
        let run_id = self.run_ids.next();
        let span = obs::run_span(run_id.as_str(), CAPABILITY);

        async move {
            let mut ctx = match RunContext::create(run_id.clone(), "training") {
                Ok(ctx) => ctx,
                Err(err) => return scratch_failure(&run_id, err, FAILURE_PREFIX),
            };
            let result = self.execute(request, &mut ctx).await;
            ctx.finish(result, SUCCESS_MESSAGE, FAILURE_PREFIX)
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        request: &RunRequest,
        ctx: &mut RunContext,
    ) -> Result<Completed, PipelineError> {
        let entity = self
            .resolver
            .resolve(&request.entity_type, request.variant.as_deref())?;
        obs::emit_run_started(ctx.run_id.as_str(), CAPABILITY, &entity.internal_name);

        let num_envs = self.num_envs(request)?;
        let task = match request.param("task") {
            Some(value) if !value.to_string().trim().is_empty() => value.to_string(),
            Some(_) => {
                return Err(PipelineError::InvalidParameter {
                    name: "task".to_string(),
                    reason: "must not be empty".to_string(),
                })
            }
            None => DEFAULT_TRAINING_TASK.to_string(),
        };
        let motion_file = self.motion_file(request, &entity)?;
        ctx.log.push(format!(
            "Training {} ({}) with {} environments on {}",
            entity.internal_name,
            task,
            num_envs,
            motion_file.display()
        ));

        let scratch = ctx.scratch_dir().to_path_buf();
        let command = self.templates.training_command(
            &entity.internal_name,
            &task,
            num_envs,
            &motion_file,
            &scratch,
        );

        ctx.transition(PipelineState::Training);
        run_stage(
            self.runner.as_ref(),
            ctx,
            "train",
            "Training",
            &command,
            &self.playground_dir,
        )
        .await?;

        ctx.transition(PipelineState::AwaitingModel);
        let models = await_outputs(
            &self.waiter,
            ctx,
            &[scratch],
            &self.templates.model_pattern(),
            "No trained model was generated",
        )
        .await?;

        ctx.transition(PipelineState::Publishing);
        let published =
            self.models
                .publish(&ctx.run_id, &entity.entity_type, &entity.variant, &models.files)?;
        obs::emit_run_published(
            ctx.run_id.as_str(),
            &published.directory.to_string_lossy(),
            published.files.len(),
        );
        ctx.log.push(format!(
            "Published {} model file(s) to {}",
            published.files.len(),
            published.directory.display()
        ));

        Ok(Completed {
            published,
            preview: None,
        })
    }

    fn num_envs(&self, request: &RunRequest) -> Result<u32, PipelineError> {
        let Some(value) = request.param("num_envs") else {
            return Ok(self.num_envs.default);
        };
        match value.as_i64() {
            Some(n) if self.num_envs.contains(n) => Ok(n as u32),
            _ => Err(PipelineError::InvalidParameter {
                name: "num_envs".to_string(),
                reason: format!(
                    "expected an integer between {} and {}, got '{value}'",
                    self.num_envs.min, self.num_envs.max
                ),
            }),
        }
    }

    fn motion_file(
        &self,
        request: &RunRequest,
        entity: &ResolvedEntity,
    ) -> Result<PathBuf, PipelineError> {
        if let Some(value) = request.param("motion_file") {
            let path = PathBuf::from(value.to_string());
            if !path.is_file() {
                return Err(PipelineError::InvalidParameter {
                    name: "motion_file".to_string(),
                    reason: format!("{} is not a file", path.display()),
                });
            }
            return absolute("motion_file", path);
        }

        let missing = || PipelineError::InvalidParameter {
            name: "motion_file".to_string(),
            reason: format!(
                "no generated motions found for {}/{}; generate motions first",
                entity.entity_type, entity.variant
            ),
        };
        let latest = match self.motions.get_latest(&entity.entity_type, &entity.variant) {
            Ok(run) => run,
            Err(PublishError::NotFound { .. } | PublishError::RunNotFound { .. }) => {
                return Err(missing())
            }
            Err(e) => return Err(e.into()),
        };
        debug!(run_id = %latest.run_id, "using latest generated motions");
        let path = latest.file_path(COEFFICIENTS_FILE).ok_or_else(missing)?;
        absolute("motion_file", path)
    }
}

/// The trainer runs in its own working directory, so paths are made absolute.
fn absolute(name: &str, path: PathBuf) -> Result<PathBuf, PipelineError> {
    path.canonicalize()
        .map_err(|e| PipelineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{}: {e}", path.display()),
        })
}
