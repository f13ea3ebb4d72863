//! Reference motion generation: generate, fit, publish, mirror.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, Instrument};
use waddle_core::{
    obs, ArtifactPublisher, ForgeConfig, MirrorRule, NameResolver, ResolvedEntity, RunIdGenerator,
    RunRequest,
};

use crate::context::{scratch_failure, RunContext};
use crate::pipeline::{
    await_outputs, json_preview, run_stage, Completed, PipelineError, PipelineOutcome,
    PipelineState,
};
use crate::runner::CommandRunner;
use crate::stage::{StageTemplates, COEFFICIENTS_FILE};
use crate::waiter::StageWaiter;

const CAPABILITY: &str = "generation";
const SUCCESS_MESSAGE: &str = "Motion generation completed successfully";
const FAILURE_PREFIX: &str = "Motion generation failed";

/// Sequences `INIT → GENERATING → AWAITING_GENERATED → POST_PROCESSING →
/// AWAITING_PROCESSED → PUBLISHING → DONE`.
pub struct GenerationPipeline {
    resolver: NameResolver,
    runner: Arc<dyn CommandRunner>,
    publisher: Arc<dyn ArtifactPublisher>,
    waiter: StageWaiter,
    templates: StageTemplates,
    generator_dir: PathBuf,
    mirrors: Vec<MirrorRule>,
    run_ids: RunIdGenerator,
}

impl GenerationPipeline {
    pub fn new(
        config: &ForgeConfig,
        resolver: NameResolver,
        runner: Arc<dyn CommandRunner>,
        publisher: Arc<dyn ArtifactPublisher>,
    ) -> Self {
        Self {
            resolver,
            runner,
            publisher,
            waiter: StageWaiter::new(config.generation_wait),
            templates: StageTemplates::new(config.launcher.clone()),
            generator_dir: config.generator_dir.clone(),
            mirrors: vec![default_mirror(config)],
            run_ids: RunIdGenerator::new(),
        }
    }

    pub fn with_mirrors(mut self, mirrors: Vec<MirrorRule>) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Execute one run to completion. Failures are reported in the outcome.
    pub async fn run(&self, request: &RunRequest) -> PipelineOutcome {
        let run_id = self.run_ids.next();
        let span = obs::run_span(run_id.as_str(), CAPABILITY);

        async move {
            let mut ctx = match RunContext::create(run_id.clone(), "motion_gen") {
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
        ctx.log.push(format!(
            "Generating motions for {}/{} ({}) in {} mode",
            entity.entity_type, entity.variant, entity.internal_name, request.mode
        ));

        let scratch = ctx.scratch_dir().to_path_buf();
        let generate = self.templates.generation_command(
            request,
            &entity.internal_name,
            &ctx.run_id,
            &scratch,
        )?;

        ctx.transition(PipelineState::Generating);
        run_stage(
            self.runner.as_ref(),
            ctx,
            "generate",
            "Command",
            &generate,
            &self.generator_dir,
        )
        .await?;

        ctx.transition(PipelineState::AwaitingGenerated);
        let motions = await_outputs(
            &self.waiter,
            ctx,
            &[scratch.clone()],
            &self.templates.motion_pattern(),
            "No motion files were generated",
        )
        .await?;

        ctx.transition(PipelineState::PostProcessing);
        let fit = self.templates.fit_command(&motions.files);
        run_stage(
            self.runner.as_ref(),
            ctx,
            "fit",
            "Polynomial Fitting",
            &fit,
            &self.generator_dir,
        )
        .await?;

        ctx.transition(PipelineState::AwaitingProcessed);
        let coefficients = await_outputs(
            &self.waiter,
            ctx,
            &[scratch, self.generator_dir.clone()],
            &self.templates.coefficients_pattern(),
            "No polynomial coefficients file was generated",
        )
        .await?;

        ctx.transition(PipelineState::Publishing);
        let mut files = motions.files.clone();
        files.extend(coefficients.files.iter().take(1).cloned());
        let published =
            self.publisher
                .publish(&ctx.run_id, &entity.entity_type, &entity.variant, &files)?;
        obs::emit_run_published(
            ctx.run_id.as_str(),
            &published.directory.to_string_lossy(),
            published.files.len(),
        );
        ctx.log.push(format!(
            "Published {} file(s) to {}",
            published.files.len(),
            published.directory.display()
        ));

        self.mirror_outputs(ctx, &entity, &published);

        let preview = motions
            .files
            .first()
            .and_then(|p| p.file_name())
            .and_then(|name| published.file_path(&name.to_string_lossy()))
            .and_then(|path| json_preview(&path));

        Ok(Completed { published, preview })
    }

    fn mirror_outputs(
        &self,
        ctx: &mut RunContext,
        entity: &ResolvedEntity,
        published: &waddle_core::PublishedRun,
    ) {
        for rule in &self.mirrors {
            let Some(source) = published.file_path(&rule.file_name) else {
                continue;
            };
            let destination = rule.destination_for(entity);
            match self.publisher.mirror(&source, &destination) {
                Ok(()) => {
                    info!(run_id = %ctx.run_id, destination = %destination.display(), "mirrored artifact");
                    ctx.log
                        .push(format!("Mirrored {} to {}", rule.file_name, destination.display()));
                }
                Err(warning) => {
                    obs::emit_mirror_failed(ctx.run_id.as_str(), &rule.file_name, &warning);
                    ctx.warn(warning.to_string());
                }
            }
        }
    }
}

/// The simulator reads the newest coefficients from its per-model data dir.
fn default_mirror(config: &ForgeConfig) -> MirrorRule {
    let destination = config
        .playground_dir
        .join("playground")
        .join("{internal_name}")
        .join("data")
        .join("{file_name}");
    MirrorRule::new(COEFFICIENTS_FILE, destination.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_mirror_targets_playground_data_dir() {
        let config = ForgeConfig::with_root("/srv/waddle");
        let rule = default_mirror(&config);
        let entity = ResolvedEntity {
            entity_type: "open_duck_mini".into(),
            variant: "v2".into(),
            internal_name: "open_duck_mini_v2".into(),
        };
        assert_eq!(rule.file_name, "polynomial_coefficients.pkl");
        assert_eq!(
            rule.destination_for(&entity),
            Path::new(
                "/srv/waddle/submodules/open_duck_playground/playground/open_duck_mini_v2/data/polynomial_coefficients.pkl"
            )
        );
    }
}
