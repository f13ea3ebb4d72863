//! Waddle - reference motion and policy pipeline CLI
//!
//! The `waddle` command resolves robot entity variants and drives the
//! generation and training pipelines.
//!
//! ## Commands
//!
//! - `types` / `variants`: browse the entity taxonomy
//! - `resolve` / `reverse`: map between public ids and internal names
//! - `generate`: produce reference motions and fit coefficients
//! - `train`: train a policy on the latest coefficients
//! - `latest` / `runs`: inspect published runs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{debug, Level};

use waddle_core::{
    ArtifactPublisher, EntityTaxonomy, ForgeConfig, FsArtifactPublisher, NameResolver,
    ParamValue, PublishedRun, RunMode, RunRequest,
};
use waddle_pipeline::{
    GenerationPipeline, PipelineOutcome, ProcessRunner, TrainingPipeline,
};

#[derive(Parser)]
#[command(name = "waddle")]
#[command(version = waddle_core::VERSION)]
#[command(about = "Reference motion generation and policy training pipeline", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Workspace root; re-derives every path, overriding `WADDLE_*` path variables
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Format of command results on stdout
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// List entity types with their variants
    Types,

    /// List the variants of an entity type
    Variants {
        entity_type: String,
    },

    /// Print the internal name of an entity variant
    Resolve {
        entity_type: String,

        /// Variant id (default: the first declared variant)
        #[arg(long)]
        variant: Option<String>,
    },

    /// Print the `type/variant` owning an internal name
    Reverse {
        internal_name: String,
    },

    /// Generate reference motions and fit polynomial coefficients
    Generate {
        entity_type: String,

        #[arg(long)]
        variant: Option<String>,

        /// auto or advanced
        #[arg(long, default_value = "auto")]
        mode: RunMode,

        /// Auto-mode generation type
        #[arg(long, value_parser = ["single", "random", "sweep"])]
        generation_type: Option<String>,

        /// Number of motions for random generation
        #[arg(long)]
        num_motions: Option<i64>,

        /// Extra parameter, e.g. `-p dx=0.1` (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, ParamValue)>,
    },

    /// Train a policy on published motion coefficients
    Train {
        entity_type: String,

        #[arg(long)]
        variant: Option<String>,

        /// Parallel simulation environments
        #[arg(long)]
        num_envs: Option<i64>,

        /// Trainer task name
        #[arg(long)]
        task: Option<String>,

        /// Coefficients file (default: latest generated for the variant)
        #[arg(long)]
        motion_file: Option<PathBuf>,
    },

    /// Show the latest published run of a variant
    Latest {
        entity_type: String,

        #[arg(long)]
        variant: Option<String>,

        /// Look at trained models instead of generated motions
        #[arg(long)]
        models: bool,
    },

    /// List published run ids of a variant
    Runs {
        entity_type: String,

        #[arg(long)]
        variant: Option<String>,

        /// Look at trained models instead of generated motions
        #[arg(long)]
        models: bool,
    },
}

fn parse_param(raw: &str) -> std::result::Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), ParamValue::parse_literal(value)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    waddle_core::init_tracing(cli.json, level);

    let mut config = ForgeConfig::from_env().context("Invalid WADDLE_* configuration")?;
    if let Some(root) = &cli.root {
        config = config.rebase(root);
    }
    debug!(root = %config.workspace_root.display(), "configuration loaded");

    let out = cli.output;
    match cli.command {
        Commands::Types => cmd_types(&config, out),
        Commands::Variants { entity_type } => cmd_variants(&config, &entity_type, out),
        Commands::Resolve {
            entity_type,
            variant,
        } => cmd_resolve(&config, &entity_type, variant.as_deref(), out),
        Commands::Reverse { internal_name } => cmd_reverse(&config, &internal_name, out),
        Commands::Generate {
            entity_type,
            variant,
            mode,
            generation_type,
            num_motions,
            params,
        } => {
            let mut request = RunRequest::new(entity_type).with_mode(mode);
            request.variant = variant;
            for (key, value) in params {
                request = request.with_param(key, value);
            }
            if let Some(kind) = generation_type {
                request = request.with_param("generation_type", kind);
            }
            if let Some(n) = num_motions {
                request = request.with_param("num_motions", n);
            }
            cmd_generate(&config, &request, out).await
        }
        Commands::Train {
            entity_type,
            variant,
            num_envs,
            task,
            motion_file,
        } => {
            let mut request = RunRequest::new(entity_type);
            request.variant = variant;
            if let Some(n) = num_envs {
                request = request.with_param("num_envs", n);
            }
            if let Some(task) = task {
                request = request.with_param("task", task);
            }
            if let Some(file) = motion_file {
                request = request.with_param("motion_file", file.to_string_lossy().into_owned());
            }
            cmd_train(&config, &request, out).await
        }
        Commands::Latest {
            entity_type,
            variant,
            models,
        } => cmd_latest(&config, &entity_type, variant.as_deref(), models, out),
        Commands::Runs {
            entity_type,
            variant,
            models,
        } => cmd_runs(&config, &entity_type, variant.as_deref(), models, out),
    }
}

fn load_resolver(config: &ForgeConfig) -> Result<NameResolver> {
    let taxonomy = EntityTaxonomy::load_dir(&config.taxonomy_dir).with_context(|| {
        format!(
            "Failed to load entity taxonomy from {}",
            config.taxonomy_dir.display()
        )
    })?;
    Ok(NameResolver::new(Arc::new(taxonomy)))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_types(config: &ForgeConfig, out: OutputFormat) -> Result<()> {
    let resolver = load_resolver(config)?;
    if out == OutputFormat::Json {
        return print_json(&resolver.taxonomy().entities());
    }

    let entities = resolver.taxonomy().entities();
    if entities.is_empty() {
        println!("No entity types found in {}", config.taxonomy_dir.display());
        return Ok(());
    }
    for entity in entities {
        println!("{} ({}): {}", entity.id, entity.name, entity.variant_ids().join(", "));
    }
    Ok(())
}

fn cmd_variants(config: &ForgeConfig, entity_type: &str, out: OutputFormat) -> Result<()> {
    let resolver = load_resolver(config)?;
    resolver.list_variants(entity_type)?;
    let listings: Vec<_> = resolver
        .taxonomy()
        .all_variants()
        .into_iter()
        .filter(|v| v.entity_type == entity_type)
        .collect();

    if out == OutputFormat::Json {
        return print_json(&listings);
    }
    for listing in listings {
        println!(
            "{:<12} {:<24} {}",
            listing.variant, listing.variant_name, listing.internal_name
        );
    }
    Ok(())
}

fn cmd_resolve(
    config: &ForgeConfig,
    entity_type: &str,
    variant: Option<&str>,
    out: OutputFormat,
) -> Result<()> {
    let resolved = load_resolver(config)?.resolve(entity_type, variant)?;
    if out == OutputFormat::Json {
        return print_json(&resolved);
    }
    println!("{}", resolved.internal_name);
    Ok(())
}

fn cmd_reverse(config: &ForgeConfig, internal_name: &str, out: OutputFormat) -> Result<()> {
    let resolved = load_resolver(config)?.reverse_resolve(internal_name)?;
    if out == OutputFormat::Json {
        return print_json(&resolved);
    }
    println!("{}/{}", resolved.entity_type, resolved.variant);
    Ok(())
}

async fn cmd_generate(config: &ForgeConfig, request: &RunRequest, out: OutputFormat) -> Result<()> {
    let resolver = load_resolver(config)?;
    let pipeline = GenerationPipeline::new(
        config,
        resolver,
        Arc::new(ProcessRunner::new()),
        Arc::new(FsArtifactPublisher::new(&config.motions_root)),
    );

    let outcome = pipeline.run(request).await;
    report_outcome(&outcome, out)
}

async fn cmd_train(config: &ForgeConfig, request: &RunRequest, out: OutputFormat) -> Result<()> {
    let resolver = load_resolver(config)?;
    let pipeline = TrainingPipeline::new(
        config,
        resolver,
        Arc::new(ProcessRunner::new()),
        Arc::new(FsArtifactPublisher::new(&config.motions_root)),
        Arc::new(FsArtifactPublisher::new(&config.models_root)),
    );

    let outcome = pipeline.run(request).await;
    report_outcome(&outcome, out)
}

/// Print the outcome; a failed run becomes a non-zero exit.
fn report_outcome(outcome: &PipelineOutcome, out: OutputFormat) -> Result<()> {
    if out == OutputFormat::Json {
        print_json(outcome)?;
    } else {
        println!("{}", outcome.payload.output);
        println!();
        println!("Run:     {}", outcome.payload.run_id);
        println!("State:   {}", outcome.state);
        if let Some(dir) = &outcome.payload.published_dir {
            println!("Output:  {}", dir.display());
        }
        for file in &outcome.payload.files {
            println!("  - {file}");
        }
        for warning in &outcome.payload.warnings {
            println!("Warning: {warning}");
        }
        println!("{}", outcome.message);
    }

    if !outcome.success {
        anyhow::bail!("{}", outcome.message);
    }
    Ok(())
}

fn publisher_for(config: &ForgeConfig, models: bool) -> FsArtifactPublisher {
    if models {
        FsArtifactPublisher::new(&config.models_root)
    } else {
        FsArtifactPublisher::new(&config.motions_root)
    }
}

fn cmd_latest(
    config: &ForgeConfig,
    entity_type: &str,
    variant: Option<&str>,
    models: bool,
    out: OutputFormat,
) -> Result<()> {
    let entity = load_resolver(config)?.resolve(entity_type, variant)?;
    let run: PublishedRun = publisher_for(config, models)
        .get_latest(&entity.entity_type, &entity.variant)
        .with_context(|| {
            format!(
                "No published run for {}/{}",
                entity.entity_type, entity.variant
            )
        })?;

    if out == OutputFormat::Json {
        return print_json(&run);
    }
    println!("Run:       {}", run.run_id);
    println!("Directory: {}", run.directory.display());
    if let Some(created) = run.created_at {
        println!("Created:   {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    for file in &run.files {
        println!("  {:<36} {:>10}  {}", file.name, file.size_bytes, &file.sha256[..12.min(file.sha256.len())]);
    }
    Ok(())
}

fn cmd_runs(
    config: &ForgeConfig,
    entity_type: &str,
    variant: Option<&str>,
    models: bool,
    out: OutputFormat,
) -> Result<()> {
    let entity = load_resolver(config)?.resolve(entity_type, variant)?;
    let runs = publisher_for(config, models).list_runs(&entity.entity_type, &entity.variant)?;

    if out == OutputFormat::Json {
        return print_json(&runs);
    }
    if runs.is_empty() {
        println!("No published runs for {}/{}", entity.entity_type, entity.variant);
    }
    for run in runs {
        println!("{run}");
    }
    Ok(())
}
