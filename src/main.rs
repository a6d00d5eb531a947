use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use pipeline_forge::config;
use pipeline_forge::stack;
use pipeline_forge::writer::{self, Format};
use pipeline_forge::{CompileContext, Compiler, DeploymentTargets, DuplicateNames, Template};

#[derive(Parser)]
#[command(name = "pipeline-forge")]
#[command(about = "Compile pipeline configs into a CloudFormation template", long_about = None)]
struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, env = "PIPELINE_FORGE_CONFIG", default_value = "./config.yaml")]
    config: PathBuf,

    /// Template destination, stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Fail instead of warning when two pipelines share a name
    #[arg(long)]
    reject_duplicates: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries the template.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pipeline_forge=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = config::parse(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let records = config::collect_records(&config).context("Failed to load pipeline records")?;
    info!(records = records.len(), "loaded pipeline configuration");

    let region = stack::resolve_region(config.region.as_deref()).await?;
    let artifact_store = stack::resolve_artifact_store(&config.artifact_store, &region)
        .await
        .context("Failed to resolve the artifact store")?;

    let region_name: &str = region.as_ref();
    let context = CompileContext::new(
        config.account.clone(),
        region_name.to_string(),
        artifact_store,
    )
    .with_stack_id(config.stack_id.clone())
    .with_resource_prefix(config.resource_prefix.clone())
    .with_deployment_targets(DeploymentTargets::from(config.deployment_targets.clone()));

    let duplicate_names = if cli.reject_duplicates {
        DuplicateNames::Reject
    } else {
        DuplicateNames::Warn
    };
    let bundles = Compiler::new(&context)
        .on_duplicate_names(duplicate_names)
        .compile(&records)?;

    let template = Template::from_bundles(
        format!("Delivery pipelines for stack {}", context.stack_id),
        &bundles,
    )?;
    writer::write(&template, cli.format, cli.output.as_deref())?;

    if let Some(path) = &cli.output {
        info!(path = %path.display(), resources = template.resources.len(), "wrote template");
    }

    return Ok(());
}
