//! Command handlers behind the `genpipe` subcommands.

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use genpipe_arkiv::ArkivClient;
use genpipe_comfyui::{ComfyUIClient, ImageSession};
use genpipe_core::prompts;
use genpipe_core::workflow;
use genpipe_db::models::job::JobStats;
use genpipe_db::repositories::JobRepo;
use genpipe_pipeline::collaborators::ArtifactUploader;
use genpipe_pipeline::generation::ComfyGenerator;
use genpipe_pipeline::repair::{self, RepairPlan};
use genpipe_pipeline::upload::{ArkivUploader, UploadPolicy};
use genpipe_pipeline::{Coordinator, PipelineSettings, PipelineVariant, RunSummary};
use tokio_util::sync::CancellationToken;

use crate::cli::RunArgs;
use crate::config::WorkerConfig;

/// How many repair candidates are listed before asking for confirmation.
const PREVIEW_LIMIT: usize = 10;

/// `genpipe run`: recover, then generate and upload until done or cancelled.
pub async fn run(
    config: &WorkerConfig,
    args: &RunArgs,
    cancel: CancellationToken,
) -> anyhow::Result<RunSummary> {
    let template = workflow::load_workflow(&config.workflow_path)
        .with_context(|| format!("loading {}", config.workflow_path.display()))?;
    // Fail on a wrong node id now rather than on the first job.
    workflow::set_prompt(&template, &config.prompt_node_id, "")?;

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("creating {}", config.output_dir.display()))?;

    let pool = genpipe_db::open_store(&config.database_path()).await?;

    let session = ImageSession::new(
        ComfyUIClient::from_host(&config.comfy_host, config.comfy_port),
        config.generation_timeout,
    )?;
    let generator = Arc::new(ComfyGenerator::new(
        session,
        template,
        config.prompt_node_id.clone(),
        config.output_dir.clone(),
        config.theme.clone(),
    ));

    let uploader: Option<Arc<dyn ArtifactUploader>> = if config.upload_enabled && !args.no_upload
    {
        let arkiv = config.require_arkiv()?;
        let client = ArkivClient::new(&arkiv.gateway_url, arkiv.api_key)?;
        Some(Arc::new(ArkivUploader::new(
            client,
            config.theme.app_name.clone(),
        )))
    } else {
        None
    };

    let settings = PipelineSettings {
        variant: if args.legacy {
            PipelineVariant::SingleStage
        } else {
            PipelineVariant::TwoStage
        },
        queue_capacity: config.queue_capacity,
        delay: config.delay,
        upload_policy: UploadPolicy::from_kb(config.max_image_size_kb),
        ..PipelineSettings::default()
    };

    let payloads = seed_payloads(config, &pool).await?;

    let coordinator = Coordinator::new(pool.clone(), generator, uploader, settings);
    let result = coordinator.run(&payloads, cancel).await;
    pool.close().await;

    let summary = result?;
    print_summary(&config.theme.name, &summary);
    Ok(summary)
}

/// `genpipe stats`: print the job counts of the configured theme.
pub async fn stats(config: &WorkerConfig) -> anyhow::Result<JobStats> {
    let pool = genpipe_db::open_store(&config.database_path()).await?;
    let stats = JobRepo::stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    println!("{} ({})", config.theme.name, config.database_path().display());
    print_stats(&stats);
    Ok(stats)
}

/// `genpipe prompts`: size of the prompt space plus a few random samples.
pub fn prompts(config: &WorkerConfig, sample: usize) {
    let components = &config.theme.components;
    println!(
        "{}: {} prompt combinations",
        config.theme.name,
        prompts::combination_count(components)
    );
    for (i, prompt) in prompts::sample(components, sample).iter().enumerate() {
        println!("{:>3}. {prompt}", i + 1);
    }
}

/// `genpipe fix-ids`: convert string `id` attributes to integers.
pub async fn fix_ids(config: &WorkerConfig, assume_yes: bool) -> anyhow::Result<()> {
    let arkiv = config.require_arkiv()?;
    let client = ArkivClient::new(&arkiv.gateway_url, arkiv.api_key)?;
    let app = &config.theme.app_name;

    let plan = repair::scan(&client, app)
        .await
        .with_context(|| format!("querying entities of {app}"))?;

    println!("Scanned {} entities of {app}", plan.scanned);
    if !plan.skipped.is_empty() {
        println!("{} entities have a non-numeric id and are left alone", plan.skipped.len());
    }
    if plan.candidates.is_empty() {
        println!("Nothing to fix");
        return Ok(());
    }

    preview(&plan);
    if !assume_yes && !confirm(plan.candidates.len())? {
        println!("Aborted");
        return Ok(());
    }

    let report = repair::apply(&client, &plan).await;
    println!(
        "Fixed {}/{} ({} failed, {} skipped)",
        report.fixed, report.to_fix, report.failed, report.skipped
    );
    if report.failed > 0 {
        anyhow::bail!("{} entities could not be updated", report.failed);
    }
    Ok(())
}

// ---- private helpers ----

/// The full shuffled prompt list, or nothing when every combination is
/// already stored. Seeding is idempotent either way.
async fn seed_payloads(
    config: &WorkerConfig,
    pool: &genpipe_db::DbPool,
) -> anyhow::Result<Vec<String>> {
    let expected = prompts::combination_count(&config.theme.components);
    let stored = JobRepo::count_all(pool).await?;
    if usize::try_from(stored).is_ok_and(|n| n >= expected) {
        tracing::debug!(stored, expected, "Store already seeded");
        return Ok(Vec::new());
    }

    let mut payloads = prompts::generate_all(&config.theme.components);
    prompts::shuffle(&mut payloads);
    tracing::info!(count = payloads.len(), stored, "Seeding prompts");
    Ok(payloads)
}

fn preview(plan: &RepairPlan) {
    for candidate in plan.candidates.iter().take(PREVIEW_LIMIT) {
        println!(
            "  {}: {:?} -> {}",
            candidate.entity_key, candidate.old_id, candidate.new_id
        );
    }
    if plan.candidates.len() > PREVIEW_LIMIT {
        println!("  ... and {} more", plan.candidates.len() - PREVIEW_LIMIT);
    }
}

fn confirm(count: usize) -> anyhow::Result<bool> {
    print!("Update {count} entities? [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn print_stats(stats: &JobStats) {
    println!(
        "  completed:   {}/{} ({:.1}%)",
        stats.completed,
        stats.total,
        stats.progress_percent()
    );
    println!("  generated:   {}", stats.generated);
    println!("  in progress: {}", stats.in_progress);
    println!("  pending:     {}", stats.pending);
}

fn print_summary(theme_name: &str, summary: &RunSummary) {
    println!("{theme_name}: {:?} run finished", summary.variant);
    if summary.reconcile.reset_count > 0 {
        println!("  reset {} interrupted jobs", summary.reconcile.reset_count);
    }
    if summary.backlog > 0 {
        println!("  re-fed {} images awaiting upload", summary.backlog);
    }
    match &summary.producer {
        Some(p) => println!(
            "  producer: {} generated, {} failed ({:?})",
            p.generated, p.failed, p.exit
        ),
        None => println!("  producer: abandoned"),
    }
    if let Some(c) = &summary.consumer {
        println!(
            "  consumer: {} uploaded, {} skipped, {} failed",
            c.uploaded, c.skipped, c.failed
        );
    }
    print_stats(&summary.final_stats);
    if summary.cancelled {
        println!("  interrupted; run again to resume");
    }
}
