mod cli;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use rf_core::config::Config;
use rf_core::VideoId;
use rf_pipeline::{Pipeline, ProcessOptions, ProcessResult};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelforge=trace,rf_pipeline=trace,rf_av=debug,rf_db=debug,rf_core=debug".to_string()
        } else {
            "reelforge=info,rf_pipeline=info,rf_av=info,rf_db=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Start => {
            let config = Config::load_or_default(config_path);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(reelforge::start(config))?;
            Ok(())
        }
        Commands::Ingest { file, mime } => block_on(ingest(config_path, &file, mime.as_deref())),
        Commands::Process {
            video_id,
            qualities,
            formats,
            priority,
            no_thumbnails,
            no_preview,
            refresh_metadata,
            wait,
            timeout,
        } => {
            let options = ProcessOptions {
                qualities: (!qualities.is_empty()).then_some(qualities),
                formats: (!formats.is_empty()).then_some(formats),
                priority,
                generate_thumbnails: no_thumbnails.then_some(false),
                generate_preview: no_preview.then_some(false),
                refresh_metadata: refresh_metadata.then_some(true),
            };
            let wait = wait.then(|| Duration::from_secs(timeout));
            block_on(process(config_path, video_id, options, wait))
        }
        Commands::Status { video_id, json } => block_on(status(config_path, video_id, json)),
        Commands::Cancel { video_id } => block_on(cancel(config_path, video_id)),
        Commands::Delete { video_id } => block_on(delete(config_path, video_id)),
        Commands::Stats { json } => block_on(stats(config_path, json)),
        Commands::Health { json } => block_on(health(config_path, json)),
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate { config } => validate_config(config.as_deref().or(config_path)),
        Commands::Version => {
            println!("reelforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn block_on<F: std::future::Future<Output = Result<()>>>(fut: F) -> Result<()> {
    tokio::runtime::Runtime::new()?.block_on(fut)
}

fn open(config_path: Option<&Path>) -> Result<Pipeline> {
    let config = Config::load_or_default(config_path);
    Ok(reelforge::build_pipeline(&config)?)
}

async fn ingest(config_path: Option<&Path>, file: &Path, mime: Option<&str>) -> Result<()> {
    let pipeline = open(config_path)?;
    let video = pipeline.orchestrator().ingest(file, mime).await?;
    println!("Ingested {} as video {}", file.display(), video.id);
    println!("  Stored at: {}", video.original_path);
    println!("  Type: {} ({} bytes)", video.mime_type, video.original_size);
    Ok(())
}

async fn process(
    config_path: Option<&Path>,
    video_id: VideoId,
    options: ProcessOptions,
    wait: Option<Duration>,
) -> Result<()> {
    let pipeline = open(config_path)?;
    let orchestrator = pipeline.orchestrator();
    let queued = orchestrator.process_video(video_id, options).await?;
    println!("Queued {} renditions for video {video_id}", queued.variants.len());
    for variant in &queued.variants {
        println!("  {} {}", variant.quality, variant.format);
    }

    let Some(timeout) = wait else {
        return Ok(());
    };

    let cancel = CancellationToken::new();
    let handles = pipeline.spawn(&cancel);
    let outcome = tokio::select! {
        res = orchestrator.wait_for_completion(video_id, timeout) => res,
        _ = reelforge::shutdown_signal(cancel.clone()) => {
            orchestrator.cancel_processing(video_id)?;
            orchestrator.wait_for_completion(video_id, timeout).await
        }
    };
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }

    let result = outcome?;
    print_result(&result);
    if result.success {
        Ok(())
    } else {
        anyhow::bail!("processing of video {video_id} failed")
    }
}

fn print_result(result: &ProcessResult) {
    let verdict = if result.success { "completed" } else { "failed" };
    println!("\nVideo {} {verdict}", result.video_id);
    for variant in &result.variants {
        println!(
            "  {} {}: {} {}",
            variant.quality,
            variant.format,
            variant.status,
            variant.output_path.as_deref().unwrap_or("-")
        );
    }
    if !result.thumbnails.is_empty() {
        println!("  Thumbnails: {}", result.thumbnails.len());
    }
    if let Some(preview) = &result.preview {
        println!("  Preview: {}", preview.display());
    }
    for error in &result.errors {
        println!("  Error: {error}");
    }
}

async fn status(config_path: Option<&Path>, video_id: VideoId, json: bool) -> Result<()> {
    let pipeline = open(config_path)?;
    let status = pipeline.orchestrator().get_processing_status(video_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Video: {}", status.video_id);
    println!("Status: {} ({:.0}%)", status.status, status.progress);
    println!(
        "Jobs: {} total, {} completed, {} failed",
        status.total_jobs, status.completed_jobs, status.failed_jobs
    );
    for job in &status.jobs {
        print!("  [{}] {} {}", job.lane, job.job_type, job.status);
        if let (Some(q), Some(f)) = (job.quality, job.format) {
            print!(" {q}/{f}");
        }
        println!(" (attempt {}/{})", job.attempt_count, job.max_attempts);
    }
    for variant in &status.variants {
        println!("  Variant {} {}: {}", variant.quality, variant.format, variant.status);
    }
    if let Some(ref error) = status.processing_error {
        println!("Error: {error}");
    }
    Ok(())
}

async fn cancel(config_path: Option<&Path>, video_id: VideoId) -> Result<()> {
    let pipeline = open(config_path)?;
    let cancelled = pipeline.orchestrator().cancel_processing(video_id)?;
    println!("Cancelled {cancelled} queued jobs for video {video_id}");
    Ok(())
}

async fn delete(config_path: Option<&Path>, video_id: VideoId) -> Result<()> {
    let pipeline = open(config_path)?;
    pipeline.orchestrator().delete_video(video_id).await?;
    println!("Deleted video {video_id}");
    Ok(())
}

async fn stats(config_path: Option<&Path>, json: bool) -> Result<()> {
    let pipeline = open(config_path)?;
    let stats = pipeline.queue().get_queue_stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!(
        "{:<10} {:>7} {:>9} {:>11} {:>10} {:>7} {:>10}",
        "lane", "queued", "retrying", "processing", "completed", "failed", "cancelled"
    );
    for lane in &stats {
        println!(
            "{:<10} {:>7} {:>9} {:>11} {:>10} {:>7} {:>10}",
            lane.queue_name,
            lane.queued_jobs,
            lane.retrying_jobs,
            lane.processing_jobs,
            lane.completed_jobs,
            lane.failed_jobs,
            lane.cancelled_jobs
        );
    }
    Ok(())
}

async fn health(config_path: Option<&Path>, json: bool) -> Result<()> {
    let pipeline = open(config_path)?;
    let report = pipeline.monitor().health();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Health: {}", report.status);
    for (status, count) in &report.videos {
        println!("  Videos {status}: {count}");
    }
    for alert in &report.alerts {
        println!("  ! {alert}");
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    println!("Checking external tools...\n");

    let tools = rf_av::ToolRegistry::discover(&config.engine).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install them to enable transcoding.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let contents = std::fs::read_to_string(p)?;
            Config::from_json(&contents)?
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("✓ Configuration is valid");
    } else {
        println!("Configuration loaded with {} warnings:", warnings.len());
        for warning in &warnings {
            println!("  - {warning}");
        }
    }
    println!("  Database: {}", config.database.path.display());
    println!("  Storage root: {}", config.storage.root.display());
    for lane in rf_core::Lane::ALL {
        println!(
            "  Lane {lane}: {} concurrent jobs",
            config.queue.lane(*lane).max_concurrent_jobs
        );
    }
    println!("  Max attempts: {}", config.queue.max_attempts);

    Ok(())
}
