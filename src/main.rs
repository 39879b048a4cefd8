use std::io::Write;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use discord_purge::api::Endpoints;
use discord_purge::config::Config;
use discord_purge::discovery::discover_channels;
use discord_purge::purge::{format_hms, ConfirmPrompt, PurgeOptions, Purger, Target};
use discord_purge::transport::RestClient;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting discord-purge");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        guild_id = %config.guild_id,
        channels = config.channel_ids.len(),
        "Configuration loaded"
    );

    let client = RestClient::new(&config.token).context("Failed to build API client")?;
    let endpoints = Endpoints::new(&config.api_base).context("Invalid API base URL")?;

    // Expand each configured channel into its threads and forum posts.
    let mut channels: Vec<String> = Vec::new();
    for channel_id in &config.channel_ids {
        let discovered = if config.discover_threads {
            discover_channels(&client, &endpoints, &config.guild_id, channel_id).await
        } else {
            vec![channel_id.clone()]
        };
        for id in discovered {
            if !channels.contains(&id) {
                channels.push(id);
            }
        }
    }
    info!(channels = channels.len(), "Work list resolved");

    let options = PurgeOptions::from_config(&config, channels[0].clone());
    let mut purger = Purger::new(client, endpoints, options);
    install_hooks(&mut purger);

    // First Ctrl+C cancels cooperatively; the second aborts outright.
    let cancel = purger.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, stopping at the next safe point...");
            cancel.cancel();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });

    if channels.len() == 1 {
        let report = purger.run().await?;
        info!(deleted = report.deleted, failed = report.failed, "Done");
    } else {
        let targets: Vec<Target> = channels.into_iter().map(Target::channel).collect();
        let report = purger.run_batch(targets).await?;
        info!(
            with_deletions = report.targets_with_deletions,
            total = report.targets,
            "Done"
        );
    }

    Ok(())
}

fn install_hooks(purger: &mut Purger) {
    purger.hooks.on_start = Some(Box::new(|_state, stats| {
        info!(started_at = %stats.started_at.to_rfc3339(), "Purge started");
    }));
    purger.hooks.on_progress = Some(Box::new(|state, stats| {
        info!(
            deleted = state.deleted,
            failed = state.failed,
            percent = %format!("{:.1}%", state.progress_ratio() * 100.0),
            eta = %format_hms(stats.eta),
            "Progress"
        );
    }));
    purger.hooks.on_stop = Some(Box::new(|state, stats| {
        info!(
            deleted = state.deleted,
            failed = state.failed,
            throttled = stats.throttled_count,
            throttled_time = %format_hms(stats.throttled_total),
            "Purge stopped"
        );
    }));
    purger.confirm_fn = Some(Box::new(prompt_confirm));
}

/// Blocking stdin prompt used for interactive single runs.
fn prompt_confirm(prompt: &ConfirmPrompt) -> bool {
    println!(
        "About to delete ~{} messages (estimated time: {}).",
        prompt.grand_total,
        format_hms(prompt.eta)
    );
    println!("The actual number may be lower if filters skip messages.");
    println!("---- Preview ----");
    for line in prompt.preview.iter().take(10) {
        println!("  {line}");
    }
    if prompt.preview.len() > 10 {
        println!("  ... and {} more on this page", prompt.preview.len() - 10);
    }
    print!("Proceed? [y/N] ");
    let _ = std::io::stdout().flush();
    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,discord_purge=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}
