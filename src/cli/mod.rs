use std::path::PathBuf;
use std::sync::Arc;
use colored::Colorize;
use log::{error, info};
use tokio_util::sync::CancellationToken;
use crate::api::{self, ApiContext};
use crate::config::AppConfig;
use crate::jobs;
use crate::transcoder::{FfmpegTranscoder, Transcoder};
use crate::variants::VariantCache;

fn transcoder(config: &AppConfig) -> Arc<dyn Transcoder> {
    Arc::new(FfmpegTranscoder::new(config.ffmpeg.clone(), config.ffprobe.clone(), config.transcode_timeout))
}

pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let ctx = ApiContext::new(&config, transcoder(&config)).await?;
    let shutdown = CancellationToken::new();

    let tag_job = jobs::spawn_tag_rebuild(ctx.tags.clone(), ctx.db().clone(), config.tag_rebuild_interval, shutdown.clone());
    let flush_job = jobs::spawn_cache_flush(ctx.cache.clone(), config.cache_flush_interval, shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutting down..."),
            Err(e) => error!("Failed to listen for ctrl-c: {}", e),
        }
        signal_token.cancel();
    });

    let result = api::serve(ctx, &config.bind, shutdown.clone()).await;
    shutdown.cancel();
    let _ = tokio::join!(tag_job, flush_job);
    result
}

/// Ingests local files as `user`, or as the first configured writer.
pub async fn import(config: AppConfig, files: Vec<PathBuf>, user: Option<String>) -> anyhow::Result<()> {
    let user = match user.or_else(|| config.api_tokens.first().map(|x| x.user.clone())) {
        Some(user) => user,
        None => anyhow::bail!("no uploader given: pass --user or configure an API token"),
    };
    let ctx = ApiContext::new(&config, transcoder(&config)).await?;

    let mut failed = 0;
    for file in &files {
        match ctx.store.import_file(file, &user).await {
            Ok(ingested) if ingested.existing => {
                println!("{} {} (id {})", "existing".yellow(), file.display(), ingested.id);
            }
            Ok(ingested) => {
                println!("{} {} (id {})", "new".green(), file.display(), ingested.id);
            }
            Err(e) => {
                failed += 1;
                println!("{} {}: {}", "failed".red(), file.display(), e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} of {} files failed to import", failed, files.len());
    }
    Ok(())
}

pub async fn flush_cache(config: AppConfig) -> anyhow::Result<()> {
    let cache = VariantCache::new(config.dirs.cache.clone(), transcoder(&config));
    let removed = cache.flush().await?;
    println!("Removed {} cached variants", removed);
    Ok(())
}

pub async fn backfill(config: AppConfig) -> anyhow::Result<()> {
    let ctx = ApiContext::new(&config, transcoder(&config)).await?;
    let updated = ctx.store.backfill_missing_dimensions().await;
    println!("{} {} assets", "backfilled".green(), updated);
    Ok(())
}

pub async fn print_tags(config: AppConfig, query: Option<String>) -> anyhow::Result<()> {
    let ctx = ApiContext::new(&config, transcoder(&config)).await?;
    let (total, tags) = ctx.tags.page(query.as_deref(), 0, usize::MAX);
    for tag in tags {
        println!("{:>6}  {}", tag.count, tag.name.bold());
    }
    println!("{} tags", total);
    Ok(())
}
