use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use crate::db::SharedDb;
use crate::tags::TagIndex;
use crate::variants::VariantCache;

/// Runs `task` every `period` (first run one period from now) until `cancel` fires.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, cancel: CancellationToken, mut task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("{} job started, every {}", name, humantime::format_duration(period));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => task().await,
            }
        }
        debug!("{} job stopped", name);
    })
}

pub fn spawn_tag_rebuild(index: Arc<TagIndex>, db: SharedDb, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    spawn_periodic("tag rebuild", period, cancel, move || {
        let index = index.clone();
        let db = db.clone();
        async move {
            index.rebuild(&db).await;
        }
    })
}

pub fn spawn_cache_flush(cache: Arc<VariantCache>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    spawn_periodic("cache flush", period, cancel, move || {
        let cache = cache.clone();
        async move {
            match cache.flush().await {
                Ok(removed) => info!("Cache flush removed {} variants", removed),
                Err(e) => warn!("Cache flush failed: {}", e),
            }
        }
    })
}
