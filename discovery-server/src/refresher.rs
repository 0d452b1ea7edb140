//! C8: the background refresher (spec §4.8). A long-lived task the process
//! owns for its whole life — started after the cache, stopped explicitly at
//! shutdown (spec §9, "global-state-like constructs"). Grounded in the
//! teacher's `tasks2::TaskManager` actor shape, simplified: no dedicated OS
//! thread (there is no CPU-heavy work here, unlike the teacher's file-scan
//! tasks), and a `CancellationToken` instead of a barrier/mpsc shutdown
//! handshake.

use crate::cache::Cache;
use crate::config::{RefresherOptions, TtlOptions};
use crate::enrichment::EnrichmentEngine;
use crate::errors::{AppError, AppResult};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Refresher {
    cache: Arc<Cache>,
    engine: Arc<EnrichmentEngine>,
    options: RefresherOptions,
    ttl: TtlOptions,
    running: AtomicBool,
    cancel: CancellationToken,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Refresher {
    pub fn new(
        cache: Arc<Cache>,
        engine: Arc<EnrichmentEngine>,
        options: RefresherOptions,
        ttl: TtlOptions,
    ) -> Self {
        Self {
            cache,
            engine,
            options,
            ttl,
            running: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            handle: std::sync::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: re-invoking while already running fails with
    /// `AlreadyRunning` rather than spawning a second loop (spec §4.8).
    pub fn start(self: &Arc<Self>) -> AppResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::AlreadyRunning);
        }

        let this = self.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            this.run_loop(cancel).await;
            this.running.store(false, Ordering::SeqCst);
        });
        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signals cancellation and waits for the loop (and any in-flight
    /// workers) to drain.
    pub async fn stop(&self) -> AppResult<()> {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    async fn run_loop(&self, cancel: CancellationToken) {
        let mut refresh_ticker = tokio::time::interval(self.options.refresh_interval);
        let mut cleanup_ticker = tokio::time::interval(self.options.cleanup_interval);
        info!("background refresher started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("background refresher stopping");
                    return;
                }
                _ = refresh_ticker.tick() => {
                    self.refresh_batch(&cancel).await;
                }
                _ = cleanup_ticker.tick() => {
                    self.cleanup().await;
                }
            }
        }
    }

    async fn refresh_batch(&self, cancel: &CancellationToken) {
        let expired = match self.cache.expired(self.options.batch_size as i64).await {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "failed to list expired entries");
                return;
            }
        };
        if expired.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency));
        let mut set = tokio::task::JoinSet::new();
        for artist in expired {
            let semaphore = semaphore.clone();
            let engine = self.engine.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = engine.re_enrich(&artist).await;
                (artist.id, result)
            });
        }

        while let Some(joined) = set.join_next().await {
            if cancel.is_cancelled() {
                break;
            }
            let Ok((id, result)) = joined else { continue };
            match result {
                Ok((refreshed, _warnings)) => {
                    if let Err(err) = self.cache.put(refreshed, &self.ttl).await {
                        error!(%id, error = %err, "failed to persist refreshed artist");
                    }
                }
                Err(err) => {
                    warn!(%id, error = %err, "re-enrichment failed, throttling retry");
                    let throttle_until = Utc::now()
                        + chrono::Duration::from_std(self.ttl.unverified_ttl)
                            .unwrap_or_else(|_| chrono::Duration::days(7));
                    if let Err(err) = self.cache.touch_expiry(&id, throttle_until).await {
                        error!(%id, error = %err, "failed to throttle retry for artist");
                    }
                }
            }
        }
    }

    async fn cleanup(&self) {
        match self.cache.evict_older_than(self.ttl.eviction_age).await {
            Ok(count) => info!(count, "evicted ancient cache entries"),
            Err(err) => error!(error = %err, "cache eviction failed"),
        }
    }
}
