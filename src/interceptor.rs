//! Offline-aware request interceptor: network-first reads with cache
//! fallback, queue-on-failure writes, and the tag-guarded sync drain.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::Config;
use crate::db::{self, CachedEntry, Pool};
use crate::model::{DrainReport, FetchRequest, HttpPayload, PendingUpdate, RequestMode, SubmitOutcome};
use crate::sync::{self, SyncRegistration};
use crate::upstream::UpstreamService;

/// Fallback page body seeded into the cache at install time, served for
/// navigations that miss both the network and the cache.
const OFFLINE_PAGE: &[u8] =
    b"<!doctype html><html><body>You are offline. Please check your internet connection.</body></html>";

/// Handle to one version-tagged cache container. Constructed explicitly and
/// injected into the interceptor; there is no ambient global cache.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    pool: Pool,
    container: String,
}

impl CacheHandle {
    pub fn new(pool: Pool, container: String) -> Self {
        Self { pool, container }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub async fn put(&self, method: &str, url: &str, entry: &CachedEntry) -> Result<()> {
        db::cache_put(&self.pool, &self.container, method, url, entry).await
    }

    pub async fn lookup(&self, method: &str, url: &str) -> Result<Option<CachedEntry>> {
        db::cache_lookup(&self.pool, &self.container, method, url).await
    }

    /// Delete every container except this one. Activation-time cleanup.
    pub async fn purge_stale(&self) -> Result<u64> {
        db::purge_stale_containers(&self.pool, &self.container).await
    }
}

pub struct Interceptor {
    pool: Pool,
    cache: CacheHandle,
    upstream: Arc<dyn UpstreamService>,
    origin: Url,
    offline_path: String,
    static_assets: Vec<String>,
    sync_tag: String,
    registration: Arc<SyncRegistration>,
}

impl Interceptor {
    pub fn new(
        pool: Pool,
        cache: CacheHandle,
        upstream: Arc<dyn UpstreamService>,
        origin: Url,
        offline_path: String,
        static_assets: Vec<String>,
        sync_tag: String,
        registration: Arc<SyncRegistration>,
    ) -> Self {
        Self {
            pool,
            cache,
            upstream,
            origin,
            offline_path,
            static_assets,
            sync_tag,
            registration,
        }
    }

    pub fn from_config(
        cfg: &Config,
        pool: Pool,
        upstream: Arc<dyn UpstreamService>,
        registration: Arc<SyncRegistration>,
    ) -> Result<Self> {
        let origin = cfg.base_url()?;
        let cache = CacheHandle::new(pool.clone(), cfg.cache.container.clone());
        Ok(Self::new(
            pool,
            cache,
            upstream,
            origin,
            cfg.cache.offline_path.clone(),
            cfg.cache.static_assets.clone(),
            cfg.sync.tag.clone(),
            registration,
        ))
    }

    pub fn cache(&self) -> &CacheHandle {
        &self.cache
    }

    fn same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn offline_url(&self) -> Result<Url> {
        self.origin
            .join(&self.offline_path)
            .context("invalid offline page path")
    }

    /// Pre-populate the current container with the app shell and seed the
    /// offline fallback page. Any asset failing to fetch fails the install
    /// wholesale, matching `cache.addAll` semantics.
    #[instrument(skip_all)]
    pub async fn install(&self) -> Result<()> {
        for asset in &self.static_assets {
            let url = self
                .origin
                .join(asset)
                .with_context(|| format!("invalid asset path {asset}"))?;
            let payload = self
                .upstream
                .fetch("GET", &url)
                .await
                .with_context(|| format!("failed to precache {asset}"))?;
            if !payload.is_success() {
                return Err(anyhow!("precache of {asset} returned {}", payload.status));
            }
            self.cache
                .put("GET", url.as_str(), &payload_to_entry(&payload))
                .await?;
        }

        // The offline page is synthesized rather than fetched so that a
        // deploy without one still installs.
        let offline = CachedEntry {
            status: 200,
            headers: vec![("Content-Type".to_string(), "text/html".to_string())],
            body: OFFLINE_PAGE.to_vec(),
        };
        self.cache
            .put("GET", self.offline_url()?.as_str(), &offline)
            .await?;

        info!(assets = self.static_assets.len(), "install complete");
        Ok(())
    }

    /// Drop every cache container that does not match the current version
    /// tag. Run once at startup, before serving.
    #[instrument(skip_all)]
    pub async fn activate(&self) -> Result<()> {
        let purged = self.cache.purge_stale().await?;
        if purged > 0 {
            info!(purged, container = self.cache.container(), "purged stale cache entries");
        }
        Ok(())
    }

    /// Route one request: network first, cache fallback, offline page for
    /// navigations, synthetic 408 otherwise. Never returns an error; every
    /// failure path degrades to a response.
    #[instrument(skip_all, fields(method = %req.method, url = %req.url))]
    pub async fn handle_fetch(&self, req: FetchRequest) -> HttpPayload {
        // Cross-origin traffic is forwarded untouched and never cached.
        if !self.same_origin(&req.url) {
            return self.forward(&req).await;
        }
        // Mutations other than reading updates are not this layer's concern
        // either; forward without caching.
        if !req.is_get() {
            return self.forward(&req).await;
        }

        match self.upstream.fetch("GET", &req.url).await {
            Ok(payload) => {
                // Only plain 200s are cached; the write is fire-and-forget
                // and must not affect the response already in hand.
                if payload.status == 200 {
                    self.spawn_cache_write(&req.url, &payload);
                }
                payload
            }
            Err(err) => {
                debug!(?err, "network failed; falling back to cache");
                self.fallback(&req).await
            }
        }
    }

    async fn forward(&self, req: &FetchRequest) -> HttpPayload {
        match self.upstream.fetch(&req.method, &req.url).await {
            Ok(payload) => payload,
            Err(err) => {
                debug!(?err, url = %req.url, "pass-through request failed");
                HttpPayload::network_error()
            }
        }
    }

    fn spawn_cache_write(&self, url: &Url, payload: &HttpPayload) {
        let pool = self.pool.clone();
        let container = self.cache.container().to_string();
        let url = url.to_string();
        let entry = payload_to_entry(payload);
        tokio::spawn(async move {
            if let Err(err) = db::cache_put(&pool, &container, "GET", &url, &entry).await {
                warn!(?err, %url, "cache write failed");
            }
        });
    }

    async fn fallback(&self, req: &FetchRequest) -> HttpPayload {
        match self.cache.lookup("GET", req.url.as_str()).await {
            Ok(Some(entry)) => return entry_to_payload(entry),
            Ok(None) => {}
            Err(err) => {
                warn!(?err, url = %req.url, "cache lookup failed");
                return HttpPayload::network_error();
            }
        }

        if req.mode == RequestMode::Navigate {
            if let Ok(url) = self.offline_url() {
                match self.cache.lookup("GET", url.as_str()).await {
                    Ok(Some(entry)) => return entry_to_payload(entry),
                    Ok(None) => {}
                    Err(err) => warn!(?err, "offline page lookup failed"),
                }
            }
        }

        HttpPayload::network_error()
    }

    /// Deliver a reading-progress update, queueing it on failure. The
    /// enqueue touches only local storage and completes while offline.
    #[instrument(skip_all, fields(book_id = %book_id))]
    pub async fn submit_update(
        &self,
        book_id: &str,
        current_page: i64,
        thoughts: &str,
    ) -> SubmitOutcome {
        let update = PendingUpdate::new(book_id, current_page, thoughts);
        match self.upstream.deliver_update(&update).await {
            Ok(()) => SubmitOutcome::Delivered,
            Err(err) => {
                warn!(?err, id = %update.id, "delivery failed; queueing for sync");
                match db::put_pending(&self.pool, &update).await {
                    Ok(()) => {
                        // Idempotent: a second registration before the worker
                        // wakes coalesces into one pending drain.
                        self.registration.register();
                        SubmitOutcome::Queued
                    }
                    Err(err) => {
                        error!(?err, id = %update.id, "queue store unavailable; dropping update");
                        SubmitOutcome::Dropped
                    }
                }
            }
        }
    }

    /// Drain the pending queue if `tag` names this subsystem's sync
    /// concern; other tags are ignored so independent sync interests can
    /// coexist.
    #[instrument(skip_all, fields(tag = %tag))]
    pub async fn handle_sync(&self, tag: &str) -> Result<DrainReport> {
        if tag != self.sync_tag {
            debug!(tag, "ignoring unrelated sync tag");
            return Ok(DrainReport::default());
        }
        sync::drain_pending(&self.pool, self.upstream.as_ref()).await
    }
}

fn payload_to_entry(payload: &HttpPayload) -> CachedEntry {
    CachedEntry {
        status: payload.status,
        headers: payload.headers.clone(),
        body: payload.body.clone(),
    }
}

fn entry_to_payload(entry: CachedEntry) -> HttpPayload {
    HttpPayload {
        status: entry.status,
        headers: entry.headers,
        body: entry.body,
    }
}
