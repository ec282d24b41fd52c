use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::model::{HttpPayload, PendingUpdate};

/// Network side of the interceptor. Everything that touches the wire goes
/// through this trait so tests can substitute a scripted double.
#[async_trait]
pub trait UpstreamService: Send + Sync {
    /// Perform a plain request and return the response, whatever its status.
    /// Err means a transport-level failure (offline, DNS, timeout, or the
    /// browser cancelling the request) — the cases the cache covers.
    async fn fetch(&self, method: &str, url: &Url) -> Result<HttpPayload>;

    /// POST one reading-progress update to the update endpoint. Err covers
    /// both transport failures and non-2xx rejections; either way the
    /// record stays queued.
    async fn deliver_update(&self, update: &PendingUpdate) -> Result<()>;

    /// Cheap connectivity check against the origin. Ok means reachable.
    async fn probe(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpUpstream {
    http: Client,
    base_url: Url,
    update_path: String,
}

impl fmt::Debug for HttpUpstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpUpstream")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpUpstream {
    pub fn new(base_url: Url, update_path: String) -> Self {
        let http = Client::builder()
            .user_agent("booktracker-offline/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            update_path,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = cfg.base_url().context("invalid upstream base URL")?;
        Ok(Self::new(base_url, cfg.upstream.update_path.clone()))
    }

    fn update_url(&self) -> Result<Url> {
        self.base_url
            .join(&self.update_path)
            .context("invalid update path")
    }
}

#[async_trait]
impl UpstreamService for HttpUpstream {
    async fn fetch(&self, method: &str, url: &Url) -> Result<HttpPayload> {
        let method: reqwest::Method = method
            .parse()
            .map_err(|_| anyhow!("invalid HTTP method {method}"))?;
        let res = self
            .http
            .request(method, url.clone())
            .send()
            .await
            .context("failed to reach upstream")?;

        let status = res.status().as_u16();
        let headers = res
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            })
            .collect();
        let body = res.bytes().await.context("failed to read upstream body")?;
        debug!(%url, status, "upstream fetch");
        Ok(HttpPayload {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    async fn deliver_update(&self, update: &PendingUpdate) -> Result<()> {
        let endpoint = self.update_url()?;
        let res = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .json(update)
            .send()
            .await
            .context("failed to reach update endpoint")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(id = %update.id, "rate limited by upstream: {}", body);
            return Err(anyhow!("received 429 from upstream: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(id = %update.id, %status, "update rejected: {}", body);
            return Err(anyhow!("upstream error {}: {}", status, body));
        }

        info!(id = %update.id, book_id = %update.book_id, "update delivered");
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        let res = self
            .http
            .get(self.base_url.clone())
            .send()
            .await
            .context("upstream unreachable")?;
        debug!(status = res.status().as_u16(), "connectivity probe");
        Ok(())
    }
}
