use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// A reading-progress update that has not yet been acknowledged by the
/// upstream endpoint. Doubles as the wire payload: the remote endpoint
/// receives exactly this shape as camelCase JSON.
///
/// Records are immutable once created; they are retried as-is and deleted
/// exactly once after the upstream acknowledges their `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingUpdate {
    pub id: String,
    pub book_id: String,
    pub current_page: i64,
    pub thoughts: String,
    pub timestamp: DateTime<Utc>,
}

impl PendingUpdate {
    /// Build a fresh update with a v4 uuid and a now-timestamp.
    pub fn new(book_id: &str, current_page: i64, thoughts: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.to_string(),
            current_page,
            thoughts: thoughts.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// How a request was issued. Navigations get the offline fallback page when
/// both the network and the cache miss; plain resource fetches get a
/// synthetic error response instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Navigate,
    Resource,
}

/// Typed replacement for the duck-typed fetch event: everything the
/// interceptor needs to route a request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    pub mode: RequestMode,
}

impl FetchRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            mode: RequestMode::Resource,
        }
    }

    pub fn navigate(url: Url) -> Self {
        Self {
            method: "GET".to_string(),
            url,
            mode: RequestMode::Navigate,
        }
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// An HTTP response as the interceptor hands it back to the caller: live
/// from the network, replayed from the cache, or synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpPayload {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpPayload {
    /// Synthetic response returned when the network is down and the cache
    /// has nothing usable for a non-navigation request.
    pub fn network_error() -> Self {
        Self {
            status: 408,
            headers: vec![("Content-Type".to_string(), "text/plain".to_string())],
            body: b"Network error happened".to_vec(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of a reading-progress submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The upstream acknowledged the update immediately.
    Delivered,
    /// Delivery failed; the update is queued for the next reconnect.
    Queued,
    /// Delivery failed and the queue store was unusable; the update is lost.
    Dropped,
}

/// Result of one drain pass over the pending queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub retained: usize,
}
