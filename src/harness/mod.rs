//! UI-driving collaborators
//!
//! The capture core only talks to a page through the traits below. Two
//! implementations ship in-tree: [`ReplayHarness`] plays back a scripted page
//! and [`HttpHarness`] drives a backend endpoint directly without a browser.

mod http;
mod network;
mod page;
mod replay;

pub use http::HttpHarness;
pub use replay::{ReplayHarness, ReplayScript};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::capture::{Fetch, FetchError, FrameClock, NetworkSubscription};
use crate::utils::Clock;

/// Harness errors
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Timed out after {0:?} waiting for {1}")]
    Timeout(Duration, String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Response body not available for request {0}")]
    BodyUnavailable(String),

    #[error("Harness disconnected: {0}")]
    Disconnected(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Harness configuration error: {0}")]
    Config(String),
}

/// Network lifecycle feed of a page
#[async_trait]
pub trait NetworkFeed: Send + Sync {
    /// Clock the feed stamps its events with
    fn clock(&self) -> Arc<dyn Clock>;

    /// Subscribe to the request-dispatched and response-received feeds
    fn subscribe(&self) -> NetworkSubscription;

    /// Full payload of a received response
    ///
    /// Fails with [`HarnessError::BodyUnavailable`] for bodies that are never
    /// fully buffered (event streams).
    async fn response_body(&self, request_id: &str) -> Result<Bytes, HarnessError>;
}

/// A page the benchmark can drive
#[async_trait]
pub trait UiHarness: NetworkFeed {
    async fn navigate(&self, url: &str) -> Result<(), HarnessError>;

    /// Reload the current page, discarding all in-flight work
    async fn reload(&self) -> Result<(), HarnessError>;

    async fn fill(&self, selector: &str, text: &str) -> Result<(), HarnessError>;

    async fn click(&self, selector: &str) -> Result<(), HarnessError>;

    /// Wait until `selector` is attached; `false` on timeout
    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> bool;

    fn element_exists(&self, selector: &str) -> bool;

    /// The fetch the page currently issues its calls through
    fn page_fetch(&self) -> Arc<dyn Fetch>;

    /// Replace the page's fetch, returning the previous one
    fn set_page_fetch(&self, fetch: Arc<dyn Fetch>) -> Arc<dyn Fetch>;

    fn frame_clock(&self) -> Arc<dyn FrameClock>;

    /// Emulated network conditions, if any were applied
    fn network_conditions(&self) -> Option<NetworkConditions>;
}

/// Emulated link characteristics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConditions {
    pub offline: bool,
    /// Added round-trip latency in milliseconds
    pub latency_ms: u64,
    /// Bytes per second
    pub download_bps: u64,
    pub upload_bps: u64,
    pub connection_type: String,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            offline: false,
            latency_ms: 40,
            download_bps: 1_250_000,
            upload_bps: 625_000,
            connection_type: "cellular4g".to_string(),
        }
    }
}

impl NetworkConditions {
    /// One-line description for logs
    pub fn describe(&self) -> String {
        if self.offline {
            return "offline".to_string();
        }
        format!(
            "{} latency={}ms down={:.2} MB/s up={:.2} MB/s",
            self.connection_type,
            self.latency_ms,
            self.download_bps as f64 / 1_000_000.0,
            self.upload_bps as f64 / 1_000_000.0
        )
    }

    /// Time to move `bytes` downstream at the emulated rate
    pub fn download_time(&self, bytes: usize) -> Duration {
        transfer_time(bytes, self.download_bps)
    }

    pub fn upload_time(&self, bytes: usize) -> Duration {
        transfer_time(bytes, self.upload_bps)
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

fn transfer_time(bytes: usize, bps: u64) -> Duration {
    if bps == 0 || bytes == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(bytes as f64 / bps as f64)
}

/// Which harness drives the page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HarnessKind {
    #[default]
    Replay,
    Http,
}

impl HarnessKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "replay" => Some(Self::Replay),
            "http" => Some(Self::Http),
            _ => None,
        }
    }
}

impl fmt::Display for HarnessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessKind::Replay => write!(f, "replay"),
            HarnessKind::Http => write!(f, "http"),
        }
    }
}
