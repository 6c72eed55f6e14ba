//! Page fetch contract
//!
//! The outbound call mechanism of a page, modelled as an object-safe async
//! trait. The in-page interceptor wraps one implementation in another; the
//! harnesses provide the innermost one.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Header map, lowercased names
pub type Headers = BTreeMap<String, String>;

/// Finite, non-restartable sequence of body chunks
pub type ChunkStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Fetch errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Connection refused to {0}")]
    ConnectionRefused(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Body read failed: {0}")]
    Body(String),
}

/// Outbound request issued by the page
#[derive(Clone, Debug, PartialEq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    #[cfg(test)]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.into().to_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// Response body as the page sees it
pub enum ResponseBody {
    /// Whole body available at once
    Full(Bytes),
    /// Chunks delivered as they arrive
    Stream(ChunkStream),
}

impl ResponseBody {
    #[cfg(test)]
    pub fn is_stream(&self) -> bool {
        matches!(self, ResponseBody::Stream(_))
    }

    /// Drain the body into one buffer
    pub async fn collect(self) -> Result<Bytes, FetchError> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            ResponseBody::Stream(_) => write!(f, "Stream(..)"),
        }
    }
}

/// Response delivered to the page
#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: ResponseBody,
}

impl FetchResponse {
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            body,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    /// Server-sent events and other open-ended streams
    pub fn is_event_stream(&self) -> bool {
        self.content_type()
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false)
    }

    /// Drain the body
    pub async fn bytes(self) -> Result<Bytes, FetchError> {
        self.body.collect().await
    }
}

/// Page outbound call mechanism
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
