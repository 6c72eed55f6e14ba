//! In-page capture
//!
//! [`InPageInterceptor`] wraps the page's fetch. Calls whose URL matches the
//! pattern are timed into the trial's [`TrialContext`]; every other call is
//! forwarded untouched. Streamed bodies are handed back wrapped in a
//! [`TappedStream`] that yields the same chunks while timing them.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use regex::Regex;
use serde_json::json;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::context::{sample_name, TrialContext, ERROR, SUBMIT};
use super::fetch::{ChunkStream, Fetch, FetchError, FetchRequest, FetchResponse, ResponseBody};
use super::frame::FrameClock;
use crate::models::MetricField;

/// Fetch wrapper that emits `{label}:*` samples for matching calls
pub struct InPageInterceptor {
    inner: Arc<dyn Fetch>,
    pattern: Regex,
    label: String,
    context: TrialContext,
    frames: Arc<dyn FrameClock>,
}

impl InPageInterceptor {
    /// Wrap `inner`; fails only when `pattern` is not a valid regex
    pub fn install(
        inner: Arc<dyn Fetch>,
        pattern: &str,
        label: impl Into<String>,
        context: TrialContext,
        frames: Arc<dyn FrameClock>,
    ) -> Result<Self, regex::Error> {
        let label = label.into();
        debug!(pattern, label = %label, "Installing in-page interceptor");
        Ok(Self {
            inner,
            pattern: Regex::new(pattern)?,
            label,
            context,
            frames,
        })
    }

    pub fn matches(&self, url: &str) -> bool {
        self.pattern.is_match(url)
    }

    fn tap(&self, submit_ms: f64) -> Tap {
        Tap {
            context: self.context.clone(),
            label: self.label.clone(),
            submit_ms,
            frames: Arc::clone(&self.frames),
        }
    }
}

#[async_trait]
impl Fetch for InPageInterceptor {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        if !self.matches(&request.url) {
            return self.inner.fetch(request).await;
        }

        let url = request.url.clone();
        let submit_ms = self.context.now_ms();
        self.context.record(
            sample_name(&self.label, SUBMIT),
            submit_ms,
            Some(json!({ "url": url, "method": request.method })),
        );

        let response = match self.inner.fetch(request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %url, error = %err, "Instrumented fetch failed");
                self.context.record(
                    sample_name(&self.label, ERROR),
                    self.context.now_ms() - submit_ms,
                    Some(json!({ "url": url, "error": err.to_string() })),
                );
                return Err(err);
            }
        };

        let tap = self.tap(submit_ms);
        tap.record(MetricField::TtfbMs, tap.elapsed());

        let FetchResponse {
            status,
            status_text,
            headers,
            body,
        } = response;

        let body = match body {
            ResponseBody::Full(bytes) => {
                tap.first_chunk();
                tap.complete(bytes.len());
                ResponseBody::Full(bytes)
            }
            ResponseBody::Stream(stream) => ResponseBody::Stream(TappedStream::new(stream, tap).boxed()),
        };

        Ok(FetchResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}

/// Timing state of one instrumented exchange
struct Tap {
    context: TrialContext,
    label: String,
    submit_ms: f64,
    frames: Arc<dyn FrameClock>,
}

impl Tap {
    fn elapsed(&self) -> f64 {
        self.context.now_ms() - self.submit_ms
    }

    fn record(&self, field: MetricField, value: f64) {
        self.context
            .record(sample_name(&self.label, field.key()), value, None);
    }

    fn first_chunk(&self) {
        self.record(MetricField::TtftMs, self.elapsed());
    }

    fn failed(&self, err: &FetchError) {
        self.context.record(
            sample_name(&self.label, ERROR),
            self.elapsed(),
            Some(json!({ "error": err.to_string() })),
        );
    }

    /// Terminal chunk seen: record ttl and schedule the render sample
    fn complete(&self, bytes_total: usize) {
        let last_byte_ms = self.context.now_ms();
        self.record(MetricField::TtlMs, last_byte_ms - self.submit_ms);

        let context = self.context.clone();
        let frames = Arc::clone(&self.frames);
        let bytes_name = sample_name(&self.label, MetricField::BytesTotal.key());
        let render_name = sample_name(&self.label, MetricField::RenderMs.key());

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    frames.next_frame().await;
                    context.record(bytes_name, bytes_total as f64, None);
                    context.record(render_name, context.now_ms() - last_byte_ms, None);
                });
            }
            Err(_) => warn!(label = %self.label, "No runtime to schedule render sample on"),
        }
    }
}

/// Chunk stream that yields the wrapped stream's items unchanged while timing them
pub struct TappedStream {
    inner: ChunkStream,
    tap: Tap,
    bytes: usize,
    seen_first: bool,
    done: bool,
}

impl TappedStream {
    fn new(inner: ChunkStream, tap: Tap) -> Self {
        Self {
            inner,
            tap,
            bytes: 0,
            seen_first: false,
            done: false,
        }
    }
}

impl Stream for TappedStream {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !this.seen_first {
                    this.seen_first = true;
                    this.tap.first_chunk();
                }
                this.bytes += chunk.len();
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                this.tap.failed(&err);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                // An empty body completes on its first and only read
                if !this.seen_first {
                    this.seen_first = true;
                    this.tap.first_chunk();
                }
                this.tap.complete(this.bytes);
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
