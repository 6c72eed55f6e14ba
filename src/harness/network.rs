//! Simulated page network layer
//!
//! [`PageNetwork`] publishes request/response lifecycle events to its
//! subscribers and keeps each response body until it has been fully read.
//! [`NetworkTap`] sits directly above the transport, so every call the page
//! makes, instrumented or not, shows up on the feeds.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::HarnessError;
use crate::capture::{
    ChunkStream, Fetch, FetchError, FetchRequest, FetchResponse, Headers, NetworkSubscription,
    RawFeeds, ResponseBody,
};
use crate::utils::{Clock, MonotonicClock};

#[derive(Clone, Debug, PartialEq)]
enum BodyState {
    Pending,
    Ready(Bytes),
    /// Open-ended stream, never buffered
    Unavailable,
    Failed(String),
}

struct Subscriber {
    id: u64,
    requests: UnboundedSender<Value>,
    responses: UnboundedSender<Value>,
}

struct NetworkInner {
    clock: MonotonicClock,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber: AtomicU64,
    next_request: AtomicU64,
    bodies: Mutex<HashMap<String, watch::Sender<BodyState>>>,
}

/// Event hub and body store of one page
#[derive(Clone)]
pub struct PageNetwork {
    inner: Arc<NetworkInner>,
}

impl PageNetwork {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }

    pub fn with_clock(clock: MonotonicClock) -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                clock,
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(1),
                next_request: AtomicU64::new(1),
                bodies: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Clock every event is stamped with
    pub fn clock(&self) -> MonotonicClock {
        self.inner.clock.clone()
    }

    pub fn subscribe(&self) -> NetworkSubscription {
        let (requests_tx, requests) = unbounded_channel();
        let (responses_tx, responses) = unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);

        lock(&self.inner.subscribers).push(Subscriber {
            id,
            requests: requests_tx,
            responses: responses_tx,
        });
        debug!(subscriber = id, "Network feed subscribed");

        let weak: Weak<NetworkInner> = Arc::downgrade(&self.inner);
        NetworkSubscription::new(RawFeeds { requests, responses }, move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.subscribers).retain(|s| s.id != id);
                debug!(subscriber = id, "Network feed unsubscribed");
            }
        })
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    fn next_request_id(&self) -> String {
        self.inner
            .next_request
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }

    fn publish(&self, raw: Value, response: bool) {
        let mut subscribers = lock(&self.inner.subscribers);
        subscribers.retain(|s| {
            let tx = if response { &s.responses } else { &s.requests };
            tx.send(raw.clone()).is_ok()
        });
    }

    fn emit_request(&self, id: &str, request: &FetchRequest) {
        trace!(id, method = %request.method, url = %request.url, "Request dispatched");
        self.publish(
            json!({
                "requestId": id,
                "url": request.url,
                "method": request.method,
                "headers": request.headers,
                "timestamp": self.inner.clock.now_ms(),
            }),
            false,
        );
    }

    fn emit_response(&self, id: &str, request: &FetchRequest, status: u16, headers: &Headers) {
        trace!(id, status, url = %request.url, "Response received");
        self.publish(
            json!({
                "requestId": id,
                "url": request.url,
                "method": request.method,
                "status": status,
                "headers": headers,
                "timestamp": self.inner.clock.now_ms(),
            }),
            true,
        );
    }

    fn open_body(&self, id: &str) {
        let (tx, _) = watch::channel(BodyState::Pending);
        lock(&self.inner.bodies).insert(id.to_string(), tx);
    }

    fn finish_body(&self, id: &str, state: BodyState) {
        if let Some(tx) = lock(&self.inner.bodies).get(id) {
            tx.send_replace(state);
        }
    }

    /// Wait for the full body of request `id`
    pub async fn response_body(&self, id: &str) -> Result<Bytes, HarnessError> {
        let rx = lock(&self.inner.bodies).get(id).map(|tx| tx.subscribe());
        let Some(mut rx) = rx else {
            return Err(HarnessError::BodyUnavailable(id.to_string()));
        };

        let state = rx
            .wait_for(|state| *state != BodyState::Pending)
            .await
            .map_err(|_| HarnessError::Disconnected(format!("page navigated away from request {id}")))?
            .clone();

        match state {
            BodyState::Ready(bytes) => Ok(bytes),
            BodyState::Unavailable => Err(HarnessError::BodyUnavailable(id.to_string())),
            BodyState::Failed(reason) => Err(HarnessError::Disconnected(reason)),
            BodyState::Pending => Err(HarnessError::BodyUnavailable(id.to_string())),
        }
    }

    /// Forget all stored bodies; pending readers see a disconnect
    pub fn reset(&self) {
        lock(&self.inner.bodies).clear();
    }
}

impl Default for PageNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport wrapper that reports every exchange to a [`PageNetwork`]
pub struct NetworkTap {
    inner: Arc<dyn Fetch>,
    network: PageNetwork,
}

impl NetworkTap {
    pub fn new(inner: Arc<dyn Fetch>, network: PageNetwork) -> Self {
        Self { inner, network }
    }

    /// Yield the chunks unchanged and store the assembled body at the end
    fn tee(&self, id: String, body: ChunkStream) -> ChunkStream {
        let network = self.network.clone();
        stream::unfold(Some((body, BytesMut::new())), move |state| {
            let network = network.clone();
            let id = id.clone();
            async move {
                let (mut body, mut buf) = state?;
                match body.next().await {
                    Some(Ok(chunk)) => {
                        buf.extend_from_slice(&chunk);
                        Some((Ok(chunk), Some((body, buf))))
                    }
                    Some(Err(e)) => {
                        network.finish_body(&id, BodyState::Failed(e.to_string()));
                        Some((Err(e), None))
                    }
                    None => {
                        network.finish_body(&id, BodyState::Ready(buf.freeze()));
                        None
                    }
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl Fetch for NetworkTap {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let id = self.network.next_request_id();
        let summary = FetchRequest {
            body: None,
            ..request.clone()
        };
        self.network.open_body(&id);
        self.network.emit_request(&id, &summary);

        let response = match self.inner.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                self.network.finish_body(&id, BodyState::Failed(e.to_string()));
                return Err(e);
            }
        };
        self.network
            .emit_response(&id, &summary, response.status, &response.headers);

        let event_stream = response.is_event_stream();
        let FetchResponse {
            status,
            status_text,
            headers,
            body,
        } = response;

        let body = match body {
            ResponseBody::Full(bytes) => {
                self.network.finish_body(&id, BodyState::Ready(bytes.clone()));
                ResponseBody::Full(bytes)
            }
            ResponseBody::Stream(chunks) if event_stream => {
                self.network.finish_body(&id, BodyState::Unavailable);
                ResponseBody::Stream(chunks)
            }
            ResponseBody::Stream(chunks) => ResponseBody::Stream(self.tee(id, chunks)),
        };

        Ok(FetchResponse {
            status,
            status_text,
            headers,
            body,
        })
    }
}
