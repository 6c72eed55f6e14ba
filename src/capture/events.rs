//! Network lifecycle events
//!
//! The harness publishes two raw feeds of JSON events (request dispatched,
//! response received). [`NetworkSubscription`] is the typed boundary over
//! them: every raw event is parsed and validated once here, malformed ones
//! are logged and dropped, and the subscription unsubscribes from its
//! source exactly once, on `close` or drop.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{trace, warn};

use super::fetch::Headers;

/// Event validation errors
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Malformed {kind} event: {source}")]
    Malformed {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid {kind} event: {reason}")]
    Invalid { kind: EventKind, reason: String },
}

/// The two feeds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Request,
    Response,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Request => write!(f, "request"),
            EventKind::Response => write!(f, "response"),
        }
    }
}

/// Request-dispatched event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    /// Milliseconds in the feed's clock
    pub timestamp: f64,
}

/// Response-received event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEvent {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    pub timestamp: f64,
}

/// A validated event from either feed
#[derive(Clone, Debug, PartialEq)]
pub enum NetworkEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
}

impl NetworkEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            NetworkEvent::Request(_) => EventKind::Request,
            NetworkEvent::Response(_) => EventKind::Response,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            NetworkEvent::Request(e) => &e.url,
            NetworkEvent::Response(e) => &e.url,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            NetworkEvent::Request(e) => e.timestamp,
            NetworkEvent::Response(e) => e.timestamp,
        }
    }

    /// Parse and validate a raw event
    pub fn parse(kind: EventKind, raw: Value) -> Result<Self, EventError> {
        let malformed = |source| EventError::Malformed { kind, source };
        let event = match kind {
            EventKind::Request => {
                NetworkEvent::Request(serde_json::from_value(raw).map_err(malformed)?)
            }
            EventKind::Response => {
                NetworkEvent::Response(serde_json::from_value(raw).map_err(malformed)?)
            }
        };
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), EventError> {
        let invalid = |reason: &str| EventError::Invalid {
            kind: self.kind(),
            reason: reason.to_string(),
        };
        if self.url().is_empty() {
            return Err(invalid("empty url"));
        }
        let ts = self.timestamp();
        if !ts.is_finite() || ts < 0.0 {
            return Err(invalid("timestamp must be a finite, non-negative number"));
        }
        Ok(())
    }
}

/// Raw receiving halves handed out by a feed
pub struct RawFeeds {
    pub requests: UnboundedReceiver<Value>,
    pub responses: UnboundedReceiver<Value>,
}

type Unsubscribe = Box<dyn FnOnce() + Send>;

/// Live subscription to both feeds
pub struct NetworkSubscription {
    feeds: RawFeeds,
    unsubscribe: Option<Unsubscribe>,
    requests_open: bool,
    responses_open: bool,
}

impl NetworkSubscription {
    /// `unsubscribe` detaches the feeds from their source; it runs exactly once
    pub fn new(feeds: RawFeeds, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            feeds,
            unsubscribe: Some(Box::new(unsubscribe)),
            requests_open: true,
            responses_open: true,
        }
    }

    /// Next valid event; `None` once both feeds are closed
    ///
    /// Request events are drained before response events that are ready at
    /// the same time, preserving dispatch-before-response order.
    pub async fn next(&mut self) -> Option<NetworkEvent> {
        loop {
            let (kind, raw) = tokio::select! {
                biased;
                raw = self.feeds.requests.recv(), if self.requests_open => match raw {
                    Some(raw) => (EventKind::Request, raw),
                    None => {
                        self.requests_open = false;
                        continue;
                    }
                },
                raw = self.feeds.responses.recv(), if self.responses_open => match raw {
                    Some(raw) => (EventKind::Response, raw),
                    None => {
                        self.responses_open = false;
                        continue;
                    }
                },
                else => return None,
            };

            match NetworkEvent::parse(kind, raw) {
                Ok(event) => {
                    trace!(kind = %kind, url = event.url(), "Network event");
                    return Some(event);
                }
                Err(e) => warn!(error = %e, "Dropping network event"),
            }
        }
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.unsubscribe.is_none()
    }

    /// Unsubscribe from both feeds; later calls are no-ops
    pub fn close(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
            self.feeds.requests.close();
            self.feeds.responses.close();
        }
    }
}

impl Drop for NetworkSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    fn subscription() -> (
        UnboundedSender<Value>,
        UnboundedSender<Value>,
        NetworkSubscription,
        Arc<AtomicUsize>,
    ) {
        let (req_tx, requests) = unbounded_channel();
        let (res_tx, responses) = unbounded_channel();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let sub = NetworkSubscription::new(RawFeeds { requests, responses }, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (req_tx, res_tx, sub, calls)
    }

    fn request(url: &str, ts: f64) -> Value {
        json!({"requestId": "1", "url": url, "method": "POST", "timestamp": ts})
    }

    #[tokio::test]
    async fn test_requests_before_responses() {
        let (req_tx, res_tx, mut sub, _) = subscription();
        res_tx
            .send(json!({"requestId": "1", "url": "http://a/api/chat", "method": "POST", "status": 200, "timestamp": 20.0}))
            .unwrap();
        req_tx.send(request("http://a/api/chat", 10.0)).unwrap();

        assert_eq!(sub.next().await.unwrap().kind(), EventKind::Request);
        assert_eq!(sub.next().await.unwrap().kind(), EventKind::Response);
    }

    #[tokio::test]
    async fn test_malformed_events_dropped() {
        let (req_tx, res_tx, mut sub, _) = subscription();
        req_tx.send(json!({"url": "http://a/api/chat"})).unwrap();
        req_tx.send(request("", 1.0)).unwrap();
        req_tx.send(request("http://a/api/chat", -5.0)).unwrap();
        req_tx.send(request("http://a/api/chat", 7.0)).unwrap();
        drop(req_tx);
        drop(res_tx);

        let event = sub.next().await.unwrap();
        assert_eq!(event.timestamp(), 7.0);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_exactly_once() {
        let (_req_tx, _res_tx, mut sub, calls) = subscription();
        sub.close();
        sub.close();
        assert!(sub.is_closed());
        drop(sub);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (_req_tx, _res_tx, sub, calls) = subscription();
        drop(sub);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_headers_default() {
        let event = NetworkEvent::parse(EventKind::Request, request("http://a/x", 0.0)).unwrap();
        match event {
            NetworkEvent::Request(req) => assert!(req.headers.is_empty()),
            NetworkEvent::Response(_) => panic!("expected request"),
        }
    }
}
