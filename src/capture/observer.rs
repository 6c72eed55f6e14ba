//! Out-of-page capture
//!
//! [`OutOfPageObserver`] derives a trial's record from the page's network
//! lifecycle feed alone, by correlating event timestamps:
//!
//! 1. the first relevant dispatched request latches the start time;
//! 2. the first relevant response gives `ttfb_ms = ttft_ms`;
//! 3. reading the full payload gives `ttl_ms` and `bytes_total`, or, when the
//!    body is a stream that is never buffered, a settle delay is waited and
//!    `ttl_ms` is estimated from its end.
//!
//! The estimate in step 3 is biased upward by up to the settle delay.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use super::events::{NetworkEvent, NetworkSubscription, ResponseEvent};
use super::filter::RequestFilter;
use crate::harness::{HarnessError, NetworkFeed};
use crate::models::{to_record_value, MetricRecord, SENTINEL};
use crate::utils::Clock;

/// Observer tuning
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Wait after an unbufferable response before estimating `ttl_ms`
    pub settle_delay_ms: u64,
    /// Overall bound on one trial's observation
    pub trial_timeout_ms: u64,
    pub filter: RequestFilter,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 3_000,
            trial_timeout_ms: 45_000,
            filter: RequestFilter::default(),
        }
    }
}

/// How an observation ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOutcome {
    /// Payload read in full
    Completed,
    /// Body was a stream; `ttl_ms` estimated after the settle delay
    SettleEstimate,
    /// Payload read failed for another reason
    HandlerFailed,
    /// No relevant response before the trial timeout
    TimedOut,
    /// Both feeds closed before a relevant response
    FeedClosed,
}

/// Result of one observation
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub record: MetricRecord,
    /// Feed-clock time the exchange completed (or was estimated to)
    pub completed_at_ms: Option<f64>,
    pub outcome: ObservationOutcome,
}

/// Correlates network events into metric records
#[derive(Clone, Debug)]
pub struct OutOfPageObserver {
    pattern: regex::Regex,
    filter: RequestFilter,
    settle_delay: Duration,
    trial_timeout: Duration,
}

impl OutOfPageObserver {
    pub fn new(pattern: &str, config: &ObserverConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: regex::Regex::new(pattern)?,
            filter: config.filter.clone(),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            trial_timeout: Duration::from_millis(config.trial_timeout_ms),
        })
    }

    /// The exchange this observer measures
    pub fn is_candidate(&self, method: &str, url: &str) -> bool {
        self.pattern.is_match(url) && self.filter.is_relevant(method, url)
    }

    /// Subscribe to `feed`; events are buffered from here on
    pub fn attach<'a, F>(&self, feed: &'a F) -> ObservationSession<'a, F>
    where
        F: NetworkFeed + ?Sized,
    {
        ObservationSession {
            observer: self.clone(),
            subscription: feed.subscribe(),
            clock: feed.clock(),
            feed,
        }
    }
}

/// An attached observer waiting for its trial's exchange
pub struct ObservationSession<'a, F: NetworkFeed + ?Sized> {
    observer: OutOfPageObserver,
    feed: &'a F,
    subscription: NetworkSubscription,
    clock: Arc<dyn Clock>,
}

impl<'a, F: NetworkFeed + ?Sized> ObservationSession<'a, F> {
    /// Observe until the exchange completes or the trial timeout elapses
    pub async fn collect(mut self) -> Observation {
        let deadline = Instant::now() + self.observer.trial_timeout;
        let mut latch: Option<f64> = None;

        let observation = loop {
            let event = tokio::select! {
                event = self.subscription.next() => event,
                _ = sleep_until(deadline) => {
                    warn!(
                        timeout_ms = self.observer.trial_timeout.as_millis() as u64,
                        "No relevant response before trial timeout"
                    );
                    break unobserved(ObservationOutcome::TimedOut);
                }
            };

            let Some(event) = event else {
                warn!("Network feed closed before a relevant response");
                break unobserved(ObservationOutcome::FeedClosed);
            };

            match event {
                NetworkEvent::Request(request) => {
                    if latch.is_none() && self.observer.is_candidate(&request.method, &request.url)
                    {
                        debug!(method = %request.method, url = %request.url, "Request latched");
                        latch = Some(request.timestamp);
                    }
                }
                NetworkEvent::Response(response) => {
                    if !self.observer.is_candidate(&response.method, &response.url) {
                        debug!(url = %response.url, "Skipping response");
                        continue;
                    }
                    break self.complete(response, latch, deadline).await;
                }
            }
        };

        self.subscription.close();
        observation
    }

    async fn complete(
        &self,
        response: ResponseEvent,
        latch: Option<f64>,
        deadline: Instant,
    ) -> Observation {
        let since_latch = |now: f64| latch.map(|start| to_record_value(now - start)).unwrap_or(SENTINEL);

        let mut record = MetricRecord::unobserved();
        record.url = response.url.clone();
        record.ttfb_ms = since_latch(response.timestamp);
        record.ttft_ms = record.ttfb_ms;
        if latch.is_none() {
            warn!(url = %response.url, "Relevant response without a latched request");
        }
        debug!(status = response.status, ttfb_ms = record.ttfb_ms, "Response headers");

        let remaining = deadline.saturating_duration_since(Instant::now());
        let read = timeout(remaining, self.feed.response_body(&response.request_id)).await;

        let (outcome, completed_at_ms) = match read {
            Ok(Ok(body)) => {
                let now = self.clock.now_ms();
                record.bytes_total = body.len() as i64;
                record.ttl_ms = since_latch(now);
                info!(bytes = body.len(), ttl_ms = record.ttl_ms, "Response complete");
                (ObservationOutcome::Completed, Some(now))
            }
            Ok(Err(HarnessError::BodyUnavailable(_))) | Err(_) => {
                debug!(
                    settle_ms = self.observer.settle_delay.as_millis() as u64,
                    "Streaming response, waiting for settle delay"
                );
                sleep(self.observer.settle_delay).await;
                let now = self.clock.now_ms();
                record.ttl_ms = since_latch(now);
                info!(ttl_ms = record.ttl_ms, "Streaming complete (estimated)");
                (ObservationOutcome::SettleEstimate, Some(now))
            }
            Ok(Err(e)) => {
                warn!(error = %e, url = %response.url, "Failed to process response");
                (ObservationOutcome::HandlerFailed, None)
            }
        };

        Observation {
            record,
            completed_at_ms,
            outcome,
        }
    }
}

fn unobserved(outcome: ObservationOutcome) -> Observation {
    Observation {
        record: MetricRecord::unobserved(),
        completed_at_ms: None,
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::events::RawFeeds;
    use crate::utils::MonotonicClock;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

    #[derive(Clone)]
    enum Body {
        ReadyAt(u64, &'static [u8]),
        Unavailable,
        Disconnected,
    }

    struct FakeFeed {
        clock: MonotonicClock,
        feeds: Mutex<Option<RawFeeds>>,
        unsubscribed: Arc<AtomicUsize>,
        bodies: HashMap<String, Body>,
    }

    impl FakeFeed {
        fn new(bodies: &[(&str, Body)]) -> (Self, UnboundedSender<Value>, UnboundedSender<Value>) {
            let (req_tx, requests) = unbounded_channel();
            let (res_tx, responses) = unbounded_channel();
            let feed = Self {
                clock: MonotonicClock::new(),
                feeds: Mutex::new(Some(RawFeeds { requests, responses })),
                unsubscribed: Arc::new(AtomicUsize::new(0)),
                bodies: bodies
                    .iter()
                    .map(|(id, body)| (id.to_string(), body.clone()))
                    .collect(),
            };
            (feed, req_tx, res_tx)
        }
    }

    #[async_trait]
    impl NetworkFeed for FakeFeed {
        fn clock(&self) -> Arc<dyn Clock> {
            Arc::new(self.clock.clone())
        }

        fn subscribe(&self) -> NetworkSubscription {
            let feeds = self.feeds.lock().unwrap().take().unwrap();
            let counter = Arc::clone(&self.unsubscribed);
            NetworkSubscription::new(feeds, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        }

        async fn response_body(&self, request_id: &str) -> Result<Bytes, HarnessError> {
            match self.bodies.get(request_id).cloned() {
                Some(Body::ReadyAt(at_ms, data)) => {
                    sleep_until(self.clock.origin() + Duration::from_millis(at_ms)).await;
                    Ok(Bytes::from_static(data))
                }
                Some(Body::Unavailable) => Err(HarnessError::BodyUnavailable(request_id.to_string())),
                Some(Body::Disconnected) => Err(HarnessError::Disconnected("closed".to_string())),
                None => std::future::pending().await,
            }
        }
    }

    fn request(id: &str, method: &str, url: &str, ts: f64) -> Value {
        json!({"requestId": id, "url": url, "method": method, "timestamp": ts})
    }

    fn response(id: &str, method: &str, url: &str, ts: f64) -> Value {
        json!({"requestId": id, "url": url, "method": method, "status": 200, "timestamp": ts})
    }

    fn observer() -> OutOfPageObserver {
        OutOfPageObserver::new("/api/", &ObserverConfig::default()).unwrap()
    }

    const CHAT: &str = "http://localhost:3000/api/chat";

    #[tokio::test(start_paused = true)]
    async fn test_completed_exchange() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[("1", Body::ReadyAt(500, b"{\"answer\":42}"))]);
        let session = observer().attach(&feed);

        req_tx.send(request("1", "POST", CHAT, 10.0)).unwrap();
        res_tx.send(response("1", "POST", CHAT, 130.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.outcome, ObservationOutcome::Completed);
        assert_eq!(observation.record.ttfb_ms, 120);
        assert_eq!(observation.record.ttft_ms, 120);
        assert_eq!(observation.record.ttl_ms, 490);
        assert_eq!(observation.record.bytes_total, 13);
        assert_eq!(observation.record.render_ms, SENTINEL);
        assert_eq!(observation.record.url, CHAT);
        assert_eq!(observation.completed_at_ms, Some(500.0));
        assert_eq!(feed.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_request_wins_latch() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[("1", Body::ReadyAt(0, b"ok"))]);
        let session = observer().attach(&feed);

        req_tx.send(request("1", "POST", CHAT, 10.0)).unwrap();
        req_tx.send(request("2", "POST", CHAT, 50.0)).unwrap();
        res_tx.send(response("1", "POST", CHAT, 130.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.record.ttfb_ms, 120);
    }

    #[tokio::test(start_paused = true)]
    async fn test_irrelevant_traffic_ignored() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[
            ("info", Body::ReadyAt(0, b"{}")),
            ("1", Body::ReadyAt(0, b"ok")),
        ]);
        let session = observer().attach(&feed);

        req_tx.send(request("info", "POST", "http://localhost:3000/api/info", 1.0)).unwrap();
        req_tx.send(request("get", "GET", "http://localhost:3000/api/threads", 2.0)).unwrap();
        req_tx.send(request("asset", "POST", "http://localhost:3000/static/x", 3.0)).unwrap();
        req_tx.send(request("1", "POST", CHAT, 10.0)).unwrap();
        res_tx.send(response("info", "POST", "http://localhost:3000/api/info", 5.0)).unwrap();
        res_tx.send(response("1", "POST", CHAT, 40.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.record.ttfb_ms, 30);
        assert_eq!(observation.record.url, CHAT);
    }

    #[test]
    fn test_excluded_url_is_never_a_candidate() {
        let observer = OutOfPageObserver::new("/api/(chat|nlq)", &ObserverConfig::default()).unwrap();
        assert!(observer.is_candidate("POST", "http://localhost:3000/api/nlq"));
        assert!(!observer.is_candidate("GET", "http://localhost:3000/api/info/nlq"));
        assert!(!observer.is_candidate("POST", "http://localhost:3000/api/info/nlq"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streaming_settle_fallback() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[("1", Body::Unavailable)]);
        let session = observer().attach(&feed);

        req_tx.send(request("1", "POST", CHAT, 10.0)).unwrap();
        res_tx.send(response("1", "POST", CHAT, 130.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.outcome, ObservationOutcome::SettleEstimate);
        assert_eq!(observation.record.ttfb_ms, 120);
        // Settle delay of 3000 ms from t=0, measured from the latch at 10 ms
        assert_eq!(observation.record.ttl_ms, 2990);
        assert_eq!(observation.record.bytes_total, SENTINEL);
        assert_eq!(feed.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_unobserved_record() {
        let (feed, req_tx, _res_tx) = FakeFeed::new(&[]);
        let config = ObserverConfig {
            trial_timeout_ms: 1_000,
            ..Default::default()
        };
        let session = OutOfPageObserver::new("/api/", &config).unwrap().attach(&feed);
        req_tx.send(request("1", "POST", CHAT, 10.0)).unwrap();

        let start = Instant::now();
        let observation = session.collect().await;

        assert_eq!(observation.outcome, ObservationOutcome::TimedOut);
        assert_eq!(observation.record, MetricRecord::unobserved());
        assert!(observation.record.url.is_empty());
        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
        assert_eq!(feed.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_payload_takes_settle_path() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[("1", Body::ReadyAt(60_000, b"late"))]);
        let config = ObserverConfig {
            trial_timeout_ms: 1_000,
            settle_delay_ms: 500,
            ..Default::default()
        };
        let session = OutOfPageObserver::new("/api/", &config).unwrap().attach(&feed);
        req_tx.send(request("1", "POST", CHAT, 0.0)).unwrap();
        res_tx.send(response("1", "POST", CHAT, 100.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.outcome, ObservationOutcome::SettleEstimate);
        assert_eq!(observation.record.ttl_ms, 1_500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_failure_returns_partial_record() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[("1", Body::Disconnected)]);
        let session = observer().attach(&feed);

        req_tx.send(request("1", "POST", CHAT, 10.0)).unwrap();
        res_tx.send(response("1", "POST", CHAT, 25.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.outcome, ObservationOutcome::HandlerFailed);
        assert_eq!(observation.record.ttfb_ms, 15);
        assert_eq!(observation.record.ttl_ms, SENTINEL);
        assert_eq!(observation.completed_at_ms, None);
        assert_eq!(feed.unsubscribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_without_latch() {
        let (feed, _req_tx, res_tx) = FakeFeed::new(&[("1", Body::ReadyAt(0, b"abc"))]);
        let session = observer().attach(&feed);
        res_tx.send(response("1", "POST", CHAT, 25.0)).unwrap();

        let observation = session.collect().await;
        assert_eq!(observation.record.ttfb_ms, SENTINEL);
        assert_eq!(observation.record.ttl_ms, SENTINEL);
        assert_eq!(observation.record.bytes_total, 3);
        assert_eq!(observation.record.url, CHAT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_closed() {
        let (feed, req_tx, res_tx) = FakeFeed::new(&[]);
        let session = observer().attach(&feed);
        drop(req_tx);
        drop(res_tx);

        let observation = session.collect().await;
        assert_eq!(observation.outcome, ObservationOutcome::FeedClosed);
        assert!(observation.record.is_unobserved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_session_unsubscribes() {
        let (feed, _req_tx, _res_tx) = FakeFeed::new(&[]);
        let session = observer().attach(&feed);
        drop(session);
        assert_eq!(feed.unsubscribed.load(Ordering::SeqCst), 1);
    }
}
