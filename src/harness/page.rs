//! Page state shared by the in-tree harnesses
//!
//! Holds what a browser tab would: the current URL, the attached elements,
//! input values, the fetch slot the page calls through, and the exchanges
//! in flight. Navigation aborts in-flight exchanges and resets the DOM.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use super::network::{NetworkTap, PageNetwork};
use super::NetworkConditions;
use crate::capture::{Fetch, FetchRequest, FrameClock, IntervalFrameClock};

struct PageInner {
    network: PageNetwork,
    fetch: RwLock<Arc<dyn Fetch>>,
    frames: Arc<dyn FrameClock>,
    conditions: Option<NetworkConditions>,
    url: Mutex<Option<String>>,
    elements: watch::Sender<BTreeSet<String>>,
    inputs: Mutex<HashMap<String, String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// One simulated browser tab
#[derive(Clone)]
pub struct PageState {
    inner: Arc<PageInner>,
}

impl PageState {
    /// Page whose calls go through `transport`, observed by a fresh network
    pub fn new(transport: Arc<dyn Fetch>, conditions: Option<NetworkConditions>) -> Self {
        let network = PageNetwork::new();
        let tapped: Arc<dyn Fetch> = Arc::new(NetworkTap::new(transport, network.clone()));
        let (elements, _) = watch::channel(BTreeSet::new());

        Self {
            inner: Arc::new(PageInner {
                network,
                fetch: RwLock::new(tapped),
                frames: Arc::new(IntervalFrameClock::default()),
                conditions,
                url: Mutex::new(None),
                elements,
                inputs: Mutex::new(HashMap::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn network(&self) -> &PageNetwork {
        &self.inner.network
    }

    pub fn frames(&self) -> Arc<dyn FrameClock> {
        Arc::clone(&self.inner.frames)
    }

    pub fn conditions(&self) -> Option<NetworkConditions> {
        self.inner.conditions.clone()
    }

    pub fn page_fetch(&self) -> Arc<dyn Fetch> {
        let slot = self
            .inner
            .fetch
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&slot)
    }

    pub fn set_page_fetch(&self, fetch: Arc<dyn Fetch>) -> Arc<dyn Fetch> {
        let mut slot = self
            .inner
            .fetch
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *slot, fetch)
    }

    pub fn current_url(&self) -> Option<String> {
        lock(&self.inner.url).clone()
    }

    /// Start a new document at `url` with `elements` attached
    pub fn load(&self, url: &str, elements: impl IntoIterator<Item = String>) {
        self.abort_in_flight();
        self.inner.network.reset();
        lock(&self.inner.inputs).clear();
        *lock(&self.inner.url) = Some(url.to_string());
        self.inner.elements.send_replace(elements.into_iter().collect());
        debug!(url, "Page loaded");
    }

    fn abort_in_flight(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.inner.tasks).drain(..).collect();
        let aborted = tasks.iter().filter(|t| !t.is_finished()).count();
        for task in tasks {
            task.abort();
        }
        if aborted > 0 {
            debug!(aborted, "Aborted in-flight exchanges");
        }
    }

    pub fn attach(&self, selector: &str) {
        self.inner.elements.send_if_modified(|set| set.insert(selector.to_string()));
    }

    pub fn is_attached(&self, selector: &str) -> bool {
        self.inner.elements.borrow().contains(selector)
    }

    /// Wait until `selector` is attached or `limit` elapses
    pub async fn wait_for(&self, selector: &str, limit: Duration) -> bool {
        let mut rx = self.inner.elements.subscribe();
        timeout(limit, rx.wait_for(|set| set.contains(selector)))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub fn set_input(&self, selector: &str, text: &str) {
        lock(&self.inner.inputs).insert(selector.to_string(), text.to_string());
    }

    pub fn input(&self, selector: &str) -> Option<String> {
        lock(&self.inner.inputs).get(selector).cloned()
    }

    /// Issue `request` through the page's current fetch in the background
    ///
    /// The page drains the body, waits `render_delay` and then attaches
    /// `reveal`. The fetch is read from the slot when the exchange starts.
    pub fn dispatch(&self, request: FetchRequest, reveal: Vec<String>, render_delay: Duration) {
        let page = self.clone();
        let fetch = self.page_fetch();
        let handle = tokio::spawn(async move {
            let url = request.url.clone();
            let body = match fetch.fetch(request).await {
                Ok(response) => response.bytes().await,
                Err(e) => Err(e),
            };
            match body {
                Ok(bytes) => page.render(&url, bytes, &reveal, render_delay).await,
                Err(e) => warn!(url = %url, error = %e, "Page exchange failed"),
            }
        });
        lock(&self.inner.tasks).push(handle);
    }

    async fn render(&self, url: &str, body: Bytes, reveal: &[String], render_delay: Duration) {
        debug!(url, bytes = body.len(), "Page consumed response");
        if reveal.is_empty() {
            return;
        }
        sleep(render_delay).await;
        for selector in reveal {
            self.attach(selector);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FetchError, FetchResponse, ResponseBody};
    use async_trait::async_trait;

    struct Slow;

    #[async_trait]
    impl Fetch for Slow {
        async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, FetchError> {
            sleep(Duration::from_millis(200)).await;
            Ok(FetchResponse::new(200, ResponseBody::Full(Bytes::from_static(b"ok"))))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_reveals_after_render_delay() {
        let page = PageState::new(Arc::new(Slow), None);
        page.load("http://a/", vec!["#q".to_string()]);
        assert!(page.is_attached("#q"));

        page.dispatch(
            FetchRequest::post("http://a/api/chat"),
            vec![".answer".to_string()],
            Duration::from_millis(50),
        );

        assert!(!page.wait_for(".answer", Duration::from_millis(100)).await);
        assert!(page.wait_for(".answer", Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_aborts_in_flight_and_resets_dom() {
        let page = PageState::new(Arc::new(Slow), None);
        page.load("http://a/", vec!["#q".to_string()]);
        page.set_input("#q", "hello");
        page.dispatch(
            FetchRequest::post("http://a/api/chat"),
            vec![".answer".to_string()],
            Duration::ZERO,
        );

        page.load("http://a/", Vec::new());
        assert!(!page.is_attached("#q"));
        assert_eq!(page.input("#q"), None);
        assert!(!page.wait_for(".answer", Duration::from_secs(1)).await);
    }

    #[test]
    fn test_fetch_slot_swap() {
        let page = PageState::new(Arc::new(Slow), None);
        let original = page.page_fetch();
        let previous = page.set_page_fetch(Arc::new(Slow));

        assert!(Arc::ptr_eq(&original, &previous));
        assert!(!Arc::ptr_eq(&original, &page.page_fetch()));
    }
}
