//! Replay harness
//!
//! Plays back a scripted page: which elements exist after navigation, which
//! exchanges a navigation or a click issues, and how each response arrives
//! (header delay, chunk timings, content type). Scripts are YAML or JSON.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::page::PageState;
use super::{HarnessError, NetworkConditions, NetworkFeed, UiHarness};
use crate::capture::{
    Fetch, FetchError, FetchRequest, FetchResponse, FrameClock, Headers, NetworkSubscription,
    ResponseBody,
};
use crate::models::{is_yaml_file, Scenario};
use crate::utils::Clock;

/// What starts an exchange
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "on", content = "selector", rename_all = "snake_case")]
pub enum Trigger {
    /// Issued on every page load
    Navigate,
    /// Issued when this selector is clicked
    Click(String),
}

/// One body chunk
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayChunk {
    /// Delay after the previous chunk (or the headers)
    #[serde(default)]
    pub delay_ms: u64,
    pub data: String,
}

/// One scripted request/response pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayExchange {
    pub trigger: Trigger,
    #[serde(default = "default_method")]
    pub method: String,
    /// Absolute URL, or a path resolved against the page URL
    pub url: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub header_delay_ms: u64,
    #[serde(default)]
    pub chunks: Vec<ReplayChunk>,
    /// Deliver chunks as a stream rather than one buffered body
    #[serde(default)]
    pub streamed: bool,
    /// Fail the dispatch with this message instead of responding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    /// Elements attached once the page has rendered the response
    #[serde(default)]
    pub reveal: Vec<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

impl ReplayExchange {
    fn body_len(&self) -> usize {
        self.chunks.iter().map(|c| c.data.len()).sum()
    }

    fn handles(&self, request: &FetchRequest) -> bool {
        self.method.eq_ignore_ascii_case(&request.method)
            && strip_query(&request.url).ends_with(strip_query(&self.url))
    }
}

fn strip_query(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// A scripted page
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Elements attached after every navigation
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub exchanges: Vec<ReplayExchange>,
    /// Delay between consuming a response and attaching its elements
    #[serde(default = "default_render_delay")]
    pub render_delay_ms: u64,
    #[serde(default)]
    pub navigation_delay_ms: u64,
    /// Emulated link applied on top of the scripted timings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConditions>,
}

fn default_render_delay() -> u64 {
    16
}

impl ReplayScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay script: {}", path.display()))?;

        if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML script: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON script: {}", path.display()))
        }
    }

    /// Demo page for a scenario: a health probe on load and a streamed answer on send
    pub fn for_scenario(scenario: &Scenario) -> Self {
        let chat_path = scenario
            .http
            .as_ref()
            .map(|h| h.path.clone())
            .unwrap_or_else(|| "/api/chat".to_string());
        let matched = Regex::new(&scenario.fetch_regex)
            .map(|re| re.is_match(&chat_path))
            .unwrap_or(false);
        if !matched {
            warn!(
                scenario = %scenario.name,
                path = %chat_path,
                "Synthesized chat path does not match fetchRegex; trials will record nothing"
            );
        }

        let mut elements = vec![
            scenario.selectors.input.clone(),
            scenario.selectors.send.clone(),
        ];
        elements.extend(scenario.prepare.iter().cloned());

        let mut headers = Headers::new();
        headers.insert("content-type".to_string(), "text/event-stream".to_string());

        let tokens = ["Mohamed ", "Salah ", "plays ", "for ", "Liverpool."];
        let mut chunks: Vec<ReplayChunk> = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| ReplayChunk {
                delay_ms: if i == 0 { 180 } else { 40 },
                data: format!("data: {}\n\n", json!({ "delta": token })),
            })
            .collect();
        chunks.push(ReplayChunk {
            delay_ms: 20,
            data: "data: [DONE]\n\n".to_string(),
        });

        Self {
            elements,
            exchanges: vec![
                ReplayExchange {
                    trigger: Trigger::Navigate,
                    method: "GET".to_string(),
                    url: "/api/health".to_string(),
                    status: 200,
                    headers: Headers::new(),
                    header_delay_ms: 20,
                    chunks: vec![ReplayChunk {
                        delay_ms: 0,
                        data: "{\"ok\":true}".to_string(),
                    }],
                    streamed: false,
                    fail: None,
                    reveal: Vec::new(),
                },
                ReplayExchange {
                    trigger: Trigger::Click(scenario.selectors.send.clone()),
                    method: "POST".to_string(),
                    url: chat_path,
                    status: 200,
                    headers,
                    header_delay_ms: 120,
                    chunks,
                    streamed: true,
                    fail: None,
                    reveal: vec![scenario.selectors.assistant.clone()],
                },
            ],
            render_delay_ms: default_render_delay(),
            navigation_delay_ms: 0,
            network: Some(NetworkConditions::default()),
        }
    }
}

/// Transport answering from the script
pub struct ScriptedBackend {
    exchanges: Vec<ReplayExchange>,
    network: Option<NetworkConditions>,
}

impl ScriptedBackend {
    pub fn new(exchanges: Vec<ReplayExchange>, network: Option<NetworkConditions>) -> Self {
        Self { exchanges, network }
    }

    fn header_delay(&self, exchange: &ReplayExchange, request: &FetchRequest) -> Duration {
        let mut delay = Duration::from_millis(exchange.header_delay_ms);
        if let Some(network) = &self.network {
            let upload = request.body.as_ref().map(|b| b.len()).unwrap_or(0);
            delay += network.latency() + network.upload_time(upload);
        }
        delay
    }

    fn chunk_delay(&self, chunk: &ReplayChunk) -> Duration {
        let transfer = self
            .network
            .as_ref()
            .map(|n| n.download_time(chunk.data.len()))
            .unwrap_or_default();
        Duration::from_millis(chunk.delay_ms) + transfer
    }
}

#[async_trait]
impl Fetch for ScriptedBackend {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let Some(exchange) = self.exchanges.iter().find(|e| e.handles(&request)) else {
            debug!(url = %request.url, "No scripted exchange");
            return Ok(FetchResponse::new(404, ResponseBody::Full(Bytes::new())));
        };

        sleep(self.header_delay(exchange, &request)).await;
        if let Some(reason) = &exchange.fail {
            return Err(FetchError::RequestFailed(reason.clone()));
        }

        let body = if exchange.streamed {
            let timed: Vec<(Duration, Bytes)> = exchange
                .chunks
                .iter()
                .map(|c| (self.chunk_delay(c), Bytes::from(c.data.clone())))
                .collect();
            ResponseBody::Stream(
                stream::iter(timed)
                    .then(|(delay, data)| async move {
                        sleep(delay).await;
                        Ok(data)
                    })
                    .boxed(),
            )
        } else {
            let total: Duration = exchange.chunks.iter().map(|c| self.chunk_delay(c)).sum();
            sleep(total).await;
            let mut data = String::with_capacity(exchange.body_len());
            for chunk in &exchange.chunks {
                data.push_str(&chunk.data);
            }
            ResponseBody::Full(Bytes::from(data))
        };

        let mut response = FetchResponse::new(exchange.status, body);
        response.headers = exchange.headers.clone();
        Ok(response)
    }
}

/// Harness over a [`ReplayScript`]
pub struct ReplayHarness {
    script: ReplayScript,
    page: PageState,
}

impl ReplayHarness {
    pub fn new(script: ReplayScript) -> Self {
        let backend = ScriptedBackend::new(script.exchanges.clone(), script.network.clone());
        let page = PageState::new(Arc::new(backend), script.network.clone());
        Self { script, page }
    }

    pub fn page(&self) -> &PageState {
        &self.page
    }

    fn render_delay(&self) -> Duration {
        Duration::from_millis(self.script.render_delay_ms)
    }

    fn issue(&self, exchange: &ReplayExchange, body: Option<Bytes>) -> Result<(), HarnessError> {
        let base = self
            .page
            .current_url()
            .ok_or_else(|| HarnessError::Config("no page loaded".to_string()))?;
        let mut request = FetchRequest::new(exchange.method.clone(), resolve_url(&base, &exchange.url));
        if let Some(body) = body {
            request = request.header("content-type", "application/json").body(body);
        }
        self.page
            .dispatch(request, exchange.reveal.clone(), self.render_delay());
        Ok(())
    }
}

/// Join a path onto the origin of `base`
fn resolve_url(base: &str, url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    let origin_end = base
        .find("://")
        .and_then(|scheme| base[scheme + 3..].find('/').map(|i| scheme + 3 + i))
        .unwrap_or(base.len());
    format!("{}{}", &base[..origin_end], url)
}

#[async_trait]
impl NetworkFeed for ReplayHarness {
    fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.page.network().clock())
    }

    fn subscribe(&self) -> NetworkSubscription {
        self.page.network().subscribe()
    }

    async fn response_body(&self, request_id: &str) -> Result<Bytes, HarnessError> {
        self.page.network().response_body(request_id).await
    }
}

#[async_trait]
impl UiHarness for ReplayHarness {
    async fn navigate(&self, url: &str) -> Result<(), HarnessError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(HarnessError::Navigation {
                url: url.to_string(),
                reason: "unsupported scheme".to_string(),
            });
        }
        info!(url, "Navigating");
        self.page.load(url, self.script.elements.iter().cloned());
        sleep(Duration::from_millis(self.script.navigation_delay_ms)).await;

        for exchange in self
            .script
            .exchanges
            .iter()
            .filter(|e| e.trigger == Trigger::Navigate)
        {
            self.issue(exchange, None)?;
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), HarnessError> {
        let url = self.page.current_url().ok_or_else(|| HarnessError::Navigation {
            url: String::new(),
            reason: "nothing to reload".to_string(),
        })?;
        self.navigate(&url).await
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), HarnessError> {
        if !self.page.is_attached(selector) {
            return Err(HarnessError::ElementNotFound(selector.to_string()));
        }
        self.page.set_input(selector, text);
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), HarnessError> {
        if !self.page.is_attached(selector) {
            return Err(HarnessError::ElementNotFound(selector.to_string()));
        }
        debug!(selector, "Click");

        let prompt: Vec<String> = self
            .script
            .elements
            .iter()
            .filter_map(|e| self.page.input(e))
            .collect();
        let body = Bytes::from(json!({ "message": prompt.join("\n") }).to_string());

        let clicked = Trigger::Click(selector.to_string());
        for exchange in self.script.exchanges.iter().filter(|e| e.trigger == clicked) {
            let body = (exchange.method != "GET").then(|| body.clone());
            self.issue(exchange, body)?;
        }
        Ok(())
    }

    async fn wait_for_element(&self, selector: &str, timeout: Duration) -> bool {
        self.page.wait_for(selector, timeout).await
    }

    fn element_exists(&self, selector: &str) -> bool {
        self.page.is_attached(selector)
    }

    fn page_fetch(&self) -> Arc<dyn Fetch> {
        self.page.page_fetch()
    }

    fn set_page_fetch(&self, fetch: Arc<dyn Fetch>) -> Arc<dyn Fetch> {
        self.page.set_page_fetch(fetch)
    }

    fn frame_clock(&self) -> Arc<dyn FrameClock> {
        self.page.frames()
    }

    fn network_conditions(&self) -> Option<NetworkConditions> {
        self.script.network.clone()
    }
}
