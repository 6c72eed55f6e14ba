//! Browserless HTTP harness
//!
//! Drives a scenario's backend endpoint directly: "clicking send" posts the
//! filled prompt to `baseUrl + http.path` and streams the answer back through
//! the same page fetch slot and network feed a browser harness would expose.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use reqwest::{Client, Method};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::page::PageState;
use super::{HarnessError, NetworkConditions, NetworkFeed, UiHarness};
use crate::capture::{
    Fetch, FetchError, FetchRequest, FetchResponse, FrameClock, Headers, NetworkSubscription,
    ResponseBody,
};
use crate::models::{HttpEndpoint, Scenario};
use crate::utils::Clock;

/// Transport over a `reqwest` client; bodies are always streamed
#[derive(Clone)]
pub struct HttpFetch {
    client: Client,
    timeout_secs: u64,
}

impl HttpFetch {
    pub fn new() -> Result<Self> {
        Self::with_timeout(60)
    }

    /// Create client with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout_secs,
        })
    }

    fn map_error(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            FetchError::ConnectionRefused(url.to_string())
        } else if e.is_builder() {
            FetchError::InvalidUrl(url.to_string())
        } else {
            FetchError::RequestFailed(e.to_string())
        }
    }
}

#[async_trait]
impl Fetch for HttpFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!("Sending {} request to {}", request.method, request.url);
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| FetchError::RequestFailed(format!("Invalid HTTP method: {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_error(&request.url, e))?;

        let status = response.status();
        let mut headers = Headers::new();
        for (key, value) in response.headers() {
            if let Ok(v) = value.to_str() {
                headers.insert(key.as_str().to_lowercase(), v.to_string());
            }
        }
        debug!(
            "Response: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );

        let timeout_secs = self.timeout_secs;
        let body = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout_secs)
                } else {
                    FetchError::Body(e.to_string())
                }
            })
        });

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: ResponseBody::Stream(body.boxed()),
        })
    }
}

/// Harness posting prompts straight to a scenario's backend
pub struct HttpHarness {
    scenario: Scenario,
    endpoint: HttpEndpoint,
    page: PageState,
}

impl HttpHarness {
    pub fn new(
        scenario: &Scenario,
        timeout_secs: u64,
        conditions: Option<NetworkConditions>,
    ) -> Result<Self> {
        let transport = HttpFetch::with_timeout(timeout_secs)?;
        Self::with_transport(scenario, Arc::new(transport), conditions)
    }

    /// Harness over any transport
    pub fn with_transport(
        scenario: &Scenario,
        transport: Arc<dyn Fetch>,
        conditions: Option<NetworkConditions>,
    ) -> Result<Self> {
        let endpoint = scenario.http.clone().with_context(|| {
            format!(
                "Scenario '{}' has no http endpoint; the http harness needs one",
                scenario.name
            )
        })?;

        Ok(Self {
            scenario: scenario.clone(),
            endpoint,
            page: PageState::new(transport, conditions),
        })
    }

    pub fn page(&self) -> &PageState {
        &self.page
    }

    fn endpoint_url(&self) -> String {
        format!(
            "{}{}",
            self.scenario.base_url.trim_end_matches('/'),
            self.endpoint.path
        )
    }

    fn elements(&self) -> Vec<String> {
        let selectors = &self.scenario.selectors;
        let mut elements = vec![selectors.input.clone(), selectors.send.clone()];
        elements.extend(self.scenario.prepare.iter().cloned());
        elements
    }

    fn send_request(&self) -> FetchRequest {
        let prompt = self
            .page
            .input(&self.scenario.selectors.input)
            .unwrap_or_default();
        let mut body = Map::new();
        body.insert(self.endpoint.body_field.clone(), Value::String(prompt));

        FetchRequest::new(self.endpoint.method.clone(), self.endpoint_url())
            .header("content-type", "application/json")
            .header("accept", "text/event-stream, application/json")
            .body(Value::Object(body).to_string())
    }
}

#[async_trait]
impl NetworkFeed for HttpHarness {
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
impl UiHarness for HttpHarness {
    async fn navigate(&self, url: &str) -> Result<(), HarnessError> {
        info!(url, "Loading page");
        self.page.load(url, self.elements());

        let response = self
            .page
            .page_fetch()
            .fetch(FetchRequest::get(url))
            .await
            .map_err(|e| HarnessError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status;
        response.bytes().await?;

        if status >= 500 {
            return Err(HarnessError::Navigation {
                url: url.to_string(),
                reason: format!("status {status}"),
            });
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
        if selector != self.scenario.selectors.send {
            debug!(selector, "Click has no backend effect");
            return Ok(());
        }

        self.page.dispatch(
            self.send_request(),
            vec![self.scenario.selectors.assistant.clone()],
            Duration::ZERO,
        );
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
        self.page.conditions()
    }
}
