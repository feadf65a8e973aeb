//! HTTP client for a running server

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::FetchError;
use crate::reconcile::SessionSource;
use crate::session::{CreateRequest, SessionId, SessionSummary};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct InterruptBody {
    delivered: bool,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    /// Bound on listings, which run on every poll
    request_timeout: Duration,
    /// Bound on create/kill/interrupt; these wait on server-side git and
    /// process work
    mutation_timeout: Option<Duration>,
}

impl ApiClient {
    /// Listings are bounded by `timeout`; mutations are unbounded until
    /// [`with_mutation_timeout`](Self::with_mutation_timeout) sets a limit
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: timeout,
            mutation_timeout: None,
        })
    }

    pub fn with_mutation_timeout(mut self, timeout: Duration) -> Self {
        self.mutation_timeout = Some(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL of a session's terminal stream
    pub fn terminal_url(&self, id: &SessionId) -> String {
        format!("{}/ws/{}", self.ws_base(), id)
    }

    fn ws_base(&self) -> String {
        if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn mutation(&self, request: RequestBuilder) -> RequestBuilder {
        match self.mutation_timeout {
            Some(timeout) => request.timeout(timeout),
            None => request,
        }
    }

    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<SessionSummary>, FetchError> {
        let response = self
            .http
            .get(self.url("/api/sessions"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create(&self, request: &CreateRequest) -> Result<SessionSummary, FetchError> {
        let response = self
            .mutation(self.http.post(self.url("/api/sessions/create")).json(request))
            .send()
            .await?;
        decode(response).await
    }

    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn kill(&self, id: &SessionId) -> Result<(), FetchError> {
        let response = self
            .mutation(
                self.http
                    .post(self.url("/api/sessions/kill"))
                    .json(&json!({ "sessionId": id })),
            )
            .send()
            .await?;
        decode::<serde_json::Value>(response).await.map(|_| ())
    }

    /// Returns whether a viewer was attached to receive the interrupt
    #[instrument(skip(self), fields(session = %id.short()))]
    pub async fn interrupt(&self, id: &SessionId) -> Result<bool, FetchError> {
        let response = self
            .mutation(self.http.post(self.url(&format!("/api/sessions/{}/interrupt", id))))
            .send()
            .await?;
        decode::<InterruptBody>(response).await.map(|b| b.delivered)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    debug!("Server returned {}: {}", status, message);

    Err(FetchError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Find a session by exact name (case-insensitive) or id prefix
pub fn find_session<'a>(sessions: &'a [SessionSummary], query: &str) -> Option<&'a SessionSummary> {
    let query = query.trim();
    if query.is_empty() {
        return None;
    }

    sessions
        .iter()
        .find(|s| s.name.eq_ignore_ascii_case(query))
        .or_else(|| {
            sessions
                .iter()
                .find(|s| s.id.to_string().starts_with(&query.to_lowercase()))
        })
}

#[async_trait]
impl SessionSource for ApiClient {
    async fn fetch(&self) -> Result<Vec<SessionSummary>, FetchError> {
        self.list().await
    }
}
