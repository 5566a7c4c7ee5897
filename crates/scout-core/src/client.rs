use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::ClientError;
use crate::protocol::{
    ChatChunk, ChatRequest, Health, ResearchCreated, ResearchJob, ResearchListing,
    ResearchRequest, ResearchStatus, ResearchSummary, StreamEvent,
};
use crate::state::ChatMessage;
use crate::stream::{chat_events, research_event, EventStream, SseDecoder};

type Result<T> = std::result::Result<T, ClientError>;

/// How the research fallback polls `GET /research/{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 150,
        }
    }
}

/// HTTP client for the chat / research backend.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    model: Option<String>,
    poll: PollPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let parsed = Url::parse(trimmed).map_err(|e| ClientError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: format!("unsupported scheme {:?}", parsed.scheme()),
            });
        }

        Ok(Self {
            client: Client::new(),
            base_url: trimmed.to_string(),
            model: None,
            poll: PollPolicy::default(),
        })
    }

    /// Model name sent with chat requests. `None` lets the backend choose.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub async fn health(&self) -> Result<Health> {
        let url = self.url("/health");
        let response = self.send(&url, self.client.get(&url)).await?;
        decode(&url, response).await
    }

    /// `POST /chat` with `stream: true`. The returned stream yields deltas
    /// until `done` or `error`; dropping it closes the connection.
    pub async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<EventStream> {
        let url = self.url("/chat");
        let body = ChatRequest {
            messages,
            stream: true,
            model: self.model.as_deref(),
        };
        let response = self.send(&url, self.client.post(&url).json(&body)).await?;
        info!(messages = messages.len(), "chat stream opened");
        Ok(Box::pin(chat_events(response.bytes_stream())))
    }

    /// Non-streaming chat: the whole reply in one response.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<ChatMessage> {
        let url = self.url("/chat");
        let body = ChatRequest {
            messages,
            stream: false,
            model: self.model.as_deref(),
        };
        let response = self.send(&url, self.client.post(&url).json(&body)).await?;
        let chunk: ChatChunk = decode(&url, response).await?;
        if let Some(error) = chunk.error {
            return Err(ClientError::Backend(error));
        }
        let content = chunk.message.map(|m| m.content).unwrap_or_default();
        Ok(ChatMessage::assistant(content))
    }

    pub async fn start_research(&self, query: &str) -> Result<ResearchCreated> {
        let url = self.url("/research");
        let response = self
            .send(&url, self.client.post(&url).json(&ResearchRequest { query }))
            .await?;
        let created: ResearchCreated = decode(&url, response).await?;
        info!(id = %created.id, "research started");
        Ok(created)
    }

    pub async fn get_research(&self, id: &str) -> Result<ResearchJob> {
        let url = self.url(&format!("/research/{id}"));
        let response = self.send(&url, self.client.get(&url)).await?;
        decode(&url, response).await
    }

    pub async fn delete_research(&self, id: &str) -> Result<()> {
        let url = self.url(&format!("/research/{id}"));
        self.send(&url, self.client.delete(&url)).await?;
        info!(%id, "research deleted");
        Ok(())
    }

    pub async fn list_research(&self, limit: usize) -> Result<Vec<ResearchSummary>> {
        let url = self.url("/research");
        let response = self
            .send(&url, self.client.get(&url).query(&[("limit", limit)]))
            .await?;
        let listing: ResearchListing = decode(&url, response).await?;
        Ok(listing.into_vec())
    }

    /// Follow a research run's progress.
    ///
    /// Reads the SSE stream at `/research/{id}/stream`. If it cannot be opened,
    /// breaks, or ends before a terminal event, falls back to polling
    /// `GET /research/{id}` until the job is terminal. The stream is lazy:
    /// nothing is requested until it is first polled.
    pub fn follow_research(&self, id: &str) -> EventStream {
        let client = self.clone();
        let id = id.to_string();

        Box::pin(async_stream::stream! {
            let url = client.url(&format!("/research/{id}/stream"));
            let request = client.client.get(&url).header(ACCEPT, "text/event-stream");
            let mut finished = false;

            match client.send(&url, request).await {
                Ok(response) => {
                    debug!(%id, "research event stream opened");
                    let mut decoder = SseDecoder::new();
                    let mut body = response.bytes_stream();

                    'read: while let Some(chunk) = body.next().await {
                        let chunk = match chunk {
                            Ok(b) => b,
                            Err(e) => {
                                warn!(%id, error = %e, "research stream broke");
                                break 'read;
                            }
                        };
                        for frame in decoder.feed(&chunk) {
                            if let Some(event) = research_event(&frame) {
                                let terminal = event.is_terminal();
                                yield event;
                                if terminal {
                                    finished = true;
                                    break 'read;
                                }
                            }
                        }
                    }
                    if !finished {
                        warn!(
                            %id,
                            last_event_id = ?decoder.last_event_id(),
                            "research stream ended early"
                        );
                    }
                }
                Err(e) => warn!(%id, error = %e, "research stream unavailable"),
            }

            if !finished {
                info!(%id, "falling back to polling");
                let mut poll = client.poll_research(id.clone());
                while let Some(event) = poll.next().await {
                    yield event;
                }
            }
        })
    }

    /// Poll `GET /research/{id}` until the job is terminal, emitting its steps
    /// each round (the reconciler deduplicates repeats).
    pub fn poll_research(&self, id: String) -> EventStream {
        let client = self.clone();

        Box::pin(async_stream::stream! {
            let mut attempts = 0u32;
            loop {
                attempts += 1;
                match client.get_research(&id).await {
                    Ok(job) => {
                        debug!(
                            %id,
                            status = job.status.as_str(),
                            steps = job.steps.len(),
                            "polled research"
                        );
                        let status = job.status;
                        for step in job.steps {
                            yield StreamEvent::Step(step);
                        }
                        match status {
                            ResearchStatus::Completed => {
                                yield StreamEvent::Complete { report: job.report };
                                return;
                            }
                            ResearchStatus::Failed => {
                                yield StreamEvent::Error(
                                    job.error.unwrap_or_else(|| "research failed".to_string()),
                                );
                                return;
                            }
                            ResearchStatus::Cancelled => {
                                yield StreamEvent::Error("research was cancelled".to_string());
                                return;
                            }
                            _ => {}
                        }
                    }
                    Err(e) if e.is_transient() => {
                        warn!(%id, attempt = attempts, error = %e, "research poll failed");
                    }
                    Err(e) if e.is_not_found() => {
                        yield StreamEvent::Error(format!("research {id} not found (404)"));
                        return;
                    }
                    Err(e) => {
                        yield StreamEvent::Error(e.to_string());
                        return;
                    }
                }

                if attempts >= client.poll.max_attempts {
                    yield StreamEvent::Error(format!(
                        "gave up waiting for research {id} after {attempts} polls"
                    ));
                    return;
                }
                tokio::time::sleep(client.poll.interval).await;
            }
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|source| ClientError::Http {
            url: url.to_string(),
            source,
        })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }

        Ok(response)
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T> {
    let text = response.text().await.map_err(|source| ClientError::Http {
        url: url.to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ClientError::Decode {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let client = ApiClient::new(" http://localhost:8000/ ").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url("/health"), "http://localhost:8000/health");
    }

    #[test]
    fn rejects_non_http_base_urls() {
        assert!(matches!(
            ApiClient::new("ftp://example.com"),
            Err(ClientError::InvalidBaseUrl { .. })
        ));
        assert!(ApiClient::new("not a url").is_err());
    }
}
