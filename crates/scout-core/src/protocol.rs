//! Wire types for the backend's HTTP API.
//!
//! Request bodies are `Serialize`, response bodies `Deserialize`. Fields the
//! backend may omit carry `#[serde(default)]` so older or leaner servers still
//! decode.

use serde::{Deserialize, Deserializer, Serialize};

use crate::state::ChatMessage;

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub status: String,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "ok" | "healthy" | "up"
        )
    }
}

/// `POST /chat` body
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<&'a str>,
}

/// One NDJSON line of a streaming chat response.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkMessage {
    #[serde(default)]
    pub content: String,
}

/// `POST /research` body
#[derive(Debug, Serialize)]
pub struct ResearchRequest<'a> {
    pub query: &'a str,
}

/// `POST /research` response
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchCreated {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub status: Option<ResearchStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    #[serde(alias = "running", alias = "in_progress")]
    Active,
    #[serde(alias = "completed", alias = "complete")]
    Done,
    #[serde(alias = "error", alias = "failure")]
    Failed,
    /// Any status this client does not know; the step is still shown.
    #[serde(other)]
    Unknown,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Active => "active",
            StepStatus::Done => "done",
            StepStatus::Failed => "failed",
            StepStatus::Unknown => "unknown",
        }
    }
}

/// One stage report from the research pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    pub key: String,
    pub status: StepStatus,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The triple a step is deduplicated by.
pub type StepIdentity = (String, StepStatus, String);

impl PipelineStep {
    pub fn new(key: impl Into<String>, status: StepStatus, detail: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status,
            detail: detail.into(),
            data: None,
        }
    }

    pub fn identity(&self) -> StepIdentity {
        (self.key.clone(), self.status, self.detail.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStatus {
    #[serde(alias = "queued")]
    Pending,
    #[serde(alias = "active", alias = "in_progress")]
    Running,
    #[serde(alias = "complete", alias = "done")]
    Completed,
    #[serde(alias = "error")]
    Failed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl ResearchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResearchStatus::Completed | ResearchStatus::Failed | ResearchStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Pending => "pending",
            ResearchStatus::Running => "running",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
            ResearchStatus::Cancelled => "cancelled",
            ResearchStatus::Unknown => "unknown",
        }
    }
}

/// `GET /research/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchJob {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub query: String,
    pub status: ResearchStatus,
    #[serde(default)]
    pub steps: Vec<PipelineStep>,
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// An entry of `GET /research?limit=`
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchSummary {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    #[serde(default)]
    pub query: String,
    pub status: ResearchStatus,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// The listing endpoint answers either with a bare array or a wrapper object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ResearchListing {
    Bare(Vec<ResearchSummary>),
    Items { items: Vec<ResearchSummary> },
    Research { research: Vec<ResearchSummary> },
}

impl ResearchListing {
    pub fn into_vec(self) -> Vec<ResearchSummary> {
        match self {
            ResearchListing::Bare(v) => v,
            ResearchListing::Items { items } => items,
            ResearchListing::Research { research } => research,
        }
    }
}

/// A parsed event from either a chat (NDJSON) or research (SSE) stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Token text for the current assistant message.
    Delta(String),
    /// The chat turn finished.
    Done,
    /// A research pipeline stage report.
    Step(PipelineStep),
    /// The research run finished; carries the final report when the backend sends one.
    Complete { report: Option<String> },
    /// The stream terminated with a failure.
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done | StreamEvent::Complete { .. } | StreamEvent::Error(_)
        )
    }
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_omits_unset_model() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ChatRequest {
            messages: &messages,
            stream: true,
            model: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
        );
    }

    #[test]
    fn step_status_accepts_aliases() {
        let step: PipelineStep =
            serde_json::from_str(r#"{"key":"search","status":"running"}"#).unwrap();
        assert_eq!(step.status, StepStatus::Active);
        assert_eq!(step.detail, "");
        assert!(step.data.is_none());
    }

    #[test]
    fn job_keeps_steps_with_unfamiliar_status() {
        let job: ResearchJob = serde_json::from_str(
            r#"{"id":"j","status":"completed","steps":[
                {"key":"fetch","status":"failed","detail":"timeout"},
                {"key":"rank","status":"skipped"},
                {"key":"write","status":"done"}
            ]}"#,
        )
        .unwrap();
        let statuses: Vec<_> = job.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Failed, StepStatus::Unknown, StepStatus::Done]
        );
    }

    #[test]
    fn job_accepts_numeric_id_and_unknown_status() {
        let job: ResearchJob =
            serde_json::from_str(r#"{"id": 42, "status": "paused"}"#).unwrap();
        assert_eq!(job.id, "42");
        assert_eq!(job.status, ResearchStatus::Unknown);
        assert!(!job.status.is_terminal());
    }

    #[test]
    fn listing_accepts_wrapped_and_bare_forms() {
        let bare: ResearchListing =
            serde_json::from_str(r#"[{"id":"a","status":"completed"}]"#).unwrap();
        assert_eq!(bare.into_vec().len(), 1);

        let wrapped: ResearchListing = serde_json::from_str(
            r#"{"items":[{"id":"a","status":"done"},{"id":"b","status":"pending"}]}"#,
        )
        .unwrap();
        let items = wrapped.into_vec();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, ResearchStatus::Completed);
    }

    #[test]
    fn health_status_variants() {
        assert!(Health { status: "OK".into() }.is_ok());
        assert!(!Health { status: "degraded".into() }.is_ok());
    }
}
