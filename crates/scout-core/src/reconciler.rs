//! Folds stream events into UI state.
//!
//! The reconciler owns the chat transcript and the research pipeline view.
//! Each stream it opens is identified by a [`RequestId`]; events are applied
//! only while their id is the active one, so a late event from a cancelled
//! or superseded connection can never touch the current message.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::protocol::{PipelineStep, ResearchJob, ResearchStatus, StepIdentity, StreamEvent};
use crate::state::{ChatMessage, Transcript};

/// Ticket for one opened stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a stream is feeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Chat,
    Research,
}

/// Lifecycle of the most recent stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Streaming { request: RequestId, kind: StreamKind },
    Completed,
    Failed(String),
    Cancelled,
}

/// The single state change an event caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Token text appended to the current assistant message.
    Appended,
    /// A new pipeline step was recorded.
    StepAdded,
    /// The step was already present.
    StepDuplicate,
    /// The stream finished successfully.
    Finished,
    /// The stream finished with an error.
    Failed,
    /// Stale request id, terminal phase, or an event that does not belong to this kind of stream.
    Ignored,
}

#[derive(Debug, Default)]
pub struct Reconciler {
    transcript: Transcript,
    steps: Vec<PipelineStep>,
    seen_steps: HashSet<StepIdentity>,
    research_query: Option<String>,
    research_id: Option<String>,
    report: Option<String>,
    phase: Phase,
    last_issued: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    // Accessors

    pub fn messages(&self) -> &[ChatMessage] {
        self.transcript.messages()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    pub fn research_query(&self) -> Option<&str> {
        self.research_query.as_deref()
    }

    pub fn research_id(&self) -> Option<&str> {
        self.research_id.as_deref()
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            Phase::Failed(message) => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, Phase::Streaming { .. })
    }

    pub fn active_request(&self) -> Option<RequestId> {
        match self.phase {
            Phase::Streaming { request, .. } => Some(request),
            _ => None,
        }
    }

    // Opening streams

    /// Start a chat turn: records the user message and an empty assistant
    /// message that subsequent deltas fill in.
    pub fn begin_chat(&mut self, user_text: impl Into<String>) -> RequestId {
        self.cancel();
        self.transcript.push(ChatMessage::user(user_text));
        self.transcript.push(ChatMessage::assistant(""));
        self.open(StreamKind::Chat)
    }

    /// Start a fresh research run.
    pub fn begin_research(&mut self, query: impl Into<String>) -> RequestId {
        self.cancel();
        self.reset_pipeline();
        self.research_query = Some(query.into());
        self.open(StreamKind::Research)
    }

    /// Record the backend id assigned to the run `request` is following.
    pub fn attach_research_id(&mut self, request: RequestId, id: impl Into<String>) -> bool {
        if self.active_request() != Some(request) {
            return false;
        }
        self.research_id = Some(id.into());
        true
    }

    /// Load a stored job. Returns a ticket to follow its stream when the job
    /// is still running, `None` when it is already terminal.
    pub fn resume_research(&mut self, job: &ResearchJob) -> Option<RequestId> {
        self.cancel();
        self.reset_pipeline();
        self.research_query = Some(job.query.clone());
        self.research_id = Some(job.id.clone());
        for step in &job.steps {
            self.record_step(step.clone());
        }
        self.report = job.report.clone();

        match job.status {
            ResearchStatus::Completed => {
                self.phase = Phase::Completed;
                None
            }
            ResearchStatus::Failed => {
                self.phase = Phase::Failed(
                    job.error
                        .clone()
                        .unwrap_or_else(|| "research failed".to_string()),
                );
                None
            }
            ResearchStatus::Cancelled => {
                self.phase = Phase::Cancelled;
                None
            }
            ResearchStatus::Pending | ResearchStatus::Running | ResearchStatus::Unknown => {
                Some(self.open(StreamKind::Research))
            }
        }
    }

    /// Close the active stream. Late events for it are ignored from now on.
    pub fn cancel(&mut self) -> bool {
        let Phase::Streaming { request, kind } = self.phase else {
            return false;
        };
        info!(%request, ?kind, "stream cancelled");
        if kind == StreamKind::Chat {
            self.transcript.drop_empty_tail();
        }
        self.phase = Phase::Cancelled;
        true
    }

    /// Forget the chat transcript. Cancels an active chat stream.
    pub fn clear_chat(&mut self) {
        if matches!(self.phase, Phase::Streaming { kind: StreamKind::Chat, .. }) {
            self.cancel();
        }
        self.transcript.clear();
    }

    // Applying events

    pub fn apply(&mut self, request: RequestId, event: StreamEvent) -> Transition {
        let Phase::Streaming { request: active, kind } = self.phase else {
            debug!(%request, "event after stream ended");
            return Transition::Ignored;
        };
        if active != request {
            debug!(%request, %active, "event from stale stream");
            return Transition::Ignored;
        }

        match (kind, event) {
            (StreamKind::Chat, StreamEvent::Delta(text)) => {
                match self.transcript.last_assistant_mut() {
                    Some(message) => {
                        message.content.push_str(&text);
                        Transition::Appended
                    }
                    None => Transition::Ignored,
                }
            }
            (StreamKind::Research, StreamEvent::Step(step)) => {
                if self.record_step(step) {
                    Transition::StepAdded
                } else {
                    Transition::StepDuplicate
                }
            }
            (StreamKind::Chat, StreamEvent::Done) => {
                self.transcript.drop_empty_tail();
                self.phase = Phase::Completed;
                Transition::Finished
            }
            (StreamKind::Research, StreamEvent::Complete { report }) => {
                if report.is_some() {
                    self.report = report;
                }
                info!(%request, steps = self.steps.len(), "research complete");
                self.phase = Phase::Completed;
                Transition::Finished
            }
            (kind, StreamEvent::Error(message)) => {
                if kind == StreamKind::Chat {
                    if let Some(reply) = self.transcript.last_assistant_mut() {
                        reply.error = Some(message.clone());
                    }
                }
                info!(%request, error = %message, "stream failed");
                self.phase = Phase::Failed(message);
                Transition::Failed
            }
            (kind, event) => {
                debug!(?kind, ?event, "event does not apply to this stream");
                Transition::Ignored
            }
        }
    }

    fn open(&mut self, kind: StreamKind) -> RequestId {
        self.last_issued += 1;
        let request = RequestId(self.last_issued);
        self.phase = Phase::Streaming { request, kind };
        debug!(%request, ?kind, "stream opened");
        request
    }

    fn reset_pipeline(&mut self) {
        self.steps.clear();
        self.seen_steps.clear();
        self.report = None;
        self.research_id = None;
        self.research_query = None;
    }

    fn record_step(&mut self, step: PipelineStep) -> bool {
        if !self.seen_steps.insert(step.identity()) {
            return false;
        }
        self.steps.push(step);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::StepStatus;
    use crate::state::ChatRole;
    use crate::stream::NdjsonDecoder;

    fn delta(text: &str) -> StreamEvent {
        StreamEvent::Delta(text.to_string())
    }

    #[test]
    fn deltas_accumulate_into_last_assistant_message() {
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("hello?");
        assert!(rec.is_streaming());

        assert_eq!(rec.apply(req, delta("Hi")), Transition::Appended);
        assert_eq!(rec.apply(req, delta(" there")), Transition::Appended);
        assert_eq!(rec.apply(req, StreamEvent::Done), Transition::Finished);

        assert_eq!(
            rec.messages(),
            &[ChatMessage::user("hello?"), ChatMessage::assistant("Hi there")]
        );
        assert_eq!(rec.phase(), &Phase::Completed);
        assert_eq!(rec.apply(req, delta("late")), Transition::Ignored);
    }

    #[test]
    fn ndjson_with_malformed_lines_reconciles_valid_content_in_order() {
        let body = "{\"message\":{\"content\":\"one \"}}\n\
                    garbage\n\
                    {\"message\":{\"content\":\"two \"}}\n\
                    {\"message\":{\"cont\n\
                    {\"message\":{\"content\":\"three\"}}\n\
                    {\"done\":true}\n";
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("count");

        let mut decoder = NdjsonDecoder::new();
        for chunk in body.as_bytes().chunks(7) {
            for event in decoder.feed(chunk) {
                rec.apply(req, event);
            }
        }

        assert_eq!(rec.messages()[1].content, "one two three");
        assert_eq!(rec.phase(), &Phase::Completed);
    }

    #[test]
    fn reopening_after_cancel_never_touches_previous_message() {
        let mut rec = Reconciler::new();
        let first = rec.begin_chat("first");
        rec.apply(first, delta("partial"));
        assert!(rec.cancel());

        let second = rec.begin_chat("second");
        assert_ne!(first, second);
        assert_eq!(rec.apply(first, delta(" stale")), Transition::Ignored);
        assert_eq!(rec.apply(second, delta("fresh")), Transition::Appended);

        let messages = rec.messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "partial");
        assert_eq!(messages[3].content, "fresh");
    }

    #[test]
    fn cancel_without_content_drops_placeholder() {
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("anyone?");
        rec.cancel();
        assert_eq!(rec.messages(), &[ChatMessage::user("anyone?")]);
        assert_eq!(rec.phase(), &Phase::Cancelled);
        assert_eq!(rec.apply(req, StreamEvent::Done), Transition::Ignored);
    }

    #[test]
    fn begin_chat_supersedes_active_stream() {
        let mut rec = Reconciler::new();
        let first = rec.begin_chat("a");
        rec.apply(first, delta("x"));
        let second = rec.begin_chat("b");

        assert_eq!(rec.active_request(), Some(second));
        assert_eq!(rec.apply(first, delta("y")), Transition::Ignored);
        assert_eq!(rec.messages()[1].content, "x");
    }

    #[test]
    fn chat_error_is_visible_inline() {
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("q");
        assert_eq!(
            rec.apply(req, StreamEvent::Error("backend down".into())),
            Transition::Failed
        );
        assert_eq!(rec.messages()[1].content, "");
        assert_eq!(rec.messages()[1].error.as_deref(), Some("backend down"));
        assert_eq!(rec.error(), Some("backend down"));

        let req = rec.begin_chat("q2");
        rec.apply(req, delta("half"));
        rec.apply(req, StreamEvent::Error("cut off".into()));
        assert_eq!(rec.messages()[3].content, "half");
        assert_eq!(rec.messages()[3].error.as_deref(), Some("cut off"));
    }

    #[test]
    fn turn_after_error_does_not_send_error_text() {
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("q1");
        rec.apply(req, StreamEvent::Error("backend down".into()));
        rec.begin_chat("q2");

        assert_eq!(
            rec.transcript().request_history(),
            vec![ChatMessage::user("q1"), ChatMessage::user("q2")]
        );
        assert_eq!(rec.messages().len(), 4);
    }

    #[test]
    fn error_after_failure_is_ignored() {
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("q");
        rec.apply(req, StreamEvent::Error("connection refused".into()));
        assert!(rec.messages()[1].is_failed());
        assert_eq!(rec.apply(req, StreamEvent::Error("again".into())), Transition::Ignored);
        assert_eq!(rec.messages()[1].error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn duplicate_steps_are_deduplicated() {
        let mut rec = Reconciler::new();
        let req = rec.begin_research("rust async");

        let searching = PipelineStep::new("search", StepStatus::Active, "3 sources");
        assert_eq!(rec.apply(req, StreamEvent::Step(searching.clone())), Transition::StepAdded);
        assert_eq!(rec.apply(req, StreamEvent::Step(searching.clone())), Transition::StepDuplicate);

        let mut with_data = searching.clone();
        with_data.data = Some(serde_json::json!({"n": 1}));
        assert_eq!(rec.apply(req, StreamEvent::Step(with_data)), Transition::StepDuplicate);

        let finished = PipelineStep::new("search", StepStatus::Done, "3 sources");
        assert_eq!(rec.apply(req, StreamEvent::Step(finished)), Transition::StepAdded);
        let other_detail = PipelineStep::new("search", StepStatus::Done, "4 sources");
        assert_eq!(rec.apply(req, StreamEvent::Step(other_detail)), Transition::StepAdded);

        assert_eq!(rec.steps().len(), 3);
    }

    #[test]
    fn research_complete_sets_report() {
        let mut rec = Reconciler::new();
        let req = rec.begin_research("q");
        assert!(rec.attach_research_id(req, "job-1"));
        rec.apply(req, StreamEvent::Step(PipelineStep::new("plan", StepStatus::Done, "")));
        assert_eq!(
            rec.apply(req, StreamEvent::Complete { report: Some("# Findings".into()) }),
            Transition::Finished
        );
        assert_eq!(rec.report(), Some("# Findings"));
        assert_eq!(rec.research_id(), Some("job-1"));
        assert_eq!(rec.phase(), &Phase::Completed);
    }

    #[test]
    fn new_research_run_resets_dedup_set() {
        let mut rec = Reconciler::new();
        let step = PipelineStep::new("plan", StepStatus::Active, "");
        let first = rec.begin_research("a");
        rec.apply(first, StreamEvent::Step(step.clone()));

        let second = rec.begin_research("b");
        assert!(rec.steps().is_empty());
        assert_eq!(rec.apply(second, StreamEvent::Step(step)), Transition::StepAdded);
        assert!(!rec.attach_research_id(first, "stale"));
    }

    #[test]
    fn events_for_the_other_stream_kind_are_ignored() {
        let mut rec = Reconciler::new();
        let req = rec.begin_research("q");
        assert_eq!(rec.apply(req, delta("token")), Transition::Ignored);
        assert_eq!(rec.apply(req, StreamEvent::Done), Transition::Ignored);
        assert!(rec.is_streaming());
        assert!(rec.messages().is_empty());
    }

    #[test]
    fn resume_terminal_job_does_not_open_stream() {
        let job: ResearchJob = serde_json::from_value(serde_json::json!({
            "id": "r1",
            "query": "history",
            "status": "completed",
            "steps": [
                {"key": "plan", "status": "done", "detail": ""},
                {"key": "plan", "status": "done", "detail": ""}
            ],
            "report": "done"
        }))
        .unwrap();

        let mut rec = Reconciler::new();
        assert!(rec.resume_research(&job).is_none());
        assert_eq!(rec.steps().len(), 1);
        assert_eq!(rec.report(), Some("done"));
        assert_eq!(rec.research_query(), Some("history"));
    }

    #[test]
    fn resume_running_job_follows_stream() {
        let job: ResearchJob = serde_json::from_value(serde_json::json!({
            "id": "r2",
            "status": "running",
            "steps": [{"key": "search", "status": "active", "detail": "x"}]
        }))
        .unwrap();

        let mut rec = Reconciler::new();
        let req = rec.resume_research(&job).expect("running job streams");
        assert_eq!(
            rec.apply(req, StreamEvent::Step(job.steps[0].clone())),
            Transition::StepDuplicate
        );
    }

    #[test]
    fn clear_chat_keeps_roles_consistent() {
        let mut rec = Reconciler::new();
        let req = rec.begin_chat("a");
        rec.clear_chat();
        assert!(rec.messages().is_empty());
        assert_eq!(rec.apply(req, delta("x")), Transition::Ignored);
        assert!(rec.messages().iter().all(|m| m.role != ChatRole::Assistant));
    }
}
