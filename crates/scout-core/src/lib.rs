pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod reconciler;
pub mod state;
pub mod stream;
pub mod view;

// Re-export main types for convenience
pub use client::{ApiClient, PollPolicy};
pub use config::Config;
pub use error::ClientError;
pub use protocol::{
    Health, PipelineStep, ResearchCreated, ResearchJob, ResearchStatus, ResearchSummary,
    StepStatus, StreamEvent,
};
pub use reconciler::{Phase, Reconciler, RequestId, StreamKind, Transition};
pub use state::{ChatMessage, ChatRole, Transcript};
pub use stream::EventStream;
pub use view::{Theme, View};
