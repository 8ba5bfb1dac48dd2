pub mod client;
pub mod prompts;
pub mod stream;

pub use client::{AssistantClient, LlmError};
pub use prompts::MessageTemplates;

use async_trait::async_trait;

/// What the dialogue engine reports while a run is streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogueEvent {
    RunStarted { run_id: String },
    TextDelta(String),
    RunCompleted,
    RunFailed(String),
}

/// Commands the orchestrator issues to the dialogue engine.
///
/// Each send starts a new streamed run; its events arrive on the channel the
/// engine was constructed with.
#[async_trait]
pub trait DialogueEngine: Send + Sync {
    async fn send_user_message(&self, text: &str) -> Result<(), LlmError>;

    async fn send_quiz_answer(&self, question: &str, answer: &str) -> Result<(), LlmError>;

    async fn send_interjection(&self, text: &str, follow_up_instruction: &str)
        -> Result<(), LlmError>;

    /// Best effort; succeeds when no run is active
    async fn cancel_current_run(&self) -> Result<(), LlmError>;
}
