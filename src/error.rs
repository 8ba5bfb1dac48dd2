use crate::language::LanguageError;
use crate::llm::LlmError;
use crate::types::{InteractionState, Lane};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LectureError>;

#[derive(Error, Debug)]
pub enum LectureError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Language configuration error: {0}")]
    Language(#[from] LanguageError),

    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("{0} lane is no longer running")]
    LaneClosed(Lane),

    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: InteractionState,
    },
}
