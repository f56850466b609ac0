use rapport_schema::{ConversationId, UserId};
use thiserror::Error;

/// Typed failures of the core. Most are expected outcomes the caller
/// branches on, not exceptional conditions.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown conversation: {0}")]
    SessionNotFound(ConversationId),

    #[error("no tracked relationship from {owner} to {related}")]
    RelationNotFound { owner: UserId, related: UserId },

    #[error("unknown user profile: {0}")]
    ProfileNotFound(UserId),

    #[error("unknown question: {0}")]
    QuestionNotFound(String),

    #[error("assessment already complete for user {0}")]
    AssessmentComplete(UserId),

    #[error("unknown personality item: {0}")]
    ItemNotFound(String),

    #[error("rating out of range: {0} (expected 1..=5)")]
    InvalidRating(u8),

    #[error("no responses recorded for user {0}")]
    NoData(UserId),

    #[error("no cached analysis for conversation: {0}")]
    ReportNotFound(ConversationId),

    #[error("collaborator failure: {0}")]
    Collaborator(String),

    #[error("collaborator call timed out after {0}s")]
    CollaboratorTimeout(u64),

    #[error("{task} analysis failed: {error}")]
    PartialFailure { task: &'static str, error: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
