//! Error types for the finance query orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Classification error: {0}")]
    ClassificationError(String),

    #[error("Planning error: {0}")]
    PlanningError(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Data store error: {0}")]
    DataStoreError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Synthesis error: {0}")]
    SynthesisError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
