//! Finance Query Orchestrator
//!
//! Answers natural-language financial questions by routing them through
//! specialized analysis agents and assembling one audit-styled report:
//! - Classifies intent from an ordered pattern table (generative fallback)
//! - Plans one task per required agent, gated by human approval for actions
//! - Builds one immutable baseline snapshot shared by every agent
//! - Executes agents concurrently with failure isolation and a deadline
//! - Synthesizes a sectioned report with a reproducible certification score
//!
//! PIPELINE:
//! QUERY → CLASSIFY → PLAN → APPROVAL? → SNAPSHOT → EXECUTE → SYNTHESIZE → FOLLOW-UPS

pub mod agent;
pub mod api;
pub mod approval;
pub mod audit;
pub mod classifier;
pub mod completion;
pub mod config;
pub mod error;
pub mod execution;
pub mod followup;
pub mod gemini;
pub mod models;
pub mod planner;
pub mod policy;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod synthesis;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use classifier::IntentClassifier;
pub use config::OrchestratorConfig;
pub use models::*;
