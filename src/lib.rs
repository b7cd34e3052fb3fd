//! Reconciliation Review Orchestrator
//!
//! An anomaly-review service for GL/IHub balance reconciliation that:
//! - Looks up the candidate's account history by its composite key
//! - Classifies the break with an LLM over historical context
//! - Picks a remediation via tool-calling, or parks the session for a reviewer
//! - Logs every terminal verdict to an append-only prediction log
//!
//! SESSION LOOP:
//! SUBMIT → LOAD HISTORY → CLASSIFY → { NO ANOMALY | DECIDE | AWAIT REVIEWER } → LOG
//!
//! The pipe-delimited classifier reply and the exact action labels are a
//! deliberately fragile contract; anything off-shape fails loudly as
//! `MalformedResponse` instead of being guessed at.

pub mod actions;
pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod ingest;
pub mod models;
pub mod openrouter;
pub mod prompt;
pub mod sessions;
pub mod tools;
pub mod workflow;

pub use error::{Result, ReviewError};

// Re-export common types
pub use models::*;
pub use workflow::{DecisionMode, ReviewWorkflow};
