//! Environment-driven runtime settings
//!
//! Everything is captured once at startup; nothing is re-read mid-session.
//! The prompt template is an external, versioned resource loaded from disk
//! here and handed to the workflow as plain text.

use std::env;
use tracing::warn;

use crate::error::{ReviewError, Result};
use crate::openrouter::DEFAULT_BASE_URL;
use crate::workflow::DecisionMode;

pub const DEFAULT_TEMPLATE_PATH: &str = "config/anomaly_prompt.txt";

#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: String,
    pub base_url: String,
    /// Primary model: classification and the follow-up action completion.
    pub model: String,
    /// Model offered the tool set on the first action-selection pass.
    pub action_model: String,
    pub prompt_template: String,
    pub history_csv_path: Option<String>,
    pub decision_mode: DecisionMode,
    pub port: u16,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY").unwrap_or_else(|_| {
            warn!("OPENROUTER_API_KEY not set; live model calls will fail");
            String::new()
        });

        let base_url =
            env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let model = env::var("REVIEW_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());

        let action_model = env::var("ACTION_MODEL")
            .unwrap_or_else(|_| "mistralai/mistral-small-3.1-24b-instruct:free".to_string());

        let template_path =
            env::var("PROMPT_TEMPLATE_PATH").unwrap_or_else(|_| DEFAULT_TEMPLATE_PATH.to_string());
        let prompt_template = std::fs::read_to_string(&template_path).map_err(|e| {
            ReviewError::Template(format!(
                "Failed to read prompt template {}: {}",
                template_path, e
            ))
        })?;
        crate::prompt::ensure_placeholders(&prompt_template)?;

        let history_csv_path = env::var("HISTORY_CSV_PATH").ok();

        let decision_mode = parse_decision_mode(env::var("REVIEW_MODE").ok().as_deref());

        let port = parse_port(
            env::var("PORT")
                .or_else(|_| env::var("API_PORT"))
                .ok()
                .as_deref(),
        )?;

        Ok(Self {
            api_key,
            base_url,
            model,
            action_model,
            prompt_template,
            history_csv_path,
            decision_mode,
            port,
        })
    }
}

/// Parse REVIEW_MODE into a decision mode, defaulting to human review.
pub fn parse_decision_mode(value: Option<&str>) -> DecisionMode {
    match value.map(|v| v.trim().to_lowercase()).as_deref() {
        Some("auto") | Some("automated") => DecisionMode::Automated,
        Some("human") | Some("human_review") | None => DecisionMode::HumanReview,
        Some(other) => {
            warn!("Unknown REVIEW_MODE '{}', defaulting to human review", other);
            DecisionMode::HumanReview
        }
    }
}

fn parse_port(value: Option<&str>) -> Result<u16> {
    let raw = value.unwrap_or("8080");
    raw.parse()
        .map_err(|e| ReviewError::Config(format!("Invalid port '{}': {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_mode_defaults_to_human() {
        assert_eq!(parse_decision_mode(None), DecisionMode::HumanReview);
        assert_eq!(parse_decision_mode(Some("human")), DecisionMode::HumanReview);
        assert_eq!(parse_decision_mode(Some("nonsense")), DecisionMode::HumanReview);
    }

    #[test]
    fn decision_mode_recognizes_automated() {
        assert_eq!(parse_decision_mode(Some("auto")), DecisionMode::Automated);
        assert_eq!(parse_decision_mode(Some("Automated")), DecisionMode::Automated);
    }

    #[test]
    fn port_parses_with_default() {
        assert_eq!(parse_port(None).unwrap(), 8080);
        assert_eq!(parse_port(Some("9000")).unwrap(), 9000);
        assert!(parse_port(Some("not-a-port")).is_err());
    }
}
