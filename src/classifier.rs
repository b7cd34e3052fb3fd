//! Anomaly classification over the chat transport
//!
//! One completion per candidate record. The model is instructed to answer
//! with a single pipe-delimited line; `parse_verdict` reproduces that reply
//! contract exactly, including its strictness.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ReviewError, Result};
use crate::models::Verdict;
use crate::openrouter::{ChatApi, ChatMessage, ChatRequest};

/// System instruction for the classification call.
pub const CLASSIFIER_SYSTEM_PROMPT: &str = "You are a financial anomaly detection assistant.";

const CLASSIFIER_MAX_TOKENS: u32 = 300;

/// Categories the prompt instructs the model to choose from.
pub const ANOMALY_CATEGORIES: [&str; 6] = [
    "Inconsistent variations in outstanding balances",
    "Huge spike in outstanding balances",
    "Outstanding balances are in line with previous months",
    "Consistent increase or decrease in outstanding balances",
    "Spike threshold is greater than 10000",
    "Other",
];

/// Outcome of parsing one classifier reply. A malformed reply carries the
/// raw text and is never coerced into a default verdict.
#[derive(Debug, Clone, PartialEq)]
pub enum VerdictParse {
    Parsed(Verdict),
    Malformed { raw: String },
}

/// Parse the `Anomaly: <Yes/No> | <category> | <explanation>` reply shape.
///
/// The verdict token is the trimmed text after the first colon of field 1,
/// anomalous only when it equals exactly "Yes". Fields beyond the third are
/// ignored. Fewer than three fields, or a first field without a colon, is
/// malformed.
pub fn parse_verdict(reply: &str) -> VerdictParse {
    let parts: Vec<&str> = reply.split('|').collect();
    if parts.len() < 3 {
        return VerdictParse::Malformed {
            raw: reply.to_string(),
        };
    }

    let Some((_, verdict_token)) = parts[0].split_once(':') else {
        return VerdictParse::Malformed {
            raw: reply.to_string(),
        };
    };

    VerdictParse::Parsed(Verdict {
        is_anomaly: verdict_token.trim() == "Yes",
        category: parts[1].trim().to_string(),
        explanation: parts[2].trim().to_string(),
    })
}

/// LLM-backed anomaly classifier.
pub struct AnomalyClassifier {
    chat: Arc<dyn ChatApi>,
    model: String,
}

impl AnomalyClassifier {
    pub fn new(chat: Arc<dyn ChatApi>, model: String) -> Self {
        Self { chat, model }
    }

    /// Classify one rendered prompt into a verdict.
    ///
    /// No automatic retry: transport failures surface as classifier errors,
    /// unparseable replies as malformed-response errors.
    pub async fn classify(&self, prompt: &str) -> Result<Verdict> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT.to_string()),
                ChatMessage::user(prompt.to_string()),
            ],
            temperature: None,
            max_tokens: Some(CLASSIFIER_MAX_TOKENS),
            tools: None,
            tool_choice: None,
        };

        let reply = self.chat.complete(request).await?;
        let content = reply.content.unwrap_or_default();

        match parse_verdict(&content) {
            VerdictParse::Parsed(verdict) => {
                info!(
                    "Classifier verdict: anomaly={} category={}",
                    verdict.is_anomaly, verdict.category
                );
                Ok(verdict)
            }
            VerdictParse::Malformed { raw } => {
                warn!("Classifier reply did not match the pipe-delimited contract");
                Err(ReviewError::MalformedResponse(raw))
            }
        }
    }
}
