//! Action selection for confirmed anomalies
//!
//! A second model pass decides the remediation. The model may invoke one
//! lookup tool; its payload is appended to the prompt context for a single
//! follow-up completion. The final reply maps onto the closed action set by
//! exact label match, and unmatched text is `NoActionTaken`, never an error.

use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{ReviewError, Result};
use crate::models::{ActionDecision, ReconciliationRecord, Verdict};
use crate::openrouter::{ChatApi, ChatMessage, ChatRequest};
use crate::tools::{parse_query_argument, tool_specs, ToolKind};

/// System instruction for both action-selection calls.
pub const ACTION_SYSTEM_PROMPT: &str =
    "You are an AI agent responsible for deciding actions based on anomalies.";

const ACTION_MAX_TOKENS: u32 = 300;

/// Map a final model reply onto the closed action set.
///
/// Exact match after trimming. A verbose or rephrased reply lands on
/// `NoActionTaken`; prompt wording is the mitigation, not fuzzy matching.
pub fn map_action_label(reply: &str) -> ActionDecision {
    match reply.trim() {
        "Update System A" => ActionDecision::UpdateSystemA,
        "Update System B" => ActionDecision::UpdateSystemB,
        "Send Email" => ActionDecision::SendEmail,
        "Create SR Ticket" => ActionDecision::RaiseServiceTicket,
        _ => ActionDecision::NoActionTaken,
    }
}

fn build_action_prompt(verdict: &Verdict, record: &ReconciliationRecord) -> String {
    format!(
        r#"An anomaly was detected for account {} (company {}): {}.
Decide any one of the following appropriate action from:
- "Update System A"
- "Update System B"
- "Send Email"
- "Create SR Ticket"

Use the supplied tools to fetch additional data.
Reply with the chosen action label only."#,
        record.account, record.company_number, verdict.explanation
    )
}

/// Tool-calling remediation selector.
pub struct ActionSelector {
    chat: Arc<dyn ChatApi>,
    /// Model offered the tool set on the first pass.
    action_model: String,
    /// Model answering the follow-up completion once tool data is in hand.
    followup_model: String,
}

impl ActionSelector {
    pub fn new(chat: Arc<dyn ChatApi>, action_model: String, followup_model: String) -> Self {
        Self {
            chat,
            action_model,
            followup_model,
        }
    }

    /// Decide a remediation for a confirmed anomaly. Callers only invoke
    /// this for anomalous verdicts; the workflow enforces that boundary.
    pub async fn select_action(
        &self,
        verdict: &Verdict,
        record: &ReconciliationRecord,
    ) -> Result<ActionDecision> {
        let mut prompt = build_action_prompt(verdict, record);

        let first = ChatRequest {
            model: self.action_model.clone(),
            messages: vec![
                ChatMessage::system(ACTION_SYSTEM_PROMPT.to_string()),
                ChatMessage::user(prompt.clone()),
            ],
            temperature: Some(0.0),
            max_tokens: Some(ACTION_MAX_TOKENS),
            tools: Some(tool_specs()),
            tool_choice: Some("auto".to_string()),
        };

        let reply = self.chat.complete(first).await?;

        let final_text = if let Some(call) = reply.tool_call {
            let kind = ToolKind::parse(&call.name).ok_or_else(|| {
                ReviewError::MalformedResponse(format!(
                    "Model requested unknown tool: {}",
                    call.name
                ))
            })?;
            let query = parse_query_argument(&call.arguments)?;

            info!("Executing tool {} for query '{}'", kind.name(), query);
            let payload = kind.execute(&query);

            prompt.push_str(&format!(
                "\nAdditional data received: {}",
                serde_json::to_string_pretty(&payload)?
            ));

            let followup = ChatRequest {
                model: self.followup_model.clone(),
                messages: vec![
                    ChatMessage::system(ACTION_SYSTEM_PROMPT.to_string()),
                    ChatMessage::user(prompt),
                ],
                temperature: Some(0.0),
                max_tokens: None,
                tools: None,
                tool_choice: None,
            };

            self.chat
                .complete(followup)
                .await?
                .content
                .unwrap_or_default()
        } else {
            reply.content.unwrap_or_default()
        };

        let decision = map_action_label(&final_text);
        if decision == ActionDecision::NoActionTaken && !final_text.trim().is_empty() {
            warn!(
                "Action reply did not match a known label: {}",
                final_text.trim()
            );
        }

        info!("Action decision: {}", decision);
        Ok(decision)
    }
}
