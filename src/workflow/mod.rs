//! Review workflow orchestration
//!
//! Drives one candidate reconciliation record through the full pipeline:
//! load history, classify, then either close the session (no anomaly),
//! pick a remediation automatically, or park the session for a human
//! reviewer. Parked sessions survive across requests and are resumed by
//! [`ReviewWorkflow::resume`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::actions::ActionSelector;
use crate::classifier::AnomalyClassifier;
use crate::error::ReviewError;
use crate::history::HistoryStore;
use crate::models::{
    ActionDecision, HistoryQuery, ReconciliationRecord, ReviewSession, ReviewerAction, SessionPhase,
};
use crate::prompt;
use crate::sessions::SessionStore;
use crate::Result;

//
// ================= Terminal Messages =================
//

/// Shown when the classifier finds nothing wrong.
pub const MSG_NO_ANOMALY: &str = "No anomaly detected";

/// Shown after a reviewer sends the break over email.
pub const MSG_EMAIL_SENT: &str = "Email notification sent successfully!";

/// Shown after a reviewer raises a service request ticket.
pub const MSG_SR_RAISED: &str = "SR ticket raised successfully";

/// Shown after a reviewer kicks off a source/target adjustment.
pub const MSG_ADJUSTMENT: &str = "Source/target system adjustment initiated";

//
// ================= Decision Mode =================
//

/// How anomalous sessions get their remediation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    /// Park anomalous sessions until a reviewer submits a decision.
    HumanReview,
    /// Hand anomalous sessions straight to the action selector.
    Automated,
}

//
// ================= Review Workflow =================
//

/// Coordinates the history store, classifier, action selector and
/// session store for the lifetime of a review.
pub struct ReviewWorkflow {
    history: Arc<dyn HistoryStore>,
    sessions: Box<dyn SessionStore>,
    classifier: AnomalyClassifier,
    selector: ActionSelector,
    template: String,
    mode: DecisionMode,
}

impl ReviewWorkflow {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        sessions: Box<dyn SessionStore>,
        classifier: AnomalyClassifier,
        selector: ActionSelector,
        template: String,
        mode: DecisionMode,
    ) -> Self {
        Self {
            history,
            sessions,
            classifier,
            selector,
            template,
            mode,
        }
    }

    /// Run a candidate record through history lookup and classification.
    ///
    /// Returns the session in whatever state it ended up: `NoAnomaly`
    /// or `Resolved` sessions are final, `AwaitingDecision` sessions
    /// are saved and wait for [`resume`](Self::resume). The prediction
    /// log gains exactly one row per session, written at the terminal
    /// state and never while the session is parked.
    pub async fn submit(&self, record: ReconciliationRecord) -> Result<ReviewSession> {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let mut session = ReviewSession {
            session_id,
            record,
            historical_matches: Vec::new(),
            verdict: None,
            reviewer_action: ReviewerAction::None,
            terminal_message: None,
            phase: SessionPhase::LoadingHistory,
            trace: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        info!(
            session_id = %session_id,
            account = %session.record.account,
            company = %session.record.company_number,
            "Review session started"
        );

        // === LOAD HISTORY ===
        let key = HistoryQuery::from(&session.record);
        let mut matches = self.history.lookup(&key).await?;
        // Stores return rows in their own order; the prompt wants them
        // oldest first.
        matches.sort_by_key(|row| row.as_of_date);
        if matches.is_empty() {
            // First sighting of this key still gets classified, just
            // against an empty history section.
            debug!("No precedent for this account key");
        }
        session
            .trace
            .push(format!("LOAD: {} historical rows matched", matches.len()));
        session.historical_matches = matches;

        // === CLASSIFY ===
        session.phase = SessionPhase::Classifying;
        let prompt_text = prompt::render(
            &self.template,
            &session.historical_matches,
            &session.record,
        )?;
        let verdict = self.classifier.classify(&prompt_text).await?;
        session.trace.push(format!(
            "CLASSIFY: anomaly={} category={}",
            verdict.is_anomaly, verdict.category
        ));
        info!(
            session_id = %session_id,
            anomaly = verdict.is_anomaly,
            category = %verdict.category,
            "Classifier verdict received"
        );
        session.verdict = Some(verdict.clone());

        if !verdict.is_anomaly {
            // === NO ANOMALY ===
            session.phase = SessionPhase::NoAnomaly;
            session.terminal_message = Some(MSG_NO_ANOMALY.to_string());
            session.trace.push("COMPLETE: no anomaly".to_string());
            session.updated_at = Utc::now();

            self.history
                .append_prediction(&session.record, &verdict, "None")
                .await?;
            info!(session_id = %session_id, "Review complete: no anomaly");
            return Ok(session);
        }

        match self.mode {
            DecisionMode::Automated => {
                // === DECIDE ===
                session
                    .trace
                    .push("DECIDE: selecting remediation".to_string());
                let decision = self
                    .selector
                    .select_action(&verdict, &session.record)
                    .await?;
                session.phase = SessionPhase::Resolved;
                session.terminal_message = Some(automated_message(decision, &session.record));
                session.trace.push(format!("COMPLETE: {}", decision));
                session.updated_at = Utc::now();

                self.history
                    .append_prediction(&session.record, &verdict, &decision.to_string())
                    .await?;
                info!(
                    session_id = %session_id,
                    decision = %decision,
                    "Review complete: automated remediation"
                );
                Ok(session)
            }
            DecisionMode::HumanReview => {
                // === AWAIT ===
                session.phase = SessionPhase::AwaitingDecision;
                session
                    .trace
                    .push("AWAIT: parked for reviewer decision".to_string());
                session.updated_at = Utc::now();

                self.sessions.save(session.clone()).await?;
                info!(session_id = %session_id, "Review parked: awaiting reviewer");
                Ok(session)
            }
        }
    }

    /// Apply a reviewer's decision to a parked session.
    ///
    /// `AwaitReview` keeps the session open and re-entrant; any other
    /// decision closes it, logs the prediction and drops the pending
    /// entry. Resuming an unknown id fails with `SessionNotFound`.
    pub async fn resume(&self, session_id: Uuid, action: ReviewerAction) -> Result<ReviewSession> {
        let mut session = self
            .sessions
            .load(session_id)
            .await?
            .ok_or_else(|| ReviewError::SessionNotFound(session_id.to_string()))?;

        if session.phase != SessionPhase::AwaitingDecision {
            return Err(ReviewError::InvalidAction(format!(
                "Session {} is not awaiting a decision (phase: {})",
                session_id, session.phase
            )));
        }

        match action {
            ReviewerAction::None => Err(ReviewError::InvalidAction(
                "A reviewer decision is required".to_string(),
            )),
            ReviewerAction::AwaitReview => {
                session.reviewer_action = ReviewerAction::AwaitReview;
                session
                    .trace
                    .push("AWAIT: reviewer deferred the decision".to_string());
                session.updated_at = Utc::now();

                self.sessions.save(session.clone()).await?;
                info!(session_id = %session_id, "Reviewer chose to wait; session stays open");
                Ok(session)
            }
            resolving => {
                let message = reviewer_message(resolving);
                let verdict = session.verdict.clone().ok_or_else(|| {
                    ReviewError::Storage(format!("Parked session {} has no verdict", session_id))
                })?;

                session.reviewer_action = resolving;
                session.phase = SessionPhase::Resolved;
                session.terminal_message = Some(message.to_string());
                session
                    .trace
                    .push(format!("COMPLETE: reviewer chose {}", resolving));
                session.updated_at = Utc::now();

                // Log first so a storage failure leaves the session
                // parked and the decision retryable.
                self.history
                    .append_prediction(&session.record, &verdict, &resolving.to_string())
                    .await?;
                self.sessions.remove(session_id).await?;
                info!(
                    session_id = %session_id,
                    action = %resolving,
                    "Review resolved by reviewer"
                );
                Ok(session)
            }
        }
    }

    /// Look up a parked session by id.
    pub async fn session(&self, session_id: Uuid) -> Result<Option<ReviewSession>> {
        self.sessions.load(session_id).await
    }

    /// Ids of every session still waiting on a reviewer, oldest first.
    pub async fn pending_sessions(&self) -> Result<Vec<Uuid>> {
        self.sessions.pending_ids().await
    }
}

/// Result line for a remediation the selector executed on its own.
fn automated_message(decision: ActionDecision, record: &ReconciliationRecord) -> String {
    match decision {
        ActionDecision::UpdateSystemA => {
            format!("System A updated for Account: {}", record.account)
        }
        ActionDecision::UpdateSystemB => {
            format!("System B updated for Account: {}", record.account)
        }
        ActionDecision::SendEmail => {
            format!("Email sent regarding Account: {}", record.account)
        }
        ActionDecision::RaiseServiceTicket => {
            format!("SR Ticket created for Account: {}", record.account)
        }
        ActionDecision::NoActionTaken => "No Action Taken".to_string(),
    }
}

/// Result line for a remediation a human reviewer picked.
fn reviewer_message(action: ReviewerAction) -> &'static str {
    match action {
        ReviewerAction::EmailNotification => MSG_EMAIL_SENT,
        ReviewerAction::RaiseServiceTicket => MSG_SR_RAISED,
        ReviewerAction::SystemAdjustment => MSG_ADJUSTMENT,
        // Callers route None and AwaitReview before getting here.
        ReviewerAction::None | ReviewerAction::AwaitReview => MSG_NO_ANOMALY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;
    use crate::models::MatchStatus;
    use crate::openrouter::MockChatApi;
    use crate::sessions::InMemorySessionStore;
    use chrono::NaiveDate;

    const TEMPLATE: &str = "History:\n{historical_data}\nCandidate:\n{new_data}";

    fn candidate() -> ReconciliationRecord {
        ReconciliationRecord {
            company_number: "83885".to_string(),
            account: "8100566".to_string(),
            business_unit: "AU1".to_string(),
            currency: "USD".to_string(),
            primary_account_type: "Loans".to_string(),
            secondary_account_type: "Deposits".to_string(),
            gl_balance: 27020.76,
            ihub_balance: 18789.66,
            difference: 27020.76 - 18789.66,
            match_status: MatchStatus::Break,
            as_of_date: None,
        }
    }

    fn history_row(period: u32, gl: f64, ihub: f64) -> ReconciliationRecord {
        let mut row = candidate();
        row.gl_balance = gl;
        row.ihub_balance = ihub;
        row.difference = gl - ihub;
        row.as_of_date = NaiveDate::from_ymd_opt(2025, period, 28);
        row
    }

    fn build_workflow(
        chat: Arc<MockChatApi>,
        history: Arc<dyn HistoryStore>,
        mode: DecisionMode,
    ) -> ReviewWorkflow {
        let classifier = AnomalyClassifier::new(chat.clone(), "openai/gpt-4o-mini".to_string());
        let selector = ActionSelector::new(
            chat,
            "mistralai/mistral-small-3.1-24b-instruct:free".to_string(),
            "openai/gpt-4o-mini".to_string(),
        );
        ReviewWorkflow::new(
            history,
            Box::new(InMemorySessionStore::new()),
            classifier,
            selector,
            TEMPLATE.to_string(),
            mode,
        )
    }

    #[tokio::test]
    async fn clean_verdict_closes_without_touching_the_selector() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("Anomaly: No | Outstanding balances are in line with previous months | Stable")
            .await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat.clone(), history.clone(), DecisionMode::Automated);

        let session = workflow.submit(candidate()).await.unwrap();

        assert_eq!(session.phase, SessionPhase::NoAnomaly);
        assert_eq!(session.terminal_message.as_deref(), Some(MSG_NO_ANOMALY));
        assert!(session.historical_matches.is_empty());
        assert!(!session.verdict.unwrap().is_anomaly);

        // Only the classify call went out; the selector was never consulted.
        assert_eq!(chat.request_count().await, 1);

        let log = history.recent_predictions(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "None");
        assert_eq!(log[0].verdict.is_anomaly, false);
    }

    #[tokio::test]
    async fn human_mode_parks_the_session_without_logging() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("Anomaly: Yes | Huge spike in outstanding balances | GL rose sharply")
            .await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat.clone(), history.clone(), DecisionMode::HumanReview);

        let session = workflow.submit(candidate()).await.unwrap();

        assert_eq!(session.phase, SessionPhase::AwaitingDecision);
        assert!(session.terminal_message.is_none());
        assert_eq!(session.reviewer_action, ReviewerAction::None);
        assert_eq!(chat.request_count().await, 1);

        // Parked, loadable, and nothing in the prediction log yet.
        let parked = workflow.session(session.session_id).await.unwrap();
        assert!(parked.is_some());
        assert!(history.recent_predictions(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reviewer_decision_resolves_and_logs_once() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("Anomaly: Yes | Huge spike in outstanding balances | GL rose sharply")
            .await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat, history.clone(), DecisionMode::HumanReview);

        let parked = workflow.submit(candidate()).await.unwrap();
        let resolved = workflow
            .resume(parked.session_id, ReviewerAction::EmailNotification)
            .await
            .unwrap();

        assert_eq!(resolved.phase, SessionPhase::Resolved);
        assert_eq!(resolved.terminal_message.as_deref(), Some(MSG_EMAIL_SENT));
        assert_eq!(resolved.reviewer_action, ReviewerAction::EmailNotification);

        let log = history.recent_predictions(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "Email Notification");
        assert!(log[0].verdict.is_anomaly);

        // The pending entry is gone once resolved.
        assert!(workflow.session(parked.session_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn await_review_keeps_the_session_open_for_another_round() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("Anomaly: Yes | Consistent increase or decrease in outstanding balances | Drifting")
            .await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat, history.clone(), DecisionMode::HumanReview);

        let parked = workflow.submit(candidate()).await.unwrap();

        let waiting = workflow
            .resume(parked.session_id, ReviewerAction::AwaitReview)
            .await
            .unwrap();
        assert_eq!(waiting.phase, SessionPhase::AwaitingDecision);
        assert_eq!(waiting.reviewer_action, ReviewerAction::AwaitReview);
        assert!(history.recent_predictions(10).await.unwrap().is_empty());

        // Still resumable with a real decision afterwards.
        let resolved = workflow
            .resume(parked.session_id, ReviewerAction::RaiseServiceTicket)
            .await
            .unwrap();
        assert_eq!(resolved.terminal_message.as_deref(), Some(MSG_SR_RAISED));
        assert_eq!(history.recent_predictions(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resume_with_unknown_id_is_session_not_found() {
        let chat = Arc::new(MockChatApi::new());
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat, history, DecisionMode::HumanReview);

        let err = workflow
            .resume(Uuid::new_v4(), ReviewerAction::EmailNotification)
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn resume_with_no_action_is_rejected() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("Anomaly: Yes | Other | Unexplained").await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat, history, DecisionMode::HumanReview);

        let parked = workflow.submit(candidate()).await.unwrap();
        let err = workflow
            .resume(parked.session_id, ReviewerAction::None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReviewError::InvalidAction(_)));
    }

    #[tokio::test]
    async fn automated_mode_selects_and_resolves_in_one_pass() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("Anomaly: Yes | Huge spike in outstanding balances | GL rose sharply")
            .await;
        chat.push_text("Create SR Ticket").await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat.clone(), history.clone(), DecisionMode::Automated);

        let session = workflow.submit(candidate()).await.unwrap();

        assert_eq!(session.phase, SessionPhase::Resolved);
        assert_eq!(
            session.terminal_message.as_deref(),
            Some("SR Ticket created for Account: 8100566")
        );
        // Classify plus one selector pass, no tool round trip.
        assert_eq!(chat.request_count().await, 2);

        let log = history.recent_predictions(10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].action, "Create SR Ticket");
    }

    #[tokio::test]
    async fn upward_trend_scenario_flows_history_into_the_prompt() {
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        for period in 1..=5 {
            let gl = 21000.0 + f64::from(period) * 1000.0;
            history
                .insert_history(history_row(period, gl, 18789.66))
                .await
                .unwrap();
        }

        let chat = Arc::new(MockChatApi::new());
        chat.push_text(
            "Anomaly: Yes | Consistent increase or decrease in outstanding balances | GL climbs about 1000 per period",
        )
        .await;
        let workflow = build_workflow(chat.clone(), history, DecisionMode::HumanReview);

        let session = workflow.submit(candidate()).await.unwrap();

        assert_eq!(session.historical_matches.len(), 5);
        assert_eq!(session.phase, SessionPhase::AwaitingDecision);
        let verdict = session.verdict.unwrap();
        assert!(verdict.is_anomaly);
        assert!(crate::classifier::ANOMALY_CATEGORIES.contains(&verdict.category.as_str()));

        // The rendered prompt carried all five historical balances.
        let requests = chat.seen_requests().await;
        let prompt_text = requests[0].messages[1].content.clone();
        assert!(prompt_text.contains("22000"));
        assert!(prompt_text.contains("26000"));
        assert!(prompt_text.contains("27020.76"));
    }

    #[tokio::test]
    async fn malformed_verdict_aborts_before_any_state_is_written() {
        let chat = Arc::new(MockChatApi::new());
        chat.push_text("the balances look odd to me").await;
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let workflow = build_workflow(chat, history.clone(), DecisionMode::HumanReview);

        let err = workflow.submit(candidate()).await.unwrap_err();
        assert!(matches!(err, ReviewError::MalformedResponse(_)));
        assert!(history.recent_predictions(10).await.unwrap().is_empty());
        assert!(workflow.pending_sessions().await.unwrap().is_empty());
    }
}
