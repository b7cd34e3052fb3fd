//! Core data models for reconciliation review

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Write;
use uuid::Uuid;

/// Tolerance when checking `difference == gl_balance - ihub_balance`.
pub const BALANCE_EPSILON: f64 = 1e-6;

//
// ================= Enums =================
//

/// Outcome of comparing a GL balance against its IHub counterpart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MatchStatus {
    Match,
    Break,
}

impl MatchStatus {
    /// Source datasets carry both `Break` and `break`; accept either casing.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "match" => Some(MatchStatus::Match),
            "break" => Some(MatchStatus::Break),
            _ => None,
        }
    }
}

/// Remediation chosen by a human reviewer.
///
/// The wire values are the review form's historical action names, so the
/// HTTP surface stays compatible with existing reviewer tooling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerAction {
    None,
    EmailNotification,
    #[serde(rename = "raise_sr")]
    RaiseServiceTicket,
    #[serde(rename = "source_target_system_adjustment")]
    SystemAdjustment,
    #[serde(rename = "reconciler_action_wait")]
    AwaitReview,
}

/// Remediation chosen by the automated action selector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionDecision {
    UpdateSystemA,
    UpdateSystemB,
    SendEmail,
    RaiseServiceTicket,
    NoActionTaken,
}

/// Where a review session sits in its lifecycle.
///
/// `NoAnomaly` and `Resolved` are terminal; `AwaitingDecision` is the
/// durable human-wait state a later request resumes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    LoadingHistory,
    Classifying,
    NoAnomaly,
    AwaitingDecision,
    Resolved,
}

//
// ================= Reconciliation Record =================
//

/// One balance-comparison snapshot between the general ledger and IHub.
///
/// Historical rows are immutable once stored; a candidate row lives only
/// for the duration of its review session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationRecord {
    pub company_number: String,
    pub account: String,
    pub business_unit: String,
    pub currency: String,
    pub primary_account_type: String,
    pub secondary_account_type: String,
    pub gl_balance: f64,
    pub ihub_balance: f64,
    pub difference: f64,
    pub match_status: MatchStatus,
    /// Populated on historical rows; candidates carry no as-of date.
    #[serde(default)]
    pub as_of_date: Option<NaiveDate>,
}

impl ReconciliationRecord {
    /// True when the stored difference agrees with the two balances.
    pub fn difference_consistent(&self) -> bool {
        (self.difference - (self.gl_balance - self.ihub_balance)).abs() <= BALANCE_EPSILON
    }
}

//
// ================= History Query =================
//

/// Composite lookup key for historical rows. Exact match on all six
/// fields; there is no fuzzy matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HistoryQuery {
    pub company_number: String,
    pub account: String,
    pub business_unit: String,
    pub currency: String,
    pub primary_account_type: String,
    pub secondary_account_type: String,
}

impl From<&ReconciliationRecord> for HistoryQuery {
    fn from(record: &ReconciliationRecord) -> Self {
        Self {
            company_number: record.company_number.clone(),
            account: record.account.clone(),
            business_unit: record.business_unit.clone(),
            currency: record.currency.clone(),
            primary_account_type: record.primary_account_type.clone(),
            secondary_account_type: record.secondary_account_type.clone(),
        }
    }
}

//
// ================= Verdict =================
//

/// Parsed classifier output for one candidate record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub is_anomaly: bool,
    pub category: String,
    pub explanation: String,
}

//
// ================= Review Session =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSession {
    pub session_id: Uuid,
    pub record: ReconciliationRecord,
    pub historical_matches: Vec<ReconciliationRecord>,
    pub verdict: Option<Verdict>,
    pub reviewer_action: ReviewerAction,
    /// User-facing outcome line once the session reaches a terminal phase.
    pub terminal_message: Option<String>,
    pub phase: SessionPhase,
    pub trace: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//
// ================= Prediction Log =================
//

/// Append-only audit row written once per review that reaches a terminal
/// state. Never mutated, never consulted by later classifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionLogEntry {
    pub prediction_id: Uuid,
    pub record: ReconciliationRecord,
    pub verdict: Verdict,
    /// Resolved action label, or `None` for no-anomaly reviews.
    pub action: String,
    pub record_fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl PredictionLogEntry {
    /// Recomputes the candidate fingerprint and compares it to the stored
    /// one, proving which record this row was written for.
    pub fn fingerprint_matches(&self) -> bool {
        compute_record_fingerprint(&self.record) == self.record_fingerprint
    }
}

/// Compute SHA256 hash of a record for prediction-row integrity checks
/// Uses zero-copy streaming serialization into hasher
pub fn compute_record_fingerprint(record: &ReconciliationRecord) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), record).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchStatus::Match => "Match",
            MatchStatus::Break => "Break",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ActionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionDecision::UpdateSystemA => "Update System A",
            ActionDecision::UpdateSystemB => "Update System B",
            ActionDecision::SendEmail => "Send Email",
            ActionDecision::RaiseServiceTicket => "Create SR Ticket",
            ActionDecision::NoActionTaken => "No Action Taken",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ReviewerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReviewerAction::None => "None",
            ReviewerAction::EmailNotification => "Email Notification",
            ReviewerAction::RaiseServiceTicket => "Raise SR Ticket",
            ReviewerAction::SystemAdjustment => "Source/Target System Adjustment",
            ReviewerAction::AwaitReview => "Await Reviewer",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::LoadingHistory => "loading_history",
            SessionPhase::Classifying => "classifying",
            SessionPhase::NoAnomaly => "no_anomaly",
            SessionPhase::AwaitingDecision => "awaiting_decision",
            SessionPhase::Resolved => "resolved",
        };
        write!(f, "{}", s)
    }
}
