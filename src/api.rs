//! REST API server for reconciliation reviews
//!
//! Exposes the review workflow via HTTP endpoints
//! Integrates with the reviewer frontend UI

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::error::ReviewError;
use crate::history::HistoryStore;
use crate::models::{
    MatchStatus, ReconciliationRecord, ReviewerAction, SessionPhase, BALANCE_EPSILON,
};
use crate::workflow::ReviewWorkflow;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmitReviewRequest {
    pub company_number: String,
    pub account: String,
    pub business_unit: String,
    pub currency: String,
    pub primary_account_type: String,
    pub secondary_account_type: String,
    pub gl_balance: f64,
    pub ihub_balance: f64,
    pub as_of_date: Option<NaiveDate>,
}

impl SubmitReviewRequest {
    /// Builds the candidate record server-side so the difference and
    /// match status can never disagree with the submitted balances.
    fn into_record(self) -> ReconciliationRecord {
        let difference = self.gl_balance - self.ihub_balance;
        let match_status = if difference.abs() <= BALANCE_EPSILON {
            MatchStatus::Match
        } else {
            MatchStatus::Break
        };
        ReconciliationRecord {
            company_number: self.company_number,
            account: self.account,
            business_unit: self.business_unit,
            currency: self.currency,
            primary_account_type: self.primary_account_type,
            secondary_account_type: self.secondary_account_type,
            gl_balance: self.gl_balance,
            ihub_balance: self.ihub_balance,
            difference,
            match_status,
            as_of_date: self.as_of_date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewActionRequest {
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictionsQuery {
    pub limit: Option<usize>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub workflow: Arc<ReviewWorkflow>,
    pub history: Arc<dyn HistoryStore>,
}

/// =============================
/// Helpers — String → Enum Parsing
/// =============================

/// Maps the reviewer form values onto decisions. Comparison is exact,
/// the same strictness the action labels get; anything else is rejected
/// by the handler instead of defaulting to a decision.
fn parse_action(value: &str) -> Option<ReviewerAction> {
    match value {
        "email_notification" => Some(ReviewerAction::EmailNotification),
        "raise_sr" => Some(ReviewerAction::RaiseServiceTicket),
        "source_target_system_adjustment" => Some(ReviewerAction::SystemAdjustment),
        "reconciler_action_wait" => Some(ReviewerAction::AwaitReview),
        _ => None,
    }
}

fn outcome_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::NoAnomaly => "no_anomaly",
        SessionPhase::AwaitingDecision => "awaiting_reviewer",
        SessionPhase::Resolved => "resolved",
        SessionPhase::LoadingHistory | SessionPhase::Classifying => "in_progress",
    }
}

/// Upstream model failures are gateway errors; bad reviewer input is a
/// client error; everything storage-shaped is a server error.
fn status_for(err: &ReviewError) -> StatusCode {
    match err {
        ReviewError::MalformedResponse(_) | ReviewError::Classifier(_) => StatusCode::BAD_GATEWAY,
        ReviewError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        ReviewError::InvalidAction(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Review Endpoints
/// =============================

async fn submit_review(
    State(state): State<ApiState>,
    Json(req): Json<SubmitReviewRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(
        "Received review request: account {} / company {}",
        req.account, req.company_number
    );

    if req.account.trim().is_empty() || req.company_number.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "account and company_number are required".into(),
            )),
        );
    }

    match state.workflow.submit(req.into_record()).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "outcome": outcome_label(session.phase),
                "session": session,
            }))),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn get_review(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse>) {
    match state.workflow.session(session_id).await {
        Ok(Some(session)) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "outcome": outcome_label(session.phase),
                "session": session,
            }))),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!(
                "No pending session with id {}",
                session_id
            ))),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

async fn submit_action(
    State(state): State<ApiState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<ReviewActionRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let Some(action) = parse_action(&req.action) else {
        // Reviewer-facing text; the review form relies on this exact string.
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "No action selected. Please try again.".into(),
            )),
        );
    };

    info!(
        "Reviewer action for session {}: {}",
        session_id, req.action
    );

    match state.workflow.resume(session_id, action).await {
        Ok(session) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "outcome": outcome_label(session.phase),
                "message": session.terminal_message,
                "session": session,
            }))),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Prediction Log Endpoint
/// =============================

async fn recent_predictions(
    State(state): State<ApiState>,
    Query(params): Query<PredictionsQuery>,
) -> (StatusCode, Json<ApiResponse>) {
    let limit = params.limit.unwrap_or(50);

    match state.history.recent_predictions(limit).await {
        Ok(rows) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "count": rows.len(),
                "predictions": rows,
            }))),
        ),
        Err(e) => (status_for(&e), Json(ApiResponse::error(e.to_string()))),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(workflow: Arc<ReviewWorkflow>, history: Arc<dyn HistoryStore>) -> Router {
    let state = ApiState { workflow, history };

    Router::new()
        .route("/health", get(health))
        .route("/api/reviews", post(submit_review))
        .route("/api/reviews/:id", get(get_review))
        .route("/api/reviews/:id/action", post(submit_action))
        .route("/api/predictions", get(recent_predictions))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    workflow: Arc<ReviewWorkflow>,
    history: Arc<dyn HistoryStore>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(workflow, history);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("Review API listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviewer_form_values_map_to_actions() {
        assert_eq!(
            parse_action("email_notification"),
            Some(ReviewerAction::EmailNotification)
        );
        assert_eq!(parse_action("raise_sr"), Some(ReviewerAction::RaiseServiceTicket));
        assert_eq!(
            parse_action("source_target_system_adjustment"),
            Some(ReviewerAction::SystemAdjustment)
        );
        assert_eq!(
            parse_action("reconciler_action_wait"),
            Some(ReviewerAction::AwaitReview)
        );
        assert_eq!(parse_action("escalate_to_cfo"), None);
        assert_eq!(parse_action(""), None);
    }

    #[test]
    fn form_values_match_exactly_not_case_insensitively() {
        assert_eq!(parse_action("EMAIL_NOTIFICATION"), None);
        assert_eq!(parse_action(" raise_sr "), None);
        assert_eq!(parse_action("Reconciler_Action_Wait"), None);
    }

    #[test]
    fn error_classes_map_to_distinct_statuses() {
        assert_eq!(
            status_for(&ReviewError::MalformedResponse("raw".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ReviewError::Classifier("timeout".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ReviewError::SessionNotFound("id".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&ReviewError::InvalidAction("nope".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&ReviewError::Storage("db down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&ReviewError::Template("no placeholder".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn submitted_balances_derive_difference_and_status() {
        let req = SubmitReviewRequest {
            company_number: "83885".into(),
            account: "8100566".into(),
            business_unit: "AU1".into(),
            currency: "USD".into(),
            primary_account_type: "Loans".into(),
            secondary_account_type: "Deposits".into(),
            gl_balance: 27020.76,
            ihub_balance: 18789.66,
            as_of_date: None,
        };
        let record = req.into_record();
        assert!(record.difference_consistent());
        assert_eq!(record.match_status, MatchStatus::Break);

        let req = SubmitReviewRequest {
            gl_balance: 500.0,
            ihub_balance: 500.0,
            ..record_request()
        };
        assert_eq!(req.into_record().match_status, MatchStatus::Match);
    }

    fn record_request() -> SubmitReviewRequest {
        SubmitReviewRequest {
            company_number: "83885".into(),
            account: "8100566".into(),
            business_unit: "AU1".into(),
            currency: "USD".into(),
            primary_account_type: "Loans".into(),
            secondary_account_type: "Deposits".into(),
            gl_balance: 0.0,
            ihub_balance: 0.0,
            as_of_date: None,
        }
    }
}
