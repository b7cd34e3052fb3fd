use chrono::NaiveDate;
use recon_review_orchestrator::{
    actions::ActionSelector,
    classifier::AnomalyClassifier,
    history::{HistoryStore, InMemoryHistoryStore},
    models::{MatchStatus, ReconciliationRecord, ReviewerAction},
    openrouter::MockChatApi,
    sessions::InMemorySessionStore,
    workflow::{DecisionMode, ReviewWorkflow},
};
use std::sync::Arc;
use tracing::info;

const DEMO_TEMPLATE: &str = r#"You are reviewing a balance reconciliation break between the general ledger and IHub.

Historical records for this account:
{historical_data}

New record under review:
{new_data}

Reply as: Anomaly: <Yes/No> | <category> | <explanation>"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Reconciliation Review Orchestrator starting");

    // Seed a few months of drifting break history for one account key
    let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    for period in 1..=5u32 {
        let gl = 21_000.0 + f64::from(period) * 1_000.0;
        history
            .insert_history(month_end_row(period, gl, 18_789.66))
            .await?;
    }

    // Scripted transport: one verdict, one tool round trip, one action label
    let chat = Arc::new(MockChatApi::new());
    chat.push_text(
        "Anomaly: Yes | Consistent increase or decrease in outstanding balances | GL climbs about 1000 per month while IHub holds steady",
    )
    .await;
    chat.push_tool_call("fetch_from_ledger_system", r#"{"query": "8100566"}"#)
        .await;
    chat.push_text("Create SR Ticket").await;

    let classifier = AnomalyClassifier::new(chat.clone(), "openai/gpt-4o-mini".to_string());
    let selector = ActionSelector::new(
        chat.clone(),
        "mistralai/mistral-small-3.1-24b-instruct:free".to_string(),
        "openai/gpt-4o-mini".to_string(),
    );

    let workflow = ReviewWorkflow::new(
        history.clone(),
        Box::new(InMemorySessionStore::new()),
        classifier,
        selector,
        DEMO_TEMPLATE.to_string(),
        DecisionMode::Automated,
    );

    let candidate = candidate_record();
    info!(
        account = %candidate.account,
        difference = candidate.difference,
        "Submitting candidate record"
    );

    match workflow.submit(candidate).await {
        Ok(session) => {
            println!("\n=== AUTOMATED REVIEW ===");
            println!("Session: {}", session.session_id);
            println!("Phase: {}", session.phase);
            if let Some(verdict) = &session.verdict {
                println!("Anomaly: {} ({})", verdict.is_anomaly, verdict.category);
            }
            if let Some(message) = &session.terminal_message {
                println!("Outcome: {}", message);
            }
            println!("\nSession Trace:");
            for (i, entry) in session.trace.iter().enumerate() {
                println!("  {}: {}", i + 1, entry);
            }
        }
        Err(e) => {
            eprintln!("Review failed: {}", e);
            return Err(Box::new(e) as Box<dyn std::error::Error>);
        }
    }

    // Same pipeline again, parked for a human decision this time
    let chat = Arc::new(MockChatApi::new());
    chat.push_text("Anomaly: Yes | Huge spike in outstanding balances | GL jumped well beyond the recent range")
        .await;

    let workflow = ReviewWorkflow::new(
        history.clone(),
        Box::new(InMemorySessionStore::new()),
        AnomalyClassifier::new(chat.clone(), "openai/gpt-4o-mini".to_string()),
        ActionSelector::new(
            chat,
            "mistralai/mistral-small-3.1-24b-instruct:free".to_string(),
            "openai/gpt-4o-mini".to_string(),
        ),
        DEMO_TEMPLATE.to_string(),
        DecisionMode::HumanReview,
    );

    let parked = workflow.submit(candidate_record()).await?;
    println!("\n=== HUMAN REVIEW ===");
    println!("Parked sessions: {:?}", workflow.pending_sessions().await?);

    let resolved = workflow
        .resume(parked.session_id, ReviewerAction::EmailNotification)
        .await?;
    println!("Reviewer decision: {}", resolved.reviewer_action);
    if let Some(message) = &resolved.terminal_message {
        println!("Outcome: {}", message);
    }

    let log = history.recent_predictions(10).await?;
    println!("\nPrediction log ({} rows):", log.len());
    for entry in &log {
        println!(
            "  {} | anomaly={} | action={}",
            entry.record.account, entry.verdict.is_anomaly, entry.action
        );
    }

    Ok(())
}

fn candidate_record() -> ReconciliationRecord {
    ReconciliationRecord {
        company_number: "83885".to_string(),
        account: "8100566".to_string(),
        business_unit: "AU1".to_string(),
        currency: "USD".to_string(),
        primary_account_type: "Loans".to_string(),
        secondary_account_type: "Deposits".to_string(),
        gl_balance: 27_020.76,
        ihub_balance: 18_789.66,
        difference: 27_020.76 - 18_789.66,
        match_status: MatchStatus::Break,
        as_of_date: NaiveDate::from_ymd_opt(2025, 6, 30),
    }
}

fn month_end_row(period: u32, gl: f64, ihub: f64) -> ReconciliationRecord {
    let mut row = candidate_record();
    row.gl_balance = gl;
    row.ihub_balance = ihub;
    row.difference = gl - ihub;
    row.as_of_date = NaiveDate::from_ymd_opt(2025, period, 28);
    row
}
