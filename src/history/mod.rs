//! Reconciliation history and the prediction log
//!
//! `HistoryStore` is the single storage seam: exact-match historical
//! lookups, the ingest write path, and the append-only prediction log.
//! Two backends: an in-memory default and Postgres when a database URL is
//! configured.

pub mod postgres;
pub use postgres::PostgresHistoryStore;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ReviewError, Result};
use crate::models::{
    compute_record_fingerprint, HistoryQuery, PredictionLogEntry, ReconciliationRecord, Verdict,
};

/// Storage seam for historical rows and the prediction log
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Exact-match lookup on the six-field composite key. An empty result
    /// is a valid outcome, never an error.
    async fn lookup(&self, key: &HistoryQuery) -> Result<Vec<ReconciliationRecord>>;

    /// Accept one historical row. Rows whose stored difference disagrees
    /// with the balances are rejected.
    async fn insert_history(&self, record: ReconciliationRecord) -> Result<()>;

    /// Append one audit row. This is the only write path into the
    /// prediction log; each call lands atomically.
    async fn append_prediction(
        &self,
        record: &ReconciliationRecord,
        verdict: &Verdict,
        action: &str,
    ) -> Result<PredictionLogEntry>;

    /// Newest-first slice of the prediction log.
    async fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionLogEntry>>;
}

pub(crate) fn validate_history_row(record: &ReconciliationRecord) -> Result<()> {
    if !record.difference_consistent() {
        return Err(ReviewError::Storage(format!(
            "Rejected row for account {}: difference {} does not match gl - ihub = {}",
            record.account,
            record.difference,
            record.gl_balance - record.ihub_balance
        )));
    }
    Ok(())
}

pub(crate) fn build_prediction_entry(
    record: &ReconciliationRecord,
    verdict: &Verdict,
    action: &str,
) -> PredictionLogEntry {
    PredictionLogEntry {
        prediction_id: Uuid::new_v4(),
        record: record.clone(),
        verdict: verdict.clone(),
        action: action.to_string(),
        record_fingerprint: compute_record_fingerprint(record),
        created_at: Utc::now(),
    }
}

/// In-memory history store
pub struct InMemoryHistoryStore {
    history: Arc<RwLock<HashMap<HistoryQuery, Vec<ReconciliationRecord>>>>,
    predictions: Arc<RwLock<Vec<PredictionLogEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            history: Arc::new(RwLock::new(HashMap::new())),
            predictions: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn lookup(&self, key: &HistoryQuery) -> Result<Vec<ReconciliationRecord>> {
        let history = self.history.read().await;
        Ok(history.get(key).cloned().unwrap_or_default())
    }

    async fn insert_history(&self, record: ReconciliationRecord) -> Result<()> {
        validate_history_row(&record)?;

        let key = HistoryQuery::from(&record);
        let mut history = self.history.write().await;
        history.entry(key).or_default().push(record);
        Ok(())
    }

    async fn append_prediction(
        &self,
        record: &ReconciliationRecord,
        verdict: &Verdict,
        action: &str,
    ) -> Result<PredictionLogEntry> {
        let entry = build_prediction_entry(record, verdict, action);

        let mut predictions = self.predictions.write().await;
        predictions.push(entry.clone());
        Ok(entry)
    }

    async fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionLogEntry>> {
        let predictions = self.predictions.read().await;
        Ok(predictions.iter().rev().take(limit).cloned().collect())
    }
}

/// Pick the storage backend from the environment: Postgres when
/// POSTGRES_URL or DATABASE_URL is set and a pool can be created,
/// in-memory otherwise.
pub fn build_history_store() -> Arc<dyn HistoryStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&url)
        {
            Ok(pool) => {
                info!("History store backend: postgres");
                return Arc::new(PostgresHistoryStore::new(pool));
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres history store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("History store backend: in-memory");
    Arc::new(InMemoryHistoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MatchStatus;
    use chrono::NaiveDate;

    fn history_row(gl: f64, ihub: f64, as_of: &str) -> ReconciliationRecord {
        ReconciliationRecord {
            company_number: "83885".to_string(),
            account: "8100566".to_string(),
            business_unit: "AU1".to_string(),
            currency: "USD".to_string(),
            primary_account_type: "ALL OTHER LOANS".to_string(),
            secondary_account_type: "DEFERRED COSTS".to_string(),
            gl_balance: gl,
            ihub_balance: ihub,
            difference: gl - ihub,
            match_status: MatchStatus::Break,
            as_of_date: NaiveDate::parse_from_str(as_of, "%Y-%m-%d").ok(),
        }
    }

    fn verdict() -> Verdict {
        Verdict {
            is_anomaly: true,
            category: "Huge spike in outstanding balances".to_string(),
            explanation: "GL rose sharply".to_string(),
        }
    }

    #[tokio::test]
    async fn lookup_returns_rows_for_the_exact_key_only() {
        let store = InMemoryHistoryStore::new();
        store
            .insert_history(history_row(100.0, 40.0, "2024-07-04"))
            .await
            .unwrap();
        store
            .insert_history(history_row(200.0, 90.0, "2024-09-05"))
            .await
            .unwrap();

        let mut other = history_row(300.0, 10.0, "2024-09-05");
        other.currency = "EUR".to_string();
        store.insert_history(other).await.unwrap();

        let key = HistoryQuery::from(&history_row(1.0, 1.0, "2025-01-01"));
        let rows = store.lookup(&key).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.currency == "USD"));
        assert!(rows.iter().all(|r| r.difference_consistent()));
    }

    #[tokio::test]
    async fn lookup_with_no_precedent_is_empty_not_an_error() {
        let store = InMemoryHistoryStore::new();
        let key = HistoryQuery::from(&history_row(1.0, 1.0, "2025-01-01"));

        let rows = store.lookup(&key).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn inconsistent_difference_is_rejected_on_insert() {
        let store = InMemoryHistoryStore::new();

        let mut bad = history_row(100.0, 40.0, "2024-07-04");
        bad.difference = 1.0;

        let err = store.insert_history(bad).await.unwrap_err();
        assert!(matches!(err, ReviewError::Storage(_)));

        let key = HistoryQuery::from(&history_row(1.0, 1.0, "2025-01-01"));
        assert!(store.lookup(&key).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prediction_round_trip_preserves_record_verdict_and_action() {
        let store = InMemoryHistoryStore::new();
        let candidate = history_row(27020.76, 18789.66, "2025-03-27");

        let written = store
            .append_prediction(&candidate, &verdict(), "Create SR Ticket")
            .await
            .unwrap();
        assert!(written.fingerprint_matches());

        let read_back = store.recent_predictions(10).await.unwrap();
        assert_eq!(read_back.len(), 1);

        let entry = &read_back[0];
        assert_eq!(entry.record.company_number, "83885");
        assert_eq!(entry.record.account, "8100566");
        assert_eq!(entry.verdict, verdict());
        assert_eq!(entry.action, "Create SR Ticket");
        assert!(entry.fingerprint_matches());
    }

    #[tokio::test]
    async fn logged_entries_keep_the_as_of_date_the_fingerprint_covers() {
        let store = InMemoryHistoryStore::new();
        let candidate = history_row(27020.76, 18789.66, "2025-03-27");

        store
            .append_prediction(&candidate, &verdict(), "Email Notification")
            .await
            .unwrap();

        let read_back = store.recent_predictions(1).await.unwrap();
        let entry = &read_back[0];
        assert_eq!(
            entry.record.as_of_date,
            NaiveDate::from_ymd_opt(2025, 3, 27)
        );
        assert!(entry.fingerprint_matches());

        // A log row that drops the date can no longer verify.
        let mut undated = entry.record.clone();
        undated.as_of_date = None;
        assert_ne!(
            compute_record_fingerprint(&undated),
            entry.record_fingerprint
        );
    }

    #[tokio::test]
    async fn recent_predictions_are_newest_first_and_limited() {
        let store = InMemoryHistoryStore::new();
        let candidate = history_row(10.0, 5.0, "2025-01-01");

        for action in ["first", "second", "third"] {
            store
                .append_prediction(&candidate, &verdict(), action)
                .await
                .unwrap();
        }

        let recent = store.recent_predictions(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "third");
        assert_eq!(recent[1].action, "second");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_yield_one_row_each() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let candidate = history_row(10.0, 5.0, "2025-01-01");

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            let record = candidate.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_prediction(&record, &verdict(), &format!("action-{}", i))
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let rows = store.recent_predictions(100).await.unwrap();
        assert_eq!(rows.len(), 16);

        // Every append landed whole: no interleaved or duplicated rows.
        let mut actions: Vec<_> = rows.iter().map(|e| e.action.clone()).collect();
        actions.sort();
        actions.dedup();
        assert_eq!(actions.len(), 16);
    }
}
