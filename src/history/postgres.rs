//! Postgres-backed history store
//!
//! Relational layout mirrors the in-memory model: a `history` table keyed
//! by the six lookup fields and an append-only `predictions` table. Schema
//! creation is lazy and guarded so concurrent first calls initialize it
//! exactly once.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{build_prediction_entry, validate_history_row, HistoryStore};
use crate::error::{ReviewError, Result};
use crate::models::{
    HistoryQuery, MatchStatus, PredictionLogEntry, ReconciliationRecord, Verdict,
};

pub struct PostgresHistoryStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS history (
                      company_number TEXT NOT NULL,
                      account TEXT NOT NULL,
                      business_unit TEXT NOT NULL,
                      currency TEXT NOT NULL,
                      primary_account_type TEXT NOT NULL,
                      secondary_account_type TEXT NOT NULL,
                      gl_balance DOUBLE PRECISION NOT NULL,
                      ihub_balance DOUBLE PRECISION NOT NULL,
                      difference DOUBLE PRECISION NOT NULL,
                      match_status TEXT NOT NULL,
                      as_of_date DATE
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_history_composite_key
                    ON history (company_number, account, business_unit, currency,
                                primary_account_type, secondary_account_type);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS predictions (
                      prediction_id UUID PRIMARY KEY,
                      company_number TEXT NOT NULL,
                      account TEXT NOT NULL,
                      business_unit TEXT NOT NULL,
                      currency TEXT NOT NULL,
                      primary_account_type TEXT NOT NULL,
                      secondary_account_type TEXT NOT NULL,
                      gl_balance DOUBLE PRECISION NOT NULL,
                      ihub_balance DOUBLE PRECISION NOT NULL,
                      difference DOUBLE PRECISION NOT NULL,
                      match_status TEXT NOT NULL,
                      as_of_date DATE,
                      result TEXT NOT NULL,
                      category TEXT NOT NULL,
                      explanation TEXT NOT NULL,
                      action TEXT NOT NULL,
                      record_fingerprint TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                ReviewError::Storage(format!("Failed to initialize history schema: {}", e))
            })?;

        Ok(())
    }

    // Tolerant read: rows were validated on insert, so unknown statuses
    // only appear through external writes.
    fn match_status_from_db(status: &str) -> MatchStatus {
        MatchStatus::parse(status).unwrap_or(MatchStatus::Match)
    }

    fn record_from_row(row: &PgRow) -> ReconciliationRecord {
        let status: String = row.try_get("match_status").unwrap_or_default();

        ReconciliationRecord {
            company_number: row.try_get("company_number").unwrap_or_default(),
            account: row.try_get("account").unwrap_or_default(),
            business_unit: row.try_get("business_unit").unwrap_or_default(),
            currency: row.try_get("currency").unwrap_or_default(),
            primary_account_type: row.try_get("primary_account_type").unwrap_or_default(),
            secondary_account_type: row.try_get("secondary_account_type").unwrap_or_default(),
            gl_balance: row.try_get("gl_balance").unwrap_or_default(),
            ihub_balance: row.try_get("ihub_balance").unwrap_or_default(),
            difference: row.try_get("difference").unwrap_or_default(),
            match_status: Self::match_status_from_db(&status),
            as_of_date: row.try_get("as_of_date").ok(),
        }
    }

    // Rebuilds the record through the same path as a history read, so
    // every column the fingerprint covers comes back.
    fn prediction_from_row(row: &PgRow) -> PredictionLogEntry {
        let result: String = row.try_get("result").unwrap_or_default();

        PredictionLogEntry {
            prediction_id: row.try_get("prediction_id").unwrap_or_else(|_| Uuid::new_v4()),
            record: Self::record_from_row(row),
            verdict: Verdict {
                is_anomaly: result == "Yes",
                category: row.try_get("category").unwrap_or_default(),
                explanation: row.try_get("explanation").unwrap_or_default(),
            },
            action: row.try_get("action").unwrap_or_default(),
            record_fingerprint: row.try_get("record_fingerprint").unwrap_or_default(),
            created_at: row
                .try_get("created_at")
                .unwrap_or_else(|_| chrono::Utc::now()),
        }
    }
}

#[async_trait]
impl HistoryStore for PostgresHistoryStore {
    async fn lookup(&self, key: &HistoryQuery) -> Result<Vec<ReconciliationRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT company_number, account, business_unit, currency,
                   primary_account_type, secondary_account_type,
                   gl_balance, ihub_balance, difference, match_status, as_of_date
            FROM history
            WHERE company_number = $1 AND account = $2 AND business_unit = $3
              AND currency = $4 AND primary_account_type = $5 AND secondary_account_type = $6
            ORDER BY as_of_date
            "#,
        )
        .bind(&key.company_number)
        .bind(&key.account)
        .bind(&key.business_unit)
        .bind(&key.currency)
        .bind(&key.primary_account_type)
        .bind(&key.secondary_account_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReviewError::Storage(format!("Failed to load history rows: {}", e)))?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }

    async fn insert_history(&self, record: ReconciliationRecord) -> Result<()> {
        validate_history_row(&record)?;
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO history
              (company_number, account, business_unit, currency,
               primary_account_type, secondary_account_type,
               gl_balance, ihub_balance, difference, match_status, as_of_date)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&record.company_number)
        .bind(&record.account)
        .bind(&record.business_unit)
        .bind(&record.currency)
        .bind(&record.primary_account_type)
        .bind(&record.secondary_account_type)
        .bind(record.gl_balance)
        .bind(record.ihub_balance)
        .bind(record.difference)
        .bind(record.match_status.to_string())
        .bind(record.as_of_date)
        .execute(&self.pool)
        .await
        .map_err(|e| ReviewError::Storage(format!("Failed to insert history row: {}", e)))?;

        Ok(())
    }

    async fn append_prediction(
        &self,
        record: &ReconciliationRecord,
        verdict: &Verdict,
        action: &str,
    ) -> Result<PredictionLogEntry> {
        self.ensure_schema().await?;

        let entry = build_prediction_entry(record, verdict, action);
        let result = if verdict.is_anomaly { "Yes" } else { "No" };

        sqlx::query(
            r#"
            INSERT INTO predictions
              (prediction_id, company_number, account, business_unit, currency,
               primary_account_type, secondary_account_type,
               gl_balance, ihub_balance, difference, match_status, as_of_date,
               result, category, explanation, action, record_fingerprint, created_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(entry.prediction_id)
        .bind(&entry.record.company_number)
        .bind(&entry.record.account)
        .bind(&entry.record.business_unit)
        .bind(&entry.record.currency)
        .bind(&entry.record.primary_account_type)
        .bind(&entry.record.secondary_account_type)
        .bind(entry.record.gl_balance)
        .bind(entry.record.ihub_balance)
        .bind(entry.record.difference)
        .bind(entry.record.match_status.to_string())
        .bind(entry.record.as_of_date)
        .bind(result)
        .bind(&entry.verdict.category)
        .bind(&entry.verdict.explanation)
        .bind(&entry.action)
        .bind(&entry.record_fingerprint)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ReviewError::Storage(format!("Failed to append prediction row: {}", e)))?;

        Ok(entry)
    }

    async fn recent_predictions(&self, limit: usize) -> Result<Vec<PredictionLogEntry>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT prediction_id, company_number, account, business_unit, currency,
                   primary_account_type, secondary_account_type,
                   gl_balance, ihub_balance, difference, match_status, as_of_date,
                   result, category, explanation, action, record_fingerprint, created_at
            FROM predictions
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(pg_limit(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ReviewError::Storage(format!("Failed to load prediction rows: {}", e)))?;

        Ok(rows.iter().map(Self::prediction_from_row).collect())
    }
}

// LIMIT binds as BIGINT; cap oversized values instead of letting the
// cast wrap negative.
fn pg_limit(limit: usize) -> i64 {
    limit.min(i64::MAX as usize) as i64
}
