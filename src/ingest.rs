//! Historical dataset ingest
//!
//! Loads the month-end reconciliation CSV into the history store at
//! startup. Rows that fail the difference invariant or carry an
//! unreadable match status are skipped with a warning rather than
//! aborting the whole load.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{info, warn};

use crate::history::HistoryStore;
use crate::models::{MatchStatus, ReconciliationRecord};
use crate::Result;

/// One line of a reconciliation history export, under the export's headers.
#[derive(Debug, Deserialize)]
struct HistoryCsvRow {
    #[serde(rename = "As of Date")]
    as_of_date: String,
    #[serde(rename = "Company")]
    company: String,
    #[serde(rename = "Account")]
    account: String,
    #[serde(rename = "AU")]
    au: String,
    #[serde(rename = "Currency")]
    currency: String,
    #[serde(rename = "Primary Account")]
    primary_account: String,
    #[serde(rename = "Secondary Account")]
    secondary_account: String,
    #[serde(rename = "GL Balance")]
    gl_balance: f64,
    #[serde(rename = "IHub Balance")]
    ihub_balance: f64,
    #[serde(rename = "Balance Difference")]
    difference: f64,
    #[serde(rename = "Match Status")]
    match_status: String,
}

impl HistoryCsvRow {
    fn into_record(self) -> std::result::Result<ReconciliationRecord, String> {
        let Some(match_status) = MatchStatus::parse(&self.match_status) else {
            return Err(format!("unknown match status '{}'", self.match_status));
        };

        let record = ReconciliationRecord {
            company_number: self.company,
            account: self.account,
            business_unit: self.au,
            currency: self.currency,
            primary_account_type: self.primary_account,
            secondary_account_type: self.secondary_account,
            gl_balance: self.gl_balance,
            ihub_balance: self.ihub_balance,
            difference: self.difference,
            match_status,
            as_of_date: parse_as_of_date(&self.as_of_date),
        };

        if !record.difference_consistent() {
            return Err(format!(
                "difference {} does not match balances {} - {}",
                record.difference, record.gl_balance, record.ihub_balance
            ));
        }
        Ok(record)
    }
}

/// The dataset carries month-end dates in a few export shapes.
fn parse_as_of_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|dt| dt.date()))
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}

/// Loads every valid row of `path` into the store and returns the count.
pub async fn load_history_csv(store: &dyn HistoryStore, path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)?;
    let loaded = load_history_reader(store, content.as_bytes()).await?;
    info!("Loaded {} historical rows from {}", loaded, path.display());
    Ok(loaded)
}

async fn load_history_reader(store: &dyn HistoryStore, data: &[u8]) -> Result<usize> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut loaded = 0usize;
    for (idx, result) in reader.deserialize::<HistoryCsvRow>().enumerate() {
        let row_number = idx + 1;
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                warn!("Skipping history row {}: {}", row_number, e);
                continue;
            }
        };
        match row.into_record() {
            Ok(record) => {
                store.insert_history(record).await?;
                loaded += 1;
            }
            Err(reason) => {
                warn!("Skipping history row {}: {}", row_number, reason);
            }
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;
    use crate::models::HistoryQuery;

    const HEADER: &str = "As of Date,Company,Account,AU,Currency,Primary Account,Secondary Account,GL Balance,IHub Balance,Balance Difference,Match Status";

    fn query() -> HistoryQuery {
        HistoryQuery {
            company_number: "83885".to_string(),
            account: "8100566".to_string(),
            business_unit: "AU1".to_string(),
            currency: "USD".to_string(),
            primary_account_type: "Loans".to_string(),
            secondary_account_type: "Deposits".to_string(),
        }
    }

    #[tokio::test]
    async fn loads_rows_under_the_export_headers() {
        let csv = format!(
            "{HEADER}\n\
             2025-03-31,83885,8100566,AU1,USD,Loans,Deposits,22000.00,18789.66,3210.34,Break\n\
             2025-04-30,83885,8100566,AU1,USD,Loans,Deposits,23000.00,18789.66,4210.34,Break\n"
        );
        let store = InMemoryHistoryStore::new();

        let loaded = load_history_reader(&store, csv.as_bytes()).await.unwrap();
        assert_eq!(loaded, 2);

        let rows = store.lookup(&query()).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].match_status, MatchStatus::Break);
        assert_eq!(
            rows[0].as_of_date,
            NaiveDate::from_ymd_opt(2025, 3, 31)
        );
    }

    #[tokio::test]
    async fn inconsistent_difference_rows_are_skipped_not_fatal() {
        let csv = format!(
            "{HEADER}\n\
             2025-03-31,83885,8100566,AU1,USD,Loans,Deposits,22000.00,18789.66,999.99,Break\n\
             2025-04-30,83885,8100566,AU1,USD,Loans,Deposits,23000.00,18789.66,4210.34,Break\n"
        );
        let store = InMemoryHistoryStore::new();

        let loaded = load_history_reader(&store, csv.as_bytes()).await.unwrap();
        assert_eq!(loaded, 1);
        assert_eq!(store.lookup(&query()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_match_status_rows_are_skipped() {
        let csv = format!(
            "{HEADER}\n\
             2025-03-31,83885,8100566,AU1,USD,Loans,Deposits,22000.00,18789.66,3210.34,Pending\n"
        );
        let store = InMemoryHistoryStore::new();

        let loaded = load_history_reader(&store, csv.as_bytes()).await.unwrap();
        assert_eq!(loaded, 0);
    }

    #[test]
    fn month_end_dates_parse_in_all_export_shapes() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 31);
        assert_eq!(parse_as_of_date("2025-03-31"), expected);
        assert_eq!(parse_as_of_date("2025-03-31 00:00:00"), expected);
        assert_eq!(parse_as_of_date("03/31/2025"), expected);
        assert_eq!(parse_as_of_date("March 31"), None);
    }
}
