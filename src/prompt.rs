//! Prompt rendering for anomaly classification
//!
//! The template is configuration, not code: it arrives as plain text with
//! `{historical_data}` and `{new_data}` placeholder regions, both substituted
//! with pretty-printed JSON of the record collections. Rendering is a pure
//! function of its inputs.

use crate::error::{ReviewError, Result};
use crate::models::ReconciliationRecord;

pub const HISTORICAL_PLACEHOLDER: &str = "{historical_data}";
pub const CANDIDATE_PLACEHOLDER: &str = "{new_data}";

/// Verify both placeholder regions are present. A missing placeholder is a
/// configuration defect, not a runtime condition to retry.
pub fn ensure_placeholders(template: &str) -> Result<()> {
    if !template.contains(HISTORICAL_PLACEHOLDER) {
        return Err(ReviewError::Template(format!(
            "Prompt template is missing the {} placeholder",
            HISTORICAL_PLACEHOLDER
        )));
    }
    if !template.contains(CANDIDATE_PLACEHOLDER) {
        return Err(ReviewError::Template(format!(
            "Prompt template is missing the {} placeholder",
            CANDIDATE_PLACEHOLDER
        )));
    }
    Ok(())
}

/// Render the classification prompt for one candidate and its history.
pub fn render(
    template: &str,
    historical: &[ReconciliationRecord],
    candidate: &ReconciliationRecord,
) -> Result<String> {
    ensure_placeholders(template)?;

    let historical_json = serde_json::to_string_pretty(historical)?;
    let candidate_json = serde_json::to_string_pretty(candidate)?;

    Ok(template
        .replace(HISTORICAL_PLACEHOLDER, &historical_json)
        .replace(CANDIDATE_PLACEHOLDER, &candidate_json))
}
