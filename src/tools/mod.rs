//! External-system lookup tools
//!
//! Tools are deterministic, side-effect-free lookups offered to the action
//! model. The set is closed: a tool name arriving from the model resolves
//! through `ToolKind::parse`, and unknown names are rejected explicitly
//! rather than dispatched through an open registry.

use serde_json::{json, Value};

use crate::error::{ReviewError, Result};
use crate::openrouter::{FunctionSpec, ToolSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    FetchFromLedgerSystem,
    FetchFromSubledgerSystem,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [
        ToolKind::FetchFromLedgerSystem,
        ToolKind::FetchFromSubledgerSystem,
    ];

    /// Resolve a tool name from a model reply. Unknown names return `None`;
    /// the caller decides how loudly to reject them.
    pub fn parse(name: &str) -> Option<ToolKind> {
        match name {
            "fetch_from_ledger_system" => Some(ToolKind::FetchFromLedgerSystem),
            "fetch_from_subledger_system" => Some(ToolKind::FetchFromSubledgerSystem),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::FetchFromLedgerSystem => "fetch_from_ledger_system",
            ToolKind::FetchFromSubledgerSystem => "fetch_from_subledger_system",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::FetchFromLedgerSystem => {
                "Fetch additional data from the ledger (GL) system based on a query."
            }
            ToolKind::FetchFromSubledgerSystem => {
                "Fetch additional data from the subledger (IHub) system based on a query."
            }
        }
    }

    /// Function declaration for the chat request.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            kind: "function".to_string(),
            function: FunctionSpec {
                name: self.name().to_string(),
                description: self.description().to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "Query to fetch data for"
                        }
                    },
                    "required": ["query"]
                }),
            },
        }
    }

    /// Pure placeholder lookup. No real system is contacted.
    pub fn execute(&self, query: &str) -> Value {
        match self {
            ToolKind::FetchFromLedgerSystem => json!({
                "ledger_data": format!("Additional data for {} from the ledger system", query)
            }),
            ToolKind::FetchFromSubledgerSystem => json!({
                "subledger_data": format!("Additional data for {} from the subledger system", query)
            }),
        }
    }
}

/// Declarations for every tool in the closed set, in a stable order.
pub fn tool_specs() -> Vec<ToolSpec> {
    ToolKind::ALL.iter().map(|kind| kind.spec()).collect()
}

/// Decode the single `query` argument from a model tool call. Arguments
/// that are not JSON, or omit `query`, mean the model left its contract.
pub fn parse_query_argument(arguments: &str) -> Result<String> {
    let value: Value = serde_json::from_str(arguments).map_err(|_| {
        ReviewError::MalformedResponse(format!("Tool arguments are not valid JSON: {}", arguments))
    })?;

    value
        .get("query")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ReviewError::MalformedResponse(format!(
                "Tool arguments missing string 'query': {}",
                arguments
            ))
        })
}
