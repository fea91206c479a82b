//! Evaluation result rendering
//!
//! Turns a [`FlagsState`] into rows of flag key, variation label and reason
//! explanation. Pure: no I/O, no state kept between calls.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::Value;

use crate::api::FlagCatalog;
use crate::flags::{EvaluationReason, FlagsState, ReasonKind};

/// Explanation used for reason kinds outside the known set
pub const UNKNOWN_REASON: &str = "Unknown evaluation reason";

/// One rendered flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedFlag {
    /// Flag key
    pub key: String,
    /// Variation name from flag metadata, or the raw value as JSON
    pub variation_label: String,
    /// Raw variation value
    pub value: Value,
    /// Reason kind as sent by the engine
    pub reason_kind: String,
    /// Human readable explanation of the reason kind
    pub explanation: String,
    /// Extra reason detail, one line each
    pub details: Vec<String>,
}

/// Explanation for a reason kind.
#[must_use]
pub fn explain(kind: &ReasonKind) -> &'static str {
    match kind {
        ReasonKind::Off => "The flag was off and therefore returned its configured off value.",
        ReasonKind::Fallthrough => {
            "The flag was on but the context did not match any targets or rules."
        }
        ReasonKind::TargetMatch => "The context key was specifically targeted for this flag.",
        ReasonKind::RuleMatch { .. } => "The context matched one of the flag's rules.",
        ReasonKind::PrerequisiteFailed { .. } => {
            "The flag was considered off because it had at least one prerequisite flag that either was off or did not return the desired variation."
        }
        ReasonKind::Error { .. } => {
            "The flag could not be evaluated, e.g. because it does not exist or due to an unexpected error."
        }
        ReasonKind::Unknown(_) => UNKNOWN_REASON,
    }
}

/// Detail lines for a reason, in display order.
#[must_use]
pub fn reason_details(reason: &EvaluationReason) -> Vec<String> {
    let mut details = Vec::new();

    if reason.in_experiment {
        details.push("Part of an experiment".to_string());
    }

    match &reason.kind {
        ReasonKind::PrerequisiteFailed {
            prerequisite_key: Some(key),
        } => details.push(format!("Prerequisite flag: {key}")),
        ReasonKind::RuleMatch {
            rule_id,
            rule_index,
        } => {
            if let Some(id) = rule_id {
                details.push(format!("Rule ID: {id}"));
            }
            if let Some(index) = rule_index {
                details.push(format!("Rule index: {index}"));
            }
        }
        ReasonKind::Error {
            error_kind: Some(kind),
        } => details.push(format!("Error type: {kind}")),
        _ => {}
    }

    if let Some(status) = reason.big_segments_status {
        details.push(format!("Big segments status: {status}"));
    }

    details
}

/// Label shown for a variation: the metadata name when one exists, else the value itself.
#[must_use]
pub fn variation_label(
    catalog: Option<&FlagCatalog>,
    key: &str,
    variation: Option<u32>,
    value: &Value,
) -> String {
    catalog
        .and_then(|c| variation.and_then(|index| c.variation_name(key, index)))
        .map_or_else(|| value.to_string(), str::to_string)
}

/// Render every flag of a snapshot, in key order.
#[must_use]
pub fn render(state: &FlagsState, catalog: Option<&FlagCatalog>) -> Vec<RenderedFlag> {
    state
        .iter()
        .map(|(key, value, record)| {
            let (reason_kind, explanation, details) = match &record.reason {
                Some(reason) => (
                    reason.kind.as_str().to_string(),
                    explain(&reason.kind).to_string(),
                    reason_details(reason),
                ),
                None => (String::new(), UNKNOWN_REASON.to_string(), Vec::new()),
            };
            RenderedFlag {
                key: key.to_string(),
                variation_label: variation_label(catalog, key, record.variation, value),
                value: value.clone(),
                reason_kind,
                explanation,
                details,
            }
        })
        .collect()
}

/// Plain-text table for terminal output.
#[must_use]
pub fn to_table(rows: &[RenderedFlag]) -> String {
    let key_width = rows.iter().map(|r| r.key.len()).max().unwrap_or(0).max(4);
    let label_width = rows
        .iter()
        .map(|r| r.variation_label.len())
        .max()
        .unwrap_or(0)
        .max(9);

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<key_width$}  {:<label_width$}  REASON",
        "FLAG", "VARIATION"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:<key_width$}  {:<label_width$}  {}",
            row.key, row.variation_label, row.reason_kind
        );
        let _ = writeln!(out, "{:key_width$}  {:label_width$}    {}", "", "", row.explanation);
        for detail in &row.details {
            let _ = writeln!(out, "{:key_width$}  {:label_width$}    - {detail}", "", "");
        }
    }
    out
}
