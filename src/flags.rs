//! Flags state snapshot and evaluation reasons
//!
//! The canonical JSON form matches what the evaluation engine produces:
//!
//! ```json
//! {
//!   "my-flag": true,
//!   "$flagsState": {
//!     "my-flag": { "variation": 0, "version": 7, "reason": { "kind": "FALLTHROUGH" } }
//!   },
//!   "$valid": true
//! }
//! ```
//!
//! Maps are ordered by flag key so that equal snapshots serialize to equal bytes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::Error as _,
    ser::SerializeMap,
};
use serde_json::Value;

const FLAGS_STATE_KEY: &str = "$flagsState";
const VALID_KEY: &str = "$valid";

/// Big segment store health attached to a reason
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BigSegmentsStatus {
    /// Store queried successfully
    Healthy,
    /// Store data may be out of date
    Stale,
    /// No store configured
    NotConfigured,
    /// Store query failed
    StoreError,
}

impl fmt::Display for BigSegmentsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Healthy => "HEALTHY",
            Self::Stale => "STALE",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::StoreError => "STORE_ERROR",
        };
        f.write_str(s)
    }
}

/// Why a flag resolved to its variation, with kind-specific detail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonKind {
    /// Flag was off
    Off,
    /// No target or rule matched
    Fallthrough,
    /// Context key was individually targeted
    TargetMatch,
    /// A rule matched
    RuleMatch {
        /// Rule identifier
        rule_id: Option<String>,
        /// Position of the rule in the flag
        rule_index: Option<u32>,
    },
    /// A prerequisite flag did not produce the required variation
    PrerequisiteFailed {
        /// Key of the failing prerequisite
        prerequisite_key: Option<String>,
    },
    /// Evaluation failed
    Error {
        /// Engine-specific error kind
        error_kind: Option<String>,
    },
    /// Kind this build does not know; kept verbatim
    Unknown(String),
}

impl ReasonKind {
    /// Wire name of the kind
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Off => "OFF",
            Self::Fallthrough => "FALLTHROUGH",
            Self::TargetMatch => "TARGET_MATCH",
            Self::RuleMatch { .. } => "RULE_MATCH",
            Self::PrerequisiteFailed { .. } => "PREREQUISITE_FAILED",
            Self::Error { .. } => "ERROR",
            Self::Unknown(kind) => kind,
        }
    }
}

/// Structured evaluation reason
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawReason", into = "RawReason")]
pub struct EvaluationReason {
    /// Reason kind and its detail
    pub kind: ReasonKind,
    /// Big segment status, present only when big segments were queried
    pub big_segments_status: Option<BigSegmentsStatus>,
    /// Whether the evaluation took part in an experiment
    pub in_experiment: bool,
}

impl EvaluationReason {
    /// Reason without big segment or experiment annotations
    #[must_use]
    pub fn new(kind: ReasonKind) -> Self {
        Self {
            kind,
            big_segments_status: None,
            in_experiment: false,
        }
    }
}

/// Flat wire shape of a reason
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReason {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rule_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prerequisite_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    big_segments_status: Option<BigSegmentsStatus>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    in_experiment: bool,
}

impl From<RawReason> for EvaluationReason {
    fn from(raw: RawReason) -> Self {
        let kind = match raw.kind.as_str() {
            "OFF" => ReasonKind::Off,
            "FALLTHROUGH" => ReasonKind::Fallthrough,
            "TARGET_MATCH" => ReasonKind::TargetMatch,
            "RULE_MATCH" => ReasonKind::RuleMatch {
                rule_id: raw.rule_id,
                rule_index: raw.rule_index,
            },
            "PREREQUISITE_FAILED" => ReasonKind::PrerequisiteFailed {
                prerequisite_key: raw.prerequisite_key,
            },
            "ERROR" => ReasonKind::Error {
                error_kind: raw.error_kind,
            },
            _ => ReasonKind::Unknown(raw.kind),
        };
        Self {
            kind,
            big_segments_status: raw.big_segments_status,
            in_experiment: raw.in_experiment,
        }
    }
}

impl From<EvaluationReason> for RawReason {
    fn from(reason: EvaluationReason) -> Self {
        let mut raw = RawReason {
            kind: reason.kind.as_str().to_string(),
            big_segments_status: reason.big_segments_status,
            in_experiment: reason.in_experiment,
            ..RawReason::default()
        };
        match reason.kind {
            ReasonKind::RuleMatch {
                rule_id,
                rule_index,
            } => {
                raw.rule_id = rule_id;
                raw.rule_index = rule_index;
            }
            ReasonKind::PrerequisiteFailed { prerequisite_key } => {
                raw.prerequisite_key = prerequisite_key;
            }
            ReasonKind::Error { error_kind } => raw.error_kind = error_kind,
            ReasonKind::Off
            | ReasonKind::Fallthrough
            | ReasonKind::TargetMatch
            | ReasonKind::Unknown(_) => {}
        }
        raw
    }
}

/// Per-flag evaluation record inside `$flagsState`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    /// Index of the selected variation; absent when the flag fell back to the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<u32>,
    /// Flag version the evaluation used
    #[serde(default)]
    pub version: u64,
    /// Evaluation reason, present when reasons were requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EvaluationReason>,
    /// Whether the flag has event tracking enabled
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub track_events: bool,
}

/// Full result of evaluating every flag of an environment against one context
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlagsState {
    values: BTreeMap<String, Value>,
    flags: BTreeMap<String, FlagRecord>,
    valid: bool,
}

impl FlagsState {
    /// Empty snapshot with the given validity
    #[must_use]
    pub fn new(valid: bool) -> Self {
        Self {
            values: BTreeMap::new(),
            flags: BTreeMap::new(),
            valid,
        }
    }

    /// Add (or replace) one flag's result
    pub fn insert(&mut self, key: impl Into<String>, value: Value, record: FlagRecord) {
        let key = key.into();
        self.values.insert(key.clone(), value);
        self.flags.insert(key, record);
    }

    /// Whether every flag evaluated without an internal error
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Variation value of one flag
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Evaluation record of one flag
    #[must_use]
    pub fn record(&self, key: &str) -> Option<&FlagRecord> {
        self.flags.get(key)
    }

    /// Flags in key order with their value and record
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value, &FlagRecord)> {
        self.flags.iter().map(|(key, record)| {
            let value = self.values.get(key).unwrap_or(&Value::Null);
            (key.as_str(), value, record)
        })
    }

    /// Number of flags in the snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// True if no flag was evaluated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl Serialize for FlagsState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 2))?;
        for (key, value) in &self.values {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry(FLAGS_STATE_KEY, &self.flags)?;
        map.serialize_entry(VALID_KEY, &self.valid)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for FlagsState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut object = serde_json::Map::<String, Value>::deserialize(deserializer)?;

        let flags: BTreeMap<String, FlagRecord> = match object.remove(FLAGS_STATE_KEY) {
            Some(raw) => serde_json::from_value(raw).map_err(D::Error::custom)?,
            None => BTreeMap::new(),
        };
        let valid = match object.remove(VALID_KEY) {
            Some(Value::Bool(valid)) => valid,
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "{VALID_KEY} must be a boolean, got {other}"
                )));
            }
            None => false,
        };

        Ok(Self {
            values: object.into_iter().collect(),
            flags,
            valid,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn sample() -> FlagsState {
        let mut state = FlagsState::new(true);
        state.insert(
            "checkout-v2",
            json!(true),
            FlagRecord {
                variation: Some(0),
                version: 12,
                reason: Some(EvaluationReason {
                    kind: ReasonKind::RuleMatch {
                        rule_id: Some("r1".into()),
                        rule_index: Some(2),
                    },
                    big_segments_status: Some(BigSegmentsStatus::Healthy),
                    in_experiment: true,
                }),
                track_events: false,
            },
        );
        state.insert(
            "banner-text",
            json!("hello"),
            FlagRecord {
                variation: Some(1),
                version: 3,
                reason: Some(EvaluationReason::new(ReasonKind::Fallthrough)),
                track_events: true,
            },
        );
        state
    }

    #[test]
    fn serializes_to_canonical_form() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["checkout-v2"], json!(true));
        assert_eq!(value["banner-text"], json!("hello"));
        assert_eq!(value["$valid"], json!(true));
        assert_eq!(
            value["$flagsState"]["checkout-v2"],
            json!({
                "variation": 0,
                "version": 12,
                "reason": {
                    "kind": "RULE_MATCH",
                    "ruleIndex": 2,
                    "ruleId": "r1",
                    "bigSegmentsStatus": "HEALTHY",
                    "inExperiment": true
                }
            })
        );
        assert_eq!(
            value["$flagsState"]["banner-text"]["reason"],
            json!({ "kind": "FALLTHROUGH" })
        );
    }

    #[test]
    fn json_round_trip_preserves_snapshot() {
        let original = sample();
        let text = serde_json::to_string(&original).unwrap();
        let parsed: FlagsState = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn serialization_is_deterministic() {
        let a = serde_json::to_string(&sample()).unwrap();
        let b = serde_json::to_string(&sample()).unwrap();
        assert_eq!(a, b);
        // keys sorted: banner-text before checkout-v2
        assert!(a.find("banner-text").unwrap() < a.find("checkout-v2").unwrap());
    }

    #[test]
    fn unknown_reason_kind_is_preserved() {
        let reason: EvaluationReason = serde_json::from_value(json!({"kind": "WEIRD"})).unwrap();
        assert_eq!(reason.kind, ReasonKind::Unknown("WEIRD".into()));
        assert_eq!(
            serde_json::to_value(&reason).unwrap(),
            json!({"kind": "WEIRD"})
        );
    }

    #[test]
    fn prerequisite_and_error_details_parse() {
        let reason: EvaluationReason = serde_json::from_value(
            json!({"kind": "PREREQUISITE_FAILED", "prerequisiteKey": "base-flag"}),
        )
        .unwrap();
        assert_eq!(
            reason.kind,
            ReasonKind::PrerequisiteFailed {
                prerequisite_key: Some("base-flag".into())
            }
        );

        let reason: EvaluationReason =
            serde_json::from_value(json!({"kind": "ERROR", "errorKind": "FLAG_NOT_FOUND"}))
                .unwrap();
        assert_eq!(
            reason.kind,
            ReasonKind::Error {
                error_kind: Some("FLAG_NOT_FOUND".into())
            }
        );
    }

    #[test]
    fn rejects_non_boolean_valid() {
        let result: Result<FlagsState, _> =
            serde_json::from_value(json!({"$flagsState": {}, "$valid": "yes"}));
        assert!(result.is_err());
    }

    #[test]
    fn missing_markers_default_to_invalid_empty() {
        let state: FlagsState = serde_json::from_value(json!({})).unwrap();
        assert!(state.is_empty());
        assert!(!state.is_valid());
    }
}
