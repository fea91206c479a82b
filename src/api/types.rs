//! Upstream payload schemas
//!
//! Only the fields the tester reads are modelled; everything optional upstream
//! is optional here and unknown fields are ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `{ "items": [...] }` envelope used by every collection endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct Collection<T> {
    /// Collection members
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Project summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Project key
    pub key: String,
    /// Display name
    #[serde(default)]
    pub name: String,
}

/// Environment summary or detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Environment key
    pub key: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Server-side evaluation key; never echoed back to the browser
    #[serde(default, rename = "apiKey", skip_serializing)]
    pub api_key: Option<String>,
}

/// One variation of a flag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    /// Variation value
    #[serde(default)]
    pub value: Value,
    /// Optional human readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Flag metadata used to label variations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagSummary {
    /// Flag key
    pub key: String,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Variations in index order
    #[serde(default)]
    pub variations: Vec<Variation>,
}

/// Flag metadata indexed by key
#[derive(Debug, Clone, Default)]
pub struct FlagCatalog {
    flags: HashMap<String, FlagSummary>,
}

impl FlagCatalog {
    /// Index a list of flags by key
    #[must_use]
    pub fn from_flags(flags: Vec<FlagSummary>) -> Self {
        Self {
            flags: flags.into_iter().map(|f| (f.key.clone(), f)).collect(),
        }
    }

    /// Name of a flag's variation, if the flag exists and the variation is named
    #[must_use]
    pub fn variation_name(&self, flag_key: &str, index: u32) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.flags
            .get(flag_key)?
            .variations
            .get(index)?
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
    }

    /// Metadata for one flag
    #[must_use]
    pub fn get(&self, flag_key: &str) -> Option<&FlagSummary> {
        self.flags.get(flag_key)
    }
}

/// Response of the caller-identity endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerIdentity {
    /// Account the token belongs to
    #[serde(default)]
    pub account_id: Option<String>,
    /// Member the token belongs to
    #[serde(default)]
    pub member_id: Option<String>,
    /// How the token was issued (e.g. `oauth`)
    #[serde(default)]
    pub auth_kind: Option<String>,
    /// Scopes granted to the token
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Member record from `members/me`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    /// Member ID
    #[serde(rename = "_id")]
    pub id: String,
    /// First name
    #[serde(default)]
    pub first_name: Option<String>,
    /// Last name
    #[serde(default)]
    pub last_name: Option<String>,
    /// Email address
    #[serde(default)]
    pub email: Option<String>,
    /// Built-in role
    #[serde(default)]
    pub role: Option<String>,
}
