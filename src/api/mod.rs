//! Flag-management REST API
//!
//! Typed client for the handful of bearer-authorized endpoints the tester
//! needs: projects, environments (which carry the evaluation key), flag
//! metadata and the signed-in member's identity.

mod client;
mod types;

pub use client::ApiClient;
pub use types::{
    CallerIdentity, Collection, Environment, FlagCatalog, FlagSummary, Member, Project, Variation,
};
