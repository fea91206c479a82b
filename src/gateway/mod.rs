//! HTTP surface: sign-in, workspace navigation and evaluation

pub mod auth;
mod evaluate;
mod router;
mod server;

pub use auth::{CurrentSession, MaybeSession};
pub use evaluate::{
    DEFAULT_CONTEXT_KIND, EvaluateRequest, EvaluationGateway, EvaluationTarget, authorize,
};
pub use router::{AppState, create_router, http_client};
pub use server::App;
