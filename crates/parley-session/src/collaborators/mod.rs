//! HTTP collaborators: session creation and readiness probing.

pub mod health;
mod http;
pub mod session_service;

pub use health::{HealthProbe, HttpHealthProbe};
pub use session_service::{CreateSessionRequest, HttpSessionService, SessionService};
