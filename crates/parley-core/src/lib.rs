//! # parley-core
//!
//! Foundation types for the Parley chat session layer.
//!
//! - **Branded IDs**: `ChatId`, `TenantId`, `ClientId`, `MessageId` as newtypes
//! - **Wire frames**: [`frames::OutboundFrame`] serialized as `{type, data}`
//! - **Events**: canonical [`events::SessionEvent`] and the closed [`events::EventKind`] set
//! - **Messages**: [`messages::Message`] with status and metadata
//! - **State**: [`state::ConnectionState`] and its transition graph
//! - **Errors**: [`errors::SessionError`] hierarchy via `thiserror`, error classification
//! - **Retry**: backoff math with jitter, class floors, and cap
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod constants;
pub mod errors;
pub mod events;
pub mod frames;
pub mod ids;
pub mod logging;
pub mod messages;
pub mod retry;
pub mod state;

pub use errors::{ErrorClass, Result, SessionError, TimeoutKind, ValidationError};
pub use events::{EventKind, InboundEnvelope, ResponseComplete, SessionEvent};
pub use frames::OutboundFrame;
pub use ids::{ChatId, ClientId, MessageId, TenantId, VisitorId};
pub use messages::{Message, MessageMetadata, MessageStatus, Role, Source};
pub use state::ConnectionState;
