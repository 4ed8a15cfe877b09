//! # parley-session
//!
//! Client-side session layer for a real-time chat backend.
//!
//! - **Normalizer**: raw WebSocket frames into canonical [`parley_core::SessionEvent`]s
//! - **Connection**: [`ConnectionManager`] owns the socket, readiness handshake,
//!   heartbeat watchdog, duplicate suppression, and classified reconnection
//! - **Registry**: [`MessageRegistry`] tracks message lifecycles and reconciles
//!   temporary ids with server ids
//! - **Streams**: [`StreamAssembler`] rebuilds assistant responses from fragments
//! - **Typing**: [`TypingThrottle`] rate-limits typing signals
//! - **Collaborators**: HTTP session creation and readiness probing
//! - **Coordinator**: [`SessionCoordinator`] wires the above together for a UI

#![deny(unsafe_code)]

pub mod collaborators;
pub mod connection;
pub mod coordinator;
pub mod normalizer;
pub mod registry;
pub mod stream;
pub mod typing;

pub use collaborators::{
    CreateSessionRequest, HealthProbe, HttpHealthProbe, HttpSessionService, SessionService,
};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStats, ReconnectState};
pub use coordinator::{
    ChatSession, CoordinatorConfig, InitializeOptions, SendOptions, SessionCoordinator,
    SessionUpdate,
};
pub use registry::{LifecycleState, MessageRegistry, RegistryEntry, similarity};
pub use stream::{StreamAssembler, StreamConfig, StreamUpdate};
pub use typing::{TypingConfig, TypingStats, TypingThrottle};
