//! Transport connection: URL binding, lifecycle, heartbeat, deduplication,
//! and listener dispatch.

pub mod bus;
pub mod config;
pub mod dedup;
pub mod heartbeat;
pub mod manager;
pub mod url;

pub use bus::{EventBus, EventHandler};
pub use config::ConnectionConfig;
pub use dedup::{EventDeduplicator, fingerprint};
pub use manager::{ConnectionManager, ConnectionStats, ReconnectState};
pub use url::build_connection_url;
