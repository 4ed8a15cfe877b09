//! Connection lifecycle states and the legal transition graph.

use serde::{Deserialize, Serialize};

/// Lifecycle state of the transport connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none pending.
    #[default]
    Disconnected,
    /// Socket handshake in progress.
    Connecting,
    /// Socket open, waiting for the backend's ready frame.
    Connected,
    /// Backend accepts application messages.
    Ready,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// Terminal failure; only an explicit `connect` leaves this state.
    Failed,
}

impl ConnectionState {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `disconnect()` is allowed from every state.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Failed, Ready, Reconnecting};
        if next == Disconnected {
            return true;
        }
        matches!(
            (self, next),
            (Disconnected | Failed, Connecting)
                | (Connecting, Connected | Reconnecting | Failed)
                | (Connected, Ready | Reconnecting | Failed)
                | (Ready, Reconnecting | Failed)
                | (Reconnecting, Connecting | Connected | Failed)
        )
    }

    /// Whether a socket is open (ready or not).
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Connected | Self::Ready)
    }

    /// Whether a connection attempt is underway or scheduled.
    #[must_use]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn happy_path_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Disconnected));
    }

    #[test]
    fn close_edges() {
        assert!(Ready.can_transition_to(Reconnecting));
        assert!(Ready.can_transition_to(Failed));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Reconnecting.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Connecting));
    }

    #[test]
    fn illegal_edges() {
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Failed.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Connecting));
    }

    #[test]
    fn disconnect_always_allowed() {
        for s in [Disconnected, Connecting, Connected, Ready, Reconnecting, Failed] {
            assert!(s.can_transition_to(Disconnected), "{s} -> disconnected");
        }
    }

    #[test]
    fn default_is_disconnected() {
        assert_eq!(ConnectionState::default(), Disconnected);
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
    }
}
