//! Heartbeat handling and link liveness.
//!
//! The backend originates application-level pings; the client only echoes
//! them. Liveness is judged from inbound traffic: any frame counts, and a
//! link that stays silent past the heartbeat timeout is considered dead.

use std::time::Duration;

use parking_lot::Mutex;
use parley_core::events::SessionEvent;
use parley_core::frames::OutboundFrame;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of the watchdog loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No inbound traffic within the timeout window.
    TimedOut,
    /// The watchdog was cancelled externally.
    Cancelled,
}

/// Last time anything arrived on the link.
#[derive(Debug)]
pub struct LinkActivity {
    last_inbound: Mutex<Instant>,
}

impl Default for LinkActivity {
    fn default() -> Self {
        Self {
            last_inbound: Mutex::new(Instant::now()),
        }
    }
}

impl LinkActivity {
    /// Record inbound traffic now.
    pub fn touch(&self) {
        *self.last_inbound.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_inbound.lock().elapsed()
    }
}

/// The pong answering `event`, if it is a ping.
pub fn pong_for(event: &SessionEvent) -> Option<OutboundFrame> {
    match event {
        SessionEvent::Ping { timestamp } => Some(OutboundFrame::Pong {
            timestamp: timestamp.clone(),
        }),
        _ => None,
    }
}

/// Watch a link for inbound silence.
///
/// Checks four times per `timeout` window and returns
/// [`HeartbeatResult::TimedOut`] once the link has been idle for at least
/// `timeout`.
pub async fn run_watchdog(
    activity: &LinkActivity,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let period = (timeout / 4).max(Duration::from_millis(1));
    let mut check = time::interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = check.tick() => {
                if activity.idle_for() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}
