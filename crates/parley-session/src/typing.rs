//! Keystroke → typing-indicator throttling.
//!
//! Raw keystrokes arrive far faster than the backend wants typing frames.
//! [`TypingThrottle`] emits at most one start per signaling period, spaced by
//! a minimum interval, and an automatic stop once keystrokes go quiet.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use parley_settings::TypingSettings;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

/// Emits one typing frame. Errors are logged, never propagated.
pub type TypingCallback = Arc<dyn Fn() -> parley_core::Result<()> + Send + Sync>;

/// Throttle timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypingConfig {
    /// Minimum spacing between emitted starts.
    pub min_start_interval: Duration,
    /// Minimum spacing between emitted stops while not signaling.
    pub min_stop_interval: Duration,
    /// Keystroke silence after which a stop is emitted.
    pub stop_delay: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            min_start_interval: Duration::from_secs(2),
            min_stop_interval: Duration::from_secs(1),
            stop_delay: Duration::from_secs(2),
        }
    }
}

impl From<&TypingSettings> for TypingConfig {
    fn from(s: &TypingSettings) -> Self {
        Self {
            min_start_interval: Duration::from_millis(s.min_start_interval_ms),
            min_stop_interval: Duration::from_millis(s.min_stop_interval_ms),
            stop_delay: Duration::from_millis(s.stop_delay_ms),
        }
    }
}

/// Throttle counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TypingStats {
    /// Start frames emitted.
    pub starts: u64,
    /// Stop frames emitted.
    pub stops: u64,
    /// Signals suppressed.
    pub throttled: u64,
    /// `throttled / (starts + throttled) × 100`.
    pub reduction_percent: f64,
}

#[derive(Default)]
struct TypingState {
    signaling: bool,
    last_start: Option<Instant>,
    last_stop: Option<Instant>,
    starts: u64,
    stops: u64,
    throttled: u64,
    generation: u64,
    stop_timer: Option<JoinHandle<()>>,
}

impl TypingState {
    fn cancel_stop_timer(&mut self) {
        self.generation += 1;
        if let Some(task) = self.stop_timer.take() {
            task.abort();
        }
    }

    fn mark_stopped(&mut self, now: Instant) {
        self.signaling = false;
        self.last_stop = Some(now);
        self.stops += 1;
    }
}

struct Inner {
    config: TypingConfig,
    on_start: TypingCallback,
    on_stop: TypingCallback,
    state: Mutex<TypingState>,
}

impl Inner {
    fn emit(callback: &TypingCallback, which: &'static str) {
        match catch_unwind(AssertUnwindSafe(|| callback())) {
            Ok(Ok(())) => debug!(signal = which, "typing signal sent"),
            Ok(Err(err)) => warn!(signal = which, error = %err, "typing signal failed"),
            Err(_) => error!(signal = which, "typing callback panicked"),
        }
    }
}

/// Rate-limits typing start/stop signals.
pub struct TypingThrottle {
    inner: Arc<Inner>,
}

impl TypingThrottle {
    /// Create a throttle invoking `on_start` / `on_stop` for emitted signals.
    pub fn new(config: TypingConfig, on_start: TypingCallback, on_stop: TypingCallback) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                on_start,
                on_stop,
                state: Mutex::new(TypingState::default()),
            }),
        }
    }

    /// Record a keystroke.
    pub fn start_typing(&self) {
        let emit = {
            let mut s = self.inner.state.lock();
            let now = Instant::now();
            let spaced = s
                .last_start
                .is_none_or(|t| now.duration_since(t) >= self.inner.config.min_start_interval);
            let emit = !s.signaling && spaced;
            if emit {
                s.signaling = true;
                s.last_start = Some(now);
                s.starts += 1;
            } else {
                s.throttled += 1;
            }
            self.arm_stop_timer(&mut s);
            emit
        };
        if emit {
            Inner::emit(&self.inner.on_start, "start");
        }
    }

    fn arm_stop_timer(&self, s: &mut TypingState) {
        s.cancel_stop_timer();
        let generation = s.generation;
        s.stop_timer = Some(tokio::spawn(auto_stop(
            Arc::downgrade(&self.inner),
            generation,
        )));
    }

    /// Explicit stop, e.g. when the input is cleared or submitted.
    pub fn stop_typing(&self) {
        {
            let mut s = self.inner.state.lock();
            s.cancel_stop_timer();
            let now = Instant::now();
            let recent = s
                .last_stop
                .is_some_and(|t| now.duration_since(t) < self.inner.config.min_stop_interval);
            if !s.signaling && recent {
                s.throttled += 1;
                return;
            }
            s.mark_stopped(now);
        }
        Inner::emit(&self.inner.on_stop, "stop");
    }

    /// Stop without throttling if currently signaling.
    pub fn force_stop(&self) {
        {
            let mut s = self.inner.state.lock();
            s.cancel_stop_timer();
            if !s.signaling {
                return;
            }
            s.mark_stopped(Instant::now());
        }
        Inner::emit(&self.inner.on_stop, "stop");
    }

    /// Whether a start has been emitted without a matching stop.
    pub fn is_typing(&self) -> bool {
        self.inner.state.lock().signaling
    }

    /// Counter snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> TypingStats {
        let s = self.inner.state.lock();
        let attempts = s.starts + s.throttled;
        let reduction_percent = if attempts == 0 {
            0.0
        } else {
            s.throttled as f64 / attempts as f64 * 100.0
        };
        TypingStats {
            starts: s.starts,
            stops: s.stops,
            throttled: s.throttled,
            reduction_percent,
        }
    }
}

impl Drop for TypingThrottle {
    fn drop(&mut self) {
        self.inner.state.lock().cancel_stop_timer();
    }
}

async fn auto_stop(inner: Weak<Inner>, generation: u64) {
    let Some(delay) = inner.upgrade().map(|i| i.config.stop_delay) else {
        return;
    };
    time::sleep(delay).await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut s = inner.state.lock();
        if s.generation != generation {
            return;
        }
        s.stop_timer = None;
        if !s.signaling {
            return;
        }
        s.mark_stopped(Instant::now());
    }
    debug!("typing idle, stopping");
    Inner::emit(&inner.on_stop, "stop");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
