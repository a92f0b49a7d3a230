//! Timing primitives for Lobbyforge's background loops.
//!
//! Two pieces:
//!
//! - [`Cadence`]: a fixed-interval timer with a jittered first fire,
//!   pause/resume, and skip-ahead on overrun. The session runtime keeps
//!   one for heartbeats and one for polls; the orchestrator keeps one
//!   for its timeout checks.
//! - [`Backoff`]: exponential delay growth with a ceiling, reset on
//!   success.
//!
//! # Integration
//!
//! A cadence is meant to sit inside a `tokio::select!` loop next to a
//! cancellation branch:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = cancel.cancelled() => break,
//!         _ = heartbeat.wait() => { /* ping */ }
//!         _ = poll.wait() => { /* fetch snapshot */ }
//!     }
//! }
//! ```
//!
//! All instants are `tokio::time` instants so tests can drive time with
//! `tokio::time::pause()`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// Information about one firing of a [`Cadence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CadenceTick {
    /// Monotonically increasing fire count (starts at 1).
    pub count: u64,
    /// How late this fire was relative to its deadline.
    pub late_by: Duration,
    /// Whole intervals skipped because the loop fell behind.
    pub skipped: u64,
}

/// A fixed-interval timer.
///
/// Unlike `tokio::time::Interval` it can be paused indefinitely (the
/// wait future pends forever) and it never bursts to catch up: after an
/// overrun the next deadline is scheduled from *now*.
#[derive(Debug)]
pub struct Cadence {
    name: &'static str,
    interval: Duration,
    next: Instant,
    count: u64,
    paused: bool,
}

impl Cadence {
    /// Creates a cadence whose first fire is one full `interval` away.
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self::with_jitter(name, interval, Duration::ZERO)
    }

    /// Creates a cadence whose first fire is delayed by an extra random
    /// amount in `0..max_jitter`, so loops started together drift apart.
    pub fn with_jitter(
        name: &'static str,
        interval: Duration,
        max_jitter: Duration,
    ) -> Self {
        let interval = interval.max(Duration::from_millis(1));
        let jitter = if max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let micros = max_jitter.as_micros().min(u64::MAX as u128) as u64;
            Duration::from_micros(rand::rng().random_range(0..micros.max(1)))
        };
        debug!(cadence = name, ?interval, ?jitter, "cadence created");
        Self {
            name,
            interval,
            next: Instant::now() + interval + jitter,
            count: 0,
            paused: false,
        }
    }

    /// Waits until the next deadline. Pends forever while paused.
    pub async fn wait(&mut self) -> CadenceTick {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let deadline = self.next;
        time::sleep_until(deadline).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(deadline);
        let skipped =
            (late_by.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        if skipped > 0 {
            warn!(
                cadence = self.name,
                skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "cadence overrun, skipping ahead"
            );
        }

        self.count += 1;
        self.next = now + self.interval;
        trace!(cadence = self.name, count = self.count, "cadence fired");

        CadenceTick {
            count: self.count,
            late_by,
            skipped,
        }
    }

    /// Pauses the cadence. Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(cadence = self.name, "cadence paused");
        }
    }

    /// Resumes after a pause; the next fire is one interval from now.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next = Instant::now() + self.interval;
            debug!(cadence = self.name, "cadence resumed");
        }
    }

    /// Pushes the next fire to `delay` from now. Used to apply backoff
    /// without changing the baseline interval.
    pub fn delay_next(&mut self, delay: Duration) {
        self.next = Instant::now() + delay;
    }

    /// Makes the next [`wait`](Self::wait) resolve immediately.
    pub fn fire_now(&mut self) {
        self.next = Instant::now();
    }

    /// Replaces the baseline interval. Takes effect after the next fire.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval.max(Duration::from_millis(1));
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Time left until the next fire (zero if overdue).
    pub fn remaining(&self) -> Duration {
        self.next.saturating_duration_since(Instant::now())
    }
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Parameters for [`Backoff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base: Duration,
    /// Ceiling no delay exceeds.
    pub max: Duration,
    /// Growth factor per consecutive failure. Values below 1.0 are
    /// treated as 1.0.
    pub multiplier: f64,
    /// Random spread as a fraction of the computed delay (0.0–1.0).
    /// 0.1 means ±10%.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(3),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

/// Exponential backoff: `base * multiplier^n`, clamped to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let mut config = config;
        config.multiplier = config.multiplier.max(1.0);
        config.jitter = config.jitter.clamp(0.0, 1.0);
        if config.max < config.base {
            config.max = config.base;
        }
        Self {
            config,
            failures: 0,
        }
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.failures.min(32) as i32;
        self.failures = self.failures.saturating_add(1);

        let raw = self.config.base.as_secs_f64()
            * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max.as_secs_f64());

        let jittered = if self.config.jitter > 0.0 {
            let spread = capped * self.config.jitter;
            let offset = rand::rng().random_range(-spread..=spread);
            (capped + offset).clamp(0.0, self.config.max.as_secs_f64())
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Forgets past failures; the next delay is `base` again.
    pub fn reset(&mut self) {
        if self.failures > 0 {
            trace!(failures = self.failures, "backoff reset");
        }
        self.failures = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
