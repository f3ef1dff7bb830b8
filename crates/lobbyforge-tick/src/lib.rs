//! Periodic tick scheduler for Lobbyforge.
//!
//! The lobby is a cooperative state machine. Running tasks advance one
//! sub-state per tick, and pending signaling and host migrations are
//! checked for timeouts on the same beat. This crate provides that beat,
//! plus [`Stopwatch`] for the per-task deadlines measured against it.
//!
//! # Event-driven mode
//!
//! With `tick_rate_hz == 0`, [`TickScheduler::wait_for_tick`] never
//! resolves. Tasks then only move when the lobby is ticked by hand.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = commands.recv() => lobby.apply(cmd),
//!         Some(inbound) = inbound.recv() => lobby.on_inbound(inbound),
//!         info = scheduler.wait_for_tick() => {
//!             lobby.tick(info.now);
//!             scheduler.record_tick_end();
//!         }
//!     }
//! }
//! ```
//!
//! All instants are [`tokio::time::Instant`], so a paused test clock
//! controls every deadline.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Ticks per second. 0 disables the timer.
    pub tick_rate_hz: u32,
    /// Share of the period (0.0 to 1.0) a tick may spend before a warning
    /// is logged.
    pub budget_warn_threshold: f64,
    /// Upper bound in µs of the random delay added to the first tick, so
    /// lobbies started together don't poll the platform in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            budget_warn_threshold: 0.80,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Caps `tick_rate_hz` at [`Self::MAX_TICK_RATE_HZ`] and clamps the
    /// budget threshold into `0.0..=1.0`, logging each correction.
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick rate too high, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        if !(0.0..=1.0).contains(&self.budget_warn_threshold) {
            let clamped = self.budget_warn_threshold.clamp(0.0, 1.0);
            warn!(
                threshold = self.budget_warn_threshold,
                clamped, "tick budget threshold out of range"
            );
            self.budget_warn_threshold = clamped;
        }
        self
    }

    /// `None` when event-driven.
    pub fn period(&self) -> Option<Duration> {
        (self.tick_rate_hz > 0).then(|| Duration::from_secs(1) / self.tick_rate_hz)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// One fired tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    /// Clock sample for the whole tick. Every timeout checked while
    /// handling this tick compares against it.
    pub now: Instant,
    /// How far past its deadline the tick fired.
    pub late_by: Duration,
}

/// Fixed-rate timer owned by the lobby service.
///
/// A late wakeup never produces a burst: the next deadline is always one
/// period after the tick actually fired.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    period: Option<Duration>,
    ticks: u64,
    deadline: Option<Instant>,
    started: Option<Instant>,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.period();

        let deadline = period.map(|period| {
            let jitter = match config.initial_jitter_us {
                0 => Duration::ZERO,
                max => Duration::from_micros(rand::rng().random_range(0..max)),
            };
            Instant::now() + period + jitter
        });

        match period {
            Some(period) => debug!(
                rate_hz = config.tick_rate_hz,
                period_ms = period.as_secs_f64() * 1000.0,
                "tick scheduler created"
            ),
            None => debug!("tick scheduler created, event-driven"),
        }

        Self {
            config,
            period,
            ticks: 0,
            deadline,
            started: None,
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next deadline. Cancel-safe: dropping the future
    /// before it resolves leaves the schedule untouched.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (Some(deadline), Some(period)) = (self.deadline, self.period) else {
            return std::future::pending().await;
        };

        time::sleep_until(deadline).await;

        let now = Instant::now();
        let late_by = now.saturating_duration_since(deadline);
        self.ticks += 1;
        self.started = Some(now);
        self.deadline = Some(now + period);

        if late_by >= period {
            warn!(
                tick = self.ticks,
                late_ms = late_by.as_secs_f64() * 1000.0,
                missed = (late_by.as_nanos() / period.as_nanos()) as u64,
                "tick fired late"
            );
        } else {
            trace!(tick = self.ticks, "tick");
        }

        TickInfo {
            tick: self.ticks,
            now,
            late_by,
        }
    }

    /// Closes the current tick and returns the time spent on it, or `None`
    /// if no tick is open.
    pub fn record_tick_end(&mut self) -> Option<Duration> {
        let elapsed = self.started.take()?.elapsed();
        if let Some(period) = self.period {
            if elapsed.as_secs_f64() >= period.as_secs_f64() * self.config.budget_warn_threshold {
                warn!(
                    tick = self.ticks,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    period_ms = period.as_secs_f64() * 1000.0,
                    "tick over budget"
                );
            }
        }
        Some(elapsed)
    }

    pub fn is_event_driven(&self) -> bool {
        self.period.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }
}

// ---------------------------------------------------------------------------
// Stopwatch
// ---------------------------------------------------------------------------

/// Start instant of something with a deadline, checked against the
/// tick's clock sample rather than a fresh `Instant::now()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    pub fn start_at(now: Instant) -> Self {
        Self { started: now }
    }

    pub fn start() -> Self {
        Self::start_at(Instant::now())
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Zero if `now` precedes the start.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Strictly more than `limit` has passed.
    pub fn exceeded(&self, now: Instant, limit: Duration) -> bool {
        self.elapsed_at(now) > limit
    }

    pub fn restart(&mut self, now: Instant) {
        self.started = now;
    }
}
