//! Fixed-rate send cadence for Shinobi sessions.
//!
//! Every participant pushes one entity batch per tick: the host at 60 Hz,
//! clients at 30 Hz. [`TickScheduler`] yields those ticks from inside the
//! send loop's `tokio::select!`, next to the control queue and the close
//! signal:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         _ = conn.closed() => break,
//!         Some(msg) = control_rx.recv() => { /* write control message */ }
//!         _ = ticker.next_tick() => {
//!             /* assemble and write the batch */
//!             ticker.tick_done();
//!         }
//!     }
//! }
//! ```
//!
//! `next_tick` only touches the schedule after its sleep completes, so a
//! tick lost to another `select!` branch is simply awaited again.

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant as TokioInstant, sleep_until};

/// Send rate of the hosting participant.
pub const HOST_SEND_HZ: u32 = 60;
/// Send rate of a joining participant.
pub const CLIENT_SEND_HZ: u32 = 30;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How the schedule recovers after a late tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPolicy {
    /// Restart the grid one period after the late tick. Batches for the
    /// missed periods would be stale, so none are sent.
    #[default]
    Skip,
    /// Stay on the original grid. The tick after a late one may fire
    /// immediately.
    Drop,
}

/// Configuration for a [`TickScheduler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Batches per second, `1..=128`.
    pub tick_rate_hz: u32,
    pub policy: TickPolicy,
    /// Share of one period (0.0 to 1.0) a send may take before it is logged.
    pub budget_warn_threshold: f64,
    /// Upper bound, in microseconds, of a random delay before the first
    /// tick. Keeps the host's loopback client off the registry's beat.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: CLIENT_SEND_HZ,
            policy: TickPolicy::Skip,
            budget_warn_threshold: 0.8,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Self::default()
        }
    }

    /// Brings the rate and the warning threshold into range.
    pub fn validated(self) -> Self {
        let tick_rate_hz = self.tick_rate_hz.clamp(1, Self::MAX_TICK_RATE_HZ);
        if tick_rate_hz != self.tick_rate_hz {
            tracing::warn!(requested = self.tick_rate_hz, tick_rate_hz, "send rate out of range");
        }
        Self {
            tick_rate_hz,
            budget_warn_threshold: self.budget_warn_threshold.clamp(0.0, 1.0),
            ..self
        }
    }

    /// Length of one period.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// One fired tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Counts from 1.
    pub number: u64,
    /// How far past its due time the tick woke.
    pub late_by: Duration,
    /// Periods passed over under [`TickPolicy::Skip`].
    pub skipped: u64,
}

/// Fixed-rate ticker owned by one send loop.
pub struct TickScheduler {
    config: TickConfig,
    period: Duration,
    due: TokioInstant,
    ticks: u64,
    late_ticks: u64,
    /// Wall-clock start of the tick in progress, cleared by `tick_done`.
    started: Option<Instant>,
}

impl TickScheduler {
    /// The first tick is one period, plus jitter, from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let period = config.tick_duration();
        let jitter = match config.initial_jitter_us {
            0 => Duration::ZERO,
            max => Duration::from_micros(rand::rng().random_range(0..max)),
        };
        tracing::debug!(rate_hz = config.tick_rate_hz, policy = ?config.policy, "send ticker started");

        Self {
            config,
            period,
            due: TokioInstant::now() + period + jitter,
            ticks: 0,
            late_ticks: 0,
            started: None,
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next tick is due and schedules the one after.
    pub async fn next_tick(&mut self) -> Tick {
        let due = self.due;
        sleep_until(due).await;

        let now = TokioInstant::now();
        let late_by = now.saturating_duration_since(due);
        self.ticks += 1;
        self.started = Some(Instant::now());

        // Under a tenth of a period is timer noise.
        let late = late_by > self.period / 10;
        if late {
            self.late_ticks += 1;
        }

        let mut skipped = 0;
        self.due = match self.config.policy {
            TickPolicy::Skip => {
                skipped = (late_by.as_nanos() / self.period.as_nanos()) as u64;
                if skipped > 0 {
                    tracing::warn!(
                        tick = self.ticks,
                        skipped,
                        late_ms = late_by.as_millis() as u64,
                        "send loop fell behind"
                    );
                }
                now + self.period
            }
            TickPolicy::Drop => due + self.period,
        };
        tracing::trace!(tick = self.ticks, late, "tick");

        Tick {
            number: self.ticks,
            late_by,
            skipped,
        }
    }

    /// Ends the tick in progress and returns the share of the period it
    /// used, or `None` if no tick was in progress.
    pub fn tick_done(&mut self) -> Option<f64> {
        let spent = self.started.take()?.elapsed();
        let used = spent.as_secs_f64() / self.period.as_secs_f64();
        if used >= self.config.budget_warn_threshold {
            tracing::warn!(
                tick = self.ticks,
                spent_ms = spent.as_secs_f64() * 1000.0,
                period_ms = self.period.as_secs_f64() * 1000.0,
                "send used most of its tick"
            );
        }
        Some(used)
    }

    /// Ticks fired so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Ticks that woke more than a tenth of a period late.
    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    pub fn rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}
