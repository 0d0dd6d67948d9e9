//! Per-order work timer.
//!
//! Tracks active seconds spent in the current stage. Only RUNNING intervals
//! count: every transition out of RUNNING banks `now - started_at` into
//! `accumulated_seconds` and clears `started_at`.
//!
//! The timer is a plain value. It never touches storage or the catalog; the
//! workflow engine persists it and uses the value returned by [`TimerState::finish`]
//! to close the stage's history record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::WaitCause;
use crate::error::{Error, Result};

/// Timer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimerStatus {
    Stopped,
    Running,
    Paused,
}

impl std::fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => f.pad("stopped"),
            Self::Running => f.pad("running"),
            Self::Paused => f.pad("paused"),
        }
    }
}

impl std::str::FromStr for TimerStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            _ => Err(format!("Unknown timer status: {}", s)),
        }
    }
}

/// Timer state of one work order.
///
/// `started_at` is set iff the timer is RUNNING; `pause_reason` is set iff it is PAUSED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub status: TimerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub accumulated_seconds: u64,
    pub pause_reason: Option<String>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            status: TimerStatus::Stopped,
            started_at: None,
            accumulated_seconds: 0,
            pause_reason: None,
        }
    }
}

impl TimerState {
    /// Start a fresh stage clock. Requires STOPPED; resets the banked seconds.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.require("start", TimerStatus::Stopped)?;
        self.status = TimerStatus::Running;
        self.started_at = Some(now);
        self.accumulated_seconds = 0;
        self.pause_reason = None;
        Ok(())
    }

    /// Pause a running clock for an active wait cause.
    pub fn pause(&mut self, now: DateTime<Utc>, cause: &WaitCause) -> Result<()> {
        if !cause.is_active {
            return Err(Error::UnknownWaitCause(cause.id.clone()));
        }
        self.require("pause", TimerStatus::Running)?;
        self.bank(now);
        self.status = TimerStatus::Paused;
        self.pause_reason = Some(cause.id.clone());
        Ok(())
    }

    /// Resume a paused clock.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.require("resume", TimerStatus::Paused)?;
        self.status = TimerStatus::Running;
        self.started_at = Some(now);
        self.pause_reason = None;
        Ok(())
    }

    /// Stop the clock from RUNNING or PAUSED and return the stage's active seconds.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<u64> {
        match self.status {
            TimerStatus::Running => self.bank(now),
            TimerStatus::Paused => {}
            TimerStatus::Stopped => {
                return Err(Error::InvalidTimerTransition {
                    operation: "finish",
                    status: self.status,
                })
            }
        }
        self.status = TimerStatus::Stopped;
        self.pause_reason = None;
        Ok(self.accumulated_seconds)
    }

    /// Active seconds as of `now`. Pure read.
    pub fn current_active_seconds(&self, now: DateTime<Utc>) -> u64 {
        match (self.status, self.started_at) {
            (TimerStatus::Running, Some(started)) => {
                self.accumulated_seconds + elapsed_seconds(started, now)
            }
            _ => self.accumulated_seconds,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == TimerStatus::Paused
    }

    fn require(&self, operation: &'static str, expected: TimerStatus) -> Result<()> {
        if self.status != expected {
            return Err(Error::InvalidTimerTransition {
                operation,
                status: self.status,
            });
        }
        Ok(())
    }

    fn bank(&mut self, now: DateTime<Utc>) {
        if let Some(started) = self.started_at.take() {
            self.accumulated_seconds += elapsed_seconds(started, now);
        }
    }
}

/// Whole seconds between two instants; a clock that went backwards counts as zero.
fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_seconds().max(0) as u64
}
