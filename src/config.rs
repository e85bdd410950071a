use crate::{message::Mode, Error, Result};
use rand::Rng;
use std::time::Duration;

/// Fewest philosophers that still form a ring with two distinct neighbors each.
pub const MIN_PHILOSOPHERS: usize = 3;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Bounds, in milliseconds, of the randomized thinking and sleeping delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    min: u64,
    max: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self { min: 5, max: 50 }
    }
}

impl DelayRange {
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min > max {
            return Err(Error::Config(format!(
                "minimum delay {min}ms is above the maximum {max}ms"
            )));
        }
        Ok(Self { min, max })
    }

    /// A delay drawn uniformly from the range, bounds included.
    pub fn sample(&self) -> Duration {
        Duration::from_millis(rand::rng().random_range(self.min..=self.max))
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub port: u16,
    pub philosophers: usize,
    /// How long the dinner lasts once everyone started.
    pub duration: Duration,
    pub mode: Mode,
    pub poll_interval: Duration,
}

impl ManagerConfig {
    pub fn new(port: u16, philosophers: usize, duration: Duration, mode: Mode) -> Result<Self> {
        if philosophers < MIN_PHILOSOPHERS {
            return Err(Error::Config(format!(
                "a table needs at least {MIN_PHILOSOPHERS} philosophers, got {philosophers}"
            )));
        }
        Ok(Self {
            port,
            philosophers,
            duration,
            mode,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone)]
pub struct PhilosopherConfig {
    /// Port of the ring server, `0` lets the system pick one.
    pub port: u16,
    /// `host:port` of the manager.
    pub manager: String,
    pub delay: DelayRange,
}

impl PhilosopherConfig {
    pub fn new(port: u16, manager: impl Into<String>) -> Self {
        Self {
            port,
            manager: manager.into(),
            delay: DelayRange::default(),
        }
    }

    pub fn with_delay(mut self, delay: DelayRange) -> Self {
        self.delay = delay;
        self
    }
}
