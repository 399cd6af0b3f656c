//! Derived timestamps from free-running counters that wrap.
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Describes a counter field a decoder reports, supplied by the decoder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RolloverSpec {
    /// Name of the decoded field holding the counter.
    pub field: &'static str,
    /// Counter values are in `[0, modulus)`.
    pub modulus: u64,
    pub ticks_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloverConfig {
    /// A backwards step is a reset rather than a wrap when it is shorter than
    /// `modulus - interval * reset_factor`.
    #[serde(default = "default_reset_factor")]
    pub reset_factor: f64,
    /// Unix seconds of the first counter value, e.g., taken from the file name.
    #[serde(default)]
    pub epoch_seconds: f64,
}

pub const DEFAULT_RESET_FACTOR: f64 = 2.1;

fn default_reset_factor() -> f64 {
    DEFAULT_RESET_FACTOR
}

impl Default for RolloverConfig {
    fn default() -> Self {
        RolloverConfig {
            reset_factor: DEFAULT_RESET_FACTOR,
            epoch_seconds: 0.0,
        }
    }
}

/// Outcome of observing one counter value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    Time(f64),
    /// The counter was reset; `previous` is the value before it.
    Reset { previous: u64 },
    /// The time base was lost to an earlier reset.
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverCounter {
    start: u64,
    last: u64,
    wraps: u64,
    interval: Option<u64>,
    lost: bool,
}

impl RolloverCounter {
    #[must_use]
    pub fn new(start: u64) -> Self {
        RolloverCounter {
            start,
            last: start,
            wraps: 0,
            interval: None,
            lost: false,
        }
    }

    #[must_use]
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Observe the next counter value in stream order.
    pub fn observe(&mut self, value: u64, spec: &RolloverSpec, cfg: &RolloverConfig) -> Tick {
        if self.lost {
            return Tick::Lost;
        }
        if value < self.last {
            if let Some(interval) = self.interval {
                let threshold = spec.modulus as f64 - interval as f64 * cfg.reset_factor;
                if ((self.last - value) as f64) < threshold {
                    warn!(field = spec.field, previous = self.last, value, "counter was reset, time base lost");
                    self.lost = true;
                    return Tick::Reset {
                        previous: self.last,
                    };
                }
            }
            debug!(field = spec.field, previous = self.last, value, "counter rolled over");
            self.wraps += 1;
        }
        if self.interval.is_none() && value != self.last {
            self.interval = Some((value + spec.modulus - self.last) % spec.modulus);
        }
        self.last = value;

        let ticks = value as f64 + self.wraps as f64 * spec.modulus as f64 - self.start as f64;
        Tick::Time(cfg.epoch_seconds + ticks / spec.ticks_per_second)
    }
}
