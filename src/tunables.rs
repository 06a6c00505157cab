//! Tunable parameters of the on3demand governor.
//!
//! The five tunables are exposed as named text attributes and persisted in
//! the daemon configuration. Each one owns its clamping rule.

use serde::{Deserialize, Serialize};

/// Default load percentage at or above which maximum frequency is requested.
pub const DEFAULT_UP_THRESHOLD: u32 = 95;
/// Default load percentage at or below which a scale-down is considered.
pub const DEFAULT_DOWN_THRESHOLD: u32 = 75;
/// Default number of consecutive low-load samples before scaling down.
pub const DEFAULT_HISTORY_SIZE: u32 = 10;
/// Default re-evaluation period in milliseconds (live wallpapers finish a
/// frame roughly every 64ms).
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 75;
/// Default continuous-activity deadline in milliseconds (one 60Hz frame).
pub const DEFAULT_FRAME_DONE_DEADLINE_MS: u32 = 16;

/// Upper bound for both load thresholds.
pub const MAX_THRESHOLD: u32 = 100;

/// Governor tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub up_threshold: u32,
    pub down_threshold: u32,
    pub history_size: u32,
    /// Milliseconds.
    pub poll_interval: u32,
    /// Milliseconds.
    pub frame_done_deadline: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            up_threshold: DEFAULT_UP_THRESHOLD,
            down_threshold: DEFAULT_DOWN_THRESHOLD,
            history_size: DEFAULT_HISTORY_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL_MS,
            frame_done_deadline: DEFAULT_FRAME_DONE_DEADLINE_MS,
        }
    }
}

impl Tunables {
    /// Read a single tunable.
    pub fn get(&self, tunable: Tunable) -> u32 {
        match tunable {
            Tunable::UpThreshold => self.up_threshold,
            Tunable::DownThreshold => self.down_threshold,
            Tunable::HistorySize => self.history_size,
            Tunable::PollInterval => self.poll_interval,
            Tunable::FrameDoneDeadline => self.frame_done_deadline,
        }
    }

    /// Clamp `raw` with the tunable's rule and store it.
    /// Returns the value actually stored.
    pub fn set(&mut self, tunable: Tunable, raw: u64) -> u32 {
        let value = tunable.clamp(raw);
        match tunable {
            Tunable::UpThreshold => self.up_threshold = value,
            Tunable::DownThreshold => self.down_threshold = value,
            Tunable::HistorySize => self.history_size = value,
            Tunable::PollInterval => self.poll_interval = value,
            Tunable::FrameDoneDeadline => self.frame_done_deadline = value,
        }
        value
    }
}

/// Names a single tunable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tunable {
    UpThreshold,
    DownThreshold,
    HistorySize,
    PollInterval,
    FrameDoneDeadline,
}

impl Tunable {
    /// All tunables, in attribute listing order.
    pub const ALL: [Tunable; 5] = [
        Tunable::DownThreshold,
        Tunable::UpThreshold,
        Tunable::HistorySize,
        Tunable::PollInterval,
        Tunable::FrameDoneDeadline,
    ];

    /// Attribute name of this tunable.
    pub fn name(self) -> &'static str {
        match self {
            Tunable::UpThreshold => "up_threshold",
            Tunable::DownThreshold => "down_threshold",
            Tunable::HistorySize => "history_size",
            Tunable::PollInterval => "poll_interval",
            Tunable::FrameDoneDeadline => "frame_done_deadline",
        }
    }

    /// Look up a tunable by attribute name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Apply the tunable's clamping rule.
    ///
    /// Thresholds are capped at 100, everything else is at least 1.
    pub fn clamp(self, raw: u64) -> u32 {
        let value = u32::try_from(raw).unwrap_or(u32::MAX);
        match self {
            Tunable::UpThreshold | Tunable::DownThreshold => value.min(MAX_THRESHOLD),
            Tunable::HistorySize | Tunable::PollInterval | Tunable::FrameDoneDeadline => {
                value.max(1)
            }
        }
    }
}

/// Parse an unsigned decimal the way `%u` does.
///
/// Leading whitespace and a single `+` are skipped, then at least one digit
/// must follow. Anything after the digits is ignored. Values that do not fit
/// in a `u64` saturate.
pub fn parse_unsigned(input: &str) -> Option<u64> {
    let rest = input.trim_start();
    let rest = rest.strip_prefix('+').unwrap_or(rest);
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    if digits_end == 0 {
        return None;
    }

    let value = rest[..digits_end].bytes().fold(0u64, |acc, b| {
        acc.saturating_mul(10).saturating_add(u64::from(b - b'0'))
    });
    Some(value)
}
