//! Run configuration and the on-disk sequence file format.
//!
//! A [`SequenceConfig`] is the immutable input of one run. It is usually
//! built from a [`SequenceFile`], which stores the key sequence and the
//! matching delays as two parallel arrays:
//!
//! ```json
//! {
//!   "key_sequence": ["1", "2", "space"],
//!   "sleep_times": [500, "1.5s", "250ms"],
//!   "stop_hotkey": "ctrl+alt+s"
//! }
//! ```

use crate::error::{Result, SequencerError};
use crate::key_sender::KeyCode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::num::NonZeroU32;
use std::time::Duration;

/// One key press and the delay to wait after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStep {
    pub key: KeyCode,
    pub delay: Duration,
}

impl KeyStep {
    pub fn new(key: KeyCode, delay: Duration) -> Self {
        Self { key, delay }
    }
}

/// Everything a run needs. Moved into the dispatcher on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
    steps: Vec<KeyStep>,
    target_pid: u32,
    max_consecutive_failures: Option<NonZeroU32>,
}

impl SequenceConfig {
    pub fn new(steps: Vec<KeyStep>, target_pid: u32) -> Self {
        Self {
            steps,
            target_pid,
            max_consecutive_failures: None,
        }
    }

    /// Build from a key list and a delay list of the same length.
    pub fn from_parallel<S: AsRef<str>>(
        keys: &[S],
        delays: &[Duration],
        target_pid: u32,
    ) -> Result<Self> {
        if keys.len() != delays.len() {
            return Err(SequencerError::invalid_sequence(format!(
                "{} keys but {} delays",
                keys.len(),
                delays.len()
            )));
        }

        let steps = keys
            .iter()
            .zip(delays)
            .map(|(key, delay)| {
                KeyCode::parse(key.as_ref())
                    .map(|key| KeyStep::new(key, *delay))
                    .map_err(|e| SequencerError::invalid_sequence(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(steps, target_pid))
    }

    /// Escalate to a fatal error after this many injection failures in a row.
    pub fn with_failure_limit(mut self, limit: Option<NonZeroU32>) -> Self {
        self.max_consecutive_failures = limit;
        self
    }

    pub fn steps(&self) -> &[KeyStep] {
        &self.steps
    }

    pub fn target_pid(&self) -> u32 {
        self.target_pid
    }

    pub fn max_consecutive_failures(&self) -> Option<NonZeroU32> {
        self.max_consecutive_failures
    }

    pub(crate) fn into_steps(self) -> Vec<KeyStep> {
        self.steps
    }
}

/// JSON document holding a key sequence and its delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFile {
    #[serde(default)]
    pub key_sequence: Vec<String>,

    /// Delay after each key; bare numbers are milliseconds.
    #[serde(default, with = "delay_list")]
    pub sleep_times: Vec<Duration>,

    #[serde(default = "default_stop_hotkey")]
    pub stop_hotkey: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
}

fn default_stop_hotkey() -> String {
    "ctrl+alt+s".to_string()
}

impl Default for SequenceFile {
    fn default() -> Self {
        Self {
            key_sequence: Vec::new(),
            sleep_times: Vec::new(),
            stop_hotkey: default_stop_hotkey(),
            max_consecutive_failures: None,
        }
    }
}

impl SequenceFile {
    /// A small, valid sequence for `pks init`.
    pub fn example() -> Self {
        Self {
            key_sequence: vec!["1".into(), "2".into(), "space".into()],
            sleep_times: vec![
                Duration::from_millis(500),
                Duration::from_millis(500),
                Duration::from_secs(2),
            ],
            ..Self::default()
        }
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| SequencerError::config_load(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| SequencerError::config_load(path, e.to_string()))
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| SequencerError::config_save(path, e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_sequence.is_empty() {
            return Err(SequencerError::invalid_sequence("key_sequence is empty"));
        }
        if self.key_sequence.len() != self.sleep_times.len() {
            return Err(SequencerError::invalid_sequence(format!(
                "key_sequence has {} entries but sleep_times has {}",
                self.key_sequence.len(),
                self.sleep_times.len()
            )));
        }
        for key in &self.key_sequence {
            KeyCode::parse(key).map_err(|e| SequencerError::invalid_sequence(e.to_string()))?;
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(SequencerError::config_validation(
                "max_consecutive_failures must be at least 1",
            ));
        }
        Ok(())
    }

    /// Validate and bind the sequence to a target process.
    pub fn into_config(self, target_pid: u32) -> Result<SequenceConfig> {
        self.validate()?;
        let limit = self.max_consecutive_failures.and_then(NonZeroU32::new);
        Ok(
            SequenceConfig::from_parallel(&self.key_sequence, &self.sleep_times, target_pid)?
                .with_failure_limit(limit),
        )
    }
}

/// Parse a duration such as `"500ms"`, `"1.5s"`, `"2m"` or `"1000"` (ms).
///
/// `"us"` and `"ns"` are accepted too, so sub-millisecond delays survive a
/// save/load cycle.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(SequencerError::invalid_duration(value, "empty value"));
    }

    let (number, unit_ns): (&str, u128) = if let Some(n) = trimmed.strip_suffix("ns") {
        (n, 1)
    } else if let Some(n) = trimmed.strip_suffix("us") {
        (n, NANOS_PER_MICRO)
    } else if let Some(n) = trimmed.strip_suffix("ms") {
        (n, NANOS_PER_MILLI)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, NANOS_PER_SEC)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60 * NANOS_PER_SEC)
    } else {
        (trimmed.as_str(), NANOS_PER_MILLI)
    };

    let number = number.trim();
    if number.starts_with('-') {
        return Err(SequencerError::invalid_duration(value, "must not be negative"));
    }

    let total = if let Ok(whole) = number.parse::<u128>() {
        whole.checked_mul(unit_ns)
    } else {
        let amount: f64 = number
            .parse()
            .ok()
            .filter(|n: &f64| n.is_finite())
            .ok_or_else(|| SequencerError::invalid_duration(value, "not a number"))?;
        let nanos = (amount * unit_ns as f64).round();
        (nanos <= u128::MAX as f64).then_some(nanos as u128)
    };

    total
        .and_then(duration_from_nanos)
        .ok_or_else(|| SequencerError::invalid_duration(value, "too large"))
}

const NANOS_PER_MICRO: u128 = 1_000;
const NANOS_PER_MILLI: u128 = 1_000_000;
const NANOS_PER_SEC: u128 = 1_000_000_000;

fn duration_from_nanos(nanos: u128) -> Option<Duration> {
    let secs = u64::try_from(nanos / NANOS_PER_SEC).ok()?;
    Some(Duration::new(secs, (nanos % NANOS_PER_SEC) as u32))
}

/// Delays are written as `"500ms"` (or `"1250ns"` when not a whole number of
/// milliseconds) and read from numbers or strings.
mod delay_list {
    use super::parse_duration;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDelay {
        Millis(u64),
        Fractional(f64),
        Text(String),
    }

    fn format_delay(delay: &Duration) -> String {
        if delay.subsec_nanos() % 1_000_000 == 0 {
            format!("{}ms", delay.as_millis())
        } else {
            format!("{}ns", delay.as_nanos())
        }
    }

    pub fn serialize<S: Serializer>(delays: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(delays.iter().map(format_delay))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Duration>, D::Error> {
        Vec::<RawDelay>::deserialize(deserializer)?
            .into_iter()
            .map(|raw| match raw {
                RawDelay::Millis(ms) => Ok(Duration::from_millis(ms)),
                // same negative and range checks as a bare string
                RawDelay::Fractional(ms) => {
                    parse_duration(&ms.to_string()).map_err(D::Error::custom)
                }
                RawDelay::Text(text) => parse_duration(&text).map_err(D::Error::custom),
            })
            .collect()
    }
}
