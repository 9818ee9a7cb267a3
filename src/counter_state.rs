use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Stored position of a sequence.
///
/// The counter never decreases between resets. A reset stores a zero baseline, so the
/// first number issued afterwards carries `step_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub counter: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub last_reset_at: Option<DateTime<Utc>>,
}

impl CounterState {
    pub fn new(counter: u64, timestamp: DateTime<Utc>) -> Self {
        CounterState {
            counter,
            timestamp,
            last_reset_at: None,
        }
    }

    /// State of a sequence that has never issued a number.
    pub fn initial(now: DateTime<Utc>) -> Self {
        CounterState::new(0, now)
    }

    /// Baseline written when a reset is applied at `now`.
    pub fn reset_at(now: DateTime<Utc>) -> Self {
        CounterState {
            counter: 0,
            timestamp: now,
            last_reset_at: Some(now),
        }
    }

    /// The counter the next increment would produce.
    pub fn next_counter(&self, step_size: u64) -> Option<u64> {
        self.counter.checked_add(step_size)
    }
}

/// A number handed to the caller. Persisting it for audit is the caller's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedNumber {
    pub value: String,
    pub counter: u64,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl GeneratedNumber {
    pub fn new(value: impl Into<String>, counter: u64, generated_at: DateTime<Utc>) -> Self {
        GeneratedNumber {
            value: value.into(),
            counter,
            generated_at,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The state this number was evaluated against.
    pub fn counter_state(&self) -> CounterState {
        CounterState::new(self.counter, self.generated_at)
    }
}
