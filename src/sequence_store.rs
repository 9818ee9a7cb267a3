use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::context::GenerationContext;
use crate::counter_state::{CounterState, GeneratedNumber};
use crate::error::StorageError;
use crate::number_assembler::PatternEvaluator;
use crate::sequence_config::{SequenceConfig, SequenceKey};

/// Durable home of sequence counters.
///
/// Concurrency contract: `reset` and `lock_and_increment` are serializable per
/// (tenant, sequence). Two concurrent increments never observe the same counter, and an
/// increment never lands on the pre-reset state once a reset has been applied.
#[async_trait]
pub trait SequenceStore: Send + Sync {
    async fn exists(&self, config: &SequenceConfig) -> Result<bool, StorageError>;

    /// Creates the sequence stamped at `now` if it is missing. Existing state is left
    /// untouched.
    async fn save_sequence(
        &self,
        config: &SequenceConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    async fn get_current_state(
        &self,
        config: &SequenceConfig,
    ) -> Result<CounterState, StorageError>;

    /// Replaces the state with `new_state` only if it still equals `expected`.
    async fn reset(
        &self,
        config: &SequenceConfig,
        expected: &CounterState,
        new_state: CounterState,
    ) -> Result<ResetOutcome, StorageError>;

    /// Read, increment by `step_size`, format and persist as one operation. A counter at
    /// or past `reset_limit` restarts inside the same operation.
    ///
    /// Adapters that commit the increment before formatting leave a gap in the counter
    /// when formatting fails. Callers that need gapless sequences evaluate the pattern
    /// once before calling this.
    async fn lock_and_increment(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<GeneratedNumber, StorageError>;
}

/// Result of a compare-and-swap [`SequenceStore::reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    /// The swap replaced the state; holds the state now stored.
    Applied(CounterState),
    /// The state had moved on; holds the current state, left untouched.
    Skipped(CounterState),
}

impl ResetOutcome {
    pub fn state(&self) -> &CounterState {
        match self {
            ResetOutcome::Applied(state) | ResetOutcome::Skipped(state) => state,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, ResetOutcome::Applied(_))
    }
}

/// Advances `state` by one step as of `now`, restarting it when the count limit is hit.
pub(crate) fn advance(
    config: &SequenceConfig,
    state: &CounterState,
    now: DateTime<Utc>,
) -> Result<CounterState, StorageError> {
    let base = match config.reset_limit {
        Some(limit) if state.counter >= limit => CounterState::reset_at(now),
        _ => state.clone(),
    };
    let counter = base
        .next_counter(config.step_size)
        .ok_or_else(|| StorageError::Overflow(config.key().to_string()))?;
    Ok(CounterState {
        counter,
        timestamp: now,
        last_reset_at: base.last_reset_at,
    })
}

/// Formats the number for an already-advanced state.
pub(crate) fn format_number(
    evaluator: &dyn PatternEvaluator,
    config: &SequenceConfig,
    state: &CounterState,
    context: &GenerationContext,
) -> Result<GeneratedNumber, StorageError> {
    let template = config.template()?;
    let snapshot = CounterState::new(state.counter, state.timestamp);
    let value = evaluator.evaluate(&template, &snapshot, context)?;
    Ok(GeneratedNumber::new(value, state.counter, state.timestamp)
        .with_metadata("tenant_id", config.tenant_id.clone())
        .with_metadata("sequence_name", config.sequence_name.clone()))
}

/// Process-local store. A single async mutex serializes every mutation, which makes
/// it suitable for tests and single-node deployments only.
pub struct InMemorySequenceStore {
    evaluator: Arc<dyn PatternEvaluator>,
    sequences: Mutex<HashMap<SequenceKey, CounterState>>,
}

impl InMemorySequenceStore {
    pub fn new(evaluator: Arc<dyn PatternEvaluator>) -> Self {
        InMemorySequenceStore {
            evaluator,
            sequences: Mutex::new(HashMap::new()),
        }
    }

    /// Seeds a sequence at an arbitrary state, e.g. when migrating existing counters.
    pub async fn seed(&self, config: &SequenceConfig, state: CounterState) {
        self.sequences.lock().await.insert(config.key(), state);
    }
}

#[async_trait]
impl SequenceStore for InMemorySequenceStore {
    async fn exists(&self, config: &SequenceConfig) -> Result<bool, StorageError> {
        Ok(self.sequences.lock().await.contains_key(&config.key()))
    }

    async fn save_sequence(
        &self,
        config: &SequenceConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut sequences = self.sequences.lock().await;
        sequences.entry(config.key()).or_insert_with(|| {
            debug!(sequence = %config.key(), "creating sequence");
            CounterState::initial(now)
        });
        Ok(())
    }

    async fn get_current_state(
        &self,
        config: &SequenceConfig,
    ) -> Result<CounterState, StorageError> {
        self.sequences
            .lock()
            .await
            .get(&config.key())
            .cloned()
            .ok_or_else(|| StorageError::SequenceNotFound(config.key().to_string()))
    }

    async fn reset(
        &self,
        config: &SequenceConfig,
        expected: &CounterState,
        new_state: CounterState,
    ) -> Result<ResetOutcome, StorageError> {
        let mut sequences = self.sequences.lock().await;
        let current = sequences
            .get_mut(&config.key())
            .ok_or_else(|| StorageError::SequenceNotFound(config.key().to_string()))?;

        if current == expected {
            *current = new_state;
            Ok(ResetOutcome::Applied(current.clone()))
        } else {
            debug!(sequence = %config.key(), "reset skipped, state moved on");
            Ok(ResetOutcome::Skipped(current.clone()))
        }
    }

    async fn lock_and_increment(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<GeneratedNumber, StorageError> {
        let mut sequences = self.sequences.lock().await;
        let current = sequences
            .get_mut(&config.key())
            .ok_or_else(|| StorageError::SequenceNotFound(config.key().to_string()))?;

        let next = advance(config, current, now)?;
        // Format before committing so a failed evaluation leaves no gap.
        let number = format_number(self.evaluator.as_ref(), config, &next, context)?;
        *current = next;
        Ok(number)
    }
}
