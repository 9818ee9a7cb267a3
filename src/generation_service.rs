use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::context::GenerationContext;
use crate::counter_state::{CounterState, GeneratedNumber};
use crate::error::{GeneratorError, StorageError};
use crate::metrics::GeneratorMetrics;
use crate::number_assembler::{NumberAssembler, PatternEvaluator};
use crate::pattern_template::PatternTemplate;
use crate::reset_strategy::{CalendarResetStrategy, ResetStrategy};
use crate::sequence_config::SequenceConfig;
use crate::sequence_store::{ResetOutcome, SequenceStore};
use crate::settings::GeneratorSettings;

/// Distance to the next reset. Either side is `None` when that kind of reset is not
/// configured, and both are `None` for a sequence that was never used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingUntilReset {
    pub count: Option<u64>,
    pub time_seconds: Option<i64>,
}

/// Orchestrates a generation: validate, apply a due reset, increment atomically in the
/// store, then re-evaluate the result to make sure store and evaluator agree.
///
/// Holds no per-sequence state; every call reads the store afresh.
pub struct GenerationService {
    store: Arc<dyn SequenceStore>,
    evaluator: Arc<dyn PatternEvaluator>,
    reset_strategy: Arc<dyn ResetStrategy>,
    metrics: Option<Arc<GeneratorMetrics>>,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn SequenceStore>,
        evaluator: Arc<dyn PatternEvaluator>,
        reset_strategy: Arc<dyn ResetStrategy>,
    ) -> Self {
        GenerationService {
            store,
            evaluator,
            reset_strategy,
            metrics: None,
        }
    }

    /// Wires the reference evaluator and calendar strategy for the configured zone. The
    /// store must evaluate with an equivalent evaluator or verification will fail.
    pub fn from_settings(settings: &GeneratorSettings, store: Arc<dyn SequenceStore>) -> Self {
        Self::new(
            store,
            Arc::new(NumberAssembler::from_settings(settings)),
            Arc::new(CalendarResetStrategy::new(settings.timezone)),
        )
    }

    pub fn with_metrics(mut self, metrics: Arc<GeneratorMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&GeneratorMetrics> {
        self.metrics.as_deref()
    }

    /// Issues the next number for `config`. `now` defaults to the current time.
    pub async fn generate(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: Option<DateTime<Utc>>,
    ) -> Result<GeneratedNumber, GeneratorError> {
        let now = now.unwrap_or_else(Utc::now);
        match self.generate_at(config, context, now).await {
            Ok(number) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_generated(&config.tenant_id);
                }
                Ok(number)
            }
            Err(e) => {
                error!(sequence = %config.key(), kind = e.kind(), error = %e, "generation failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(e.kind());
                }
                Err(e)
            }
        }
    }

    async fn generate_at(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<GeneratedNumber, GeneratorError> {
        let template = self.checked_template(config)?;

        // Surfaces strict-mode and custom-variable failures before the counter moves.
        self.evaluator
            .evaluate(&template, &CounterState::new(config.step_size, now), context)?;

        if !self.store.exists(config).await? {
            info!(sequence = %config.key(), "first use, creating sequence");
            self.store.save_sequence(config, now).await?;
        }

        let reset_applied = self.apply_due_reset(config, now).await?;

        let number = self.store.lock_and_increment(config, context, now).await?;

        let expected = self
            .evaluator
            .evaluate(&template, &number.counter_state(), context)?;
        if expected != number.value {
            return Err(GeneratorError::VerificationFailed {
                sequence: config.key().to_string(),
                expected,
                actual: number.value,
            });
        }

        debug!(
            sequence = %config.key(),
            counter = number.counter,
            value = %number.value,
            "generated number"
        );
        Ok(number
            .with_metadata("reset_applied", reset_applied)
            .with_metadata("generation_id", Uuid::new_v4().to_string()))
    }

    /// Resets the counter if a reset is due at `now`. Returns whether this call's swap
    /// replaced the state.
    ///
    /// A failed swap means the state moved since it was read, possibly through a late
    /// increment from the previous period, so the returned state is checked again.
    async fn apply_due_reset(
        &self,
        config: &SequenceConfig,
        now: DateTime<Utc>,
    ) -> Result<bool, GeneratorError> {
        let mut observed = self.store.get_current_state(config).await?;

        while self.reset_strategy.should_reset(config, &observed, now) {
            let after = match self
                .store
                .reset(config, &observed, CounterState::reset_at(now))
                .await?
            {
                ResetOutcome::Applied(_) => {
                    info!(
                        sequence = %config.key(),
                        period = %config.reset_period,
                        previous_counter = observed.counter,
                        "counter reset"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_reset(&config.tenant_id, config.reset_period.as_str());
                    }
                    return Ok(true);
                }
                ResetOutcome::Skipped(after) => after,
            };

            if after == observed {
                warn!(sequence = %config.key(), "store skipped a reset on unchanged state");
                break;
            }
            debug!(
                sequence = %config.key(),
                observed = observed.counter,
                current = after.counter,
                "state moved before reset, checking again"
            );
            observed = after;
        }
        Ok(false)
    }

    /// The number `generate` would issue at `now`, without touching the store.
    pub async fn preview(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: Option<DateTime<Utc>>,
    ) -> Result<GeneratedNumber, GeneratorError> {
        let now = now.unwrap_or_else(Utc::now);
        let template = self.checked_template(config)?;

        let state = if self.store.exists(config).await? {
            self.store.get_current_state(config).await?
        } else {
            CounterState::initial(now)
        };

        let would_reset = self.reset_strategy.should_reset(config, &state, now);
        let base = if would_reset {
            CounterState::reset_at(now)
        } else {
            state
        };
        let counter = base
            .next_counter(config.step_size)
            .ok_or_else(|| StorageError::Overflow(config.key().to_string()))?;

        let value = self
            .evaluator
            .evaluate(&template, &CounterState::new(counter, now), context)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_preview();
        }
        Ok(GeneratedNumber::new(value, counter, now)
            .with_metadata("tenant_id", config.tenant_id.clone())
            .with_metadata("sequence_name", config.sequence_name.clone())
            .with_metadata("is_preview", true)
            .with_metadata("would_reset", would_reset))
    }

    pub async fn remaining_until_reset(
        &self,
        config: &SequenceConfig,
        now: Option<DateTime<Utc>>,
    ) -> Result<RemainingUntilReset, GeneratorError> {
        let now = now.unwrap_or_else(Utc::now);
        if !self.store.exists(config).await? {
            return Ok(RemainingUntilReset::default());
        }
        let state = self.store.get_current_state(config).await?;
        Ok(RemainingUntilReset {
            count: self.reset_strategy.remaining_until_count_reset(config, &state),
            time_seconds: self
                .reset_strategy
                .remaining_until_time_reset(config.reset_period, now),
        })
    }

    fn checked_template(&self, config: &SequenceConfig) -> Result<PatternTemplate, GeneratorError> {
        config.check()?;
        let template = config.template()?;
        let validation = self.evaluator.validate_syntax(&template);
        if !validation.is_valid() {
            return Err(GeneratorError::invalid_pattern(config.pattern.clone(), validation.errors));
        }
        Ok(template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence_config::ResetPeriod;
    use crate::sequence_store::InMemorySequenceStore;
    use chrono::TimeZone;

    fn service() -> (GenerationService, Arc<InMemorySequenceStore>) {
        let evaluator = Arc::new(NumberAssembler::new());
        let store = Arc::new(InMemorySequenceStore::new(evaluator.clone()));
        let service = GenerationService::new(
            store.clone(),
            evaluator,
            Arc::new(CalendarResetStrategy::default()),
        );
        (service, store)
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, d, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_generate_creates_sequence_on_first_use() {
        let (service, store) = service();
        let config =
            SequenceConfig::new("acme", "invoice", "INV-{YEAR}-{COUNTER:4}", ResetPeriod::Yearly)
                .unwrap();

        let number = service
            .generate(&config, &GenerationContext::new(), Some(at(1, 9)))
            .await
            .unwrap();

        assert_eq!(number.value, "INV-2025-0001");
        assert_eq!(number.metadata["reset_applied"], false);
        assert!(number.metadata.contains_key("generation_id"));
        assert_eq!(store.get_current_state(&config).await.unwrap().counter, 1);
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_before_mutation() {
        let (service, store) = service();
        let config =
            SequenceConfig::new("acme", "broken", "INV-{COUNTER", ResetPeriod::Never).unwrap();

        let err = service
            .generate(&config, &GenerationContext::new(), Some(at(1, 9)))
            .await
            .unwrap_err();

        assert!(matches!(err, GeneratorError::InvalidPattern { .. }));
        assert!(!store.exists(&config).await.unwrap());
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let (service, store) = service();
        let config =
            SequenceConfig::new("acme", "invoice", "{COUNTER}", ResetPeriod::Never).unwrap();

        let preview = service
            .preview(&config, &GenerationContext::new(), Some(at(1, 9)))
            .await
            .unwrap();

        assert_eq!(preview.value, "1");
        assert_eq!(preview.metadata["is_preview"], true);
        assert_eq!(preview.metadata["would_reset"], false);
        assert!(!store.exists(&config).await.unwrap());
    }

    #[tokio::test]
    async fn test_remaining_until_reset() {
        let (service, _store) = service();
        let config = SequenceConfig::new("acme", "ticket", "{COUNTER}", ResetPeriod::Daily)
            .unwrap()
            .with_reset_limit(10)
            .unwrap();

        let unused = service.remaining_until_reset(&config, Some(at(1, 9))).await.unwrap();
        assert_eq!(unused, RemainingUntilReset::default());

        for _ in 0..3 {
            service.generate(&config, &GenerationContext::new(), Some(at(1, 9))).await.unwrap();
        }
        let remaining = service.remaining_until_reset(&config, Some(at(1, 9))).await.unwrap();
        assert_eq!(remaining.count, Some(7));
        assert_eq!(remaining.time_seconds, Some(15 * 3600));
    }

    #[tokio::test]
    async fn test_metrics_are_recorded() {
        let (service, _store) = service();
        let metrics = Arc::new(GeneratorMetrics::new().unwrap());
        let service = service.with_metrics(metrics.clone());
        let config =
            SequenceConfig::new("acme", "invoice", "{COUNTER}", ResetPeriod::Never).unwrap();
        let broken = SequenceConfig::new("acme", "broken", "{}", ResetPeriod::Never).unwrap();

        service.generate(&config, &GenerationContext::new(), None).await.unwrap();
        assert!(service.generate(&broken, &GenerationContext::new(), None).await.is_err());

        assert_eq!(metrics.generated_count("acme"), 1);
        assert_eq!(metrics.failure_count("invalid_pattern"), 1);
    }
}
