//! Concurrency tests for the generation service.
//!
//! These tests verify that concurrent generate() calls never share a counter.
//! Run with: cargo test --test concurrency_tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use number_pattern_generator::{
    CalendarResetStrategy, CounterState, GeneratedNumber, GenerationContext, GenerationService,
    InMemorySequenceStore, NumberAssembler, ResetOutcome, ResetPeriod, SequenceConfig,
    SequenceStore, StorageError,
};

fn create_service() -> (Arc<GenerationService>, Arc<InMemorySequenceStore>) {
    let evaluator = Arc::new(NumberAssembler::new());
    let store = Arc::new(InMemorySequenceStore::new(evaluator.clone()));
    let service = GenerationService::new(
        store.clone(),
        evaluator,
        Arc::new(CalendarResetStrategy::default()),
    );
    (Arc::new(service), store)
}

/// Lands one increment from a caller still in the previous period between the
/// service's state read and its reset, so the first compare-and-swap misses.
struct LateIncrementStore {
    inner: InMemorySequenceStore,
    late_at: DateTime<Utc>,
    fired: AtomicBool,
}

#[async_trait]
impl SequenceStore for LateIncrementStore {
    async fn exists(&self, config: &SequenceConfig) -> Result<bool, StorageError> {
        self.inner.exists(config).await
    }

    async fn save_sequence(
        &self,
        config: &SequenceConfig,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.inner.save_sequence(config, now).await
    }

    async fn get_current_state(
        &self,
        config: &SequenceConfig,
    ) -> Result<CounterState, StorageError> {
        self.inner.get_current_state(config).await
    }

    async fn reset(
        &self,
        config: &SequenceConfig,
        expected: &CounterState,
        new_state: CounterState,
    ) -> Result<ResetOutcome, StorageError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            self.inner
                .lock_and_increment(config, &GenerationContext::new(), self.late_at)
                .await?;
        }
        self.inner.reset(config, expected, new_state).await
    }

    async fn lock_and_increment(
        &self,
        config: &SequenceConfig,
        context: &GenerationContext,
        now: DateTime<Utc>,
    ) -> Result<GeneratedNumber, StorageError> {
        self.inner.lock_and_increment(config, context, now).await
    }
}

/// Parallel generations against one sequence produce unique, gapless counters.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_generations_no_duplicate_counters() {
    let (service, store) = create_service();
    let config = Arc::new(
        SequenceConfig::new("acme", "invoice", "INV-{COUNTER:6}", ResetPeriod::Never).unwrap(),
    );
    let num_tasks = 8;
    let per_task = 50;

    let handles: Vec<_> = (0..num_tasks)
        .map(|_| {
            let service = Arc::clone(&service);
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                let mut values = Vec::with_capacity(per_task);
                for _ in 0..per_task {
                    let number = service
                        .generate(&config, &GenerationContext::new(), None)
                        .await
                        .expect("generate should succeed");
                    values.push((number.counter, number.value));
                }
                values
            })
        })
        .collect();

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.expect("task should not panic"));
    }

    let total = num_tasks * per_task;
    let counters: HashSet<u64> = all.iter().map(|(c, _)| *c).collect();
    let values: HashSet<&String> = all.iter().map(|(_, v)| v).collect();
    assert_eq!(counters.len(), total, "no counter may be issued twice");
    assert_eq!(values.len(), total, "no value may be issued twice");
    assert_eq!(counters, (1..=total as u64).collect::<HashSet<_>>());
    assert_eq!(
        store.get_current_state(&config).await.unwrap().counter,
        total as u64
    );
}

/// Tasks racing across a day boundary apply exactly one reset.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_across_reset_boundary_resets_once() {
    let (service, store) = create_service();
    let config =
        Arc::new(SequenceConfig::new("acme", "daily", "{COUNTER}", ResetPeriod::Daily).unwrap());
    let yesterday = Utc.with_ymd_and_hms(2025, 3, 1, 22, 0, 0).unwrap();
    let today = Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap();
    store.seed(&config, CounterState::new(500, yesterday)).await;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let service = Arc::clone(&service);
            let config = Arc::clone(&config);
            tokio::spawn(async move {
                service
                    .generate(&config, &GenerationContext::new(), Some(today))
                    .await
                    .expect("generate should succeed")
                    .counter
            })
        })
        .collect();

    let mut counters = Vec::new();
    for handle in handles {
        counters.push(handle.await.expect("task should not panic"));
    }
    counters.sort_unstable();

    assert_eq!(counters, (1..=16).collect::<Vec<u64>>());
}

/// A stale-period increment that slips in before the reset does not leak into the new day.
#[tokio::test]
async fn reset_is_rechecked_after_interleaved_increment() {
    let yesterday = Utc.with_ymd_and_hms(2025, 3, 1, 22, 0, 0).unwrap();
    let late = Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 59).unwrap();
    let today = Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap();

    let evaluator = Arc::new(NumberAssembler::new());
    let store = Arc::new(LateIncrementStore {
        inner: InMemorySequenceStore::new(evaluator.clone()),
        late_at: late,
        fired: AtomicBool::new(false),
    });
    let service = GenerationService::new(
        store.clone(),
        evaluator,
        Arc::new(CalendarResetStrategy::default()),
    );
    let pattern = "{YEAR}{MONTH}{DAY}-{COUNTER:3}";
    let config = SequenceConfig::new("acme", "daily", pattern, ResetPeriod::Daily).unwrap();
    store
        .inner
        .seed(&config, CounterState::new(500, yesterday))
        .await;
    let ctx = GenerationContext::new();

    let first = service.generate(&config, &ctx, Some(today)).await.unwrap();
    assert_eq!(first.value, "20250302-001");
    assert_eq!(first.counter, 1);
    assert_eq!(first.metadata["reset_applied"], true);

    let second = service.generate(&config, &ctx, Some(today)).await.unwrap();
    assert_eq!(second.value, "20250302-002");
    assert_eq!(second.metadata["reset_applied"], false);
    assert!(store.fired.load(Ordering::SeqCst));
}

/// Independent sequences do not share counters.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sequences_are_isolated() {
    let (service, _store) = create_service();
    let a = SequenceConfig::new("acme", "a", "{COUNTER}", ResetPeriod::Never).unwrap();
    let b = SequenceConfig::new("globex", "a", "{COUNTER}", ResetPeriod::Never).unwrap();

    let ctx_a = GenerationContext::new();
    let ctx_b = GenerationContext::new();
    let (first_a, first_b) = tokio::join!(
        service.generate(&a, &ctx_a, None),
        service.generate(&b, &ctx_b, None),
    );
    assert_eq!(first_a.unwrap().counter, 1);
    assert_eq!(first_b.unwrap().counter, 1);
}
