use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters describing generator activity, registered on their own [`Registry`] so
/// an embedding service can merge or expose them as it likes.
#[derive(Clone)]
pub struct GeneratorMetrics {
    registry: Registry,
    generated: IntCounterVec,
    resets: IntCounterVec,
    previews: IntCounter,
    failures: IntCounterVec,
}

impl GeneratorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("numgen".to_string()), None)?;

        let generated = IntCounterVec::new(
            Opts::new("numbers_generated_total", "Numbers issued by generate()"),
            &["tenant"],
        )?;
        let resets = IntCounterVec::new(
            Opts::new("counter_resets_total", "Counter resets applied before generation"),
            &["tenant", "period"],
        )?;
        let previews = IntCounter::new("previews_total", "Side-effect free previews served")?;
        let failures = IntCounterVec::new(
            Opts::new("generation_failures_total", "Failed generations by error kind"),
            &["kind"],
        )?;

        registry.register(Box::new(generated.clone()))?;
        registry.register(Box::new(resets.clone()))?;
        registry.register(Box::new(previews.clone()))?;
        registry.register(Box::new(failures.clone()))?;

        Ok(GeneratorMetrics {
            registry,
            generated,
            resets,
            previews,
            failures,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_generated(&self, tenant: &str) {
        self.generated.with_label_values(&[tenant]).inc();
    }

    pub fn record_reset(&self, tenant: &str, period: &str) {
        self.resets.with_label_values(&[tenant, period]).inc();
    }

    pub fn record_preview(&self) {
        self.previews.inc();
    }

    pub fn record_failure(&self, kind: &str) {
        self.failures.with_label_values(&[kind]).inc();
    }

    pub fn generated_count(&self, tenant: &str) -> u64 {
        self.generated.with_label_values(&[tenant]).get()
    }

    pub fn failure_count(&self, kind: &str) -> u64 {
        self.failures.with_label_values(&[kind]).get()
    }

    /// Text exposition format, ready to serve on a scrape endpoint.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
