use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum EventOutcome {
    Done,
    Duplicate,
    Redelivered,
    DeadLettered,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub outcome: EventOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BreakerLabels {
    pub component: String,
}

/// Pipeline observability. Owned by the bootstrap and handed to the
/// pipeline explicitly.
pub struct PipelineMetrics {
    registry: Registry,
    events: Family<EventLabels, Counter>,
    processing_time: Family<EventLabels, Histogram>,
    queue_depth: Gauge,
    throttled_publishes: Counter,
    breaker_open: Family<BreakerLabels, Gauge>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        let mut registry = Registry::default();
        let events = Family::default();
        let queue_depth = Gauge::default();
        let throttled_publishes = Counter::default();
        let breaker_open = Family::default();
        let processing_time: Family<EventLabels, Histogram> = Family::new_with_constructor(|| {
            Histogram::new(
                [0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, f64::INFINITY].into_iter(),
            )
        });

        registry.register(
            "pipeline_events",
            "Activity events that finished processing",
            events.clone(),
        );
        registry.register(
            "pipeline_event_processing_time",
            "Seconds from dequeue to terminal outcome",
            processing_time.clone(),
        );
        registry.register(
            "pipeline_queue_depth",
            "Activity events waiting for a worker",
            queue_depth.clone(),
        );
        registry.register(
            "broadcaster_throttled_publishes",
            "Publishes rejected by the per-tenant rate limit",
            throttled_publishes.clone(),
        );
        registry.register(
            "pipeline_breaker_open",
            "Whether a downstream circuit breaker is open",
            breaker_open.clone(),
        );

        Self {
            registry,
            events,
            processing_time,
            queue_depth,
            throttled_publishes,
            breaker_open,
        }
    }
}

impl PipelineMetrics {
    pub fn record_event(&self, outcome: EventOutcome, elapsed: std::time::Duration) {
        let labels = EventLabels { outcome };
        self.events.get_or_create(&labels).inc();
        self.processing_time
            .get_or_create(&labels)
            .observe(elapsed.as_secs_f64());
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    pub fn inc_throttled(&self) {
        self.throttled_publishes.inc();
    }

    pub fn set_breaker_open(&self, component: &str, open: bool) {
        self.breaker_open
            .get_or_create(&BreakerLabels {
                component: component.to_string(),
            })
            .set(open as i64);
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}
