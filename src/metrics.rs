//! Metrics sink for counters and timers emitted by the pool and cache.
//!
//! The core never talks to a metrics backend directly. Components hold an
//! `Arc<dyn MetricsSink>` and push [`MetricEvent`]s into it; the embedding
//! application decides where they go.

use std::time::Duration;

use log::trace;

/// A single metric observation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// Monotonic counter increment.
    Counter { name: &'static str, value: u64 },
    /// Latency observation.
    Timing {
        name: &'static str,
        duration: Duration,
    },
    /// Point-in-time value.
    Gauge { name: &'static str, value: f64 },
}

impl MetricEvent {
    /// Metric name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            MetricEvent::Counter { name, .. }
            | MetricEvent::Timing { name, .. }
            | MetricEvent::Gauge { name, .. } => name,
        }
    }
}

/// Receiver of metric events.
pub trait MetricsSink: Send + Sync {
    /// Record one event. Implementations must not block.
    fn record(&self, event: MetricEvent);

    /// Increment a counter by one.
    fn increment(&self, name: &'static str) {
        self.record(MetricEvent::Counter { name, value: 1 });
    }

    /// Record a latency.
    fn timing(&self, name: &'static str, duration: Duration) {
        self.record(MetricEvent::Timing { name, duration });
    }

    /// Record a gauge value.
    fn gauge(&self, name: &'static str, value: f64) {
        self.record(MetricEvent::Gauge { name, value });
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _event: MetricEvent) {}
}

/// Sink that writes every event to the `log` facade at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMetrics;

impl MetricsSink for LogMetrics {
    fn record(&self, event: MetricEvent) {
        match event {
            MetricEvent::Counter { name, value } => trace!("metric counter {name} +{value}"),
            MetricEvent::Timing { name, duration } => {
                trace!("metric timing {name} {:.3}ms", duration.as_secs_f64() * 1000.0)
            }
            MetricEvent::Gauge { name, value } => trace!("metric gauge {name} = {value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<MetricEvent>>);

    impl MetricsSink for Recording {
        fn record(&self, event: MetricEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn test_default_helpers_forward_to_record() {
        let sink = Recording::default();
        sink.increment("pool.acquire");
        sink.timing("pool.wait", Duration::from_millis(3));
        sink.gauge("cache.hit_rate", 0.5);

        let events = sink.0.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            MetricEvent::Counter {
                name: "pool.acquire",
                value: 1
            }
        );
        assert_eq!(events[1].name(), "pool.wait");
        assert_eq!(events[2].name(), "cache.hit_rate");
    }
}
