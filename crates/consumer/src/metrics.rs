use prometheus::{IntCounterVec, Opts, Registry};

use crate::Outcome;

/// Counters of the ingestion loop, labelled by outcome.
#[derive(Clone)]
pub struct ConsumerMetrics {
    consumed_total: IntCounterVec,
}

impl ConsumerMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let consumed_total = IntCounterVec::new(
            Opts::new("orders_consumed_total", "Order messages handled by the consumer"),
            &["outcome"],
        )?;
        registry.register(Box::new(consumed_total.clone()))?;
        Ok(Self { consumed_total })
    }

    pub(crate) fn record(&self, outcome: &Outcome) {
        self.consumed_total
            .with_label_values(&[outcome.label()])
            .inc();
    }
}
