use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RENDERS_DISPATCHED: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "tidewire_renders_dispatched_total",
        "Render batches handed to the outbound queue",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static RENDERS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new(
            "tidewire_renders_completed_total",
            "Render batches settled, by outcome",
        ),
        &["outcome"],
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub static PENDING_RENDERS: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new(
        "tidewire_pending_renders",
        "Render batches awaiting acknowledgment",
    )
    .unwrap();
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

pub static BATCH_BYTES: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(
        HistogramOpts::new(
            "tidewire_batch_bytes",
            "Encoded size of render batch frames",
        )
        .buckets(prometheus::exponential_buckets(64.0, 4.0, 8).unwrap()),
    )
    .unwrap();
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

pub static UNKNOWN_ACKS: Lazy<IntCounter> = Lazy::new(|| {
    let c = IntCounter::new(
        "tidewire_unknown_acks_total",
        "Acknowledgments for render ids that were not pending",
    )
    .unwrap();
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});

pub fn record_completion(outcome: &str) {
    RENDERS_COMPLETED.with_label_values(&[outcome]).inc();
}

/// Text exposition of every registered metric.
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buf = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
