//! OTel-native metrics instruments.
//!
//! Centralized metric definitions using OpenTelemetry meters. All
//! instruments are lazily initialized and feature-gated behind `otel`;
//! without an installed meter provider they are no-ops.
//!
//! Naming follows OTel semantic conventions (dot-separated).

use std::sync::LazyLock;

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::global;

static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("cth_broker"));

/// Duration of accept-queue insertion.
pub static ACCEPT_ENQUEUE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("broker.accept.enqueue.duration")
        .with_description("Accept queue insertion duration")
        .with_unit("s")
        .build()
});

/// Delivery attempts by outcome (`delivered`, `redelivered`, `expired`).
pub static DELIVERY_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("broker.delivery.total")
        .with_description("Delivery attempts by outcome")
        .build()
});
