//! Prometheus metrics surface. Grounded on `internal/metrics/metrics.go`:
//! same metric names and shapes, registered into an owned `Registry`
//! instead of the Go original's package-level globals, so multiple
//! `Engine`/server instances in the same test process never collide on
//! the default registry.

use prometheus::{Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{Result, SyncError};

pub struct Metrics {
    pub connections_active: IntGauge,
    pub messages_received_total: IntCounter,
    pub messages_broadcast_total: IntCounter,
    pub operations_total: IntCounter,
    pub operation_duration_seconds: HistogramVec,
    pub sync_latency_seconds: Histogram,
    registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let connections_active = IntGauge::new(
            "etherply_connections_active",
            "The total number of currently active WebSocket connections",
        )
        .map_err(metrics_err)?;

        let messages_received_total = IntCounter::new(
            "etherply_messages_received_total",
            "The total number of messages received from clients",
        )
        .map_err(metrics_err)?;

        let messages_broadcast_total = IntCounter::new(
            "etherply_messages_broadcast_total",
            "The total number of messages broadcast to clients",
        )
        .map_err(metrics_err)?;

        let operations_total = IntCounter::new(
            "etherply_operations_total",
            "The total number of processed sync operations",
        )
        .map_err(metrics_err)?;

        let operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "etherply_operation_duration_seconds",
                "Time taken to process sync operations in seconds",
            ),
            &["strategy"],
        )
        .map_err(metrics_err)?;

        let sync_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "etherply_sync_latency_seconds",
            "Time taken to process sync messages in seconds",
        ))
        .map_err(metrics_err)?;

        registry
            .register(Box::new(connections_active.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(messages_received_total.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(messages_broadcast_total.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(operations_total.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(operation_duration_seconds.clone()))
            .map_err(metrics_err)?;
        registry
            .register(Box::new(sync_latency_seconds.clone()))
            .map_err(metrics_err)?;

        Ok(Self {
            connections_active,
            messages_received_total,
            messages_broadcast_total,
            operations_total,
            operation_duration_seconds,
            sync_latency_seconds,
            registry,
        })
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf).map_err(metrics_err)?;
        String::from_utf8(buf).map_err(|e| SyncError::Internal(e.to_string()))
    }
}

fn metrics_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::Internal(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_without_name_collisions() {
        let metrics = Metrics::new().unwrap();
        metrics.operations_total.inc();
        let text = metrics.gather().unwrap();
        assert!(text.contains("etherply_operations_total"));
    }
}
