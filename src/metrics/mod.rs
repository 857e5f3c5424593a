/*!
 * # Metrics Module
 *
 * Observability collaborator injected into the cart and checkout services.
 * Services only see the [`CommerceMetrics`] trait; the process decides where
 * the counts land.
 */

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counter/gauge sink for cart and checkout activity.
pub trait CommerceMetrics: Send + Sync {
    /// A cart or checkout operation completed successfully.
    fn record_operation(&self, operation: &'static str);

    /// Number of distinct lines in a cart after a successful operation.
    fn record_cart_size(&self, items: usize);

    /// A cart expired with reservations still held.
    fn record_abandonment(&self);

    /// An operation attempt was discarded and re-run.
    fn record_retry(&self, operation: &'static str);
}

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Running mean tracked as sum and count.
#[derive(Debug, Clone, Default)]
pub struct AverageGauge {
    sum: Counter,
    count: Counter,
}

impl AverageGauge {
    pub fn observe(&self, value: u64) {
        self.sum.inc_by(value);
        self.count.inc();
    }

    pub fn get(&self) -> f64 {
        match self.count.get() {
            0 => 0.0,
            n => self.sum.get() as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub operations: Vec<(String, u64)>,
    pub retries: Vec<(String, u64)>,
    pub average_cart_size: f64,
    pub abandonments: u64,
}

/// In-process [`CommerceMetrics`] backed by atomics.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    operations: DashMap<&'static str, Counter>,
    retries: DashMap<&'static str, Counter>,
    cart_size: AverageGauge,
    abandonments: Counter,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_count(&self, operation: &str) -> u64 {
        self.operations
            .get(operation)
            .map(|counter| counter.get())
            .unwrap_or(0)
    }

    pub fn retry_count(&self, operation: &str) -> u64 {
        self.retries
            .get(operation)
            .map(|counter| counter.get())
            .unwrap_or(0)
    }

    pub fn average_cart_size(&self) -> f64 {
        self.cart_size.get()
    }

    pub fn abandonments(&self) -> u64 {
        self.abandonments.get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let collect = |map: &DashMap<&'static str, Counter>| {
            let mut entries: Vec<(String, u64)> = map
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().get()))
                .collect();
            entries.sort();
            entries
        };

        MetricsSnapshot {
            operations: collect(&self.operations),
            retries: collect(&self.retries),
            average_cart_size: self.average_cart_size(),
            abandonments: self.abandonments(),
        }
    }
}

impl CommerceMetrics for InMemoryMetrics {
    fn record_operation(&self, operation: &'static str) {
        self.operations.entry(operation).or_default().inc();
    }

    fn record_cart_size(&self, items: usize) {
        self.cart_size.observe(items as u64);
    }

    fn record_abandonment(&self) {
        self.abandonments.inc();
    }

    fn record_retry(&self, operation: &'static str) {
        self.retries.entry(operation).or_default().inc();
    }
}
