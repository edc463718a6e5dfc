use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order splitting (orders split, sub-orders created, duration)
// - Status cascades (applied, fail-open, rejected)
// - Vendor ledger writes and suppressed duplicates
// - Stock reduction (reduced, blocked on parents, mirrored to parents)
// - Coupon rejections and store retries
//
// All metrics are registered with one Prometheus registry; the binary
// renders it in text exposition format.
// ============================================================================

/// Central metrics registry for the marketplace core
pub struct Metrics {
    registry: Registry,

    // Split Metrics
    pub orders_split: IntCounter,
    pub sub_orders_created: IntCounter,
    pub split_duration: Histogram,

    // Status Metrics
    pub status_cascades: IntCounterVec,
    pub status_transitions: IntCounterVec,

    // Ledger Metrics
    pub ledger_entries_written: IntCounterVec,
    pub ledger_duplicates_suppressed: IntCounterVec,
    pub ledger_status_updates: IntCounterVec,

    // Stock Metrics
    pub stock_operations: IntCounterVec,

    // Coupon Metrics
    pub coupon_rejections: IntCounter,

    // Retry Metrics
    pub retry_attempts_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        // Split Metrics
        let orders_split = IntCounter::new("orders_split_total", "Orders split into sub-orders")?;
        registry.register(Box::new(orders_split.clone()))?;

        let sub_orders_created = IntCounter::new("sub_orders_created_total", "Sub-orders created by splits")?;
        registry.register(Box::new(sub_orders_created.clone()))?;

        let split_duration = Histogram::with_opts(
            HistogramOpts::new("split_duration_seconds", "Order split duration")
                .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(split_duration.clone()))?;

        // Status Metrics
        let status_cascades = IntCounterVec::new(
            Opts::new("status_cascades_total", "Parent status cascades to sub-orders"),
            &["outcome"],
        )?;
        registry.register(Box::new(status_cascades.clone()))?;

        let status_transitions = IntCounterVec::new(
            Opts::new("status_transitions_total", "Order status transitions"),
            &["origin", "to_status"],
        )?;
        registry.register(Box::new(status_transitions.clone()))?;

        // Ledger Metrics
        let ledger_entries_written = IntCounterVec::new(
            Opts::new("ledger_entries_written_total", "Vendor balance entries written"),
            &["trn_type"],
        )?;
        registry.register(Box::new(ledger_entries_written.clone()))?;

        let ledger_duplicates_suppressed = IntCounterVec::new(
            Opts::new("ledger_duplicates_suppressed_total", "Duplicate balance entry writes suppressed"),
            &["trn_type"],
        )?;
        registry.register(Box::new(ledger_duplicates_suppressed.clone()))?;

        let ledger_status_updates = IntCounterVec::new(
            Opts::new("ledger_status_updates_total", "Balance entry status updates"),
            &["outcome"],
        )?;
        registry.register(Box::new(ledger_status_updates.clone()))?;

        // Stock Metrics
        let stock_operations = IntCounterVec::new(
            Opts::new("stock_operations_total", "Stock reductions and parent item mirroring"),
            &["operation"],
        )?;
        registry.register(Box::new(stock_operations.clone()))?;

        // Coupon Metrics
        let coupon_rejections = IntCounter::new(
            "coupon_rejections_total",
            "Cart-wide coupons rejected for multi-vendor carts",
        )?;
        registry.register(Box::new(coupon_rejections.clone()))?;

        // Retry Metrics
        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        Ok(Self {
            registry,
            orders_split,
            sub_orders_created,
            split_duration,
            status_cascades,
            status_transitions,
            ledger_entries_written,
            ledger_duplicates_suppressed,
            ledger_status_updates,
            stock_operations,
            coupon_rejections,
            retry_attempts_total,
        })
    }

    /// Get the Prometheus registry for rendering
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record a finished split
    pub fn record_split(&self, sub_orders: usize, duration_secs: f64) {
        self.orders_split.inc();
        self.sub_orders_created.inc_by(sub_orders as u64);
        self.split_duration.observe(duration_secs);
    }

    /// Helper to record a cascade decision for one sub-order
    pub fn record_cascade(&self, outcome: &str) {
        self.status_cascades.with_label_values(&[outcome]).inc();
    }

    pub fn record_transition(&self, origin: &str, to_status: &str) {
        self.status_transitions.with_label_values(&[origin, to_status]).inc();
    }

    /// Helper to record a ledger insert, or a suppressed duplicate
    pub fn record_ledger_write(&self, trn_type: &str, duplicate: bool) {
        if duplicate {
            self.ledger_duplicates_suppressed.with_label_values(&[trn_type]).inc();
        } else {
            self.ledger_entries_written.with_label_values(&[trn_type]).inc();
        }
    }

    pub fn record_ledger_status_update(&self, outcome: &str) {
        self.ledger_status_updates.with_label_values(&[outcome]).inc();
    }

    pub fn record_stock(&self, operation: &str) {
        self.stock_operations.with_label_values(&[operation]).inc();
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }
}
