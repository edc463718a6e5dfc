// ============================================================================
// Marketplace Orders - multi-vendor order synchronization
// ============================================================================
//
// Splits checkout orders into per-vendor sub-orders and keeps parent orders,
// sub-orders, vendor balances and stock consistent as statuses change.
//
// ============================================================================

pub mod collaborators;
pub mod config;
pub mod domain;
pub mod event_bus;
pub mod marketplace;
pub mod metrics;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::{ConfigError, MarketplaceConfig};
pub use marketplace::{Collaborators, Marketplace, OrderLine};
pub use metrics::Metrics;
pub use store::MemoryStore;
pub use sync::{CascadeReport, RefundOutcome, SyncError};
