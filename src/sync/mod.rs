// ============================================================================
// Sync - keeps parent orders, sub-orders, stock and the ledger consistent
// ============================================================================
//
// - OrderSplitter: per-vendor sub-orders on checkout
// - StatusSynchronizer: parent/sub-order status propagation
// - LedgerRecorder: vendor balance entries
// - StockSyncAdapter: stock reduction on sub-orders only
// - CouponGuard: cart-wide coupons on single-vendor carts only
//
// ============================================================================

pub mod coupon;
pub mod errors;
pub mod exclusion;
pub mod guard;
pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod splitter;
pub mod status;
pub mod stock;

pub use coupon::CouponGuard;
pub use errors::{skip_inconsistent, ConsistencyError, SyncError};
pub use exclusion::{BalanceExclusion, BalancePolicy};
pub use guard::{GuardKey, ReentrancyGuard};
pub use ledger::{LedgerRecorder, RefundOutcome};
pub use policy::{Allowed, Decision, TransitionPolicy};
pub use splitter::OrderSplitter;
pub use status::{CascadeReport, StatusSynchronizer};
pub use stock::StockSyncAdapter;

use crate::domain::order::OrderEvent;
use crate::event_bus::EventBus;

/// The bus order events travel on.
pub type OrderBus = EventBus<OrderEvent, SyncError>;
