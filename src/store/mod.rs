// ============================================================================
// Store - repository interfaces over the transactional backing store
// ============================================================================
//
// Business logic reaches orders, items, sync rows and ledger rows only
// through these traits. `MemoryStore` implements all of them and is what
// the tests and the demo binary run against.
//
// ============================================================================

mod memory;

pub use memory::MemoryStore;

use rust_decimal::Decimal;

use crate::domain::ledger::{BalanceStatus, NewBalanceEntry, SyncRow, TransactionType, VendorBalanceEntry};
use crate::domain::order::{ItemId, Order, OrderId, OrderItem, OrderStatus};
use crate::utils::IsTransient;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn order_not_found(id: OrderId) -> Self {
        StoreError::NotFound { entity: "order", id: id.0 }
    }

    pub fn item_not_found(id: ItemId) -> Self {
        StoreError::NotFound { entity: "order item", id: id.0 }
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Explicit transaction boundary of the backing store.
///
/// Transactions nest: an inner `begin` opens a savepoint that is committed
/// into, or rolled back to, the enclosing one.
pub trait Transactional: Send + Sync {
    fn begin(&self) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    fn rollback(&self) -> Result<(), StoreError>;
}

/// Run `work` inside a transaction, committing on `Ok` and rolling back on `Err`.
pub fn in_transaction<S, T, E, F>(store: &S, work: F) -> Result<T, E>
where
    S: Transactional + ?Sized,
    E: From<StoreError>,
    F: FnOnce() -> Result<T, E>,
{
    store.begin()?;
    match work() {
        Ok(value) => {
            store.commit()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback_error) = store.rollback() {
                tracing::error!(error = %rollback_error, "Rollback failed");
            }
            Err(error)
        }
    }
}

/// Orders, their line items and the order-sync projection.
pub trait OrderRepository: Transactional {
    fn next_order_id(&self) -> Result<OrderId, StoreError>;
    fn next_item_id(&self) -> Result<ItemId, StoreError>;

    fn get_order(&self, id: OrderId) -> Result<Order, StoreError>;
    fn insert_order(&self, order: &Order) -> Result<(), StoreError>;
    fn save_order(&self, order: &Order) -> Result<(), StoreError>;
    /// Sub-orders of `parent`, in id order.
    fn child_orders(&self, parent: OrderId) -> Result<Vec<Order>, StoreError>;

    fn items(&self, order: OrderId) -> Result<Vec<OrderItem>, StoreError>;
    fn get_item(&self, id: ItemId) -> Result<OrderItem, StoreError>;
    fn insert_item(&self, item: &OrderItem) -> Result<(), StoreError>;
    fn save_item(&self, item: &OrderItem) -> Result<(), StoreError>;

    fn upsert_sync_row(&self, row: &SyncRow) -> Result<(), StoreError>;
    fn sync_row(&self, order: OrderId) -> Result<Option<SyncRow>, StoreError>;
    /// Returns whether a row was updated.
    fn update_sync_status(&self, order: OrderId, status: OrderStatus) -> Result<bool, StoreError>;
    /// Returns whether a row was updated.
    fn update_sync_amounts(&self, order: OrderId, total: Decimal, net: Decimal) -> Result<bool, StoreError>;
}

/// Vendor balance rows.
pub trait LedgerRepository: Transactional {
    /// Fails with `UniqueViolation` if an approved row already exists for
    /// the same `(trn_id, trn_type)`.
    fn insert_entry(&self, entry: NewBalanceEntry) -> Result<VendorBalanceEntry, StoreError>;

    fn find_entry(
        &self,
        trn_id: OrderId,
        trn_type: TransactionType,
        status: Option<BalanceStatus>,
    ) -> Result<Option<VendorBalanceEntry>, StoreError>;

    /// Returns the number of rows updated.
    fn update_entry_status(
        &self,
        trn_id: OrderId,
        trn_type: TransactionType,
        status: BalanceStatus,
    ) -> Result<usize, StoreError>;

    fn entries_for(&self, trn_id: OrderId) -> Result<Vec<VendorBalanceEntry>, StoreError>;
}
