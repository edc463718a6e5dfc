use rust_decimal::Decimal;

use crate::domain::order::{ItemId, OrderError, OrderId, ProductId};
use crate::event_bus::DispatchError;
use crate::store::StoreError;
use crate::utils::IsTransient;

// ============================================================================
// Synchronization Errors
// ============================================================================

/// Broken parent/child or ledger bookkeeping.
///
/// The step that hit one is logged and skipped; work already done by the
/// request stays in place.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("Parent order {parent_id} of sub-order {order_id} not found")]
    MissingParent { order_id: OrderId, parent_id: OrderId },

    #[error("Parent item {parent_item_id} of item {item_id} not found")]
    MissingParentItem { item_id: ItemId, parent_item_id: ItemId },

    #[error("Order {0} is marked as split but has no sub-orders")]
    MissingChildren(OrderId),

    #[error("Sub-order totals {children} do not reconcile with order {order_id} total {parent}")]
    TotalsMismatch {
        order_id: OrderId,
        parent: Decimal,
        children: Decimal,
    },

    #[error("Duplicate approved {trn_type} entry for order {order_id}")]
    DuplicateLedgerEntry { order_id: OrderId, trn_type: &'static str },

    #[error("Product {0} has no vendor")]
    UnknownVendor(ProductId),

    #[error("Order {0} has no seller")]
    MissingSeller(OrderId),
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Rejected input, surfaced to the caller
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Order(#[from] OrderError),
}

impl IsTransient for SyncError {
    fn is_transient(&self) -> bool {
        match self {
            SyncError::Storage(error) => error.is_transient(),
            _ => false,
        }
    }
}

/// Turn a consistency error into a logged skip, passing everything else through.
pub fn skip_inconsistent<T: Default>(step: &'static str, result: Result<T, SyncError>) -> Result<T, SyncError> {
    match result {
        Err(SyncError::Consistency(error)) => {
            tracing::warn!(step = step, error = %error, "Skipping inconsistent step");
            Ok(T::default())
        }
        other => other,
    }
}
