use super::value_objects::OrderId;

// ============================================================================
// Order Entity Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Unknown order status: {0}")]
    UnknownStatus(String),

    #[error("Order {0} is already a sub-order and cannot own sub-orders")]
    NestedSubOrder(OrderId),
}
