// ============================================================================
// Order Domain - orders, line items and the events that move them
// ============================================================================
//
// - Value objects (ids, OrderStatus, Order, OrderItem, ShippingLine)
// - Events (CheckoutCompleted, OrderStatusChanged, ItemStockReduced)
// - Errors (OrderError)
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod errors;

pub use value_objects::*;
pub use events::*;
pub use errors::*;
