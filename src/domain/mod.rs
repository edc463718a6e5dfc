// ============================================================================
// Domain Layer - Marketplace entities
// ============================================================================
//
// Typed entities shared by every component. Each concern has its own
// subdirectory:
// - order:  ids, statuses, orders, line items, order events
// - ledger: vendor balance entries and the order-sync projection
// - coupon: coupons and discounted cart lines
//
// Nothing here touches storage or dispatch.
//
// ============================================================================

pub mod order;
pub mod ledger;
pub mod coupon;
