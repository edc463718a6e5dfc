// ============================================================================
// Coupon Domain - coupons and the cart lines they discount
// ============================================================================

pub mod value_objects;

pub use value_objects::*;
