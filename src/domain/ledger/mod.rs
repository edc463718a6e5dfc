// ============================================================================
// Ledger Domain - vendor balance entries and the order-sync projection
// ============================================================================

pub mod value_objects;

pub use value_objects::*;
