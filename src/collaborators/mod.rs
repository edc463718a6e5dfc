// ============================================================================
// Collaborators - host services the marketplace core consults
// ============================================================================
//
// - ProductCatalog: vendor ownership, virtual/downloadable flags, stock
// - Commission: vendor earning for an order
// - ShippingAllocator: which shipping charges each sub-order carries
//
// ============================================================================

pub mod catalog;
pub mod commission;
pub mod shipping;

pub use catalog::{MemoryCatalog, Product, ProductCatalog};
pub use commission::{Commission, PercentageCommission};
pub use shipping::{split_packages, SellerShippingAllocator, ShippingAllocator, ShippingPackage};
