use std::collections::BTreeSet;
use std::sync::Arc;

use crate::collaborators::ProductCatalog;
use crate::domain::coupon::{Coupon, DiscountItem};
use crate::domain::order::VendorId;
use crate::metrics::Metrics;

use super::SyncError;

pub const MULTI_VENDOR_COUPON_MESSAGE: &str = "This coupon is invalid for multiple vendors.";

/// Blocks whole-cart coupons on carts that would settle with several vendors.
pub struct CouponGuard {
    catalog: Arc<dyn ProductCatalog>,
    metrics: Arc<Metrics>,
}

impl CouponGuard {
    pub fn new(catalog: Arc<dyn ProductCatalog>, metrics: Arc<Metrics>) -> Self {
        Self { catalog, metrics }
    }

    pub fn validate(&self, coupon: &Coupon, items: &[DiscountItem]) -> Result<bool, SyncError> {
        let vendors: BTreeSet<VendorId> = items
            .iter()
            .filter_map(|item| item.product_id)
            .filter_map(|product| self.catalog.vendor_of(product))
            .collect();

        if coupon.is_whole_cart() && vendors.len() > 1 {
            tracing::warn!(
                coupon = %coupon.code,
                vendors = ?vendors,
                "Rejected cart-wide coupon for multi-vendor cart"
            );
            self.metrics.coupon_rejections.inc();
            return Err(SyncError::Validation(MULTI_VENDOR_COUPON_MESSAGE.to_string()));
        }

        Ok(true)
    }
}
