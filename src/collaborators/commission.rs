use rust_decimal::Decimal;

use crate::domain::order::{Order, OrderItem};

// ============================================================================
// Commission
// ============================================================================

/// Computes what a vendor earns from an order after the marketplace cut.
pub trait Commission: Send + Sync {
    fn vendor_earning(&self, order: &Order, items: &[OrderItem]) -> Decimal;
}

/// Flat marketplace percentage taken from the item subtotal.
///
/// Shipping and any other charges on the order go to the vendor in full.
#[derive(Debug, Clone)]
pub struct PercentageCommission {
    admin_percentage: Decimal,
}

impl PercentageCommission {
    pub fn new(admin_percentage: Decimal) -> Self {
        Self { admin_percentage }
    }

    pub fn admin_percentage(&self) -> Decimal {
        self.admin_percentage
    }
}

impl Commission for PercentageCommission {
    fn vendor_earning(&self, order: &Order, items: &[OrderItem]) -> Decimal {
        let subtotal: Decimal = items.iter().map(|item| item.line_total).sum();
        let admin_fee = (subtotal * self.admin_percentage / Decimal::ONE_HUNDRED).round_dp(2);

        (order.total - admin_fee).max(Decimal::ZERO)
    }
}
