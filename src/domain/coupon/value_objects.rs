use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::ProductId;

// ============================================================================
// Coupon Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Percentage off each discounted line
    Percent,
    /// Fixed amount off the whole cart
    FixedCart,
    /// Fixed amount off each discounted product
    FixedProduct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub amount: Decimal,
}

impl Coupon {
    pub fn new(code: impl Into<String>, discount_type: DiscountType, amount: Decimal) -> Self {
        Self {
            code: code.into(),
            discount_type,
            amount,
        }
    }

    pub fn is_whole_cart(&self) -> bool {
        self.discount_type == DiscountType::FixedCart
    }
}

/// A cart or order line a coupon is being applied to.
///
/// Lines without a product (fees, gift cards) carry no vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountItem {
    pub product_id: Option<ProductId>,
    pub quantity: u32,
    pub price: Decimal,
}

impl DiscountItem {
    pub fn product(product_id: ProductId, quantity: u32, price: Decimal) -> Self {
        Self {
            product_id: Some(product_id),
            quantity,
            price,
        }
    }
}
