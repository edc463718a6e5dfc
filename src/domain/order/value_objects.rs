use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::errors::OrderError;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

numeric_id!(
    /// Order identifier, shared by root orders and sub-orders.
    OrderId
);
numeric_id!(
    /// Order line item identifier.
    ItemId
);
numeric_id!(
    /// Vendor (seller) identifier.
    VendorId
);
numeric_id!(ProductId);

// ============================================================================
// Order Status
// ============================================================================

/// Lifecycle status of an order.
///
/// Parsing accepts the host's prefixed form (`wc-processing`) as well as the
/// bare slug (`processing`); both refer to the same status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    OnHold,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::OnHold,
        OrderStatus::Processing,
        OrderStatus::Completed,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
        OrderStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::OnHold => "on-hold",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Statuses on entering which the host reduces physical stock.
    pub fn reduces_stock(&self) -> bool {
        matches!(
            self,
            OrderStatus::Processing | OrderStatus::Completed | OrderStatus::OnHold
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let slug = raw.trim();
        let slug = slug.strip_prefix("wc-").unwrap_or(slug);

        OrderStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == slug)
            .ok_or_else(|| OrderError::UnknownStatus(raw.to_string()))
    }
}

// ============================================================================
// Order Value Objects
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub line1: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
}

/// Shipping charge attached to an order.
///
/// `seller_id` is set when the charge was computed for a single vendor's
/// package at checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingLine {
    pub method: String,
    pub total: Decimal,
    pub seller_id: Option<VendorId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: ItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub line_total: Decimal,
    /// Quantity already taken out of stock for this line, if any.
    pub reduced_stock: Option<u32>,
    /// Originating item on the parent order (sub-order items only).
    pub parent_item_id: Option<ItemId>,
}

impl OrderItem {
    pub fn new(
        id: ItemId,
        order_id: OrderId,
        product_id: ProductId,
        quantity: u32,
        line_total: Decimal,
    ) -> Self {
        Self {
            id,
            order_id,
            product_id,
            name: format!("product #{}", product_id),
            quantity,
            line_total,
            reduced_stock: None,
            parent_item_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    // Identity
    pub id: OrderId,
    pub parent_id: Option<OrderId>,
    pub seller_id: Option<VendorId>,

    // Lifecycle
    pub status: OrderStatus,
    pub has_sub_order: bool,
    pub is_paid: bool,
    pub stock_reduced: bool,

    // Money
    pub payment_method: String,
    pub total: Decimal,
    pub prices_include_tax: bool,
    pub shipping_lines: Vec<ShippingLine>,

    // Customer details copied onto sub-orders
    pub billing: Address,
    pub shipping: Address,

    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// A fresh checkout order with no parent.
    pub fn root(id: OrderId, payment_method: impl Into<String>, total: Decimal) -> Self {
        Self {
            id,
            parent_id: None,
            seller_id: None,
            status: OrderStatus::Pending,
            has_sub_order: false,
            is_paid: false,
            stock_reduced: false,
            payment_method: payment_method.into(),
            total,
            prices_include_tax: false,
            shipping_lines: Vec::new(),
            billing: Address::default(),
            shipping: Address::default(),
            notes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Derive a vendor sub-order from this (root) order.
    pub fn sub_order_of(
        parent: &Order,
        id: OrderId,
        seller_id: VendorId,
        total: Decimal,
        shipping_lines: Vec<ShippingLine>,
    ) -> Result<Self, OrderError> {
        if parent.parent_id.is_some() {
            return Err(OrderError::NestedSubOrder(parent.id));
        }

        Ok(Self {
            id,
            parent_id: Some(parent.id),
            seller_id: Some(seller_id),
            status: parent.status,
            has_sub_order: false,
            is_paid: parent.is_paid,
            stock_reduced: false,
            payment_method: parent.payment_method.clone(),
            total,
            prices_include_tax: parent.prices_include_tax,
            shipping_lines,
            billing: parent.billing.clone(),
            shipping: parent.shipping.clone(),
            notes: Vec::new(),
            created_at: Utc::now(),
        })
    }

    pub fn is_sub_order(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn shipping_total(&self) -> Decimal {
        self.shipping_lines.iter().map(|line| line.total).sum()
    }

    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
