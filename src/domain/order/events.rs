use serde::{Deserialize, Serialize};

use crate::event_bus::DomainEvent;
use super::value_objects::{ItemId, OrderId, OrderStatus, ProductId};

// ============================================================================
// Order Events - consumed from the host order-management system
// ============================================================================

/// Order Event - union of every event the marketplace listens to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    CheckoutCompleted(CheckoutCompleted),
    StatusChanged(OrderStatusChanged),
    ItemStockReduced(ItemStockReduced),
}

/// Subscription key for [`OrderEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderEventKind {
    CheckoutCompleted,
    StatusChanged,
    ItemStockReduced,
}

impl DomainEvent for OrderEvent {
    type Kind = OrderEventKind;

    fn kind(&self) -> OrderEventKind {
        match self {
            OrderEvent::CheckoutCompleted(_) => OrderEventKind::CheckoutCompleted,
            OrderEvent::StatusChanged(_) => OrderEventKind::StatusChanged,
            OrderEvent::ItemStockReduced(_) => OrderEventKind::ItemStockReduced,
        }
    }

    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::CheckoutCompleted(_) => "order.checkout_completed",
            OrderEvent::StatusChanged(_) => "order.status_changed",
            OrderEvent::ItemStockReduced(_) => "order.item_stock_reduced",
        }
    }
}

// ============================================================================
// Individual Event Types
// ============================================================================

/// Who initiated a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrigin {
    /// Customer checkout or payment gateway callback
    Checkout,
    /// Shop manager editing the order
    Admin,
    /// Parent status pushed down to a sub-order
    Cascade,
    /// Rule-driven transition (auto-complete)
    Automatic,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CheckoutCompleted {
    pub order_id: OrderId,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct OrderStatusChanged {
    pub order_id: OrderId,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
    pub origin: ChangeOrigin,
}

/// Stock movement for a single product, levels before and after.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct StockChange {
    pub product_id: ProductId,
    pub from: i64,
    pub to: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ItemStockReduced {
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub change: StockChange,
}
