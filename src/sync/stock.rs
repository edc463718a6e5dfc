use std::sync::Arc;

use crate::collaborators::ProductCatalog;
use crate::domain::order::{ItemId, ItemStockReduced, Order, OrderEvent, OrderId};
use crate::metrics::Metrics;
use crate::store::{OrderRepository, StoreError};

use super::{ConsistencyError, OrderBus, SyncError};

// ============================================================================
// Stock Sync Adapter
// ============================================================================
//
// Only orders that hold their own line items reduce stock: a split parent
// never does. When a sub-order item is reduced, the reduced quantity is
// copied onto the parent item it came from, without touching stock again.
//
// ============================================================================

pub struct StockSyncAdapter {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ProductCatalog>,
    metrics: Arc<Metrics>,
}

impl StockSyncAdapter {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ProductCatalog>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { orders, catalog, metrics }
    }

    pub fn can_reduce_stock(&self, order: &Order) -> bool {
        !order.has_sub_order
    }

    /// Take each not yet reduced item of `order_id` out of stock and publish
    /// `order.item_stock_reduced` for it.
    ///
    /// Products without managed stock are left alone.
    pub fn reduce_order_stock(&self, bus: &OrderBus, order_id: OrderId) -> Result<Vec<ItemId>, SyncError> {
        let order = self.orders.get_order(order_id)?;
        if !self.can_reduce_stock(&order) {
            tracing::debug!(order_id = %order_id, "Order has sub-orders, stock is reduced on them");
            self.metrics.record_stock("blocked");
            return Ok(Vec::new());
        }

        let mut reduced = Vec::new();
        for mut item in self.orders.items(order_id)? {
            if item.reduced_stock.is_some() {
                continue;
            }

            let Some(change) = self
                .catalog
                .adjust_stock(item.product_id, -i64::from(item.quantity))?
            else {
                continue;
            };

            item.reduced_stock = Some(item.quantity);
            self.orders.save_item(&item)?;
            self.metrics.record_stock("reduced");

            tracing::debug!(
                order_id = %order_id,
                item_id = %item.id,
                product_id = %change.product_id,
                from = change.from,
                to = change.to,
                "Reduced item stock"
            );

            bus.publish(OrderEvent::ItemStockReduced(ItemStockReduced {
                order_id,
                item_id: item.id,
                change,
            }))?;
            reduced.push(item.id);
        }

        if !reduced.is_empty() {
            let mut order = self.orders.get_order(order_id)?;
            order.stock_reduced = true;
            self.orders.save_order(&order)?;
            tracing::info!(order_id = %order_id, items = reduced.len(), "📦 Order stock reduced");
        }

        Ok(reduced)
    }

    /// Mirror a sub-order item's reduced quantity onto its parent item.
    ///
    /// Returns whether a parent item was updated.
    pub fn on_item_stock_reduced(&self, event: &ItemStockReduced) -> Result<bool, SyncError> {
        let order = self.orders.get_order(event.order_id)?;
        if !order.is_sub_order() {
            return Ok(false);
        }

        let item = self.orders.get_item(event.item_id)?;
        let Some(parent_item_id) = item.parent_item_id else {
            return Ok(false);
        };
        let Some(reduced) = item.reduced_stock.filter(|quantity| *quantity > 0) else {
            return Ok(false);
        };

        let mut parent_item = match self.orders.get_item(parent_item_id) {
            Err(StoreError::NotFound { .. }) => {
                return Err(ConsistencyError::MissingParentItem {
                    item_id: item.id,
                    parent_item_id,
                }
                .into());
            }
            other => other?,
        };

        parent_item.reduced_stock = Some(reduced);
        self.orders.save_item(&parent_item)?;
        self.metrics.record_stock("mirrored");

        tracing::debug!(
            order_id = %event.order_id,
            item_id = %item.id,
            parent_item_id = %parent_item_id,
            reduced = reduced,
            "Mirrored reduced stock to parent item"
        );

        Ok(true)
    }
}
