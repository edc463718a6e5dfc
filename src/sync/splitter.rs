use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;

use crate::collaborators::{Commission, ProductCatalog, ShippingAllocator};
use crate::domain::ledger::SyncRow;
use crate::domain::order::{Order, OrderId, OrderItem, VendorId};
use crate::metrics::Metrics;
use crate::store::{in_transaction, OrderRepository};
use crate::utils::{retry_on_transient, RetryConfig};

use super::guard::{GuardKey, ReentrancyGuard};
use super::{ConsistencyError, SyncError};

// ============================================================================
// Order Splitter - one sub-order per vendor
// ============================================================================
//
// Splitting runs once per root order. Every write of a split (sub-orders,
// their items, sync rows, the parent's `has_sub_order` flag) happens in one
// store transaction, so a failed split leaves nothing behind and can be
// retried.
//
// ============================================================================

/// Largest difference between the parent total and the sum of sub-order
/// totals that is still treated as rounding.
const RECONCILE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

pub struct OrderSplitter {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ProductCatalog>,
    commission: Arc<dyn Commission>,
    shipping: Arc<dyn ShippingAllocator>,
    guard: Arc<ReentrancyGuard>,
    metrics: Arc<Metrics>,
    retry: RetryConfig,
}

impl OrderSplitter {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        catalog: Arc<dyn ProductCatalog>,
        commission: Arc<dyn Commission>,
        shipping: Arc<dyn ShippingAllocator>,
        guard: Arc<ReentrancyGuard>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orders,
            catalog,
            commission,
            shipping,
            guard,
            metrics,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Split `order_id` into per-vendor sub-orders and return their ids.
    ///
    /// On an order that is already split this returns the existing
    /// sub-orders without creating any.
    pub fn split(&self, order_id: OrderId) -> Result<Vec<OrderId>, SyncError> {
        let Some(_token) = self.guard.enter(GuardKey::Split(order_id)) else {
            return self.existing_sub_orders(order_id);
        };

        let order = self.orders.get_order(order_id)?;

        if order.is_sub_order() {
            tracing::debug!(order_id = %order_id, "Sub-orders are never split");
            return Ok(Vec::new());
        }

        if order.has_sub_order {
            let existing = self.existing_sub_orders(order_id)?;
            if existing.is_empty() {
                return Err(ConsistencyError::MissingChildren(order_id).into());
            }
            tracing::debug!(order_id = %order_id, sub_orders = existing.len(), "Order already split");
            return Ok(existing);
        }

        let items = self.orders.items(order_id)?;
        if items.is_empty() {
            tracing::debug!(order_id = %order_id, "Order has no items to split");
            return Ok(Vec::new());
        }

        let groups = self.group_by_vendor(items)?;
        let started = Instant::now();

        let created = retry_on_transient(&self.retry, |attempt| {
            if attempt > 1 {
                self.metrics.record_retry_attempt("split_order", attempt);
            }
            in_transaction(self.orders.as_ref(), || self.create_sub_orders(&order, &groups))
        })
        .into_result()
        .map_err(|error| {
            tracing::error!(order_id = %order_id, error = %error, "Order split rolled back");
            error
        })?;

        self.metrics
            .record_split(created.len(), started.elapsed().as_secs_f64());
        self.check_reconciliation(&order, &created);

        let ids: Vec<OrderId> = created.iter().map(|sub| sub.id).collect();
        tracing::info!(
            order_id = %order_id,
            vendors = groups.len(),
            sub_orders = ?ids,
            "✂️ Order split into sub-orders"
        );

        Ok(ids)
    }

    fn existing_sub_orders(&self, order_id: OrderId) -> Result<Vec<OrderId>, SyncError> {
        Ok(self
            .orders
            .child_orders(order_id)?
            .into_iter()
            .map(|sub| sub.id)
            .collect())
    }

    fn group_by_vendor(
        &self,
        items: Vec<OrderItem>,
    ) -> Result<BTreeMap<VendorId, Vec<OrderItem>>, SyncError> {
        let mut groups: BTreeMap<VendorId, Vec<OrderItem>> = BTreeMap::new();

        for item in items {
            let vendor = self
                .catalog
                .vendor_of(item.product_id)
                .ok_or(ConsistencyError::UnknownVendor(item.product_id))?;
            groups.entry(vendor).or_default().push(item);
        }

        Ok(groups)
    }

    fn create_sub_orders(
        &self,
        parent: &Order,
        groups: &BTreeMap<VendorId, Vec<OrderItem>>,
    ) -> Result<Vec<Order>, SyncError> {
        let subtotals: BTreeMap<VendorId, Decimal> = groups
            .iter()
            .map(|(vendor, items)| (*vendor, items.iter().map(|item| item.line_total).sum()))
            .collect();
        let mut shipping = self.shipping.allocate(parent, &subtotals);
        let mut created = Vec::with_capacity(groups.len());

        for (vendor, items) in groups {
            let shipping_lines = shipping.remove(vendor).unwrap_or_default();
            let shipping_total: Decimal = shipping_lines.iter().map(|line| line.total).sum();
            let subtotal = subtotals.get(vendor).copied().unwrap_or_default();

            let id = self.orders.next_order_id()?;
            let sub_order = Order::sub_order_of(parent, id, *vendor, subtotal + shipping_total, shipping_lines)?;
            self.orders.insert_order(&sub_order)?;

            let mut sub_items = Vec::with_capacity(items.len());
            for item in items {
                let sub_item = OrderItem {
                    id: self.orders.next_item_id()?,
                    order_id: id,
                    parent_item_id: Some(item.id),
                    ..item.clone()
                };
                self.orders.insert_item(&sub_item)?;
                sub_items.push(sub_item);
            }

            self.orders.upsert_sync_row(&SyncRow {
                order_id: id,
                order_status: sub_order.status,
                order_total: sub_order.total,
                net_amount: self.commission.vendor_earning(&sub_order, &sub_items),
                seller_id: *vendor,
            })?;

            tracing::debug!(
                order_id = %parent.id,
                sub_order_id = %id,
                vendor_id = %vendor,
                items = sub_items.len(),
                total = %sub_order.total,
                "Created sub-order"
            );
            created.push(sub_order);
        }

        let mut parent = self.orders.get_order(parent.id)?;
        parent.has_sub_order = true;
        self.orders.save_order(&parent)?;

        Ok(created)
    }

    fn check_reconciliation(&self, parent: &Order, created: &[Order]) {
        let children: Decimal = created.iter().map(|sub| sub.total).sum();
        if (parent.total - children).abs() > RECONCILE_TOLERANCE {
            let error = ConsistencyError::TotalsMismatch {
                order_id: parent.id,
                parent: parent.total,
                children,
            };
            tracing::warn!(order_id = %parent.id, error = %error, "Split totals do not reconcile");
        }
    }
}
