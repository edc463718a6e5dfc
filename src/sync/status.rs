use std::sync::Arc;

use crate::collaborators::ProductCatalog;
use crate::domain::ledger::{BalanceStatus, TransactionType};
use crate::domain::order::{ChangeOrigin, Order, OrderId, OrderStatus};
use crate::metrics::Metrics;
use crate::store::{LedgerRepository, OrderRepository, StoreError};

use super::exclusion::BalancePolicy;
use super::guard::{GuardKey, ReentrancyGuard};
use super::lifecycle::transition;
use super::policy::{Decision, TransitionPolicy};
use super::{ConsistencyError, OrderBus, SyncError};

// ============================================================================
// Status Synchronizer
// ============================================================================
//
// Parent to children: a parent's new status is pushed onto each sub-order
// the transition policy allows. Children to parent: digital-only sub-orders
// of a paid parent skip manual processing, and the parent completes once
// every sub-order has.
//
// ============================================================================

pub const DIGITAL_ONLY_NOTE: &str = "Marked as completed because it contains digital products only.";
pub const ALL_SUB_ORDERS_COMPLETED_NOTE: &str =
    "Marked as completed because all sub-orders are completed.";

/// What a parent status change did to the sub-orders and ledger.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CascadeReport {
    pub applied: Vec<OrderId>,
    pub skipped: Vec<OrderId>,
    /// Sub-orders already in the new status
    pub unchanged: Vec<OrderId>,
    pub ledger_rows_updated: usize,
    pub ledger_excluded: bool,
}

pub struct StatusSynchronizer {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn LedgerRepository>,
    catalog: Arc<dyn ProductCatalog>,
    policy: TransitionPolicy,
    balance: BalancePolicy,
    excluded_gateways: Vec<String>,
    guard: Arc<ReentrancyGuard>,
    metrics: Arc<Metrics>,
}

impl StatusSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn LedgerRepository>,
        catalog: Arc<dyn ProductCatalog>,
        policy: TransitionPolicy,
        balance: BalancePolicy,
        excluded_gateways: Vec<String>,
        guard: Arc<ReentrancyGuard>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orders,
            ledger,
            catalog,
            policy,
            balance,
            excluded_gateways,
            guard,
            metrics,
        }
    }

    /// React to `order_id` moving from `old_status` to `new_status`.
    ///
    /// The sync row always takes the new status. Sub-orders follow when the
    /// policy allows it; the order's earning rows follow unless excluded.
    pub fn on_order_status_change(
        &self,
        bus: &OrderBus,
        order_id: OrderId,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) -> Result<CascadeReport, SyncError> {
        if self.guard.is_active(GuardKey::Split(order_id)) {
            tracing::debug!(order_id = %order_id, "Status change during split, not cascading");
            return Ok(CascadeReport::default());
        }
        let Some(_token) = self.guard.enter(GuardKey::Cascade(order_id, new_status)) else {
            return Ok(CascadeReport::default());
        };

        let order = self.orders.get_order(order_id)?;
        let mut report = CascadeReport::default();

        if !self.orders.update_sync_status(order_id, new_status)? {
            tracing::debug!(order_id = %order_id, "No sync row for order");
        }

        // Ledger first, so a nested change to the same order lands last.
        if self.balance.excludes(&order, new_status) {
            tracing::debug!(
                order_id = %order_id,
                payment_method = %order.payment_method,
                "Order excluded from vendor balance"
            );
            self.metrics.record_ledger_status_update("excluded");
            report.ledger_excluded = true;
        } else {
            report.ledger_rows_updated = self.ledger.update_entry_status(
                order_id,
                TransactionType::OrderEarning,
                BalanceStatus::Order(new_status),
            )?;
            if report.ledger_rows_updated > 0 {
                self.metrics.record_ledger_status_update("updated");
            }
        }

        let child_ids: Vec<OrderId> = self
            .orders
            .child_orders(order_id)?
            .into_iter()
            .map(|child| child.id)
            .collect();

        for child_id in child_ids {
            // Reloaded: earlier siblings' events may have moved this one.
            let child = self.orders.get_order(child_id)?;

            if child.status == new_status {
                report.unchanged.push(child_id);
                continue;
            }

            let decision = self.policy.decide(child.status, new_status);
            if !decision.is_allowed() {
                tracing::warn!(
                    sub_order_id = %child_id,
                    from = %child.status,
                    to = %new_status,
                    "Skipped status update for sub-order"
                );
                self.metrics.record_cascade("rejected");
                report.skipped.push(child_id);
                continue;
            }

            if decision == Decision::AllowedFailOpen {
                tracing::warn!(
                    sub_order_id = %child_id,
                    from = %child.status,
                    to = %new_status,
                    "Transition not covered by whitelist, allowing (fail-open)"
                );
                self.metrics.record_cascade("fail_open");
            } else {
                self.metrics.record_cascade("applied");
            }

            transition(
                self.orders.as_ref(),
                bus,
                &self.metrics,
                child_id,
                new_status,
                ChangeOrigin::Cascade,
                None,
            )?;
            report.applied.push(child_id);
        }

        tracing::debug!(
            order_id = %order_id,
            from = %old_status,
            to = %new_status,
            applied = report.applied.len(),
            skipped = report.skipped.len(),
            "Status cascade finished"
        );

        Ok(report)
    }

    /// React to a sub-order's status change on behalf of its parent.
    ///
    /// Returns whether the parent was completed by this call.
    pub fn on_sub_order_status_change(
        &self,
        bus: &OrderBus,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<bool, SyncError> {
        let order = self.orders.get_order(order_id)?;
        let Some(parent_id) = order.parent_id else {
            return Ok(false);
        };

        let parent = match self.orders.get_order(parent_id) {
            Err(StoreError::NotFound { .. }) => {
                return Err(ConsistencyError::MissingParent { order_id, parent_id }.into());
            }
            other => other?,
        };

        let sibling_ids: Vec<OrderId> = self
            .orders
            .child_orders(parent_id)?
            .into_iter()
            .map(|sibling| sibling.id)
            .collect();
        if sibling_ids.is_empty() {
            return Err(ConsistencyError::MissingChildren(parent_id).into());
        }

        let auto_complete = self.auto_complete_allowed(&parent);
        let mut all_completed = true;

        for sibling_id in sibling_ids {
            let mut sibling = self.orders.get_order(sibling_id)?;

            if sibling.status == OrderStatus::Processing
                && auto_complete
                && !self.needs_processing(sibling_id)?
            {
                transition(
                    self.orders.as_ref(),
                    bus,
                    &self.metrics,
                    sibling_id,
                    OrderStatus::Completed,
                    ChangeOrigin::Automatic,
                    Some(DIGITAL_ONLY_NOTE),
                )?;
                sibling = self.orders.get_order(sibling_id)?;
            }

            if sibling.status != OrderStatus::Completed {
                all_completed = false;
            }
        }

        if !all_completed {
            tracing::debug!(
                order_id = %order_id,
                parent_id = %parent_id,
                status = %new_status,
                "Sub-orders still open"
            );
            return Ok(false);
        }

        let completed = transition(
            self.orders.as_ref(),
            bus,
            &self.metrics,
            parent_id,
            OrderStatus::Completed,
            ChangeOrigin::Automatic,
            Some(ALL_SUB_ORDERS_COMPLETED_NOTE),
        )?;
        if completed {
            tracing::info!(parent_id = %parent_id, "✅ All sub-orders completed, parent completed");
        }

        Ok(completed)
    }

    fn auto_complete_allowed(&self, parent: &Order) -> bool {
        parent.is_paid
            && !self
                .excluded_gateways
                .iter()
                .any(|gateway| *gateway == parent.payment_method)
    }

    fn needs_processing(&self, order_id: OrderId) -> Result<bool, SyncError> {
        Ok(self
            .orders
            .items(order_id)?
            .iter()
            .any(|item| self.catalog.needs_processing(item.product_id)))
    }
}
