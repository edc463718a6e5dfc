use std::sync::Arc;

use rust_decimal::Decimal;

use crate::collaborators::Commission;
use crate::domain::ledger::{BalanceStatus, NewBalanceEntry, TransactionType, VendorBalanceEntry};
use crate::domain::order::{Order, OrderId, OrderStatus};
use crate::metrics::Metrics;
use crate::store::{in_transaction, LedgerRepository, OrderRepository, StoreError};

use super::exclusion::BalancePolicy;
use super::{ConsistencyError, SyncError};

// ============================================================================
// Ledger Recorder - vendor balance entries
// ============================================================================
//
// Every write checks for an existing row first. That check only saves work:
// two requests can both pass it, and the store's uniqueness constraint on
// approved rows decides which insert wins. The loser reports the entry as
// already recorded.
//
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RefundOutcome {
    Recorded(VendorBalanceEntry),
    AlreadyRecorded,
    /// Order excluded from the vendor balance (cash on delivery)
    Excluded,
    /// The order has sub-orders, each refunded on its own
    #[default]
    NotApplicable,
}

/// Writes vendor balance rows for orders.
///
/// `orders` and `ledger` must be backed by the same store: a refund zeroes
/// the sync row through `orders` inside a transaction opened on `ledger`.
pub struct LedgerRecorder {
    orders: Arc<dyn OrderRepository>,
    ledger: Arc<dyn LedgerRepository>,
    commission: Arc<dyn Commission>,
    balance: BalancePolicy,
    metrics: Arc<Metrics>,
}

impl LedgerRecorder {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        ledger: Arc<dyn LedgerRepository>,
        commission: Arc<dyn Commission>,
        balance: BalancePolicy,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orders,
            ledger,
            commission,
            balance,
            metrics,
        }
    }

    /// Credit the vendor's net earning for `order_id` back as an approved refund.
    ///
    /// Safe to call any number of times; one approved refund row exists
    /// afterwards.
    pub fn record_refund(&self, order_id: OrderId) -> Result<RefundOutcome, SyncError> {
        let order = self.orders.get_order(order_id)?;

        if order.has_sub_order {
            tracing::debug!(order_id = %order_id, "Order has sub-orders, refund is recorded per sub-order");
            return Ok(RefundOutcome::NotApplicable);
        }
        let vendor_id = order.seller_id.ok_or(ConsistencyError::MissingSeller(order_id))?;

        let trn_type = TransactionType::Refund;
        if self
            .ledger
            .find_entry(order_id, trn_type, Some(BalanceStatus::Approved))?
            .is_some()
        {
            tracing::debug!(order_id = %order_id, "Refund already recorded");
            self.metrics.record_ledger_write(trn_type.as_str(), true);
            return Ok(RefundOutcome::AlreadyRecorded);
        }

        let net_amount = self.net_earning(&order)?;

        let written = in_transaction(self.ledger.as_ref(), || {
            let entry = self
                .ledger
                .insert_entry(NewBalanceEntry::refund(vendor_id, order_id, net_amount))?;
            self.orders
                .update_sync_amounts(order_id, Decimal::ZERO, Decimal::ZERO)?;
            Ok::<_, SyncError>(entry)
        });

        match written {
            Ok(entry) => {
                tracing::info!(
                    order_id = %order_id,
                    vendor_id = %vendor_id,
                    credit = %entry.credit,
                    "💸 Refund credited to vendor balance"
                );
                self.metrics.record_ledger_write(trn_type.as_str(), false);
                Ok(RefundOutcome::Recorded(entry))
            }
            Err(SyncError::Storage(StoreError::UniqueViolation(_))) => {
                let error = ConsistencyError::DuplicateLedgerEntry {
                    order_id,
                    trn_type: trn_type.as_str(),
                };
                tracing::warn!(order_id = %order_id, error = %error, "Concurrent refund lost the insert race");
                self.metrics.record_ledger_write(trn_type.as_str(), true);
                Ok(RefundOutcome::AlreadyRecorded)
            }
            Err(error) => {
                tracing::error!(order_id = %order_id, error = %error, "Refund write failed");
                Err(error)
            }
        }
    }

    /// Record a refund when `order_id` has just moved to `refunded`, unless
    /// the order is excluded from the vendor balance.
    pub fn on_status_change(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
    ) -> Result<RefundOutcome, SyncError> {
        if new_status != OrderStatus::Refunded {
            return Ok(RefundOutcome::NotApplicable);
        }

        let order = self.orders.get_order(order_id)?;
        if self.balance.excludes(&order, new_status) {
            tracing::debug!(order_id = %order_id, "Refund excluded from vendor balance");
            return Ok(RefundOutcome::Excluded);
        }

        self.record_refund(order_id)
    }

    /// Write a pending earning row for each vendor order behind `order_id`:
    /// its sub-orders when split, otherwise the order itself.
    pub fn record_order_earnings(&self, order_id: OrderId) -> Result<Vec<VendorBalanceEntry>, SyncError> {
        let order = self.orders.get_order(order_id)?;
        let targets = if order.has_sub_order {
            let children = self.orders.child_orders(order_id)?;
            if children.is_empty() {
                return Err(ConsistencyError::MissingChildren(order_id).into());
            }
            children
        } else {
            vec![order]
        };

        let mut written = Vec::new();
        for target in targets {
            if let Some(entry) = self.record_earning(&target)? {
                written.push(entry);
            }
        }

        Ok(written)
    }

    fn record_earning(&self, order: &Order) -> Result<Option<VendorBalanceEntry>, SyncError> {
        let trn_type = TransactionType::OrderEarning;

        let Some(vendor_id) = order.seller_id else {
            tracing::debug!(order_id = %order.id, "Order has no seller, no earning recorded");
            return Ok(None);
        };
        if self.ledger.find_entry(order.id, trn_type, None)?.is_some() {
            tracing::debug!(order_id = %order.id, "Earning already recorded");
            self.metrics.record_ledger_write(trn_type.as_str(), true);
            return Ok(None);
        }

        let earning = self.net_earning(order)?;
        let entry = self
            .ledger
            .insert_entry(NewBalanceEntry::order_earning(vendor_id, order.id, earning))?;

        tracing::info!(
            order_id = %order.id,
            vendor_id = %vendor_id,
            debit = %entry.debit,
            "📒 Vendor earning recorded"
        );
        self.metrics.record_ledger_write(trn_type.as_str(), false);

        Ok(Some(entry))
    }

    fn net_earning(&self, order: &Order) -> Result<Decimal, SyncError> {
        let items = self.orders.items(order.id)?;
        Ok(self.commission.vendor_earning(order, &items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::PercentageCommission;
    use crate::domain::ledger::SyncRow;
    use crate::domain::order::{OrderItem, ProductId, VendorId};
    use crate::store::{MemoryStore, Transactional};

    /// Ledger whose existence check never finds anything, as when two
    /// requests both read before either writes.
    struct UncheckedLedger(Arc<MemoryStore>);

    impl Transactional for UncheckedLedger {
        fn begin(&self) -> Result<(), StoreError> {
            self.0.begin()
        }

        fn commit(&self) -> Result<(), StoreError> {
            self.0.commit()
        }

        fn rollback(&self) -> Result<(), StoreError> {
            self.0.rollback()
        }
    }

    impl LedgerRepository for UncheckedLedger {
        fn insert_entry(&self, entry: NewBalanceEntry) -> Result<VendorBalanceEntry, StoreError> {
            self.0.insert_entry(entry)
        }

        fn find_entry(
            &self,
            _trn_id: OrderId,
            _trn_type: TransactionType,
            _status: Option<BalanceStatus>,
        ) -> Result<Option<VendorBalanceEntry>, StoreError> {
            Ok(None)
        }

        fn update_entry_status(
            &self,
            trn_id: OrderId,
            trn_type: TransactionType,
            status: BalanceStatus,
        ) -> Result<usize, StoreError> {
            self.0.update_entry_status(trn_id, trn_type, status)
        }

        fn entries_for(&self, trn_id: OrderId) -> Result<Vec<VendorBalanceEntry>, StoreError> {
            self.0.entries_for(trn_id)
        }
    }

    fn vendor_order(store: &MemoryStore) -> OrderId {
        let id = store.next_order_id().unwrap();
        let mut order = Order::root(id, "stripe", Decimal::new(5000, 2));
        order.seller_id = Some(VendorId(10));
        store.insert_order(&order).unwrap();

        let item_id = store.next_item_id().unwrap();
        store
            .insert_item(&OrderItem::new(item_id, id, ProductId(1), 1, Decimal::new(5000, 2)))
            .unwrap();
        store
            .upsert_sync_row(&SyncRow {
                order_id: id,
                order_status: OrderStatus::Processing,
                order_total: Decimal::new(5000, 2),
                net_amount: Decimal::new(4500, 2),
                seller_id: VendorId(10),
            })
            .unwrap();
        id
    }

    fn recorder(store: &Arc<MemoryStore>, ledger: Arc<dyn LedgerRepository>) -> LedgerRecorder {
        LedgerRecorder::new(
            store.clone(),
            ledger,
            Arc::new(PercentageCommission::new(Decimal::TEN)),
            BalancePolicy::new(true),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    #[test]
    fn test_unique_constraint_decides_refund_race() {
        let store = Arc::new(MemoryStore::new());
        let order_id = vendor_order(&store);
        let recorder = recorder(&store, Arc::new(UncheckedLedger(store.clone())));

        let first = recorder.record_refund(order_id).unwrap();
        let second = recorder.record_refund(order_id).unwrap();

        assert!(matches!(first, RefundOutcome::Recorded(ref entry) if entry.credit == Decimal::new(4500, 2)));
        assert_eq!(second, RefundOutcome::AlreadyRecorded);

        let refunds: Vec<_> = store
            .entries_for(order_id)
            .unwrap()
            .into_iter()
            .filter(|entry| entry.trn_type == TransactionType::Refund && entry.status == BalanceStatus::Approved)
            .collect();
        assert_eq!(refunds.len(), 1);
        assert!(!store.is_in_transaction());
        assert_eq!(
            recorder
                .metrics
                .ledger_duplicates_suppressed
                .with_label_values(&["refund"])
                .get(),
            1
        );
    }

    #[test]
    fn test_refund_excluded_for_cod_order() {
        let store = Arc::new(MemoryStore::new());
        let order_id = vendor_order(&store);
        let mut order = store.get_order(order_id).unwrap();
        order.payment_method = "cod".to_string();
        store.save_order(&order).unwrap();
        let recorder = recorder(&store, store.clone());

        assert_eq!(
            recorder.on_status_change(order_id, OrderStatus::Refunded).unwrap(),
            RefundOutcome::Excluded
        );
        assert_eq!(
            recorder.on_status_change(order_id, OrderStatus::Completed).unwrap(),
            RefundOutcome::NotApplicable
        );
        assert!(store.entries_for(order_id).unwrap().is_empty());
    }
}
