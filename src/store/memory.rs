use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rust_decimal::Decimal;

use super::{LedgerRepository, OrderRepository, StoreError, Transactional};
use crate::domain::ledger::{BalanceStatus, NewBalanceEntry, SyncRow, TransactionType, VendorBalanceEntry};
use crate::domain::order::{ItemId, Order, OrderId, OrderItem, OrderStatus};

// ============================================================================
// In-Memory Store
// ============================================================================
//
// Tables live behind one mutex. `begin` pushes a snapshot of every table,
// `rollback` restores it, `commit` drops it. The ledger enforces the
// approved-entry uniqueness constraint on insert, like a partial unique
// index would.
//
// ============================================================================

#[derive(Clone, Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<ItemId, OrderItem>,
    sync_rows: BTreeMap<OrderId, SyncRow>,
    ledger: Vec<VendorBalanceEntry>,
    next_order_id: u64,
    next_item_id: u64,
    next_entry_id: u64,
}

#[derive(Default)]
struct Faults {
    /// Remaining successful order inserts before inserts start failing
    order_inserts_before_failure: Option<usize>,
    /// Number of upcoming `begin` calls that report the store unavailable
    unavailable_begins: u32,
}

#[derive(Default)]
struct Inner {
    tables: Tables,
    snapshots: Vec<Tables>,
    faults: Faults,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `successes` more order inserts through, then fail every insert.
    pub fn fail_order_inserts_after(&self, successes: usize) {
        self.lock().faults.order_inserts_before_failure = Some(successes);
    }

    /// Report the store unavailable on the next `times` transaction starts.
    pub fn fail_next_begins(&self, times: u32) {
        self.lock().faults.unavailable_begins = times;
    }

    pub fn clear_faults(&self) {
        self.lock().faults = Faults::default();
    }

    pub fn order_count(&self) -> usize {
        self.lock().tables.orders.len()
    }

    pub fn ledger_entries(&self) -> Vec<VendorBalanceEntry> {
        self.lock().tables.ledger.clone()
    }

    pub fn is_in_transaction(&self) -> bool {
        !self.lock().snapshots.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Transactions
// ============================================================================

impl Transactional for MemoryStore {
    fn begin(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.faults.unavailable_begins > 0 {
            inner.faults.unavailable_begins -= 1;
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        let snapshot = inner.tables.clone();
        inner.snapshots.push(snapshot);
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner
            .snapshots
            .pop()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("commit without begin".to_string()))
    }

    fn rollback(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.snapshots.pop() {
            Some(snapshot) => {
                inner.tables = snapshot;
                tracing::debug!(depth = inner.snapshots.len(), "Rolled back transaction");
                Ok(())
            }
            None => Err(StoreError::Transaction("rollback without begin".to_string())),
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

impl OrderRepository for MemoryStore {
    fn next_order_id(&self) -> Result<OrderId, StoreError> {
        let mut inner = self.lock();
        inner.tables.next_order_id += 1;
        Ok(OrderId(inner.tables.next_order_id))
    }

    fn next_item_id(&self) -> Result<ItemId, StoreError> {
        let mut inner = self.lock();
        inner.tables.next_item_id += 1;
        Ok(ItemId(inner.tables.next_item_id))
    }

    fn get_order(&self, id: OrderId) -> Result<Order, StoreError> {
        self.lock()
            .tables
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::order_not_found(id))
    }

    fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.lock();

        if let Some(remaining) = inner.faults.order_inserts_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(StoreError::Transaction(format!("insert of order {} failed", order.id)));
            }
            *remaining -= 1;
        }

        if inner.tables.orders.contains_key(&order.id) {
            return Err(StoreError::UniqueViolation(format!("order {}", order.id)));
        }
        inner.tables.next_order_id = inner.tables.next_order_id.max(order.id.0);
        inner.tables.orders.insert(order.id, order.clone());
        Ok(())
    }

    fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.tables.orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(StoreError::order_not_found(order.id)),
        }
    }

    fn child_orders(&self, parent: OrderId) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .lock()
            .tables
            .orders
            .values()
            .filter(|order| order.parent_id == Some(parent))
            .cloned()
            .collect())
    }

    fn items(&self, order: OrderId) -> Result<Vec<OrderItem>, StoreError> {
        Ok(self
            .lock()
            .tables
            .items
            .values()
            .filter(|item| item.order_id == order)
            .cloned()
            .collect())
    }

    fn get_item(&self, id: ItemId) -> Result<OrderItem, StoreError> {
        self.lock()
            .tables
            .items
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::item_not_found(id))
    }

    fn insert_item(&self, item: &OrderItem) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.tables.items.contains_key(&item.id) {
            return Err(StoreError::UniqueViolation(format!("order item {}", item.id)));
        }
        inner.tables.next_item_id = inner.tables.next_item_id.max(item.id.0);
        inner.tables.items.insert(item.id, item.clone());
        Ok(())
    }

    fn save_item(&self, item: &OrderItem) -> Result<(), StoreError> {
        let mut inner = self.lock();
        match inner.tables.items.get_mut(&item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(())
            }
            None => Err(StoreError::item_not_found(item.id)),
        }
    }

    fn upsert_sync_row(&self, row: &SyncRow) -> Result<(), StoreError> {
        self.lock().tables.sync_rows.insert(row.order_id, row.clone());
        Ok(())
    }

    fn sync_row(&self, order: OrderId) -> Result<Option<SyncRow>, StoreError> {
        Ok(self.lock().tables.sync_rows.get(&order).cloned())
    }

    fn update_sync_status(&self, order: OrderId, status: OrderStatus) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        Ok(match inner.tables.sync_rows.get_mut(&order) {
            Some(row) => {
                row.order_status = status;
                true
            }
            None => false,
        })
    }

    fn update_sync_amounts(&self, order: OrderId, total: Decimal, net: Decimal) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        Ok(match inner.tables.sync_rows.get_mut(&order) {
            Some(row) => {
                row.order_total = total;
                row.net_amount = net;
                true
            }
            None => false,
        })
    }
}

// ============================================================================
// Ledger
// ============================================================================

impl LedgerRepository for MemoryStore {
    fn insert_entry(&self, entry: NewBalanceEntry) -> Result<VendorBalanceEntry, StoreError> {
        let mut inner = self.lock();

        if entry.status == BalanceStatus::Approved {
            let duplicate = inner.tables.ledger.iter().any(|existing| {
                existing.trn_id == entry.trn_id
                    && existing.trn_type == entry.trn_type
                    && existing.status == BalanceStatus::Approved
            });
            if duplicate {
                return Err(StoreError::UniqueViolation(format!(
                    "approved {} entry for order {}",
                    entry.trn_type.as_str(),
                    entry.trn_id
                )));
            }
        }

        inner.tables.next_entry_id += 1;
        let stored = entry.into_entry(inner.tables.next_entry_id, Utc::now());
        inner.tables.ledger.push(stored.clone());
        Ok(stored)
    }

    fn find_entry(
        &self,
        trn_id: OrderId,
        trn_type: TransactionType,
        status: Option<BalanceStatus>,
    ) -> Result<Option<VendorBalanceEntry>, StoreError> {
        Ok(self
            .lock()
            .tables
            .ledger
            .iter()
            .find(|entry| {
                entry.trn_id == trn_id
                    && entry.trn_type == trn_type
                    && status.map_or(true, |wanted| entry.status == wanted)
            })
            .cloned())
    }

    fn update_entry_status(
        &self,
        trn_id: OrderId,
        trn_type: TransactionType,
        status: BalanceStatus,
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let mut updated = 0;
        for entry in inner
            .tables
            .ledger
            .iter_mut()
            .filter(|entry| entry.trn_id == trn_id && entry.trn_type == trn_type)
        {
            entry.status = status;
            updated += 1;
        }
        Ok(updated)
    }

    fn entries_for(&self, trn_id: OrderId) -> Result<Vec<VendorBalanceEntry>, StoreError> {
        Ok(self
            .lock()
            .tables
            .ledger
            .iter()
            .filter(|entry| entry.trn_id == trn_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{ProductId, VendorId};
    use crate::store::in_transaction;

    fn order(store: &MemoryStore) -> Order {
        let id = store.next_order_id().unwrap();
        let order = Order::root(id, "stripe", Decimal::new(1000, 2));
        store.insert_order(&order).unwrap();
        order
    }

    #[test]
    fn test_rollback_restores_all_tables() {
        let store = MemoryStore::new();
        let existing = order(&store);

        let result: Result<(), StoreError> = in_transaction(&store, || {
            let mut changed = existing.clone();
            changed.has_sub_order = true;
            store.save_order(&changed)?;
            order(&store);
            Err(StoreError::Transaction("boom".to_string()))
        });

        assert!(result.is_err());
        assert_eq!(store.order_count(), 1);
        assert!(!store.get_order(existing.id).unwrap().has_sub_order);
        assert!(!store.is_in_transaction());
    }

    #[test]
    fn test_commit_keeps_changes() {
        let store = MemoryStore::new();

        let created = in_transaction(&store, || -> Result<Order, StoreError> { Ok(order(&store)) }).unwrap();

        assert_eq!(store.get_order(created.id).unwrap(), created);
        assert!(!store.is_in_transaction());
    }

    #[test]
    fn test_nested_rollback_only_undoes_inner() {
        let store = MemoryStore::new();

        in_transaction(&store, || -> Result<(), StoreError> {
            order(&store);
            let inner: Result<(), StoreError> = in_transaction(&store, || {
                order(&store);
                Err(StoreError::Transaction("inner".to_string()))
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();

        assert_eq!(store.order_count(), 1);
    }

    #[test]
    fn test_insert_fault_injection() {
        let store = MemoryStore::new();
        store.fail_order_inserts_after(1);

        order(&store);
        let id = store.next_order_id().unwrap();
        let result = store.insert_order(&Order::root(id, "cod", Decimal::ZERO));

        assert!(matches!(result, Err(StoreError::Transaction(_))));
    }

    #[test]
    fn test_unavailable_begin_is_transient() {
        use crate::utils::IsTransient;

        let store = MemoryStore::new();
        store.fail_next_begins(1);

        let err = store.begin().unwrap_err();
        assert!(err.is_transient());
        assert!(store.begin().is_ok());
    }

    #[test]
    fn test_child_orders_filter_by_parent() {
        let store = MemoryStore::new();
        let parent = order(&store);
        let sub = Order::sub_order_of(&parent, store.next_order_id().unwrap(), VendorId(1), Decimal::ZERO, vec![])
            .unwrap();
        store.insert_order(&sub).unwrap();
        order(&store);

        let children = store.child_orders(parent.id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, sub.id);
    }

    #[test]
    fn test_items_and_save_item() {
        let store = MemoryStore::new();
        let parent = order(&store);
        let mut item = OrderItem::new(store.next_item_id().unwrap(), parent.id, ProductId(5), 2, Decimal::new(400, 2));
        store.insert_item(&item).unwrap();

        item.reduced_stock = Some(2);
        store.save_item(&item).unwrap();

        assert_eq!(store.items(parent.id).unwrap(), vec![item.clone()]);
        assert_eq!(store.get_item(item.id).unwrap().reduced_stock, Some(2));
        assert!(matches!(store.get_item(ItemId(99)), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_approved_ledger_entries_are_unique() {
        let store = MemoryStore::new();
        let refund = NewBalanceEntry::refund(VendorId(1), OrderId(7), Decimal::new(500, 2));

        store.insert_entry(refund.clone()).unwrap();
        let duplicate = store.insert_entry(refund);

        assert!(matches!(duplicate, Err(StoreError::UniqueViolation(_))));
        assert_eq!(store.ledger_entries().len(), 1);
    }

    #[test]
    fn test_pending_entries_are_not_constrained() {
        let store = MemoryStore::new();
        let earning = NewBalanceEntry::order_earning(VendorId(1), OrderId(7), Decimal::ONE);

        store.insert_entry(earning.clone()).unwrap();
        store.insert_entry(earning).unwrap();

        assert_eq!(store.entries_for(OrderId(7)).unwrap().len(), 2);
    }

    #[test]
    fn test_update_entry_status_and_find() {
        let store = MemoryStore::new();
        store
            .insert_entry(NewBalanceEntry::order_earning(VendorId(1), OrderId(7), Decimal::ONE))
            .unwrap();

        let updated = store
            .update_entry_status(OrderId(7), TransactionType::OrderEarning, BalanceStatus::Order(OrderStatus::Completed))
            .unwrap();

        assert_eq!(updated, 1);
        let found = store
            .find_entry(OrderId(7), TransactionType::OrderEarning, Some(BalanceStatus::Order(OrderStatus::Completed)))
            .unwrap();
        assert!(found.is_some());
        assert!(store.find_entry(OrderId(7), TransactionType::Refund, None).unwrap().is_none());
    }

    #[test]
    fn test_sync_row_updates_report_missing_rows() {
        let store = MemoryStore::new();
        let row = SyncRow {
            order_id: OrderId(3),
            order_status: OrderStatus::Pending,
            order_total: Decimal::new(1000, 2),
            net_amount: Decimal::new(900, 2),
            seller_id: VendorId(2),
        };
        store.upsert_sync_row(&row).unwrap();

        assert!(store.update_sync_status(OrderId(3), OrderStatus::Processing).unwrap());
        assert!(!store.update_sync_status(OrderId(4), OrderStatus::Processing).unwrap());
        assert!(store.update_sync_amounts(OrderId(3), Decimal::ZERO, Decimal::ZERO).unwrap());

        let stored = store.sync_row(OrderId(3)).unwrap().unwrap();
        assert_eq!(stored.order_status, OrderStatus::Processing);
        assert_eq!(stored.order_total, Decimal::ZERO);
    }
}
