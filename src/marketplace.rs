use std::sync::Arc;

use rust_decimal::Decimal;

use crate::collaborators::{
    split_packages, Commission, PercentageCommission, ProductCatalog, SellerShippingAllocator,
    ShippingAllocator, ShippingPackage,
};
use crate::config::{ConfigError, MarketplaceConfig};
use crate::domain::coupon::{Coupon, DiscountItem};
use crate::domain::order::{
    ChangeOrigin, CheckoutCompleted, ItemId, Order, OrderEvent, OrderEventKind, OrderId, OrderItem,
    OrderStatus, ProductId, ShippingLine,
};
use crate::event_bus::{EventEnvelope, EventListener};
use crate::metrics::Metrics;
use crate::store::{in_transaction, LedgerRepository, OrderRepository};
use crate::sync::lifecycle::transition;
use crate::sync::{
    skip_inconsistent, BalanceExclusion, BalancePolicy, CascadeReport, CouponGuard, LedgerRecorder,
    OrderBus, OrderSplitter, RefundOutcome, ReentrancyGuard, StatusSynchronizer, StockSyncAdapter,
    SyncError,
};

// ============================================================================
// Marketplace - wiring of the order synchronization components
// ============================================================================
//
// Builds the components over one store, registers their listeners on the
// order bus at fixed priorities and exposes the caller-facing operations.
//
// checkout_completed:  10 split_order, 20 record_order_earnings
// status_changed:       5 split_admin_order, 10 cascade_status,
//                      15 record_refund, 20 reduce_stock,
//                      99 complete_parent_order
// item_stock_reduced:  10 mirror_reduced_stock
//
// ============================================================================

pub const PRIORITY_SPLIT: i32 = 10;
pub const PRIORITY_EARNINGS: i32 = 20;
pub const PRIORITY_ADMIN_SPLIT: i32 = 5;
pub const PRIORITY_CASCADE: i32 = 10;
pub const PRIORITY_REFUND: i32 = 15;
pub const PRIORITY_STOCK: i32 = 20;
pub const PRIORITY_SUB_ORDER: i32 = 99;
pub const PRIORITY_MIRROR_STOCK: i32 = 10;

/// Host services the marketplace consults.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn ProductCatalog>,
    pub commission: Arc<dyn Commission>,
    pub shipping: Arc<dyn ShippingAllocator>,
    pub balance_exclusion: Option<Arc<dyn BalanceExclusion>>,
}

impl Collaborators {
    /// Percentage commission from `config` and seller-based shipping allocation.
    pub fn new(catalog: Arc<dyn ProductCatalog>, config: &MarketplaceConfig) -> Self {
        Self {
            catalog,
            commission: Arc::new(PercentageCommission::new(config.commission.admin_percentage)),
            shipping: Arc::new(SellerShippingAllocator),
            balance_exclusion: None,
        }
    }

    pub fn with_balance_exclusion(mut self, hook: Arc<dyn BalanceExclusion>) -> Self {
        self.balance_exclusion = Some(hook);
        self
    }
}

/// A line of an order being placed.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub line_total: Decimal,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: u32, line_total: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            line_total,
        }
    }
}

pub struct Marketplace {
    orders: Arc<dyn OrderRepository>,
    catalog: Arc<dyn ProductCatalog>,
    bus: OrderBus,
    splitter: Arc<OrderSplitter>,
    status: Arc<StatusSynchronizer>,
    ledger: Arc<LedgerRecorder>,
    stock: Arc<StockSyncAdapter>,
    coupons: CouponGuard,
    metrics: Arc<Metrics>,
}

impl Marketplace {
    pub fn new<S>(
        config: &MarketplaceConfig,
        store: Arc<S>,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
    ) -> Result<Self, ConfigError>
    where
        S: OrderRepository + LedgerRepository + 'static,
    {
        config.validate()?;

        let orders: Arc<dyn OrderRepository> = store.clone();
        let ledger_store: Arc<dyn LedgerRepository> = store;
        let Collaborators {
            catalog,
            commission,
            shipping,
            balance_exclusion,
        } = collaborators;

        let mut balance = BalancePolicy::new(config.withdraw.exclude_cod_payment);
        if let Some(hook) = balance_exclusion {
            balance = balance.with_hook(hook);
        }
        let guard = Arc::new(ReentrancyGuard::new());

        let splitter = Arc::new(OrderSplitter::new(
            orders.clone(),
            catalog.clone(),
            commission.clone(),
            shipping,
            guard.clone(),
            metrics.clone(),
        ));
        let status = Arc::new(StatusSynchronizer::new(
            orders.clone(),
            ledger_store.clone(),
            catalog.clone(),
            config.transition_policy()?,
            balance.clone(),
            config.orders.auto_complete_excluded_gateways.clone(),
            guard,
            metrics.clone(),
        ));
        let ledger = Arc::new(LedgerRecorder::new(
            orders.clone(),
            ledger_store,
            commission,
            balance,
            metrics.clone(),
        ));
        let stock = Arc::new(StockSyncAdapter::new(orders.clone(), catalog.clone(), metrics.clone()));
        let coupons = CouponGuard::new(catalog.clone(), metrics.clone());

        let bus = OrderBus::new();
        bus.subscribe(
            OrderEventKind::CheckoutCompleted,
            PRIORITY_SPLIT,
            Arc::new(SplitOnCheckout { splitter: splitter.clone() }),
        );
        bus.subscribe(
            OrderEventKind::CheckoutCompleted,
            PRIORITY_EARNINGS,
            Arc::new(RecordEarnings { ledger: ledger.clone() }),
        );
        if config.orders.split_on_admin_status_change {
            bus.subscribe(
                OrderEventKind::StatusChanged,
                PRIORITY_ADMIN_SPLIT,
                Arc::new(SplitAdminOrder {
                    orders: orders.clone(),
                    splitter: splitter.clone(),
                    ledger: ledger.clone(),
                    stock: stock.clone(),
                }),
            );
        }
        bus.subscribe(
            OrderEventKind::StatusChanged,
            PRIORITY_CASCADE,
            Arc::new(CascadeStatus { status: status.clone() }),
        );
        bus.subscribe(
            OrderEventKind::StatusChanged,
            PRIORITY_REFUND,
            Arc::new(RecordRefund { ledger: ledger.clone() }),
        );
        bus.subscribe(
            OrderEventKind::StatusChanged,
            PRIORITY_STOCK,
            Arc::new(ReduceStock { stock: stock.clone() }),
        );
        bus.subscribe(
            OrderEventKind::StatusChanged,
            PRIORITY_SUB_ORDER,
            Arc::new(CompleteParentOrder { status: status.clone() }),
        );
        bus.subscribe(
            OrderEventKind::ItemStockReduced,
            PRIORITY_MIRROR_STOCK,
            Arc::new(MirrorReducedStock { stock: stock.clone() }),
        );

        tracing::info!(
            exclude_cod_payment = config.withdraw.exclude_cod_payment,
            split_on_admin_status_change = config.orders.split_on_admin_status_change,
            "🏪 Marketplace order sync ready"
        );

        Ok(Self {
            orders,
            catalog,
            bus,
            splitter,
            status,
            ledger,
            stock,
            coupons,
            metrics,
        })
    }

    pub fn bus(&self) -> &OrderBus {
        &self.bus
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    // ------------------------------------------------------------------------
    // Host order flow
    // ------------------------------------------------------------------------

    /// Store a new pending root order with one item per line.
    pub fn create_order(
        &self,
        payment_method: &str,
        lines: &[OrderLine],
        shipping_lines: Vec<ShippingLine>,
    ) -> Result<OrderId, SyncError> {
        in_transaction(self.orders.as_ref(), || {
            let id = self.orders.next_order_id()?;
            let items_total: Decimal = lines.iter().map(|line| line.line_total).sum();
            let shipping_total: Decimal = shipping_lines.iter().map(|line| line.total).sum();

            let mut order = Order::root(id, payment_method, items_total + shipping_total);
            order.shipping_lines = shipping_lines;
            self.orders.insert_order(&order)?;

            for line in lines {
                let item_id = self.orders.next_item_id()?;
                self.orders.insert_item(&OrderItem::new(
                    item_id,
                    id,
                    line.product_id,
                    line.quantity,
                    line.line_total,
                ))?;
            }

            tracing::debug!(order_id = %id, items = lines.len(), total = %order.total, "Order created");
            Ok(id)
        })
    }

    pub fn mark_paid(&self, order_id: OrderId) -> Result<(), SyncError> {
        let mut order = self.orders.get_order(order_id)?;
        order.is_paid = true;
        self.orders.save_order(&order)?;
        Ok(())
    }

    /// Announce a completed checkout; splits the order and records earnings.
    pub fn checkout_completed(&self, order_id: OrderId) -> Result<(), SyncError> {
        self.bus
            .publish(OrderEvent::CheckoutCompleted(CheckoutCompleted { order_id }))?;
        Ok(())
    }

    /// Move an order to `new_status`, running every status listener.
    pub fn change_status(
        &self,
        order_id: OrderId,
        new_status: OrderStatus,
        origin: ChangeOrigin,
    ) -> Result<bool, SyncError> {
        transition(self.orders.as_ref(), &self.bus, &self.metrics, order_id, new_status, origin, None)
    }

    // ------------------------------------------------------------------------
    // Caller interface
    // ------------------------------------------------------------------------

    pub fn split(&self, order_id: OrderId) -> Result<Vec<OrderId>, SyncError> {
        self.splitter.split(order_id)
    }

    pub fn cascade_status(
        &self,
        order_id: OrderId,
        old_status: OrderStatus,
        new_status: OrderStatus,
    ) -> Result<CascadeReport, SyncError> {
        self.status
            .on_order_status_change(&self.bus, order_id, old_status, new_status)
    }

    pub fn record_refund(&self, order_id: OrderId) -> Result<RefundOutcome, SyncError> {
        self.ledger.record_refund(order_id)
    }

    pub fn can_reduce_stock(&self, order: &Order) -> bool {
        self.stock.can_reduce_stock(order)
    }

    pub fn reduce_order_stock(&self, order_id: OrderId) -> Result<Vec<ItemId>, SyncError> {
        self.stock.reduce_order_stock(&self.bus, order_id)
    }

    pub fn validate_coupon(&self, coupon: &Coupon, items: &[DiscountItem]) -> Result<bool, SyncError> {
        self.coupons.validate(coupon, items)
    }

    pub fn shipping_packages(&self, order_id: OrderId) -> Result<Vec<ShippingPackage>, SyncError> {
        let items = self.orders.items(order_id)?;
        Ok(split_packages(&items, self.catalog.as_ref()))
    }
}

// ============================================================================
// Listeners
// ============================================================================

struct SplitOnCheckout {
    splitter: Arc<OrderSplitter>,
}

impl EventListener<OrderEvent, SyncError> for SplitOnCheckout {
    fn name(&self) -> &'static str {
        "split_order"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, _bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::CheckoutCompleted(event) = &envelope.event_data {
            skip_inconsistent(self.name(), self.splitter.split(event.order_id))?;
        }
        Ok(())
    }
}

struct RecordEarnings {
    ledger: Arc<LedgerRecorder>,
}

impl EventListener<OrderEvent, SyncError> for RecordEarnings {
    fn name(&self) -> &'static str {
        "record_order_earnings"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, _bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::CheckoutCompleted(event) = &envelope.event_data {
            skip_inconsistent(self.name(), self.ledger.record_order_earnings(event.order_id))?;
        }
        Ok(())
    }
}

/// Orders created from the dashboard never pass checkout; they are split on
/// their first admin status change instead.
struct SplitAdminOrder {
    orders: Arc<dyn OrderRepository>,
    splitter: Arc<OrderSplitter>,
    ledger: Arc<LedgerRecorder>,
    stock: Arc<StockSyncAdapter>,
}

impl EventListener<OrderEvent, SyncError> for SplitAdminOrder {
    fn name(&self) -> &'static str {
        "split_admin_order"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, bus: &OrderBus) -> Result<(), SyncError> {
        let OrderEvent::StatusChanged(change) = &envelope.event_data else {
            return Ok(());
        };
        if change.origin != ChangeOrigin::Admin {
            return Ok(());
        }

        let order = self.orders.get_order(change.order_id)?;
        if order.is_sub_order() || order.has_sub_order {
            return Ok(());
        }

        let created = skip_inconsistent(self.name(), self.splitter.split(change.order_id))?;
        if created.is_empty() {
            return Ok(());
        }
        skip_inconsistent(self.name(), self.ledger.record_order_earnings(change.order_id))?;

        // Sub-orders start in the parent's new status without a change event
        // of their own, so their stock is reduced here.
        if change.new_status.reduces_stock() {
            for sub_order_id in created {
                self.stock.reduce_order_stock(bus, sub_order_id)?;
            }
        }
        Ok(())
    }
}

struct CascadeStatus {
    status: Arc<StatusSynchronizer>,
}

impl EventListener<OrderEvent, SyncError> for CascadeStatus {
    fn name(&self) -> &'static str {
        "cascade_status"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::StatusChanged(change) = &envelope.event_data {
            skip_inconsistent(
                self.name(),
                self.status
                    .on_order_status_change(bus, change.order_id, change.old_status, change.new_status),
            )?;
        }
        Ok(())
    }
}

struct RecordRefund {
    ledger: Arc<LedgerRecorder>,
}

impl EventListener<OrderEvent, SyncError> for RecordRefund {
    fn name(&self) -> &'static str {
        "record_refund"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, _bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::StatusChanged(change) = &envelope.event_data {
            skip_inconsistent(
                self.name(),
                self.ledger.on_status_change(change.order_id, change.new_status),
            )?;
        }
        Ok(())
    }
}

struct ReduceStock {
    stock: Arc<StockSyncAdapter>,
}

impl EventListener<OrderEvent, SyncError> for ReduceStock {
    fn name(&self) -> &'static str {
        "reduce_stock"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::StatusChanged(change) = &envelope.event_data {
            if change.new_status.reduces_stock() {
                self.stock.reduce_order_stock(bus, change.order_id)?;
            }
        }
        Ok(())
    }
}

struct CompleteParentOrder {
    status: Arc<StatusSynchronizer>,
}

impl EventListener<OrderEvent, SyncError> for CompleteParentOrder {
    fn name(&self) -> &'static str {
        "complete_parent_order"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::StatusChanged(change) = &envelope.event_data {
            skip_inconsistent(
                self.name(),
                self.status
                    .on_sub_order_status_change(bus, change.order_id, change.new_status),
            )?;
        }
        Ok(())
    }
}

struct MirrorReducedStock {
    stock: Arc<StockSyncAdapter>,
}

impl EventListener<OrderEvent, SyncError> for MirrorReducedStock {
    fn name(&self) -> &'static str {
        "mirror_reduced_stock"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, _bus: &OrderBus) -> Result<(), SyncError> {
        if let OrderEvent::ItemStockReduced(event) = &envelope.event_data {
            skip_inconsistent(self.name(), self.stock.on_item_stock_reduced(event))?;
        }
        Ok(())
    }
}

// ============================================================================
// End-to-end Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryCatalog, Product};
    use crate::domain::coupon::DiscountType;
    use crate::domain::ledger::{BalanceStatus, TransactionType, VendorBalanceEntry};
    use crate::domain::order::{OrderStatusChanged, VendorId};
    use crate::store::{MemoryStore, StoreError};
    use crate::sync::status::{ALL_SUB_ORDERS_COMPLETED_NOTE, DIGITAL_ONLY_NOTE};
    use crate::sync::ConsistencyError;

    const PHYSICAL_A: ProductId = ProductId(1);
    const PHYSICAL_B: ProductId = ProductId(2);
    const DIGITAL_A: ProductId = ProductId(3);
    const DIGITAL_B: ProductId = ProductId(4);
    const VENDOR_A: VendorId = VendorId(10);
    const VENDOR_B: VendorId = VendorId(20);

    struct Fixture {
        store: Arc<MemoryStore>,
        catalog: Arc<MemoryCatalog>,
        market: Marketplace,
    }

    impl Fixture {
        fn order(&self, id: OrderId) -> Order {
            self.store.get_order(id).unwrap()
        }

        fn children(&self, id: OrderId) -> Vec<Order> {
            self.store.child_orders(id).unwrap()
        }

        fn entries(&self, trn_type: TransactionType) -> Vec<VendorBalanceEntry> {
            self.store
                .ledger_entries()
                .into_iter()
                .filter(|entry| entry.trn_type == trn_type)
                .collect()
        }

        /// 2 x physical A for 30.00, 1 x physical B for 20.00, 10.00 shared shipping.
        fn two_vendor_order(&self, payment_method: &str) -> OrderId {
            self.market
                .create_order(
                    payment_method,
                    &[
                        OrderLine::new(PHYSICAL_A, 2, cents(3000)),
                        OrderLine::new(PHYSICAL_B, 1, cents(2000)),
                    ],
                    vec![flat_shipping(1000, None)],
                )
                .unwrap()
        }
    }

    fn cents(value: i64) -> Decimal {
        Decimal::new(value, 2)
    }

    fn flat_shipping(total: i64, seller: Option<VendorId>) -> ShippingLine {
        ShippingLine {
            method: "flat_rate".to_string(),
            total: cents(total),
            seller_id: seller,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MarketplaceConfig::default(), None)
    }

    fn fixture_with(config: MarketplaceConfig, exclusion: Option<Arc<dyn BalanceExclusion>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.add(Product::physical(PHYSICAL_A, VENDOR_A, 100));
        catalog.add(Product::physical(PHYSICAL_B, VENDOR_B, 50));
        catalog.add(Product::digital(DIGITAL_A, VENDOR_A));
        catalog.add(Product::digital(DIGITAL_B, VENDOR_B));

        let mut collaborators = Collaborators::new(catalog.clone(), &config);
        if let Some(hook) = exclusion {
            collaborators = collaborators.with_balance_exclusion(hook);
        }
        let metrics = Arc::new(Metrics::new().unwrap());
        let market = Marketplace::new(&config, store.clone(), collaborators, metrics).unwrap();

        Fixture { store, catalog, market }
    }

    // ------------------------------------------------------------------------
    // Splitting
    // ------------------------------------------------------------------------

    #[test]
    fn test_listeners_registered_in_priority_order() {
        let fx = fixture();
        let bus = fx.market.bus();

        assert_eq!(
            bus.listeners_for(OrderEventKind::CheckoutCompleted),
            vec!["split_order", "record_order_earnings"]
        );
        assert_eq!(
            bus.listeners_for(OrderEventKind::StatusChanged),
            vec![
                "split_admin_order",
                "cascade_status",
                "record_refund",
                "reduce_stock",
                "complete_parent_order"
            ]
        );
        assert_eq!(bus.listeners_for(OrderEventKind::ItemStockReduced), vec!["mirror_reduced_stock"]);
    }

    #[test]
    fn test_checkout_splits_two_vendor_order() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");

        fx.market.checkout_completed(order_id).unwrap();

        let parent = fx.order(order_id);
        let children = fx.children(order_id);
        assert!(parent.has_sub_order);
        assert_eq!(children.len(), 2);

        let vendor_a = children.iter().find(|c| c.seller_id == Some(VENDOR_A)).unwrap();
        let vendor_b = children.iter().find(|c| c.seller_id == Some(VENDOR_B)).unwrap();

        // items plus a pro-rata share of the 10.00 shipping
        assert_eq!(vendor_a.total, cents(3600));
        assert_eq!(vendor_b.total, cents(2400));
        assert_eq!(vendor_a.total + vendor_b.total, parent.total);

        for child in &children {
            let items = fx.store.items(child.id).unwrap();
            let item_total: Decimal = items.iter().map(|item| item.line_total).sum();
            assert_eq!(item_total + child.shipping_total(), child.total);
            assert!(items.iter().all(|item| item.parent_item_id.is_some()));
            assert_eq!(child.parent_id, Some(order_id));
            assert!(!child.has_sub_order);
        }

        let row = fx.store.sync_row(vendor_a.id).unwrap().unwrap();
        assert_eq!(row.seller_id, VENDOR_A);
        assert_eq!(row.order_total, cents(3600));
        // 10% of the 30.00 item subtotal is kept
        assert_eq!(row.net_amount, cents(3300));
        assert_eq!(fx.market.metrics().orders_split.get(), 1);
        assert_eq!(fx.market.metrics().sub_orders_created.get(), 2);
    }

    #[test]
    fn test_tagged_shipping_stays_with_its_seller() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order(
                "stripe",
                &[
                    OrderLine::new(PHYSICAL_A, 1, cents(3000)),
                    OrderLine::new(PHYSICAL_B, 1, cents(2000)),
                ],
                vec![flat_shipping(500, Some(VENDOR_A)), flat_shipping(700, Some(VENDOR_B))],
            )
            .unwrap();

        fx.market.split(order_id).unwrap();

        let children = fx.children(order_id);
        let totals: Vec<Decimal> = children.iter().map(|child| child.total).collect();
        assert_eq!(totals, vec![cents(3500), cents(2700)]);
        assert_eq!(totals.iter().copied().sum::<Decimal>(), fx.order(order_id).total);
    }

    #[test]
    fn test_single_vendor_order_still_splits() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order("stripe", &[OrderLine::new(PHYSICAL_A, 1, cents(1000))], vec![])
            .unwrap();

        let created = fx.market.split(order_id).unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(fx.order(created[0]).seller_id, Some(VENDOR_A));
        assert!(fx.order(order_id).has_sub_order);
    }

    #[test]
    fn test_split_is_idempotent() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");

        let first = fx.market.split(order_id).unwrap();
        let count = fx.store.order_count();
        let second = fx.market.split(order_id).unwrap();
        fx.market.checkout_completed(order_id).unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.store.order_count(), count);
        assert_eq!(fx.children(order_id).len(), 2);
        assert_eq!(fx.market.metrics().orders_split.get(), 1);
    }

    #[test]
    fn test_sub_order_is_never_split() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        let created = fx.market.split(order_id).unwrap();

        assert!(fx.market.split(created[0]).unwrap().is_empty());
        assert!(fx.children(created[0]).is_empty());
    }

    #[test]
    fn test_failed_split_rolls_back_completely() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        let items_before = fx.store.items(order_id).unwrap();

        // first sub-order persists, second fails
        fx.store.fail_order_inserts_after(1);
        let result = fx.market.split(order_id);

        assert!(matches!(result, Err(SyncError::Storage(StoreError::Transaction(_)))));
        assert_eq!(fx.store.order_count(), 1);
        assert!(!fx.order(order_id).has_sub_order);
        assert!(fx.children(order_id).is_empty());
        assert_eq!(fx.store.items(order_id).unwrap(), items_before);
        assert!(!fx.store.is_in_transaction());

        fx.store.clear_faults();
        assert_eq!(fx.market.split(order_id).unwrap().len(), 2);
    }

    #[test]
    fn test_split_retries_unavailable_store() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");

        fx.store.fail_next_begins(1);
        let created = fx.market.split(order_id).unwrap();

        assert_eq!(created.len(), 2);
        assert_eq!(
            fx.market
                .metrics()
                .retry_attempts_total
                .with_label_values(&["split_order", "2"])
                .get(),
            1
        );
    }

    #[test]
    fn test_unknown_vendor_skips_split_on_checkout() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order("stripe", &[OrderLine::new(ProductId(99), 1, cents(500))], vec![])
            .unwrap();

        fx.market.checkout_completed(order_id).unwrap();
        assert!(fx.children(order_id).is_empty());
        assert!(fx.store.ledger_entries().is_empty());

        assert!(matches!(
            fx.market.split(order_id),
            Err(SyncError::Consistency(ConsistencyError::UnknownVendor(ProductId(99))))
        ));
    }

    #[test]
    fn test_shipping_packages_group_physical_items() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order(
                "stripe",
                &[
                    OrderLine::new(PHYSICAL_A, 1, cents(1000)),
                    OrderLine::new(DIGITAL_A, 1, cents(500)),
                    OrderLine::new(PHYSICAL_B, 3, cents(3000)),
                ],
                vec![],
            )
            .unwrap();

        let packages = fx.market.shipping_packages(order_id).unwrap();

        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].seller_id, VENDOR_A);
        assert_eq!(packages[0].contents_cost, cents(1000));
        assert_eq!(packages[1].seller_id, VENDOR_B);
    }

    #[test]
    fn test_admin_status_change_splits_unsplit_order() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Admin)
            .unwrap();

        let children = fx.children(order_id);
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.status == OrderStatus::Processing));
        assert_eq!(fx.entries(TransactionType::OrderEarning).len(), 2);
        assert_eq!(fx.catalog.stock_of(PHYSICAL_A), Some(98));
        assert_eq!(fx.catalog.stock_of(PHYSICAL_B), Some(49));
    }

    #[test]
    fn test_admin_split_can_be_disabled() {
        let mut config = MarketplaceConfig::default();
        config.orders.split_on_admin_status_change = false;
        let fx = fixture_with(config, None);
        let order_id = fx.two_vendor_order("stripe");

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Admin)
            .unwrap();

        assert!(fx.children(order_id).is_empty());
        // the unsplit order reduces its own stock
        assert_eq!(fx.catalog.stock_of(PHYSICAL_A), Some(98));
        assert!(fx.order(order_id).stock_reduced);
    }

    // ------------------------------------------------------------------------
    // Status synchronization
    // ------------------------------------------------------------------------

    #[test]
    fn test_parent_status_cascades_to_sub_orders() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();

        for child in fx.children(order_id) {
            assert_eq!(child.status, OrderStatus::Processing);
            let row = fx.store.sync_row(child.id).unwrap().unwrap();
            assert_eq!(row.order_status, OrderStatus::Processing);
            let entry = fx
                .store
                .find_entry(child.id, TransactionType::OrderEarning, None)
                .unwrap()
                .unwrap();
            assert_eq!(entry.status, BalanceStatus::Order(OrderStatus::Processing));
        }
    }

    #[test]
    fn test_cancelled_and_refunded_sub_orders_ignore_cascade() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        let created = fx.market.split(order_id).unwrap();

        fx.market
            .change_status(created[0], OrderStatus::Cancelled, ChangeOrigin::Admin)
            .unwrap();
        fx.market
            .change_status(created[1], OrderStatus::Refunded, ChangeOrigin::Admin)
            .unwrap();

        for new_status in OrderStatus::ALL {
            let report = fx
                .market
                .cascade_status(order_id, OrderStatus::Pending, new_status)
                .unwrap();
            assert!(report.applied.is_empty(), "{new_status} was applied");
        }

        assert_eq!(fx.order(created[0]).status, OrderStatus::Cancelled);
        assert_eq!(fx.order(created[1]).status, OrderStatus::Refunded);
    }

    #[test]
    fn test_rejected_cascade_is_reported_not_failed() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        let created = fx.market.split(order_id).unwrap();
        fx.market
            .change_status(created[0], OrderStatus::Completed, ChangeOrigin::Admin)
            .unwrap();

        let report = fx
            .market
            .cascade_status(order_id, OrderStatus::Pending, OrderStatus::OnHold)
            .unwrap();

        assert_eq!(report.skipped, vec![created[0]]);
        assert_eq!(report.applied, vec![created[1]]);
        assert_eq!(fx.order(created[1]).status, OrderStatus::OnHold);
        assert_eq!(
            fx.market
                .metrics()
                .status_cascades
                .with_label_values(&["rejected"])
                .get(),
            1
        );
    }

    #[test]
    fn test_whitelist_override_fails_open() {
        let config = MarketplaceConfig::from_toml_str(
            "[orders.sub_order_status_whitelist]\n\"wc-processing\" = [\"wc-completed\"]",
        )
        .unwrap();
        let fx = fixture_with(config, None);
        let order_id = fx.two_vendor_order("stripe");
        let created = fx.market.split(order_id).unwrap();
        fx.market
            .change_status(created[0], OrderStatus::Cancelled, ChangeOrigin::Admin)
            .unwrap();

        // cancelled is not covered by the override, so the cascade is let through
        let report = fx
            .market
            .cascade_status(order_id, OrderStatus::Pending, OrderStatus::OnHold)
            .unwrap();

        assert_eq!(report.applied, created);
        assert_eq!(fx.order(created[0]).status, OrderStatus::OnHold);
    }

    #[test]
    fn test_parent_completes_when_all_sub_orders_complete() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();
        let children = fx.children(order_id);

        fx.market
            .change_status(children[0].id, OrderStatus::Completed, ChangeOrigin::Admin)
            .unwrap();
        assert_eq!(fx.order(order_id).status, OrderStatus::Pending);

        fx.market
            .change_status(children[1].id, OrderStatus::Completed, ChangeOrigin::Admin)
            .unwrap();

        let parent = fx.order(order_id);
        assert_eq!(parent.status, OrderStatus::Completed);
        assert!(parent.notes.iter().any(|note| note == ALL_SUB_ORDERS_COMPLETED_NOTE));
    }

    #[test]
    fn test_digital_sub_order_auto_completes_for_paid_parent() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order(
                "stripe",
                &[
                    OrderLine::new(DIGITAL_A, 1, cents(1500)),
                    OrderLine::new(PHYSICAL_B, 1, cents(2000)),
                ],
                vec![],
            )
            .unwrap();
        fx.market.mark_paid(order_id).unwrap();
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();

        let children = fx.children(order_id);
        let digital = children.iter().find(|c| c.seller_id == Some(VENDOR_A)).unwrap();
        let physical = children.iter().find(|c| c.seller_id == Some(VENDOR_B)).unwrap();
        assert_eq!(digital.status, OrderStatus::Completed);
        assert!(digital.notes.iter().any(|note| note == DIGITAL_ONLY_NOTE));
        assert_eq!(physical.status, OrderStatus::Processing);
        assert_eq!(fx.order(order_id).status, OrderStatus::Processing);

        fx.market
            .change_status(physical.id, OrderStatus::Completed, ChangeOrigin::Admin)
            .unwrap();
        assert_eq!(fx.order(order_id).status, OrderStatus::Completed);
    }

    #[test]
    fn test_manual_gateway_blocks_auto_complete() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order("bacs", &[OrderLine::new(DIGITAL_A, 1, cents(1500))], vec![])
            .unwrap();
        fx.market.mark_paid(order_id).unwrap();
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();

        assert_eq!(fx.children(order_id)[0].status, OrderStatus::Processing);
        assert_eq!(fx.order(order_id).status, OrderStatus::Processing);
    }

    #[test]
    fn test_unpaid_parent_blocks_auto_complete() {
        let fx = fixture();
        let order_id = fx
            .market
            .create_order("stripe", &[OrderLine::new(DIGITAL_B, 1, cents(900))], vec![])
            .unwrap();
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();

        assert_eq!(fx.children(order_id)[0].status, OrderStatus::Processing);
    }

    // ------------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------------

    #[test]
    fn test_checkout_records_one_pending_earning_per_sub_order() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");

        fx.market.checkout_completed(order_id).unwrap();
        fx.market.checkout_completed(order_id).unwrap();

        let earnings = fx.entries(TransactionType::OrderEarning);
        assert_eq!(earnings.len(), 2);
        assert!(earnings.iter().all(|entry| entry.status == BalanceStatus::Pending));
        let total: Decimal = earnings.iter().map(|entry| entry.debit).sum();
        assert_eq!(total, cents(3300) + cents(2200));
    }

    #[test]
    fn test_record_refund_twice_writes_one_entry() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();
        let sub_order = fx.children(order_id)[0].id;

        let first = fx.market.record_refund(sub_order).unwrap();
        let second = fx.market.record_refund(sub_order).unwrap();

        assert!(matches!(first, RefundOutcome::Recorded(ref entry) if entry.credit == cents(3300)));
        assert_eq!(second, RefundOutcome::AlreadyRecorded);

        let refunds = fx.entries(TransactionType::Refund);
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].status, BalanceStatus::Approved);
        assert_eq!(refunds[0].vendor_id, VENDOR_A);

        let row = fx.store.sync_row(sub_order).unwrap().unwrap();
        assert_eq!(row.order_total, Decimal::ZERO);
        assert_eq!(row.net_amount, Decimal::ZERO);
    }

    #[test]
    fn test_refund_on_split_parent_is_not_applicable() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();

        assert_eq!(fx.market.record_refund(order_id).unwrap(), RefundOutcome::NotApplicable);
        assert!(fx.entries(TransactionType::Refund).is_empty());
    }

    #[test]
    fn test_refunded_parent_refunds_each_sub_order_once() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();
        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Refunded, ChangeOrigin::Admin)
            .unwrap();

        // the same event delivered again must not credit twice
        let sub_order = fx.children(order_id)[0].id;
        fx.market
            .bus()
            .publish(OrderEvent::StatusChanged(OrderStatusChanged {
                order_id: sub_order,
                old_status: OrderStatus::Processing,
                new_status: OrderStatus::Refunded,
                origin: ChangeOrigin::Admin,
            }))
            .unwrap();

        let refunds = fx.entries(TransactionType::Refund);
        assert_eq!(refunds.len(), 2);
        let vendors: Vec<VendorId> = refunds.iter().map(|entry| entry.vendor_id).collect();
        assert!(vendors.contains(&VENDOR_A) && vendors.contains(&VENDOR_B));
        assert!(fx
            .entries(TransactionType::OrderEarning)
            .iter()
            .all(|entry| entry.status == BalanceStatus::Order(OrderStatus::Refunded)));
    }

    #[test]
    fn test_cod_exclusion_keeps_ledger_but_moves_status() {
        let mut config = MarketplaceConfig::default();
        config.withdraw.exclude_cod_payment = true;
        let fx = fixture_with(config, None);
        let order_id = fx.two_vendor_order("cod");
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();
        fx.market
            .change_status(order_id, OrderStatus::Refunded, ChangeOrigin::Admin)
            .unwrap();

        for child in fx.children(order_id) {
            assert_eq!(child.status, OrderStatus::Refunded);
            let row = fx.store.sync_row(child.id).unwrap().unwrap();
            assert_eq!(row.order_status, OrderStatus::Refunded);
        }
        assert!(fx
            .entries(TransactionType::OrderEarning)
            .iter()
            .all(|entry| entry.status == BalanceStatus::Pending));
        assert!(fx.entries(TransactionType::Refund).is_empty());
    }

    #[test]
    fn test_cod_counts_when_exclusion_disabled() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("cod");
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::OnHold, ChangeOrigin::Checkout)
            .unwrap();

        assert!(fx
            .entries(TransactionType::OrderEarning)
            .iter()
            .all(|entry| entry.status == BalanceStatus::Order(OrderStatus::OnHold)));
    }

    #[test]
    fn test_balance_exclusion_hook_overrides_default() {
        struct ExcludeEverything;

        impl BalanceExclusion for ExcludeEverything {
            fn should_exclude(&self, _order: &Order, _new_status: OrderStatus, _excluded: bool) -> bool {
                true
            }
        }

        let fx = fixture_with(MarketplaceConfig::default(), Some(Arc::new(ExcludeEverything)));
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Completed, ChangeOrigin::Admin)
            .unwrap();

        assert!(fx
            .entries(TransactionType::OrderEarning)
            .iter()
            .all(|entry| entry.status == BalanceStatus::Pending));
    }

    // ------------------------------------------------------------------------
    // Stock
    // ------------------------------------------------------------------------

    #[test]
    fn test_can_reduce_stock_only_without_sub_orders() {
        let fx = fixture();
        let split_id = fx.two_vendor_order("stripe");
        let standalone_id = fx.two_vendor_order("stripe");
        let created = fx.market.split(split_id).unwrap();

        assert!(!fx.market.can_reduce_stock(&fx.order(split_id)));
        assert!(fx.market.can_reduce_stock(&fx.order(created[0])));
        assert!(fx.market.can_reduce_stock(&fx.order(standalone_id)));
    }

    #[test]
    fn test_stock_reduced_on_sub_orders_and_mirrored_to_parent() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.checkout_completed(order_id).unwrap();

        fx.market
            .change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)
            .unwrap();
        fx.market
            .change_status(order_id, OrderStatus::Completed, ChangeOrigin::Admin)
            .unwrap();

        assert_eq!(fx.catalog.stock_of(PHYSICAL_A), Some(98));
        assert_eq!(fx.catalog.stock_of(PHYSICAL_B), Some(49));

        let parent = fx.order(order_id);
        assert!(!parent.stock_reduced);
        let reduced: Vec<Option<u32>> = fx
            .store
            .items(order_id)
            .unwrap()
            .iter()
            .map(|item| item.reduced_stock)
            .collect();
        assert_eq!(reduced, vec![Some(2), Some(1)]);
        assert!(fx.children(order_id).iter().all(|child| child.stock_reduced));
        assert_eq!(
            fx.market.metrics().stock_operations.with_label_values(&["mirrored"]).get(),
            2
        );
    }

    #[test]
    fn test_reduce_order_stock_blocked_on_parent() {
        let fx = fixture();
        let order_id = fx.two_vendor_order("stripe");
        fx.market.split(order_id).unwrap();

        assert!(fx.market.reduce_order_stock(order_id).unwrap().is_empty());
        assert_eq!(fx.catalog.stock_of(PHYSICAL_A), Some(100));
    }

    // ------------------------------------------------------------------------
    // Coupons
    // ------------------------------------------------------------------------

    #[test]
    fn test_fixed_cart_coupon_needs_single_vendor() {
        let fx = fixture();
        let coupon = Coupon::new("TAKE5", DiscountType::FixedCart, Decimal::new(5, 0));
        let mixed = [
            DiscountItem::product(PHYSICAL_A, 1, cents(1000)),
            DiscountItem::product(PHYSICAL_B, 1, cents(1000)),
        ];
        let single = [
            DiscountItem::product(PHYSICAL_A, 1, cents(1000)),
            DiscountItem::product(DIGITAL_A, 1, cents(500)),
        ];

        assert!(matches!(
            fx.market.validate_coupon(&coupon, &mixed),
            Err(SyncError::Validation(_))
        ));
        assert!(fx.market.validate_coupon(&coupon, &single).unwrap());
    }
}
