use std::sync::Arc;

use prometheus::{Encoder, TextEncoder};
use rust_decimal::Decimal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marketplace_orders::collaborators::{MemoryCatalog, Product};
use marketplace_orders::domain::coupon::{Coupon, DiscountItem, DiscountType};
use marketplace_orders::domain::order::{
    ChangeOrigin, OrderEvent, OrderEventKind, OrderStatus, ProductId, ShippingLine, VendorId,
};
use marketplace_orders::event_bus::{serialize_event, EventEnvelope, EventListener};
use marketplace_orders::store::{LedgerRepository, OrderRepository};
use marketplace_orders::sync::OrderBus;
use marketplace_orders::{
    Collaborators, Marketplace, MarketplaceConfig, MemoryStore, Metrics, OrderLine, SyncError,
};

/// Logs every order event as JSON.
struct AuditLog;

impl EventListener<OrderEvent, SyncError> for AuditLog {
    fn name(&self) -> &'static str {
        "audit_log"
    }

    fn handle(&self, envelope: &EventEnvelope<OrderEvent>, _bus: &OrderBus) -> Result<(), SyncError> {
        match serialize_event(envelope) {
            Ok(json) => tracing::debug!(event = %json, "📝 Order event"),
            Err(e) => tracing::warn!("Failed to serialize {}: {}", envelope.event_type, e),
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default filter
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,marketplace_orders=debug")),
        )
        .init();

    tracing::info!("🚀 Starting marketplace order sync demo");

    // === 1. Configuration ===
    let config = match std::env::args().nth(1) {
        Some(path) => MarketplaceConfig::from_file(path)?,
        None => MarketplaceConfig::default(),
    };

    // === 2. Store, catalog and metrics ===
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    catalog.add(Product::physical(ProductId(1), VendorId(10), 25));
    catalog.add(Product::digital(ProductId(2), VendorId(10)));
    catalog.add(Product::physical(ProductId(3), VendorId(20), 8));

    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    let market = Marketplace::new(
        &config,
        store.clone(),
        Collaborators::new(catalog.clone(), &config),
        metrics.clone(),
    )?;

    let audit = Arc::new(AuditLog);
    for kind in [
        OrderEventKind::CheckoutCompleted,
        OrderEventKind::StatusChanged,
        OrderEventKind::ItemStockReduced,
    ] {
        market.bus().subscribe(kind, i32::MAX, audit.clone());
    }

    // === 3. Checkout of a two-vendor cart ===
    let order_id = market.create_order(
        "stripe",
        &[
            OrderLine::new(ProductId(1), 2, Decimal::new(4000, 2)),
            OrderLine::new(ProductId(2), 1, Decimal::new(1500, 2)),
            OrderLine::new(ProductId(3), 1, Decimal::new(2500, 2)),
        ],
        vec![ShippingLine {
            method: "flat_rate".to_string(),
            total: Decimal::new(800, 2),
            seller_id: None,
        }],
    )?;
    market.mark_paid(order_id)?;
    market.checkout_completed(order_id)?;

    for sub_order in store.child_orders(order_id)? {
        tracing::info!(
            sub_order_id = %sub_order.id,
            seller_id = ?sub_order.seller_id,
            total = %sub_order.total,
            "Sub-order created"
        );
    }

    // === 4. Status lifecycle ===
    market.change_status(order_id, OrderStatus::Processing, ChangeOrigin::Checkout)?;
    market.change_status(order_id, OrderStatus::Completed, ChangeOrigin::Admin)?;
    tracing::info!(status = %store.get_order(order_id)?.status, "✅ Order completed");

    market.change_status(order_id, OrderStatus::Refunded, ChangeOrigin::Admin)?;
    for sub_order in store.child_orders(order_id)? {
        for entry in store.entries_for(sub_order.id)? {
            tracing::info!(
                vendor_id = %entry.vendor_id,
                trn_id = %entry.trn_id,
                trn_type = entry.trn_type.as_str(),
                debit = %entry.debit,
                credit = %entry.credit,
                "Ledger entry"
            );
        }
    }

    // === 5. Coupons ===
    let coupon = Coupon::new("WELCOME5", DiscountType::FixedCart, Decimal::new(5, 0));
    let cart = [
        DiscountItem::product(ProductId(1), 1, Decimal::new(2000, 2)),
        DiscountItem::product(ProductId(3), 1, Decimal::new(2500, 2)),
    ];
    if let Err(e) = market.validate_coupon(&coupon, &cart) {
        tracing::warn!("Coupon {} rejected: {}", coupon.code, e);
    }

    // === 6. Metrics snapshot ===
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&metrics.registry().gather(), &mut buffer)?;
    println!("{}", String::from_utf8(buffer)?);

    tracing::info!("🎉 Demo complete!");
    Ok(())
}
