use crate::domain::order::{ChangeOrigin, OrderEvent, OrderId, OrderStatus, OrderStatusChanged};
use crate::metrics::Metrics;
use crate::store::OrderRepository;

use super::{OrderBus, SyncError};

/// Move `order_id` to `new_status` and publish the change.
///
/// Returns `false` without publishing when the order already has that status.
pub fn transition(
    orders: &dyn OrderRepository,
    bus: &OrderBus,
    metrics: &Metrics,
    order_id: OrderId,
    new_status: OrderStatus,
    origin: ChangeOrigin,
    note: Option<&str>,
) -> Result<bool, SyncError> {
    let mut order = orders.get_order(order_id)?;
    let old_status = order.status;

    if old_status == new_status {
        tracing::debug!(order_id = %order_id, status = %new_status, "Order already in status");
        return Ok(false);
    }

    order.status = new_status;
    if let Some(note) = note {
        order.add_note(note);
    }
    orders.save_order(&order)?;

    tracing::info!(
        order_id = %order_id,
        from = %old_status,
        to = %new_status,
        origin = ?origin,
        "🔄 Order status changed"
    );
    metrics.record_transition(origin_label(origin), new_status.as_str());

    bus.publish(OrderEvent::StatusChanged(OrderStatusChanged {
        order_id,
        old_status,
        new_status,
        origin,
    }))?;

    Ok(true)
}

fn origin_label(origin: ChangeOrigin) -> &'static str {
    match origin {
        ChangeOrigin::Checkout => "checkout",
        ChangeOrigin::Admin => "admin",
        ChangeOrigin::Cascade => "cascade",
        ChangeOrigin::Automatic => "automatic",
    }
}
