use std::sync::Arc;

use crate::domain::order::{Order, OrderStatus};

// ============================================================================
// Vendor Balance Exclusion
// ============================================================================

/// Payment method slug for cash on delivery.
pub const COD: &str = "cod";

/// Override for whether an order's ledger rows follow its status.
///
/// `excluded` is the decision from the cash-on-delivery setting; the
/// returned value replaces it.
pub trait BalanceExclusion: Send + Sync {
    fn should_exclude(&self, order: &Order, new_status: OrderStatus, excluded: bool) -> bool;
}

#[derive(Clone, Default)]
pub struct BalancePolicy {
    exclude_cod_payment: bool,
    hook: Option<Arc<dyn BalanceExclusion>>,
}

impl BalancePolicy {
    pub fn new(exclude_cod_payment: bool) -> Self {
        Self {
            exclude_cod_payment,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn BalanceExclusion>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Whether ledger updates for `order` moving to `new_status` are skipped.
    pub fn excludes(&self, order: &Order, new_status: OrderStatus) -> bool {
        let excluded = self.exclude_cod_payment && order.payment_method == COD;

        match &self.hook {
            Some(hook) => hook.should_exclude(order, new_status, excluded),
            None => excluded,
        }
    }
}
