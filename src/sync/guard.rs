use std::collections::HashSet;
use std::sync::Mutex;

use crate::domain::order::{OrderId, OrderStatus};

// ============================================================================
// Reentrancy Guard
// ============================================================================
//
// Marks operations as in progress so that events they publish do not start
// the same operation again. Entering returns a token; dropping the token
// leaves, also when the operation fails.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKey {
    /// Splitting an order into sub-orders
    Split(OrderId),
    /// Cascading a status from an order to its sub-orders
    Cascade(OrderId, OrderStatus),
}

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    active: Mutex<HashSet<GuardKey>>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` if `key` is already in progress.
    pub fn enter(&self, key: GuardKey) -> Option<GuardToken<'_>> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if active.insert(key) {
            Some(GuardToken { guard: self, key })
        } else {
            tracing::debug!(key = ?key, "Operation already in progress");
            None
        }
    }

    pub fn is_active(&self, key: GuardKey) -> bool {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).contains(&key)
    }
}

#[must_use = "the guard is released when the token is dropped"]
pub struct GuardToken<'a> {
    guard: &'a ReentrancyGuard,
    key: GuardKey,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_twice_is_refused() {
        let guard = ReentrancyGuard::new();
        let key = GuardKey::Split(OrderId(1));

        let token = guard.enter(key);
        assert!(token.is_some());
        assert!(guard.enter(key).is_none());
        assert!(guard.is_active(key));

        drop(token);
        assert!(!guard.is_active(key));
        assert!(guard.enter(key).is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let guard = ReentrancyGuard::new();

        let _split = guard.enter(GuardKey::Split(OrderId(1))).unwrap();
        let _cascade = guard.enter(GuardKey::Cascade(OrderId(1), OrderStatus::Completed)).unwrap();

        assert!(guard.enter(GuardKey::Split(OrderId(2))).is_some());
        assert!(guard.enter(GuardKey::Cascade(OrderId(1), OrderStatus::Refunded)).is_some());
    }
}
