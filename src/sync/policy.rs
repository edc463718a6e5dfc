use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::order::{OrderError, OrderStatus};

// ============================================================================
// Sub-Order Transition Policy
// ============================================================================
//
// Which status a parent-driven cascade may push onto a sub-order, given the
// sub-order's current status. A transition whose current or target status
// the rules do not mention is let through.
//
// ============================================================================

/// Wildcard accepted in whitelist overrides.
pub const ANY: &str = "any";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allowed {
    Any,
    Only(BTreeSet<OrderStatus>),
}

impl Allowed {
    fn only(statuses: &[OrderStatus]) -> Self {
        Allowed::Only(statuses.iter().copied().collect())
    }

    fn permits(&self, status: OrderStatus) -> bool {
        match self {
            Allowed::Any => true,
            Allowed::Only(statuses) => statuses.contains(&status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Allowed because the rules do not cover the current or target status
    AllowedFailOpen,
    Rejected,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPolicy {
    rules: HashMap<OrderStatus, Allowed>,
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        use OrderStatus::*;

        Self::from_rules(HashMap::from([
            (Pending, Allowed::Any),
            (OnHold, Allowed::only(&[Pending, OnHold, Processing, Completed, Failed])),
            (Processing, Allowed::only(&[Completed, Failed, Cancelled, Refunded])),
            (Completed, Allowed::only(&[Refunded])),
            (Failed, Allowed::only(&[Pending, OnHold, Processing, Failed, Cancelled])),
            (Cancelled, Allowed::only(&[])),
            (Refunded, Allowed::only(&[])),
        ]))
    }
}

impl TransitionPolicy {
    pub fn from_rules(rules: HashMap<OrderStatus, Allowed>) -> Self {
        Self { rules }
    }

    /// Build a policy from a raw whitelist such as
    /// `{"wc-completed": ["wc-refunded"], "pending": ["any"]}`.
    pub fn from_overrides(raw: &BTreeMap<String, Vec<String>>) -> Result<Self, OrderError> {
        let mut rules = HashMap::with_capacity(raw.len());

        for (current, targets) in raw {
            let current: OrderStatus = current.parse()?;
            let allowed = if targets.iter().any(|target| target.trim() == ANY) {
                Allowed::Any
            } else {
                Allowed::Only(
                    targets
                        .iter()
                        .map(|target| target.parse())
                        .collect::<Result<_, _>>()?,
                )
            };
            rules.insert(current, allowed);
        }

        Ok(Self::from_rules(rules))
    }

    pub fn decide(&self, current: OrderStatus, new: OrderStatus) -> Decision {
        match self.rules.get(&current) {
            Some(allowed) if self.rules.contains_key(&new) => {
                if allowed.permits(new) {
                    Decision::Allowed
                } else {
                    Decision::Rejected
                }
            }
            _ => Decision::AllowedFailOpen,
        }
    }
}
