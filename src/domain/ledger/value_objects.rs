use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::{OrderId, OrderStatus, VendorId};

// ============================================================================
// Vendor Balance Ledger
// ============================================================================

/// Source of a balance entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    OrderEarning,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::OrderEarning => "order_earning",
            TransactionType::Refund => "refund",
        }
    }
}

/// Settlement state of a balance entry.
///
/// Order-earning entries mirror the status of the order they were written
/// for; refunds are written directly as `Approved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    Pending,
    Approved,
    Order(OrderStatus),
}

/// A row of the vendor balance table.
///
/// At most one `Approved` row may exist per `(trn_id, trn_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorBalanceEntry {
    pub id: u64,
    pub vendor_id: VendorId,
    pub trn_id: OrderId,
    pub trn_type: TransactionType,
    pub debit: Decimal,
    pub credit: Decimal,
    pub status: BalanceStatus,
    pub trn_date: DateTime<Utc>,
    pub balance_date: DateTime<Utc>,
}

/// Values for a balance row that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBalanceEntry {
    pub vendor_id: VendorId,
    pub trn_id: OrderId,
    pub trn_type: TransactionType,
    pub debit: Decimal,
    pub credit: Decimal,
    pub status: BalanceStatus,
}

impl NewBalanceEntry {
    /// Earning owed to the vendor for an order, pending until settled.
    pub fn order_earning(vendor_id: VendorId, order_id: OrderId, earning: Decimal) -> Self {
        Self {
            vendor_id,
            trn_id: order_id,
            trn_type: TransactionType::OrderEarning,
            debit: earning,
            credit: Decimal::ZERO,
            status: BalanceStatus::Pending,
        }
    }

    pub fn refund(vendor_id: VendorId, order_id: OrderId, amount: Decimal) -> Self {
        Self {
            vendor_id,
            trn_id: order_id,
            trn_type: TransactionType::Refund,
            debit: Decimal::ZERO,
            credit: amount,
            status: BalanceStatus::Approved,
        }
    }

    pub fn into_entry(self, id: u64, now: DateTime<Utc>) -> VendorBalanceEntry {
        VendorBalanceEntry {
            id,
            vendor_id: self.vendor_id,
            trn_id: self.trn_id,
            trn_type: self.trn_type,
            debit: self.debit,
            credit: self.credit,
            status: self.status,
            trn_date: now,
            balance_date: now,
        }
    }
}

// ============================================================================
// Order Sync Projection
// ============================================================================

/// Denormalized order row used for reporting and ledger joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRow {
    pub order_id: OrderId,
    pub order_status: OrderStatus,
    pub order_total: Decimal,
    pub net_amount: Decimal,
    pub seller_id: VendorId,
}
