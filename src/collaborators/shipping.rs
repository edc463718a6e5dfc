use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::catalog::ProductCatalog;
use crate::domain::order::{ItemId, Order, OrderItem, ShippingLine, VendorId};

// ============================================================================
// Shipping - per-seller packages and the split of shipping charges
// ============================================================================

/// Items of one seller that ship together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShippingPackage {
    pub seller_id: VendorId,
    pub item_ids: Vec<ItemId>,
    pub contents_cost: Decimal,
}

/// Group the shippable items of an order into one package per seller.
///
/// Virtual items and items whose product has no known vendor are left out.
pub fn split_packages(items: &[OrderItem], catalog: &dyn ProductCatalog) -> Vec<ShippingPackage> {
    let mut packages: BTreeMap<VendorId, ShippingPackage> = BTreeMap::new();

    for item in items {
        if !catalog.needs_shipping(item.product_id) {
            continue;
        }
        let Some(seller_id) = catalog.vendor_of(item.product_id) else {
            continue;
        };

        let package = packages.entry(seller_id).or_insert_with(|| ShippingPackage {
            seller_id,
            item_ids: Vec::new(),
            contents_cost: Decimal::ZERO,
        });
        package.item_ids.push(item.id);
        package.contents_cost += item.line_total;
    }

    packages.into_values().collect()
}

/// Decides which shipping lines of a parent order each sub-order carries.
pub trait ShippingAllocator: Send + Sync {
    /// `subtotals` holds each vendor's item subtotal; every vendor in it gets
    /// an entry in the result, possibly empty.
    fn allocate(
        &self,
        order: &Order,
        subtotals: &BTreeMap<VendorId, Decimal>,
    ) -> BTreeMap<VendorId, Vec<ShippingLine>>;
}

/// Lines tagged with a seller of the order go to that seller. Everything
/// else is shared pro-rata by item subtotal, the last vendor taking the
/// rounding remainder so the shares add up to the line total.
#[derive(Debug, Default, Clone, Copy)]
pub struct SellerShippingAllocator;

impl SellerShippingAllocator {
    fn shares(total: Decimal, subtotals: &BTreeMap<VendorId, Decimal>) -> Vec<(VendorId, Decimal)> {
        let basis: Decimal = subtotals.values().sum();
        let count = Decimal::from(subtotals.len());
        let mut remaining = total;
        let mut shares = Vec::with_capacity(subtotals.len());

        for (index, (vendor, subtotal)) in subtotals.iter().enumerate() {
            let share = if index + 1 == subtotals.len() {
                remaining
            } else if basis.is_zero() {
                (total / count).round_dp(2)
            } else {
                (total * subtotal / basis).round_dp(2)
            };
            remaining -= share;
            shares.push((*vendor, share));
        }

        shares
    }
}

impl ShippingAllocator for SellerShippingAllocator {
    fn allocate(
        &self,
        order: &Order,
        subtotals: &BTreeMap<VendorId, Decimal>,
    ) -> BTreeMap<VendorId, Vec<ShippingLine>> {
        let mut allocated: BTreeMap<VendorId, Vec<ShippingLine>> =
            subtotals.keys().map(|vendor| (*vendor, Vec::new())).collect();

        if subtotals.is_empty() {
            return allocated;
        }

        for line in &order.shipping_lines {
            match line.seller_id {
                Some(seller) if subtotals.contains_key(&seller) => {
                    allocated.entry(seller).or_default().push(line.clone());
                }
                _ => {
                    for (vendor, share) in Self::shares(line.total, subtotals) {
                        if share.is_zero() {
                            continue;
                        }
                        allocated.entry(vendor).or_default().push(ShippingLine {
                            method: line.method.clone(),
                            total: share,
                            seller_id: Some(vendor),
                        });
                    }
                }
            }
        }

        allocated
    }
}
