use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::domain::order::{ProductId, StockChange, VendorId};
use crate::store::StoreError;

// ============================================================================
// Product Catalog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub vendor_id: VendorId,
    pub is_virtual: bool,
    pub is_downloadable: bool,
    /// Units on hand; `None` when stock is not managed for the product.
    pub stock: Option<i64>,
}

impl Product {
    /// A physical product with managed stock.
    pub fn physical(id: ProductId, vendor_id: VendorId, stock: i64) -> Self {
        Self {
            id,
            vendor_id,
            is_virtual: false,
            is_downloadable: false,
            stock: Some(stock),
        }
    }

    /// A virtual, downloadable product without stock management.
    pub fn digital(id: ProductId, vendor_id: VendorId) -> Self {
        Self {
            id,
            vendor_id,
            is_virtual: true,
            is_downloadable: true,
            stock: None,
        }
    }
}

/// Product lookups the marketplace needs from the host catalog.
pub trait ProductCatalog: Send + Sync {
    fn product(&self, id: ProductId) -> Option<Product>;

    /// Vendor owning `id`, if the product is known.
    fn vendor_of(&self, id: ProductId) -> Option<VendorId> {
        self.product(id).map(|product| product.vendor_id)
    }

    /// Whether a line for this product needs manual fulfilment.
    ///
    /// Unknown products are assumed to need it.
    fn needs_processing(&self, id: ProductId) -> bool {
        self.product(id)
            .map_or(true, |product| !(product.is_virtual && product.is_downloadable))
    }

    fn needs_shipping(&self, id: ProductId) -> bool {
        self.product(id).map_or(true, |product| !product.is_virtual)
    }

    /// Move the product's stock by `delta`.
    ///
    /// Returns `None` for products whose stock is not managed.
    fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<Option<StockChange>, StoreError>;
}

/// Catalog held in process memory.
#[derive(Default)]
pub struct MemoryCatalog {
    products: RwLock<HashMap<ProductId, Product>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, product: Product) {
        self.products
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(product.id, product);
    }

    pub fn stock_of(&self, id: ProductId) -> Option<i64> {
        self.product(id).and_then(|product| product.stock)
    }
}

impl ProductCatalog for MemoryCatalog {
    fn product(&self, id: ProductId) -> Option<Product> {
        self.products
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
    }

    fn adjust_stock(&self, id: ProductId, delta: i64) -> Result<Option<StockChange>, StoreError> {
        let mut products = self.products.write().unwrap_or_else(|e| e.into_inner());
        let product = products
            .get_mut(&id)
            .ok_or(StoreError::NotFound { entity: "product", id: id.0 })?;

        Ok(product.stock.as_mut().map(|stock| {
            let from = *stock;
            *stock += delta;
            StockChange { product_id: id, from, to: *stock }
        }))
    }
}
