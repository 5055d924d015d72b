//! shop-cart
//!
//! Cart & money domain:
//! - Fixed-point `Money` in integer minor units with currency guards
//! - Cart pricing against a caller-supplied catalog view
//! - Checkout pre-flight validation (non-empty, stock fits)
//! - Pure deterministic logic (no IO, no time, no database wiring)

pub mod money;
mod pricing;
mod types;

pub use money::{Currency, Money, MoneyError};
pub use pricing::{price_cart, validate_for_checkout, PricingError};
pub use types::{Cart, CartLine, PricedCart, PricedLine, ProductInfo};

use std::collections::BTreeMap;
use uuid::Uuid;

/// Canonical catalog view type (product_id -> info), BTreeMap so iteration
/// is deterministic.
pub type ProductMap = BTreeMap<Uuid, ProductInfo>;

/// Helper to build a ProductMap with minimal boilerplate.
pub fn products<I>(items: I) -> ProductMap
where
    I: IntoIterator<Item = ProductInfo>,
{
    let mut m = ProductMap::new();
    for p in items {
        m.insert(p.product_id, p);
    }
    m
}
