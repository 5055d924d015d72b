use uuid::Uuid;

use crate::money::{Currency, Money};

/// One line in a shopper's cart.
///
/// qty is always positive; pricing rejects anything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: Uuid,
    pub qty: i64,
}

impl CartLine {
    pub fn new(product_id: Uuid, qty: i64) -> Self {
        debug_assert!(qty > 0, "CartLine.qty must be > 0");
        Self { product_id, qty }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cart {
    pub cart_id: Uuid,
    pub user_id: Uuid,
    pub lines: Vec<CartLine>,
}

/// Catalog view the pricing step consumes. Built from product rows by the
/// storage layer; pricing itself never touches the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProductInfo {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub stock: i64,
    pub active: bool,
}

/// A cart line priced against the catalog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    pub unit_price: Money,
    pub qty: i64,
    pub line_total: Money,
}

/// Output of pricing a whole cart. `total` is `None` for an empty cart
/// (an empty cart has no currency to denominate a zero in).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<PricedLine>,
    pub item_count: i64,
    pub total: Option<Money>,
}

impl PricedCart {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Currency of the cart, once at least one line exists.
    pub fn currency(&self) -> Option<Currency> {
        self.total.map(|t| t.currency())
    }
}
