//! Cart pricing and checkout pre-flight.
//!
//! Pure deterministic logic: the caller supplies the catalog view, lines are
//! processed in product_id order, and every monetary step uses checked
//! arithmetic. Stock *reservation* is not done here — that happens inside the
//! order-placement transaction; `validate_for_checkout` is the cheap check
//! that rejects obviously un-placeable carts before any locks are taken.

use uuid::Uuid;

use crate::money::{Currency, Money, MoneyError};
use crate::types::{Cart, PricedCart, PricedLine};
use crate::ProductMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PricingError {
    UnknownProduct { product_id: Uuid },
    InactiveProduct { product_id: Uuid, sku: String },
    BadQty { product_id: Uuid, qty: i64 },
    CurrencyMix { expected: Currency, found: Currency, product_id: Uuid },
    InsufficientStock { product_id: Uuid, sku: String, requested: i64, available: i64 },
    EmptyCart,
    Money(MoneyError),
}

impl std::fmt::Display for PricingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricingError::UnknownProduct { product_id } => {
                write!(f, "unknown product: {product_id}")
            }
            PricingError::InactiveProduct { product_id, sku } => {
                write!(f, "product not for sale: {sku} ({product_id})")
            }
            PricingError::BadQty { product_id, qty } => {
                write!(f, "invalid quantity {qty} for product {product_id}")
            }
            PricingError::CurrencyMix {
                expected,
                found,
                product_id,
            } => write!(
                f,
                "cart mixes currencies: expected {expected}, product {product_id} is priced in {found}"
            ),
            PricingError::InsufficientStock {
                product_id,
                sku,
                requested,
                available,
            } => write!(
                f,
                "STOCK_INSUFFICIENT: product={product_id} sku={sku} requested={requested} available={available}"
            ),
            PricingError::EmptyCart => write!(f, "cart is empty"),
            PricingError::Money(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for PricingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PricingError::Money(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MoneyError> for PricingError {
    fn from(e: MoneyError) -> Self {
        PricingError::Money(e)
    }
}

/// Price every cart line against the catalog.
///
/// - output lines are sorted by product_id (stable regardless of insertion
///   order);
/// - all lines must share one currency;
/// - unknown/inactive products and non-positive quantities are errors;
/// - an empty cart prices to an empty `PricedCart` (viewing an empty cart is
///   not an error; placing an order from one is — see
///   [`validate_for_checkout`]).
pub fn price_cart(cart: &Cart, products: &ProductMap) -> Result<PricedCart, PricingError> {
    let mut lines = cart.lines.clone();
    lines.sort_by_key(|l| l.product_id);

    let mut priced: Vec<PricedLine> = Vec::with_capacity(lines.len());
    let mut item_count: i64 = 0;
    let mut total: Option<Money> = None;

    for line in &lines {
        if line.qty < 1 {
            return Err(PricingError::BadQty {
                product_id: line.product_id,
                qty: line.qty,
            });
        }
        let product = products
            .get(&line.product_id)
            .ok_or(PricingError::UnknownProduct {
                product_id: line.product_id,
            })?;
        if !product.active {
            return Err(PricingError::InactiveProduct {
                product_id: product.product_id,
                sku: product.sku.clone(),
            });
        }
        if let Some(t) = total {
            if t.currency() != product.price.currency() {
                return Err(PricingError::CurrencyMix {
                    expected: t.currency(),
                    found: product.price.currency(),
                    product_id: product.product_id,
                });
            }
        }

        let line_total = product.price.checked_mul_qty(line.qty)?;
        total = Some(match total {
            Some(t) => t.checked_add(line_total)?,
            None => line_total,
        });
        item_count += line.qty;

        priced.push(PricedLine {
            product_id: product.product_id,
            sku: product.sku.clone(),
            name: product.name.clone(),
            unit_price: product.price,
            qty: line.qty,
            line_total,
        });
    }

    Ok(PricedCart {
        lines: priced,
        item_count,
        total,
    })
}

/// Cheap pre-flight before order placement: the cart must be non-empty and
/// every line must fit the currently known stock. The authoritative stock
/// check re-runs under row locks inside the placement transaction.
pub fn validate_for_checkout(
    priced: &PricedCart,
    products: &ProductMap,
) -> Result<(), PricingError> {
    if priced.is_empty() {
        return Err(PricingError::EmptyCart);
    }
    for line in &priced.lines {
        let product = products
            .get(&line.product_id)
            .ok_or(PricingError::UnknownProduct {
                product_id: line.product_id,
            })?;
        if line.qty > product.stock {
            return Err(PricingError::InsufficientStock {
                product_id: line.product_id,
                sku: product.sku.clone(),
                requested: line.qty,
                available: product.stock,
            });
        }
    }
    Ok(())
}
