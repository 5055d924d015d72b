//! Checkout build step.
//!
//! Turns a priced cart into the rows an order is persisted from. Pure and
//! deterministic: lines come out sorted by product_id and the total is
//! recomputed here from the line totals with checked arithmetic — the
//! placement transaction persists exactly what this function returns, so the
//! stored total can never drift from the stored lines.

use uuid::Uuid;

use shop_cart::{Currency, Money, MoneyError, PricedCart, PricedLine};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderDraft {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub currency: Currency,
    pub lines: Vec<PricedLine>,
    pub total: Money,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckoutError {
    EmptyCart,
    Money(MoneyError),
}

impl std::fmt::Display for CheckoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckoutError::EmptyCart => write!(f, "cannot build an order from an empty cart"),
            CheckoutError::Money(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CheckoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CheckoutError::Money(e) => Some(e),
            CheckoutError::EmptyCart => None,
        }
    }
}

impl From<MoneyError> for CheckoutError {
    fn from(e: MoneyError) -> Self {
        CheckoutError::Money(e)
    }
}

/// Build the order rows for `order_id` from a priced cart.
///
/// The caller supplies the order id so retried placements can reuse one id.
/// Line order and the total are recomputed; the input's own total field is
/// ignored.
pub fn build_order(
    order_id: Uuid,
    user_id: Uuid,
    priced: &PricedCart,
) -> Result<OrderDraft, CheckoutError> {
    if priced.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut lines = priced.lines.clone();
    lines.sort_by_key(|l| l.product_id);

    let currency = lines[0].unit_price.currency();
    let mut total = Money::zero(currency);
    for line in &lines {
        let line_total = line.unit_price.checked_mul_qty(line.qty)?;
        total = total.checked_add(line_total)?;
    }

    Ok(OrderDraft {
        order_id,
        user_id,
        currency,
        lines,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shop_cart::{price_cart, products, Cart, CartLine, ProductInfo};

    fn pid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn catalog() -> shop_cart::ProductMap {
        products([
            ProductInfo {
                product_id: pid(1),
                sku: "MUG-01".into(),
                name: "Mug".into(),
                price: Money::new(1_250, Currency::Usd),
                stock: 10,
                active: true,
            },
            ProductInfo {
                product_id: pid(2),
                sku: "TEE-01".into(),
                name: "Tee".into(),
                price: Money::new(2_000, Currency::Usd),
                stock: 10,
                active: true,
            },
        ])
    }

    fn priced() -> PricedCart {
        let cart = Cart {
            cart_id: pid(100),
            user_id: pid(200),
            lines: vec![CartLine::new(pid(2), 1), CartLine::new(pid(1), 2)],
        };
        price_cart(&cart, &catalog()).unwrap()
    }

    #[test]
    fn builds_sorted_lines_and_recomputed_total() {
        let draft = build_order(pid(300), pid(200), &priced()).unwrap();
        assert_eq!(draft.order_id, pid(300));
        assert_eq!(draft.currency, Currency::Usd);
        let ids: Vec<Uuid> = draft.lines.iter().map(|l| l.product_id).collect();
        assert_eq!(ids, vec![pid(1), pid(2)]);
        // 2 * 12.50 + 1 * 20.00 = 45.00
        assert_eq!(draft.total, Money::new(4_500, Currency::Usd));
    }

    #[test]
    fn same_input_builds_identical_draft() {
        let a = build_order(pid(300), pid(200), &priced()).unwrap();
        let b = build_order(pid(300), pid(200), &priced()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_cart_is_rejected() {
        let empty = PricedCart {
            lines: vec![],
            item_count: 0,
            total: None,
        };
        assert_eq!(
            build_order(pid(300), pid(200), &empty),
            Err(CheckoutError::EmptyCart)
        );
    }

    #[test]
    fn overflow_in_recompute_is_surfaced() {
        let mut pc = priced();
        pc.lines[0].unit_price = Money::new(i64::MAX, Currency::Usd);
        pc.lines[0].qty = 2;
        assert!(matches!(
            build_order(pid(300), pid(200), &pc),
            Err(CheckoutError::Money(MoneyError::Overflow))
        ));
    }
}
