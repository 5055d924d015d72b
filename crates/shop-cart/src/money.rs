//! Fixed-point money type.
//!
//! # Motivation
//!
//! All money amounts in this system use integer minor units (cents) stored as
//! `i64`, tagged with a [`Currency`]. Using raw `i64` for money is
//! error-prone: it allows accidental arithmetic with unrelated integers
//! (quantities, IDs) and — worse — silent arithmetic across currencies.
//!
//! `Money` wraps the raw `i64` plus its currency so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Money` with unrelated `i64` values in arithmetic.
//! - Cross-currency arithmetic: every operation checks the currency of both
//!   operands and fails with [`MoneyError::CurrencyMismatch`].
//!
//! # Scale
//!
//! 1 USD = `100` minor units. All supported currencies use 2 decimal places.
//! Non-monetary quantities (item counts, attempt sequences) remain plain
//! `i64` and are never implicitly convertible.
//!
//! # Arithmetic
//!
//! There are intentionally NO `Add`/`Sub` operator impls: an operator cannot
//! surface a currency mismatch without panicking. Use the checked methods and
//! handle the `Err` — overflow or mismatch in an order total is a hard error,
//! not a routine saturation.

// ---------------------------------------------------------------------------
// Currency
// ---------------------------------------------------------------------------

/// ISO-4217 currencies the catalog may price in. All have 2 decimal places.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    pub fn parse(s: &str) -> Result<Currency, MoneyError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(MoneyError::UnknownCurrency {
                input: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// A monetary amount in integer minor units, tagged with its currency.
///
/// 1 USD = `Money::new(100, Currency::Usd)`.
///
/// # Construction
///
/// Use [`Money::new`] / [`Money::zero`] for explicit construction, or
/// [`Money::parse`] for decimal strings crossing an API or CLI boundary.
/// There is intentionally no `From<i64>` implementation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Money {
    minor: i64,
    currency: Currency,
}

impl Money {
    #[inline]
    pub const fn new(minor: i64, currency: Currency) -> Self {
        Money { minor, currency }
    }

    #[inline]
    pub const fn zero(currency: Currency) -> Self {
        Money { minor: 0, currency }
    }

    /// Extract the underlying minor-unit `i64` (for DB binds and wire DTOs).
    #[inline]
    pub const fn minor(self) -> i64 {
        self.minor
    }

    #[inline]
    pub const fn currency(self) -> Currency {
        self.currency
    }

    #[inline]
    pub fn same_currency(self, other: Money) -> bool {
        self.currency == other.currency
    }

    /// `true` if this amount is strictly positive.
    #[inline]
    pub fn is_positive(self) -> bool {
        self.minor > 0
    }

    /// `true` if this amount is non-negative.
    #[inline]
    pub fn is_non_negative(self) -> bool {
        self.minor >= 0
    }

    /// Checked addition. Fails on currency mismatch or `i64` overflow.
    pub fn checked_add(self, rhs: Money) -> Result<Money, MoneyError> {
        self.guard_currency(rhs)?;
        self.minor
            .checked_add(rhs.minor)
            .map(|m| Money::new(m, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    /// Checked subtraction. Fails on currency mismatch or `i64` overflow.
    pub fn checked_sub(self, rhs: Money) -> Result<Money, MoneyError> {
        self.guard_currency(rhs)?;
        self.minor
            .checked_sub(rhs.minor)
            .map(|m| Money::new(m, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    /// Multiply a per-unit price by an integer quantity.
    ///
    /// `qty` is a plain item count (not a Money value). Overflow in a line
    /// total is a hard error; callers must handle the `Err` explicitly.
    pub fn checked_mul_qty(self, qty: i64) -> Result<Money, MoneyError> {
        self.minor
            .checked_mul(qty)
            .map(|m| Money::new(m, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    fn guard_currency(self, rhs: Money) -> Result<(), MoneyError> {
        if self.currency != rhs.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: rhs.currency,
            });
        }
        Ok(())
    }

    /// Parse a decimal string (`"12"`, `"12.3"`, `"12.34"`, optional leading
    /// `-`) into minor units of `currency`. Rejects more than 2 decimal
    /// places, blank input, and anything that isn't plain digits.
    pub fn parse(text: &str, currency: Currency) -> Result<Money, MoneyError> {
        let t = text.trim();
        let bad = || MoneyError::InvalidAmount {
            input: text.to_string(),
        };

        let (negative, digits) = match t.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, t),
        };
        if digits.is_empty() {
            return Err(bad());
        }

        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty()
            || frac_part.len() > 2
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(bad());
        }

        let units: i64 = int_part.parse().map_err(|_| bad())?;
        // "5" -> 50, "05" -> 5, "" -> 0
        let frac: i64 = match frac_part.len() {
            0 => 0,
            1 => frac_part.parse::<i64>().map_err(|_| bad())? * 10,
            _ => frac_part.parse().map_err(|_| bad())?,
        };

        let minor = units
            .checked_mul(100)
            .and_then(|m| m.checked_add(frac))
            .ok_or(MoneyError::Overflow)?;
        let minor = if negative {
            minor.checked_neg().ok_or(MoneyError::Overflow)?
        } else {
            minor
        };
        Ok(Money::new(minor, currency))
    }

    /// Bare decimal rendering without the currency code (`"12.34"`), for wire
    /// DTOs that carry the currency in a separate field.
    pub fn decimal_str(self) -> String {
        let units = self.minor / 100;
        let frac = (self.minor % 100).abs();
        if self.minor < 0 && units == 0 {
            format!("-{units}.{frac:02}")
        } else {
            format!("{units}.{frac:02}")
        }
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.decimal_str(), self.currency)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MoneyError {
    CurrencyMismatch { left: Currency, right: Currency },
    Overflow,
    InvalidAmount { input: String },
    UnknownCurrency { input: String },
}

impl std::fmt::Display for MoneyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MoneyError::CurrencyMismatch { left, right } => {
                write!(f, "currency mismatch: {} vs {}", left, right)
            }
            MoneyError::Overflow => write!(f, "money arithmetic overflow"),
            MoneyError::InvalidAmount { input } => {
                write!(f, "invalid money amount: '{}'", input)
            }
            MoneyError::UnknownCurrency { input } => {
                write!(f, "unknown currency: '{}'", input)
            }
        }
    }
}

impl std::error::Error for MoneyError {}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(minor: i64) -> Money {
        Money::new(minor, Currency::Usd)
    }

    #[test]
    fn zero_is_additive_identity() {
        let a = usd(4_200);
        assert_eq!(a.checked_add(Money::zero(Currency::Usd)).unwrap(), a);
        assert_eq!(Money::zero(Currency::Usd).checked_add(a).unwrap(), a);
    }

    #[test]
    fn add_and_sub_roundtrip() {
        let a = usd(10_000);
        let b = usd(2_500);
        let sum = a.checked_add(b).unwrap();
        assert_eq!(sum.checked_sub(b).unwrap(), a);
    }

    #[test]
    fn add_rejects_currency_mismatch() {
        let a = usd(100);
        let b = Money::new(100, Currency::Eur);
        assert_eq!(
            a.checked_add(b),
            Err(MoneyError::CurrencyMismatch {
                left: Currency::Usd,
                right: Currency::Eur,
            })
        );
    }

    #[test]
    fn sub_rejects_currency_mismatch() {
        let a = usd(100);
        let b = Money::new(50, Currency::Gbp);
        assert!(matches!(
            a.checked_sub(b),
            Err(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn add_overflow_is_detected() {
        let a = usd(i64::MAX);
        assert_eq!(a.checked_add(usd(1)), Err(MoneyError::Overflow));
    }

    #[test]
    fn checked_mul_qty_normal() {
        let price = usd(10_000); // $100.00
        let total = price.checked_mul_qty(10).unwrap();
        assert_eq!(total, usd(100_000)); // $1000.00
    }

    #[test]
    fn checked_mul_qty_overflow_is_detected() {
        let price = usd(i64::MAX);
        assert_eq!(price.checked_mul_qty(2), Err(MoneyError::Overflow));
    }

    #[test]
    fn mul_preserves_currency() {
        let price = Money::new(250, Currency::Gbp);
        let total = price.checked_mul_qty(4).unwrap();
        assert_eq!(total.currency(), Currency::Gbp);
        assert_eq!(total.minor(), 1_000);
    }

    #[test]
    fn display_two_decimal_places_with_currency() {
        assert_eq!(format!("{}", usd(150)), "1.50 USD");
        assert_eq!(format!("{}", usd(1)), "0.01 USD");
        assert_eq!(format!("{}", Money::new(999, Currency::Eur)), "9.99 EUR");
    }

    #[test]
    fn display_negative_under_one_unit_keeps_sign() {
        assert_eq!(format!("{}", usd(-5)), "-0.05 USD");
        assert_eq!(format!("{}", usd(-275)), "-2.75 USD");
    }

    #[test]
    fn decimal_str_has_no_currency() {
        assert_eq!(usd(123_456).decimal_str(), "1234.56");
    }

    #[test]
    fn parse_whole_and_fractional_forms() {
        assert_eq!(Money::parse("12", Currency::Usd).unwrap(), usd(1_200));
        assert_eq!(Money::parse("12.3", Currency::Usd).unwrap(), usd(1_230));
        assert_eq!(Money::parse("12.34", Currency::Usd).unwrap(), usd(1_234));
        assert_eq!(Money::parse("0.05", Currency::Usd).unwrap(), usd(5));
        assert_eq!(Money::parse("-2.75", Currency::Usd).unwrap(), usd(-275));
    }

    #[test]
    fn parse_rejects_junk() {
        for bad in ["", " ", "12.345", "1,200", "$5", "5.", ".5", "--1", "1e3"] {
            assert!(
                Money::parse(bad, Currency::Usd).is_err(),
                "'{bad}' must be rejected"
            );
        }
    }

    #[test]
    fn parse_display_roundtrip() {
        let m = Money::parse("47.08", Currency::Gbp).unwrap();
        assert_eq!(m.minor(), 4_708);
        assert_eq!(m.decimal_str(), "47.08");
    }

    #[test]
    fn currency_parse_and_as_str() {
        assert_eq!(Currency::parse("usd").unwrap(), Currency::Usd);
        assert_eq!(Currency::parse(" EUR ").unwrap(), Currency::Eur);
        assert_eq!(Currency::Gbp.as_str(), "GBP");
        assert!(Currency::parse("JPY").is_err());
    }

    #[test]
    fn is_positive_and_non_negative() {
        assert!(usd(1).is_positive());
        assert!(!usd(0).is_positive());
        assert!(usd(0).is_non_negative());
        assert!(!usd(-1).is_non_negative());
    }
}
