//! Value objects for the order domain.

use chrono::{DateTime, Utc};
use common::{Money, VariantId};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::OrderError;

const ORDER_NUMBER_PREFIX: &str = "SM";
const ORDER_NUMBER_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Human-facing order reference, e.g. `SM241031K3Q9ZB`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(String);

impl OrderNumber {
    /// Wraps an existing order number.
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Generates a fresh number: prefix, `yymmdd` of `now`, six uppercase
    /// alphanumerics drawn uniformly. Uniqueness is enforced by the store.
    pub fn generate(now: DateTime<Utc>) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
            .collect();
        Self(format!(
            "{ORDER_NUMBER_PREFIX}{}{suffix}",
            now.format("%y%m%d")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrderNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Contact snapshot for the (possibly guest) customer placing the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Immutable snapshot of a purchased variant, frozen at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub variant_id: VariantId,
    pub product_title: String,
    pub variant_title: Option<String>,
    pub sku: String,
    pub unit_price: Money,
    pub quantity: u32,
}

impl OrderItem {
    /// Returns the total price for this line (quantity * unit_price).
    pub fn line_total(&self) -> Result<Money, OrderError> {
        self.unit_price
            .checked_mul(self.quantity)
            .ok_or(OrderError::AmountOverflow)
    }
}

/// Order money totals.
///
/// [`OrderTotals::compute`] derives `grand = subtotal - discount + shipping + tax`
/// once at creation; the store persists all five columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Money,
    pub discount_total: Money,
    pub shipping_total: Money,
    pub tax_total: Money,
    pub grand_total: Money,
}

impl OrderTotals {
    pub fn compute(
        subtotal: Money,
        discount_total: Money,
        shipping_total: Money,
        tax_total: Money,
    ) -> Result<Self, OrderError> {
        let components = [subtotal, discount_total, shipping_total, tax_total];
        if components.iter().any(Money::is_negative) {
            return Err(OrderError::InvalidTotals);
        }

        let grand_total = Self::grand(subtotal, discount_total, shipping_total, tax_total)
            .ok_or(OrderError::AmountOverflow)?;
        if grand_total.is_negative() {
            return Err(OrderError::InvalidTotals);
        }

        Ok(Self {
            subtotal,
            discount_total,
            shipping_total,
            tax_total,
            grand_total,
        })
    }

    fn grand(subtotal: Money, discount: Money, shipping: Money, tax: Money) -> Option<Money> {
        subtotal
            .checked_sub(discount)?
            .checked_add(shipping)?
            .checked_add(tax)
    }

    /// Re-checks the invariant, used when loading persisted totals.
    pub fn is_balanced(&self) -> bool {
        Self::grand(
            self.subtotal,
            self.discount_total,
            self.shipping_total,
            self.tax_total,
        ) == Some(self.grand_total)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_order_number_format() {
        let now = Utc.with_ymd_and_hms(2024, 10, 31, 12, 0, 0).unwrap();
        let number = OrderNumber::generate(now);
        let s = number.as_str();

        assert_eq!(s.len(), 14);
        assert!(s.starts_with("SM241031"));
        assert!(
            s[8..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        );
    }

    #[test]
    fn test_order_numbers_differ() {
        let now = Utc::now();
        assert_ne!(OrderNumber::generate(now), OrderNumber::generate(now));
    }

    #[test]
    fn test_line_total() {
        let item = OrderItem {
            variant_id: VariantId::new(),
            product_title: "Linen Shirt".to_string(),
            variant_title: Some("M / Blue".to_string()),
            sku: "LS-M-BLU".to_string(),
            unit_price: Money::from_cents(245_000),
            quantity: 3,
        };
        assert_eq!(item.line_total(), Ok(Money::from_cents(735_000)));

        let huge = OrderItem {
            unit_price: Money::from_cents(i64::MAX / 2),
            ..item
        };
        assert_eq!(huge.line_total(), Err(OrderError::AmountOverflow));
    }

    #[test]
    fn test_totals_reject_overflow() {
        let result = OrderTotals::compute(
            Money::from_cents(i64::MAX),
            Money::zero(),
            Money::from_cents(1),
            Money::zero(),
        );
        assert_eq!(result, Err(OrderError::AmountOverflow));
    }

    #[test]
    fn test_order_number_suffix_uses_whole_alphabet() {
        let now = Utc::now();
        let seen: std::collections::HashSet<char> = (0..500)
            .flat_map(|_| OrderNumber::generate(now).as_str()[8..].chars().collect::<Vec<_>>())
            .collect();
        assert!(seen.iter().all(|c| ORDER_NUMBER_ALPHABET.contains(&(*c as u8))));
        assert!(seen.len() > 30);
    }

    #[test]
    fn test_totals_compute_grand_total() {
        let totals = OrderTotals::compute(
            Money::from_cents(10_000),
            Money::from_cents(500),
            Money::from_cents(300),
            Money::zero(),
        )
        .unwrap();
        assert_eq!(totals.grand_total, Money::from_cents(9_800));
        assert!(totals.is_balanced());
    }

    #[test]
    fn test_totals_reject_negative_components() {
        let result = OrderTotals::compute(
            Money::from_cents(100),
            Money::from_cents(-1),
            Money::zero(),
            Money::zero(),
        );
        assert!(matches!(result, Err(OrderError::InvalidTotals)));
    }

    #[test]
    fn test_totals_reject_discount_above_total() {
        let result = OrderTotals::compute(
            Money::from_cents(100),
            Money::from_cents(500),
            Money::zero(),
            Money::zero(),
        );
        assert!(matches!(result, Err(OrderError::InvalidTotals)));
    }
}
