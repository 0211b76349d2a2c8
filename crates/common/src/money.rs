use serde::{Deserialize, Serialize};

/// Money amount held in minor units (cents) to avoid floating point issues.
///
/// The currency travels separately on the owning order or intent. Display
/// renders the two-decimal form gateways expect (`1234.50`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new Money amount from whole major units. `None` on overflow.
    pub fn from_major(units: i64) -> Option<Self> {
        units.checked_mul(100).map(Self::from_cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Multiplies by a quantity. `None` on overflow.
    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.cents.checked_mul(i64::from(quantity)).map(Money::from_cents)
    }

    /// `None` on overflow.
    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.cents.checked_add(rhs.cents).map(Money::from_cents)
    }

    /// `None` on overflow.
    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.cents.checked_sub(rhs.cents).map(Money::from_cents)
    }

    /// Sums amounts, `None` if any partial sum overflows.
    pub fn checked_sum(amounts: impl IntoIterator<Item = Money>) -> Option<Money> {
        amounts
            .into_iter()
            .try_fold(Money::zero(), |acc, m| acc.checked_add(m))
    }

    /// Parses a decimal amount such as `"1500"`, `"1500.5"` or `"1500.50"`.
    ///
    /// Returns `None` for anything with more than two fractional digits or
    /// non-digit characters.
    pub fn parse_decimal(input: &str) -> Option<Money> {
        let input = input.trim();
        let (negative, digits) = match input.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, input),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || fraction.len() > 2 {
            return None;
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let whole: i64 = whole.parse().ok()?;
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().ok()? * 10,
            _ => fraction.parse().ok()?,
        };
        let cents = whole.checked_mul(100)?.checked_add(fraction)?;
        Some(Money {
            cents: if negative { -cents } else { cents },
        })
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_two_decimals() {
        assert_eq!(Money::from_cents(150050).to_string(), "1500.50");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
        assert_eq!(Money::zero().to_string(), "0.00");
    }

    #[test]
    fn multiply_and_sum() {
        let unit = Money::from_cents(1250);
        let lines = [unit.checked_mul(2).unwrap(), Money::from_major(3).unwrap()];
        assert_eq!(Money::checked_sum(lines), Some(Money::from_cents(2800)));
    }

    #[test]
    fn arithmetic_reports_overflow() {
        assert_eq!(Money::from_cents(i64::MAX).checked_mul(2), None);
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
        assert_eq!(Money::from_cents(i64::MIN).checked_sub(Money::from_cents(1)), None);
        assert_eq!(Money::from_major(i64::MAX), None);
        assert_eq!(
            Money::checked_sum([Money::from_cents(i64::MAX), Money::from_cents(1)]),
            None
        );
        assert_eq!(
            Money::from_cents(500).checked_sub(Money::from_cents(750)),
            Some(Money::from_cents(-250))
        );
    }

    #[test]
    fn parse_decimal_accepts_gateway_formats() {
        assert_eq!(Money::parse_decimal("1500"), Some(Money::from_cents(150000)));
        assert_eq!(Money::parse_decimal("1500.5"), Some(Money::from_cents(150050)));
        assert_eq!(Money::parse_decimal(" 1500.55 "), Some(Money::from_cents(150055)));
        assert_eq!(Money::parse_decimal("-3.10"), Some(Money::from_cents(-310)));
    }

    #[test]
    fn parse_decimal_rejects_garbage() {
        assert_eq!(Money::parse_decimal(""), None);
        assert_eq!(Money::parse_decimal("12.345"), None);
        assert_eq!(Money::parse_decimal("1,500.00"), None);
        assert_eq!(Money::parse_decimal(".50"), None);
        assert_eq!(Money::parse_decimal("abc"), None);
    }
}
