// src/models.rs
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An amount of US dollars held as whole cents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Usd(pub i64);

impl Usd {
    pub const ZERO: Usd = Usd(0);

    pub const fn from_cents(cents: i64) -> Self {
        Usd(cents)
    }

    /// Parses a decimal dollar amount such as `"189.8400"`, rounding half
    /// away from zero to the cent. `None` for malformed or out-of-range input.
    pub fn parse_dollars(dollars: &str) -> Option<Self> {
        let dollars = Decimal::from_str(dollars.trim()).ok()?;
        dollars
            .checked_mul(Decimal::ONE_HUNDRED)?
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
            .map(Usd)
    }

    /// Value of `shares` units priced at `self`.
    pub fn times(self, shares: i64) -> Option<Self> {
        self.0.checked_mul(shares).map(Usd)
    }

    pub fn checked_add(self, other: Usd) -> Option<Self> {
        self.0.checked_add(other.0).map(Usd)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.0.unsigned_abs();
        let dollars = (magnitude / 100).to_string();
        let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
        for (i, digit) in dollars.chars().enumerate() {
            if i > 0 && (dollars.len() - i) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(digit);
        }
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, grouped, magnitude % 100)
    }
}

impl Serialize for Usd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "Buy",
            Action::Sell => "Sell",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown transaction action: {0}")]
pub struct UnknownAction(String);

impl TryFrom<String> for Action {
    type Error = UnknownAction;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "Buy" => Ok(Action::Buy),
            "Sell" => Ok(Action::Sell),
            _ => Err(UnknownAction(value)),
        }
    }
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub hash: String,
    pub cash: Usd,
    pub session_version: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Holding {
    pub symbol: String,
    pub shares: i64,
}

/// One row of trade history. `shares` is negative for sales.
#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
pub struct Transaction {
    pub symbol: String,
    pub shares: i64,
    #[sqlx(rename = "method", try_from = "String")]
    pub action: Action,
    pub price: Usd,
    pub transacted: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub price: Usd,
}

#[derive(Debug, Serialize)]
pub struct Position {
    pub symbol: String,
    pub name: String,
    pub shares: i64,
    pub price: Usd,
    pub total: Usd,
}

#[derive(Debug, Serialize)]
pub struct PortfolioView {
    pub holdings: Vec<Position>,
    pub cash: Usd,
    pub total: Usd,
}

#[derive(Debug, Serialize)]
pub struct HistoryView {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub password: Option<String>,
    pub confirmation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteForm {
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TradeForm {
    pub symbol: Option<String>,
    pub shares: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    pub oldpass: Option<String>,
    pub newpass: Option<String>,
    pub confirm: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_formats_with_grouping() {
        assert_eq!(Usd(0).to_string(), "$0.00");
        assert_eq!(Usd(5).to_string(), "$0.05");
        assert_eq!(Usd(100_000).to_string(), "$1,000.00");
        assert_eq!(Usd(123_456_789).to_string(), "$1,234,567.89");
        assert_eq!(Usd(-150).to_string(), "-$1.50");
        assert_eq!(Usd(i64::MIN).to_string(), "-$92,233,720,368,547,758.08");
    }

    #[test]
    fn usd_parses_decimal_dollars_exactly() {
        assert_eq!(Usd::parse_dollars("10000"), Some(Usd(1_000_000)));
        assert_eq!(Usd::parse_dollars("189.8400"), Some(Usd(18_984)));
        assert_eq!(Usd::parse_dollars(" 2500.50 "), Some(Usd(250_050)));
        assert_eq!(Usd::parse_dollars("0.004"), Some(Usd(0)));
        assert_eq!(Usd::parse_dollars("0.005"), Some(Usd(1)));
        assert_eq!(Usd::parse_dollars("1.015"), Some(Usd(102)));
        assert_eq!(Usd::parse_dollars("-1.5"), Some(Usd(-150)));
        assert_eq!(Usd::parse_dollars("NaN"), None);
        assert_eq!(Usd::parse_dollars("12abc"), None);
        assert_eq!(Usd::parse_dollars(""), None);
        assert_eq!(Usd::parse_dollars("100000000000000000000"), None);
    }

    #[test]
    fn usd_arithmetic_detects_overflow() {
        assert_eq!(Usd(250).times(4), Some(Usd(1_000)));
        assert_eq!(Usd(i64::MAX).times(2), None);
        assert_eq!(Usd(i64::MAX).checked_add(Usd(1)), None);
    }

    #[test]
    fn usd_serializes_as_display_string() {
        let json = serde_json::to_string(&Usd(12_345)).unwrap();
        assert_eq!(json, "\"$123.45\"");
    }

    #[test]
    fn action_parses_stored_names() {
        assert_eq!(Action::try_from("Buy".to_string()).unwrap(), Action::Buy);
        assert_eq!(Action::try_from("Sell".to_string()).unwrap(), Action::Sell);
        assert!(Action::try_from("Short".to_string()).is_err());
        assert_eq!(Action::Sell.to_string(), "Sell");
    }
}
