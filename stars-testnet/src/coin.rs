//! Coin amounts and the `<amount><denom>[,<amount><denom>...]` string format.

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoinError {
    #[error("invalid coin expression: {0:?}")]
    InvalidExpression(String),

    #[error("invalid denom: {0:?}")]
    InvalidDenom(String),

    #[error("invalid amount {amount:?}: {reason}")]
    InvalidAmount { amount: String, reason: String },
}

/// Checks a denom against `[a-zA-Z][a-zA-Z0-9/:._-]{2,127}`.
pub fn validate_denom(denom: &str) -> Result<(), CoinError> {
    let mut chars = denom.chars();
    let valid_first = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || "/:._-".contains(c));
    if valid_first && valid_rest && (3..=128).contains(&denom.len()) {
        Ok(())
    } else {
        Err(CoinError::InvalidDenom(denom.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    #[serde(serialize_with = "amount_to_string", deserialize_with = "amount_from_string")]
    pub amount: u128,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: u128) -> Result<Self, CoinError> {
        let denom = denom.into();
        validate_denom(&denom)?;
        Ok(Self { denom, amount })
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

impl FromStr for Coin {
    type Err = CoinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| CoinError::InvalidExpression(s.to_string()))?;
        let (amount, denom) = s.split_at(split);
        if amount.is_empty() {
            return Err(CoinError::InvalidExpression(s.to_string()));
        }
        let amount = amount.parse::<u128>().map_err(|e| CoinError::InvalidAmount {
            amount: amount.to_string(),
            reason: e.to_string(),
        })?;
        Coin::new(denom.trim(), amount)
    }
}

/// Sorted set of coins with at most one entry per denom and no zero amounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coins(Vec<Coin>);

impl Coins {
    /// Merges duplicate denoms. Fails if a merged amount overflows.
    pub fn new(coins: impl IntoIterator<Item = Coin>) -> Result<Self, CoinError> {
        let mut merged: BTreeMap<String, u128> = BTreeMap::new();
        for coin in coins {
            let total = merged.entry(coin.denom).or_default();
            *total = total.checked_add(coin.amount).ok_or_else(|| CoinError::InvalidAmount {
                amount: coin.amount.to_string(),
                reason: "sum of duplicate denoms overflows".to_string(),
            })?;
        }
        Ok(Self(
            merged
                .into_iter()
                .filter(|(_, amount)| *amount > 0)
                .map(|(denom, amount)| Coin { denom, amount })
                .collect(),
        ))
    }

    /// Parses a comma separated list of coins, merging duplicates and sorting by denom.
    pub fn parse_normalized(s: &str) -> Result<Self, CoinError> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let coins = s.split(',').map(str::parse).collect::<Result<Vec<Coin>, _>>()?;
        Self::new(coins)
    }

    pub fn amount_of(&self, denom: &str) -> u128 {
        self.0.iter().find(|c| c.denom == denom).map_or(0, |c| c.amount)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Coin> for Coins {
    fn from(coin: Coin) -> Self {
        if coin.amount == 0 {
            return Self::default();
        }
        Self(vec![coin])
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Coin::to_string).collect();
        f.write_str(&parts.join(","))
    }
}

fn amount_to_string<S: Serializer>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&amount.to_string())
}

fn amount_from_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_coin_lists() {
        let coins = Coins::parse_normalized("5uatom, 1000000000ustarx,10uatom").unwrap();
        assert_eq!(coins.to_string(), "15uatom,1000000000ustarx");
        assert_eq!(coins.amount_of("ustarx"), 1_000_000_000);
        assert_eq!(coins.amount_of("uosmo"), 0);
    }

    #[test]
    fn rejects_malformed_coins() {
        assert!(matches!("ustarx".parse::<Coin>(), Err(CoinError::InvalidExpression(_))));
        assert!(matches!("100".parse::<Coin>(), Err(CoinError::InvalidExpression(_))));
        assert!(matches!("100u".parse::<Coin>(), Err(CoinError::InvalidDenom(_))));
        assert!(matches!("10$tars".parse::<Coin>(), Err(CoinError::InvalidDenom(_))));
    }

    #[test]
    fn amounts_serialize_as_strings() {
        let coin = Coin::new("ustarx", 42).unwrap();
        let json = serde_json::to_string(&coin).unwrap();
        assert_eq!(json, r#"{"denom":"ustarx","amount":"42"}"#);
        let back: Coin = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coin);
    }

    #[test]
    fn zero_amounts_are_dropped() {
        let coins = Coins::parse_normalized("0ustarx,1uatom").unwrap();
        assert_eq!(coins.to_string(), "1uatom");
    }

    #[test]
    fn overflowing_duplicates_are_rejected() {
        let max = u128::MAX;
        let err = Coins::parse_normalized(&format!("{max}ustarx,1ustarx")).unwrap_err();
        assert!(matches!(err, CoinError::InvalidAmount { .. }));

        let coins = Coins::parse_normalized(&format!("{max}ustarx,1uatom")).unwrap();
        assert_eq!(coins.amount_of("ustarx"), max);
    }
}
