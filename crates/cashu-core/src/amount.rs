//! Amounts and their binary decomposition.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// An ecash amount in the smallest denomination of its unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const ONE: Amount = Amount(1);

    pub fn to_u64(self) -> u64 {
        self.0
    }

    pub fn to_msat(self) -> u64 {
        self.0.saturating_mul(1000)
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, Error> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(Error::AmountOverflow)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Splits into powers of two, smallest first: 13 -> [1, 4, 8].
    pub fn split(self) -> Vec<Amount> {
        let mut parts = Vec::new();
        let mut value = self.0;
        let mut pos = 0u32;
        while value > 0 {
            if value & 1 == 1 {
                parts.push(Amount(1 << pos));
            }
            value >>= 1;
            pos += 1;
        }
        parts
    }

    /// Sums an iterator of amounts, failing on overflow.
    pub fn try_sum<I>(amounts: I) -> Result<Amount, Error>
    where
        I: IntoIterator<Item = Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, a| acc.checked_add(a))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value)
    }
}

impl From<Amount> for u64 {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
