//! Mint configuration.

use cashu_core::Amount;
use serde::{Deserialize, Serialize};

/// Operational limits and toggles of a mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintConfig {
    pub name: String,
    pub description: String,
    /// Accept new mint quotes.
    pub peg_in_enabled: bool,
    /// Accept new melt quotes.
    pub peg_out_enabled: bool,
    /// Largest amount a single mint quote may request.
    pub peg_in_limit: Option<Amount>,
    /// Largest amount a single melt quote may pay out.
    pub peg_out_limit: Option<Amount>,
    /// Fee reserve floor as a percentage of the melt amount.
    pub min_fee_reserve_percent: u64,
    /// Absolute fee reserve floor.
    pub min_fee_reserve: Amount,
    /// Quote lifetime in seconds.
    pub quote_ttl_secs: u64,
}

impl Default for MintConfig {
    fn default() -> Self {
        MintConfig {
            name: "cashu-mint".to_string(),
            description: String::new(),
            peg_in_enabled: true,
            peg_out_enabled: true,
            peg_in_limit: None,
            peg_out_limit: None,
            min_fee_reserve_percent: 1,
            min_fee_reserve: Amount::ONE,
            quote_ttl_secs: cashu_core::quote::QUOTE_TTL_SECS,
        }
    }
}

impl MintConfig {
    /// Fee reserve floor for a melt of `amount`:
    /// `max(min_fee_reserve, ceil(amount * percent / 100))`.
    pub fn fee_reserve_floor(&self, amount: Amount) -> Amount {
        let percent = (u128::from(amount.to_u64()) * u128::from(self.min_fee_reserve_percent))
            .div_ceil(100);
        let percent = u64::try_from(percent).unwrap_or(u64::MAX);
        Amount::from(percent.max(self.min_fee_reserve.to_u64()))
    }
}
