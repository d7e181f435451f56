//! Mint and melt quote records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::keyset::Unit;

/// Lifetime of a freshly created quote.
pub const QUOTE_TTL_SECS: u64 = 15 * 60;

/// State of a quote.
///
/// Mint quotes move `Unpaid -> Paid -> Issued`. Melt quotes move
/// `Unpaid -> Pending` and from there to `Paid` or back to `Unpaid`;
/// `Pending` is the only state a melt may wait in while the Lightning
/// outcome is unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteState {
    Unpaid,
    Paid,
    Pending,
    Issued,
}

impl fmt::Display for QuoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteState::Unpaid => write!(f, "UNPAID"),
            QuoteState::Paid => write!(f, "PAID"),
            QuoteState::Pending => write!(f, "PENDING"),
            QuoteState::Issued => write!(f, "ISSUED"),
        }
    }
}

/// A quote for minting: pay `request`, then trade the payment for
/// ecash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote: String,
    /// bolt11 invoice the wallet has to pay.
    pub request: String,
    pub amount: Amount,
    pub unit: Unit,
    pub state: QuoteState,
    pub expiry: u64,
    /// Handle the Lightning backend tracks the incoming payment under.
    pub checking_id: String,
    /// One-way latch: set when ecash was handed out for this quote.
    pub minted: bool,
}

impl MintQuote {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry
    }
}

/// A quote for melting: bring proofs, the mint pays `request`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeltQuote {
    pub quote: String,
    /// bolt11 invoice the mint will pay.
    pub request: String,
    pub amount: Amount,
    pub unit: Unit,
    pub fee_reserve: Amount,
    pub state: QuoteState,
    pub expiry: u64,
    /// Preimage of the settled payment, once known.
    pub payment_preimage: String,
    /// Handle the Lightning backend tracks the outgoing payment under;
    /// may differ from the payment hash once the payment is in flight.
    pub checking_id: String,
    /// One-way latch: set when the payment settled.
    pub melted: bool,
    /// Partial amount in msat when the wallet asked for a
    /// multi-part payment, zero otherwise.
    pub mpp_amount_msat: u64,
}

impl MeltQuote {
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expiry
    }

    /// Amount the proofs must cover before input fees.
    pub fn amount_with_reserve(&self) -> Result<Amount, crate::Error> {
        self.amount.checked_add(self.fee_reserve)
    }
}
