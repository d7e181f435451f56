//! Wire payload shapes of the mint operations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::key::PublicKey;
use crate::keyset::Unit;
use crate::proof::{BlindSignature, BlindedMessage, ProofState, Proofs};
use crate::quote::QuoteState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintQuoteRequest {
    pub amount: Amount,
    pub unit: Unit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintQuoteResponse {
    pub quote: String,
    pub request: String,
    pub state: QuoteState,
    pub expiry: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintRequest {
    pub quote: String,
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintResponse {
    pub signatures: Vec<BlindSignature>,
}

/// `{"mpp": {"amount": <msat>}}` option of a melt quote request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeltQuoteOptions {
    #[serde(default)]
    pub mpp: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltQuoteRequest {
    pub request: String,
    pub unit: Unit,
    #[serde(default)]
    pub options: MeltQuoteOptions,
}

impl MeltQuoteRequest {
    /// Requested partial amount in msat, zero when not multi-part.
    pub fn mpp_amount_msat(&self) -> u64 {
        self.options.mpp.get("amount").copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltQuoteResponse {
    pub quote: String,
    pub request: String,
    pub unit: Unit,
    pub amount: Amount,
    pub fee_reserve: Amount,
    pub state: QuoteState,
    pub expiry: u64,
    pub payment_preimage: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change: Vec<BlindSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeltRequest {
    pub quote: String,
    pub inputs: Proofs,
    #[serde(default)]
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapRequest {
    pub inputs: Proofs,
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapResponse {
    pub signatures: Vec<BlindSignature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStateRequest {
    #[serde(rename = "Ys")]
    pub ys: Vec<PublicKey>,
}

/// State of one ledger key, echoed back in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofStateEntry {
    #[serde(rename = "Y")]
    pub y: PublicKey,
    pub state: ProofState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckStateResponse {
    pub states: Vec<ProofStateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub outputs: Vec<BlindedMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResponse {
    pub outputs: Vec<BlindedMessage>,
    pub signatures: Vec<BlindSignature>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpp_amount_defaults_to_zero() {
        let request: MeltQuoteRequest =
            serde_json::from_str(r#"{"request": "lnbc1...", "unit": "sat"}"#).unwrap();
        assert_eq!(request.mpp_amount_msat(), 0);

        let request: MeltQuoteRequest = serde_json::from_str(
            r#"{"request": "lnbc1...", "unit": "sat", "options": {"mpp": {"amount": 50000}}}"#,
        )
        .unwrap();
        assert_eq!(request.mpp_amount_msat(), 50_000);
    }

    #[test]
    fn check_state_uses_capital_ys() {
        let json = serde_json::to_value(CheckStateRequest { ys: vec![] }).unwrap();
        assert!(json.get("Ys").is_some());
    }
}
