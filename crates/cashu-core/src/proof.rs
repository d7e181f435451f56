//! Proofs, blinded messages and blind signatures.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::dhke::{self, Dleq};
use crate::error::Error;
use crate::key::PublicKey;
use crate::keyset::Id;

/// Length a plain (non-locked) secret must have.
pub const PLAIN_SECRET_LENGTH: usize = 64;

/// An ecash proof: the mint's unblinded signature over a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: Id,
    pub secret: String,
    #[serde(rename = "C")]
    pub c: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub witness: Option<String>,
}

impl Proof {
    /// The ledger key of this proof: `hash_to_curve(secret)`.
    pub fn y(&self) -> Result<PublicKey, Error> {
        dhke::hash_to_curve(self.secret.as_bytes())
    }
}

pub type Proofs = Vec<Proof>;

/// Sum of proof amounts, failing on overflow.
pub fn total_amount(proofs: &Proofs) -> Result<Amount, Error> {
    Amount::try_sum(proofs.iter().map(|p| p.amount))
}

/// Ledger keys of all proofs, in input order.
pub fn ys(proofs: &Proofs) -> Result<Vec<PublicKey>, Error> {
    proofs.iter().map(Proof::y).collect()
}

/// True if two proofs share a secret, or two outputs a blinded point.
pub fn has_duplicates(proofs: &Proofs) -> bool {
    let mut seen = HashSet::new();
    proofs.iter().any(|p| !seen.insert(p.secret.as_str()))
}

/// Output to be signed: `B_ = hash_to_curve(secret) + r*G`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindedMessage {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: Id,
    #[serde(rename = "B_")]
    pub blinded_point: PublicKey,
}

/// True if any blinded point appears twice.
pub fn has_duplicate_outputs(outputs: &[BlindedMessage]) -> bool {
    let mut seen = HashSet::new();
    outputs.iter().any(|o| !seen.insert(o.blinded_point))
}

/// The mint's signature over a blinded point: `C_ = a * B_`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlindSignature {
    pub amount: Amount,
    #[serde(rename = "id")]
    pub keyset_id: Id,
    #[serde(rename = "C_")]
    pub blinded_signature: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dleq: Option<Dleq>,
}

/// Ledger state of a proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofState {
    Unspent,
    Pending,
    Spent,
}

impl fmt::Display for ProofState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProofState::Unspent => write!(f, "UNSPENT"),
            ProofState::Pending => write!(f, "PENDING"),
            ProofState::Spent => write!(f, "SPENT"),
        }
    }
}

/// Witness carried by a locked proof. P2PK uses only `signatures`,
/// HTLC additionally carries the `preimage`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
}

impl FromStr for Witness {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}
