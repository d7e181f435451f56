//! Storage contract of the mint.
//!
//! All writes of an operation go through one [`MintTransaction`]:
//! either every effect of the transaction lands or none does. The
//! proof table is keyed by Y and inserting an existing key is a
//! conflict, which is what makes double spends impossible at the
//! storage layer.

pub mod memory;

use async_trait::async_trait;
use cashu_core::keyset::Unit;
use cashu_core::proof::{BlindSignature, BlindedMessage, ProofState};
use cashu_core::{MeltQuote, MintQuote, Proof, PublicKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A uniqueness constraint was violated, e.g. a proof Y that is
    /// already in the ledger.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Internal(String),
}

/// A proof as it sits in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProof {
    pub proof: Proof,
    /// Ledger key: `hash_to_curve(secret)`.
    pub y: PublicKey,
    pub state: ProofState,
    /// Melt quote this proof is reserved for while pending.
    pub quote: Option<String>,
    pub seen_at: u64,
}

/// Seed-derivation record of a keyset; enough to re-derive the keys
/// on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysetRecord {
    pub unit: Unit,
    pub version: u32,
    pub active: bool,
    pub input_fee_ppk: u64,
    pub final_expiry: Option<u64>,
}

/// A signature the mint has issued, kept for wallet restores, keyed
/// by the blinded point it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorePair {
    pub message: BlindedMessage,
    pub signature: BlindSignature,
}

/// Read surface of the mint store.
#[async_trait]
pub trait MintDatabase: Send + Sync {
    /// Opens a transaction. Reads through the transaction see its own
    /// writes; nothing is visible to others before `commit`.
    async fn begin<'a>(&'a self) -> Result<Box<dyn MintTransaction + 'a>, DatabaseError>;

    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<MintQuote>, DatabaseError>;
    async fn get_mint_quote_by_request(
        &self,
        request: &str,
    ) -> Result<Option<MintQuote>, DatabaseError>;
    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MeltQuote>, DatabaseError>;
    async fn get_melt_quote_by_request(
        &self,
        request: &str,
    ) -> Result<Option<MeltQuote>, DatabaseError>;
    /// Melt quotes stuck in PENDING, for the reconciliation sweep.
    async fn get_pending_melt_quotes(&self) -> Result<Vec<MeltQuote>, DatabaseError>;

    /// Ledger rows for the given Ys, in request order. Unknown keys
    /// yield `None`.
    async fn get_proofs_by_ys(
        &self,
        ys: &[PublicKey],
    ) -> Result<Vec<Option<StoredProof>>, DatabaseError>;
    /// Proofs reserved for a melt quote.
    async fn get_proofs_by_quote(&self, quote_id: &str) -> Result<Vec<StoredProof>, DatabaseError>;

    /// Issued signatures for the given blinded points, in request
    /// order. Unknown points yield `None`.
    async fn get_restore_pairs(
        &self,
        blinded_points: &[PublicKey],
    ) -> Result<Vec<Option<RestorePair>>, DatabaseError>;

    /// Blank change outputs staged for a melt quote.
    async fn get_melt_change_outputs(
        &self,
        quote_id: &str,
    ) -> Result<Vec<BlindedMessage>, DatabaseError>;
    /// Change signatures issued when a melt settled.
    async fn get_melt_change_signatures(
        &self,
        quote_id: &str,
    ) -> Result<Vec<BlindSignature>, DatabaseError>;

    async fn get_keyset_records(&self) -> Result<Vec<KeysetRecord>, DatabaseError>;
}

/// Write surface of the mint store.
#[async_trait]
pub trait MintTransaction: Send + Sync {
    async fn add_mint_quote(&mut self, quote: MintQuote) -> Result<(), DatabaseError>;
    async fn update_mint_quote(&mut self, quote: &MintQuote) -> Result<(), DatabaseError>;
    async fn add_melt_quote(&mut self, quote: MeltQuote) -> Result<(), DatabaseError>;
    async fn update_melt_quote(&mut self, quote: &MeltQuote) -> Result<(), DatabaseError>;

    async fn get_mint_quote(&mut self, quote_id: &str) -> Result<Option<MintQuote>, DatabaseError>;
    async fn get_melt_quote(&mut self, quote_id: &str) -> Result<Option<MeltQuote>, DatabaseError>;

    /// Inserts ledger rows. Fails with [`DatabaseError::Conflict`] if
    /// any Y is already present, in whatever state.
    async fn add_proofs(&mut self, proofs: Vec<StoredProof>) -> Result<(), DatabaseError>;
    async fn set_proof_states(
        &mut self,
        ys: &[PublicKey],
        state: ProofState,
    ) -> Result<(), DatabaseError>;
    /// Removes rows, e.g. pending proofs of a failed melt.
    async fn delete_proofs(&mut self, ys: &[PublicKey]) -> Result<(), DatabaseError>;

    async fn add_restore_pairs(&mut self, pairs: Vec<RestorePair>) -> Result<(), DatabaseError>;

    async fn stage_melt_change_outputs(
        &mut self,
        quote_id: &str,
        outputs: Vec<BlindedMessage>,
    ) -> Result<(), DatabaseError>;
    async fn delete_melt_change_outputs(&mut self, quote_id: &str) -> Result<(), DatabaseError>;
    async fn get_melt_change_outputs(
        &mut self,
        quote_id: &str,
    ) -> Result<Vec<BlindedMessage>, DatabaseError>;
    async fn set_melt_change_signatures(
        &mut self,
        quote_id: &str,
        signatures: Vec<BlindSignature>,
    ) -> Result<(), DatabaseError>;

    async fn add_keyset_record(&mut self, record: KeysetRecord) -> Result<(), DatabaseError>;
    async fn update_keyset_record(&mut self, record: &KeysetRecord) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;
    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}
