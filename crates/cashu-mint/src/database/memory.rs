//! In-memory store with real transaction semantics.
//!
//! A transaction takes the whole-store lock for its lifetime and keeps
//! a snapshot; rollback restores the snapshot, commit just releases
//! the lock. Serializable by construction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cashu_core::proof::{BlindSignature, BlindedMessage, ProofState};
use cashu_core::{MeltQuote, MintQuote, PublicKey, QuoteState};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    DatabaseError, KeysetRecord, MintDatabase, MintTransaction, RestorePair, StoredProof,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    mint_quotes: HashMap<String, MintQuote>,
    melt_quotes: HashMap<String, MeltQuote>,
    proofs: HashMap<PublicKey, StoredProof>,
    restore_pairs: HashMap<PublicKey, RestorePair>,
    melt_change_outputs: HashMap<String, Vec<BlindedMessage>>,
    melt_change_signatures: HashMap<String, Vec<BlindSignature>>,
    keysets: Vec<KeysetRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Tables,
}

#[async_trait]
impl MintDatabase for MemoryDatabase {
    async fn begin<'a>(&'a self) -> Result<Box<dyn MintTransaction + 'a>, DatabaseError> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, snapshot }))
    }

    async fn get_mint_quote(&self, quote_id: &str) -> Result<Option<MintQuote>, DatabaseError> {
        Ok(self.tables.lock().await.mint_quotes.get(quote_id).cloned())
    }

    async fn get_mint_quote_by_request(
        &self,
        request: &str,
    ) -> Result<Option<MintQuote>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .mint_quotes
            .values()
            .find(|q| q.request == request)
            .cloned())
    }

    async fn get_melt_quote(&self, quote_id: &str) -> Result<Option<MeltQuote>, DatabaseError> {
        Ok(self.tables.lock().await.melt_quotes.get(quote_id).cloned())
    }

    async fn get_melt_quote_by_request(
        &self,
        request: &str,
    ) -> Result<Option<MeltQuote>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .melt_quotes
            .values()
            .find(|q| q.request == request)
            .cloned())
    }

    async fn get_pending_melt_quotes(&self) -> Result<Vec<MeltQuote>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .melt_quotes
            .values()
            .filter(|q| q.state == QuoteState::Pending)
            .cloned()
            .collect())
    }

    async fn get_proofs_by_ys(
        &self,
        ys: &[PublicKey],
    ) -> Result<Vec<Option<StoredProof>>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(ys.iter().map(|y| tables.proofs.get(y).cloned()).collect())
    }

    async fn get_proofs_by_quote(&self, quote_id: &str) -> Result<Vec<StoredProof>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .proofs
            .values()
            .filter(|p| p.quote.as_deref() == Some(quote_id))
            .cloned()
            .collect())
    }

    async fn get_restore_pairs(
        &self,
        blinded_points: &[PublicKey],
    ) -> Result<Vec<Option<RestorePair>>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(blinded_points
            .iter()
            .map(|b| tables.restore_pairs.get(b).cloned())
            .collect())
    }

    async fn get_melt_change_outputs(
        &self,
        quote_id: &str,
    ) -> Result<Vec<BlindedMessage>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .melt_change_outputs
            .get(quote_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_melt_change_signatures(
        &self,
        quote_id: &str,
    ) -> Result<Vec<BlindSignature>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .melt_change_signatures
            .get(quote_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_keyset_records(&self) -> Result<Vec<KeysetRecord>, DatabaseError> {
        Ok(self.tables.lock().await.keysets.clone())
    }
}

#[async_trait]
impl MintTransaction for MemoryTransaction {
    async fn add_mint_quote(&mut self, quote: MintQuote) -> Result<(), DatabaseError> {
        if self.guard.mint_quotes.contains_key(&quote.quote) {
            return Err(DatabaseError::Conflict(quote.quote));
        }
        self.guard.mint_quotes.insert(quote.quote.clone(), quote);
        Ok(())
    }

    async fn update_mint_quote(&mut self, quote: &MintQuote) -> Result<(), DatabaseError> {
        match self.guard.mint_quotes.get_mut(&quote.quote) {
            Some(existing) => {
                *existing = quote.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(quote.quote.clone())),
        }
    }

    async fn add_melt_quote(&mut self, quote: MeltQuote) -> Result<(), DatabaseError> {
        if self.guard.melt_quotes.contains_key(&quote.quote) {
            return Err(DatabaseError::Conflict(quote.quote));
        }
        self.guard.melt_quotes.insert(quote.quote.clone(), quote);
        Ok(())
    }

    async fn update_melt_quote(&mut self, quote: &MeltQuote) -> Result<(), DatabaseError> {
        match self.guard.melt_quotes.get_mut(&quote.quote) {
            Some(existing) => {
                *existing = quote.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(quote.quote.clone())),
        }
    }

    async fn get_mint_quote(&mut self, quote_id: &str) -> Result<Option<MintQuote>, DatabaseError> {
        Ok(self.guard.mint_quotes.get(quote_id).cloned())
    }

    async fn get_melt_quote(&mut self, quote_id: &str) -> Result<Option<MeltQuote>, DatabaseError> {
        Ok(self.guard.melt_quotes.get(quote_id).cloned())
    }

    async fn add_proofs(&mut self, proofs: Vec<StoredProof>) -> Result<(), DatabaseError> {
        for proof in &proofs {
            if self.guard.proofs.contains_key(&proof.y) {
                return Err(DatabaseError::Conflict(proof.y.to_hex()));
            }
        }
        for proof in proofs {
            self.guard.proofs.insert(proof.y, proof);
        }
        Ok(())
    }

    async fn set_proof_states(
        &mut self,
        ys: &[PublicKey],
        state: ProofState,
    ) -> Result<(), DatabaseError> {
        for y in ys {
            match self.guard.proofs.get_mut(y) {
                Some(proof) => proof.state = state,
                None => return Err(DatabaseError::NotFound(y.to_hex())),
            }
        }
        Ok(())
    }

    async fn delete_proofs(&mut self, ys: &[PublicKey]) -> Result<(), DatabaseError> {
        for y in ys {
            self.guard.proofs.remove(y);
        }
        Ok(())
    }

    async fn add_restore_pairs(&mut self, pairs: Vec<RestorePair>) -> Result<(), DatabaseError> {
        for pair in pairs {
            let key = pair.message.blinded_point;
            if self.guard.restore_pairs.contains_key(&key) {
                return Err(DatabaseError::Conflict(key.to_hex()));
            }
            self.guard.restore_pairs.insert(key, pair);
        }
        Ok(())
    }

    async fn stage_melt_change_outputs(
        &mut self,
        quote_id: &str,
        outputs: Vec<BlindedMessage>,
    ) -> Result<(), DatabaseError> {
        self.guard
            .melt_change_outputs
            .insert(quote_id.to_string(), outputs);
        Ok(())
    }

    async fn delete_melt_change_outputs(&mut self, quote_id: &str) -> Result<(), DatabaseError> {
        self.guard.melt_change_outputs.remove(quote_id);
        Ok(())
    }

    async fn get_melt_change_outputs(
        &mut self,
        quote_id: &str,
    ) -> Result<Vec<BlindedMessage>, DatabaseError> {
        Ok(self
            .guard
            .melt_change_outputs
            .get(quote_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_melt_change_signatures(
        &mut self,
        quote_id: &str,
        signatures: Vec<BlindSignature>,
    ) -> Result<(), DatabaseError> {
        self.guard
            .melt_change_signatures
            .insert(quote_id.to_string(), signatures);
        Ok(())
    }

    async fn add_keyset_record(&mut self, record: KeysetRecord) -> Result<(), DatabaseError> {
        if self
            .guard
            .keysets
            .iter()
            .any(|k| k.unit == record.unit && k.version == record.version)
        {
            return Err(DatabaseError::Conflict(format!(
                "keyset {}/{}",
                record.unit, record.version
            )));
        }
        self.guard.keysets.push(record);
        Ok(())
    }

    async fn update_keyset_record(&mut self, record: &KeysetRecord) -> Result<(), DatabaseError> {
        match self
            .guard
            .keysets
            .iter_mut()
            .find(|k| k.unit == record.unit && k.version == record.version)
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!(
                "keyset {}/{}",
                record.unit, record.version
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        // writes went straight to the locked tables; dropping the
        // guard publishes them
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DatabaseError> {
        *self.guard = self.snapshot;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashu_core::keyset::Unit;
    use cashu_core::{Amount, Proof, SecretKey};

    fn stored_proof(secret: &str) -> StoredProof {
        let proof = Proof {
            amount: Amount::from(2),
            keyset_id: format!("01{}", "ab".repeat(32)).parse().unwrap(),
            secret: secret.to_string(),
            c: SecretKey::generate().public_key(),
            witness: None,
        };
        let y = proof.y().unwrap();
        StoredProof {
            proof,
            y,
            state: ProofState::Unspent,
            quote: None,
            seen_at: 0,
        }
    }

    #[tokio::test]
    async fn duplicate_y_is_a_conflict() {
        let db = MemoryDatabase::new();
        let proof = stored_proof("some unique secret");

        let mut tx = db.begin().await.unwrap();
        tx.add_proofs(vec![proof.clone()]).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let result = tx.add_proofs(vec![proof.clone()]).await;
        assert!(matches!(result, Err(DatabaseError::Conflict(_))));
        tx.rollback().await.unwrap();

        let rows = db.get_proofs_by_ys(&[proof.y]).await.unwrap();
        assert!(rows[0].is_some());
    }

    #[tokio::test]
    async fn rollback_restores_the_snapshot() {
        let db = MemoryDatabase::new();
        let quote = MintQuote {
            quote: "q1".into(),
            request: "lnbc1".into(),
            amount: Amount::from(5),
            unit: Unit::Sat,
            state: QuoteState::Unpaid,
            expiry: u64::MAX,
            checking_id: "c1".into(),
            minted: false,
        };

        let mut tx = db.begin().await.unwrap();
        tx.add_mint_quote(quote.clone()).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(db.get_mint_quote("q1").await.unwrap().is_none());

        let mut tx = db.begin().await.unwrap();
        tx.add_mint_quote(quote).await.unwrap();
        tx.commit().await.unwrap();
        assert!(db.get_mint_quote("q1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn proof_state_transitions_persist() {
        let db = MemoryDatabase::new();
        let proof = stored_proof("state transition secret a");

        let mut tx = db.begin().await.unwrap();
        tx.add_proofs(vec![proof.clone()]).await.unwrap();
        tx.set_proof_states(&[proof.y], ProofState::Pending)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let rows = db.get_proofs_by_ys(&[proof.y]).await.unwrap();
        assert_eq!(rows[0].as_ref().unwrap().state, ProofState::Pending);

        let mut tx = db.begin().await.unwrap();
        tx.delete_proofs(&[proof.y]).await.unwrap();
        tx.commit().await.unwrap();
        assert!(db.get_proofs_by_ys(&[proof.y]).await.unwrap()[0].is_none());
    }
}
