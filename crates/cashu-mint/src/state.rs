//! Proof state lookups and signature restoration.

use cashu_core::payload::{
    CheckStateRequest, CheckStateResponse, ProofStateEntry, RestoreRequest, RestoreResponse,
};
use cashu_core::proof::{BlindSignature, BlindedMessage, ProofState};

use crate::error::MintError;
use crate::mint::Mint;

impl Mint {
    /// Ledger state of each requested Y, in request order. A proof
    /// currently reserved by a running operation reads as PENDING even
    /// before anything is committed; a row the ledger already marks
    /// SPENT reads SPENT regardless of any reservation.
    pub async fn check_state(
        &self,
        request: CheckStateRequest,
    ) -> Result<CheckStateResponse, MintError> {
        let rows = self.db.get_proofs_by_ys(&request.ys).await?;

        let states = request
            .ys
            .iter()
            .zip(rows)
            .map(|(y, row)| match row {
                // a settled ledger row is final, whatever an in-flight
                // operation may still hold
                Some(stored) if stored.state == ProofState::Spent => ProofStateEntry {
                    y: *y,
                    state: ProofState::Spent,
                    witness: stored.proof.witness,
                },
                _ if self.active_proofs.contains(y) => ProofStateEntry {
                    y: *y,
                    state: ProofState::Pending,
                    witness: None,
                },
                Some(stored) => ProofStateEntry {
                    y: *y,
                    state: stored.state,
                    witness: stored.proof.witness,
                },
                None => ProofStateEntry {
                    y: *y,
                    state: ProofState::Unspent,
                    witness: None,
                },
            })
            .collect();

        Ok(CheckStateResponse { states })
    }

    /// Returns the stored signatures for blinded messages this mint
    /// has signed before, in request order. Unknown messages are
    /// skipped.
    pub async fn restore(&self, request: RestoreRequest) -> Result<RestoreResponse, MintError> {
        let points: Vec<_> = request
            .outputs
            .iter()
            .map(|o| o.blinded_point)
            .collect();
        let pairs = self.db.get_restore_pairs(&points).await?;

        let mut outputs: Vec<BlindedMessage> = Vec::new();
        let mut signatures: Vec<BlindSignature> = Vec::new();
        for pair in pairs.into_iter().flatten() {
            outputs.push(pair.message);
            signatures.push(pair.signature);
        }

        Ok(RestoreResponse {
            outputs,
            signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cashu_core::keyset::Unit;
    use cashu_core::{Amount, Proof, SecretKey};

    use super::*;
    use crate::config::MintConfig;
    use crate::database::memory::MemoryDatabase;
    use crate::database::StoredProof;
    use crate::lightning::fake::FakeWallet;

    async fn test_mint() -> Mint {
        Mint::new(
            b"state test seed".to_vec(),
            &[(Unit::Sat, 0)],
            MintConfig::default(),
            Arc::new(MemoryDatabase::new()),
            Arc::new(FakeWallet::new()),
        )
        .await
        .unwrap()
    }

    fn stored(secret: &str, state: ProofState) -> StoredProof {
        let proof = Proof {
            amount: Amount::from(2),
            keyset_id: format!("01{}", "ef".repeat(32)).parse().unwrap(),
            secret: secret.to_string(),
            c: SecretKey::generate().public_key(),
            witness: None,
        };
        let y = proof.y().unwrap();
        StoredProof {
            proof,
            y,
            state,
            quote: None,
            seen_at: 0,
        }
    }

    #[tokio::test]
    async fn settled_rows_win_over_the_in_process_reservation() {
        let mint = test_mint().await;
        let spent = stored("a settled row", ProofState::Spent);
        let spent_y = spent.y;

        let mut tx = mint.db.begin().await.unwrap();
        tx.add_proofs(vec![spent]).await.unwrap();
        tx.commit().await.unwrap();

        // an unknown Y reserved alongside it
        let free_y = SecretKey::generate().public_key();
        let _reservation = mint.active_proofs.lock(&[spent_y, free_y]).unwrap();

        let response = mint
            .check_state(CheckStateRequest {
                ys: vec![spent_y, free_y],
            })
            .await
            .unwrap();
        assert_eq!(response.states[0].state, ProofState::Spent);
        assert_eq!(response.states[1].state, ProofState::Pending);
    }

    #[tokio::test]
    async fn released_reservations_leave_no_trace() {
        let mint = test_mint().await;
        let y = SecretKey::generate().public_key();

        {
            let _reservation = mint.active_proofs.lock(&[y]).unwrap();
        }

        let response = mint
            .check_state(CheckStateRequest { ys: vec![y] })
            .await
            .unwrap();
        assert_eq!(response.states[0].state, ProofState::Unspent);
    }
}
