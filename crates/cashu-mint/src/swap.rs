//! Swapping proofs for freshly signed ones.

use cashu_core::payload::{SwapRequest, SwapResponse};
use cashu_core::proof::{self, ProofState};
use cashu_core::spend_condition::{self, swap_sig_all_message};
use tracing::info;

use crate::database::{DatabaseError, StoredProof};
use crate::error::MintError;
use crate::mint::{unix_now, Mint};

impl Mint {
    /// Atomically spends the input proofs and signs the outputs. The
    /// inputs must cover the outputs plus input fees exactly.
    pub async fn swap(&self, request: SwapRequest) -> Result<SwapResponse, MintError> {
        if request.inputs.is_empty() || request.outputs.is_empty() {
            return Err(MintError::TransactionNotBalanced);
        }
        if proof::has_duplicates(&request.inputs) {
            return Err(MintError::DuplicateInputs);
        }
        if proof::has_duplicate_outputs(&request.outputs) {
            return Err(MintError::DuplicateOutputs);
        }

        let ys = proof::ys(&request.inputs)?;
        let _guard = self.active_proofs.lock(&ys)?;

        let input_fees = self.with_signer(|s| {
            let inputs_unit = s.proofs_unit(&request.inputs)?;
            let outputs_unit = s.outputs_unit(&request.outputs)?;
            if inputs_unit != outputs_unit {
                return Err(MintError::UnitMismatch);
            }
            s.verify_proofs(&request.inputs)?;
            s.input_fees(&request.inputs)
        })?;

        for input in &request.inputs {
            spend_condition::verify_proof_conditions(input)?;
        }
        if spend_condition::requires_sig_all(&request.inputs)? {
            let message = swap_sig_all_message(&request.inputs, &request.outputs);
            spend_condition::verify_sig_all(&request.inputs, &message)?;
        }

        let total_in = proof::total_amount(&request.inputs)?;
        let total_out = cashu_core::Amount::try_sum(request.outputs.iter().map(|o| o.amount))?;
        if total_in != total_out.checked_add(input_fees)? {
            return Err(MintError::TransactionNotBalanced);
        }

        self.check_outputs_unsigned(
            &request
                .outputs
                .iter()
                .map(|o| o.blinded_point)
                .collect::<Vec<_>>(),
        )
        .await?;
        self.check_inputs_unspent(&ys).await?;

        let signatures = self.with_signer(|s| s.sign_blind_messages(&request.outputs))?;

        let stored: Vec<StoredProof> = request
            .inputs
            .iter()
            .zip(ys.iter())
            .map(|(proof, y)| StoredProof {
                proof: proof.clone(),
                y: *y,
                state: ProofState::Spent,
                quote: None,
                seen_at: unix_now(),
            })
            .collect();

        let mut tx = self.db.begin().await?;
        tx.add_proofs(stored).await.map_err(|err| match err {
            DatabaseError::Conflict(_) => MintError::TokenAlreadySpent,
            other => MintError::Database(other),
        })?;
        tx.add_restore_pairs(
            request
                .outputs
                .iter()
                .cloned()
                .zip(signatures.iter().cloned())
                .map(|(message, signature)| crate::database::RestorePair { message, signature })
                .collect(),
        )
        .await
        .map_err(|err| match err {
            DatabaseError::Conflict(_) => MintError::AlreadySigned,
            other => MintError::Database(other),
        })?;
        tx.commit().await?;

        info!(inputs = request.inputs.len(), outputs = request.outputs.len(), amount = %total_in, "swap completed");
        self.publish_proof_states(&ys, ProofState::Spent).await;
        Ok(SwapResponse { signatures })
    }
}
