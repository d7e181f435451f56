//! The melt-quote state machine.
//!
//! A melt takes proofs and pays a Lightning invoice. Proofs are marked
//! PENDING and the quote committed to storage BEFORE the payment call,
//! so a crash mid-payment can never double-spend. Every outcome of the
//! payment call other than a definite settlement is re-checked through
//! a status query, and if that query itself fails the quote simply
//! stays PENDING: funds are only released on positive knowledge of a
//! failure.

use cashu_core::payload::{MeltQuoteRequest, MeltQuoteResponse, MeltRequest};
use cashu_core::proof::{self, BlindSignature, BlindedMessage, ProofState};
use cashu_core::spend_condition::{self, melt_sig_all_message};
use cashu_core::{Amount, MeltQuote, PublicKey, QuoteState};
use lightning_invoice::Bolt11Invoice;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::{DatabaseError, StoredProof};
use crate::error::MintError;
use crate::lightning::PaymentStatus;
use crate::mint::{unix_now, Mint};
use crate::observer::Event;

fn melt_response(quote: &MeltQuote, change: Vec<BlindSignature>) -> MeltQuoteResponse {
    MeltQuoteResponse {
        quote: quote.quote.clone(),
        request: quote.request.clone(),
        unit: quote.unit,
        amount: quote.amount,
        fee_reserve: quote.fee_reserve,
        state: quote.state,
        expiry: quote.expiry,
        payment_preimage: quote.payment_preimage.clone(),
        change,
    }
}

impl Mint {
    /// Creates a melt quote for a bolt11 invoice.
    pub async fn request_melt_quote(
        &self,
        request: MeltQuoteRequest,
    ) -> Result<MeltQuote, MintError> {
        if !self.config.peg_out_enabled {
            return Err(MintError::MeltingDisabled);
        }
        if !self.lightning.supports_unit(request.unit) {
            return Err(MintError::Core(cashu_core::Error::UnitNotSupported(
                request.unit.to_string(),
            )));
        }

        let invoice: Bolt11Invoice = request
            .request
            .parse()
            .map_err(|e: lightning_invoice::ParseOrSemanticError| {
                MintError::InvalidInvoice(e.to_string())
            })?;
        let invoice_msat = invoice
            .amount_milli_satoshis()
            .ok_or(MintError::AmountlessInvoice)?;

        let mpp_msat = request.mpp_amount_msat();
        let amount_msat = if mpp_msat > 0 {
            if !self.lightning.active_mpp() {
                return Err(MintError::MppNotSupported);
            }
            if mpp_msat > invoice_msat {
                return Err(MintError::AmountOutsideLimit);
            }
            mpp_msat
        } else {
            invoice_msat
        };
        if amount_msat == 0 {
            return Err(MintError::AmountOutsideLimit);
        }
        // round up so a sub-sat remainder is never paid out of pocket
        let amount = Amount::from(amount_msat.div_ceil(1000));

        if let Some(limit) = self.config.peg_out_limit {
            if amount > limit {
                return Err(MintError::AmountOutsideLimit);
            }
        }

        if let Some(existing) = self.db.get_melt_quote_by_request(&request.request).await? {
            match existing.state {
                QuoteState::Paid => return Err(MintError::InvoiceAlreadyPaid),
                QuoteState::Pending => return Err(MintError::QuotePending),
                _ => {}
            }
        }

        // one of our own unpaid invoices settles internally, free of
        // routing fees
        let internal = matches!(
            self.db.get_mint_quote_by_request(&request.request).await?,
            Some(mint_quote) if mint_quote.state == QuoteState::Unpaid
        );
        let fee_reserve = if internal {
            Amount::ZERO
        } else {
            let estimate = self.lightning.query_fees(&invoice, amount).await?;
            estimate.max(self.config.fee_reserve_floor(amount))
        };

        let quote = MeltQuote {
            quote: Uuid::new_v4().to_string(),
            request: request.request,
            amount,
            unit: request.unit,
            fee_reserve,
            state: QuoteState::Unpaid,
            expiry: unix_now() + self.config.quote_ttl_secs,
            payment_preimage: String::new(),
            checking_id: invoice.payment_hash().to_string(),
            melted: false,
            mpp_amount_msat: mpp_msat,
        };

        let mut tx = self.db.begin().await?;
        tx.add_melt_quote(quote.clone()).await?;
        tx.commit().await?;
        info!(quote = %quote.quote, amount = %amount, %fee_reserve, "melt quote created");
        Ok(quote)
    }

    /// Melts proofs against a quote: verifies and reserves the inputs,
    /// pays the invoice, and settles or unwinds depending on what is
    /// actually known about the payment.
    pub async fn melt(&self, request: MeltRequest) -> Result<MeltQuoteResponse, MintError> {
        let _quote_guard = self.active_quotes.lock(&request.quote)?;
        let ys = proof::ys(&request.inputs)?;
        let _proofs_guard = self.active_proofs.lock(&ys)?;

        let mut quote = self
            .db
            .get_melt_quote(&request.quote)
            .await?
            .ok_or_else(|| MintError::UnknownQuote(request.quote.clone()))?;
        if quote.melted || quote.state == QuoteState::Paid {
            return Err(MintError::InvoiceAlreadyPaid);
        }
        if quote.state == QuoteState::Pending {
            return Err(MintError::QuotePending);
        }
        if quote.is_expired(unix_now()) {
            return Err(MintError::QuoteExpired);
        }

        if request.inputs.is_empty() {
            return Err(MintError::TransactionNotBalanced);
        }
        if proof::has_duplicates(&request.inputs) {
            return Err(MintError::DuplicateInputs);
        }

        let (proofs_unit, input_fees) = self.with_signer(|s| {
            let unit = s.proofs_unit(&request.inputs)?;
            s.verify_proofs(&request.inputs)?;
            Ok::<_, MintError>((unit, s.input_fees(&request.inputs)?))
        })?;
        if proofs_unit != quote.unit {
            return Err(MintError::UnitMismatch);
        }

        if !request.outputs.is_empty() {
            if proof::has_duplicate_outputs(&request.outputs) {
                return Err(MintError::DuplicateOutputs);
            }
            let outputs_unit = self.with_signer(|s| s.outputs_unit(&request.outputs))?;
            if outputs_unit != quote.unit {
                return Err(MintError::UnitMismatch);
            }
            self.check_outputs_unsigned(
                &request
                    .outputs
                    .iter()
                    .map(|o| o.blinded_point)
                    .collect::<Vec<_>>(),
            )
            .await?;
        }

        for input in &request.inputs {
            spend_condition::verify_proof_conditions(input)?;
        }
        if spend_condition::requires_sig_all(&request.inputs)? {
            let message = melt_sig_all_message(&quote.quote, &request.inputs, &request.outputs);
            spend_condition::verify_sig_all(&request.inputs, &message)?;
        }

        self.check_inputs_unspent(&ys).await?;

        let total = proof::total_amount(&request.inputs)?;
        let required = quote.amount_with_reserve()?.checked_add(input_fees)?;
        if total < required {
            return Err(MintError::InsufficientFee);
        }

        // one of our own mint quotes: settle without touching Lightning
        if let Some(mint_quote) = self.db.get_mint_quote_by_request(&quote.request).await? {
            if mint_quote.state == QuoteState::Unpaid && !mint_quote.minted {
                return self
                    .settle_internal_melt(quote, mint_quote, &request, &ys, total, input_fees)
                    .await;
            }
        }

        // durable pending mark, committed before the payment call
        let stored = stored_pending(&request.inputs, &ys, &quote.quote);
        let mut tx = self.db.begin().await?;
        tx.add_proofs(stored).await.map_err(spent_conflict)?;
        quote.state = QuoteState::Pending;
        tx.update_melt_quote(&quote).await?;
        tx.stage_melt_change_outputs(&quote.quote, request.outputs.clone())
            .await?;
        tx.commit().await?;
        self.observer.publish(Event::MeltQuoteUpdated(quote.clone()));

        match self.lightning.pay_invoice(&quote).await {
            Ok(result) if result.status == PaymentStatus::Settled => {
                if !result.checking_id.is_empty() {
                    quote.checking_id = result.checking_id.clone();
                }
                self.settle_melt(quote, &ys, result.preimage, result.fee_paid, total, input_fees)
                    .await
            }
            Ok(result) => {
                warn!(quote = %quote.quote, status = ?result.status, "payment without settlement, re-checking");
                if !result.checking_id.is_empty() {
                    quote.checking_id = result.checking_id.clone();
                }
                self.reconcile_unsettled(quote, &ys, total, input_fees).await
            }
            Err(err) => {
                warn!(quote = %quote.quote, %err, "payment call failed, re-checking");
                self.reconcile_unsettled(quote, &ys, total, input_fees).await
            }
        }
    }

    /// The payment call did not settle; ask the backend what actually
    /// happened. Only a definite FAILED/UNKNOWN releases the funds.
    async fn reconcile_unsettled(
        &self,
        mut quote: MeltQuote,
        ys: &[PublicKey],
        total: Amount,
        input_fees: Amount,
    ) -> Result<MeltQuoteResponse, MintError> {
        match self.lightning.check_paid(&quote.checking_id).await {
            Err(err) => {
                // nothing is known; stay pending rather than risk
                // releasing proofs for a payment that may settle
                warn!(quote = %quote.quote, %err, "status query failed, leaving quote pending");
                let mut tx = self.db.begin().await?;
                tx.update_melt_quote(&quote).await?;
                tx.commit().await?;
                Ok(melt_response(&quote, Vec::new()))
            }
            Ok(check) => match check.status {
                PaymentStatus::Settled => {
                    self.settle_melt(quote, ys, check.preimage, check.fee_paid, total, input_fees)
                        .await
                }
                PaymentStatus::Pending => {
                    let mut tx = self.db.begin().await?;
                    tx.update_melt_quote(&quote).await?;
                    tx.commit().await?;
                    Ok(melt_response(&quote, Vec::new()))
                }
                PaymentStatus::Failed | PaymentStatus::Unknown => {
                    info!(quote = %quote.quote, status = ?check.status, "payment failed, releasing proofs");
                    quote.state = QuoteState::Unpaid;
                    self.unwind_melt(&mut quote, ys).await?;
                    Err(MintError::PaymentFailed)
                }
            },
        }
    }

    /// Settles a melt: proofs become SPENT, the quote latches PAID,
    /// and overpaid fee reserve comes back as change.
    async fn settle_melt(
        &self,
        mut quote: MeltQuote,
        ys: &[PublicKey],
        preimage: String,
        fee_paid: Amount,
        total: Amount,
        input_fees: Amount,
    ) -> Result<MeltQuoteResponse, MintError> {
        quote.state = QuoteState::Paid;
        quote.melted = true;
        quote.payment_preimage = preimage;

        let mut tx = self.db.begin().await?;
        tx.set_proof_states(ys, ProofState::Spent).await?;

        let overpaid = total
            .checked_sub(quote.amount)
            .and_then(|rest| rest.checked_sub(fee_paid))
            .and_then(|rest| rest.checked_sub(input_fees))
            .unwrap_or(Amount::ZERO);

        let staged = tx.get_melt_change_outputs(&quote.quote).await?;
        let mut change = Vec::new();
        if overpaid > Amount::ZERO && !staged.is_empty() {
            let outputs = change_outputs(overpaid, &staged);
            change = self.with_signer(|s| s.sign_blind_messages(&outputs))?;
            tx.add_restore_pairs(
                outputs
                    .into_iter()
                    .zip(change.iter().cloned())
                    .map(|(message, signature)| crate::database::RestorePair { message, signature })
                    .collect(),
            )
            .await?;
            tx.set_melt_change_signatures(&quote.quote, change.clone())
                .await?;
        }
        tx.delete_melt_change_outputs(&quote.quote).await?;
        tx.update_melt_quote(&quote).await?;
        tx.commit().await?;

        info!(quote = %quote.quote, %fee_paid, change_total = %Amount::try_sum(change.iter().map(|c| c.amount)).unwrap_or(Amount::ZERO), "melt settled");
        self.publish_proof_states(ys, ProofState::Spent).await;
        self.observer.publish(Event::MeltQuoteUpdated(quote.clone()));
        Ok(melt_response(&quote, change))
    }

    /// Releases everything reserved for a melt that definitely failed.
    async fn unwind_melt(
        &self,
        quote: &mut MeltQuote,
        ys: &[PublicKey],
    ) -> Result<(), MintError> {
        quote.state = QuoteState::Unpaid;
        let mut tx = self.db.begin().await?;
        tx.delete_proofs(ys).await?;
        tx.delete_melt_change_outputs(&quote.quote).await?;
        tx.update_melt_quote(quote).await?;
        tx.commit().await?;
        self.observer.publish(Event::MeltQuoteUpdated(quote.clone()));
        Ok(())
    }

    /// A melt whose invoice is one of our own mint quotes: no
    /// Lightning payment happens, the mint quote becomes payable.
    async fn settle_internal_melt(
        &self,
        mut quote: MeltQuote,
        mut mint_quote: cashu_core::MintQuote,
        request: &MeltRequest,
        ys: &[PublicKey],
        total: Amount,
        input_fees: Amount,
    ) -> Result<MeltQuoteResponse, MintError> {
        if mint_quote.amount != quote.amount {
            return Err(MintError::AmountMismatch);
        }

        quote.state = QuoteState::Paid;
        quote.melted = true;
        mint_quote.state = QuoteState::Paid;

        let mut tx = self.db.begin().await?;
        let mut stored = stored_pending(&request.inputs, ys, &quote.quote);
        for proof in &mut stored {
            proof.state = ProofState::Spent;
        }
        tx.add_proofs(stored).await.map_err(spent_conflict)?;

        let overpaid = total
            .checked_sub(quote.amount)
            .and_then(|rest| rest.checked_sub(input_fees))
            .unwrap_or(Amount::ZERO);
        let mut change = Vec::new();
        if overpaid > Amount::ZERO && !request.outputs.is_empty() {
            let outputs = change_outputs(overpaid, &request.outputs);
            change = self.with_signer(|s| s.sign_blind_messages(&outputs))?;
            tx.add_restore_pairs(
                outputs
                    .into_iter()
                    .zip(change.iter().cloned())
                    .map(|(message, signature)| crate::database::RestorePair { message, signature })
                    .collect(),
            )
            .await?;
            tx.set_melt_change_signatures(&quote.quote, change.clone())
                .await?;
        }
        tx.update_melt_quote(&quote).await?;
        tx.update_mint_quote(&mint_quote).await?;
        tx.commit().await?;

        info!(quote = %quote.quote, mint_quote = %mint_quote.quote, "melt settled internally");
        self.publish_proof_states(ys, ProofState::Spent).await;
        self.observer.publish(Event::MeltQuoteUpdated(quote.clone()));
        self.observer.publish(Event::MintQuoteUpdated(mint_quote));
        Ok(melt_response(&quote, change))
    }

    /// Reports a melt quote, reconciling PENDING quotes against the
    /// Lightning backend.
    pub async fn check_melt_quote_state(
        &self,
        quote_id: &str,
    ) -> Result<MeltQuoteResponse, MintError> {
        let _guard = match self.active_quotes.lock(quote_id) {
            Ok(guard) => guard,
            // a melt is running right now; report the stored state
            Err(_) => {
                let quote = self
                    .db
                    .get_melt_quote(quote_id)
                    .await?
                    .ok_or_else(|| MintError::UnknownQuote(quote_id.to_string()))?;
                let change = self.db.get_melt_change_signatures(quote_id).await?;
                return Ok(melt_response(&quote, change));
            }
        };

        let quote = self
            .db
            .get_melt_quote(quote_id)
            .await?
            .ok_or_else(|| MintError::UnknownQuote(quote_id.to_string()))?;

        if quote.state != QuoteState::Pending {
            let change = self.db.get_melt_change_signatures(quote_id).await?;
            return Ok(melt_response(&quote, change));
        }

        let stored = self.db.get_proofs_by_quote(quote_id).await?;
        let ys: Vec<PublicKey> = stored.iter().map(|p| p.y).collect();
        let proofs: cashu_core::Proofs = stored.into_iter().map(|p| p.proof).collect();
        let total = proof::total_amount(&proofs)?;
        let input_fees = self.with_signer(|s| s.input_fees(&proofs))?;

        match self
            .reconcile_unsettled(quote, &ys, total, input_fees)
            .await
        {
            Ok(response) => Ok(response),
            // a resolved failure is a valid answer for a status check:
            // the quote is UNPAID again
            Err(MintError::PaymentFailed) => {
                let quote = self
                    .db
                    .get_melt_quote(quote_id)
                    .await?
                    .ok_or_else(|| MintError::UnknownQuote(quote_id.to_string()))?;
                Ok(melt_response(&quote, Vec::new()))
            }
            Err(other) => Err(other),
        }
    }

    /// Reconciles every PENDING melt quote, e.g. on startup.
    pub async fn check_pending_quotes(&self) -> Result<(), MintError> {
        for quote in self.db.get_pending_melt_quotes().await? {
            if let Err(err) = self.check_melt_quote_state(&quote.quote).await {
                warn!(quote = %quote.quote, %err, "pending quote reconciliation failed");
            }
        }
        Ok(())
    }

    pub(crate) async fn publish_proof_states(&self, ys: &[PublicKey], state: ProofState) {
        for y in ys {
            self.observer
                .publish(Event::ProofStateUpdated(cashu_core::payload::ProofStateEntry {
                    y: *y,
                    state,
                    witness: None,
                }));
        }
    }
}

fn stored_pending(
    inputs: &cashu_core::Proofs,
    ys: &[PublicKey],
    quote_id: &str,
) -> Vec<StoredProof> {
    inputs
        .iter()
        .zip(ys.iter())
        .map(|(proof, y)| StoredProof {
            proof: proof.clone(),
            y: *y,
            state: ProofState::Pending,
            quote: Some(quote_id.to_string()),
            seen_at: unix_now(),
        })
        .collect()
}

/// Change denominations: binary split of the overpaid amount, largest
/// first, truncated to the outputs the wallet supplied. Anything that
/// does not fit is forfeited.
fn change_outputs(overpaid: Amount, blanks: &[BlindedMessage]) -> Vec<BlindedMessage> {
    let mut denominations = overpaid.split();
    denominations.reverse();
    denominations.truncate(blanks.len());
    blanks
        .iter()
        .zip(denominations)
        .map(|(blank, amount)| BlindedMessage {
            amount,
            keyset_id: blank.keyset_id.clone(),
            blinded_point: blank.blinded_point,
        })
        .collect()
}

/// A proof-row conflict during a melt means the proof is already in
/// the ledger.
fn spent_conflict(err: DatabaseError) -> MintError {
    match err {
        DatabaseError::Conflict(_) => MintError::TokenAlreadySpent,
        other => MintError::Database(other),
    }
}
