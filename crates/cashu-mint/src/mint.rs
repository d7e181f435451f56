//! The mint aggregate and the mint-quote lifecycle.

use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use cashu_core::keyset::{Keyset, Unit};
use cashu_core::payload::{MintQuoteRequest, MintRequest};
use cashu_core::proof::{self, BlindSignature};
use cashu_core::{Amount, MintQuote, PublicKey, QuoteState};
use tracing::info;
use uuid::Uuid;

use crate::config::MintConfig;
use crate::database::{DatabaseError, MintDatabase, RestorePair};
use crate::error::MintError;
use crate::guard::{ActiveProofs, ActiveQuotes};
use crate::lightning::{LightningBackend, PaymentStatus};
use crate::observer::{Event, Observer};
use crate::signer::MintSigner;

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The mint: keysets, ledger, guards, Lightning and quote machines.
pub struct Mint {
    pub(crate) signer: RwLock<MintSigner>,
    pub(crate) db: Arc<dyn MintDatabase>,
    pub(crate) lightning: Arc<dyn LightningBackend>,
    pub(crate) active_quotes: ActiveQuotes,
    pub(crate) active_proofs: ActiveProofs,
    pub(crate) observer: Observer,
    pub(crate) config: MintConfig,
}

impl Mint {
    /// Builds a mint from its seed. Keysets recorded in the store are
    /// re-derived; a fresh store gets version 0 of every listed unit.
    pub async fn new(
        seed: Vec<u8>,
        units: &[(Unit, u64)],
        config: MintConfig,
        db: Arc<dyn MintDatabase>,
        lightning: Arc<dyn LightningBackend>,
    ) -> Result<Self, MintError> {
        let records = db.get_keyset_records().await?;
        let signer = if records.is_empty() {
            let signer = MintSigner::new(seed, units)?;
            let mut tx = db.begin().await?;
            for record in signer_records(units) {
                tx.add_keyset_record(record).await?;
            }
            tx.commit().await?;
            signer
        } else {
            MintSigner::from_records(seed, &records)?
        };

        Ok(Mint {
            signer: RwLock::new(signer),
            db,
            lightning,
            active_quotes: ActiveQuotes::default(),
            active_proofs: ActiveProofs::default(),
            observer: Observer::default(),
            config,
        })
    }

    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    pub fn config(&self) -> &MintConfig {
        &self.config
    }

    /// Runs a closure against the signer without holding the lock
    /// across awaits.
    pub(crate) fn with_signer<R>(&self, f: impl FnOnce(&MintSigner) -> R) -> R {
        let signer = self.signer.read().unwrap_or_else(|e| e.into_inner());
        f(&signer)
    }

    /// All keysets, active and rotated-out.
    pub fn keysets(&self) -> Vec<Keyset> {
        self.with_signer(|s| s.public_keysets())
    }

    /// Public keys of the active keyset for a unit.
    pub fn active_keyset(&self, unit: Unit) -> Result<Keyset, MintError> {
        self.with_signer(|s| s.active_keyset(unit).map(|k| k.to_public()))
    }

    /// Rotates a unit's keyset and persists the new derivation record.
    pub async fn rotate_keyset(&self, unit: Unit, input_fee_ppk: u64) -> Result<Keyset, MintError> {
        let (public, new_record, old_records) = {
            let mut signer = self.signer.write().unwrap_or_else(|e| e.into_inner());
            let (public, record) = signer.rotate(unit, input_fee_ppk)?;
            let old_records: Vec<_> = signer
                .records_for_unit(unit)
                .into_iter()
                .filter(|r| r.version != record.version)
                .collect();
            (public, record, old_records)
        };

        let mut tx = self.db.begin().await?;
        for record in old_records {
            tx.update_keyset_record(&record).await?;
        }
        tx.add_keyset_record(new_record).await?;
        tx.commit().await?;
        Ok(public)
    }

    /// Creates a mint quote: an invoice the wallet pays to get ecash.
    pub async fn request_mint_quote(
        &self,
        request: MintQuoteRequest,
    ) -> Result<MintQuote, MintError> {
        if !self.config.peg_in_enabled {
            return Err(MintError::MintingDisabled);
        }
        if request.amount == Amount::ZERO {
            return Err(MintError::AmountOutsideLimit);
        }
        if let Some(limit) = self.config.peg_in_limit {
            if request.amount > limit {
                return Err(MintError::AmountOutsideLimit);
            }
        }
        if !self.lightning.supports_unit(request.unit) {
            return Err(MintError::Core(cashu_core::Error::UnitNotSupported(
                request.unit.to_string(),
            )));
        }
        // the active keyset must exist so the quote can be issued later
        self.active_keyset(request.unit)?;

        let invoice = self
            .lightning
            .request_invoice(request.amount, request.unit)
            .await?;

        let quote = MintQuote {
            quote: Uuid::new_v4().to_string(),
            request: invoice.request,
            amount: request.amount,
            unit: request.unit,
            state: QuoteState::Unpaid,
            expiry: unix_now() + self.config.quote_ttl_secs,
            checking_id: invoice.checking_id,
            minted: false,
        };

        let mut tx = self.db.begin().await?;
        tx.add_mint_quote(quote.clone()).await?;
        tx.commit().await?;
        info!(quote = %quote.quote, amount = %quote.amount, "mint quote created");
        Ok(quote)
    }

    /// Reports a mint quote, refreshing UNPAID quotes against the
    /// Lightning backend.
    pub async fn check_mint_quote_state(&self, quote_id: &str) -> Result<MintQuote, MintError> {
        let mut quote = self
            .db
            .get_mint_quote(quote_id)
            .await?
            .ok_or_else(|| MintError::UnknownQuote(quote_id.to_string()))?;

        if matches!(quote.state, QuoteState::Unpaid | QuoteState::Pending) {
            let next = match self.lightning.check_received(&quote.checking_id).await? {
                PaymentStatus::Settled => QuoteState::Paid,
                PaymentStatus::Pending => QuoteState::Pending,
                // an in-flight payment that died falls back to unpaid
                PaymentStatus::Failed | PaymentStatus::Unknown => QuoteState::Unpaid,
            };
            if next != quote.state {
                quote.state = next;
                let mut tx = self.db.begin().await?;
                tx.update_mint_quote(&quote).await?;
                tx.commit().await?;
                self.observer.publish(Event::MintQuoteUpdated(quote.clone()));
            }
        }
        Ok(quote)
    }

    /// Trades a paid mint quote for blind signatures.
    pub async fn issue(&self, request: MintRequest) -> Result<Vec<BlindSignature>, MintError> {
        let _guard = self.active_quotes.lock(&request.quote)?;

        let mut quote = self.check_mint_quote_state(&request.quote).await?;
        if quote.minted || quote.state == QuoteState::Issued {
            return Err(MintError::AlreadyIssued);
        }
        if quote.state != QuoteState::Paid {
            return Err(MintError::RequestNotPaid);
        }

        if request.outputs.is_empty() {
            return Err(MintError::TransactionNotBalanced);
        }
        if proof::has_duplicate_outputs(&request.outputs) {
            return Err(MintError::DuplicateOutputs);
        }
        self.check_outputs_unsigned(&request.outputs.iter().map(|o| o.blinded_point).collect::<Vec<_>>())
            .await?;

        let output_unit = self.with_signer(|s| s.outputs_unit(&request.outputs))?;
        if output_unit != quote.unit {
            return Err(MintError::UnitMismatch);
        }

        // exact match down to the millisat
        let total = Amount::try_sum(request.outputs.iter().map(|o| o.amount))
            .map_err(MintError::Core)?;
        if total.to_msat() != quote.amount.to_msat() {
            return Err(MintError::AmountMismatch);
        }

        let signatures = self.with_signer(|s| s.sign_blind_messages(&request.outputs))?;

        quote.state = QuoteState::Issued;
        quote.minted = true;
        let mut tx = self.db.begin().await?;
        tx.add_restore_pairs(
            request
                .outputs
                .iter()
                .cloned()
                .zip(signatures.iter().cloned())
                .map(|(message, signature)| RestorePair { message, signature })
                .collect(),
        )
        .await
        .map_err(already_signed)?;
        tx.update_mint_quote(&quote).await?;
        tx.commit().await?;

        info!(quote = %quote.quote, "ecash issued");
        self.observer.publish(Event::MintQuoteUpdated(quote));
        Ok(signatures)
    }

    /// Fails with [`MintError::AlreadySigned`] if any of the blinded
    /// points was signed before.
    pub(crate) async fn check_outputs_unsigned(
        &self,
        blinded_points: &[PublicKey],
    ) -> Result<(), MintError> {
        let pairs = self.db.get_restore_pairs(blinded_points).await?;
        if pairs.iter().any(Option::is_some) {
            return Err(MintError::AlreadySigned);
        }
        Ok(())
    }

    /// Maps ledger rows for the given Ys to the matching spend error.
    pub(crate) async fn check_inputs_unspent(&self, ys: &[PublicKey]) -> Result<(), MintError> {
        let rows = self.db.get_proofs_by_ys(ys).await?;
        for row in rows.into_iter().flatten() {
            return Err(match row.state {
                cashu_core::ProofState::Pending => MintError::QuotePending,
                _ => MintError::TokenAlreadySpent,
            });
        }
        Ok(())
    }
}

fn signer_records(units: &[(Unit, u64)]) -> Vec<crate::database::KeysetRecord> {
    units
        .iter()
        .map(|(unit, input_fee_ppk)| crate::database::KeysetRecord {
            unit: *unit,
            version: 0,
            active: true,
            input_fee_ppk: *input_fee_ppk,
            final_expiry: None,
        })
        .collect()
}

/// A restore-pair conflict means the output was signed before.
fn already_signed(err: DatabaseError) -> MintError {
    match err {
        DatabaseError::Conflict(_) => MintError::AlreadySigned,
        other => MintError::Database(other),
    }
}
