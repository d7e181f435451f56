//! Scriptable in-memory Lightning backend for tests and development.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{self, Message};
use cashu_core::keyset::Unit;
use cashu_core::{Amount, MeltQuote, SECP256K1};
use lightning_invoice::{Bolt11Invoice, Currency, InvoiceBuilder, PaymentSecret};

use super::{
    InvoiceResult, LightningBackend, LightningError, PaymentCheck, PaymentResult, PaymentStatus,
};

/// A wallet that settles everything instantly unless told otherwise.
///
/// Outcomes for `pay_invoice` and `check_paid` can be queued up front,
/// which is how the melt failure paths are exercised.
pub struct FakeWallet {
    node_key: secp256k1::SecretKey,
    received: Mutex<HashMap<String, PaymentStatus>>,
    pay_script: Mutex<VecDeque<Result<PaymentResult, LightningError>>>,
    check_paid_script: Mutex<VecDeque<Result<PaymentCheck, LightningError>>>,
    mpp: bool,
}

impl Default for FakeWallet {
    fn default() -> Self {
        FakeWallet {
            node_key: secp256k1::SecretKey::new(&mut rand::thread_rng()),
            received: Mutex::new(HashMap::new()),
            pay_script: Mutex::new(VecDeque::new()),
            check_paid_script: Mutex::new(VecDeque::new()),
            mpp: true,
        }
    }
}

impl FakeWallet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome of the next `pay_invoice` call.
    pub fn script_pay(&self, outcome: Result<PaymentResult, LightningError>) {
        self.pay_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// Queues the outcome of the next `check_paid` call.
    pub fn script_check_paid(&self, outcome: Result<PaymentCheck, LightningError>) {
        self.check_paid_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// Overrides the status reported for an incoming payment.
    pub fn set_received_status(&self, checking_id: &str, status: PaymentStatus) {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(checking_id.to_string(), status);
    }

    /// Builds a signed bolt11 invoice over a random payment hash.
    /// Returns the invoice string and the payment hash hex.
    pub fn fake_invoice(&self, amount_msat: u64) -> Result<(String, String), LightningError> {
        let preimage: [u8; 32] = rand::random();
        let payment_hash = sha256::Hash::hash(&preimage);
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| LightningError::Rejected(e.to_string()))?;

        let invoice = InvoiceBuilder::new(Currency::Regtest)
            .description("fake wallet invoice".to_string())
            .payment_hash(payment_hash)
            .payment_secret(PaymentSecret(rand::random()))
            .amount_milli_satoshis(amount_msat)
            .duration_since_epoch(timestamp)
            .min_final_cltv_expiry_delta(18)
            .build_signed(|hash: &Message| {
                SECP256K1.sign_ecdsa_recoverable(hash, &self.node_key)
            })
            .map_err(|e| LightningError::Rejected(e.to_string()))?;

        Ok((invoice.to_string(), payment_hash.to_string()))
    }

    fn settled_result(checking_id: &str) -> PaymentResult {
        PaymentResult {
            status: PaymentStatus::Settled,
            preimage: hex::encode(rand::random::<[u8; 32]>()),
            fee_paid: Amount::ZERO,
            checking_id: checking_id.to_string(),
        }
    }
}

#[async_trait]
impl LightningBackend for FakeWallet {
    async fn request_invoice(
        &self,
        amount: Amount,
        unit: Unit,
    ) -> Result<InvoiceResult, LightningError> {
        if !self.supports_unit(unit) {
            return Err(LightningError::Rejected(format!(
                "unit {unit} not supported"
            )));
        }
        let (request, checking_id) = self.fake_invoice(amount.to_msat())?;
        Ok(InvoiceResult {
            request,
            checking_id,
        })
    }

    async fn check_received(&self, checking_id: &str) -> Result<PaymentStatus, LightningError> {
        // unseen invoices read as instantly paid
        Ok(self
            .received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(checking_id)
            .copied()
            .unwrap_or(PaymentStatus::Settled))
    }

    async fn pay_invoice(&self, quote: &MeltQuote) -> Result<PaymentResult, LightningError> {
        let scripted = self
            .pay_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(Self::settled_result(&quote.checking_id)),
        }
    }

    async fn check_paid(&self, _checking_id: &str) -> Result<PaymentCheck, LightningError> {
        let scripted = self
            .check_paid_script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => Ok(PaymentCheck {
                status: PaymentStatus::Settled,
                preimage: hex::encode(rand::random::<[u8; 32]>()),
                fee_paid: Amount::ZERO,
            }),
        }
    }

    async fn query_fees(
        &self,
        _invoice: &Bolt11Invoice,
        amount: Amount,
    ) -> Result<Amount, LightningError> {
        Ok(Amount::from((amount.to_u64() / 100).max(1)))
    }

    async fn wallet_balance(&self) -> Result<Amount, LightningError> {
        Ok(Amount::from(21_000_000))
    }

    fn active_mpp(&self) -> bool {
        self.mpp
    }

    fn supports_unit(&self, unit: Unit) -> bool {
        matches!(unit, Unit::Sat | Unit::Msat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn fake_invoices_parse_and_carry_the_amount() {
        let wallet = FakeWallet::new();
        let result = wallet.request_invoice(Amount::from(1000), Unit::Sat).await.unwrap();
        let invoice = Bolt11Invoice::from_str(&result.request).unwrap();
        assert_eq!(invoice.amount_milli_satoshis(), Some(1_000_000));
        assert_eq!(
            invoice.payment_hash().to_string(),
            result.checking_id
        );
    }

    #[tokio::test]
    async fn scripted_outcomes_pop_in_order() {
        let wallet = FakeWallet::new();
        wallet.script_pay(Err(LightningError::Unreachable("down".into())));

        let quote = MeltQuote {
            quote: "q".into(),
            request: "lnbc1".into(),
            amount: Amount::from(10),
            unit: Unit::Sat,
            fee_reserve: Amount::ONE,
            state: cashu_core::QuoteState::Unpaid,
            expiry: u64::MAX,
            payment_preimage: String::new(),
            checking_id: "c".into(),
            melted: false,
            mpp_amount_msat: 0,
        };
        assert!(wallet.pay_invoice(&quote).await.is_err());
        // queue exhausted: default settles
        let result = wallet.pay_invoice(&quote).await.unwrap();
        assert_eq!(result.status, PaymentStatus::Settled);
    }
}
