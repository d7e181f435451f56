//! Lightning backend contract.
//!
//! The mint never trusts a payment call on its own: any outcome other
//! than a definite settlement is re-checked through the status
//! queries, and an unreachable backend always reads as [`PaymentStatus::Unknown`]
//! rather than as a failure.

pub mod fake;

use async_trait::async_trait;
use cashu_core::keyset::Unit;
use cashu_core::{Amount, MeltQuote};
use lightning_invoice::Bolt11Invoice;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LightningError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("invalid invoice: {0}")]
    InvalidInvoice(String),
}

/// Outcome class of an outgoing payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Settled,
    Pending,
    Failed,
    /// The backend does not know the payment. Treated like `Failed`
    /// only after a successful status query, never on a query error.
    Unknown,
}

/// Result of a `pay_invoice` call.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    pub status: PaymentStatus,
    /// Settlement preimage, empty unless settled.
    pub preimage: String,
    /// Routing fee actually paid, zero unless settled.
    pub fee_paid: Amount,
    /// Handle for later status queries; may differ from the payment
    /// hash.
    pub checking_id: String,
}

/// Result of a status query for an outgoing payment.
#[derive(Debug, Clone)]
pub struct PaymentCheck {
    pub status: PaymentStatus,
    pub preimage: String,
    pub fee_paid: Amount,
}

/// A freshly requested incoming invoice.
#[derive(Debug, Clone)]
pub struct InvoiceResult {
    pub request: String,
    pub checking_id: String,
}

/// What a Lightning node must offer to back a mint.
#[async_trait]
pub trait LightningBackend: Send + Sync {
    /// Creates an invoice for an incoming payment (mint quote).
    async fn request_invoice(&self, amount: Amount, unit: Unit)
        -> Result<InvoiceResult, LightningError>;

    /// Status of an incoming payment.
    async fn check_received(&self, checking_id: &str) -> Result<PaymentStatus, LightningError>;

    /// Pays the invoice of a melt quote. May return without a definite
    /// outcome; the caller follows up with [`check_paid`].
    ///
    /// [`check_paid`]: LightningBackend::check_paid
    async fn pay_invoice(&self, quote: &MeltQuote) -> Result<PaymentResult, LightningError>;

    /// Status of an outgoing payment.
    async fn check_paid(&self, checking_id: &str) -> Result<PaymentCheck, LightningError>;

    /// Routing fee estimate for paying `invoice` with `amount`.
    async fn query_fees(
        &self,
        invoice: &Bolt11Invoice,
        amount: Amount,
    ) -> Result<Amount, LightningError>;

    /// Spendable balance of the backing wallet.
    async fn wallet_balance(&self) -> Result<Amount, LightningError>;

    /// Whether the backend can send multi-part payments.
    fn active_mpp(&self) -> bool;

    /// Whether the backend settles in this unit.
    fn supports_unit(&self, unit: Unit) -> bool;
}
