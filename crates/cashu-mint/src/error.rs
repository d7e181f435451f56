//! Mint operation errors and their wire error codes.

use cashu_core::error::{ErrorCode, ErrorResponse};
use thiserror::Error;

use crate::database::DatabaseError;
use crate::lightning::LightningError;

#[derive(Debug, Error)]
pub enum MintError {
    #[error(transparent)]
    Core(#[from] cashu_core::Error),
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Lightning(#[from] LightningError),

    /// Another request currently holds the quote or one of the proofs.
    #[error("quote or proofs are already being processed")]
    AlreadyInUse,
    #[error("unknown quote {0}")]
    UnknownQuote(String),
    #[error("quote is expired")]
    QuoteExpired,
    #[error("quote request is not paid")]
    RequestNotPaid,
    #[error("tokens have already been issued for quote")]
    AlreadyIssued,
    #[error("quote is pending")]
    QuotePending,
    #[error("token is already spent")]
    TokenAlreadySpent,
    #[error("proof could not be verified")]
    TokenNotVerified,
    #[error("transaction is not balanced (inputs != outputs)")]
    TransactionNotBalanced,
    #[error("inputs do not cover amount, fee reserve and input fees")]
    InsufficientFee,
    #[error("duplicate inputs provided")]
    DuplicateInputs,
    #[error("duplicate outputs provided")]
    DuplicateOutputs,
    #[error("inputs and outputs are not all of the same unit")]
    UnitMismatch,
    #[error("output amounts do not match the quote amount")]
    AmountMismatch,
    #[error("blinded message of output already signed")]
    AlreadySigned,
    #[error("minting is disabled")]
    MintingDisabled,
    #[error("melting is disabled")]
    MeltingDisabled,
    #[error("amount is outside the configured limits")]
    AmountOutsideLimit,
    #[error("invoice already paid")]
    InvoiceAlreadyPaid,
    #[error("lightning payment failed")]
    PaymentFailed,
    #[error("invalid bolt11 invoice: {0}")]
    InvalidInvoice(String),
    #[error("amountless invoice is not accepted")]
    AmountlessInvoice,
    #[error("multi-part payments are not supported by the backend")]
    MppNotSupported,
}

impl MintError {
    pub fn code(&self) -> ErrorCode {
        use cashu_core::Error as Core;
        match self {
            MintError::Core(core) => match core {
                Core::UnknownKeyset | Core::InvalidKeysetId(_) => ErrorCode::KEYSET_NOT_KNOWN,
                Core::InactiveKeyset => ErrorCode::INACTIVE_KEYSET,
                Core::UnitNotSupported(_) => ErrorCode::UNIT_NOT_SUPPORTED,
                _ => ErrorCode::TOKEN_NOT_VERIFIED,
            },
            MintError::TokenAlreadySpent => ErrorCode::TOKEN_ALREADY_SPENT,
            MintError::TokenNotVerified => ErrorCode::TOKEN_NOT_VERIFIED,
            MintError::TransactionNotBalanced => ErrorCode::TRANSACTION_NOT_BALANCED,
            MintError::InsufficientFee => ErrorCode::INSUFFICIENT_FEE,
            MintError::DuplicateInputs => ErrorCode::DUPLICATE_INPUTS,
            MintError::DuplicateOutputs => ErrorCode::DUPLICATE_OUTPUTS,
            MintError::UnitMismatch => ErrorCode::INPUT_OUTPUT_NOT_SAME_UNIT,
            MintError::AlreadySigned => ErrorCode::BLIND_MESSAGE_ALREADY_SIGNED,
            MintError::RequestNotPaid => ErrorCode::REQUEST_NOT_PAID,
            MintError::AlreadyIssued => ErrorCode::TOKEN_ALREADY_ISSUED,
            MintError::MintingDisabled | MintError::MeltingDisabled => {
                ErrorCode::MINTING_DISABLED
            }
            MintError::PaymentFailed => ErrorCode::LIGHTNING_PAYMENT_FAILED,
            MintError::QuotePending | MintError::AlreadyInUse => ErrorCode::QUOTE_PENDING,
            MintError::InvoiceAlreadyPaid => ErrorCode::INVOICE_ALREADY_PAID,
            _ => ErrorCode::UNKNOWN,
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            detail: self.to_string(),
        }
    }
}
