//! Protocol-level errors and the numeric error codes wallets match on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Could not map a secret onto the curve within the counter bound.
    #[error("no valid curve point found for message")]
    NoValidPoint,
    #[error("amount overflow")]
    AmountOverflow,
    #[error("keyset is not known")]
    UnknownKeyset,
    #[error("keyset is inactive, cannot sign messages")]
    InactiveKeyset,
    #[error("no key for amount {0}")]
    UnknownAmount(crate::Amount),
    #[error("invalid keyset id: {0}")]
    InvalidKeysetId(String),
    #[error("unit `{0}` is not supported")]
    UnitNotSupported(String),
    #[error("plain secret must be 64 characters")]
    SecretLength,
    /// Secret parsed as JSON but is not a valid well-known secret.
    #[error("invalid spend condition: {0}")]
    InvalidSpendCondition(String),
    #[error("witness is missing or empty")]
    EmptyWitness,
    #[error("no valid signatures in witness")]
    NoValidSignatures,
    #[error("not enough valid signatures")]
    NotEnoughSignatures,
    #[error("locktime has passed and no refund keys are set")]
    LocktimePassed,
    #[error("invalid preimage for HTLC")]
    InvalidPreimage,
    #[error("preimage is not valid hex")]
    InvalidHexPreimage,
    #[error("DLEQ proof is not valid")]
    InvalidDleq,
    #[error(transparent)]
    Secp(#[from] bitcoin::secp256k1::Error),
    #[error(transparent)]
    Bip32(#[from] bitcoin::bip32::Error),
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Numeric error codes of the Cashu error wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const BLIND_MESSAGE_ALREADY_SIGNED: ErrorCode = ErrorCode(10002);
    pub const TOKEN_NOT_VERIFIED: ErrorCode = ErrorCode(10003);

    pub const TOKEN_ALREADY_SPENT: ErrorCode = ErrorCode(11001);
    pub const TRANSACTION_NOT_BALANCED: ErrorCode = ErrorCode(11002);
    pub const UNIT_NOT_SUPPORTED: ErrorCode = ErrorCode(11005);
    pub const INSUFFICIENT_FEE: ErrorCode = ErrorCode(11006);
    pub const DUPLICATE_INPUTS: ErrorCode = ErrorCode(11007);
    pub const DUPLICATE_OUTPUTS: ErrorCode = ErrorCode(11008);
    pub const MULTIPLE_UNITS: ErrorCode = ErrorCode(11009);
    pub const INPUT_OUTPUT_NOT_SAME_UNIT: ErrorCode = ErrorCode(11010);

    pub const KEYSET_NOT_KNOWN: ErrorCode = ErrorCode(12001);
    pub const INACTIVE_KEYSET: ErrorCode = ErrorCode(12002);

    pub const REQUEST_NOT_PAID: ErrorCode = ErrorCode(20001);
    pub const TOKEN_ALREADY_ISSUED: ErrorCode = ErrorCode(20002);
    pub const MINTING_DISABLED: ErrorCode = ErrorCode(20003);
    pub const LIGHTNING_PAYMENT_FAILED: ErrorCode = ErrorCode(20004);
    pub const QUOTE_PENDING: ErrorCode = ErrorCode(20005);
    pub const INVOICE_ALREADY_PAID: ErrorCode = ErrorCode(20006);

    pub const UNKNOWN: ErrorCode = ErrorCode(99999);

    pub fn detail(&self) -> &'static str {
        match *self {
            ErrorCode::BLIND_MESSAGE_ALREADY_SIGNED => "Blinded message of output already signed",
            ErrorCode::TOKEN_NOT_VERIFIED => "Proof could not be verified",
            ErrorCode::TOKEN_ALREADY_SPENT => "Token is already spent",
            ErrorCode::TRANSACTION_NOT_BALANCED => {
                "Transaction is not balanced (inputs != outputs)"
            }
            ErrorCode::UNIT_NOT_SUPPORTED => "Unit in request is not supported",
            ErrorCode::INSUFFICIENT_FEE => "Insufficient fee",
            ErrorCode::DUPLICATE_INPUTS => "Duplicate inputs provided",
            ErrorCode::DUPLICATE_OUTPUTS => "Duplicate outputs provided",
            ErrorCode::MULTIPLE_UNITS => "Inputs/Outputs of multiple units",
            ErrorCode::INPUT_OUTPUT_NOT_SAME_UNIT => "Inputs and outputs are not same unit",
            ErrorCode::KEYSET_NOT_KNOWN => "Keyset is not known",
            ErrorCode::INACTIVE_KEYSET => "Keyset is inactive, cannot sign messages",
            ErrorCode::REQUEST_NOT_PAID => "Quote request is not paid",
            ErrorCode::TOKEN_ALREADY_ISSUED => "Tokens have already been issued for quote",
            ErrorCode::MINTING_DISABLED => "Minting is disabled",
            ErrorCode::LIGHTNING_PAYMENT_FAILED => "Lightning payment failed",
            ErrorCode::QUOTE_PENDING => "Quote is pending",
            ErrorCode::INVOICE_ALREADY_PAID => "Invoice already paid",
            _ => "Unknown error",
        }
    }
}

/// Body returned to wallets when an operation fails.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{detail} (code {code:?})")]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub detail: String,
}

impl From<ErrorCode> for ErrorResponse {
    fn from(code: ErrorCode) -> Self {
        ErrorResponse {
            code,
            detail: code.detail().to_string(),
        }
    }
}
