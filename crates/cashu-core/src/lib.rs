//! Cashu protocol primitives.
//!
//! Everything in this crate is synchronous and I/O free: amounts and
//! their binary splits, secp256k1 key wrappers, the blind
//! Diffie-Hellman key exchange (BDHKE) with DLEQ proofs, keyset
//! derivation and fee math, proofs and blinded messages, well-known
//! spending conditions (P2PK / HTLC), quote records and the wire
//! payload shapes a mint speaks.

pub mod amount;
pub mod dhke;
pub mod error;
pub mod key;
pub mod keyset;
pub mod payload;
pub mod proof;
pub mod quote;
pub mod spend_condition;

pub use amount::Amount;
pub use error::Error;
pub use key::{PublicKey, SecretKey};
pub use keyset::{Id, Keys, Keyset, MintKeyset, Unit};
pub use proof::{BlindSignature, BlindedMessage, Proof, ProofState, Proofs};
pub use quote::{MeltQuote, MintQuote, QuoteState};

use bitcoin::secp256k1::{All, Secp256k1};
use once_cell::sync::Lazy;

/// Shared secp256k1 context.
pub static SECP256K1: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);
