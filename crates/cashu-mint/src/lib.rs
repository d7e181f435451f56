//! A Cashu mint.
//!
//! The [`Mint`] aggregate ties together the signing keysets, the proof
//! ledger, the in-process concurrency guards, the Lightning backend
//! and the quote state machines. Storage and Lightning are behind
//! async traits; [`database::memory::MemoryDatabase`] and
//! [`lightning::fake::FakeWallet`] serve tests and development.

pub mod config;
pub mod database;
pub mod error;
pub mod guard;
pub mod lightning;
pub mod melt;
pub mod mint;
pub mod observer;
pub mod signer;
pub mod state;
pub mod swap;

pub use config::MintConfig;
pub use error::MintError;
pub use mint::Mint;
pub use signer::MintSigner;
