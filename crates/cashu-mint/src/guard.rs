//! In-process concurrency guards.
//!
//! Every mutating operation first registers the quote id and the
//! ledger keys it touches. Registration is exclusive and released on
//! drop, so no exit path can leak a registration.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use cashu_core::PublicKey;

use crate::error::MintError;

/// Quote ids currently being processed.
#[derive(Debug, Clone, Default)]
pub struct ActiveQuotes {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ActiveQuotes {
    /// Registers a quote exclusively. Fails while another request
    /// holds it.
    pub fn lock(&self, quote_id: &str) -> Result<QuoteGuard, MintError> {
        let mut held = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(quote_id.to_string()) {
            return Err(MintError::AlreadyInUse);
        }
        Ok(QuoteGuard {
            set: Arc::clone(&self.inner),
            quote_id: quote_id.to_string(),
        })
    }

    pub fn contains(&self, quote_id: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(quote_id)
    }
}

/// Releases the quote registration on drop.
#[derive(Debug)]
pub struct QuoteGuard {
    set: Arc<Mutex<HashSet<String>>>,
    quote_id: String,
}

impl Drop for QuoteGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.quote_id);
    }
}

/// Ledger keys (Y values) currently being processed.
#[derive(Debug, Clone, Default)]
pub struct ActiveProofs {
    inner: Arc<Mutex<HashSet<PublicKey>>>,
}

impl ActiveProofs {
    /// Registers all keys exclusively, or none: any overlap with a
    /// running operation fails without registering anything.
    pub fn lock(&self, ys: &[PublicKey]) -> Result<ProofsGuard, MintError> {
        let mut held = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if ys.iter().any(|y| held.contains(y)) {
            return Err(MintError::AlreadyInUse);
        }
        held.extend(ys.iter().copied());
        Ok(ProofsGuard {
            set: Arc::clone(&self.inner),
            ys: ys.to_vec(),
        })
    }

    pub fn contains(&self, y: &PublicKey) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(y)
    }
}

/// Releases the key registrations on drop.
#[derive(Debug)]
pub struct ProofsGuard {
    set: Arc<Mutex<HashSet<PublicKey>>>,
    ys: Vec<PublicKey>,
}

impl Drop for ProofsGuard {
    fn drop(&mut self) {
        let mut held = self.set.lock().unwrap_or_else(|e| e.into_inner());
        for y in &self.ys {
            held.remove(y);
        }
    }
}
