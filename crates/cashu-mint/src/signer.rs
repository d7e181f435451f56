//! Keyset custody and blind signing.

use std::collections::{BTreeMap, HashMap};

use cashu_core::dhke;
use cashu_core::keyset::{self, Id, Keyset, MintKeyset, Unit, MAX_ORDER};
use cashu_core::proof::{BlindSignature, BlindedMessage};
use cashu_core::{Amount, Proofs};
use tracing::info;

use crate::database::KeysetRecord;
use crate::error::MintError;

/// Holds every keyset the mint has ever derived for its seed. At most
/// one keyset per unit is active; rotated-out keysets keep verifying
/// old proofs but never sign.
pub struct MintSigner {
    seed: Vec<u8>,
    keysets: HashMap<Unit, Vec<MintKeyset>>,
}

impl MintSigner {
    /// Fresh mint: derives version 0 for each unit.
    pub fn new(seed: Vec<u8>, units: &[(Unit, u64)]) -> Result<Self, MintError> {
        let records: Vec<KeysetRecord> = units
            .iter()
            .map(|(unit, input_fee_ppk)| KeysetRecord {
                unit: *unit,
                version: 0,
                active: true,
                input_fee_ppk: *input_fee_ppk,
                final_expiry: None,
            })
            .collect();
        Self::from_records(seed, &records)
    }

    /// Restart: re-derives every keyset the store knows about.
    pub fn from_records(seed: Vec<u8>, records: &[KeysetRecord]) -> Result<Self, MintError> {
        let mut keysets: HashMap<Unit, Vec<MintKeyset>> = HashMap::new();
        for record in records {
            let mut keyset = keyset::derive_keyset(
                &seed,
                record.unit,
                record.version,
                MAX_ORDER,
                record.input_fee_ppk,
                record.final_expiry,
            )?;
            keyset.active = record.active;
            keysets.entry(record.unit).or_default().push(keyset);
        }
        Ok(MintSigner { seed, keysets })
    }

    pub fn active_keyset(&self, unit: Unit) -> Result<&MintKeyset, MintError> {
        self.keysets
            .get(&unit)
            .and_then(|sets| sets.iter().find(|k| k.active))
            .ok_or(MintError::Core(cashu_core::Error::UnknownKeyset))
    }

    pub fn keyset_by_id(&self, id: &Id) -> Option<&MintKeyset> {
        self.keysets
            .values()
            .flat_map(|sets| sets.iter())
            .find(|k| k.id == *id)
    }

    /// Public keysets, active and rotated-out.
    pub fn public_keysets(&self) -> Vec<Keyset> {
        self.keysets
            .values()
            .flat_map(|sets| sets.iter())
            .map(MintKeyset::to_public)
            .collect()
    }

    /// Fee table for [`cashu_core::keyset::fees`].
    pub fn fee_table(&self) -> BTreeMap<Id, u64> {
        self.keysets
            .values()
            .flat_map(|sets| sets.iter())
            .map(|k| (k.id.clone(), k.input_fee_ppk))
            .collect()
    }

    /// Input fee of a proof set: `ceil(sum(input_fee_ppk) / 1000)`.
    pub fn input_fees(&self, proofs: &Proofs) -> Result<Amount, MintError> {
        Ok(keyset::fees(proofs, &self.fee_table())?)
    }

    /// The unit shared by all proofs, or an error if they mix units
    /// or reference unknown keysets.
    pub fn proofs_unit(&self, proofs: &Proofs) -> Result<Unit, MintError> {
        let mut unit = None;
        for proof in proofs {
            let keyset = self
                .keyset_by_id(&proof.keyset_id)
                .ok_or(MintError::Core(cashu_core::Error::UnknownKeyset))?;
            match unit {
                None => unit = Some(keyset.unit),
                Some(u) if u != keyset.unit => return Err(MintError::UnitMismatch),
                _ => {}
            }
        }
        unit.ok_or(MintError::TransactionNotBalanced)
    }

    /// The unit shared by all outputs. Outputs must reference active
    /// keysets.
    pub fn outputs_unit(&self, outputs: &[BlindedMessage]) -> Result<Unit, MintError> {
        let mut unit = None;
        for output in outputs {
            let keyset = self
                .keyset_by_id(&output.keyset_id)
                .ok_or(MintError::Core(cashu_core::Error::UnknownKeyset))?;
            if !keyset.active {
                return Err(MintError::Core(cashu_core::Error::InactiveKeyset));
            }
            match unit {
                None => unit = Some(keyset.unit),
                Some(u) if u != keyset.unit => return Err(MintError::UnitMismatch),
                _ => {}
            }
        }
        unit.ok_or(MintError::TransactionNotBalanced)
    }

    /// Signs a batch of blinded messages with DLEQ proofs attached.
    /// All-or-nothing: every output is validated before the first
    /// signature is produced.
    pub fn sign_blind_messages(
        &self,
        outputs: &[BlindedMessage],
    ) -> Result<Vec<BlindSignature>, MintError> {
        // validation pass
        for output in outputs {
            let keyset = self
                .keyset_by_id(&output.keyset_id)
                .ok_or(MintError::Core(cashu_core::Error::UnknownKeyset))?;
            if !keyset.active {
                return Err(MintError::Core(cashu_core::Error::InactiveKeyset));
            }
            if !keyset.keys.contains_key(&output.amount) {
                return Err(MintError::Core(cashu_core::Error::UnknownAmount(
                    output.amount,
                )));
            }
        }

        let mut signatures = Vec::with_capacity(outputs.len());
        for output in outputs {
            let keyset = self
                .keyset_by_id(&output.keyset_id)
                .ok_or(MintError::Core(cashu_core::Error::UnknownKeyset))?;
            let keypair = &keyset.keys[&output.amount];
            let blinded_signature =
                dhke::sign_blinded(&keypair.secret_key, &output.blinded_point)?;
            let dleq = dhke::generate_dleq(&keypair.secret_key, &output.blinded_point)?;
            signatures.push(BlindSignature {
                amount: output.amount,
                keyset_id: output.keyset_id.clone(),
                blinded_signature,
                dleq: Some(dleq),
            });
        }
        Ok(signatures)
    }

    /// Verifies the mint's own signature on a proof.
    pub fn verify_proof(&self, proof: &cashu_core::Proof) -> Result<(), MintError> {
        let keyset = self
            .keyset_by_id(&proof.keyset_id)
            .ok_or(MintError::Core(cashu_core::Error::UnknownKeyset))?;
        let keypair = keyset
            .keys
            .get(&proof.amount)
            .ok_or(MintError::Core(cashu_core::Error::UnknownAmount(
                proof.amount,
            )))?;
        if !dhke::verify(&keypair.secret_key, proof.secret.as_bytes(), &proof.c)? {
            return Err(MintError::TokenNotVerified);
        }
        Ok(())
    }

    pub fn verify_proofs(&self, proofs: &Proofs) -> Result<(), MintError> {
        proofs.iter().try_for_each(|p| self.verify_proof(p))
    }

    /// Derivation records of every keyset of a unit, as persisted.
    pub fn records_for_unit(&self, unit: Unit) -> Vec<KeysetRecord> {
        self.keysets
            .get(&unit)
            .map(|sets| {
                sets.iter()
                    .map(|k| KeysetRecord {
                        unit,
                        version: k.version,
                        active: k.active,
                        input_fee_ppk: k.input_fee_ppk,
                        final_expiry: k.final_expiry,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rotates the unit's keyset: deactivates the current one and
    /// derives the next version. Returns the new public keyset and the
    /// record to persist.
    pub fn rotate(
        &mut self,
        unit: Unit,
        input_fee_ppk: u64,
    ) -> Result<(Keyset, KeysetRecord), MintError> {
        let next_version = self
            .keysets
            .get(&unit)
            .and_then(|sets| sets.iter().map(|k| k.version).max())
            .map(|v| v + 1)
            .unwrap_or(0);

        let keyset =
            keyset::derive_keyset(&self.seed, unit, next_version, MAX_ORDER, input_fee_ppk, None)?;
        info!(%unit, version = next_version, id = %keyset.id, "rotating keyset");

        let sets = self.keysets.entry(unit).or_default();
        for old in sets.iter_mut() {
            old.active = false;
        }
        let public = keyset.to_public();
        sets.push(keyset);

        let record = KeysetRecord {
            unit,
            version: next_version,
            active: true,
            input_fee_ppk,
            final_expiry: None,
        };
        Ok((public, record))
    }
}
