//! Well-known spending conditions: P2PK and HTLC locked secrets.
//!
//! A locked secret is a JSON 2-tuple `["P2PK", {nonce, data, tags}]`.
//! Verification is schnorr over `sha256(secret)` for SIG_INPUTS, or
//! over one combined transaction message for SIG_ALL.

use std::collections::HashSet;
use std::str::FromStr;

use bitcoin::hashes::{sha256, Hash};
use bitcoin::secp256k1::{schnorr, Message};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::key::PublicKey;
use crate::proof::{BlindedMessage, Proof, Proofs, Witness, PLAIN_SECRET_LENGTH};
use crate::SECP256K1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigFlag {
    #[serde(rename = "SIG_INPUTS")]
    SigInputs,
    #[serde(rename = "SIG_ALL")]
    SigAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "P2PK")]
    P2pk,
    #[serde(rename = "HTLC")]
    Htlc,
}

/// Parsed tag set of a locked secret. Unknown tags are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    pub sigflag: SigFlag,
    pub n_sigs: u64,
    pub locktime: Option<u64>,
    pub refund: Vec<PublicKey>,
    pub n_sigs_refund: u64,
    pub pubkeys: Vec<PublicKey>,
}

impl Default for Tags {
    fn default() -> Self {
        Tags {
            sigflag: SigFlag::SigInputs,
            n_sigs: 1,
            locktime: None,
            refund: Vec::new(),
            n_sigs_refund: 1,
            pubkeys: Vec::new(),
        }
    }
}

impl Tags {
    fn parse(raw: &[Vec<String>]) -> Result<Tags, Error> {
        let mut tags = Tags::default();
        for tag in raw {
            let (name, values) = match tag.split_first() {
                Some(split) => split,
                None => continue,
            };
            match (name.as_str(), values.first()) {
                ("sigflag", Some(value)) => {
                    tags.sigflag = match value.as_str() {
                        "SIG_INPUTS" => SigFlag::SigInputs,
                        "SIG_ALL" => SigFlag::SigAll,
                        other => {
                            return Err(Error::InvalidSpendCondition(format!(
                                "unknown sigflag `{other}`"
                            )))
                        }
                    }
                }
                ("n_sigs", Some(value)) => {
                    tags.n_sigs = value
                        .parse()
                        .map_err(|_| Error::InvalidSpendCondition("bad n_sigs".into()))?
                }
                ("n_sigs_refund", Some(value)) => {
                    tags.n_sigs_refund = value
                        .parse()
                        .map_err(|_| Error::InvalidSpendCondition("bad n_sigs_refund".into()))?
                }
                ("locktime", Some(value)) => {
                    tags.locktime = Some(
                        value
                            .parse()
                            .map_err(|_| Error::InvalidSpendCondition("bad locktime".into()))?,
                    )
                }
                ("refund", _) => {
                    tags.refund = parse_keys(values)?;
                }
                ("pubkeys", _) => {
                    tags.pubkeys = parse_keys(values)?;
                }
                _ => {}
            }
        }
        Ok(tags)
    }
}

fn parse_keys(values: &[String]) -> Result<Vec<PublicKey>, Error> {
    values.iter().map(|v| PublicKey::from_hex(v)).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawPayload {
    nonce: String,
    data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<Vec<String>>>,
}

/// A parsed locked secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendCondition {
    pub kind: Kind,
    pub nonce: String,
    pub data: String,
    pub tags: Tags,
    /// Raw tag rows, kept for the SIG_ALL same-condition check.
    raw_tags: Vec<Vec<String>>,
}

impl SpendCondition {
    /// Parses a secret. `Ok(None)` means the secret is plain (not a
    /// well-known secret); a malformed well-known secret is an error.
    pub fn parse(secret: &str) -> Result<Option<SpendCondition>, Error> {
        if !secret.trim_start().starts_with('[') {
            return Ok(None);
        }
        let (kind, payload): (Kind, RawPayload) = serde_json::from_str(secret)
            .map_err(|e| Error::InvalidSpendCondition(e.to_string()))?;
        let raw_tags = payload.tags.unwrap_or_default();
        let tags = Tags::parse(&raw_tags)?;
        Ok(Some(SpendCondition {
            kind,
            nonce: payload.nonce,
            data: payload.data,
            tags,
            raw_tags,
        }))
    }

    /// Serializes back to the wire secret form.
    pub fn to_secret(&self) -> Result<String, Error> {
        let payload = RawPayload {
            nonce: self.nonce.clone(),
            data: self.data.clone(),
            tags: if self.raw_tags.is_empty() {
                None
            } else {
                Some(self.raw_tags.clone())
            },
        };
        Ok(serde_json::to_string(&(&self.kind, &payload))?)
    }

    /// Builds a condition with the given tag rows.
    pub fn new(kind: Kind, nonce: &str, data: &str, raw_tags: Vec<Vec<String>>) -> Result<Self, Error> {
        let tags = Tags::parse(&raw_tags)?;
        Ok(SpendCondition {
            kind,
            nonce: nonce.to_string(),
            data: data.to_string(),
            tags,
            raw_tags,
        })
    }

    pub fn locktime_passed(&self, now: u64) -> bool {
        matches!(self.tags.locktime, Some(locktime) if now > locktime)
    }

    /// Keys allowed to sign on the primary path.
    pub fn signing_keys(&self) -> Result<Vec<PublicKey>, Error> {
        let mut keys = Vec::new();
        if self.kind == Kind::P2pk {
            keys.push(PublicKey::from_hex(&self.data)?);
        }
        keys.extend(self.tags.pubkeys.iter().copied());
        Ok(keys)
    }

    /// True if this and `other` lock to the same data and tags, the
    /// precondition for treating inputs as one SIG_ALL set.
    pub fn same_conditions(&self, other: &SpendCondition) -> bool {
        self.kind == other.kind && self.data == other.data && self.raw_tags == other.raw_tags
    }

    fn check_preimage(&self, witness: &Witness) -> Result<(), Error> {
        let preimage_hex = witness.preimage.as_deref().ok_or(Error::EmptyWitness)?;
        let preimage = hex::decode(preimage_hex).map_err(|_| Error::InvalidHexPreimage)?;
        let digest = sha256::Hash::hash(&preimage);
        if hex::encode(digest.to_byte_array()) != self.data.to_lowercase() {
            return Err(Error::InvalidPreimage);
        }
        Ok(())
    }

    /// Verifies one SIG_INPUTS proof: message is `sha256(secret)`.
    pub fn verify_input(&self, proof: &Proof, now: u64) -> Result<(), Error> {
        let witness = match proof.witness.as_deref() {
            Some(raw) => Witness::from_str(raw)?,
            None => Witness::default(),
        };

        if self.kind == Kind::Htlc {
            self.check_preimage(&witness)?;
        }

        let message = sha256::Hash::hash(proof.secret.as_bytes()).to_byte_array();
        self.verify_signatures_at(&message, &witness, now)
    }

    /// Signature check over an already hashed message, trying the
    /// primary path first and the refund path once the locktime
    /// passed. A passed locktime without refund keys is unspendable.
    pub fn verify_signatures(&self, message: &[u8; 32], witness: &Witness) -> Result<(), Error> {
        self.verify_signatures_at(message, witness, unix_now())
    }

    fn verify_signatures_at(
        &self,
        message: &[u8; 32],
        witness: &Witness,
        now: u64,
    ) -> Result<(), Error> {
        let keys = self.signing_keys()?;

        // HTLC without locking keys: the preimage alone spends it.
        if keys.is_empty() && self.kind == Kind::Htlc && !self.locktime_passed(now) {
            return Ok(());
        }

        if !keys.is_empty() {
            let valid = count_valid_signatures(message, &keys, &witness.signatures)?;
            if valid >= self.tags.n_sigs as usize {
                return Ok(());
            }
        }

        if self.locktime_passed(now) {
            if self.tags.refund.is_empty() {
                return Err(Error::LocktimePassed);
            }
            let valid = count_valid_signatures(message, &self.tags.refund, &witness.signatures)?;
            if valid >= self.tags.n_sigs_refund as usize {
                return Ok(());
            }
            return Err(Error::NotEnoughSignatures);
        }

        if witness.signatures.is_empty() {
            return Err(Error::EmptyWitness);
        }
        Err(Error::NotEnoughSignatures)
    }
}

/// Counts distinct keys with a valid schnorr signature over `message`.
/// A key can satisfy at most one signature.
pub fn count_valid_signatures(
    message: &[u8; 32],
    keys: &[PublicKey],
    signatures: &[String],
) -> Result<usize, Error> {
    let message = Message::from_digest(*message);
    let mut satisfied: HashSet<PublicKey> = HashSet::new();

    for signature_hex in signatures {
        let bytes = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => continue,
        };
        let signature = match schnorr::Signature::from_slice(&bytes) {
            Ok(signature) => signature,
            Err(_) => continue,
        };
        for key in keys {
            if satisfied.contains(key) {
                continue;
            }
            if SECP256K1
                .verify_schnorr(&signature, &message, &key.x_only())
                .is_ok()
            {
                satisfied.insert(*key);
                break;
            }
        }
    }
    Ok(satisfied.len())
}

/// Checks whether a transaction's inputs demand SIG_ALL. Plain secrets
/// never do; the flag comes from the first locked input.
pub fn requires_sig_all(inputs: &Proofs) -> Result<bool, Error> {
    for proof in inputs {
        if let Some(condition) = SpendCondition::parse(&proof.secret)? {
            return Ok(condition.tags.sigflag == SigFlag::SigAll);
        }
    }
    Ok(false)
}

/// SIG_ALL message of a swap: all input secrets, then all output
/// blinded points in hex.
pub fn swap_sig_all_message(inputs: &Proofs, outputs: &[BlindedMessage]) -> String {
    let mut message = String::new();
    for proof in inputs {
        message.push_str(&proof.secret);
    }
    for output in outputs {
        message.push_str(&output.blinded_point.to_hex());
    }
    message
}

/// SIG_ALL message of a melt: `secret || C` per input, then
/// `amount || B_` per output, then the quote id.
pub fn melt_sig_all_message(
    quote_id: &str,
    inputs: &Proofs,
    outputs: &[BlindedMessage],
) -> String {
    let mut message = String::new();
    for proof in inputs {
        message.push_str(&proof.secret);
        message.push_str(&proof.c.to_hex());
    }
    for output in outputs {
        message.push_str(&output.amount.to_string());
        message.push_str(&output.blinded_point.to_hex());
    }
    message.push_str(quote_id);
    message
}

/// Verifies a SIG_ALL transaction: all locked inputs must share the
/// same conditions, and the first input's witness must carry enough
/// signatures over the combined message.
pub fn verify_sig_all(inputs: &Proofs, message: &str) -> Result<(), Error> {
    let first = inputs.first().ok_or(Error::NoValidSignatures)?;
    let condition = SpendCondition::parse(&first.secret)?
        .ok_or_else(|| Error::InvalidSpendCondition("SIG_ALL requires locked inputs".into()))?;

    for proof in inputs.iter().skip(1) {
        let other = SpendCondition::parse(&proof.secret)?
            .ok_or_else(|| Error::InvalidSpendCondition("SIG_ALL requires locked inputs".into()))?;
        if !condition.same_conditions(&other) {
            return Err(Error::InvalidSpendCondition(
                "SIG_ALL inputs differ in conditions".into(),
            ));
        }
    }

    let witness = match first.witness.as_deref() {
        Some(raw) => Witness::from_str(raw)?,
        None => return Err(Error::EmptyWitness),
    };
    if witness.signatures.is_empty() {
        return Err(Error::NoValidSignatures);
    }

    let digest = sha256::Hash::hash(message.as_bytes()).to_byte_array();
    if condition.kind == Kind::Htlc {
        condition.check_preimage(&witness)?;
    }
    condition.verify_signatures(&digest, &witness)
}

/// Checks one input of a transaction. Returns the sigflag that applied
/// (`None` for plain secrets); SIG_ALL inputs are skipped here and
/// verified at transaction level.
pub fn verify_proof_conditions(proof: &Proof) -> Result<Option<SigFlag>, Error> {
    match SpendCondition::parse(&proof.secret)? {
        None => {
            if proof.secret.len() != PLAIN_SECRET_LENGTH {
                return Err(Error::SecretLength);
            }
            Ok(None)
        }
        Some(condition) => {
            if condition.tags.sigflag == SigFlag::SigAll {
                return Ok(Some(SigFlag::SigAll));
            }
            condition.verify_input(proof, unix_now())?;
            Ok(Some(SigFlag::SigInputs))
        }
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::key::SecretKey;
    use crate::keyset::Id;

    fn keypair() -> (SecretKey, PublicKey) {
        let sk = SecretKey::generate();
        let pk = sk.public_key();
        (sk, pk)
    }

    fn schnorr_sign(sk: &SecretKey, message: &[u8; 32]) -> String {
        let keypair = bitcoin::secp256k1::Keypair::from_secret_key(&SECP256K1, sk);
        let signature = SECP256K1.sign_schnorr(&Message::from_digest(*message), &keypair);
        hex::encode(signature.as_ref())
    }

    fn locked_proof(condition: &SpendCondition, witness: Option<Witness>) -> Proof {
        Proof {
            amount: Amount::from(8),
            keyset_id: format!("01{}", "ef".repeat(32)).parse::<Id>().unwrap(),
            secret: condition.to_secret().unwrap(),
            c: SecretKey::generate().public_key(),
            witness: witness.map(|w| serde_json::to_string(&w).unwrap()),
        }
    }

    fn sign_input(condition: &SpendCondition, sk: &SecretKey) -> Proof {
        let unsigned = locked_proof(condition, None);
        let message = sha256::Hash::hash(unsigned.secret.as_bytes()).to_byte_array();
        let witness = Witness {
            signatures: vec![schnorr_sign(sk, &message)],
            preimage: None,
        };
        locked_proof(condition, Some(witness))
    }

    #[test]
    fn plain_secret_is_not_a_condition() {
        assert!(SpendCondition::parse(&"a".repeat(64)).unwrap().is_none());
    }

    #[test]
    fn malformed_locked_secret_is_an_error() {
        assert!(SpendCondition::parse("[\"P2PK\", {\"oops\": 1}]").is_err());
        assert!(SpendCondition::parse("[\"WRONG\", {\"nonce\": \"n\", \"data\": \"d\"}]").is_err());
    }

    #[test]
    fn p2pk_accepts_owner_signature() {
        let (sk, pk) = keypair();
        let condition = SpendCondition::new(Kind::P2pk, "nonce", &pk.to_hex(), vec![]).unwrap();
        let proof = sign_input(&condition, &sk);
        condition.verify_input(&proof, unix_now()).unwrap();
    }

    #[test]
    fn p2pk_rejects_wrong_key_and_missing_witness() {
        let (_, pk) = keypair();
        let (intruder, _) = keypair();
        let condition = SpendCondition::new(Kind::P2pk, "nonce", &pk.to_hex(), vec![]).unwrap();

        let proof = sign_input(&condition, &intruder);
        assert!(condition.verify_input(&proof, unix_now()).is_err());

        let bare = locked_proof(&condition, None);
        assert!(matches!(
            condition.verify_input(&bare, unix_now()),
            Err(Error::EmptyWitness)
        ));
    }

    #[test]
    fn multisig_counts_distinct_keys_only() {
        let (sk1, pk1) = keypair();
        let (sk2, pk2) = keypair();
        let condition = SpendCondition::new(
            Kind::P2pk,
            "nonce",
            &pk1.to_hex(),
            vec![
                vec!["pubkeys".into(), pk2.to_hex()],
                vec!["n_sigs".into(), "2".into()],
            ],
        )
        .unwrap();

        let unsigned = locked_proof(&condition, None);
        let message = sha256::Hash::hash(unsigned.secret.as_bytes()).to_byte_array();

        // same key twice does not reach the threshold
        let witness = Witness {
            signatures: vec![
                schnorr_sign(&sk1, &message),
                schnorr_sign(&sk1, &message),
            ],
            preimage: None,
        };
        let proof = locked_proof(&condition, Some(witness));
        assert!(condition.verify_input(&proof, unix_now()).is_err());

        let witness = Witness {
            signatures: vec![
                schnorr_sign(&sk1, &message),
                schnorr_sign(&sk2, &message),
            ],
            preimage: None,
        };
        let proof = locked_proof(&condition, Some(witness));
        condition.verify_input(&proof, unix_now()).unwrap();
    }

    #[test]
    fn locktime_refund_path() {
        let (owner_sk, owner_pk) = keypair();
        let (refund_sk, refund_pk) = keypair();
        let condition = SpendCondition::new(
            Kind::P2pk,
            "nonce",
            &owner_pk.to_hex(),
            vec![
                vec!["locktime".into(), "1000".into()],
                vec!["refund".into(), refund_pk.to_hex()],
            ],
        )
        .unwrap();

        let unsigned = locked_proof(&condition, None);
        let message = sha256::Hash::hash(unsigned.secret.as_bytes()).to_byte_array();

        // before the locktime only the owner can spend
        let refund_witness = Witness {
            signatures: vec![schnorr_sign(&refund_sk, &message)],
            preimage: None,
        };
        assert!(condition
            .verify_signatures_at(&message, &refund_witness, 500)
            .is_err());

        // after the locktime the refund key can
        condition
            .verify_signatures_at(&message, &refund_witness, 2000)
            .unwrap();

        // the owner still can after the locktime
        let owner_witness = Witness {
            signatures: vec![schnorr_sign(&owner_sk, &message)],
            preimage: None,
        };
        condition
            .verify_signatures_at(&message, &owner_witness, 2000)
            .unwrap();
    }

    #[test]
    fn verify_input_uses_the_supplied_clock() {
        let (_, owner_pk) = keypair();
        let (refund_sk, refund_pk) = keypair();
        let condition = SpendCondition::new(
            Kind::P2pk,
            "nonce",
            &owner_pk.to_hex(),
            vec![
                vec!["locktime".into(), "1000".into()],
                vec!["refund".into(), refund_pk.to_hex()],
            ],
        )
        .unwrap();

        let proof = sign_input(&condition, &refund_sk);
        assert!(condition.verify_input(&proof, 500).is_err());
        condition.verify_input(&proof, 2000).unwrap();
    }

    #[test]
    fn locktime_without_refund_keys_is_unspendable() {
        let (_, owner_pk) = keypair();
        let condition = SpendCondition::new(
            Kind::P2pk,
            "nonce",
            &owner_pk.to_hex(),
            vec![vec!["locktime".into(), "1000".into()]],
        )
        .unwrap();
        let message = [7u8; 32];
        assert!(matches!(
            condition.verify_signatures_at(&message, &Witness::default(), 2000),
            Err(Error::LocktimePassed)
        ));
    }

    #[test]
    fn htlc_requires_matching_preimage() {
        let preimage = [42u8; 32];
        let hash = sha256::Hash::hash(&preimage);
        let condition = SpendCondition::new(
            Kind::Htlc,
            "nonce",
            &hex::encode(hash.to_byte_array()),
            vec![],
        )
        .unwrap();

        let good = Witness {
            signatures: vec![],
            preimage: Some(hex::encode(preimage)),
        };
        let proof = locked_proof(&condition, Some(good));
        condition.verify_input(&proof, unix_now()).unwrap();

        let bad = Witness {
            signatures: vec![],
            preimage: Some(hex::encode([1u8; 32])),
        };
        let proof = locked_proof(&condition, Some(bad));
        assert!(matches!(
            condition.verify_input(&proof, unix_now()),
            Err(Error::InvalidPreimage)
        ));

        let not_hex = Witness {
            signatures: vec![],
            preimage: Some("zz".into()),
        };
        let proof = locked_proof(&condition, Some(not_hex));
        assert!(matches!(
            condition.verify_input(&proof, unix_now()),
            Err(Error::InvalidHexPreimage)
        ));
    }

    #[test]
    fn sig_all_binds_outputs_and_quote() {
        let (sk, pk) = keypair();
        let condition = SpendCondition::new(
            Kind::P2pk,
            "nonce",
            &pk.to_hex(),
            vec![vec!["sigflag".into(), "SIG_ALL".into()]],
        )
        .unwrap();

        let mut inputs = vec![locked_proof(&condition, None), locked_proof(&condition, None)];
        let outputs = vec![BlindedMessage {
            amount: Amount::from(2),
            keyset_id: format!("01{}", "ef".repeat(32)).parse::<Id>().unwrap(),
            blinded_point: SecretKey::generate().public_key(),
        }];

        assert!(requires_sig_all(&inputs).unwrap());

        let message = melt_sig_all_message("quote-1", &inputs, &outputs);
        let digest = sha256::Hash::hash(message.as_bytes()).to_byte_array();
        let witness = Witness {
            signatures: vec![schnorr_sign(&sk, &digest)],
            preimage: None,
        };
        inputs[0].witness = Some(serde_json::to_string(&witness).unwrap());

        verify_sig_all(&inputs, &message).unwrap();

        // a different quote id invalidates the signature
        let tampered = melt_sig_all_message("quote-2", &inputs, &outputs);
        assert!(verify_sig_all(&inputs, &tampered).is_err());
    }
}
