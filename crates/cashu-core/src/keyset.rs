//! Keyset derivation, identifiers and fee math.
//!
//! A keyset is one signing key per power-of-two denomination, derived
//! from the mint seed over a hardened BIP-32 path so that a given
//! (seed, unit, version) always reproduces the same keys.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::Error;
use crate::key::{PublicKey, SecretKey};
use crate::proof::Proofs;
use crate::SECP256K1;

/// Number of power-of-two denominations in a freshly derived keyset.
pub const MAX_ORDER: u8 = 64;

/// Currency unit a keyset signs for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Sat,
    Msat,
    Usd,
}

impl Unit {
    /// Hardened child index used in the derivation path.
    pub fn derivation_index(self) -> u32 {
        match self {
            Unit::Sat => 0,
            Unit::Msat => 1,
            Unit::Usd => 2,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::Sat => write!(f, "sat"),
            Unit::Msat => write!(f, "msat"),
            Unit::Usd => write!(f, "usd"),
        }
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sat" => Ok(Unit::Sat),
            "msat" => Ok(Unit::Msat),
            "usd" => Ok(Unit::Usd),
            other => Err(Error::UnitNotSupported(other.to_string())),
        }
    }
}

/// Keyset identifier: a version prefix followed by the hex digest of
/// the keyset commitment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let version_ok = s.starts_with("00") || s.starts_with("01");
        let hex_ok = s.chars().all(|c| c.is_ascii_hexdigit());
        if !version_ok || !hex_ok || s.len() < 16 {
            return Err(Error::InvalidKeysetId(s.to_string()));
        }
        Ok(Id(s.to_string()))
    }
}

/// Public keys of a keyset, one per denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Keys(BTreeMap<Amount, PublicKey>);

impl Keys {
    pub fn new(keys: BTreeMap<Amount, PublicKey>) -> Self {
        Keys(keys)
    }

    pub fn get(&self, amount: Amount) -> Option<&PublicKey> {
        self.0.get(&amount)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Amount, &PublicKey)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Public view of a keyset, as served to wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyset {
    pub id: Id,
    pub unit: Unit,
    pub active: bool,
    pub input_fee_ppk: u64,
    pub keys: Keys,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_expiry: Option<u64>,
}

/// One signing key of a mint keyset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintKeypair {
    pub amount: Amount,
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

/// Private half of a keyset, held by the mint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintKeyset {
    pub id: Id,
    pub unit: Unit,
    pub active: bool,
    /// Bumped on every rotation; part of the derivation path.
    pub version: u32,
    pub input_fee_ppk: u64,
    pub final_expiry: Option<u64>,
    pub keys: BTreeMap<Amount, MintKeypair>,
}

impl MintKeyset {
    pub fn public_keys(&self) -> Keys {
        Keys(self
            .keys
            .iter()
            .map(|(amount, pair)| (*amount, pair.public_key))
            .collect())
    }

    pub fn to_public(&self) -> Keyset {
        Keyset {
            id: self.id.clone(),
            unit: self.unit,
            active: self.active,
            input_fee_ppk: self.input_fee_ppk,
            keys: self.public_keys(),
            final_expiry: self.final_expiry,
        }
    }
}

/// Commitment preimage: `amount:pubkey,...` sorted by amount, followed
/// by the unit, fee and optional expiry fields.
fn id_preimage(
    keys: &BTreeMap<Amount, PublicKey>,
    unit: Unit,
    input_fee_ppk: u64,
    final_expiry: Option<u64>,
) -> String {
    let mut preimage = keys
        .iter()
        .map(|(amount, key)| format!("{}:{}", amount, key.to_hex()))
        .collect::<Vec<_>>()
        .join(",");

    preimage.push_str(&format!("|unit:{unit}"));
    if input_fee_ppk > 0 {
        preimage.push_str(&format!("|input_fee_ppk:{input_fee_ppk}"));
    }
    if let Some(expiry) = final_expiry {
        preimage.push_str(&format!("|final_expiry:{expiry}"));
    }
    preimage
}

/// Derives the v2 keyset id from the public keys and keyset metadata.
pub fn derive_keyset_id(
    keys: &Keys,
    unit: Unit,
    input_fee_ppk: u64,
    final_expiry: Option<u64>,
) -> Id {
    let preimage = id_preimage(&keys.0, unit, input_fee_ppk, final_expiry);
    let digest = sha256::Hash::hash(preimage.as_bytes());
    Id(format!("01{}", hex::encode(digest.to_byte_array())))
}

/// Derives a full keyset from the mint seed.
///
/// Path is `m/0'/unit'/version'` for the keyset, then one hardened
/// child per denomination index. Deterministic: the same inputs always
/// yield the same keys and id.
pub fn derive_keyset(
    seed: &[u8],
    unit: Unit,
    version: u32,
    max_order: u8,
    input_fee_ppk: u64,
    final_expiry: Option<u64>,
) -> Result<MintKeyset, Error> {
    let master = Xpriv::new_master(Network::Bitcoin, seed)?;
    let path = [
        ChildNumber::from_hardened_idx(0)?,
        ChildNumber::from_hardened_idx(unit.derivation_index())?,
        ChildNumber::from_hardened_idx(version)?,
    ];
    let version_key = master.derive_priv(&SECP256K1, &path)?;

    let mut keys = BTreeMap::new();
    for index in 0..max_order {
        let amount = Amount::from(1u64 << index);
        let child =
            version_key.derive_priv(&SECP256K1, &[ChildNumber::from_hardened_idx(index as u32)?])?;
        let secret_key: SecretKey = child.private_key.into();
        let public_key = secret_key.public_key();
        keys.insert(
            amount,
            MintKeypair {
                amount,
                secret_key,
                public_key,
            },
        );
    }

    let public: BTreeMap<Amount, PublicKey> =
        keys.iter().map(|(a, pair)| (*a, pair.public_key)).collect();
    let id = derive_keyset_id(&Keys(public), unit, input_fee_ppk, final_expiry);

    Ok(MintKeyset {
        id,
        unit,
        active: true,
        version,
        input_fee_ppk,
        final_expiry,
        keys,
    })
}

/// Total input fee for a set of proofs, rounded up to the next whole
/// unit: `ceil(sum(input_fee_ppk) / 1000)`.
pub fn fees(proofs: &Proofs, fee_ppk_by_keyset: &BTreeMap<Id, u64>) -> Result<Amount, Error> {
    let mut fee_ppk: u64 = 0;
    for proof in proofs {
        let ppk = fee_ppk_by_keyset
            .get(&proof.keyset_id)
            .ok_or(Error::UnknownKeyset)?;
        fee_ppk = fee_ppk.checked_add(*ppk).ok_or(Error::AmountOverflow)?;
    }
    Ok(Amount::from((fee_ppk + 999) / 1000))
}
