//! Blind Diffie-Hellman key exchange.
//!
//! The mint signs `C_ = a * B_` without learning the secret behind the
//! blinded point, and later verifies a proof by recomputing
//! `a * hash_to_curve(secret)`. DLEQ proofs let wallets check that the
//! same key `a` was used for every signature.

use bitcoin::hashes::{sha256, Hash};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::key::{PublicKey, SecretKey};

const DOMAIN_SEPARATOR: &[u8] = b"Secp256k1_HashToCurve_Cashu_";

/// Maps a message onto a curve point by hashing with an incrementing
/// counter until the digest is a valid x coordinate.
pub fn hash_to_curve(message: &[u8]) -> Result<PublicKey, Error> {
    let msg_hash = sha256::Hash::hash(&[DOMAIN_SEPARATOR, message].concat());

    let mut candidate = [0u8; 33];
    candidate[0] = 0x02;
    for counter in 0u32..(1 << 16) {
        let digest =
            sha256::Hash::hash(&[msg_hash.as_byte_array().as_slice(), &counter.to_le_bytes()].concat());
        candidate[1..].copy_from_slice(digest.as_byte_array());
        if let Ok(point) = PublicKey::from_slice(&candidate) {
            return Ok(point);
        }
    }
    Err(Error::NoValidPoint)
}

/// Wallet side: `B_ = hash_to_curve(secret) + r*G`. Returns the blinded
/// point together with the blinding factor.
pub fn blind_message(secret: &[u8], blinding_factor: Option<SecretKey>) -> Result<(PublicKey, SecretKey), Error> {
    let y = hash_to_curve(secret)?;
    let r = blinding_factor.unwrap_or_else(SecretKey::generate);
    let b_prime = y.combine(&r.public_key())?;
    Ok((b_prime, r))
}

/// Mint side: `C_ = a * B_`.
pub fn sign_blinded(signing_key: &SecretKey, blinded_point: &PublicKey) -> Result<PublicKey, Error> {
    blinded_point.mul_tweak(&signing_key.as_scalar())
}

/// Wallet side: `C = C_ - r*A`.
pub fn unblind_signature(
    blinded_signature: &PublicKey,
    blinding_factor: &SecretKey,
    mint_pubkey: &PublicKey,
) -> Result<PublicKey, Error> {
    let r_a = mint_pubkey.mul_tweak(&blinding_factor.as_scalar())?.negate();
    blinded_signature.combine(&r_a)
}

/// Mint side: a proof is valid iff `C == a * hash_to_curve(secret)`.
pub fn verify(signing_key: &SecretKey, secret: &[u8], c: &PublicKey) -> Result<bool, Error> {
    let y = hash_to_curve(secret)?;
    Ok(y.mul_tweak(&signing_key.as_scalar())? == *c)
}

/// Challenge hash over the uncompressed hex forms of the given points.
pub fn hash_e(public_keys: &[PublicKey]) -> [u8; 32] {
    let mut preimage = String::new();
    for key in public_keys {
        preimage.push_str(&hex::encode(key.to_uncompressed_bytes()));
    }
    sha256::Hash::hash(preimage.as_bytes()).to_byte_array()
}

/// Discrete-log equality proof attached to a blind signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dleq {
    pub e: SecretKey,
    pub s: SecretKey,
}

/// Proves `C_ = a * B_` against `A = a * G` without revealing `a`.
pub fn generate_dleq(signing_key: &SecretKey, blinded_point: &PublicKey) -> Result<Dleq, Error> {
    generate_dleq_with_nonce(signing_key, blinded_point, SecretKey::generate())
}

fn generate_dleq_with_nonce(
    signing_key: &SecretKey,
    blinded_point: &PublicKey,
    nonce: SecretKey,
) -> Result<Dleq, Error> {
    let r1 = nonce.public_key();
    let r2 = blinded_point.mul_tweak(&nonce.as_scalar())?;
    let a_pub = signing_key.public_key();
    let c_prime = blinded_point.mul_tweak(&signing_key.as_scalar())?;

    let e = SecretKey::from_slice(&hash_e(&[r1, r2, a_pub, c_prime]))?;
    // s = r + e*a
    let s = nonce.add_tweak(&e.mul_tweak(&signing_key.as_scalar())?.as_scalar())?;
    Ok(Dleq { e, s })
}

/// Checks a DLEQ proof: recompute `R1 = s*G - e*A` and
/// `R2 = s*B_ - e*C_`, then compare the challenge hash.
pub fn verify_dleq(
    dleq: &Dleq,
    mint_pubkey: &PublicKey,
    blinded_point: &PublicKey,
    blinded_signature: &PublicKey,
) -> Result<(), Error> {
    let e_scalar = dleq.e.as_scalar();
    let r1 = dleq
        .s
        .public_key()
        .combine(&mint_pubkey.mul_tweak(&e_scalar)?.negate())?;
    let r2 = blinded_point
        .mul_tweak(&dleq.s.as_scalar())?
        .combine(&blinded_signature.mul_tweak(&e_scalar)?.negate())?;

    let expected = hash_e(&[r1, r2, *mint_pubkey, *blinded_signature]);
    if expected != dleq.e.to_secret_bytes() {
        return Err(Error::InvalidDleq);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    #[test]
    fn hash_to_curve_vectors() {
        let cases = [
            (
                "0000000000000000000000000000000000000000000000000000000000000000",
                "024cce997d3b518f739663b757deaec95bcd9473c30a14ac2fd04023a739d1a725",
            ),
            (
                "0000000000000000000000000000000000000000000000000000000000000001",
                "022e7158e11c9506f1aa4248bf531298daa7febd6194f003edcd9b93ade6253acf",
            ),
        ];
        for (message, expected) in cases {
            let point = hash_to_curve(&hex::decode(message).unwrap()).unwrap();
            assert_eq!(point.to_hex(), expected);
        }
    }

    #[test]
    fn blind_message_vector() {
        let r = SecretKey::from_hex(ONE).unwrap();
        let (b_prime, _) = blind_message(b"test_message", Some(r)).unwrap();
        assert_eq!(
            b_prime.to_hex(),
            "025cc16fe33b953e2ace39653efb3e7a7049711ae1d8a2f7a9108753f1cdea742b"
        );
    }

    #[test]
    fn sign_blinded_with_unit_key_is_identity() {
        let r = SecretKey::from_hex(ONE).unwrap();
        let (b_prime, _) = blind_message(b"test_message", Some(r)).unwrap();
        let a = SecretKey::from_hex(ONE).unwrap();
        let c_prime = sign_blinded(&a, &b_prime).unwrap();
        assert_eq!(c_prime, b_prime);
    }

    #[test]
    fn unblind_signature_vectors() {
        let cases = [
            (
                "02a9acc1e48c25eeeb9289b5031cc57da9fe72f3fe2861d264bdc074209b107ba2",
                "03c724d7e6a5443b39ac8acf11f40420adc4f99a02e7cc1b57703d9391f6d129cd",
            ),
            (
                "025cc16fe33b953e2ace39653efb3e7a7049711ae1d8a2f7a9108753f1cdea742b",
                "0271bf0d702dbad86cbe0af3ab2bfba70a0338f22728e412d88a830ed0580b9de4",
            ),
        ];
        let mint_pubkey = PublicKey::from_hex(
            "020000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let r = SecretKey::from_hex(ONE).unwrap();
        for (c_prime_hex, expected) in cases {
            let c_prime = PublicKey::from_hex(c_prime_hex).unwrap();
            let c = unblind_signature(&c_prime, &r, &mint_pubkey).unwrap();
            assert_eq!(c.to_hex(), expected);
        }
    }

    #[test]
    fn full_round_verifies() {
        let secret = b"test_message";
        let (b_prime, r) = blind_message(secret, None).unwrap();

        let a = SecretKey::generate();
        let c_prime = sign_blinded(&a, &b_prime).unwrap();
        let c = unblind_signature(&c_prime, &r, &a.public_key()).unwrap();

        assert!(verify(&a, secret, &c).unwrap());
        assert!(!verify(&a, b"another_message", &c).unwrap());
        let wrong_key = SecretKey::generate();
        assert!(!verify(&wrong_key, secret, &c).unwrap());
    }

    #[test]
    fn hash_e_vector() {
        let small = PublicKey::from_hex(
            "020000000000000000000000000000000000000000000000000000000000000001",
        )
        .unwrap();
        let c_prime = PublicKey::from_hex(
            "02a9acc1e48c25eeeb9289b5031cc57da9fe72f3fe2861d264bdc074209b107ba2",
        )
        .unwrap();
        let digest = hash_e(&[small, small, small, c_prime]);
        assert_eq!(
            hex::encode(digest),
            "a4dc034b74338c28c6bc3ea49731f2a24440fc7c4affc08b31a93fc9fbe6401e"
        );
    }

    #[test]
    fn dleq_round_trip() {
        let a = SecretKey::generate();
        let (b_prime, _) = blind_message(b"dleq check", None).unwrap();
        let c_prime = sign_blinded(&a, &b_prime).unwrap();

        let dleq = generate_dleq(&a, &b_prime).unwrap();
        verify_dleq(&dleq, &a.public_key(), &b_prime, &c_prime).unwrap();

        // wrong signature point must fail
        let other = sign_blinded(&SecretKey::generate(), &b_prime).unwrap();
        assert!(verify_dleq(&dleq, &a.public_key(), &b_prime, &other).is_err());
    }
}
