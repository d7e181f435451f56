//! Wallet-side helpers shared by the integration tests.

use std::sync::Arc;

use cashu_core::keyset::{Keyset, Unit};
use cashu_core::payload::{MintQuoteRequest, MintRequest};
use cashu_core::proof::{BlindSignature, BlindedMessage, Proof};
use cashu_core::{dhke, Amount, Proofs, SecretKey};
use cashu_mint::config::MintConfig;
use cashu_mint::database::memory::MemoryDatabase;
use cashu_mint::lightning::fake::FakeWallet;
use cashu_mint::mint::Mint;

/// A blinded message together with the wallet-side data needed to
/// unblind its signature.
pub struct PendingOutput {
    pub secret: String,
    pub blinding: SecretKey,
    pub message: BlindedMessage,
}

pub async fn new_mint() -> (Arc<Mint>, Arc<FakeWallet>) {
    let wallet = Arc::new(FakeWallet::new());
    let mint = Mint::new(
        b"integration test seed".to_vec(),
        &[(Unit::Sat, 0)],
        MintConfig::default(),
        Arc::new(MemoryDatabase::new()),
        wallet.clone(),
    )
    .await
    .unwrap();
    (Arc::new(mint), wallet)
}

/// Fresh blinded messages over random 64-char hex secrets.
pub fn blind_outputs(keyset: &Keyset, amounts: &[u64]) -> Vec<PendingOutput> {
    amounts
        .iter()
        .map(|&amount| {
            let secret = hex::encode(rand::random::<[u8; 32]>());
            let (blinded_point, blinding) = dhke::blind_message(secret.as_bytes(), None).unwrap();
            PendingOutput {
                secret,
                blinding,
                message: BlindedMessage {
                    amount: Amount::from(amount),
                    keyset_id: keyset.id.clone(),
                    blinded_point,
                },
            }
        })
        .collect()
}

pub fn messages(outputs: &[PendingOutput]) -> Vec<BlindedMessage> {
    outputs.iter().map(|o| o.message.clone()).collect()
}

pub fn unblind_all(
    keyset: &Keyset,
    outputs: &[PendingOutput],
    signatures: &[BlindSignature],
) -> Proofs {
    outputs
        .iter()
        .zip(signatures)
        .map(|(output, signature)| {
            let mint_pubkey = keyset.keys.get(signature.amount).unwrap();
            let c =
                dhke::unblind_signature(&signature.blinded_signature, &output.blinding, mint_pubkey)
                    .unwrap();
            Proof {
                amount: signature.amount,
                keyset_id: signature.keyset_id.clone(),
                secret: output.secret.clone(),
                c,
                witness: None,
            }
        })
        .collect()
}

/// Full wallet flow: quote, (instantly settled) payment, issuance.
pub async fn mint_proofs(mint: &Mint, amounts: &[u64]) -> Proofs {
    let total: u64 = amounts.iter().sum();
    let quote = mint
        .request_mint_quote(MintQuoteRequest {
            amount: Amount::from(total),
            unit: Unit::Sat,
        })
        .await
        .unwrap();

    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, amounts);
    let signatures = mint
        .issue(MintRequest {
            quote: quote.quote,
            outputs: messages(&outputs),
        })
        .await
        .unwrap();

    unblind_all(&keyset, &outputs, &signatures)
}
