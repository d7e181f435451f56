//! Issuance, swap and ledger-state integration tests.

mod common;

use std::sync::Arc;

use cashu_core::keyset::Unit;
use cashu_core::payload::{
    CheckStateRequest, MintQuoteRequest, MintRequest, RestoreRequest, SwapRequest,
};
use cashu_core::proof::{self, ProofState};
use cashu_core::{Amount, QuoteState};
use cashu_mint::error::MintError;
use cashu_mint::lightning::PaymentStatus;

use common::{blind_outputs, messages, mint_proofs, new_mint, unblind_all};

#[tokio::test]
async fn mint_quote_pays_out_exactly_once() {
    let (mint, _wallet) = new_mint().await;

    let quote = mint
        .request_mint_quote(MintQuoteRequest {
            amount: Amount::from(12),
            unit: Unit::Sat,
        })
        .await
        .unwrap();

    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[8, 4]);
    let request = MintRequest {
        quote: quote.quote.clone(),
        outputs: messages(&outputs),
    };

    let signatures = mint.issue(request.clone()).await.unwrap();
    assert_eq!(signatures.len(), 2);

    // the quote latched, a replay yields nothing
    let err = mint.issue(request).await.unwrap_err();
    assert!(matches!(err, MintError::AlreadyIssued));
}

#[tokio::test]
async fn mint_quote_follows_the_incoming_payment() {
    let (mint, wallet) = new_mint().await;

    let quote = mint
        .request_mint_quote(MintQuoteRequest {
            amount: Amount::from(8),
            unit: Unit::Sat,
        })
        .await
        .unwrap();
    assert_eq!(quote.state, QuoteState::Unpaid);

    // payment in flight
    wallet.set_received_status(&quote.checking_id, PaymentStatus::Pending);
    let state = mint.check_mint_quote_state(&quote.quote).await.unwrap();
    assert_eq!(state.state, QuoteState::Pending);

    // a pending quote cannot be issued against yet
    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[8]);
    let err = mint
        .issue(MintRequest {
            quote: quote.quote.clone(),
            outputs: messages(&outputs),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MintError::RequestNotPaid));

    // the in-flight payment dies: back to unpaid
    wallet.set_received_status(&quote.checking_id, PaymentStatus::Failed);
    let state = mint.check_mint_quote_state(&quote.quote).await.unwrap();
    assert_eq!(state.state, QuoteState::Unpaid);

    // paid at last
    wallet.set_received_status(&quote.checking_id, PaymentStatus::Settled);
    let state = mint.check_mint_quote_state(&quote.quote).await.unwrap();
    assert_eq!(state.state, QuoteState::Paid);
    mint.issue(MintRequest {
        quote: quote.quote,
        outputs: messages(&outputs),
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn issue_rejects_amount_mismatch() {
    let (mint, _wallet) = new_mint().await;

    let quote = mint
        .request_mint_quote(MintQuoteRequest {
            amount: Amount::from(12),
            unit: Unit::Sat,
        })
        .await
        .unwrap();

    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[8, 8]);
    let err = mint
        .issue(MintRequest {
            quote: quote.quote,
            outputs: messages(&outputs),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MintError::AmountMismatch));
}

#[tokio::test]
async fn swap_spends_inputs_and_signs_outputs() {
    let (mint, _wallet) = new_mint().await;
    let proofs = mint_proofs(&mint, &[4, 4]).await;

    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[8]);
    let response = mint
        .swap(SwapRequest {
            inputs: proofs.clone(),
            outputs: messages(&outputs),
        })
        .await
        .unwrap();
    let new_proofs = unblind_all(&keyset, &outputs, &response.signatures);
    assert_eq!(proof::total_amount(&new_proofs).unwrap(), Amount::from(8));

    // the old proofs are burned
    let outputs = blind_outputs(&keyset, &[8]);
    let err = mint
        .swap(SwapRequest {
            inputs: proofs,
            outputs: messages(&outputs),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MintError::TokenAlreadySpent));

    // the new ones still spend
    let outputs = blind_outputs(&keyset, &[4, 2, 2]);
    mint.swap(SwapRequest {
        inputs: new_proofs,
        outputs: messages(&outputs),
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn swap_rejects_unbalanced_amounts() {
    let (mint, _wallet) = new_mint().await;
    let proofs = mint_proofs(&mint, &[8]).await;

    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[4]);
    let err = mint
        .swap(SwapRequest {
            inputs: proofs,
            outputs: messages(&outputs),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, MintError::TransactionNotBalanced));
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_double_spend_succeeds_exactly_once() {
    let (mint, _wallet) = new_mint().await;
    let proofs = mint_proofs(&mint, &[16]).await;
    let keyset = mint.active_keyset(Unit::Sat).unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let mint = Arc::clone(&mint);
        let inputs = proofs.clone();
        let outputs = blind_outputs(&keyset, &[16]);
        handles.push(tokio::spawn(async move {
            mint.swap(SwapRequest {
                inputs,
                outputs: messages(&outputs),
            })
            .await
        }));
    }

    let mut won = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(MintError::AlreadyInUse | MintError::TokenAlreadySpent) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test]
async fn check_state_tracks_the_proof_lifecycle() {
    let (mint, _wallet) = new_mint().await;
    let proofs = mint_proofs(&mint, &[4]).await;
    let ys = proof::ys(&proofs).unwrap();

    let response = mint
        .check_state(CheckStateRequest { ys: ys.clone() })
        .await
        .unwrap();
    assert_eq!(response.states[0].state, ProofState::Unspent);

    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[4]);
    mint.swap(SwapRequest {
        inputs: proofs,
        outputs: messages(&outputs),
    })
    .await
    .unwrap();

    let response = mint.check_state(CheckStateRequest { ys }).await.unwrap();
    assert_eq!(response.states[0].state, ProofState::Spent);
}

#[tokio::test]
async fn restore_replays_issued_signatures() {
    let (mint, _wallet) = new_mint().await;

    let quote = mint
        .request_mint_quote(MintQuoteRequest {
            amount: Amount::from(8),
            unit: Unit::Sat,
        })
        .await
        .unwrap();
    let keyset = mint.active_keyset(Unit::Sat).unwrap();
    let outputs = blind_outputs(&keyset, &[8]);
    let signatures = mint
        .issue(MintRequest {
            quote: quote.quote,
            outputs: messages(&outputs),
        })
        .await
        .unwrap();

    // ask for the known output plus one the mint never saw
    let mut asked = messages(&outputs);
    asked.extend(messages(&blind_outputs(&keyset, &[8])));
    let response = mint
        .restore(RestoreRequest { outputs: asked })
        .await
        .unwrap();

    assert_eq!(response.outputs.len(), 1);
    assert_eq!(response.outputs[0], outputs[0].message);
    assert_eq!(response.signatures, signatures);
}
