//! Event fan-out for quote and proof state changes.
//!
//! Delivery is best effort: a slow or gone subscriber never blocks a
//! state transition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use cashu_core::payload::ProofStateEntry;
use cashu_core::{MeltQuote, MintQuote};
use tokio::sync::mpsc;
use tracing::debug;

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MintQuote,
    MeltQuote,
    ProofState,
}

/// A state transition worth telling wallets about.
#[derive(Debug, Clone)]
pub enum Event {
    MintQuoteUpdated(MintQuote),
    MeltQuoteUpdated(MeltQuote),
    ProofStateUpdated(ProofStateEntry),
}

impl Event {
    fn kind(&self) -> EventKind {
        match self {
            Event::MintQuoteUpdated(_) => EventKind::MintQuote,
            Event::MeltQuoteUpdated(_) => EventKind::MeltQuote,
            Event::ProofStateUpdated(_) => EventKind::ProofState,
        }
    }

    /// The identifier a filter matches against: quote id or Y hex.
    fn filter_key(&self) -> String {
        match self {
            Event::MintQuoteUpdated(quote) => quote.quote.clone(),
            Event::MeltQuoteUpdated(quote) => quote.quote.clone(),
            Event::ProofStateUpdated(entry) => entry.y.to_hex(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    kind: EventKind,
    /// `None` subscribes to every event of the kind.
    filter: Option<String>,
    sender: mpsc::Sender<Event>,
}

/// Registry of in-process subscribers.
#[derive(Default)]
pub struct Observer {
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

const CHANNEL_CAPACITY: usize = 64;

impl Observer {
    pub fn subscribe(
        &self,
        kind: EventKind,
        filter: Option<String>,
    ) -> (SubscriptionId, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Subscriber { kind, filter, sender });
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Publishes an event to matching subscribers, dropping it for
    /// any whose channel is full or closed.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let key = event.filter_key();
        let mut gone = Vec::new();

        let subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for (id, subscriber) in subscribers.iter() {
            if subscriber.kind != kind {
                continue;
            }
            if let Some(filter) = &subscriber.filter {
                if *filter != key {
                    continue;
                }
            }
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(?id, "subscriber channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        drop(subscribers);

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            for id in gone {
                subscribers.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashu_core::keyset::Unit;
    use cashu_core::{Amount, QuoteState};

    fn mock_mint_quote(id: &str) -> MintQuote {
        MintQuote {
            quote: id.to_string(),
            request: "lnbc1".to_string(),
            amount: Amount::from(10),
            unit: Unit::Sat,
            state: QuoteState::Paid,
            expiry: u64::MAX,
            checking_id: id.to_string(),
            minted: false,
        }
    }

    #[tokio::test]
    async fn filtered_subscription_only_sees_its_quote() {
        let observer = Observer::default();
        let (_, mut rx) = observer.subscribe(EventKind::MintQuote, Some("a".to_string()));

        observer.publish(Event::MintQuoteUpdated(mock_mint_quote("b")));
        observer.publish(Event::MintQuoteUpdated(mock_mint_quote("a")));

        let event = rx.recv().await.unwrap();
        match event {
            Event::MintQuoteUpdated(quote) => assert_eq!(quote.quote, "a"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let observer = Observer::default();
        let (id, rx) = observer.subscribe(EventKind::MintQuote, None);
        drop(rx);
        observer.publish(Event::MintQuoteUpdated(mock_mint_quote("a")));
        // second publish after pruning must not panic
        observer.publish(Event::MintQuoteUpdated(mock_mint_quote("a")));
        observer.unsubscribe(id);
    }
}
