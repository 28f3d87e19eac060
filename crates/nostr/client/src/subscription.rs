//! Per-subscription bookkeeping for the client dispatcher.
//!
//! The registry is owned by exactly one task, so it is plain mutable state
//! with no locking.

use crate::error::ClientError;
use spore::{Event, EventError};
use std::collections::hash_map::Entry as MapEntry;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot};

/// Result handed to a waiting collect.
pub type CollectResult = std::result::Result<Vec<Event>, ClientError>;

enum Delivery {
    /// Resolve once with everything gathered up to end-of-stored-events.
    Collect(oneshot::Sender<CollectResult>),
    /// Forward every new event as it arrives.
    Stream(mpsc::UnboundedSender<Event>),
}

struct Entry {
    seen: HashSet<String>,
    events: Vec<Event>,
    delivery: Delivery,
    /// Relays that sent end-of-stored-events; repeats from one relay count once.
    eose_from: HashSet<String>,
    expected_eose: Option<usize>,
}

impl Entry {
    fn new(delivery: Delivery) -> Self {
        Self {
            seen: HashSet::new(),
            events: Vec::new(),
            delivery,
            eose_from: HashSet::new(),
            expected_eose: None,
        }
    }

    fn collect_complete(&self) -> bool {
        matches!(self.delivery, Delivery::Collect(_))
            && self
                .expected_eose
                .is_some_and(|expected| self.eose_from.len() >= expected)
    }
}

/// What happened to an inbound event.
#[derive(Debug)]
pub enum EventOutcome {
    Delivered,
    Duplicate,
    /// No open subscription has this id (never opened, or already closed).
    UnknownSubscription,
    /// The event failed id or signature checks and was dropped.
    Rejected(EventError),
    /// The stream's receiver is gone; the subscription was dropped.
    ReceiverClosed,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, Entry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `InvalidSubscriptionId` if `id` is already open.
    pub fn register_collect(
        &mut self,
        id: String,
        reply: oneshot::Sender<CollectResult>,
    ) -> Result<(), ClientError> {
        self.register(id, Delivery::Collect(reply))
    }

    /// Fails with `InvalidSubscriptionId` if `id` is already open.
    pub fn register_stream(
        &mut self,
        id: String,
        sender: mpsc::UnboundedSender<Event>,
    ) -> Result<(), ClientError> {
        self.register(id, Delivery::Stream(sender))
    }

    fn register(&mut self, id: String, delivery: Delivery) -> Result<(), ClientError> {
        match self.entries.entry(id) {
            MapEntry::Occupied(open) => Err(ClientError::InvalidSubscriptionId(open.key().clone())),
            MapEntry::Vacant(slot) => {
                slot.insert(Entry::new(delivery));
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget a subscription. Late events for it are ignored afterwards.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Record how many relays the request went out to. A collect resolves
    /// once that many relays have sent end-of-stored-events.
    pub fn expect_eose(&mut self, id: &str, relays: usize) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.expected_eose = Some(relays);
        }
        self.complete_if_ready(id);
    }

    pub fn handle_event(&mut self, id: &str, event: Event) -> EventOutcome {
        let Some(entry) = self.entries.get_mut(id) else {
            return EventOutcome::UnknownSubscription;
        };
        if entry.seen.contains(&event.id) {
            return EventOutcome::Duplicate;
        }
        if let Err(error) = event.validate() {
            return EventOutcome::Rejected(error);
        }
        entry.seen.insert(event.id.clone());

        let delivered = match &entry.delivery {
            Delivery::Collect(_) => {
                entry.events.push(event);
                true
            }
            Delivery::Stream(sender) => sender.send(event).is_ok(),
        };
        if delivered {
            EventOutcome::Delivered
        } else {
            self.entries.remove(id);
            EventOutcome::ReceiverClosed
        }
    }

    /// Record an end-of-stored-events notice from `relay_url`. Returns true
    /// when this completed a pending collect.
    pub fn handle_eose(&mut self, id: &str, relay_url: &str) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        if !entry.eose_from.insert(relay_url.to_string()) {
            return false;
        }
        self.complete_if_ready(id)
    }

    /// Resolve a pending collect now, typically on timeout. Returns what was
    /// gathered if at least one relay finished, otherwise a timeout error.
    pub fn finish(&mut self, id: &str) {
        let Some(entry) = self.entries.remove(id) else {
            return;
        };
        if let Delivery::Collect(reply) = entry.delivery {
            let result = if !entry.eose_from.is_empty() {
                Ok(entry.events)
            } else {
                Err(ClientError::Timeout(format!(
                    "no relay finished sending stored events for {id}"
                )))
            };
            let _ = reply.send(result);
        }
    }

    fn complete_if_ready(&mut self, id: &str) -> bool {
        let ready = self.entries.get(id).is_some_and(Entry::collect_complete);
        if !ready {
            return false;
        }
        if let Some(Entry {
            delivery: Delivery::Collect(reply),
            events,
            ..
        }) = self.entries.remove(id)
        {
            let _ = reply.send(Ok(events));
        }
        true
    }
}
