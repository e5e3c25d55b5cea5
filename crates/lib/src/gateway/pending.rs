//! Correlation table: pending reply slots keyed by transaction id.
//!
//! A slot is registered before its request is written and removed when the waiting caller is
//! done with it. Each slot carries a "used" flag: once its final reply has been delivered, any
//! further frame with the same transaction belongs to the handle's event queue instead.

use crate::gateway::protocol::Message;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// How a request is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyPhase {
    /// The first reply is final.
    Single,
    /// An `ack` arrives first and is provisional; the final reply follows under the same transaction.
    Two,
}

/// A message delivered into a slot.
#[derive(Debug)]
pub(crate) enum Reply {
    Provisional(Message),
    Final(Message),
}

struct Slot {
    tx: mpsc::Sender<Reply>,
    phase: ReplyPhase,
    used: bool,
}

/// Where an inbound message with a transaction goes.
pub(crate) enum Route {
    Slot(mpsc::Sender<Reply>, Reply),
    Events(Message),
}

#[derive(Default)]
pub(crate) struct PendingTable {
    slots: HashMap<String, Slot>,
}

impl PendingTable {
    /// Register a slot under a fresh transaction id that is unique among pending requests.
    pub fn register(&mut self, phase: ReplyPhase) -> (String, mpsc::Receiver<Reply>) {
        let transaction = loop {
            let candidate = uuid::Uuid::new_v4().simple().to_string();
            if !self.slots.contains_key(&candidate) {
                break candidate;
            }
        };
        // Room for a provisional ack plus the final reply.
        let (tx, rx) = mpsc::channel(2);
        self.slots.insert(
            transaction.clone(),
            Slot {
                tx,
                phase,
                used: false,
            },
        );
        (transaction, rx)
    }

    pub fn remove(&mut self, transaction: &str) -> bool {
        self.slots.remove(transaction).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub fn is_used(&self, transaction: &str) -> Option<bool> {
        self.slots.get(transaction).map(|s| s.used)
    }

    /// Drop every slot; their waiters observe a closed channel.
    pub fn clear(&mut self) -> usize {
        let n = self.slots.len();
        self.slots.clear();
        n
    }

    /// Classify a message carrying `transaction`.
    ///
    /// Unknown or used transactions go to the event queues. An event-class message (and any
    /// other final reply) marks the slot used; an `ack` on a two-phase slot is provisional.
    pub fn route(&mut self, transaction: &str, message: Message) -> Route {
        match self.slots.get_mut(transaction) {
            Some(slot) if !slot.used => {
                let provisional =
                    slot.phase == ReplyPhase::Two && matches!(message, Message::Ack(_));
                if message.is_event() || !provisional {
                    slot.used = true;
                }
                let reply = if provisional {
                    Reply::Provisional(message)
                } else {
                    Reply::Final(message)
                };
                Route::Slot(slot.tx.clone(), reply)
            }
            _ => Route::Events(message),
        }
    }
}
