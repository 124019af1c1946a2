//! Contact list state and the unread aggregate.
//!
//! One owner holds the contact collection; every mutation flows through
//! [`ContactList::apply`] so concurrent subscribers (the global unread
//! badge, an open contact screen) never race on independent copies. After
//! each mutation the list publishes a fresh [`ContactListSnapshot`] through
//! a watch channel, with the total unread count recomputed as the sum over
//! contacts.
//!
//! Unread clearing is optimistic: the local zero happens before the
//! server-side mark-as-read, and [`ContactList::restore_unread`] reverts it
//! if the server call fails.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::protocol::{ChatMessage, Contact};

/// A mutation of the contact collection.
#[derive(Debug, Clone)]
pub enum ContactEvent {
    /// Replace the collection with a freshly fetched list.
    Loaded(Vec<Contact>),
    /// A message arrived over the socket; bump the sender's unread count
    /// and last-message summary.
    MessageArrived {
        /// Sender user id
        sender_id: String,
        /// The message record
        message: ChatMessage,
    },
    /// Zero a contact's unread count (optimistic, pre-server).
    UnreadCleared {
        /// Contact user id
        contact_id: String,
    },
    /// Add a previously cleared count back after a failed server call.
    UnreadRestored {
        /// Contact user id
        contact_id: String,
        /// The count that was cleared
        count: u32,
    },
}

/// Immutable view of the contact collection.
#[derive(Debug, Clone, Default)]
pub struct ContactListSnapshot {
    /// Contacts in server order
    pub contacts: Vec<Contact>,
    /// Sum of all contacts' unread counts
    pub total_unread: u32,
}

/// Single owner of contact state. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ContactList {
    contacts: Arc<RwLock<Vec<Contact>>>,
    snapshot_tx: Arc<watch::Sender<ContactListSnapshot>>,
}

impl Default for ContactList {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactList {
    /// Create an empty contact list.
    pub fn new() -> Self {
        let (snapshot_tx, _snapshot_rx) = watch::channel(ContactListSnapshot::default());
        Self {
            contacts: Arc::new(RwLock::new(Vec::new())),
            snapshot_tx: Arc::new(snapshot_tx),
        }
    }

    /// Apply a mutation and publish the resulting snapshot.
    pub fn apply(&self, event: ContactEvent) {
        let mut contacts = self.contacts.write();
        match event {
            ContactEvent::Loaded(list) => {
                *contacts = list;
            }
            ContactEvent::MessageArrived { sender_id, message } => {
                match contacts.iter_mut().find(|c| c.id == sender_id) {
                    Some(contact) => {
                        if !message.is_read {
                            contact.unread_count += 1;
                        }
                        contact.last_message = Some(message);
                    }
                    None => {
                        tracing::debug!(
                            sender = sender_id.as_str(),
                            "Message from a user not in the contact list; refresh required"
                        );
                    }
                }
            }
            ContactEvent::UnreadCleared { contact_id } => {
                if let Some(contact) = contacts.iter_mut().find(|c| c.id == contact_id) {
                    contact.unread_count = 0;
                }
            }
            ContactEvent::UnreadRestored { contact_id, count } => {
                if let Some(contact) = contacts.iter_mut().find(|c| c.id == contact_id) {
                    contact.unread_count += count;
                }
            }
        }
        self.publish(&contacts);
    }

    /// Zero a contact's unread count, returning the value it had so a
    /// failed server call can restore it.
    pub fn clear_unread(&self, contact_id: &str) -> u32 {
        let mut contacts = self.contacts.write();
        let mut previous = 0;
        if let Some(contact) = contacts.iter_mut().find(|c| c.id == contact_id) {
            previous = contact.unread_count;
            contact.unread_count = 0;
        }
        self.publish(&contacts);
        previous
    }

    /// Revert an optimistic clear after the server call failed.
    pub fn restore_unread(&self, contact_id: &str, count: u32) {
        self.apply(ContactEvent::UnreadRestored {
            contact_id: contact_id.to_string(),
            count,
        });
    }

    /// Current contacts, in server order.
    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().clone()
    }

    /// Sum of all contacts' unread counts.
    pub fn total_unread(&self) -> u32 {
        self.contacts.read().iter().map(|c| c.unread_count).sum()
    }

    /// Watch snapshot changes (drives the unread badge and contact screen).
    pub fn subscribe(&self) -> watch::Receiver<ContactListSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self, contacts: &[Contact]) {
        let snapshot = ContactListSnapshot {
            contacts: contacts.to_vec(),
            total_unread: contacts.iter().map(|c| c.unread_count).sum(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}
