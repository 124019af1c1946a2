//! Top-level chat service.
//!
//! [`ChatService`] is the application-root owner of the chat subsystem:
//! the one [`ConnectionManager`], the REST client, and the contact list.
//! The host application constructs it once and injects it into whatever
//! renders chat; there is no ambient global.
//!
//! Auth lifecycle: [`ChatService::set_authenticated`] connects the socket
//! after a short debounce (rapid auth-state flicker must not cause connect
//! storms) and disconnects on sign-out. Auto-connect failures are logged,
//! never alerted; reconnect noise is not a user-facing error.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::auth::SessionProvider;
use crate::config::ChatConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::contacts::{ContactEvent, ContactList};
use crate::conversation::Conversation;
use crate::error::{Error, Result};
use crate::history::ChatHistoryClient;
use crate::protocol::{ClientFrame, FrameKind, ServerFrame};

/// Owns the chat subsystem for the lifetime of the application.
pub struct ChatService {
    config: ChatConfig,
    connection: ConnectionManager,
    history: ChatHistoryClient,
    contacts: ContactList,
    /// The authenticated user, mirrored from the host's auth state
    user_id: Mutex<Option<String>>,
    /// Pending debounced auto-connect, aborted by newer auth events
    pending_connect: Mutex<Option<JoinHandle<()>>>,
    /// Keeps contact summaries fresh while no conversation is open
    _unread_listener: crate::dispatch::HandlerGuard,
}

impl ChatService {
    /// Build the service against the configured backend, with credentials
    /// supplied by the host's session provider.
    pub fn new(config: ChatConfig, session: Arc<dyn SessionProvider>) -> Self {
        let connection = ConnectionManager::new(config.clone());
        let history = ChatHistoryClient::new(config.clone(), session);
        let contacts = ContactList::new();

        // Global unread-badge listener: every inbound chat frame updates
        // the sender's contact card, whether or not that conversation is
        // open anywhere.
        let unread_listener = {
            let contacts = contacts.clone();
            connection.dispatcher().register(
                FrameKind::Chat,
                Arc::new(move |frame: &ServerFrame| {
                    let ServerFrame::Chat { message } = frame else {
                        return;
                    };
                    let Some(sender) = message.sender_id.clone() else {
                        return;
                    };
                    contacts.apply(ContactEvent::MessageArrived {
                        sender_id: sender,
                        message: message.clone(),
                    });
                }),
            )
        };

        Self {
            config,
            connection,
            history,
            contacts,
            user_id: Mutex::new(None),
            pending_connect: Mutex::new(None),
            _unread_listener: unread_listener,
        }
    }

    /// The shared connection manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// The chat history REST client.
    pub fn history(&self) -> &ChatHistoryClient {
        &self.history
    }

    /// The contact list state container.
    pub fn contacts(&self) -> &ContactList {
        &self.contacts
    }

    /// Current socket readiness, for the ambient status indicator.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Sum of unread counts across all contacts.
    pub fn total_unread(&self) -> u32 {
        self.contacts.total_unread()
    }

    /// Mirror the host's auth state into the connection lifecycle.
    ///
    /// `Some(user_id)` schedules a debounced connect; a newer call aborts
    /// the pending one, so auth-state flicker collapses into one attempt.
    /// `None` cancels anything pending and disconnects immediately.
    pub fn set_authenticated(&self, user_id: Option<&str>) {
        if let Some(pending) = self.pending_connect.lock().take() {
            pending.abort();
        }

        match user_id {
            Some(uid) => {
                *self.user_id.lock() = Some(uid.to_string());

                let connection = self.connection.clone();
                let uid = uid.to_string();
                let debounce = self.config.connect_debounce;
                let task = tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    if let Err(e) = connection.connect(&uid).await {
                        // Background connects never alert the user.
                        tracing::warn!(user = uid.as_str(), error = %e, "Chat auto-connect failed");
                    }
                });
                *self.pending_connect.lock() = Some(task);
            }
            None => {
                *self.user_id.lock() = None;
                self.connection.disconnect();
            }
        }
    }

    /// Refresh the contact list from the server.
    pub async fn refresh_contacts(&self) -> Result<()> {
        let contacts = self.history.get_contacts().await?;
        self.contacts.apply(ContactEvent::Loaded(contacts));
        Ok(())
    }

    /// Open a conversation with a partner.
    ///
    /// Loads the newest history page, registers the conversation's frame
    /// handlers, and settles the partner's unread count (optimistically
    /// local first, then server-side; a server failure reverts the local
    /// zero and is only logged here).
    pub async fn open_conversation(&self, partner_id: &str) -> Result<Conversation> {
        let user_id = self
            .user_id
            .lock()
            .clone()
            .ok_or(Error::AuthenticationRequired)?;

        let conversation = Conversation::open(
            partner_id,
            user_id,
            self.connection.clone(),
            self.history.clone(),
        )
        .await?;

        if let Err(e) = self.dismiss_contact(partner_id).await {
            tracing::warn!(
                partner = partner_id,
                error = %e,
                "Mark-as-read after opening a conversation failed"
            );
        }

        Ok(conversation)
    }

    /// Zero a contact's unread count and mark its messages read server-side.
    ///
    /// The local zero happens first; if the server call fails the cleared
    /// count is restored and the error returned. Returns how many messages
    /// the server updated (0 when there was nothing unread).
    pub async fn dismiss_contact(&self, contact_id: &str) -> Result<u64> {
        let previous = self.contacts.clear_unread(contact_id);
        match self.history.mark_messages_as_read(contact_id).await {
            Ok(updated) => {
                if updated > 0 {
                    self.notify_messages_read(contact_id);
                }
                Ok(updated)
            }
            Err(e) => {
                self.contacts.restore_unread(contact_id, previous);
                Err(e)
            }
        }
    }

    /// Tell the peer over the socket that their messages were read, so
    /// their own read-state reconciles without a refetch.
    fn notify_messages_read(&self, contact_id: &str) {
        let Some(user_id) = self.user_id.lock().clone() else {
            return;
        };
        if !self.connection.is_connected() {
            return;
        }
        let notice = ClientFrame::CheckedUnreadMessages {
            reader_id: user_id,
            message_sender_id: contact_id.to_string(),
        };
        if let Err(e) = self.connection.send_frame(notice) {
            tracing::debug!(error = %e, "Could not notify peer of read messages");
        }
    }

    /// Emit a diagnostic `test` frame; the server ignores it.
    pub fn send_test_frame(&self, payload: Option<serde_json::Value>) -> Result<()> {
        self.connection.send_frame(ClientFrame::Test { payload })
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        if let Some(pending) = self.pending_connect.lock().take() {
            pending.abort();
        }
    }
}
