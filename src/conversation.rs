//! Per-conversation state.
//!
//! A [`Conversation`] bridges the socket and the history API into one
//! UI-observable message list for a single partner:
//!
//! - Opening fetches the newest history page and reverses it into
//!   chronological order; older pages prepend on demand.
//! - Sending is optimistic about the input only: the draft clears as soon
//!   as the frame is transmitted, but the message joins the list when the
//!   server echoes it back as a `chat` frame. There is no offline queue; a
//!   send while disconnected fails and leaves the draft untouched.
//! - Inbound `chat` frames append (partner messages also trigger a
//!   background mark-as-read and an acknowledgment frame), and
//!   `unread_messages_checked` flips every unread message up to the last
//!   unread index, modeling "the peer has seen everything up to here".
//!
//! Handler registrations live exactly as long as the `Conversation` value;
//! dropping it unregisters them, so no stale closure keeps mutating state
//! for a closed screen.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::connection::ConnectionManager;
use crate::dispatch::HandlerGuard;
use crate::error::Result;
use crate::history::ChatHistoryClient;
use crate::protocol::{ChatMessage, ClientFrame, FrameKind, MessagePage, ServerFrame};

/// Mutable conversation state shared with the frame handlers.
struct Buffer {
    /// Messages in chronological order
    messages: Vec<ChatMessage>,
    /// The user's unsent input
    draft: String,
    /// Whether the server may have older pages
    has_more: bool,
    /// Set after a failed page fetch; no further pages are requested
    paging_disabled: bool,
    /// Bumped on every visible change
    revision: u64,
}

/// One open conversation with a partner.
pub struct Conversation {
    partner_id: String,
    connection: ConnectionManager,
    history: ChatHistoryClient,
    buffer: Arc<RwLock<Buffer>>,
    revision_tx: Arc<watch::Sender<u64>>,
    _guards: Vec<HandlerGuard>,
}

impl Conversation {
    /// Open a conversation: register its frame handlers and load the most
    /// recent history page.
    pub async fn open(
        partner_id: impl Into<String>,
        user_id: impl Into<String>,
        connection: ConnectionManager,
        history: ChatHistoryClient,
    ) -> Result<Self> {
        let conversation = Self::attach(partner_id, user_id, connection, history);
        conversation.load_initial().await?;
        Ok(conversation)
    }

    /// Wire up frame handlers without loading history.
    fn attach(
        partner_id: impl Into<String>,
        user_id: impl Into<String>,
        connection: ConnectionManager,
        history: ChatHistoryClient,
    ) -> Self {
        let partner_id = partner_id.into();
        let user_id = user_id.into();

        let buffer = Arc::new(RwLock::new(Buffer {
            messages: Vec::new(),
            draft: String::new(),
            has_more: true,
            paging_disabled: false,
            revision: 0,
        }));
        let (revision_tx, _revision_rx) = watch::channel(0u64);
        let revision_tx = Arc::new(revision_tx);

        let dispatcher = connection.dispatcher().clone();

        let chat_guard = {
            let buffer = Arc::clone(&buffer);
            let revision_tx = Arc::clone(&revision_tx);
            let connection = connection.clone();
            let history = history.clone();
            let partner = partner_id.clone();
            let me = user_id.clone();

            dispatcher.register(
                FrameKind::Chat,
                Arc::new(move |frame: &ServerFrame| {
                    let ServerFrame::Chat { message } = frame else {
                        return;
                    };
                    // Accept the partner's messages and our own echoes
                    // (covers sends from another device of this account).
                    let Some(sender) = message.sender_id.clone() else {
                        return;
                    };
                    if sender != partner && sender != me {
                        return;
                    }

                    {
                        let mut buf = buffer.write();
                        buf.messages.push(message.clone());
                        buf.revision += 1;
                        revision_tx.send_replace(buf.revision);
                    }

                    if sender == partner {
                        // We are looking at the conversation, so the new
                        // message is read immediately. Failures stay in the
                        // logs; the next open reconciles.
                        let history = history.clone();
                        let connection = connection.clone();
                        let partner = partner.clone();
                        let me = me.clone();
                        tokio::spawn(async move {
                            match history.mark_messages_as_read(&partner).await {
                                Ok(updated) => {
                                    tracing::debug!(updated, "Marked partner messages read");
                                    if updated > 0 && connection.is_connected() {
                                        let notice = ClientFrame::CheckedUnreadMessages {
                                            reader_id: me,
                                            message_sender_id: partner,
                                        };
                                        if let Err(e) = connection.send_frame(notice) {
                                            tracing::debug!(error = %e, "Could not notify peer of read messages");
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Background mark-as-read failed");
                                }
                            }
                        });
                    }

                    if connection.is_connected() {
                        let ack = ClientFrame::CheckedReceivedMessage {
                            message_sender_id: sender,
                        };
                        if let Err(e) = connection.send_frame(ack) {
                            tracing::debug!(error = %e, "Could not acknowledge received message");
                        }
                    }
                }),
            )
        };

        let receipt_guard = {
            let buffer = Arc::clone(&buffer);
            let revision_tx = Arc::clone(&revision_tx);
            let partner = partner_id.clone();

            dispatcher.register(
                FrameKind::UnreadMessagesChecked,
                Arc::new(move |frame: &ServerFrame| {
                    let ServerFrame::UnreadMessagesChecked { message } = frame else {
                        return;
                    };
                    if message.reader_id != partner {
                        return;
                    }
                    let mut buf = buffer.write();
                    let flipped = mark_read_prefix(&mut buf.messages);
                    if flipped > 0 {
                        tracing::debug!(flipped, "Partner read receipt applied");
                        buf.revision += 1;
                        revision_tx.send_replace(buf.revision);
                    }
                }),
            )
        };

        Self {
            partner_id,
            connection,
            history,
            buffer,
            revision_tx,
            _guards: vec![chat_guard, receipt_guard],
        }
    }

    /// The partner this conversation is with.
    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }

    /// Messages in chronological order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.buffer.read().messages.clone()
    }

    /// The unsent input text.
    pub fn draft(&self) -> String {
        self.buffer.read().draft.clone()
    }

    /// Replace the unsent input text.
    pub fn set_draft(&self, text: impl Into<String>) {
        let mut buf = self.buffer.write();
        buf.draft = text.into();
        buf.revision += 1;
        self.revision_tx.send_replace(buf.revision);
    }

    /// Whether a "load more" would request anything.
    pub fn has_more_messages(&self) -> bool {
        let buf = self.buffer.read();
        buf.has_more && !buf.paging_disabled
    }

    /// Watch for state changes; the value is a revision counter.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    /// Send the current draft to the partner.
    ///
    /// Requires an open socket: when disconnected this returns
    /// [`Error::NotConnected`](crate::Error::NotConnected) and the draft is
    /// preserved for a retry. On success the draft clears immediately; the
    /// sent message appears in the list once the server echoes it back.
    pub fn send_draft(&self) -> Result<()> {
        let draft = self.buffer.read().draft.clone();
        let text = draft.trim();
        if text.is_empty() {
            return Ok(());
        }

        self.connection.send_frame(ClientFrame::SendMessage {
            recipient_id: self.partner_id.clone(),
            message: text.to_string(),
        })?;

        let mut buf = self.buffer.write();
        buf.draft.clear();
        buf.revision += 1;
        self.revision_tx.send_replace(buf.revision);
        Ok(())
    }

    /// Fetch the next older page and prepend it.
    ///
    /// Returns `Ok(false)` without a network request once the history is
    /// exhausted or after a previous fetch error (fail-closed: an error
    /// permanently disables paging for this conversation session).
    pub async fn load_older(&self) -> Result<bool> {
        let offset = {
            let buf = self.buffer.read();
            if buf.paging_disabled || !buf.has_more {
                return Ok(false);
            }
            buf.messages.len() as u32
        };
        let page_size = self.history.config().page_size;

        match self
            .history
            .get_messages(&self.partner_id, page_size, offset)
            .await
        {
            Ok(page) => {
                self.apply_older_page(page);
                Ok(true)
            }
            Err(e) => {
                let mut buf = self.buffer.write();
                buf.paging_disabled = true;
                tracing::warn!(
                    partner = self.partner_id.as_str(),
                    error = %e,
                    "History page fetch failed; paging disabled for this conversation"
                );
                Err(e)
            }
        }
    }

    // ── Internal ────────────────────────────────────────────────────────────

    /// Fetch and apply the newest history page.
    async fn load_initial(&self) -> Result<()> {
        let page_size = self.history.config().page_size;
        let page = self
            .history
            .get_messages(&self.partner_id, page_size, 0)
            .await?;
        self.apply_initial_page(page);
        Ok(())
    }

    /// Replace the list with the newest page, reversed to chronological.
    fn apply_initial_page(&self, page: MessagePage) {
        let page_size = self.history.config().page_size;
        let mut buf = self.buffer.write();
        let fetched = page.messages.len() as u32;
        let mut messages = page.messages;
        messages.reverse();
        buf.messages = messages;
        buf.has_more = fetched >= page_size;
        buf.revision += 1;
        self.revision_tx.send_replace(buf.revision);
    }

    /// Prepend an older page, reversed to chronological.
    fn apply_older_page(&self, page: MessagePage) {
        let page_size = self.history.config().page_size;
        let mut buf = self.buffer.write();
        let fetched = page.messages.len() as u32;
        let mut older = page.messages;
        older.reverse();
        older.extend(buf.messages.drain(..));
        buf.messages = older;
        buf.has_more = fetched >= page_size;
        buf.revision += 1;
        self.revision_tx.send_replace(buf.revision);
    }
}

/// Flip every unread message at or before the last unread index.
///
/// A read receipt means the peer has seen everything up to that point, so
/// the whole unread prefix flips, not just one message. Returns how many
/// flags changed; flags never flip back.
fn mark_read_prefix(messages: &mut [ChatMessage]) -> usize {
    let Some(last_unread) = messages.iter().rposition(|m| !m.is_read) else {
        return 0;
    };
    let mut flipped = 0;
    for message in &mut messages[..=last_unread] {
        if !message.is_read {
            message.is_read = true;
            flipped += 1;
        }
    }
    flipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::auth::SessionProvider;
    use crate::config::ChatConfig;
    use crate::error::Error;

    struct TestSession;

    impl SessionProvider for TestSession {
        fn auth_token(&self) -> Option<String> {
            Some("Token test-credential".to_string())
        }

        fn session_expired(&self) {}
    }

    /// Connection and history client pointed at a dead endpoint; REST and
    /// socket traffic both fail fast, which is what these tests want.
    fn offline_deps() -> (ConnectionManager, ChatHistoryClient) {
        let config = ChatConfig {
            host: "127.0.0.1:1".to_string(),
            ..ChatConfig::default()
        };
        let connection = ConnectionManager::new(config.clone());
        let history = ChatHistoryClient::new(config, Arc::new(TestSession));
        (connection, history)
    }

    fn make_message(id: i64, sender: &str, read: bool) -> ChatMessage {
        ChatMessage {
            id,
            content: format!("message {id}"),
            sender_id: Some(sender.to_string()),
            is_read: read,
            sent_at: None,
        }
    }

    fn chat_frame(message: ChatMessage) -> ServerFrame {
        ServerFrame::Chat { message }
    }

    fn receipt_frame(reader: &str) -> ServerFrame {
        ServerFrame::UnreadMessagesChecked {
            message: crate::protocol::ReadReceipt {
                reader_id: reader.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_incoming_partner_message_is_appended() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        connection
            .dispatcher()
            .dispatch(&chat_frame(make_message(1, "peer-1", false)));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "message 1");
    }

    #[tokio::test]
    async fn test_own_device_echo_is_appended() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        connection
            .dispatcher()
            .dispatch(&chat_frame(make_message(2, "me", true)));

        assert_eq!(conversation.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_message_from_stranger_is_filtered_out() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        connection
            .dispatcher()
            .dispatch(&chat_frame(make_message(3, "someone-else", false)));

        assert!(conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn test_read_receipt_flips_the_whole_unread_prefix() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        for id in 1..=3 {
            connection
                .dispatcher()
                .dispatch(&chat_frame(make_message(id, "peer-1", false)));
        }

        connection.dispatcher().dispatch(&receipt_frame("peer-1"));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.is_read));
    }

    #[tokio::test]
    async fn test_read_receipt_from_non_partner_changes_nothing() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        connection
            .dispatcher()
            .dispatch(&chat_frame(make_message(1, "peer-1", false)));
        connection.dispatcher().dispatch(&receipt_frame("someone-else"));

        assert!(!conversation.messages()[0].is_read);
    }

    #[tokio::test]
    async fn test_read_flags_never_revert() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        connection
            .dispatcher()
            .dispatch(&chat_frame(make_message(1, "peer-1", false)));
        connection.dispatcher().dispatch(&receipt_frame("peer-1"));
        // A second receipt finds nothing unread and must not disturb flags.
        connection.dispatcher().dispatch(&receipt_frame("peer-1"));

        assert!(conversation.messages().iter().all(|m| m.is_read));
    }

    #[tokio::test]
    async fn test_send_while_disconnected_preserves_the_draft() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection, history);

        conversation.set_draft("don't lose me");
        let result = conversation.send_draft();

        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(conversation.draft(), "don't lose me");
        assert!(conversation.messages().is_empty());
    }

    #[tokio::test]
    async fn test_empty_draft_sends_nothing() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection, history);

        conversation.set_draft("   ");
        // Would be NotConnected if anything were transmitted.
        assert!(conversation.send_draft().is_ok());
    }

    fn page_newest_first(ids: std::ops::RangeInclusive<i64>, total: u64) -> MessagePage {
        // Server order: newest (highest id) first.
        let mut messages: Vec<ChatMessage> =
            ids.map(|id| make_message(id, "peer-1", true)).collect();
        messages.reverse();
        MessagePage { messages, total }
    }

    #[tokio::test]
    async fn test_pages_are_reversed_into_chronological_order() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection, history);

        conversation.apply_initial_page(page_newest_first(81..=100, 25));

        let messages = conversation.messages();
        assert_eq!(messages.first().map(|m| m.id), Some(81));
        assert_eq!(messages.last().map(|m| m.id), Some(100));
        assert!(conversation.has_more_messages());
    }

    #[tokio::test]
    async fn test_short_page_ends_pagination_without_further_requests() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection, history);

        conversation.apply_initial_page(page_newest_first(81..=100, 25));
        conversation.apply_older_page(page_newest_first(76..=80, 25));

        let messages = conversation.messages();
        assert_eq!(messages.len(), 25);
        assert_eq!(messages.first().map(|m| m.id), Some(76));
        assert!(!conversation.has_more_messages());

        // The history client points at a dead endpoint, so Ok(false) proves
        // no request was made.
        assert_eq!(conversation.load_older().await.unwrap(), false);
    }

    #[tokio::test]
    async fn test_failed_page_fetch_disables_paging_for_good() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection, history);

        conversation.apply_initial_page(page_newest_first(81..=100, 40));
        assert!(conversation.has_more_messages());

        // The endpoint is unreachable: the fetch fails and paging latches off.
        assert!(matches!(
            conversation.load_older().await,
            Err(Error::TransportUnavailable)
        ));
        assert!(!conversation.has_more_messages());
        assert_eq!(conversation.load_older().await.unwrap(), false);
    }

    #[tokio::test]
    async fn test_dropping_the_conversation_unregisters_handlers() {
        let (connection, history) = offline_deps();
        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);

        assert_eq!(connection.dispatcher().handler_count(FrameKind::Chat), 1);
        drop(conversation);
        assert_eq!(connection.dispatcher().handler_count(FrameKind::Chat), 0);
        assert_eq!(
            connection
                .dispatcher()
                .handler_count(FrameKind::UnreadMessagesChecked),
            0
        );
    }

    #[tokio::test]
    async fn test_partner_message_is_acknowledged_when_connected() {
        use futures_util::StreamExt;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        // In-process socket server that records inbound text frames.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let received = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let log = Arc::clone(&received);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            WsMessage::Text(text) => log.lock().push(text.to_string()),
                            WsMessage::Close(_) => {
                                let _ = ws.close(None).await;
                                break;
                            }
                            _ => {}
                        }
                    }
                });
            }
        });

        let config = ChatConfig {
            host,
            ..ChatConfig::default()
        };
        let connection = ConnectionManager::new(config.clone());
        let history = ChatHistoryClient::new(config, Arc::new(TestSession));
        connection.connect("me").await.unwrap();

        let conversation = Conversation::attach("peer-1", "me", connection.clone(), history);
        connection
            .dispatcher()
            .dispatch(&chat_frame(make_message(1, "peer-1", false)));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(conversation.messages().len(), 1);
        let frames = received.lock().clone();
        assert!(
            frames.contains(
                &r#"{"type":"checked_received_message","message_sender_id":"peer-1"}"#.to_string()
            ),
            "expected an acknowledgment frame, got {frames:?}"
        );
    }

    #[test]
    fn test_mark_read_prefix_only_touches_the_prefix() {
        let mut messages = vec![
            make_message(1, "peer-1", false),
            make_message(2, "peer-1", true),
            make_message(3, "peer-1", false),
            make_message(4, "peer-1", true),
        ];

        // Last unread is index 2; index 3 is already read and stays as-is.
        assert_eq!(mark_read_prefix(&mut messages), 2);
        assert!(messages.iter().all(|m| m.is_read));

        // Nothing left to flip.
        assert_eq!(mark_read_prefix(&mut messages), 0);
    }
}
