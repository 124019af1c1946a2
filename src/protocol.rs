//! Wire protocol for the chat backend.
//!
//! The socket speaks JSON frames tagged by a `type` field; the REST API
//! returns the same message and contact records as JSON bodies. Frame
//! field names are snake_case; embedded records use the backend's
//! camelCase keys.
//!
//! The connection layer never interprets payloads. It parses inbound text
//! into [`ServerFrame`] and hands the frame to the dispatcher keyed by
//! [`FrameKind`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Client → Server ───────────────────────────────────────────────────────────

/// Frames sent from the client to the chat backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send chat text to another user. The sent message appears in the
    /// conversation only when the server echoes it back as a `chat` frame.
    SendMessage {
        /// Recipient user id
        recipient_id: String,
        /// Message text
        message: String,
    },

    /// Acknowledge receipt of a message that arrived over the socket.
    CheckedReceivedMessage {
        /// The sender whose message was received
        message_sender_id: String,
    },

    /// Notify a peer that their messages were read.
    CheckedUnreadMessages {
        /// Who did the reading
        reader_id: String,
        /// Whose messages were read
        message_sender_id: String,
    },

    /// Diagnostic no-op; the server ignores it.
    Test {
        /// Free-form payload, echoed into server logs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
    },
}

// ── Server → Client ───────────────────────────────────────────────────────────

/// Frames received from the chat backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A new message arrived (also how our own sends are echoed back,
    /// including sends from another device of the same account).
    Chat {
        /// The message record
        message: ChatMessage,
    },

    /// A peer marked messages from us as read.
    UnreadMessagesChecked {
        /// Who read them
        message: ReadReceipt,
    },
}

impl ServerFrame {
    /// Dispatch key for this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Chat { .. } => FrameKind::Chat,
            Self::UnreadMessagesChecked { .. } => FrameKind::UnreadMessagesChecked,
        }
    }
}

/// Inbound frame tag, used as the handler registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `chat`
    Chat,
    /// `unread_messages_checked`
    UnreadMessagesChecked,
}

impl FrameKind {
    /// Wire name of the frame type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::UnreadMessagesChecked => "unread_messages_checked",
        }
    }
}

/// Payload of an `unread_messages_checked` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// The user who read the messages
    pub reader_id: String,
}

// ── Records ───────────────────────────────────────────────────────────────────

/// One chat message, as the backend serializes it.
///
/// Immutable once created except for `is_read`, which only ever moves
/// `false → true`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Server-assigned message id
    pub id: i64,
    /// Message text
    pub content: String,
    /// Sender user id; absent on some legacy rows
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Whether the recipient has read the message
    #[serde(default)]
    pub is_read: bool,
    /// When the message was sent
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Whether this message was sent by the given user.
    pub fn is_from(&self, user_id: &str) -> bool {
        self.sender_id.as_deref() == Some(user_id)
    }
}

/// A conversation peer, with its unread state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    /// Peer user id
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar image reference
    #[serde(default)]
    pub avatar: Option<String>,
    /// Role label, e.g. `coach` or `client`
    #[serde(default)]
    pub user_type: String,
    /// Messages from this contact that the current user has not read
    #[serde(default)]
    pub unread_count: u32,
    /// Most recent message in the conversation, if any
    #[serde(default)]
    pub last_message: Option<ChatMessage>,
}

/// A candidate conversation partner from user search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// User id
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar image reference
    #[serde(default)]
    pub avatar: Option<String>,
    /// Role label
    #[serde(default)]
    pub user_type: String,
}

/// One page of message history. The server returns messages newest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages in this page, newest first
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Total messages in the conversation
    #[serde(default)]
    pub total: u64,
}

/// One page of user search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPage {
    /// Matching users in this page
    #[serde(default)]
    pub users: Vec<UserSummary>,
    /// Total matches for the query
    #[serde(default)]
    pub total: u64,
}
