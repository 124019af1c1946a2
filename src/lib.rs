//! # Stride Chat Core
//!
//! Real-time chat library for the Stride fitness-coaching app.
//!
//! The app is a thin client over a remote backend: live messages travel on
//! a single WebSocket per signed-in user, while history, contacts, and
//! read-state mutations go through a REST API. This crate owns everything
//! between those two wires and the UI.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                         STRIDE CHAT CORE                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────────┐      ┌───────────────┐     ┌──────────────────┐   │
//! │  │ ChatService  │─────►│ Conversation  │     │   ContactList    │   │
//! │  │ (app root)   │      │ (per partner) │     │ (unread counts)  │   │
//! │  └──────┬───────┘      └──────┬────────┘     └────────▲─────────┘   │
//! │         │                     │ register/send         │ events      │
//! │         ▼                     ▼                       │             │
//! │  ┌──────────────────────────────────────┐    ┌────────┴─────────┐   │
//! │  │          ConnectionManager           │    │    Dispatcher    │   │
//! │  │  connect / disconnect / reconnect    │───►│  typed fan-out   │   │
//! │  └──────────────────┬───────────────────┘    └──────────────────┘   │
//! │                     │ ws(s)://<host>/chat/<user>/                   │
//! │                     ▼                                               │
//! │               chat backend  ◄──── /api/chat/ ── ChatHistoryClient   │
//! │                                                                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound frames flow: socket reader task parses JSON into a
//! [`ServerFrame`], the [`Dispatcher`] fans it out to registered handlers
//! in registration order, and conversation/contact state updates publish
//! fresh snapshots through watch channels the UI subscribes to.
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the whole crate
//! - [`config`] - Backend host, URLs, and reconnect tunables
//! - [`auth`] - Session seam implemented by the host application
//! - [`protocol`] - Wire frames and records (JSON)
//! - [`connection`] - Socket lifecycle, reconnection, frame I/O
//! - [`dispatch`] - Typed handler registry with scoped registration
//! - [`history`] - Chat REST API client
//! - [`contacts`] - Contact list state and the unread aggregate
//! - [`conversation`] - Per-conversation message list and send logic
//! - [`service`] - Application-root owner wiring it all together
//!
//! ## Lifecycle
//!
//! The host builds one [`ChatService`] at startup and mirrors its auth
//! state into [`ChatService::set_authenticated`]: signing in connects the
//! socket (debounced), signing out disconnects it. Screens open
//! conversations through the service and drop them on unmount, which
//! unregisters their frame handlers automatically.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod auth;
pub mod config;
pub mod connection;
pub mod contacts;
pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod protocol;
pub mod service;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use auth::SessionProvider;
pub use config::ChatConfig;
pub use connection::{ConnectionManager, ConnectionStatus};
pub use contacts::{ContactEvent, ContactList, ContactListSnapshot};
pub use conversation::Conversation;
pub use dispatch::{Dispatcher, FrameHandler, HandlerGuard};
pub use error::{Error, Result};
pub use history::ChatHistoryClient;
pub use protocol::{
    ChatMessage, ClientFrame, Contact, FrameKind, MessagePage, ReadReceipt, ServerFrame,
    UserPage, UserSummary,
};
pub use service::ChatService;
