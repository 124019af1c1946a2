//! Chat history REST client.
//!
//! Wraps the backend's `/api/chat/` endpoints: the contact list, paginated
//! message history, user search, and the mark-as-read mutation. The live
//! socket carries new messages; everything that happened before the socket
//! opened comes from here.
//!
//! Error mapping keeps failure families apart: a request that dies before
//! reaching the server becomes [`Error::TransportUnavailable`], a missing
//! credential short-circuits with [`Error::AuthenticationRequired`], and a
//! 401 invalidates the session via the [`SessionProvider`] before
//! returning [`Error::SessionExpired`].

use std::sync::Arc;

use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::SessionProvider;
use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::protocol::{Contact, MessagePage, UserPage};

/// Body of the mark-as-read mutation response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    updated_count: u64,
}

/// Error body shape used by the backend, e.g. `{"detail": "Not found."}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Client for the chat REST API. Cheap to clone; clones share the
/// underlying HTTP connection pool.
#[derive(Clone)]
pub struct ChatHistoryClient {
    http: reqwest::Client,
    config: ChatConfig,
    session: Arc<dyn SessionProvider>,
}

impl ChatHistoryClient {
    /// Create a client against the configured backend.
    pub fn new(config: ChatConfig, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            session,
        }
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Fetch the contact list with unread counts and last-message summaries.
    pub async fn get_contacts(&self) -> Result<Vec<Contact>> {
        let url = format!("{}contact/get/", self.config.api_base());
        self.get(url).await
    }

    /// Fetch one page of message history with `other_user_id`.
    ///
    /// The server returns messages newest-first; an offset at or past the
    /// total yields an empty page.
    pub async fn get_messages(
        &self,
        other_user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<MessagePage> {
        let url = format!(
            "{}messages/{}/?limit={}&offset={}",
            self.config.api_base(),
            other_user_id,
            limit,
            offset
        );
        self.get(url).await
    }

    /// Search for candidate conversation partners.
    ///
    /// An empty query yields an empty page without touching the network;
    /// search is not a browse-all operation.
    pub async fn search_users(&self, query: &str, limit: u32, offset: u32) -> Result<UserPage> {
        if query.trim().is_empty() {
            return Ok(UserPage::default());
        }
        let url = format!(
            "{}users/search/?query={}&limit={}&offset={}",
            self.config.api_base(),
            urlencoding::encode(query),
            limit,
            offset
        );
        self.get(url).await
    }

    /// Mark every unread message from `other_user_id` as read server-side.
    ///
    /// Returns the number of messages updated. Idempotent: a second call in
    /// a row returns 0.
    pub async fn mark_messages_as_read(&self, other_user_id: &str) -> Result<u64> {
        let url = format!("{}messages/read/{}/", self.config.api_base(), other_user_id);
        let response: MarkReadResponse = self.post(url).await?;
        Ok(response.updated_count)
    }

    // ── Internal ────────────────────────────────────────────────────────────

    fn auth_header(&self) -> Result<String> {
        self.session.auth_token().ok_or(Error::AuthenticationRequired)
    }

    async fn get<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let token = self.auth_header()?;
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Chat API request failed before reaching the server");
                Error::TransportUnavailable
            })?;
        self.decode(response).await
    }

    async fn post<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let token = self.auth_header()?;
        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Chat API request failed before reaching the server");
                Error::TransportUnavailable
            })?;
        self.decode(response).await
    }

    async fn decode<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::info!("Chat API returned 401; invalidating session");
            self.session.session_expired();
            return Err(Error::SessionExpired);
        }

        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&raw)
                .map(|body| body.detail)
                .unwrap_or(raw);
            return Err(Error::Server {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}
