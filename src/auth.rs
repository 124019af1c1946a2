//! Session seam to the external auth collaborator.
//!
//! The chat core never stores credentials. The embedding application
//! implements [`SessionProvider`] on whatever owns the signed-in session
//! and injects it when constructing the service.

/// Access to the signed-in session, implemented by the host application.
pub trait SessionProvider: Send + Sync {
    /// The full `Authorization` header value for REST calls
    /// (e.g. `"Token abc123"`), or `None` when nobody is signed in.
    ///
    /// When this returns `None`, REST operations short-circuit with
    /// [`Error::AuthenticationRequired`](crate::Error::AuthenticationRequired)
    /// without issuing a request.
    fn auth_token(&self) -> Option<String>;

    /// Invoked when the backend answers 401.
    ///
    /// The host should invalidate the stored credential and route the user
    /// to sign-in. The triggering call returns
    /// [`Error::SessionExpired`](crate::Error::SessionExpired), which
    /// callers exclude from generic error alerting.
    fn session_expired(&self);
}
