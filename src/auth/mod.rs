//! Google sign-in restricted to institutional email domains.
//!
//! The flow runs in this order: [`StateStore`] issues a single-use state,
//! [`AuthorizationUrlBuilder`] sends the browser to Google, the callback is
//! checked by [`TokenExchangeClient`] (which consumes the state),
//! [`UserInfoFetcher`] loads the profile, [`DomainGate`] filters the email
//! and [`SessionBinder`] records the login. [`LoginFlow`] wires them together.

pub mod authorize;
pub mod domain;
pub mod flow;
pub mod middleware;
pub mod session;
pub mod state;
pub mod token;
pub mod userinfo;

pub use authorize::AuthorizationUrlBuilder;
pub use domain::DomainGate;
pub use flow::{AuthorizationRequest, LoginFlow};
pub use middleware::{CurrentUser, SessionHandle, session_middleware};
pub use session::{AuthenticatedSession, SessionBinder, SessionRegistry};
pub use state::{StateStore, StateStoreHealthChecker};
pub use token::{TokenExchangeClient, TokenResponse};
pub use userinfo::{UserInfoFetcher, UserProfile};

use crate::storage::StorageError;
use std::time::Duration;
use thiserror::Error;

/// Why a login attempt was refused. Every variant sends the user back to
/// the start of the flow.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("the login link is invalid or has expired, please sign in again")]
    InvalidOrExpiredState,
    #[error("could not exchange the authorization code with Google: {0}")]
    TokenExchangeFailed(String),
    #[error("could not load the Google profile: {0}")]
    UserInfoFetchFailed(String),
    #[error("the email {email} does not belong to an authorized UNIRIO domain")]
    DomainRejected { email: String },
    #[error("could not record the login: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Short machine-readable tag used in redirect query strings and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::InvalidOrExpiredState => "invalid_state",
            AuthError::TokenExchangeFailed(_) => "token_exchange_failed",
            AuthError::UserInfoFetchFailed(_) => "user_info_failed",
            AuthError::DomainRejected { .. } => "domain_rejected",
            AuthError::Storage(_) => "storage_error",
        }
    }
}

/// HTTP client for calls to the identity provider.
///
/// Redirects are not followed and every call is bounded by `timeout`.
pub fn provider_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
}
