use super::{AuthError, StateStore};
use serde::Deserialize;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::debug;

/// Token endpoint response. Only `access_token` is required; anything else
/// the provider sends is kept in `extra`.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[redacted]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("scope", &self.scope)
            .field("id_token", &self.id_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

/// Trades an authorization code for an access token
pub struct TokenExchangeClient {
    http_client: reqwest::Client,
    state_store: Arc<StateStore>,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl TokenExchangeClient {
    pub fn new(
        http_client: reqwest::Client,
        state_store: Arc<StateStore>,
        token_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            http_client,
            state_store,
            token_url,
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Consume `state`, then POST the code to the token endpoint.
    ///
    /// An invalid state fails without any network call. There are no retries.
    pub async fn exchange(&self, code: &str, state: &str) -> Result<TokenResponse, AuthError> {
        if !self.state_store.consume(state) {
            return Err(AuthError::InvalidOrExpiredState);
        }

        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.redirect_uri.as_str()),
        ];

        let response = self
            .http_client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenExchangeFailed(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::TokenExchangeFailed(format!("invalid response body: {e}")))?;

        debug!(token = ?token, "Exchanged authorization code");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_response_minimal_body() {
        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"tok1"}"#).unwrap();
        assert_eq!(token.access_token, "tok1");
        assert!(token.token_type.is_none());
        assert!(token.extra.is_empty());
    }

    #[test]
    fn test_token_response_preserves_unknown_fields() {
        let token: TokenResponse = serde_json::from_str(
            r#"{"access_token":"tok1","token_type":"Bearer","expires_in":3599,"custom":"x"}"#,
        )
        .unwrap();
        assert_eq!(token.token_type.as_deref(), Some("Bearer"));
        assert_eq!(token.expires_in, Some(3599));
        assert_eq!(token.extra["custom"], "x");
    }

    #[test]
    fn test_token_response_requires_access_token() {
        assert!(serde_json::from_str::<TokenResponse>(r#"{"token_type":"Bearer"}"#).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"secret-tok","refresh_token":"r"}"#).unwrap();
        let printed = format!("{token:?}");
        assert!(!printed.contains("secret-tok"));
        assert!(printed.contains("[redacted]"));
    }
}
