use super::{
    AuthError, AuthenticatedSession, AuthorizationUrlBuilder, DomainGate, SessionBinder,
    StateStore, TokenExchangeClient, UserInfoFetcher, provider_http_client,
};
use crate::{
    config::Config, error::AppError, storage::UserStore, utils::request_context::RequestContext,
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub authorization_url: String,
    pub state: String,
}

/// The whole sign-in sequence: state, authorize, exchange, profile, gate, bind
pub struct LoginFlow {
    state_store: Arc<StateStore>,
    url_builder: AuthorizationUrlBuilder,
    token_client: TokenExchangeClient,
    user_info: UserInfoFetcher,
    domain_gate: DomainGate,
    binder: SessionBinder,
}

impl LoginFlow {
    pub fn new(config: &Config, store: Arc<dyn UserStore>) -> Result<Self, AppError> {
        let state_store = Arc::new(StateStore::new(
            config.state.resolved_dir(),
            Duration::from_secs(config.state.ttl_seconds),
        ));
        Self::with_state_store(config, store, state_store)
    }

    pub fn with_state_store(
        config: &Config,
        store: Arc<dyn UserStore>,
        state_store: Arc<StateStore>,
    ) -> Result<Self, AppError> {
        let oauth = &config.oauth;
        let http_client = provider_http_client(Duration::from_secs(oauth.request_timeout_secs))
            .map_err(|e| AppError::Internal(format!("reqwest build error: {e}")))?;
        let url_builder = AuthorizationUrlBuilder::new(oauth).map_err(|e| {
            AppError::Internal(format!(
                "Invalid authorization URL '{}': {e}",
                oauth.authorization_url
            ))
        })?;

        Ok(Self {
            token_client: TokenExchangeClient::new(
                http_client.clone(),
                state_store.clone(),
                oauth.token_url.clone(),
                oauth.client_id.clone(),
                oauth.client_secret.clone(),
                oauth.redirect_uri.clone(),
            ),
            user_info: UserInfoFetcher::new(http_client, oauth.user_info_url.clone()),
            domain_gate: DomainGate::new(&oauth.allowed_domains),
            binder: SessionBinder::new(store, config.admin.clone()),
            state_store,
            url_builder,
        })
    }

    pub fn state_store(&self) -> &Arc<StateStore> {
        &self.state_store
    }

    pub fn binder(&self) -> &SessionBinder {
        &self.binder
    }

    /// Issue a state token and the authorization URL carrying it
    pub fn begin(&self) -> Result<AuthorizationRequest, AppError> {
        let state = self
            .state_store
            .issue()
            .map_err(|e| AppError::Internal(format!("Failed to store OAuth state: {e}")))?;
        let authorization_url = self.url_builder.build(&state);
        debug!("Built authorization URL");
        Ok(AuthorizationRequest {
            authorization_url,
            state,
        })
    }

    pub async fn complete(
        &self,
        code: &str,
        state: &str,
        context: &RequestContext,
    ) -> Result<AuthenticatedSession, AuthError> {
        let token = self
            .token_client
            .exchange(code, state)
            .await
            .inspect_err(|e| warn!(kind = e.kind(), error = %e, "Token exchange failed"))?;

        let profile = self
            .user_info
            .fetch(&token.access_token)
            .await
            .inspect_err(|e| warn!(kind = e.kind(), error = %e, "User info fetch failed"))?;

        if !self.domain_gate.check(&profile.email) {
            warn!(email = %profile.email, "Sign-in rejected: domain not allowed");
            return Err(AuthError::DomainRejected {
                email: profile.email,
            });
        }

        self.binder
            .bind(&profile, context)
            .await
            .inspect_err(|e| warn!(email = %profile.email, error = %e, "Failed to record sign-in"))
    }

    pub async fn logout(&self, session: AuthenticatedSession) -> Result<(), AuthError> {
        self.binder.unbind(session).await
    }
}
