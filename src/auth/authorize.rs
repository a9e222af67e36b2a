use crate::config::OAuthConfig;
use url::Url;

/// Builds the Google authorization endpoint URL for a login attempt.
///
/// `hd` only narrows the account picker; `DomainGate` is what enforces the
/// domain restriction.
#[derive(Debug, Clone)]
pub struct AuthorizationUrlBuilder {
    base: Url,
    client_id: String,
    redirect_uri: String,
    scope: String,
    hosted_domains: String,
}

impl AuthorizationUrlBuilder {
    pub fn new(config: &OAuthConfig) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(&config.authorization_url)?,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope: config.scopes.join(" "),
            hosted_domains: config.allowed_domains.join(","),
        })
    }

    pub fn build(&self, state: &str) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("response_type", "code")
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("prompt", "select_account")
            .append_pair("hd", &self.hosted_domains);
        url.into()
    }
}
