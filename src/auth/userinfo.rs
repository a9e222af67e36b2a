use super::AuthError;
use serde::{Deserialize, Serialize};

/// Profile fields read from the user-info endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
}

pub struct UserInfoFetcher {
    http_client: reqwest::Client,
    user_info_url: String,
}

impl UserInfoFetcher {
    pub fn new(http_client: reqwest::Client, user_info_url: String) -> Self {
        Self {
            http_client,
            user_info_url,
        }
    }

    pub async fn fetch(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response = self
            .http_client
            .get(&self.user_info_url)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| AuthError::UserInfoFetchFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::UserInfoFetchFailed(format!(
                "user info endpoint returned {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::UserInfoFetchFailed(format!("invalid response body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    #[test]
    fn test_missing_fields_default() {
        let profile: UserProfile = serde_json::from_str(r#"{"id":"123"}"#).unwrap();
        assert_eq!(profile, UserProfile::default());
    }

    #[tokio::test]
    async fn test_fetch_sends_access_token_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(query_param("access_token", "tok1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "x@edu.unirio.br",
                "name": "X",
                "picture": "https://lh3.example/x.jpg"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(
            reqwest::Client::new(),
            format!("{}/userinfo", server.uri()),
        );
        let profile = fetcher.fetch("tok1").await.unwrap();

        assert_eq!(profile.email, "x@edu.unirio.br");
        assert_eq!(profile.name, "X");
        assert_eq!(profile.picture.as_deref(), Some("https://lh3.example/x.jpg"));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(reqwest::Client::new(), server.uri());
        let err = fetcher.fetch("expired").await.unwrap_err();
        assert!(matches!(err, AuthError::UserInfoFetchFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_unparsable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let fetcher = UserInfoFetcher::new(reqwest::Client::new(), server.uri());
        assert!(matches!(
            fetcher.fetch("tok").await,
            Err(AuthError::UserInfoFetchFailed(_))
        ));
    }
}
