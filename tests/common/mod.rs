use axum::{
    Router,
    body::Body,
    http::{Request, Response},
};
use editalbot::{Config, Server, storage::MemoryStore};
use std::{
    path::PathBuf,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;

/// Server wired to a mock identity provider, an in-memory user store and
/// a private state directory
pub struct TestHarness {
    #[allow(dead_code)]
    pub config: Config,
    pub server: Server,
    pub store: Arc<MemoryStore>,
    pub provider: MockServer,
    state_dir: TempDir,
}

#[allow(dead_code)]
impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let provider = MockServer::start().await;
        let state_dir = TempDir::new().unwrap();

        let mut config = Config::default();
        config.oauth.client_id = "test-client-id".to_string();
        config.oauth.client_secret = "test-client-secret".to_string();
        config.oauth.token_url = format!("{}/token", provider.uri());
        config.oauth.user_info_url = format!("{}/userinfo", provider.uri());
        config.state.dir = Some(state_dir.path().to_path_buf());
        config.session.cookie_secure = false;
        config.database.url = "memory".to_string();
        customize(&mut config);

        let store = Arc::new(MemoryStore::new());
        let server = Server::with_store(config.clone(), store.clone()).unwrap();

        Self {
            config,
            server,
            store,
            provider,
            state_dir,
        }
    }

    pub fn app(&self) -> Router {
        self.server.create_app()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// Write a state file directly, as if issued `age_secs` seconds ago
    pub fn plant_state(&self, token: &str, age_secs: f64) {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs_f64()
            - age_secs;
        std::fs::write(self.state_path(token), format!("{created_at},{token}")).unwrap();
    }

    pub fn state_path(&self, token: &str) -> PathBuf {
        self.state_dir
            .path()
            .join(format!("editalbot_oauth_state_{token}.txt"))
    }

    pub fn state_file_count(&self) -> usize {
        std::fs::read_dir(self.state_dir.path()).unwrap().count()
    }
}

/// `name=value` pair from a `Set-Cookie` header
#[allow(dead_code)]
pub fn cookie_pair(response: &Response<Body>) -> String {
    response.headers()["set-cookie"]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .trim()
        .to_string()
}

#[allow(dead_code)]
pub fn location(response: &Response<Body>) -> String {
    response.headers()["location"].to_str().unwrap().to_string()
}
