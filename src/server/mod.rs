pub mod request_logger;

use crate::{
    auth::{
        LoginFlow, SessionRegistry, StateStoreHealthChecker, session::sweep_idle_sessions,
        session_middleware,
    },
    config::Config,
    error::AppError,
    health::HealthService,
    routes::{create_auth_routes, create_health_routes},
    server::request_logger::request_response_logger,
    shutdown::ShutdownCoordinator,
    storage::{StoreHealthChecker, UserStore, create_store},
};
use axum::{Router, middleware};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{debug, error, info};

/// How often idle browser sessions are swept from the registry
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Server {
    pub config: Arc<Config>,
    pub store: Arc<dyn UserStore>,
    pub login_flow: Arc<LoginFlow>,
    pub sessions: Arc<SessionRegistry>,
    pub health_service: Arc<HealthService>,
    pub shutdown_coordinator: Arc<ShutdownCoordinator>,
}

impl Server {
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let store = create_store(&config.database.url).await?;
        Self::with_store(config, store)
    }

    pub fn with_store(config: Config, store: Arc<dyn UserStore>) -> Result<Self, AppError> {
        let login_flow = Arc::new(LoginFlow::new(&config, store.clone())?);
        let sessions = Arc::new(SessionRegistry::new(Duration::from_secs(
            config.session.ttl_seconds,
        )));

        let mut health_service = HealthService::new();
        health_service.register(Arc::new(StoreHealthChecker::new(store.clone())));
        health_service.register(Arc::new(StateStoreHealthChecker::new(
            login_flow.state_store().clone(),
        )));

        Ok(Self {
            config: Arc::new(config),
            store,
            login_flow,
            sessions,
            health_service: Arc::new(health_service),
            shutdown_coordinator: Arc::new(ShutdownCoordinator::new()),
        })
    }

    pub async fn run(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        self.store.migrate().await?;
        info!("Database migrations completed successfully");

        let app = self.create_app();

        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to bind to address: {}", e)))?;

        info!("Server listening on http://{}", addr);
        let sweeper = self.spawn_session_sweeper();

        let shutdown_coordinator = self.shutdown_coordinator.clone();
        tokio::spawn(async move {
            shutdown_coordinator.wait_for_shutdown_signal().await;
        });

        let mut shutdown_rx = self.shutdown_coordinator.subscribe();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            info!("Graceful shutdown initiated");
        })
        .await;

        self.finish(result, sweeper).await;
        info!("Server shutdown complete");
        Ok(())
    }

    /// Stop background work once serving has ended, cleanly or not, and
    /// close the usage sessions of everyone still signed in
    async fn finish(&self, served: std::io::Result<()>, sweeper: JoinHandle<()>) {
        if let Err(e) = served {
            error!("Server error: {}", e);
            // the sweeper only exits on the shutdown signal
            self.shutdown_coordinator.initiate_shutdown();
        }

        if let Err(e) = sweeper.await {
            error!("Session sweeper task failed: {}", e);
        }

        for session in self.sessions.drain() {
            let usage_session_id = session.usage_session_id;
            if let Err(e) = self.login_flow.logout(session).await {
                error!(usage_session_id, "Failed to close session on shutdown: {}", e);
            }
        }
    }

    fn spawn_session_sweeper(&self) -> JoinHandle<()> {
        let sessions = self.sessions.clone();
        let login_flow = self.login_flow.clone();
        let mut shutdown_rx = self.shutdown_coordinator.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let swept = sweep_idle_sessions(&sessions, login_flow.binder()).await;
                        if swept > 0 {
                            debug!(swept, "Closed idle browser sessions");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    pub fn create_app(&self) -> Router {
        let mut app = Router::new()
            .nest("/auth", create_auth_routes())
            .with_state(self.clone())
            .nest(
                "/health",
                create_health_routes().with_state(self.health_service.clone()),
            );

        if self.config.logging.log_request {
            app = app.layer(middleware::from_fn(request_response_logger));
        }

        // outermost, so the request logger can see the signed-in user
        app.layer(middleware::from_fn_with_state(
            self.clone(),
            session_middleware,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{storage::MemoryStore, utils::request_context::RequestContext};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn create_test_server() -> Server {
        let mut config = Config::default();
        config.oauth.client_id = "client".to_string();
        config.oauth.client_secret = "secret".to_string();
        config.state.dir = Some(std::env::temp_dir());
        Server::with_store(config, Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = create_test_server().create_app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_me_requires_session() {
        let app = create_test_server().create_app();
        let response = app
            .oneshot(Request::builder().uri("/auth/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = create_test_server().create_app();
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_error_stops_sweeper_and_closes_sessions() {
        let store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.oauth.client_id = "client".to_string();
        config.oauth.client_secret = "secret".to_string();
        config.state.dir = Some(std::env::temp_dir());
        let server = Server::with_store(config, store.clone()).unwrap();

        let session = server
            .login_flow
            .binder()
            .bind(
                &crate::auth::UserProfile {
                    email: "e@unirio.br".to_string(),
                    name: "E".to_string(),
                    picture: None,
                },
                &RequestContext::default(),
            )
            .await
            .unwrap();
        let usage_id = session.usage_session_id;
        server.sessions.insert(session);

        let sweeper = server.spawn_session_sweeper();
        let served = Err(std::io::Error::other("accept loop failed"));
        tokio::time::timeout(Duration::from_secs(5), server.finish(served, sweeper))
            .await
            .expect("finish must not wait on the sweeper forever");

        assert!(server.sessions.is_empty());
        let usage = store.find_session(usage_id).await.unwrap().unwrap();
        assert!(usage.session_end.is_some());
    }

    #[tokio::test]
    async fn test_new_with_memory_database() {
        let mut config = Config::default();
        config.database.url = "memory".to_string();
        let server = Server::new(config).await.unwrap();
        assert_eq!(
            server.health_service.registered(),
            vec!["storage", "state_store"]
        );
    }
}
