use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl HealthCheckResult {
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            message: None,
            details: None,
            duration_ms: None,
        }
    }

    pub fn healthy_with_details(details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::healthy()
        }
    }

    pub fn degraded(message: String) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message),
            details: None,
            duration_ms: None,
        }
    }

    pub fn unhealthy(message: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            message: Some(message),
            details: None,
            duration_ms: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> HealthCheckResult;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallHealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub checks: BTreeMap<String, HealthCheckResult>,
}

/// Aggregates the component checks registered at startup
#[derive(Default)]
pub struct HealthService {
    checkers: Vec<Arc<dyn HealthChecker>>,
}

impl HealthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, checker: Arc<dyn HealthChecker>) {
        self.checkers.push(checker);
    }

    pub fn registered(&self) -> Vec<String> {
        self.checkers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Run every check, or only the one named by `filter`.
    /// The worst component status becomes the overall status.
    pub async fn check_health(&self, filter: Option<&str>) -> OverallHealthResponse {
        let mut checks = BTreeMap::new();

        for checker in &self.checkers {
            if filter.is_some_and(|name| name != "all" && name != checker.name()) {
                continue;
            }
            let start = Instant::now();
            let result = checker.check().await;
            let duration = start.elapsed().as_millis() as u64;
            checks.insert(checker.name().to_string(), result.with_duration(duration));
        }

        let status = checks
            .values()
            .map(|r| r.status)
            .fold(HealthStatus::Healthy, |worst, s| match (worst, s) {
                (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => {
                    HealthStatus::Unhealthy
                }
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => {
                    HealthStatus::Degraded
                }
                _ => HealthStatus::Healthy,
            });

        OverallHealthResponse {
            status,
            service: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedChecker {
        name: &'static str,
        result: HealthCheckResult,
    }

    #[async_trait]
    impl HealthChecker for FixedChecker {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self) -> HealthCheckResult {
            self.result.clone()
        }
    }

    fn checker(name: &'static str, result: HealthCheckResult) -> Arc<dyn HealthChecker> {
        Arc::new(FixedChecker { name, result })
    }

    #[tokio::test]
    async fn test_empty_service_is_healthy() {
        let service = HealthService::new();
        let response = service.check_health(None).await;
        assert_eq!(response.status, HealthStatus::Healthy);
        assert!(response.checks.is_empty());
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let mut service = HealthService::new();
        service.register(checker("storage", HealthCheckResult::healthy()));
        service.register(checker(
            "state_store",
            HealthCheckResult::degraded("slow disk".to_string()),
        ));

        let response = service.check_health(None).await;
        assert_eq!(response.status, HealthStatus::Degraded);
        assert_eq!(response.checks.len(), 2);
        assert!(response.checks["storage"].duration_ms.is_some());

        service.register(checker(
            "broken",
            HealthCheckResult::unhealthy("down".to_string()),
        ));
        let response = service.check_health(Some("all")).await;
        assert_eq!(response.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_filter_runs_single_check() {
        let mut service = HealthService::new();
        service.register(checker("storage", HealthCheckResult::healthy()));
        service.register(checker(
            "state_store",
            HealthCheckResult::unhealthy("gone".to_string()),
        ));

        let response = service.check_health(Some("storage")).await;
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.checks.len(), 1);
        assert_eq!(service.registered(), vec!["storage", "state_store"]);
    }
}
