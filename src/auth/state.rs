use crate::health::{HealthCheckResult, HealthChecker};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

const STATE_FILE_PREFIX: &str = "editalbot_oauth_state_";
const STATE_FILE_SUFFIX: &str = ".txt";
const STATE_TOKEN_BYTES: usize = 32;
const MAX_TOKEN_LEN: usize = 128;
/// Stale state files tolerated before the state store reports degraded
const STALE_STATE_WARN_THRESHOLD: usize = 1000;

/// Why a state token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    BadToken,
    Missing,
    Malformed,
    Mismatch,
    Expired,
    Io,
}

/// File-backed, single-use CSRF state tokens.
///
/// Each outstanding login attempt owns one file named after its token and
/// holding `<created_at>,<token>`. Files are independent, so concurrent
/// attempts never contend on a shared lock.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
    ttl: Duration,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Generate a fresh token and persist it with the current time
    pub fn issue(&self) -> io::Result<String> {
        let mut bytes = [0u8; STATE_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = URL_SAFE_NO_PAD.encode(bytes);

        self.write_entry(&token, unix_now())?;
        debug!(dir = %self.dir.display(), "Issued OAuth state");
        Ok(token)
    }

    /// Validate a token exactly once.
    ///
    /// The backing file is removed whatever the outcome, so a second call
    /// with the same token always fails.
    pub fn consume(&self, token: &str) -> bool {
        if !is_url_safe_token(token) {
            warn!(reason = ?Rejection::BadToken, "OAuth state rejected");
            return false;
        }

        let path = self.path_for(token);
        let outcome = self.check_entry(&path, token);

        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove OAuth state file");
            }
        }

        match outcome {
            Ok(()) => {
                debug!("OAuth state accepted");
                true
            }
            Err(reason) => {
                warn!(reason = ?reason, "OAuth state rejected");
                false
            }
        }
    }

    /// Delete state files that have expired or cannot be parsed.
    /// Returns how many were removed.
    pub fn purge_expired(&self) -> io::Result<usize> {
        self.sweep(true)
    }

    /// Count the files `purge_expired` would remove without touching them
    pub fn count_expired(&self) -> io::Result<usize> {
        self.sweep(false)
    }

    fn sweep(&self, delete: bool) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(token) = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(STATE_FILE_PREFIX))
                .and_then(|rest| rest.strip_suffix(STATE_FILE_SUFFIX))
            else {
                continue;
            };

            let stale = match self.check_entry(&entry.path(), token) {
                Ok(()) => false,
                Err(Rejection::Missing) => false,
                Err(_) => true,
            };
            if !stale {
                continue;
            }

            if delete {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            } else {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn check_entry(&self, path: &Path, token: &str) -> Result<(), Rejection> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(Rejection::Missing),
            Err(_) => return Err(Rejection::Io),
        };

        let (created_at, stored_token) = content
            .trim()
            .split_once(',')
            .ok_or(Rejection::Malformed)?;
        let created_at: f64 = created_at.parse().map_err(|_| Rejection::Malformed)?;
        if !created_at.is_finite() {
            return Err(Rejection::Malformed);
        }

        if stored_token != token {
            return Err(Rejection::Mismatch);
        }

        if unix_now() - created_at > self.ttl.as_secs_f64() {
            return Err(Rejection::Expired);
        }

        Ok(())
    }

    pub(crate) fn write_entry(&self, token: &str, created_at: f64) -> io::Result<()> {
        fs::write(self.path_for(token), format!("{created_at},{token}"))
    }

    fn path_for(&self, token: &str) -> PathBuf {
        self.dir
            .join(format!("{STATE_FILE_PREFIX}{token}{STATE_FILE_SUFFIX}"))
    }
}

fn is_url_safe_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Reports whether the state directory is usable and not piling up
/// abandoned login attempts
pub struct StateStoreHealthChecker {
    store: Arc<StateStore>,
    stale_threshold: usize,
}

impl StateStoreHealthChecker {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self::with_stale_threshold(store, STALE_STATE_WARN_THRESHOLD)
    }

    pub fn with_stale_threshold(store: Arc<StateStore>, stale_threshold: usize) -> Self {
        Self {
            store,
            stale_threshold,
        }
    }
}

#[async_trait]
impl HealthChecker for StateStoreHealthChecker {
    fn name(&self) -> &str {
        "state_store"
    }

    async fn check(&self) -> HealthCheckResult {
        match fs::metadata(self.store.dir()) {
            Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => {
                match self.store.count_expired() {
                    Ok(stale) if stale > self.stale_threshold => {
                        HealthCheckResult::degraded(format!(
                            "{stale} stale state files in {}; run `maintenance purge-states`",
                            self.store.dir().display()
                        ))
                    }
                    Ok(stale) => HealthCheckResult::healthy_with_details(serde_json::json!({
                        "dir": self.store.dir().display().to_string(),
                        "ttl_seconds": self.store.ttl().as_secs(),
                        "stale_files": stale,
                    })),
                    Err(e) => HealthCheckResult::unhealthy(format!(
                        "State directory {} unreadable: {e}",
                        self.store.dir().display()
                    )),
                }
            }
            Ok(_) => HealthCheckResult::unhealthy(format!(
                "State directory {} is not writable",
                self.store.dir().display()
            )),
            Err(e) => HealthCheckResult::unhealthy(format!(
                "State directory {} unavailable: {e}",
                self.store.dir().display()
            )),
        }
    }
}
