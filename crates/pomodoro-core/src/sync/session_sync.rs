//! Best-effort mirroring of timer sessions to a hosted table.
//!
//! At-most-once: every row is sent once, on a spawned task, and forgotten.
//! Nothing is queued or retried, and a failure never touches local timer
//! state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

use crate::error::SyncError;
use crate::events::{Event, TransitionReason};
use crate::storage::SyncConfig;
use crate::timer::Phase;
use crate::watchdog::ErrorLog;

/// Reports whether the client believes it is online.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Shared on/off switch, flipped by whoever observes the network.
#[derive(Debug, Clone)]
pub struct OnlineFlag(Arc<AtomicBool>);

impl OnlineFlag {
    pub fn new(online: bool) -> Self {
        Self(Arc::new(AtomicBool::new(online)))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::SeqCst);
    }
}

impl Default for OnlineFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for OnlineFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Start,
    Stop,
    Complete,
}

/// One mirrored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: String,
    pub kind: SessionKind,
    pub phase: Phase,
    pub seconds_left: u64,
    pub at: DateTime<Utc>,
}

struct Inner {
    client: reqwest::Client,
    config: SyncConfig,
    table_url: Option<Url>,
    device_id: String,
    connectivity: Arc<dyn Connectivity>,
    errors: Option<ErrorLog>,
}

/// Session mirror. Cheap to clone.
#[derive(Clone)]
pub struct SessionSync {
    inner: Arc<Inner>,
}

fn table_url(config: &SyncConfig) -> Result<Url, SyncError> {
    if config.endpoint.trim().is_empty() {
        return Err(SyncError::NotConfigured("endpoint is empty".into()));
    }
    let mut base = Url::parse(config.endpoint.trim())?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(&format!("rest/v1/{}", config.table))?)
}

impl SessionSync {
    pub fn new(config: SyncConfig, device_id: String, connectivity: Arc<dyn Connectivity>) -> Self {
        let table_url = if config.enabled {
            match table_url(&config) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(error = %e, "session sync disabled");
                    None
                }
            }
        } else {
            None
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            inner: Arc::new(Inner {
                client,
                config,
                table_url,
                device_id,
                connectivity,
                errors: None,
            }),
        }
    }

    /// Also write push failures to `errors`.
    pub fn with_error_log(self, errors: ErrorLog) -> Self {
        let inner = match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.errors = Some(errors);
                inner
            }
            Err(shared) => Inner {
                client: shared.client.clone(),
                config: shared.config.clone(),
                table_url: shared.table_url.clone(),
                device_id: shared.device_id.clone(),
                connectivity: Arc::clone(&shared.connectivity),
                errors: Some(errors),
            },
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn table_url(&self) -> Option<&Url> {
        self.inner.table_url.as_ref()
    }

    /// Signed in (a user id is configured) and configured.
    pub fn is_configured(&self) -> bool {
        self.inner.table_url.is_some() && !self.inner.config.user_id.trim().is_empty()
    }

    /// Configured and currently online.
    pub fn is_active(&self) -> bool {
        self.is_configured() && !self.inner.config.offline && self.inner.connectivity.is_online()
    }

    /// Row to mirror for `event`, if it is a session boundary.
    pub fn row_for(&self, event: &Event) -> Option<SessionRow> {
        let (kind, phase, seconds_left, at) = match event {
            Event::TimerStarted {
                phase,
                seconds_left,
                at,
            } => (SessionKind::Start, *phase, *seconds_left, *at),
            Event::TimerStopped {
                phase,
                seconds_left,
                at,
            } => (SessionKind::Stop, *phase, *seconds_left, *at),
            Event::PhaseChanged {
                from,
                reason: TransitionReason::Completed,
                at,
                ..
            } => (SessionKind::Complete, *from, 0, *at),
            _ => return None,
        };
        Some(SessionRow {
            id: Uuid::new_v4(),
            user_id: self.inner.config.user_id.clone(),
            device_id: self.inner.device_id.clone(),
            kind,
            phase,
            seconds_left,
            at,
        })
    }

    /// Fire-and-forget mirror of `event`.
    ///
    /// Returns the spawned task so short-lived callers can wait for it
    /// before exiting; dropping the handle does not cancel the push.
    pub fn record(&self, event: &Event) -> Option<JoinHandle<()>> {
        if !self.is_active() {
            tracing::debug!("session sync inactive, skipping event");
            return None;
        }
        let row = self.row_for(event)?;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime, dropping session row");
            return None;
        };

        let this = self.clone();
        Some(runtime.spawn(async move {
            if let Err(e) = this.push(&row).await {
                tracing::warn!(error = %e, kind = ?row.kind, "session sync failed");
                if let Some(errors) = &this.inner.errors {
                    errors.note("session-sync", e.to_string());
                }
            }
        }))
    }

    /// Send one row. No retries.
    pub async fn push(&self, row: &SessionRow) -> Result<(), SyncError> {
        let url = self
            .inner
            .table_url
            .clone()
            .ok_or_else(|| SyncError::NotConfigured("sync is disabled".into()))?;
        let key = &self.inner.config.api_key;

        let response = self
            .inner
            .client
            .post(url)
            .header("apikey", key)
            .bearer_auth(key)
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(kind = ?row.kind, "session row mirrored");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl std::fmt::Debug for SessionSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSync")
            .field("table_url", &self.inner.table_url)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> SyncConfig {
        SyncConfig {
            enabled: true,
            endpoint: endpoint.into(),
            api_key: "anon-key".into(),
            user_id: "user-1".into(),
            ..SyncConfig::default()
        }
    }

    fn sync(cfg: SyncConfig, online: &OnlineFlag) -> SessionSync {
        SessionSync::new(cfg, "pomodoro-test".into(), Arc::new(online.clone()))
    }

    fn started() -> Event {
        Event::TimerStarted {
            phase: Phase::Focus,
            seconds_left: 1500,
            at: Utc::now(),
        }
    }

    #[test]
    fn table_url_joins_endpoint() {
        let url = table_url(&config("https://db.example.com")).unwrap();
        assert_eq!(url.as_str(), "https://db.example.com/rest/v1/sessions");
        let url = table_url(&config("https://db.example.com/base")).unwrap();
        assert_eq!(url.as_str(), "https://db.example.com/base/rest/v1/sessions");
    }

    #[test]
    fn inactive_without_user_or_offline() {
        let online = OnlineFlag::default();
        let mut cfg = config("https://db.example.com");
        cfg.user_id.clear();
        assert!(!sync(cfg, &online).is_active());

        let s = sync(config("https://db.example.com"), &online);
        assert!(s.is_active());
        online.set_online(false);
        assert!(!s.is_active());
        assert!(s.record(&started()).is_none());
    }

    #[test]
    fn disabled_config_is_inactive() {
        let mut cfg = config("https://db.example.com");
        cfg.enabled = false;
        assert!(sync(cfg, &OnlineFlag::default()).table_url().is_none());
        assert!(sync(config(""), &OnlineFlag::default()).table_url().is_none());
    }

    #[test]
    fn rows_only_for_session_boundaries() {
        let s = sync(config("https://db.example.com"), &OnlineFlag::default());
        let row = s.row_for(&started()).unwrap();
        assert_eq!(row.kind, SessionKind::Start);
        assert_eq!(row.user_id, "user-1");
        assert_eq!(row.device_id, "pomodoro-test");

        let reset = Event::TimerReset {
            phase: Phase::Focus,
            seconds_left: 1500,
            at: Utc::now(),
        };
        assert!(s.row_for(&reset).is_none());
    }

    #[test]
    fn record_without_runtime_drops_row() {
        let s = sync(config("https://db.example.com"), &OnlineFlag::default());
        assert!(s.record(&started()).is_none());
    }

    #[tokio::test]
    async fn push_sends_auth_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/sessions")
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer anon-key")
            .match_header("prefer", "return=minimal")
            .with_status(201)
            .create_async()
            .await;

        let s = sync(config(&server.url()), &OnlineFlag::default());
        let row = s.row_for(&started()).unwrap();
        s.push(&row).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_record_lands_in_error_log() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rest/v1/sessions")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let kv: Arc<dyn crate::storage::KvStore> = Arc::new(crate::storage::MemoryKv::new());
        let errors = ErrorLog::new(kv, 10);
        let s = sync(config(&server.url()), &OnlineFlag::default()).with_error_log(errors.clone());

        let handle = s.record(&started()).expect("push should be spawned");
        handle.await.unwrap();

        let entries = errors.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "session-sync");
        assert!(entries[0].message.contains("500"));
    }

    #[tokio::test]
    async fn status_error_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rest/v1/sessions")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let s = sync(config(&server.url()), &OnlineFlag::default());
        let row = s.row_for(&started()).unwrap();
        match s.push(&row).await {
            Err(SyncError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert_eq!(body, "bad key");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
