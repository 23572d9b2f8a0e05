/*
[INPUT]:  Access tokens from login/refresh responses and an injected refresher
[OUTPUT]: Canonical access token, persisted mirror, single-flight refresh
[POS]:    Auth layer - token lifecycle management
[UPDATE]: When refresh scheduling, persistence or concurrency rules change
*/

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::http::Result;

use super::jwt;
use super::storage::{ACCESS_TOKEN_KEY, KeyValueStorage};

/// Performs the network call that exchanges the refresh credential for a new token
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh_access_token(&self) -> Result<String>;
}

/// Token lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEvent {
    Updated,
    Cleared,
    /// A refresh failed and all token state was dropped
    RefreshFailed,
}

type SharedRefresh = Shared<BoxFuture<'static, Option<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    External,
    Refresh,
}

/// Owner of the current access token.
///
/// Cheap to clone; clones share state. Construct one per process and inject it.
#[derive(Clone)]
pub struct TokenStore {
    inner: Arc<Inner>,
}

struct Inner {
    token: RwLock<Option<String>>,
    storage: Arc<dyn KeyValueStorage>,
    refresher: Arc<dyn TokenRefresher>,
    buffer: Duration,
    // bumped on every replacement so late refresh results can be discarded
    generation: AtomicU64,
    in_flight: Mutex<Option<SharedRefresh>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<TokenEvent>,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self::with_buffer(storage, refresher, jwt::default_expiry_buffer())
    }

    /// Create a store with a custom proactive refresh buffer
    pub fn with_buffer(
        storage: Arc<dyn KeyValueStorage>,
        refresher: Arc<dyn TokenRefresher>,
        buffer: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                token: RwLock::new(None),
                storage,
                refresher,
                buffer,
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                timer: Mutex::new(None),
                events,
            }),
        }
    }

    /// Load the persisted token into memory and schedule its refresh
    pub fn restore(&self) -> Option<String> {
        let token = self.inner.storage.get(ACCESS_TOKEN_KEY)?;
        debug!("restored persisted access token");
        self.inner.write_token(Some(token.clone()));
        self.inner.reschedule(Some(&token), Origin::External);
        Some(token)
    }

    /// Replace the canonical token, persist it and reschedule the refresh timer
    pub fn set_token(&self, token: Option<String>) {
        self.inner.replace(token, Origin::External);
    }

    /// Last token set, without I/O
    pub fn get_token(&self) -> Option<String> {
        self.inner.current()
    }

    /// Current token, refreshed first if it is inside the expiry buffer
    pub async fn get_valid_token(&self) -> Option<String> {
        let token = self.get_token()?;
        if !jwt::is_expired(&token, self.inner.buffer) {
            return Some(token);
        }
        debug!("access token inside refresh window");
        self.refresh().await
    }

    /// Usable right now: held and not expired under a zero buffer
    pub fn is_authenticated(&self) -> bool {
        self.get_token()
            .is_some_and(|token| !jwt::is_expired(&token, Duration::zero()))
    }

    /// Drop in-memory and persisted token and cancel the timer
    pub fn clear(&self) {
        self.inner.replace(None, Origin::External);
    }

    /// Refresh now. Concurrent callers share one network round trip and one result.
    ///
    /// Any failure clears all token state and yields `None`.
    pub async fn refresh(&self) -> Option<String> {
        let flight = {
            let mut slot = self.inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(flight) => {
                    debug!("joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    let generation = self.inner.generation.load(Ordering::SeqCst);
                    let task = tokio::spawn(Inner::run_refresh(Arc::clone(&self.inner), generation));
                    let flight = async move { task.await.ok().flatten() }.boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };
        flight.await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a proactive refresh timer is currently scheduled
    pub fn has_scheduled_refresh(&self) -> bool {
        let timer = self.inner.timer.lock().unwrap_or_else(PoisonError::into_inner);
        timer.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_token", &self.get_token().is_some())
            .field("durable", &self.inner.storage.is_durable())
            .field("buffer_secs", &self.inner.buffer.num_seconds())
            .finish()
    }
}

impl Inner {
    fn current(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_token(&self, token: Option<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn replace(self: &Arc<Self>, token: Option<String>, origin: Origin) {
        self.write_token(token.clone());

        let persisted = match token.as_deref() {
            Some(value) => self.storage.set(ACCESS_TOKEN_KEY, value),
            None => self.storage.remove(ACCESS_TOKEN_KEY),
        };
        if let Err(err) = persisted {
            warn!(error = %err, "failed to persist access token");
        }

        self.reschedule(token.as_deref(), origin);

        let event = if token.is_some() {
            TokenEvent::Updated
        } else {
            TokenEvent::Cleared
        };
        let _ = self.events.send(event);
    }

    /// Cancel any pending timer, then schedule at most one new one
    fn reschedule(self: &Arc<Self>, token: Option<&str>, origin: Origin) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
        }

        let Some(token) = token else {
            return;
        };
        let Some(delay) = jwt::refresh_delay(token, self.buffer, Utc::now()) else {
            debug!("access token has no expiry claim; proactive refresh not scheduled");
            return;
        };
        if origin == Origin::Refresh && delay.is_zero() {
            warn!("refreshed token is already inside the refresh window; not rescheduling");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime; proactive refresh not scheduled");
            return;
        };

        debug!(delay_secs = delay.as_secs(), "scheduling proactive refresh");
        let weak = Arc::downgrade(self);
        let scheduled_for = token.to_string();
        *timer = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.current().as_deref() != Some(scheduled_for.as_str()) {
                return;
            }
            debug!("proactive refresh timer fired");
            TokenStore { inner }.refresh().await;
        }));
    }

    async fn run_refresh(inner: Arc<Inner>, generation: u64) -> Option<String> {
        let result = inner.refresher.refresh_access_token().await;
        let stale = inner.generation.load(Ordering::SeqCst) != generation;

        let outcome = match result {
            Ok(token) if !stale => {
                info!("access token refreshed");
                inner.replace(Some(token.clone()), Origin::Refresh);
                Some(token)
            }
            Err(err) if !stale => {
                warn!(error = %err, "token refresh failed; clearing session tokens");
                inner.replace(None, Origin::Refresh);
                let _ = inner.events.send(TokenEvent::RefreshFailed);
                None
            }
            _ => {
                debug!("token state changed during refresh; discarding refresh result");
                inner.current()
            }
        };

        *inner.in_flight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        outcome
    }
}
