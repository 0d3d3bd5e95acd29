//! Session pool keyed by endpoint, tenant and user.
//!
//! Sessions idle out after a TTL that is rearmed on every access. A
//! background task sweeps expired sessions; access through the pool also
//! short-circuits sessions that have already expired but not yet been swept.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::events::HandlerEventBus;
use crate::adapters::transport::Connection;
use crate::config::{ClientInfo, PoolConfig, WaitConfig};
use crate::domain::foundation::EngineError;
use crate::domain::page::PageState;
use crate::ports::TransportFactory;

/// Identity of a pooled session.
///
/// A pool is bound to one transport factory, so every session it creates
/// connects to that factory's endpoint; `endpoint` keeps keys distinct for
/// callers that address several pools through one keyspace, it does not
/// route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub endpoint: String,
    pub tenant: String,
    pub user: String,
}

struct SessionEntry {
    key: SessionKey,
    connection: Arc<Connection>,
    gate: Arc<Mutex<()>>,
    last_access: Instant,
}

struct PoolInner {
    sessions: HashMap<String, SessionEntry>,
    by_key: HashMap<SessionKey, String>,
}

/// Checked-out view of a pooled session.
///
/// Interactions acquire the session gate first, so concurrent callers of the
/// same session are serialized rather than interleaving their waits on the
/// shared connection.
pub struct SessionHandle {
    id: String,
    connection: Arc<Connection>,
    gate: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// See [`Connection::open_page`].
    ///
    /// # Errors
    ///
    /// Propagates connection and wait errors from the underlying driver.
    pub async fn open_page(&self, page_id: &str) -> Result<PageState, EngineError> {
        let _guard = self.gate.lock().await;
        self.connection.open_page(page_id).await
    }

    /// See [`Connection::invoke`].
    ///
    /// # Errors
    ///
    /// Propagates connection and wait errors from the underlying driver.
    pub async fn invoke(
        &self,
        page: &mut PageState,
        method: &str,
        params: Value,
    ) -> Result<(), EngineError> {
        let _guard = self.gate.lock().await;
        self.connection.invoke(page, method, params).await
    }
}

/// Owns all live sessions and their idle lifecycle.
///
/// One pool serves exactly one endpoint: all connections come from the
/// single factory handed to [`Self::new`]. Deployments talking to several
/// endpoints run one pool per endpoint.
pub struct SessionPool {
    factory: Arc<dyn TransportFactory>,
    client: ClientInfo,
    idle_ttl: Duration,
    wait_timeout: Duration,
    inner: Arc<Mutex<PoolInner>>,
    shutdown: CancellationToken,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionPool {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        client: ClientInfo,
        pool: &PoolConfig,
        wait: &WaitConfig,
    ) -> Self {
        let inner = Arc::new(Mutex::new(PoolInner {
            sessions: HashMap::new(),
            by_key: HashMap::new(),
        }));
        let shutdown = CancellationToken::new();
        let sweeper = tokio::spawn(sweep_loop(
            inner.clone(),
            Duration::from_secs(pool.idle_ttl_secs),
            Duration::from_secs(pool.cleanup_interval_secs),
            shutdown.clone(),
        ));

        Self {
            factory,
            client,
            idle_ttl: Duration::from_secs(pool.idle_ttl_secs),
            wait_timeout: Duration::from_millis(wait.default_timeout_ms),
            inner,
            shutdown,
            sweeper: std::sync::Mutex::new(Some(sweeper)),
        }
    }

    /// Returns the session for `key`, creating one when none is live.
    /// Rearms the idle TTL on a hit.
    pub async fn get_or_create_session(&self, key: &SessionKey) -> SessionHandle {
        let mut inner = self.inner.lock().await;

        if let Some(id) = inner.by_key.get(key).cloned() {
            let expired = inner
                .sessions
                .get(&id)
                .map(|e| e.last_access.elapsed() >= self.idle_ttl)
                .unwrap_or(true);
            if !expired {
                let entry = inner
                    .sessions
                    .get_mut(&id)
                    .expect("by_key index out of sync with sessions");
                entry.last_access = Instant::now();
                return SessionHandle {
                    id,
                    connection: entry.connection.clone(),
                    gate: entry.gate.clone(),
                };
            }
            // Expired but not yet swept: evict before recreating.
            if let Some(stale) = inner.sessions.remove(&id) {
                inner.by_key.remove(&stale.key);
                drop_connection(stale.connection);
            }
        }

        let id = Uuid::new_v4().to_string();
        let connection = Arc::new(Connection::new(
            self.factory.clone(),
            Arc::new(HandlerEventBus::new()),
            self.client.clone(),
            self.wait_timeout,
        ));
        let gate = Arc::new(Mutex::new(()));
        tracing::info!(session_id = id.as_str(), user = key.user.as_str(), "session created");

        inner.by_key.insert(key.clone(), id.clone());
        inner.sessions.insert(
            id.clone(),
            SessionEntry {
                key: key.clone(),
                connection: connection.clone(),
                gate: gate.clone(),
                last_access: Instant::now(),
            },
        );
        SessionHandle {
            id,
            connection,
            gate,
        }
    }

    /// Looks a session up by id, rearming its TTL.
    ///
    /// # Errors
    ///
    /// [`EngineError::SessionNotFound`] when the id is unknown or the
    /// session has idled out.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionHandle, EngineError> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.sessions.get(session_id) {
            Some(entry) => entry.last_access.elapsed() >= self.idle_ttl,
            None => return Err(EngineError::SessionNotFound(session_id.to_string())),
        };
        if expired {
            if let Some(stale) = inner.sessions.remove(session_id) {
                inner.by_key.remove(&stale.key);
                drop_connection(stale.connection);
            }
            return Err(EngineError::SessionNotFound(session_id.to_string()));
        }

        let entry = inner
            .sessions
            .get_mut(session_id)
            .expect("checked above");
        entry.last_access = Instant::now();
        Ok(SessionHandle {
            id: session_id.to_string(),
            connection: entry.connection.clone(),
            gate: entry.gate.clone(),
        })
    }

    /// Closes one session. Returns whether it existed.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let removed = {
            let mut inner = self.inner.lock().await;
            inner.sessions.remove(session_id).map(|entry| {
                inner.by_key.remove(&entry.key);
                entry.connection
            })
        };
        match removed {
            Some(connection) => {
                connection.close().await;
                tracing::info!(session_id, "session closed");
                true
            }
            None => false,
        }
    }

    /// Closes every session and stops the sweeper.
    pub async fn close_all(&self) {
        self.shutdown.cancel();
        let sweeper = self
            .sweeper
            .lock()
            .expect("SessionPool: sweeper lock poisoned")
            .take();
        if let Some(handle) = sweeper {
            let _ = handle.await;
        }

        let connections: Vec<Arc<Connection>> = {
            let mut inner = self.inner.lock().await;
            inner.by_key.clear();
            inner.sessions.drain().map(|(_, e)| e.connection).collect()
        };
        for connection in connections {
            connection.close().await;
        }
    }

    pub async fn session_count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }
}

/// Closing a connection is async but eviction happens under the pool lock,
/// so the close is detached.
fn drop_connection(connection: Arc<Connection>) {
    tokio::spawn(async move {
        connection.close().await;
    });
}

async fn sweep_loop(
    inner: Arc<Mutex<PoolInner>>,
    idle_ttl: Duration,
    sweep_interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let expired: Vec<(String, Arc<Connection>)> = {
            let mut inner = inner.lock().await;
            let ids: Vec<String> = inner
                .sessions
                .iter()
                .filter(|(_, e)| e.last_access.elapsed() >= idle_ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    inner.sessions.remove(&id).map(|entry| {
                        inner.by_key.remove(&entry.key);
                        (id, entry.connection)
                    })
                })
                .collect()
        };

        for (id, connection) in expired {
            tracing::debug!(session_id = id.as_str(), "session idled out");
            connection.close().await;
        }
    }
}
