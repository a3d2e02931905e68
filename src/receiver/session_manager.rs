//! Session registry
//!
//! Sessions are keyed by the peer identity the handshake server sees
//! (one client connection, one session). The registry owns sessions
//! through the handshake phase; when streaming starts, the driver takes
//! ownership and the registry only remembers the key for teardown.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::ReceiverConfig;
use crate::error::StreamError;
use crate::receiver::session::Session;

struct Entry {
    session: Session,
    last_activity: Instant,
}

/// Registry of per-connection sessions
pub struct SessionManager {
    config: ReceiverConfig,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionManager {
    /// Create an empty registry; new sessions inherit `config`
    #[must_use]
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Create a session for `peer`, replacing any previous one
    ///
    /// Returns the new session's identifier.
    pub async fn create(&self, peer: &str) -> String {
        let session = Session::new(self.config.clone());
        let id = session.id().to_string();

        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(peer) {
            tracing::warn!(peer, "replacing existing session");
        }
        sessions.insert(
            peer.to_string(),
            Entry {
                session,
                last_activity: Instant::now(),
            },
        );
        tracing::info!(peer, session = %id, "session created");
        id
    }

    /// Run `f` against `peer`'s session, refreshing its activity clock
    ///
    /// # Errors
    /// Returns `StreamError::SessionNotFound` when no session exists for
    /// `peer`.
    pub async fn with_session<R>(
        &self,
        peer: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, StreamError> {
        let mut sessions = self.sessions.lock().await;
        let entry = sessions
            .get_mut(peer)
            .ok_or_else(|| StreamError::SessionNotFound(peer.to_string()))?;

        entry.last_activity = Instant::now();
        Ok(f(&mut entry.session))
    }

    /// Take ownership of `peer`'s session (handing it to its driver)
    pub async fn take(&self, peer: &str) -> Option<Session> {
        self.sessions
            .lock()
            .await
            .remove(peer)
            .map(|entry| entry.session)
    }

    /// Return a session to the registry (driver finished, client kept
    /// the connection)
    pub async fn put_back(&self, peer: &str, session: Session) {
        self.sessions.lock().await.insert(
            peer.to_string(),
            Entry {
                session,
                last_activity: Instant::now(),
            },
        );
    }

    /// Drop `peer`'s session, if any
    pub async fn remove(&self, peer: &str) -> bool {
        let removed = self.sessions.lock().await.remove(peer).is_some();
        if removed {
            tracing::info!(peer, "session removed");
        }
        removed
    }

    /// Drop sessions idle longer than `max_idle`; returns the evicted
    /// peer keys
    pub async fn sweep_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        let idle: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) >= max_idle)
            .map(|(peer, _)| peer.clone())
            .collect();

        for peer in &idle {
            sessions.remove(peer);
            tracing::info!(peer, "idle session evicted");
        }
        idle
    }

    /// Number of registered sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Is the registry empty?
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_with_session_and_remove() {
        let manager = SessionManager::new(ReceiverConfig::default());

        let id = manager.create("10.0.0.5:49152").await;
        let seen = manager
            .with_session("10.0.0.5:49152", |session| session.id().to_string())
            .await
            .unwrap();
        assert_eq!(seen, id);

        assert!(manager.remove("10.0.0.5:49152").await);
        assert!(!manager.remove("10.0.0.5:49152").await);
    }

    #[tokio::test]
    async fn unknown_peer_is_an_error() {
        let manager = SessionManager::new(ReceiverConfig::default());

        let result = manager.with_session("nobody", |_| ()).await;
        assert!(matches!(result, Err(StreamError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn take_transfers_ownership_and_put_back_restores_it() {
        let manager = SessionManager::new(ReceiverConfig::default());
        manager.create("peer").await;

        let session = manager.take("peer").await.unwrap();
        assert!(manager.is_empty().await);

        manager.put_back("peer", session).await;
        assert_eq!(manager.len().await, 1);
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let manager = SessionManager::new(ReceiverConfig::default());
        manager.create("peer").await;

        assert!(manager.sweep_idle(Duration::from_secs(60)).await.is_empty());
        let evicted = manager.sweep_idle(Duration::ZERO).await;
        assert_eq!(evicted, vec!["peer".to_string()]);
        assert!(manager.is_empty().await);
    }
}
