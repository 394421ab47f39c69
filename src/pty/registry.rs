//! Process-wide session registry.
//!
//! Maps session id to live [`Session`], scoped by owning user. Sessions
//! leave the registry when deleted, when their shell exits (the last
//! departing client removes them) or when the idle reaper collects them.

use super::session::Session;
use super::types::SessionInfo;
use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_SCROLLBACK_CAPACITY: usize = 64 * 1024;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    scrollback_capacity: usize,
}

impl SessionRegistry {
    pub fn new(scrollback_capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            scrollback_capacity,
        }
    }

    /// Spawn a shell and register the session. An empty or missing name
    /// becomes `"Session N"`, N counting the user's current sessions.
    pub fn create(&self, user_id: &str, name: Option<String>) -> Result<Arc<Session>> {
        let id = Uuid::new_v4().to_string();
        let name = match name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => format!("Session {}", self.count_for_user(user_id) + 1),
        };

        let session = Session::spawn(
            id.clone(),
            user_id.to_string(),
            name,
            self.scrollback_capacity,
        )?;
        self.sessions.write().insert(id.clone(), session.clone());
        info!("[registry] session {} created for {}", id, user_id);
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close and remove a session.
    pub fn delete(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.write().remove(id)?;
        session.close();
        info!("[registry] session {} deleted", id);
        Some(session)
    }

    /// Drop a session whose shell has exited, once no client remains.
    /// The session stays listed while clients are still draining it.
    pub fn remove_if_finished(&self, id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(session) = sessions.get(id) {
            if session.exit_code().is_some() && !session.has_clients() {
                sessions.remove(id);
                debug!("[registry] session {} removed (finished)", id);
            }
        }
    }

    /// Snapshots of the user's non-closed sessions.
    pub fn list_by_user(&self, user_id: &str) -> Vec<SessionInfo> {
        let sessions = self.sessions.read();
        let mut infos: Vec<_> = sessions
            .values()
            .filter(|s| s.user_id == user_id && !s.is_closed())
            .map(|s| s.info())
            .collect();
        infos.sort_by(|a, b| a.created_at.total_cmp(&b.created_at));
        infos
    }

    fn count_for_user(&self, user_id: &str) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id && !s.is_closed())
            .count()
    }

    /// Close every session owned by `user_id`. Returns how many.
    pub fn close_user_sessions(&self, user_id: &str) -> usize {
        let ids: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| s.user_id == user_id)
                .map(|s| s.id.clone())
                .collect()
        };
        let count = ids.len();
        for id in &ids {
            self.delete(id);
        }
        count
    }

    /// Close sessions that have seen no input for longer than `max_idle`.
    pub fn reap_idle(&self, max_idle: Duration) -> usize {
        let idle: Vec<String> = {
            let sessions = self.sessions.read();
            sessions
                .values()
                .filter(|s| s.idle_for() > max_idle)
                .map(|s| s.id.clone())
                .collect()
        };
        let count = idle.len();
        for id in &idle {
            info!("[registry] reaping idle session {}", id);
            self.delete(id);
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

/// Periodically reap idle sessions until `shutdown` flips.
pub async fn run_reaper(
    registry: Arc<SessionRegistry>,
    period: Duration,
    max_idle: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = registry.reap_idle(max_idle);
                if reaped > 0 {
                    info!("[registry] reaped {} idle session(s)", reaped);
                }
            }
            _ = shutdown.changed() => {
                debug!("[registry] reaper stopping");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn default_names_count_per_user() {
        let registry = SessionRegistry::new(DEFAULT_SCROLLBACK_CAPACITY);
        let a1 = registry.create("alice", None).unwrap();
        let a2 = registry.create("alice", None).unwrap();
        let b1 = registry.create("bob", None).unwrap();
        assert_eq!(a1.name(), "Session 1");
        assert_eq!(a2.name(), "Session 2");
        assert_eq!(b1.name(), "Session 1");
        registry.close_user_sessions("alice");
        registry.close_user_sessions("bob");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn list_is_scoped_to_owner() {
        let registry = SessionRegistry::new(DEFAULT_SCROLLBACK_CAPACITY);
        let a = registry.create("alice", Some("mine".into())).unwrap();
        registry.create("bob", None).unwrap();

        let listed = registry.list_by_user("alice");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[0].name, "mine");
        assert!(!listed[0].attached);

        registry.close_user_sessions("alice");
        registry.close_user_sessions("bob");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_closes_and_unlists() {
        let registry = SessionRegistry::new(DEFAULT_SCROLLBACK_CAPACITY);
        let s = registry.create("alice", None).unwrap();
        assert!(registry.get(&s.id).is_some());
        let deleted = registry.delete(&s.id).unwrap();
        assert!(deleted.is_closed());
        assert!(registry.get(&s.id).is_none());
        assert!(registry.list_by_user("alice").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reap_only_collects_idle_sessions() {
        let registry = SessionRegistry::new(DEFAULT_SCROLLBACK_CAPACITY);
        let s = registry.create("alice", None).unwrap();
        assert_eq!(registry.reap_idle(Duration::from_secs(3600)), 0);
        assert_eq!(registry.reap_idle(Duration::ZERO), 1);
        assert!(registry.get(&s.id).is_none());
    }
}
