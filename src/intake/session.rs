//! In-progress intake sessions and the per-user store that holds them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::category::Category;
use super::validator::ValidationFailure;

/// Live state of one user's intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    /// Current position in the instruction sequence, starting at 1.
    pub step: u32,
    pub category: Option<Category>,
    /// Validated answers and upload URLs, keyed by field key.
    pub fields: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.to_string(),
            step: 1,
            category: None,
            fields: BTreeMap::new(),
            started_at: now,
            last_activity: now,
        }
    }

    /// Check that `category` may be recorded on this session.
    ///
    /// Once a category is set it can only be confirmed, never changed.
    pub fn check_category(&self, category: Category) -> Result<(), ValidationFailure> {
        match self.category {
            Some(current) if current != category => {
                Err(ValidationFailure::CategoryLocked { current })
            }
            _ => Ok(()),
        }
    }

    /// Move to the next step.
    pub fn advance(&mut self) {
        self.step += 1;
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.last_activity)
            .to_std()
            .unwrap_or_default()
    }
}

/// A user's slot: the lock is what serializes that user's messages.
pub type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Guard over one user's session, held for the whole of one message.
pub type SessionGuard = OwnedMutexGuard<Option<Session>>;

/// Process-wide mapping from user id to session.
///
/// Owned by whoever wires up the engine and injected into it. Nothing is
/// persisted; a restart drops every in-flight session.
#[derive(Default)]
pub struct SessionStore {
    slots: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, user_id: &str) -> SessionSlot {
        if let Some(slot) = self.slots.read().await.get(user_id) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write().await;
        Arc::clone(slots.entry(user_id.to_string()).or_default())
    }

    /// Take exclusive access to a user's session.
    ///
    /// Waiters are granted the lock in the order they started waiting.
    pub async fn lock(&self, user_id: &str) -> SessionGuard {
        self.slot(user_id).await.lock_owned().await
    }

    /// Snapshot of a user's session.
    pub async fn get(&self, user_id: &str) -> Option<Session> {
        let slot = self.slots.read().await.get(user_id).cloned()?;
        slot.lock().await.clone()
    }

    pub async fn put(&self, session: Session) {
        let mut guard = self.lock(&session.user_id).await;
        *guard = Some(session);
    }

    pub async fn remove(&self, user_id: &str) -> Option<Session> {
        let slot = self.slots.read().await.get(user_id).cloned()?;
        let session = slot.lock().await.take();
        drop(slot);
        self.release(user_id).await;
        session
    }

    /// Forget a user's slot if it holds no session and nobody else holds
    /// or waits on it.
    pub async fn release(&self, user_id: &str) {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get(user_id) else {
            return;
        };
        let empty = Arc::strong_count(slot) == 1
            && slot.try_lock().map(|guard| guard.is_none()).unwrap_or(false);
        if empty {
            slots.remove(user_id);
        }
    }

    /// Number of users the store currently tracks, with or without a session.
    pub async fn slot_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Number of users with a session in progress.
    pub async fn active_count(&self) -> usize {
        let slots: Vec<SessionSlot> = self.slots.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Drop sessions idle for longer than `max_idle` and forget empty slots.
    ///
    /// Slots currently held by an in-flight message are left alone.
    /// Returns the number of sessions dropped.
    pub async fn prune_stale(&self, max_idle: Duration) -> usize {
        let now = Utc::now();
        let mut slots = self.slots.write().await;
        let mut pruned = 0;
        slots.retain(|user_id, slot| {
            let Ok(mut guard) = slot.try_lock() else {
                return true;
            };
            if let Some(session) = guard.as_ref() {
                if session.idle_for(now) <= max_idle {
                    return true;
                }
                tracing::info!(user_id = %user_id, step = session.step, "Dropping idle session");
                *guard = None;
                pruned += 1;
            }
            drop(guard);
            Arc::strong_count(slot) > 1
        });
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_at_step_one() {
        let session = Session::new("628123");
        assert_eq!(session.step, 1);
        assert!(session.category.is_none());
        assert!(session.fields.is_empty());
    }

    #[test]
    fn category_can_be_confirmed_but_not_changed() {
        let mut session = Session::new("u");
        assert!(session.check_category(Category::Sd).is_ok());
        session.category = Some(Category::Sd);
        assert!(session.check_category(Category::Sd).is_ok());
        assert_eq!(
            session.check_category(Category::Smp),
            Err(ValidationFailure::CategoryLocked {
                current: Category::Sd
            })
        );
    }

    #[tokio::test]
    async fn put_get_remove() {
        let store = SessionStore::new();
        assert!(store.get("u1").await.is_none());

        store.put(Session::new("u1")).await;
        assert_eq!(store.get("u1").await.unwrap().step, 1);
        assert_eq!(store.active_count().await, 1);

        assert!(store.remove("u1").await.is_some());
        assert!(store.get("u1").await.is_none());
        assert_eq!(store.active_count().await, 0);
    }

    #[tokio::test]
    async fn lock_serializes_same_user() {
        let store = Arc::new(SessionStore::new());
        let guard = store.lock("u1").await;

        let store2 = Arc::clone(&store);
        let waiter = tokio::spawn(async move {
            let mut g = store2.lock("u1").await;
            *g = Some(Session::new("u1"));
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "second lock must wait for the first");
        drop(guard);
        waiter.await.unwrap();
        assert!(store.get("u1").await.is_some());
    }

    #[tokio::test]
    async fn different_users_do_not_block() {
        let store = SessionStore::new();
        let _held = store.lock("u1").await;
        let other = tokio::time::timeout(Duration::from_millis(50), store.lock("u2")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn reads_of_unknown_users_leave_no_slots() {
        let store = SessionStore::new();
        for i in 0..1000 {
            assert!(store.get(&format!("user{i}")).await.is_none());
            assert!(store.remove(&format!("user{i}")).await.is_none());
        }
        assert_eq!(store.slot_count().await, 0);
    }

    #[tokio::test]
    async fn release_keeps_live_and_held_slots() {
        let store = SessionStore::new();
        store.put(Session::new("live")).await;
        store.release("live").await;
        assert!(store.get("live").await.is_some());

        let held = store.lock("held").await;
        store.release("held").await;
        assert_eq!(store.slot_count().await, 2);

        drop(held);
        store.release("held").await;
        assert_eq!(store.slot_count().await, 1);

        store.remove("live").await;
        assert_eq!(store.slot_count().await, 0);
    }

    #[tokio::test]
    async fn prune_stale_drops_only_idle_sessions() {
        let store = SessionStore::new();
        let mut old = Session::new("old");
        old.last_activity = Utc::now() - chrono::Duration::hours(3);
        store.put(old).await;
        store.put(Session::new("fresh")).await;

        let pruned = store.prune_stale(Duration::from_secs(3600)).await;
        assert_eq!(pruned, 1);
        assert!(store.get("old").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }
}
