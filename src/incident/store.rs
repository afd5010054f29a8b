use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event::Event;
use crate::incident::{Incident, IncidentError, IncidentStatus};

/// In-memory registry of every incident opened by this process.
///
/// Readers always receive cloned snapshots, so listing never observes a
/// half-applied mutation and never holds the lock across an await point.
pub struct IncidentStore {
    incidents: RwLock<HashMap<Uuid, Incident>>,
    next_seq: AtomicU64,
}

impl Default for IncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentStore {
    pub fn new() -> Self {
        Self {
            incidents: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Open a new incident for `event` and return a copy of it.
    pub async fn open(&self, event: Event) -> Incident {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let incident = Incident::open(event, seq);
        self.incidents
            .write()
            .await
            .insert(incident.id, incident.clone());
        incident
    }

    /// Apply `f` to the incident under the write lock.
    pub async fn update<F, R>(&self, id: Uuid, f: F) -> Result<R, IncidentError>
    where
        F: FnOnce(&mut Incident) -> R,
    {
        let mut guard = self.incidents.write().await;
        let incident = guard.get_mut(&id).ok_or(IncidentError::NotFound(id))?;
        Ok(f(incident))
    }

    pub async fn transition(&self, id: Uuid, next: IncidentStatus) -> Result<(), IncidentError> {
        self.update(id, |inc| inc.transition(next)).await?
    }

    pub async fn get(&self, id: Uuid) -> Option<Incident> {
        self.incidents.read().await.get(&id).cloned()
    }

    /// The incident opened for the event with `event_id`, if any.
    pub async fn find_by_event(&self, event_id: Uuid) -> Option<Incident> {
        self.incidents
            .read()
            .await
            .values()
            .find(|inc| inc.event.id == event_id)
            .cloned()
    }

    /// All incidents, newest first.
    pub async fn list(&self) -> Vec<Incident> {
        let mut list: Vec<Incident> = self.incidents.read().await.values().cloned().collect();
        list.sort_by(|a, b| b.opened_at.cmp(&a.opened_at).then(b.seq.cmp(&a.seq)));
        list
    }

    /// Non-terminal incidents with no progress for longer than `max_age`.
    pub async fn stale(&self, max_age: Duration) -> Vec<Incident> {
        let cutoff = Utc::now() - max_age;
        self.list()
            .await
            .into_iter()
            .filter(|inc| !inc.status.is_terminal() && inc.updated_at <= cutoff)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.incidents.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use serde_json::json;

    fn evt(n: u64) -> Event {
        Event::with_json(EventType::CustomAlert, "test", json!({ "n": n }))
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let store = IncidentStore::new();
        let first = store.open(evt(1)).await;
        let second = store.open(evt(2)).await;
        let third = store.open(evt(3)).await;

        let ids: Vec<Uuid> = store.list().await.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![third.id, second.id, first.id]);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_listing_is_idempotent() {
        let store = IncidentStore::new();
        for n in 0..5 {
            store.open(evt(n)).await;
        }
        let a: Vec<Uuid> = store.list().await.iter().map(|i| i.id).collect();
        let b: Vec<Uuid> = store.list().await.iter().map(|i| i.id).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_find_by_event() {
        let store = IncidentStore::new();
        let event = evt(9);
        let event_id = event.id;
        let inc = store.open(event).await;
        store.open(evt(10)).await;

        assert_eq!(store.find_by_event(event_id).await.unwrap().id, inc.id);
        assert!(store.find_by_event(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_incident() {
        let store = IncidentStore::new();
        let id = Uuid::new_v4();
        let err = store.update(id, |_| ()).await.unwrap_err();
        assert_eq!(err, IncidentError::NotFound(id));
    }

    #[tokio::test]
    async fn test_transition_through_store() {
        let store = IncidentStore::new();
        let inc = store.open(evt(1)).await;
        store.transition(inc.id, IncidentStatus::Mitigating).await.unwrap();
        assert!(store.transition(inc.id, IncidentStatus::Open).await.is_err());
        assert_eq!(store.get(inc.id).await.unwrap().status, IncidentStatus::Mitigating);
    }

    #[tokio::test]
    async fn test_stale_ignores_terminal_incidents() {
        let store = IncidentStore::new();
        let stuck = store.open(evt(1)).await;
        let done = store.open(evt(2)).await;
        store.transition(stuck.id, IncidentStatus::Mitigating).await.unwrap();
        store.transition(done.id, IncidentStatus::Mitigating).await.unwrap();
        store.transition(done.id, IncidentStatus::Failed).await.unwrap();

        let stale = store.stale(Duration::zero()).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, stuck.id);
        assert!(store.stale(Duration::hours(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_open_and_list() {
        let store = std::sync::Arc::new(IncidentStore::new());
        let mut handles = Vec::new();
        for n in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.open(evt(n)).await;
                store.list().await.len()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap() >= 1);
        }
        assert_eq!(store.len().await, 20);
    }
}
