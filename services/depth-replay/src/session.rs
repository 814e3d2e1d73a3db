//! In-memory session store
//!
//! Holds completed datasets keyed by a generated `SessionId`. The store is
//! bounded: inserting beyond capacity evicts the earliest-created sessions.
//! Inserts and evictions happen under one write lock; lookups share a read
//! lock and never recompute anything.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;
use types::book::Snapshot;
use types::errors::SessionError;
use types::history::HistoryPoint;
use types::ids::SessionId;

use crate::aggregator::BookSeries;
use crate::config::SessionStoreConfig;

/// One ingested dataset, retrievable until evicted.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub series: BookSeries,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn total_ticks(&self) -> usize {
        self.series.total_ticks()
    }

    pub fn history(&self) -> &[HistoryPoint] {
        &self.series.history
    }

    /// Clamp `tick` into `[0, total_ticks - 1]`. `None` for an empty series.
    pub fn clamp_tick(&self, tick: i64) -> Option<usize> {
        let last = self.total_ticks().checked_sub(1)?;
        Some(usize::try_from(tick.max(0)).unwrap_or(usize::MAX).min(last))
    }

    /// Snapshot at the clamped tick, with the tick actually used.
    pub fn snapshot_at(&self, tick: i64) -> Option<(usize, &Snapshot)> {
        let tick = self.clamp_tick(tick)?;
        self.series.snapshots.get(tick).map(|snapshot| (tick, snapshot))
    }
}

#[derive(Default)]
struct StoreInner {
    sessions: HashMap<SessionId, Arc<Session>>,
    /// Session ids, oldest first.
    created_order: VecDeque<SessionId>,
}

/// Bounded store of completed sessions.
pub struct SessionStore {
    inner: RwLock<StoreInner>,
    config: SessionStoreConfig,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(SessionStoreConfig::default())
    }

    /// Store a dataset under a fresh id, evicting the oldest sessions past
    /// capacity.
    pub fn create_session(&self, series: BookSeries) -> SessionId {
        let id = SessionId::new();
        let total_ticks = series.total_ticks();
        let session = Arc::new(Session {
            id,
            series,
            created_at: Utc::now(),
        });

        let capacity = self.config.capacity.max(1);
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        inner.sessions.insert(id, session);
        inner.created_order.push_back(id);

        while inner.created_order.len() > capacity {
            if let Some(evicted) = inner.created_order.pop_front() {
                inner.sessions.remove(&evicted);
                info!(session_id = %evicted, capacity, "Evicted oldest session");
            }
        }

        info!(
            session_id = %id,
            total_ticks,
            retained = inner.sessions.len(),
            "Session created"
        );

        id
    }

    pub fn get_session(&self, id: &SessionId) -> Result<Arc<Session>, SessionError> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                session_id: id.to_string(),
            })
    }

    /// Snapshot at `tick`, clamped into the session's range.
    pub fn get_snapshot_at(&self, id: &SessionId, tick: i64) -> Result<Snapshot, SessionError> {
        let session = self.get_session(id)?;
        session
            .snapshot_at(tick)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| SessionError::NotFound {
                session_id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity.max(1)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::DepthAggregator;
    use std::thread;
    use types::book::BookLevel;

    fn series(ticks: usize) -> BookSeries {
        let mut agg = DepthAggregator::new(1000);
        for tick in 0..ticks {
            agg.push(Snapshot {
                ts_recv: format!("r{}", tick),
                ts_event: format!("e{}", tick),
                bids: BookLevel::new(100.0, tick as f64 + 1.0).into_iter().collect(),
                asks: vec![],
            });
        }
        agg.finish().unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::with_defaults();
        let id = store.create_session(series(3));

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.id, id);
        assert_eq!(session.total_ticks(), 3);
        assert_eq!(session.history().len(), 3);
        assert!(store.contains(&id));
    }

    #[test]
    fn test_unknown_session() {
        let store = SessionStore::with_defaults();
        let id = SessionId::new();
        assert_eq!(
            store.get_session(&id).unwrap_err(),
            SessionError::NotFound {
                session_id: id.to_string()
            }
        );
        assert!(store.get_snapshot_at(&id, 0).is_err());
    }

    #[test]
    fn test_snapshot_tick_is_clamped() {
        let store = SessionStore::with_defaults();
        let id = store.create_session(series(5));

        assert_eq!(store.get_snapshot_at(&id, -5).unwrap().ts_recv, "r0");
        assert_eq!(store.get_snapshot_at(&id, 2).unwrap().ts_recv, "r2");
        assert_eq!(store.get_snapshot_at(&id, 5 + 1000).unwrap().ts_recv, "r4");
        assert_eq!(store.get_snapshot_at(&id, i64::MAX).unwrap().ts_recv, "r4");
    }

    #[test]
    fn test_clamp_tick_reports_used_tick() {
        let store = SessionStore::with_defaults();
        let id = store.create_session(series(4));
        let session = store.get_session(&id).unwrap();

        assert_eq!(session.clamp_tick(-1), Some(0));
        assert_eq!(session.clamp_tick(3), Some(3));
        assert_eq!(session.clamp_tick(99), Some(3));
        assert_eq!(session.snapshot_at(99).unwrap().0, 3);
    }

    #[test]
    fn test_eleventh_session_evicts_oldest() {
        let store = SessionStore::with_defaults();
        let ids: Vec<SessionId> = (0..10).map(|_| store.create_session(series(1))).collect();
        assert_eq!(store.len(), 10);

        let newest = store.create_session(series(1));

        assert_eq!(store.len(), 10);
        assert!(!store.contains(&ids[0]));
        assert!(store.get_session(&ids[0]).is_err());
        for id in &ids[1..] {
            assert!(store.contains(id));
        }
        assert!(store.contains(&newest));
    }

    #[test]
    fn test_eviction_ignores_access() {
        let store = SessionStore::new(SessionStoreConfig { capacity: 2 });
        let first = store.create_session(series(1));
        let second = store.create_session(series(1));

        // Reading the oldest does not protect it.
        store.get_session(&first).unwrap();
        store.create_session(series(1));

        assert!(!store.contains(&first));
        assert!(store.contains(&second));
    }

    #[test]
    fn test_evicted_session_survives_for_holders() {
        let store = SessionStore::new(SessionStoreConfig { capacity: 1 });
        let first = store.create_session(series(2));
        let held = store.get_session(&first).unwrap();

        store.create_session(series(1));

        assert!(!store.contains(&first));
        assert_eq!(held.total_ticks(), 2);
    }

    #[test]
    fn test_concurrent_creates_respect_capacity() {
        let store = Arc::new(SessionStore::with_defaults());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..5)
                        .map(|_| store.create_session(series(1)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            created += handle.join().unwrap().len();
        }

        assert_eq!(created, 40);
        assert_eq!(store.len(), 10);
    }
}
