//! In-memory repository gateway
//!
//! Keeps the store and the search index apart so tests can reproduce the
//! repository's index lag: reads see every write immediately, searches only
//! see what the index has caught up with.

use super::RepositoryGateway;
use crate::errors::{AppError, Result};
use crate::models::{EntityId, EntityKind, Resource};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

/// When writes become visible to searches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexLag {
    /// Every write is searchable at once
    Immediate,
    /// Writes are searchable after `refresh_index`
    Manual,
    /// The first `n` searches after a write do not see it
    Searches(u32),
}

struct PendingWrite {
    resource: Resource,
    remaining: u32,
}

#[derive(Default)]
struct State {
    store: HashMap<EntityId, Resource>,
    index: HashMap<EntityId, Value>,
    pending: Vec<PendingWrite>,
    creates: usize,
    updates: usize,
    searches: usize,
    failures_left: u32,
}

impl State {
    fn index_now(&mut self, resource: &Resource) {
        if let (Some(id), Ok(value)) = (resource.id(), resource.to_value()) {
            self.index.insert(id.clone(), value);
        }
    }

    fn take_failure(&mut self) -> Result<()> {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return Err(AppError::Gateway {
                status: 503,
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

/// Repository gateway backed by process memory
pub struct InMemoryGateway {
    base_url: String,
    lag: IndexLag,
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::with_index_lag(IndexLag::Immediate)
    }

    pub fn with_index_lag(lag: IndexLag) -> Self {
        Self {
            base_url: "mem://repository".to_string(),
            lag,
            state: Mutex::new(State::default()),
        }
    }

    /// Make every pending write searchable
    pub async fn refresh_index(&self) {
        let mut state = self.state.lock().await;
        let pending = std::mem::take(&mut state.pending);
        for write in pending {
            state.index_now(&write.resource);
        }
    }

    /// Fail the next `n` calls with a 503
    pub async fn fail_next(&self, n: u32) {
        self.state.lock().await.failures_left = n;
    }

    /// Every stored resource of a kind, bypassing the index
    pub async fn all_of_kind(&self, kind: EntityKind) -> Vec<Resource> {
        let state = self.state.lock().await;
        let mut resources: Vec<Resource> = state
            .store
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect();
        resources.sort_by(|a, b| a.id().cmp(&b.id()));
        resources
    }

    pub async fn create_count(&self) -> usize {
        self.state.lock().await.creates
    }

    pub async fn update_count(&self) -> usize {
        self.state.lock().await.updates
    }

    pub async fn search_count(&self) -> usize {
        self.state.lock().await.searches
    }

    fn record_write(&self, state: &mut State, resource: Resource) {
        match self.lag {
            IndexLag::Immediate | IndexLag::Searches(0) => state.index_now(&resource),
            IndexLag::Manual => state.pending.push(PendingWrite {
                resource,
                remaining: u32::MAX,
            }),
            IndexLag::Searches(n) => state.pending.push(PendingWrite {
                resource,
                remaining: n,
            }),
        }
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

/// Scalar fields match by equality, list fields by containment
fn matches_attribute(document: &Value, field: &str, expected: &Value) -> bool {
    match document.get(field) {
        Some(Value::Array(items)) => items.contains(expected),
        Some(actual) => actual == expected,
        None => false,
    }
}

#[async_trait]
impl RepositoryGateway for InMemoryGateway {
    async fn create(&self, resource: &Resource) -> Result<EntityId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;

        let id = EntityId::new(format!(
            "{}/{}/{}",
            self.base_url,
            resource.kind().collection(),
            Uuid::new_v4()
        ));
        let mut stored = resource.clone();
        stored.set_id(id.clone());

        state.store.insert(id.clone(), stored.clone());
        state.creates += 1;
        self.record_write(&mut state, stored);
        Ok(id)
    }

    async fn read(&self, id: &EntityId, kind: EntityKind) -> Result<Option<Resource>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        Ok(state.store.get(id).filter(|r| r.kind() == kind).cloned())
    }

    async fn update(&self, resource: &Resource) -> Result<()> {
        let mut state = self.state.lock().await;
        state.take_failure()?;

        let id = resource
            .id()
            .cloned()
            .ok_or_else(|| AppError::invalid_argument("cannot update a resource without an id"))?;
        if !state.store.contains_key(&id) {
            return Err(AppError::Gateway {
                status: 404,
                message: format!("{} does not exist", id),
            });
        }

        state.store.insert(id, resource.clone());
        state.updates += 1;
        self.record_write(&mut state, resource.clone());
        Ok(())
    }

    async fn find_all_by_attributes(
        &self,
        kind: EntityKind,
        attributes: &[(&str, Value)],
    ) -> Result<HashSet<EntityId>> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state.searches += 1;

        let found = state
            .index
            .iter()
            .filter(|(id, _)| state.store.get(*id).map(|r| r.kind()) == Some(kind))
            .filter(|(_, document)| {
                attributes
                    .iter()
                    .all(|(field, value)| matches_attribute(document, field, value))
            })
            .map(|(id, _)| id.clone())
            .collect();

        // Age pending writes; the ones whose lag has elapsed join the index
        let mut still_pending = Vec::new();
        for mut write in std::mem::take(&mut state.pending) {
            if write.remaining != u32::MAX {
                write.remaining = write.remaining.saturating_sub(1);
            }
            if write.remaining == 0 {
                state.index_now(&write.resource);
            } else {
                still_pending.push(write);
            }
        }
        state.pending = still_pending;

        Ok(found)
    }
}
