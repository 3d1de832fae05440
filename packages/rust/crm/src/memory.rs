//! Process-local CRM backend.
//!
//! Used by `abm run --dry-run` and by tests. Failures can be queued with
//! [`InMemoryCrm::push_failure`]; each queued error is returned by the next
//! backend call, whatever it is.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::{CrmBackend, CrmEntity, CrmError, EntityKind, Properties};

/// A record held by [`InMemoryCrm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub id: String,
    pub properties: Properties,
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<(EntityKind, String), StoredRecord>,
    next_id: u64,
    failures: VecDeque<CrmError>,
    calls: usize,
}

impl MemoryState {
    /// Count the call and pop a queued failure, if any.
    fn begin_call(&mut self) -> Result<(), CrmError> {
        self.calls += 1;
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCrm {
    state: Mutex<MemoryState>,
}

impl InMemoryCrm {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an error for the next backend call.
    pub fn push_failure(&self, err: CrmError) {
        self.state().failures.push_back(err);
    }

    /// Total backend calls made so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.state().calls
    }

    pub fn get(&self, kind: EntityKind, key: &str) -> Option<StoredRecord> {
        self.state().records.get(&(kind, key.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CrmBackend for InMemoryCrm {
    async fn find_by_key(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<CrmEntity>, CrmError> {
        let mut state = self.state();
        state.begin_call()?;
        Ok(state
            .records
            .get(&(kind, key.to_string()))
            .map(|r| CrmEntity { id: r.id.clone() }))
    }

    async fn create(
        &self,
        kind: EntityKind,
        properties: &Properties,
    ) -> Result<CrmEntity, CrmError> {
        let mut state = self.state();
        state.begin_call()?;

        let key = properties
            .get(kind.key_property())
            .cloned()
            .ok_or_else(|| CrmError::Remote {
                code: 400,
                message: format!("missing required property '{}'", kind.key_property()),
            })?;

        state.next_id += 1;
        let id = state.next_id.to_string();
        state.records.insert(
            (kind, key),
            StoredRecord {
                id: id.clone(),
                properties: properties.clone(),
            },
        );
        Ok(CrmEntity { id })
    }

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        properties: &Properties,
    ) -> Result<(), CrmError> {
        let mut state = self.state();
        state.begin_call()?;

        let record = state
            .records
            .iter_mut()
            .find(|((k, _), r)| *k == kind && r.id == id)
            .map(|(_, r)| r)
            .ok_or_else(|| CrmError::Remote {
                code: 404,
                message: format!("{kind} {id} not found"),
            })?;
        record.properties.extend(properties.clone());
        Ok(())
    }
}
