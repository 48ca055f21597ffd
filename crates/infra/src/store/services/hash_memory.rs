use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rowforge_core::ColumnMap;

use super::{HashService, ListEnd, ServiceError};

#[derive(Debug, Default)]
struct HashState {
    hashes: HashMap<Vec<u8>, ColumnMap>,
    strings: HashMap<Vec<u8>, Vec<u8>>,
    sets: HashMap<Vec<u8>, BTreeSet<Vec<u8>>>,
    lists: HashMap<Vec<u8>, VecDeque<Vec<u8>>>,
}

impl HashState {
    fn contains(&self, key: &[u8]) -> bool {
        self.hashes.contains_key(key)
            || self.strings.contains_key(key)
            || self.sets.contains_key(key)
            || self.lists.contains_key(key)
    }
}

/// In-memory hash-map service for tests/dev.
///
/// Mirrors the remote service's semantics: empty hashes, sets and lists
/// vanish, and key enumeration follows `HashMap` order (i.e. none).
#[derive(Debug, Default)]
pub struct InMemoryHashService {
    state: Mutex<HashState>,
    pushed: Condvar,
}

impl InMemoryHashService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashState>, ServiceError> {
        self.state.lock().map_err(|_| ServiceError::Poisoned)
    }
}

impl HashService for InMemoryHashService {
    fn hset_multiple(
        &self,
        key: &[u8],
        fields: &[(Vec<u8>, Vec<u8>)],
    ) -> Result<(), ServiceError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut state = self.lock()?;
        let hash = state.hashes.entry(key.to_vec()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    fn hgetall(&self, key: &[u8]) -> Result<ColumnMap, ServiceError> {
        let state = self.lock()?;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    fn hkeys(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        let state = self.lock()?;
        Ok(state
            .hashes
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        let state = self.lock()?;
        Ok(state.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    fn hdel(&self, key: &[u8], field: &[u8]) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if let Some(hash) = state.hashes.get_mut(key) {
            hash.remove(field);
            if hash.is_empty() {
                state.hashes.remove(key);
            }
        }
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.hashes.remove(key);
        state.strings.remove(key);
        state.sets.remove(key);
        state.lists.remove(key);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, ServiceError> {
        Ok(self.lock()?.contains(key))
    }

    fn set_nx(&self, key: &[u8], value: &[u8]) -> Result<bool, ServiceError> {
        let mut state = self.lock()?;
        if state.contains(key) {
            return Ok(false);
        }
        state.strings.insert(key.to_vec(), value.to_vec());
        Ok(true)
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        let state = self.lock()?;
        let keys = state
            .hashes
            .keys()
            .chain(state.strings.keys())
            .chain(state.sets.keys())
            .chain(state.lists.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(keys)
    }

    fn sadd(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state
            .sets
            .entry(key.to_vec())
            .or_default()
            .insert(member.to_vec());
        Ok(())
    }

    fn srem(&self, key: &[u8], member: &[u8]) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        if let Some(set) = state.sets.get_mut(key) {
            set.remove(member);
            if set.is_empty() {
                state.sets.remove(key);
            }
        }
        Ok(())
    }

    fn smembers(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, ServiceError> {
        let state = self.lock()?;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn push(&self, key: &[u8], value: &[u8], end: ListEnd) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        let list = state.lists.entry(key.to_vec()).or_default();
        match end {
            ListEnd::Head => list.push_front(value.to_vec()),
            ListEnd::Tail => list.push_back(value.to_vec()),
        }
        drop(state);
        self.pushed.notify_all();
        Ok(())
    }

    fn blocking_pop(
        &self,
        keys: &[Vec<u8>],
        timeout: Duration,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, ServiceError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;

        loop {
            for key in keys {
                let Some(list) = state.lists.get_mut(key) else {
                    continue;
                };
                if let Some(value) = list.pop_front() {
                    if list.is_empty() {
                        state.lists.remove(key);
                    }
                    return Ok(Some((key.clone(), value)));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .pushed
                .wait_timeout(state, deadline - now)
                .map_err(|_| ServiceError::Poisoned)?;
            state = guard;
        }
    }

    fn list_len(&self, key: &[u8]) -> Result<usize, ServiceError> {
        let state = self.lock()?;
        Ok(state.lists.get(key).map(VecDeque::len).unwrap_or(0))
    }

    fn flush_all(&self) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        *state = HashState::default();
        Ok(())
    }
}
