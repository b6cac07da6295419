use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use super::{Storable, Storage};
use crate::Result;

/// Volatile in-memory backend. Allows concurrent readers and a single writer.
///
/// Used as the fallback when the durable backend cannot be opened; everything in it is lost
/// when the process exits.
pub struct MemoryBackend<T> {
    state: RwLock<MemoryState<T>>,
}

struct MemoryState<T> {
    items: HashMap<String, (u64, T)>,
    next_seq: u64,
}

impl<T: Storable> MemoryBackend<T> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState {
                items: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    fn upsert(&self, item: &T) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let seq = match state.items.get(item.id()) {
            Some((seq, _)) => *seq,
            None => {
                state.next_seq += 1;
                state.next_seq
            }
        };
        state
            .items
            .insert(item.id().to_owned(), (seq, item.clone()));
    }
}

impl<T: Storable> Default for MemoryBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Storable> Storage<T> for MemoryBackend<T> {
    fn all(&self) -> Result<Vec<T>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut items: Vec<_> = state.items.values().collect();
        items.sort_by_key(|(seq, _)| *seq);
        Ok(items.into_iter().map(|(_, item)| item.clone()).collect())
    }

    fn add(&self, item: &T) -> Result<()> {
        self.upsert(item);
        Ok(())
    }

    fn update(&self, item: &T) -> Result<()> {
        self.upsert(item);
        Ok(())
    }

    fn replace(&self, item: &T) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.items.get_mut(item.id()) {
            Some((_, stored)) => {
                *stored = item.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn get(&self, id: &str) -> Result<Option<T>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.items.get(id).map(|(_, item)| item.clone()))
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.items.remove(id);
        Ok(true)
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.items.clear();
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state.items.len())
    }
}
