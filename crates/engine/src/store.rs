//! Entity storage abstractions (reservations, transfer requests).
//!
//! The engine only needs keyed get/insert, an atomic read-modify-write and a
//! filtered scan. A durable backend implements the same trait; the in-memory
//! store below is what tests and single-process deployments use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockpilot_core::{EngineError, EngineResult, Entity};

/// Keyed entity store.
pub trait EntityStore<E: Entity>: Send + Sync {
    fn get(&self, id: &E::Id) -> EngineResult<Option<E>>;

    /// Insert a new entity; fails if the id is already taken.
    fn insert(&self, entity: E) -> EngineResult<()>;

    /// Atomically apply `change` to a copy of the stored entity and persist the
    /// copy only if `change` succeeds. Returns the stored result.
    fn update(
        &self,
        id: &E::Id,
        change: &mut dyn FnMut(&mut E) -> EngineResult<()>,
    ) -> EngineResult<E>;

    fn scan(&self, filter: &dyn Fn(&E) -> bool) -> EngineResult<Vec<E>>;
}

impl<E, S> EntityStore<E> for Arc<S>
where
    E: Entity,
    S: EntityStore<E> + ?Sized,
{
    fn get(&self, id: &E::Id) -> EngineResult<Option<E>> {
        (**self).get(id)
    }

    fn insert(&self, entity: E) -> EngineResult<()> {
        (**self).insert(entity)
    }

    fn update(
        &self,
        id: &E::Id,
        change: &mut dyn FnMut(&mut E) -> EngineResult<()>,
    ) -> EngineResult<E> {
        (**self).update(id, change)
    }

    fn scan(&self, filter: &dyn Fn(&E) -> bool) -> EngineResult<Vec<E>> {
        (**self).scan(filter)
    }
}

/// In-memory entity store for tests/dev. No durability across restarts.
#[derive(Debug)]
pub struct InMemoryEntityStore<E: Entity> {
    inner: RwLock<HashMap<E::Id, E>>,
}

impl<E: Entity> InMemoryEntityStore<E> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E: Entity> Default for InMemoryEntityStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EntityStore<E> for InMemoryEntityStore<E>
where
    E: Entity + Clone + Send + Sync + 'static,
    E::Id: Send + Sync,
{
    fn get(&self, id: &E::Id) -> EngineResult<Option<E>> {
        let map = self
            .inner
            .read()
            .map_err(|_| EngineError::poisoned(format!("{} store", E::KIND)))?;
        Ok(map.get(id).cloned())
    }

    fn insert(&self, entity: E) -> EngineResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| EngineError::poisoned(format!("{} store", E::KIND)))?;
        let id = *entity.id();
        if map.contains_key(&id) {
            return Err(EngineError::invariant(format!(
                "{} {id} already exists",
                E::KIND
            )));
        }
        map.insert(id, entity);
        Ok(())
    }

    fn update(
        &self,
        id: &E::Id,
        change: &mut dyn FnMut(&mut E) -> EngineResult<()>,
    ) -> EngineResult<E> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| EngineError::poisoned(format!("{} store", E::KIND)))?;
        let stored = map
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found(E::KIND, id))?;

        let mut draft = stored.clone();
        change(&mut draft)?;
        *stored = draft.clone();
        Ok(draft)
    }

    fn scan(&self, filter: &dyn Fn(&E) -> bool) -> EngineResult<Vec<E>> {
        let map = self
            .inner
            .read()
            .map_err(|_| EngineError::poisoned(format!("{} store", E::KIND)))?;
        Ok(map.values().filter(|e| filter(e)).cloned().collect())
    }
}
