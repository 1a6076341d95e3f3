//! Generational slot arena for live connections.
//!
//! A [`Registry`] hands out a [`ConnectionId`] for every inserted value.  Ids
//! are never pointers: a continuation that captured an id re-resolves it on
//! completion and gets [`RegistryError::NotFound`] if the entry has gone away
//! in the meantime.
//!
//! # Guarantees
//!
//! - Inserting or removing one entry never changes the id of any other entry.
//! - A removed id never resolves again.  Its slot may be recycled, but the
//!   recycled slot carries a higher generation, so the old id stays stale.
//! - A slot whose generation counter is exhausted is retired rather than
//!   recycled, so ids are never reused even after `u32::MAX` reuses.
//! - The number of slots is capped (at most `u32::MAX`, or the limit given to
//!   [`Registry::with_slot_limit`]).  Once every slot is live or retired,
//!   [`Registry::insert`] fails with [`RegistryError::Full`] instead of
//!   handing out an index twice.
//! - [`Registry::snapshot`] returns owned ids; the caller may insert and remove
//!   entries while walking the snapshot.

use thiserror::Error;

use super::connection::ConnectionId;

/// Errors returned by registry lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The id was never issued, or its entry has already been removed.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
    /// Every slot is live or retired; no new id can be issued.
    #[error("registry is full")]
    Full,
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of values addressed by stable [`ConnectionId`]s.
#[derive(Debug)]
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    slot_limit: u32,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::with_slot_limit(u32::MAX)
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry that never grows beyond `slot_limit` slots.
    pub fn with_slot_limit(slot_limit: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            slot_limit,
        }
    }

    /// Stores `value` and returns its stable id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Full`] when no slot can be recycled and the
    /// slot limit has been reached.  `value` is dropped.
    pub fn insert(&mut self, value: T) -> Result<ConnectionId, RegistryError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(ConnectionId::new(index, slot.generation));
        }

        let index = u32::try_from(self.slots.len())
            .ok()
            .filter(|&index| index < self.slot_limit)
            .ok_or(RegistryError::Full)?;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(ConnectionId::new(index, 0))
    }

    /// Returns the entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is stale or unknown.
    pub fn get(&self, id: ConnectionId) -> Result<&T, RegistryError> {
        self.slots
            .get(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.value.as_ref())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Returns the entry for `id` mutably.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is stale or unknown.
    pub fn get_mut(&mut self, id: ConnectionId) -> Result<&mut T, RegistryError> {
        self.slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.value.as_mut())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Removes and returns the entry for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if `id` is stale or unknown; a
    /// double remove is therefore harmless.
    pub fn remove(&mut self, id: ConnectionId) -> Result<T, RegistryError> {
        let slot = self
            .slots
            .get_mut(id.index() as usize)
            .filter(|slot| slot.generation == id.generation())
            .ok_or(RegistryError::NotFound(id))?;
        let value = slot.value.take().ok_or(RegistryError::NotFound(id))?;

        self.len -= 1;
        // Bump the generation so `id` can never resolve again.  An exhausted
        // slot is retired instead of recycled.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(id.index());
        }
        Ok(value)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_ok()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates over live entries with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            // `insert` never pushes a slot whose index does not fit.
            let index = u32::try_from(index).ok()?;
            slot.value
                .as_ref()
                .map(|value| (ConnectionId::new(index, slot.generation), value))
        })
    }

    /// Ids of every live entry.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Ids of the live entries matching `filter`, detached from the registry.
    pub fn snapshot<F>(&self, mut filter: F) -> Vec<ConnectionId>
    where
        F: FnMut(&T) -> bool,
    {
        self.iter()
            .filter(|(_, value)| filter(value))
            .map(|(id, _)| id)
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_insert_then_get_returns_value() {
        // Arrange
        let mut registry = Registry::new();

        // Act
        let id = registry.insert("alice").unwrap();

        // Assert
        assert_eq!(registry.get(id), Ok(&"alice"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_are_distinct_for_live_entries() {
        let mut registry = Registry::new();
        let ids: Vec<_> = (0..100).map(|i| registry.insert(i).unwrap()).collect();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 100);
    }

    #[test]
    fn test_insert_does_not_disturb_existing_ids() {
        // Regression: growing the backing storage must not change what an
        // already-issued id resolves to.
        let mut registry = Registry::new();
        let first = registry.insert(String::from("first")).unwrap();

        for i in 0..1_000 {
            registry.insert(format!("filler-{i}")).unwrap();
        }

        assert_eq!(registry.get(first).map(String::as_str), Ok("first"));
    }

    #[test]
    fn test_remove_does_not_disturb_other_ids() {
        let mut registry = Registry::new();
        let a = registry.insert('a').unwrap();
        let b = registry.insert('b').unwrap();
        let c = registry.insert('c').unwrap();

        registry.remove(b).unwrap();

        assert_eq!(registry.get(a), Ok(&'a'));
        assert_eq!(registry.get(c), Ok(&'c'));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_removed_id_is_not_found() {
        let mut registry = Registry::new();
        let id = registry.insert(1).unwrap();

        assert_eq!(registry.remove(id), Ok(1));

        assert_eq!(registry.get(id), Err(RegistryError::NotFound(id)));
        assert_eq!(registry.remove(id), Err(RegistryError::NotFound(id)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_recycled_slot_never_resolves_old_id() {
        // Arrange: remove an entry so its slot is recycled by the next insert.
        let mut registry = Registry::new();
        let old = registry.insert("old").unwrap();
        registry.remove(old).unwrap();

        // Act
        let new = registry.insert("new").unwrap();

        // Assert: same slot, different identity.
        assert_eq!(new.index(), old.index());
        assert_ne!(new, old);
        assert_eq!(registry.get(old), Err(RegistryError::NotFound(old)));
        assert_eq!(registry.get(new), Ok(&"new"));
    }

    #[test]
    fn test_exhausted_slot_is_retired() {
        // Arrange: force a slot to the last generation.
        let mut registry = Registry::new();
        let id = registry.insert(0u8).unwrap();
        registry.slots[id.index() as usize].generation = u32::MAX;
        let last = ConnectionId::new(id.index(), u32::MAX);

        // Act
        registry.remove(last).unwrap();
        let next = registry.insert(1u8).unwrap();

        // Assert: the exhausted slot was not handed out again.
        assert_ne!(next.index(), last.index());
    }

    #[test]
    fn test_insert_past_slot_limit_is_full() {
        // Arrange
        let mut registry = Registry::with_slot_limit(2);
        let a = registry.insert('a').unwrap();
        registry.insert('b').unwrap();

        // Act
        let result = registry.insert('c');

        // Assert: refused, and a freed slot is usable again
        assert_eq!(result, Err(RegistryError::Full));
        assert_eq!(registry.len(), 2);
        registry.remove(a).unwrap();
        assert!(registry.insert('d').is_ok());
    }

    #[test]
    fn test_retired_slot_counts_against_limit() {
        let mut registry = Registry::with_slot_limit(1);
        let id = registry.insert(0u8).unwrap();
        registry.slots[id.index() as usize].generation = u32::MAX;

        registry.remove(ConnectionId::new(id.index(), u32::MAX)).unwrap();

        assert_eq!(registry.insert(1u8), Err(RegistryError::Full));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut registry = Registry::new();
        let id = registry.insert(10).unwrap();
        *registry.get_mut(id).unwrap() += 5;
        assert_eq!(registry.get(id), Ok(&15));
    }

    #[test]
    fn test_snapshot_filters_and_survives_mutation() {
        // Arrange
        let mut registry = Registry::new();
        let even = registry.insert(2).unwrap();
        let _odd = registry.insert(3).unwrap();
        let also_even = registry.insert(4).unwrap();

        // Act: take a snapshot, then mutate the registry while walking it.
        let snapshot = registry.snapshot(|v| v % 2 == 0);
        for id in &snapshot {
            registry.remove(*id).unwrap();
            registry.insert(100).unwrap();
        }

        // Assert
        assert_eq!(snapshot, vec![even, also_even]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_ids_lists_every_live_entry() {
        let mut registry = Registry::new();
        let a = registry.insert(()).unwrap();
        let b = registry.insert(()).unwrap();
        registry.remove(a).unwrap();
        assert_eq!(registry.ids(), vec![b]);
        assert!(registry.contains(b));
        assert!(!registry.contains(a));
    }
}
