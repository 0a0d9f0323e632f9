use crate::ids::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Insertion-ordered entity collection with an O(1) id lookup on top.
///
/// Values live in a dense `Vec` so the rules engine can iterate them
/// cache-friendly and in a deterministic order; the `index` map resolves
/// random access by id. Removal shifts the tail and reindexes it, keeping
/// insertion order intact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityStore<I: EntityId + Ord, T> {
    ids: Vec<I>,
    items: Vec<T>,
    index: BTreeMap<I, usize>,
}

impl<I: EntityId + Ord, T> Default for EntityStore<I, T> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            items: Vec::new(),
            index: BTreeMap::new(),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    #[error("id {0} already present")]
    Duplicate(u32),
    #[error("id {0} not found")]
    Missing(u32),
}

impl<I: EntityId + Ord, T> EntityStore<I, T> {
    pub fn get(&self, id: I) -> Option<&T> {
        self.index.get(&id).map(|idx| &self.items[*idx])
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.index.get(&id).map(|idx| &mut self.items[*idx])
    }

    pub fn contains(&self, id: I) -> bool {
        self.index.contains_key(&id)
    }

    pub fn add(&mut self, id: I, value: T) -> Result<(), StoreError> {
        if self.index.contains_key(&id) {
            return Err(StoreError::Duplicate(id.raw()));
        }
        self.index.insert(id, self.items.len());
        self.ids.push(id);
        self.items.push(value);
        Ok(())
    }

    /// Replaces the stored value wholesale. Field-level patching is not
    /// offered; callers construct the full successor value.
    pub fn update(&mut self, id: I, value: T) -> Result<(), StoreError> {
        match self.index.get(&id) {
            Some(idx) => {
                self.items[*idx] = value;
                Ok(())
            }
            None => Err(StoreError::Missing(id.raw())),
        }
    }

    pub fn remove(&mut self, id: I) -> Result<T, StoreError> {
        let idx = *self
            .index
            .get(&id)
            .ok_or_else(|| StoreError::Missing(id.raw()))?;
        self.index.remove(&id);
        self.ids.remove(idx);
        let removed = self.items.remove(idx);
        for shifted in self.ids.iter().skip(idx) {
            if let Some(slot) = self.index.get_mut(shifted) {
                *slot -= 1;
            }
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insertion-ordered iteration.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_with_ids(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.ids.iter().copied().zip(self.items.iter())
    }

    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.ids.iter().copied()
    }

    /// Checks that the id map agrees with the dense arrays.
    pub fn check_coherence(&self) -> Result<(), String> {
        if self.ids.len() != self.items.len() || self.ids.len() != self.index.len() {
            return Err(format!(
                "store length mismatch: {} ids, {} items, {} index entries",
                self.ids.len(),
                self.items.len(),
                self.index.len()
            ));
        }
        for (pos, id) in self.ids.iter().enumerate() {
            match self.index.get(id) {
                Some(idx) if *idx == pos => {}
                Some(idx) => return Err(format!("id {} indexed at {} but stored at {}", id, idx, pos)),
                None => return Err(format!("id {} present in array but not indexed", id)),
            }
        }
        Ok(())
    }
}

/// Secondary multimap index (e.g. fleets by system). Values are kept in
/// insertion order per key; membership is maintained by the entity-ops
/// layer, never ad hoc.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MultiIndex<K: Ord, I> {
    entries: BTreeMap<K, Vec<I>>,
}

impl<K: Ord + Copy, I: EntityId> MultiIndex<K, I> {
    pub fn insert(&mut self, key: K, id: I) {
        let bucket = self.entries.entry(key).or_default();
        if !bucket.contains(&id) {
            bucket.push(id);
        }
    }

    pub fn remove(&mut self, key: K, id: I) {
        if let Some(bucket) = self.entries.get_mut(&key) {
            bucket.retain(|existing| *existing != id);
            if bucket.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn get(&self, key: K) -> &[I] {
        self.entries.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &[I])> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn remove_key(&mut self, key: K) -> Vec<I> {
        self.entries.remove(&key).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{FleetId, SystemId};

    #[derive(Debug, Clone, PartialEq)]
    struct Dummy {
        name: &'static str,
    }

    #[test]
    fn add_get_update_remove_keep_index_coherent() {
        let mut store: EntityStore<FleetId, Dummy> = EntityStore::default();
        store.add(FleetId(1), Dummy { name: "alpha" }).unwrap();
        store.add(FleetId(2), Dummy { name: "beta" }).unwrap();
        store.add(FleetId(3), Dummy { name: "gamma" }).unwrap();

        assert_eq!(store.add(FleetId(2), Dummy { name: "dup" }), Err(StoreError::Duplicate(2)));
        assert_eq!(store.get(FleetId(2)).unwrap().name, "beta");

        store.update(FleetId(2), Dummy { name: "beta2" }).unwrap();
        assert_eq!(store.get(FleetId(2)).unwrap().name, "beta2");

        // removal in the middle shifts the tail but preserves order
        store.remove(FleetId(2)).unwrap();
        store.check_coherence().unwrap();
        let names: Vec<_> = store.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "gamma"]);
        assert_eq!(store.get(FleetId(3)).unwrap().name, "gamma");

        assert_eq!(store.remove(FleetId(2)).unwrap_err(), StoreError::Missing(2));
    }

    #[test]
    fn iteration_is_insertion_ordered_not_id_ordered() {
        let mut store: EntityStore<FleetId, Dummy> = EntityStore::default();
        store.add(FleetId(9), Dummy { name: "late-id-first" }).unwrap();
        store.add(FleetId(1), Dummy { name: "early-id-second" }).unwrap();

        let names: Vec<_> = store.iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["late-id-first", "early-id-second"]);
    }

    #[test]
    fn multi_index_tracks_membership_per_key() {
        let mut index: MultiIndex<SystemId, FleetId> = MultiIndex::default();
        index.insert(SystemId(5), FleetId(1));
        index.insert(SystemId(5), FleetId(2));
        index.insert(SystemId(5), FleetId(1)); // idempotent

        assert_eq!(index.get(SystemId(5)), &[FleetId(1), FleetId(2)]);

        index.remove(SystemId(5), FleetId(1));
        assert_eq!(index.get(SystemId(5)), &[FleetId(2)]);

        index.remove(SystemId(5), FleetId(2));
        assert!(index.get(SystemId(5)).is_empty());
        assert_eq!(index.keys().count(), 0);
    }
}
