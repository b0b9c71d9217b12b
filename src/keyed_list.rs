use crate::change::ChangeNotifier;
use crate::change::ListChange;
use crate::change::SubscriptionKey;
use crate::list_result::DispatchError;
use crate::list_result::IndexError;
use crate::list_result::KeyError;
use crate::list_result::ListResult;
use log::trace;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::hash::Hash;
use std::mem;

pub type KeySelector<K, V> = dyn Fn(&V) -> K;

struct Entry<K, V> {
    key: K,
    value: V,
}

/// Insertion-ordered sequence of values that is simultaneously a unique-key
/// map. Keys are derived from values by the selector supplied at
/// construction; the selector must be deterministic and stable, otherwise
/// the position index is void.
///
/// Single-threaded by contract: no internal synchronization of any kind.
/// Mutating the list from inside a change handler fails with
/// [DispatchError::ReentrantMutation].
///
/// The hasher parameter `S` is the key equality policy; `RandomState` unless
/// overridden through [KeyedList::with_hasher].
pub struct KeyedList<K, V, S = RandomState> {
    entries: Vec<Entry<K, V>>,
    index: HashMap<K, usize, S>,
    key_of: Box<KeySelector<K, V>>,
    changes: ChangeNotifier<V>,
}

impl<K: Eq + Hash + Clone, V> KeyedList<K, V> {
    pub fn new(key_of: impl Fn(&V) -> K + 'static) -> KeyedList<K, V> {
        KeyedList::with_hasher(key_of, RandomState::new())
    }

    pub fn with_capacity(key_of: impl Fn(&V) -> K + 'static, capacity: usize) -> KeyedList<K, V> {
        KeyedList {
            entries: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            key_of: Box::new(key_of),
            changes: ChangeNotifier::new(),
        }
    }
}

impl<K: Eq + Hash + Clone, V, S: BuildHasher> KeyedList<K, V, S> {
    pub fn with_hasher(key_of: impl Fn(&V) -> K + 'static, hash_builder: S) -> KeyedList<K, V, S> {
        KeyedList {
            entries: vec![],
            index: HashMap::with_hasher(hash_builder),
            key_of: Box::new(key_of),
            changes: ChangeNotifier::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, value: V) -> ListResult {
        self.insert(self.entries.len(), value)
    }

    /// Inserts at `position`, shifting everything at or past it up by one.
    /// The derived key must not be present yet; on any failure neither the
    /// sequence nor the index is touched.
    pub fn insert(&mut self, position: usize, value: V) -> ListResult {
        self.guard_mutation()?;
        if position > self.entries.len() {
            return Err(IndexError::OutOfRange.into());
        }
        let key = (self.key_of)(&value);
        if self.index.contains_key(&key) {
            return Err(KeyError::Duplicate.into());
        }
        trace!("inserting at {} (len {})", position, self.entries.len());
        if position != self.entries.len() {
            // index entries move up before the sequence does, so the index
            // never points below an element's real position
            for recorded in self.index.values_mut() {
                if *recorded >= position {
                    *recorded += 1;
                }
            }
        }
        self.entries.insert(
            position,
            Entry {
                key: key.clone(),
                value,
            },
        );
        self.index.insert(key, position);
        self.changes.dispatch(ListChange::Added {
            position,
            value: &self.entries[position].value,
        });
        Ok(())
    }

    /// Removes the element at `position` and returns it.
    pub fn remove_at(&mut self, position: usize) -> ListResult<V> {
        self.guard_mutation()?;
        if position >= self.entries.len() {
            return Err(IndexError::OutOfRange.into());
        }
        trace!("removing at {} (len {})", position, self.entries.len());
        let entry = self.entries.remove(position);
        self.index.remove(&entry.key);
        for recorded in self.index.values_mut() {
            if *recorded > position {
                *recorded -= 1;
            }
        }
        self.changes.dispatch(ListChange::Removed {
            position,
            value: &entry.value,
        });
        Ok(entry.value)
    }

    /// Non-failing counterpart of [KeyedList::remove_at] for keyed removal:
    /// `Ok(None)` when the key is absent.
    pub fn remove(&mut self, key: &K) -> ListResult<Option<V>> {
        self.guard_mutation()?;
        let position = match self.index.get(key) {
            Some(position) => *position,
            None => return Ok(None),
        };
        self.remove_at(position).map(Some)
    }

    pub fn clear(&mut self) -> ListResult {
        self.guard_mutation()?;
        trace!("clearing {} entries", self.entries.len());
        self.entries.clear();
        self.index.clear();
        self.changes.dispatch(ListChange::Reset);
        Ok(())
    }

    /// Keyed upsert. A new key appends; a present key swaps the value in
    /// place, keeping its position, and hands back the previous value.
    /// `key` must equal the value's derived key.
    pub fn set(&mut self, key: K, value: V) -> ListResult<Option<V>> {
        self.guard_mutation()?;
        if (self.key_of)(&value) != key {
            return Err(KeyError::Mismatch.into());
        }
        match self.index.get(&key).copied() {
            None => {
                self.insert(self.entries.len(), value)?;
                Ok(None)
            }
            Some(position) => Ok(Some(self.replace_at(position, value))),
        }
    }

    /// Like [KeyedList::set], except an absent key is reported as `Ok(None)`
    /// instead of appending.
    pub fn replace(&mut self, key: &K, value: V) -> ListResult<Option<V>> {
        self.guard_mutation()?;
        if (self.key_of)(&value) != *key {
            return Err(KeyError::Mismatch.into());
        }
        match self.index.get(key).copied() {
            None => Ok(None),
            Some(position) => Ok(Some(self.replace_at(position, value))),
        }
    }

    fn replace_at(&mut self, position: usize, value: V) -> V {
        trace!("replacing in place at {}", position);
        let old = mem::replace(&mut self.entries[position].value, value);
        self.changes.dispatch(ListChange::Replaced {
            position,
            old: &old,
            new: &self.entries[position].value,
        });
        old
    }

    /// Swaps the entire contents for `values`, all or nothing: the incoming
    /// keys are checked for uniqueness before the previous contents are
    /// touched, so a [KeyError::Duplicate] leaves the list as it was.
    /// Observers receive a single `Reset`.
    pub fn replace_all(&mut self, values: impl IntoIterator<Item = V>) -> ListResult {
        self.guard_mutation()?;
        let incoming: Vec<Entry<K, V>> = values
            .into_iter()
            .map(|value| Entry {
                key: (self.key_of)(&value),
                value,
            })
            .collect();
        let mut seen = HashSet::with_capacity(incoming.len());
        for entry in &incoming {
            if !seen.insert(&entry.key) {
                return Err(KeyError::Duplicate.into());
            }
        }
        drop(seen);
        trace!(
            "replacing all entries: {} -> {}",
            self.entries.len(),
            incoming.len()
        );
        self.entries = incoming;
        self.index.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            self.index.insert(entry.key.clone(), position);
        }
        self.changes.dispatch(ListChange::Reset);
        Ok(())
    }

    /// Re-labels the element recorded under `current` as `new` without
    /// moving it. Only the index is rewritten: the value itself is not
    /// re-derived, so keeping `key_of(value)` in line with `new` afterwards
    /// is the caller's responsibility.
    pub fn change_key(&mut self, current: &K, new: K) -> ListResult {
        self.guard_mutation()?;
        if !self.index.contains_key(current) {
            return Err(KeyError::NotFound.into());
        }
        if self.index.contains_key(&new) {
            return Err(KeyError::Duplicate.into());
        }
        let position = self
            .index
            .remove(current)
            .expect("key vanished between checks");
        trace!("re-labelling key at {}", position);
        self.entries[position].key = new.clone();
        self.index.insert(new, position);
        Ok(())
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &K) -> ListResult<&V> {
        match self.try_get(key) {
            Some(value) => Ok(value),
            None => Err(KeyError::NotFound.into()),
        }
    }

    pub fn try_get(&self, key: &K) -> Option<&V> {
        self.index
            .get(key)
            .map(|position| &self.entries[*position].value)
    }

    pub fn get_at(&self, position: usize) -> Option<&V> {
        self.entries.get(position).map(|entry| &entry.value)
    }

    pub fn position_of(&self, key: &K) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Recorded keys, in positional order (never hash order).
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.entries.iter().map(|entry| &entry.key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.entries.iter().map(|entry| &entry.value)
    }

    /// Key/value pairs in positional order. Keys are derived live through
    /// the selector on every pass, not read from the index, so after a
    /// [KeyedList::change_key] the two can legitimately disagree.
    pub fn pairs(&self) -> impl Iterator<Item = (K, &V)> + '_ {
        self.entries
            .iter()
            .map(|entry| ((self.key_of)(&entry.value), &entry.value))
    }

    pub fn subscribe(
        &mut self,
        name: &'static str,
        callback: impl FnMut(ListChange<V>) + 'static,
    ) -> SubscriptionKey {
        self.changes.subscribe(name, callback)
    }

    pub fn unsubscribe(&mut self, key: SubscriptionKey) -> bool {
        self.changes.unsubscribe(key)
    }

    fn guard_mutation(&self) -> Result<(), DispatchError> {
        if self.changes.is_dispatching() {
            return Err(DispatchError::ReentrantMutation);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list_result::ListError;

    fn reentrant() -> ListError {
        ListError::Dispatch(DispatchError::ReentrantMutation)
    }

    #[test]
    fn mutation_rejected_while_dispatching() {
        let mut list = KeyedList::new(|it: &i32| *it);
        list.push(1).unwrap();
        list.changes.force_dispatching(true);
        assert_eq!(list.push(2), Err(reentrant()));
        assert_eq!(list.insert(0, 3), Err(reentrant()));
        assert_eq!(list.remove_at(0), Err(reentrant()));
        assert_eq!(list.remove(&1), Err(reentrant()));
        assert_eq!(list.clear(), Err(reentrant()));
        assert_eq!(list.set(4, 4), Err(reentrant()));
        assert_eq!(list.replace(&1, 1), Err(reentrant()));
        assert_eq!(list.replace_all(vec![5]), Err(reentrant()));
        assert_eq!(list.change_key(&1, 6), Err(reentrant()));
        list.changes.force_dispatching(false);
        assert_eq!(list.push(2), Ok(()));
    }

    #[test]
    fn reads_allowed_while_dispatching() {
        let mut list = KeyedList::new(|it: &i32| *it);
        list.push(1).unwrap();
        list.changes.force_dispatching(true);
        assert!(list.contains_key(&1));
        assert_eq!(list.try_get(&1), Some(&1));
        assert_eq!(list.keys().count(), 1);
        list.changes.force_dispatching(false);
    }
}
