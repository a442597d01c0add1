//! Key-deduplicated buffer of pending operations for one stream.
//!
//! The buffer has a *live* generation receiving new operations and a FIFO of
//! *sealed* generations waiting to be written. Sealing moves the live map as a
//! whole, so a key present at seal time lands in exactly one generation and
//! later operations start the next one.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::mem;

#[derive(Debug)]
pub(crate) struct BatchBuffer<K, V> {
    live: HashMap<K, V>,
    sealed: VecDeque<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> BatchBuffer<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            live: HashMap::new(),
            sealed: VecDeque::new(),
        }
    }

    /// Last write wins within the live generation. Returns the live size.
    pub(crate) fn upsert(&mut self, key: K, value: V) -> usize {
        self.live.insert(key, value);
        self.live.len()
    }

    /// Moves the live generation to the back of the sealed queue.
    ///
    /// Returns `false` (and does nothing) when the live generation is empty.
    pub(crate) fn seal(&mut self) -> bool {
        if self.live.is_empty() {
            return false;
        }
        let generation = mem::take(&mut self.live);
        self.sealed.push_back(generation);
        true
    }

    /// Oldest sealed generation, if any.
    pub(crate) fn pop_sealed(&mut self) -> Option<HashMap<K, V>> {
        self.sealed.pop_front()
    }

    /// Merges a generation whose write failed back into the live map.
    ///
    /// Keys written again since the generation was sealed keep their newer
    /// value, whether it sits in the live map or in a younger sealed
    /// generation. Returns the number of operations restored.
    pub(crate) fn restore(&mut self, generation: HashMap<K, V>) -> usize {
        let mut restored = 0;
        for (key, value) in generation {
            let superseded =
                self.live.contains_key(&key) || self.sealed.iter().any(|g| g.contains_key(&key));
            if !superseded {
                self.live.insert(key, value);
                restored += 1;
            }
        }
        restored
    }

    pub(crate) fn live_len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn has_sealed(&self) -> bool {
        !self.sealed.is_empty()
    }

    /// Operations not yet durably written, across all generations.
    pub(crate) fn len(&self) -> usize {
        self.live.len() + self.sealed.iter().map(HashMap::len).sum::<usize>()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.live.is_empty() && self.sealed.is_empty()
    }

    /// Latest pending value per key: younger generations override older ones.
    pub(crate) fn snapshot(&self) -> HashMap<K, V> {
        let mut merged = HashMap::with_capacity(self.len());
        for generation in self.sealed.iter().chain(std::iter::once(&self.live)) {
            merged.extend(generation.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn upsert_keeps_last_value_per_key() {
        let mut buffer = BatchBuffer::new();
        buffer.upsert("a", 1);
        buffer.upsert("b", 2);
        assert_eq!(buffer.upsert("a", 3), 2);
        assert_eq!(buffer.snapshot(), HashMap::from([("a", 3), ("b", 2)]));
    }

    #[test]
    fn sealing_an_empty_live_map_is_a_no_op() {
        let mut buffer: BatchBuffer<&str, i32> = BatchBuffer::new();
        assert!(!buffer.seal());
        assert!(!buffer.has_sealed());
        assert!(buffer.pop_sealed().is_none());
    }

    #[test]
    fn operations_after_seal_start_a_new_generation() {
        let mut buffer = BatchBuffer::new();
        buffer.upsert("a", 1);
        assert!(buffer.seal());
        buffer.upsert("a", 2);
        buffer.upsert("b", 1);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.pop_sealed(), Some(HashMap::from([("a", 1)])));
        assert_eq!(buffer.live_len(), 2);
        assert_eq!(buffer.snapshot(), HashMap::from([("a", 2), ("b", 1)]));
    }

    #[test]
    fn sealed_generations_drain_oldest_first() {
        let mut buffer = BatchBuffer::new();
        buffer.upsert(1, ());
        buffer.seal();
        buffer.upsert(2, ());
        buffer.seal();
        assert_eq!(buffer.pop_sealed().unwrap().keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(buffer.pop_sealed().unwrap().keys().copied().collect::<Vec<_>>(), vec![2]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn restore_lets_newer_writes_win() {
        let mut buffer = BatchBuffer::new();
        buffer.upsert("a", 1);
        buffer.upsert("b", 2);
        buffer.seal();
        let failed = buffer.pop_sealed().unwrap();

        buffer.upsert("a", 9);
        assert_eq!(buffer.restore(failed), 1);
        assert_eq!(buffer.snapshot(), HashMap::from([("a", 9), ("b", 2)]));
    }

    #[test]
    fn restore_skips_keys_in_younger_sealed_generations() {
        let mut buffer = BatchBuffer::new();
        buffer.upsert("a", 1);
        buffer.seal();
        let failed = buffer.pop_sealed().unwrap();
        buffer.upsert("a", 2);
        buffer.seal();

        assert_eq!(buffer.restore(failed), 0);
        assert_eq!(buffer.live_len(), 0);
        assert_eq!(buffer.pop_sealed(), Some(HashMap::from([("a", 2)])));
    }

    proptest! {
        #[test]
        fn snapshot_matches_last_write_per_key(ops in prop::collection::vec((0u8..16, any::<i32>()), 0..200)) {
            let mut buffer = BatchBuffer::new();
            let mut expected = HashMap::new();
            for (key, value) in ops {
                buffer.upsert(key, value);
                expected.insert(key, value);
            }
            prop_assert_eq!(buffer.live_len(), expected.len());
            prop_assert_eq!(buffer.snapshot(), expected);
        }
    }
}
