// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A bounded two-generation cache.
//!
//! Lookups check the new generation first, then the old one; whatever is found
//! (or freshly built) is copied into the new generation. When the new
//! generation reaches `max` entries it becomes the old generation, the
//! previous old generation is discarded wholesale, and the GC callback runs.
//! Memory stays under roughly twice `max` entries, and anything used since the
//! last rotation survives the next one.

use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;

struct Generations<K, V> {
    old: HashMap<K, V>,
    new: HashMap<K, V>,
}

pub struct GenMap<K, V> {
    generations: Mutex<Generations<K, V>>,
    max: usize,
    new_value: Box<dyn Fn() -> V + Send + Sync>,
    gc: Option<Box<dyn Fn() + Send + Sync>>,
}

impl<K, V> GenMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a cache holding up to `max` entries per generation. `max` of
    /// zero is treated as one.
    pub fn new(
        max: usize,
        new_value: impl Fn() -> V + Send + Sync + 'static,
        gc: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Self {
        Self {
            generations: Mutex::new(Generations {
                old: HashMap::new(),
                new: HashMap::new(),
            }),
            max: max.max(1),
            new_value: Box::new(new_value),
            gc,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Generations<K, V>> {
        self.generations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value for `key`, promoting or creating it in the new generation.
    pub fn get_or_create(&self, key: &K) -> V {
        let rotated;
        let value;
        {
            let mut generations = self.lock();
            if let Some(v) = generations.new.get(key) {
                return v.clone();
            }
            value = generations
                .old
                .get(key)
                .cloned()
                .unwrap_or_else(|| (self.new_value)());
            generations.new.insert(key.clone(), value.clone());

            rotated = generations.new.len() >= self.max;
            if rotated {
                generations.old = std::mem::take(&mut generations.new);
            }
        }
        if rotated {
            if let Some(gc) = &self.gc {
                gc();
            }
        }
        value
    }

    /// Reports whether `key` is held by either generation, without promoting it.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        let generations = self.lock();
        generations.new.contains_key(key) || generations.old.contains_key(key)
    }

    /// Total entries across both generations.
    #[must_use]
    pub fn len(&self) -> usize {
        let generations = self.lock();
        generations.new.len() + generations.old.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_map(max: usize) -> (GenMap<String, Arc<AtomicUsize>>, Arc<AtomicUsize>) {
        let rotations = Arc::new(AtomicUsize::new(0));
        let gc_rotations = Arc::clone(&rotations);
        let map = GenMap::new(
            max,
            || Arc::new(AtomicUsize::new(0)),
            Some(Box::new(move || {
                gc_rotations.fetch_add(1, Ordering::SeqCst);
            })),
        );
        (map, rotations)
    }

    #[test]
    fn test_same_key_returns_same_value() {
        let (map, _) = counting_map(10);
        let a = map.get_or_create(&"a".to_string());
        a.fetch_add(5, Ordering::SeqCst);
        let again = map.get_or_create(&"a".to_string());
        assert_eq!(again.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_rotation_fires_gc_once() {
        let (map, rotations) = counting_map(3);
        for key in ["a", "b"] {
            map.get_or_create(&key.to_string());
        }
        assert_eq!(rotations.load(Ordering::SeqCst), 0);
        map.get_or_create(&"c".to_string());
        assert_eq!(rotations.load(Ordering::SeqCst), 1);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_first_key_lost_after_two_rotations() {
        let max = 3;
        let (map, rotations) = counting_map(max);
        let first = map.get_or_create(&"k0".to_string());
        first.fetch_add(1, Ordering::SeqCst);

        for i in 1..=max {
            map.get_or_create(&format!("k{i}"));
        }
        assert_eq!(rotations.load(Ordering::SeqCst), 1);
        assert!(map.contains(&"k0".to_string()));

        for i in (max + 1)..(2 * max + 1) {
            map.get_or_create(&format!("k{i}"));
        }
        assert_eq!(rotations.load(Ordering::SeqCst), 2);
        assert!(!map.contains(&"k0".to_string()));

        let recreated = map.get_or_create(&"k0".to_string());
        assert_eq!(recreated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_access_keeps_key_warm() {
        let (map, rotations) = counting_map(2);
        let hot = map.get_or_create(&"hot".to_string());
        hot.fetch_add(7, Ordering::SeqCst);
        map.get_or_create(&"x".to_string());
        assert_eq!(rotations.load(Ordering::SeqCst), 1);

        // promoted out of the old generation before it is retired
        map.get_or_create(&"hot".to_string());
        map.get_or_create(&"y".to_string());
        assert_eq!(rotations.load(Ordering::SeqCst), 2);

        assert_eq!(
            map.get_or_create(&"hot".to_string()).load(Ordering::SeqCst),
            7
        );
    }

    proptest! {
        #[test]
        fn prop_size_bounded(max in 1usize..50, keys in proptest::collection::vec(0u32..500, 0..400)) {
            let map: GenMap<u32, ()> = GenMap::new(max, || (), None);
            for key in &keys {
                map.get_or_create(key);
                prop_assert!(map.len() <= 2 * max);
            }
        }
    }
}
