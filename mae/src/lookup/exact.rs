// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Exact-match storage: a hash map keyed on the raw canonical key bytes.

use std::collections::HashMap;

use crate::lookup::LookupStructure;
use crate::lookup::StoredKey;

pub struct ExactMap {
    map: HashMap<Vec<u8>, u32>,
}

impl ExactMap {
    pub fn new(size: u32) -> Self {
        ExactMap { map: HashMap::with_capacity(size as usize) }
    }
}

impl LookupStructure for ExactMap {
    fn lookup(&self, key: &[u8]) -> Option<u32> {
        self.map.get(key).copied()
    }

    fn entry_exists(&self, key: &StoredKey) -> bool {
        self.map.contains_key(key.data().as_slice())
    }

    fn store_entry(&mut self, key: StoredKey, slot: u32) {
        self.map.insert(key.data().as_slice().to_vec(), slot);
    }

    fn delete_entry(&mut self, key: &StoredKey) {
        self.map.remove(key.data().as_slice());
    }

    fn clear(&mut self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn exact(bytes: &[u8]) -> StoredKey {
        StoredKey::Exact { data: bytes.into() }
    }

    #[test]
    fn test_exact_semantics() {
        let mut map = ExactMap::new(16);
        map.store_entry(exact(&[10, 0, 0, 1]), 0);
        map.store_entry(exact(&[10, 0, 0, 2]), 1);

        assert_eq!(map.lookup(&[10, 0, 0, 1]), Some(0));
        assert_eq!(map.lookup(&[10, 0, 0, 2]), Some(1));
        assert_eq!(map.lookup(&[10, 0, 0, 3]), None);
        assert!(map.entry_exists(&exact(&[10, 0, 0, 1])));

        map.delete_entry(&exact(&[10, 0, 0, 1]));
        assert_eq!(map.lookup(&[10, 0, 0, 1]), None);
        assert!(!map.entry_exists(&exact(&[10, 0, 0, 1])));

        map.clear();
        assert_eq!(map.lookup(&[10, 0, 0, 2]), None);
    }
}
