// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Longest-prefix-match storage: a binary trie over the canonical key
//! bits, MSB first.  The most specific prefix wins by construction --
//! the deepest slot-bearing node on the key's path is the answer, so no
//! insertion-order tie-breaking exists.
//!
//! The key builder lays exact and validity fields out ahead of the LPM
//! field, so those fields contribute fixed full-width prefix bits and an
//! entry's canonical prefix length already covers them.

use crate::lookup::LookupStructure;
use crate::lookup::StoredKey;

#[derive(Default)]
struct TrieNode {
    children: [Option<Box<TrieNode>>; 2],
    // Set when a prefix ends at this depth.
    slot: Option<u32>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.slot.is_none()
            && self.children[0].is_none()
            && self.children[1].is_none()
    }
}

fn key_bit(key: &[u8], idx: u32) -> usize {
    let byte = key[(idx / 8) as usize];
    usize::from(byte >> (7 - idx % 8) & 1)
}

// Removes the prefix ending `depth` bits below `node`, pruning nodes left
// with neither a slot nor children.  Returns true if `node` became empty.
fn remove_prefix(
    node: &mut TrieNode,
    key: &[u8],
    prefix_len: u32,
    depth: u32,
) -> bool {
    if depth == prefix_len {
        node.slot = None;
        return node.is_empty();
    }
    let bit = key_bit(key, depth);
    if let Some(child) = node.children[bit].as_mut() {
        if remove_prefix(child, key, prefix_len, depth + 1) {
            node.children[bit] = None;
        }
    }
    node.is_empty()
}

pub struct LpmTrie {
    root: TrieNode,
}

impl LpmTrie {
    pub fn new() -> Self {
        LpmTrie { root: TrieNode::default() }
    }

    fn find(&self, key: &[u8], prefix_len: u32) -> Option<&TrieNode> {
        let mut node = &self.root;
        for idx in 0..prefix_len {
            node = node.children[key_bit(key, idx)].as_deref()?;
        }
        Some(node)
    }
}

impl Default for LpmTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl LookupStructure for LpmTrie {
    fn lookup(&self, key: &[u8]) -> Option<u32> {
        let mut node = &self.root;
        let mut best = node.slot;
        for idx in 0..(key.len() * 8) as u32 {
            match node.children[key_bit(key, idx)].as_deref() {
                Some(child) => node = child,
                None => break,
            }
            if node.slot.is_some() {
                best = node.slot;
            }
        }
        best
    }

    fn entry_exists(&self, key: &StoredKey) -> bool {
        let StoredKey::Lpm { data, prefix_len } = key else {
            return false;
        };
        self.find(data.as_slice(), *prefix_len)
            .map(|node| node.slot.is_some())
            .unwrap_or(false)
    }

    fn store_entry(&mut self, key: StoredKey, slot: u32) {
        let StoredKey::Lpm { data, prefix_len } = key else {
            return;
        };
        let mut node = &mut self.root;
        for idx in 0..prefix_len {
            node = node.children[key_bit(data.as_slice(), idx)]
                .get_or_insert_with(Default::default);
        }
        node.slot = Some(slot);
    }

    fn delete_entry(&mut self, key: &StoredKey) {
        let StoredKey::Lpm { data, prefix_len } = key else {
            return;
        };
        remove_prefix(&mut self.root, data.as_slice(), *prefix_len, 0);
    }

    fn clear(&mut self) {
        self.root = TrieNode::default();
    }
}
