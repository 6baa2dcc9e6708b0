// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Allocation of the dense slot indices behind entry, member, and group
//! handles.

use slog::debug;

/// Allocates small dense integers backed by a growable bitset.  Slots are
/// handed out lowest-free-first and recycled after release; callers that
/// need to detect recycling stamp versions on top of the slot index (see
/// the match unit's entry metadata).
///
/// A `HandleMgr` places no upper bound on the slot space itself.  Tables
/// enforce their configured sizes by checking their live-entry counts
/// before allocating.
pub struct HandleMgr {
    // Where debug messages are logged
    log: slog::Logger,
    // One bit per slot; set bits are live.  Grows on demand a word at a
    // time.
    words: Vec<u64>,
    // Number of set bits
    live: u32,
}

impl HandleMgr {
    pub fn new(log: &slog::Logger, name: impl ToString) -> Self {
        let unit = format!("handles_{}", name.to_string());
        let log = log.new(slog::o!("unit" => unit));
        HandleMgr {
            log,
            words: Vec::new(),
            live: 0,
        }
    }

    /// Allocate the lowest free slot.
    pub fn get_handle(&mut self) -> u32 {
        for (idx, word) in self.words.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones();
                *word |= 1u64 << bit;
                self.live += 1;
                return (idx as u32) * 64 + bit;
            }
        }

        let slot = (self.words.len() as u32) * 64;
        self.words.push(1);
        self.live += 1;
        debug!(self.log, "grew handle space";
            "slots" => self.words.len() * 64);
        slot
    }

    /// Release a slot for reuse.  Returns false if the slot wasn't live.
    pub fn release_handle(&mut self, slot: u32) -> bool {
        let idx = (slot / 64) as usize;
        let bit = 1u64 << (slot % 64);
        if idx >= self.words.len() || self.words[idx] & bit == 0 {
            return false;
        }
        self.words[idx] &= !bit;
        self.live -= 1;
        true
    }

    pub fn handle_is_set(&self, slot: u32) -> bool {
        let idx = (slot / 64) as usize;
        idx < self.words.len() && self.words[idx] & (1u64 << (slot % 64)) != 0
    }

    pub fn live(&self) -> u32 {
        self.live
    }

    /// Release every slot.
    pub fn clear(&mut self) {
        self.words.clear();
        self.live = 0;
    }

    /// Iterate over live slots in ascending order.
    pub fn iter(&self) -> HandleIter {
        HandleIter {
            words: &self.words,
            next_word: 0,
            base: 0,
            current: 0,
        }
    }
}

pub struct HandleIter<'a> {
    words: &'a [u64],
    next_word: usize,
    base: u32,
    current: u64,
}

impl Iterator for HandleIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros();
                self.current &= self.current - 1;
                return Some(self.base + bit);
            }
            if self.next_word >= self.words.len() {
                return None;
            }
            self.current = self.words[self.next_word];
            self.base = (self.next_word as u32) * 64;
            self.next_word += 1;
        }
    }
}

#[cfg(test)]
fn new_mgr() -> HandleMgr {
    let log =
        common::logging::init("test", &None, common::logging::LogFormat::Human)
            .unwrap();
    HandleMgr::new(&log, "test")
}

// Slots should come out lowest-first and recycle after release.
#[test]
fn test_alloc_order() -> anyhow::Result<()> {
    let mut mgr = new_mgr();

    assert_eq!(mgr.get_handle(), 0);
    assert_eq!(mgr.get_handle(), 1);
    assert_eq!(mgr.get_handle(), 2);
    assert_eq!(mgr.live(), 3);

    assert!(mgr.release_handle(1));
    assert_eq!(mgr.live(), 2);
    assert_eq!(mgr.get_handle(), 1);

    // double-release is rejected
    assert!(mgr.release_handle(2));
    assert!(!mgr.release_handle(2));
    Ok(())
}

#[test]
fn test_membership() -> anyhow::Result<()> {
    let mut mgr = new_mgr();

    let a = mgr.get_handle();
    assert!(mgr.handle_is_set(a));
    assert!(!mgr.handle_is_set(a + 1));
    assert!(!mgr.handle_is_set(1000));

    mgr.release_handle(a);
    assert!(!mgr.handle_is_set(a));
    Ok(())
}

// The allocator grows past a single bitset word.
#[test]
fn test_growth() -> anyhow::Result<()> {
    let mut mgr = new_mgr();

    for want in 0..130u32 {
        assert_eq!(mgr.get_handle(), want);
    }
    assert_eq!(mgr.live(), 130);
    assert!(mgr.handle_is_set(129));
    Ok(())
}

#[test]
fn test_iter() -> anyhow::Result<()> {
    let mut mgr = new_mgr();

    for _ in 0..70u32 {
        mgr.get_handle();
    }
    mgr.release_handle(0);
    mgr.release_handle(64);
    mgr.release_handle(69);

    let live: Vec<u32> = mgr.iter().collect();
    assert_eq!(live.len(), mgr.live() as usize);
    assert!(!live.contains(&0));
    assert!(!live.contains(&64));
    assert!(live.contains(&63));
    assert!(live.contains(&68));
    // ascending order
    assert!(live.windows(2).all(|w| w[0] < w[1]));

    mgr.clear();
    assert_eq!(mgr.iter().count(), 0);
    Ok(())
}
