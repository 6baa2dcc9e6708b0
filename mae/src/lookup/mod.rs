// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Per-discipline storage behind a match unit.
//!
//! A match unit hands its canonical keys to a [`LookupStructure`] chosen
//! for the unit's discipline: a hash map for exact keys, a binary trie for
//! longest-prefix keys, and an ordered scan for ternary and range keys.
//! The structure maps a packet's canonical key bytes back to the unit's
//! slot index; everything else about an entry (value, counters, version)
//! lives in the unit itself.

use mal::ByteContainer;

mod exact;
pub use exact::ExactMap;

mod lpm;
pub use lpm::LpmTrie;

mod ternary;
pub use ternary::RangeScan;
pub use ternary::TernaryScan;

/// Priority value marking a ternary/range entry that can never match.
/// Smaller values are higher priority, so this is the floor.
pub const PRIORITY_UNREACHABLE: u32 = u32::MAX;

/// The discipline of a match unit's canonical key, derived from the mix
/// of field match types when the unit's key builder is finalized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LookupKind {
    #[default]
    Exact,
    Lpm,
    Ternary,
    Range,
}

/// A whole-key entry in its canonical stored form, produced by the match
/// unit's key builder from a control-plane parameter vector.
///
/// For `Range`, the data bytes hold the inclusive low bound and the mask
/// bytes the inclusive high bound over each range span; outside the range
/// spans, data/mask carry ordinary ternary semantics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoredKey {
    Exact {
        data: ByteContainer,
    },
    Lpm {
        data: ByteContainer,
        /// Prefix length in bits over the whole canonical key.
        prefix_len: u32,
    },
    Ternary {
        data: ByteContainer,
        mask: ByteContainer,
        priority: u32,
    },
    Range {
        data: ByteContainer,
        mask: ByteContainer,
        priority: u32,
        /// `(byte offset, byte width)` of each range field's span.
        range_spans: Vec<(usize, usize)>,
    },
}

impl StoredKey {
    pub fn data(&self) -> &ByteContainer {
        match self {
            StoredKey::Exact { data } => data,
            StoredKey::Lpm { data, .. } => data,
            StoredKey::Ternary { data, .. } => data,
            StoredKey::Range { data, .. } => data,
        }
    }

    /// The entry's ternary/range priority; exact and LPM entries have no
    /// priority and report the unreachable floor.
    pub fn priority(&self) -> u32 {
        match self {
            StoredKey::Ternary { priority, .. } => *priority,
            StoredKey::Range { priority, .. } => *priority,
            _ => PRIORITY_UNREACHABLE,
        }
    }
}

/// The storage contract a match unit programs against.  One
/// implementation per discipline; the unit guarantees it only ever hands
/// a structure keys of its own [`StoredKey`] variant.
pub trait LookupStructure: Send + Sync {
    /// Best match for a packet's canonical key bytes: exact equality,
    /// longest prefix, or lowest priority among mask matches, per the
    /// discipline.  Returns the owning unit's slot index.
    fn lookup(&self, key: &[u8]) -> Option<u32>;

    /// Structural duplicate detection: two keys are duplicates when their
    /// data and discipline parameters (prefix length, mask, range spans)
    /// are equal.  Priority is deliberately not considered.
    fn entry_exists(&self, key: &StoredKey) -> bool;

    /// Publish `key` as live at `slot`.  The unit writes the slot's entry
    /// data before calling this, so a concurrent-free lookup can never
    /// see a slot the unit hasn't populated.
    fn store_entry(&mut self, key: StoredKey, slot: u32);

    /// Withdraw a previously stored key.
    fn delete_entry(&mut self, key: &StoredKey);

    fn clear(&mut self);
}

/// Builds the lookup structure for a unit.  The default factory returns
/// the three software implementations in this module; a target can
/// substitute its own (e.g. a TCAM shim) without touching match-unit
/// code.
pub trait LookupStructureFactory: Send + Sync {
    fn build(&self, kind: LookupKind, size: u32) -> Box<dyn LookupStructure>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultLookupFactory;

impl LookupStructureFactory for DefaultLookupFactory {
    fn build(&self, kind: LookupKind, size: u32) -> Box<dyn LookupStructure> {
        match kind {
            LookupKind::Exact => Box::new(ExactMap::new(size)),
            LookupKind::Lpm => Box::new(LpmTrie::new()),
            LookupKind::Ternary => Box::new(TernaryScan::new(size)),
            LookupKind::Range => Box::new(RangeScan::new(size)),
        }
    }
}
