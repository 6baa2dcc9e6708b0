// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Ternary and range storage: an ordered scan over rows indexed by the
//! owning unit's slot.  Among rows whose mask matches the packet key, the
//! numerically smallest priority wins; on equal priority the row with the
//! lowest slot index wins (first in storage order).  Deleted rows are
//! emptied in place so the indices of the remaining rows are preserved.

use crate::lookup::LookupStructure;
use crate::lookup::StoredKey;

fn ternary_eq(key: &[u8], data: &[u8], mask: &[u8]) -> bool {
    key.iter()
        .zip(data.iter())
        .zip(mask.iter())
        .all(|((k, d), m)| k & m == d & m)
}

struct TernaryRow {
    data: Vec<u8>,
    mask: Vec<u8>,
    priority: u32,
}

pub struct TernaryScan {
    rows: Vec<Option<TernaryRow>>,
}

impl TernaryScan {
    pub fn new(size: u32) -> Self {
        TernaryScan { rows: Vec::with_capacity(size as usize) }
    }
}

impl LookupStructure for TernaryScan {
    fn lookup(&self, key: &[u8]) -> Option<u32> {
        let mut best: Option<(u32, u32)> = None;
        for (slot, row) in self.rows.iter().enumerate() {
            let Some(row) = row else {
                continue;
            };
            if !ternary_eq(key, &row.data, &row.mask) {
                continue;
            }
            // strict comparison keeps the earliest row on a priority tie
            if best.map(|(_, prio)| row.priority < prio).unwrap_or(true) {
                best = Some((slot as u32, row.priority));
            }
        }
        best.map(|(slot, _)| slot)
    }

    fn entry_exists(&self, key: &StoredKey) -> bool {
        let StoredKey::Ternary { data, mask, .. } = key else {
            return false;
        };
        self.rows.iter().flatten().any(|row| {
            row.data == data.as_slice() && row.mask == mask.as_slice()
        })
    }

    fn store_entry(&mut self, key: StoredKey, slot: u32) {
        let StoredKey::Ternary { data, mask, priority } = key else {
            return;
        };
        let idx = slot as usize;
        if idx >= self.rows.len() {
            self.rows.resize_with(idx + 1, || None);
        }
        self.rows[idx] = Some(TernaryRow {
            data: data.into_vec(),
            mask: mask.into_vec(),
            priority,
        });
    }

    fn delete_entry(&mut self, key: &StoredKey) {
        let StoredKey::Ternary { data, mask, .. } = key else {
            return;
        };
        for row in self.rows.iter_mut() {
            let matches = row.as_ref().map(|r| {
                r.data == data.as_slice() && r.mask == mask.as_slice()
            });
            if matches == Some(true) {
                *row = None;
                return;
            }
        }
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

struct RangeRow {
    data: Vec<u8>,
    mask: Vec<u8>,
    priority: u32,
    spans: Vec<(usize, usize)>,
}

impl RangeRow {
    // Range spans hold low bound in data and high bound in mask; the
    // bytes between spans carry ordinary ternary semantics.  Spans are
    // recorded in ascending offset order.
    fn matches(&self, key: &[u8]) -> bool {
        let mut pos = 0;
        for &(off, len) in &self.spans {
            if !ternary_eq(
                &key[pos..off],
                &self.data[pos..off],
                &self.mask[pos..off],
            ) {
                return false;
            }
            let span = &key[off..off + len];
            if span < &self.data[off..off + len]
                || span > &self.mask[off..off + len]
            {
                return false;
            }
            pos = off + len;
        }
        ternary_eq(&key[pos..], &self.data[pos..], &self.mask[pos..])
    }
}

pub struct RangeScan {
    rows: Vec<Option<RangeRow>>,
}

impl RangeScan {
    pub fn new(size: u32) -> Self {
        RangeScan { rows: Vec::with_capacity(size as usize) }
    }
}

impl LookupStructure for RangeScan {
    fn lookup(&self, key: &[u8]) -> Option<u32> {
        let mut best: Option<(u32, u32)> = None;
        for (slot, row) in self.rows.iter().enumerate() {
            let Some(row) = row else {
                continue;
            };
            if !row.matches(key) {
                continue;
            }
            if best.map(|(_, prio)| row.priority < prio).unwrap_or(true) {
                best = Some((slot as u32, row.priority));
            }
        }
        best.map(|(slot, _)| slot)
    }

    fn entry_exists(&self, key: &StoredKey) -> bool {
        let StoredKey::Range { data, mask, range_spans, .. } = key else {
            return false;
        };
        self.rows.iter().flatten().any(|row| {
            row.data == data.as_slice()
                && row.mask == mask.as_slice()
                && row.spans == *range_spans
        })
    }

    fn store_entry(&mut self, key: StoredKey, slot: u32) {
        let StoredKey::Range { data, mask, priority, range_spans } = key
        else {
            return;
        };
        let idx = slot as usize;
        if idx >= self.rows.len() {
            self.rows.resize_with(idx + 1, || None);
        }
        self.rows[idx] = Some(RangeRow {
            data: data.into_vec(),
            mask: mask.into_vec(),
            priority,
            spans: range_spans,
        });
    }

    fn delete_entry(&mut self, key: &StoredKey) {
        let StoredKey::Range { data, mask, .. } = key else {
            return;
        };
        for row in self.rows.iter_mut() {
            let matches = row.as_ref().map(|r| {
                r.data == data.as_slice() && r.mask == mask.as_slice()
            });
            if matches == Some(true) {
                *row = None;
                return;
            }
        }
    }

    fn clear(&mut self) {
        self.rows.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ternary(data: &[u8], mask: &[u8], priority: u32) -> StoredKey {
        StoredKey::Ternary {
            data: data.into(),
            mask: mask.into(),
            priority,
        }
    }

    #[test]
    fn test_smaller_priority_wins() {
        let mut scan = TernaryScan::new(8);
        scan.store_entry(ternary(&[10, 0], &[0xff, 0x00], 5), 0);
        scan.store_entry(ternary(&[10, 1], &[0xff, 0xff], 3), 1);

        // both rows cover [10, 1]; priority 3 beats 5
        assert_eq!(scan.lookup(&[10, 1]), Some(1));
        // only the wildcard row covers [10, 9]
        assert_eq!(scan.lookup(&[10, 9]), Some(0));
        assert_eq!(scan.lookup(&[11, 1]), None);
    }

    #[test]
    fn test_equal_priority_first_row_wins() {
        let mut scan = TernaryScan::new(8);
        scan.store_entry(ternary(&[1], &[0x0f], 7), 0);
        scan.store_entry(ternary(&[0x11], &[0xff], 7), 1);

        // both rows cover 0x11 at priority 7; row 0 is first in storage
        assert_eq!(scan.lookup(&[0x11]), Some(0));
    }

    #[test]
    fn test_delete_preserves_row_indices() {
        let mut scan = TernaryScan::new(8);
        scan.store_entry(ternary(&[1], &[0xff], 10), 0);
        scan.store_entry(ternary(&[1], &[0x0f], 10), 1);

        scan.delete_entry(&ternary(&[1], &[0xff], 10));
        assert_eq!(scan.lookup(&[1]), Some(1));
        assert!(!scan.entry_exists(&ternary(&[1], &[0xff], 0)));
        assert!(scan.entry_exists(&ternary(&[1], &[0x0f], 99)));
    }

    #[test]
    fn test_exists_ignores_priority() {
        let mut scan = TernaryScan::new(8);
        scan.store_entry(ternary(&[7], &[0xff], 1), 0);
        assert!(scan.entry_exists(&ternary(&[7], &[0xff], 2)));
        assert!(!scan.entry_exists(&ternary(&[7], &[0x7f], 1)));
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let mut scan = RangeScan::new(8);
        // exact byte 0x0a, then a 2-byte range [0x0050, 0x0060]
        scan.store_entry(
            StoredKey::Range {
                data: [0x0au8, 0x00, 0x50].into(),
                mask: [0xffu8, 0x00, 0x60].into(),
                priority: 1,
                range_spans: vec![(1, 2)],
            },
            0,
        );

        assert_eq!(scan.lookup(&[0x0a, 0x00, 0x50]), Some(0));
        assert_eq!(scan.lookup(&[0x0a, 0x00, 0x58]), Some(0));
        assert_eq!(scan.lookup(&[0x0a, 0x00, 0x60]), Some(0));
        assert_eq!(scan.lookup(&[0x0a, 0x00, 0x61]), None);
        assert_eq!(scan.lookup(&[0x0a, 0x00, 0x4f]), None);
        assert_eq!(scan.lookup(&[0x0b, 0x00, 0x58]), None);
    }
}
