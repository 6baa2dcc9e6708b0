// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The match unit: entry storage and lifecycle for one table.
//!
//! A [`MatchUnit`] owns the entries (key + value), their per-slot
//! metadata (version, counters, ageing state), the slot allocator, the
//! key builder, and a [`LookupStructure`] for the packet path.  The value
//! type is opaque to the unit: direct tables store [`ActionEntry`]s,
//! indirect tables store indices into an action profile.
//!
//! The unit itself is not a synchronization point.  The owning table
//! serializes control-plane mutation behind its write lock and performs
//! lookups under its read lock; the only state touched on the packet
//! path -- hit counters and ageing timestamps -- is atomic.
//!
//! [`ActionEntry`]: crate::action::ActionEntry

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;

use mal::ByteContainer;
use mal::CounterData;
use mal::EntryHandle;
use mal::MatchError;
use mal::MatchKeyParam;
use mal::MatchResult;
use phv::Phv;
use slog::debug;

use crate::handles::HandleMgr;
use crate::key::MatchKeyBuilder;
use crate::lookup::LookupStructure;
use crate::lookup::LookupStructureFactory;
use crate::lookup::StoredKey;

struct Entry<V> {
    key: StoredKey,
    value: V,
}

/// Per-slot metadata.  The version and TTL change only under the owning
/// table's write lock; the counters and timestamp are bumped on the
/// packet path with relaxed atomics, so two packets hitting the same
/// entry may account approximately but never corrupt structure.
struct EntryMeta {
    version: u32,
    ttl_ms: Option<u64>,
    last_hit_ms: AtomicU64,
    pkts: AtomicU64,
    bytes: AtomicU64,
}

impl EntryMeta {
    fn new() -> Self {
        EntryMeta {
            version: 0,
            ttl_ms: None,
            last_hit_ms: AtomicU64::new(0),
            pkts: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    // Reset the dynamic state for a slot's next occupant.  The version
    // survives reuse; that is what makes stale handles detectable.
    fn reset_dynamic(&mut self, now_ms: u64) {
        self.ttl_ms = None;
        self.last_hit_ms = AtomicU64::new(now_ms);
        self.pkts = AtomicU64::new(0);
        self.bytes = AtomicU64::new(0);
    }
}

pub struct MatchUnit<V> {
    log: slog::Logger,
    size: u32,
    builder: MatchKeyBuilder,
    lookup: Box<dyn LookupStructure>,
    handles: HandleMgr,
    entries: Vec<Option<Entry<V>>>,
    meta: Vec<EntryMeta>,
    epoch: Instant,
}

impl<V> MatchUnit<V> {
    /// `builder` must already be finalized with
    /// [`MatchKeyBuilder::build`]; the unit derives its lookup structure
    /// from the builder's discipline.
    pub fn new(
        log: &slog::Logger,
        name: &str,
        size: u32,
        builder: MatchKeyBuilder,
        factory: &dyn LookupStructureFactory,
    ) -> Self {
        let lookup = factory.build(builder.kind(), size);
        MatchUnit {
            log: log.new(slog::o!("unit" => name.to_string())),
            size,
            builder,
            lookup,
            handles: HandleMgr::new(log, name),
            entries: Vec::new(),
            meta: Vec::new(),
            epoch: Instant::now(),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn num_entries(&self) -> u32 {
        self.handles.live()
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn validate_handle(&self, handle: EntryHandle) -> MatchResult<usize> {
        let slot = handle.slot() as usize;
        if slot >= self.meta.len() {
            return Err(MatchError::InvalidHandle);
        }
        if handle.version() != self.meta[slot].version {
            return Err(MatchError::ExpiredHandle);
        }
        if !self.handles.handle_is_set(handle.slot()) {
            return Err(MatchError::InvalidHandle);
        }
        Ok(slot)
    }

    fn live_entry(&self, slot: usize) -> MatchResult<&Entry<V>> {
        self.entries[slot].as_ref().ok_or_else(|| {
            MatchError::Internal(format!("live slot {slot} has no entry"))
        })
    }

    /// Match a packet against the unit.  On a hit, the matched entry's
    /// counters and ageing timestamp are updated as a side effect.
    pub fn lookup(&self, phv: &Phv) -> Option<(EntryHandle, &V)> {
        let mut key = ByteContainer::with_capacity(self.builder.key_nbytes());
        self.builder.key_from_phv(phv, &mut key);
        let slot = self.lookup.lookup(key.as_slice())?;
        let meta = &self.meta[slot as usize];
        meta.pkts.fetch_add(1, Ordering::Relaxed);
        meta.bytes
            .fetch_add(u64::from(phv.packet_len()), Ordering::Relaxed);
        meta.last_hit_ms.store(self.now_ms(), Ordering::Relaxed);
        let entry = self.entries[slot as usize].as_ref()?;
        Some((EntryHandle::new(meta.version, slot), &entry.value))
    }

    /// Add an entry.  Validation happens up front: a rejected call
    /// leaves the unit untouched.
    pub fn add_entry(
        &mut self,
        params: &[MatchKeyParam],
        value: V,
        priority: u32,
    ) -> MatchResult<EntryHandle> {
        let key = self.builder.match_params_to_entry(params, priority)?;
        if self.lookup.entry_exists(&key) {
            return Err(MatchError::DuplicateEntry);
        }
        if self.handles.live() >= self.size {
            return Err(MatchError::TableFull);
        }

        let slot = self.handles.get_handle();
        let idx = slot as usize;
        if idx >= self.entries.len() {
            self.entries.push(None);
            self.meta.push(EntryMeta::new());
        }
        let now = self.now_ms();
        self.meta[idx].reset_dynamic(now);
        // The entry data must be in place before the lookup structure
        // publishes the slot.
        self.entries[idx] = Some(Entry { key: key.clone(), value });
        self.lookup.store_entry(key, slot);

        let handle = EntryHandle::new(self.meta[idx].version, slot);
        debug!(self.log, "added entry";
            "handle" => %handle, "entries" => self.num_entries());
        Ok(handle)
    }

    /// Delete an entry.  The slot's version is bumped before anything
    /// else, so the caller's handle (and any copy of it) is expired from
    /// this point on, even after the slot is reused.
    pub fn delete_entry(&mut self, handle: EntryHandle) -> MatchResult<()> {
        let slot = self.validate_handle(handle)?;
        self.meta[slot].version = self.meta[slot].version.wrapping_add(1);
        let entry = self.entries[slot].take().ok_or_else(|| {
            MatchError::Internal(format!("live slot {slot} has no entry"))
        })?;
        self.lookup.delete_entry(&entry.key);
        self.handles.release_handle(handle.slot());
        debug!(self.log, "deleted entry";
            "handle" => %handle, "entries" => self.num_entries());
        Ok(())
    }

    /// Replace an entry's value in place.  The key and version are
    /// unchanged; key mutation is delete-then-add.
    pub fn modify_entry(
        &mut self,
        handle: EntryHandle,
        value: V,
    ) -> MatchResult<()> {
        let slot = self.validate_handle(handle)?;
        match self.entries[slot].as_mut() {
            Some(entry) => {
                entry.value = value;
                Ok(())
            }
            None => Err(MatchError::Internal(format!(
                "live slot {slot} has no entry"
            ))),
        }
    }

    /// The entry's control-plane view: parameters in schema order, the
    /// value, and the ternary/range priority.
    pub fn get_entry(
        &self,
        handle: EntryHandle,
    ) -> MatchResult<(Vec<MatchKeyParam>, &V, u32)> {
        let slot = self.validate_handle(handle)?;
        let entry = self.live_entry(slot)?;
        Ok((
            self.builder.entry_to_match_params(&entry.key),
            &entry.value,
            entry.key.priority(),
        ))
    }

    /// Dump every live entry.
    pub fn get_entries(
        &self,
    ) -> Vec<(EntryHandle, Vec<MatchKeyParam>, &V, u32)> {
        self.handles
            .iter()
            .filter_map(|slot| {
                let entry = self.entries[slot as usize].as_ref()?;
                Some((
                    EntryHandle::new(self.meta[slot as usize].version, slot),
                    self.builder.entry_to_match_params(&entry.key),
                    &entry.value,
                    entry.key.priority(),
                ))
            })
            .collect()
    }

    pub fn get_counters(
        &self,
        handle: EntryHandle,
    ) -> MatchResult<CounterData> {
        let slot = self.validate_handle(handle)?;
        let meta = &self.meta[slot];
        Ok(CounterData {
            pkts: meta.pkts.load(Ordering::Relaxed),
            bytes: meta.bytes.load(Ordering::Relaxed),
        })
    }

    pub fn reset_counters(&mut self, handle: EntryHandle) -> MatchResult<()> {
        let slot = self.validate_handle(handle)?;
        self.meta[slot].pkts.store(0, Ordering::Relaxed);
        self.meta[slot].bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_entry_ttl(
        &mut self,
        handle: EntryHandle,
        ttl_ms: u64,
    ) -> MatchResult<()> {
        let slot = self.validate_handle(handle)?;
        self.meta[slot].ttl_ms = Some(ttl_ms);
        Ok(())
    }

    /// One pass over the live entries, returning those idle for at least
    /// their TTL.  The caller (an ageing timer, not the packet path)
    /// decides what to do with them.
    pub fn sweep_entries(&self) -> Vec<EntryHandle> {
        let now = self.now_ms();
        self.handles
            .iter()
            .filter_map(|slot| {
                let meta = &self.meta[slot as usize];
                let ttl = meta.ttl_ms?;
                let last = meta.last_hit_ms.load(Ordering::Relaxed);
                (now.saturating_sub(last) >= ttl)
                    .then(|| EntryHandle::new(meta.version, slot))
            })
            .collect()
    }

    /// Drop every entry and all per-slot state, including versions.
    pub fn reset_state(&mut self) {
        self.lookup.clear();
        self.handles.clear();
        self.entries.clear();
        self.meta.clear();
        debug!(self.log, "reset unit state");
    }
}

#[cfg(test)]
mod test {
    use mal::MatchType;
    use phv::FieldDesc;
    use phv::HeaderType;
    use phv::PhvFactory;

    use crate::lookup::DefaultLookupFactory;

    use super::*;

    fn phv_factory() -> PhvFactory {
        let mut factory = PhvFactory::new();
        factory
            .push_header_type(HeaderType {
                name: "ipv4".to_string(),
                fields: vec![FieldDesc {
                    name: "dst".to_string(),
                    nbits: 32,
                }],
            })
            .unwrap();
        factory
    }

    fn unit(size: u32, match_type: MatchType) -> MatchUnit<u32> {
        let factory = phv_factory();
        let mut builder = MatchKeyBuilder::new();
        builder
            .push_back_field(factory.field_ref("ipv4", "dst").unwrap(), match_type);
        builder.build().unwrap();
        let log = common::logging::init(
            "test",
            &None,
            common::logging::LogFormat::Human,
        )
        .unwrap();
        MatchUnit::new(&log, "test", size, builder, &DefaultLookupFactory)
    }

    fn dst_phv(dst: [u8; 4]) -> Phv {
        let mut phv = phv_factory().new_phv();
        phv.header_mut(0).mark_valid();
        phv.field_mut(0, 0).set_bytes(&dst);
        phv.set_packet_len(100);
        phv
    }

    #[test]
    fn test_handle_round_trip() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let params = vec![MatchKeyParam::exact([10u8, 0, 0, 1])];
        let h = unit.add_entry(&params, 7, 0)?;

        let (got_params, value, priority) = unit.get_entry(h)?;
        assert_eq!(got_params, params);
        assert_eq!(*value, 7);
        assert_eq!(priority, u32::MAX);
        Ok(())
    }

    #[test]
    fn test_lookup_hit_and_miss() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let params = vec![MatchKeyParam::exact([10u8, 0, 0, 1])];
        let h = unit.add_entry(&params, 42, 0)?;

        let (hit, value) = unit.lookup(&dst_phv([10, 0, 0, 1])).unwrap();
        assert_eq!(hit, h);
        assert_eq!(*value, 42);
        assert!(unit.lookup(&dst_phv([10, 0, 0, 2])).is_none());
        Ok(())
    }

    #[test]
    fn test_version_invalidation() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let h =
            unit.add_entry(&[MatchKeyParam::exact([1u8, 2, 3, 4])], 1, 0)?;
        unit.delete_entry(h)?;

        assert_eq!(unit.get_entry(h).unwrap_err(), MatchError::ExpiredHandle);
        assert_eq!(
            unit.modify_entry(h, 2).unwrap_err(),
            MatchError::ExpiredHandle
        );
        assert_eq!(
            unit.delete_entry(h).unwrap_err(),
            MatchError::ExpiredHandle
        );

        // reuse the slot; the old handle stays expired
        let h2 =
            unit.add_entry(&[MatchKeyParam::exact([5u8, 6, 7, 8])], 2, 0)?;
        assert_eq!(h2.slot(), h.slot());
        assert_ne!(h2.version(), h.version());
        assert_eq!(unit.get_entry(h).unwrap_err(), MatchError::ExpiredHandle);
        assert_eq!(*unit.get_entry(h2)?.1, 2);
        Ok(())
    }

    #[test]
    fn test_duplicate_entry() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let params = vec![MatchKeyParam::exact([9u8, 9, 9, 9])];
        unit.add_entry(&params, 1, 0)?;
        assert_eq!(
            unit.add_entry(&params, 2, 0).unwrap_err(),
            MatchError::DuplicateEntry
        );
        assert_eq!(unit.num_entries(), 1);
        // the first value is still in place
        let (_, value) = unit.lookup(&dst_phv([9, 9, 9, 9])).unwrap();
        assert_eq!(*value, 1);
        Ok(())
    }

    #[test]
    fn test_masked_duplicate_entry() -> anyhow::Result<()> {
        let factory = phv_factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field_masked(
            factory.field_ref("ipv4", "dst").unwrap(),
            MatchType::Exact,
            [0xffu8, 0xff, 0xff, 0x00].into(),
        );
        builder.build().unwrap();
        let log = common::logging::init(
            "test",
            &None,
            common::logging::LogFormat::Human,
        )
        .unwrap();
        let mut unit: MatchUnit<u32> =
            MatchUnit::new(&log, "test", 8, builder, &DefaultLookupFactory);

        // keys that differ only in masked-out bytes are the same entry
        unit.add_entry(&[MatchKeyParam::exact([10u8, 0, 0, 99])], 1, 0)?;
        assert_eq!(
            unit.add_entry(&[MatchKeyParam::exact([10u8, 0, 0, 88])], 2, 0)
                .unwrap_err(),
            MatchError::DuplicateEntry
        );
        assert_eq!(unit.num_entries(), 1);
        Ok(())
    }

    #[test]
    fn test_table_full() -> anyhow::Result<()> {
        let mut unit = unit(2, MatchType::Exact);
        unit.add_entry(&[MatchKeyParam::exact([0u8, 0, 0, 1])], 1, 0)?;
        unit.add_entry(&[MatchKeyParam::exact([0u8, 0, 0, 2])], 2, 0)?;
        assert_eq!(
            unit.add_entry(&[MatchKeyParam::exact([0u8, 0, 0, 3])], 3, 0)
                .unwrap_err(),
            MatchError::TableFull
        );
        assert_eq!(unit.num_entries(), 2);
        Ok(())
    }

    #[test]
    fn test_lpm_longest_prefix() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Lpm);
        let h8 =
            unit.add_entry(&[MatchKeyParam::lpm([10u8, 0, 0, 0], 8)], 8, 0)?;
        let h16 = unit
            .add_entry(&[MatchKeyParam::lpm([10u8, 1, 0, 0], 16)], 16, 0)?;

        let (hit, _) = unit.lookup(&dst_phv([10, 1, 2, 3])).unwrap();
        assert_eq!(hit, h16);
        let (hit, _) = unit.lookup(&dst_phv([10, 2, 2, 3])).unwrap();
        assert_eq!(hit, h8);
        Ok(())
    }

    #[test]
    fn test_ternary_priority() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Ternary);
        unit.add_entry(
            &[MatchKeyParam::ternary([10u8, 0, 0, 0], [0xffu8, 0, 0, 0])],
            5,
            5,
        )?;
        let h3 = unit.add_entry(
            &[MatchKeyParam::ternary(
                [10u8, 1, 0, 0],
                [0xffu8, 0xff, 0, 0],
            )],
            3,
            3,
        )?;

        let (hit, value) = unit.lookup(&dst_phv([10, 1, 9, 9])).unwrap();
        assert_eq!(hit, h3);
        assert_eq!(*value, 3);
        Ok(())
    }

    #[test]
    fn test_modify_keeps_key_and_version() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let params = vec![MatchKeyParam::exact([1u8, 1, 1, 1])];
        let h = unit.add_entry(&params, 1, 0)?;
        unit.modify_entry(h, 99)?;

        let (got_params, value, _) = unit.get_entry(h)?;
        assert_eq!(got_params, params);
        assert_eq!(*value, 99);
        let (hit, _) = unit.lookup(&dst_phv([1, 1, 1, 1])).unwrap();
        assert_eq!(hit, h);
        Ok(())
    }

    #[test]
    fn test_counters_track_hits() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let h =
            unit.add_entry(&[MatchKeyParam::exact([1u8, 0, 0, 0])], 1, 0)?;
        assert_eq!(unit.get_counters(h)?, CounterData::default());

        unit.lookup(&dst_phv([1, 0, 0, 0]));
        unit.lookup(&dst_phv([1, 0, 0, 0]));
        assert_eq!(
            unit.get_counters(h)?,
            CounterData { pkts: 2, bytes: 200 }
        );

        unit.reset_counters(h)?;
        assert_eq!(unit.get_counters(h)?, CounterData::default());
        Ok(())
    }

    #[test]
    fn test_sweep_respects_ttl() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let idle =
            unit.add_entry(&[MatchKeyParam::exact([1u8, 0, 0, 0])], 1, 0)?;
        let fresh =
            unit.add_entry(&[MatchKeyParam::exact([2u8, 0, 0, 0])], 2, 0)?;

        // no TTL set: nothing sweeps
        assert!(unit.sweep_entries().is_empty());

        // a zero TTL expires immediately; an hour-long one does not
        unit.set_entry_ttl(idle, 0)?;
        unit.set_entry_ttl(fresh, 3_600_000)?;
        assert_eq!(unit.sweep_entries(), vec![idle]);
        Ok(())
    }

    #[test]
    fn test_failed_calls_leave_state_untouched() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        let h =
            unit.add_entry(&[MatchKeyParam::exact([1u8, 0, 0, 0])], 1, 0)?;

        // malformed key: wrong width
        assert!(matches!(
            unit.add_entry(&[MatchKeyParam::exact([1u8])], 9, 0),
            Err(MatchError::BadMatchKey(_))
        ));
        // bogus handle
        let bogus = EntryHandle::new(0, 77);
        assert_eq!(
            unit.delete_entry(bogus).unwrap_err(),
            MatchError::InvalidHandle
        );

        assert_eq!(unit.num_entries(), 1);
        assert_eq!(*unit.get_entry(h)?.1, 1);
        Ok(())
    }

    #[test]
    fn test_reset_state() -> anyhow::Result<()> {
        let mut unit = unit(8, MatchType::Exact);
        unit.add_entry(&[MatchKeyParam::exact([1u8, 0, 0, 0])], 1, 0)?;
        unit.reset_state();
        assert_eq!(unit.num_entries(), 0);
        assert!(unit.lookup(&dst_phv([1, 0, 0, 0])).is_none());
        assert!(unit.get_entries().is_empty());
        Ok(())
    }
}
