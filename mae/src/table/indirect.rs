// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Indirect match tables.
//!
//! An indirect table's entries store an [`IndirectIndex`] into an action
//! profile instead of an inline action.  [`MatchTableIndirect`] entries
//! reference members; [`MatchTableIndirectWs`] ("with selector") entries
//! may also reference groups, resolved per packet by hashing the packet
//! and asking the profile's selection strategy for a member.  When no
//! hash is configured the selector is fed hash 0, which the default
//! strategy maps to member index 0 -- deterministic for testing, not a
//! production configuration.
//!
//! The profile may be shared with other tables; lock order is always
//! table first, profile second.

use std::sync::Arc;

use mal::ActionData;
use mal::CounterData;
use mal::EntryHandle;
use mal::GroupHandle;
use mal::MatchError;
use mal::MatchKeyParam;
use mal::MatchResult;
use mal::MemberHandle;
use parking_lot::RwLock;
use slog::debug;

use crate::key::MatchKeyBuilder;
use crate::lookup::LookupStructureFactory;
use crate::profile::ActionProfile;
use crate::profile::IndirectIndex;
use crate::table::NodeId;
use crate::table::TableCore;
use crate::table::TableSpec;
use crate::unit::MatchUnit;

/// Hashes a packet to pick a member from a group.  Configured from the
/// pipeline's declared selector fields.
pub type GroupHash = Arc<dyn Fn(&phv::Phv) -> u64 + Send + Sync>;

/// A match table whose entries reference action-profile members.
pub struct MatchTableIndirect {
    core: TableCore,
    profile: Arc<ActionProfile>,
    hash: Option<GroupHash>,
    state: RwLock<IndirectState>,
}

struct IndirectState {
    unit: MatchUnit<IndirectIndex>,
    default_index: Option<IndirectIndex>,
}

impl MatchTableIndirect {
    pub fn new(
        log: &slog::Logger,
        spec: TableSpec,
        builder: MatchKeyBuilder,
        factory: &dyn LookupStructureFactory,
        profile: Arc<ActionProfile>,
    ) -> Self {
        let core = TableCore::new(log, &spec);
        let unit = MatchUnit::new(
            &core.log,
            &spec.name,
            spec.size,
            builder,
            factory,
        );
        MatchTableIndirect {
            core,
            profile,
            hash: None,
            state: RwLock::new(IndirectState {
                unit,
                default_index: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn profile(&self) -> &Arc<ActionProfile> {
        &self.profile
    }

    pub fn num_entries(&self) -> u32 {
        self.state.read().unit.num_entries()
    }

    pub fn add_action(
        &mut self,
        desc: Arc<crate::action::ActionDesc>,
        next_node: Option<NodeId>,
    ) {
        self.core.add_action(desc, next_node);
    }

    pub fn set_next_node_hit(&mut self, node: Option<NodeId>) {
        self.core.set_next_node_hit(node);
    }

    pub fn set_next_node_miss(&mut self, node: Option<NodeId>) {
        self.core.set_next_node_miss(node);
    }

    fn packet_hash(&self, phv: &phv::Phv) -> u64 {
        // no configured hash defaults to 0: the default selector then
        // deterministically picks member index 0
        self.hash.as_ref().map(|h| h(phv)).unwrap_or(0)
    }

    /// The packet path: lookup, resolve the index through the profile,
    /// meter on hit, action, next node.
    ///
    /// The table's read guard is held until the action has run.  A
    /// matched index therefore cannot be unreferenced (and its target
    /// deleted) mid-packet: the control plane's delete blocks on the
    /// table write lock first.  Lock order is table then profile
    /// everywhere, so taking the profile's read lock inside is safe.
    pub fn apply_action(&self, phv: &mut phv::Phv) -> Option<NodeId> {
        let state = self.state.read();
        let (hit, index) = match state.unit.lookup(phv) {
            Some((handle, index)) => (Some(handle), Some(*index)),
            None => (None, state.default_index),
        };
        let entry = match index {
            Some(index) => self.profile.resolve(index, self.packet_hash(phv)),
            None => crate::action::ActionEntry::empty(),
        };
        if let Some(handle) = hit {
            self.core.meter_on_hit(handle.slot(), phv);
        }
        entry.execute(phv);
        drop(state);
        self.core.resolve_next(hit.is_some(), entry.name())
    }

    /// Create a member in the bound profile, resolving the action name
    /// against this table's action set.
    pub fn add_member(
        &self,
        action: &str,
        data: ActionData,
    ) -> MatchResult<MemberHandle> {
        let entry = self.core.make_entry(action, data)?;
        Ok(self.profile.add_member(entry))
    }

    pub fn modify_member(
        &self,
        mbr: MemberHandle,
        action: &str,
        data: ActionData,
    ) -> MatchResult<()> {
        let entry = self.core.make_entry(action, data)?;
        self.profile.modify_member(mbr, entry)
    }

    pub fn delete_member(&self, mbr: MemberHandle) -> MatchResult<()> {
        self.profile.delete_member(mbr)
    }

    fn add_index_entry(
        &self,
        params: &[MatchKeyParam],
        index: IndirectIndex,
        priority: u32,
    ) -> MatchResult<EntryHandle> {
        // take the reference first: it validates the target, and a
        // failed add below just gives it back
        self.profile.ref_index(index)?;
        let mut state = self.state.write();
        match state.unit.add_entry(params, index, priority) {
            Ok(handle) => {
                debug!(self.core.log, "added entry";
                    "handle" => %handle, "index" => %index);
                Ok(handle)
            }
            Err(e) => {
                drop(state);
                let _ = self.profile.unref_index(index);
                Err(e)
            }
        }
    }

    pub fn add_entry(
        &self,
        params: &[MatchKeyParam],
        mbr: MemberHandle,
        priority: u32,
    ) -> MatchResult<EntryHandle> {
        self.add_index_entry(params, IndirectIndex::Member(mbr), priority)
    }

    pub fn delete_entry(&self, handle: EntryHandle) -> MatchResult<()> {
        let mut state = self.state.write();
        let (_, index, _) = state.unit.get_entry(handle)?;
        let index = *index;
        state.unit.delete_entry(handle)?;
        drop(state);
        let _ = self.profile.unref_index(index);
        debug!(self.core.log, "deleted entry"; "handle" => %handle);
        Ok(())
    }

    fn modify_index_entry(
        &self,
        handle: EntryHandle,
        index: IndirectIndex,
    ) -> MatchResult<()> {
        self.profile.ref_index(index)?;
        let mut state = self.state.write();
        let old = match state.unit.get_entry(handle) {
            Ok((_, old, _)) => *old,
            Err(e) => {
                drop(state);
                let _ = self.profile.unref_index(index);
                return Err(e);
            }
        };
        state.unit.modify_entry(handle, index)?;
        drop(state);
        let _ = self.profile.unref_index(old);
        Ok(())
    }

    pub fn modify_entry(
        &self,
        handle: EntryHandle,
        mbr: MemberHandle,
    ) -> MatchResult<()> {
        self.modify_index_entry(handle, IndirectIndex::Member(mbr))
    }

    fn set_default_index(&self, index: IndirectIndex) -> MatchResult<()> {
        self.profile.ref_index(index)?;
        let old = {
            let mut state = self.state.write();
            state.default_index.replace(index)
        };
        if let Some(old) = old {
            let _ = self.profile.unref_index(old);
        }
        Ok(())
    }

    pub fn set_default_member(&self, mbr: MemberHandle) -> MatchResult<()> {
        self.set_default_index(IndirectIndex::Member(mbr))
    }

    pub fn get_entry(
        &self,
        handle: EntryHandle,
    ) -> MatchResult<(Vec<MatchKeyParam>, IndirectIndex, u32)> {
        let state = self.state.read();
        let (params, index, priority) = state.unit.get_entry(handle)?;
        Ok((params, *index, priority))
    }

    pub fn get_counters(
        &self,
        handle: EntryHandle,
    ) -> MatchResult<CounterData> {
        self.core.check_counters()?;
        self.state.read().unit.get_counters(handle)
    }

    pub fn set_entry_ttl(
        &self,
        handle: EntryHandle,
        ttl_ms: u64,
    ) -> MatchResult<()> {
        self.core.check_ageing()?;
        self.state.write().unit.set_entry_ttl(handle, ttl_ms)
    }

    pub fn sweep_entries(&self) -> MatchResult<Vec<EntryHandle>> {
        self.core.check_ageing()?;
        Ok(self.state.read().unit.sweep_entries())
    }
}

/// An indirect table with a selector: entries (and the default) may also
/// reference groups.
pub struct MatchTableIndirectWs {
    inner: MatchTableIndirect,
}

impl MatchTableIndirectWs {
    pub fn new(
        log: &slog::Logger,
        spec: TableSpec,
        builder: MatchKeyBuilder,
        factory: &dyn LookupStructureFactory,
        profile: Arc<ActionProfile>,
    ) -> Self {
        MatchTableIndirectWs {
            inner: MatchTableIndirect::new(
                log, spec, builder, factory, profile,
            ),
        }
    }

    /// The member/entry surface is the plain indirect table's.
    pub fn indirect(&self) -> &MatchTableIndirect {
        &self.inner
    }

    pub fn indirect_mut(&mut self) -> &mut MatchTableIndirect {
        &mut self.inner
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn set_hash(&mut self, hash: GroupHash) {
        self.inner.hash = Some(hash);
    }

    pub fn apply_action(&self, phv: &mut phv::Phv) -> Option<NodeId> {
        self.inner.apply_action(phv)
    }

    pub fn create_group(&self) -> GroupHandle {
        self.inner.profile.create_group()
    }

    pub fn delete_group(&self, grp: GroupHandle) -> MatchResult<()> {
        self.inner.profile.delete_group(grp)
    }

    pub fn add_member_to_group(
        &self,
        mbr: MemberHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        self.inner.profile.add_member_to_group(mbr, grp)
    }

    pub fn remove_member_from_group(
        &self,
        mbr: MemberHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        self.inner.profile.remove_member_from_group(mbr, grp)
    }

    fn check_group_nonempty(&self, grp: GroupHandle) -> MatchResult<()> {
        if self.inner.profile.group_is_empty(grp)? {
            return Err(MatchError::EmptyGrp);
        }
        Ok(())
    }

    /// Add an entry pointing at a group.  The group must be non-empty
    /// when the entry is installed.
    pub fn add_entry_ws(
        &self,
        params: &[MatchKeyParam],
        grp: GroupHandle,
        priority: u32,
    ) -> MatchResult<EntryHandle> {
        self.check_group_nonempty(grp)?;
        self.inner.add_index_entry(
            params,
            IndirectIndex::Group(grp),
            priority,
        )
    }

    pub fn modify_entry_ws(
        &self,
        handle: EntryHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        self.check_group_nonempty(grp)?;
        self.inner.modify_index_entry(handle, IndirectIndex::Group(grp))
    }

    pub fn set_default_group(&self, grp: GroupHandle) -> MatchResult<()> {
        self.check_group_nonempty(grp)?;
        self.inner.set_default_index(IndirectIndex::Group(grp))
    }
}

#[cfg(test)]
mod test {
    use mal::MatchType;
    use phv::FieldDesc;
    use phv::HeaderType;
    use phv::PhvFactory;

    use crate::action::ActionDesc;
    use crate::lookup::DefaultLookupFactory;

    use super::*;

    fn test_log() -> slog::Logger {
        common::logging::init(
            "test",
            &None,
            common::logging::LogFormat::Human,
        )
        .unwrap()
    }

    fn phv_factory() -> PhvFactory {
        let mut factory = PhvFactory::new();
        factory
            .push_header_type(HeaderType {
                name: "ipv4".to_string(),
                fields: vec![
                    FieldDesc { name: "dst".to_string(), nbits: 32 },
                    FieldDesc { name: "src".to_string(), nbits: 32 },
                ],
            })
            .unwrap();
        factory
            .push_header_type(HeaderType {
                name: "meta".to_string(),
                fields: vec![FieldDesc {
                    name: "egress".to_string(),
                    nbits: 16,
                }],
            })
            .unwrap();
        factory
    }

    fn set_egress_desc() -> Arc<ActionDesc> {
        Arc::new(ActionDesc::new(
            "set_egress",
            vec![2],
            Arc::new(|phv: &mut phv::Phv, data: &ActionData| {
                let port = data.arg_as_u64(0).unwrap_or(0);
                phv.field_mut(1, 0).set_u64(port);
            }),
        ))
    }

    fn spec() -> TableSpec {
        TableSpec {
            name: "nexthop".to_string(),
            size: 16,
            with_counters: false,
            with_ageing: false,
        }
    }

    fn builder() -> MatchKeyBuilder {
        let factory = phv_factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field(
            factory.field_ref("ipv4", "dst").unwrap(),
            MatchType::Exact,
        );
        builder.build().unwrap();
        builder
    }

    fn dst_phv(dst: [u8; 4]) -> phv::Phv {
        let mut phv = phv_factory().new_phv();
        phv.header_mut(0).mark_valid();
        phv.field_mut(0, 0).set_bytes(&dst);
        phv.header_mut(1).mark_valid();
        phv
    }

    fn port_arg(port: u16) -> ActionData {
        let mut data = ActionData::new();
        data.push_arg(port.to_be_bytes());
        data
    }

    fn indirect_table() -> MatchTableIndirect {
        let log = test_log();
        let profile = Arc::new(ActionProfile::new(&log, "nexthop"));
        let mut table = MatchTableIndirect::new(
            &log,
            spec(),
            builder(),
            &DefaultLookupFactory,
            profile,
        );
        table.add_action(set_egress_desc(), Some(5));
        table
    }

    fn ws_table() -> MatchTableIndirectWs {
        let log = test_log();
        let profile = Arc::new(ActionProfile::new(&log, "ecmp"));
        let mut table = MatchTableIndirectWs::new(
            &log,
            spec(),
            builder(),
            &DefaultLookupFactory,
            profile,
        );
        table.indirect_mut().add_action(set_egress_desc(), Some(5));
        table
    }

    #[test]
    fn test_member_resolution() -> anyhow::Result<()> {
        let table = indirect_table();
        let mbr = table.add_member("set_egress", port_arg(42))?;
        table.add_entry(
            &[MatchKeyParam::exact([10u8, 0, 0, 1])],
            mbr,
            0,
        )?;

        let mut phv = dst_phv([10, 0, 0, 1]);
        assert_eq!(table.apply_action(&mut phv), Some(5));
        assert_eq!(phv.field(1, 0).as_u64(), 42);
        Ok(())
    }

    #[test]
    fn test_member_ref_count_protection() -> anyhow::Result<()> {
        let table = indirect_table();
        let mbr = table.add_member("set_egress", port_arg(1))?;
        let h = table.add_entry(
            &[MatchKeyParam::exact([10u8, 0, 0, 1])],
            mbr,
            0,
        )?;

        assert_eq!(
            table.delete_member(mbr).unwrap_err(),
            MatchError::MbrStillUsed
        );
        table.delete_entry(h)?;
        table.delete_member(mbr)?;
        Ok(())
    }

    // A hit's index always resolves to a live member: the read guard is
    // held across profile resolution, so deleting the matched entry and
    // then its member cannot strand a packet mid-path.  With the hit
    // next-node overridden, a stranded hit would surface as the hit
    // node paired with an unwritten egress field.
    #[test]
    fn test_concurrent_delete_cannot_strand_a_hit() -> anyhow::Result<()> {
        let mut table = indirect_table();
        table.set_next_node_hit(Some(9));
        table.set_next_node_miss(Some(3));
        let table = Arc::new(table);

        let stable = table.add_member("set_egress", port_arg(42))?;
        table.add_entry(
            &[MatchKeyParam::exact([10u8, 0, 0, 1])],
            stable,
            0,
        )?;

        let churn = {
            let table = table.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let mbr = table
                        .add_member("set_egress", port_arg(77))
                        .unwrap();
                    let h = table
                        .add_entry(
                            &[MatchKeyParam::exact([10u8, 0, 0, 2])],
                            mbr,
                            0,
                        )
                        .unwrap();
                    table.delete_entry(h).unwrap();
                    table.delete_member(mbr).unwrap();
                }
            })
        };

        let lookups = {
            let table = table.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let mut phv = dst_phv([10, 0, 0, 1]);
                    assert_eq!(table.apply_action(&mut phv), Some(9));
                    assert_eq!(phv.field(1, 0).as_u64(), 42);

                    let mut phv = dst_phv([10, 0, 0, 2]);
                    match table.apply_action(&mut phv) {
                        // hit: the churned member was still alive
                        Some(9) => {
                            assert_eq!(phv.field(1, 0).as_u64(), 77)
                        }
                        // miss: the action never ran
                        Some(3) => {
                            assert_eq!(phv.field(1, 0).as_u64(), 0)
                        }
                        next => panic!("unexpected next node {next:?}"),
                    }
                }
            })
        };
        churn.join().unwrap();
        lookups.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_failed_add_returns_reference() -> anyhow::Result<()> {
        let table = indirect_table();
        let mbr = table.add_member("set_egress", port_arg(1))?;
        let params = vec![MatchKeyParam::exact([10u8, 0, 0, 1])];
        table.add_entry(&params, mbr, 0)?;

        // duplicate add fails and must not leave a stray reference
        assert_eq!(
            table.add_entry(&params, mbr, 0).unwrap_err(),
            MatchError::DuplicateEntry
        );
        // bogus member is rejected up front
        assert_eq!(
            table
                .add_entry(
                    &[MatchKeyParam::exact([10u8, 0, 0, 2])],
                    MemberHandle::new(77),
                    0,
                )
                .unwrap_err(),
            MatchError::InvalidMbrHandle
        );

        let h = table.get_entries_handle()?;
        table.delete_entry(h)?;
        // only that one reference remained
        table.delete_member(mbr)?;
        Ok(())
    }

    impl MatchTableIndirect {
        // test helper: the single live entry's handle
        fn get_entries_handle(&self) -> MatchResult<EntryHandle> {
            let state = self.state.read();
            let entries = state.unit.get_entries();
            entries
                .first()
                .map(|(h, ..)| *h)
                .ok_or(MatchError::InvalidHandle)
        }
    }

    #[test]
    fn test_default_member_on_miss() -> anyhow::Result<()> {
        let table = indirect_table();
        let mbr = table.add_member("set_egress", port_arg(9))?;
        table.set_default_member(mbr)?;

        let mut phv = dst_phv([1, 1, 1, 1]);
        assert_eq!(table.apply_action(&mut phv), Some(5));
        assert_eq!(phv.field(1, 0).as_u64(), 9);

        // the default pins the member
        assert_eq!(
            table.delete_member(mbr).unwrap_err(),
            MatchError::MbrStillUsed
        );
        Ok(())
    }

    #[test]
    fn test_group_resolution_defaults_to_member_zero() -> anyhow::Result<()>
    {
        let table = ws_table();
        let m0 = table.indirect().add_member("set_egress", port_arg(10))?;
        let m1 = table.indirect().add_member("set_egress", port_arg(20))?;
        let grp = table.create_group();
        table.add_member_to_group(m0, grp)?;
        table.add_member_to_group(m1, grp)?;
        table.add_entry_ws(
            &[MatchKeyParam::exact([10u8, 0, 0, 1])],
            grp,
            0,
        )?;

        // no hash configured: member 0 of the group, every time
        for _ in 0..3 {
            let mut phv = dst_phv([10, 0, 0, 1]);
            assert_eq!(table.apply_action(&mut phv), Some(5));
            assert_eq!(phv.field(1, 0).as_u64(), 10);
        }
        Ok(())
    }

    #[test]
    fn test_group_hash_selects_member() -> anyhow::Result<()> {
        let mut table = ws_table();
        // hash on the low byte of ipv4.src
        table.set_hash(Arc::new(|phv: &phv::Phv| {
            phv.field(0, 1).as_u64()
        }));
        let m0 = table.indirect().add_member("set_egress", port_arg(10))?;
        let m1 = table.indirect().add_member("set_egress", port_arg(20))?;
        let grp = table.create_group();
        table.add_member_to_group(m0, grp)?;
        table.add_member_to_group(m1, grp)?;
        table.add_entry_ws(
            &[MatchKeyParam::exact([10u8, 0, 0, 1])],
            grp,
            0,
        )?;

        let lookup = |src_low: u8| {
            let mut phv = dst_phv([10, 0, 0, 1]);
            phv.field_mut(0, 1).set_bytes(&[0, 0, 0, src_low]);
            table.apply_action(&mut phv);
            phv.field(1, 0).as_u64()
        };
        assert_eq!(lookup(0), 10);
        assert_eq!(lookup(1), 20);
        assert_eq!(lookup(2), 10);
        Ok(())
    }

    #[test]
    fn test_group_ref_count_protection() -> anyhow::Result<()> {
        let table = ws_table();
        let mbr = table.indirect().add_member("set_egress", port_arg(1))?;
        let grp = table.create_group();
        table.add_member_to_group(mbr, grp)?;
        table.add_entry_ws(
            &[MatchKeyParam::exact([10u8, 0, 0, 1])],
            grp,
            0,
        )?;

        assert_eq!(
            table.delete_group(grp).unwrap_err(),
            MatchError::GrpStillUsed
        );
        let h = table.indirect().get_entries_handle()?;
        table.indirect().delete_entry(h)?;
        table.delete_group(grp)?;
        Ok(())
    }

    #[test]
    fn test_empty_group_refused() -> anyhow::Result<()> {
        let table = ws_table();
        let grp = table.create_group();
        assert_eq!(
            table
                .add_entry_ws(
                    &[MatchKeyParam::exact([10u8, 0, 0, 1])],
                    grp,
                    0,
                )
                .unwrap_err(),
            MatchError::EmptyGrp
        );
        assert_eq!(
            table.set_default_group(grp).unwrap_err(),
            MatchError::EmptyGrp
        );
        Ok(())
    }
}
