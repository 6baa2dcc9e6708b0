// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Action profiles: ref-counted pools of actions ("members") and
//! weighted member sets ("groups") referenced indirectly by one or more
//! match tables.
//!
//! A member's ref count is the number of match entries pointing directly
//! at it plus the number of groups it belongs to; a group's ref count is
//! the number of match entries pointing at it.  Deletion is refused
//! while a count is non-zero, so an indirect table can never resolve a
//! dangling index.

use std::collections::HashMap;

use mal::GroupHandle;
use mal::MatchError;
use mal::MatchResult;
use mal::MemberHandle;
use parking_lot::RwLock;
use slog::debug;
use slog::error;

use crate::action::ActionEntry;
use crate::handles::HandleMgr;

/// The value stored by an indirect match table: a tagged index into the
/// profile's member or group space.  The accessors are checked; asking a
/// member index for a group is a programming error, not a recoverable
/// condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndirectIndex {
    Member(MemberHandle),
    Group(GroupHandle),
}

impl IndirectIndex {
    pub fn mbr(&self) -> MemberHandle {
        match self {
            IndirectIndex::Member(mbr) => *mbr,
            IndirectIndex::Group(grp) => {
                panic!("group index {grp} used as a member index")
            }
        }
    }

    pub fn grp(&self) -> GroupHandle {
        match self {
            IndirectIndex::Group(grp) => *grp,
            IndirectIndex::Member(mbr) => {
                panic!("member index {mbr} used as a group index")
            }
        }
    }
}

impl std::fmt::Display for IndirectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IndirectIndex::Member(mbr) => write!(f, "{mbr}"),
            IndirectIndex::Group(grp) => write!(f, "{grp}"),
        }
    }
}

/// Pluggable member-selection strategy for groups.  The profile informs
/// the strategy of membership changes; `get_from_hash` picks a member
/// for a packet hash on the packet path.
#[cfg_attr(test, mockall::automock)]
pub trait GroupSelection: Send + Sync {
    fn add_member(&mut self, grp: GroupHandle, mbr: MemberHandle);
    fn remove_member(&mut self, grp: GroupHandle, mbr: MemberHandle);
    fn get_from_hash(&self, grp: GroupHandle, h: u64)
        -> Option<MemberHandle>;
    fn reset(&mut self);
}

/// The default selection strategy: a dense, insertion-ordered member
/// vector per group, selecting the `h % size`-th member.  Stateless
/// modulo distribution; membership changes reshuffle flows.
#[derive(Debug, Default)]
pub struct GroupMgr {
    groups: HashMap<GroupHandle, Vec<MemberHandle>>,
}

impl GroupSelection for GroupMgr {
    fn add_member(&mut self, grp: GroupHandle, mbr: MemberHandle) {
        self.groups.entry(grp).or_default().push(mbr);
    }

    fn remove_member(&mut self, grp: GroupHandle, mbr: MemberHandle) {
        if let Some(members) = self.groups.get_mut(&grp) {
            // preserve order so h % size stays deterministic for the
            // members that remain
            if let Some(pos) = members.iter().position(|m| *m == mbr) {
                members.remove(pos);
            }
        }
    }

    fn get_from_hash(
        &self,
        grp: GroupHandle,
        h: u64,
    ) -> Option<MemberHandle> {
        let members = self.groups.get(&grp)?;
        if members.is_empty() {
            return None;
        }
        Some(members[(h % members.len() as u64) as usize])
    }

    fn reset(&mut self) {
        self.groups.clear();
    }
}

struct ProfileState {
    mbr_handles: HandleMgr,
    grp_handles: HandleMgr,
    members: Vec<Option<ActionEntry>>,
    groups: Vec<Option<Vec<MemberHandle>>>,
    // per-index reference counts, one counter space per index kind
    mbr_refs: Vec<u32>,
    grp_refs: Vec<u32>,
    selector: Box<dyn GroupSelection>,
}

impl ProfileState {
    fn valid_mbr(&self, mbr: MemberHandle) -> MatchResult<usize> {
        let idx = mbr.id() as usize;
        if !self.mbr_handles.handle_is_set(mbr.id()) {
            return Err(MatchError::InvalidMbrHandle);
        }
        Ok(idx)
    }

    fn valid_grp(&self, grp: GroupHandle) -> MatchResult<usize> {
        let idx = grp.id() as usize;
        if !self.grp_handles.handle_is_set(grp.id()) {
            return Err(MatchError::InvalidGrpHandle);
        }
        Ok(idx)
    }

    fn group_members(&self, idx: usize) -> MatchResult<&Vec<MemberHandle>> {
        self.groups[idx].as_ref().ok_or_else(|| {
            MatchError::Internal(format!("live group {idx} has no data"))
        })
    }
}

/// A pool of members and groups, shared by every indirect table built
/// against it.  One reader/writer lock guards the whole pool: selection
/// and resolution on the packet path take it shared, every mutation
/// takes it exclusive.
pub struct ActionProfile {
    log: slog::Logger,
    name: String,
    state: RwLock<ProfileState>,
}

impl ActionProfile {
    pub fn new(log: &slog::Logger, name: &str) -> Self {
        Self::with_selector(log, name, Box::<GroupMgr>::default())
    }

    pub fn with_selector(
        log: &slog::Logger,
        name: &str,
        selector: Box<dyn GroupSelection>,
    ) -> Self {
        let log = log.new(slog::o!("profile" => name.to_string()));
        ActionProfile {
            name: name.to_string(),
            state: RwLock::new(ProfileState {
                mbr_handles: HandleMgr::new(&log, "members"),
                grp_handles: HandleMgr::new(&log, "groups"),
                members: Vec::new(),
                groups: Vec::new(),
                mbr_refs: Vec::new(),
                grp_refs: Vec::new(),
                selector,
            }),
            log,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_member(&self, action: ActionEntry) -> MemberHandle {
        let mut state = self.state.write();
        let slot = state.mbr_handles.get_handle();
        let idx = slot as usize;
        if idx >= state.members.len() {
            state.members.push(None);
            state.mbr_refs.push(0);
        }
        state.members[idx] = Some(action);
        state.mbr_refs[idx] = 0;
        let mbr = MemberHandle::new(slot);
        debug!(self.log, "added member"; "mbr" => %mbr);
        mbr
    }

    pub fn modify_member(
        &self,
        mbr: MemberHandle,
        action: ActionEntry,
    ) -> MatchResult<()> {
        let mut state = self.state.write();
        let idx = state.valid_mbr(mbr)?;
        state.members[idx] = Some(action);
        Ok(())
    }

    pub fn delete_member(&self, mbr: MemberHandle) -> MatchResult<()> {
        let mut state = self.state.write();
        let idx = state.valid_mbr(mbr)?;
        if state.mbr_refs[idx] > 0 {
            return Err(MatchError::MbrStillUsed);
        }
        state.members[idx] = None;
        state.mbr_handles.release_handle(mbr.id());
        debug!(self.log, "deleted member"; "mbr" => %mbr);
        Ok(())
    }

    pub fn get_member(&self, mbr: MemberHandle) -> MatchResult<ActionEntry> {
        let state = self.state.read();
        let idx = state.valid_mbr(mbr)?;
        state.members[idx].clone().ok_or_else(|| {
            MatchError::Internal(format!("live member {idx} has no data"))
        })
    }

    pub fn create_group(&self) -> GroupHandle {
        let mut state = self.state.write();
        let slot = state.grp_handles.get_handle();
        let idx = slot as usize;
        if idx >= state.groups.len() {
            state.groups.push(None);
            state.grp_refs.push(0);
        }
        state.groups[idx] = Some(Vec::new());
        state.grp_refs[idx] = 0;
        let grp = GroupHandle::new(slot);
        debug!(self.log, "created group"; "grp" => %grp);
        grp
    }

    /// Delete a group.  Its memberships are dissolved, dropping each
    /// member's ref count; the group itself must be unreferenced.
    pub fn delete_group(&self, grp: GroupHandle) -> MatchResult<()> {
        let mut state = self.state.write();
        let idx = state.valid_grp(grp)?;
        if state.grp_refs[idx] > 0 {
            return Err(MatchError::GrpStillUsed);
        }
        let members = state.groups[idx].take().unwrap_or_default();
        for mbr in members {
            state.mbr_refs[mbr.id() as usize] -= 1;
            state.selector.remove_member(grp, mbr);
        }
        state.grp_handles.release_handle(grp.id());
        debug!(self.log, "deleted group"; "grp" => %grp);
        Ok(())
    }

    pub fn add_member_to_group(
        &self,
        mbr: MemberHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        let mut state = self.state.write();
        let mbr_idx = state.valid_mbr(mbr)?;
        let grp_idx = state.valid_grp(grp)?;
        if state.group_members(grp_idx)?.contains(&mbr) {
            return Err(MatchError::MbrAlreadyInGrp);
        }
        if let Some(members) = state.groups[grp_idx].as_mut() {
            members.push(mbr);
        }
        state.mbr_refs[mbr_idx] += 1;
        state.selector.add_member(grp, mbr);
        debug!(self.log, "added member to group";
            "mbr" => %mbr, "grp" => %grp);
        Ok(())
    }

    pub fn remove_member_from_group(
        &self,
        mbr: MemberHandle,
        grp: GroupHandle,
    ) -> MatchResult<()> {
        let mut state = self.state.write();
        let mbr_idx = state.valid_mbr(mbr)?;
        let grp_idx = state.valid_grp(grp)?;
        let Some(pos) =
            state.group_members(grp_idx)?.iter().position(|m| *m == mbr)
        else {
            return Err(MatchError::MbrNotInGrp);
        };
        if let Some(members) = state.groups[grp_idx].as_mut() {
            members.remove(pos);
        }
        state.mbr_refs[mbr_idx] -= 1;
        state.selector.remove_member(grp, mbr);
        debug!(self.log, "removed member from group";
            "mbr" => %mbr, "grp" => %grp);
        Ok(())
    }

    pub fn get_group(
        &self,
        grp: GroupHandle,
    ) -> MatchResult<Vec<MemberHandle>> {
        let state = self.state.read();
        let idx = state.valid_grp(grp)?;
        state.group_members(idx).cloned()
    }

    pub fn group_is_empty(&self, grp: GroupHandle) -> MatchResult<bool> {
        Ok(self.get_group(grp)?.is_empty())
    }

    pub fn num_members(&self) -> u32 {
        self.state.read().mbr_handles.live()
    }

    pub fn num_groups(&self) -> u32 {
        self.state.read().grp_handles.live()
    }

    /// Take a reference on an index, on behalf of a match entry that is
    /// about to store it.  Fails if the index is dead, in which case
    /// nothing is counted.
    pub fn ref_index(&self, index: IndirectIndex) -> MatchResult<()> {
        let mut state = self.state.write();
        match index {
            IndirectIndex::Member(mbr) => {
                let idx = state.valid_mbr(mbr)?;
                state.mbr_refs[idx] += 1;
            }
            IndirectIndex::Group(grp) => {
                let idx = state.valid_grp(grp)?;
                state.grp_refs[idx] += 1;
            }
        }
        Ok(())
    }

    /// Drop a reference previously taken with `ref_index`.
    pub fn unref_index(&self, index: IndirectIndex) -> MatchResult<()> {
        let mut state = self.state.write();
        match index {
            IndirectIndex::Member(mbr) => {
                let idx = state.valid_mbr(mbr)?;
                state.mbr_refs[idx] = state.mbr_refs[idx].saturating_sub(1);
            }
            IndirectIndex::Group(grp) => {
                let idx = state.valid_grp(grp)?;
                state.grp_refs[idx] = state.grp_refs[idx].saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Resolve an index to the action it names, selecting a group member
    /// by packet hash.  This is the packet path: a dangling or empty
    /// target is an internal inconsistency, logged and resolved to the
    /// no-op action rather than unwinding.
    pub fn resolve(&self, index: IndirectIndex, h: u64) -> ActionEntry {
        let state = self.state.read();
        let mbr = match index {
            IndirectIndex::Member(mbr) => mbr,
            IndirectIndex::Group(grp) => {
                match state.selector.get_from_hash(grp, h) {
                    Some(mbr) => mbr,
                    None => {
                        error!(self.log, "group resolved to no member";
                            "grp" => %grp);
                        return ActionEntry::empty();
                    }
                }
            }
        };
        match state
            .valid_mbr(mbr)
            .ok()
            .and_then(|idx| state.members[idx].clone())
        {
            Some(action) => action,
            None => {
                error!(self.log, "indirect index resolved to dead member";
                    "mbr" => %mbr);
                ActionEntry::empty()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use mal::ActionData;

    use crate::action::ActionRegistry;

    use super::*;

    fn test_log() -> slog::Logger {
        common::logging::init(
            "test",
            &None,
            common::logging::LogFormat::Human,
        )
        .unwrap()
    }

    fn entry(registry: &ActionRegistry, port: u8) -> ActionEntry {
        let mut data = ActionData::new();
        data.push_arg([port]);
        ActionEntry::new(registry.get("fwd").unwrap(), data).unwrap()
    }

    fn registry() -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry
            .register("fwd", vec![1], Arc::new(|_, _| ()))
            .unwrap();
        registry
    }

    #[test]
    fn test_member_ref_count_protection() -> anyhow::Result<()> {
        let profile = ActionProfile::new(&test_log(), "ecmp");
        let registry = registry();
        let mbr = profile.add_member(entry(&registry, 1));

        profile.ref_index(IndirectIndex::Member(mbr))?;
        assert_eq!(
            profile.delete_member(mbr).unwrap_err(),
            MatchError::MbrStillUsed
        );
        profile.unref_index(IndirectIndex::Member(mbr))?;
        profile.delete_member(mbr)?;
        assert_eq!(
            profile.delete_member(mbr).unwrap_err(),
            MatchError::InvalidMbrHandle
        );
        Ok(())
    }

    #[test]
    fn test_group_membership_counts_as_reference() -> anyhow::Result<()> {
        let profile = ActionProfile::new(&test_log(), "ecmp");
        let registry = registry();
        let mbr = profile.add_member(entry(&registry, 1));
        let grp = profile.create_group();

        profile.add_member_to_group(mbr, grp)?;
        assert_eq!(
            profile.add_member_to_group(mbr, grp).unwrap_err(),
            MatchError::MbrAlreadyInGrp
        );
        assert_eq!(
            profile.delete_member(mbr).unwrap_err(),
            MatchError::MbrStillUsed
        );

        profile.remove_member_from_group(mbr, grp)?;
        assert_eq!(
            profile.remove_member_from_group(mbr, grp).unwrap_err(),
            MatchError::MbrNotInGrp
        );
        profile.delete_member(mbr)?;
        Ok(())
    }

    #[test]
    fn test_group_ref_count_protection() -> anyhow::Result<()> {
        let profile = ActionProfile::new(&test_log(), "ecmp");
        let grp = profile.create_group();

        profile.ref_index(IndirectIndex::Group(grp))?;
        assert_eq!(
            profile.delete_group(grp).unwrap_err(),
            MatchError::GrpStillUsed
        );
        profile.unref_index(IndirectIndex::Group(grp))?;
        profile.delete_group(grp)?;
        Ok(())
    }

    #[test]
    fn test_delete_group_releases_members() -> anyhow::Result<()> {
        let profile = ActionProfile::new(&test_log(), "ecmp");
        let registry = registry();
        let mbr = profile.add_member(entry(&registry, 1));
        let grp = profile.create_group();
        profile.add_member_to_group(mbr, grp)?;

        profile.delete_group(grp)?;
        // the dissolved membership no longer pins the member
        profile.delete_member(mbr)?;
        Ok(())
    }

    #[test]
    fn test_modulo_selection_is_deterministic() -> anyhow::Result<()> {
        let profile = ActionProfile::new(&test_log(), "ecmp");
        let registry = registry();
        let m0 = profile.add_member(entry(&registry, 10));
        let m1 = profile.add_member(entry(&registry, 20));
        let grp = profile.create_group();
        profile.add_member_to_group(m0, grp)?;
        profile.add_member_to_group(m1, grp)?;

        let pick = |h: u64| {
            profile.resolve(IndirectIndex::Group(grp), h).data().clone()
        };
        assert_eq!(pick(0), profile.get_member(m0)?.data().clone());
        assert_eq!(pick(1), profile.get_member(m1)?.data().clone());
        assert_eq!(pick(2), pick(0));
        Ok(())
    }

    #[test]
    fn test_empty_group_resolves_to_noop() {
        let profile = ActionProfile::new(&test_log(), "ecmp");
        let grp = profile.create_group();
        assert!(profile.resolve(IndirectIndex::Group(grp), 0).is_empty());
    }

    #[test]
    fn test_pluggable_selector() -> anyhow::Result<()> {
        let mut selector = MockGroupSelection::new();
        selector.expect_add_member().times(2).return_const(());
        // always pick whatever was registered second
        selector
            .expect_get_from_hash()
            .returning(|_, _| Some(MemberHandle::new(1)));

        let profile = ActionProfile::with_selector(
            &test_log(),
            "ecmp",
            Box::new(selector),
        );
        let registry = registry();
        let m0 = profile.add_member(entry(&registry, 10));
        let m1 = profile.add_member(entry(&registry, 20));
        let grp = profile.create_group();
        profile.add_member_to_group(m0, grp)?;
        profile.add_member_to_group(m1, grp)?;

        let got = profile.resolve(IndirectIndex::Group(grp), 1234);
        assert_eq!(got.data().clone(), profile.get_member(m1)?.data().clone());
        Ok(())
    }
}
