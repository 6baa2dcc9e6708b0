// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The packet replication engine (PRE): a two-level multicast tree.
//!
//! A multicast group id (mgid) names an ordered list of L1 nodes, each
//! carrying a replication id (rid) and exactly one L2 node holding a
//! 256-bit egress port bitmap and, in the LAG-aware flavor, a 256-bit
//! LAG bitmap.  [`McSimplePre::replicate`] walks the tree under the read
//! lock and emits one copy per (L1 node, set port bit); each set LAG bit
//! expands to one member port of that LAG, chosen by `lag_hash % member
//! count` over the LAG's membership -- plain modulo, so membership
//! changes reshuffle flows.
//!
//! One type serves both flavors of the source design:
//! [`McSimplePre::new`] builds the port-map-only engine and
//! [`McSimplePre::new_with_lag`] the LAG-aware one.  Control-plane calls
//! validate before mutating; `replicate` has no error path and resolves
//! a dead mgid to zero copies.

use std::collections::HashMap;

use mal::MatchError;
use mal::MatchResult;
use parking_lot::RwLock;
use slog::debug;
use slog::error;

use crate::handles::HandleMgr;

pub type Mgid = u16;
pub type Rid = u16;
pub type LagId = u16;

/// Width of the egress port and LAG bitmaps.
pub const PORT_MAP_WIDTH: u16 = 256;

/// A 256-bit port (or LAG) bitmap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortMap {
    words: [u64; 4],
}

impl PortMap {
    pub fn new() -> Self {
        Default::default()
    }

    /// Bits at or above [`PORT_MAP_WIDTH`] do not exist: setting one is
    /// a no-op and reading one is `false`, so a control-plane-supplied
    /// port number can never panic the map.
    pub fn set(&mut self, port: u16, on: bool) {
        if port >= PORT_MAP_WIDTH {
            return;
        }
        let word = usize::from(port / 64);
        let bit = 1u64 << (port % 64);
        if on {
            self.words[word] |= bit;
        } else {
            self.words[word] &= !bit;
        }
    }

    pub fn get(&self, port: u16) -> bool {
        if port >= PORT_MAP_WIDTH {
            return false;
        }
        self.words[usize::from(port / 64)] & (1u64 << (port % 64)) != 0
    }

    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Set bits in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = u16> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, word)| {
            let mut word = *word;
            let base = idx as u16 * 64;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros() as u16;
                word &= word - 1;
                Some(base + bit)
            })
        })
    }

    /// The n'th set bit, counting from zero in ascending order.
    pub fn nth_set(&self, n: u32) -> Option<u16> {
        self.iter_set().nth(n as usize)
    }
}

impl FromIterator<u16> for PortMap {
    fn from_iter<I: IntoIterator<Item = u16>>(ports: I) -> Self {
        let mut map = PortMap::new();
        for port in ports {
            map.set(port, true);
        }
        map
    }
}

/// Opaque handle for an L1 replication node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct L1Handle(u32);

impl std::fmt::Display for L1Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "l1-{}", self.0)
    }
}

/// What the ingress pipeline hands the PRE for one packet.
#[derive(Clone, Copy, Debug)]
pub struct McIn {
    pub mgid: Mgid,
    /// Hash used to pick a member port within each LAG; ignored by the
    /// non-LAG flavor.
    pub lag_hash: u64,
}

/// One replicated copy: the rid of the L1 node that produced it and the
/// egress port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct McOut {
    pub rid: Rid,
    pub egress_port: u16,
}

struct L1Entry {
    rid: Rid,
    mgid: Option<Mgid>,
    l2: u32,
}

struct L2Entry {
    port_map: PortMap,
    lag_map: PortMap,
}

struct PreState {
    mgid_entries: HashMap<Mgid, Vec<u32>>,
    l1_entries: HashMap<u32, L1Entry>,
    l2_entries: HashMap<u32, L2Entry>,
    l1_handles: HandleMgr,
    l2_handles: HandleMgr,
    lag_membership: HashMap<LagId, PortMap>,
}

impl PreState {
    fn l1(&self, node: L1Handle) -> MatchResult<&L1Entry> {
        self.l1_entries.get(&node.0).ok_or(MatchError::InvalidL1Handle)
    }

    fn l2_mut(&mut self, handle: u32) -> MatchResult<&mut L2Entry> {
        self.l2_entries.get_mut(&handle).ok_or(MatchError::InvalidL2Handle)
    }
}

pub struct McSimplePre {
    log: slog::Logger,
    lag_enabled: bool,
    state: RwLock<PreState>,
}

impl McSimplePre {
    /// The port-map-only replication engine.
    pub fn new(log: &slog::Logger) -> Self {
        Self::build(log, false)
    }

    /// The LAG-aware replication engine: L2 nodes additionally carry a
    /// LAG bitmap expanded through [`McSimplePre::set_lag_membership`].
    pub fn new_with_lag(log: &slog::Logger) -> Self {
        Self::build(log, true)
    }

    fn build(log: &slog::Logger, lag_enabled: bool) -> Self {
        let log = log.new(slog::o!("unit" => "pre"));
        McSimplePre {
            lag_enabled,
            state: RwLock::new(PreState {
                mgid_entries: HashMap::new(),
                l1_entries: HashMap::new(),
                l2_entries: HashMap::new(),
                l1_handles: HandleMgr::new(&log, "l1"),
                l2_handles: HandleMgr::new(&log, "l2"),
                lag_membership: HashMap::new(),
            }),
            log,
        }
    }

    pub fn mc_mgrp_create(&self, mgid: Mgid) -> MatchResult<()> {
        let mut state = self.state.write();
        if state.mgid_entries.contains_key(&mgid) {
            return Err(MatchError::Internal(format!(
                "multicast group {mgid} already exists"
            )));
        }
        state.mgid_entries.insert(mgid, Vec::new());
        debug!(self.log, "created multicast group"; "mgid" => mgid);
        Ok(())
    }

    /// Destroy a group.  Any still-associated L1 nodes are dissociated;
    /// the nodes themselves survive.
    pub fn mc_mgrp_destroy(&self, mgid: Mgid) -> MatchResult<()> {
        let mut state = self.state.write();
        let nodes = state
            .mgid_entries
            .remove(&mgid)
            .ok_or(MatchError::InvalidMgid)?;
        for node in nodes {
            if let Some(l1) = state.l1_entries.get_mut(&node) {
                l1.mgid = None;
            }
        }
        debug!(self.log, "destroyed multicast group"; "mgid" => mgid);
        Ok(())
    }

    /// Create an L1 node (and its L2 node) carrying `rid` and the given
    /// port map.  The node starts unassociated.
    pub fn mc_node_create(
        &self,
        rid: Rid,
        port_map: PortMap,
    ) -> MatchResult<L1Handle> {
        self.mc_node_create_lag(rid, port_map, PortMap::new())
    }

    pub fn mc_node_create_lag(
        &self,
        rid: Rid,
        port_map: PortMap,
        lag_map: PortMap,
    ) -> MatchResult<L1Handle> {
        if !lag_map.is_empty() && !self.lag_enabled {
            return Err(MatchError::Internal(
                "lag map given to a non-lag PRE".to_string(),
            ));
        }
        let mut state = self.state.write();
        let l2 = state.l2_handles.get_handle();
        state.l2_entries.insert(l2, L2Entry { port_map, lag_map });
        let l1 = state.l1_handles.get_handle();
        state.l1_entries.insert(l1, L1Entry { rid, mgid: None, l2 });
        let handle = L1Handle(l1);
        debug!(self.log, "created node"; "l1" => %handle, "rid" => rid);
        Ok(handle)
    }

    /// Replace a node's port (and LAG) maps.
    pub fn mc_node_update(
        &self,
        node: L1Handle,
        port_map: PortMap,
        lag_map: PortMap,
    ) -> MatchResult<()> {
        if !lag_map.is_empty() && !self.lag_enabled {
            return Err(MatchError::Internal(
                "lag map given to a non-lag PRE".to_string(),
            ));
        }
        let mut state = self.state.write();
        let l2 = state.l1(node)?.l2;
        let entry = state.l2_mut(l2)?;
        entry.port_map = port_map;
        entry.lag_map = lag_map;
        Ok(())
    }

    /// Associate a node with a group.  A node belongs to at most one
    /// group at a time.
    pub fn mc_node_associate(
        &self,
        mgid: Mgid,
        node: L1Handle,
    ) -> MatchResult<()> {
        let mut state = self.state.write();
        if !state.mgid_entries.contains_key(&mgid) {
            return Err(MatchError::InvalidMgid);
        }
        let l1 = state
            .l1_entries
            .get_mut(&node.0)
            .ok_or(MatchError::InvalidL1Handle)?;
        if let Some(existing) = l1.mgid {
            return Err(MatchError::Internal(format!(
                "node {node} already associated with group {existing}"
            )));
        }
        l1.mgid = Some(mgid);
        if let Some(nodes) = state.mgid_entries.get_mut(&mgid) {
            nodes.push(node.0);
        }
        debug!(self.log, "associated node";
            "l1" => %node, "mgid" => mgid);
        Ok(())
    }

    pub fn mc_node_dissociate(
        &self,
        mgid: Mgid,
        node: L1Handle,
    ) -> MatchResult<()> {
        let mut state = self.state.write();
        if !state.mgid_entries.contains_key(&mgid) {
            return Err(MatchError::InvalidMgid);
        }
        let l1 = state
            .l1_entries
            .get_mut(&node.0)
            .ok_or(MatchError::InvalidL1Handle)?;
        if l1.mgid != Some(mgid) {
            return Err(MatchError::Internal(format!(
                "node {node} not associated with group {mgid}"
            )));
        }
        l1.mgid = None;
        if let Some(nodes) = state.mgid_entries.get_mut(&mgid) {
            nodes.retain(|n| *n != node.0);
        }
        debug!(self.log, "dissociated node";
            "l1" => %node, "mgid" => mgid);
        Ok(())
    }

    /// Destroy a node, dissociating it from its group first if needed.
    pub fn mc_node_destroy(&self, node: L1Handle) -> MatchResult<()> {
        let mut state = self.state.write();
        let l1 = state
            .l1_entries
            .remove(&node.0)
            .ok_or(MatchError::InvalidL1Handle)?;
        if let Some(mgid) = l1.mgid {
            if let Some(nodes) = state.mgid_entries.get_mut(&mgid) {
                nodes.retain(|n| *n != node.0);
            }
        }
        state.l2_entries.remove(&l1.l2);
        state.l2_handles.release_handle(l1.l2);
        state.l1_handles.release_handle(node.0);
        debug!(self.log, "destroyed node"; "l1" => %node);
        Ok(())
    }

    /// Set (or replace) the membership of a LAG.
    pub fn set_lag_membership(
        &self,
        lag: LagId,
        port_map: PortMap,
    ) -> MatchResult<()> {
        if !self.lag_enabled {
            return Err(MatchError::Internal(
                "lag membership on a non-lag PRE".to_string(),
            ));
        }
        let mut state = self.state.write();
        state.lag_membership.insert(lag, port_map);
        debug!(self.log, "set lag membership";
            "lag" => lag, "ports" => port_map.count());
        Ok(())
    }

    /// Produce the copies for one packet.  No error path: an unknown
    /// mgid replicates to nothing (logged, since it means the ingress
    /// pipeline and the PRE disagree), and an empty LAG is skipped.
    pub fn replicate(&self, ingress: McIn) -> Vec<McOut> {
        let state = self.state.read();
        let Some(nodes) = state.mgid_entries.get(&ingress.mgid) else {
            error!(self.log, "replicate on unknown group";
                "mgid" => ingress.mgid);
            return Vec::new();
        };
        let mut out = Vec::new();
        for node in nodes {
            let Some(l1) = state.l1_entries.get(node) else {
                continue;
            };
            let Some(l2) = state.l2_entries.get(&l1.l2) else {
                continue;
            };
            for port in l2.port_map.iter_set() {
                out.push(McOut { rid: l1.rid, egress_port: port });
            }
            if !self.lag_enabled {
                continue;
            }
            for lag in l2.lag_map.iter_set() {
                let Some(members) = state.lag_membership.get(&lag) else {
                    continue;
                };
                let count = members.count();
                if count == 0 {
                    continue;
                }
                let pick = (ingress.lag_hash % u64::from(count)) as u32;
                if let Some(port) = members.nth_set(pick) {
                    out.push(McOut { rid: l1.rid, egress_port: port });
                }
            }
        }
        out
    }
}
