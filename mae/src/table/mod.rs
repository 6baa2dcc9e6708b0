// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Match tables: the table-level API over a match unit.
//!
//! A direct [`MatchTable`] stores actions inline in its entries; the
//! indirect variants store indices into an action profile (see
//! [`indirect`]).  All variants share the same orchestration on the
//! packet path: under the table's read lock, look the packet up, on a
//! hit run the direct meter (if attached) and then the matched action,
//! and hand back the next control-flow node.  The packet path has no
//! error path; a miss with nothing configured executes the documented
//! no-op and takes the miss next-node.
//!
//! Control-plane calls take the write lock and validate before mutating;
//! a rejected call leaves the table untouched.

use std::collections::HashMap;
use std::time::Instant;

use mal::ActionData;
use mal::CounterData;
use mal::EntryHandle;
use mal::MatchError;
use mal::MatchKeyParam;
use mal::MatchResult;
use parking_lot::RwLock;
use slog::debug;

use crate::action::ActionDesc;
use crate::action::ActionEntry;
use crate::key::MatchKeyBuilder;
use crate::lookup::LookupStructureFactory;
use crate::meter::DirectMeter;
use crate::meter::MeterRates;
use crate::unit::MatchUnit;

pub mod indirect;
pub use indirect::MatchTableIndirect;
pub use indirect::MatchTableIndirectWs;

/// Identifies a control-flow node (a table or conditional) in the loaded
/// pipeline graph.  `None` out of `apply_action` means end of pipeline.
pub type NodeId = u32;

/// Construction-time shape of a table, shared by all variants.
#[derive(Clone, Debug)]
pub struct TableSpec {
    pub name: String,
    pub size: u32,
    pub with_counters: bool,
    pub with_ageing: bool,
}

/// A control-plane view of one table entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryView {
    pub handle: EntryHandle,
    pub params: Vec<MatchKeyParam>,
    /// Action name; `None` for the no-op.
    pub action: Option<String>,
    pub data: ActionData,
    pub priority: u32,
}

struct TableMeter {
    bank: DirectMeter,
    /// PHV (header, field) the meter color is written to before the
    /// matched action runs.
    target: (usize, usize),
    epoch: Instant,
}

impl TableMeter {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// State common to every table variant: identity, feature flags, the
/// action set, next-node resolution, and the optional direct meter.
/// None of this changes on the packet path, and the meter bank is
/// internally synchronized, so the core lives outside the entry lock.
pub(crate) struct TableCore {
    pub(crate) log: slog::Logger,
    name: String,
    with_counters: bool,
    with_ageing: bool,
    actions: HashMap<String, std::sync::Arc<ActionDesc>>,
    next_nodes: HashMap<String, NodeId>,
    next_node_hit: Option<NodeId>,
    next_node_miss: Option<NodeId>,
    meter: Option<TableMeter>,
}

impl TableCore {
    pub(crate) fn new(log: &slog::Logger, spec: &TableSpec) -> Self {
        TableCore {
            log: log.new(slog::o!("table" => spec.name.clone())),
            name: spec.name.clone(),
            with_counters: spec.with_counters,
            with_ageing: spec.with_ageing,
            actions: HashMap::new(),
            next_nodes: HashMap::new(),
            next_node_hit: None,
            next_node_miss: None,
            meter: None,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Register an action this table's entries may use and the node the
    /// pipeline continues at after it runs.
    pub(crate) fn add_action(
        &mut self,
        desc: std::sync::Arc<ActionDesc>,
        next_node: Option<NodeId>,
    ) {
        if let Some(node) = next_node {
            self.next_nodes.insert(desc.name.clone(), node);
        }
        self.actions.insert(desc.name.clone(), desc);
    }

    pub(crate) fn set_next_node_hit(&mut self, node: Option<NodeId>) {
        self.next_node_hit = node;
    }

    pub(crate) fn set_next_node_miss(&mut self, node: Option<NodeId>) {
        self.next_node_miss = node;
    }

    /// Attach a direct meter bank sized to the table, writing its color
    /// to the given PHV (header, field).
    pub(crate) fn attach_meter(&mut self, size: u32, target: (usize, usize)) {
        self.meter = Some(TableMeter {
            bank: DirectMeter::new(size),
            target,
            epoch: Instant::now(),
        });
    }

    fn get_action(
        &self,
        name: &str,
    ) -> MatchResult<std::sync::Arc<ActionDesc>> {
        self.actions.get(name).cloned().ok_or_else(|| {
            MatchError::Internal(format!(
                "table {} has no action {name}",
                self.name
            ))
        })
    }

    pub(crate) fn make_entry(
        &self,
        action: &str,
        data: ActionData,
    ) -> MatchResult<ActionEntry> {
        ActionEntry::new(self.get_action(action)?, data)
    }

    // Run the meter for the matched slot, if one is attached, and land
    // the color in the designated PHV field.
    pub(crate) fn meter_on_hit(&self, slot: u32, phv: &mut phv::Phv) {
        if let Some(meter) = &self.meter {
            let color = meter.bank.execute(
                slot,
                meter.now_ms(),
                u64::from(phv.packet_len()),
            );
            let (header, field) = meter.target;
            phv.field_mut(header, field).set_u64(color as u64);
        }
    }

    fn set_meter_rates(
        &self,
        slot: u32,
        rates: &MeterRates,
    ) -> MatchResult<()> {
        match &self.meter {
            Some(meter) => {
                meter.bank.set_rates(slot, rates, meter.now_ms());
                Ok(())
            }
            None => Err(MatchError::MetersDisabled),
        }
    }

    pub(crate) fn check_counters(&self) -> MatchResult<()> {
        if self.with_counters {
            Ok(())
        } else {
            Err(MatchError::CountersDisabled)
        }
    }

    pub(crate) fn check_ageing(&self) -> MatchResult<()> {
        if self.with_ageing {
            Ok(())
        } else {
            Err(MatchError::AgeingDisabled)
        }
    }

    // Next node after executing `action` on the hit or miss path.  An
    // explicit hit/miss override wins, else the per-action map decides,
    // else the pipeline ends.
    pub(crate) fn resolve_next(
        &self,
        hit: bool,
        action: Option<&str>,
    ) -> Option<NodeId> {
        let overridden = if hit {
            self.next_node_hit
        } else {
            self.next_node_miss
        };
        overridden.or_else(|| {
            action.and_then(|name| self.next_nodes.get(name).copied())
        })
    }
}

/// A direct match table: each entry carries its action inline.
pub struct MatchTable {
    core: TableCore,
    state: RwLock<DirectState>,
}

struct DirectState {
    unit: MatchUnit<ActionEntry>,
    default_entry: Option<ActionEntry>,
}

impl MatchTable {
    pub fn new(
        log: &slog::Logger,
        spec: TableSpec,
        builder: MatchKeyBuilder,
        factory: &dyn LookupStructureFactory,
    ) -> Self {
        let core = TableCore::new(log, &spec);
        let unit = MatchUnit::new(
            &core.log,
            &spec.name,
            spec.size,
            builder,
            factory,
        );
        MatchTable {
            core,
            state: RwLock::new(DirectState { unit, default_entry: None }),
        }
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn num_entries(&self) -> u32 {
        self.state.read().unit.num_entries()
    }

    pub fn add_action(
        &mut self,
        desc: std::sync::Arc<ActionDesc>,
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

    pub fn attach_meter(&mut self, size: u32, target: (usize, usize)) {
        self.core.attach_meter(size, target);
    }

    /// The packet path: lookup, meter on hit, action, next node.
    pub fn apply_action(&self, phv: &mut phv::Phv) -> Option<NodeId> {
        let state = self.state.read();
        match state.unit.lookup(phv) {
            Some((handle, entry)) => {
                self.core.meter_on_hit(handle.slot(), phv);
                entry.execute(phv);
                self.core.resolve_next(true, entry.name())
            }
            None => {
                let name = match &state.default_entry {
                    Some(entry) => {
                        entry.execute(phv);
                        entry.name()
                    }
                    None => {
                        ActionEntry::empty().execute(phv);
                        None
                    }
                };
                self.core.resolve_next(false, name)
            }
        }
    }

    pub fn add_entry(
        &self,
        params: &[MatchKeyParam],
        action: &str,
        data: ActionData,
        priority: u32,
    ) -> MatchResult<EntryHandle> {
        let entry = self.core.make_entry(action, data)?;
        let mut state = self.state.write();
        let handle = state.unit.add_entry(params, entry, priority)?;
        debug!(self.core.log, "added entry";
            "handle" => %handle, "action" => action);
        Ok(handle)
    }

    pub fn delete_entry(&self, handle: EntryHandle) -> MatchResult<()> {
        let mut state = self.state.write();
        state.unit.delete_entry(handle)?;
        if let Some(meter) = &self.core.meter {
            meter.bank.reset(handle.slot());
        }
        debug!(self.core.log, "deleted entry"; "handle" => %handle);
        Ok(())
    }

    pub fn modify_entry(
        &self,
        handle: EntryHandle,
        action: &str,
        data: ActionData,
    ) -> MatchResult<()> {
        let entry = self.core.make_entry(action, data)?;
        let mut state = self.state.write();
        state.unit.modify_entry(handle, entry)?;
        debug!(self.core.log, "modified entry";
            "handle" => %handle, "action" => action);
        Ok(())
    }

    pub fn set_default_action(
        &self,
        action: &str,
        data: ActionData,
    ) -> MatchResult<()> {
        let entry = self.core.make_entry(action, data)?;
        self.state.write().default_entry = Some(entry);
        debug!(self.core.log, "set default action"; "action" => action);
        Ok(())
    }

    pub fn get_entry(&self, handle: EntryHandle) -> MatchResult<EntryView> {
        let state = self.state.read();
        let (params, entry, priority) = state.unit.get_entry(handle)?;
        Ok(EntryView {
            handle,
            params,
            action: entry.name().map(str::to_string),
            data: entry.data().clone(),
            priority,
        })
    }

    pub fn get_entries(&self) -> Vec<EntryView> {
        let state = self.state.read();
        state
            .unit
            .get_entries()
            .into_iter()
            .map(|(handle, params, entry, priority)| EntryView {
                handle,
                params,
                action: entry.name().map(str::to_string),
                data: entry.data().clone(),
                priority,
            })
            .collect()
    }

    pub fn get_counters(
        &self,
        handle: EntryHandle,
    ) -> MatchResult<CounterData> {
        self.core.check_counters()?;
        self.state.read().unit.get_counters(handle)
    }

    pub fn reset_counters(&self, handle: EntryHandle) -> MatchResult<()> {
        self.core.check_counters()?;
        self.state.write().unit.reset_counters(handle)
    }

    pub fn set_entry_ttl(
        &self,
        handle: EntryHandle,
        ttl_ms: u64,
    ) -> MatchResult<()> {
        self.core.check_ageing()?;
        self.state.write().unit.set_entry_ttl(handle, ttl_ms)
    }

    /// Entries idle past their TTL, for the ageing timer to delete.
    pub fn sweep_entries(&self) -> MatchResult<Vec<EntryHandle>> {
        self.core.check_ageing()?;
        Ok(self.state.read().unit.sweep_entries())
    }

    pub fn set_meter_rates(
        &self,
        handle: EntryHandle,
        rates: &MeterRates,
    ) -> MatchResult<()> {
        // write lock: a concurrent delete must not retire the slot
        // between handle validation and the bank update, or the rates
        // would land on the slot's next occupant
        let state = self.state.write();
        state.unit.get_entry(handle)?;
        self.core.set_meter_rates(handle.slot(), rates)
    }

    pub fn reset_state(&self) {
        let mut state = self.state.write();
        state.unit.reset_state();
        state.default_entry = None;
    }
}
