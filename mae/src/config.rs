// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Pipeline configuration: the serde description of a pipeline and the
//! loader that turns it into live engine state.
//!
//! A [`PipelineConfig`] names header types, actions, tables, action
//! profiles, and whether a PRE is present.  [`Pipeline::build`] resolves
//! every name against the config's headers and the caller's
//! [`ActionRegistry`] (which supplies the action handlers; the config
//! only declares names and parameter widths) and constructs the PHV
//! factory, tables, profiles, and PRE.  No I/O happens here beyond
//! `serde_json` parsing of whatever string the caller hands
//! [`PipelineConfig::from_json`].

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use mal::ByteContainer;
use mal::MatchType;
use phv::PhvFactory;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::info;
use thiserror::Error;

use crate::action::ActionRegistry;
use crate::key::MatchKeyBuilder;
use crate::lookup::DefaultLookupFactory;
use crate::mcast::McSimplePre;
use crate::profile::ActionProfile;
use crate::table::indirect::MatchTableIndirect;
use crate::table::indirect::MatchTableIndirectWs;
use crate::table::MatchTable;
use crate::table::NodeId;
use crate::table::TableSpec;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse pipeline config: {}", .0)]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Phv(#[from] phv::PhvError),
    #[error("unknown header type: {}", .0)]
    UnknownHeader(String),
    #[error("unknown field {}.{}", .0, .1)]
    UnknownField(String, String),
    #[error("unknown action: {}", .0)]
    UnknownAction(String),
    #[error("action {} declares {} params but is registered with {}",
        .0, .1, .2)]
    ActionParams(String, usize, usize),
    #[error("table {}: key field {} needs a field name", .0, .1)]
    MissingFieldName(String, String),
    #[error("table {}: bad mask: {}", .0, .1)]
    BadMask(String, mal::HexError),
    #[error("table {}: {}", .0, .1)]
    BadKey(String, mal::MatchError),
    #[error("table {} is {} but names no action profile", .0, .1)]
    MissingProfile(String, TableKind),
    #[error("table {}: unknown action profile {}", .0, .1)]
    UnknownProfile(String, String),
    #[error("table {}: meters are only supported on direct tables", .0)]
    MeterOnIndirect(String),
    #[error("duplicate table name: {}", .0)]
    DuplicateTable(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// An action as the config declares it: name and per-argument byte
/// widths.  The handler comes from the [`ActionRegistry`] at build time.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ActionConfig {
    pub name: String,
    pub param_widths: Vec<usize>,
}

/// One component of a table's match key.  `field` is unused (and may be
/// omitted) when `match_type` is `valid`; `mask` is a hex byte string
/// covering the field's byte width.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct KeyFieldConfig {
    pub match_type: MatchType,
    pub header: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
    strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TableKind {
    #[default]
    Direct,
    Indirect,
    IndirectWs,
}

/// Where a direct meter writes its color.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct MeterConfig {
    pub target_header: String,
    pub target_field: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct TableConfig {
    pub name: String,
    pub size: u32,
    #[serde(default)]
    pub kind: TableKind,
    pub key: Vec<KeyFieldConfig>,
    /// Names of the actions this table may invoke.
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub with_counters: bool,
    #[serde(default)]
    pub with_ageing: bool,
    #[serde(default)]
    pub meter: Option<MeterConfig>,
    /// Required for indirect and indirect_ws tables.
    #[serde(default)]
    pub action_profile: Option<String>,
    /// Per-action next node, keyed by action name.
    #[serde(default)]
    pub next_nodes: HashMap<String, NodeId>,
    #[serde(default)]
    pub next_node_hit: Option<NodeId>,
    #[serde(default)]
    pub next_node_miss: Option<NodeId>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct ProfileConfig {
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct PreConfig {
    #[serde(default)]
    pub lag: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct PipelineConfig {
    pub name: String,
    pub headers: Vec<phv::HeaderType>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub action_profiles: Vec<ProfileConfig>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default)]
    pub pre: Option<PreConfig>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One loaded table, any kind.
pub enum Table {
    Direct(MatchTable),
    Indirect(MatchTableIndirect),
    IndirectWs(MatchTableIndirectWs),
}

impl Table {
    pub fn name(&self) -> &str {
        match self {
            Table::Direct(t) => t.name(),
            Table::Indirect(t) => t.name(),
            Table::IndirectWs(t) => t.name(),
        }
    }

    pub fn apply_action(&self, phv: &mut phv::Phv) -> Option<NodeId> {
        match self {
            Table::Direct(t) => t.apply_action(phv),
            Table::Indirect(t) => t.apply_action(phv),
            Table::IndirectWs(t) => t.apply_action(phv),
        }
    }
}

/// A loaded pipeline: the PHV factory plus every table, profile, and
/// (optionally) the PRE the config named.
pub struct Pipeline {
    phv_factory: PhvFactory,
    tables: BTreeMap<String, Table>,
    profiles: HashMap<String, Arc<ActionProfile>>,
    pre: Option<McSimplePre>,
}

impl Pipeline {
    /// Construct the pipeline a config describes.  `registry` supplies
    /// the handler for every action the config names; unknown header,
    /// field, action, or profile names fail the build.
    pub fn build(
        config: &PipelineConfig,
        registry: &ActionRegistry,
        log: &slog::Logger,
    ) -> ConfigResult<Self> {
        let log = log.new(slog::o!("pipeline" => config.name.clone()));

        let mut phv_factory = PhvFactory::new();
        for htype in &config.headers {
            phv_factory.push_header_type(htype.clone())?;
        }

        // the config's action declarations must agree with the registry
        for action in &config.actions {
            let desc = registry
                .get(&action.name)
                .ok_or_else(|| ConfigError::UnknownAction(action.name.clone()))?;
            if desc.param_widths != action.param_widths {
                return Err(ConfigError::ActionParams(
                    action.name.clone(),
                    action.param_widths.len(),
                    desc.param_widths.len(),
                ));
            }
        }

        let mut profiles = HashMap::new();
        for profile in &config.action_profiles {
            profiles.insert(
                profile.name.clone(),
                Arc::new(ActionProfile::new(&log, &profile.name)),
            );
        }

        let factory = DefaultLookupFactory;
        let mut tables = BTreeMap::new();
        for tcfg in &config.tables {
            if tables.contains_key(&tcfg.name) {
                return Err(ConfigError::DuplicateTable(tcfg.name.clone()));
            }
            let table = build_table(
                &log,
                tcfg,
                &phv_factory,
                registry,
                &profiles,
                &factory,
            )?;
            tables.insert(tcfg.name.clone(), table);
        }

        let pre = config.pre.as_ref().map(|pre| {
            if pre.lag {
                McSimplePre::new_with_lag(&log)
            } else {
                McSimplePre::new(&log)
            }
        });

        info!(log, "loaded pipeline";
            "tables" => tables.len(),
            "profiles" => profiles.len(),
            "pre" => pre.is_some());
        Ok(Pipeline { phv_factory, tables, profiles, pre })
    }

    pub fn phv_factory(&self) -> &PhvFactory {
        &self.phv_factory
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn profile(&self, name: &str) -> Option<&Arc<ActionProfile>> {
        self.profiles.get(name)
    }

    pub fn pre(&self) -> Option<&McSimplePre> {
        self.pre.as_ref()
    }
}

fn build_key(
    tcfg: &TableConfig,
    phv_factory: &PhvFactory,
) -> ConfigResult<MatchKeyBuilder> {
    let mut builder = MatchKeyBuilder::new();
    for kf in &tcfg.key {
        if kf.match_type == MatchType::Valid {
            let header = phv_factory
                .header_index(&kf.header)
                .ok_or_else(|| ConfigError::UnknownHeader(kf.header.clone()))?;
            builder.push_back_valid_header(header);
            continue;
        }
        let field = kf.field.as_ref().ok_or_else(|| {
            ConfigError::MissingFieldName(
                tcfg.name.clone(),
                kf.header.clone(),
            )
        })?;
        if phv_factory.header_index(&kf.header).is_none() {
            return Err(ConfigError::UnknownHeader(kf.header.clone()));
        }
        let fref = phv_factory.field_ref(&kf.header, field).ok_or_else(|| {
            ConfigError::UnknownField(kf.header.clone(), field.clone())
        })?;
        match &kf.mask {
            None => builder.push_back_field(fref, kf.match_type),
            Some(hex) => {
                let mask = ByteContainer::from_hex(hex).map_err(|e| {
                    ConfigError::BadMask(tcfg.name.clone(), e)
                })?;
                builder.push_back_field_masked(fref, kf.match_type, mask);
            }
        }
    }
    builder
        .build()
        .map_err(|e| ConfigError::BadKey(tcfg.name.clone(), e))?;
    Ok(builder)
}

fn table_actions(
    tcfg: &TableConfig,
    registry: &ActionRegistry,
) -> ConfigResult<Vec<(Arc<crate::action::ActionDesc>, Option<NodeId>)>> {
    tcfg.actions
        .iter()
        .map(|name| {
            let desc = registry
                .get(name)
                .ok_or_else(|| ConfigError::UnknownAction(name.clone()))?;
            Ok((desc, tcfg.next_nodes.get(name).copied()))
        })
        .collect()
}

fn table_profile(
    tcfg: &TableConfig,
    profiles: &HashMap<String, Arc<ActionProfile>>,
) -> ConfigResult<Arc<ActionProfile>> {
    let name = tcfg.action_profile.as_ref().ok_or_else(|| {
        ConfigError::MissingProfile(tcfg.name.clone(), tcfg.kind)
    })?;
    profiles.get(name).cloned().ok_or_else(|| {
        ConfigError::UnknownProfile(tcfg.name.clone(), name.clone())
    })
}

fn build_table(
    log: &slog::Logger,
    tcfg: &TableConfig,
    phv_factory: &PhvFactory,
    registry: &ActionRegistry,
    profiles: &HashMap<String, Arc<ActionProfile>>,
    factory: &DefaultLookupFactory,
) -> ConfigResult<Table> {
    let builder = build_key(tcfg, phv_factory)?;
    let actions = table_actions(tcfg, registry)?;
    let spec = TableSpec {
        name: tcfg.name.clone(),
        size: tcfg.size,
        with_counters: tcfg.with_counters,
        with_ageing: tcfg.with_ageing,
    };

    let meter_target = match &tcfg.meter {
        None => None,
        Some(meter) => {
            if tcfg.kind != TableKind::Direct {
                return Err(ConfigError::MeterOnIndirect(tcfg.name.clone()));
            }
            let fref = phv_factory
                .field_ref(&meter.target_header, &meter.target_field)
                .ok_or_else(|| {
                    ConfigError::UnknownField(
                        meter.target_header.clone(),
                        meter.target_field.clone(),
                    )
                })?;
            Some((fref.header, fref.field))
        }
    };

    Ok(match tcfg.kind {
        TableKind::Direct => {
            let mut table = MatchTable::new(log, spec, builder, factory);
            for (desc, next) in actions {
                table.add_action(desc, next);
            }
            table.set_next_node_hit(tcfg.next_node_hit);
            table.set_next_node_miss(tcfg.next_node_miss);
            if let Some(target) = meter_target {
                table.attach_meter(tcfg.size, target);
            }
            Table::Direct(table)
        }
        TableKind::Indirect => {
            let profile = table_profile(tcfg, profiles)?;
            let mut table =
                MatchTableIndirect::new(log, spec, builder, factory, profile);
            for (desc, next) in actions {
                table.add_action(desc, next);
            }
            table.set_next_node_hit(tcfg.next_node_hit);
            table.set_next_node_miss(tcfg.next_node_miss);
            Table::Indirect(table)
        }
        TableKind::IndirectWs => {
            let profile = table_profile(tcfg, profiles)?;
            let mut table = MatchTableIndirectWs::new(
                log, spec, builder, factory, profile,
            );
            for (desc, next) in actions {
                table.indirect_mut().add_action(desc, next);
            }
            table.indirect_mut().set_next_node_hit(tcfg.next_node_hit);
            table.indirect_mut().set_next_node_miss(tcfg.next_node_miss);
            Table::IndirectWs(table)
        }
    })
}
