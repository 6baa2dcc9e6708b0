// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The match-action engine.
//!
//! This crate holds the runtime a software pipeline executes against: the
//! lookup structures for each match discipline, the key builder that maps
//! PHV fields into canonical lookup keys, the match unit that manages
//! versioned entry handles, and the three table flavors built on top of
//! it (direct, indirect through an action profile, and indirect with
//! group-based member selection).  Around the tables sit the action
//! profiles themselves, direct trTCM meters, the two-level multicast
//! replication engine, and the pipeline configuration loader.
//!
//! Control-plane mutations and the packet path share each table through
//! a reader/writer lock; hit counters and ageing timestamps are atomics
//! so lookups need only the read side.  All fallible surfaces return
//! [`mal::MatchResult`].

pub mod action;
pub mod config;
pub mod handles;
pub mod key;
pub mod lookup;
pub mod mcast;
pub mod meter;
pub mod profile;
pub mod table;
pub mod unit;

pub use action::ActionDesc;
pub use action::ActionEntry;
pub use action::ActionRegistry;
pub use config::Pipeline;
pub use config::PipelineConfig;
pub use key::MatchKeyBuilder;
pub use mcast::McSimplePre;
pub use profile::ActionProfile;
pub use table::indirect::MatchTableIndirect;
pub use table::indirect::MatchTableIndirectWs;
pub use table::MatchTable;
