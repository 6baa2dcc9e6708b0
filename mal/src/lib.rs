// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The match-action layer: types shared between the control plane and the
//! table engine.  The control plane describes entries as vectors of
//! [`MatchKeyParam`]s plus [`ActionData`]; the engine hands back opaque
//! handles and error codes defined here.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod action;
pub use action::*;

mod bytes;
pub use bytes::*;

mod handle;
pub use handle::*;

mod key;
pub use key::*;

/// A specialized Result type for match-table operations
pub type MatchResult<T> = Result<T, MatchError>;

/// Error codes surfaced by the table engine.  These are returned, never
/// panicked: a control-plane caller that receives one of these must assume
/// the call had no effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    /// The table already holds its configured maximum number of entries.
    #[error("table full")]
    TableFull,
    /// The handle does not name a live entry slot.
    #[error("invalid entry handle")]
    InvalidHandle,
    /// The handle named a live slot once, but the entry it referred to has
    /// since been deleted.
    #[error("expired entry handle")]
    ExpiredHandle,
    /// Per-entry counters were not enabled when the table was built.
    #[error("counters not enabled on this table")]
    CountersDisabled,
    /// No direct meter is attached to the table.
    #[error("meters not enabled on this table")]
    MetersDisabled,
    /// Entry ageing was not enabled when the table was built.
    #[error("ageing not enabled on this table")]
    AgeingDisabled,
    /// The member handle does not name a live member.
    #[error("invalid member handle")]
    InvalidMbrHandle,
    /// The member is still referenced by an entry or a group.
    #[error("member still in use")]
    MbrStillUsed,
    /// The member already belongs to the group.
    #[error("member already in group")]
    MbrAlreadyInGrp,
    /// The member does not belong to the group.
    #[error("member not in group")]
    MbrNotInGrp,
    /// The group handle does not name a live group.
    #[error("invalid group handle")]
    InvalidGrpHandle,
    /// The group is still referenced by an entry.
    #[error("group still in use")]
    GrpStillUsed,
    /// The group has no members.
    #[error("empty group")]
    EmptyGrp,
    /// A structurally identical key is already present in the table.
    #[error("duplicate entry")]
    DuplicateEntry,
    /// The supplied match parameters do not fit the table's key schema.
    #[error("bad match key: {}", .0)]
    BadMatchKey(String),
    /// The multicast group id does not name a live replication group.
    #[error("invalid multicast group id")]
    InvalidMgid,
    /// The L1 (replication node) handle does not name a live node.
    #[error("invalid L1 node handle")]
    InvalidL1Handle,
    /// The L2 (port map) handle does not name a live node.
    #[error("invalid L2 node handle")]
    InvalidL2Handle,
    /// The engine detected some internal inconsistency.
    #[error("internal error: {}", .0)]
    Internal(String),
}

/// Packet and byte counts accumulated by one table entry.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct CounterData {
    pub pkts: u64,
    pub bytes: u64,
}
