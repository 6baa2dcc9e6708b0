// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Opaque handles returned by the engine.  Callers pass these back
//! unmodified; the internal structure is not part of the API contract.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// A versioned reference to a match-table entry slot.
///
/// Slot indices are dense and reused after deletion; the version is bumped
/// on every delete of the slot, so a handle held across a delete is
/// recognized as stale instead of silently addressing the slot's next
/// occupant.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct EntryHandle {
    version: u32,
    slot: u32,
}

impl EntryHandle {
    pub fn new(version: u32, slot: u32) -> Self {
        EntryHandle { version, slot }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }
}

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.version)
    }
}

/// Handle for an action-profile member.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct MemberHandle(u32);

impl MemberHandle {
    pub fn new(id: u32) -> Self {
        MemberHandle(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MemberHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "mbr-{}", self.0)
    }
}

/// Handle for an action-profile group.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct GroupHandle(u32);

impl GroupHandle {
    pub fn new(id: u32) -> Self {
        GroupHandle(id)
    }

    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "grp-{}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_entry_handle_identity() {
        let h1 = EntryHandle::new(0, 7);
        let h2 = EntryHandle::new(1, 7);
        assert_ne!(h1, h2);
        assert_eq!(h1.slot(), h2.slot());
        assert_eq!(h1, EntryHandle::new(0, 7));
    }

    #[test]
    fn test_display() {
        assert_eq!(EntryHandle::new(3, 12).to_string(), "12:3");
        assert_eq!(MemberHandle::new(4).to_string(), "mbr-4");
        assert_eq!(GroupHandle::new(9).to_string(), "grp-9");
    }
}
