// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Control-plane match specifications.  A table entry's key is described
//! as a vector of [`MatchKeyParam`]s, one per declared key field, in the
//! table's schema order.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::bytes::ByteContainer;

/// The match discipline of a single key field.
///
/// The declaration order here is also the canonical key layout order: when
/// a table's key is assembled, fields are grouped by discipline, with
/// validity bits and exact fields first, so that the variable-match
/// regions (prefix, mask, range) land in one contiguous suffix of the key.
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
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MatchType {
    Valid,
    Exact,
    Lpm,
    Ternary,
    Range,
}

/// A longest-prefix match: key plus prefix length in bits.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub struct MatchLpm {
    pub key: ByteContainer,
    pub prefix_len: u32,
}

/// A ternary match: key plus a per-bit care mask of the same width.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub struct MatchTernary {
    pub key: ByteContainer,
    pub mask: ByteContainer,
}

/// An inclusive range match over an unsigned big-endian field.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub struct MatchRange {
    pub start: ByteContainer,
    pub end: ByteContainer,
}

/// One field of a match specification.  The vector a caller hands to the
/// engine is positional: parameter i describes key field i of the table's
/// schema, and the discipline of each parameter must agree with the
/// field's declared match type.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum MatchKeyParam {
    Exact(ByteContainer),
    Lpm(MatchLpm),
    Ternary(MatchTernary),
    Range(MatchRange),
    Valid(bool),
}

impl MatchKeyParam {
    pub fn exact(key: impl Into<ByteContainer>) -> Self {
        MatchKeyParam::Exact(key.into())
    }

    pub fn lpm(key: impl Into<ByteContainer>, prefix_len: u32) -> Self {
        MatchKeyParam::Lpm(MatchLpm { key: key.into(), prefix_len })
    }

    pub fn ternary(
        key: impl Into<ByteContainer>,
        mask: impl Into<ByteContainer>,
    ) -> Self {
        MatchKeyParam::Ternary(MatchTernary {
            key: key.into(),
            mask: mask.into(),
        })
    }

    pub fn range(
        start: impl Into<ByteContainer>,
        end: impl Into<ByteContainer>,
    ) -> Self {
        MatchKeyParam::Range(MatchRange {
            start: start.into(),
            end: end.into(),
        })
    }

    pub fn valid(valid: bool) -> Self {
        MatchKeyParam::Valid(valid)
    }

    pub fn match_type(&self) -> MatchType {
        match self {
            MatchKeyParam::Exact(_) => MatchType::Exact,
            MatchKeyParam::Lpm(_) => MatchType::Lpm,
            MatchKeyParam::Ternary(_) => MatchType::Ternary,
            MatchKeyParam::Range(_) => MatchType::Range,
            MatchKeyParam::Valid(_) => MatchType::Valid,
        }
    }
}

impl fmt::Display for MatchLpm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.key, self.prefix_len)
    }
}

impl fmt::Display for MatchTernary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}&{}", self.key, self.mask)
    }
}

impl fmt::Display for MatchRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl fmt::Display for MatchKeyParam {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MatchKeyParam::Exact(key) => write!(f, "{key}"),
            MatchKeyParam::Lpm(lpm) => write!(f, "{lpm}"),
            MatchKeyParam::Ternary(ternary) => write!(f, "{ternary}"),
            MatchKeyParam::Range(range) => write!(f, "{range}"),
            MatchKeyParam::Valid(true) => write!(f, "valid"),
            MatchKeyParam::Valid(false) => write!(f, "!valid"),
        }
    }
}
