// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Runtime arguments for a table action, supplied by the control plane
//! alongside the match key.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

use crate::bytes::ByteContainer;

/// Arguments for one action invocation, in the action's declared
/// parameter order.  Each argument is a network-order byte string sized to
/// its parameter's width.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct ActionData {
    args: Vec<ByteContainer>,
}

impl ActionData {
    pub fn new() -> Self {
        ActionData { args: Vec::new() }
    }

    pub fn push_arg(&mut self, arg: impl Into<ByteContainer>) {
        self.args.push(arg.into());
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn arg(&self, idx: usize) -> Option<&ByteContainer> {
        self.args.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ByteContainer> {
        self.args.iter()
    }

    /// The idx'th argument folded into a u64, big-endian.  `None` if the
    /// argument is missing or wider than 8 bytes.
    pub fn arg_as_u64(&self, idx: usize) -> Option<u64> {
        let arg = self.args.get(idx)?;
        if arg.len() > 8 {
            return None;
        }
        Some(
            arg.as_slice()
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        )
    }
}

impl From<Vec<ByteContainer>> for ActionData {
    fn from(args: Vec<ByteContainer>) -> Self {
        ActionData { args }
    }
}

impl fmt::Display for ActionData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(")?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}
