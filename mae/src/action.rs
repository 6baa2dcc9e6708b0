// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Actions executed against a packet's PHV when a table entry matches.
//!
//! Action handlers are plain Rust closures registered in an
//! [`ActionRegistry`] when the pipeline is constructed; the registry is
//! passed explicitly to whatever needs it rather than living in process
//! globals.

use std::fmt;
use std::sync::Arc;

use mal::ActionData;
use mal::MatchError;
use mal::MatchResult;
use phv::Phv;

/// The code run for one action, taking the packet's PHV and the entry's
/// runtime arguments.
pub type ActionFn = Arc<dyn Fn(&mut Phv, &ActionData) + Send + Sync>;

/// A registered action: its name, declared parameter widths (in bytes,
/// one per runtime argument), and handler.
#[derive(Clone)]
pub struct ActionDesc {
    pub name: String,
    pub param_widths: Vec<usize>,
    handler: ActionFn,
}

impl ActionDesc {
    pub fn new(
        name: impl ToString,
        param_widths: Vec<usize>,
        handler: ActionFn,
    ) -> Self {
        ActionDesc { name: name.to_string(), param_widths, handler }
    }
}

impl fmt::Debug for ActionDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ActionDesc")
            .field("name", &self.name)
            .field("param_widths", &self.param_widths)
            .finish()
    }
}

/// The set of actions a pipeline knows about, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ActionRegistry {
    actions: Vec<Arc<ActionDesc>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(
        &mut self,
        name: impl ToString,
        param_widths: Vec<usize>,
        handler: ActionFn,
    ) -> MatchResult<()> {
        let name = name.to_string();
        if self.get(&name).is_some() {
            return Err(MatchError::Internal(format!(
                "action {name} registered twice"
            )));
        }
        self.actions.push(Arc::new(ActionDesc::new(
            name,
            param_widths,
            handler,
        )));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActionDesc>> {
        self.actions.iter().find(|a| a.name == name).cloned()
    }
}

/// An action bound to its runtime arguments, as stored in a table entry
/// or an action-profile member.
#[derive(Clone, Debug, Default)]
pub struct ActionEntry {
    desc: Option<Arc<ActionDesc>>,
    data: ActionData,
}

impl ActionEntry {
    pub fn new(desc: Arc<ActionDesc>, data: ActionData) -> MatchResult<Self> {
        if data.len() != desc.param_widths.len() {
            return Err(MatchError::Internal(format!(
                "action {} takes {} arguments, got {}",
                desc.name,
                desc.param_widths.len(),
                data.len()
            )));
        }
        for (idx, width) in desc.param_widths.iter().enumerate() {
            let arg = data.arg(idx).map(|a| a.len()).unwrap_or(0);
            if arg != *width {
                return Err(MatchError::Internal(format!(
                    "action {} argument {idx} is {arg} bytes, \
                     expected {width}",
                    desc.name
                )));
            }
        }
        Ok(ActionEntry { desc: Some(desc), data })
    }

    /// The degenerate no-op entry, used when a table misses with no
    /// default configured.  Targets treat this as drop-equivalent.
    pub fn empty() -> Self {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_none()
    }

    /// The action name, if this entry is not the no-op.
    pub fn name(&self) -> Option<&str> {
        self.desc.as_deref().map(|d| d.name.as_str())
    }

    pub fn data(&self) -> &ActionData {
        &self.data
    }

    /// Run the handler against the packet.  The no-op entry leaves the
    /// PHV untouched.
    pub fn execute(&self, phv: &mut Phv) {
        if let Some(desc) = &self.desc {
            (desc.handler)(phv, &self.data);
        }
    }
}

impl fmt::Display for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.desc {
            Some(desc) => write!(f, "{}{}", desc.name, self.data),
            None => write!(f, "(no-op)"),
        }
    }
}
