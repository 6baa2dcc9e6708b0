// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Raw byte storage for match keys, masks, and action arguments.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid hex string: {}", .0)]
pub struct HexError(pub String);

/// A byte string in network order.  Keys, masks, and action arguments are
/// all carried as `ByteContainer`s; bit 0 is the most significant bit of
/// the first byte.
#[derive(
    Clone,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct ByteContainer(Vec<u8>);

impl ByteContainer {
    pub fn new() -> Self {
        ByteContainer(Vec::new())
    }

    pub fn with_capacity(nbytes: usize) -> Self {
        ByteContainer(Vec::with_capacity(nbytes))
    }

    /// An all-zero container of the given width.
    pub fn zeroed(nbytes: usize) -> Self {
        ByteContainer(vec![0u8; nbytes])
    }

    /// An all-ones container of the given width.
    pub fn ones(nbytes: usize) -> Self {
        ByteContainer(vec![0xffu8; nbytes])
    }

    /// Parse a string of hex digits, two per byte, with an optional "0x"
    /// prefix.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        let digits = hex.strip_prefix("0x").unwrap_or(hex);
        if digits.len() % 2 != 0 {
            return Err(HexError(hex.to_string()));
        }
        let mut bytes = Vec::with_capacity(digits.len() / 2);
        for pair in 0..digits.len() / 2 {
            let byte = u8::from_str_radix(&digits[pair * 2..pair * 2 + 2], 16)
                .map_err(|_| HexError(hex.to_string()))?;
            bytes.push(byte);
        }
        Ok(ByteContainer(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn nbits(&self) -> usize {
        self.0.len() * 8
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    pub fn push(&mut self, byte: u8) {
        self.0.push(byte);
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// The idx'th bit, MSB-first: bit 0 is the high bit of byte 0.
    pub fn bit(&self, idx: usize) -> bool {
        let byte = self.0[idx / 8];
        byte & (0x80 >> (idx % 8)) != 0
    }

    /// In-place bitwise AND with a mask of the same width.
    pub fn and_with(&mut self, mask: &[u8]) {
        debug_assert_eq!(self.0.len(), mask.len());
        for (byte, m) in self.0.iter_mut().zip(mask.iter()) {
            *byte &= m;
        }
    }

    /// In-place bitwise OR with another container of the same width.
    pub fn or_with(&mut self, other: &[u8]) {
        debug_assert_eq!(self.0.len(), other.len());
        for (byte, o) in self.0.iter_mut().zip(other.iter()) {
            *byte |= o;
        }
    }
}

impl From<Vec<u8>> for ByteContainer {
    fn from(bytes: Vec<u8>) -> Self {
        ByteContainer(bytes)
    }
}

impl From<&[u8]> for ByteContainer {
    fn from(bytes: &[u8]) -> Self {
        ByteContainer(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for ByteContainer {
    fn from(bytes: [u8; N]) -> Self {
        ByteContainer(bytes.to_vec())
    }
}

impl AsRef<[u8]> for ByteContainer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ByteContainer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ByteContainer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}
