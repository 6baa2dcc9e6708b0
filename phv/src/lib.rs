// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! The parsed header vector: the in-memory form of a packet's headers
//! that the match-action engine reads keys from and actions write to.
//!
//! Header layouts are described at pipeline-load time by [`HeaderType`]s;
//! a [`PhvFactory`] stamps out one zeroed, all-invalid [`Phv`] per packet.
//! Field storage is network order, right-aligned within whole bytes, with
//! the unused high bits of the leading byte held at zero.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub type PhvResult<T> = Result<T, PhvError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhvError {
    #[error("duplicate header type name: {}", .0)]
    DuplicateHeader(String),
    #[error("duplicate field name in header {}: {}", .0, .1)]
    DuplicateField(String, String),
    #[error("zero-width field in header {}: {}", .0, .1)]
    ZeroWidthField(String, String),
}

/// One field of a header layout.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct FieldDesc {
    pub name: String,
    pub nbits: u32,
}

/// A header layout: named fields with bit widths, in wire order.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct HeaderType {
    pub name: String,
    pub fields: Vec<FieldDesc>,
}

/// Resolved location of one field inside a [`Phv`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldRef {
    pub header: usize,
    pub field: usize,
    pub nbits: u32,
}

/// One field instance.  The byte width is fixed at construction; writes
/// are masked so the unused high bits of the leading byte stay zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    bytes: Vec<u8>,
    nbits: u32,
}

impl Field {
    pub fn new(nbits: u32) -> Self {
        let nbytes = ((nbits + 7) / 8) as usize;
        Field { bytes: vec![0u8; nbytes], nbits }
    }

    pub fn nbits(&self) -> u32 {
        self.nbits
    }

    pub fn nbytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn mask_top_byte(&mut self) {
        let extra = (8 - self.nbits % 8) % 8;
        if extra > 0 && !self.bytes.is_empty() {
            self.bytes[0] &= 0xffu8 >> extra;
        }
    }

    /// Overwrite the field from a network-order byte string.  A short
    /// source zero-extends on the left; a long source keeps its trailing
    /// bytes, matching unsigned truncation.
    pub fn set_bytes(&mut self, src: &[u8]) {
        let width = self.bytes.len();
        self.bytes.fill(0);
        if src.len() >= width {
            self.bytes.copy_from_slice(&src[src.len() - width..]);
        } else {
            self.bytes[width - src.len()..].copy_from_slice(src);
        }
        self.mask_top_byte();
    }

    /// Overwrite the field from an unsigned value, truncated to the field
    /// width.
    pub fn set_u64(&mut self, val: u64) {
        let be = val.to_be_bytes();
        self.set_bytes(&be);
    }

    /// The field folded into a u64.  Fields wider than 64 bits yield
    /// their low 64 bits.
    pub fn as_u64(&self) -> u64 {
        self.bytes
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }
}

/// One header instance: its fields plus a validity bit.  Headers come out
/// of the factory invalid; the parser marks them valid as it fills them
/// in.
#[derive(Clone, Debug)]
pub struct Header {
    fields: Vec<Field>,
    valid: bool,
}

impl Header {
    pub fn new(htype: &HeaderType) -> Self {
        Header {
            fields: htype.fields.iter().map(|f| Field::new(f.nbits)).collect(),
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn mark_valid(&mut self) {
        self.valid = true;
    }

    pub fn mark_invalid(&mut self) {
        self.valid = false;
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, idx: usize) -> &Field {
        &self.fields[idx]
    }

    pub fn field_mut(&mut self, idx: usize) -> &mut Field {
        &mut self.fields[idx]
    }
}

/// A packet's parsed header vector.
#[derive(Clone, Debug)]
pub struct Phv {
    headers: Vec<Header>,
    packet_len: u32,
}

impl Phv {
    pub fn num_headers(&self) -> usize {
        self.headers.len()
    }

    pub fn header(&self, idx: usize) -> &Header {
        &self.headers[idx]
    }

    pub fn header_mut(&mut self, idx: usize) -> &mut Header {
        &mut self.headers[idx]
    }

    pub fn field(&self, header: usize, field: usize) -> &Field {
        self.headers[header].field(field)
    }

    pub fn field_mut(&mut self, header: usize, field: usize) -> &mut Field {
        self.headers[header].field_mut(field)
    }

    /// Total packet length in bytes, as reported by the receive path.
    /// Used for byte counters and meters.
    pub fn packet_len(&self) -> u32 {
        self.packet_len
    }

    pub fn set_packet_len(&mut self, len: u32) {
        self.packet_len = len;
    }
}

/// Builds [`Phv`]s for a loaded pipeline.  Header order here defines the
/// header indices used everywhere else.
#[derive(Clone, Debug, Default)]
pub struct PhvFactory {
    types: Vec<HeaderType>,
}

impl PhvFactory {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push_header_type(&mut self, htype: HeaderType) -> PhvResult<()> {
        if self.types.iter().any(|t| t.name == htype.name) {
            return Err(PhvError::DuplicateHeader(htype.name));
        }
        let mut seen = Vec::with_capacity(htype.fields.len());
        for field in &htype.fields {
            if field.nbits == 0 {
                return Err(PhvError::ZeroWidthField(
                    htype.name.clone(),
                    field.name.clone(),
                ));
            }
            if seen.contains(&&field.name) {
                return Err(PhvError::DuplicateField(
                    htype.name.clone(),
                    field.name.clone(),
                ));
            }
            seen.push(&field.name);
        }
        self.types.push(htype);
        Ok(())
    }

    pub fn num_headers(&self) -> usize {
        self.types.len()
    }

    pub fn header_type(&self, idx: usize) -> &HeaderType {
        &self.types[idx]
    }

    pub fn header_index(&self, name: &str) -> Option<usize> {
        self.types.iter().position(|t| t.name == name)
    }

    /// Resolve a header.field name pair to indices and width.
    pub fn field_ref(&self, header: &str, field: &str) -> Option<FieldRef> {
        let hdr = self.header_index(header)?;
        let fld = self.types[hdr].fields.iter().position(|f| f.name == field)?;
        Some(FieldRef {
            header: hdr,
            field: fld,
            nbits: self.types[hdr].fields[fld].nbits,
        })
    }

    /// A fresh PHV: every header invalid, every field zero.
    pub fn new_phv(&self) -> Phv {
        Phv {
            headers: self.types.iter().map(Header::new).collect(),
            packet_len: 0,
        }
    }
}
