// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Assembly of canonical match keys.
//!
//! A [`MatchKeyBuilder`] is configured at pipeline-load time with the
//! table's key schema: one entry per key field, in the order the control
//! plane will supply [`MatchKeyParam`]s.  When finalized, the builder
//! reorders the fields into the canonical key layout -- grouped by match
//! type, validity bits and exact fields first, so the variable-match
//! regions form one contiguous suffix -- and from then on performs two
//! jobs:
//!
//! * the packet path: extract the canonical key bytes from a PHV
//!   ([`MatchKeyBuilder::key_from_phv`]);
//! * the control path: convert between parameter vectors in schema order
//!   and whole-key [`StoredKey`]s in canonical layout, with sanity
//!   checking up front so a malformed key is rejected before any table
//!   state changes.
//!
//! Fields occupy whole bytes in the canonical key; a field narrower than
//! its byte span is right-aligned with the unused high bits held at zero,
//! matching PHV field storage.

use mal::ByteContainer;
use mal::MatchError;
use mal::MatchKeyParam;
use mal::MatchResult;
use mal::MatchType;
use phv::FieldRef;
use phv::Phv;

use crate::lookup::LookupKind;
use crate::lookup::StoredKey;

#[derive(Clone, Debug)]
enum FieldTarget {
    /// A PHV field, identified by header and field index.
    Field { header: usize, field: usize },
    /// A header validity bit, encoded as one byte (0x01/0x00).
    ValidBit { header: usize },
}

#[derive(Clone, Debug)]
struct KeyField {
    target: FieldTarget,
    match_type: MatchType,
    /// Explicit per-field byte mask, folded into the builder's aggregate
    /// mask at build time.
    mask: Option<ByteContainer>,
    nbits: u32,
    nbytes: usize,
    /// Byte offset in the canonical key; assigned by `build()`.
    offset: usize,
}

impl KeyField {
    // Leading bits of the byte span that pad the field to whole bytes.
    fn pad_bits(&self) -> u32 {
        self.nbytes as u32 * 8 - self.nbits
    }
}

#[derive(Clone, Debug, Default)]
pub struct MatchKeyBuilder {
    /// Key fields; in push (schema) order until `build()`, in canonical
    /// layout order afterwards.
    fields: Vec<KeyField>,
    /// Schema position -> index into `fields` after reordering.
    schema_to_layout: Vec<usize>,
    key_nbytes: usize,
    /// Aggregate of the per-field masks, canonical-key wide.  `None`
    /// unless at least one field declared a mask.
    big_mask: Option<ByteContainer>,
    kind: LookupKind,
    built: bool,
}

impl MatchKeyBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn push_back_field(&mut self, fref: FieldRef, match_type: MatchType) {
        self.push_field(fref, match_type, None);
    }

    pub fn push_back_field_masked(
        &mut self,
        fref: FieldRef,
        match_type: MatchType,
        mask: ByteContainer,
    ) {
        self.push_field(fref, match_type, Some(mask));
    }

    fn push_field(
        &mut self,
        fref: FieldRef,
        match_type: MatchType,
        mask: Option<ByteContainer>,
    ) {
        debug_assert!(!self.built);
        let nbytes = ((fref.nbits + 7) / 8) as usize;
        self.fields.push(KeyField {
            target: FieldTarget::Field {
                header: fref.header,
                field: fref.field,
            },
            match_type,
            mask,
            nbits: fref.nbits,
            nbytes,
            offset: 0,
        });
    }

    pub fn push_back_valid_header(&mut self, header: usize) {
        debug_assert!(!self.built);
        self.fields.push(KeyField {
            target: FieldTarget::ValidBit { header },
            match_type: MatchType::Valid,
            mask: None,
            nbits: 8,
            nbytes: 1,
            offset: 0,
        });
    }

    /// Finalize the schema: reorder fields into canonical layout, assign
    /// offsets, build the aggregate mask, and derive the unit discipline.
    pub fn build(&mut self) -> MatchResult<()> {
        // stable sort by (match type, schema index); MatchType's derived
        // order is the layout order
        let mut order: Vec<usize> = (0..self.fields.len()).collect();
        order.sort_by_key(|&idx| (self.fields[idx].match_type, idx));

        let mut fields = Vec::with_capacity(self.fields.len());
        self.schema_to_layout = vec![0; self.fields.len()];
        let mut offset = 0;
        for (layout_idx, &schema_idx) in order.iter().enumerate() {
            let mut field = self.fields[schema_idx].clone();
            if let Some(mask) = &field.mask {
                if mask.len() != field.nbytes {
                    return Err(MatchError::BadMatchKey(format!(
                        "field mask is {} bytes, field is {}",
                        mask.len(),
                        field.nbytes
                    )));
                }
            }
            field.offset = offset;
            offset += field.nbytes;
            self.schema_to_layout[schema_idx] = layout_idx;
            fields.push(field);
        }
        self.key_nbytes = offset;
        self.fields = fields;

        self.kind = self.derive_kind();
        self.big_mask = self.derive_big_mask();
        self.built = true;
        Ok(())
    }

    fn derive_kind(&self) -> LookupKind {
        let count = |mt| {
            self.fields.iter().filter(|f| f.match_type == mt).count()
        };
        let masked = self.fields.iter().any(|f| f.mask.is_some());
        if count(MatchType::Range) > 0 {
            LookupKind::Range
        } else if count(MatchType::Ternary) > 0
            || count(MatchType::Lpm) > 1
            || masked
        {
            LookupKind::Ternary
        } else if count(MatchType::Lpm) == 1 {
            LookupKind::Lpm
        } else {
            LookupKind::Exact
        }
    }

    fn derive_big_mask(&self) -> Option<ByteContainer> {
        if self.fields.iter().all(|f| f.mask.is_none()) {
            return None;
        }
        let mut bytes = vec![0xffu8; self.key_nbytes];
        for field in &self.fields {
            if let Some(mask) = &field.mask {
                bytes[field.offset..field.offset + field.nbytes]
                    .copy_from_slice(mask.as_slice());
            }
        }
        Some(bytes.into())
    }

    pub fn kind(&self) -> LookupKind {
        self.kind
    }

    pub fn key_nbytes(&self) -> usize {
        self.key_nbytes
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Extract the canonical key for a packet.  A field whose header is
    /// invalid contributes all-zero bytes, never the header's stale
    /// contents; validity bits contribute 0x01/0x00.
    pub fn key_from_phv(&self, phv: &Phv, key: &mut ByteContainer) {
        key.clear();
        for field in &self.fields {
            match field.target {
                FieldTarget::ValidBit { header } => {
                    key.push(u8::from(phv.header(header).is_valid()));
                }
                FieldTarget::Field { header, field: fld } => {
                    if phv.header(header).is_valid() {
                        key.extend_from_slice(
                            phv.field(header, fld).bytes(),
                        );
                    } else {
                        key.extend_from_slice(&vec![0u8; field.nbytes]);
                    }
                }
            }
        }
        if let Some(mask) = &self.big_mask {
            key.and_with(mask.as_slice());
        }
    }

    /// Validate a control-plane parameter vector against the schema
    /// before anything is mutated: parameter count, per-field discipline
    /// and byte width, prefix and mask shape.
    pub fn sanity_check_params(
        &self,
        params: &[MatchKeyParam],
    ) -> MatchResult<()> {
        if params.len() != self.fields.len() {
            return Err(MatchError::BadMatchKey(format!(
                "expected {} match parameters, got {}",
                self.fields.len(),
                params.len()
            )));
        }
        for (schema_idx, param) in params.iter().enumerate() {
            let field = &self.fields[self.schema_to_layout[schema_idx]];
            if param.match_type() != field.match_type {
                return Err(MatchError::BadMatchKey(format!(
                    "field {schema_idx} is {}, parameter is {}",
                    field.match_type,
                    param.match_type()
                )));
            }
            let bad_width = |what: &str, got: usize| {
                Err(MatchError::BadMatchKey(format!(
                    "field {schema_idx} {what} is {got} bytes, \
                     expected {}",
                    field.nbytes
                )))
            };
            match param {
                MatchKeyParam::Exact(key) => {
                    if key.len() != field.nbytes {
                        return bad_width("key", key.len());
                    }
                }
                MatchKeyParam::Lpm(lpm) => {
                    if lpm.key.len() != field.nbytes {
                        return bad_width("key", lpm.key.len());
                    }
                    if lpm.prefix_len > field.nbits {
                        return Err(MatchError::BadMatchKey(format!(
                            "field {schema_idx} prefix length {} exceeds \
                             field width {}",
                            lpm.prefix_len, field.nbits
                        )));
                    }
                }
                MatchKeyParam::Ternary(ternary) => {
                    if ternary.key.len() != field.nbytes {
                        return bad_width("key", ternary.key.len());
                    }
                    if ternary.mask.len() != field.nbytes {
                        return bad_width("mask", ternary.mask.len());
                    }
                }
                MatchKeyParam::Range(range) => {
                    if range.start.len() != field.nbytes {
                        return bad_width("range start", range.start.len());
                    }
                    if range.end.len() != field.nbytes {
                        return bad_width("range end", range.end.len());
                    }
                    if range.start.as_slice() > range.end.as_slice() {
                        return Err(MatchError::BadMatchKey(format!(
                            "field {schema_idx} range start {} exceeds \
                             end {}",
                            range.start, range.end
                        )));
                    }
                }
                MatchKeyParam::Valid(_) => (),
            }
        }
        Ok(())
    }

    /// Convert a sanity-checked parameter vector into the unit's stored
    /// key form.  `priority` is only meaningful for ternary/range units.
    pub fn match_params_to_entry(
        &self,
        params: &[MatchKeyParam],
        priority: u32,
    ) -> MatchResult<StoredKey> {
        self.sanity_check_params(params)?;

        let mut data = vec![0u8; self.key_nbytes];
        for (schema_idx, param) in params.iter().enumerate() {
            let field = &self.fields[self.schema_to_layout[schema_idx]];
            let span = &mut data[field.offset..field.offset + field.nbytes];
            match param {
                MatchKeyParam::Exact(key) => {
                    span.copy_from_slice(key.as_slice())
                }
                MatchKeyParam::Lpm(lpm) => {
                    span.copy_from_slice(lpm.key.as_slice())
                }
                MatchKeyParam::Ternary(t) => {
                    span.copy_from_slice(t.key.as_slice())
                }
                MatchKeyParam::Range(r) => {
                    span.copy_from_slice(r.start.as_slice())
                }
                MatchKeyParam::Valid(valid) => span[0] = u8::from(*valid),
            }
        }
        // Normalize like the packet path does: bits a declared field
        // mask doesn't care about are held at zero, so entries that
        // differ only in masked-out bits store identical data and the
        // duplicate check catches them.
        if let Some(mask) = &self.big_mask {
            for (byte, m) in data.iter_mut().zip(mask.as_slice()) {
                *byte &= m;
            }
        }

        match self.kind {
            LookupKind::Exact => {
                Ok(StoredKey::Exact { data: data.into() })
            }
            LookupKind::Lpm => {
                let prefix_len = params
                    .iter()
                    .enumerate()
                    .find_map(|(schema_idx, param)| {
                        let MatchKeyParam::Lpm(lpm) = param else {
                            return None;
                        };
                        let field = &self.fields
                            [self.schema_to_layout[schema_idx]];
                        Some(
                            field.offset as u32 * 8
                                + field.pad_bits()
                                + lpm.prefix_len,
                        )
                    })
                    .ok_or_else(|| {
                        MatchError::Internal(
                            "lpm unit without an lpm parameter".to_string(),
                        )
                    })?;
                Ok(StoredKey::Lpm { data: data.into(), prefix_len })
            }
            LookupKind::Ternary => {
                let mask = self.entry_mask(params);
                Ok(StoredKey::Ternary {
                    data: data.into(),
                    mask,
                    priority,
                })
            }
            LookupKind::Range => {
                let mut mask = self.entry_mask(params).into_vec();
                let mut range_spans = Vec::new();
                for (schema_idx, param) in params.iter().enumerate() {
                    let MatchKeyParam::Range(range) = param else {
                        continue;
                    };
                    let field =
                        &self.fields[self.schema_to_layout[schema_idx]];
                    mask[field.offset..field.offset + field.nbytes]
                        .copy_from_slice(range.end.as_slice());
                    range_spans.push((field.offset, field.nbytes));
                }
                range_spans.sort_unstable();
                Ok(StoredKey::Range {
                    data: data.into(),
                    mask: mask.into(),
                    priority,
                    range_spans,
                })
            }
        }
    }

    // The per-entry care mask for a ternary/range unit: exact and valid
    // fields match all bits, LPM fields derive a leading-ones mask from
    // the prefix length, ternary fields use the caller's mask, masked
    // fields use their declared mask.
    fn entry_mask(&self, params: &[MatchKeyParam]) -> ByteContainer {
        let mut mask = vec![0xffu8; self.key_nbytes];
        for (schema_idx, param) in params.iter().enumerate() {
            let field = &self.fields[self.schema_to_layout[schema_idx]];
            let span = &mut mask[field.offset..field.offset + field.nbytes];
            match param {
                MatchKeyParam::Lpm(lpm) => {
                    prefix_to_mask(
                        span,
                        field.pad_bits() + lpm.prefix_len,
                    );
                }
                MatchKeyParam::Ternary(t) => {
                    span.copy_from_slice(t.mask.as_slice())
                }
                _ => {
                    if let Some(field_mask) = &field.mask {
                        span.copy_from_slice(field_mask.as_slice());
                    }
                }
            }
        }
        mask.into()
    }

    /// Convert a stored key back into a parameter vector in schema
    /// order.  Inverse of [`MatchKeyBuilder::match_params_to_entry`] for
    /// well-formed parameters.
    pub fn entry_to_match_params(
        &self,
        key: &StoredKey,
    ) -> Vec<MatchKeyParam> {
        (0..self.fields.len())
            .map(|schema_idx| {
                let field = &self.fields[self.schema_to_layout[schema_idx]];
                self.field_to_param(field, key)
            })
            .collect()
    }

    fn field_to_param(
        &self,
        field: &KeyField,
        key: &StoredKey,
    ) -> MatchKeyParam {
        let span = |bytes: &ByteContainer| {
            bytes.as_slice()[field.offset..field.offset + field.nbytes]
                .to_vec()
        };
        if let FieldTarget::ValidBit { .. } = field.target {
            return MatchKeyParam::valid(span(key.data())[0] != 0);
        }
        match key {
            StoredKey::Exact { data } => MatchKeyParam::exact(span(data)),
            StoredKey::Lpm { data, prefix_len } => {
                match field.match_type {
                    MatchType::Lpm => {
                        let start = field.offset as u32 * 8
                            + field.pad_bits();
                        MatchKeyParam::lpm(
                            span(data),
                            prefix_len.saturating_sub(start),
                        )
                    }
                    _ => MatchKeyParam::exact(span(data)),
                }
            }
            StoredKey::Ternary { data, mask, .. }
            | StoredKey::Range { data, mask, .. } => {
                match field.match_type {
                    MatchType::Exact | MatchType::Valid => {
                        MatchKeyParam::exact(span(data))
                    }
                    MatchType::Lpm => {
                        let ones = leading_ones(&span(mask));
                        MatchKeyParam::lpm(
                            span(data),
                            ones.saturating_sub(field.pad_bits()),
                        )
                    }
                    MatchType::Ternary => {
                        MatchKeyParam::ternary(span(data), span(mask))
                    }
                    MatchType::Range => {
                        MatchKeyParam::range(span(data), span(mask))
                    }
                }
            }
        }
    }
}

// A mask of `nbits` leading ones over the span.
fn prefix_to_mask(span: &mut [u8], nbits: u32) {
    let mut remaining = nbits;
    for byte in span.iter_mut() {
        *byte = match remaining {
            0 => 0,
            1..=7 => {
                let m = !(0xffu8 >> remaining);
                remaining = 0;
                m
            }
            _ => {
                remaining -= 8;
                0xff
            }
        };
    }
}

fn leading_ones(span: &[u8]) -> u32 {
    let mut ones = 0;
    for byte in span {
        ones += byte.leading_ones();
        if *byte != 0xff {
            break;
        }
    }
    ones
}

#[cfg(test)]
mod test {
    use phv::FieldDesc;
    use phv::HeaderType;
    use phv::PhvFactory;
    use pretty_assertions::assert_eq;

    use super::*;

    fn factory() -> PhvFactory {
        let mut factory = PhvFactory::new();
        factory
            .push_header_type(HeaderType {
                name: "ipv4".to_string(),
                fields: vec![
                    FieldDesc { name: "proto".to_string(), nbits: 8 },
                    FieldDesc { name: "src".to_string(), nbits: 32 },
                    FieldDesc { name: "dst".to_string(), nbits: 32 },
                ],
            })
            .unwrap();
        factory
            .push_header_type(HeaderType {
                name: "tcp".to_string(),
                fields: vec![FieldDesc {
                    name: "dport".to_string(),
                    nbits: 16,
                }],
            })
            .unwrap();
        factory
    }

    fn fref(factory: &PhvFactory, header: &str, field: &str) -> FieldRef {
        factory.field_ref(header, field).unwrap()
    }

    #[test]
    fn test_reorder_groups_by_match_type() -> anyhow::Result<()> {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        // schema order: lpm, exact -- layout must put the exact field
        // first so it contributes fixed prefix bits
        builder.push_back_field(
            fref(&factory, "ipv4", "dst"),
            MatchType::Lpm,
        );
        builder.push_back_field(
            fref(&factory, "ipv4", "proto"),
            MatchType::Exact,
        );
        builder.build().unwrap();
        assert_eq!(builder.kind(), LookupKind::Lpm);
        assert_eq!(builder.key_nbytes(), 5);

        let params = vec![
            MatchKeyParam::lpm([10u8, 1, 0, 0], 16),
            MatchKeyParam::exact([6u8]),
        ];
        let key = builder.match_params_to_entry(&params, 0)?;
        // proto byte first, then the dst prefix: 8 + 16 canonical bits
        assert_eq!(
            key,
            StoredKey::Lpm {
                data: [6u8, 10, 1, 0, 0].into(),
                prefix_len: 24,
            }
        );
        assert_eq!(builder.entry_to_match_params(&key), params);
        Ok(())
    }

    #[test]
    fn test_invalid_header_reads_as_zero() {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field(
            fref(&factory, "ipv4", "src"),
            MatchType::Exact,
        );
        builder.push_back_field(
            fref(&factory, "tcp", "dport"),
            MatchType::Exact,
        );
        builder.push_back_valid_header(1);
        builder.build().unwrap();

        let mut phv = factory.new_phv();
        phv.header_mut(0).mark_valid();
        phv.field_mut(0, 1).set_bytes(&[10, 0, 0, 1]);
        // tcp is parsed, then invalidated with stale field content left
        // behind
        phv.header_mut(1).mark_valid();
        phv.field_mut(1, 0).set_bytes(&[0xde, 0xad]);
        phv.header_mut(1).mark_invalid();

        let mut key = ByteContainer::new();
        builder.key_from_phv(&phv, &mut key);
        // valid bit sorts first, then the exact fields in schema order
        assert_eq!(key.as_slice(), &[0, 10, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_valid_bit_in_key() {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_valid_header(1);
        builder.push_back_field(
            fref(&factory, "tcp", "dport"),
            MatchType::Exact,
        );
        builder.build().unwrap();

        let mut phv = factory.new_phv();
        phv.header_mut(1).mark_valid();
        phv.field_mut(1, 0).set_bytes(&[0x00, 0x50]);

        let mut key = ByteContainer::new();
        builder.key_from_phv(&phv, &mut key);
        assert_eq!(key.as_slice(), &[1, 0x00, 0x50]);
    }

    #[test]
    fn test_ternary_entry_mask() -> anyhow::Result<()> {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field(
            fref(&factory, "ipv4", "proto"),
            MatchType::Exact,
        );
        builder.push_back_field(
            fref(&factory, "ipv4", "src"),
            MatchType::Ternary,
        );
        builder.build().unwrap();
        assert_eq!(builder.kind(), LookupKind::Ternary);

        let params = vec![
            MatchKeyParam::exact([17u8]),
            MatchKeyParam::ternary([10u8, 1, 0, 0], [0xffu8, 0xff, 0, 0]),
        ];
        let key = builder.match_params_to_entry(&params, 7)?;
        assert_eq!(
            key,
            StoredKey::Ternary {
                data: [17u8, 10, 1, 0, 0].into(),
                mask: [0xffu8, 0xff, 0xff, 0, 0].into(),
                priority: 7,
            }
        );
        assert_eq!(builder.entry_to_match_params(&key), params);
        Ok(())
    }

    #[test]
    fn test_masked_field_builds_big_mask() -> anyhow::Result<()> {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field_masked(
            fref(&factory, "ipv4", "src"),
            MatchType::Exact,
            [0xffu8, 0xff, 0xff, 0x00].into(),
        );
        builder.build().unwrap();
        // a masked field forces the ternary discipline
        assert_eq!(builder.kind(), LookupKind::Ternary);

        let mut phv = factory.new_phv();
        phv.header_mut(0).mark_valid();
        phv.field_mut(0, 1).set_bytes(&[10, 0, 0, 99]);
        let mut key = ByteContainer::new();
        builder.key_from_phv(&phv, &mut key);
        assert_eq!(key.as_slice(), &[10, 0, 0, 0]);

        let key = builder.match_params_to_entry(
            &[MatchKeyParam::exact([10u8, 0, 0, 0])],
            0,
        )?;
        let StoredKey::Ternary { mask, .. } = &key else {
            anyhow::bail!("expected a ternary stored key");
        };
        assert_eq!(mask.as_slice(), &[0xff, 0xff, 0xff, 0x00]);

        // stored entry data is normalized the same way the packet path
        // is: masked-out bits read as zero
        let other = builder.match_params_to_entry(
            &[MatchKeyParam::exact([10u8, 0, 0, 99])],
            0,
        )?;
        assert_eq!(other.data().as_slice(), &[10, 0, 0, 0]);
        assert_eq!(other, key);
        Ok(())
    }

    #[test]
    fn test_sanity_check_rejects_malformed() {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field(
            fref(&factory, "ipv4", "dst"),
            MatchType::Lpm,
        );
        builder.build().unwrap();

        // wrong arity
        assert!(matches!(
            builder.sanity_check_params(&[]),
            Err(MatchError::BadMatchKey(_))
        ));
        // wrong discipline
        assert!(matches!(
            builder
                .sanity_check_params(&[MatchKeyParam::exact([0u8; 4])]),
            Err(MatchError::BadMatchKey(_))
        ));
        // wrong width
        assert!(matches!(
            builder
                .sanity_check_params(&[MatchKeyParam::lpm([0u8; 3], 8)]),
            Err(MatchError::BadMatchKey(_))
        ));
        // prefix wider than the field
        assert!(matches!(
            builder
                .sanity_check_params(&[MatchKeyParam::lpm([0u8; 4], 33)]),
            Err(MatchError::BadMatchKey(_))
        ));
        assert!(builder
            .sanity_check_params(&[MatchKeyParam::lpm([0u8; 4], 32)])
            .is_ok());
    }

    #[test]
    fn test_range_entry_spans() -> anyhow::Result<()> {
        let factory = factory();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field(
            fref(&factory, "ipv4", "proto"),
            MatchType::Exact,
        );
        builder.push_back_field(
            fref(&factory, "tcp", "dport"),
            MatchType::Range,
        );
        builder.build().unwrap();
        assert_eq!(builder.kind(), LookupKind::Range);

        let params = vec![
            MatchKeyParam::exact([6u8]),
            MatchKeyParam::range([0x00u8, 0x50], [0x00u8, 0x60]),
        ];
        let key = builder.match_params_to_entry(&params, 1)?;
        assert_eq!(
            key,
            StoredKey::Range {
                data: [6u8, 0x00, 0x50].into(),
                mask: [0xffu8, 0x00, 0x60].into(),
                priority: 1,
                range_spans: vec![(1, 2)],
            }
        );
        assert_eq!(builder.entry_to_match_params(&key), params);

        // inverted bounds are rejected up front
        let bad = vec![
            MatchKeyParam::exact([6u8]),
            MatchKeyParam::range([0x00u8, 0x60], [0x00u8, 0x50]),
        ];
        assert!(matches!(
            builder.match_params_to_entry(&bad, 1),
            Err(MatchError::BadMatchKey(_))
        ));
        Ok(())
    }

    #[test]
    fn test_narrow_field_prefix_accounts_for_padding() -> anyhow::Result<()>
    {
        let mut factory = PhvFactory::new();
        factory
            .push_header_type(HeaderType {
                name: "vlan".to_string(),
                fields: vec![FieldDesc {
                    name: "vid".to_string(),
                    nbits: 12,
                }],
            })
            .unwrap();
        let mut builder = MatchKeyBuilder::new();
        builder.push_back_field(
            fref(&factory, "vlan", "vid"),
            MatchType::Lpm,
        );
        builder.build().unwrap();

        // a 12-bit field spans 2 canonical bytes with 4 leading pad
        // bits; an 8-bit value prefix covers 4 + 8 canonical bits
        let params = vec![MatchKeyParam::lpm([0x0au8, 0xbc], 8)];
        let key = builder.match_params_to_entry(&params, 0)?;
        assert_eq!(
            key,
            StoredKey::Lpm { data: [0x0au8, 0xbc].into(), prefix_len: 12 }
        );
        assert_eq!(builder.entry_to_match_params(&key), params);
        Ok(())
    }
}
