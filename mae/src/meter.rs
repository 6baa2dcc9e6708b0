// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2026 Oxide Computer Company

//! Direct meters: a two-rate three-color token-bucket bank with one
//! meter per table entry slot.
//!
//! A table with an attached meter bank executes the matched entry's
//! meter between lookup and action, writing the resulting color into a
//! designated PHV field.  Meter state is guarded per slot, so concurrent
//! packets hitting different entries never contend.

use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// The color assigned to a packet: in committed profile, in peak
/// profile, or out of profile.  The numeric values land in the PHV.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display,
)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum MeterColor {
    Green = 0,
    Yellow = 1,
    Red = 2,
}

/// Configured rates for one meter: committed and peak, each a rate in
/// units (bytes or packets) per millisecond plus a burst size in units.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema,
)]
pub struct MeterRates {
    pub cir_per_ms: u64,
    pub committed_burst: u64,
    pub pir_per_ms: u64,
    pub peak_burst: u64,
}

#[derive(Clone, Copy, Debug)]
struct TokenBucket {
    tokens: u64,
    per_ms: u64,
    burst: u64,
    last_refill_ms: u64,
}

impl TokenBucket {
    fn new(per_ms: u64, burst: u64, now_ms: u64) -> Self {
        // start full
        TokenBucket { tokens: burst, per_ms, burst, last_refill_ms: now_ms }
    }

    fn refill(&mut self, now_ms: u64) {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms);
        self.tokens = self
            .tokens
            .saturating_add(elapsed.saturating_mul(self.per_ms))
            .min(self.burst);
        self.last_refill_ms = now_ms;
    }

    fn take(&mut self, units: u64) -> bool {
        if self.tokens < units {
            return false;
        }
        self.tokens -= units;
        true
    }
}

#[derive(Default)]
struct MeterState {
    // None until the control plane sets rates; an unconfigured meter
    // passes everything as green.
    buckets: Option<(TokenBucket, TokenBucket)>,
}

impl MeterState {
    fn execute(&mut self, now_ms: u64, units: u64) -> MeterColor {
        let Some((committed, peak)) = self.buckets.as_mut() else {
            return MeterColor::Green;
        };
        committed.refill(now_ms);
        peak.refill(now_ms);
        if !peak.take(units) {
            return MeterColor::Red;
        }
        if !committed.take(units) {
            return MeterColor::Yellow;
        }
        MeterColor::Green
    }
}

/// One meter per entry slot of the owning table.
pub struct DirectMeter {
    meters: Vec<Mutex<MeterState>>,
}

impl DirectMeter {
    pub fn new(size: u32) -> Self {
        let mut meters = Vec::with_capacity(size as usize);
        meters.resize_with(size as usize, Default::default);
        DirectMeter { meters }
    }

    pub fn size(&self) -> u32 {
        self.meters.len() as u32
    }

    /// Color one packet against the slot's meter.  Out-of-bounds slots
    /// (a table resized out from under a stale config) pass as green
    /// rather than panicking on the packet path.
    pub fn execute(&self, slot: u32, now_ms: u64, units: u64) -> MeterColor {
        match self.meters.get(slot as usize) {
            Some(meter) => meter.lock().execute(now_ms, units),
            None => MeterColor::Green,
        }
    }

    pub fn set_rates(&self, slot: u32, rates: &MeterRates, now_ms: u64) {
        if let Some(meter) = self.meters.get(slot as usize) {
            meter.lock().buckets = Some((
                TokenBucket::new(
                    rates.cir_per_ms,
                    rates.committed_burst,
                    now_ms,
                ),
                TokenBucket::new(rates.pir_per_ms, rates.peak_burst, now_ms),
            ));
        }
    }

    /// Clear the slot's configuration, e.g. when its entry is deleted.
    pub fn reset(&self, slot: u32) {
        if let Some(meter) = self.meters.get(slot as usize) {
            meter.lock().buckets = None;
        }
    }
}
