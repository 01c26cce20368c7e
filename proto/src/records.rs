//! Fixed-size binary records for the persisted data file (§6 "Persisted
//! state layout", §4.7 recording stream writer).
//!
//! Every record here derives `bytemuck::{Pod, Zeroable}` so the recording
//! writer can cast a `&[RecordKind]` directly to bytes for a single
//! `write_all` call, matching the "direct DMA transfer" struct-layout
//! convention `uwb-types::PeerReport` documents for its own wire structs.
//! All records are `#[repr(C)]` and contain only fixed-width integers, so
//! layout is stable across builds.

use bytemuck::{Pod, Zeroable};

/// Sentinel written into a padded byte-delta slot (analog/spike records).
pub const PAD_BYTE: u8 = 0;
/// Sentinel written into a padded interval slot (EVENT0/EVENT1 records).
pub const PAD_INTERVAL: u32 = 0x07FF_FFFF;
/// Sentinel (mask, time) pair written into a padded OTHEREVENT slot.
pub const PAD_OTHER: (u16, u32) = (0, 0x07FF_FFFF);

/// One channel-interleaved scan of delta-compressed analog samples.
/// Each byte is either a single-byte delta (bit 7 clear, biased by +64) or
/// the high byte of a two-byte delta (bit 7 set, 12-bit payload, low byte
/// follows immediately) — see `engine::recording::delta` for the codec.
pub const AI_RECORD_BYTES: usize = 256;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct AiRecord {
    pub data: [u8; AI_RECORD_BYTES],
    pub used: u16,
    pub _pad: [u8; 6],
}

/// 25 kHz spike waveform samples, delta-compressed the same way as
/// [`AiRecord`].
pub const SPIKE_RECORD_BYTES: usize = 1024;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SpikeWaveRecord {
    pub data: [u8; SPIKE_RECORD_BYTES],
    pub used: u16,
    pub _pad: [u8; 6],
}

/// Inter-event intervals (tenths of a millisecond) between successive
/// rising edges on DI bit 0.
pub const EVENT_RECORD_SLOTS: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Event0Record {
    pub interval_10us: [u32; EVENT_RECORD_SLOTS],
    pub used: u16,
    pub _pad: [u8; 6],
}

/// Inter-event intervals on DI bit 1.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Event1Record {
    pub interval_10us: [u32; EVENT_RECORD_SLOTS],
    pub used: u16,
    pub _pad: [u8; 6],
}

/// (mask, time) pairs for DI bits other than 0 and 1, plus synthetic
/// eyelink blink-start/blink-end markers.
pub const OTHER_RECORD_SLOTS: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct OtherEventRecord {
    pub mask: [u16; OTHER_RECORD_SLOTS],
    pub time_10us: [u32; OTHER_RECORD_SLOTS],
    pub used: u16,
    pub _pad: [u8; 6],
}

/// First record in the file; rewritten in place when the file is closed.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct HeaderRecord {
    pub format_version: u32,
    pub scan_interval_us: u32,
    pub n_saved_channels: u16,
    pub saved_channels: [u16; 16],
    pub n_ai_bytes: u32,
    pub n_spike_bytes: u32,
    pub n_event0_bytes: u32,
    pub n_event1_bytes: u32,
    pub n_other_bytes: u32,
    pub display_rows: u16,
    pub display_cols: u16,
    pub display_distance_mm: u32,
    pub display_width_mm: u32,
    pub display_height_mm: u32,
    pub display_refresh_microhz: u32,
    pub sync_flash_size_pix: u16,
    pub sync_flash_dur_ticks: u16,
    pub result_flags: u32,
    pub reward_pulse_len_ms: [u16; 2],
    pub timestamp_unix_s: u64,
    pub n_duplicate_events: u16,
    pub is_continuous: u8,
    pub saved_spikes: u8,
}

impl Default for HeaderRecord {
    fn default() -> Self {
        bytemuck::Zeroable::zeroed()
    }
}

/// Bit layout of [`HeaderRecord::result_flags`] (§3 "Trial header", §7).
pub mod result_flags {
    pub const DONE: u32 = 1 << 0;
    pub const REWARD_EARNED: u32 = 1 << 1;
    pub const REWARD_GIVEN: u32 = 1 << 2;
    pub const FIX1_SELECTED: u32 = 1 << 3;
    pub const FIX2_SELECTED: u32 = 1 << 4;
    pub const END_SELECT: u32 = 1 << 5;
    pub const ERROR: u32 = 1 << 6;
    pub const ABORTED: u32 = 1 << 7;
    pub const LOSTFIX: u32 = 1 << 8;
    pub const DUP_FRAME: u32 = 1 << 9;
    pub const EYELINK_ERROR: u32 = 1 << 10;
    pub const SEARCH_SUCCESS: u32 = 1 << 11;
    pub const SEARCH_TRIED: u32 = 1 << 12;
    pub const RESPONSE_DETECTED: u32 = 1 << 13;
    pub const RESPOK: u32 = 1 << 14;
}

/// 16 target definitions packed per record (§3 "Persisted state layout").
pub const TARGETS_PER_RECORD: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TargetDefRecord {
    pub kind: [u8; TARGETS_PER_RECORD],
    pub subkind: [u8; TARGETS_PER_RECORD],
    pub flags: [u16; TARGETS_PER_RECORD],
    pub used: u16,
    pub _pad: [u8; 6],
}

/// Trial codes packed `(code, time_ms)` pairs per record.
pub const CODES_PER_RECORD: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TrialCodeRecord {
    pub code: [u16; CODES_PER_RECORD],
    pub time_ms: [u32; CODES_PER_RECORD],
    pub used: u16,
    pub _pad: [u8; 6],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_record_is_zeroable_default() {
        let h = HeaderRecord::default();
        assert_eq!(h.result_flags, 0);
        assert_eq!(h.n_ai_bytes, 0);
    }

    #[test]
    fn record_sizes_are_fixed_and_nonzero() {
        assert_eq!(std::mem::size_of::<AiRecord>(), AI_RECORD_BYTES + 8);
        assert_eq!(
            std::mem::size_of::<SpikeWaveRecord>(),
            SPIKE_RECORD_BYTES + 8
        );
        assert!(std::mem::size_of::<Event0Record>() > 0);
        assert!(std::mem::size_of::<TrialCodeRecord>() > 0);
    }
}
