//! Recording stream writer (§4.7, C8).
//!
//! Grounded on the teacher's `audit.rs::AuditLogger` — `Arc`-held state,
//! background append, "open failure falls back to logging, never
//! crashes" — generalized from JSON-lines audit blocks to fixed-size
//! delta-compressed binary records on a bounded SPSC queue drained by a
//! dedicated thread. The queue/thread split itself is grounded on the
//! teacher's `main.rs` pattern of a separate background task for
//! I/O-bound work, translated from `tokio::spawn` to `std::thread` for
//! the same real-time-isolation reason as `engine::scheduler`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::JoinHandle;

use bytemuck::bytes_of;
use tracing::{error, info, warn};

use proto::records::{
    AiRecord, Event0Record, Event1Record, HeaderRecord, OtherEventRecord, SpikeWaveRecord,
    AI_RECORD_BYTES, EVENT_RECORD_SLOTS, OTHER_RECORD_SLOTS, PAD_BYTE, PAD_INTERVAL, PAD_OTHER,
    SPIKE_RECORD_BYTES,
};

use crate::devices::dio::DioEvent;
use super::delta::encode_sample;

/// Producer-side handle to the background file-writer thread. Dropping
/// all clones of the inner sender lets the thread drain its queue and
/// exit; `join` blocks until that happens.
pub struct WriterHandle {
    tx: SyncSender<Vec<u8>>,
    join: Option<JoinHandle<()>>,
}

impl WriterHandle {
    fn spawn(path: PathBuf, depth: usize) -> std::io::Result<Self> {
        let mut file = File::create(&path)?;
        let (tx, rx) = sync_channel::<Vec<u8>>(depth.max(1));
        let join = std::thread::spawn(move || {
            while let Ok(bytes) = rx.recv() {
                if let Err(e) = file.write_all(&bytes) {
                    error!(target: "recording", "write failed: {e}");
                }
            }
            let _ = file.flush();
        });
        Ok(Self { tx, join: Some(join) })
    }

    fn enqueue(&self, bytes: Vec<u8>) {
        if self.tx.try_send(bytes).is_err() {
            warn!(target: "recording", "record queue full or closed, dropping record");
        }
    }

    fn shutdown(mut self) {
        drop(self.tx.clone());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Owns the in-flight scratch buffers and header counters for one open
/// recording session (§3 "Ownership": "the recording writer owns its
/// queue and scratch records").
pub struct RecordingWriter {
    path: PathBuf,
    writer: Option<WriterHandle>,
    header: HeaderRecord,
    saved_channels: Vec<u16>,

    ai_prev: Vec<i16>,
    ai_pending: VecDeque<u8>,

    spike_prev: i16,
    spike_pending: VecDeque<u8>,
    spike_enabled: bool,

    ev0_pending: Vec<u32>,
    ev0_last_time: Option<u32>,
    ev1_pending: Vec<u32>,
    ev1_last_time: Option<u32>,

    other_pending: Vec<(u16, u32)>,
}

/// Synthetic mask values for eyelink blink markers written into OTHER
/// (§4.7 `StreamEyelinkBlinkEvent`).
pub mod blink_mask {
    pub const START: u16 = 0xFFFE;
    pub const END: u16 = 0xFFFF;
}

impl RecordingWriter {
    /// `Open(path)`: initializes bookkeeping and enqueues a placeholder
    /// header record as the very first bytes in the file — it is
    /// rewritten in its final form by [`RecordingWriter::close`].
    pub fn open(
        path: impl AsRef<Path>,
        saved_channels: Vec<u16>,
        scan_interval_us: u32,
        spike_enabled: bool,
        queue_depth: usize,
    ) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = WriterHandle::spawn(path.clone(), queue_depth)?;

        let mut header = HeaderRecord::default();
        header.scan_interval_us = scan_interval_us;
        header.n_saved_channels = saved_channels.len() as u16;
        for (i, &ch) in saved_channels.iter().take(16).enumerate() {
            header.saved_channels[i] = ch;
        }
        header.saved_spikes = spike_enabled as u8;
        writer.enqueue(bytes_of(&header).to_vec());

        info!(target: "recording", path = %path.display(), "recording session opened");

        Ok(Self {
            path,
            writer: Some(writer),
            header,
            ai_prev: vec![0i16; saved_channels.len()],
            ai_pending: VecDeque::new(),
            spike_prev: 0,
            spike_pending: VecDeque::new(),
            spike_enabled,
            ev0_pending: Vec::new(),
            ev0_last_time: None,
            ev1_pending: Vec::new(),
            ev1_last_time: None,
            other_pending: Vec::new(),
            saved_channels,
        })
    }

    /// `StreamAnalog()`: delta-compresses one scan's worth of saved
    /// channels, flushing full [`AiRecord`]s as they fill (§4.7).
    pub fn stream_analog(&mut self, samples: &[i16]) {
        for (i, prev) in self.ai_prev.iter_mut().enumerate() {
            let cur = samples.get(i).copied().unwrap_or(0);
            let mut bytes = Vec::with_capacity(2);
            *prev = encode_sample(*prev, cur, &mut bytes);
            self.ai_pending.extend(bytes);
        }
        self.flush_full_ai_records();
    }

    fn flush_full_ai_records(&mut self) {
        while self.ai_pending.len() >= AI_RECORD_BYTES {
            let mut record = AiRecord { data: [PAD_BYTE; AI_RECORD_BYTES], used: AI_RECORD_BYTES as u16, _pad: [0; 6] };
            for slot in record.data.iter_mut() {
                *slot = self.ai_pending.pop_front().expect("checked length above");
            }
            self.header.n_ai_bytes += AI_RECORD_BYTES as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
    }

    /// `StreamAnalog()` for the optional 25 kHz spike waveform, same
    /// codec and flush discipline as the AI channels.
    pub fn stream_spike(&mut self, samples: &[i16]) {
        if !self.spike_enabled {
            return;
        }
        for &cur in samples {
            let mut bytes = Vec::with_capacity(2);
            self.spike_prev = encode_sample(self.spike_prev, cur, &mut bytes);
            self.spike_pending.extend(bytes);
        }
        self.flush_full_spike_records();
    }

    fn flush_full_spike_records(&mut self) {
        while self.spike_pending.len() >= SPIKE_RECORD_BYTES {
            let mut record =
                SpikeWaveRecord { data: [PAD_BYTE; SPIKE_RECORD_BYTES], used: SPIKE_RECORD_BYTES as u16, _pad: [0; 6] };
            for slot in record.data.iter_mut() {
                *slot = self.spike_pending.pop_front().expect("checked length above");
            }
            self.header.n_spike_bytes += SPIKE_RECORD_BYTES as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
    }

    /// `StreamEvents()`: drains digital events into EVENT0 (DI bit 0
    /// inter-event intervals), EVENT1 (DI bit 1), or OTHER ((mask, time)
    /// pairs for any other DI bits) (§4.7).
    pub fn stream_events(&mut self, events: &[DioEvent]) {
        for ev in events {
            if ev.mask == 0x1 {
                if let Some(last) = self.ev0_last_time {
                    self.ev0_pending.push(ev.time_10us.saturating_sub(last));
                }
                self.ev0_last_time = Some(ev.time_10us);
            } else if ev.mask == 0x2 {
                if let Some(last) = self.ev1_last_time {
                    self.ev1_pending.push(ev.time_10us.saturating_sub(last));
                }
                self.ev1_last_time = Some(ev.time_10us);
            } else {
                self.other_pending.push((ev.mask, ev.time_10us));
            }
        }
        self.flush_full_event_records();
    }

    /// `StreamEyelinkBlinkEvent(start|end, t)`: writes a synthetic
    /// (mask, time) pair into OTHER (§4.7).
    pub fn stream_eyelink_blink(&mut self, is_start: bool, time_10us: u32) {
        let mask = if is_start { blink_mask::START } else { blink_mask::END };
        self.other_pending.push((mask, time_10us));
        self.flush_full_event_records();
    }

    fn flush_full_event_records(&mut self) {
        while self.ev0_pending.len() >= EVENT_RECORD_SLOTS {
            let mut record = Event0Record { interval_10us: [PAD_INTERVAL; EVENT_RECORD_SLOTS], used: EVENT_RECORD_SLOTS as u16, _pad: [0; 6] };
            for slot in record.interval_10us.iter_mut() {
                *slot = self.ev0_pending.remove(0);
            }
            self.header.n_event0_bytes += std::mem::size_of::<Event0Record>() as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
        while self.ev1_pending.len() >= EVENT_RECORD_SLOTS {
            let mut record = Event1Record { interval_10us: [PAD_INTERVAL; EVENT_RECORD_SLOTS], used: EVENT_RECORD_SLOTS as u16, _pad: [0; 6] };
            for slot in record.interval_10us.iter_mut() {
                *slot = self.ev1_pending.remove(0);
            }
            self.header.n_event1_bytes += std::mem::size_of::<Event1Record>() as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
        while self.other_pending.len() >= OTHER_RECORD_SLOTS {
            let mut record = OtherEventRecord {
                mask: [PAD_OTHER.0; OTHER_RECORD_SLOTS],
                time_10us: [PAD_OTHER.1; OTHER_RECORD_SLOTS],
                used: OTHER_RECORD_SLOTS as u16,
                _pad: [0; 6],
            };
            for i in 0..OTHER_RECORD_SLOTS {
                let (mask, time) = self.other_pending.remove(0);
                record.mask[i] = mask;
                record.time_10us[i] = time;
            }
            self.header.n_other_bytes += std::mem::size_of::<OtherEventRecord>() as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
    }

    fn enqueue(&self, bytes: Vec<u8>) {
        if let Some(w) = &self.writer {
            w.enqueue(bytes);
        }
    }

    /// Sets the final result-flag bitmask and trial metadata before
    /// close; the header record keeps these until it is rewritten.
    pub fn set_result_flags(&mut self, flags: u32) {
        self.header.result_flags = flags;
    }

    pub fn set_is_continuous(&mut self, v: bool) {
        self.header.is_continuous = v as u8;
    }

    pub fn header(&self) -> &HeaderRecord {
        &self.header
    }

    /// `Close(save)`: pads partial records with sentinels, rewrites the
    /// header in its final form, and drains the queue; `save == false`
    /// discards the file entirely (§4.7, §7 "no data file is retained").
    pub fn close(mut self, save: bool) -> std::io::Result<bool> {
        self.pad_and_flush_partial_records();

        if let Some(w) = self.writer.take() {
            w.shutdown();
        }

        if !save {
            let _ = std::fs::remove_file(&self.path);
            info!(target: "recording", path = %self.path.display(), "recording discarded");
            return Ok(false);
        }

        let mut file = std::fs::OpenOptions::new().write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(bytes_of(&self.header))?;
        file.flush()?;
        info!(target: "recording", path = %self.path.display(), bytes = self.header.n_ai_bytes, "recording saved");
        Ok(true)
    }

    fn pad_and_flush_partial_records(&mut self) {
        if !self.ai_pending.is_empty() {
            let used = self.ai_pending.len();
            let mut record = AiRecord { data: [PAD_BYTE; AI_RECORD_BYTES], used: used as u16, _pad: [0; 6] };
            for (i, slot) in record.data.iter_mut().enumerate() {
                *slot = self.ai_pending.get(i).copied().unwrap_or(PAD_BYTE);
            }
            self.header.n_ai_bytes += AI_RECORD_BYTES as u32;
            let bytes = bytes_of(&record).to_vec();
            self.enqueue(bytes);
            self.ai_pending.clear();
        }
        if !self.spike_pending.is_empty() {
            let used = self.spike_pending.len();
            let mut record = SpikeWaveRecord { data: [PAD_BYTE; SPIKE_RECORD_BYTES], used: used as u16, _pad: [0; 6] };
            for (i, slot) in record.data.iter_mut().enumerate() {
                *slot = self.spike_pending.get(i).copied().unwrap_or(PAD_BYTE);
            }
            self.header.n_spike_bytes += SPIKE_RECORD_BYTES as u32;
            let bytes = bytes_of(&record).to_vec();
            self.enqueue(bytes);
            self.spike_pending.clear();
        }
        if !self.ev0_pending.is_empty() {
            let used = self.ev0_pending.len();
            let mut record = Event0Record { interval_10us: [PAD_INTERVAL; EVENT_RECORD_SLOTS], used: used as u16, _pad: [0; 6] };
            for (i, v) in self.ev0_pending.drain(..).enumerate() {
                record.interval_10us[i] = v;
            }
            self.header.n_event0_bytes += std::mem::size_of::<Event0Record>() as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
        if !self.ev1_pending.is_empty() {
            let used = self.ev1_pending.len();
            let mut record = Event1Record { interval_10us: [PAD_INTERVAL; EVENT_RECORD_SLOTS], used: used as u16, _pad: [0; 6] };
            for (i, v) in self.ev1_pending.drain(..).enumerate() {
                record.interval_10us[i] = v;
            }
            self.header.n_event1_bytes += std::mem::size_of::<Event1Record>() as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
        if !self.other_pending.is_empty() {
            let used = self.other_pending.len();
            let mut record = OtherEventRecord {
                mask: [PAD_OTHER.0; OTHER_RECORD_SLOTS],
                time_10us: [PAD_OTHER.1; OTHER_RECORD_SLOTS],
                used: used as u16,
                _pad: [0; 6],
            };
            for (i, (mask, time)) in self.other_pending.drain(..).enumerate() {
                record.mask[i] = mask;
                record.time_10us[i] = time;
            }
            self.header.n_other_bytes += std::mem::size_of::<OtherEventRecord>() as u32;
            self.enqueue(bytes_of(&record).to_vec());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("maestro-recording-test-{name}-{:?}", std::thread::current().id()))
    }

    #[test]
    fn header_byte_counters_match_emitted_ai_bytes() {
        let path = temp_path("header-counters");
        let mut w = RecordingWriter::open(&path, vec![0, 1], 1000, false, 4).unwrap();
        for i in 0..(AI_RECORD_BYTES * 2) {
            w.stream_analog(&[i as i16, -(i as i16)]);
        }
        let header_bytes_before_close = w.header().n_ai_bytes;
        assert!(header_bytes_before_close > 0);
        let saved = w.close(true).unwrap();
        assert!(saved);

        let mut file = File::open(&path).unwrap();
        let mut buf = vec![0u8; std::mem::size_of::<HeaderRecord>()];
        file.read_exact(&mut buf).unwrap();
        let header: HeaderRecord = *bytemuck::from_bytes(&buf);
        assert_eq!(header.n_ai_bytes, header_bytes_before_close);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn discarded_recording_removes_file() {
        let path = temp_path("discard");
        let w = RecordingWriter::open(&path, vec![0], 1000, false, 4).unwrap();
        let saved = w.close(false).unwrap();
        assert!(!saved);
        assert!(!path.exists());
    }

    #[test]
    fn partial_ai_record_is_padded_on_close() {
        let path = temp_path("partial-pad");
        let mut w = RecordingWriter::open(&path, vec![0], 1000, false, 4).unwrap();
        w.stream_analog(&[5]);
        assert_eq!(w.header().n_ai_bytes, 0);
        w.close(true).unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn event0_intervals_accumulate_from_bit0_events() {
        let path = temp_path("event0");
        let mut w = RecordingWriter::open(&path, vec![0], 1000, false, 4).unwrap();
        w.stream_events(&[
            DioEvent { mask: 0x1, time_10us: 100 },
            DioEvent { mask: 0x1, time_10us: 150 },
        ]);
        assert_eq!(w.ev0_pending, vec![50]);
        w.close(true).unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
