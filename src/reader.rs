// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Reads frames out of a region mapped from a writer-supplied fd. Every
// anomaly short of an invalid header at attach time is absorbed here and
// exposed only as a counter or connection-state flag — never as an `Err`.

use std::os::fd::OwnedFd;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::codec::{self, Channel, Payload};
use crate::error::SetupError;
use crate::layout::{self, FrameType, Header, SlotHeader, SLOT_HEADER_CRC_SPAN, SLOT_HEADER_SIZE};
use crate::shm::ShmRegion;

/// One frame handed back by `poll`, tagged by the slot's original type.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Vitals {
        timestamp_ms: u64,
        sequence_number: u32,
        hr: i64,
        spo2: i64,
        rr: i64,
    },
    Waveform {
        timestamp_ms: u64,
        sequence_number: u32,
        channel: Channel,
        sample_rate: i64,
        start_timestamp_ms: i64,
        values: Vec<i64>,
    },
    Heartbeat {
        timestamp_ms: u64,
        sequence_number: u32,
    },
}

/// Callback adapter over `poll`, matching the two-method event-interface
/// style the original reader exposed alongside its pull API.
pub trait ReaderEvents {
    fn on_vitals(&mut self, timestamp_ms: u64, hr: i64, spo2: i64, rr: i64) {
        let _ = (timestamp_ms, hr, spo2, rr);
    }
    fn on_waveform(
        &mut self,
        timestamp_ms: u64,
        channel: Channel,
        sample_rate: i64,
        start_timestamp_ms: i64,
        values: &[i64],
    ) {
        let _ = (timestamp_ms, channel, sample_rate, start_timestamp_ms, values);
    }
    fn on_connection_changed(&mut self, connected: bool, channel_name: &str) {
        let _ = (connected, channel_name);
    }
}

pub struct Reader {
    region: ShmRegion,
    frame_size: u32,
    frame_count: u32,
    read_index: u64,
    overrun_count: u64,
    invalid_slot_count: u64,
    crc_fail_count: u64,
    size_violation_count: u64,
    heartbeat_threshold_ms: u64,
    connected: bool,
}

/// Label passed to `ReaderEvents::on_connection_changed`. One `Reader`
/// multiplexes vitals and every waveform channel over a single control
/// connection, so the event names the feed, not an individual channel.
const CONNECTION_LABEL: &str = "sensor";

impl Reader {
    /// Maps `fd` (received via the control channel) read-only and validates
    /// the header against I1/I2. Starts consuming from the writer's current
    /// position rather than replaying history.
    pub fn attach(fd: OwnedFd, len: usize) -> Result<Self, SetupError> {
        let region = ShmRegion::attach(fd, len).map_err(SetupError::Mmap)?;

        let (magic, version, frame_size, frame_count) = {
            let hdr = unsafe { &*(region.as_ptr() as *const Header) };
            (
                hdr.magic,
                hdr.version,
                hdr.frame_size,
                hdr.frame_count,
            )
        };

        if magic != layout::MAGIC || version != layout::VERSION {
            return Err(SetupError::HeaderInvalid);
        }
        if frame_size < layout::SLOT_HEADER_SIZE as u32 || frame_count < 2 {
            return Err(SetupError::HeaderInvalid);
        }
        let expected = layout::region_size(frame_size, frame_count);
        if expected != len {
            return Err(SetupError::RegionSizeMismatch {
                expected,
                actual: len,
            });
        }

        let read_index = unsafe { &*(region.as_ptr() as *const Header) }
            .write_index
            .load(Ordering::Acquire);

        Ok(Self {
            region,
            frame_size,
            frame_count,
            read_index,
            overrun_count: 0,
            invalid_slot_count: 0,
            crc_fail_count: 0,
            size_violation_count: 0,
            heartbeat_threshold_ms: crate::config::DEFAULT_HEARTBEAT_THRESHOLD_MS,
            connected: true,
        })
    }

    /// Overrides the stall threshold `dispatch` uses to detect a
    /// connection-state transition; `poll`/`writer_stalled` are unaffected
    /// and always take their own threshold explicitly.
    pub fn set_heartbeat_threshold_ms(&mut self, threshold_ms: u64) {
        self.heartbeat_threshold_ms = threshold_ms;
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.region.as_ptr() as *const Header) }
    }

    /// Returns the next valid frame, or `None` if nothing new is available
    /// or the next slot was skipped as an anomaly (overrun, invalid, torn).
    pub fn poll(&mut self) -> Option<Frame> {
        let w = self.header().write_index.load(Ordering::Acquire);
        if self.read_index == w {
            return None;
        }

        let lag = w - self.read_index;
        if lag > self.frame_count as u64 {
            self.read_index = w;
            self.overrun_count += 1;
            tracing::warn!(lag, frame_count = self.frame_count, "reader overrun, resynced to writer");
            return None;
        }

        let offset = layout::slot_offset(self.read_index, self.frame_size, self.frame_count);
        let slot_base = unsafe { self.region.as_ptr().add(offset) };
        let slot = unsafe { &*(slot_base as *const SlotHeader) };

        if slot.frame_type == FrameType::Invalid as u8 {
            self.read_index += 1;
            self.invalid_slot_count += 1;
            return None;
        }

        if slot.data_size as usize + SLOT_HEADER_SIZE > self.frame_size as usize {
            self.read_index += 1;
            self.size_violation_count += 1;
            tracing::warn!(data_size = slot.data_size, "slot size violation, skipping");
            return None;
        }

        let payload = unsafe {
            std::slice::from_raw_parts(slot_base.add(SLOT_HEADER_SIZE), slot.data_size as usize)
        };
        let header_prefix = unsafe { std::slice::from_raw_parts(slot_base, SLOT_HEADER_CRC_SPAN) };
        let computed = codec::crc32_concat(&[header_prefix, payload]);
        if computed != slot.crc32 {
            self.read_index += 1;
            self.crc_fail_count += 1;
            tracing::warn!("slot CRC mismatch, skipping torn write");
            return None;
        }

        let frame_type = FrameType::from_u8(slot.frame_type);
        let timestamp_ms = slot.timestamp;
        let sequence_number = slot.sequence_number;
        self.read_index += 1;

        match frame_type {
            FrameType::Heartbeat => Some(Frame::Heartbeat {
                timestamp_ms,
                sequence_number,
            }),
            FrameType::Vitals | FrameType::Waveform => {
                match codec::decode_payload(frame_type, payload)? {
                    Payload::Vitals { hr, spo2, rr } => Some(Frame::Vitals {
                        timestamp_ms,
                        sequence_number,
                        hr,
                        spo2,
                        rr,
                    }),
                    Payload::Waveform {
                        channel,
                        sample_rate,
                        start_timestamp_ms,
                        values,
                    } => Some(Frame::Waveform {
                        timestamp_ms,
                        sequence_number,
                        channel,
                        sample_rate,
                        start_timestamp_ms,
                        values,
                    }),
                }
            }
            FrameType::Invalid => None,
        }
    }

    /// Drains every available frame through the callback adapter, then
    /// checks the writer's heartbeat and fires `on_connection_changed` if
    /// the stalled/live state flipped since the last call.
    pub fn dispatch<E: ReaderEvents>(&mut self, events: &mut E) {
        while let Some(frame) = self.poll() {
            match frame {
                Frame::Vitals {
                    timestamp_ms,
                    hr,
                    spo2,
                    rr,
                    ..
                } => events.on_vitals(timestamp_ms, hr, spo2, rr),
                Frame::Waveform {
                    timestamp_ms,
                    channel,
                    sample_rate,
                    start_timestamp_ms,
                    values,
                    ..
                } => events.on_waveform(timestamp_ms, channel, sample_rate, start_timestamp_ms, &values),
                Frame::Heartbeat { .. } => {}
            }
        }

        let connected = !self.writer_stalled(self.heartbeat_threshold_ms);
        if connected != self.connected {
            self.connected = connected;
            events.on_connection_changed(connected, CONNECTION_LABEL);
        }
    }

    pub fn writer_stalled(&self, threshold_ms: u64) -> bool {
        let last = self.header().heartbeat_timestamp.load(Ordering::Acquire);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the Unix epoch")
            .as_millis() as u64;
        now.saturating_sub(last) > threshold_ms
    }

    /// Jumps the local read position to the writer's current position,
    /// discarding any backlog. Typical use: after observing an overrun.
    pub fn resync(&mut self) {
        self.read_index = self.header().write_index.load(Ordering::Acquire);
    }

    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    pub fn overrun_count(&self) -> u64 {
        self.overrun_count
    }

    pub fn invalid_slot_count(&self) -> u64 {
        self.invalid_slot_count
    }

    pub fn crc_fail_count(&self) -> u64 {
        self.crc_fail_count
    }

    pub fn size_violation_count(&self) -> u64 {
        self.size_violation_count
    }
}
