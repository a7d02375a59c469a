// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Sole mutator of the ring buffer. `publish` performs no syscalls and no
// allocation — it is the hot path and must stay that way.

use std::os::fd::OwnedFd;
use std::sync::atomic::Ordering;

use crate::codec::{self, Channel};
use crate::error::{PublishError, SetupError};
use crate::layout::{self, FrameType, Header, SlotHeader, HEADER_CRC_SPAN, SLOT_HEADER_CRC_SPAN, SLOT_HEADER_SIZE};
use crate::shm::ShmRegion;

pub struct Writer {
    region: ShmRegion,
    frame_size: u32,
    frame_count: u32,
    sequence_number: u32,
    frames_written: u64,
}

impl Writer {
    /// Creates a fresh anonymous region sized for `frame_size * frame_count`
    /// slots, initializes the header and every slot, and returns the writer
    /// together with a duplicate fd to hand to the control server.
    pub fn new(frame_size: u32, frame_count: u32) -> Result<(Self, OwnedFd), SetupError> {
        if frame_size < layout::SLOT_HEADER_SIZE as u32 || frame_count < 2 {
            return Err(SetupError::HeaderInvalid);
        }
        let len = layout::region_size(frame_size, frame_count);
        let (region, fd) = ShmRegion::create(len).map_err(SetupError::Mmap)?;
        let mut writer = Self {
            region,
            frame_size,
            frame_count,
            sequence_number: 0,
            frames_written: 0,
        };
        writer.initialize();
        Ok((writer, fd))
    }

    fn header(&self) -> &Header {
        unsafe { &*(self.region.as_ptr() as *const Header) }
    }

    fn initialize(&mut self) {
        let len = self.region.len();
        unsafe {
            std::ptr::write_bytes(self.region.as_mut_ptr(), 0, len);
            let hdr = &mut *(self.region.as_mut_ptr() as *mut Header);
            hdr.magic = layout::MAGIC;
            hdr.version = layout::VERSION;
            hdr.frame_size = self.frame_size;
            hdr.frame_count = self.frame_count;
            let prefix = std::slice::from_raw_parts(self.region.as_ptr(), HEADER_CRC_SPAN);
            hdr.crc32 = codec::crc32(prefix);

            for i in 0..self.frame_count as u64 {
                let offset = layout::slot_offset(i, self.frame_size, self.frame_count);
                let slot = &mut *(self.region.as_mut_ptr().add(offset) as *mut SlotHeader);
                slot.frame_type = FrameType::Invalid as u8;
            }
        }
        tracing::info!(
            frame_size = self.frame_size,
            frame_count = self.frame_count,
            region_len = len,
            "ring initialized"
        );
    }

    pub fn publish_vitals(&mut self, timestamp_ms: u64, hr: i64, spo2: i64, rr: i64) -> Result<(), PublishError> {
        let payload = codec::encode_vitals(hr, spo2, rr);
        self.publish(FrameType::Vitals, timestamp_ms, &payload)
    }

    pub fn publish_waveform(
        &mut self,
        timestamp_ms: u64,
        channel: Channel,
        sample_rate: i64,
        start_timestamp_ms: i64,
        values: &[i64],
    ) -> Result<(), PublishError> {
        let payload = codec::encode_waveform(channel, sample_rate, start_timestamp_ms, values);
        self.publish(FrameType::Waveform, timestamp_ms, &payload)
    }

    pub fn heartbeat(&mut self, timestamp_ms: u64) {
        self.header()
            .heartbeat_timestamp
            .store(timestamp_ms, Ordering::Release);
    }

    fn publish(&mut self, frame_type: FrameType, timestamp_ms: u64, payload: &[u8]) -> Result<(), PublishError> {
        if payload.len() + SLOT_HEADER_SIZE > self.frame_size as usize {
            return Err(PublishError::PayloadTooLarge {
                len: payload.len(),
                max: self.frame_size as usize - SLOT_HEADER_SIZE,
            });
        }

        let hdr = self.header();
        if hdr.magic != layout::MAGIC || hdr.version != layout::VERSION {
            return Err(PublishError::InvalidHeader);
        }
        let w = hdr.write_index.load(Ordering::Acquire);
        let offset = layout::slot_offset(w, self.frame_size, self.frame_count);

        unsafe {
            let slot_base = self.region.as_mut_ptr().add(offset);
            std::ptr::write_bytes(slot_base, 0, self.frame_size as usize);
            let slot = &mut *(slot_base as *mut SlotHeader);
            slot.frame_type = frame_type as u8;
            slot.timestamp = timestamp_ms;
            slot.sequence_number = self.sequence_number;
            slot.data_size = payload.len() as u32;

            let payload_ptr = slot_base.add(SLOT_HEADER_SIZE);
            std::ptr::copy_nonoverlapping(payload.as_ptr(), payload_ptr, payload.len());

            let header_prefix = std::slice::from_raw_parts(slot_base, SLOT_HEADER_CRC_SPAN);
            slot.crc32 = codec::crc32_concat(&[header_prefix, payload]);
        }

        hdr.write_index.store(w + 1, Ordering::Release);
        hdr.heartbeat_timestamp.store(timestamp_ms, Ordering::Release);
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.frames_written += 1;
        Ok(())
    }

    pub fn write_index(&self) -> u64 {
        self.header().write_index.load(Ordering::Acquire)
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}
