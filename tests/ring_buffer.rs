// Exercises the ring buffer's publish/poll contract directly: a writer and
// a reader attached to the same memfd within one process, standing in for
// the writer/reader processes the control channel would otherwise bridge.

use vitalring::codec::Channel;
use vitalring::layout::region_size;
use vitalring::reader::{Frame, Reader, ReaderEvents};
use vitalring::writer::Writer;

fn attach_reader(writer: &Writer, dup_fd: std::os::fd::OwnedFd, frame_size: u32, frame_count: u32) -> Reader {
    let _ = writer;
    Reader::attach(dup_fd, region_size(frame_size, frame_count) as usize).expect("attach should succeed")
}

#[test]
fn basic_vitals_round_trip() {
    let (mut writer, dup_fd) = Writer::new(4096, 64).unwrap();
    let mut reader = attach_reader(&writer, dup_fd, 4096, 64);

    writer.publish_vitals(1_700_000_000_000, 72, 98, 16).unwrap();

    let frame = reader.poll().expect("frame should be available");
    assert_eq!(
        frame,
        Frame::Vitals {
            timestamp_ms: 1_700_000_000_000,
            sequence_number: 0,
            hr: 72,
            spo2: 98,
            rr: 16,
        }
    );
    assert_eq!(writer.write_index(), 1);
    assert!(reader.poll().is_none());
}

#[test]
fn waveform_chunk_delivers_all_samples() {
    let (mut writer, dup_fd) = Writer::new(4096, 64).unwrap();
    let mut reader = attach_reader(&writer, dup_fd, 4096, 64);

    let values: Vec<i64> = (0..250).collect();
    writer
        .publish_waveform(2_000_000, Channel::EcgLeadII, 250, 2_000_000, &values)
        .unwrap();

    match reader.poll().unwrap() {
        Frame::Waveform {
            channel,
            sample_rate,
            values: got,
            ..
        } => {
            assert_eq!(channel, Channel::EcgLeadII);
            assert_eq!(sample_rate, 250);
            assert_eq!(got, values);
        }
        other => panic!("expected waveform frame, got {other:?}"),
    }
}

#[test]
fn sequence_numbers_strictly_increase_when_reader_keeps_up() {
    let (mut writer, dup_fd) = Writer::new(1024, 8).unwrap();
    let mut reader = attach_reader(&writer, dup_fd, 1024, 8);

    for i in 0..5 {
        writer.publish_vitals(1000 + i, 70, 97, 15).unwrap();
    }

    let mut last_seq = None;
    let mut count = 0;
    while let Some(frame) = reader.poll() {
        if let Frame::Vitals { sequence_number, .. } = frame {
            if let Some(prev) = last_seq {
                assert!(sequence_number > prev);
            }
            last_seq = Some(sequence_number);
            count += 1;
        }
    }
    assert_eq!(count, 5);
    assert_eq!(reader.overrun_count(), 0);
}

#[test]
fn overrun_delivers_only_the_most_recent_frame() {
    let (mut writer, dup_fd) = Writer::new(1024, 4).unwrap();
    let mut reader = attach_reader(&writer, dup_fd, 1024, 4);

    for i in 0..7 {
        writer.publish_vitals(1000 + i, 70, 97, 15).unwrap();
    }

    // First poll after a >frame_count backlog resyncs and reports nothing.
    assert!(reader.poll().is_none());
    assert_eq!(reader.overrun_count(), 1);

    writer.publish_vitals(2000, 80, 99, 18).unwrap();
    match reader.poll().unwrap() {
        Frame::Vitals { sequence_number, hr, .. } => {
            assert_eq!(sequence_number, 7);
            assert_eq!(hr, 80);
        }
        other => panic!("expected vitals frame, got {other:?}"),
    }
    assert!(reader.poll().is_none());
}

#[test]
fn crc_mismatch_is_skipped_and_recovers() {
    use std::os::fd::AsRawFd;

    let (mut writer, dup_fd) = Writer::new(1024, 8).unwrap();
    let region_len = region_size(1024, 8);

    // A third, independent read/write mapping of the same memfd — stands in
    // for the raw memory access a corrupting neighbor process would have.
    let corrupt_raw = unsafe { libc::dup(dup_fd.as_raw_fd()) };
    assert!(corrupt_raw >= 0);
    let corrupt_map = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            region_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            corrupt_raw,
            0,
        )
    };
    assert_ne!(corrupt_map, libc::MAP_FAILED);

    let mut reader = attach_reader(&writer, dup_fd, 1024, 8);
    writer.publish_vitals(1000, 70, 97, 15).unwrap();

    let payload_offset = vitalring::layout::HEADER_SIZE + vitalring::layout::SLOT_HEADER_SIZE;
    unsafe {
        let byte = (corrupt_map as *mut u8).add(payload_offset);
        *byte ^= 0x01;
    }

    assert!(reader.poll().is_none());
    assert_eq!(reader.crc_fail_count(), 1);

    writer.publish_vitals(1100, 71, 96, 14).unwrap();
    let frame = reader.poll().expect("clean frame after the corrupted one");
    assert_eq!(
        frame,
        Frame::Vitals {
            timestamp_ms: 1100,
            sequence_number: 1,
            hr: 71,
            spo2: 96,
            rr: 14,
        }
    );

    unsafe {
        libc::munmap(corrupt_map, region_len);
        libc::close(corrupt_raw);
    }
}

#[test]
fn header_invariants_reject_undersized_region() {
    let (_writer, dup_fd) = Writer::new(1024, 8).unwrap();
    let err = Reader::attach(dup_fd, 16).unwrap_err();
    assert!(matches!(
        err,
        vitalring::error::SetupError::RegionSizeMismatch { .. }
    ));
}

#[derive(Default)]
struct RecordingEvents {
    vitals_seen: u32,
    connection_changes: Vec<(bool, String)>,
}

impl ReaderEvents for RecordingEvents {
    fn on_vitals(&mut self, _timestamp_ms: u64, _hr: i64, _spo2: i64, _rr: i64) {
        self.vitals_seen += 1;
    }

    fn on_connection_changed(&mut self, connected: bool, channel_name: &str) {
        self.connection_changes.push((connected, channel_name.to_string()));
    }
}

#[test]
fn dispatch_forwards_frames_and_reports_stall_transition() {
    let (mut writer, dup_fd) = Writer::new(1024, 8).unwrap();
    let mut reader = attach_reader(&writer, dup_fd, 1024, 8);
    reader.set_heartbeat_threshold_ms(50);

    fn now_ms() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
    }

    let mut events = RecordingEvents::default();

    writer.publish_vitals(now_ms(), 70, 97, 15).unwrap();
    reader.dispatch(&mut events);
    assert_eq!(events.vitals_seen, 1);
    assert!(events.connection_changes.is_empty());

    std::thread::sleep(std::time::Duration::from_millis(80));
    reader.dispatch(&mut events);
    assert_eq!(events.connection_changes, vec![(false, "sensor".to_string())]);

    writer.heartbeat(now_ms());
    reader.dispatch(&mut events);
    assert_eq!(
        events.connection_changes,
        vec![(false, "sensor".to_string()), (true, "sensor".to_string())]
    );
}
