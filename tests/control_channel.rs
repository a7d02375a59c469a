// End-to-end handshake: a real control server/client pair over a real
// Unix-domain socket, passing a real memfd via SCM_RIGHTS.

mod support;

use std::os::fd::AsRawFd;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

use vitalring::control::{ControlClient, ControlServer};
use vitalring::reader::Reader;
use vitalring::writer::Writer;

#[test]
fn handshake_delivers_matching_fd_and_size() {
    let path = support::unique_socket_path("handshake");
    let (mut writer, ring_fd) = Writer::new(2048, 16).unwrap();
    let region_len = vitalring::layout::region_size(2048, 16) as u64;

    let mut server = ControlServer::start(&path, region_len).unwrap();

    let client_path = path.clone();
    let client = thread::spawn(move || ControlClient::connect(&client_path, 2000));

    // Give the client a moment to connect before the server's single-shot
    // accept-and-service loop below.
    thread::sleep(Duration::from_millis(20));
    server.service(ring_fd.as_raw_fd());

    let (fd, size) = client.join().unwrap().expect("handshake should succeed");
    assert_eq!(size, region_len);

    let mut reader = Reader::attach(fd, size as usize).expect("attach should succeed");

    writer.publish_vitals(1, 70, 97, 15).unwrap();
    let frame = reader.poll().expect("writer's frame should be visible through the passed fd");
    assert!(matches!(frame, vitalring::reader::Frame::Vitals { .. }));

    server.shutdown();
}

#[test]
fn stall_is_detected_then_clears_after_heartbeat() {
    let (mut writer, dup_fd) = Writer::new(1024, 8).unwrap();
    let mut reader = Reader::attach(dup_fd, vitalring::layout::region_size(1024, 8) as usize).unwrap();

    writer.publish_vitals(now_ms(), 70, 97, 15).unwrap();
    assert!(!reader.writer_stalled(250));

    thread::sleep(Duration::from_millis(400));
    assert!(reader.writer_stalled(250));

    writer.heartbeat(now_ms());
    assert!(!reader.writer_stalled(250));
}
