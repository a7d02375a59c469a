// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demo reader: connects to a sensor-simulator's control channel, attaches
// the ring buffer, and prints vitals/waveform frames as they arrive while
// watching for writer stalls.

use std::time::Duration;

use clap::Parser;
use vitalring::config::{DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_HEARTBEAT_THRESHOLD_MS};
use vitalring::control::ControlClient;
use vitalring::reader::{Frame, Reader};

#[derive(Parser)]
#[command(about = "Polls a sensor-simulator's shared-memory ring for vitals and waveform frames")]
struct Args {
    #[arg(long, default_value = "/tmp/z-monitor-sensor.sock")]
    socket_path: std::path::PathBuf,

    #[arg(long, default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_MS)]
    handshake_timeout_ms: u64,

    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_THRESHOLD_MS)]
    heartbeat_threshold_ms: u64,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let (fd, size) = ControlClient::connect(&args.socket_path, args.handshake_timeout_ms)
        .expect("handshake with sensor-simulator failed");
    let mut reader = Reader::attach(fd, size as usize).expect("ring header validation failed");

    let mut was_stalled = false;
    loop {
        while let Some(frame) = reader.poll() {
            match frame {
                Frame::Vitals {
                    timestamp_ms,
                    hr,
                    spo2,
                    rr,
                    ..
                } => tracing::info!(timestamp_ms, hr, spo2, rr, "vitals"),
                Frame::Waveform {
                    timestamp_ms,
                    channel,
                    values,
                    ..
                } => tracing::debug!(timestamp_ms, ?channel, samples = values.len(), "waveform"),
                Frame::Heartbeat { .. } => {}
            }
        }

        let stalled = reader.writer_stalled(args.heartbeat_threshold_ms);
        if stalled != was_stalled {
            was_stalled = stalled;
            tracing::warn!(stalled, "sensor connection state changed");
        }

        std::thread::sleep(Duration::from_millis(16));
    }
}
