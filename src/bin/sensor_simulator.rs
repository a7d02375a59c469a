// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Demo writer: publishes synthetic vitals at ~1 Hz and an ECG waveform at
// ~250 Hz, while serving the control channel so readers can attach.

use std::os::fd::AsRawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use vitalring::codec::Channel;
use vitalring::config::{Config, DEFAULT_FRAME_COUNT, DEFAULT_FRAME_SIZE};
use vitalring::control::ControlServer;
use vitalring::writer::Writer;

#[derive(Parser)]
#[command(about = "Publishes synthetic vitals and waveform frames for bedside-monitor readers")]
struct Args {
    #[arg(long, default_value = "/tmp/z-monitor-sensor.sock")]
    socket_path: std::path::PathBuf,

    #[arg(long, default_value_t = DEFAULT_FRAME_SIZE)]
    frame_size: u32,

    #[arg(long, default_value_t = DEFAULT_FRAME_COUNT)]
    frame_count: u32,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the Unix epoch")
        .as_millis() as u64
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let config = Config {
        socket_path: args.socket_path,
        frame_size: args.frame_size,
        frame_count: args.frame_count,
        ..Config::default()
    };

    let (mut writer, ring_fd) =
        Writer::new(config.frame_size, config.frame_count).expect("failed to create ring buffer");
    let mut server = ControlServer::start(&config.socket_path, config.region_size() as u64)
        .expect("failed to start control server");

    let mut last_vitals = now_ms();
    let mut last_waveform = now_ms();
    let mut waveform_tick: i64 = 0;

    loop {
        server.service(ring_fd.as_raw_fd());

        let t = now_ms();
        if t.saturating_sub(last_vitals) >= 1000 {
            last_vitals = t;
            writer
                .publish_vitals(t, 72, 98, 16)
                .expect("vitals payload always fits the configured frame size");
        }
        if t.saturating_sub(last_waveform) >= 4 {
            last_waveform = t;
            let sample = ((waveform_tick as f64 * 0.25).sin() * 1000.0) as i64;
            waveform_tick += 1;
            writer
                .publish_waveform(t, Channel::EcgLeadII, 250, t as i64, &[sample])
                .expect("waveform payload always fits the configured frame size");
        }

        std::thread::sleep(Duration::from_millis(2));
    }
}
