// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for the ring-buffer/control-channel transport.
// Data-path anomalies (overrun, CRC mismatch, stale/invalid slots) and
// liveness failures (writer stall) are deliberately not represented here —
// they are counted and exposed as state on `Reader`, never returned as
// `Err`. Only setup and programmer errors propagate.

use std::io;

/// Failures that can occur while standing up a writer or reader endpoint.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to create control socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("failed to bind control socket at {path:?}: {source}")]
    Bind {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen on control socket: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to connect to control socket at {path:?}: {source}")]
    Connect {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to map shared region: {0}")]
    Mmap(#[source] io::Error),

    #[error("failed to create anonymous memory file: {0}")]
    MemfdCreate(#[source] io::Error),

    #[error("ring header is invalid (bad magic or unsupported version)")]
    HeaderInvalid,

    #[error("mapped region size {actual} does not match expected {expected}")]
    RegionSizeMismatch { expected: usize, actual: usize },

    #[error("handshake timed out after {0}ms")]
    HandshakeTimeout(u64),

    #[error("control channel closed before a handshake record arrived")]
    HandshakeClosed,

    #[error("control record did not carry a file descriptor")]
    NoFileDescriptorReceived,

    #[error("peer sent an unexpected control record type {0:#04x} before handshake")]
    UnexpectedRecordType(u8),
}

/// Failures `Writer::publish_*` can return. Anything beyond these two is a
/// data-path anomaly handled on the reader side, not a writer-side error.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("payload of {len} bytes exceeds the {max}-byte budget for this ring's frame size")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("ring header no longer matches what initialize() wrote (magic/version corrupted)")]
    InvalidHeader,
}
