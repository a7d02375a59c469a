// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Real-time sensor telemetry transport: a one-producer/many-consumer
// shared-memory ring buffer bootstrapped by a Unix-domain control channel
// that hands readers the ring's memfd via `SCM_RIGHTS`.

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod layout;
pub mod reader;
pub mod shm;
pub mod writer;

pub use codec::{Channel, Payload};
pub use config::Config;
pub use control::{ControlClient, ControlServer};
pub use error::{PublishError, SetupError};
pub use reader::{Frame, Reader, ReaderEvents};
pub use writer::Writer;
