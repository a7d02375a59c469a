// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Payload encoding, decoding, and CRC-32 for ring-buffer slots. CRC uses the
// reflected IEEE 802.3 polynomial (0xEDB88320), init 0xFFFFFFFF, final XOR
// 0xFFFFFFFF — the same variant zlib/gzip/PNG/Ethernet use, computed here via
// `crc32fast` rather than a hand-rolled table.

use serde::{Deserialize, Serialize};

/// Waveform channel identifiers recognized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "ECG_LEAD_II")]
    EcgLeadII,
    #[serde(rename = "PLETH")]
    Pleth,
    #[serde(rename = "RESP")]
    Resp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VitalsWire {
    hr: i64,
    spo2: i64,
    rr: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WaveformWire {
    channel: Channel,
    sample_rate: i64,
    start_timestamp_ms: i64,
    values: Vec<i64>,
}

/// A decoded frame payload, attached to the slot's `timestamp` and
/// `sequence_number` by the reader that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Vitals { hr: i64, spo2: i64, rr: i64 },
    Waveform {
        channel: Channel,
        sample_rate: i64,
        start_timestamp_ms: i64,
        values: Vec<i64>,
    },
}

/// Computes the CRC-32 (IEEE 802.3 / zlib variant) of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Computes a CRC-32 over several non-contiguous byte ranges as if they were
/// concatenated — used for the slot CRC, whose span (header prefix, then
/// payload) straddles the `crc32` field sitting between them.
pub fn crc32_concat(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

pub fn encode_vitals(hr: i64, spo2: i64, rr: i64) -> Vec<u8> {
    serde_json::to_vec(&VitalsWire { hr, spo2, rr }).expect("vitals payload is always valid JSON")
}

pub fn encode_waveform(
    channel: Channel,
    sample_rate: i64,
    start_timestamp_ms: i64,
    values: &[i64],
) -> Vec<u8> {
    serde_json::to_vec(&WaveformWire {
        channel,
        sample_rate,
        start_timestamp_ms,
        values: values.to_vec(),
    })
    .expect("waveform payload is always valid JSON")
}

/// Decodes a slot payload of the given `frame_type`. Never fails loudly:
/// any malformed input is a data-path anomaly, reported as `None` so the
/// reader can skip the slot and keep polling.
pub fn decode_payload(frame_type: crate::layout::FrameType, bytes: &[u8]) -> Option<Payload> {
    use crate::layout::FrameType;
    match frame_type {
        FrameType::Vitals => {
            let w: VitalsWire = serde_json::from_slice(bytes).ok()?;
            Some(Payload::Vitals {
                hr: w.hr,
                spo2: w.spo2,
                rr: w.rr,
            })
        }
        FrameType::Waveform => {
            let w: WaveformWire = serde_json::from_slice(bytes).ok()?;
            Some(Payload::Waveform {
                channel: w.channel,
                sample_rate: w.sample_rate,
                start_timestamp_ms: w.start_timestamp_ms,
                values: w.values,
            })
        }
        FrameType::Heartbeat | FrameType::Invalid => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FrameType;

    #[test]
    fn vitals_round_trip() {
        let bytes = encode_vitals(72, 98, 16);
        assert_eq!(bytes, br#"{"hr":72,"spo2":98,"rr":16}"#);
        let decoded = decode_payload(FrameType::Vitals, &bytes).unwrap();
        assert_eq!(
            decoded,
            Payload::Vitals {
                hr: 72,
                spo2: 98,
                rr: 16
            }
        );
    }

    #[test]
    fn waveform_round_trip() {
        let values: Vec<i64> = (0..250).collect();
        let bytes = encode_waveform(Channel::EcgLeadII, 250, 2_000_000, &values);
        let decoded = decode_payload(FrameType::Waveform, &bytes).unwrap();
        match decoded {
            Payload::Waveform {
                channel,
                sample_rate,
                start_timestamp_ms,
                values: got,
            } => {
                assert_eq!(channel, Channel::EcgLeadII);
                assert_eq!(sample_rate, 250);
                assert_eq!(start_timestamp_ms, 2_000_000);
                assert_eq!(got, values);
            }
            other => panic!("expected waveform, got {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let bytes = encode_vitals(72, 98, 16);
        assert!(decode_payload(FrameType::Vitals, &bytes[..bytes.len() - 3]).is_none());
    }

    #[test]
    fn decode_rejects_unknown_channel() {
        let bad = br#"{"channel":"NOT_A_CHANNEL","sample_rate":250,"start_timestamp_ms":0,"values":[]}"#;
        assert!(decode_payload(FrameType::Waveform, bad).is_none());
    }

    #[test]
    fn crc32_concat_matches_contiguous_crc32() {
        let a = b"hello ";
        let b = b"world";
        let mut joined = Vec::new();
        joined.extend_from_slice(a);
        joined.extend_from_slice(b);
        assert_eq!(crc32_concat(&[a, b]), crc32(&joined));
    }

    #[test]
    fn crc_is_sensitive_to_single_bit_flip() {
        let mut bytes = encode_vitals(72, 98, 16);
        let a = crc32(&bytes);
        bytes[0] ^= 0x01;
        let b = crc32(&bytes);
        assert_ne!(a, b);
    }
}
