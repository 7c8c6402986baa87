//! Packed sample decoding.
//!
//! Two packings are supported:
//!
//! | Mode       | Bytes | Samples | Layout                                   |
//! |------------|-------|---------|------------------------------------------|
//! | `Raw16`    | 2     | 1       | little-endian `u16`                      |
//! | `Packed12` | 3     | 2       | `AB CD EF` → `0xABC`, `0xDEF` (MSB first) |
//!
//! Trailing bytes that cannot form a whole sample are dropped. Decoding never
//! fails: any byte slice maps to a deterministic sample sequence.
//!
//! The `Packed12` nibble order matches the instrument's host-side decoder.
//! A bit-accumulator (LSB-first) variant also exists in the field and yields
//! different values for the same bytes; check a real capture before trusting
//! absolute readings.

use serde::{Deserialize, Serialize};

use crate::buffering::{RawFrame, SampleBlock};

/// Bit-level layout of samples inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackingMode {
    /// Two bytes per sample, little-endian, no bit packing.
    Raw16,
    /// Three bytes carry two 12-bit samples.
    Packed12,
}

impl PackingMode {
    pub fn bits_per_sample(self) -> usize {
        match self {
            PackingMode::Raw16 => 16,
            PackingMode::Packed12 => 12,
        }
    }

    /// Largest value a sample can take in this mode.
    pub fn max_sample(self) -> u16 {
        match self {
            PackingMode::Raw16 => u16::MAX,
            PackingMode::Packed12 => 0x0FFF,
        }
    }

    /// Number of whole samples contained in `byte_len` bytes.
    pub fn samples_in(self, byte_len: usize) -> usize {
        match self {
            PackingMode::Raw16 => byte_len / 2,
            PackingMode::Packed12 => (byte_len / 3) * 2,
        }
    }

    /// Bytes needed to encode `samples` samples.
    pub fn bytes_for(self, samples: usize) -> usize {
        match self {
            PackingMode::Raw16 => samples * 2,
            PackingMode::Packed12 => samples.div_ceil(2) * 3,
        }
    }
}

impl std::fmt::Display for PackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackingMode::Raw16 => f.write_str("raw16"),
            PackingMode::Packed12 => f.write_str("packed12"),
        }
    }
}

impl std::str::FromStr for PackingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw16" | "16" => Ok(PackingMode::Raw16),
            "packed12" | "12" => Ok(PackingMode::Packed12),
            other => Err(format!("unknown packing mode: {other}")),
        }
    }
}

/// Decode one frame into a sample block carrying the frame's sequence number.
pub fn decode(frame: &RawFrame, mode: PackingMode) -> SampleBlock {
    let mut samples = Vec::with_capacity(mode.samples_in(frame.len()));
    decode_into(frame.bytes(), mode, &mut samples);
    SampleBlock::new(frame.seq(), mode, samples)
}

/// Append the samples encoded in `bytes` to `out`.
///
/// Reserves the exact number of samples up front, so a caller that reuses
/// `out` across frames allocates at most once per size increase.
pub fn decode_into(bytes: &[u8], mode: PackingMode, out: &mut Vec<u16>) {
    out.reserve(mode.samples_in(bytes.len()));
    match mode {
        PackingMode::Raw16 => out.extend(
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
        ),
        PackingMode::Packed12 => {
            for t in bytes.chunks_exact(3) {
                let (b0, b1, b2) = (u16::from(t[0]), u16::from(t[1]), u16::from(t[2]));
                out.push((b0 << 4) | (b1 >> 4));
                out.push(((b1 & 0x0F) << 8) | b2);
            }
        }
    }
}

/// Encode samples as little-endian `u16` pairs.
pub fn encode_raw16(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Encode samples with the `Packed12` layout.
///
/// Only the low 12 bits of each sample are kept. An odd trailing sample is
/// padded with a zero partner so the output is always whole triplets.
pub fn encode_packed12(samples: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PackingMode::Packed12.bytes_for(samples.len()));
    for pair in samples.chunks(2) {
        let s0 = pair[0] & 0x0FFF;
        let s1 = pair.get(1).copied().unwrap_or(0) & 0x0FFF;
        out.push((s0 >> 4) as u8);
        out.push((((s0 & 0x0F) << 4) | (s1 >> 8)) as u8);
        out.push((s1 & 0xFF) as u8);
    }
    out
}

/// Encode with whichever layout `mode` names.
pub fn encode(samples: &[u16], mode: PackingMode) -> Vec<u8> {
    match mode {
        PackingMode::Raw16 => encode_raw16(samples),
        PackingMode::Packed12 => encode_packed12(samples),
    }
}
