//! Typed units of work passed between pipeline stages.

use crate::codec::PackingMode;

/// One chunk of bytes as read from the transport.
///
/// For TCP this is exactly `frame_size` bytes; for UDP it is one datagram.
/// The bytes are never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Zero-based index of this frame within the current connection.
    seq: u64,
    bytes: Vec<u8>,
}

impl RawFrame {
    pub fn new(seq: u64, bytes: Vec<u8>) -> Self {
        Self { seq, bytes }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded samples of one [`RawFrame`], in intra-frame order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleBlock {
    /// Sequence number of the source frame.
    pub seq: u64,
    /// Packing mode the samples were decoded with.
    pub mode: PackingMode,
    /// Unsigned samples: `[0, 4095]` for `Packed12`, `[0, 65535]` for `Raw16`.
    pub samples: Vec<u16>,
}

impl SampleBlock {
    pub fn new(seq: u64, mode: PackingMode, samples: Vec<u16>) -> Self {
        Self { seq, mode, samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Smallest and largest sample, or `None` for an empty block.
    pub fn min_max(&self) -> Option<(u16, u16)> {
        let first = *self.samples.first()?;
        Some(
            self.samples
                .iter()
                .fold((first, first), |(lo, hi), &s| (lo.min(s), hi.max(s))),
        )
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_max_and_mean() {
        let block = SampleBlock::new(0, PackingMode::Packed12, vec![10, 4095, 0, 5]);
        assert_eq!(block.min_max(), Some((0, 4095)));
        assert_eq!(block.mean(), Some(4110.0 / 4.0));
    }

    #[test]
    fn empty_block_has_no_stats() {
        let block = SampleBlock::new(3, PackingMode::Raw16, vec![]);
        assert!(block.is_empty());
        assert_eq!(block.min_max(), None);
        assert_eq!(block.mean(), None);
    }
}
