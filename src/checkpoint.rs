use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::error::{Error, Result};

/// Snapshot of a byte source, produced by [`Source::save`](crate::Source::save).
///
/// `offset` is the position in the stream the source hands to its caller: the
/// raw position for a seek source, the uncompressed position for a deflate
/// source. Resuming from a checkpoint and reading N bytes yields the same
/// bytes the original source produced from `offset` to `offset + N`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCheckpoint {
    pub offset: u64,
    pub state: SourceState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceState {
    /// Position alone is enough to resume.
    Seek,
    /// Deflate decoder snapshot taken at a block boundary.
    Flate(FlateState),
}

/// Decoder state captured at a deflate block boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlateState {
    /// Byte position in the compressed stream, with any buffered-but-unconsumed
    /// input bits rewound. Resuming replays exactly those bits.
    pub input_offset: u64,
    /// Number of still-unconsumed bits (0..=7) of the byte at `input_offset - 1`.
    pub residual_count: u8,
    /// The unconsumed bits themselves, low bits first.
    pub residual_bits: u8,
    /// Whether the block that just ended carried the final-block flag.
    pub final_block: bool,
    /// Up to 32 KiB of most recent output, oldest first; the preload dictionary.
    pub window: Vec<u8>,
}

impl SourceCheckpoint {
    pub fn at_offset(offset: u64) -> Self {
        Self {
            offset,
            state: SourceState::Seek,
        }
    }
}

/// Top-level resumable state for an extraction.
///
/// Between entries `entry` and `source_checkpoint` are both `None` and
/// `entry_index` names the next entry to process. While an entry is in
/// flight, `entry` carries its partial progress and, for resumable methods,
/// `source_checkpoint` the matching source snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractorCheckpoint {
    pub entry_index: u64,
    pub entry: Option<Entry>,
    pub source_checkpoint: Option<SourceCheckpoint>,
}

impl ExtractorCheckpoint {
    /// Serialize to the stable binary encoding.
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| Error::Checkpoint(e.to_string()))
    }

    /// Deserialize a blob produced by [`encode`](Self::encode).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(buf).map_err(|e| Error::Checkpoint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    #[test]
    fn encode_decode_round_trip() {
        let mut entry = Entry::new("dir/data.bin", EntryKind::File);
        entry.uncompressed_size = 4096;
        entry.write_offset = 1024;

        let checkpoint = ExtractorCheckpoint {
            entry_index: 7,
            entry: Some(entry),
            source_checkpoint: Some(SourceCheckpoint {
                offset: 1024,
                state: SourceState::Flate(FlateState {
                    input_offset: 300,
                    residual_count: 5,
                    residual_bits: 0b10110,
                    final_block: false,
                    window: vec![0xAB; 1024],
                }),
            }),
        };

        let blob = checkpoint.encode().unwrap();
        let back = ExtractorCheckpoint::decode(&blob).unwrap();
        assert_eq!(back, checkpoint);
    }

    #[test]
    fn default_starts_at_first_entry() {
        let checkpoint = ExtractorCheckpoint::default();
        assert_eq!(checkpoint.entry_index, 0);
        assert!(checkpoint.entry.is_none());
        assert!(checkpoint.source_checkpoint.is_none());
    }

    #[test]
    fn garbage_blob_is_rejected() {
        assert!(matches!(
            ExtractorCheckpoint::decode(b"\xFF\xFF\xFFnot a checkpoint"),
            Err(Error::Checkpoint(_))
        ));
    }
}
