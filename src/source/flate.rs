use log::debug;

use crate::checkpoint::{SourceCheckpoint, SourceState};
use crate::error::{Error, Result};
use crate::options::DEFAULT_FLATE_THRESHOLD;
use crate::source::inflate::Inflater;
use crate::source::Source;

/// Deflate-decoding source that can snapshot its decoder at block
/// boundaries.
///
/// Entries whose compressed payload is smaller than the flate threshold are
/// decoded straight through: [`save`](Source::save) answers `Ok(None)` and
/// reads never pause, because re-extracting a small entry is cheaper than
/// checkpointing it. At or above the threshold, reads return short at each
/// completed deflate block so the enclosing copy loop polls `save` exactly
/// where a checkpoint is legal.
pub struct FlateSource<S: Source> {
    inner: S,
    inflater: Inflater,
    compressed_size: u64,
    threshold: u64,
    offset: u64,
    initialized: bool,
}

impl<S: Source> FlateSource<S> {
    pub fn new(inner: S, compressed_size: u64) -> Self {
        Self {
            inner,
            inflater: Inflater::new(),
            compressed_size,
            threshold: DEFAULT_FLATE_THRESHOLD,
            offset: 0,
            initialized: false,
        }
    }

    /// Minimum compressed size at which checkpoints are offered.
    pub fn with_threshold(mut self, bytes: u64) -> Self {
        self.threshold = bytes;
        self
    }

    fn checkpoints_enabled(&self) -> bool {
        self.compressed_size >= self.threshold
    }
}

impl<S: Source> Source for FlateSource<S> {
    fn resume(&mut self, checkpoint: Option<&SourceCheckpoint>) -> Result<u64> {
        match checkpoint {
            None => {
                self.inner.resume(None)?;
                self.inflater = Inflater::new();
                self.offset = 0;
            }
            Some(cp) => {
                let SourceState::Flate(state) = &cp.state else {
                    return Err(Error::Checkpoint(
                        "deflate source handed a non-deflate checkpoint".into(),
                    ));
                };
                self.inner
                    .resume(Some(&SourceCheckpoint::at_offset(state.input_offset)))?;
                self.inflater = Inflater::restore(state)?;
                self.offset = cp.offset;
                debug!(
                    "flate source resumed at uncompressed {} (input byte {}, {} residual bits)",
                    cp.offset, state.input_offset, state.residual_count
                );
            }
        }
        self.initialized = true;
        Ok(self.offset)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.initialized {
            return Err(Error::UninitializedSource);
        }
        let checkpoints_enabled = self.checkpoints_enabled();
        let n = self
            .inflater
            .read(&mut self.inner, buf, checkpoints_enabled)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn save(&mut self) -> Result<Option<SourceCheckpoint>> {
        if !self.checkpoints_enabled() || !self.inflater.at_boundary() {
            return Ok(None);
        }
        let state = self.inflater.snapshot();
        debug!(
            "flate checkpoint at uncompressed {} (input byte {})",
            self.offset, state.input_offset
        );
        Ok(Some(SourceCheckpoint {
            offset: self.offset,
            state: SourceState::Flate(state),
        }))
    }

    fn progress(&self) -> f64 {
        self.inner.progress()
    }
}
