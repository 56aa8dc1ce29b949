use std::io::Read;

use log::debug;
use zip::CompressionMethod;

use crate::checkpoint::ExtractorCheckpoint;
use crate::copy::{copy_with_saver, CopyOutcome, NopSaveConsumer, SaveConsumer};
use crate::entry::{Entry, EntryKind};
use crate::error::{Error, Result};
use crate::options::ExtractOptions;
use crate::reader::{ReadAt, ReadAtCursor};
use crate::sink::Sink;
use crate::source::{discard, FlateSource, SeekSource, Source};

const SYMLINK_MODE_BITS: u32 = 0o170000;
const SYMLINK_MODE: u32 = 0o120000;

/// Resumable ZIP extractor.
///
/// Walks the archive's entries in order, streaming each into the sink.
/// Whenever the save consumer asks for a checkpoint at a safe point, the
/// current [`ExtractorCheckpoint`] is handed over; a later call to
/// [`resume`](Self::resume) with that checkpoint continues bit-identically
/// from where extraction stopped.
pub struct ZipExtractor<A: ReadAt, K: Sink> {
    reader: A,
    size: u64,
    sink: K,
    save_consumer: Box<dyn SaveConsumer>,
    options: ExtractOptions,
}

struct EntryRecord {
    entry: Entry,
    method: CompressionMethod,
    data_start: u64,
}

impl<A: ReadAt, K: Sink> ZipExtractor<A, K> {
    pub fn new(reader: A, size: u64, sink: K) -> Self {
        Self {
            reader,
            size,
            sink,
            save_consumer: Box::new(NopSaveConsumer),
            options: ExtractOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_save_consumer(&mut self, save_consumer: Box<dyn SaveConsumer>) {
        self.save_consumer = save_consumer;
    }

    /// Extract, starting fresh (`None`) or from a previously delivered
    /// checkpoint.
    ///
    /// Returns `Ok(())` on completion, [`Error::Stopped`] when the consumer
    /// asked to stop (the checkpoint it last received is the resume point),
    /// or the underlying failure otherwise.
    pub fn resume(&mut self, checkpoint: Option<ExtractorCheckpoint>) -> Result<()> {
        let result = self.run(checkpoint);
        // the current writer is closed whichever way the run ended
        let close_result = self.sink.close();
        result?;
        close_result
    }

    fn run(&mut self, checkpoint: Option<ExtractorCheckpoint>) -> Result<()> {
        let ZipExtractor {
            reader,
            size,
            sink,
            save_consumer,
            options,
        } = self;

        let mut archive = zip::ZipArchive::new(ReadAtCursor::new(&*reader, *size))?;
        let mut checkpoint = checkpoint.unwrap_or_default();
        let num_entries = archive.len() as u64;

        while checkpoint.entry_index < num_entries {
            let index = checkpoint.entry_index;

            let record = {
                let zf = archive.by_index_raw(index as usize)?;
                let is_dir = zf.is_dir();
                let unix_mode = zf.unix_mode();
                let kind = if is_dir {
                    EntryKind::Dir
                } else if unix_mode.is_some_and(|m| m & SYMLINK_MODE_BITS == SYMLINK_MODE) {
                    EntryKind::Symlink
                } else {
                    EntryKind::File
                };
                let mut entry = Entry::new(zf.name().replace('\\', "/"), kind);
                entry.mode = unix_mode.unwrap_or(if is_dir { 0o755 } else { 0o644 });
                entry.compressed_size = zf.compressed_size();
                entry.uncompressed_size = zf.size();
                EntryRecord {
                    entry,
                    method: zf.compression(),
                    data_start: zf.data_start(),
                }
            };

            // a checkpointed entry carries its own partial progress; use it
            // verbatim
            let mut entry = match checkpoint.entry.take() {
                Some(entry) => entry,
                None => record.entry,
            };
            let source_checkpoint = checkpoint.source_checkpoint.take();
            debug!(
                "entry {} '{}' ({:?}, write offset {})",
                index, entry.canonical_path, entry.kind, entry.write_offset
            );

            match entry.kind {
                EntryKind::Dir => sink.mkdir(&entry)?,
                EntryKind::Symlink => {
                    // symlinks are atomic: read the whole target, no
                    // mid-entry checkpoints
                    let mut zf = archive.by_index(index as usize)?;
                    let mut target = Vec::new();
                    zf.read_to_end(&mut target)?;
                    drop(zf);
                    sink.symlink(&entry, &target)?;
                }
                EntryKind::File => match record.method {
                    CompressionMethod::Stored | CompressionMethod::Deflated => {
                        let raw =
                            SeekSource::section(&*reader, record.data_start, entry.compressed_size);
                        let mut src: Box<dyn Source + '_> =
                            if record.method == CompressionMethod::Stored {
                                Box::new(raw)
                            } else {
                                Box::new(
                                    FlateSource::new(raw, entry.compressed_size)
                                        .with_threshold(options.flate_threshold),
                                )
                            };

                        let offset = src.resume(source_checkpoint.as_ref())?;
                        if offset < entry.write_offset {
                            // the source landed on a block boundary behind
                            // the writer; skip the already-written span
                            let delta = entry.write_offset - offset;
                            debug!(
                                "'{}': discarding {} bytes to align source (at {}) with writer (at {})",
                                entry.canonical_path, delta, offset, entry.write_offset
                            );
                            discard(&mut *src, delta)?;
                        } else if offset > entry.write_offset {
                            return Err(Error::CheckpointMismatch {
                                source_offset: offset,
                                write_offset: entry.write_offset,
                            });
                        }

                        if entry.write_offset == 0 {
                            sink.preallocate(&entry)?;
                        }
                        let writer = sink.get_writer(&entry)?;
                        let outcome = copy_with_saver(
                            &mut *src,
                            writer,
                            &mut entry,
                            index,
                            &mut **save_consumer,
                        )?;
                        if outcome == CopyOutcome::Stopped {
                            return Err(Error::Stopped);
                        }
                    }
                    method => {
                        // not resumable (lzma and friends): plain streaming
                        // copy, save requests never consulted
                        debug!(
                            "'{}': method {:?} is not resumable, copying straight through",
                            entry.canonical_path, method
                        );
                        entry.write_offset = 0;
                        let mut zf = archive.by_index(index as usize)?;
                        let writer = sink.get_writer(&entry)?;
                        let mut buf = vec![0u8; 64 * 1024];
                        loop {
                            let n = zf.read(&mut buf)?;
                            if n == 0 {
                                break;
                            }
                            let mut written = 0;
                            while written < n {
                                let w = writer.write(&buf[written..n])?;
                                if w == 0 {
                                    return Err(std::io::Error::new(
                                        std::io::ErrorKind::WriteZero,
                                        "writer accepted no bytes",
                                    )
                                    .into());
                                }
                                written += w;
                                entry.write_offset += w as u64;
                            }
                        }
                    }
                },
            }

            // between entries: no partial state, next index up
            checkpoint.entry_index += 1;
        }

        Ok(())
    }
}
