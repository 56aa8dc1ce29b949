//! The inner data mover: shuttles bytes from a source to an entry writer
//! while polling the save consumer at safe points.

use log::debug;

use crate::checkpoint::ExtractorCheckpoint;
use crate::entry::Entry;
use crate::error::Result;
use crate::sink::EntryWriter;
use crate::source::Source;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Policy object asked at safe points whether to checkpoint and whether to
/// keep going afterwards.
///
/// `should_save` is a cheap poll made after every chunk. When it answers
/// `true` and the source can actually produce a checkpoint, the writer is
/// synced, the checkpoint is handed to `save`, and extraction continues or
/// stops according to the reply.
pub trait SaveConsumer {
    fn should_save(&mut self) -> bool;
    fn save(&mut self, checkpoint: ExtractorCheckpoint) -> AfterSave;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfterSave {
    Continue,
    Stop,
}

/// Consumer that never asks for a checkpoint.
#[derive(Default)]
pub struct NopSaveConsumer;

impl SaveConsumer for NopSaveConsumer {
    fn should_save(&mut self) -> bool {
        false
    }

    fn save(&mut self, _checkpoint: ExtractorCheckpoint) -> AfterSave {
        AfterSave::Continue
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Source reached end of stream; the entry is fully written.
    Done,
    /// The consumer took a checkpoint and asked to stop.
    Stopped,
}

/// Copy `src` into `dst` until EOF or a stop request.
///
/// `entry.write_offset` advances with every successfully written chunk, so a
/// checkpoint assembled here always describes bytes that are already with
/// the writer; the `dst.sync()` preceding delivery makes them durable first.
pub fn copy_with_saver(
    src: &mut dyn Source,
    dst: &mut dyn EntryWriter,
    entry: &mut Entry,
    entry_index: u64,
    save_consumer: &mut dyn SaveConsumer,
) -> Result<CopyOutcome> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = src.read(&mut buf)?;
        if n == 0 {
            return Ok(CopyOutcome::Done);
        }

        let mut written = 0;
        while written < n {
            let w = dst.write(&buf[written..n])?;
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

        if !save_consumer.should_save() {
            continue;
        }
        let Some(source_checkpoint) = src.save()? else {
            // no legal save point here; try again next chunk
            continue;
        };
        dst.sync()?;

        let checkpoint = ExtractorCheckpoint {
            entry_index,
            entry: Some(entry.clone()),
            source_checkpoint: Some(source_checkpoint),
        };
        debug!(
            "offering checkpoint: entry {} at write offset {}",
            entry_index, entry.write_offset
        );
        if save_consumer.save(checkpoint) == AfterSave::Stop {
            return Ok(CopyOutcome::Stopped);
        }
    }
}
