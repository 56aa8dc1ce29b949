//! Destinations for extracted entries.

use std::io;

use crate::entry::Entry;
use crate::error::Result;

mod folder;
mod paths;

pub use folder::FolderSink;
pub use paths::resolve_entry_path;

/// Default mode for directories the sink creates.
pub const DIR_MODE: u32 = 0o755;
/// Or'd into file modes so extracted files stay usable; the umask trims it.
pub const MODE_MASK: u32 = 0o666;

/// Receives mkdir, symlink, and per-file writer operations from the
/// extractor.
///
/// At most one writer is live at a time: `get_writer` closes the previous
/// one before opening the next.
pub trait Sink {
    /// Idempotent; replaces a non-directory occupant with a directory.
    fn mkdir(&mut self, entry: &Entry) -> Result<()>;

    /// Idempotent; replaces whatever occupies the path. The target is raw
    /// bytes: on Unix link targets need not be valid UTF-8.
    fn symlink(&mut self, entry: &Entry, target: &[u8]) -> Result<()>;

    /// Open (or reopen) the entry's backing file, positioned at
    /// `entry.write_offset` with any stale tail truncated away.
    fn get_writer(&mut self, entry: &Entry) -> Result<&mut dyn EntryWriter>;

    /// Size hint; best effort, never required for correctness.
    fn preallocate(&mut self, entry: &Entry) -> Result<()>;

    /// Remove everything produced so far.
    fn nuke(&mut self) -> Result<()>;

    /// Close the currently open writer, if any.
    fn close(&mut self) -> Result<()>;
}

/// Byte sink for one entry's contents.
pub trait EntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Flush written bytes to stable storage; called before a checkpoint is
    /// delivered so the checkpoint's write offset is honest.
    fn sync(&mut self) -> io::Result<()>;

    /// Release the backing handle. Closing twice is fine; writes after
    /// close fail.
    fn close(&mut self) -> io::Result<()>;
}
