//! Resumable archive extraction.
//!
//! Streams entries out of a ZIP archive into a sink, and can suspend at
//! arbitrary progress points: a small serializable checkpoint captures where
//! extraction stands, down to the deflate decoder's state at a block
//! boundary, and a later run resumes from it with bit-identical output.
//!
//! # Architecture
//!
//! - `reader.rs` - position-independent archive reads
//! - `source/` - byte sources with save/resume (`SeekSource`, `FlateSource`)
//! - `copy.rs` - the inner copy loop polling the save consumer
//! - `sink/` - destination contract and the filesystem sink
//! - `extract/` - the per-archive driver
//! - `checkpoint.rs` - serializable resume state
//!
//! # Example
//!
//! ```no_run
//! use ripcord::{FolderSink, ZipExtractor};
//!
//! # fn main() -> ripcord::Result<()> {
//! let file = std::fs::File::open("archive.zip")?;
//! let size = file.metadata()?.len();
//! let sink = FolderSink::new("out");
//!
//! let mut extractor = ZipExtractor::new(file, size, sink);
//! extractor.resume(None)?; // fresh run; pass a checkpoint to continue one
//! # Ok(())
//! # }
//! ```

pub use checkpoint::{ExtractorCheckpoint, FlateState, SourceCheckpoint, SourceState};
pub use copy::{copy_with_saver, AfterSave, CopyOutcome, NopSaveConsumer, SaveConsumer};
pub use entry::{Entry, EntryKind};
pub use error::{Error, Result};
pub use extract::ZipExtractor;
pub use options::{ExtractOptions, DEFAULT_FLATE_THRESHOLD};
pub use reader::{ReadAt, ReadAtCursor};
pub use sink::{EntryWriter, FolderSink, Sink};
pub use source::{discard, FlateSource, SeekSource, Source};

pub mod checkpoint;
mod copy;
pub mod entry;
mod error;
pub mod extract;
pub mod options;
pub mod reader;
pub mod sink;
pub mod source;
