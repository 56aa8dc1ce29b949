use serde::{Deserialize, Serialize};

/// One archive member as the extractor sees it.
///
/// `write_offset` is the count of uncompressed bytes already committed to the
/// sink for this entry; it travels inside checkpoints so a resumed extraction
/// knows where the writer left off.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Forward-slash separated relative path, as stored in the archive.
    pub canonical_path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub write_offset: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
}

impl Entry {
    pub fn new(canonical_path: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            canonical_path: canonical_path.into(),
            kind,
            mode: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            write_offset: 0,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }
}
