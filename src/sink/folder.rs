use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::sink::paths::{is_ignored, resolve_entry_path};
use crate::sink::{EntryWriter, Sink, DIR_MODE, MODE_MASK};

/// Forces the portable zero-fill preallocation path even where native
/// allocation is available.
#[cfg(target_os = "linux")]
static LEGACY_PREALLOCATE: Lazy<bool> =
    Lazy::new(|| std::env::var_os("RIPCORD_LEGACY_PREALLOCATE").is_some_and(|v| v == "1"));

/// Filesystem sink rooted at a destination directory.
///
/// Canonical entry paths are mapped beneath the destination with traversal
/// refused. Finder-icon entries are ignored wholesale. The sink keeps the
/// one live writer, closing it whenever the next one opens.
pub struct FolderSink {
    dir: PathBuf,
    writer: Option<Box<dyn EntryWriter>>,
}

impl FolderSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writer: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dest_path(&self, entry: &Entry) -> Result<PathBuf> {
        resolve_entry_path(&self.dir, &entry.canonical_path)
    }

    fn create_file(&self, entry: &Entry) -> Result<File> {
        let path = self.dest_path(entry)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| sink_err(parent, e))?;
        }

        let existing = fs::symlink_metadata(&path).ok();
        if let Some(meta) = &existing {
            if meta.file_type().is_symlink() || meta.is_dir() {
                remove_occupant(&path)?;
            }
        }

        let mut open = OpenOptions::new();
        open.create(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode((entry.mode & 0o777) | MODE_MASK);
        }
        let file = open.open(&path).map_err(|e| sink_err(&path, e))?;

        #[cfg(unix)]
        if existing.is_some() {
            // the open mode only applies to newly created files
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode((entry.mode & 0o777) | MODE_MASK);
            file.set_permissions(perms).map_err(|e| sink_err(&path, e))?;
        }

        Ok(file)
    }

    fn zero_fill(file: &mut File, size: u64) -> io::Result<()> {
        let end = file.seek(SeekFrom::End(0))?;
        let mut left = size.saturating_sub(end);
        let zeros = [0u8; 16 * 1024];
        while left > 0 {
            let n = zeros.len().min(left as usize);
            file.write_all(&zeros[..n])?;
            left -= n as u64;
        }
        Ok(())
    }
}

impl Sink for FolderSink {
    fn mkdir(&mut self, entry: &Entry) -> Result<()> {
        if is_ignored(&entry.canonical_path) {
            return Ok(());
        }
        let path = self.dest_path(entry)?;

        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => return Ok(()),
            Ok(_) => remove_occupant(&path)?,
            Err(_) => {}
        }
        make_dir_all(&path)
    }

    fn symlink(&mut self, entry: &Entry, target: &[u8]) -> Result<()> {
        if is_ignored(&entry.canonical_path) {
            return Ok(());
        }
        let path = self.dest_path(entry)?;

        if fs::symlink_metadata(&path).is_ok() {
            remove_occupant(&path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| sink_err(parent, e))?;
        }

        #[cfg(unix)]
        {
            // targets are arbitrary bytes, not necessarily UTF-8
            use std::os::unix::ffi::OsStrExt;
            let target = std::ffi::OsStr::from_bytes(target);
            std::os::unix::fs::symlink(target, &path).map_err(|e| sink_err(&path, e))?;
        }
        #[cfg(not(unix))]
        {
            // no native symlinks: flatten the link into a file holding the
            // target as text; re-extraction just rewrites it
            let text = String::from_utf8_lossy(target);
            fs::write(&path, text.as_bytes()).map_err(|e| sink_err(&path, e))?;
        }
        Ok(())
    }

    fn get_writer(&mut self, entry: &Entry) -> Result<&mut dyn EntryWriter> {
        // single-writer invariant: close the previous one first
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.close() {
                warn!("could not close previous writer: {e}");
            }
        }

        let boxed: Box<dyn EntryWriter> = if is_ignored(&entry.canonical_path) {
            Box::new(NopEntryWriter)
        } else {
            let mut file = self.create_file(entry)?;
            let path = self.dest_path(entry)?;
            if entry.write_offset > 0 {
                file.seek(SeekFrom::Start(entry.write_offset))
                    .map_err(|e| sink_err(&path, e))?;
            }
            // resumed writes overwrite nothing and leave no stale tail
            file.set_len(entry.write_offset)
                .map_err(|e| sink_err(&path, e))?;
            Box::new(FileEntryWriter { file: Some(file) })
        };

        Ok(&mut **self.writer.insert(boxed))
    }

    fn preallocate(&mut self, entry: &Entry) -> Result<()> {
        if is_ignored(&entry.canonical_path) || entry.uncompressed_size == 0 {
            return Ok(());
        }
        let mut file = self.create_file(entry)?;

        #[cfg(target_os = "linux")]
        if !*LEGACY_PREALLOCATE {
            if let Err(e) = rustix::fs::fallocate(
                &file,
                rustix::fs::FallocateFlags::empty(),
                0,
                entry.uncompressed_size,
            ) {
                debug!(
                    "fallocate of {} bytes for '{}' declined: {}",
                    entry.uncompressed_size, entry.canonical_path, e
                );
            }
            return Ok(());
        }

        if let Err(e) = Self::zero_fill(&mut file, entry.uncompressed_size) {
            debug!(
                "zero-fill preallocation for '{}' declined: {}",
                entry.canonical_path, e
            );
        }
        Ok(())
    }

    fn nuke(&mut self) -> Result<()> {
        self.close()?;
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(sink_err(&self.dir, e)),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.close().map_err(Error::from),
            None => Ok(()),
        }
    }
}

fn sink_err(path: &Path, source: io::Error) -> Error {
    Error::Sink {
        path: path.to_path_buf(),
        source,
    }
}

fn remove_occupant(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(_) => return Ok(()),
    };
    result.map_err(|e| sink_err(path, e))
}

fn make_dir_all(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    builder.create(path).map_err(|e| sink_err(path, e))
}

struct FileEntryWriter {
    file: Option<File>,
}

impl FileEntryWriter {
    fn open_file(&mut self) -> io::Result<&mut File> {
        self.file.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "entry writer already closed")
        })
    }
}

impl EntryWriter for FileEntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.open_file()?.write(buf)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.open_file()?.sync_all()
    }

    fn close(&mut self) -> io::Result<()> {
        // dropping the handle closes it; a second close is a no-op
        self.file = None;
        Ok(())
    }
}

/// Swallows writes for ignored entries.
struct NopEntryWriter;

impl EntryWriter for NopEntryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;

    fn file_entry(path: &str, size: u64) -> Entry {
        let mut entry = Entry::new(path, EntryKind::File);
        entry.mode = 0o644;
        entry.uncompressed_size = size;
        entry
    }

    #[test]
    fn mkdir_is_idempotent_and_replaces_files() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());
        let entry = Entry::new("sub/dir", EntryKind::Dir);

        sink.mkdir(&entry).unwrap();
        sink.mkdir(&entry).unwrap();
        assert!(tmp.path().join("sub/dir").is_dir());

        // a file squatting on the path gets replaced
        fs::remove_dir_all(tmp.path().join("sub/dir")).unwrap();
        fs::write(tmp.path().join("sub/dir"), b"squatter").unwrap();
        sink.mkdir(&entry).unwrap();
        assert!(tmp.path().join("sub/dir").is_dir());
    }

    #[test]
    fn writer_truncates_stale_tail_on_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());

        let mut entry = file_entry("data.bin", 10);
        {
            let writer = sink.get_writer(&entry).unwrap();
            writer.write(b"0123456789").unwrap();
        }

        // reopen at offset 4: bytes 4.. must be gone before new writes land
        entry.write_offset = 4;
        {
            let writer = sink.get_writer(&entry).unwrap();
            writer.write(b"AB").unwrap();
            writer.sync().unwrap();
        }
        sink.close().unwrap();

        let content = fs::read(tmp.path().join("data.bin")).unwrap();
        assert_eq!(content, b"0123AB");
    }

    #[cfg(unix)]
    #[test]
    fn writer_replaces_symlink_occupant() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());

        std::os::unix::fs::symlink("/etc/hosts", tmp.path().join("f")).unwrap();
        let entry = file_entry("f", 2);
        let writer = sink.get_writer(&entry).unwrap();
        writer.write(b"ok").unwrap();
        sink.close().unwrap();

        let meta = fs::symlink_metadata(tmp.path().join("f")).unwrap();
        assert!(meta.is_file());
        assert_eq!(fs::read(tmp.path().join("f")).unwrap(), b"ok");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());
        let entry = Entry::new("link", EntryKind::Symlink);

        sink.symlink(&entry, b"target-one").unwrap();
        sink.symlink(&entry, b"target-two").unwrap();

        let target = fs::read_link(tmp.path().join("link")).unwrap();
        assert_eq!(target, Path::new("target-two"));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_target_bytes_survive_verbatim() {
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());
        let entry = Entry::new("weird", EntryKind::Symlink);

        let target = b"dir/\xFF\xFEname";
        sink.symlink(&entry, target).unwrap();

        let read_back = fs::read_link(tmp.path().join("weird")).unwrap();
        assert_eq!(read_back.as_os_str().as_bytes(), target);
    }

    #[test]
    fn closed_writer_rejects_further_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());

        let entry = file_entry("once.bin", 2);
        let writer = sink.get_writer(&entry).unwrap();
        writer.write(b"ok").unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(writer.write(b"more").is_err());
        assert!(writer.sync().is_err());

        assert_eq!(fs::read(tmp.path().join("once.bin")).unwrap(), b"ok");
    }

    #[test]
    fn finder_icons_produce_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());

        let entry = file_entry("assets/Icon\r", 4);
        let writer = sink.get_writer(&entry).unwrap();
        writer.write(b"junk").unwrap();
        sink.close().unwrap();

        assert!(!tmp.path().join("assets").exists());
    }

    #[test]
    fn preallocate_then_write_keeps_final_size() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());

        let entry = file_entry("big.bin", 4096);
        sink.preallocate(&entry).unwrap();

        let writer = sink.get_writer(&entry).unwrap();
        writer.write(&[9u8; 4096]).unwrap();
        sink.close().unwrap();

        let meta = fs::metadata(tmp.path().join("big.bin")).unwrap();
        assert_eq!(meta.len(), 4096);
        assert_eq!(fs::read(tmp.path().join("big.bin")).unwrap(), [9u8; 4096]);
    }

    #[test]
    fn nuke_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out");
        let mut sink = FolderSink::new(&dest);

        let entry = file_entry("a/b/c.txt", 1);
        let writer = sink.get_writer(&entry).unwrap();
        writer.write(b"x").unwrap();

        sink.nuke().unwrap();
        assert!(!dest.exists());
        // nuking twice is fine
        sink.nuke().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn executable_mode_bits_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FolderSink::new(tmp.path());

        let mut entry = file_entry("bin/run.sh", 2);
        entry.mode = 0o755;
        let writer = sink.get_writer(&entry).unwrap();
        writer.write(b"#!").unwrap();
        sink.close().unwrap();

        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(tmp.path().join("bin/run.sh"))
            .unwrap()
            .permissions()
            .mode();
        assert_ne!(mode & 0o111, 0, "exec bit lost: {:o}", mode);
    }
}
