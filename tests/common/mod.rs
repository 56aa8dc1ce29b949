//! Shared helpers: archive builders, deterministic semirandom data, save
//! policies, and extracted-tree comparison.
#![allow(dead_code)] // each test binary uses its own subset

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use ripcord::{AfterSave, ExtractorCheckpoint, SaveConsumer};

/// Deterministic bytes that compress somewhat but not trivially: an LCG
/// stream with periodic repeated phrases so deflate finds back-references.
pub fn semirandom(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    let phrase = b"all work and no play makes jack a dull boy. ";
    while out.len() < len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        if state % 5 == 0 {
            let take = phrase.len().min(len - out.len());
            out.extend_from_slice(&phrase[..take]);
        } else {
            out.push((state >> 33) as u8);
        }
    }
    out
}

/// What the extracted tree should look like.
#[derive(Clone)]
pub enum Expected {
    File(Vec<u8>),
    Dir,
    Symlink(String),
}

pub struct ArchiveSpec {
    pub bytes: Vec<u8>,
    pub expected: Vec<(String, Expected)>,
}

pub struct EntrySpec {
    pub name: &'static str,
    pub size: usize,
    pub method: CompressionMethod,
}

/// Build an in-memory ZIP from entry specs plus a directory and a symlink.
pub fn build_archive(files: &[EntrySpec]) -> ArchiveSpec {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut expected = Vec::new();

    let dir_opts = SimpleFileOptions::default().unix_permissions(0o755);
    writer.add_directory("nested/dir/", dir_opts).unwrap();
    expected.push(("nested/dir".to_string(), Expected::Dir));

    for (i, spec) in files.iter().enumerate() {
        let data = semirandom(spec.size)
            .iter()
            .map(|b| b.wrapping_add(i as u8))
            .collect::<Vec<u8>>();
        let opts = SimpleFileOptions::default()
            .compression_method(spec.method)
            .unix_permissions(if i % 7 == 0 { 0o755 } else { 0o644 });
        writer.start_file(spec.name, opts).unwrap();
        writer.write_all(&data).unwrap();
        expected.push((spec.name.to_string(), Expected::File(data)));
    }

    let link_opts = SimpleFileOptions::default();
    writer.add_symlink("nested/link", "dir", link_opts).unwrap();
    expected.push(("nested/link".to_string(), Expected::Symlink("dir".to_string())));

    let bytes = writer.finish().unwrap().into_inner();
    ArchiveSpec { bytes, expected }
}

/// The forty-entry archive the end-to-end scenarios share: sizes from zero
/// bytes to 8 MiB, stored and deflated, plus a directory and a symlink.
pub fn diverse_archive() -> ArchiveSpec {
    const NAMES: [&str; 38] = [
        "empty.bin",
        "one.bin",
        "a/tiny.bin",
        "a/small-0.bin",
        "a/small-1.bin",
        "a/small-2.bin",
        "a/small-3.bin",
        "a/small-4.bin",
        "a/small-5.bin",
        "a/small-6.bin",
        "a/small-7.bin",
        "b/medium-0.bin",
        "b/medium-1.bin",
        "b/medium-2.bin",
        "b/medium-3.bin",
        "b/medium-4.bin",
        "b/medium-5.bin",
        "b/medium-6.bin",
        "b/medium-7.bin",
        "b/medium-8.bin",
        "b/medium-9.bin",
        "c/stored-0.bin",
        "c/stored-1.bin",
        "c/stored-2.bin",
        "c/stored-3.bin",
        "c/stored-4.bin",
        "c/stored-5.bin",
        "c/stored-6.bin",
        "c/stored-7.bin",
        "c/stored-8.bin",
        "c/stored-9.bin",
        "d/large-deflate.bin",
        "d/large-stored.bin",
        "d/huge-deflate.bin",
        "e/exec.sh",
        "e/text-0.txt",
        "e/text-1.txt",
        "e/text-2.txt",
    ];

    let mut specs = Vec::new();
    for (i, name) in NAMES.iter().enumerate() {
        let (size, method) = match *name {
            "empty.bin" => (0, CompressionMethod::Deflated),
            "one.bin" => (1, CompressionMethod::Deflated),
            "d/large-deflate.bin" => (1024 * 1024, CompressionMethod::Deflated),
            "d/large-stored.bin" => (1024 * 1024, CompressionMethod::Stored),
            "d/huge-deflate.bin" => (8 * 1024 * 1024, CompressionMethod::Deflated),
            n if n.starts_with("a/") => (17 + i * 13, CompressionMethod::Deflated),
            n if n.starts_with("b/") => (4096 + i * 311, CompressionMethod::Deflated),
            n if n.starts_with("c/") => (2048 + i * 97, CompressionMethod::Stored),
            _ => (1000 + i * 41, CompressionMethod::Deflated),
        };
        specs.push(EntrySpec {
            name,
            size,
            method,
        });
    }
    build_archive(&specs)
}

/// Assert the extracted tree matches the archive's expectation.
pub fn assert_tree_matches(dest: &Path, expected: &[(String, Expected)]) {
    for (path, expectation) in expected {
        let on_disk = dest.join(path);
        match expectation {
            Expected::File(content) => {
                let actual = std::fs::read(&on_disk)
                    .unwrap_or_else(|e| panic!("missing extracted file {path}: {e}"));
                assert_eq!(
                    actual.len(),
                    content.len(),
                    "size mismatch for {path}"
                );
                assert!(actual == *content, "content mismatch for {path}");
            }
            Expected::Dir => {
                assert!(on_disk.is_dir(), "missing extracted directory {path}");
            }
            Expected::Symlink(target) => {
                #[cfg(unix)]
                {
                    let actual = std::fs::read_link(&on_disk)
                        .unwrap_or_else(|e| panic!("missing extracted symlink {path}: {e}"));
                    assert_eq!(actual, Path::new(target), "target mismatch for {path}");
                }
                #[cfg(not(unix))]
                {
                    let actual = std::fs::read_to_string(&on_disk).unwrap();
                    assert_eq!(&actual, target, "flattened target mismatch for {path}");
                }
            }
        }
    }
}

/// Saves at every opportunity and immediately asks to stop. The delivered
/// checkpoint is parked in `slot` for the next `resume` call.
pub struct StopEveryTime {
    pub slot: Arc<Mutex<Option<ExtractorCheckpoint>>>,
    pub saves: Arc<AtomicUsize>,
}

impl SaveConsumer for StopEveryTime {
    fn should_save(&mut self) -> bool {
        true
    }

    fn save(&mut self, checkpoint: ExtractorCheckpoint) -> AfterSave {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock().unwrap() = Some(checkpoint);
        AfterSave::Stop
    }
}

/// Alternates "save and stop" with "keep going" on successive polls.
pub struct StopEveryOther {
    pub slot: Arc<Mutex<Option<ExtractorCheckpoint>>>,
    pub polls: usize,
}

impl SaveConsumer for StopEveryOther {
    fn should_save(&mut self) -> bool {
        self.polls += 1;
        self.polls % 2 == 0
    }

    fn save(&mut self, checkpoint: ExtractorCheckpoint) -> AfterSave {
        *self.slot.lock().unwrap() = Some(checkpoint);
        AfterSave::Stop
    }
}

/// Saves whenever possible but never stops; records every checkpoint's
/// `(entry_index, write_offset)` for monotonicity checks.
pub struct RecordAndContinue {
    pub seen: Arc<Mutex<Vec<(u64, u64)>>>,
}

impl SaveConsumer for RecordAndContinue {
    fn should_save(&mut self) -> bool {
        true
    }

    fn save(&mut self, checkpoint: ExtractorCheckpoint) -> AfterSave {
        let offset = checkpoint.entry.as_ref().map_or(0, |e| e.write_offset);
        self.seen
            .lock()
            .unwrap()
            .push((checkpoint.entry_index, offset));
        AfterSave::Continue
    }
}

/// Count how often the consumer was even asked.
pub struct CountPolls {
    pub polls: Arc<AtomicUsize>,
    pub saves: Arc<AtomicUsize>,
}

impl SaveConsumer for CountPolls {
    fn should_save(&mut self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn save(&mut self, _checkpoint: ExtractorCheckpoint) -> AfterSave {
        self.saves.fetch_add(1, Ordering::SeqCst);
        AfterSave::Continue
    }
}
