//! Archive drivers. ZIP is the one container wired up today; a driver owns
//! the entry walk, per-entry source setup, and checkpoint marshaling.

mod zip;

pub use self::zip::ZipExtractor;
