use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("source was read before resume()")]
    UninitializedSource,

    #[error("malformed deflate stream: {0}")]
    Decode(&'static str),

    #[error("checkpoint mismatch: source resumed at {source_offset} but writer is at {write_offset}")]
    CheckpointMismatch {
        source_offset: u64,
        write_offset: u64,
    },

    #[error("malformed checkpoint: {0}")]
    Checkpoint(String),

    #[error("entry path escapes destination: '{path}'")]
    InvalidPath { path: String },

    #[error("extraction stopped at the last delivered checkpoint")]
    Stopped,

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("sink operation failed at '{path}': {source}")]
    Sink {
        path: PathBuf,
        source: io::Error,
    },
}

impl Error {
    /// True for the orderly-suspension sentinel, false for real failures.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_is_not_a_failure() {
        assert!(Error::Stopped.is_stopped());
        assert!(!Error::UninitializedSource.is_stopped());
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
