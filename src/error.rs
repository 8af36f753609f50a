use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open {}: {reason}", .path.display())]
    Open { path: PathBuf, reason: String },

    #[error("file '{}' was not identified as BGZF-compressed; compress it with bgzip", .0.display())]
    NotBgzf(PathBuf),

    #[error("index not found for {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("index {} is older than {}; reindex the file", .index.display(), .data.display())]
    StaleIndex { data: PathBuf, index: PathBuf },

    #[error("failed to read index {}: {reason}", .path.display())]
    IndexRead { path: PathBuf, reason: String },

    #[error("failed to build index for {}: {reason}", .path.display())]
    IndexBuild { path: PathBuf, reason: String },

    #[error("no index loaded")]
    NoIndex,

    #[error("invalid region: {0}")]
    InvalidRegion(String),

    #[error("unknown contig: {0}")]
    UnknownContig(String),

    #[error("malformed record: {0}")]
    Decode(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no active region; call set_region first")]
    NoActiveRegion,

    #[error("stream is closed")]
    Closed,

    #[error("operation requires a stream opened in {0} mode")]
    WrongMode(&'static str),

    #[error("header must be set before {0}")]
    MissingHeader(&'static str),
}

/// Coarse classification of [`Error`], one per failure domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Open,
    Index,
    Region,
    Decode,
    Io,
    State,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Open => "OpenError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Region => "RegionError",
            ErrorKind::Decode => "DecodeError",
            ErrorKind::Io => "IOError",
            ErrorKind::State => "StateError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Open { .. } | Error::NotBgzf(_) => ErrorKind::Open,
            Error::IndexNotFound(_)
            | Error::StaleIndex { .. }
            | Error::IndexRead { .. }
            | Error::IndexBuild { .. }
            | Error::NoIndex => ErrorKind::Index,
            Error::InvalidRegion(_) | Error::UnknownContig(_) => ErrorKind::Region,
            Error::Decode(_) | Error::InvalidRecord(_) | Error::InvalidHeader(_) => {
                ErrorKind::Decode
            }
            Error::Io(_) => ErrorKind::Io,
            Error::NoActiveRegion
            | Error::Closed
            | Error::WrongMode(_)
            | Error::MissingHeader(_) => ErrorKind::State,
        }
    }

    pub(crate) fn open(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
