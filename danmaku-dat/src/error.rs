use danmaku_types::{ValueError, Version};
use thiserror::Error;

/// Errors produced by the archive engine and its codecs.
#[derive(Debug, Error)]
pub enum DatError {
    /// Underlying stream I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A read returned fewer bytes than the format requires.
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead {
        /// Bytes required.
        wanted: usize,
        /// Bytes actually available.
        got: usize,
    },
    /// The header magic did not match any expectation for the version.
    #[error("wrong magic for archive: {0:02x?}")]
    InvalidMagic([u8; 4]),
    /// No container format exists for the version.
    #[error("no archive format for version {0}")]
    UnsupportedVersion(Version),
    /// The entry index is outside the archive.
    #[error("entry index {0} out of range")]
    EntryOutOfRange(usize),
    /// The decoded entry table is inconsistent.
    #[error("entry table corrupt: {0}")]
    EntryTableCorrupt(String),
    /// An entry name cannot be normalised under the version's rules.
    #[error("name is not normalisable: {0}")]
    NameNotNormalisable(String),
    /// A compressed stream ended before producing the expected output.
    #[error("compressed data ended early: wanted {wanted} bytes, produced {got}")]
    CompressionUnderrun {
        /// Expected decompressed size.
        wanted: usize,
        /// Bytes actually produced.
        got: usize,
    },
    /// No crypt schedule exists for the given entry kind.
    #[error("no crypt parameters for entry kind '{0}'")]
    CryptParameterMissing(char),
    /// An archive was closed without any entries.
    #[error("no entries")]
    NoEntries,
    /// Bit-level or value-level decoding failed.
    #[error(transparent)]
    Value(#[from] ValueError),
}
