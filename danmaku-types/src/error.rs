use thiserror::Error;

/// Errors produced by the value codec.
#[derive(Debug, Error)]
pub enum ValueError {
    /// A read wanted more bytes than the buffer holds.
    #[error("unexpected end of data, wanted {wanted} bytes for format '{tag}', had {remaining}")]
    ShortRead {
        /// Format tag being decoded.
        tag: char,
        /// Bytes the tag requires.
        wanted: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },
    /// A tag that the codec does not know.
    #[error("invalid value type '{0}'")]
    InvalidTag(char),
    /// Text did not parse as the requested tag.
    #[error("couldn't parse '{tag}' from \"{text}\"")]
    BadText {
        /// Format tag being parsed.
        tag: char,
        /// Offending input.
        text: String,
    },
    /// Bytes were left over after a format string was exhausted.
    #[error("{0} bytes left over when parsing format \"{1}\"")]
    TrailingData(usize, String),
    /// A bit-stream read ran past end of input.
    #[error("unexpected end of bit stream")]
    BitStreamEof,
    /// Underlying byte I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
