//! Archive engine of the danmaku toolkit.
//!
//! Reads and writes the packed asset containers of roughly a dozen game
//! releases. Four container families exist, distinguished by header magic
//! and by how entry bodies and the entry table are encoded:
//!
//! - **legacy**: no magic; bodies optionally run-length encoded and XORed
//!   with a per-entry key, table obfuscated with a feedback ladder.
//! - **bit-packed**: `PBG3`/`PBG4`; LZSS bodies, entry table either
//!   bit-packed integers or an LZSS stream.
//! - **marked**: `PBGZ`; bodies prefixed with an `edz` marker, XOR ladder
//!   keyed by filename extension, then LZSS.
//! - **mainline**: ladder-scrambled `THA1`; LZSS bodies scrambled by one of
//!   eight schedules picked by a filename hash.
//!
//! Entry reads and writes may run concurrently from multiple workers; the
//! shared stream cursor and the next-write offset are guarded by a mutex
//! while compression and crypting run on per-task buffers.

#![warn(missing_docs)]
#![deny(unused_must_use)]

mod archive;
mod crypt;
mod detect;
mod error;
mod format;
mod lzss;
mod rle;
mod wire;

pub use archive::{Archive, Entry, Family, NameRules, Stream};
pub use crypt::{decrypt, encrypt, CryptParams};
pub use detect::{detect, VersionSet};
pub use error::DatError;
pub use lzss::{compress, decompress};
pub use rle::{rle, unrle};

pub use danmaku_types::Version;
