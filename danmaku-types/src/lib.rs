//! Atomic types shared by the danmaku toolkit: bit-level I/O and the tagged
//! value union used by both the archive engine and the bytecode tools.

#![warn(missing_docs)]
#![deny(unused_must_use)]

mod bits;
mod error;
mod fmt;
mod value;
mod version;

pub use bits::{BitReader, BitWriter};
pub use error::ValueError;
pub use fmt::format_float;
pub use value::{Value, ValueReader};
pub use version::Version;
