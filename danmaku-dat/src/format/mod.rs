//! One module per container family. Each implements the same five
//! operations the archive dispatches on: open, create, read, write, close.

pub(crate) mod bitpacked;
pub(crate) mod legacy;
pub(crate) mod mainline;
pub(crate) mod marked;
