//! The archive proper: entry bookkeeping, filename normalisation and the
//! version-dispatched open/create/read/write/close lifecycle.

use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use danmaku_types::Version;

use crate::format::{bitpacked, legacy, mainline, marked};
use crate::DatError;

/// Byte source/sink an archive operates on.
pub trait Stream: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> Stream for T {}

/// The four container families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Oldest containers: RLE bodies, per-entry XOR, feedback-ladder table.
    Legacy,
    /// `PBG3`/`PBG4`: LZSS bodies, bit-packed or LZSS entry table.
    BitPacked,
    /// `PBGZ`: `edz`-marked bodies, extension-keyed ladder, LZSS.
    Marked,
    /// `THA1`: LZSS bodies scrambled by a filename-hashed schedule.
    Mainline,
}

impl Family {
    /// The family a version's archives belong to.
    pub fn of(version: Version) -> Family {
        match version {
            Version::Th02 | Version::Th03 | Version::Th04 | Version::Th05 => Family::Legacy,
            Version::Th06 | Version::Th07 => Family::BitPacked,
            Version::Th08 | Version::Th09 => Family::Marked,
            _ => Family::Mainline,
        }
    }

    fn name_rules(self) -> NameRules {
        match self {
            Family::Legacy => NameRules::BASENAME | NameRules::UPPERCASE | NameRules::EIGHT_THREE,
            _ => NameRules::BASENAME,
        }
    }
}

bitflags! {
    /// Filename normalisation rules applied at [`Archive::entry_set_name`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NameRules: u8 {
        /// Strip any directory components.
        const BASENAME = 1;
        /// Force upper case.
        const UPPERCASE = 1 << 1;
        /// Reject names that do not fit 8.3.
        const EIGHT_THREE = 1 << 2;
    }
}

impl NameRules {
    /// Apply these rules to `name`.
    pub fn apply(self, name: &str) -> Result<String, DatError> {
        let mut name = if self.contains(NameRules::BASENAME) {
            name.rsplit(['/', '\\']).next().unwrap_or(name).to_owned()
        } else {
            name.to_owned()
        };

        if self.contains(NameRules::UPPERCASE) {
            name.make_ascii_uppercase();
        }

        if self.contains(NameRules::EIGHT_THREE) {
            let (stem, ext) = match name.split_once('.') {
                Some((stem, ext)) => (stem, ext),
                None => (name.as_str(), ""),
            };
            if stem.len() > 8 || ext.len() > 3 {
                return Err(DatError::NameNotNormalisable(name));
            }
        }

        Ok(name)
    }
}

/// One archived file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entry {
    pub(crate) name: String,
    pub(crate) offset: u64,
    pub(crate) size: u32,
    pub(crate) zsize: u32,
    pub(crate) extra: u32,
}

impl Entry {
    /// Stored (normalised) entry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Uncompressed body size as recorded in the entry table.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Size of the encoded body inside the archive.
    pub fn stored_size(&self) -> u32 {
        self.zsize
    }

    /// Byte offset of the encoded body.
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Encoded-body placement a format module reports after a write.
pub(crate) struct Placement {
    pub offset: u64,
    pub size: u32,
    pub zsize: u32,
    pub extra: u32,
}

/// Shared cursor state: the stream itself plus the next unused body offset.
pub(crate) struct Inner<S> {
    pub stream: S,
    pub offset: u64,
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read `len` bytes at `offset` as one critical section on the shared
/// stream.
pub(crate) fn read_raw<S: Stream>(
    inner: &Mutex<Inner<S>>,
    offset: u64,
    len: usize,
) -> Result<Vec<u8>, DatError> {
    let mut guard = lock(inner);
    guard.stream.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    guard.stream.read_exact(&mut buf)?;
    Ok(buf)
}

/// Append `data` at the first unused body offset as one critical section;
/// returns the offset the data landed at.
pub(crate) fn append_raw<S: Stream>(
    inner: &Mutex<Inner<S>>,
    data: &[u8],
) -> Result<u64, DatError> {
    let mut guard = lock(inner);
    let at = guard.offset;
    guard.stream.seek(SeekFrom::Start(at))?;
    guard.stream.write_all(data)?;
    guard.offset = at + data.len() as u64;
    Ok(at)
}

/// An opened or in-construction archive.
///
/// Entry reads and writes take `&self` and may run concurrently; body
/// encoding and crypting happen on per-call buffers, and only the seek and
/// transfer on the shared stream serialise.
pub struct Archive<S> {
    version: Version,
    family: Family,
    inner: Mutex<Inner<S>>,
    entries: Vec<Mutex<Entry>>,
}

impl<S: Stream> Archive<S> {
    /// Open an existing archive: parse the header, decode the entry table
    /// and populate the entry list.
    pub fn open(version: Version, mut stream: S) -> Result<Archive<S>, DatError> {
        stream.seek(SeekFrom::Start(0))?;
        let family = Family::of(version);

        let entries = match family {
            Family::Legacy => legacy::open(version, &mut stream)?,
            Family::BitPacked => bitpacked::open(version, &mut stream)?,
            Family::Marked => marked::open(version, &mut stream)?,
            Family::Mainline => mainline::open(version, &mut stream)?,
        };
        tracing::debug!(%version, entries = entries.len(), "opened archive");

        Ok(Archive {
            version,
            family,
            inner: Mutex::new(Inner { stream, offset: 0 }),
            entries: entries.into_iter().map(Mutex::new).collect(),
        })
    }

    /// Create an empty archive for `entry_count` entries. The header region
    /// is reserved; entries may then be written in any order and the header
    /// is finalised by [`Archive::close`].
    pub fn create(version: Version, mut stream: S, entry_count: usize) -> Result<Archive<S>, DatError> {
        stream.seek(SeekFrom::Start(0))?;
        let family = Family::of(version);

        let offset = match family {
            Family::Legacy => legacy::create(version, entry_count)?,
            Family::BitPacked => bitpacked::create(version)?,
            Family::Marked => marked::create()?,
            Family::Mainline => mainline::create()?,
        };
        stream.seek(SeekFrom::Start(offset))?;

        let entries = (0..entry_count).map(|_| Mutex::new(Entry::default())).collect();

        Ok(Archive {
            version,
            family,
            inner: Mutex::new(Inner { stream, offset }),
            entries,
        })
    }

    /// The version this archive was opened or created as.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Number of entries.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn entry(&self, index: usize) -> Result<&Mutex<Entry>, DatError> {
        self.entries.get(index).ok_or(DatError::EntryOutOfRange(index))
    }

    /// Snapshot of an entry's bookkeeping.
    pub fn entry_info(&self, index: usize) -> Result<Entry, DatError> {
        Ok(lock(self.entry(index)?).clone())
    }

    /// Index of the entry called `name`, if any.
    pub fn entry_by_name(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| lock(e).name == name)
    }

    /// Normalise `name` under the version's rules and store it on the
    /// entry. Must happen before the entry is written: the marked and
    /// mainline pipelines key their ciphers off the name.
    pub fn entry_set_name(&self, index: usize, name: &str) -> Result<(), DatError> {
        let normalised = self.family.name_rules().apply(name)?;
        lock(self.entry(index)?).name = normalised;
        Ok(())
    }

    /// Read and decode one entry body.
    pub fn entry_read_data(&self, index: usize) -> Result<Vec<u8>, DatError> {
        let entry = self.entry_info(index)?;
        match self.family {
            Family::Legacy => legacy::read_entry(&self.inner, &entry),
            Family::BitPacked => bitpacked::read_entry(&self.inner, &entry),
            Family::Marked => marked::read_entry(self.version, &self.inner, &entry),
            Family::Mainline => mainline::read_entry(self.version, &self.inner, &entry),
        }
    }

    /// Encode and append one entry body; returns the number of bytes the
    /// body occupies in the archive.
    pub fn entry_write_data(&self, index: usize, data: &[u8]) -> Result<u64, DatError> {
        let name = lock(self.entry(index)?).name.clone();

        let placement = match self.family {
            Family::Legacy => legacy::write_entry(self.version, &self.inner, &name, data)?,
            Family::BitPacked => bitpacked::write_entry(self.version, &self.inner, data)?,
            Family::Marked => marked::write_entry(self.version, &self.inner, &name, data)?,
            Family::Mainline => mainline::write_entry(self.version, &self.inner, &name, data)?,
        };

        let stored = u64::from(placement.zsize);
        let mut entry = lock(self.entry(index)?);
        entry.offset = placement.offset;
        entry.size = placement.size;
        entry.zsize = placement.zsize;
        entry.extra = placement.extra;
        Ok(stored)
    }

    /// Sort the entries by offset, serialise the entry table and finalise
    /// the header. Returns the underlying stream.
    pub fn close(self) -> Result<S, DatError> {
        let mut entries: Vec<Entry> = self
            .entries
            .into_iter()
            .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect();
        entries.sort_by_key(|e| e.offset);

        let inner = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut stream = inner.stream;
        let end_offset = inner.offset;

        match self.family {
            Family::Legacy => legacy::close(self.version, &mut stream, &entries)?,
            Family::BitPacked => bitpacked::close(self.version, &mut stream, &entries, end_offset)?,
            Family::Marked => marked::close(&mut stream, &entries, end_offset)?,
            Family::Mainline => mainline::close(&mut stream, &entries, end_offset)?,
        }

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_rules_normalise() {
        let rules = NameRules::BASENAME | NameRules::UPPERCASE | NameRules::EIGHT_THREE;
        assert_eq!(rules.apply("data/stage1.txt").unwrap(), "STAGE1.TXT");
        assert_eq!(rules.apply("a\\b\\OP.DAT").unwrap(), "OP.DAT");
        assert!(matches!(
            rules.apply("averylongname.txt"),
            Err(DatError::NameNotNormalisable(_))
        ));
        assert!(matches!(
            rules.apply("x.long"),
            Err(DatError::NameNotNormalisable(_))
        ));
    }

    #[test]
    fn families_cover_all_versions() {
        use strum::IntoEnumIterator;
        for v in Version::iter() {
            // Every version maps to exactly one family; the match is total.
            let _ = Family::of(v);
        }
        assert_eq!(Family::of(Version::Th06), Family::BitPacked);
        assert_eq!(Family::of(Version::Th09), Family::Marked);
        assert_eq!(Family::of(Version::Th17), Family::Mainline);
    }
}
