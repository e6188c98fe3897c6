//! Types for reading HPI archives
//!

use std::fmt::{self, Debug};
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use binrw::BinRead;
use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::error::{ArgumentError, Error, FileNotFoundError, FormatError, Result};
use crate::format::{ArchiveFormat, HpiVersion};
use crate::tree::index_key;
use crate::types::{Preamble, V1FileRecord, V2FileRecord};
use crate::v1::V1Format;
use crate::v2::V2Format;

/// How much work [`HpiArchive::open`] does up front
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Only the directory is read, file data is left empty until extracted
    #[default]
    Quick,

    /// Every file is extracted while opening
    Full,
}

/// A file stored in, or destined for, an archive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HpiFileEntry {
    /// Path inside the archive, directories joined with `/`
    pub relative_path: String,

    /// File contents, empty when the archive was read in [`ReadMode::Quick`]
    pub data: Vec<u8>,
}

impl HpiFileEntry {
    /// Creates an entry from a path and its contents
    pub fn new(relative_path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            data: data.into(),
        }
    }
}

/// Where and how a file is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    /// Version 1 file data record
    V1(V1FileRecord),

    /// Version 2 file record
    V2(V2FileRecord),
}

impl From<V1FileRecord> for FileLocation {
    fn from(record: V1FileRecord) -> Self {
        FileLocation::V1(record)
    }
}

impl From<V2FileRecord> for FileLocation {
    fn from(record: V2FileRecord) -> Self {
        FileLocation::V2(record)
    }
}

impl FileLocation {
    /// Absolute offset of the stored data
    pub fn data_offset(&self) -> u64 {
        match self {
            FileLocation::V1(record) => u64::from(record.data_offset),
            FileLocation::V2(record) => u64::from(record.data_start),
        }
    }

    /// Size of the file once extracted
    pub fn size(&self) -> u64 {
        match self {
            FileLocation::V1(record) => V1Format::extracted_size(record),
            FileLocation::V2(record) => V2Format::extracted_size(record),
        }
    }
}

#[derive(Clone)]
enum Source {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Memory(bytes) => write!(f, "{} bytes in memory", bytes.len()),
        }
    }
}

impl Source {
    fn open(&self) -> Result<SourceReader> {
        Ok(match self {
            Source::File(path) => SourceReader::File(BufReader::new(File::open(path)?)),
            Source::Memory(bytes) => SourceReader::Memory(Cursor::new(Arc::clone(bytes))),
        })
    }
}

enum SourceReader {
    File(BufReader<File>),
    Memory(Cursor<Arc<[u8]>>),
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::File(reader) => reader.read(buf),
            SourceReader::Memory(reader) => reader.read(buf),
        }
    }
}

impl Seek for SourceReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            SourceReader::File(reader) => reader.seek(pos),
            SourceReader::Memory(reader) => reader.seek(pos),
        }
    }
}

#[derive(Debug)]
struct Index<F: ArchiveFormat> {
    format: F,
    locations: IndexMap<Box<str>, (usize, F::Location)>,
}

impl<F: ArchiveFormat> Index<F> {
    fn load<R: Read + Seek>(reader: &mut R, mode: ReadMode) -> Result<(Self, Vec<HpiFileEntry>)> {
        let (format, listing) = F::open(reader)?;

        let mut locations = IndexMap::with_capacity(listing.len());
        let mut files = Vec::with_capacity(listing.len());
        for (relative_path, location) in listing {
            let data = match mode {
                ReadMode::Quick => Vec::new(),
                ReadMode::Full => format.extract(reader, &location)?,
            };

            locations.insert(index_key(&relative_path), (files.len(), location));
            files.push(HpiFileEntry {
                relative_path,
                data,
            });
        }

        Ok((Self { format, locations }, files))
    }

    fn get(&self, key: &str) -> Option<&(usize, F::Location)> {
        self.locations.get(key)
    }

    fn extract<R: Read + Seek>(&self, reader: &mut R, key: &str) -> Option<Result<Vec<u8>>> {
        self.get(key)
            .map(|(_, location)| self.format.extract(reader, location))
    }
}

#[derive(Debug)]
enum LocationIndex {
    V1(Index<V1Format>),
    V2(Index<V2Format>),
}

impl LocationIndex {
    fn position(&self, key: &str) -> Option<usize> {
        match self {
            LocationIndex::V1(index) => index.get(key).map(|(position, _)| *position),
            LocationIndex::V2(index) => index.get(key).map(|(position, _)| *position),
        }
    }

    fn location(&self, key: &str) -> Option<FileLocation> {
        match self {
            LocationIndex::V1(index) => index.get(key).map(|(_, location)| (*location).into()),
            LocationIndex::V2(index) => index.get(key).map(|(_, location)| (*location).into()),
        }
    }

    fn extract<R: Read + Seek>(&self, reader: &mut R, key: &str) -> Option<Result<Vec<u8>>> {
        match self {
            LocationIndex::V1(index) => index.extract(reader, key),
            LocationIndex::V2(index) => index.extract(reader, key),
        }
    }

    fn sizes(&self) -> Box<dyn Iterator<Item = u64> + '_> {
        match self {
            LocationIndex::V1(index) => Box::new(
                index
                    .locations
                    .values()
                    .map(|(_, location)| V1Format::extracted_size(location)),
            ),
            LocationIndex::V2(index) => Box::new(
                index
                    .locations
                    .values()
                    .map(|(_, location)| V2Format::extracted_size(location)),
            ),
        }
    }
}

/// HPI archive reader
///
/// The directory is parsed once. Every extraction opens its own handle on the source,
/// so an archive can be shared between threads.
///
/// ```no_run
/// use hpi::{HpiArchive, ReadMode};
///
/// fn list_hpi_contents(path: &str) -> hpi::error::Result<()> {
///     let archive = HpiArchive::open(path, ReadMode::Quick)?;
///
///     for name in archive.file_names() {
///         let data = archive.extract(name)?;
///         println!("{name}: {} bytes", data.len());
///     }
///
///     Ok(())
/// }
/// ```
pub struct HpiArchive {
    source: Source,
    version: HpiVersion,
    index: LocationIndex,
    files: Vec<HpiFileEntry>,
}

impl Debug for HpiArchive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "HpiArchive({:?}, {:?}, {} files)",
            self.source,
            self.version,
            self.files.len()
        )
    }
}

impl HpiArchive {
    /// Opens the archive stored at `path`
    #[instrument(skip(path), fields(path = %path.as_ref().display()), err)]
    pub fn open(path: impl AsRef<Path>, mode: ReadMode) -> Result<Self> {
        let source = Source::File(path.as_ref().to_path_buf());
        let reader = source.open()?;
        Self::load(source, reader, mode)
    }

    /// Reads an archive held in memory
    #[instrument(skip(bytes), err)]
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>, mode: ReadMode) -> Result<Self> {
        let source = Source::Memory(bytes.into());
        let reader = source.open()?;
        Self::load(source, reader, mode)
    }

    fn load(source: Source, mut reader: SourceReader, mode: ReadMode) -> Result<Self> {
        let preamble = Preamble::read(&mut reader).map_err(|e| match e {
            binrw::Error::BadMagic { .. } => Error::from(FormatError::InvalidSignature),
            binrw::Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Error::from(FormatError::InvalidSignature)
            }
            e => Error::from(e),
        })?;
        let version = HpiVersion::from_marker(preamble.version)?;

        let (index, files) = match version {
            HpiVersion::V1 => {
                let (index, files) = Index::<V1Format>::load(&mut reader, mode)?;
                (LocationIndex::V1(index), files)
            }
            HpiVersion::V2 => {
                let (index, files) = Index::<V2Format>::load(&mut reader, mode)?;
                (LocationIndex::V2(index), files)
            }
        };
        debug!(?version, ?mode, files = files.len(), "opened archive");

        Ok(Self {
            source,
            version,
            index,
            files,
        })
    }

    /// Directory layout of the archive
    pub fn version(&self) -> HpiVersion {
        self.version
    }

    /// Number of files contained in this archive.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether this archive contains no files
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all the file names in this archive, in directory order.
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.relative_path.as_str())
    }

    /// Files in directory order, with data only when read in [`ReadMode::Full`]
    pub fn files(&self) -> &[HpiFileEntry] {
        &self.files
    }

    /// Unwrap and return the file list
    pub fn into_files(self) -> Vec<HpiFileEntry> {
        self.files
    }

    /// Total size of the files in the archive, if it can be known.
    pub fn decompressed_size(&self) -> Option<u128> {
        let mut total = 0u128;
        for size in self.index.sizes() {
            total = total.checked_add(u128::from(size))?;
        }
        Some(total)
    }

    /// Where the file is stored.
    ///
    /// Lookup ignores ASCII case and accepts both `/` and `\` as separators.
    pub fn location(&self, relative_path: &str) -> Option<FileLocation> {
        self.index.location(&index_key(relative_path))
    }

    /// Decodes a single file.
    ///
    /// Lookup ignores ASCII case and accepts both `/` and `\` as separators.
    #[instrument(skip(self), err)]
    pub fn extract(&self, relative_path: &str) -> Result<Vec<u8>> {
        if relative_path.trim().is_empty() {
            return Err(ArgumentError::EmptyPath.into());
        }

        let mut reader = self.source.open()?;
        self.index
            .extract(&mut reader, &index_key(relative_path))
            .unwrap_or_else(|| {
                Err(Error::FileNotFound(FileNotFoundError::Name(
                    relative_path.to_owned(),
                )))
            })
    }

    /// Search for a file entry by name, returning it with its data
    pub fn by_name(&self, relative_path: &str) -> Result<HpiFileEntry> {
        let data = self.extract(relative_path)?;
        let relative_path = self
            .index
            .position(&index_key(relative_path))
            .and_then(|position| self.files.get(position))
            .map_or_else(|| relative_path.to_owned(), |f| f.relative_path.clone());

        Ok(HpiFileEntry {
            relative_path,
            data,
        })
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use super::{FileLocation, HpiArchive, HpiFileEntry, ReadMode};
    use crate::error::{ArgumentError, Error, FileNotFoundError, FormatError, Result};
    use crate::format::HpiVersion;
    use crate::types::V1FileRecord;

    #[rustfmt::skip]
    const SINGLE_RAW_FILE: [u8; 57] = [
        0x48, 0x41, 0x50, 0x49, 0x00, 0x00, 0x01, 0x00,
        0x34, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
        0x14, 0x00, 0x00, 0x00,
        0x01, 0x00, 0x00, 0x00,
        0x25, 0x00, 0x00, 0x00,
        0x34, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00,
        0x00,
        0x2E, 0x00, 0x00, 0x00,
        0x1C, 0x00, 0x00, 0x00,
        0x00,
        0x61, 0x2E, 0x74, 0x78, 0x74, 0x00,
        0x68, 0x65, 0x6C, 0x6C, 0x6F,
    ];

    #[test]
    fn read_invalid_signature() {
        let mut input = SINGLE_RAW_FILE;
        input[3] = b'X';

        assert!(matches!(
            HpiArchive::from_bytes(input.to_vec(), ReadMode::Quick),
            Err(Error::Format(FormatError::InvalidSignature))
        ));
    }

    #[test]
    fn read_short_file() {
        assert!(matches!(
            HpiArchive::from_bytes(b"HA".to_vec(), ReadMode::Quick),
            Err(Error::Format(FormatError::InvalidSignature))
        ));
    }

    #[test]
    fn read_unsupported_version() {
        let mut input = SINGLE_RAW_FILE;
        input[6] = 0x03;

        assert!(matches!(
            HpiArchive::from_bytes(input.to_vec(), ReadMode::Quick),
            Err(Error::Format(FormatError::UnsupportedVersion(0x0003_0000)))
        ));
    }

    #[traced_test]
    #[test]
    fn quick_read_defers_data() -> Result<()> {
        let archive = HpiArchive::from_bytes(SINGLE_RAW_FILE.to_vec(), ReadMode::Quick)?;

        assert_eq!(archive.version(), HpiVersion::V1);
        assert_eq!(archive.len(), 1);
        assert!(!archive.is_empty());
        assert_eq!(archive.file_names().collect::<Vec<_>>(), ["a.txt"]);
        assert_eq!(archive.files(), [HpiFileEntry::new("a.txt", Vec::new())]);
        assert_eq!(archive.decompressed_size(), Some(5));
        assert_eq!(
            archive.location("a.txt"),
            Some(FileLocation::V1(V1FileRecord {
                data_offset: 0x34,
                length: 5,
                compression: 0
            }))
        );

        assert_eq!(archive.extract("a.txt")?, b"hello");

        Ok(())
    }

    #[test]
    fn full_read_populates_data() -> Result<()> {
        let bytes: Arc<[u8]> = Arc::new(SINGLE_RAW_FILE);
        let archive = HpiArchive::from_bytes(bytes, ReadMode::Full)?;

        assert_eq!(
            archive.into_files(),
            [HpiFileEntry::new("a.txt", b"hello".to_vec())]
        );

        Ok(())
    }

    #[test]
    fn lookup_ignores_case_and_separator() -> Result<()> {
        let archive = HpiArchive::from_bytes(SINGLE_RAW_FILE.to_vec(), ReadMode::Quick)?;

        assert_eq!(archive.extract("A.TXT")?, b"hello");
        assert_eq!(archive.extract("\\a.txt")?, b"hello");

        let entry = archive.by_name("A.txt")?;
        assert_eq!(entry.relative_path, "a.txt");
        assert_eq!(entry.data, b"hello");

        Ok(())
    }

    #[test]
    fn extract_unknown_and_empty_paths() -> Result<()> {
        let archive = HpiArchive::from_bytes(SINGLE_RAW_FILE.to_vec(), ReadMode::Quick)?;

        assert!(matches!(
            archive.extract("b.txt"),
            Err(Error::FileNotFound(FileNotFoundError::Name(name))) if name == "b.txt"
        ));
        assert!(matches!(
            archive.extract(""),
            Err(Error::InvalidArgument(ArgumentError::EmptyPath))
        ));
        assert!(archive.location("b.txt").is_none());

        Ok(())
    }

    #[test]
    fn truncated_data_is_reported() -> Result<()> {
        let archive = HpiArchive::from_bytes(
            SINGLE_RAW_FILE[..SINGLE_RAW_FILE.len() - 2].to_vec(),
            ReadMode::Quick,
        )?;

        assert!(matches!(
            archive.extract("a.txt"),
            Err(Error::Format(FormatError::OffsetOutOfRange { .. }))
        ));
        assert!(HpiArchive::from_bytes(SINGLE_RAW_FILE[..50].to_vec(), ReadMode::Quick).is_err());

        Ok(())
    }
}
