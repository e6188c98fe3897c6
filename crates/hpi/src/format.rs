//! Version detection and the capability shared by both directory layouts.

use std::fmt::Debug;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{ArgumentError, Error, FormatError, Result};
use crate::read::{FileLocation, HpiFileEntry};
use crate::types::{VERSION_1_MARKER, VERSION_2_MARKER};
use crate::write::HpiWriterOptions;

/// Directory layout of an archive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HpiVersion {
    /// Offset chained directory, optionally enciphered
    #[default]
    V1,

    /// Directory and name blocks, never enciphered
    V2,
}

impl HpiVersion {
    /// Maps the marker stored after the signature
    pub fn from_marker(marker: u32) -> Result<Self> {
        match marker {
            VERSION_1_MARKER => Ok(HpiVersion::V1),
            VERSION_2_MARKER => Ok(HpiVersion::V2),
            other => Err(FormatError::UnsupportedVersion(other).into()),
        }
    }

    /// Marker stored after the signature
    pub fn marker(self) -> u32 {
        match self {
            HpiVersion::V1 => VERSION_1_MARKER,
            HpiVersion::V2 => VERSION_2_MARKER,
        }
    }
}

/// Accepts the plain version numbers 1 and 2
impl TryFrom<u32> for HpiVersion {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(HpiVersion::V1),
            2 => Ok(HpiVersion::V2),
            other => Err(ArgumentError::UnsupportedWriteVersion(other).into()),
        }
    }
}

/// Reading and writing of one directory layout
pub(crate) trait ArchiveFormat: Sized + Debug {
    /// Everything needed to extract one file later
    type Location: Copy + Debug + Into<FileLocation>;

    /// Parses the directory, with `reader` positioned right after the preamble.
    ///
    /// Files are returned in traversal order.
    fn open<R: Read + Seek>(reader: &mut R) -> Result<(Self, Vec<(String, Self::Location)>)>;

    /// Reads and decodes the data of a single file
    fn extract<R: Read + Seek>(&self, reader: &mut R, location: &Self::Location)
        -> Result<Vec<u8>>;

    /// Size of the file once extracted
    fn extracted_size(location: &Self::Location) -> u64;

    /// Writes a complete archive, starting at offset zero of `writer`
    fn write<W: Write + Seek>(
        writer: &mut W,
        files: &[HpiFileEntry],
        options: &HpiWriterOptions,
    ) -> Result<()>;
}

/// Reads exactly `len` bytes at `offset`.
///
/// A region running past the end of the source is a format error.
pub(crate) fn read_region<R: Read + Seek>(reader: &mut R, offset: u64, len: u64) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;

    let mut buffer = Vec::new();
    reader.take(len).read_to_end(&mut buffer)?;

    if (buffer.len() as u64) < len {
        return Err(FormatError::OffsetOutOfRange {
            offset: offset + len,
            len: offset + buffer.len() as u64,
        }
        .into());
    }

    Ok(buffer)
}

/// Borrows `size` bytes at `index`, failing instead of panicking when they are out of range
pub(crate) fn slice_at(block: &[u8], index: usize, size: usize) -> Result<&[u8]> {
    index
        .checked_add(size)
        .and_then(|end| block.get(index..end))
        .ok_or_else(|| {
            FormatError::OffsetOutOfRange {
                offset: index as u64,
                len: block.len() as u64,
            }
            .into()
        })
}

/// Offset of element `index` in an array of `size` byte records starting at `first`
pub(crate) fn element(first: u32, index: u32, size: usize) -> usize {
    (first as usize).saturating_add((index as usize).saturating_mul(size))
}

/// Reads the null terminated name starting at `index`
pub(crate) fn read_name(block: &[u8], index: usize) -> Result<String> {
    let out_of_range = || FormatError::OffsetOutOfRange {
        offset: index as u64,
        len: block.len() as u64,
    };

    let tail = block.get(index..).ok_or_else(out_of_range)?;
    let end = tail.iter().position(|b| *b == 0).ok_or_else(out_of_range)?;

    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

/// Narrows an offset or size to the 32 bits the format stores
pub(crate) fn to_u32(value: impl TryInto<u32>) -> Result<u32> {
    value
        .try_into()
        .map_err(|_| ArgumentError::ArchiveTooLarge.into())
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::{element, read_name, read_region, slice_at, to_u32, HpiVersion};
    use crate::error::{ArgumentError, Error, FormatError, Result};

    #[test]
    fn version_markers() -> Result<()> {
        assert_eq!(HpiVersion::from_marker(0x0001_0000)?, HpiVersion::V1);
        assert_eq!(HpiVersion::from_marker(0x0002_0000)?, HpiVersion::V2);
        assert_eq!(HpiVersion::V2.marker(), 0x0002_0000);

        assert!(matches!(
            HpiVersion::from_marker(0x0003_0000),
            Err(Error::Format(FormatError::UnsupportedVersion(0x0003_0000)))
        ));

        Ok(())
    }

    #[test]
    fn version_numbers() -> Result<()> {
        assert_eq!(HpiVersion::try_from(1)?, HpiVersion::V1);
        assert_eq!(HpiVersion::try_from(2)?, HpiVersion::V2);

        assert!(matches!(
            HpiVersion::try_from(3),
            Err(Error::InvalidArgument(ArgumentError::UnsupportedWriteVersion(3)))
        ));

        Ok(())
    }

    #[test]
    fn region_past_end() -> Result<()> {
        let mut reader = Cursor::new(b"0123456789");

        assert_eq!(read_region(&mut reader, 2, 3)?, b"234");
        assert!(matches!(
            read_region(&mut reader, 8, 4),
            Err(Error::Format(FormatError::OffsetOutOfRange {
                offset: 12,
                len: 10
            }))
        ));
        assert!(read_region(&mut reader, 100, 1).is_err());

        Ok(())
    }

    #[test]
    fn slices_are_bounds_checked() -> Result<()> {
        let block = [1, 2, 3, 4];

        assert_eq!(slice_at(&block, 1, 2)?, [2, 3]);
        assert!(slice_at(&block, 3, 2).is_err());
        assert!(slice_at(&block, usize::MAX, 2).is_err());
        assert_eq!(element(8, 2, 20), 48);

        Ok(())
    }

    #[test]
    fn names_need_terminator() -> Result<()> {
        let block = b"\0units\0a.fbi";

        assert_eq!(read_name(block, 0)?, "");
        assert_eq!(read_name(block, 1)?, "units");
        assert!(read_name(block, 7).is_err());
        assert!(read_name(block, 40).is_err());

        Ok(())
    }

    #[test]
    fn offsets_fit_in_32_bits() -> Result<()> {
        assert_eq!(to_u32(20usize)?, 20);
        assert!(matches!(
            to_u32(u64::from(u32::MAX) + 1),
            Err(Error::InvalidArgument(ArgumentError::ArchiveTooLarge))
        ));

        Ok(())
    }
}
