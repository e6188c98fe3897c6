//! Base types for structure of HPI file.

use crate::compression::CompressionMethod;
use binrw::{BinRead, BinWrite};

/// Version marker of the original flat directory layout
pub const VERSION_1_MARKER: u32 = 0x0001_0000;

/// Version marker of the block and name pool layout
pub const VERSION_2_MARKER: u32 = 0x0002_0000;

/// HPI file preamble
///
/// Every archive starts with "HAPI" followed by a version marker. All data is stored in little endian format
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"HAPI", little)]
pub struct Preamble {
    /// Either [`VERSION_1_MARKER`] or [`VERSION_2_MARKER`] for archives this crate understands
    pub version: u32,
}

impl Preamble {
    /// Size on disk including the signature
    pub const SIZE: u64 = 8;
}

/// Version 1 main header, directly after the [`Preamble`]
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct V1Header {
    /// Absolute offset of the end of the directory region
    pub directory_size: u32,

    /// Raw cipher key, zero when the archive is not enciphered
    pub key: u32,

    /// Absolute offset of the start of the directory region
    pub directory_start: u32,
}

impl V1Header {
    /// Size on disk
    pub const SIZE: u64 = 12;
}

/// Version 1 directory node
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct V1Node {
    /// Number of entries in this directory
    pub entry_count: u32,

    /// Stored pointer to the first [`V1Entry`]
    pub entry_list: u32,
}

impl V1Node {
    /// Size on disk
    pub const SIZE: usize = 8;
}

/// Version 1 directory entry, naming either a file or a subdirectory
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct V1Entry {
    /// Stored pointer to the null terminated name
    pub name_offset: u32,

    /// Stored pointer to a [`V1Node`] or a [`V1FileRecord`]
    pub target_offset: u32,

    /// Whether `target_offset` points at a subdirectory
    #[br(map = |flag: u8| flag == 1)]
    #[bw(map = |is_directory: &bool| u8::from(*is_directory))]
    pub is_directory: bool,
}

impl V1Entry {
    /// Size on disk
    pub const SIZE: usize = 9;
}

/// Version 1 file data record
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct V1FileRecord {
    /// Absolute offset of the chunk size table (or the raw bytes)
    pub data_offset: u32,

    /// Size of the file when extracted
    pub length: u32,

    /// Zero when the file is stored as is, otherwise the data is split into SQSH chunks
    pub compression: u8,
}

impl V1FileRecord {
    /// Size on disk
    pub const SIZE: usize = 9;
}

/// Version 2 main header, directly after the [`Preamble`]
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct V2Header {
    /// Absolute offset of the directory block
    pub directory_offset: u32,

    /// Size of the directory block as stored
    pub directory_size: u32,

    /// Absolute offset of the name block
    pub name_offset: u32,

    /// Size of the name block as stored
    pub name_size: u32,

    /// Start of the file data, always directly after this header
    pub data_start: u32,

    /// Unused, written as zero
    pub reserved: u32,
}

impl V2Header {
    /// Size on disk
    pub const SIZE: u64 = 24;
}

impl Default for V2Header {
    fn default() -> Self {
        Self {
            directory_offset: Default::default(),
            directory_size: Default::default(),
            name_offset: Default::default(),
            name_size: Default::default(),
            data_start: (Preamble::SIZE + Self::SIZE) as u32,
            reserved: Default::default(),
        }
    }
}

/// Version 2 directory record
///
/// Subdirectories and files are stored as contiguous arrays inside the directory block.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct V2DirRecord {
    /// Offset into the name block, zero for the unnamed root
    pub name_pointer: u32,

    /// Offset of the first subdirectory record in the directory block
    pub first_subdirectory: u32,

    /// Number of subdirectory records
    pub subdirectory_count: u32,

    /// Offset of the first file record in the directory block
    pub first_file: u32,

    /// Number of file records
    pub file_count: u32,
}

impl V2DirRecord {
    /// Size on disk
    pub const SIZE: usize = 20;
}

/// Version 2 file record
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq, Eq)]
#[brw(little)]
pub struct V2FileRecord {
    /// Offset into the name block
    pub name_pointer: u32,

    /// Absolute offset of the file data
    pub data_start: u32,

    /// Size of the file when extracted
    pub decompressed_size: u32,

    /// Size of the SQSH chunk, zero when the data is stored as is
    pub compressed_size: u32,

    /// Modification time as seconds since the unix epoch
    pub date: u32,

    /// Not verified, written as zero
    pub checksum: u32,
}

impl V2FileRecord {
    /// Size on disk
    pub const SIZE: usize = 24;
}

/// Marker at the start of every [`ChunkHeader`]
pub const CHUNK_MARKER: &[u8; 4] = b"SQSH";

/// SQSH chunk header
///
/// Every compressed payload, in either version, is wrapped in one or more of these.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq)]
#[brw(magic = b"SQSH", little)]
pub struct ChunkHeader {
    /// Purpose unknown, the original tools write 2
    pub unknown: u8,

    /// How the payload was compressed
    #[br(map = |method: u8| CompressionMethod::from(method))]
    #[bw(map = |method: &CompressionMethod| u8::from(*method))]
    pub compression: CompressionMethod,

    /// Whether the payload bytes are enciphered
    #[br(map = |flag: u8| flag != 0)]
    #[bw(map = |encrypted: &bool| u8::from(*encrypted))]
    pub encrypted: bool,

    /// Payload size following this header
    pub compressed_size: u32,

    /// Size of the payload once decompressed
    pub decompressed_size: u32,

    /// Wrapping byte sum of the stored payload
    pub checksum: u32,
}

impl ChunkHeader {
    /// Size on disk including the marker
    pub const SIZE: usize = 19;
}
