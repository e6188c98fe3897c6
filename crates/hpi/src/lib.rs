//! This library handles reading from and creating **HPI** files used by *Total Annihilation*.
//!
//! # HPI Archive Format Documentation
//!
//! HPI archives bundle the units, scripts, textures and maps of the game into a single file.
//! The same container is also shipped with the `.ufo`, `.ccx` and `.gp3` extensions. Two directory
//! layouts exist, told apart by the version marker that follows the signature.
//!
//! ## Preamble
//!
//! | Offset (bytes) | Field          | Description                                          |
//! |----------------|----------------|------------------------------------------------------|
//! | 0x0000         | Signature      | 4 bytes: "HAPI"                                      |
//! | 0x0004         | Version marker | 4 bytes: `0x00010000` for version 1, `0x00020000` for version 2 |
//!
//! ## Version 1
//!
//! | Offset (bytes) | Field           | Description                                         |
//! |----------------|-----------------|-----------------------------------------------------|
//! | 0x0008         | Directory size  | 4 bytes: Offset one past the end of the directory   |
//! | 0x000C         | Key             | 4 bytes: Raw cipher key, zero when not ciphered     |
//! | 0x0010         | Directory start | 4 bytes: Offset of the root directory node          |
//!
//! Everything from the directory start onwards is run through a positional cipher when the key
//! is not zero. The byte at absolute offset `p` is transformed with `t = p ^ k` and
//! `plain = t ^ !cipher`, where `k = !((key << 2) | (key >> 6))` truncated to a byte.
//!
//! Pointers stored in the directory are absolute file offsets. The directory is read as one
//! buffer starting at the directory start, so a pointer addresses index `pointer - 20` of it.
//!
//! ### Directory node
//!
//! | Offset (bytes) | Field       | Description                                  |
//! |----------------|-------------|----------------------------------------------|
//! | 0x0000         | Entry count | 4 bytes: Number of entries in this directory |
//! | 0x0004         | Entry list  | 4 bytes: Pointer to the first entry          |
//!
//! ### Entry
//!
//! | Offset (bytes) | Field          | Description                                          |
//! |----------------|----------------|------------------------------------------------------|
//! | 0x0000         | Name pointer   | 4 bytes: Pointer to a NUL terminated name            |
//! | 0x0004         | Target pointer | 4 bytes: Pointer to a directory node or file record  |
//! | 0x0008         | Is directory   | 1 byte: Non zero for a subdirectory                  |
//!
//! ### File record
//!
//! | Offset (bytes) | Field       | Description                                          |
//! |----------------|-------------|------------------------------------------------------|
//! | 0x0000         | Data offset | 4 bytes: Absolute offset of the file data            |
//! | 0x0004         | Length      | 4 bytes: Decompressed size                           |
//! | 0x0008         | Compression | 1 byte: Zero when stored raw, chunked otherwise      |
//!
//! Chunked file data starts with one 4 byte size per 65536 byte chunk, followed by the chunks.
//!
//! ## Version 2
//!
//! | Offset (bytes) | Field           | Description                                         |
//! |----------------|-----------------|-----------------------------------------------------|
//! | 0x0008         | Directory block | 4 bytes: Offset of the directory block              |
//! | 0x000C         | Directory size  | 4 bytes: Stored size of the directory block         |
//! | 0x0010         | Names block     | 4 bytes: Offset of the names block                  |
//! | 0x0014         | Names size      | 4 bytes: Stored size of the names block             |
//! | 0x0018         | Data start      | 4 bytes: Offset of the first file, `0x20`           |
//! | 0x001C         | Last            | 4 bytes: Reserved                                   |
//!
//! Either block may be stored as a single chunk. Pointers in the directory block are offsets into
//! that block, pointers to names are offsets into the names block. The root record sits at offset 0.
//!
//! ### Directory record
//!
//! | Offset (bytes) | Field               | Description                                   |
//! |----------------|---------------------|-----------------------------------------------|
//! | 0x0000         | Name pointer        | 4 bytes: Offset of the name                   |
//! | 0x0004         | First subdirectory  | 4 bytes: Offset of the first subdirectory     |
//! | 0x0008         | Subdirectory count  | 4 bytes: Number of subdirectory records       |
//! | 0x000C         | First file          | 4 bytes: Offset of the first file record      |
//! | 0x0010         | File count          | 4 bytes: Number of file records               |
//!
//! ### File record
//!
//! | Offset (bytes) | Field             | Description                                        |
//! |----------------|-------------------|----------------------------------------------------|
//! | 0x0000         | Name pointer      | 4 bytes: Offset of the name                        |
//! | 0x0004         | Data start        | 4 bytes: Absolute offset of the file data          |
//! | 0x0008         | Decompressed size | 4 bytes: Size of the file                          |
//! | 0x000C         | Compressed size   | 4 bytes: Zero when stored raw, a single chunk otherwise |
//! | 0x0010         | Date              | 4 bytes: Modification time in seconds              |
//! | 0x0014         | Checksum          | 4 bytes: Not verified                              |
//!
//! ## Chunks
//!
//! | Offset (bytes) | Field             | Description                                        |
//! |----------------|-------------------|----------------------------------------------------|
//! | 0x0000         | Marker            | 4 bytes: "SQSH"                                    |
//! | 0x0004         | Unknown           | 1 byte                                             |
//! | 0x0005         | Compression       | 1 byte: `0` none, `1` LZ77, `2` zlib               |
//! | 0x0006         | Encrypted         | 1 byte: Non zero when the payload is obfuscated    |
//! | 0x0007         | Compressed size   | 4 bytes: Size of the payload                       |
//! | 0x000B         | Decompressed size | 4 bytes: Size once decompressed                    |
//! | 0x000F         | Checksum          | 4 bytes: Byte sum of the stored payload            |
//!
//! An obfuscated payload byte at index `i` is recovered with `(b - i) ^ i`, truncated to a byte.
//!
//! ## Additional Information
//!
//! - **Endianness**: Little-endian for all multi-byte integers
//! - **Names**: Matched without regard to ASCII case, `/` and `\` both separate directories
//!

pub mod cipher;
pub mod compression;
pub mod error;
pub mod format;
pub mod processor;
pub mod read;
pub mod tree;
pub mod types;
pub mod v1;
pub mod v2;
pub mod write;

pub use compression::CompressionMethod;
pub use format::HpiVersion;
pub use processor::HpiProcessor;
pub use read::{FileLocation, HpiArchive, HpiFileEntry, ReadMode};
pub use write::{write_archive, HpiWriter, HpiWriterOptions};
