//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is not a valid hpi archive
    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] FormatError),

    /// archive contents failed verification
    #[error(transparent)]
    #[diagnostic(transparent)]
    Integrity(#[from] IntegrityError),

    /// unable to find requested file
    #[error("unable to find requested file {0}")]
    FileNotFound(#[from] FileNotFoundError),

    /// no archive has been read yet
    #[error("no archive has been read yet")]
    #[diagnostic(help("call `HpiProcessor::read` before extracting files"))]
    InvalidState,

    /// invalid argument
    #[error(transparent)]
    #[diagnostic(transparent)]
    InvalidArgument(#[from] ArgumentError),
}

/// The archive layout could not be understood
#[derive(Error, Diagnostic, Debug, PartialEq)]
pub enum FormatError {
    /// missing HAPI signature
    #[error("file does not start with the HAPI signature")]
    InvalidSignature,

    /// version marker is neither of the known layouts
    #[error("unsupported hpi version {0:#010x}")]
    UnsupportedVersion(u32),

    /// a stored offset points outside of the data it refers to
    #[error("offset {offset:#x} is outside of a {len} byte region")]
    OffsetOutOfRange {
        /// the offending offset
        offset: u64,
        /// size of the region that was addressed
        len: u64,
    },

    /// a compressed payload did not start with SQSH
    #[error("compressed data does not start with the SQSH marker")]
    MissingChunkMarker,

    /// the directory nests deeper than any real archive would
    #[error("directory nesting exceeds {0} levels")]
    DirectoryTooDeep(usize),
}

/// Stored data did not match what its metadata promised
#[derive(Error, Diagnostic, Debug, PartialEq)]
pub enum IntegrityError {
    /// chunk checksum did not match
    #[error("chunk checksum mismatch (stored {expected:#010x}, computed {actual:#010x})")]
    ChecksumMismatch {
        /// checksum recorded in the chunk header
        expected: u32,
        /// checksum computed over the payload
        actual: u32,
    },

    /// decompressed size did not match
    #[error("decompressed size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// size recorded in the archive
        expected: u64,
        /// size actually produced
        actual: u64,
    },

    /// compressed stream ended early
    #[error("compressed stream ended unexpectedly")]
    Truncated,

    /// {0}
    #[error("corrupt compressed stream: {0}")]
    CorruptStream(String),
}

/// Error type to provide further information when a file has not been found
#[derive(Error, Diagnostic, Debug, PartialEq)]
pub enum FileNotFoundError {
    /// by name {0}
    #[error("by name {0}")]
    Name(String),
}

/// A caller supplied value that cannot be used
#[derive(Error, Diagnostic, Debug, PartialEq)]
pub enum ArgumentError {
    /// only versions 1 and 2 can be written
    #[error("unsupported archive version {0}, expected 1 or 2")]
    UnsupportedWriteVersion(u32),

    /// the same relative path was added twice
    #[error("duplicate path {0}")]
    DuplicatePath(String),

    /// path cannot be stored in an archive
    #[error("invalid path {0:?}")]
    InvalidPath(String),

    /// a relative path must be provided
    #[error("relative path must be provided")]
    EmptyPath,

    /// the positional cipher only exists in version 1 archives
    #[error("a cipher key can only be used with version 1 archives")]
    CipherRequiresV1,

    /// chunks always carry compressed data
    #[error("SQSH chunks require a compression method")]
    ChunkRequiresCompression,

    /// offsets are stored as 32 bit values
    #[error("archive would exceed the 4 GiB offset limit")]
    ArchiveTooLarge,

    /// data was written before a file was started
    #[error("no file has been started")]
    NoFileStarted,
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
