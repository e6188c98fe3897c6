//! Stateful read, extract and write front end.

use std::path::Path;

use tracing::instrument;

use crate::error::{ArgumentError, Error, Result};
use crate::format::HpiVersion;
use crate::read::{HpiArchive, HpiFileEntry, ReadMode};
use crate::write::{write_archive, HpiWriterOptions};

/// Remembers the last archive read so files can be extracted from it by path.
///
/// ```no_run
/// use hpi::{HpiProcessor, ReadMode};
///
/// fn copy_units(from: &str, to: &str) -> hpi::error::Result<()> {
///     let mut processor = HpiProcessor::new();
///     let units: Vec<_> = processor
///         .read(from, ReadMode::Full)?
///         .files()
///         .iter()
///         .filter(|f| f.relative_path.starts_with("units/"))
///         .cloned()
///         .collect();
///
///     processor.write(to, &units, 2)
/// }
/// ```
#[derive(Debug, Default)]
pub struct HpiProcessor {
    archive: Option<HpiArchive>,
}

impl HpiProcessor {
    /// A processor with no archive loaded
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the archive at `path`, replacing whatever was read before.
    ///
    /// The previous archive is dropped even when reading fails.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn read(&mut self, path: impl AsRef<Path>, mode: ReadMode) -> Result<&HpiArchive> {
        self.archive = None;
        let archive = HpiArchive::open(path, mode)?;
        Ok(self.archive.insert(archive))
    }

    /// The archive read last, if any
    pub fn archive(&self) -> Option<&HpiArchive> {
        self.archive.as_ref()
    }

    /// Extracts one file from the archive read last
    pub fn extract(&self, relative_path: &str) -> Result<Vec<u8>> {
        if relative_path.trim().is_empty() {
            return Err(ArgumentError::EmptyPath.into());
        }

        self.archive
            .as_ref()
            .ok_or(Error::InvalidState)?
            .extract(relative_path)
    }

    /// Writes `files` to `path` using layout `version`, which must be 1 or 2.
    ///
    /// Files are deflated, no cipher is applied.
    #[instrument(skip(self, path, files), fields(path = %path.as_ref().display()), err)]
    pub fn write(&self, path: impl AsRef<Path>, files: &[HpiFileEntry], version: u32) -> Result<()> {
        let version = HpiVersion::try_from(version)?;
        write_archive(
            path,
            files,
            HpiWriterOptions::builder().version(version).build(),
        )
    }
}
