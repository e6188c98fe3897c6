//! Types for writing HPI archives
//!

use std::collections::HashSet;
use std::fmt::Debug;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::Path;

use bon::Builder;
use tracing::{instrument, Level};

use crate::compression::CompressionMethod;
use crate::error::{ArgumentError, Result};
use crate::format::{ArchiveFormat, HpiVersion};
use crate::read::HpiFileEntry;
use crate::tree::{index_key, split_path, DirectoryNode};
use crate::v1::V1Format;
use crate::v2::V2Format;

/// Options for how the HPI file should be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder)]
pub struct HpiWriterOptions {
    /// Directory layout to produce
    #[builder(default)]
    pub version: HpiVersion,

    /// The compression method used for file data, [`CompressionMethod::None`] stores files as is
    #[builder(default)]
    pub compression: CompressionMethod,

    /// Raw cipher key written to a version 1 header, zero leaves the archive unciphered
    #[builder(default)]
    pub key: u32,

    /// Set the encrypt flag on every chunk and obfuscate its payload
    #[builder(default)]
    pub encrypt_chunks: bool,

    /// Wrap the version 2 directory and name blocks in chunks as well
    #[builder(default)]
    pub compress_directory: bool,

    /// Modification time recorded in version 2 file records, defaults to now
    pub timestamp: Option<u32>,
}

impl Default for HpiWriterOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl HpiWriterOptions {
    fn validate(&self) -> Result<()> {
        if self.key != 0 && self.version != HpiVersion::V1 {
            return Err(ArgumentError::CipherRequiresV1.into());
        }
        Ok(())
    }
}

/// HPI archive generator
///
/// Files are collected in memory and the whole archive is laid out by [`HpiWriter::finish`],
/// starting at offset zero of the inner writer.
///
/// ```
/// # fn doit() -> hpi::error::Result<()>
/// # {
/// # use hpi::HpiWriter;
/// use std::io::Write;
/// use hpi::write::HpiWriterOptions;
///
/// // We use a buffer here, though you'd normally use a `File`
/// let mut hpi = HpiWriter::new(std::io::Cursor::new(Vec::new()), HpiWriterOptions::builder()
///            .version(hpi::HpiVersion::V2)
///            .compression(hpi::CompressionMethod::Lz77)
///            .build());
///
/// hpi.start_file("scripts/hello_world.txt")?;
/// hpi.write_all(b"Hello, World!")?;
///
/// // Apply the changes you've made.
/// hpi.finish()?;
///
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct HpiWriter<W: Write + Seek> {
    inner: W,
    options: HpiWriterOptions,
    files: Vec<HpiFileEntry>,
    paths: HashSet<Box<str>>,
    writing_to_file: bool,
}

impl<W: Write + Seek> Debug for HpiWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "HpiWriter({:?}, {} files)", self.options, self.files.len())
    }
}

impl<W: Write + Seek> HpiWriter<W> {
    /// Initializes the archive.
    ///
    /// Before writing to this object, the [`HpiWriter::start_file`] function should be called.
    pub fn new(inner: W, options: HpiWriterOptions) -> HpiWriter<W> {
        HpiWriter {
            inner,
            options,
            files: Vec::new(),
            paths: HashSet::new(),
            writing_to_file: false,
        }
    }

    /// Returns true if a file is currently open for writing.
    pub const fn is_writing_file(&self) -> bool {
        self.writing_to_file
    }

    /// Start a new file, closing the previous one.
    ///
    /// Both `/` and `\` separate directories. Paths must be unique, ignoring ASCII case.
    #[instrument(skip(self, name), fields(name = %name.as_ref()), err)]
    pub fn start_file(&mut self, name: impl AsRef<str>) -> Result<()> {
        let name = name.as_ref();
        self.writing_to_file = false;

        split_path(name)?;
        if !self.paths.insert(index_key(name)) {
            return Err(ArgumentError::DuplicatePath(name.to_owned()).into());
        }

        self.files.push(HpiFileEntry::new(name, Vec::new()));
        self.writing_to_file = true;

        Ok(())
    }

    /// Adds a complete file in one call
    pub fn add_file(&mut self, name: impl AsRef<str>, data: &[u8]) -> Result<()> {
        self.start_file(name)?;
        self.write_all(data)?;
        Ok(())
    }

    /// Write all HPI structures and file data
    ///
    /// This will return the writer, but one should normally not append any data to the end of the file.
    #[instrument(skip(self), fields(files = self.files.len()), err)]
    pub fn finish(mut self) -> Result<W> {
        self.options.validate()?;

        match self.options.version {
            HpiVersion::V1 => V1Format::write(&mut self.inner, &self.files, &self.options)?,
            HpiVersion::V2 => V2Format::write(&mut self.inner, &self.files, &self.options)?,
        }
        self.inner.flush()?;

        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for HpiWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size = buf.len()))]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.files.last_mut() {
            Some(file) if self.writing_to_file => {
                file.data.extend_from_slice(buf);
                Ok(buf.len())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                ArgumentError::NoFileStarted,
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes `files` into a new archive at `path`.
///
/// Paths and options are validated before the destination is created.
#[instrument(skip(path, files), fields(path = %path.as_ref().display(), files = files.len()), err)]
pub fn write_archive(
    path: impl AsRef<Path>,
    files: &[HpiFileEntry],
    options: HpiWriterOptions,
) -> Result<()> {
    options.validate()?;
    DirectoryNode::build(files.iter().map(|f| f.relative_path.as_str()))?;

    let mut writer = HpiWriter::new(BufWriter::new(File::create(path)?), options);
    for file in files {
        writer.add_file(&file.relative_path, &file.data)?;
    }
    writer.finish()?;

    Ok(())
}
