//! Version 2 layout: a directory block and a name block, each optionally compressed.

use std::borrow::Cow;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use binrw::{BinRead, BinWrite};
use tracing::{debug, instrument, trace};

use crate::compression::{Chunk, CompressionMethod};
use crate::error::{ArgumentError, FormatError, IntegrityError, Result};
use crate::format::{element, read_name, read_region, slice_at, to_u32, ArchiveFormat};
use crate::read::HpiFileEntry;
use crate::tree::{join, DirectoryNode, NamePool, MAX_DEPTH};
use crate::types::{
    Preamble, V2DirRecord, V2FileRecord, V2Header, CHUNK_MARKER, VERSION_2_MARKER,
};
use crate::write::HpiWriterOptions;

/// Reader and writer for version 2 archives
#[derive(Debug, Clone, Copy, Default)]
pub struct V2Format;

/// Reads a directory or name block, decompressing it when it is wrapped in a chunk.
fn read_block<R: Read + Seek>(reader: &mut R, offset: u32, size: u32) -> Result<Vec<u8>> {
    let block = read_region(reader, u64::from(offset), u64::from(size))?;
    if block.starts_with(CHUNK_MARKER) {
        trace!(offset, size, "compressed block");
        return Chunk::read(&mut Cursor::new(block))?.decompress();
    }
    Ok(block)
}

fn walk(
    directory: &[u8],
    names: &[u8],
    offset: usize,
    parent: &str,
    depth: usize,
    files: &mut Vec<(String, V2FileRecord)>,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(FormatError::DirectoryTooDeep(MAX_DEPTH).into());
    }

    let record =
        V2DirRecord::read(&mut Cursor::new(slice_at(directory, offset, V2DirRecord::SIZE)?))?;

    let path = match record.name_pointer {
        0 => parent.to_owned(),
        pointer => join(parent, &read_name(names, pointer as usize)?),
    };

    for i in 0..record.subdirectory_count {
        let at = element(record.first_subdirectory, i, V2DirRecord::SIZE);
        walk(directory, names, at, &path, depth + 1, files)?;
    }

    for i in 0..record.file_count {
        let at = element(record.first_file, i, V2FileRecord::SIZE);
        let file =
            V2FileRecord::read(&mut Cursor::new(slice_at(directory, at, V2FileRecord::SIZE)?))?;
        let file_path = join(&path, &read_name(names, file.name_pointer as usize)?);

        trace!(path = %file_path, ?file, "file");
        files.push((file_path, file));
    }

    Ok(())
}

#[derive(Debug)]
struct FileSlot {
    entry: usize,
    at: usize,
    record: V2FileRecord,
}

/// Directory block under construction
#[derive(Debug)]
struct BlockLayout {
    directory: Vec<u8>,
    names: NamePool,
    slots: Vec<FileSlot>,
    date: u32,
}

impl BlockLayout {
    fn reserve(&mut self, size: usize) -> usize {
        let at = self.directory.len();
        self.directory.resize(at + size, 0);
        at
    }

    /// Lays out the record arrays of `node` and fills in its own record at `slot`.
    fn place(&mut self, node: &DirectoryNode, slot: usize, name_pointer: u32) -> Result<()> {
        let first_subdirectory = self.reserve(node.subdirectories.len() * V2DirRecord::SIZE);
        let first_file = self.reserve(node.files.len() * V2FileRecord::SIZE);

        for (i, file) in node.files.iter().enumerate() {
            let record = V2FileRecord {
                name_pointer: self.names.intern(&file.name)?,
                date: self.date,
                ..Default::default()
            };
            self.slots.push(FileSlot {
                entry: file.entry,
                at: first_file + i * V2FileRecord::SIZE,
                record,
            });
        }

        let record = V2DirRecord {
            name_pointer,
            first_subdirectory: match node.subdirectories.len() {
                0 => 0,
                _ => to_u32(first_subdirectory)?,
            },
            subdirectory_count: to_u32(node.subdirectories.len())?,
            first_file: match node.files.len() {
                0 => 0,
                _ => to_u32(first_file)?,
            },
            file_count: to_u32(node.files.len())?,
        };
        record.write(&mut Cursor::new(&mut self.directory[slot..]))?;

        for (i, subdirectory) in node.subdirectories.values().enumerate() {
            let name_pointer = self.names.intern(&subdirectory.name)?;
            self.place(
                subdirectory,
                first_subdirectory + i * V2DirRecord::SIZE,
                name_pointer,
            )?;
        }

        Ok(())
    }

    fn finish(mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        for slot in &self.slots {
            slot.record
                .write(&mut Cursor::new(&mut self.directory[slot.at..]))?;
        }
        Ok((self.directory, self.names.as_bytes().to_vec()))
    }
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or_default()
}

fn stored_block(block: Vec<u8>, options: &HpiWriterOptions) -> Result<Vec<u8>> {
    if !options.compress_directory || options.compression == CompressionMethod::None {
        return Ok(block);
    }
    Chunk::compress(&block, options.compression, options.encrypt_chunks)?.to_bytes()
}

impl ArchiveFormat for V2Format {
    type Location = V2FileRecord;

    #[instrument(skip_all, err)]
    fn open<R: Read + Seek>(reader: &mut R) -> Result<(Self, Vec<(String, V2FileRecord)>)> {
        let header = V2Header::read(reader)?;
        debug!(?header, "reading directory");

        let directory = read_block(reader, header.directory_offset, header.directory_size)?;
        let names = read_block(reader, header.name_offset, header.name_size)?;

        let mut files = Vec::new();
        walk(&directory, &names, 0, "", 0, &mut files)?;

        Ok((V2Format, files))
    }

    fn extract<R: Read + Seek>(&self, reader: &mut R, location: &V2FileRecord) -> Result<Vec<u8>> {
        let start = u64::from(location.data_start);
        if location.compressed_size == 0 {
            return read_region(reader, start, u64::from(location.decompressed_size));
        }

        let stored = read_region(reader, start, u64::from(location.compressed_size))?;
        let chunk = Chunk::read(&mut Cursor::new(stored))?;
        if chunk.header.decompressed_size != location.decompressed_size {
            return Err(IntegrityError::SizeMismatch {
                expected: u64::from(location.decompressed_size),
                actual: u64::from(chunk.header.decompressed_size),
            }
            .into());
        }

        chunk.decompress()
    }

    fn extracted_size(location: &V2FileRecord) -> u64 {
        u64::from(location.decompressed_size)
    }

    #[instrument(skip_all, fields(files = files.len()), err)]
    fn write<W: Write + Seek>(
        writer: &mut W,
        files: &[HpiFileEntry],
        options: &HpiWriterOptions,
    ) -> Result<()> {
        if options.key != 0 {
            return Err(ArgumentError::CipherRequiresV1.into());
        }

        let tree = DirectoryNode::build(files.iter().map(|f| f.relative_path.as_str()))?;
        let mut layout = BlockLayout {
            directory: Vec::new(),
            names: NamePool::with_leading_null(),
            slots: Vec::with_capacity(files.len()),
            date: options.timestamp.unwrap_or_else(now),
        };
        let root = layout.reserve(V2DirRecord::SIZE);
        layout.place(&tree, root, 0)?;

        let mut header = V2Header::default();
        writer.seek(SeekFrom::Start(0))?;
        Preamble {
            version: VERSION_2_MARKER,
        }
        .write(writer)?;
        header.write(writer)?;

        let mut position = u64::from(header.data_start);
        for slot in &mut layout.slots {
            let data = &files[slot.entry].data;
            let stored = if data.is_empty() || options.compression == CompressionMethod::None {
                Cow::Borrowed(data.as_slice())
            } else {
                Cow::Owned(
                    Chunk::compress(data, options.compression, options.encrypt_chunks)?
                        .to_bytes()?,
                )
            };

            slot.record.data_start = to_u32(position)?;
            slot.record.decompressed_size = to_u32(data.len())?;
            slot.record.compressed_size = match &stored {
                Cow::Borrowed(_) => 0,
                Cow::Owned(chunk) => to_u32(chunk.len())?,
            };

            writer.write_all(&stored)?;
            position += stored.len() as u64;
        }

        let (directory, names) = layout.finish()?;
        let directory = stored_block(directory, options)?;
        let names = stored_block(names, options)?;

        header.directory_offset = to_u32(position)?;
        header.directory_size = to_u32(directory.len())?;
        header.name_offset = to_u32(position + directory.len() as u64)?;
        header.name_size = to_u32(names.len())?;
        let archive_end = to_u32(u64::from(header.name_offset) + names.len() as u64)?;
        debug!(?header, archive_end, "writing directory");

        writer.write_all(&directory)?;
        writer.write_all(&names)?;

        writer.seek(SeekFrom::Start(Preamble::SIZE))?;
        header.write(writer)?;
        writer.seek(SeekFrom::End(0))?;

        Ok(())
    }
}
