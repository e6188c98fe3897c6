//! Version 1 layout: an offset chained directory behind an optional positional cipher.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, instrument, trace};

use crate::cipher::Cipher;
use crate::compression::{Chunk, CompressionMethod, CHUNK_SIZE};
use crate::error::{FormatError, Result};
use crate::format::{read_region, read_name, slice_at, to_u32, ArchiveFormat};
use crate::read::HpiFileEntry;
use crate::tree::{join, DirectoryNode, NamePool, MAX_DEPTH};
use crate::types::{Preamble, V1Entry, V1FileRecord, V1Header, V1Node, VERSION_1_MARKER};
use crate::write::HpiWriterOptions;

/// Bytes in front of the directory: signature, version marker and [`V1Header`]
pub const PREAMBLE_SIZE: u32 = (Preamble::SIZE + V1Header::SIZE) as u32;

/// Converts a pointer stored in the directory into an index of the directory buffer.
pub fn directory_index(pointer: u32, directory_len: usize) -> Result<usize> {
    pointer
        .checked_sub(PREAMBLE_SIZE)
        .map(|index| index as usize)
        .filter(|index| *index < directory_len)
        .ok_or_else(|| {
            FormatError::OffsetOutOfRange {
                offset: u64::from(pointer),
                len: directory_len as u64,
            }
            .into()
        })
}

/// Inverse of [`directory_index`]
pub fn stored_pointer(index: usize) -> Result<u32> {
    to_u32(index as u64 + u64::from(PREAMBLE_SIZE))
}

/// Number of SQSH chunks a file of `length` bytes is split into
pub fn chunk_count(length: u32) -> usize {
    (length as usize).div_ceil(CHUNK_SIZE)
}

/// Reader and writer for version 1 archives
#[derive(Debug, Clone, Copy, Default)]
pub struct V1Format {
    cipher: Cipher,
}

impl V1Format {
    fn read_deciphered<R: Read + Seek>(&self, reader: &mut R, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut buffer = read_region(reader, offset, len)?;
        self.cipher.apply(&mut buffer, offset);
        Ok(buffer)
    }
}

fn walk(
    directory: &[u8],
    node_index: usize,
    parent: &str,
    depth: usize,
    files: &mut Vec<(String, V1FileRecord)>,
) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(FormatError::DirectoryTooDeep(MAX_DEPTH).into());
    }

    let node = V1Node::read(&mut Cursor::new(slice_at(directory, node_index, V1Node::SIZE)?))?;
    if node.entry_count == 0 {
        return Ok(());
    }

    let entry_list = directory_index(node.entry_list, directory.len())?;

    for i in 0..node.entry_count as usize {
        let at = entry_list.saturating_add(i.saturating_mul(V1Entry::SIZE));
        let entry = V1Entry::read(&mut Cursor::new(slice_at(directory, at, V1Entry::SIZE)?))?;

        let name = read_name(directory, directory_index(entry.name_offset, directory.len())?)?;
        let path = join(parent, &name);
        let target = directory_index(entry.target_offset, directory.len())?;

        if entry.is_directory {
            walk(directory, target, &path, depth + 1, files)?;
        } else {
            let record =
                V1FileRecord::read(&mut Cursor::new(slice_at(directory, target, V1FileRecord::SIZE)?))?;
            trace!(%path, ?record, "file");
            files.push((path, record));
        }
    }

    Ok(())
}

/// Size of the node, its descendants, file records and entry arrays, names excluded
fn structure_size(node: &DirectoryNode) -> usize {
    V1Node::SIZE
        + node.subdirectories.values().map(structure_size).sum::<usize>()
        + node.files.len() * V1FileRecord::SIZE
        + node.entry_count() * V1Entry::SIZE
}

fn collect_names(node: &DirectoryNode, names: &mut NamePool) -> Result<()> {
    for subdirectory in node.subdirectories.values() {
        names.intern(&subdirectory.name)?;
        collect_names(subdirectory, names)?;
    }
    for file in &node.files {
        names.intern(&file.name)?;
    }
    Ok(())
}

struct DirectoryWriter<'a> {
    directory: Cursor<Vec<u8>>,
    names: &'a mut NamePool,
    names_start: usize,
    records: &'a [V1FileRecord],
}

impl DirectoryWriter<'_> {
    fn name_pointer(&mut self, name: &str) -> Result<u32> {
        let offset = self.names.intern(name)?;
        stored_pointer(self.names_start + offset as usize)
    }

    fn position(&self) -> usize {
        self.directory.position() as usize
    }

    fn write_node(&mut self, node: &DirectoryNode) -> Result<()> {
        let node_at = self.directory.position();
        let mut header = V1Node {
            entry_count: to_u32(node.entry_count())?,
            entry_list: 0,
        };
        header.write(&mut self.directory)?;

        let mut entries = Vec::with_capacity(node.entry_count());
        for subdirectory in node.subdirectories.values() {
            entries.push(V1Entry {
                name_offset: self.name_pointer(&subdirectory.name)?,
                target_offset: stored_pointer(self.position())?,
                is_directory: true,
            });
            self.write_node(subdirectory)?;
        }

        for file in &node.files {
            entries.push(V1Entry {
                name_offset: self.name_pointer(&file.name)?,
                target_offset: stored_pointer(self.position())?,
                is_directory: false,
            });
            self.records[file.entry].write(&mut self.directory)?;
        }

        header.entry_list = stored_pointer(self.position())?;
        for entry in &entries {
            entry.write(&mut self.directory)?;
        }

        let end = self.directory.position();
        self.directory.seek(SeekFrom::Start(node_at))?;
        header.write(&mut self.directory)?;
        self.directory.seek(SeekFrom::Start(end))?;

        Ok(())
    }
}

/// Stored form of a file: raw bytes, or a chunk size table followed by the chunks
fn file_data(data: &[u8], options: &HpiWriterOptions) -> Result<(Vec<u8>, u8)> {
    if options.compression == CompressionMethod::None {
        return Ok((data.to_vec(), 0));
    }

    let chunks = data
        .chunks(CHUNK_SIZE)
        .map(|piece| Chunk::compress(piece, options.compression, options.encrypt_chunks)?.to_bytes())
        .collect::<Result<Vec<_>>>()?;

    let mut stored = Vec::with_capacity(chunks.len() * 4 + chunks.iter().map(Vec::len).sum::<usize>());
    for chunk in &chunks {
        stored.write_u32::<LittleEndian>(to_u32(chunk.len())?)?;
    }
    for chunk in chunks {
        stored.extend_from_slice(&chunk);
    }

    Ok((stored, 1))
}

impl ArchiveFormat for V1Format {
    type Location = V1FileRecord;

    #[instrument(skip_all, err)]
    fn open<R: Read + Seek>(reader: &mut R) -> Result<(Self, Vec<(String, V1FileRecord)>)> {
        let header = V1Header::read(reader)?;
        let format = V1Format {
            cipher: Cipher::new(header.key),
        };

        let len = header
            .directory_size
            .checked_sub(header.directory_start)
            .ok_or(FormatError::OffsetOutOfRange {
                offset: u64::from(header.directory_start),
                len: u64::from(header.directory_size),
            })?;
        debug!(
            start = header.directory_start,
            len,
            enciphered = format.cipher.is_enabled(),
            "reading directory"
        );

        let directory =
            format.read_deciphered(reader, u64::from(header.directory_start), u64::from(len))?;

        let mut files = Vec::new();
        walk(&directory, 0, "", 0, &mut files)?;

        Ok((format, files))
    }

    fn extract<R: Read + Seek>(&self, reader: &mut R, location: &V1FileRecord) -> Result<Vec<u8>> {
        let offset = u64::from(location.data_offset);
        if location.compression == 0 {
            return self.read_deciphered(reader, offset, u64::from(location.length));
        }

        let count = chunk_count(location.length);
        let table = self.read_deciphered(reader, offset, table_len(count))?;
        let mut sizes = vec![0u32; count];
        Cursor::new(table).read_u32_into::<LittleEndian>(&mut sizes)?;

        let mut position = offset + table_len(count);
        let mut output = Vec::new();
        for size in sizes {
            let stored = self.read_deciphered(reader, position, u64::from(size))?;
            let chunk = Chunk::read(&mut Cursor::new(stored))?;
            output.extend_from_slice(&chunk.decompress()?);
            position += u64::from(size);
        }

        Ok(output)
    }

    fn extracted_size(location: &V1FileRecord) -> u64 {
        u64::from(location.length)
    }

    #[instrument(skip_all, fields(files = files.len()), err)]
    fn write<W: Write + Seek>(
        writer: &mut W,
        files: &[HpiFileEntry],
        options: &HpiWriterOptions,
    ) -> Result<()> {
        let tree = DirectoryNode::build(files.iter().map(|f| f.relative_path.as_str()))?;
        let cipher = Cipher::new(options.key);

        let mut names = NamePool::new();
        collect_names(&tree, &mut names)?;

        let names_start = structure_size(&tree);
        let directory_end = PREAMBLE_SIZE as usize + names_start + names.len();

        let mut stored_files = Vec::with_capacity(files.len());
        let mut records = Vec::with_capacity(files.len());
        let mut data_offset = directory_end;
        for file in files {
            let (stored, compression) = file_data(&file.data, options)?;
            records.push(V1FileRecord {
                data_offset: to_u32(data_offset)?,
                length: to_u32(file.data.len())?,
                compression,
            });
            data_offset += stored.len();
            stored_files.push(stored);
        }
        let archive_end = to_u32(data_offset)?;

        let mut directory_writer = DirectoryWriter {
            directory: Cursor::new(Vec::with_capacity(names_start + names.len())),
            names: &mut names,
            names_start,
            records: &records,
        };
        directory_writer.write_node(&tree)?;
        let mut directory = directory_writer.directory.into_inner();
        directory.extend_from_slice(names.as_bytes());
        cipher.apply(&mut directory, u64::from(PREAMBLE_SIZE));

        debug!(directory = directory.len(), archive_end, "writing archive");

        writer.seek(SeekFrom::Start(0))?;
        Preamble {
            version: VERSION_1_MARKER,
        }
        .write(writer)?;
        V1Header {
            directory_size: to_u32(directory_end)?,
            key: options.key,
            directory_start: PREAMBLE_SIZE,
        }
        .write(writer)?;
        writer.write_all(&directory)?;

        for (mut stored, record) in stored_files.into_iter().zip(&records) {
            cipher.apply(&mut stored, u64::from(record.data_offset));
            writer.write_all(&stored)?;
        }

        Ok(())
    }
}

fn table_len(count: usize) -> u64 {
    count as u64 * 4
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinRead;
    use pretty_assertions::{assert_eq, assert_str_eq};
    use tracing_test::traced_test;

    use super::{chunk_count, directory_index, stored_pointer, V1Format};
    use crate::compression::CompressionMethod;
    use crate::error::{Error, FormatError, IntegrityError, Result};
    use crate::format::ArchiveFormat;
    use crate::read::HpiFileEntry;
    use crate::types::{ChunkHeader, Preamble, V1FileRecord};
    use crate::write::HpiWriterOptions;

    #[rustfmt::skip]
    const SINGLE_RAW_FILE: &[u8] = &[
        // Preamble
        0x48, 0x41, 0x50, 0x49, 0x00, 0x00, 0x01, 0x00,
        // Header
        0x34, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
        0x14, 0x00, 0x00, 0x00,
        // Root node
        0x01, 0x00, 0x00, 0x00,
        0x25, 0x00, 0x00, 0x00,
        // File record
        0x34, 0x00, 0x00, 0x00,
        0x05, 0x00, 0x00, 0x00,
        0x00,
        // Entry
        0x2E, 0x00, 0x00, 0x00,
        0x1C, 0x00, 0x00, 0x00,
        0x00,
        // Names
        0x61, 0x2E, 0x74, 0x78, 0x74, 0x00,
        // Data
        0x68, 0x65, 0x6C, 0x6C, 0x6F,
    ];

    fn open(bytes: &[u8]) -> Result<(V1Format, Vec<(String, V1FileRecord)>, Cursor<&[u8]>)> {
        let mut reader = Cursor::new(bytes);
        reader.set_position(Preamble::SIZE);
        let (format, files) = V1Format::open(&mut reader)?;
        Ok((format, files, reader))
    }

    fn write(files: &[HpiFileEntry], options: HpiWriterOptions) -> Result<Vec<u8>> {
        let mut output = Cursor::new(Vec::new());
        V1Format::write(&mut output, files, &options)?;
        Ok(output.into_inner())
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8 ^ (i / 7919) as u8).collect()
    }

    #[test]
    fn pointer_correction() -> Result<()> {
        assert_eq!(directory_index(20, 8)?, 0);
        assert_eq!(directory_index(27, 8)?, 7);
        assert_eq!(stored_pointer(7)?, 27);

        assert!(matches!(
            directory_index(19, 8),
            Err(Error::Format(FormatError::OffsetOutOfRange { offset: 19, len: 8 }))
        ));
        assert!(directory_index(28, 8).is_err());

        Ok(())
    }

    #[test]
    fn chunk_counts() {
        assert_eq!(chunk_count(0), 0);
        assert_eq!(chunk_count(1), 1);
        assert_eq!(chunk_count(65536), 1);
        assert_eq!(chunk_count(65537), 2);
        assert_eq!(chunk_count(200_000), 4);
    }

    #[test]
    fn read_single_raw_file() -> Result<()> {
        let (format, files, mut reader) = open(SINGLE_RAW_FILE)?;

        assert_eq!(
            files,
            [(
                "a.txt".to_string(),
                V1FileRecord {
                    data_offset: 0x34,
                    length: 5,
                    compression: 0
                }
            )]
        );
        assert_eq!(format.extract(&mut reader, &files[0].1)?, b"hello");

        Ok(())
    }

    #[traced_test]
    #[test]
    fn write_single_raw_file() -> Result<()> {
        let actual = write(
            &[HpiFileEntry::new("a.txt", *b"hello")],
            HpiWriterOptions::builder()
                .compression(CompressionMethod::None)
                .build(),
        )?;

        assert_str_eq!(
            format!("{:02X?}", actual),
            format!("{:02X?}", SINGLE_RAW_FILE)
        );

        Ok(())
    }

    #[test]
    fn pointer_before_directory() {
        let mut bytes = SINGLE_RAW_FILE.to_vec();
        // entry name pointer
        bytes[37] = 0x04;

        assert!(matches!(
            open(&bytes),
            Err(Error::Format(FormatError::OffsetOutOfRange { offset: 4, .. }))
        ));
    }

    #[test]
    fn pointer_past_directory() {
        let mut bytes = SINGLE_RAW_FILE.to_vec();
        // entry target pointer
        bytes[41] = 0x60;

        assert!(matches!(
            open(&bytes),
            Err(Error::Format(FormatError::OffsetOutOfRange { offset: 0x60, .. }))
        ));
    }

    #[test]
    fn directory_cycle() {
        #[rustfmt::skip]
        let bytes = [
            0x48, 0x41, 0x50, 0x49, 0x00, 0x00, 0x01, 0x00,
            0x27, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x14, 0x00, 0x00, 0x00,
            // root lists itself
            0x01, 0x00, 0x00, 0x00,
            0x1C, 0x00, 0x00, 0x00,
            0x25, 0x00, 0x00, 0x00,
            0x14, 0x00, 0x00, 0x00,
            0x01,
            0x61, 0x00,
        ];

        assert!(matches!(
            open(&bytes),
            Err(Error::Format(FormatError::DirectoryTooDeep(64)))
        ));
    }

    #[test]
    fn large_file_is_split_into_chunks() -> Result<()> {
        let data = sample(200_000);
        let bytes = write(
            &[HpiFileEntry::new("maps/big.tnt", data.clone())],
            HpiWriterOptions::default(),
        )?;

        let (format, files, mut reader) = open(&bytes)?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "maps/big.tnt");

        let record = files[0].1;
        assert_eq!(record.length, 200_000);
        assert_eq!(record.compression, 1);

        let offset = record.data_offset as usize;
        let sizes: Vec<usize> = bytes[offset..offset + 16]
            .chunks(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
            .collect();

        let mut position = offset + 16;
        let mut decompressed = Vec::new();
        for size in &sizes {
            let header = ChunkHeader::read(&mut Cursor::new(&bytes[position..]))?;
            assert_eq!(header.compression, CompressionMethod::Deflate);
            assert_eq!(header.compressed_size as usize + 19, *size);
            decompressed.push(header.decompressed_size);
            position += size;
        }
        assert_eq!(decompressed, [65536, 65536, 65536, 3152]);
        assert_eq!(position, bytes.len());

        assert_eq!(format.extract(&mut reader, &record)?, data);

        Ok(())
    }

    #[test]
    fn enciphered_archive_round_trip() -> Result<()> {
        let files = [
            HpiFileEntry::new("units/armcom.fbi", sample(3000)),
            HpiFileEntry::new("units/corcom.fbi", sample(100)),
            HpiFileEntry::new("readme.txt", b"read me".to_vec()),
        ];

        for compression in [
            CompressionMethod::None,
            CompressionMethod::Lz77,
            CompressionMethod::Deflate,
        ] {
            let plain = write(
                &files,
                HpiWriterOptions::builder().compression(compression).build(),
            )?;
            let enciphered = write(
                &files,
                HpiWriterOptions::builder()
                    .compression(compression)
                    .key(0x7D)
                    .encrypt_chunks(true)
                    .build(),
            )?;

            assert_eq!(plain.len(), enciphered.len());
            assert_ne!(plain[20..], enciphered[20..]);

            let (format, listed, mut reader) = open(&enciphered)?;
            let paths: Vec<&str> = listed.iter().map(|(path, _)| path.as_str()).collect();
            assert_eq!(paths, ["units/armcom.fbi", "units/corcom.fbi", "readme.txt"]);

            for ((_, location), file) in listed.iter().zip(&files) {
                assert_eq!(format.extract(&mut reader, location)?, file.data);
            }
        }

        Ok(())
    }

    #[test]
    fn corrupted_chunk_is_reported() -> Result<()> {
        let mut bytes = write(
            &[HpiFileEntry::new("a.bin", sample(1000))],
            HpiWriterOptions::default(),
        )?;
        let last = bytes.len() - 1;
        bytes[last] ^= 0x55;

        let (format, files, mut reader) = open(&bytes)?;
        assert!(matches!(
            format.extract(&mut reader, &files[0].1),
            Err(Error::Integrity(IntegrityError::ChecksumMismatch { .. }))
        ));

        Ok(())
    }

    #[test]
    fn empty_files() -> Result<()> {
        let bytes = write(
            &[
                HpiFileEntry::new("empty.txt", Vec::new()),
                HpiFileEntry::new("b/empty.txt", Vec::new()),
            ],
            HpiWriterOptions::default(),
        )?;

        let (format, files, mut reader) = open(&bytes)?;
        assert_eq!(files.len(), 2);
        for (_, location) in &files {
            assert_eq!(location.length, 0);
            assert!(format.extract(&mut reader, location)?.is_empty());
        }

        Ok(())
    }
}
