//! Chunk compression, decompression and integrity handling.

use std::io::{Cursor, Read, Seek, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt};
use flate2::{read::DeflateDecoder, write::ZlibEncoder, Compression};
use tracing::{instrument, warn};

use crate::error::{ArgumentError, Error, FormatError, IntegrityError, Result};
use crate::types::ChunkHeader;

/// Largest amount of file data a single version 1 chunk holds
pub const CHUNK_SIZE: usize = 65536;

const WINDOW_SIZE: usize = 4096;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;
const MIN_MATCH: usize = 2;
const MAX_MATCH: usize = 17;
const MAX_DISTANCE: usize = WINDOW_SIZE - 1;
const MAX_CHAIN: usize = 64;
const NO_POSITION: usize = usize::MAX;

/// Identifies the storage format used to compress a chunk inside the HPI file
///
/// When creating HPI files, you may choose the method via [`crate::write::HpiWriterOptions`].
/// [`CompressionMethod::None`] stores files without any chunk at all.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stores the data as it is
    None,

    /// The original LZ77 variant with a 4096 byte window
    Lz77,

    /// Compress the data using deflate inside a zlib envelope
    #[default]
    Deflate,

    /// A value this library does not know how to decode
    Other(u8),
}

impl From<u8> for CompressionMethod {
    fn from(value: u8) -> Self {
        match value {
            0 => CompressionMethod::None,
            1 => CompressionMethod::Lz77,
            2 => CompressionMethod::Deflate,
            other => CompressionMethod::Other(other),
        }
    }
}

impl From<CompressionMethod> for u8 {
    fn from(value: CompressionMethod) -> Self {
        match value {
            CompressionMethod::None => 0,
            CompressionMethod::Lz77 => 1,
            CompressionMethod::Deflate => 2,
            CompressionMethod::Other(other) => other,
        }
    }
}

/// Decodes an LZ77 stream until its end marker.
///
/// A flag byte precedes every group of eight tokens, least significant bit first.
/// A clear bit copies one literal byte, a set bit reads a little endian `u16` whose upper
/// 12 bits index the window and whose lower 4 bits hold the run length minus two.
/// Window index zero ends the stream.
pub fn lz77_decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Cursor::new(input);
    let mut window = [0u8; WINDOW_SIZE];
    let mut window_index = 1;
    let mut output = Vec::with_capacity(input.len() * 2);

    let mut flags = reader.read_u8().map_err(|_| IntegrityError::Truncated)?;
    let mut mask = 1u16;

    loop {
        if u16::from(flags) & mask == 0 {
            let byte = reader.read_u8().map_err(|_| IntegrityError::Truncated)?;
            output.push(byte);
            window[window_index] = byte;
            window_index = (window_index + 1) & WINDOW_MASK;
        } else {
            let token = reader
                .read_u16::<LittleEndian>()
                .map_err(|_| IntegrityError::Truncated)?;

            let mut source = usize::from(token >> 4);
            if source == 0 {
                return Ok(output);
            }

            let count = usize::from(token & 0x0F) + MIN_MATCH;
            for _ in 0..count {
                let byte = window[source];
                output.push(byte);
                window[window_index] = byte;
                source = (source + 1) & WINDOW_MASK;
                window_index = (window_index + 1) & WINDOW_MASK;
            }
        }

        mask <<= 1;
        if mask > 0xFF {
            mask = 1;
            flags = reader.read_u8().map_err(|_| IntegrityError::Truncated)?;
        }
    }
}

/// Collects tokens behind their shared flag bytes
struct TokenWriter {
    output: Vec<u8>,
    flag_position: usize,
    tokens_in_group: u8,
}

impl TokenWriter {
    fn new() -> Self {
        Self {
            output: vec![0],
            flag_position: 0,
            tokens_in_group: 0,
        }
    }

    fn next_token(&mut self) {
        if self.tokens_in_group == 8 {
            self.flag_position = self.output.len();
            self.output.push(0);
            self.tokens_in_group = 0;
        }
    }

    fn literal(&mut self, byte: u8) {
        self.next_token();
        self.output.push(byte);
        self.tokens_in_group += 1;
    }

    fn reference(&mut self, token: u16) {
        self.next_token();
        self.output[self.flag_position] |= 1 << self.tokens_in_group;
        self.output.extend_from_slice(&token.to_le_bytes());
        self.tokens_in_group += 1;
    }

    fn finish(mut self) -> Vec<u8> {
        self.reference(0);
        self.output
    }
}

fn pair_hash(input: &[u8], position: usize) -> Option<usize> {
    input
        .get(position..position + 2)
        .map(|pair| usize::from(pair[0]) | usize::from(pair[1]) << 8)
}

/// Encodes `input` into the stream format read by [`lz77_decompress`].
///
/// Matches are found greedily through hash chains keyed on two byte prefixes.
/// Positions whose window slot would be index zero are never referenced since
/// that index is reserved for the end marker.
pub fn lz77_compress(input: &[u8]) -> Vec<u8> {
    let mut tokens = TokenWriter::new();
    let mut head = vec![NO_POSITION; 1 << 16];
    let mut chain = vec![NO_POSITION; input.len()];

    let mut position = 0;
    while position < input.len() {
        let (length, start) = longest_match(input, position, &head, &chain);

        let advance = if length >= MIN_MATCH {
            let source = ((start + 1) & WINDOW_MASK) as u16;
            tokens.reference(source << 4 | (length - MIN_MATCH) as u16);
            length
        } else {
            tokens.literal(input[position]);
            1
        };

        for inserted in position..position + advance {
            if let Some(hash) = pair_hash(input, inserted) {
                chain[inserted] = head[hash];
                head[hash] = inserted;
            }
        }
        position += advance;
    }

    tokens.finish()
}

fn longest_match(input: &[u8], position: usize, head: &[usize], chain: &[usize]) -> (usize, usize) {
    let Some(hash) = pair_hash(input, position) else {
        return (0, 0);
    };

    let limit = (input.len() - position).min(MAX_MATCH);
    let wanted = &input[position..position + limit];

    let mut best = (0, 0);
    let mut candidate = head[hash];
    for _ in 0..MAX_CHAIN {
        if candidate == NO_POSITION || position - candidate > MAX_DISTANCE {
            break;
        }

        if (candidate + 1) & WINDOW_MASK != 0 {
            let length = input[candidate..]
                .iter()
                .zip(wanted)
                .take_while(|(a, b)| a == b)
                .count();

            if length > best.0 {
                best = (length, candidate);
                if length == limit {
                    break;
                }
            }
        }

        candidate = chain[candidate];
    }

    best
}

/// Inflates a zlib enveloped payload, ignoring its two byte header and Adler-32 trailer.
pub fn deflate_decompress(input: &[u8]) -> Result<Vec<u8>> {
    let body = input
        .len()
        .checked_sub(4)
        .and_then(|end| input.get(2..end))
        .ok_or(IntegrityError::Truncated)?;

    let mut output = Vec::new();
    DeflateDecoder::new(body)
        .read_to_end(&mut output)
        .map_err(|e| IntegrityError::CorruptStream(e.to_string()))?;

    Ok(output)
}

/// Deflates `input` behind a `78 9C` header, followed by the Adler-32 of `input`.
pub fn deflate_compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

/// Sums the stored payload bytes, deciphering them in place when `encrypted` is set.
pub fn checksum(payload: &mut [u8], encrypted: bool) -> u32 {
    let mut sum = 0u32;
    for (index, byte) in payload.iter_mut().enumerate() {
        sum = sum.wrapping_add(u32::from(*byte));
        if encrypted {
            let index = index as u8;
            *byte = byte.wrapping_sub(index) ^ index;
        }
    }
    sum
}

fn encipher(payload: &mut [u8]) {
    for (index, byte) in payload.iter_mut().enumerate() {
        let index = index as u8;
        *byte = (*byte ^ index).wrapping_add(index);
    }
}

/// A single SQSH chunk: header plus stored payload
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Header as stored in the archive
    pub header: ChunkHeader,

    /// Payload bytes exactly as stored (compressed and possibly enciphered)
    pub payload: Vec<u8>,
}

impl Chunk {
    /// Compress `data` into a new chunk
    #[instrument(skip(data), fields(size = data.len()), err)]
    pub fn compress(data: &[u8], compression: CompressionMethod, encrypt: bool) -> Result<Self> {
        let mut payload = match compression {
            CompressionMethod::Lz77 => lz77_compress(data),
            CompressionMethod::Deflate => deflate_compress(data)?,
            CompressionMethod::None | CompressionMethod::Other(_) => {
                return Err(ArgumentError::ChunkRequiresCompression.into())
            }
        };

        if encrypt {
            encipher(&mut payload);
        }

        let too_large = |_| Error::from(ArgumentError::ArchiveTooLarge);
        Ok(Self {
            header: ChunkHeader {
                unknown: 2,
                compression,
                encrypted: encrypt,
                compressed_size: u32::try_from(payload.len()).map_err(too_large)?,
                decompressed_size: u32::try_from(data.len()).map_err(too_large)?,
                checksum: payload
                    .iter()
                    .fold(0u32, |sum, byte| sum.wrapping_add(u32::from(*byte))),
            },
            payload,
        })
    }

    /// Read a chunk header and its payload
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let header = ChunkHeader::read(reader).map_err(|e| match e {
            binrw::Error::BadMagic { .. } => Error::from(FormatError::MissingChunkMarker),
            e => Error::from(e),
        })?;

        let mut payload = Vec::new();
        reader
            .take(u64::from(header.compressed_size))
            .read_to_end(&mut payload)?;
        if payload.len() != header.compressed_size as usize {
            return Err(IntegrityError::Truncated.into());
        }

        Ok(Self { header, payload })
    }

    /// Number of bytes the chunk occupies in the archive
    pub fn stored_size(&self) -> usize {
        ChunkHeader::SIZE + self.payload.len()
    }

    /// Serialize the header followed by the payload
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut output = Cursor::new(Vec::with_capacity(self.stored_size()));
        self.header.write(&mut output)?;
        output.write_all(&self.payload)?;
        Ok(output.into_inner())
    }

    /// Verify the checksum and decompress the payload
    ///
    /// Chunks using a method other than LZ77 or deflate produce no data rather than an error,
    /// as the original tools did.
    pub fn decompress(mut self) -> Result<Vec<u8>> {
        let actual = checksum(&mut self.payload, self.header.encrypted);
        if actual != self.header.checksum {
            return Err(IntegrityError::ChecksumMismatch {
                expected: self.header.checksum,
                actual,
            }
            .into());
        }

        let output = match self.header.compression {
            CompressionMethod::Lz77 => lz77_decompress(&self.payload)?,
            CompressionMethod::Deflate => deflate_decompress(&self.payload)?,
            method => {
                warn!(?method, "unknown chunk compression, yielding no data");
                return Ok(Vec::new());
            }
        };

        if output.len() != self.header.decompressed_size as usize {
            return Err(IntegrityError::SizeMismatch {
                expected: u64::from(self.header.decompressed_size),
                actual: output.len() as u64,
            }
            .into());
        }

        Ok(output)
    }
}
