//! BGZF block codec (C2): decode, fast-path decode, encode, and header validation.
//!
//! A BGZF block is a gzip member with a fixed-shape 12-byte header, a `BC`
//! extra subfield carrying the total block size, a raw DEFLATE payload, and
//! a trailing CRC32 + uncompressed-length footer.

use crate::error::{CoreError, Result};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use std::io::{self, Read, Write};

const GZIP_ID1: u8 = 0x1f;
const GZIP_ID2: u8 = 0x8b;
const GZIP_CM_DEFLATE: u8 = 8;
const GZIP_FLG_FEXTRA: u8 = 4;
const BGZF_MAGIC: [u8; 4] = [GZIP_ID1, GZIP_ID2, GZIP_CM_DEFLATE, GZIP_FLG_FEXTRA];
const BGZF_SUBFIELD_ID: [u8; 2] = [b'B', b'C'];

/// Maximum decompressed payload size of a single BGZF block (2^16).
pub const MAX_BLOCK_PAYLOAD: usize = 65_536;

/// The fixed 28-byte block that must terminate every well-formed BGZF file.
pub const EOF_SENTINEL: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, b'B', b'C', 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Result of fully decoding one BGZF block.
#[derive(Debug, Clone)]
pub struct DecodedBlock
{
    /// Total on-disk size of the block (header + extra + deflate + footer).
    pub block_size: usize,
    /// Decompressed payload, at most [`MAX_BLOCK_PAYLOAD`] bytes.
    pub payload: Vec<u8>,
}

/// Stateless BGZF block encode/decode operations.
pub struct BlockCodec;

impl BlockCodec
{
    /// Decode the next BGZF block starting at the reader's current position.
    ///
    /// `offset` is the absolute file offset of the block's first byte; it is
    /// only used to annotate errors (this function does not seek).
    ///
    /// Validates the gzip magic, requires exactly one `BC` extra subfield of
    /// length 2, and checks both the CRC32 and the decompressed length
    /// against the block's footer.
    pub fn decode<R: Read>(reader: &mut R, offset: u64) -> Result<DecodedBlock>
    {
        let mut header = [0u8; 12];
        read_exact_at(reader, &mut header, offset, "block header")?;

        if header[0..4] != BGZF_MAGIC
        {
            return Err(CoreError::BadMagic {
                offset,
                expected: &BGZF_MAGIC,
                got: header[0..4].to_vec(),
            });
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        read_exact_at(reader, &mut extra, offset, "extra subfields")?;

        let bsize = find_bc_subfield(&extra, offset)?;
        let block_size = bsize as usize + 1;

        let deflate_len = block_size
            .checked_sub(12 + xlen + 8)
            .ok_or(CoreError::MalformedBgzf {
                offset,
                reason: "BSIZE too small to hold header, extra field, and footer",
            })?;

        let mut deflate_data = vec![0u8; deflate_len];
        read_exact_at(reader, &mut deflate_data, offset, "deflate payload")?;

        let mut footer = [0u8; 8];
        read_exact_at(reader, &mut footer, offset, "block footer")?;
        let expected_crc = u32::from_le_bytes(footer[0..4].try_into().unwrap());
        let expected_len = u32::from_le_bytes(footer[4..8].try_into().unwrap()) as usize;

        let mut payload = Vec::with_capacity(expected_len);
        DeflateDecoder::new(&deflate_data[..]).read_to_end(&mut payload)?;

        if payload.len() != expected_len
        {
            return Err(CoreError::LengthMismatch {
                offset,
                expected: expected_len,
                got: payload.len(),
            });
        }

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc
        {
            return Err(CoreError::CrcMismatch {
                offset,
                expected: expected_crc,
                got: actual_crc,
            });
        }

        Ok(DecodedBlock { block_size, payload })
    }

    /// Decode the next block without validating magic, CRC, or length.
    ///
    /// Used only on offsets already certified by the split planner or the
    /// pair sorter's pass-1 index. Misusing this on an uncertified offset is
    /// a programmer error and may silently return garbage or a confusing
    /// I/O error.
    ///
    /// The CRC and length footer bytes are still consumed (to leave the
    /// reader positioned at the next block) even though they are not
    /// checked.
    pub fn decode_compact<R: Read>(reader: &mut R) -> Result<Vec<u8>>
    {
        let mut cblock = [0u8; 18];
        reader.read_exact(&mut cblock)?;

        let xlen = u16::from_le_bytes([cblock[10], cblock[11]]) as usize;
        let bsize = u16::from_le_bytes([cblock[16], cblock[17]]) as usize + 1;
        let deflate_len = bsize.saturating_sub(12 + xlen + 8);

        let mut data_with_footer = vec![0u8; deflate_len + 8];
        reader.read_exact(&mut data_with_footer)?;

        let mut payload = Vec::new();
        DeflateDecoder::new(&data_with_footer[..deflate_len]).read_to_end(&mut payload)?;
        Ok(payload)
    }

    /// Compress `payload` (at most [`MAX_BLOCK_PAYLOAD`] bytes) into a complete BGZF block.
    pub fn encode(payload: &[u8], level: Compression) -> Result<Vec<u8>>
    {
        if payload.len() > MAX_BLOCK_PAYLOAD
        {
            return Err(CoreError::BlockTooLarge { len: payload.len() });
        }

        let mut encoder = DeflateEncoder::new(Vec::new(), level);
        encoder.write_all(payload)?;
        let compressed = encoder.finish()?;

        let total = compressed.len() + 25 + 1;
        if total > MAX_BLOCK_PAYLOAD
        {
            return Err(CoreError::CompressedBlockTooLarge {
                payload_len: payload.len(),
                total,
            });
        }
        let bsize = (total - 1) as u16;

        let mut block = Vec::with_capacity(total);
        block.extend_from_slice(&BGZF_MAGIC);
        block.extend_from_slice(&[0, 0, 0, 0]); // MTIME
        block.push(0); // XFL
        block.push(0xff); // OS = unknown
        block.extend_from_slice(&6u16.to_le_bytes()); // XLEN
        block.extend_from_slice(&BGZF_SUBFIELD_ID);
        block.extend_from_slice(&2u16.to_le_bytes()); // subfield length
        block.extend_from_slice(&bsize.to_le_bytes());
        block.extend_from_slice(&compressed);
        block.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        block.extend_from_slice(&(payload.len() as u32).to_le_bytes());

        Ok(block)
    }

    /// Check whether `buf` (at least 16 bytes) looks like the start of a
    /// valid BGZF block: gzip magic at bytes 0–3, `BC` subfield id at bytes
    /// 12–13, and subfield length `2` at bytes 14–15.
    ///
    /// Used only by the split planner's boundary search; it does not and
    /// cannot verify the CRC or the compressed payload.
    pub fn validate_header(buf: &[u8]) -> bool
    {
        if buf.len() < 16
        {
            return false;
        }
        buf[0..4] == BGZF_MAGIC
            && buf[12..14] == BGZF_SUBFIELD_ID
            && u16::from_le_bytes([buf[14], buf[15]]) == 2
    }
}

fn find_bc_subfield(extra: &[u8], offset: u64) -> Result<u16>
{
    let mut cursor = 0usize;
    let mut found: Option<u16> = None;
    while cursor + 4 <= extra.len()
    {
        let sublen = u16::from_le_bytes([extra[cursor + 2], extra[cursor + 3]]) as usize;
        if extra[cursor] == b'B' && extra[cursor + 1] == b'C'
        {
            if sublen != 2
            {
                return Err(CoreError::MalformedBgzf {
                    offset,
                    reason: "BC subfield length is not 2",
                });
            }
            if found.is_some()
            {
                return Err(CoreError::MalformedBgzf {
                    offset,
                    reason: "duplicate BC subfield",
                });
            }
            found = Some(u16::from_le_bytes([extra[cursor + 4], extra[cursor + 5]]));
        }
        cursor += 4 + sublen;
    }
    found.ok_or(CoreError::MalformedBgzf {
        offset,
        reason: "missing BC subfield",
    })
}

fn read_exact_at<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64, field: &'static str) -> Result<()>
{
    let mut filled = 0;
    while filled < buf.len()
    {
        match reader.read(&mut buf[filled..])
        {
            Ok(0) => {
                return Err(CoreError::Truncated {
                    field,
                    expected: buf.len(),
                    got: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    let _ = offset;
    Ok(())
}
