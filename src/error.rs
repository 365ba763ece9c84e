//! Error taxonomy for the BGZF codec, split planner, and pair sorter.
//!
//! Every fallible operation in this crate returns [`CoreError`] rather than
//! a bare [`std::io::Error`], so callers can match on *why* a block, file,
//! or sort failed instead of string-sniffing an `io::Error` message.

use std::io;

/// The error type returned by every fallible operation in this crate.
#[derive(thiserror::Error, Debug)]
pub enum CoreError
{
    /// An underlying read/write/seek/open failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A fixed-width field could not be fully read before EOF.
    #[error("truncated while reading a {field} field ({expected} bytes expected, got {got})")]
    Truncated
    {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    /// A BGZF block's gzip magic, or the alignment header's `BAM\x01` magic, did not match.
    #[error("bad magic bytes at offset {offset}: expected {expected:02x?}, got {got:02x?}")]
    BadMagic
    {
        offset: u64,
        expected: &'static [u8],
        got: Vec<u8>,
    },

    /// The BGZF extra-subfield area is missing the `BC` subfield, has a
    /// duplicate one, or the subfield's declared length is wrong.
    #[error("malformed BGZF extra field at offset {offset}: {reason}")]
    MalformedBgzf { offset: u64, reason: &'static str },

    /// Post-decompression CRC32 did not match the block's recorded CRC32.
    #[error("CRC32 mismatch in block at offset {offset}: expected {expected:#010x}, got {got:#010x}")]
    CrcMismatch
    {
        offset: u64,
        expected: u32,
        got: u32,
    },

    /// Post-decompression length did not match the block's recorded ISIZE.
    #[error("decompressed length mismatch in block at offset {offset}: expected {expected}, got {got}")]
    LengthMismatch
    {
        offset: u64,
        expected: usize,
        got: usize,
    },

    /// [`crate::block::BlockCodec::encode`] was given a payload over 65,536 bytes.
    #[error("block payload of {len} bytes exceeds the 65536-byte BGZF limit")]
    BlockTooLarge { len: usize },

    /// A payload within the 65,536-byte limit nonetheless compressed (plus
    /// the fixed BGZF header/footer overhead) to a total block size over
    /// 65,536 bytes and cannot be encoded as one BGZF block.
    #[error(
        "compressed block of {total} bytes (payload {payload_len} bytes) exceeds the \
         65536-byte BGZF limit"
    )]
    CompressedBlockTooLarge { payload_len: usize, total: usize },

    /// A record's declared `block_size` runs past the end of its containing block.
    #[error("record at block offset {block_offset} declares size {declared} but only {remaining} bytes remain")]
    TruncatedRecord
    {
        block_offset: u64,
        declared: usize,
        remaining: usize,
    },

    /// The requested parallelism `N` produced duplicate partition offsets.
    #[error("cannot split into {requested} partitions: file only yields {available} distinct block offsets")]
    OverPartition { requested: usize, available: usize },

    /// The input file does not end with the 28-byte BGZF EOF sentinel.
    #[error("file does not end with the BGZF EOF sentinel (path: {path})")]
    TruncatedFile { path: String },

    /// Two consecutive records during sort indexing are not a valid mate pair.
    #[error("mate order violation at record offset {offset}: {reason}")]
    MateOrderViolation { offset: u64, reason: String },

    /// The input to the pair sorter contained an odd number of records.
    #[error("odd read count: pass 1 ended with an unpaired record pending at offset {offset}")]
    OddReadCount { offset: u64 },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;
