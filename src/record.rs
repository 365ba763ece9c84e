//! Alignment record framer (C4): splits a decoded block payload into
//! length-prefixed records, and projects selected fields without a full
//! parse.

use crate::error::{CoreError, Result};

const BLOCK_SIZE_FIELD: usize = 4;

const OFFSET_REF_ID: usize = 0;
const OFFSET_POS: usize = 4;
const OFFSET_L_READ_NAME: usize = 8;
const OFFSET_TLEN: usize = 28;
const OFFSET_READ_NAME: usize = 32;

/// A single framed alignment record: the raw record bytes (not including the
/// 4-byte `block_size` prefix that preceded them) and the `uoffset` of the
/// record's first byte within its containing block's decompressed payload.
#[derive(Debug, Clone, Copy)]
pub struct FramedRecord<'a>
{
    pub bytes: &'a [u8],
    pub uoffset: u16,
}

/// Split a decoded block payload into length-prefixed records.
///
/// Walks `payload` consuming `4 + block_size` bytes per record. If the final
/// record's declared `block_size` runs past the end of `payload`, returns
/// [`CoreError::TruncatedRecord`] instead of silently stopping.
pub fn split_block(payload: &[u8]) -> Result<Vec<FramedRecord<'_>>>
{
    let mut records = Vec::new();
    let mut cursor = 0usize;

    while cursor < payload.len()
    {
        let remaining = payload.len() - cursor;
        if remaining < BLOCK_SIZE_FIELD
        {
            return Err(CoreError::TruncatedRecord {
                block_offset: cursor as u64,
                declared: BLOCK_SIZE_FIELD,
                remaining,
            });
        }

        let declared = u32::from_le_bytes(
            payload[cursor..cursor + BLOCK_SIZE_FIELD].try_into().unwrap(),
        ) as usize;
        let record_start = cursor + BLOCK_SIZE_FIELD;
        let record_end = record_start.checked_add(declared).filter(|&e| e <= payload.len());

        let Some(record_end) = record_end
        else
        {
            return Err(CoreError::TruncatedRecord {
                block_offset: cursor as u64,
                declared,
                remaining: payload.len() - record_start,
            });
        };

        records.push(FramedRecord {
            bytes: &payload[record_start..record_end],
            uoffset: cursor as u16,
        });
        cursor = record_end;
    }

    Ok(records)
}

/// `refID`: int32 at byte offset 0.
pub fn ref_id(record: &[u8]) -> i32
{
    read_i32(record, OFFSET_REF_ID)
}

/// `pos`: int32 at byte offset 4.
pub fn pos(record: &[u8]) -> i32
{
    read_i32(record, OFFSET_POS)
}

/// `tlen`: int32 at byte offset 28.
pub fn tlen(record: &[u8]) -> i32
{
    read_i32(record, OFFSET_TLEN)
}

/// `read_name`: `l_read_name` bytes starting at byte offset 32, with the
/// trailing NUL terminator stripped.
pub fn read_name(record: &[u8]) -> &[u8]
{
    let l_read_name = record[OFFSET_L_READ_NAME] as usize;
    let name = &record[OFFSET_READ_NAME..OFFSET_READ_NAME + l_read_name];
    match name.split_last()
    {
        Some((b'\0', rest)) => rest,
        _ => name,
    }
}

fn read_i32(record: &[u8], at: usize) -> i32
{
    i32::from_le_bytes(record[at..at + 4].try_into().unwrap())
}

/// Stateless entry point mirroring [`BlockCodec`](crate::block::BlockCodec):
/// groups the free framing functions under one name for callers that prefer
/// `RecordFramer::split(...)` over the bare module functions.
pub struct RecordFramer;

impl RecordFramer
{
    pub fn split(payload: &[u8]) -> Result<Vec<FramedRecord<'_>>>
    {
        split_block(payload)
    }

    pub fn ref_id(record: &[u8]) -> i32
    {
        ref_id(record)
    }

    pub fn pos(record: &[u8]) -> i32
    {
        pos(record)
    }

    pub fn tlen(record: &[u8]) -> i32
    {
        tlen(record)
    }

    pub fn read_name(record: &[u8]) -> &[u8]
    {
        read_name(record)
    }
}

/// Recover a complete length-prefixed record (the 4-byte `block_size` field
/// plus its body) out of a decoded block payload, given the `uoffset` of the
/// record's length prefix. Used by the pair sorter's writer, which only has
/// a cached payload and a `uoffset` to work from (no [`FramedRecord`]).
pub fn full_record_bytes(payload: &[u8], uoffset: u16) -> Result<&[u8]>
{
    let start = uoffset as usize;
    if start + BLOCK_SIZE_FIELD > payload.len()
    {
        return Err(CoreError::TruncatedRecord {
            block_offset: start as u64,
            declared: BLOCK_SIZE_FIELD,
            remaining: payload.len().saturating_sub(start),
        });
    }
    let declared =
        u32::from_le_bytes(payload[start..start + BLOCK_SIZE_FIELD].try_into().unwrap()) as usize;
    let end = start + BLOCK_SIZE_FIELD + declared;
    if end > payload.len()
    {
        return Err(CoreError::TruncatedRecord {
            block_offset: start as u64,
            declared,
            remaining: payload.len() - start - BLOCK_SIZE_FIELD,
        });
    }
    Ok(&payload[start..end])
}
