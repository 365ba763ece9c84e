//! Parallel reader (C4.7, derivable): exposes one independent record-byte
//! iterator per split-planner partition. Each iterator is its own `C1 → C2 →
//! C4` pipeline over a half-open byte range and shares no state with the
//! others, so partitions can be driven from separate threads.

use crate::block::BlockCodec;
use crate::error::Result;
use crate::planner::SplitPlanner;
use crate::reader::ByteReader;
use crate::record::{self, FramedRecord};
use std::path::Path;

/// One partition's independent record-byte iterator.
///
/// Holds its own file handle and the decoded payload of whichever block it
/// is currently walking; advances to the next block once the current one's
/// records are exhausted, and stops once its start position reaches `end`.
pub struct PartitionReader
{
    reader: ByteReader,
    /// Absolute offset of the next block to decode.
    next_coffset: u64,
    /// Absolute offset of the block whose payload is currently loaded.
    current_block_start: u64,
    end: u64,
    current_payload: Vec<u8>,
    cursor: usize,
}

impl PartitionReader
{
    fn new(reader: ByteReader, start: u64, end: u64) -> Self
    {
        PartitionReader {
            reader,
            next_coffset: start,
            current_block_start: start,
            end,
            current_payload: Vec::new(),
            cursor: 0,
        }
    }

    /// Decode the next block in this partition's range, replacing the
    /// current payload. Returns `false` once `next_coffset` has reached `end`.
    fn advance_block(&mut self) -> Result<bool>
    {
        if self.next_coffset >= self.end
        {
            return Ok(false);
        }
        self.reader.seek(self.next_coffset)?;
        let decoded = BlockCodec::decode(&mut self.reader, self.next_coffset)?;
        self.current_block_start = self.next_coffset;
        self.next_coffset += decoded.block_size as u64;
        self.current_payload = decoded.payload;
        self.cursor = 0;
        Ok(true)
    }

    /// Pull the next framed record, decoding further blocks as needed.
    /// Returns `Ok(None)` once this partition's range is exhausted.
    pub fn next_record(&mut self) -> Result<Option<OwnedRecord>>
    {
        loop
        {
            if self.cursor < self.current_payload.len()
            {
                if let Some(framed) = next_framed(&self.current_payload, self.cursor)?
                {
                    self.cursor = framed.uoffset as usize + 4 + framed.bytes.len();
                    return Ok(Some(OwnedRecord {
                        bytes: framed.bytes.to_vec(),
                        coffset: self.current_block_start,
                        uoffset: framed.uoffset,
                    }));
                }
            }

            if !self.advance_block()?
            {
                return Ok(None);
            }
        }
    }
}

/// A single decoded record, detached from its source block's borrow.
#[derive(Debug, Clone)]
pub struct OwnedRecord
{
    pub bytes: Vec<u8>,
    pub coffset: u64,
    pub uoffset: u16,
}

fn next_framed(payload: &[u8], from: usize) -> Result<Option<FramedRecord<'_>>>
{
    if from >= payload.len()
    {
        return Ok(None);
    }
    let framed = record::split_block(&payload[from..])?.into_iter().next();
    Ok(framed.map(|f| FramedRecord {
        bytes: f.bytes,
        uoffset: from as u16 + f.uoffset,
    }))
}

/// Opens `n` independent [`PartitionReader`]s over `path`, one per
/// split-planner partition.
pub struct ParallelReader;

impl ParallelReader
{
    /// Plan `n` partitions over `path` (optionally using a sidecar index)
    /// and open one independent reader per partition.
    pub fn open(path: &Path, n: usize, sidecar: Option<&Path>) -> Result<Vec<PartitionReader>>
    {
        let plan = SplitPlanner::plan(path, n, sidecar)?;
        plan.partitions()
            .into_iter()
            .map(|(start, end)| Ok(PartitionReader::new(ByteReader::open(path)?, start, end)))
            .collect()
    }
}
