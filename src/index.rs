//! Optional sidecar block index: a flat list of `(coffset, uoffset)` pairs
//! recording every BGZF block start in a file, used by the split planner to
//! skip the forward boundary-search when available.

use crate::error::{CoreError, Result};
use std::io::{Read, Write};
use std::path::Path;

const ENTRY_SIZE: usize = 16;

/// A sidecar block index: one `(coffset, uoffset)` pair per BGZF block in the
/// indexed file, in file order.
#[derive(Debug, Clone, Default)]
pub struct BlockIndex
{
    entries: Vec<(u64, u64)>,
}

impl BlockIndex
{
    /// Build an index directly from already-known block boundaries.
    pub fn from_entries(entries: Vec<(u64, u64)>) -> Self
    {
        BlockIndex { entries }
    }

    /// Load a sidecar index file: a little-endian `u64` entry count followed
    /// by that many 16-byte `(coffset, uoffset)` pairs.
    pub fn from_path(path: &Path) -> Result<Self>
    {
        let mut file = std::fs::File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Self::from_bytes(&buffer)
    }

    fn from_bytes(buffer: &[u8]) -> Result<Self>
    {
        if buffer.len() < 8
        {
            return Err(CoreError::Truncated {
                field: "block index entry count",
                expected: 8,
                got: buffer.len(),
            });
        }

        let count = u64::from_le_bytes(buffer[0..8].try_into().unwrap()) as usize;
        let expected_len = 8 + count * ENTRY_SIZE;
        if buffer.len() < expected_len
        {
            return Err(CoreError::Truncated {
                field: "block index entries",
                expected: expected_len,
                got: buffer.len(),
            });
        }

        let mut entries = Vec::with_capacity(count);
        let mut cursor = 8;
        for _ in 0..count
        {
            let coffset = u64::from_le_bytes(buffer[cursor..cursor + 8].try_into().unwrap());
            let uoffset = u64::from_le_bytes(buffer[cursor + 8..cursor + 16].try_into().unwrap());
            entries.push((coffset, uoffset));
            cursor += ENTRY_SIZE;
        }

        Ok(BlockIndex { entries })
    }

    /// Serialize the index to the sidecar binary format.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()>
    {
        writer.write_all(&(self.entries.len() as u64).to_le_bytes())?;
        for &(coffset, uoffset) in &self.entries
        {
            writer.write_all(&coffset.to_le_bytes())?;
            writer.write_all(&uoffset.to_le_bytes())?;
        }
        Ok(())
    }

    /// Number of block-start entries.
    pub fn len(&self) -> usize
    {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.entries.is_empty()
    }

    /// All `(coffset, uoffset)` entries, in file order.
    pub fn entries(&self) -> &[(u64, u64)]
    {
        &self.entries
    }

    /// `coffset` values only, in file order; what the split planner needs
    /// to pick `N+1` evenly spaced partition boundaries.
    pub fn coffsets(&self) -> Vec<u64>
    {
        self.entries.iter().map(|&(c, _)| c).collect()
    }
}
