//! Split planner (C5): partitions a BGZF file into `N` block-aligned byte
//! ranges, with or without a sidecar block index.

use crate::block::{BlockCodec, EOF_SENTINEL};
use crate::error::{CoreError, Result};
use crate::header::Header;
use crate::index::BlockIndex;
use crate::reader::ByteReader;
use std::path::Path;

const BGZF_MAGIC: [u8; 4] = [0x1f, 0x8b, 0x08, 0x04];

/// Size of the forward-search window used when no sidecar index is available.
pub const SEARCH_WINDOW: usize = 5000;
/// Step taken when a search window contains no magic bytes at all.
pub const SEARCH_STEP: usize = SEARCH_WINDOW - 100;
/// Step taken after a magic-byte match fails header validation.
const FALSE_POSITIVE_ADVANCE: u64 = 4;

/// The output of [`SplitPlanner::plan`]: `N` block-aligned worker start
/// offsets, plus the offset of the file's EOF sentinel.
#[derive(Debug, Clone)]
pub struct SplitPlan
{
    /// `O[0..N-1]`: the start offset of each of the `N` worker partitions.
    pub offsets: Vec<u64>,
    /// `O[N]`: the byte offset of the EOF sentinel block.
    pub eof_offset: u64,
}

impl SplitPlan
{
    /// The `N` half-open `[start, end)` byte ranges handed to each worker.
    pub fn partitions(&self) -> Vec<(u64, u64)>
    {
        let mut bounds = self.offsets.clone();
        bounds.push(self.eof_offset);
        bounds.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

/// Stateless split-planning entry point.
pub struct SplitPlanner;

impl SplitPlanner
{
    /// Plan `n` block-aligned partitions over the alignment file at `path`.
    ///
    /// When `sidecar` is `Some`, partition boundaries are read directly from
    /// the index (no forward search needed). Otherwise, boundaries are found
    /// by [`SplitPlanner::boundary_search`] starting from `n + 1` evenly
    /// spaced probe points.
    pub fn plan(path: &Path, n: usize, sidecar: Option<&Path>) -> Result<SplitPlan>
    {
        assert!(n >= 1, "parallelism degree must be at least 1");

        let mut reader = ByteReader::open(path)?;
        let file_len = reader.len();

        let eof_offset = file_len.checked_sub(EOF_SENTINEL.len() as u64).ok_or_else(|| {
            CoreError::TruncatedFile {
                path: path.display().to_string(),
            }
        })?;
        reader.seek(eof_offset)?;
        let tail = reader.read(EOF_SENTINEL.len())?;
        if tail != EOF_SENTINEL
        {
            return Err(CoreError::TruncatedFile {
                path: path.display().to_string(),
            });
        }

        reader.seek(0)?;
        let (_header, header_end) = Header::decode_from_reader(&mut reader)?;

        let (raw_offsets, available) = match sidecar
        {
            Some(sidecar_path) => Self::offsets_from_sidecar(sidecar_path, n)?,
            None => Self::offsets_from_search(&mut reader, header_end, eof_offset, n)?,
        };

        let mut offsets = raw_offsets;
        offsets[0] = header_end;

        let strictly_increasing = offsets.windows(2).all(|w| w[0] < w[1]);
        // O[n-1] must be < eof_offset, except the degenerate single-partition case
        // where the file holds no record blocks at all (header_end == eof_offset):
        // spec scenario 1 wants O[0] == eof_offset there, not an OverPartition error.
        let trivially_empty = offsets.len() == 1 && offsets[0] == eof_offset;
        let last_before_eof = trivially_empty || *offsets.last().unwrap() < eof_offset;

        if !strictly_increasing || !last_before_eof
        {
            return Err(CoreError::OverPartition {
                requested: n,
                available,
            });
        }

        Ok(SplitPlan { offsets, eof_offset })
    }

    fn offsets_from_sidecar(sidecar_path: &Path, n: usize) -> Result<(Vec<u64>, usize)>
    {
        let index = BlockIndex::from_path(sidecar_path)?;
        let coffsets = index.coffsets();
        let count = coffsets.len();
        if count < 2
        {
            return Err(CoreError::OverPartition {
                requested: n,
                available: count,
            });
        }

        let picks = evenly_spaced(1, (count - 1) as u64, n + 1);
        let offsets = picks[..n].iter().map(|&i| coffsets[i as usize]).collect();
        Ok((offsets, count - 1))
    }

    fn offsets_from_search(
        reader: &mut ByteReader,
        header_end: u64,
        eof_offset: u64,
        n: usize,
    ) -> Result<(Vec<u64>, usize)>
    {
        let probes = evenly_spaced(header_end, eof_offset, n + 1);
        let probes = &probes[..n]; // drop the last probe point: that slot is EOF.

        let mut offsets = Vec::with_capacity(n);
        for &probe in probes
        {
            offsets.push(Self::boundary_search(reader, probe, eof_offset)?);
        }
        let available = offsets.len();
        Ok((offsets, available))
    }

    /// Find the nearest valid BGZF block start at or after `probe_offset`.
    pub fn boundary_search(reader: &mut ByteReader, probe_offset: u64, eof_offset: u64) -> Result<u64>
    {
        let mut search_from = probe_offset;

        loop
        {
            if search_from >= eof_offset
            {
                return Ok(eof_offset);
            }

            let window = read_window(reader, search_from, eof_offset)?;
            let Some(rel) = memchr::memmem::find(&window, &BGZF_MAGIC)
            else
            {
                log::debug!(
                    "boundary search: no magic bytes in window at {search_from:#x}, \
                     advancing by {SEARCH_STEP}"
                );
                search_from += SEARCH_STEP as u64;
                continue;
            };

            let candidate = search_from + rel as u64;
            let validate_window = read_window(reader, candidate, eof_offset)?;
            if BlockCodec::validate_header(&validate_window)
            {
                log::debug!("boundary search: found valid block header at {candidate:#x}");
                return Ok(candidate);
            }
            log::debug!(
                "boundary search: magic at {candidate:#x} failed header validation, \
                 advancing by {FALSE_POSITIVE_ADVANCE}"
            );
            search_from = candidate + FALSE_POSITIVE_ADVANCE;
        }
    }
}

fn read_window(reader: &mut ByteReader, at: u64, _limit: u64) -> Result<Vec<u8>>
{
    reader.seek(at)?;
    let mut buf = vec![0u8; SEARCH_WINDOW];
    let mut filled = 0;
    while filled < buf.len()
    {
        match std::io::Read::read(reader, &mut buf[filled..])
        {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(CoreError::Io(e)),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}

/// `n` integer points evenly spaced (rounded) between `lo` and `hi`
/// inclusive.
fn evenly_spaced(lo: u64, hi: u64, n: usize) -> Vec<u64>
{
    if n == 1
    {
        return vec![lo];
    }
    let span = hi - lo;
    let steps = (n - 1) as u64;
    (0..n)
        .map(|i| lo + (i as u64 * span + steps / 2) / steps)
        .collect()
}
