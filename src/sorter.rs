//! Pair sorter (C6): resorts mate-adjacent alignment records into
//! reference-ascending, front-coordinate order using a three-pass
//! index/sort/write pipeline.

use crate::block::{BlockCodec, EOF_SENTINEL, MAX_BLOCK_PAYLOAD};
use crate::error::{CoreError, Result};
use crate::header::Header;
use crate::reader::ByteReader;
use crate::record;
use flate2::Compression;
use lru::LruCache;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

const BLOCK_CACHE_CAPACITY: usize = 1_000;

/// The four virtual-offset coordinates locating a mate pair's two records.
#[derive(Debug, Clone, Copy)]
struct PairOffsets
{
    coffset_a: u64,
    uoffset_a: u16,
    coffset_b: u64,
    uoffset_b: u16,
}

struct PendingMate
{
    ref_id: i32,
    pos: i32,
    coffset: u64,
    uoffset: u16,
    tlen: i32,
    read_name: Vec<u8>,
}

/// Mate-adjacent resorter: walks an alignment file once to index pairs, sorts
/// each reference's pairs by front coordinate, then writes the reordered
/// output with a worker pool per reference.
pub struct PairSorter;

impl PairSorter
{
    /// Resort `input` into `output`, using up to `n` writer workers per
    /// reference.
    pub fn sort(input: &Path, output: &Path, n: usize) -> Result<()>
    {
        Self::sort_with_compression(input, output, n, Compression::default())
    }

    /// Same as [`PairSorter::sort`] but with an explicit DEFLATE compression
    /// level for the rewritten output blocks.
    pub fn sort_with_compression(
        input: &Path,
        output: &Path,
        n: usize,
        compression: Compression,
    ) -> Result<()>
    {
        assert!(n >= 1, "worker count must be at least 1");

        log::info!("checking alignment header");
        let mut reader = ByteReader::open(input)?;
        let header_block = BlockCodec::decode(&mut reader, 0)?;
        let _header = Header::decode(&header_block.payload)?;
        let header_payload = header_block.payload.clone();

        log::info!("pass 1: indexing read pair coordinates");
        let (buckets, inter_reference_count) =
            Self::index_pairs(&mut reader, header_block.block_size as u64)?;

        if inter_reference_count > 0
        {
            log::warn!(
                "{inter_reference_count} mate pairs spanned two references and were \
                 omitted from the sorted output"
            );
        }

        log::info!("pass 2: sorting read pairs");
        let sorted = Self::sort_buckets(buckets);

        log::info!("pass 3: writing sorted read pairs");
        let mut out = File::create(output)?;
        out.write_all(&BlockCodec::encode(&header_payload, compression)?)?;

        for (ref_id, pairs) in &sorted
        {
            let temp_path = Self::write_reference(input, output, *ref_id, pairs, n, compression)?;
            let mut temp = File::open(&temp_path)?;
            std::io::copy(&mut temp, &mut out)?;
            drop(temp);
            std::fs::remove_file(&temp_path).ok();
        }

        out.write_all(&EOF_SENTINEL)?;
        log::info!("sort complete");
        Ok(())
    }

    /// Pass 1: walk every block after the header, framing records and
    /// bucketing mate pairs by shared reference id.
    fn index_pairs(
        reader: &mut ByteReader,
        mut coffset: u64,
    ) -> Result<(BTreeMap<i32, Vec<(i32, PairOffsets)>>, usize)>
    {
        let mut buckets: BTreeMap<i32, Vec<(i32, PairOffsets)>> = BTreeMap::new();
        let mut inter_reference_count = 0usize;
        let mut pending: Option<PendingMate> = None;

        loop
        {
            reader.seek(coffset)?;
            let decoded = BlockCodec::decode(reader, coffset)?;
            if decoded.payload.is_empty()
            {
                break;
            }

            for framed in record::split_block(&decoded.payload)?
            {
                let ref_id = record::ref_id(framed.bytes);
                let pos = record::pos(framed.bytes);
                let tlen = record::tlen(framed.bytes);
                let name = record::read_name(framed.bytes).to_vec();

                match pending.take()
                {
                    None => {
                        pending = Some(PendingMate {
                            ref_id,
                            pos,
                            coffset,
                            uoffset: framed.uoffset,
                            tlen,
                            read_name: name,
                        });
                    }
                    Some(first) => {
                        if first.read_name != name
                        {
                            return Err(CoreError::MateOrderViolation {
                                offset: coffset,
                                reason: "mate read names do not match".to_string(),
                            });
                        }
                        if first.tlen + tlen != 0
                        {
                            return Err(CoreError::MateOrderViolation {
                                offset: coffset,
                                reason: format!(
                                    "tlen pair does not sum to zero ({} + {})",
                                    first.tlen, tlen
                                ),
                            });
                        }

                        if first.ref_id == ref_id
                        {
                            let front_coord = first.pos.min(pos);
                            buckets.entry(ref_id).or_default().push((
                                front_coord,
                                PairOffsets {
                                    coffset_a: first.coffset,
                                    uoffset_a: first.uoffset,
                                    coffset_b: coffset,
                                    uoffset_b: framed.uoffset,
                                },
                            ));
                        }
                        else
                        {
                            inter_reference_count += 1;
                        }
                    }
                }
            }

            coffset += decoded.block_size as u64;
        }

        if let Some(first) = pending
        {
            return Err(CoreError::OddReadCount { offset: first.coffset });
        }

        Ok((buckets, inter_reference_count))
    }

    /// Pass 2: stable-sort each reference's pairs by front coordinate,
    /// discarding the sort key.
    fn sort_buckets(
        buckets: BTreeMap<i32, Vec<(i32, PairOffsets)>>,
    ) -> BTreeMap<i32, Vec<PairOffsets>>
    {
        buckets
            .into_iter()
            .map(|(ref_id, mut pairs)| {
                pairs.sort_by_key(|&(front_coord, _)| front_coord);
                (ref_id, pairs.into_iter().map(|(_, offsets)| offsets).collect())
            })
            .collect()
    }

    /// Pass 3: spawn a worker pool over one reference's sorted pairs,
    /// returning the path of the concatenated per-reference temp file.
    fn write_reference(
        input: &Path,
        output: &Path,
        ref_id: i32,
        pairs: &[PairOffsets],
        n: usize,
        compression: Compression,
    ) -> Result<PathBuf>
    {
        let worker_count = n.min(pairs.len().max(1));
        let chunk_sizes = chunk_sizes(pairs.len(), worker_count);

        let mut worker_paths = Vec::with_capacity(worker_count);
        let mut start = 0usize;
        let mut chunks = Vec::with_capacity(worker_count);
        for (i, &size) in chunk_sizes.iter().enumerate()
        {
            let chunk = &pairs[start..start + size];
            start += size;
            let path = temp_worker_path(output, ref_id, i);
            worker_paths.push(path.clone());
            chunks.push((path, chunk));
        }

        let results: Vec<Result<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|(path, chunk)| {
                    scope.spawn(move || write_worker_chunk(input, &path, chunk, compression))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|_| {
                    Err(CoreError::MalformedBgzf {
                        offset: 0,
                        reason: "writer worker thread panicked",
                    })
                }))
                .collect()
        });

        for result in results
        {
            result?;
        }

        let concat_path = temp_reference_path(output, ref_id);
        let mut concat = File::create(&concat_path)?;
        for path in &worker_paths
        {
            let mut worker_file = File::open(path)?;
            std::io::copy(&mut worker_file, &mut concat)?;
            drop(worker_file);
            std::fs::remove_file(path).ok();
        }

        Ok(concat_path)
    }
}

fn write_worker_chunk(
    input: &Path,
    temp_path: &Path,
    chunk: &[PairOffsets],
    compression: Compression,
) -> Result<()>
{
    log::debug!(
        "writer worker starting: {} pairs, cache capacity {BLOCK_CACHE_CAPACITY}, temp path {}",
        chunk.len(),
        temp_path.display()
    );
    let mut reader = ByteReader::open(input)?;
    let mut cache: LruCache<u64, Vec<u8>> =
        LruCache::new(NonZeroUsize::new(BLOCK_CACHE_CAPACITY).unwrap());
    let mut out = File::create(temp_path)?;
    let mut buffer: Vec<u8> = Vec::new();

    for pair in chunk
    {
        let rec_a = get_or_decode(&mut cache, &mut reader, pair.coffset_a)
            .and_then(|payload| record::full_record_bytes(payload, pair.uoffset_a).map(<[u8]>::to_vec))?;
        let rec_b = get_or_decode(&mut cache, &mut reader, pair.coffset_b)
            .and_then(|payload| record::full_record_bytes(payload, pair.uoffset_b).map(<[u8]>::to_vec))?;

        let mut record_pair = rec_a;
        record_pair.extend_from_slice(&rec_b);

        if buffer.len() + record_pair.len() >= MAX_BLOCK_PAYLOAD
        {
            flush_block(&mut out, &buffer, compression)?;
            buffer = record_pair;
        }
        else
        {
            buffer.extend_from_slice(&record_pair);
        }
    }

    if !buffer.is_empty()
    {
        flush_block(&mut out, &buffer, compression)?;
    }

    log::debug!("writer worker finished: temp path {}", temp_path.display());
    Ok(())
}

fn get_or_decode<'a>(
    cache: &'a mut LruCache<u64, Vec<u8>>,
    reader: &mut ByteReader,
    coffset: u64,
) -> Result<&'a Vec<u8>>
{
    if cache.get(&coffset).is_none()
    {
        reader.seek(coffset)?;
        let payload = BlockCodec::decode_compact(reader)?;
        cache.put(coffset, payload);
    }
    Ok(cache.get(&coffset).expect("just inserted"))
}

fn flush_block(out: &mut File, payload: &[u8], compression: Compression) -> Result<()>
{
    let block = BlockCodec::encode(payload, compression)?;
    out.write_all(&block)?;
    Ok(())
}

/// `K = min(N, pair_count)` contiguous chunk sizes differing by at most one,
/// with any leftover distributed to the first chunks.
fn chunk_sizes(total: usize, k: usize) -> Vec<usize>
{
    let base = total / k;
    let remainder = total % k;
    (0..k).map(|i| base + usize::from(i < remainder)).collect()
}

fn temp_worker_path(output: &Path, ref_id: i32, worker: usize) -> PathBuf
{
    PathBuf::from(format!("{}.__tmp.refID{ref_id}.{worker}", output.display()))
}

fn temp_reference_path(output: &Path, ref_id: i32) -> PathBuf
{
    PathBuf::from(format!("{}.__tmp.refID{ref_id}", output.display()))
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::record as record_mod;

    fn build_header_payload() -> Vec<u8>
    {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"BAM\x01");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&2u32.to_le_bytes());
        for name in ["chr1", "chr2"]
        {
            let name_nul = format!("{name}\0");
            buf.extend_from_slice(&(name_nul.len() as u32).to_le_bytes());
            buf.extend_from_slice(name_nul.as_bytes());
            buf.extend_from_slice(&1000u32.to_le_bytes());
        }
        buf
    }

    fn build_record(ref_id: i32, pos: i32, tlen: i32, name: &str) -> Vec<u8>
    {
        let name_nul = format!("{name}\0");
        let l_read_name = name_nul.len() as u8;
        let mut body = Vec::new();
        body.extend_from_slice(&ref_id.to_le_bytes());
        body.extend_from_slice(&pos.to_le_bytes());
        body.push(l_read_name);
        body.push(0);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&(-1i32).to_le_bytes());
        body.extend_from_slice(&tlen.to_le_bytes());
        body.extend_from_slice(name_nul.as_bytes());

        let mut record = Vec::new();
        record.extend_from_slice(&(body.len() as u32).to_le_bytes());
        record.extend_from_slice(&body);
        record
    }

    fn write_temp(name: &str, contents: &[u8]) -> PathBuf
    {
        let path = std::env::temp_dir().join(format!(
            "bgzf_pairsort_sorter_test_{}_{name}",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn build_input_file() -> Vec<u8>
    {
        let header_payload = build_header_payload();
        let mut bytes = BlockCodec::encode(&header_payload, Compression::default()).unwrap();

        // reference 0 pairs, out of front-coordinate order
        let mut block_payload = Vec::new();
        block_payload.extend(build_record(0, 300, 50, "r1"));
        block_payload.extend(build_record(0, 350, -50, "r1"));
        block_payload.extend(build_record(0, 50, 20, "r2"));
        block_payload.extend(build_record(0, 80, -20, "r2"));
        // reference 1 pair
        block_payload.extend(build_record(1, 10, 5, "r3"));
        block_payload.extend(build_record(1, 15, -5, "r3"));
        bytes.extend(BlockCodec::encode(&block_payload, Compression::default()).unwrap());
        bytes.extend_from_slice(&EOF_SENTINEL);
        bytes
    }

    #[test]
    fn sorts_pairs_ascending_by_front_coordinate_per_reference()
    {
        let bytes = build_input_file();
        let input_path = write_temp("input.bam", &bytes);
        let output_path = std::env::temp_dir().join(format!(
            "bgzf_pairsort_sorter_test_{}_output.bam",
            std::process::id()
        ));

        PairSorter::sort(&input_path, &output_path, 2).unwrap();

        let mut reader = ByteReader::open(&output_path).unwrap();
        let header_block = BlockCodec::decode(&mut reader, 0).unwrap();
        let header = Header::decode(&header_block.payload).unwrap();
        assert_eq!(header.n_ref(), 2);

        let mut coffset = header_block.block_size as u64;
        let mut observed = Vec::new();
        loop
        {
            reader.seek(coffset).unwrap();
            let decoded = BlockCodec::decode(&mut reader, coffset).unwrap();
            if decoded.payload.is_empty()
            {
                break;
            }
            for framed in record_mod::split_block(&decoded.payload).unwrap()
            {
                observed.push((
                    record_mod::ref_id(framed.bytes),
                    record_mod::pos(framed.bytes),
                    String::from_utf8_lossy(record_mod::read_name(framed.bytes)).to_string(),
                ));
            }
            coffset += decoded.block_size as u64;
        }

        // reference 0: r2 pair (front 50) before r1 pair (front 300); reference 1 after.
        assert_eq!(observed[0].2, "r2");
        assert_eq!(observed[1].2, "r2");
        assert_eq!(observed[2].2, "r1");
        assert_eq!(observed[3].2, "r1");
        assert_eq!(observed[4].0, 1);
        assert_eq!(observed[4].2, "r3");

        std::fs::remove_file(&input_path).ok();
        std::fs::remove_file(&output_path).ok();
    }

    #[test]
    fn odd_read_count_signals_error()
    {
        let header_payload = build_header_payload();
        let mut bytes = BlockCodec::encode(&header_payload, Compression::default()).unwrap();
        let mut block_payload = Vec::new();
        block_payload.extend(build_record(0, 100, 0, "lonely"));
        bytes.extend(BlockCodec::encode(&block_payload, Compression::default()).unwrap());
        bytes.extend_from_slice(&EOF_SENTINEL);

        let input_path = write_temp("odd.bam", &bytes);
        let output_path = std::env::temp_dir().join(format!(
            "bgzf_pairsort_sorter_test_{}_odd_output.bam",
            std::process::id()
        ));

        let err = PairSorter::sort(&input_path, &output_path, 1).unwrap_err();
        assert!(matches!(err, CoreError::OddReadCount { .. }));

        std::fs::remove_file(&input_path).ok();
    }

    #[test]
    fn mate_name_mismatch_signals_mate_order_violation()
    {
        let header_payload = build_header_payload();
        let mut bytes = BlockCodec::encode(&header_payload, Compression::default()).unwrap();
        let mut block_payload = Vec::new();
        block_payload.extend(build_record(0, 100, 10, "alpha"));
        block_payload.extend(build_record(0, 110, -10, "beta"));
        bytes.extend(BlockCodec::encode(&block_payload, Compression::default()).unwrap());
        bytes.extend_from_slice(&EOF_SENTINEL);

        let input_path = write_temp("mismatch.bam", &bytes);
        let output_path = std::env::temp_dir().join(format!(
            "bgzf_pairsort_sorter_test_{}_mismatch_output.bam",
            std::process::id()
        ));

        let err = PairSorter::sort(&input_path, &output_path, 1).unwrap_err();
        assert!(matches!(err, CoreError::MateOrderViolation { .. }));

        std::fs::remove_file(&input_path).ok();
    }

    #[test]
    fn chunk_sizes_distribute_leftover_to_first_chunks()
    {
        assert_eq!(chunk_sizes(10, 3), vec![4, 3, 3]);
        assert_eq!(chunk_sizes(9, 3), vec![3, 3, 3]);
        assert_eq!(chunk_sizes(2, 5), vec![1, 1, 0, 0, 0]);
    }
}
