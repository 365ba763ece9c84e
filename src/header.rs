//! Alignment-file binary header decoder (C3).
//!
//! Parses the `BAM\x01` magic, free-text header block, and reference
//! dictionary out of a decoded BGZF block payload.

use crate::block::BlockCodec;
use crate::error::{CoreError, Result};
use std::io::Read;

const BAM_MAGIC: [u8; 4] = *b"BAM\x01";

/// One entry of the reference dictionary: a contig name and its length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence
{
    pub name: String,
    pub l_ref: u32,
}

/// The decoded alignment-file header: free text plus the reference dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header
{
    pub text: String,
    references: Vec<ReferenceSequence>,
}

impl Header
{
    /// Parse a header out of a decoded block payload.
    ///
    /// This assumes the header fits entirely within the given payload (the
    /// common case). Headers spanning multiple blocks are not handled here;
    /// see [`Header::decode_from_reader`] for that path.
    pub fn decode(payload: &[u8]) -> Result<Self>
    {
        let (header, consumed) = Self::decode_prefix(payload)?;
        let _ = consumed;
        Ok(header)
    }

    /// Parse a header from the start of `payload`, returning the header and
    /// the number of bytes consumed (everything through the last reference
    /// entry). Returns `Err` if `n_ref` reference entries are not fully
    /// present in `payload`; the caller should then decode another block,
    /// append its payload, and retry (see [`Header::decode_from_reader`]).
    pub fn decode_prefix(payload: &[u8]) -> Result<(Self, usize)>
    {
        if payload.len() < 8 || payload[0..4] != BAM_MAGIC
        {
            return Err(CoreError::BadMagic {
                offset: 0,
                expected: &[b'B', b'A', b'M', 0x01],
                got: payload.get(0..4.min(payload.len())).unwrap_or(&[]).to_vec(),
            });
        }

        let l_text = read_u32(payload, 4, "l_text")? as usize;
        let text_start = 8;
        let text_end = text_start
            .checked_add(l_text)
            .filter(|&e| e <= payload.len())
            .ok_or(CoreError::Truncated {
                field: "header text",
                expected: l_text,
                got: payload.len().saturating_sub(text_start),
            })?;
        let text = String::from_utf8_lossy(&payload[text_start..text_end]).into_owned();

        let n_ref = read_u32(payload, text_end, "n_ref")? as usize;
        let mut cursor = text_end + 4;
        let mut references = Vec::with_capacity(n_ref);

        for _ in 0..n_ref
        {
            let l_name = read_u32(payload, cursor, "l_name")? as usize;
            cursor += 4;
            let name_end = cursor.checked_add(l_name).filter(|&e| e <= payload.len()).ok_or(
                CoreError::Truncated {
                    field: "reference name",
                    expected: l_name,
                    got: payload.len().saturating_sub(cursor),
                },
            )?;
            let name = String::from_utf8_lossy(&payload[cursor..name_end])
                .trim_end_matches('\0')
                .to_string();
            cursor = name_end;
            let l_ref = read_u32(payload, cursor, "l_ref")?;
            cursor += 4;
            references.push(ReferenceSequence { name, l_ref });
        }

        Ok((Header { text, references }, cursor))
    }

    /// The reference dictionary, in `refID` order (index == `refID`).
    pub fn references(&self) -> &[ReferenceSequence]
    {
        &self.references
    }

    /// Number of reference sequences declared by the header.
    pub fn n_ref(&self) -> usize
    {
        self.references.len()
    }

    /// Decode the header starting from the beginning of a file, decoding as
    /// many BGZF blocks as needed to collect all `n_ref` reference entries.
    ///
    /// Real BAM headers can in principle straddle a block boundary even
    /// though the common case is that the header fits in one block. This
    /// function handles that general case for header *parsing*, and returns
    /// the byte offset of the first post-header block (`H` in the split
    /// planner's terminology) so long as the header ends exactly on a block
    /// boundary; the case every real BAM writer produces in practice.
    ///
    /// If the header ends *mid*-block (a rare case), this still returns a
    /// correct [`Header`], but `H` is reported as the coffset of the block
    /// *containing* the header's tail (not a record-aligned offset past it):
    /// the split planner and pair sorter do not attempt to splice a leading
    /// partial block back together, assuming a single-block header for
    /// those two components. A warning is logged when this happens.
    pub fn decode_from_reader<R: Read>(reader: &mut R) -> Result<(Self, u64)>
    {
        let mut buffer = Vec::new();
        let mut block_starts: Vec<u64> = Vec::new(); // start coffset of each block, in order
        let mut coffset = 0u64;

        loop
        {
            let decoded = BlockCodec::decode(reader, coffset)?;
            block_starts.push(coffset);
            buffer.extend_from_slice(&decoded.payload);
            coffset += decoded.block_size as u64;

            match Self::decode_prefix(&buffer)
            {
                Ok((header, consumed)) => {
                    let header_end = if consumed == buffer.len()
                    {
                        // header ends exactly at the last decoded block's end.
                        coffset
                    }
                    else
                    {
                        // header ends partway through the last decoded block; record data and
                        // header tail share that block. Downstream split-planning and pair-
                        // sorting assume a single-block header and do not splice this case back
                        // together, so report that block's start rather than a record-aligned
                        // offset.
                        *block_starts.last().expect("at least one block decoded")
                    };
                    if block_starts.len() > 1
                    {
                        log::warn!(
                            "alignment header spans {} BGZF blocks; downstream split-planning \
                             treats {:#x} as the start of record data",
                            block_starts.len(),
                            header_end
                        );
                    }
                    return Ok((header, header_end));
                }
                Err(CoreError::Truncated { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn read_u32(buf: &[u8], at: usize, field: &'static str) -> Result<u32>
{
    let end = at.checked_add(4).filter(|&e| e <= buf.len()).ok_or(CoreError::Truncated {
        field,
        expected: 4,
        got: buf.len().saturating_sub(at),
    })?;
    Ok(u32::from_le_bytes(buf[at..end].try_into().unwrap()))
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn build_header(text: &str, refs: &[(&str, u32)]) -> Vec<u8>
    {
        let mut buf = Vec::new();
        buf.extend_from_slice(&BAM_MAGIC);
        buf.extend_from_slice(&(text.len() as u32).to_le_bytes());
        buf.extend_from_slice(text.as_bytes());
        buf.extend_from_slice(&(refs.len() as u32).to_le_bytes());
        for (name, l_ref) in refs
        {
            let name_nul = format!("{name}\0");
            buf.extend_from_slice(&(name_nul.len() as u32).to_le_bytes());
            buf.extend_from_slice(name_nul.as_bytes());
            buf.extend_from_slice(&l_ref.to_le_bytes());
        }
        buf
    }

    #[test]
    fn decodes_text_and_references()
    {
        let payload = build_header("@HD\tVN:1.6\n", &[("chr1", 248_956_422), ("chr2", 242_193_529)]);
        let header = Header::decode(&payload).unwrap();
        assert_eq!(header.text, "@HD\tVN:1.6\n");
        assert_eq!(header.n_ref(), 2);
        assert_eq!(header.references()[0].name, "chr1");
        assert_eq!(header.references()[0].l_ref, 248_956_422);
        assert_eq!(header.references()[1].name, "chr2");
    }

    #[test]
    fn decodes_header_with_no_references()
    {
        let payload = build_header("", &[]);
        let header = Header::decode(&payload).unwrap();
        assert_eq!(header.n_ref(), 0);
        assert_eq!(header.text, "");
    }

    #[test]
    fn rejects_bad_magic()
    {
        let mut payload = build_header("x", &[]);
        payload[0] = b'X';
        let err = Header::decode(&payload).unwrap_err();
        assert!(matches!(err, CoreError::BadMagic { .. }));
    }

    #[test]
    fn reports_truncation_when_refs_incomplete()
    {
        let mut payload = build_header("", &[("chr1", 100), ("chr2", 200)]);
        payload.truncate(payload.len() - 3);
        let err = Header::decode(&payload).unwrap_err();
        assert!(matches!(err, CoreError::Truncated { .. }));
    }

    #[test]
    fn decode_from_reader_handles_single_block_header()
    {
        use crate::block::BlockCodec;
        use flate2::Compression;
        use std::io::Cursor;

        let payload = build_header("@HD\tVN:1.6\n", &[("chr1", 1000)]);
        let block = BlockCodec::encode(&payload, Compression::default()).unwrap();
        let block_len = block.len() as u64;
        let mut bytes = block;
        bytes.extend_from_slice(b"trailing record bytes");

        let mut cursor = Cursor::new(bytes);
        let (header, header_end) = Header::decode_from_reader(&mut cursor).unwrap();
        assert_eq!(header.n_ref(), 1);
        assert_eq!(header_end, block_len);
    }

    #[test]
    fn decode_from_reader_handles_header_spanning_two_blocks()
    {
        use crate::block::BlockCodec;
        use flate2::Compression;
        use std::io::Cursor;

        let payload = build_header("@HD\tVN:1.6\n", &[("chr1", 1000), ("chr2", 2000), ("chr3", 3000)]);
        // Split the payload across two blocks at an arbitrary midpoint so the
        // header's reference dictionary straddles the boundary.
        let split = payload.len() / 2;
        let block_a = BlockCodec::encode(&payload[..split], Compression::default()).unwrap();
        let block_a_len = block_a.len() as u64;
        let block_b = BlockCodec::encode(&payload[split..], Compression::default()).unwrap();
        let block_b_len = block_b.len() as u64;

        let mut bytes = block_a;
        bytes.extend(block_b);

        let mut cursor = Cursor::new(bytes);
        let (header, header_end) = Header::decode_from_reader(&mut cursor).unwrap();
        assert_eq!(header.n_ref(), 3);
        assert_eq!(header.references()[2].name, "chr3");
        assert_eq!(header_end, block_a_len + block_b_len);
    }
}
