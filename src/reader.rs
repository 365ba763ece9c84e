//! Positioned, seekable byte reader over a local file (C1).
//!
//! Every worker thread (a parallel-reader partition, a pair-sorter writer)
//! owns its own [`ByteReader`] for the lifetime of the file. There is no
//! shared file handle anywhere in this crate.

use crate::error::{CoreError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// A thread-local, positioned reader over one open file.
///
/// Owns its file handle from `open` to drop; never shared across threads.
pub struct ByteReader
{
    file: File,
    len: u64,
}

impl ByteReader
{
    /// Open `path` for reading, caching its length for [`ByteReader::len`].
    pub fn open(path: &Path) -> Result<Self>
    {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(ByteReader { file, len })
    }

    /// Seek to an absolute byte offset.
    pub fn seek(&mut self, offset: u64) -> Result<()>
    {
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Read exactly `n` bytes from the current position.
    ///
    /// Signals [`CoreError::Truncated`] rather than returning a short read if
    /// fewer than `n` bytes remain before EOF.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>>
    {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n
        {
            let read = self.file.read(&mut buf[filled..])?;
            if read == 0
            {
                return Err(CoreError::Truncated {
                    field: "byte reader read",
                    expected: n,
                    got: filled,
                });
            }
            filled += read;
        }
        Ok(buf)
    }

    /// Current absolute byte position.
    pub fn tell(&mut self) -> Result<u64>
    {
        Ok(self.file.stream_position()?)
    }

    /// Total length of the underlying file, in bytes.
    pub fn len(&self) -> u64
    {
        self.len
    }

    pub fn is_empty(&self) -> bool
    {
        self.len == 0
    }
}

impl Read for ByteReader
{
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>
    {
        self.file.read(buf)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &[u8]) -> std::path::PathBuf
    {
        let path = std::env::temp_dir()
            .join(format!("bgzf_pairsort_reader_test_{}_{}.bin", std::process::id(), contents.len()));
        let mut f = File::create(&path).unwrap();
        f.write_all(contents).unwrap();
        path
    }

    #[test]
    fn reads_exact_bytes_and_tracks_position()
    {
        let path = write_temp(b"0123456789");
        let mut reader = ByteReader::open(&path).unwrap();
        assert_eq!(reader.len(), 10);

        let first = reader.read(4).unwrap();
        assert_eq!(first, b"0123");
        assert_eq!(reader.tell().unwrap(), 4);

        reader.seek(8).unwrap();
        let last = reader.read(2).unwrap();
        assert_eq!(last, b"89");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn short_read_signals_truncated()
    {
        let path = write_temp(b"ab");
        let mut reader = ByteReader::open(&path).unwrap();
        let err = reader.read(10).unwrap_err();
        assert!(matches!(err, CoreError::Truncated { .. }));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn open_missing_file_errors()
    {
        let missing = std::env::temp_dir().join("bgzf_pairsort_definitely_missing_file_xyz.bin");
        let err = ByteReader::open(&missing).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }
}
