//! `Read + Seek` adapter over the logical contents of a CHD file.
//!
//! The adapter keeps one decompressed hunk buffered. For sequential access to whole hunks,
//! [`Chd::read_hunk`](crate::Chd::read_hunk) avoids the extra copy.
use crate::{Chd, Error};
use std::io::{BufRead, ErrorKind, Read, Seek, SeekFrom};

/// Utility adapter for [`Chd`](crate::Chd) that implements `BufRead + Seek` over the
/// `logical_bytes` of the file.
pub struct ChdReader<F: Read + Seek> {
    chd: Chd<F>,
    position: u64,
    buffer: Vec<u8>,
    buffered_hunk: Option<u32>,
}

impl<F: Read + Seek> ChdReader<F> {
    /// Create a new `ChdReader` from an opened [`Chd`](crate::Chd).
    pub fn new(chd: Chd<F>) -> Self {
        let buffer = chd.get_hunksized_buffer();
        ChdReader {
            chd,
            position: 0,
            buffer,
            buffered_hunk: None,
        }
    }

    /// Consumes the reader and returns the underlying CHD.
    pub fn into_inner(self) -> Chd<F> {
        self.chd
    }

    fn len(&self) -> u64 {
        self.chd.header().logical_bytes
    }
}

impl<F: Read + Seek> BufRead for ChdReader<F> {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        let len = self.len();
        if self.position >= len {
            return Ok(&[]);
        }

        let hunk_bytes = self.buffer.len() as u64;
        let hunk_num = u32::try_from(self.position / hunk_bytes)
            .map_err(|_| std::io::Error::from(Error::HunkOutOfRange))?;
        if self.buffered_hunk != Some(hunk_num) {
            self.buffered_hunk = None;
            self.chd.read_hunk(hunk_num, &mut self.buffer)?;
            self.buffered_hunk = Some(hunk_num);
        }

        let start = (self.position % hunk_bytes) as usize;
        // the last hunk may extend past the logical end
        let end = (hunk_bytes as usize).min(start + (len - self.position) as usize);
        Ok(&self.buffer[start..end])
    }

    fn consume(&mut self, amt: usize) {
        self.position = (self.position + amt as u64).min(self.len());
    }
}

impl<F: Read + Seek> Read for ChdReader<F> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let available = self.fill_buf()?;
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.consume(count);
        Ok(count)
    }
}

impl<F: Read + Seek> Seek for ChdReader<F> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => self.len().checked_add_signed(n),
            SeekFrom::Current(n) => self.position.checked_add_signed(n),
        };
        match target {
            Some(n) => {
                self.position = n;
                Ok(n)
            }
            None => Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }
}
