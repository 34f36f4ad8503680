//! MSB-first bit reader over a compressed byte buffer.
//!
//! Reads that run past the end of the buffer yield zero bits instead of failing; the V5 map
//! CRC is what catches a truncated stream. [`BitStream::overflowed`] reports whether that
//! happened.
use crate::error::{Error, Result};
use bitreader::BitReader;

pub(crate) struct BitStream<'a> {
    reader: BitReader<'a>,
    overflowed: bool,
}

/// Reads `bits` bits from `reader`, padding with zeros past the end of the buffer.
/// Returns the value and whether padding was needed.
fn take_padded(reader: &mut BitReader<'_>, bits: u8) -> Result<(u32, bool)> {
    if bits > 32 {
        return Err(Error::DecompressionError);
    }
    if bits == 0 {
        return Ok((0, false));
    }

    let remaining = reader.remaining();
    if remaining >= bits as u64 {
        return Ok((reader.read_u32(bits)?, false));
    }

    let avail = remaining as u8;
    let head = if avail > 0 { reader.read_u32(avail)? } else { 0 };
    Ok((((head as u64) << (bits - avail)) as u32, true))
}

impl<'a> BitStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitStream {
            reader: BitReader::new(data),
            overflowed: false,
        }
    }

    /// Reads the next `bits` bits (at most 32) as an unsigned integer.
    pub fn read(&mut self, bits: u8) -> Result<u32> {
        let (value, padded) = take_padded(&mut self.reader, bits)?;
        self.overflowed |= padded;
        Ok(value)
    }

    /// Returns the next `bits` bits without advancing.
    pub fn peek(&self, bits: u8) -> Result<u32> {
        let mut ahead = self.reader.relative_reader();
        take_padded(&mut ahead, bits).map(|(value, _)| value)
    }

    /// Advances the cursor by `bits` bits.
    pub fn skip(&mut self, bits: u8) -> Result<()> {
        self.read(bits).map(|_| ())
    }

    /// Whether any read went past the end of the buffer.
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    #[cfg(test)]
    pub fn position(&self) -> u64 {
        self.reader.position()
    }
}

#[cfg(test)]
mod tests {
    use super::BitStream;

    #[test]
    fn reads_msb_first() {
        let data = [0b1011_0010, 0b0111_1111];
        let mut bits = BitStream::new(&data);
        assert_eq!(bits.read(1).unwrap(), 1);
        assert_eq!(bits.read(3).unwrap(), 0b011);
        assert_eq!(bits.read(8).unwrap(), 0b0010_0111);
        assert_eq!(bits.position(), 12);
        assert!(!bits.overflowed());
    }

    #[test]
    fn peek_does_not_advance() {
        let data = [0xA5, 0x5A];
        let mut bits = BitStream::new(&data);
        assert_eq!(bits.peek(4).unwrap(), 0xA);
        assert_eq!(bits.peek(4).unwrap(), 0xA);
        bits.skip(4).unwrap();
        assert_eq!(bits.read(8).unwrap(), 0x55);
    }

    #[test]
    fn past_end_pads_with_zeros() {
        let data = [0xFF];
        let mut bits = BitStream::new(&data);
        assert_eq!(bits.read(4).unwrap(), 0xF);
        assert_eq!(bits.peek(8).unwrap(), 0xF0);
        assert_eq!(bits.read(8).unwrap(), 0xF0);
        assert!(bits.overflowed());
        assert_eq!(bits.read(16).unwrap(), 0);
    }

    #[test]
    fn wide_reads() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A];
        let mut bits = BitStream::new(&data);
        assert_eq!(bits.read(32).unwrap(), 0x1234_5678);
        assert!(bits.read(33).is_err());
    }
}
