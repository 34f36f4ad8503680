use crate::Result;
use num_traits::ToPrimitive;

#[cfg(feature = "verify_block_crc")]
use crate::Error;

#[allow(unused_imports)]
use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC};

// MAME's crc16 is CCITT-FALSE: poly 0x1021, init 0xffff, no reflection.
pub(crate) const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

// zlib crc32, used by V3/V4 map entries.
#[cfg(feature = "verify_block_crc")]
pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Per-width verification of a decompressed hunk against the checksum stored in its map entry.
pub(crate) trait BlockChecksum {
    /// Checks `buf` against `crc`, passing `result` through on success.
    ///
    /// A `None` checksum always passes. Without the `verify_block_crc` feature this is a no-op.
    fn verify_block<C: ToPrimitive, R>(crc: Option<C>, buf: &[u8], result: R) -> Result<R>;
}

impl BlockChecksum for Crc<u16> {
    #[inline(always)]
    #[allow(unused_variables)]
    fn verify_block<C: ToPrimitive, R>(crc: Option<C>, buf: &[u8], result: R) -> Result<R> {
        #[cfg(feature = "verify_block_crc")]
        match crc.and_then(|f| f.to_u16()) {
            Some(crc) if CRC16.checksum(buf) != crc => {
                log::debug!("hunk crc16 mismatch, expected {crc:04x}");
                Err(Error::DecompressionError)
            }
            _ => Ok(result),
        }

        #[cfg(not(feature = "verify_block_crc"))]
        Ok(result)
    }
}

impl BlockChecksum for Crc<u32> {
    #[inline(always)]
    #[allow(unused_variables)]
    fn verify_block<C: ToPrimitive, R>(crc: Option<C>, buf: &[u8], result: R) -> Result<R> {
        #[cfg(feature = "verify_block_crc")]
        match crc.and_then(|f| f.to_u32()) {
            Some(crc) if CRC32.checksum(buf) != crc => {
                log::debug!("hunk crc32 mismatch, expected {crc:08x}");
                Err(Error::DecompressionError)
            }
            _ => Ok(result),
        }

        #[cfg(not(feature = "verify_block_crc"))]
        Ok(result)
    }
}
