use crate::compression::{BlockCodec, CodecImplementation, CompressionCodec, DecompressResult};
use crate::error::{Error, Result};
use lzma_rs::decompress::raw::{LzmaDecoder, LzmaParams, LzmaProperties};
use std::io::Cursor;

/// Raw LZMA codec. CHD stores no LZMA properties, so the decoder is configured with the
/// properties the encoder derives for level 9 and the hunk size.
pub struct LzmaCodec {
    engine: LzmaDecoder,
}

impl BlockCodec for LzmaCodec {}
impl CompressionCodec for LzmaCodec {}

// LzmaEnc.c LzmaEncProps_Normalize
pub(crate) fn get_lzma_dict_size(level: u32, reduce_size: u32) -> u32 {
    let mut dict_size = if level <= 5 {
        1 << (level * 2 + 14)
    } else if level <= 7 {
        1 << 25
    } else {
        1 << 26
    };

    if dict_size > reduce_size {
        for i in 11..=30 {
            if reduce_size <= (2u32 << i) {
                dict_size = 2u32 << i;
                break;
            }
            if reduce_size <= (3u32 << i) {
                dict_size = 3u32 << i;
                break;
            }
        }
    }

    dict_size
}

impl CodecImplementation for LzmaCodec {
    fn is_lossy(&self) -> bool {
        false
    }

    fn new(hunk_size: u32) -> Result<Self> {
        // LZMA 19.0 uses lc = 3, lp = 0, pb = 2
        let params = LzmaParams::new(
            LzmaProperties {
                lc: 3,
                lp: 0,
                pb: 2,
            },
            get_lzma_dict_size(9, hunk_size),
            None,
        );
        let engine = LzmaDecoder::new(params, None).map_err(|_| Error::CodecError)?;
        Ok(LzmaCodec { engine })
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressResult> {
        let len = output.len();
        let mut read = Cursor::new(input);
        let mut write: &mut [u8] = output;

        self.engine.reset(Some(Some(len as u64)));
        self.engine
            .decompress(&mut read, &mut write)
            .map_err(|_| Error::DecompressionError)?;

        let written = len - write.len();
        if written != len || read.position() != input.len() as u64 {
            return Err(Error::DecompressionError);
        }
        Ok(DecompressResult::new(written, input.len()))
    }
}
