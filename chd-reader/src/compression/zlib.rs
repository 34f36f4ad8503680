use crate::compression::{BlockCodec, CodecImplementation, CompressionCodec, DecompressResult};
use crate::error::{Error, Result};
use flate2::{Decompress, FlushDecompress};

/// Raw DEFLATE codec, used for `zlib`, `zlib+` and as the inner engine of the CD codecs.
///
/// The inflater is allocated once and reset before every hunk.
pub struct ZlibCodec {
    engine: Decompress,
}

impl BlockCodec for ZlibCodec {}
impl CompressionCodec for ZlibCodec {}

impl CodecImplementation for ZlibCodec {
    fn is_lossy(&self) -> bool {
        false
    }

    fn new(_: u32) -> Result<Self> {
        Ok(ZlibCodec {
            engine: Decompress::new(false),
        })
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressResult> {
        self.engine.reset(false);
        self.engine
            .decompress(input, output, FlushDecompress::Finish)
            .map_err(|_| Error::DecompressionError)?;

        let total_out = self.engine.total_out();
        if total_out != output.len() as u64 {
            return Err(Error::DecompressionError);
        }

        Ok(DecompressResult::new(
            total_out as usize,
            self.engine.total_in() as usize,
        ))
    }
}
