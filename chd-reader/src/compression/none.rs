use crate::compression::{CodecImplementation, CompressionCodec, DecompressResult};
use crate::error::{Error, Result};

/// Pass-through codec for uncompressed data.
pub struct NoneCodec;

impl CompressionCodec for NoneCodec {}

impl CodecImplementation for NoneCodec {
    fn is_lossy(&self) -> bool {
        false
    }

    fn new(_: u32) -> Result<Self> {
        Ok(NoneCodec)
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressResult> {
        let src = input
            .get(..output.len())
            .ok_or(Error::DecompressionError)?;
        output.copy_from_slice(src);
        Ok(DecompressResult::new(output.len(), output.len()))
    }
}
