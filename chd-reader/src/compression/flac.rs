use std::io::Cursor;
use std::mem;

use claxon::frame::FrameReader;

use crate::cdrom::{CD_FRAME_SIZE, CD_MAX_SECTOR_DATA};
use crate::compression::cdrom::{check_frame_multiple, reassemble_frames};
use crate::compression::zlib::ZlibCodec;
use crate::compression::{CodecImplementation, CompressionCodec, DecompressResult};
use crate::error::{Error, Result};

const CDFL_CHANNELS: u32 = 2;
const BYTES_PER_SAMPLE: usize = 2 * CDFL_CHANNELS as usize;

/// FLAC block size the cdfl compressor uses for a given amount of audio.
fn cdfl_block_size(bytes: u32) -> u32 {
    let mut block_size = bytes / 4;
    while block_size > 2048 {
        block_size /= 2;
    }
    block_size
}

/// Decoder for a headerless run of FLAC frames.
struct FlacDecoder<'a> {
    frames: FrameReader<Cursor<&'a [u8]>>,
    channels: u32,
    block_size: u32,
}

impl<'a> FlacDecoder<'a> {
    fn reset(input: &'a [u8], channels: u32, block_size: u32) -> Self {
        // claxon reads raw frames without the STREAMINFO block
        FlacDecoder {
            frames: FrameReader::new(Cursor::new(input)),
            channels,
            block_size,
        }
    }

    /// Decodes `num_samples` interleaved 16-bit stereo samples into `output`, byte swapping
    /// each sample from native order when `swap_endian` is set. `scratch` is reused as the
    /// block buffer.
    fn decode_interleaved(
        &mut self,
        output: &mut [u8],
        num_samples: usize,
        swap_endian: bool,
        scratch: &mut Vec<i32>,
    ) -> Result<()> {
        let mut out_samples = output
            .get_mut(..num_samples * BYTES_PER_SAMPLE)
            .ok_or(Error::DecompressionError)?
            .chunks_exact_mut(BYTES_PER_SAMPLE);
        let mut written = 0;

        while written < num_samples {
            let block = match self.frames.read_next_or_eof(mem::take(scratch)) {
                Ok(Some(block)) => block,
                _ => return Err(Error::DecompressionError),
            };
            if block.channels() != self.channels || block.duration() > self.block_size {
                return Err(Error::DecompressionError);
            }

            for (l, r) in block.stereo_samples() {
                let sample = out_samples.next().ok_or(Error::DecompressionError)?;
                for (dst, value) in sample.chunks_exact_mut(2).zip([l as i16, r as i16]) {
                    let value = if swap_endian { value.swap_bytes() } else { value };
                    dst.copy_from_slice(&value.to_ne_bytes());
                }
                written += 1;
            }
            *scratch = block.into_buffer();
        }
        Ok(())
    }

    /// Returns the number of input bytes consumed.
    fn finish(self) -> usize {
        self.frames.into_inner().position() as usize
    }
}

/// CD-ROM wrapper codec for FLAC audio (cdfl).
///
/// Sector data is 16-bit big-endian stereo PCM coded as FLAC frames, followed by the
/// deflated subcode stream.
pub struct CdFlacCodec {
    #[cfg_attr(not(feature = "want_subcode"), allow(dead_code))]
    sub_engine: ZlibCodec,
    buffer: Vec<u8>,
    samples: Vec<i32>,
    block_size: u32,
    swap_endian: bool,
}

impl CompressionCodec for CdFlacCodec {}

impl CodecImplementation for CdFlacCodec {
    fn is_lossy(&self) -> bool {
        false
    }

    fn new(hunk_size: u32) -> Result<Self> {
        let frames = check_frame_multiple(hunk_size)?;
        let block_size = cdfl_block_size(frames * CD_MAX_SECTOR_DATA);
        log::debug!("cdfl codec: {frames} frames per hunk, block size {block_size}");

        Ok(CdFlacCodec {
            sub_engine: ZlibCodec::new(hunk_size)?,
            buffer: vec![0u8; hunk_size as usize],
            samples: Vec::new(),
            block_size,
            swap_endian: cfg!(target_endian = "little"),
        })
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressResult> {
        let frames = output.len() / CD_FRAME_SIZE as usize;
        let sector_bytes = frames * CD_MAX_SECTOR_DATA as usize;

        let buffer = self
            .buffer
            .get_mut(..frames * CD_FRAME_SIZE as usize)
            .ok_or(Error::DecompressionError)?;
        let (sectors, subcode) = buffer.split_at_mut(sector_bytes);

        let mut decoder = FlacDecoder::reset(input, CDFL_CHANNELS, self.block_size);
        decoder.decode_interleaved(
            sectors,
            sector_bytes / BYTES_PER_SAMPLE,
            self.swap_endian,
            &mut self.samples,
        )?;
        let offset = decoder.finish();

        #[cfg(feature = "want_subcode")]
        let bytes_in = {
            let sub_input = input.get(offset..).ok_or(Error::DecompressionError)?;
            offset + self.sub_engine.decompress(sub_input, subcode)?.total_in()
        };
        #[cfg(not(feature = "want_subcode"))]
        let bytes_in = {
            subcode.fill(0);
            offset
        };

        reassemble_frames(buffer, frames, output);
        Ok(DecompressResult::new(frames * CD_FRAME_SIZE as usize, bytes_in))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdrom::CD_MAX_SUBCODE_DATA;
    use crc::{Crc, CRC_16_UMTS, CRC_8_SMBUS};
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    const FLAC_CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_SMBUS);
    const FLAC_CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_UMTS);

    /// Builds one stereo 16-bit FLAC frame with verbatim subframes.
    fn verbatim_frame(number: u8, left: &[i16], right: &[i16]) -> Vec<u8> {
        let mut frame = vec![
            0xff, 0xf8, // sync, fixed block size
            0x79, // 16-bit block size follows, 44.1kHz
            0x18, // independent stereo, 16 bits per sample
            number,
        ];
        frame.extend_from_slice(&(left.len() as u16 - 1).to_be_bytes());
        frame.push(FLAC_CRC8.checksum(&frame));
        for channel in [left, right] {
            frame.push(0x02);
            for s in channel {
                frame.extend_from_slice(&s.to_be_bytes());
            }
        }
        let crc = FLAC_CRC16.checksum(&frame);
        frame.extend_from_slice(&crc.to_be_bytes());
        frame
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn block_size_is_clamped() {
        assert_eq!(cdfl_block_size(2352), 588);
        assert_eq!(cdfl_block_size(8 * 2352), 1176);
        assert_eq!(cdfl_block_size(32 * 2352), 1176);
    }

    #[test]
    fn decodes_audio_and_subcode() {
        let samples = CD_MAX_SECTOR_DATA as usize / 4;
        let left: Vec<i16> = (0..samples as i16).map(|i| i * 3 - 700).collect();
        let right: Vec<i16> = (0..samples as i16).map(|i| -i * 5).collect();
        let subcode = vec![0x5au8; CD_MAX_SUBCODE_DATA as usize];

        let mut input = verbatim_frame(0, &left, &right);
        input.extend_from_slice(&deflate(&subcode));

        let mut codec = CdFlacCodec::new(CD_FRAME_SIZE).unwrap();
        let mut out = vec![0u8; CD_FRAME_SIZE as usize];
        let res = codec.decompress(&input, &mut out).unwrap();
        assert_eq!(res.total_out(), CD_FRAME_SIZE as usize);

        for i in 0..samples {
            assert_eq!(i16::from_be_bytes([out[4 * i], out[4 * i + 1]]), left[i]);
            assert_eq!(i16::from_be_bytes([out[4 * i + 2], out[4 * i + 3]]), right[i]);
        }
        #[cfg(feature = "want_subcode")]
        assert_eq!(out[CD_MAX_SECTOR_DATA as usize..], subcode[..]);
    }

    #[test]
    fn short_audio_is_an_error() {
        let left = vec![1i16; 100];
        let right = vec![2i16; 100];
        let input = verbatim_frame(0, &left, &right);
        let mut codec = CdFlacCodec::new(CD_FRAME_SIZE).unwrap();
        let mut out = vec![0u8; CD_FRAME_SIZE as usize];
        assert_eq!(
            codec.decompress(&input, &mut out).unwrap_err(),
            Error::DecompressionError
        );
    }
}
