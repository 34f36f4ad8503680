use crate::cdrom::{CD_FRAME_SIZE, CD_MAX_SECTOR_DATA, CD_MAX_SUBCODE_DATA};
use crate::compression::lzma::LzmaCodec;
use crate::compression::zlib::ZlibCodec;
use crate::compression::{BlockCodec, CodecImplementation, CompressionCodec, DecompressResult};
use crate::error::{Error, Result};

#[cfg(feature = "want_raw_data_sector")]
use crate::cdrom::{CD_SYNC_HEADER, CD_SYNC_NUM_BYTES};
#[cfg(feature = "want_raw_data_sector")]
use crate::compression::ecc::ErrorCorrectedSector;

const SECTOR: usize = CD_MAX_SECTOR_DATA as usize;
const SUBCODE: usize = CD_MAX_SUBCODE_DATA as usize;
const FRAME: usize = CD_FRAME_SIZE as usize;

/// CD-ROM wrapper codec for Zlib (cdzl).
pub type CdZlibCodec = CdBlockCodec<ZlibCodec, ZlibCodec>;
/// CD-ROM wrapper codec for LZMA (cdlz).
pub type CdLzmaCodec = CdBlockCodec<LzmaCodec, ZlibCodec>;

impl CompressionCodec for CdZlibCodec {}
impl CompressionCodec for CdLzmaCodec {}

/// CD-ROM wrapper codec that splits each hunk into sector and subcode streams.
///
/// A compressed hunk starts with a bitmap holding one bit per frame that marks sectors
/// whose sync header and ECC were stripped, followed by the 2 or 3 byte big-endian length
/// of the compressed sector stream. The sector stream comes next, then the subcode stream.
pub struct CdBlockCodec<Engine: BlockCodec, SubEngine: BlockCodec> {
    engine: Engine,
    sub_engine: SubEngine,
    buffer: Vec<u8>,
}

/// The sizes of the fixed header in front of a compressed CD hunk.
pub(crate) struct CdHunkLayout {
    pub frames: usize,
    pub ecc_bytes: usize,
    pub header_bytes: usize,
}

impl CdHunkLayout {
    pub fn for_output(output_len: usize) -> Self {
        let frames = output_len / FRAME;
        let complen_bytes = if output_len < 65536 { 2 } else { 3 };
        let ecc_bytes = (frames + 7) / 8;
        CdHunkLayout {
            frames,
            ecc_bytes,
            header_bytes: ecc_bytes + complen_bytes,
        }
    }

    /// Reads the compressed length of the sector stream.
    pub fn base_length(&self, input: &[u8]) -> Result<usize> {
        let raw = input
            .get(self.ecc_bytes..self.header_bytes)
            .ok_or(Error::DecompressionError)?;
        Ok(raw.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
    }
}

/// Checks that the hunk size holds a whole number of frames.
pub(crate) fn check_frame_multiple(hunk_size: u32) -> Result<u32> {
    if hunk_size % CD_FRAME_SIZE != 0 {
        return Err(Error::CodecError);
    }
    Ok(hunk_size / CD_FRAME_SIZE)
}

/// Interleaves the sector and subcode streams of `buffer` into whole frames.
pub(crate) fn reassemble_frames(buffer: &[u8], frames: usize, output: &mut [u8]) {
    let (sectors, subcode) = buffer.split_at(frames * SECTOR);
    for (frame_num, frame) in output.chunks_exact_mut(FRAME).take(frames).enumerate() {
        frame[..SECTOR].copy_from_slice(&sectors[frame_num * SECTOR..][..SECTOR]);
        frame[SECTOR..].copy_from_slice(&subcode[frame_num * SUBCODE..][..SUBCODE]);
    }
}

impl<Engine: BlockCodec, SubEngine: BlockCodec> CodecImplementation
    for CdBlockCodec<Engine, SubEngine>
{
    fn is_lossy(&self) -> bool {
        self.engine.is_lossy() || self.sub_engine.is_lossy()
    }

    fn new(hunk_size: u32) -> Result<Self> {
        let frames = check_frame_multiple(hunk_size)?;
        Ok(CdBlockCodec {
            engine: Engine::new(frames * CD_MAX_SECTOR_DATA)?,
            sub_engine: SubEngine::new(frames * CD_MAX_SUBCODE_DATA)?,
            buffer: vec![0u8; hunk_size as usize],
        })
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressResult> {
        let layout = CdHunkLayout::for_output(output.len());
        let frames = layout.frames;
        let complen_base = layout.base_length(input)?;

        let base = input
            .get(layout.header_bytes..layout.header_bytes + complen_base)
            .ok_or(Error::DecompressionError)?;
        let buffer = self
            .buffer
            .get_mut(..frames * FRAME)
            .ok_or(Error::DecompressionError)?;
        let (sectors, subcode) = buffer.split_at_mut(frames * SECTOR);

        #[allow(unused_mut)]
        let mut result = self.engine.decompress(base, sectors)?;

        #[cfg(feature = "want_subcode")]
        {
            let sub_input = &input[layout.header_bytes + complen_base..];
            result += self.sub_engine.decompress(sub_input, subcode)?;
        }
        #[cfg(not(feature = "want_subcode"))]
        {
            subcode.fill(0);
        }

        reassemble_frames(buffer, frames, output);

        #[cfg(feature = "want_raw_data_sector")]
        for (frame_num, frame) in output.chunks_exact_mut(FRAME).take(frames).enumerate() {
            if input[frame_num / 8] & (1 << (frame_num % 8)) != 0 {
                let sector = <&mut [u8; SECTOR]>::try_from(&mut frame[..SECTOR])?;
                sector[..CD_SYNC_NUM_BYTES].copy_from_slice(&CD_SYNC_HEADER);
                sector.generate_ecc();
            }
        }

        Ok(DecompressResult::new(
            frames * FRAME,
            layout.header_bytes + result.total_in(),
        ))
    }
}
