#![forbid(unsafe_code)]
//! A read-only engine for MAME Compressed Hunks of Data (CHD) files.
//!
//! CHD versions 1 through 5 are supported, including the V5 Huffman-coded hunk map and the
//! `zlib`, `lzma`, `cdzl`, `cdlz` and `cdfl` codecs. Parent/child CHDs are supported by
//! handing the opened parent to [`Chd::open`].
//!
//! ## Reading hunks
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use chd_reader::Chd;
//!
//! let file = BufReader::new(File::open("image.chd")?);
//! let mut chd = Chd::open(file, None)?;
//! let mut hunk = chd.get_hunksized_buffer();
//! for hunk_num in 0..chd.header().hunk_count {
//!     chd.read_hunk(hunk_num, &mut hunk)?;
//! }
//! # Ok::<(), chd_reader::Error>(())
//! ```
//!
//! ## Reading metadata
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use chd_reader::Chd;
//! use chd_reader::metadata::KnownMetadata;
//!
//! let mut chd = Chd::open(BufReader::new(File::open("image.chd")?), None)?;
//! let track = chd.get_metadata(KnownMetadata::CdRomTrack2 as u32, 0)?;
//! println!("{}", String::from_utf8_lossy(&track.value));
//! # Ok::<(), chd_reader::Error>(())
//! ```
//!
//! ## Features
//! * `want_subcode` and `want_raw_data_sector` (on by default through `cd_full`) control how
//!   much of each CD frame is reconstructed.
//! * `verify_block_crc` checks every decompressed hunk against the CRC stored in the map.

mod bitstream;
mod block_hash;
mod cdrom;
mod chdfile;
mod compression;
mod error;
mod huffman;

pub mod header;
pub mod map;
pub mod metadata;
pub mod read;

pub use chdfile::{Chd, OpenMode};
pub use compression::{codec_registry, find_codec, CodecDescriptor};
pub use error::{error_string, Error, Result};

/// Packs a four character code into a big-endian `u32`.
pub const fn make_tag(a: &[u8; 4]) -> u32 {
    ((a[0] as u32) << 24) | ((a[1] as u32) << 16) | ((a[2] as u32) << 8) | (a[3] as u32)
}
