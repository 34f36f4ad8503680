//! Hunk decompression codecs and the registry that maps CHD codec tags onto them.
use crate::error::{Error, Result};
use crate::header::CodecType;
use std::ops::{Add, AddAssign};

mod cdrom;
pub(crate) mod ecc;
mod flac;
mod lzma;
mod none;
mod zlib;

pub mod codecs {
    pub use crate::compression::cdrom::CdLzmaCodec;
    pub use crate::compression::cdrom::CdZlibCodec;
    pub use crate::compression::flac::CdFlacCodec;
    pub use crate::compression::lzma::LzmaCodec;
    pub use crate::compression::none::NoneCodec;
    pub use crate::compression::zlib::ZlibCodec;
}

/// Marker trait for a codec that can be used to decompress a compressed hunk.
pub trait CompressionCodec: CodecImplementation {}

/// Trait for a CHD decompression codec implementation.
pub trait CodecImplementation {
    /// Returns whether this codec is lossy or not.
    fn is_lossy(&self) -> bool;

    /// Creates a new instance of this codec for the provided hunk size.
    fn new(hunk_size: u32) -> Result<Self>
    where
        Self: Sized;

    /// Decompress compressed bytes from the input buffer into the
    /// output buffer.
    ///
    /// The output buffer must usually have the exact length of `hunk_size`. Producing any
    /// other amount of data is an error.
    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> Result<DecompressResult>;

    /// Applies a codec specific configuration parameter.
    ///
    /// None of the read-only codecs take configuration, so the default rejects everything.
    fn config(&mut self, _param: i32, _config: &[u8]) -> Result<()> {
        Err(Error::InvalidParameter)
    }
}

/// Codecs that can serve as the inner engine of a CD codec.
pub(crate) trait BlockCodec: CodecImplementation + Sized {}

/// The result of a chunk decompression operation.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct DecompressResult {
    bytes_out: usize,
    bytes_read: usize,
}

impl Add for DecompressResult {
    type Output = DecompressResult;

    fn add(self, rhs: Self) -> Self::Output {
        DecompressResult {
            bytes_out: self.total_out() + rhs.total_out(),
            bytes_read: self.total_in() + rhs.total_in(),
        }
    }
}

impl AddAssign for DecompressResult {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_read += rhs.bytes_read;
        self.bytes_out += rhs.bytes_out;
    }
}

impl DecompressResult {
    pub(crate) fn new(out: usize, read: usize) -> Self {
        DecompressResult {
            bytes_out: out,
            bytes_read: read,
        }
    }

    /// Returns the total number of decompressed bytes written to the output buffer.
    pub fn total_out(&self) -> usize {
        self.bytes_out
    }

    /// Returns the total number of bytes read from the compressed input buffer.
    pub fn total_in(&self) -> usize {
        self.bytes_read
    }
}

/// A registered codec: its tag, display name and constructor.
#[derive(Copy, Clone)]
pub struct CodecDescriptor {
    pub codec_type: CodecType,
    pub name: &'static str,
    pub lossy: bool,
    init: fn(u32) -> Result<Box<dyn CompressionCodec>>,
}

impl CodecDescriptor {
    /// The tag this codec is declared with in a CHD header.
    pub fn tag(&self) -> u32 {
        self.codec_type as u32
    }

    /// Creates a codec instance for hunks of `hunk_bytes` bytes.
    pub fn init(&self, hunk_bytes: u32) -> Result<Box<dyn CompressionCodec>> {
        (self.init)(hunk_bytes)
    }
}

impl std::fmt::Debug for CodecDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecDescriptor")
            .field("codec_type", &self.codec_type)
            .field("name", &self.name)
            .field("lossy", &self.lossy)
            .finish()
    }
}

fn boxed<C: CompressionCodec + 'static>(hunk_bytes: u32) -> Result<Box<dyn CompressionCodec>> {
    Ok(Box::new(C::new(hunk_bytes)?))
}

const CODEC_REGISTRY: &[CodecDescriptor] = &[
    CodecDescriptor {
        codec_type: CodecType::None,
        name: "None",
        lossy: false,
        init: boxed::<codecs::NoneCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::Zlib,
        name: "zlib",
        lossy: false,
        init: boxed::<codecs::ZlibCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::ZlibPlus,
        name: "zlib+",
        lossy: false,
        init: boxed::<codecs::ZlibCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::ZlibV5,
        name: "Deflate",
        lossy: false,
        init: boxed::<codecs::ZlibCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::LzmaV5,
        name: "LZMA",
        lossy: false,
        init: boxed::<codecs::LzmaCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::ZlibCdV5,
        name: "cdzl (CD Deflate)",
        lossy: false,
        init: boxed::<codecs::CdZlibCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::LzmaCdV5,
        name: "cdlz (CD LZMA)",
        lossy: false,
        init: boxed::<codecs::CdLzmaCodec>,
    },
    CodecDescriptor {
        codec_type: CodecType::FlacCdV5,
        name: "cdfl (CD FLAC)",
        lossy: false,
        init: boxed::<codecs::CdFlacCodec>,
    },
];

/// Returns every codec this crate can decode.
pub fn codec_registry() -> &'static [CodecDescriptor] {
    CODEC_REGISTRY
}

/// Looks up the codec registered for a header codec tag.
pub fn find_codec(tag: u32) -> Option<&'static CodecDescriptor> {
    CODEC_REGISTRY.iter().find(|c| c.tag() == tag)
}
