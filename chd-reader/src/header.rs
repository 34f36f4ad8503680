//! Types and methods relating to header data for a CHD file.
//!
//! CHD V1 through V5 all lay their headers out differently. Every version is decoded by its
//! own function into the single canonical [`Header`](crate::header::Header) struct, so map and
//! read logic never needs to know which layout a file used. Fields that a version does not
//! carry are left zeroed.
use crate::compression::find_codec;
use crate::error::{Error, Result};
use crate::make_tag;
use crate::metadata::{KnownMetadata, MetadataRefs, MetadataTag};
use byteorder::{BigEndian, ReadBytesExt};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::io::{Cursor, Read, Seek, SeekFrom};
use text_io::try_scan;

/// The types of compression codecs that may be declared in a CHD header.
#[repr(u32)]
#[derive(FromPrimitive, Debug, Copy, Clone, Eq, PartialEq)]
pub enum CodecType {
    /// No compression.
    None = 0,
    /// V1-4 Zlib DEFLATE compression.
    Zlib = 1,
    /// V1-4 Zlib+ DEFLATE compression.
    ZlibPlus = 2,
    /// V1-4 AV Huffman compression. Recognized but not decodable.
    AV = 3,
    /// V5 Zlib DEFLATE compression (zlib).
    ZlibV5 = make_tag(b"zlib"),
    /// V5 LZMA compression (lzma).
    LzmaV5 = make_tag(b"lzma"),
    /// V5 CD Zlib DEFLATE compression (cdzl).
    ZlibCdV5 = make_tag(b"cdzl"),
    /// V5 CD LZMA compression (cdlz).
    LzmaCdV5 = make_tag(b"cdlz"),
    /// V5 CD FLAC compression (cdfl).
    FlacCdV5 = make_tag(b"cdfl"),
}

/// The CHD header version.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, FromPrimitive)]
pub enum Version {
    /// CHD version 1.
    ChdV1 = 1,
    /// CHD version 2.
    ChdV2 = 2,
    /// CHD version 3.
    ChdV3 = 3,
    /// CHD version 4.
    ChdV4 = 4,
    /// CHD version 5.
    ChdV5 = 5,
}

/// CHD flags for legacy V1-4 headers.
#[repr(u32)]
pub enum Flags {
    /// This CHD file has a parent.
    HasParent = 0x00000001,
    /// This CHD file is writable.
    IsWritable = 0x00000002,
    /// Undefined.
    Undefined = 0xfffffffc,
}

pub(crate) const MD5_BYTES: usize = 16;
pub(crate) const SHA1_BYTES: usize = 20;

/// The CHD magic number.
pub const CHD_MAGIC: &[u8; 8] = b"MComprHD";

pub const CHD_V1_HEADER_SIZE: u32 = 76;
pub const CHD_V2_HEADER_SIZE: u32 = 80;
pub const CHD_V3_HEADER_SIZE: u32 = 120;
pub const CHD_V4_HEADER_SIZE: u32 = 108;
pub const CHD_V5_HEADER_SIZE: u32 = 124;
pub const CHD_MAX_HEADER_SIZE: usize = CHD_V5_HEADER_SIZE as usize;

const CHD_V1_SECTOR_SIZE: u32 = 512;

pub(crate) const V5_COMPRESSED_MAP_ENTRY_BYTES: u32 = 12;
pub(crate) const V5_UNCOMPRESSED_MAP_ENTRY_BYTES: u32 = 4;

/// A CHD header of any version.
#[derive(Clone, Debug)]
pub struct Header {
    /// The CHD version.
    pub version: Version,
    /// The length of the header in bytes.
    pub length: u32,
    /// Legacy V1-4 flags. Always zero for V5.
    pub flags: u32,
    /// Declared codecs. V1-4 only use the first slot.
    pub compression: [u32; 4],
    /// The size of each hunk in bytes.
    pub hunk_bytes: u32,
    /// The total number of hunks.
    pub hunk_count: u32,
    /// The size of each unit in bytes.
    pub unit_bytes: u32,
    /// The total number of units.
    pub unit_count: u64,
    /// The logical size of the uncompressed data in bytes.
    pub logical_bytes: u64,
    /// Offset of the hunk map. V1-4 maps start right after the header.
    pub map_offset: u64,
    /// Offset of the first metadata entry, or 0 if there is none.
    pub meta_offset: u64,
    /// Bytes per entry of the in-memory map.
    pub map_entry_bytes: u32,
    /// MD5 of the data (V1-3).
    pub md5: [u8; MD5_BYTES],
    /// MD5 of the parent (V1-3).
    pub parent_md5: [u8; MD5_BYTES],
    /// SHA1 of data and metadata (V3-5).
    pub sha1: [u8; SHA1_BYTES],
    /// SHA1 of the raw data only (V4-5).
    pub raw_sha1: [u8; SHA1_BYTES],
    /// SHA1 of the parent (V3-5).
    pub parent_sha1: [u8; SHA1_BYTES],
    /// V1-2 disk geometry.
    pub obsolete_cylinders: u32,
    pub obsolete_sectors: u32,
    pub obsolete_heads: u32,
    /// V1-2 sectors per hunk.
    pub obsolete_hunk_size: u32,
}

impl Header {
    fn empty(version: Version, length: u32) -> Header {
        Header {
            version,
            length,
            flags: 0,
            compression: [0; 4],
            hunk_bytes: 0,
            hunk_count: 0,
            unit_bytes: 0,
            unit_count: 0,
            logical_bytes: 0,
            map_offset: length as u64,
            meta_offset: 0,
            map_entry_bytes: 0,
            md5: [0; MD5_BYTES],
            parent_md5: [0; MD5_BYTES],
            sha1: [0; SHA1_BYTES],
            raw_sha1: [0; SHA1_BYTES],
            parent_sha1: [0; SHA1_BYTES],
            obsolete_cylinders: 0,
            obsolete_sectors: 0,
            obsolete_heads: 0,
            obsolete_hunk_size: 0,
        }
    }

    /// Reads and validates the CHD header at the start of the stream.
    ///
    /// Wrong magic or a length that does not match the version is `Error::InvalidData`, an
    /// unknown version is `Error::UnsupportedVersion`, and a V1-4 header that fails validation
    /// is `Error::InvalidParameter`.
    pub fn try_read_header<F: Read + Seek>(file: &mut F) -> Result<Header> {
        let header = read_header(file)?;
        header.validate()?;
        Ok(header)
    }

    /// Checks the internal consistency of a V1-4 header. V5 headers are not validated here;
    /// decoding their map is what establishes their correctness.
    pub fn validate(&self) -> Result<()> {
        if self.length != header_size(self.version) {
            return Err(Error::InvalidParameter);
        }

        if self.version == Version::ChdV5 {
            return Ok(());
        }

        if self.flags & Flags::Undefined as u32 != 0 {
            return Err(Error::InvalidParameter);
        }

        if find_codec(self.compression[0]).is_none() {
            return Err(Error::InvalidParameter);
        }

        if self.hunk_bytes == 0 || self.hunk_bytes >= 65536 * 256 {
            return Err(Error::InvalidParameter);
        }

        if self.hunk_count == 0 {
            return Err(Error::InvalidParameter);
        }

        if self.has_parent()
            && self.parent_md5 == [0; MD5_BYTES]
            && self.parent_sha1 == [0; SHA1_BYTES]
        {
            return Err(Error::InvalidParameter);
        }

        let geometry = [
            self.obsolete_cylinders,
            self.obsolete_sectors,
            self.obsolete_heads,
            self.obsolete_hunk_size,
        ];
        let geometry_ok = if self.version >= Version::ChdV3 {
            geometry.iter().all(|&f| f == 0)
        } else {
            geometry.iter().all(|&f| f != 0)
        };
        if !geometry_ok {
            return Err(Error::InvalidParameter);
        }

        Ok(())
    }

    /// Returns whether or not this CHD file has a parent.
    pub fn has_parent(&self) -> bool {
        match self.version {
            Version::ChdV5 => self.parent_sha1 != [0; SHA1_BYTES],
            _ => self.flags & Flags::HasParent as u32 != 0,
        }
    }

    /// Returns whether or not the CHD file is marked writeable.
    pub fn is_writeable(&self) -> bool {
        self.flags & Flags::IsWritable as u32 != 0
    }

    /// Returns whether or not the hunks of this CHD file are compressed.
    pub fn is_compressed(&self) -> bool {
        self.compression[0] != CodecType::None as u32
    }

    /// Returns the offset of the CHD metadata, if there is any.
    pub fn meta_offset(&self) -> Option<u64> {
        match self.meta_offset {
            0 => None,
            off => Some(off),
        }
    }

    /// Returns the MD5 of the CHD file if the version carries one.
    pub fn md5(&self) -> Option<[u8; MD5_BYTES]> {
        (self.version <= Version::ChdV3).then_some(self.md5)
    }

    /// Returns the MD5 of the parent CHD file if the version carries one.
    pub fn parent_md5(&self) -> Option<[u8; MD5_BYTES]> {
        (self.version <= Version::ChdV3).then_some(self.parent_md5)
    }

    /// Returns the SHA1 of the CHD file if the version carries one.
    pub fn sha1(&self) -> Option<[u8; SHA1_BYTES]> {
        (self.version >= Version::ChdV3).then_some(self.sha1)
    }

    /// Returns the raw data SHA1 of the CHD file if the version carries one.
    pub fn raw_sha1(&self) -> Option<[u8; SHA1_BYTES]> {
        (self.version >= Version::ChdV4).then_some(self.raw_sha1)
    }

    /// Returns the SHA1 of the parent CHD file if the version carries one.
    pub fn parent_sha1(&self) -> Option<[u8; SHA1_BYTES]> {
        (self.version >= Version::ChdV3).then_some(self.parent_sha1)
    }

    /// Returns the declared codec types. V1-4 files declare exactly one.
    pub fn codec_types(&self) -> impl Iterator<Item = Option<CodecType>> + '_ {
        let slots = match self.version {
            Version::ChdV5 => 4,
            _ => 1,
        };
        self.compression[..slots].iter().map(|&c| CodecType::from_u32(c))
    }

    /// Returns whether the V5 hunk map is stored compressed.
    pub(crate) fn has_compressed_map(&self) -> bool {
        self.version == Version::ChdV5 && self.is_compressed()
    }
}

const fn header_size(version: Version) -> u32 {
    match version {
        Version::ChdV1 => CHD_V1_HEADER_SIZE,
        Version::ChdV2 => CHD_V2_HEADER_SIZE,
        Version::ChdV3 => CHD_V3_HEADER_SIZE,
        Version::ChdV4 => CHD_V4_HEADER_SIZE,
        Version::ChdV5 => CHD_V5_HEADER_SIZE,
    }
}

fn read_header<F: Read + Seek>(file: &mut F) -> Result<Header> {
    let mut raw_header = [0u8; CHD_MAX_HEADER_SIZE];

    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut raw_header)?;

    if &raw_header[0..8] != CHD_MAGIC {
        return Err(Error::InvalidData);
    }

    let mut reader = Cursor::new(&raw_header[..]);
    reader.seek(SeekFrom::Start(8))?;
    let length = reader.read_u32::<BigEndian>()?;
    let version = Version::from_u32(reader.read_u32::<BigEndian>()?)
        .ok_or(Error::UnsupportedVersion)?;

    if length != header_size(version) {
        return Err(Error::InvalidData);
    }

    match version {
        Version::ChdV1 | Version::ChdV2 => read_v1_header(&mut reader, version, length),
        Version::ChdV3 => read_v3_header(&mut reader, length, file),
        Version::ChdV4 => read_v4_header(&mut reader, length, file),
        Version::ChdV5 => read_v5_header(&mut reader, length),
    }
}

fn ceil_div(num: u64, den: u64) -> u64 {
    num.div_ceil(den)
}

fn read_v1_header<T: Read + Seek>(raw: &mut T, version: Version, length: u32) -> Result<Header> {
    let mut header = Header::empty(version, length);

    raw.seek(SeekFrom::Start(76))?;
    let sector_length = match version {
        Version::ChdV1 => CHD_V1_SECTOR_SIZE,
        _ => raw.read_u32::<BigEndian>()?,
    };

    raw.seek(SeekFrom::Start(16))?;
    header.flags = raw.read_u32::<BigEndian>()?;
    header.compression[0] = raw.read_u32::<BigEndian>()?;
    header.obsolete_hunk_size = raw.read_u32::<BigEndian>()?;
    header.hunk_count = raw.read_u32::<BigEndian>()?;
    header.obsolete_cylinders = raw.read_u32::<BigEndian>()?;
    header.obsolete_heads = raw.read_u32::<BigEndian>()?;
    header.obsolete_sectors = raw.read_u32::<BigEndian>()?;
    raw.read_exact(&mut header.md5)?;
    raw.read_exact(&mut header.parent_md5)?;

    header.logical_bytes = [
        header.obsolete_heads,
        header.obsolete_sectors,
        sector_length,
    ]
    .iter()
    .try_fold(header.obsolete_cylinders as u64, |acc, &n| acc.checked_mul(n as u64))
    .ok_or(Error::InvalidData)?;

    // out-of-range sizes are caught by validation as a zero hunk size
    header.hunk_bytes =
        u32::try_from(sector_length as u64 * header.obsolete_hunk_size as u64).unwrap_or(0);
    header.unit_bytes = sector_length;
    if sector_length != 0 {
        header.unit_count = ceil_div(header.logical_bytes, sector_length as u64);
    }
    header.map_entry_bytes = 8;
    Ok(header)
}

fn read_v3_header<T: Read + Seek, F: Read + Seek>(
    raw: &mut T,
    length: u32,
    file: &mut F,
) -> Result<Header> {
    let mut header = Header::empty(Version::ChdV3, length);

    raw.seek(SeekFrom::Start(16))?;
    header.flags = raw.read_u32::<BigEndian>()?;
    header.compression[0] = raw.read_u32::<BigEndian>()?;
    header.hunk_count = raw.read_u32::<BigEndian>()?;
    header.logical_bytes = raw.read_u64::<BigEndian>()?;
    header.meta_offset = raw.read_u64::<BigEndian>()?;
    raw.read_exact(&mut header.md5)?;
    raw.read_exact(&mut header.parent_md5)?;
    header.hunk_bytes = raw.read_u32::<BigEndian>()?;
    raw.read_exact(&mut header.sha1)?;
    raw.read_exact(&mut header.parent_sha1)?;

    header.map_entry_bytes = 16;
    fill_legacy_units(&mut header, file);
    Ok(header)
}

fn read_v4_header<T: Read + Seek, F: Read + Seek>(
    raw: &mut T,
    length: u32,
    file: &mut F,
) -> Result<Header> {
    let mut header = Header::empty(Version::ChdV4, length);

    raw.seek(SeekFrom::Start(16))?;
    header.flags = raw.read_u32::<BigEndian>()?;
    header.compression[0] = raw.read_u32::<BigEndian>()?;
    header.hunk_count = raw.read_u32::<BigEndian>()?;
    header.logical_bytes = raw.read_u64::<BigEndian>()?;
    header.meta_offset = raw.read_u64::<BigEndian>()?;
    header.hunk_bytes = raw.read_u32::<BigEndian>()?;
    raw.read_exact(&mut header.sha1)?;
    raw.read_exact(&mut header.parent_sha1)?;
    raw.read_exact(&mut header.raw_sha1)?;

    header.map_entry_bytes = 16;
    fill_legacy_units(&mut header, file);
    Ok(header)
}

fn read_v5_header<T: Read + Seek>(raw: &mut T, length: u32) -> Result<Header> {
    let mut header = Header::empty(Version::ChdV5, length);

    raw.seek(SeekFrom::Start(16))?;
    raw.read_u32_into::<BigEndian>(&mut header.compression)?;
    header.logical_bytes = raw.read_u64::<BigEndian>()?;
    header.map_offset = raw.read_u64::<BigEndian>()?;
    header.meta_offset = raw.read_u64::<BigEndian>()?;
    header.hunk_bytes = raw.read_u32::<BigEndian>()?;
    header.unit_bytes = raw.read_u32::<BigEndian>()?;
    raw.read_exact(&mut header.raw_sha1)?;
    raw.read_exact(&mut header.sha1)?;
    raw.read_exact(&mut header.parent_sha1)?;

    if header.hunk_bytes == 0 || header.unit_bytes == 0 {
        return Err(Error::InvalidData);
    }

    header.hunk_count = u32::try_from(ceil_div(header.logical_bytes, header.hunk_bytes as u64))
        .map_err(|_| Error::InvalidData)?;
    header.unit_count = ceil_div(header.logical_bytes, header.unit_bytes as u64);
    header.map_entry_bytes = if header.is_compressed() {
        V5_COMPRESSED_MAP_ENTRY_BYTES
    } else {
        V5_UNCOMPRESSED_MAP_ENTRY_BYTES
    };
    Ok(header)
}

/// V3 and V4 do not store a unit size, so derive it from the metadata the way chdman does.
fn fill_legacy_units<F: Read + Seek>(header: &mut Header, file: &mut F) {
    let unit_bytes = match header.meta_offset() {
        Some(off) => guess_unit_bytes(file, off),
        None => None,
    };
    header.unit_bytes = unit_bytes.unwrap_or_else(|| {
        log::warn!(
            "no unit size in metadata, falling back to hunk size {}",
            header.hunk_bytes
        );
        header.hunk_bytes
    });
    if header.unit_bytes != 0 {
        header.unit_count = ceil_div(header.logical_bytes, header.unit_bytes as u64);
    }
}

fn extract_bps_value(bps_meta: &[u8]) -> Option<u32> {
    fn extract_bps_inner(bps_meta: &[u8]) -> std::result::Result<u32, Box<text_io::Error>> {
        let cyls: u32;
        let heads: u32;
        let secs: u32;
        let bps: u32;
        try_scan!(bps_meta.iter().copied() => "CYLS:{},HEADS:{},SECS:{},BPS:{}", cyls, heads, secs, bps);
        let _ = (cyls, heads, secs);
        Ok(bps)
    }
    extract_bps_inner(bps_meta).ok().filter(|&bps| bps != 0)
}

fn guess_unit_bytes<F: Read + Seek>(file: &mut F, off: u64) -> Option<u32> {
    let metas: Vec<_> = MetadataRefs::from_stream(file, off).collect();
    if let Some(hard_disk) = metas
        .iter()
        .find(|e| e.metatag() == KnownMetadata::HardDisk as u32)
    {
        if let Ok(text) = hard_disk.read(file) {
            if let Some(bps) = extract_bps_value(&text.value) {
                return Some(bps);
            }
        }
    }

    if metas.iter().any(|e| KnownMetadata::is_cdrom(e.metatag())) {
        return Some(crate::cdrom::CD_FRAME_SIZE);
    }
    None
}
