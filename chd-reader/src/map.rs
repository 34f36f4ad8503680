//! Types and methods relating to the CHD hunk map.
//!
//! V1-4 maps are read into [`LegacyMapEntry`] values. V5 maps are kept in their normalized
//! 12 byte form (or the raw 4 byte form for uncompressed files) and viewed through
//! [`V5CompressedEntry`] and [`V5UncompressedEntry`].
use std::io::{Cursor, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::bitstream::BitStream;
use crate::block_hash::CRC16;
use crate::error::{Error, Result};
use crate::header::{
    Header, Version, V5_COMPRESSED_MAP_ENTRY_BYTES, V5_UNCOMPRESSED_MAP_ENTRY_BYTES,
};
use crate::huffman::HuffmanDecoder;

const V5_COMPRESSED_ENTRY_SIZE: usize = V5_COMPRESSED_MAP_ENTRY_BYTES as usize;
const V5_UNCOMPRESSED_ENTRY_SIZE: usize = V5_UNCOMPRESSED_MAP_ENTRY_BYTES as usize;
const V3_MAP_ENTRY_SIZE: usize = 16; // V3-V4
const V1_MAP_ENTRY_SIZE: usize = 8; // V1-V2
const MAP_ENTRY_FLAG_TYPE_MASK: u8 = 0x0f;
const MAP_ENTRY_FLAG_NO_CRC: u8 = 0x10;
const V1_OFFSET_MASK: u64 = (1 << 44) - 1;

const END_OF_LIST_COOKIE: &[u8; 16] = b"EndOfListCookie\0";
const MAP_READ_BATCH: usize = 512;

const V5_MAP_HEADER_SIZE: u64 = 16;

type MapDecoder = HuffmanDecoder<16, 8>;

/// The types of compression allowed for a CHD V5 hunk.
///
/// Only `CompressionType0` through `CompressionParent` survive map decoding; the remaining
/// values are pseudo-types of the compressed map stream.
#[repr(u8)]
#[derive(FromPrimitive, ToPrimitive, Debug, Copy, Clone, Eq, PartialEq)]
pub enum V5CompressionType {
    CompressionType0 = 0,
    CompressionType1 = 1,
    CompressionType2 = 2,
    CompressionType3 = 3,
    CompressionNone = 4,
    CompressionSelf = 5,
    CompressionParent = 6,
    CompressionRleSmall = 7,
    CompressionRleLarge = 8,
    CompressionSelf0 = 9,
    CompressionSelf1 = 10,
    CompressionParentSelf = 11,
    CompressionParent0 = 12,
    CompressionParent1 = 13,
}

/// The types of compression allowed for a CHD V1-4 hunk.
#[repr(u8)]
#[derive(FromPrimitive, ToPrimitive, Debug, Copy, Clone, Eq, PartialEq)]
pub enum LegacyEntryType {
    /// Invalid
    Invalid = 0,
    /// Compressed with the codec declared in the header
    Compressed = 1,
    /// Uncompressed
    Uncompressed = 2,
    /// Uses the offset as raw data
    Mini = 3,
    /// Identical to another hunk in the same file.
    SelfHunk = 4,
    /// Identical to another hunk in the parent file.
    ParentHunk = 5,
    /// Compressed with an external algorithm
    ExternalCompressed = 6,
}

/// A CHD V1-V4 map entry.
#[derive(Debug, Clone)]
pub struct LegacyMapEntry {
    offset: u64,
    crc: Option<u32>,
    length: u32,
    flags: u8,
}

impl LegacyMapEntry {
    /// Returns the hunk type of the entry.
    pub fn hunk_type(&self) -> Result<LegacyEntryType> {
        LegacyEntryType::from_u8(self.flags & MAP_ENTRY_FLAG_TYPE_MASK).ok_or(Error::InvalidData)
    }

    /// Returns the file offset of the hunk data, the referenced hunk number, or for a mini
    /// hunk the 8 byte fill pattern.
    pub fn block_offset(&self) -> u64 {
        self.offset
    }

    /// Returns the size of the stored data of the hunk.
    pub fn block_size(&self) -> u32 {
        self.length
    }

    /// Returns the CRC32 checksum of the hunk data once uncompressed, if the entry carries one.
    pub fn hunk_crc(&self) -> Option<u32> {
        self.crc
    }
}

/// A CHD V5 map entry for a compressed map.
#[derive(Debug, Copy, Clone)]
pub struct V5CompressedEntry<'a>(&'a [u8; V5_COMPRESSED_ENTRY_SIZE]);

impl V5CompressedEntry<'_> {
    /// Returns the hunk type of the entry.
    pub fn hunk_type(&self) -> Result<V5CompressionType> {
        V5CompressionType::from_u8(self.0[0]).ok_or(Error::InvalidData)
    }

    /// Returns the file offset of the compressed data, or the referenced hunk or unit.
    pub fn block_offset(&self) -> u64 {
        let b = self.0;
        u64::from_be_bytes([0, 0, b[4], b[5], b[6], b[7], b[8], b[9]])
    }

    /// Returns the size of the compressed hunk.
    pub fn block_size(&self) -> u32 {
        let b = self.0;
        u32::from_be_bytes([0, b[1], b[2], b[3]])
    }

    /// Returns the CRC16 checksum of the hunk data once uncompressed.
    pub fn hunk_crc(&self) -> u16 {
        u16::from_be_bytes([self.0[10], self.0[11]])
    }
}

/// A CHD V5 map entry for an uncompressed map.
#[derive(Debug, Copy, Clone)]
pub struct V5UncompressedEntry<'a>(&'a [u8; V5_UNCOMPRESSED_ENTRY_SIZE], u32);

impl V5UncompressedEntry<'_> {
    /// Returns the file offset of the hunk data. An offset of 0 means the hunk is not
    /// stored in this file.
    pub fn block_offset(&self) -> u64 {
        u32::from_be_bytes(*self.0) as u64 * self.1 as u64
    }

    /// Returns the size of the hunk data, which is always the hunk size.
    pub fn block_size(&self) -> u32 {
        self.1
    }
}

/// Normalized V5 map data with its entry layout.
pub struct V5MapData {
    raw: Vec<u8>,
    compressed: bool,
    hunk_bytes: u32,
}

/// The hunk map for a CHD file.
pub enum Map {
    V5(V5MapData),
    Legacy(Vec<LegacyMapEntry>),
}

/// A map entry for a CHD file of unspecified version.
#[derive(Debug, Copy, Clone)]
pub enum MapEntry<'a> {
    V5Compressed(V5CompressedEntry<'a>),
    V5Uncompressed(V5UncompressedEntry<'a>),
    LegacyEntry(&'a LegacyMapEntry),
}

/// Iterator over the entries of a [`Map`].
pub struct MapEntries<'a> {
    map: &'a Map,
    curr: usize,
}

impl<'a> Iterator for MapEntries<'a> {
    type Item = MapEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.map.get_entry(self.curr)?;
        self.curr += 1;
        Some(entry)
    }
}

impl Map {
    /// Gets the number of entries in the map.
    pub fn len(&self) -> usize {
        match self {
            Map::V5(m) => {
                let entry_size = if m.compressed {
                    V5_COMPRESSED_ENTRY_SIZE
                } else {
                    V5_UNCOMPRESSED_ENTRY_SIZE
                };
                m.raw.len() / entry_size
            }
            Map::Legacy(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gets the entry for the specified hunk number if it exists.
    pub fn get_entry(&self, hunk_num: usize) -> Option<MapEntry<'_>> {
        match self {
            Map::V5(m) if m.compressed => m
                .raw
                .get(hunk_num * V5_COMPRESSED_ENTRY_SIZE..)
                .and_then(|s| s.first_chunk::<V5_COMPRESSED_ENTRY_SIZE>())
                .map(|e| MapEntry::V5Compressed(V5CompressedEntry(e))),
            Map::V5(m) => m
                .raw
                .get(hunk_num * V5_UNCOMPRESSED_ENTRY_SIZE..)
                .and_then(|s| s.first_chunk::<V5_UNCOMPRESSED_ENTRY_SIZE>())
                .map(|e| MapEntry::V5Uncompressed(V5UncompressedEntry(e, m.hunk_bytes))),
            Map::Legacy(m) => m.get(hunk_num).map(MapEntry::LegacyEntry),
        }
    }

    /// Gets an iterator over the entries of this hunk map.
    pub fn iter(&self) -> MapEntries<'_> {
        MapEntries { map: self, curr: 0 }
    }

    /// Reads the hunk map from the provided stream given the parameters in the header,
    /// which must have the same stream provenance as the input header.
    pub fn try_read_map<F: Read + Seek>(header: &Header, file: &mut F) -> Result<Map> {
        let map = match header.version {
            Version::ChdV5 if header.has_compressed_map() => {
                Map::V5(read_map_v5(header, file)?)
            }
            Version::ChdV5 => Map::V5(read_map_v5_uncompressed(header, file)?),
            Version::ChdV3 | Version::ChdV4 => {
                Map::Legacy(read_map_legacy(header, file, V3_MAP_ENTRY_SIZE)?)
            }
            Version::ChdV1 | Version::ChdV2 => {
                Map::Legacy(read_map_legacy(header, file, V1_MAP_ENTRY_SIZE)?)
            }
        };
        log::debug!("loaded {} map entries", map.len());
        Ok(map)
    }
}

fn read_map_legacy<F: Read + Seek>(
    header: &Header,
    file: &mut F,
    entry_size: usize,
) -> Result<Vec<LegacyMapEntry>> {
    let hunk_count = header.hunk_count as usize;
    let mut map = Vec::with_capacity(hunk_count);
    let mut max_off = 0;

    file.seek(SeekFrom::Start(header.length as u64))?;

    let mut batch = vec![0u8; MAP_READ_BATCH * entry_size];
    while map.len() < hunk_count {
        let entries = (hunk_count - map.len()).min(MAP_READ_BATCH);
        let raw = &mut batch[..entries * entry_size];
        file.read_exact(raw)?;

        for raw_entry in raw.chunks_exact(entry_size) {
            let entry = match entry_size {
                V3_MAP_ENTRY_SIZE => read_map_entry_v3(raw_entry)?,
                _ => read_map_entry_v1(
                    Cursor::new(raw_entry).read_u64::<BigEndian>()?,
                    header.hunk_bytes,
                ),
            };

            if let Ok(LegacyEntryType::Compressed | LegacyEntryType::Uncompressed) =
                entry.hunk_type()
            {
                max_off = max_off.max(entry.offset + entry.length as u64);
            }
            map.push(entry);
        }
    }

    let mut cookie = [0u8; V3_MAP_ENTRY_SIZE];
    file.read_exact(&mut cookie[..entry_size])?;
    if cookie[..entry_size] != END_OF_LIST_COOKIE[..entry_size] {
        return Err(Error::InvalidFile);
    }

    if max_off > file.seek(SeekFrom::End(0))? {
        return Err(Error::InvalidFile);
    }

    Ok(map)
}

fn read_map_entry_v1(val: u64, hunk_bytes: u32) -> LegacyMapEntry {
    let length = (val >> 44) as u32;
    let flags = MAP_ENTRY_FLAG_NO_CRC
        | if length == hunk_bytes {
            LegacyEntryType::Uncompressed as u8
        } else {
            LegacyEntryType::Compressed as u8
        };
    LegacyMapEntry {
        offset: val & V1_OFFSET_MASK,
        crc: None,
        length,
        flags,
    }
}

fn read_map_entry_v3(buf: &[u8]) -> Result<LegacyMapEntry> {
    let mut read = Cursor::new(buf);
    let offset = read.read_u64::<BigEndian>()?;
    let crc = read.read_u32::<BigEndian>()?;
    let length_lo = read.read_u16::<BigEndian>()? as u32;
    let length_hi = read.read_u8()? as u32;
    let flags = read.read_u8()?;
    Ok(LegacyMapEntry {
        offset,
        crc: (flags & MAP_ENTRY_FLAG_NO_CRC == 0).then_some(crc),
        length: length_lo | (length_hi << 16),
        flags,
    })
}

fn read_map_v5_uncompressed<F: Read + Seek>(header: &Header, file: &mut F) -> Result<V5MapData> {
    let mut raw = vec![0u8; header.hunk_count as usize * V5_UNCOMPRESSED_ENTRY_SIZE];
    file.seek(SeekFrom::Start(header.map_offset))?;
    file.read_exact(&mut raw)?;
    Ok(V5MapData {
        raw,
        compressed: false,
        hunk_bytes: header.hunk_bytes,
    })
}

fn read_map_v5<F: Read + Seek>(header: &Header, file: &mut F) -> Result<V5MapData> {
    if header.map_offset == 0 {
        return Err(Error::ReadError);
    }

    file.seek(SeekFrom::Start(header.map_offset))?;
    let map_bytes = file.read_u32::<BigEndian>()?;
    let first_offs = file.read_u48::<BigEndian>()?;
    let map_crc = file.read_u16::<BigEndian>()?;
    let length_bits = file.read_u8()?;
    let self_bits = file.read_u8()?;
    let parent_bits = file.read_u8()?;

    if length_bits > 32 || self_bits > 32 || parent_bits > 32 {
        return Err(Error::DecompressionError);
    }
    log::debug!(
        "v5 map: {map_bytes} bytes, length/self/parent bits {length_bits}/{self_bits}/{parent_bits}"
    );

    let mut compressed = vec![0u8; map_bytes as usize];
    file.seek(SeekFrom::Start(header.map_offset + V5_MAP_HEADER_SIZE))?;
    file.read_exact(&mut compressed)?;

    let mut bits = BitStream::new(&compressed);
    let decoder = MapDecoder::from_tree_rle(&mut bits)?;

    let hunk_count = header.hunk_count as usize;
    let mut raw_map = vec![0u8; hunk_count * V5_COMPRESSED_ENTRY_SIZE];

    // pass one: entry types, with runs expanded
    let mut rep_count = 0;
    let mut last_cmp = 0u8;
    for entry in raw_map.chunks_exact_mut(V5_COMPRESSED_ENTRY_SIZE) {
        if rep_count > 0 {
            entry[0] = last_cmp;
            rep_count -= 1;
            continue;
        }

        let val = decoder.decode_one(&mut bits)? as u8;
        match V5CompressionType::from_u8(val) {
            Some(V5CompressionType::CompressionRleSmall) => {
                entry[0] = last_cmp;
                rep_count = 2 + decoder.decode_one(&mut bits)?;
            }
            Some(V5CompressionType::CompressionRleLarge) => {
                entry[0] = last_cmp;
                rep_count = 2 + 16 + (decoder.decode_one(&mut bits)? << 4);
                rep_count += decoder.decode_one(&mut bits)?;
            }
            _ => {
                entry[0] = val;
                last_cmp = val;
            }
        }
    }
    if rep_count > 0 {
        return Err(Error::DecompressionError);
    }

    // pass two: lengths, offsets and checksums, with pseudo-types made concrete
    let hunk_units = (header.hunk_bytes / header.unit_bytes) as u64;
    let mut curr_off = first_offs;
    let mut last_self = 0u64;
    let mut last_parent = 0u64;

    for (hunk_num, entry) in raw_map
        .chunks_exact_mut(V5_COMPRESSED_ENTRY_SIZE)
        .enumerate()
    {
        let mut off = curr_off;
        let mut len = 0u32;
        let mut crc = 0u16;

        let hunk_type =
            V5CompressionType::from_u8(entry[0]).ok_or(Error::DecompressionError)?;
        match hunk_type {
            V5CompressionType::CompressionType0
            | V5CompressionType::CompressionType1
            | V5CompressionType::CompressionType2
            | V5CompressionType::CompressionType3 => {
                len = bits.read(length_bits)?;
                curr_off += len as u64;
                crc = bits.read(16)? as u16;
            }
            V5CompressionType::CompressionNone => {
                len = header.hunk_bytes;
                curr_off += len as u64;
                crc = bits.read(16)? as u16;
            }
            V5CompressionType::CompressionSelf => {
                off = bits.read(self_bits)? as u64;
                last_self = off;
            }
            V5CompressionType::CompressionParent => {
                off = bits.read(parent_bits)? as u64;
                last_parent = off;
            }
            V5CompressionType::CompressionSelf0 | V5CompressionType::CompressionSelf1 => {
                if hunk_type == V5CompressionType::CompressionSelf1 {
                    last_self += 1;
                }
                entry[0] = V5CompressionType::CompressionSelf as u8;
                off = last_self;
            }
            V5CompressionType::CompressionParentSelf => {
                entry[0] = V5CompressionType::CompressionParent as u8;
                off = (hunk_num as u64 * header.hunk_bytes as u64) / header.unit_bytes as u64;
                last_parent = off;
            }
            V5CompressionType::CompressionParent0 | V5CompressionType::CompressionParent1 => {
                if hunk_type == V5CompressionType::CompressionParent1 {
                    last_parent += hunk_units;
                }
                entry[0] = V5CompressionType::CompressionParent as u8;
                off = last_parent;
            }
            V5CompressionType::CompressionRleSmall | V5CompressionType::CompressionRleLarge => {
                return Err(Error::DecompressionError)
            }
        }

        let mut cursor = Cursor::new(&mut entry[1..]);
        cursor.write_u24::<BigEndian>(len)?;
        cursor.write_u48::<BigEndian>(off)?;
        cursor.write_u16::<BigEndian>(crc)?;
    }

    if bits.overflowed() {
        log::debug!("v5 map bitstream ran past its {} bytes", compressed.len());
    }
    if CRC16.checksum(&raw_map) != map_crc {
        log::debug!("v5 map crc mismatch, expected {map_crc:04x}");
        return Err(Error::DecompressionError);
    }

    Ok(V5MapData {
        raw: raw_map,
        compressed: true,
        hunk_bytes: header.hunk_bytes,
    })
}
