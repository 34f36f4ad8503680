//! Builders for small synthetic CHD images.
#![allow(dead_code)]

use byteorder::{BigEndian, WriteBytesExt};
use chd_reader::make_tag;
use crc::{Crc, CRC_16_IBM_3740, CRC_32_ISO_HDLC};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::best());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// A metadata entry: tag, flags, payload.
pub type Meta<'a> = (&'a [u8; 4], u8, &'a str);

/// Appends a linked metadata list to `out`, returning the offset of the first entry.
pub fn append_metadata(out: &mut Vec<u8>, entries: &[Meta]) -> u64 {
    if entries.is_empty() {
        return 0;
    }
    let first = out.len() as u64;
    for (i, (tag, flags, data)) in entries.iter().enumerate() {
        let start = out.len() as u64;
        let next = if i + 1 == entries.len() {
            0
        } else {
            start + 16 + data.len() as u64
        };
        out.write_u32::<BigEndian>(make_tag(tag)).unwrap();
        out.write_u32::<BigEndian>(((*flags as u32) << 24) | data.len() as u32)
            .unwrap();
        out.write_u64::<BigEndian>(next).unwrap();
        out.extend_from_slice(data.as_bytes());
    }
    first
}

/// How a hunk of a V1-V4 image is stored.
pub enum LegacyHunk {
    Compressed(Vec<u8>),
    Uncompressed(Vec<u8>),
    Mini(u64),
    SelfRef(u64),
    Parent(u64),
    External,
}

pub struct LegacyImage<'a> {
    pub hunk_bytes: u32,
    pub hunks: Vec<LegacyHunk>,
    pub md5: [u8; 16],
    pub parent_md5: [u8; 16],
    pub metadata: Vec<Meta<'a>>,
}

impl<'a> LegacyImage<'a> {
    pub fn new(hunk_bytes: u32, hunks: Vec<LegacyHunk>) -> Self {
        LegacyImage {
            hunk_bytes,
            hunks,
            md5: [0; 16],
            parent_md5: [0; 16],
            metadata: Vec::new(),
        }
    }

    fn has_parent(&self) -> bool {
        self.hunks.iter().any(|h| matches!(h, LegacyHunk::Parent(_)))
    }

    /// Lays out hunk data starting at `data_start`, returning map entries as
    /// (offset, length, crc, flags) and the data itself.
    fn layout(&self, data_start: u64) -> (Vec<(u64, u32, u32, u8)>, Vec<u8>) {
        let mut entries = Vec::new();
        let mut data = Vec::new();
        for hunk in &self.hunks {
            let offset = data_start + data.len() as u64;
            let entry = match hunk {
                LegacyHunk::Compressed(plain) => {
                    let packed = deflate(plain);
                    data.extend_from_slice(&packed);
                    (offset, packed.len() as u32, CRC32.checksum(plain), 1)
                }
                LegacyHunk::Uncompressed(plain) => {
                    data.extend_from_slice(plain);
                    (offset, plain.len() as u32, CRC32.checksum(plain), 2)
                }
                LegacyHunk::Mini(value) => {
                    let plain: Vec<u8> = value
                        .to_be_bytes()
                        .iter()
                        .copied()
                        .cycle()
                        .take(self.hunk_bytes as usize)
                        .collect();
                    (*value, 0, CRC32.checksum(&plain), 3)
                }
                LegacyHunk::SelfRef(target) => (*target, 0, 0, 4 | 0x10),
                LegacyHunk::Parent(target) => (*target, 0, 0, 5 | 0x10),
                LegacyHunk::External => (0, 0, 0, 6 | 0x10),
            };
            entries.push(entry);
        }
        (entries, data)
    }

    /// Builds a V3 image with the zlib codec.
    pub fn build_v3(&self) -> Vec<u8> {
        let hunk_count = self.hunks.len() as u32;
        let map_end = 120 + 16 * (hunk_count as u64 + 1);
        let (entries, data) = self.layout(map_end);

        let mut out = Vec::new();
        out.extend_from_slice(b"MComprHD");
        out.write_u32::<BigEndian>(120).unwrap();
        out.write_u32::<BigEndian>(3).unwrap();
        out.write_u32::<BigEndian>(if self.has_parent() { 1 } else { 0 })
            .unwrap();
        out.write_u32::<BigEndian>(1).unwrap();
        out.write_u32::<BigEndian>(hunk_count).unwrap();
        out.write_u64::<BigEndian>(hunk_count as u64 * self.hunk_bytes as u64)
            .unwrap();
        let meta_offset_pos = out.len();
        out.write_u64::<BigEndian>(0).unwrap();
        out.extend_from_slice(&self.md5);
        out.extend_from_slice(&self.parent_md5);
        out.write_u32::<BigEndian>(self.hunk_bytes).unwrap();
        out.extend_from_slice(&[0; 20]);
        out.extend_from_slice(&[0; 20]);
        assert_eq!(out.len(), 120);

        for (offset, length, crc, flags) in entries {
            out.write_u64::<BigEndian>(offset).unwrap();
            out.write_u32::<BigEndian>(crc).unwrap();
            out.write_u16::<BigEndian>(length as u16).unwrap();
            out.write_u8((length >> 16) as u8).unwrap();
            out.write_u8(flags).unwrap();
        }
        out.extend_from_slice(b"EndOfListCookie\0");
        out.extend_from_slice(&data);

        let meta_offset = append_metadata(&mut out, &self.metadata);
        out[meta_offset_pos..meta_offset_pos + 8].copy_from_slice(&meta_offset.to_be_bytes());
        out
    }

    /// Builds a V1 image of 512 byte sectors with the zlib codec. Only compressed and
    /// uncompressed hunks can be expressed.
    pub fn build_v1(&self, cylinders: u32, heads: u32, sectors: u32) -> Vec<u8> {
        let hunk_count = self.hunks.len() as u32;
        let map_end = 76 + 8 * (hunk_count as u64 + 1);
        let (entries, data) = self.layout(map_end);

        let mut out = Vec::new();
        out.extend_from_slice(b"MComprHD");
        out.write_u32::<BigEndian>(76).unwrap();
        out.write_u32::<BigEndian>(1).unwrap();
        out.write_u32::<BigEndian>(0).unwrap();
        out.write_u32::<BigEndian>(1).unwrap();
        out.write_u32::<BigEndian>(self.hunk_bytes / 512).unwrap();
        out.write_u32::<BigEndian>(hunk_count).unwrap();
        out.write_u32::<BigEndian>(cylinders).unwrap();
        out.write_u32::<BigEndian>(heads).unwrap();
        out.write_u32::<BigEndian>(sectors).unwrap();
        out.extend_from_slice(&self.md5);
        out.extend_from_slice(&self.parent_md5);
        assert_eq!(out.len(), 76);

        for (offset, length, _, _) in entries {
            out.write_u64::<BigEndian>(((length as u64) << 44) | offset)
                .unwrap();
        }
        out.extend_from_slice(b"EndOfLis");
        out.extend_from_slice(&data);
        out
    }
}

/// MSB-first bit packer.
#[derive(Default)]
pub struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    used: u32,
}

impl BitWriter {
    pub fn put(&mut self, value: u64, width: u8) {
        for bit in (0..width).rev() {
            self.acc = (self.acc << 1) | ((value >> bit) & 1);
            self.used += 1;
            if self.used == 8 {
                self.out.push(self.acc as u8);
                self.acc = 0;
                self.used = 0;
            }
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        if self.used > 0 {
            self.out.push((self.acc << (8 - self.used)) as u8);
        }
        self.out
    }
}

/// How a hunk of a V5 image is stored.
pub enum V5Hunk {
    /// Stored bytes for codec slot `slot`, and the data they decompress to.
    Compressed {
        slot: u8,
        stored: Vec<u8>,
        plain: Vec<u8>,
    },
    Uncompressed(Vec<u8>),
    SelfRef(u64),
    /// Unit number in the parent.
    Parent(u64),
    /// Same hunk as the previous self reference.
    SelfSame,
    /// The hunk after the previous self reference.
    SelfNext,
    /// The parent units at this hunk's own position.
    ParentAligned,
    /// Same units as the previous parent reference.
    ParentSame,
    /// The hunk's worth of units after the previous parent reference.
    ParentNext,
}

impl V5Hunk {
    pub fn zlib(plain: Vec<u8>) -> Self {
        V5Hunk::Compressed {
            slot: 0,
            stored: deflate(&plain),
            plain,
        }
    }

    fn map_code(&self) -> u8 {
        match self {
            V5Hunk::Compressed { slot, .. } => *slot,
            V5Hunk::Uncompressed(_) => 4,
            V5Hunk::SelfRef(_) => 5,
            V5Hunk::Parent(_) => 6,
            V5Hunk::SelfSame => 9,
            V5Hunk::SelfNext => 10,
            V5Hunk::ParentAligned => 11,
            V5Hunk::ParentSame => 12,
            V5Hunk::ParentNext => 13,
        }
    }
}

const RLE_SMALL: u8 = 7;
const RLE_LARGE: u8 = 8;

/// Code lengths of the Huffman tree the map is written with.
#[derive(Clone, Copy)]
pub enum MapTree {
    /// Every symbol gets a 4 bit code equal to its value.
    Flat,
    /// Lengths from 2 to 8 bits.
    Skewed,
}

impl MapTree {
    fn lengths(self) -> [u8; 16] {
        match self {
            MapTree::Flat => [4; 16],
            MapTree::Skewed => [2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 8, 8],
        }
    }

    fn write_tree(self, bits: &mut BitWriter) {
        match self {
            // one literal 4, then a run of fifteen more
            MapTree::Flat => {
                for (value, width) in [(4, 4), (1, 4), (4, 4), (12, 4)] {
                    bits.put(value, width);
                }
            }
            MapTree::Skewed => {
                for len in self.lengths() {
                    // a 1 is escaped by doubling it
                    if len == 1 {
                        bits.put(1, 4);
                    }
                    bits.put(len as u64, 4);
                }
            }
        }
    }

    /// Canonical codes, longest codes taking the lowest values.
    fn codes(self) -> [(u64, u8); 16] {
        let lengths = self.lengths();
        let mut start = [0u64; 33];
        for &len in &lengths {
            start[len as usize] += 1;
        }
        let mut curr = 0u64;
        for len in (1..=32).rev() {
            let next = (curr + start[len]) >> 1;
            start[len] = curr;
            curr = next;
        }
        let mut codes = [(0u64, 0u8); 16];
        for (symbol, &len) in lengths.iter().enumerate() {
            if len > 0 {
                codes[symbol] = (start[len as usize], len);
                start[len as usize] += 1;
            }
        }
        codes
    }
}

/// Collapses repeated map codes into RLE codes, leaving the first of each run as is.
fn run_length_encode(types: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < types.len() {
        let code = types[i];
        let run = types[i..].iter().take_while(|&&t| t == code).count();
        out.push(code);
        let mut left = run - 1;
        while left > 0 {
            if left >= 19 {
                let take = left.min(19 + 255);
                let extra = (take - 19) as u8;
                out.extend_from_slice(&[RLE_LARGE, extra >> 4, extra & 15]);
                left -= take;
            } else if left >= 3 {
                out.extend_from_slice(&[RLE_SMALL, (left - 3) as u8]);
                left = 0;
            } else {
                out.push(code);
                left -= 1;
            }
        }
        i += run;
    }
    out
}

pub struct V5Image {
    pub hunk_bytes: u32,
    pub unit_bytes: u32,
    pub compressors: [u32; 4],
    pub hunks: Vec<V5Hunk>,
    pub sha1: [u8; 20],
    pub parent_sha1: [u8; 20],
    pub tree: MapTree,
    /// Write repeated map codes as RLE codes.
    pub rle: bool,
}

const LENGTH_BITS: u8 = 20;
const SELF_BITS: u8 = 16;
const PARENT_BITS: u8 = 16;

impl V5Image {
    pub fn new(hunk_bytes: u32, hunks: Vec<V5Hunk>) -> Self {
        V5Image {
            hunk_bytes,
            unit_bytes: hunk_bytes,
            compressors: [make_tag(b"zlib"), 0, 0, 0],
            hunks,
            sha1: [0; 20],
            parent_sha1: [0; 20],
            tree: MapTree::Flat,
            rle: false,
        }
    }

    /// Returns the concrete (type, length, offset, crc) entry every hunk decodes to.
    pub fn normalized_entries(&self, first_offs: u64) -> Vec<(u8, u32, u64, u16)> {
        let hunk_units = (self.hunk_bytes / self.unit_bytes) as u64;
        let mut offset = first_offs;
        let mut last_self = 0u64;
        let mut last_parent = 0u64;
        let mut entries = Vec::new();
        for (hunk_num, hunk) in self.hunks.iter().enumerate() {
            let entry = match hunk {
                V5Hunk::Compressed {
                    slot,
                    stored,
                    plain,
                } => {
                    let entry = (*slot, stored.len() as u32, offset, CRC16.checksum(plain));
                    offset += stored.len() as u64;
                    entry
                }
                V5Hunk::Uncompressed(plain) => {
                    let entry = (4, self.hunk_bytes, offset, CRC16.checksum(plain));
                    offset += self.hunk_bytes as u64;
                    entry
                }
                V5Hunk::SelfRef(target) => {
                    last_self = *target;
                    (5, 0, last_self, 0)
                }
                V5Hunk::SelfSame => (5, 0, last_self, 0),
                V5Hunk::SelfNext => {
                    last_self += 1;
                    (5, 0, last_self, 0)
                }
                V5Hunk::Parent(unit) => {
                    last_parent = *unit;
                    (6, 0, last_parent, 0)
                }
                V5Hunk::ParentAligned => {
                    last_parent = hunk_num as u64 * hunk_units;
                    (6, 0, last_parent, 0)
                }
                V5Hunk::ParentSame => (6, 0, last_parent, 0),
                V5Hunk::ParentNext => {
                    last_parent += hunk_units;
                    (6, 0, last_parent, 0)
                }
            };
            entries.push(entry);
        }
        entries
    }

    fn encode_map(&self, first_offs: u64) -> (Vec<u8>, u16) {
        let mut bits = BitWriter::default();
        self.tree.write_tree(&mut bits);
        let codes = self.tree.codes();

        let types: Vec<u8> = self.hunks.iter().map(V5Hunk::map_code).collect();
        let stream = if self.rle {
            run_length_encode(&types)
        } else {
            types
        };
        let mut symbols = stream.into_iter();
        while let Some(symbol) = symbols.next() {
            let (code, len) = codes[symbol as usize];
            bits.put(code, len);
            // RLE counts are sent as nibbles through the same tree
            let counts = match symbol {
                RLE_SMALL => 1,
                RLE_LARGE => 2,
                _ => 0,
            };
            for nibble in symbols.by_ref().take(counts) {
                let (code, len) = codes[nibble as usize];
                bits.put(code, len);
            }
        }

        for hunk in &self.hunks {
            match hunk {
                V5Hunk::Compressed { stored, plain, .. } => {
                    bits.put(stored.len() as u64, LENGTH_BITS);
                    bits.put(CRC16.checksum(plain) as u64, 16);
                }
                V5Hunk::Uncompressed(plain) => bits.put(CRC16.checksum(plain) as u64, 16),
                V5Hunk::SelfRef(target) => bits.put(*target, SELF_BITS),
                V5Hunk::Parent(unit) => bits.put(*unit, PARENT_BITS),
                _ => {}
            }
        }

        let mut normalized = Vec::new();
        for (hunk_type, length, off, crc) in self.normalized_entries(first_offs) {
            normalized.push(hunk_type);
            normalized.extend_from_slice(&length.to_be_bytes()[1..]);
            normalized.extend_from_slice(&off.to_be_bytes()[2..]);
            normalized.extend_from_slice(&crc.to_be_bytes());
        }
        (bits.finish(), CRC16.checksum(&normalized))
    }

    /// Offset of the first hunk's data in the image `build` produces.
    pub fn first_offset(&self) -> u64 {
        124 + 16 + self.encode_map(0).0.len() as u64
    }

    /// Returns the image and the offset of its map header.
    pub fn build(&self) -> (Vec<u8>, u64) {
        let map_offset = 124u64;
        // the compressed map size does not depend on the data offset
        let first_offs = self.first_offset();
        let (map, map_crc) = self.encode_map(first_offs);

        let mut out = Vec::new();
        out.extend_from_slice(b"MComprHD");
        out.write_u32::<BigEndian>(124).unwrap();
        out.write_u32::<BigEndian>(5).unwrap();
        for c in self.compressors {
            out.write_u32::<BigEndian>(c).unwrap();
        }
        out.write_u64::<BigEndian>(self.hunks.len() as u64 * self.hunk_bytes as u64)
            .unwrap();
        out.write_u64::<BigEndian>(map_offset).unwrap();
        out.write_u64::<BigEndian>(0).unwrap();
        out.write_u32::<BigEndian>(self.hunk_bytes).unwrap();
        out.write_u32::<BigEndian>(self.unit_bytes).unwrap();
        out.extend_from_slice(&[0; 20]);
        out.extend_from_slice(&self.sha1);
        out.extend_from_slice(&self.parent_sha1);
        assert_eq!(out.len() as u64, map_offset);

        out.write_u32::<BigEndian>(map.len() as u32).unwrap();
        out.write_u48::<BigEndian>(first_offs).unwrap();
        out.write_u16::<BigEndian>(map_crc).unwrap();
        out.write_u8(LENGTH_BITS).unwrap();
        out.write_u8(SELF_BITS).unwrap();
        out.write_u8(PARENT_BITS).unwrap();
        out.write_u8(0).unwrap();
        out.extend_from_slice(&map);

        for hunk in &self.hunks {
            match hunk {
                V5Hunk::Compressed { stored, .. } => out.extend_from_slice(stored),
                V5Hunk::Uncompressed(plain) => out.extend_from_slice(plain),
                _ => {}
            }
        }
        (out, map_offset)
    }
}
