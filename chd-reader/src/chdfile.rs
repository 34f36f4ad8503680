use crate::block_hash::BlockChecksum;
use crate::compression::{find_codec, CompressionCodec};
use crate::error::{Error, Result};
use crate::header::{CodecType, Header, Version};
use crate::map::{LegacyEntryType, Map, MapEntry, V5CompressionType};
use crate::metadata::{find_metadata, KnownMetadata, Metadata, MetadataInfo, MetadataRefs};
use arrayvec::ArrayVec;
use crc::Crc;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::mem;
use std::path::Path;

/// The access mode requested when opening a CHD file.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OpenMode {
    Read,
    /// Checked against the header, then refused: writing is not implemented.
    ReadWrite,
}

type Codecs = ArrayVec<Option<Box<dyn CompressionCodec>>, 4>;

/// Where the data for a hunk comes from, resolved from its map entry.
#[derive(Debug, Copy, Clone)]
enum HunkSource {
    Codec {
        slot: usize,
        offset: u64,
        length: u32,
        crc: BlockCrc,
    },
    Stored {
        offset: u64,
        crc: BlockCrc,
    },
    Mini {
        pattern: u64,
        crc: BlockCrc,
    },
    SelfHunk(u64),
    ParentHunk(u64),
    ParentUnit(u64),
    Zero,
}

#[derive(Debug, Copy, Clone)]
enum BlockCrc {
    None,
    Crc16(u16),
    Crc32(Option<u32>),
}

impl BlockCrc {
    fn verify(self, buf: &[u8]) -> Result<()> {
        match self {
            BlockCrc::None => Ok(()),
            BlockCrc::Crc16(crc) => Crc::<u16>::verify_block(Some(crc), buf, ()),
            BlockCrc::Crc32(crc) => Crc::<u32>::verify_block(crc, buf, ()),
        }
    }
}

/// A CHD (MAME Compressed Hunks of Data) file.
///
/// Dropping the handle closes it. The parent handle, if any, is owned by the child and
/// dropped with it.
pub struct Chd<F: Read + Seek> {
    file: F,
    header: Header,
    parent: Option<Box<Chd<F>>>,
    map: Map,
    codecs: Codecs,
    cmp_buf: Vec<u8>,
}

impl Chd<BufReader<File>> {
    /// Opens the CHD file at `path` for reading.
    pub fn open_path<P: AsRef<Path>>(
        path: P,
        parent: Option<Box<Chd<BufReader<File>>>>,
    ) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Chd::open(BufReader::new(file), parent)
    }
}

impl<F: Read + Seek> Chd<F> {
    /// Open a CHD file from a `Read + Seek` stream. Optionally provide a parent of the same
    /// stream type.
    ///
    /// The header and hunk map are read and validated immediately, and one codec instance is
    /// created for every codec the header declares.
    ///
    /// If the CHD file requires a parent and none is provided, returns
    /// [`Error::RequiresParent`]. If a parent is provided whose MD5 or SHA1 does not match
    /// the one recorded in this file, returns [`Error::InvalidParent`]. Providing a parent
    /// to a file that does not need one returns [`Error::InvalidParameter`].
    pub fn open(file: F, parent: Option<Box<Chd<F>>>) -> Result<Chd<F>> {
        Chd::open_with_mode(file, OpenMode::Read, parent)
    }

    /// Open a CHD file with an explicit access mode.
    ///
    /// Only [`OpenMode::Read`] can succeed.
    pub fn open_with_mode(
        mut file: F,
        mode: OpenMode,
        parent: Option<Box<Chd<F>>>,
    ) -> Result<Chd<F>> {
        let header = Header::try_read_header(&mut file)?;
        log::debug!(
            "opened {:?} header: {} hunks of {} bytes, {} logical bytes",
            header.version,
            header.hunk_count,
            header.hunk_bytes,
            header.logical_bytes
        );

        if mode == OpenMode::ReadWrite {
            if !header.is_writeable() {
                return Err(Error::FileNotWriteable);
            }
            if header.version < Version::ChdV5 {
                return Err(Error::UnsupportedVersion);
            }
            return Err(Error::NotSupported);
        }

        match parent.as_deref() {
            Some(_) if !header.has_parent() => return Err(Error::InvalidParameter),
            Some(p) => check_parent(&header, &p.header)?,
            None if header.has_parent() => return Err(Error::RequiresParent),
            None => {}
        }

        let map = Map::try_read_map(&header, &mut file)?;
        let codecs = init_codecs(&header)?;

        Ok(Chd {
            file,
            header,
            parent,
            map,
            codecs,
            cmp_buf: Vec::new(),
        })
    }

    /// Returns a reference to the CHD header for this CHD file.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns a reference to the hunk map of this CHD file.
    pub fn map(&self) -> &Map {
        &self.map
    }

    /// Returns the parent of this CHD file, if one was provided.
    pub fn parent(&self) -> Option<&Chd<F>> {
        self.parent.as_deref()
    }

    /// Returns a mutable reference to the inner stream.
    pub fn inner(&mut self) -> &mut F {
        &mut self.file
    }

    /// Consumes the handle and returns the inner stream and the parent, if one was given.
    pub fn into_inner(self) -> (F, Option<Box<Chd<F>>>) {
        (self.file, self.parent)
    }

    /// Allocates a buffer with the same length as the hunk size of this CHD file.
    pub fn get_hunksized_buffer(&self) -> Vec<u8> {
        vec![0u8; self.header.hunk_bytes as usize]
    }

    /// Reads and decompresses hunk `hunk_num` into `dest`, which must be exactly the hunk
    /// size long.
    pub fn read_hunk(&mut self, hunk_num: u32, dest: &mut [u8]) -> Result<()> {
        if hunk_num >= self.header.hunk_count {
            return Err(Error::HunkOutOfRange);
        }
        if dest.len() != self.header.hunk_bytes as usize {
            return Err(Error::InvalidParameter);
        }

        let mut cmp_buf = mem::take(&mut self.cmp_buf);
        let result = self.resolve_hunk(hunk_num, dest, &mut cmp_buf);
        self.cmp_buf = cmp_buf;
        result
    }

    /// Reads `buf.len()` bytes of uncompressed data starting at byte `offset`, spanning as
    /// many hunks as needed.
    pub fn read_bytes(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let hunk_bytes = self.header.hunk_bytes as u64;
        let mut scratch = Vec::new();
        let mut offset = offset;
        let mut done = 0;

        while done < buf.len() {
            let hunk_num = u32::try_from(offset / hunk_bytes).map_err(|_| Error::HunkOutOfRange)?;
            let start = (offset % hunk_bytes) as usize;
            let count = (hunk_bytes as usize - start).min(buf.len() - done);
            let out = &mut buf[done..done + count];

            if count == hunk_bytes as usize {
                self.read_hunk(hunk_num, out)?;
            } else {
                if scratch.is_empty() {
                    scratch = self.get_hunksized_buffer();
                }
                self.read_hunk(hunk_num, &mut scratch)?;
                out.copy_from_slice(&scratch[start..start + count]);
            }

            offset += count as u64;
            done += count;
        }
        Ok(())
    }

    /// Reads the stored bytes of a hunk without decompressing them, replacing the contents
    /// of `buf`. Returns the number of bytes read.
    ///
    /// Hunks that have no stored data of their own return [`Error::InvalidParameter`].
    pub fn read_hunk_raw(&mut self, hunk_num: u32, buf: &mut Vec<u8>) -> Result<usize> {
        let (offset, length) = match self.hunk_source(hunk_num)? {
            HunkSource::Codec { offset, length, .. } => (offset, length as usize),
            HunkSource::Stored { offset, .. } => (offset, self.header.hunk_bytes as usize),
            _ => return Err(Error::InvalidParameter),
        };
        buf.resize(length, 0);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf)?;
        Ok(length)
    }

    /// Returns an iterator over references to the metadata entries of this CHD file.
    ///
    /// The references can be read with [`MetadataRef::read`](crate::metadata::MetadataRef::read)
    /// using [`Chd::inner`].
    pub fn metadata_refs(&mut self) -> MetadataRefs<'_, F> {
        MetadataRefs::from_stream(&mut self.file, self.header.meta_offset)
    }

    /// Reads the `index`th metadata entry tagged `search_tag`.
    ///
    /// [`KnownMetadata::Wildcard`] matches entries of any tag. V1 and V2 files have no
    /// metadata, so a hard disk geometry entry is synthesized from their header.
    pub fn get_metadata(&mut self, search_tag: u32, index: u32) -> Result<Metadata> {
        match find_metadata(&mut self.file, self.header.meta_offset, search_tag, index) {
            Ok(entry) => entry.read(&mut self.file),
            Err(Error::MetadataNotFound) => self
                .legacy_geometry(search_tag, index)
                .ok_or(Error::MetadataNotFound),
            Err(e) => Err(e),
        }
    }

    /// Copies as much of the `index`th metadata entry tagged `search_tag` as fits into `buf`.
    ///
    /// The returned [`MetadataInfo`] carries the full length of the entry, which may be
    /// larger than `buf`.
    pub fn get_metadata_into(
        &mut self,
        search_tag: u32,
        index: u32,
        buf: &mut [u8],
    ) -> Result<MetadataInfo> {
        match find_metadata(&mut self.file, self.header.meta_offset, search_tag, index) {
            Ok(entry) => {
                entry.read_into(&mut self.file, buf)?;
                Ok(entry.info())
            }
            Err(Error::MetadataNotFound) => {
                let meta = self
                    .legacy_geometry(search_tag, index)
                    .ok_or(Error::MetadataNotFound)?;
                let count = buf.len().min(meta.value.len());
                buf[..count].copy_from_slice(&meta.value[..count]);
                Ok(MetadataInfo {
                    length: meta.length,
                    metatag: meta.metatag,
                    flags: meta.flags,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Forwards a configuration parameter to the primary codec.
    pub fn codec_config(&mut self, param: i32, config: &[u8]) -> Result<()> {
        match self.codecs.first_mut() {
            Some(Some(codec)) => codec.config(param, config),
            _ => Err(Error::InvalidParameter),
        }
    }

    fn legacy_geometry(&self, search_tag: u32, index: u32) -> Option<Metadata> {
        let header = &self.header;
        if header.version >= Version::ChdV3
            || index != 0
            || (search_tag != KnownMetadata::HardDisk as u32
                && search_tag != KnownMetadata::Wildcard as u32)
        {
            return None;
        }

        let mut value = format!(
            "CYLS:{},HEADS:{},SECS:{},BPS:{}",
            header.obsolete_cylinders,
            header.obsolete_heads,
            header.obsolete_sectors,
            header.unit_bytes
        )
        .into_bytes();
        value.push(0);
        Some(Metadata {
            metatag: KnownMetadata::HardDisk as u32,
            length: value.len() as u32,
            value,
            flags: 0,
            index: 0,
        })
    }

    /// Reads a hunk, following references to other hunks of this file.
    fn resolve_hunk(&mut self, hunk_num: u32, dest: &mut [u8], cmp_buf: &mut Vec<u8>) -> Result<()> {
        let mut current = hunk_num;
        // every hop visits a different hunk unless the chain loops
        for _ in 0..self.header.hunk_count {
            match self.read_hunk_from(current, dest, cmp_buf)? {
                Some(next) => {
                    log::trace!("hunk {current} refers to hunk {next}");
                    current = u32::try_from(next)
                        .ok()
                        .filter(|&n| n < self.header.hunk_count)
                        .ok_or(Error::HunkOutOfRange)?;
                }
                None => return Ok(()),
            }
        }
        log::debug!("hunk {hunk_num} is part of a self reference cycle");
        Err(Error::InvalidData)
    }

    /// Fills `dest` from the data of `hunk_num`, or returns the hunk it refers to.
    fn read_hunk_from(
        &mut self,
        hunk_num: u32,
        dest: &mut [u8],
        cmp_buf: &mut Vec<u8>,
    ) -> Result<Option<u64>> {
        let source = self.hunk_source(hunk_num)?;
        log::trace!("reading hunk {hunk_num} from {source:?}");

        match source {
            HunkSource::Codec {
                slot,
                offset,
                length,
                crc,
            } => {
                cmp_buf.resize(length as usize, 0);
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.read_exact(cmp_buf)?;

                let codec = self
                    .codecs
                    .get_mut(slot)
                    .and_then(Option::as_mut)
                    .ok_or(Error::CodecError)?;
                codec.decompress(cmp_buf, dest)?;
                crc.verify(dest)?;
            }
            HunkSource::Stored { offset, crc } => {
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.read_exact(dest)?;
                crc.verify(dest)?;
            }
            HunkSource::Mini { pattern, crc } => {
                let pattern = pattern.to_be_bytes();
                for (i, byte) in dest.iter_mut().enumerate() {
                    *byte = pattern[i % pattern.len()];
                }
                crc.verify(dest)?;
            }
            HunkSource::SelfHunk(target) => return Ok(Some(target)),
            HunkSource::ParentHunk(parent_hunk) => {
                let parent = self.parent.as_deref_mut().ok_or(Error::RequiresParent)?;
                let parent_hunk = u32::try_from(parent_hunk).map_err(|_| Error::HunkOutOfRange)?;
                parent.read_hunk(parent_hunk, dest)?;
            }
            HunkSource::ParentUnit(unit) => {
                let parent = self.parent.as_deref_mut().ok_or(Error::RequiresParent)?;
                let offset = unit
                    .checked_mul(parent.header.unit_bytes as u64)
                    .ok_or(Error::HunkOutOfRange)?;
                parent.read_bytes(offset, dest)?;
            }
            HunkSource::Zero => dest.fill(0),
        }
        Ok(None)
    }

    fn hunk_source(&self, hunk_num: u32) -> Result<HunkSource> {
        let entry = self
            .map
            .get_entry(hunk_num as usize)
            .ok_or(Error::HunkOutOfRange)?;

        let source = match entry {
            MapEntry::LegacyEntry(entry) => {
                let crc = BlockCrc::Crc32(entry.hunk_crc());
                let offset = entry.block_offset();
                match entry.hunk_type()? {
                    LegacyEntryType::Compressed => HunkSource::Codec {
                        slot: 0,
                        offset,
                        length: entry.block_size(),
                        crc,
                    },
                    LegacyEntryType::Uncompressed => HunkSource::Stored { offset, crc },
                    LegacyEntryType::Mini => HunkSource::Mini {
                        pattern: offset,
                        crc,
                    },
                    LegacyEntryType::SelfHunk => HunkSource::SelfHunk(offset),
                    LegacyEntryType::ParentHunk => HunkSource::ParentHunk(offset),
                    LegacyEntryType::ExternalCompressed => return Err(Error::UnsupportedFormat),
                    LegacyEntryType::Invalid => return Err(Error::InvalidData),
                }
            }
            MapEntry::V5Compressed(entry) => {
                let crc = BlockCrc::Crc16(entry.hunk_crc());
                let offset = entry.block_offset();
                match entry.hunk_type()? {
                    t @ (V5CompressionType::CompressionType0
                    | V5CompressionType::CompressionType1
                    | V5CompressionType::CompressionType2
                    | V5CompressionType::CompressionType3) => HunkSource::Codec {
                        slot: t as usize,
                        offset,
                        length: entry.block_size(),
                        crc,
                    },
                    V5CompressionType::CompressionNone => HunkSource::Stored { offset, crc },
                    V5CompressionType::CompressionSelf => HunkSource::SelfHunk(offset),
                    V5CompressionType::CompressionParent => HunkSource::ParentUnit(offset),
                    // pseudo-types never survive map decoding
                    _ => return Err(Error::InvalidData),
                }
            }
            MapEntry::V5Uncompressed(entry) => match entry.block_offset() {
                0 if self.parent.is_some() => HunkSource::ParentHunk(hunk_num as u64),
                0 => HunkSource::Zero,
                offset => HunkSource::Stored {
                    offset,
                    crc: BlockCrc::None,
                },
            },
        };
        Ok(source)
    }
}

/// Checks the parent's own hashes against the ones recorded in the child. Hashes that are
/// unset on either side are not compared.
fn check_parent(child: &Header, parent: &Header) -> Result<()> {
    let md5_mismatch = child.parent_md5.iter().any(|&b| b != 0)
        && parent.md5.iter().any(|&b| b != 0)
        && child.parent_md5 != parent.md5;
    let sha1_mismatch = child.parent_sha1.iter().any(|&b| b != 0)
        && parent.sha1.iter().any(|&b| b != 0)
        && child.parent_sha1 != parent.sha1;

    if md5_mismatch || sha1_mismatch {
        log::debug!("parent hashes do not match the ones recorded in the child");
        return Err(Error::InvalidParent);
    }
    Ok(())
}

fn init_codecs(header: &Header) -> Result<Codecs> {
    let slots = match header.version {
        Version::ChdV5 => 4,
        _ => 1,
    };

    let mut codecs = Codecs::new();
    for &tag in &header.compression[..slots] {
        if tag == CodecType::None as u32 {
            codecs.push(None);
            continue;
        }
        let descriptor = find_codec(tag).ok_or(Error::UnsupportedFormat)?;
        log::debug!("initializing {} codec", descriptor.name);
        codecs.push(Some(descriptor.init(header.hunk_bytes)?));
    }
    Ok(codecs)
}
