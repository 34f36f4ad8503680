//! Types and methods relating to metadata stored in a CHD file.
//!
//! Metadata is a singly linked list of tagged entries. Each entry starts with a 16 byte
//! header holding the tag, a 24 bit length with the flags in the top byte, and the offset of
//! the next entry (0 terminates the list).
use crate::error::{Error, Result};
use crate::make_tag;
use byteorder::{BigEndian, ReadBytesExt};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::collections::HashSet;
use std::io::{Cursor, Read, Seek, SeekFrom};

pub(crate) const METADATA_HEADER_SIZE: usize = 16;

/// A list of well-known metadata tags.
#[derive(FromPrimitive, Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum KnownMetadata {
    /// Matches any tag when searching.
    Wildcard = 0,
    HardDisk = make_tag(b"GDDD"),
    HardDiskIdent = make_tag(b"IDNT"),
    HardDiskKey = make_tag(b"KEY "),
    PcmciaCIS = make_tag(b"CIS "),
    CdRomOld = make_tag(b"CHCD"),
    CdRomTrack = make_tag(b"CHTR"),
    CdRomTrack2 = make_tag(b"CHT2"),
    GdRomOld = make_tag(b"CHGT"),
    GdRomTrack = make_tag(b"CHGD"),
    AudioVideo = make_tag(b"AVAV"),
    AudioVideoLaserDisc = make_tag(b"AVLD"),
}

impl KnownMetadata {
    /// Returns whether a given tag indicates that the CHD contains CD-ROM data.
    pub fn is_cdrom(tag: u32) -> bool {
        matches!(
            KnownMetadata::from_u32(tag),
            Some(
                KnownMetadata::CdRomOld
                    | KnownMetadata::CdRomTrack
                    | KnownMetadata::CdRomTrack2
                    | KnownMetadata::GdRomOld
                    | KnownMetadata::GdRomTrack
            )
        )
    }
}

/// Trait for structs that contain or represent tagged metadata.
pub trait MetadataTag {
    fn metatag(&self) -> u32;
}

impl MetadataTag for KnownMetadata {
    fn metatag(&self) -> u32 {
        *self as u32
    }
}

/// A complete CHD metadata entry with contents read into memory.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Metadata {
    /// The FourCC metadata tag.
    pub metatag: u32,
    /// The contents of this metadata entry.
    pub value: Vec<u8>,
    /// The flags of this metadata entry.
    pub flags: u8,
    /// The index of this entry among the entries sharing its tag.
    pub index: u32,
    /// The length of this metadata entry.
    pub length: u32,
}

impl MetadataTag for Metadata {
    fn metatag(&self) -> u32 {
        self.metatag
    }
}

/// The description of a metadata entry copied into a caller buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MetadataInfo {
    /// The full length of the entry, which may exceed the bytes copied.
    pub length: u32,
    pub metatag: u32,
    pub flags: u8,
}

/// A reference to a metadata entry within the CHD file.
#[derive(Clone, Debug)]
pub struct MetadataRef {
    offset: u64,
    next: u64,
    prev: u64,
    pub(crate) length: u32,
    pub(crate) metatag: u32,
    pub(crate) flags: u8,
    pub(crate) index: u32,
}

impl MetadataRef {
    /// The offset of this entry's header in the file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// The offset of the following entry, or 0 for the last one.
    pub fn next(&self) -> u64 {
        self.next
    }

    /// The offset of the preceding entry, or 0 for the first one.
    pub fn prev(&self) -> u64 {
        self.prev
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Copies as much of the entry as fits into `buf`, returning the number of bytes copied.
    pub(crate) fn read_into<F: Read + Seek>(&self, file: &mut F, buf: &mut [u8]) -> Result<usize> {
        let count = buf.len().min(self.length as usize);
        file.seek(SeekFrom::Start(self.offset + METADATA_HEADER_SIZE as u64))?;
        file.read_exact(&mut buf[..count])?;
        Ok(count)
    }

    /// Read the contents of the metadata from the input stream. The `MetadataRef` must have
    /// the same provenance as the input stream for a successful read.
    pub fn read<F: Read + Seek>(&self, file: &mut F) -> Result<Metadata> {
        let mut buf = vec![0u8; self.length as usize];
        self.read_into(file, &mut buf)?;
        Ok(Metadata {
            metatag: self.metatag,
            value: buf,
            flags: self.flags,
            index: self.index,
            length: self.length,
        })
    }

    pub(crate) fn info(&self) -> MetadataInfo {
        MetadataInfo {
            length: self.length,
            metatag: self.metatag,
            flags: self.flags,
        }
    }
}

impl MetadataTag for MetadataRef {
    fn metatag(&self) -> u32 {
        self.metatag
    }
}

/// An iterator over the metadata entries of a stream that contains a CHD file.
///
/// Iteration stops at the end of the list, on a short or failed read, or when an entry
/// links back to one already visited.
pub struct MetadataRefs<'a, F: Read + Seek + 'a> {
    file: &'a mut F,
    curr_offset: u64,
    curr: Option<u64>,
    // few files carry more than a handful of distinct tags
    indices: Vec<(u32, u32)>,
    visited: HashSet<u64>,
}

impl<'a, F: Read + Seek + 'a> MetadataRefs<'a, F> {
    pub(crate) fn from_stream(file: &'a mut F, initial_offset: u64) -> Self {
        MetadataRefs {
            file,
            curr_offset: initial_offset,
            curr: None,
            indices: Vec::new(),
            visited: HashSet::new(),
        }
    }

    /// Consumes the iterator, reading the contents of every remaining entry.
    pub fn try_into_vec(mut self) -> Result<Vec<Metadata>> {
        let refs: Vec<_> = self.by_ref().collect();
        refs.iter().map(|e| e.read(&mut *self.file)).collect()
    }

    fn next_entry(&mut self) -> Result<MetadataRef> {
        let mut raw_header = [0u8; METADATA_HEADER_SIZE];
        self.file.seek(SeekFrom::Start(self.curr_offset))?;
        self.file.read_exact(&mut raw_header)?;

        let mut cursor = Cursor::new(raw_header);
        let metatag = cursor.read_u32::<BigEndian>()?;
        let length = cursor.read_u32::<BigEndian>()?;
        let next = cursor.read_u64::<BigEndian>()?;

        let index = match self.indices.iter_mut().find(|(tag, _)| *tag == metatag) {
            Some((_, count)) => {
                *count += 1;
                *count - 1
            }
            None => {
                self.indices.push((metatag, 1));
                0
            }
        };

        let entry = MetadataRef {
            offset: self.curr_offset,
            next,
            prev: self.curr.unwrap_or(0),
            length: length & 0x00ffffff,
            metatag,
            flags: (length >> 24) as u8,
            index,
        };
        self.curr = Some(entry.offset);
        self.curr_offset = next;
        Ok(entry)
    }
}

impl<'a, F: Read + Seek + 'a> Iterator for MetadataRefs<'a, F> {
    type Item = MetadataRef;

    fn next(&mut self) -> Option<Self::Item> {
        if self.curr_offset == 0 || !self.visited.insert(self.curr_offset) {
            return None;
        }
        match self.next_entry() {
            Ok(entry) => Some(entry),
            Err(err) => {
                log::debug!("metadata walk stopped at {:#x}: {err}", self.curr_offset);
                self.curr_offset = 0;
                None
            }
        }
    }
}

/// Finds the `index`th entry whose tag matches `search_tag`. A tag of
/// [`KnownMetadata::Wildcard`] matches every entry.
pub(crate) fn find_metadata<F: Read + Seek>(
    file: &mut F,
    meta_offset: u64,
    search_tag: u32,
    index: u32,
) -> Result<MetadataRef> {
    MetadataRefs::from_stream(file, meta_offset)
        .filter(|e| search_tag == KnownMetadata::Wildcard as u32 || e.metatag == search_tag)
        .nth(index as usize)
        .ok_or(Error::MetadataNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    /// Appends entries at `base` and returns the image plus the offset of each header.
    fn build(entries: &[(&[u8; 4], u8, &[u8])], base: u64) -> (Vec<u8>, Vec<u64>) {
        let mut out = vec![0u8; base as usize];
        let mut offsets = Vec::new();
        for (i, (tag, flags, data)) in entries.iter().enumerate() {
            offsets.push(out.len() as u64);
            let next = if i + 1 == entries.len() {
                0
            } else {
                (out.len() + METADATA_HEADER_SIZE + data.len()) as u64
            };
            out.write_u32::<BigEndian>(make_tag(tag)).unwrap();
            out.write_u32::<BigEndian>(((*flags as u32) << 24) | data.len() as u32)
                .unwrap();
            out.write_u64::<BigEndian>(next).unwrap();
            out.extend_from_slice(data);
        }
        (out, offsets)
    }

    #[test]
    fn walks_list_with_per_tag_indices() {
        let (image, offsets) = build(
            &[(b"CHT2", 1, b"TRACK:1"), (b"CHGD", 0, b"x"), (b"CHT2", 0, b"TRACK:2")],
            32,
        );
        let mut file = Cursor::new(image);
        let refs: Vec<_> = MetadataRefs::from_stream(&mut file, 32).collect();
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].index(), 0);
        assert_eq!(refs[1].index(), 0);
        assert_eq!(refs[2].index(), 1);
        assert_eq!(refs[0].flags(), 1);
        assert_eq!(refs[2].prev(), offsets[1]);
        assert_eq!(refs[2].next(), 0);

        let values = MetadataRefs::from_stream(&mut file, 32).try_into_vec().unwrap();
        assert_eq!(values[2].value, b"TRACK:2");
    }

    #[test]
    fn wildcard_walks_in_file_order() {
        let (image, _) = build(&[(b"AAAA", 0, b"a"), (b"BBBB", 0, b"b"), (b"AAAA", 0, b"c")], 16);
        let mut file = Cursor::new(image);
        let tags: Vec<_> = (0..3)
            .map(|i| find_metadata(&mut file, 16, 0, i).unwrap().metatag())
            .collect();
        assert_eq!(tags, vec![make_tag(b"AAAA"), make_tag(b"BBBB"), make_tag(b"AAAA")]);
        assert_eq!(
            find_metadata(&mut file, 16, 0, 3).unwrap_err(),
            Error::MetadataNotFound
        );

        let second_a = find_metadata(&mut file, 16, make_tag(b"AAAA"), 1).unwrap();
        assert_eq!(second_a.read(&mut file).unwrap().value, b"c");
    }

    #[test]
    fn cycle_terminates() {
        let (mut image, offsets) = build(&[(b"AAAA", 0, b"a"), (b"BBBB", 0, b"b")], 8);
        // point the last entry back to the first
        let last = offsets[1] as usize;
        (&mut image[last + 8..]).write_u64::<BigEndian>(offsets[0]).unwrap();

        let mut file = Cursor::new(image);
        assert_eq!(MetadataRefs::from_stream(&mut file, 8).count(), 2);
        assert_eq!(
            find_metadata(&mut file, 8, make_tag(b"CCCC"), 0).unwrap_err(),
            Error::MetadataNotFound
        );
    }

    #[test]
    fn truncated_header_ends_walk() {
        let (mut image, _) = build(&[(b"AAAA", 0, b"a")], 4);
        (&mut image[12..]).write_u64::<BigEndian>(1000).unwrap();
        let mut file = Cursor::new(image);
        assert_eq!(MetadataRefs::from_stream(&mut file, 4).count(), 1);
    }

    #[test]
    fn read_into_truncates() {
        let (image, _) = build(&[(b"IDNT", 0, b"0123456789")], 4);
        let mut file = Cursor::new(image);
        let entry = find_metadata(&mut file, 4, make_tag(b"IDNT"), 0).unwrap();
        let mut small = [0u8; 4];
        assert_eq!(entry.read_into(&mut file, &mut small).unwrap(), 4);
        assert_eq!(&small, b"0123");
        assert_eq!(entry.info().length, 10);
    }

    #[test]
    fn cdrom_tags() {
        assert!(KnownMetadata::is_cdrom(make_tag(b"CHT2")));
        assert!(KnownMetadata::is_cdrom(make_tag(b"CHGD")));
        assert!(!KnownMetadata::is_cdrom(make_tag(b"GDDD")));
        assert!(!KnownMetadata::is_cdrom(make_tag(b"zzzz")));
    }
}
