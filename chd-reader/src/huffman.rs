//! Canonical Huffman decoder used by the V5 hunk map.
//!
//! Trees are transmitted as an RLE-compressed list of code lengths. Codes are then assigned
//! the way MAME's `huffman_context_base::assign_canonical_codes` does it, which every V5 map
//! writer relies on, so the decode table is bit-exact with real files.
use crate::bitstream::BitStream;
use crate::error::{Error, Result};

type LookupValue = u16;

const fn make_lookup(symbol: u16, bits: u8) -> LookupValue {
    (symbol << 5) | ((bits as u16) & 0x1f)
}

/// Decoder for an alphabet of `NUM_CODES` symbols with codes of at most `MAX_BITS` bits.
pub(crate) struct HuffmanDecoder<const NUM_CODES: usize, const MAX_BITS: u8> {
    lookup: Vec<LookupValue>,
    code_bits: [u8; NUM_CODES],
    codes: [u32; NUM_CODES],
}

impl<const NUM_CODES: usize, const MAX_BITS: u8> HuffmanDecoder<NUM_CODES, MAX_BITS> {
    fn new() -> Self {
        HuffmanDecoder {
            lookup: vec![0; 1 << MAX_BITS],
            code_bits: [0; NUM_CODES],
            codes: [0; NUM_CODES],
        }
    }

    /// Imports an RLE-encoded tree description from the bitstream and builds the decode table.
    pub fn from_tree_rle(bits: &mut BitStream<'_>) -> Result<Self> {
        let mut decoder = Self::new();
        let field_bits = match MAX_BITS {
            0..=7 => 3,
            8..=15 => 4,
            _ => 5,
        };

        let mut curr = 0;
        while curr < NUM_CODES {
            let node_bits = bits.read(field_bits)? as u8;
            if node_bits != 1 {
                decoder.code_bits[curr] = node_bits;
                curr += 1;
                continue;
            }

            // 1 escapes a run; a doubled 1 is a literal 1
            let node_bits = bits.read(field_bits)? as u8;
            if node_bits == 1 {
                decoder.code_bits[curr] = node_bits;
                curr += 1;
                continue;
            }

            let rep_count = bits.read(field_bits)? as usize + 3;
            if curr + rep_count > NUM_CODES {
                return Err(Error::DecompressionError);
            }
            decoder.code_bits[curr..curr + rep_count].fill(node_bits);
            curr += rep_count;
        }
        if bits.overflowed() {
            return Err(Error::DecompressionError);
        }

        decoder.assign_canonical_codes()?;
        decoder.build_lookup_table();
        Ok(decoder)
    }

    /// Decodes a single symbol.
    pub fn decode_one(&self, bits: &mut BitStream<'_>) -> Result<u32> {
        let peeked = bits.peek(MAX_BITS)?;
        let entry = self.lookup[peeked as usize];
        bits.skip((entry & 0x1f) as u8)?;
        Ok((entry >> 5) as u32)
    }

    fn assign_canonical_codes(&mut self) -> Result<()> {
        let mut histogram = [0u32; 33];
        for &len in &self.code_bits {
            if len > MAX_BITS {
                return Err(Error::DecompressionError);
            }
            histogram[len as usize] += 1;
        }

        // starting code of each length, longest first
        let mut curr_start = 0u32;
        for len in (1..=32).rev() {
            let next_start = (curr_start + histogram[len]) >> 1;
            if len != 1 && next_start * 2 != curr_start + histogram[len] {
                return Err(Error::DecompressionError);
            }
            histogram[len] = curr_start;
            curr_start = next_start;
        }

        for (code, &len) in self.codes.iter_mut().zip(self.code_bits.iter()) {
            if len > 0 {
                *code = histogram[len as usize];
                histogram[len as usize] += 1;
            }
        }
        Ok(())
    }

    fn build_lookup_table(&mut self) {
        for (symbol, (&code, &len)) in self.codes.iter().zip(self.code_bits.iter()).enumerate() {
            if len == 0 {
                continue;
            }
            let value = make_lookup(symbol as u16, len);
            let shift = MAX_BITS - len;
            let start = (code << shift) as usize;
            let end = (((code + 1) << shift) - 1) as usize;
            if let Some(slots) = self.lookup.get_mut(start..=end) {
                slots.fill(value);
            }
        }
    }
}
