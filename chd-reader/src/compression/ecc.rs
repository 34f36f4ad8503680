//! CD-ROM sector ECC regeneration.
//!
//! The P and Q parity of a raw data sector form a Reed-Solomon product code over GF(2^8)
//! with the polynomial 0x11d. P covers 86 columns of 24 bytes, Q covers 52 diagonals of
//! 43 bytes; both address the sector starting after the sync header.
use crate::cdrom::{CD_MAX_SECTOR_DATA, CD_MODE_OFFSET, CD_SYNC_NUM_BYTES};

const ECC_P_OFFSET: usize = 0x81c;
const ECC_P_NUM_BYTES: usize = 86;
const ECC_P_COMP: usize = 24;

const ECC_Q_OFFSET: usize = ECC_P_OFFSET + 2 * ECC_P_NUM_BYTES;
const ECC_Q_NUM_BYTES: usize = 52;
const ECC_Q_COMP: usize = 43;

const SECTOR_SIZE: usize = CD_MAX_SECTOR_DATA as usize;

const fn gf_tables() -> ([u8; 256], [u8; 256]) {
    let mut low = [0u8; 256];
    let mut high = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let j = ((i << 1) ^ if i & 0x80 != 0 { 0x11d } else { 0 }) as u8;
        low[i] = j;
        high[i ^ j as usize] = i as u8;
        i += 1;
    }
    (low, high)
}

const GF_TABLES: ([u8; 256], [u8; 256]) = gf_tables();
// multiply by alpha
const ECC_LOW: [u8; 256] = GF_TABLES.0;
// divide by (alpha + 1)
const ECC_HIGH: [u8; 256] = GF_TABLES.1;

const fn p_offsets() -> [[u16; ECC_P_COMP]; ECC_P_NUM_BYTES] {
    let mut table = [[0u16; ECC_P_COMP]; ECC_P_NUM_BYTES];
    let mut byte = 0;
    while byte < ECC_P_NUM_BYTES {
        let mut comp = 0;
        while comp < ECC_P_COMP {
            table[byte][comp] = (byte + ECC_P_NUM_BYTES * comp) as u16;
            comp += 1;
        }
        byte += 1;
    }
    table
}

const fn q_offsets() -> [[u16; ECC_Q_COMP]; ECC_Q_NUM_BYTES] {
    let mut table = [[0u16; ECC_Q_COMP]; ECC_Q_NUM_BYTES];
    let mut byte = 0;
    while byte < ECC_Q_NUM_BYTES {
        let mut comp = 0;
        while comp < ECC_Q_COMP {
            let word = (ECC_Q_COMP * (byte / 2) + (ECC_Q_COMP + 1) * comp) % 1118;
            table[byte][comp] = (2 * word + (byte & 1)) as u16;
            comp += 1;
        }
        byte += 1;
    }
    table
}

const P_OFFSETS: [[u16; ECC_P_COMP]; ECC_P_NUM_BYTES] = p_offsets();
const Q_OFFSETS: [[u16; ECC_Q_COMP]; ECC_Q_NUM_BYTES] = q_offsets();

#[inline]
fn ecc_source_byte(sector: &[u8; SECTOR_SIZE], offset: u16) -> u8 {
    // mode 2 sectors compute parity with a zeroed header
    if sector[CD_MODE_OFFSET] == 2 && offset < 4 {
        0
    } else {
        sector[CD_SYNC_NUM_BYTES + offset as usize]
    }
}

fn ecc_compute_bytes(sector: &[u8; SECTOR_SIZE], row: &[u16]) -> (u8, u8) {
    let mut val1 = 0u8;
    let mut val2 = 0u8;
    for &offset in row {
        let byte = ecc_source_byte(sector, offset);
        val1 ^= byte;
        val2 ^= byte;
        val1 = ECC_LOW[val1 as usize];
    }
    val1 = ECC_HIGH[(ECC_LOW[val1 as usize] ^ val2) as usize];
    val2 ^= val1;
    (val1, val2)
}

/// Parity regeneration for raw 2352 byte data sectors.
pub(crate) trait ErrorCorrectedSector {
    /// Overwrites the P and Q parity bytes with values computed from the sector contents.
    fn generate_ecc(&mut self);
}

impl ErrorCorrectedSector for [u8; SECTOR_SIZE] {
    fn generate_ecc(&mut self) {
        for (byte, row) in P_OFFSETS.iter().enumerate() {
            let (v1, v2) = ecc_compute_bytes(self, row);
            self[ECC_P_OFFSET + byte] = v1;
            self[ECC_P_OFFSET + ECC_P_NUM_BYTES + byte] = v2;
        }
        for (byte, row) in Q_OFFSETS.iter().enumerate() {
            let (v1, v2) = ecc_compute_bytes(self, row);
            self[ECC_Q_OFFSET + byte] = v1;
            self[ECC_Q_OFFSET + ECC_Q_NUM_BYTES + byte] = v2;
        }
    }
}
