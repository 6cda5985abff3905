//! Record header codec for the commit log.
//!
//! Every record begins on an LBA boundary with an 8-byte header:
//!
//! ```text
//! +----------------+----------------+--------+
//! | crc32c (masked)| length (24 bit)| type   |
//! +----------------+----------------+--------+
//! |    4 bytes LE  |   3 bytes LE   | 1 byte |
//! +----------------+----------------+--------+
//! ```
//!
//! The CRC is CRC32C over the type byte followed by the payload, masked the
//! way RocksDB masks log CRCs so that CRCs of CRC-carrying data do not look
//! valid. The 24-bit length caps a single fragment at 2^24 - 1 bytes;
//! payloads larger than one LBA are split into First/Middle/Last fragments.

use byteorder::{ByteOrder, LittleEndian};
use crc::{Crc, CRC_32_ISCSI};

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Bytes of header at the start of every record.
pub const HEADER_SIZE: usize = 8;

/// Largest length the 24-bit field can carry.
pub const MAX_FRAGMENT_LENGTH: u32 = (1 << 24) - 1;

const CRC_MASK_DELTA: u32 = 0xa282_ead8;

/// Record framing type. Anything outside the known range decodes as
/// `Invalid`, which terminates reader iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Invalid = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => RecordType::Full,
            2 => RecordType::First,
            3 => RecordType::Middle,
            4 => RecordType::Last,
            _ => RecordType::Invalid,
        }
    }
}

/// CRC32C over the type byte followed by the payload.
pub fn record_crc(rtype: RecordType, payload: &[u8]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&[rtype as u8]);
    digest.update(payload);
    digest.finalize()
}

/// CRC32C over raw header-and-payload bytes, starting at the type byte.
pub fn raw_crc(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// Masks a CRC so that stored CRCs of data containing CRCs stay distinct.
pub fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(CRC_MASK_DELTA)
}

/// Inverse of [`mask_crc`].
pub fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(CRC_MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

/// Writes a header into the first [`HEADER_SIZE`] bytes of `dst`.
pub fn encode_header(dst: &mut [u8], masked_crc: u32, length: u32, rtype: RecordType) {
    debug_assert!(length <= MAX_FRAGMENT_LENGTH);
    LittleEndian::write_u32(&mut dst[0..4], masked_crc);
    dst[4] = (length & 0xff) as u8;
    dst[5] = ((length >> 8) & 0xff) as u8;
    dst[6] = ((length >> 16) & 0xff) as u8;
    dst[7] = rtype as u8;
}

/// Parses `(masked_crc, length, type)` from the first [`HEADER_SIZE`] bytes.
pub fn parse_header(src: &[u8]) -> (u32, u32, RecordType) {
    let masked_crc = LittleEndian::read_u32(&src[0..4]);
    let length =
        u32::from(src[4]) | (u32::from(src[5]) << 8) | (u32::from(src[6]) << 16);
    (masked_crc, length, RecordType::from_u8(src[7]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_roundtrip() {
        for crc in [0u32, 1, 0xdead_beef, u32::MAX] {
            assert_eq!(unmask_crc(mask_crc(crc)), crc);
            assert_ne!(mask_crc(crc), crc);
        }
    }

    #[test]
    fn test_type_decoding() {
        assert_eq!(RecordType::from_u8(1), RecordType::Full);
        assert_eq!(RecordType::from_u8(4), RecordType::Last);
        assert_eq!(RecordType::from_u8(0), RecordType::Invalid);
        assert_eq!(RecordType::from_u8(5), RecordType::Invalid);
        assert_eq!(RecordType::from_u8(0xff), RecordType::Invalid);
    }

    #[test]
    fn test_header_roundtrip() {
        let mut buf = [0u8; HEADER_SIZE];
        encode_header(&mut buf, 0x1234_5678, 0x00ab_cdef, RecordType::Middle);
        let (crc, length, rtype) = parse_header(&buf);
        assert_eq!(crc, 0x1234_5678);
        assert_eq!(length, 0x00ab_cdef);
        assert_eq!(rtype, RecordType::Middle);
    }

    #[test]
    fn test_crc_covers_type_and_payload() {
        let payload = b"some payload";
        let full = record_crc(RecordType::Full, payload);
        let first = record_crc(RecordType::First, payload);
        assert_ne!(full, first);

        // Matches a raw computation over type byte then payload bytes.
        let mut raw = vec![RecordType::Full as u8];
        raw.extend_from_slice(payload);
        assert_eq!(raw_crc(&raw), full);
    }
}
