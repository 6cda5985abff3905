//! Commit codec: frames opaque payloads into CRC-protected, LBA-aligned
//! records on a sequential zone log and reassembles them on read.
//!
//! # Framing
//!
//! A payload is cut into fragments of at most `lba_size - HEADER_SIZE`
//! bytes. Each fragment occupies exactly one record: an 8-byte header, the
//! fragment bytes, and zero padding to the end of its LBA. A payload that
//! fits in one fragment is typed `Full`; otherwise the run is typed
//! `First`, `Middle`*, `Last`:
//!
//! ```text
//! |<------- LBA ------->|<------- LBA ------->|<------- LBA ------->|
//! +--------+------------+--------+------------+--------+-------+----+
//! | header | payload    | header | payload    | header | payld | 00 |
//! | First  |            | Middle |            | Last   |       |    |
//! +--------+------------+--------+------------+--------+-------+----+
//! ```
//!
//! # Reading
//!
//! A [`CommitReader`] iterates records over a bounded LBA range using one
//! of the bounded reader slots; it owns its scratch buffers for the
//! duration of the read session. A CRC mismatch or unknown type byte ends
//! the iteration, which callers interpret as end-of-log. A `Middle` or
//! `Last` fragment with no preceding `First` is dropped to resynchronize
//! at log boundaries; this is logged at warning level since it also
//! silences genuinely corrupt streams.
//!
//! The write path is single-caller: `commit` takes `&mut self` and the
//! write buffer is owned exclusively by the committer. Readers only share
//! the underlying log and may run concurrently with each other.

pub mod record;

use crate::device::ZoneLog;
use crate::error::Result;
use crate::Error;

use record::{
    encode_header, mask_crc, parse_header, raw_crc, record_crc, unmask_crc, RecordType,
    HEADER_SIZE,
};

/// Grows `buf` to exactly `len` bytes, reporting allocation failure as
/// `MemoryLimit` instead of aborting.
pub(crate) fn grow_buffer(buf: &mut Vec<u8>, len: usize) -> Result<()> {
    if len > buf.len() {
        buf.try_reserve_exact(len - buf.len())
            .map_err(|_| Error::MemoryLimit)?;
    }
    buf.resize(len, 0);
    Ok(())
}

/// Frames `payload` into `dst`, which must already be zeroed and sized to
/// a whole number of LBAs covering the frame.
fn frame_into(dst: &mut [u8], payload: &[u8], lba_size: usize) {
    let avail = lba_size - HEADER_SIZE;
    let mut walker = 0usize;
    let mut ptr = 0usize;
    let mut left = payload.len();
    let mut begin = true;

    loop {
        let fragment_length = left.min(avail);
        let end = left == fragment_length;
        let rtype = match (begin, end) {
            (true, true) => RecordType::Full,
            (true, false) => RecordType::First,
            (false, true) => RecordType::Last,
            (false, false) => RecordType::Middle,
        };

        let fragment = &payload[ptr..ptr + fragment_length];
        dst[walker + HEADER_SIZE..walker + HEADER_SIZE + fragment_length]
            .copy_from_slice(fragment);
        let crc = mask_crc(record_crc(rtype, fragment));
        encode_header(&mut dst[walker..], crc, fragment_length as u32, rtype);

        walker += fragment_length + HEADER_SIZE;
        ptr += fragment_length;
        left -= fragment_length;
        begin = false;
        if left == 0 {
            break;
        }
    }
}

/// Encodes payloads into CRC'd records and appends them to a zone log.
pub struct Committer<'a, L: ZoneLog> {
    log: &'a L,
    lba_size: u64,
    readers: usize,
    keep_buffer: bool,
    write_buffer: Vec<u8>,
}

impl<'a, L: ZoneLog> Committer<'a, L> {
    pub fn new(log: &'a L, readers: usize, keep_buffer: bool) -> Self {
        let lba_size = log.info().lba_size;
        Self {
            log,
            lba_size,
            readers,
            keep_buffer,
            write_buffer: Vec::new(),
        }
    }

    /// Exact byte count the encoder produces for a payload of `data_size`
    /// bytes: one header per fragment, rounded up to whole LBAs.
    pub fn space_needed(&self, data_size: u64) -> u64 {
        let fragcount = data_size / self.lba_size + 1;
        let needed = fragcount * HEADER_SIZE as u64 + data_size;
        needed.div_ceil(self.lba_size) * self.lba_size
    }

    /// Whether the log has room for a payload of `data_size` bytes.
    pub fn space_enough(&self, data_size: u64) -> bool {
        self.log.space_left(self.space_needed(data_size))
    }

    /// Frames `payload` and appends it to the log. Returns the LBAs
    /// written. The write buffer is released afterwards unless the
    /// committer was built with `keep_buffer`.
    pub fn commit(&mut self, payload: &[u8]) -> Result<u64> {
        let size_needed = self.space_needed(payload.len() as u64) as usize;
        let mut buffer = std::mem::take(&mut self.write_buffer);
        if let Err(e) = grow_buffer(&mut buffer, size_needed) {
            tracing::error!("commit: failed resizing write buffer");
            return Err(e);
        }
        buffer[..size_needed].fill(0);

        frame_into(&mut buffer[..size_needed], payload, self.lba_size as usize);

        let result = self.log.append(&buffer[..size_needed]);
        if result.is_err() {
            tracing::error!("commit: fatal append error");
        }
        if self.keep_buffer {
            self.write_buffer = buffer;
        }
        result
    }

    /// Identical framing into a caller-owned memory region; no IO.
    pub fn commit_to_memory(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let size_needed = self.space_needed(payload.len() as u64) as usize;
        let mut out = Vec::new();
        grow_buffer(&mut out, size_needed)?;
        frame_into(&mut out, payload, self.lba_size as usize);
        Ok(out)
    }

    /// `commit`, but fails with `NoSpace` instead of writing past the
    /// log's capacity.
    pub fn safe_commit(&mut self, payload: &[u8]) -> Result<u64> {
        if !self.space_enough(payload.len() as u64) {
            tracing::error!("committer: no space left");
            return Err(Error::NoSpace);
        }
        self.commit(payload)
    }

    /// Opens a record reader over `[begin, end)` LBAs using `slot`.
    pub fn reader(&self, slot: usize, begin: u64, end: u64) -> Result<CommitReader<'a, L>> {
        if begin >= end || slot >= self.readers {
            return Err(Error::InvalidArgument(format!(
                "bad reader: slot {slot} of {}, range [{begin}, {end})",
                self.readers
            )));
        }
        let mut buffer = Vec::new();
        if grow_buffer(&mut buffer, self.lba_size as usize).is_err() {
            tracing::error!("commit: reader buffer memory limit");
            return Err(Error::MemoryLimit);
        }
        Ok(CommitReader {
            log: self.log,
            lba_size: self.lba_size,
            slot,
            end,
            cursor: begin,
            buffer,
            scratch: Vec::new(),
        })
    }
}

/// Iterates committed records from the device over a bounded LBA range.
///
/// The reader owns its buffers; the slot only selects the device queue, so
/// readers on distinct slots run concurrently without sharing memory.
pub struct CommitReader<'a, L: ZoneLog> {
    log: &'a L,
    lba_size: u64,
    slot: usize,
    end: u64,
    cursor: u64,
    buffer: Vec<u8>,
    scratch: Vec<u8>,
}

impl<L: ZoneLog> CommitReader<'_, L> {
    /// Decodes the next full payload, reassembling fragment runs. Returns
    /// `Ok(None)` at the end of the range or at the first invalid record.
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.cursor >= self.end {
            return Ok(None);
        }
        self.scratch.clear();
        let mut in_fragmented_record = false;
        let lba_size = self.lba_size as usize;

        while self.cursor < self.end {
            grow_buffer(&mut self.buffer, lba_size)?;
            self.log
                .read(self.cursor, &mut self.buffer[..lba_size], self.slot)?;
            let (stored_crc, length, mut rtype) = parse_header(&self.buffer);
            let record_bytes = HEADER_SIZE as u64 + u64::from(length);
            let to_read = (self.end - self.cursor) * self.lba_size;
            let mut bytes_read = self.lba_size;

            // A record claiming more than one LBA: enlarge the buffer and
            // re-read the whole span, provided it fits in the range.
            if record_bytes > self.lba_size && record_bytes <= to_read {
                let span = record_bytes.div_ceil(self.lba_size) * self.lba_size;
                grow_buffer(&mut self.buffer, span as usize)?;
                self.log
                    .read(self.cursor, &mut self.buffer[..span as usize], self.slot)?;
                bytes_read = span;
            }
            if record_bytes > bytes_read {
                rtype = RecordType::Invalid;
            }
            if rtype != RecordType::Invalid {
                let actual = raw_crc(&self.buffer[7..HEADER_SIZE + length as usize]);
                if actual != unmask_crc(stored_crc) {
                    tracing::error!(
                        length,
                        cursor = self.cursor,
                        end = self.end,
                        "seek commit: corrupt crc"
                    );
                    rtype = RecordType::Invalid;
                }
            }

            self.cursor += u64::from(length).div_ceil(self.lba_size);

            if rtype == RecordType::Invalid {
                self.scratch.clear();
                return Ok(None);
            }
            let payload_end = HEADER_SIZE + length as usize;
            match rtype {
                RecordType::Full => {
                    return Ok(Some(self.buffer[HEADER_SIZE..payload_end].to_vec()));
                }
                RecordType::First => {
                    self.scratch.clear();
                    self.scratch
                        .extend_from_slice(&self.buffer[HEADER_SIZE..payload_end]);
                    in_fragmented_record = true;
                }
                RecordType::Middle => {
                    if in_fragmented_record {
                        self.scratch
                            .extend_from_slice(&self.buffer[HEADER_SIZE..payload_end]);
                    } else {
                        tracing::warn!(cursor = self.cursor, "dropping middle fragment with no first");
                    }
                }
                RecordType::Last => {
                    if in_fragmented_record {
                        self.scratch
                            .extend_from_slice(&self.buffer[HEADER_SIZE..payload_end]);
                        return Ok(Some(std::mem::take(&mut self.scratch)));
                    }
                    tracing::warn!(cursor = self.cursor, "dropping last fragment with no first");
                }
                RecordType::Invalid => unreachable!(),
            }
        }
        Ok(None)
    }
}

impl<L: ZoneLog> Iterator for CommitReader<'_, L> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Record reader over an in-memory byte string instead of the device.
///
/// Semantics match [`CommitReader`] except the cursor is a byte offset and
/// each record steps a whole multiple of the LBA size, mirroring the
/// on-disk layout.
pub struct MemCommitReader<'d> {
    data: &'d [u8],
    lba_size: usize,
    cursor: usize,
}

impl<'d> MemCommitReader<'d> {
    pub fn new(data: &'d [u8], lba_size: u64) -> Self {
        Self {
            data,
            lba_size: lba_size as usize,
            cursor: 0,
        }
    }

    pub fn next_record(&mut self) -> Option<Vec<u8>> {
        if self.cursor >= self.data.len() {
            return None;
        }
        let mut scratch = Vec::new();
        let mut in_fragmented_record = false;

        while self.cursor < self.data.len() {
            let to_read = (self.data.len() - self.cursor).min(self.lba_size);
            if to_read < HEADER_SIZE {
                return None;
            }
            let header = &self.data[self.cursor..];
            let (stored_crc, length, mut rtype) = parse_header(header);
            if HEADER_SIZE + length as usize > to_read {
                rtype = RecordType::Invalid;
            }
            if rtype != RecordType::Invalid {
                let actual = raw_crc(&header[7..HEADER_SIZE + length as usize]);
                if actual != unmask_crc(stored_crc) {
                    tracing::error!(length, cursor = self.cursor, "corrupt crc in memory commit");
                    rtype = RecordType::Invalid;
                }
            }

            self.cursor +=
                (length as usize + HEADER_SIZE).div_ceil(self.lba_size) * self.lba_size;

            if rtype == RecordType::Invalid {
                return None;
            }
            let payload = &header[HEADER_SIZE..HEADER_SIZE + length as usize];
            match rtype {
                RecordType::Full => return Some(payload.to_vec()),
                RecordType::First => {
                    scratch.clear();
                    scratch.extend_from_slice(payload);
                    in_fragmented_record = true;
                }
                RecordType::Middle => {
                    if in_fragmented_record {
                        scratch.extend_from_slice(payload);
                    } else {
                        tracing::warn!(cursor = self.cursor, "dropping middle fragment with no first");
                    }
                }
                RecordType::Last => {
                    if in_fragmented_record {
                        scratch.extend_from_slice(payload);
                        return Some(scratch);
                    }
                    tracing::warn!(cursor = self.cursor, "dropping last fragment with no first");
                }
                RecordType::Invalid => unreachable!(),
            }
        }
        None
    }
}

impl Iterator for MemCommitReader<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, MemZoneLog};

    fn make_log(lba_size: u64, zone_cap: u64, zones: u64) -> MemZoneLog {
        let info = DeviceInfo::new(lba_size, zone_cap, 64 * 1024, 128 * 1024)
            .expect("valid device info");
        MemZoneLog::new(info, 0, zones).expect("failed to create log")
    }

    #[test]
    fn test_space_needed_is_lba_aligned() {
        let log = make_log(4096, 64, 8);
        let committer = Committer::new(&log, 1, false);
        for n in [0u64, 1, 100, 4087, 4088, 4089, 12345, 100_000] {
            let needed = committer.space_needed(n);
            assert_eq!(needed % 4096, 0, "space_needed({n}) not LBA aligned");
            assert!(needed >= n + HEADER_SIZE as u64);
        }
    }

    #[test]
    fn test_space_needed_boundaries() {
        let log = make_log(4096, 64, 8);
        let committer = Committer::new(&log, 1, false);
        assert_eq!(committer.space_needed(0), 4096);
        assert_eq!(committer.space_needed(4088), 4096);
        assert_eq!(committer.space_needed(4089), 8192);
    }

    #[test]
    fn test_commit_roundtrip_single() {
        let log = make_log(4096, 64, 8);
        let mut committer = Committer::new(&log, 2, false);
        let payload = b"the quick brown fox".to_vec();

        let lbas = committer.commit(&payload).expect("commit failed");
        assert_eq!(lbas, 1);

        let reader = committer.reader(0, 0, log.write_head()).expect("reader failed");
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("read failed");
        assert_eq!(records, vec![payload]);
    }

    #[test]
    fn test_commit_roundtrip_sequential() {
        let log = make_log(4096, 64, 8);
        let mut committer = Committer::new(&log, 2, true);
        let p1 = vec![1u8; 300];
        let p2 = vec![2u8; 5000];

        committer.commit(&p1).expect("commit failed");
        committer.commit(&p2).expect("commit failed");

        let reader = committer.reader(0, 0, log.write_head()).expect("reader failed");
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("read failed");
        assert_eq!(records, vec![p1, p2]);
    }

    #[test]
    fn test_multi_length_roundtrip() {
        // Commit payloads of assorted lengths and read them back in order.
        let log = make_log(4096, 64, 16);
        let mut committer = Committer::new(&log, 2, false);
        let payloads: Vec<Vec<u8>> = [1usize, 100, 4088, 4089, 12345]
            .iter()
            .enumerate()
            .map(|(i, &n)| vec![i as u8 + 1; n])
            .collect();

        for p in &payloads {
            committer.safe_commit(p).expect("commit failed");
        }

        let reader = committer.reader(1, 0, log.write_head()).expect("reader failed");
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("read failed");
        assert_eq!(records, payloads);
    }

    #[test]
    fn test_fragmented_record_types() {
        // 1500 bytes over 512-byte LBAs: fragments of 504, 504, 492.
        let log = make_log(512, 64, 8);
        let committer = Committer::new(&log, 1, false);
        let payload = vec![7u8; 1500];
        let encoded = committer.commit_to_memory(&payload).expect("encode failed");
        assert_eq!(encoded.len(), committer.space_needed(1500) as usize);

        let types: Vec<_> = (0..3)
            .map(|i| parse_header(&encoded[i * 512..]).2)
            .collect();
        assert_eq!(
            types,
            vec![RecordType::First, RecordType::Middle, RecordType::Last]
        );

        let mut reader = MemCommitReader::new(&encoded, 512);
        assert_eq!(reader.next_record(), Some(payload));
        assert_eq!(reader.next_record(), None);
    }

    #[test]
    fn test_fragmented_roundtrip_on_device() {
        let log = make_log(512, 64, 8);
        let mut committer = Committer::new(&log, 1, false);
        let payload: Vec<u8> = (0..1500u32).map(|i| (i % 251) as u8).collect();

        committer.commit(&payload).expect("commit failed");

        let reader = committer.reader(0, 0, log.write_head()).expect("reader failed");
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("read failed");
        assert_eq!(records, vec![payload]);
    }

    #[test]
    fn test_empty_payload() {
        let log = make_log(4096, 64, 8);
        let committer = Committer::new(&log, 1, false);
        let encoded = committer.commit_to_memory(&[]).expect("encode failed");
        assert_eq!(encoded.len(), 4096);

        let (_, length, rtype) = parse_header(&encoded);
        assert_eq!(length, 0);
        assert_eq!(rtype, RecordType::Full);

        let mut reader = MemCommitReader::new(&encoded, 4096);
        assert_eq!(reader.next_record(), Some(Vec::new()));
        assert_eq!(reader.next_record(), None);
    }

    #[test]
    fn test_safe_commit_no_space() {
        let log = make_log(512, 4, 2);
        let mut committer = Committer::new(&log, 1, false);
        // Eight LBAs total; this payload needs more.
        let payload = vec![9u8; 8 * 512];
        assert_eq!(committer.safe_commit(&payload), Err(Error::NoSpace));
        assert_eq!(log.write_head(), 0);
    }

    #[test]
    fn test_corrupt_middle_stops_iteration() {
        // Corrupting the middle fragment of a run must terminate the
        // reader before anything is emitted.
        let log = make_log(512, 64, 8);
        let mut committer = Committer::new(&log, 1, false);
        let payload = vec![8u8; 1500];
        committer.commit(&payload).expect("commit failed");

        // Flip a payload byte inside the Middle record (second LBA).
        let mut lba = vec![0u8; 512];
        log.read(1, &mut lba, 0).expect("read failed");
        lba[100] ^= 0xff;
        log.corrupt(1, &lba);

        let reader = committer.reader(0, 0, log.write_head()).expect("reader failed");
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("read failed");
        assert!(records.is_empty());
    }

    #[test]
    fn test_bit_flips_never_yield_wrong_payload() {
        let log = make_log(512, 64, 8);
        let committer = Committer::new(&log, 1, false);
        let payload: Vec<u8> = (0..100u8).collect();
        let encoded = committer.commit_to_memory(&payload).expect("encode failed");

        for pos in 0..HEADER_SIZE + payload.len() {
            let mut corrupted = encoded.clone();
            corrupted[pos] ^= 0x01;
            let records: Vec<_> = MemCommitReader::new(&corrupted, 512).collect();
            assert!(
                records.is_empty(),
                "flip at byte {pos} produced {records:?}"
            );
        }
    }

    #[test]
    fn test_max_fragment_length() {
        // A 16MB LBA carries the largest fragment the 24-bit length field
        // can describe in one record.
        let lba_size: u64 = 1 << 24;
        let info = DeviceInfo::new(lba_size, 1, 0, 0).expect("valid device info");
        let log = MemZoneLog::new(info, 0, 1).expect("failed to create log");
        let committer = Committer::new(&log, 1, false);

        let payload = vec![0x5A; (lba_size - HEADER_SIZE as u64) as usize];
        let encoded = committer.commit_to_memory(&payload).expect("encode failed");
        assert_eq!(encoded.len() as u64, lba_size);

        let (_, length, rtype) = parse_header(&encoded);
        assert_eq!(u64::from(length), lba_size - HEADER_SIZE as u64);
        assert_eq!(rtype, RecordType::Full);

        let mut reader = MemCommitReader::new(&encoded, lba_size);
        assert_eq!(reader.next_record(), Some(payload));
        assert_eq!(reader.next_record(), None);
    }

    #[test]
    fn test_reader_validation() {
        let log = make_log(4096, 64, 8);
        let committer = Committer::new(&log, 2, false);
        assert!(matches!(
            committer.reader(0, 5, 5),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            committer.reader(2, 0, 5),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zeroed_tail_ends_iteration() {
        // Reading past the last record into zeroed LBAs terminates cleanly.
        let log = make_log(4096, 64, 8);
        let mut committer = Committer::new(&log, 1, false);
        let payload = vec![3u8; 100];
        committer.commit(&payload).expect("commit failed");

        let reader = committer.reader(0, 0, 4).expect("reader failed");
        let records: Vec<_> = reader.collect::<Result<Vec<_>>>().expect("read failed");
        assert_eq!(records, vec![payload]);
    }
}
