//! Raw, still-packed records as they come out of a container.
//!
//! A BAM record body (everything after the `block_size` prefix) is laid out as:
//!
//! | field          | bytes               |
//! |----------------|---------------------|
//! | refID          | 4 (`i32`)           |
//! | pos            | 4 (`i32`, 0-based)  |
//! | l_read_name    | 1                   |
//! | mapq           | 1                   |
//! | bin            | 2                   |
//! | n_cigar_op     | 2                   |
//! | flag           | 2                   |
//! | l_seq          | 4                   |
//! | next_refID     | 4                   |
//! | next_pos       | 4                   |
//! | tlen           | 4                   |
//! | read_name      | `l_read_name` (NUL-terminated) |
//! | cigar          | `n_cigar_op * 4`    |
//! | seq            | `(l_seq + 1) / 2`   |
//! | qual           | `l_seq`             |
//! | tags           | remainder           |

use crate::decode;
use crate::{Error, Result};
use bytes::{Buf, BufMut};
use std::io::{self, Read};

const FIXED_LEN: usize = 32;

/// A binary alignment record with every field still in its stored encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRecord {
    pub ref_id: i32,
    pub pos: i32,
    pub mapq: u8,
    pub bin: u16,
    pub flag: u16,
    pub next_ref_id: i32,
    pub next_pos: i32,
    pub tlen: i32,
    /// Read name without its NUL terminator
    pub name: Vec<u8>,
    pub cigar: Vec<u32>,
    /// Two bases per byte, high nibble first
    pub seq: Vec<u8>,
    pub seq_len: usize,
    pub qual: Vec<u8>,
    pub tags: Vec<u8>,
}

impl Default for PackedRecord {
    fn default() -> Self {
        Self {
            ref_id: -1,
            pos: -1,
            mapq: 255,
            bin: 4680,
            flag: 0x4,
            next_ref_id: -1,
            next_pos: -1,
            tlen: 0,
            name: Vec::new(),
            cigar: Vec::new(),
            seq: Vec::new(),
            seq_len: 0,
            qual: Vec::new(),
            tags: Vec::new(),
        }
    }
}

impl PackedRecord {
    /// Parse a record body (without the `block_size` prefix).
    pub fn from_bytes(mut src: &[u8]) -> Result<Self> {
        if src.len() < FIXED_LEN {
            return Err(Error::Decode(format!(
                "record body is {} bytes, shorter than the {} byte fixed section",
                src.len(),
                FIXED_LEN
            )));
        }

        let ref_id = src.get_i32_le();
        let pos = src.get_i32_le();
        let l_read_name = usize::from(src.get_u8());
        let mapq = src.get_u8();
        let bin = src.get_u16_le();
        let n_cigar_op = usize::from(src.get_u16_le());
        let flag = src.get_u16_le();
        let seq_len = src.get_u32_le() as usize;
        let next_ref_id = src.get_i32_le();
        let next_pos = src.get_i32_le();
        let tlen = src.get_i32_le();

        let needed = l_read_name + n_cigar_op * 4 + seq_len.div_ceil(2) + seq_len;
        if src.remaining() < needed {
            return Err(Error::Decode(format!(
                "record truncated: variable section needs {} bytes, {} remain",
                needed,
                src.remaining()
            )));
        }

        let mut name = src[..l_read_name].to_vec();
        src.advance(l_read_name);
        if name.last() == Some(&0) {
            name.pop();
        }

        let mut cigar = Vec::with_capacity(n_cigar_op);
        for _ in 0..n_cigar_op {
            cigar.push(src.get_u32_le());
        }

        let seq = src[..seq_len.div_ceil(2)].to_vec();
        src.advance(seq.len());

        let qual = src[..seq_len].to_vec();
        src.advance(seq_len);

        let tags = src.to_vec();

        Ok(Self {
            ref_id,
            pos,
            mapq,
            bin,
            flag,
            next_ref_id,
            next_pos,
            tlen,
            name,
            cigar,
            seq,
            seq_len,
            qual,
            tags,
        })
    }

    /// `seq` must hold `seq_len` 4-bit codes and `qual` one score per base.
    pub fn check_sequence_lengths(&self) -> Result<()> {
        if self.qual.len() != self.seq_len || self.seq.len() != self.seq_len.div_ceil(2) {
            return Err(Error::InvalidRecord(format!(
                "sequence of {} bases has {} packed bytes and {} qualities",
                self.seq_len,
                self.seq.len(),
                self.qual.len()
            )));
        }
        Ok(())
    }

    /// Append the `block_size`-prefixed record to `dst`.
    pub fn write_to(&self, dst: &mut Vec<u8>) -> Result<()> {
        if self.name.len() > 254 {
            return Err(Error::InvalidRecord(format!(
                "read name is {} bytes, at most 254 fit",
                self.name.len()
            )));
        }
        let n_cigar_op = u16::try_from(self.cigar.len()).map_err(|_| {
            Error::InvalidRecord(format!("{} CIGAR operations do not fit", self.cigar.len()))
        })?;
        self.check_sequence_lengths()?;

        let block_size = FIXED_LEN
            + self.name.len()
            + 1
            + self.cigar.len() * 4
            + self.seq.len()
            + self.qual.len()
            + self.tags.len();

        dst.reserve(block_size + 4);
        dst.put_u32_le(block_size as u32);
        dst.put_i32_le(self.ref_id);
        dst.put_i32_le(self.pos);
        dst.put_u8((self.name.len() + 1) as u8);
        dst.put_u8(self.mapq);
        dst.put_u16_le(self.bin);
        dst.put_u16_le(n_cigar_op);
        dst.put_u16_le(self.flag);
        dst.put_u32_le(self.seq_len as u32);
        dst.put_i32_le(self.next_ref_id);
        dst.put_i32_le(self.next_pos);
        dst.put_i32_le(self.tlen);
        dst.put_slice(&self.name);
        dst.put_u8(0);
        for word in &self.cigar {
            dst.put_u32_le(*word);
        }
        dst.put_slice(&self.seq);
        dst.put_slice(&self.qual);
        dst.put_slice(&self.tags);

        Ok(())
    }

    pub fn reference_sequence_id(&self) -> Option<usize> {
        usize::try_from(self.ref_id).ok()
    }

    /// 1-based leftmost mapping position
    pub fn alignment_start(&self) -> Option<u64> {
        u64::try_from(self.pos).ok().map(|p| p + 1)
    }

    /// 1-based inclusive end; a record without reference-consuming
    /// operations covers one base.
    pub fn alignment_end(&self) -> Option<u64> {
        let start = self.alignment_start()?;
        let span = decode::reference_len(&self.cigar).max(1);
        Some(start + span - 1)
    }
}

/// Read one `block_size`-prefixed record; `Ok(None)` on a clean end of stream.
pub fn read_record<R: Read>(reader: &mut R) -> Result<Option<PackedRecord>> {
    let mut block_size_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < block_size_bytes.len() {
        match reader.read(&mut block_size_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Decode(
                    "stream ended inside a record length prefix".to_string(),
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }

    let block_size = u32::from_le_bytes(block_size_bytes) as usize;
    let mut buf = vec![0u8; block_size];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::Decode(format!(
            "stream ended inside a record of {} bytes",
            block_size
        )),
        _ => Error::Io(e),
    })?;

    PackedRecord::from_bytes(&buf).map(Some)
}

/// A record fetched from a container, before decoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    /// Binary alignment record
    Packed(PackedRecord),
    /// One data line of a line-oriented file, without its line terminator
    Line(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PackedRecord {
        PackedRecord {
            ref_id: 1,
            pos: 99,
            mapq: 60,
            bin: decode::reg2bin(99, 109),
            flag: 0,
            name: b"read1".to_vec(),
            // 5M2I3M in the low-nibble op layout
            cigar: vec![5 << 4, (2 << 4) | 1, 3 << 4],
            seq: vec![0x12, 0x48, 0x12, 0x48, 0x12],
            seq_len: 10,
            qual: vec![30; 10],
            ..PackedRecord::default()
        }
    }

    #[test]
    fn test_write_then_parse_preserves_fields() {
        let record = sample();
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();

        let block_size = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
        assert_eq!(block_size, buf.len() - 4);

        let parsed = PackedRecord::from_bytes(&buf[4..]).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_read_record_stops_cleanly_at_eof() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        let mut reader = &buf[..];

        assert!(read_record(&mut reader).unwrap().is_some());
        assert!(read_record(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_truncated_record_is_decode_error() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 6);

        let err = read_record(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);

        let err = PackedRecord::from_bytes(&[0u8; 10]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Decode);
    }

    #[test]
    fn test_alignment_span_uses_reference_consuming_ops() {
        let record = sample();
        assert_eq!(record.reference_sequence_id(), Some(1));
        assert_eq!(record.alignment_start(), Some(100));
        // 5M + 3M consume the reference, 2I does not
        assert_eq!(record.alignment_end(), Some(107));

        let unmapped = PackedRecord::default();
        assert_eq!(unmapped.reference_sequence_id(), None);
        assert_eq!(unmapped.alignment_end(), None);
    }
}
