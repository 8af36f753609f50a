//! Conversion between packed binary record fields and their text forms.
//!
//! # Encodings
//!
//! - Bases: 4-bit codes, two per byte, high nibble first, looked up in
//!   `=ACMGRSVTWYHKDBN`.
//! - Qualities: raw Phred scores, printed as Phred+33.
//! - CIGAR: one little-endian `u32` per operation; the operation code is in
//!   the low 4 bits (`word & 0xF`) and the run length in the upper 28 bits
//!   (`word >> 4`). Codes 9..=15 are not assigned and decode to `*`.
//!
//! Decoding never fails on field contents: unknown operation codes turn into
//! the `*` sentinel so a single odd record does not stop a stream.

use crate::packed::{PackedRecord, RawRecord};
use crate::record::{AlignmentRecord, CigarOp, Record, SequenceRecord, TextRecord};
use crate::types::RecordKind;
use crate::{Error, Result};

pub const BASES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

pub const CIGAR_OPS: &[u8; 16] = b"MIDNSHP=X*******";

/// Stored quality byte meaning "no quality recorded"
pub const MISSING_QUALITY: u8 = 0xFF;

/// Highest raw score that still prints as ASCII (`93 + 33 == '~'`)
pub const MAX_PRINTABLE_QUALITY: u8 = 93;

/// Decode one 4-bit base code.
///
/// Codes come from a nibble so they are always below 16.
#[inline]
pub fn decode_base(code: u8) -> char {
    debug_assert!(code < 16, "base code {} is wider than 4 bits", code);
    char::from(BASES[usize::from(code & 0x0F)])
}

/// Phred+33 character for a raw score.
///
/// `raw` must be at most [`MAX_PRINTABLE_QUALITY`]; larger values are not
/// checked and produce non-printable characters.
#[inline]
pub fn decode_quality(raw: u8) -> char {
    char::from(raw.wrapping_add(33))
}

#[inline]
pub fn decode_cigar_op(word: u32) -> CigarOp {
    let op = CIGAR_OPS[(word & 0x0F) as usize];
    CigarOp::new(char::from(op), word >> 4)
}

/// Decoding stops early if `packed` holds fewer than `len` codes.
pub fn decode_sequence(packed: &[u8], len: usize) -> String {
    let mut sequence = String::with_capacity(len);
    for i in 0..len {
        let Some(&byte) = packed.get(i / 2) else { break };
        let code = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
        sequence.push(decode_base(code));
    }
    sequence
}

/// Decode raw qualities; a record whose qualities are all `0xFF` has none.
pub fn decode_qualities(raw: &[u8]) -> Option<String> {
    if !raw.is_empty() && raw.iter().all(|&q| q == MISSING_QUALITY) {
        return None;
    }
    Some(raw.iter().map(|&q| decode_quality(q)).collect())
}

pub fn decode_cigar(words: &[u32]) -> Vec<CigarOp> {
    words.iter().map(|&word| decode_cigar_op(word)).collect()
}

/// Sum of the query-consuming run lengths of packed CIGAR words
pub fn query_len(words: &[u32]) -> u64 {
    words
        .iter()
        .map(|&word| decode_cigar_op(word))
        .filter(CigarOp::consumes_query)
        .map(|op| u64::from(op.len))
        .sum()
}

pub fn reference_len(words: &[u32]) -> u64 {
    words
        .iter()
        .map(|&word| decode_cigar_op(word))
        .filter(CigarOp::consumes_reference)
        .map(|op| u64::from(op.len))
        .sum()
}

fn decode_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Decode a raw record into the variant selected by `kind`.
///
/// Lines of text files always decode to [`Record::Text`].
pub fn decode(raw: RawRecord, kind: RecordKind) -> Record {
    match raw {
        RawRecord::Line(line) => Record::Text(TextRecord::parse(line)),
        RawRecord::Packed(packed) => match kind {
            RecordKind::Sequence => Record::Sequence(decode_sequence_record(&packed)),
            RecordKind::Alignment => Record::Alignment(decode_alignment_record(packed)),
        },
    }
}

pub fn decode_sequence_record(packed: &PackedRecord) -> SequenceRecord {
    SequenceRecord {
        name: decode_name(&packed.name),
        sequence: decode_sequence(&packed.seq, packed.seq_len),
    }
}

pub fn decode_alignment_record(packed: PackedRecord) -> AlignmentRecord {
    AlignmentRecord {
        name: decode_name(&packed.name),
        flags: packed.flag,
        reference_sequence_id: packed.reference_sequence_id(),
        position: packed.alignment_start(),
        mapping_quality: (packed.mapq != 255).then_some(packed.mapq),
        cigar: decode_cigar(&packed.cigar),
        mate_reference_sequence_id: usize::try_from(packed.next_ref_id).ok(),
        mate_position: u64::try_from(packed.next_pos).ok().map(|p| p + 1),
        template_length: packed.tlen,
        sequence: decode_sequence(&packed.seq, packed.seq_len),
        quality: decode_qualities(&packed.qual),
        tags: packed.tags,
    }
}

/// 4-bit code for an IUPAC character; anything unknown becomes `N`.
pub fn encode_base(base: char) -> u8 {
    let upper = base.to_ascii_uppercase();
    BASES
        .iter()
        .position(|&b| char::from(b) == upper)
        .map(|code| code as u8)
        .unwrap_or(15)
}

pub fn encode_sequence(sequence: &str) -> Vec<u8> {
    let codes: Vec<u8> = sequence.chars().map(encode_base).collect();
    codes
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

pub fn encode_cigar_op(op: &CigarOp) -> Result<u32> {
    let code = CIGAR_OPS[..9]
        .iter()
        .position(|&b| char::from(b) == op.op)
        .ok_or_else(|| Error::InvalidRecord(format!("unknown CIGAR operation '{}'", op.op)))?;
    if op.len >= 1 << 28 {
        return Err(Error::InvalidRecord(format!(
            "CIGAR run of {} does not fit in 28 bits",
            op.len
        )));
    }
    Ok((op.len << 4) | code as u32)
}

fn encode_qualities(quality: Option<&str>, len: usize) -> Result<Vec<u8>> {
    let Some(quality) = quality else {
        return Ok(vec![MISSING_QUALITY; len]);
    };
    if quality.len() != len {
        return Err(Error::InvalidRecord(format!(
            "{} quality characters for {} bases",
            quality.len(),
            len
        )));
    }
    quality
        .bytes()
        .map(|c| {
            c.checked_sub(33)
                .ok_or_else(|| Error::InvalidRecord(format!("quality character {:?} below '!'", c as char)))
        })
        .collect()
}

fn encode_id(id: Option<usize>) -> Result<i32> {
    match id {
        Some(id) => i32::try_from(id)
            .map_err(|_| Error::InvalidRecord(format!("reference id {} out of range", id))),
        None => Ok(-1),
    }
}

fn encode_position(position: Option<u64>) -> Result<i32> {
    match position {
        Some(0) => Err(Error::InvalidRecord("positions are 1-based".to_string())),
        Some(p) => i32::try_from(p - 1)
            .map_err(|_| Error::InvalidRecord(format!("position {} out of range", p))),
        None => Ok(-1),
    }
}

pub fn encode_alignment(record: &AlignmentRecord) -> Result<PackedRecord> {
    let cigar = record
        .cigar
        .iter()
        .map(encode_cigar_op)
        .collect::<Result<Vec<_>>>()?;
    let seq_len = record.sequence.chars().count();
    let pos = encode_position(record.position)?;
    let span = reference_len(&cigar).max(1) as i32;

    Ok(PackedRecord {
        ref_id: encode_id(record.reference_sequence_id)?,
        pos,
        mapq: record.mapping_quality.unwrap_or(255),
        bin: reg2bin(pos, pos.saturating_add(span)),
        flag: record.flags,
        next_ref_id: encode_id(record.mate_reference_sequence_id)?,
        next_pos: encode_position(record.mate_position)?,
        tlen: record.template_length,
        name: record.name.as_bytes().to_vec(),
        cigar,
        seq: encode_sequence(&record.sequence),
        seq_len,
        qual: encode_qualities(record.quality.as_deref(), seq_len)?,
        tags: record.tags.clone(),
    })
}

/// An unmapped record carrying only a name and bases
pub fn encode_sequence_record(record: &SequenceRecord) -> PackedRecord {
    let seq_len = record.sequence.chars().count();
    PackedRecord {
        name: record.name.as_bytes().to_vec(),
        seq: encode_sequence(&record.sequence),
        seq_len,
        qual: vec![MISSING_QUALITY; seq_len],
        ..PackedRecord::default()
    }
}

/// Turn a decoded record back into what a container stores.
pub fn encode(record: &Record) -> Result<RawRecord> {
    match record {
        Record::Alignment(r) => encode_alignment(r).map(RawRecord::Packed),
        Record::Sequence(r) => Ok(RawRecord::Packed(encode_sequence_record(r))),
        Record::Text(r) => Ok(RawRecord::Line(r.line.clone())),
    }
}

/// Smallest bin of the BAI binning scheme containing the 0-based,
/// half-open interval `[beg, end)`.
pub fn reg2bin(beg: i32, end: i32) -> u16 {
    if beg < 0 {
        return 4680;
    }
    let (beg, end) = (beg as u32, (end.max(beg + 1) - 1) as u32);
    if beg >> 14 == end >> 14 {
        return (((1 << 15) - 1) / 7 + (beg >> 14)) as u16;
    }
    if beg >> 17 == end >> 17 {
        return (((1 << 12) - 1) / 7 + (beg >> 17)) as u16;
    }
    if beg >> 20 == end >> 20 {
        return (((1 << 9) - 1) / 7 + (beg >> 20)) as u16;
    }
    if beg >> 23 == end >> 23 {
        return (((1 << 6) - 1) / 7 + (beg >> 23)) as u16;
    }
    if beg >> 26 == end >> 26 {
        return (((1 << 3) - 1) / 7 + (beg >> 26)) as u16;
    }
    0
}
