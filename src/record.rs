use serde::Serialize;
use std::fmt;

/// One textual CIGAR operation, e.g. `5M`.
///
/// `op` is one of `MIDNSHP=X`, or `*` for an operation code the decoder did
/// not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CigarOp {
    pub op: char,
    pub len: u32,
}

impl CigarOp {
    pub fn new(op: char, len: u32) -> Self {
        Self { op, len }
    }

    /// M, I, S, = and X consume query bases
    pub fn consumes_query(&self) -> bool {
        matches!(self.op, 'M' | 'I' | 'S' | '=' | 'X')
    }

    /// M, D, N, = and X consume reference bases
    pub fn consumes_reference(&self) -> bool {
        matches!(self.op, 'M' | 'D' | 'N' | '=' | 'X')
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.len, self.op)
    }
}

/// Name and bases of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceRecord {
    pub name: String,
    pub sequence: String,
}

/// A fully decoded alignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlignmentRecord {
    pub name: String,
    pub flags: u16,
    pub reference_sequence_id: Option<usize>,
    /// 1-based
    pub position: Option<u64>,
    pub mapping_quality: Option<u8>,
    pub cigar: Vec<CigarOp>,
    pub mate_reference_sequence_id: Option<usize>,
    pub mate_position: Option<u64>,
    pub template_length: i32,
    pub sequence: String,
    /// Phred+33; `None` when the record stores no qualities
    pub quality: Option<String>,
    #[serde(skip)]
    pub tags: Vec<u8>,
}

impl AlignmentRecord {
    pub fn cigar_string(&self) -> String {
        if self.cigar.is_empty() {
            return "*".to_string();
        }
        self.cigar.iter().map(|op| op.to_string()).collect()
    }

    /// Bases of the read the CIGAR accounts for (hard clips excluded)
    pub fn query_len(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|op| op.consumes_query())
            .map(|op| u64::from(op.len))
            .sum()
    }

    pub fn reference_len(&self) -> u64 {
        self.cigar
            .iter()
            .filter(|op| op.consumes_reference())
            .map(|op| u64::from(op.len))
            .sum()
    }
}

/// A data line of a tabix-indexed text file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextRecord {
    pub contig: String,
    /// 1-based
    pub position: Option<u64>,
    pub line: String,
}

impl TextRecord {
    /// Split the leading `contig<TAB>pos` columns off a line.
    pub fn parse(line: String) -> Self {
        let mut fields = line.splitn(3, '\t');
        let contig = fields.next().unwrap_or_default().to_string();
        let position = fields.next().and_then(|p| p.trim().parse().ok());
        Self {
            contig,
            position,
            line,
        }
    }
}

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Record {
    Sequence(SequenceRecord),
    Alignment(AlignmentRecord),
    Text(TextRecord),
}

impl Record {
    pub fn name(&self) -> &str {
        match self {
            Record::Sequence(r) => &r.name,
            Record::Alignment(r) => &r.name,
            Record::Text(r) => &r.contig,
        }
    }

    pub fn as_alignment(&self) -> Option<&AlignmentRecord> {
        match self {
            Record::Alignment(r) => Some(r),
            _ => None,
        }
    }
}
