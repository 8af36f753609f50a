use super::Container;
use super::vcf::variant_locus;
use crate::header::Header;
use crate::packed::RawRecord;
use crate::types::{Mode, Region};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Minimum shift used when the caller does not pick one
pub const DEFAULT_MIN_SHIFT: u8 = 14;

/// Largest minimum shift accepted; positions are 32-bit
pub const MAX_MIN_SHIFT: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Locus {
    contig: usize,
    start: u64,
    end: u64,
}

struct Entry {
    locus: Option<Locus>,
    record: RawRecord,
}

/// One bin of a [`MemoryIndex`]: the span of the records it covers and the
/// offset of the first of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub start: u64,
    pub end: u64,
    pub offset: usize,
}

/// Contig name to sorted `(interval, offset)` entries
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    pub min_shift: u8,
    pub contigs: Vec<(String, Vec<IndexEntry>)>,
}

pub struct MemoryQuery {
    contig: usize,
    region: Region,
    next: usize,
    done: bool,
}

/// Records held in memory, in file order.
///
/// Records are placed by their own locus: binary records by reference id and
/// alignment span, text lines by their contig and position columns. Records
/// without a locus are returned by sequential reads but never indexed.
pub struct MemoryContainer {
    mode: Mode,
    header: Option<Header>,
    contigs: Vec<String>,
    entries: Vec<Entry>,
    position: usize,
    indexes: HashMap<PathBuf, MemoryIndex>,
}

impl MemoryContainer {
    /// An empty container in read mode over the given contigs
    pub fn new<I, S>(contigs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let contigs: Vec<String> = contigs.into_iter().map(Into::into).collect();

        Self {
            mode: Mode::Read,
            header: Some(Header::with_contigs(contigs.clone())),
            contigs,
            entries: Vec::new(),
            position: 0,
            indexes: HashMap::new(),
        }
    }

    /// An empty container in write mode; contigs come from the header written to it
    pub fn writer() -> Self {
        Self {
            mode: Mode::Write,
            header: None,
            ..Self::new(Vec::<String>::new())
        }
    }

    /// Switch a written container to read mode, rewound to the first record
    pub fn into_reader(mut self) -> Self {
        self.mode = Mode::Read;
        self.position = 0;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a record at the end of the file
    pub fn push(&mut self, record: RawRecord) -> Result<()> {
        if let RawRecord::Packed(packed) = &record {
            packed.check_sequence_lengths()?;
        }

        let locus = match &record {
            RawRecord::Packed(packed) => match packed.reference_sequence_id() {
                Some(id) if id >= self.contigs.len() => {
                    return Err(Error::InvalidRecord(format!(
                        "reference id {} is not among the {} contigs",
                        id,
                        self.contigs.len()
                    )));
                }
                Some(id) => packed
                    .alignment_start()
                    .zip(packed.alignment_end())
                    .map(|(start, end)| Locus {
                        contig: id,
                        start,
                        end,
                    }),
                None => None,
            },
            RawRecord::Line(line) => self
                .header
                .as_ref()
                .and_then(Header::as_vcf)
                .and_then(|header| variant_locus(line, header))
                .and_then(|(name, start, end)| {
                    let contig = self.contigs.iter().position(|c| *c == name)?;
                    Some(Locus { contig, start, end })
                }),
        };

        self.entries.push(Entry { locus, record });
        Ok(())
    }

    fn build(&self, min_shift: u8) -> Result<MemoryIndex> {
        let mut contigs: Vec<(String, Vec<IndexEntry>)> = self
            .contigs
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        let mut last: Option<(usize, u64)> = None;

        for (offset, entry) in self.entries.iter().enumerate() {
            let Some(locus) = entry.locus else { continue };

            if last.is_some_and(|previous| (locus.contig, locus.start) < previous) {
                return Err(Error::IndexBuild {
                    path: PathBuf::from("<memory>"),
                    reason: format!("records are not coordinate-sorted at offset {}", offset),
                });
            }
            last = Some((locus.contig, locus.start));

            let bins = &mut contigs[locus.contig].1;
            match bins.last_mut() {
                Some(bin) if bin.start >> min_shift == locus.start >> min_shift => {
                    bin.end = bin.end.max(locus.end);
                }
                _ => bins.push(IndexEntry {
                    start: locus.start,
                    end: locus.end,
                    offset,
                }),
            }
        }

        Ok(MemoryIndex { min_shift, contigs })
    }
}

impl Container for MemoryContainer {
    type Index = MemoryIndex;
    type Query = MemoryQuery;

    const INDEX_EXTENSIONS: &'static [&'static str] = &["idx"];

    fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    fn write_header(&mut self, header: &Header) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(Error::WrongMode(Mode::Write.as_str()));
        }
        self.contigs = header.contig_names();
        self.header = Some(header.clone());
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Option<RawRecord>> {
        if self.mode != Mode::Read {
            return Err(Error::WrongMode(Mode::Read.as_str()));
        }
        let record = self.entries.get(self.position).map(|e| e.record.clone());
        if record.is_some() {
            self.position += 1;
        }
        Ok(record)
    }

    fn write_raw(&mut self, record: &RawRecord) -> Result<()> {
        if self.mode != Mode::Write {
            return Err(Error::WrongMode(Mode::Write.as_str()));
        }
        self.push(record.clone())
    }

    fn locate_index(&self, data_path: &Path) -> Option<PathBuf> {
        self.index_candidates(data_path)
            .into_iter()
            .find(|path| self.indexes.contains_key(path))
    }

    fn load_index(&mut self, index_path: &Path) -> Result<Option<MemoryIndex>> {
        Ok(self.indexes.get(index_path).cloned())
    }

    fn build_index(&mut self, data_path: &Path, min_shift: Option<u8>) -> Result<PathBuf> {
        let min_shift = min_shift.unwrap_or(DEFAULT_MIN_SHIFT);
        if min_shift > MAX_MIN_SHIFT {
            return Err(Error::IndexBuild {
                path: data_path.to_path_buf(),
                reason: format!("min_shift {} exceeds {}", min_shift, MAX_MIN_SHIFT),
            });
        }
        let index = self.build(min_shift).map_err(|e| match e {
            Error::IndexBuild { reason, .. } => Error::IndexBuild {
                path: data_path.to_path_buf(),
                reason,
            },
            other => other,
        })?;

        let dst = PathBuf::from(format!("{}.idx", data_path.display()));
        debug!(index = %dst.display(), min_shift, "built in-memory index");
        self.indexes.insert(dst.clone(), index);
        Ok(dst)
    }

    fn contigs(&self, index: &MemoryIndex) -> Vec<String> {
        index.contigs.iter().map(|(name, _)| name.clone()).collect()
    }

    fn query(&mut self, index: &MemoryIndex, region: &Region) -> Result<MemoryQuery> {
        let (contig, bins) = index
            .contigs
            .iter()
            .enumerate()
            .find(|(_, (name, _))| *name == region.reference_name)
            .map(|(i, (_, bins))| (i, bins))
            .ok_or_else(|| Error::UnknownContig(region.reference_name.clone()))?;

        let first = bins
            .iter()
            .find(|bin| region.overlaps(bin.start, bin.end))
            .map(|bin| bin.offset);

        Ok(MemoryQuery {
            contig,
            region: region.clone(),
            next: first.unwrap_or(0),
            done: first.is_none(),
        })
    }

    fn advance(&mut self, query: &mut MemoryQuery) -> Result<Option<RawRecord>> {
        while !query.done {
            let Some(entry) = self.entries.get(query.next) else {
                query.done = true;
                break;
            };
            query.next += 1;

            let Some(locus) = entry.locus else { continue };
            if locus.contig != query.contig || locus.start > query.region.end_or_max() {
                query.done = true;
                break;
            }
            if query.region.overlaps(locus.start, locus.end) {
                return Ok(Some(entry.record.clone()));
            }
        }
        Ok(None)
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
