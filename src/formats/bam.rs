use super::{Container, OpenContainer, merge_chunks, verify_bgzf};
use crate::header::Header;
use crate::packed::{self, RawRecord};
use crate::types::{Mode, Region};
use crate::{Error, Result};
use noodles::bam;
use noodles::bam::bai;
use noodles::bgzf;
use noodles::bgzf::VirtualPosition;
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi;
use noodles::csi::binning_index::{BinningIndex, Indexer};
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use std::collections::VecDeque;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The BAI binning scheme's fixed minimum shift
pub const BAI_MIN_SHIFT: u8 = 14;

const UNMAPPED: u16 = 0x4;

enum Handle {
    Reader(bam::io::Reader<bgzf::Reader<File>>),
    Writer(bam::io::Writer<bgzf::Writer<File>>),
}

/// A BAM file opened for reading or writing
pub struct BamContainer {
    handle: Handle,
    header: Option<Header>,
    buf: Vec<u8>,
}

/// A loaded BAM index
pub enum BamIndex {
    Bai(bai::Index),
    Csi(csi::Index),
}

impl BamIndex {
    fn query(&self, reference_sequence_id: usize, interval: Interval) -> std::io::Result<Vec<Chunk>> {
        match self {
            BamIndex::Bai(index) => index.query(reference_sequence_id, interval),
            BamIndex::Csi(index) => index.query(reference_sequence_id, interval),
        }
    }
}

/// Chunks still to visit for one region
pub struct BamQuery {
    reference_sequence_id: usize,
    region: Region,
    chunks: VecDeque<(VirtualPosition, VirtualPosition)>,
    chunk_end: Option<VirtualPosition>,
    done: bool,
}

impl BamContainer {
    fn reader_mut(&mut self) -> Result<&mut bam::io::Reader<bgzf::Reader<File>>> {
        match &mut self.handle {
            Handle::Reader(reader) => Ok(reader),
            Handle::Writer(_) => Err(Error::WrongMode(Mode::Read.as_str())),
        }
    }

    fn writer_mut(&mut self) -> Result<&mut bam::io::Writer<bgzf::Writer<File>>> {
        match &mut self.handle {
            Handle::Writer(writer) => Ok(writer),
            Handle::Reader(_) => Err(Error::WrongMode(Mode::Write.as_str())),
        }
    }

    fn reference_sequence_id(&self, name: &str) -> Result<usize> {
        let Some(Header::Alignment(header)) = &self.header else {
            return Err(Error::UnknownContig(name.to_string()));
        };
        header
            .reference_sequences()
            .get_index_of(name.as_bytes())
            .ok_or_else(|| Error::UnknownContig(name.to_string()))
    }
}

/// Scans a BAM file once, recording each record's chunk and alignment span.
fn index_records(path: &Path) -> Result<bai::Index> {
    let file = File::open(path).map_err(|e| Error::open(path, e))?;
    let mut reader = bam::io::Reader::new(file);
    let header = reader.read_header()?;

    let mut indexer = Indexer::default();
    let mut start = reader.get_ref().virtual_position();

    while let Some(record) = packed::read_record(reader.get_mut())? {
        let end = reader.get_ref().virtual_position();

        let context = match (
            record.reference_sequence_id(),
            record.alignment_start(),
            record.alignment_end(),
        ) {
            (Some(id), Some(first), Some(last)) => {
                let first = Position::try_from(first as usize)
                    .map_err(|e| Error::InvalidRecord(format!("invalid alignment start: {}", e)))?;
                let last = Position::try_from(last as usize)
                    .map_err(|e| Error::InvalidRecord(format!("invalid alignment end: {}", e)))?;
                let is_mapped = record.flag & UNMAPPED == 0;
                Some((id, first, last, is_mapped))
            }
            _ => None,
        };

        indexer.add_record(context, Chunk::new(start, end))?;
        start = end;
    }

    Ok(indexer.build(header.reference_sequences().len()))
}

impl OpenContainer for BamContainer {
    fn open(path: &Path, mode: Mode) -> Result<Self> {
        match mode {
            Mode::Read => {
                verify_bgzf(path)?;
                let file = File::open(path).map_err(|e| Error::open(path, e))?;

                // bam::io::Reader::new wraps the file in a BGZF reader internally
                let mut reader = bam::io::Reader::new(file);
                let header = reader
                    .read_header()
                    .map_err(|e| Error::open(path, format!("failed to read BAM header: {}", e)))?;

                debug!(
                    path = %path.display(),
                    contigs = header.reference_sequences().len(),
                    "opened BAM"
                );

                Ok(Self {
                    handle: Handle::Reader(reader),
                    header: Some(Header::Alignment(header)),
                    buf: Vec::new(),
                })
            }
            Mode::Write => {
                let file = File::create(path).map_err(|e| Error::open(path, e))?;
                Ok(Self {
                    handle: Handle::Writer(bam::io::Writer::new(file)),
                    header: None,
                    buf: Vec::new(),
                })
            }
        }
    }
}

impl Container for BamContainer {
    type Index = BamIndex;
    type Query = BamQuery;

    const INDEX_EXTENSIONS: &'static [&'static str] = &["bai", "csi"];

    fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    fn write_header(&mut self, header: &Header) -> Result<()> {
        let sam_header = header.as_sam().ok_or_else(|| {
            Error::InvalidHeader("a VCF header cannot head a BAM file".to_string())
        })?;
        self.writer_mut()?.write_header(sam_header)?;
        self.header = Some(header.clone());
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Option<RawRecord>> {
        let reader = self.reader_mut()?;
        Ok(packed::read_record(reader.get_mut())?.map(RawRecord::Packed))
    }

    fn write_raw(&mut self, record: &RawRecord) -> Result<()> {
        let RawRecord::Packed(record) = record else {
            return Err(Error::InvalidRecord(
                "text lines cannot be written to a BAM file".to_string(),
            ));
        };

        self.buf.clear();
        record.write_to(&mut self.buf)?;
        let Handle::Writer(writer) = &mut self.handle else {
            return Err(Error::WrongMode(Mode::Write.as_str()));
        };
        writer.get_mut().write_all(&self.buf)?;
        Ok(())
    }

    fn load_index(&mut self, index_path: &Path) -> Result<Option<BamIndex>> {
        if !index_path.exists() {
            return Ok(None);
        }

        let is_csi = index_path.extension().is_some_and(|ext| ext == "csi");
        let index = if is_csi {
            csi::read(index_path).map(BamIndex::Csi)
        } else {
            bai::read(index_path).map(BamIndex::Bai)
        }
        .map_err(|e| Error::IndexRead {
            path: index_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Some(index))
    }

    fn build_index(&mut self, data_path: &Path, min_shift: Option<u8>) -> Result<PathBuf> {
        if let Some(shift) = min_shift.filter(|&s| s != BAI_MIN_SHIFT) {
            return Err(Error::IndexBuild {
                path: data_path.to_path_buf(),
                reason: format!(
                    "min_shift {} needs a CSI index; BAM indexing supports only {}",
                    shift, BAI_MIN_SHIFT
                ),
            });
        }

        let build_error = |e: Error| Error::IndexBuild {
            path: data_path.to_path_buf(),
            reason: e.to_string(),
        };

        let index = index_records(data_path).map_err(build_error)?;
        let dst = PathBuf::from(format!("{}.bai", data_path.display()));
        bai::write(&dst, &index).map_err(|e| build_error(e.into()))?;

        info!(index = %dst.display(), "built BAI index");
        Ok(dst)
    }

    fn contigs(&self, _index: &BamIndex) -> Vec<String> {
        self.header
            .as_ref()
            .map(Header::contig_names)
            .unwrap_or_default()
    }

    fn query(&mut self, index: &BamIndex, region: &Region) -> Result<BamQuery> {
        let reference_sequence_id = self.reference_sequence_id(&region.reference_name)?;

        let start = Position::try_from(region.start_or_min() as usize)
            .map_err(|e| Error::InvalidRegion(format!("invalid start position: {}", e)))?;
        let interval = match region.end {
            Some(end) => {
                let end = Position::try_from(end as usize)
                    .map_err(|e| Error::InvalidRegion(format!("invalid end position: {}", e)))?;
                Interval::from(start..=end)
            }
            None => Interval::from(start..),
        };

        let chunks = index
            .query(reference_sequence_id, interval)
            .map_err(|e| Error::InvalidRegion(format!("index query failed for {}: {}", region, e)))?;
        let chunks = merge_chunks(chunks);

        debug!(region = %region, chunks = chunks.len(), "bound BAM query");

        Ok(BamQuery {
            reference_sequence_id,
            region: region.clone(),
            chunks: chunks.into(),
            chunk_end: None,
            done: false,
        })
    }

    fn advance(&mut self, query: &mut BamQuery) -> Result<Option<RawRecord>> {
        let reader = self.reader_mut()?;

        loop {
            if query.done {
                return Ok(None);
            }

            let Some(chunk_end) = query.chunk_end else {
                match query.chunks.pop_front() {
                    Some((start, end)) => {
                        reader.get_mut().seek(start)?;
                        query.chunk_end = Some(end);
                        continue;
                    }
                    None => {
                        query.done = true;
                        return Ok(None);
                    }
                }
            };

            if reader.get_ref().virtual_position() >= chunk_end {
                query.chunk_end = None;
                continue;
            }

            let Some(record) = packed::read_record(reader.get_mut())? else {
                query.done = true;
                return Ok(None);
            };

            match record.reference_sequence_id() {
                Some(id) if id == query.reference_sequence_id => {}
                // coordinate-sorted: nothing further can match
                Some(id) if id > query.reference_sequence_id => {
                    query.done = true;
                    return Ok(None);
                }
                _ => continue,
            }

            let (Some(start), Some(end)) = (record.alignment_start(), record.alignment_end()) else {
                continue;
            };

            if start > query.region.end_or_max() {
                query.done = true;
                return Ok(None);
            }

            if query.region.overlaps(start, end) {
                return Ok(Some(RawRecord::Packed(record)));
            }
        }
    }

    fn finish(&mut self) -> Result<()> {
        if let Handle::Writer(writer) = &mut self.handle {
            writer.get_mut().try_finish()?;
        }
        Ok(())
    }
}
