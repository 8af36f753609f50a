use super::{Container, OpenContainer, merge_chunks, verify_bgzf};
use crate::header::Header;
use crate::packed::RawRecord;
use crate::types::{Mode, Region};
use crate::{Error, Result};
use noodles::bgzf;
use noodles::bgzf::VirtualPosition;
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::csi;
use noodles::csi::binning_index::BinningIndex;
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use noodles::tabix;
use noodles::vcf;
use noodles::vcf::variant::Record as _;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Tabix's default minimum shift
pub const TBI_MIN_SHIFT: u8 = 14;

enum Handle {
    Reader(vcf::io::Reader<bgzf::Reader<File>>),
    Writer(vcf::io::Writer<bgzf::Writer<File>>),
}

/// A bgzipped VCF file
pub struct VcfContainer {
    handle: Handle,
    header: Option<Header>,
    line: String,
}

/// A loaded tabix or CSI index
pub enum VcfIndex {
    Tabix(tabix::Index),
    Csi(csi::Index),
}

impl VcfIndex {
    fn query(&self, reference_sequence_id: usize, interval: Interval) -> std::io::Result<Vec<Chunk>> {
        match self {
            VcfIndex::Tabix(index) => index.query(reference_sequence_id, interval),
            VcfIndex::Csi(index) => index.query(reference_sequence_id, interval),
        }
    }

    fn reference_sequence_names(&self) -> Option<Vec<String>> {
        let header = match self {
            VcfIndex::Tabix(index) => index.header(),
            VcfIndex::Csi(index) => index.header(),
        }?;
        Some(header.reference_sequence_names().iter().map(lossy).collect())
    }
}

fn lossy<N: AsRef<[u8]>>(name: N) -> String {
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

/// Chunks still to visit for one region
pub struct VcfQuery {
    region: Region,
    chunks: VecDeque<(VirtualPosition, VirtualPosition)>,
    chunk_end: Option<VirtualPosition>,
    done: bool,
}

/// A data line's contig and 1-based closed span.
///
/// The span ends at the variant end: INFO `END` when present, otherwise the
/// last base of the REF allele. Lines that do not parse have no locus.
pub(crate) fn variant_locus(line: &str, header: &vcf::Header) -> Option<(String, u64, u64)> {
    let mut reader = vcf::io::Reader::new(line.as_bytes());
    let mut record = vcf::Record::default();
    if reader.read_record(&mut record).ok()? == 0 {
        return None;
    }

    let start = record.variant_start()?.ok()?;
    let end = record.variant_end(header).ok()?;
    Some((
        record.reference_sequence_name().to_string(),
        usize::from(start) as u64,
        usize::from(end) as u64,
    ))
}

impl VcfContainer {
    fn reader_mut(&mut self) -> Result<&mut vcf::io::Reader<bgzf::Reader<File>>> {
        match &mut self.handle {
            Handle::Reader(reader) => Ok(reader),
            Handle::Writer(_) => Err(Error::WrongMode(Mode::Read.as_str())),
        }
    }

    fn writer_mut(&mut self) -> Result<&mut vcf::io::Writer<bgzf::Writer<File>>> {
        match &mut self.handle {
            Handle::Writer(writer) => Ok(writer),
            Handle::Reader(_) => Err(Error::WrongMode(Mode::Write.as_str())),
        }
    }

    fn vcf_header(&self) -> Result<&vcf::Header> {
        self.header
            .as_ref()
            .and_then(Header::as_vcf)
            .ok_or(Error::MissingHeader("reading records"))
    }

    /// Next non-empty data line without its terminator; `Ok(None)` at end of file
    fn next_line(&mut self) -> Result<Option<String>> {
        let Handle::Reader(reader) = &mut self.handle else {
            return Err(Error::WrongMode(Mode::Read.as_str()));
        };
        loop {
            self.line.clear();
            if reader.get_mut().read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            let line = self.line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }
}

impl OpenContainer for VcfContainer {
    fn open(path: &Path, mode: Mode) -> Result<Self> {
        match mode {
            Mode::Read => {
                verify_bgzf(path)?;
                let file = File::open(path).map_err(|e| Error::open(path, e))?;
                let mut reader = vcf::io::Reader::new(bgzf::Reader::new(file));
                let header = reader
                    .read_header()
                    .map_err(|e| Error::open(path, format!("failed to read VCF header: {}", e)))?;

                debug!(
                    path = %path.display(),
                    contigs = header.contigs().len(),
                    samples = header.sample_names().len(),
                    "opened VCF"
                );

                Ok(Self {
                    handle: Handle::Reader(reader),
                    header: Some(Header::Variant(header)),
                    line: String::new(),
                })
            }
            Mode::Write => {
                let file = File::create(path).map_err(|e| Error::open(path, e))?;
                Ok(Self {
                    handle: Handle::Writer(vcf::io::Writer::new(bgzf::Writer::new(file))),
                    header: None,
                    line: String::new(),
                })
            }
        }
    }
}

impl Container for VcfContainer {
    type Index = VcfIndex;
    type Query = VcfQuery;

    const INDEX_EXTENSIONS: &'static [&'static str] = &["tbi", "csi"];

    fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    fn write_header(&mut self, header: &Header) -> Result<()> {
        let vcf_header = header.as_vcf().ok_or_else(|| {
            Error::InvalidHeader("a SAM header cannot head a VCF file".to_string())
        })?;
        self.writer_mut()?.write_header(vcf_header)?;
        self.header = Some(header.clone());
        Ok(())
    }

    fn read_raw(&mut self) -> Result<Option<RawRecord>> {
        Ok(self.next_line()?.map(RawRecord::Line))
    }

    fn write_raw(&mut self, record: &RawRecord) -> Result<()> {
        let RawRecord::Line(line) = record else {
            return Err(Error::InvalidRecord(
                "binary records cannot be written to a VCF file".to_string(),
            ));
        };
        let writer = self.writer_mut()?.get_mut();
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn load_index(&mut self, index_path: &Path) -> Result<Option<VcfIndex>> {
        if !index_path.exists() {
            return Ok(None);
        }

        let is_csi = index_path.extension().is_some_and(|ext| ext == "csi");
        let index = if is_csi {
            csi::read(index_path).map(VcfIndex::Csi)
        } else {
            tabix::read(index_path).map(VcfIndex::Tabix)
        }
        .map_err(|e| Error::IndexRead {
            path: index_path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Some(index))
    }

    fn build_index(&mut self, data_path: &Path, min_shift: Option<u8>) -> Result<PathBuf> {
        if let Some(shift) = min_shift.filter(|&s| s != TBI_MIN_SHIFT) {
            return Err(Error::IndexBuild {
                path: data_path.to_path_buf(),
                reason: format!(
                    "min_shift {} needs a CSI index; tabix indexing supports only {}",
                    shift, TBI_MIN_SHIFT
                ),
            });
        }

        let build_error = |e: std::io::Error| Error::IndexBuild {
            path: data_path.to_path_buf(),
            reason: e.to_string(),
        };

        let index = vcf::index(data_path).map_err(build_error)?;
        let dst = PathBuf::from(format!("{}.tbi", data_path.display()));
        tabix::write(&dst, &index).map_err(build_error)?;

        info!(index = %dst.display(), "built tabix index");
        Ok(dst)
    }

    fn contigs(&self, index: &VcfIndex) -> Vec<String> {
        index
            .reference_sequence_names()
            .or_else(|| self.header.as_ref().map(Header::contig_names))
            .unwrap_or_default()
    }

    fn query(&mut self, index: &VcfIndex, region: &Region) -> Result<VcfQuery> {
        let reference_sequence_id = self
            .contigs(index)
            .iter()
            .position(|name| *name == region.reference_name)
            .ok_or_else(|| Error::UnknownContig(region.reference_name.clone()))?;

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

        debug!(region = %region, chunks = chunks.len(), "bound tabix query");

        Ok(VcfQuery {
            region: region.clone(),
            chunks: chunks.into(),
            chunk_end: None,
            done: false,
        })
    }

    fn advance(&mut self, query: &mut VcfQuery) -> Result<Option<RawRecord>> {
        loop {
            if query.done {
                return Ok(None);
            }

            let Some(chunk_end) = query.chunk_end else {
                match query.chunks.pop_front() {
                    Some((start, end)) => {
                        self.reader_mut()?.get_mut().seek(start)?;
                        query.chunk_end = Some(end);
                        continue;
                    }
                    None => {
                        query.done = true;
                        return Ok(None);
                    }
                }
            };

            if self.reader_mut()?.get_ref().virtual_position() >= chunk_end {
                query.chunk_end = None;
                continue;
            }

            let Some(line) = self.next_line()? else {
                query.done = true;
                return Ok(None);
            };

            let Some((contig, start, end)) = variant_locus(&line, self.vcf_header()?) else {
                continue;
            };

            if contig != query.region.reference_name {
                continue;
            }

            if start > query.region.end_or_max() {
                query.done = true;
                return Ok(None);
            }

            if query.region.overlaps(start, end) {
                return Ok(Some(RawRecord::Line(line)));
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
