use super::{Container, OpenContainer};
use crate::header::Header;
use crate::packed::{self, PackedRecord, RawRecord};
use crate::types::{Mode, Region};
use crate::{Error, Result};
use noodles::bam;
use noodles::core::Position;
use noodles::core::region::Interval;
use noodles::cram;
use noodles::cram::crai;
use noodles::fasta;
use noodles::sam;
use noodles::sam::alignment::io::Write as _;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A CRAM file opened for reading.
///
/// Records are decoded against a FASTA reference repository and handed out
/// in the same packed layout as BAM records.
pub struct CramContainer {
    reader: cram::io::Reader<File>,
    sam_header: sam::Header,
    header: Header,
    pending: Option<VecDeque<PackedRecord>>,
}

/// Records of one region, decoded up front
pub struct CramQuery {
    records: VecDeque<PackedRecord>,
}

/// Load every sequence of a FASTA file into a reference repository.
pub fn read_reference(path: &Path) -> Result<fasta::Repository> {
    let file = File::open(path).map_err(|e| Error::open(path, e))?;
    let mut reader = fasta::io::Reader::new(BufReader::new(file));
    let records = reader
        .records()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::open(path, format!("failed to read FASTA reference: {}", e)))?;

    debug!(path = %path.display(), sequences = records.len(), "loaded reference");
    Ok(fasta::Repository::new(records))
}

/// Re-encode a decoded alignment in the BAM record layout.
fn pack(header: &sam::Header, record: &dyn sam::alignment::Record) -> Result<PackedRecord> {
    let mut writer = bam::io::Writer::from(Vec::new());
    writer.write_alignment_record(header, record)?;
    let mut src = writer.get_ref().as_slice();
    packed::read_record(&mut src)?
        .ok_or_else(|| Error::Decode("CRAM record encoded to nothing".to_string()))
}

impl CramContainer {
    /// Open a CRAM file whose sequences are resolved against `repository`.
    pub fn open_with_reference(path: &Path, repository: fasta::Repository) -> Result<Self> {
        let mut reader = cram::io::reader::Builder::default()
            .set_reference_sequence_repository(repository)
            .build_from_path(path)
            .map_err(|e| Error::open(path, e))?;
        let sam_header = reader
            .read_header()
            .map_err(|e| Error::open(path, format!("failed to read CRAM header: {}", e)))?;

        debug!(
            path = %path.display(),
            contigs = sam_header.reference_sequences().len(),
            "opened CRAM"
        );

        Ok(Self {
            reader,
            header: Header::Alignment(sam_header.clone()),
            sam_header,
            pending: None,
        })
    }

    fn decode_all(&mut self) -> Result<VecDeque<PackedRecord>> {
        let mut records = VecDeque::new();
        for result in self.reader.records(&self.sam_header) {
            let record = result?.try_into_alignment_record(&self.sam_header)?;
            records.push_back(pack(&self.sam_header, &record)?);
        }
        Ok(records)
    }
}

impl OpenContainer for CramContainer {
    /// Opens without a reference; only reference-free CRAM decodes this way.
    fn open(path: &Path, mode: Mode) -> Result<Self> {
        match mode {
            Mode::Read => {
                let repository = fasta::Repository::new(Vec::<fasta::Record>::new());
                Self::open_with_reference(path, repository)
            }
            Mode::Write => Err(Error::open(path, "CRAM files are read-only")),
        }
    }
}

impl Container for CramContainer {
    type Index = crai::Index;
    type Query = CramQuery;

    const INDEX_EXTENSIONS: &'static [&'static str] = &["crai"];

    fn header(&self) -> Option<&Header> {
        Some(&self.header)
    }

    fn write_header(&mut self, _header: &Header) -> Result<()> {
        Err(Error::WrongMode(Mode::Write.as_str()))
    }

    fn read_raw(&mut self) -> Result<Option<RawRecord>> {
        let pending = match self.pending.take() {
            Some(pending) => pending,
            None => self.decode_all()?,
        };
        let pending = self.pending.insert(pending);
        Ok(pending.pop_front().map(RawRecord::Packed))
    }

    fn write_raw(&mut self, _record: &RawRecord) -> Result<()> {
        Err(Error::WrongMode(Mode::Write.as_str()))
    }

    fn load_index(&mut self, index_path: &Path) -> Result<Option<crai::Index>> {
        if !index_path.exists() {
            return Ok(None);
        }

        let index = crai::read(index_path).map_err(|e| Error::IndexRead {
            path: index_path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Some(index))
    }

    fn build_index(&mut self, data_path: &Path, min_shift: Option<u8>) -> Result<PathBuf> {
        if let Some(shift) = min_shift {
            return Err(Error::IndexBuild {
                path: data_path.to_path_buf(),
                reason: format!("min_shift {} does not apply to CRAI indexes", shift),
            });
        }

        let build_error = |e: std::io::Error| Error::IndexBuild {
            path: data_path.to_path_buf(),
            reason: e.to_string(),
        };

        let index = cram::index(data_path).map_err(build_error)?;
        let dst = PathBuf::from(format!("{}.crai", data_path.display()));
        crai::write(&dst, &index).map_err(build_error)?;

        info!(index = %dst.display(), entries = index.len(), "built CRAI index");
        Ok(dst)
    }

    fn contigs(&self, _index: &crai::Index) -> Vec<String> {
        self.header.contig_names()
    }

    fn query(&mut self, index: &crai::Index, region: &Region) -> Result<CramQuery> {
        let reference_sequence_id = self
            .sam_header
            .reference_sequences()
            .get_index_of(region.reference_name.as_bytes())
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
        let target = noodles::core::Region::new(region.reference_name.as_str(), interval);

        let mut records = VecDeque::new();
        let query = self
            .reader
            .query(&self.sam_header, index, &target)
            .map_err(|e| Error::InvalidRegion(format!("index query failed for {}: {}", region, e)))?;
        for result in query {
            let record = result?.try_into_alignment_record(&self.sam_header)?;
            let record = pack(&self.sam_header, &record)?;

            let on_contig = record.reference_sequence_id() == Some(reference_sequence_id);
            let overlaps = record
                .alignment_start()
                .zip(record.alignment_end())
                .is_some_and(|(start, end)| region.overlaps(start, end));
            if on_contig && overlaps {
                records.push_back(record);
            }
        }

        debug!(region = %region, records = records.len(), "bound CRAM query");
        Ok(CramQuery { records })
    }

    fn advance(&mut self, query: &mut CramQuery) -> Result<Option<RawRecord>> {
        Ok(query.records.pop_front().map(RawRecord::Packed))
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
