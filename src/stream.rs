//! The record stream façade.
//!
//! An [`IndexedRecordStream`] owns one container, the index loaded for it
//! and at most one region cursor. Records come out decoded; in write mode
//! decoded records are encoded back and appended.
//!
//! ```no_run
//! use htscursor::{BamStream, Mode};
//!
//! # fn main() -> htscursor::Result<()> {
//! let mut stream = BamStream::open("reads.bam", Mode::Read)?;
//! stream.ensure_index(true)?;
//! stream.set_region("chr1:1000-2000")?;
//! while let Some(record) = stream.read_region()? {
//!     println!("{}", record.name());
//! }
//! stream.close()?;
//! # Ok(())
//! # }
//! ```

use crate::cursor::RegionCursor;
use crate::decode;
use crate::formats::{
    BamContainer, Container, CramContainer, MemoryContainer, OpenContainer, VcfContainer,
};
use crate::header::Header;
use crate::index::{self, IndexOptions};
use crate::record::Record;
use crate::types::{Mode, RecordKind, Region, RegionSelector};
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub type BamStream = IndexedRecordStream<BamContainer>;
pub type CramStream = IndexedRecordStream<CramContainer>;
pub type VcfStream = IndexedRecordStream<VcfContainer>;
pub type MemoryStream = IndexedRecordStream<MemoryContainer>;

/// Region-aware reader or writer over one container
pub struct IndexedRecordStream<C: Container> {
    path: PathBuf,
    mode: Mode,
    kind: RecordKind,
    container: Option<C>,
    header: Option<Header>,
    index: Option<C::Index>,
    cursor: Option<RegionCursor<C::Query>>,
    header_written: bool,
}

impl<C: OpenContainer> IndexedRecordStream<C> {
    /// Open a file. In read mode the header is read immediately.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Self> {
        let path = path.as_ref();
        let container = C::open(path, mode)?;
        info!(path = %path.display(), mode = mode.as_str(), "opened stream");
        Ok(Self::from_container(container, path, mode))
    }
}

impl<C: Container> IndexedRecordStream<C> {
    /// Wrap an already open container; `path` names the data for index lookup.
    pub fn from_container(container: C, path: impl Into<PathBuf>, mode: Mode) -> Self {
        let header = match mode {
            Mode::Read => container.header().cloned(),
            Mode::Write => None,
        };
        Self {
            path: path.into(),
            mode,
            kind: RecordKind::default(),
            container: Some(container),
            header,
            index: None,
            cursor: None,
            header_written: false,
        }
    }

    /// Decode binary records into `kind` instead of full alignments
    pub fn with_record_kind(mut self, kind: RecordKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn record_kind(&self) -> RecordKind {
        self.kind
    }

    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.container.is_none()
    }

    /// The open container
    pub fn container(&self) -> Result<&C> {
        self.container.as_ref().ok_or(Error::Closed)
    }

    fn require_mode(&self, mode: Mode) -> Result<()> {
        if self.container.is_none() {
            return Err(Error::Closed);
        }
        if self.mode != mode {
            return Err(Error::WrongMode(mode.as_str()));
        }
        Ok(())
    }

    fn container_mut(&mut self) -> Result<&mut C> {
        self.container.as_mut().ok_or(Error::Closed)
    }

    /// Set the header a write stream will emit, usually copied from a reader.
    pub fn set_header(&mut self, header: Header) -> Result<()> {
        self.require_mode(Mode::Write)?;
        if self.header_written {
            return Err(Error::InvalidRecord(
                "header has already been written".to_string(),
            ));
        }
        self.header = Some(header);
        Ok(())
    }

    pub fn write_header(&mut self) -> Result<()> {
        self.require_mode(Mode::Write)?;
        let header = self
            .header
            .clone()
            .ok_or(Error::MissingHeader("write_header"))?;
        self.container_mut()?.write_header(&header)?;
        self.header_written = true;
        Ok(())
    }

    /// Append one record. The header is written first if it has not been.
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.require_mode(Mode::Write)?;
        if !self.header_written {
            if self.header.is_none() {
                return Err(Error::MissingHeader("write_record"));
            }
            self.write_header()?;
        }

        let raw = decode::encode(record)?;
        self.container_mut()?.write_raw(&raw)
    }

    /// Next record in file order, ignoring any region.
    pub fn read_record(&mut self) -> Result<Option<Record>> {
        self.require_mode(Mode::Read)?;
        let kind = self.kind;
        let raw = self.container_mut()?.read_raw()?;
        Ok(raw.map(|raw| decode::decode(raw, kind)))
    }

    fn install_index(&mut self, index: C::Index) {
        // a cursor bound under the previous index goes with it
        self.cursor = None;
        self.index = Some(index);
    }

    /// Load the index from the sidecar names of the data file.
    pub fn load_index(&mut self) -> Result<()> {
        let path = self.path.clone();
        let index = index::load_index(self.container_mut()?, &path)?;
        self.install_index(index);
        Ok(())
    }

    pub fn load_index_from(&mut self, index_path: impl AsRef<Path>) -> Result<()> {
        let path = self.path.clone();
        let index = index::load_index_from(self.container_mut()?, &path, index_path.as_ref())?;
        self.install_index(index);
        Ok(())
    }

    /// Build an index for the data file without loading it.
    pub fn build_index(&mut self, min_shift: Option<u8>) -> Result<PathBuf> {
        self.require_mode(Mode::Read)?;
        let path = self.path.clone();
        index::build_index(self.container_mut()?, &path, min_shift)
    }

    /// Load the index, building it first when missing and `build_if_missing` is set.
    pub fn ensure_index(&mut self, build_if_missing: bool) -> Result<()> {
        self.ensure_index_with(&IndexOptions {
            build_if_missing,
            ..IndexOptions::default()
        })
    }

    pub fn ensure_index_with(&mut self, options: &IndexOptions) -> Result<()> {
        let path = self.path.clone();
        let index = index::ensure_index(self.container_mut()?, &path, options)?;
        self.install_index(index);
        Ok(())
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    /// Contigs of the loaded index, in index order
    pub fn contigs(&self) -> Result<Vec<String>> {
        let container = self.container.as_ref().ok_or(Error::Closed)?;
        let index = self.index.as_ref().ok_or(Error::NoIndex)?;
        Ok(container.contigs(index))
    }

    /// Select a region from text: `contig`, `contig:pos`, `contig:start-end`,
    /// or `.` for the whole file.
    pub fn set_region(&mut self, spec: &str) -> Result<()> {
        let contigs = self.contigs()?;
        match RegionSelector::parse_with_contigs(spec, &contigs)? {
            RegionSelector::All => self.set_whole_file(),
            RegionSelector::Region(region) => self.seek(region),
        }
    }

    /// Select an already parsed region.
    pub fn seek(&mut self, region: Region) -> Result<()> {
        self.require_mode(Mode::Read)?;
        // release the previous query before binding a new one
        self.cursor = None;

        let (Some(container), Some(index)) = (self.container.as_mut(), self.index.as_ref()) else {
            return Err(Error::NoIndex);
        };
        debug!(region = %region, "seeking");
        self.cursor = Some(RegionCursor::for_region(container, index, region)?);
        Ok(())
    }

    /// Iterate every contig of the index in order.
    pub fn set_whole_file(&mut self) -> Result<()> {
        self.require_mode(Mode::Read)?;
        self.cursor = None;

        let (Some(container), Some(index)) = (self.container.as_mut(), self.index.as_ref()) else {
            return Err(Error::NoIndex);
        };
        debug!("iterating whole file");
        self.cursor = Some(RegionCursor::whole_file(container, index)?);
        Ok(())
    }

    /// Next record of the active region, `Ok(None)` once it is exhausted.
    pub fn read_region(&mut self) -> Result<Option<Record>> {
        let kind = self.kind;
        let container = self.container.as_mut().ok_or(Error::Closed)?;
        let cursor = self.cursor.as_mut().ok_or(Error::NoActiveRegion)?;
        let index = self.index.as_ref().ok_or(Error::NoIndex)?;

        let raw = cursor.next(container, index)?;
        Ok(raw.map(|raw| decode::decode(raw, kind)))
    }

    /// True once the active region has handed out its last record.
    pub fn at_end(&self) -> Result<bool> {
        if self.container.is_none() {
            return Err(Error::Closed);
        }
        self.cursor
            .as_ref()
            .map(RegionCursor::at_end)
            .ok_or(Error::NoActiveRegion)
    }

    /// Release the cursor, the index and the container, in that order.
    ///
    /// Write streams flush their final block. Closing again does nothing.
    pub fn close(&mut self) -> Result<()> {
        self.cursor = None;
        self.index = None;

        let Some(mut container) = self.container.take() else {
            return Ok(());
        };
        if self.mode == Mode::Write && !self.header_written {
            if let Some(header) = &self.header {
                container.write_header(header)?;
                self.header_written = true;
            }
        }
        container.finish()?;
        debug!(path = %self.path.display(), "closed stream");
        Ok(())
    }

    /// Iterator over the remaining records in file order
    pub fn records(&mut self) -> Records<'_, C> {
        Records { stream: self }
    }

    /// Iterator over the remaining records of the active region
    pub fn region_records(&mut self) -> RegionRecords<'_, C> {
        RegionRecords { stream: self }
    }
}

impl<C: Container> Drop for IndexedRecordStream<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(path = %self.path.display(), error = %e, "failed to close stream");
        }
    }
}

pub struct Records<'a, C: Container> {
    stream: &'a mut IndexedRecordStream<C>,
}

impl<C: Container> Iterator for Records<'_, C> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.read_record().transpose()
    }
}

pub struct RegionRecords<'a, C: Container> {
    stream: &'a mut IndexedRecordStream<C>,
}

impl<C: Container> Iterator for RegionRecords<'_, C> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.read_region().transpose()
    }
}

impl MemoryStream {
    /// Give back the container of a write stream, reopened for reading.
    pub fn into_reader(mut self) -> Result<MemoryStream> {
        let path = self.path.clone();
        let header = self.header.clone();
        let container = self.container.take().ok_or(Error::Closed)?;

        let mut container = container;
        if let (Some(header), false) = (&header, self.header_written) {
            container.write_header(header)?;
        }
        Ok(Self::from_container(container.into_reader(), path, Mode::Read))
    }
}
