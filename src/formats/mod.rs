//! Container backends: the file formats a record stream can sit on.
//!
//! A [`Container`] owns one open file (or in-memory store) and exposes the
//! primitives the stream needs: header access, sequential raw reads and
//! writes, index lookup/load/build, and region queries over a loaded index.
//! BGZF decompression and index byte layouts are handled by noodles.
//!
//! # Implementations
//!
//! - [`BamContainer`] - BAM files with `.bai`/`.csi` indexes
//! - [`CramContainer`] - CRAM files with `.crai` indexes, read-only
//! - [`VcfContainer`] - bgzipped VCF with `.tbi`/`.csi` indexes
//! - [`MemoryContainer`] - records held in memory, with a binned index built on demand

mod bam;
mod cram;
mod memory;
mod vcf;

pub use bam::{BamContainer, BamIndex, BamQuery};
pub use cram::{CramContainer, CramQuery, read_reference};
pub use memory::{IndexEntry, MemoryContainer, MemoryIndex, MemoryQuery};
pub use vcf::{VcfContainer, VcfIndex, VcfQuery};

use crate::header::Header;
use crate::packed::RawRecord;
use crate::types::{Mode, Region};
use crate::{Error, Result};
use noodles::bgzf::VirtualPosition;
use noodles::csi::binning_index::index::reference_sequence::bin::Chunk;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Storage primitives behind a record stream
pub trait Container {
    /// A loaded index
    type Index;
    /// Live iteration state of one region query
    type Query;

    /// Index file extensions, most preferred first
    const INDEX_EXTENSIONS: &'static [&'static str];

    /// Header read at open time (read mode) or written so far (write mode)
    fn header(&self) -> Option<&Header>;

    fn write_header(&mut self, header: &Header) -> Result<()>;

    /// Next record in file order; `Ok(None)` at end of file
    fn read_raw(&mut self) -> Result<Option<RawRecord>>;

    fn write_raw(&mut self, record: &RawRecord) -> Result<()>;

    /// Sidecar names to try for `data_path`: `<file>.<ext>`, then `<stem>.<ext>`
    fn index_candidates(&self, data_path: &Path) -> Vec<PathBuf> {
        sidecar_candidates(data_path, Self::INDEX_EXTENSIONS)
    }

    /// First candidate index that exists
    fn locate_index(&self, data_path: &Path) -> Option<PathBuf> {
        self.index_candidates(data_path)
            .into_iter()
            .find(|path| path.exists())
    }

    /// Load an index; `Ok(None)` when there is nothing at `index_path`
    fn load_index(&mut self, index_path: &Path) -> Result<Option<Self::Index>>;

    /// Build and store an index for `data_path`, returning where it went
    fn build_index(&mut self, data_path: &Path, min_shift: Option<u8>) -> Result<PathBuf>;

    /// Contig names known to the index, in file order
    fn contigs(&self, index: &Self::Index) -> Vec<String>;

    fn query(&mut self, index: &Self::Index, region: &Region) -> Result<Self::Query>;

    /// Next record of a query; `Ok(None)` once it is drained
    fn advance(&mut self, query: &mut Self::Query) -> Result<Option<RawRecord>>;

    /// Flush pending output; the container must not be used afterwards
    fn finish(&mut self) -> Result<()>;
}

/// Containers that live in a file
pub trait OpenContainer: Container + Sized {
    fn open(path: &Path, mode: Mode) -> Result<Self>;
}

pub(crate) fn sidecar_candidates(data_path: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(extensions.len() * 2);
    for ext in extensions {
        // Appended index first (e.g., file.bam.bai)
        candidates.push(PathBuf::from(format!("{}.{}", data_path.display(), ext)));
    }
    for ext in extensions {
        // Then replaced extension (e.g., file.bai)
        let replaced = data_path.with_extension(ext);
        if replaced != data_path && !candidates.contains(&replaced) {
            candidates.push(replaced);
        }
    }
    candidates
}

/// Check the gzip member header for the `BC` extra subfield that marks BGZF.
pub(crate) fn verify_bgzf(path: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| Error::open(path, e))?;
    let mut magic = [0u8; 16];
    let n = read_up_to(&mut file, &mut magic).map_err(|e| Error::open(path, e))?;

    let is_bgzf = n == magic.len()
        && magic[..4] == [0x1f, 0x8b, 0x08, 0x04]
        && magic[12..14] == [b'B', b'C']
        && u16::from_le_bytes([magic[14], magic[15]]) == 2;

    if is_bgzf {
        Ok(())
    } else {
        Err(Error::NotBgzf(path.to_path_buf()))
    }
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Sort chunks and merge overlapping or touching ones so no block is read twice
pub(crate) fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<(VirtualPosition, VirtualPosition)> {
    chunks.sort_by_key(|chunk| chunk.start());

    let mut merged: Vec<(VirtualPosition, VirtualPosition)> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some((_, end)) if chunk.start() <= *end => {
                if chunk.end() > *end {
                    *end = chunk.end();
                }
            }
            _ => merged.push((chunk.start(), chunk.end())),
        }
    }
    merged
}
