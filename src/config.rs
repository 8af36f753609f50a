use crate::index::IndexOptions;
use crate::types::{Format, RecordKind};
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "htscursor")]
#[command(about = "Stream records of an indexed BAM, CRAM or bgzipped VCF file, optionally by region")]
pub struct Config {
    /// BAM, CRAM or bgzipped VCF file to read
    pub input: PathBuf,

    /// Region to iterate (chr, chr:pos, chr:start-end, or "." for every contig)
    #[arg(short, long, env = "HTSCURSOR_REGION")]
    pub region: Option<String>,

    /// Index file to use instead of the sidecar next to the input
    #[arg(long, env = "HTSCURSOR_INDEX")]
    pub index: Option<PathBuf>,

    /// Build the index when none is found
    #[arg(long, env = "HTSCURSOR_BUILD_INDEX")]
    pub build_index: bool,

    /// Minimum bin shift for a built index
    #[arg(long, env = "HTSCURSOR_MIN_SHIFT")]
    pub min_shift: Option<u8>,

    /// FASTA reference for decoding CRAM
    #[arg(long, env = "HTSCURSOR_REFERENCE")]
    pub reference: Option<PathBuf>,

    /// How binary records are decoded
    #[arg(long, value_enum, default_value_t = RecordKind::Alignment)]
    pub records: RecordKind,

    /// Print records as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Copy the header and the selected records into this file instead of printing them
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn format(&self) -> Option<Format> {
        Format::from_path(&self.input)
    }

    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            index_path: self.index.clone(),
            build_if_missing: self.build_index,
            min_shift: self.min_shift,
        }
    }
}
