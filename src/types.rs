use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Container formats with a file-backed implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Format {
    #[default]
    Bam,
    Cram,
    Vcf,
}

impl Format {
    /// Guess the format from a file name (`.bam`, `.cram`, `.vcf.gz`, `.vcf.bgz`).
    pub fn from_path(path: &Path) -> Option<Format> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".bam") {
            Some(Format::Bam)
        } else if name.ends_with(".cram") {
            Some(Format::Cram)
        } else if name.ends_with(".vcf.gz") || name.ends_with(".vcf.bgz") || name.ends_with(".gz")
        {
            Some(Format::Vcf)
        } else {
            None
        }
    }
}

/// Open mode of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Read => "read",
            Mode::Write => "write",
        }
    }
}

/// Which decoded variant a binary record is turned into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum RecordKind {
    /// Name and bases only
    Sequence,
    /// Name, bases, qualities, CIGAR and locus
    #[default]
    Alignment,
}

/// A genomic region: `contig`, `contig:start` or `contig:start-end`.
///
/// Coordinates are 1-based and inclusive. `contig:start` runs to the end of
/// the contig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub reference_name: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl Region {
    /// The whole of one contig
    pub fn contig(name: impl Into<String>) -> Self {
        Self {
            reference_name: name.into(),
            start: None,
            end: None,
        }
    }

    pub fn start_or_min(&self) -> u64 {
        self.start.unwrap_or(1)
    }

    pub fn end_or_max(&self) -> u64 {
        self.end.unwrap_or(u64::MAX)
    }

    /// True when the 1-based closed interval `[start, end]` touches this region.
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        start <= self.end_or_max() && end >= self.start_or_min()
    }

    /// Parse a region, preferring a whole-string contig match when the
    /// contig list is known (contig names may themselves contain `:`).
    pub fn parse_with_contigs(s: &str, contigs: &[String]) -> Result<Self> {
        if contigs.iter().any(|c| c == s) {
            return Ok(Region::contig(s));
        }
        s.parse()
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidRegion("empty region".to_string()));
        }

        let Some((name, interval)) = s.rsplit_once(':') else {
            return Ok(Region::contig(s));
        };

        if name.is_empty() {
            return Err(Error::InvalidRegion(format!("missing contig name in '{}'", s)));
        }

        let (start, end) = match interval.split_once('-') {
            Some((start, "")) => (parse_position(start, s)?, None),
            Some((start, end)) => (parse_position(start, s)?, Some(parse_position(end, s)?)),
            None => (parse_position(interval, s)?, None),
        };

        if let Some(end) = end {
            if end < start {
                return Err(Error::InvalidRegion(format!(
                    "end {} is before start {} in '{}'",
                    end, start, s
                )));
            }
        }

        Ok(Region {
            reference_name: name.to_string(),
            start: Some(start),
            end,
        })
    }
}

fn parse_position(text: &str, region: &str) -> Result<u64> {
    let digits: String = text.chars().filter(|c| *c != ',').collect();
    let position: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidRegion(format!("invalid position '{}' in '{}'", text, region)))?;

    if position == 0 {
        return Err(Error::InvalidRegion(format!(
            "positions are 1-based, got 0 in '{}'",
            region
        )));
    }

    Ok(position)
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reference_name)?;
        match (self.start, self.end) {
            (Some(start), Some(end)) => write!(f, ":{}-{}", start, end),
            (Some(start), None) => write!(f, ":{}", start),
            (None, Some(end)) => write!(f, ":1-{}", end),
            (None, None) => Ok(()),
        }
    }
}

/// What a region cursor iterates over
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionSelector {
    /// Every contig of the index, in index order
    All,
    Region(Region),
}

impl RegionSelector {
    /// Parse a region selector, matching whole contig names first.
    pub fn parse_with_contigs(s: &str, contigs: &[String]) -> Result<Self> {
        match s.trim() {
            "." => Ok(RegionSelector::All),
            other => Region::parse_with_contigs(other, contigs).map(RegionSelector::Region),
        }
    }
}

impl FromStr for RegionSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "." => Ok(RegionSelector::All),
            other => other.parse().map(RegionSelector::Region),
        }
    }
}
