//! Indexed, region-aware record streams over BGZF-compressed genomic files.
//!
//! A stream opens a BAM or CRAM file or a bgzipped VCF, finds or builds its index,
//! and hands out decoded records either in file order or for one region at
//! a time. Packed BAM fields (4-bit bases, raw qualities, binary CIGAR
//! words) are decoded to text.

pub mod config;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod formats;
pub mod header;
pub mod index;
pub mod packed;
pub mod record;
pub mod stream;
pub mod types;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use header::Header;
pub use index::IndexOptions;
pub use record::{AlignmentRecord, CigarOp, Record, SequenceRecord, TextRecord};
pub use stream::{BamStream, CramStream, IndexedRecordStream, MemoryStream, VcfStream};
pub use types::{Format, Mode, RecordKind, Region, RegionSelector};
