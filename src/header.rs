use crate::{Error, Result};
use noodles::sam;
use noodles::vcf;
use noodles::vcf::header::record::value::{Map, map::Contig};

/// File header, read once when a stream is opened.
///
/// The header is treated as opaque; only the contig list is looked into.
#[derive(Debug, Clone)]
pub enum Header {
    /// SAM header of a BAM or CRAM file
    Alignment(sam::Header),
    /// Header of a VCF file
    Variant(vcf::Header),
}

impl Header {
    pub fn parse_sam(text: &str) -> Result<Self> {
        text.parse()
            .map(Header::Alignment)
            .map_err(|e| Error::InvalidHeader(format!("failed to parse SAM header: {}", e)))
    }

    pub fn parse_vcf(text: &str) -> Result<Self> {
        text.parse()
            .map(Header::Variant)
            .map_err(|e| Error::InvalidHeader(format!("failed to parse VCF header: {}", e)))
    }

    /// A VCF header declaring only the given contigs
    pub fn with_contigs<I, S>(contigs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let header = contigs
            .into_iter()
            .fold(vcf::Header::builder(), |builder, name| {
                builder.add_contig(name.into(), Map::<Contig>::new())
            })
            .build();
        Header::Variant(header)
    }

    /// Contig names in declaration order
    pub fn contig_names(&self) -> Vec<String> {
        match self {
            Header::Alignment(header) => header
                .reference_sequences()
                .keys()
                .map(|name| name.to_string())
                .collect(),
            Header::Variant(header) => header.contigs().keys().map(|name| name.to_string()).collect(),
        }
    }

    pub fn as_sam(&self) -> Option<&sam::Header> {
        match self {
            Header::Alignment(header) => Some(header),
            Header::Variant(_) => None,
        }
    }

    pub fn as_vcf(&self) -> Option<&vcf::Header> {
        match self {
            Header::Variant(header) => Some(header),
            Header::Alignment(_) => None,
        }
    }
}
