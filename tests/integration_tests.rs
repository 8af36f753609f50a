//! Integration tests for htscursor
//!
//! Fixtures are written through the crate's own writers into a temporary
//! directory, then read back, indexed and queried.

use htscursor::formats::{CramContainer, read_reference};
use htscursor::{
    AlignmentRecord, BamStream, CigarOp, CramStream, ErrorKind, Header, IndexOptions, Mode,
    Record, TextRecord, VcfStream,
};
use noodles::sam::alignment::io::Write as _;
use noodles::{bam, cram};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const SAM_HEADER: &str = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:1000\n@SQ\tSN:chr2\tLN:1000\n";

const VCF_HEADER: &str = "##fileformat=VCFv4.3\n\
##INFO=<ID=END,Number=1,Type=Integer,Description=\"End position of the variant\">\n\
##INFO=<ID=SVTYPE,Number=1,Type=String,Description=\"Type of structural variant\">\n\
##ALT=<ID=DEL,Description=\"Deletion\">\n\
##contig=<ID=chr1,length=1000>\n\
##contig=<ID=chr2,length=1000>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

fn alignment(name: &str, contig: usize, position: u64) -> Record {
    Record::Alignment(AlignmentRecord {
        name: name.to_string(),
        flags: 0,
        reference_sequence_id: Some(contig),
        position: Some(position),
        mapping_quality: Some(60),
        cigar: vec![CigarOp::new('M', 10)],
        mate_reference_sequence_id: None,
        mate_position: None,
        template_length: 0,
        sequence: "ACGTACGTAC".to_string(),
        quality: Some("IIIIIIIIII".to_string()),
        tags: Vec::new(),
    })
}

/// Two contigs with three reads each, starting at 101, 201 and 301
fn write_bam(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("reads.bam");
    let mut writer = BamStream::open(&path, Mode::Write).unwrap();
    writer.set_header(Header::parse_sam(SAM_HEADER).unwrap()).unwrap();
    writer.write_header().unwrap();
    for (contig, prefix) in [(0, "a"), (1, "b")] {
        for (i, position) in [101, 201, 301].into_iter().enumerate() {
            writer
                .write_record(&alignment(&format!("{}{}", prefix, i), contig, position))
                .unwrap();
        }
    }
    writer.close().unwrap();
    path
}

fn write_vcf(dir: &TempDir) -> PathBuf {
    write_vcf_lines(
        dir,
        "calls.vcf.gz",
        &[
            "chr1\t100\trs1\tA\tG\t50\tPASS\t.",
            "chr1\t200\trs2\tACGT\tA\t50\tPASS\t.",
            "chr1\t300\trs3\tC\tT\t50\tPASS\t.",
            "chr2\t150\trs4\tG\tA\t50\tPASS\t.",
        ],
    )
}

fn write_vcf_lines(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    let mut writer = VcfStream::open(&path, Mode::Write).unwrap();
    writer.set_header(Header::parse_vcf(VCF_HEADER).unwrap()).unwrap();
    for line in lines {
        writer
            .write_record(&Record::Text(TextRecord::parse(line.to_string())))
            .unwrap();
    }
    writer.close().unwrap();
    path
}

/// A two-contig FASTA reference matching `SAM_HEADER`
fn write_reference(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("ref.fa");
    let sequence = "ACGT".repeat(250);
    let mut fasta = String::new();
    for name in ["chr1", "chr2"] {
        fasta.push_str(&format!(">{}\n", name));
        for line in sequence.as_bytes().chunks(60) {
            fasta.push_str(std::str::from_utf8(line).unwrap());
            fasta.push('\n');
        }
    }
    std::fs::write(&path, fasta).unwrap();
    path
}

/// Converts the chr1 reads of a BAM file to CRAM with noodles
fn write_cram(dir: &TempDir, bam_path: &Path, reference: &Path) -> PathBuf {
    let path = dir.path().join("reads.cram");

    let mut reader = bam::io::Reader::new(File::open(bam_path).unwrap());
    let header = reader.read_header().unwrap();

    let mut writer = cram::io::writer::Builder::default()
        .set_reference_sequence_repository(read_reference(reference).unwrap())
        .build_from_path(&path)
        .unwrap();
    writer.write_alignment_header(&header).unwrap();
    for result in reader.records() {
        let record = result.unwrap();
        if record.reference_sequence_id().transpose().unwrap() == Some(0) {
            writer.write_alignment_record(&header, &record).unwrap();
        }
    }
    writer.finish(&header).unwrap();

    path
}

fn region_names<C: htscursor::formats::Container>(
    stream: &mut htscursor::IndexedRecordStream<C>,
) -> Vec<String> {
    stream
        .region_records()
        .map(|record| match record.unwrap() {
            Record::Text(text) => text.line.split('\t').nth(2).unwrap().to_string(),
            other => other.name().to_string(),
        })
        .collect()
}

fn age(path: &Path, by: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - by).unwrap();
}

#[test]
fn test_bam_sequential_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_bam(&dir);

    let mut stream = BamStream::open(&path, Mode::Read).unwrap();
    assert_eq!(stream.header().unwrap().contig_names(), vec!["chr1", "chr2"]);

    let first = stream.read_record().unwrap().unwrap();
    let first = first.as_alignment().unwrap();
    assert_eq!(first.name, "a0");
    assert_eq!(first.position, Some(101));
    assert_eq!(first.cigar_string(), "10M");
    assert_eq!(first.sequence, "ACGTACGTAC");
    assert_eq!(first.quality.as_deref(), Some("IIIIIIIIII"));

    assert_eq!(stream.records().count(), 5);
    assert!(stream.read_record().unwrap().is_none());
}

#[test]
fn test_bam_whole_file_traversal() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_bam(&dir);

    let mut stream = BamStream::open(&path, Mode::Read).unwrap();
    stream.ensure_index(true).unwrap();
    let index = bam::bai::read(path.with_extension("bam.bai")).unwrap();
    assert_eq!(index.reference_sequences().len(), 2);

    stream.set_whole_file().unwrap();
    let mut names = Vec::new();
    for _ in 0..6 {
        assert!(!stream.at_end().unwrap());
        names.push(stream.read_region().unwrap().unwrap().name().to_string());
    }
    assert!(stream.at_end().unwrap());
    assert!(stream.read_region().unwrap().is_none());
    assert_eq!(names, vec!["a0", "a1", "a2", "b0", "b1", "b2"]);
}

#[test]
fn test_bam_region_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_bam(&dir);

    let mut stream = BamStream::open(&path, Mode::Read).unwrap();
    stream.ensure_index(true).unwrap();

    stream.set_region("chr1:150-250").unwrap();
    assert_eq!(region_names(&mut stream), vec!["a1"]);

    // 295-304 overlaps only the read at 301-310
    stream.set_region("chr2:295-304").unwrap();
    assert_eq!(region_names(&mut stream), vec!["b2"]);

    stream.set_region("chr1:205").unwrap();
    assert_eq!(region_names(&mut stream), vec!["a1", "a2"]);

    let err = stream.set_region("chr7").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Region);
}

#[test]
fn test_bam_custom_min_shift_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_bam(&dir);

    let mut stream = BamStream::open(&path, Mode::Read).unwrap();
    let err = stream
        .ensure_index_with(&IndexOptions {
            build_if_missing: true,
            min_shift: Some(12),
            ..IndexOptions::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);
}

#[test]
fn test_dropped_writer_still_finishes_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.bam");
    {
        let mut writer = BamStream::open(&path, Mode::Write).unwrap();
        writer.set_header(Header::parse_sam(SAM_HEADER).unwrap()).unwrap();
        writer.write_record(&alignment("only", 0, 11)).unwrap();
    }

    let mut stream = BamStream::open(&path, Mode::Read).unwrap();
    assert_eq!(stream.read_record().unwrap().unwrap().name(), "only");
    assert!(stream.read_record().unwrap().is_none());
}

#[test]
fn test_vcf_region_query() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(&dir);

    let mut stream = VcfStream::open(&path, Mode::Read).unwrap();
    assert_eq!(stream.header().unwrap().contig_names(), vec!["chr1", "chr2"]);

    let err = stream.set_region("chr1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);

    stream.ensure_index(true).unwrap();
    assert!(dir.path().join("calls.vcf.gz.tbi").exists());

    // rs2 spans 200-203 through its REF allele
    stream.set_region("chr1:202-250").unwrap();
    assert_eq!(region_names(&mut stream), vec!["rs2"]);

    stream.set_region("chr2").unwrap();
    assert_eq!(region_names(&mut stream), vec!["rs4"]);

    stream.set_region(".").unwrap();
    assert_eq!(region_names(&mut stream), vec!["rs1", "rs2", "rs3", "rs4"]);
}

#[test]
fn test_vcf_region_uses_structural_variant_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf_lines(
        &dir,
        "sv.vcf.gz",
        &[
            "chr1\t100\tsv1\tN\t<DEL>\t.\tPASS\tSVTYPE=DEL;END=500",
            "chr1\t600\trs5\tA\tG\t50\tPASS\t.",
        ],
    );

    let mut stream = VcfStream::open(&path, Mode::Read).unwrap();
    stream.ensure_index(true).unwrap();

    stream.set_region("chr1:300-400").unwrap();
    assert_eq!(region_names(&mut stream), vec!["sv1"]);

    stream.set_region("chr1:501-700").unwrap();
    assert_eq!(region_names(&mut stream), vec!["rs5"]);
}

#[test]
fn test_vcf_sequential_read_skips_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(&dir);

    let mut stream = VcfStream::open(&path, Mode::Read).unwrap();
    let Record::Text(first) = stream.read_record().unwrap().unwrap() else {
        panic!("expected a text record");
    };
    assert_eq!(first.contig, "chr1");
    assert_eq!(first.position, Some(100));
    assert_eq!(stream.records().count(), 3);
}

#[test]
fn test_stale_index_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(&dir);

    let mut stream = VcfStream::open(&path, Mode::Read).unwrap();
    stream.ensure_index(true).unwrap();
    stream.close().unwrap();

    age(&dir.path().join("calls.vcf.gz.tbi"), Duration::from_secs(3600));

    let mut stream = VcfStream::open(&path, Mode::Read).unwrap();
    let err = stream.ensure_index(true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Index);
    assert!(matches!(err, htscursor::Error::StaleIndex { .. }));
    assert!(!stream.has_index());
}

#[test]
fn test_explicit_index_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_vcf(&dir);

    let mut stream = VcfStream::open(&path, Mode::Read).unwrap();
    let built = stream.build_index(None).unwrap();
    let moved = dir.path().join("elsewhere.tbi");
    std::fs::rename(&built, &moved).unwrap();

    let err = stream.load_index().unwrap_err();
    assert!(matches!(err, htscursor::Error::IndexNotFound(_)));

    stream.load_index_from(&moved).unwrap();
    stream.set_region("chr1:1-150").unwrap();
    assert_eq!(region_names(&mut stream), vec!["rs1"]);
}

#[test]
fn test_plain_text_is_not_bgzf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plain.vcf.gz");
    std::fs::write(&path, VCF_HEADER).unwrap();

    let err = VcfStream::open(&path, Mode::Read).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Open);
}

#[test]
fn test_copy_bam_to_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_bam(&dir);
    let copy_path = dir.path().join("copy.bam");

    let mut source = BamStream::open(&path, Mode::Read).unwrap();
    source.ensure_index(true).unwrap();
    source.set_region("chr2").unwrap();

    let mut copy = BamStream::open(&copy_path, Mode::Write).unwrap();
    copy.set_header(source.header().cloned().unwrap()).unwrap();
    while let Some(record) = source.read_region().unwrap() {
        copy.write_record(&record).unwrap();
    }
    copy.close().unwrap();
    source.close().unwrap();

    let mut copied = BamStream::open(&copy_path, Mode::Read).unwrap();
    let names: Vec<String> = copied
        .records()
        .map(|r| r.unwrap().name().to_string())
        .collect();
    assert_eq!(names, vec!["b0", "b1", "b2"]);
}

#[test]
fn test_cram_read_and_region_query() {
    let dir = tempfile::tempdir().unwrap();
    let bam_path = write_bam(&dir);
    let reference = write_reference(&dir);
    let path = write_cram(&dir, &bam_path, &reference);

    let container = CramContainer::open_with_reference(&path, read_reference(&reference).unwrap())
        .unwrap();
    let mut stream = CramStream::from_container(container, &path, Mode::Read);
    assert_eq!(stream.header().unwrap().contig_names(), vec!["chr1", "chr2"]);

    let first = stream.read_record().unwrap().unwrap();
    let first = first.as_alignment().unwrap();
    assert_eq!(first.name, "a0");
    assert_eq!(first.reference_sequence_id, Some(0));
    assert_eq!(first.position, Some(101));
    assert_eq!(first.cigar_string(), "10M");
    assert_eq!(first.sequence, "ACGTACGTAC");
    assert_eq!(first.quality.as_deref(), Some("IIIIIIIIII"));
    assert_eq!(stream.records().count(), 2);

    stream.ensure_index(true).unwrap();
    assert!(dir.path().join("reads.cram.crai").exists());

    stream.set_region("chr1:150-250").unwrap();
    assert_eq!(region_names(&mut stream), vec!["a1"]);

    stream.set_region("chr2").unwrap();
    assert!(region_names(&mut stream).is_empty());
}

#[test]
fn test_cram_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let err = CramStream::open(dir.path().join("out.cram"), Mode::Write)
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::Open);
}
