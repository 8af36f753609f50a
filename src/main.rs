use anyhow::Context;
use clap::Parser;
use std::io::{BufWriter, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use htscursor::{
    Config, CramStream, Format, IndexedRecordStream, Mode, Record,
    formats::{BamContainer, CramContainer, OpenContainer, VcfContainer, read_reference},
};

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let format = config
        .format()
        .with_context(|| format!("cannot tell the format of {}", config.input.display()))?;

    match format {
        Format::Bam => {
            let stream = IndexedRecordStream::<BamContainer>::open(&config.input, Mode::Read)?;
            run(&config, stream)
        }
        Format::Vcf => {
            let stream = IndexedRecordStream::<VcfContainer>::open(&config.input, Mode::Read)?;
            run(&config, stream)
        }
        Format::Cram => {
            let container = match &config.reference {
                Some(reference) => {
                    CramContainer::open_with_reference(&config.input, read_reference(reference)?)?
                }
                None => CramContainer::open(&config.input, Mode::Read)?,
            };
            run(&config, CramStream::from_container(container, &config.input, Mode::Read))
        }
    }
}

fn run<C: OpenContainer>(config: &Config, stream: IndexedRecordStream<C>) -> anyhow::Result<()> {
    let mut stream = stream.with_record_kind(config.records);
    let contigs = stream
        .header()
        .map(|header| header.contig_names())
        .unwrap_or_default();

    if let Some(spec) = &config.region {
        stream
            .ensure_index_with(&config.index_options())
            .context("no usable index; pass --build-index to create one")?;
        stream.set_region(spec)?;
    }

    let mut writer = match &config.output {
        Some(path) => {
            let mut writer = IndexedRecordStream::<C>::open(path, Mode::Write)?;
            if let Some(header) = stream.header() {
                writer.set_header(header.clone())?;
            }
            writer.write_header()?;
            Some(writer)
        }
        None => None,
    };

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut count = 0usize;

    loop {
        let record = if config.region.is_some() {
            stream.read_region()?
        } else {
            stream.read_record()?
        };
        let Some(record) = record else { break };
        count += 1;

        match writer.as_mut() {
            Some(writer) => writer.write_record(&record)?,
            None if config.json => writeln!(out, "{}", serde_json::to_string(&record)?)?,
            None => writeln!(out, "{}", format_record(&record, &contigs))?,
        }
    }
    out.flush()?;

    if let Some(mut writer) = writer {
        writer.close()?;
    }
    stream.close()?;

    tracing::info!(records = count, "done");
    Ok(())
}

/// SAM-like columns for alignments, FASTA for bare sequences, the line itself for text
fn format_record(record: &Record, contigs: &[String]) -> String {
    let contig = |id: Option<usize>| {
        id.and_then(|id| contigs.get(id))
            .map(String::as_str)
            .unwrap_or("*")
    };

    match record {
        Record::Alignment(r) => {
            let cigar = if r.cigar.is_empty() {
                "*".to_string()
            } else {
                r.cigar_string()
            };
            format!(
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.name,
                r.flags,
                contig(r.reference_sequence_id),
                r.position.unwrap_or(0),
                r.mapping_quality.unwrap_or(255),
                cigar,
                contig(r.mate_reference_sequence_id),
                r.mate_position.unwrap_or(0),
                r.template_length,
                if r.sequence.is_empty() { "*" } else { &r.sequence },
                r.quality.as_deref().unwrap_or("*"),
            )
        }
        Record::Sequence(r) => format!(">{}\n{}", r.name, r.sequence),
        Record::Text(r) => r.line.clone(),
    }
}
