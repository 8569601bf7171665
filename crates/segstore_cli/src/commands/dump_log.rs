//! Dump journal command implementation.

use crate::error::CliResult;
use crate::snapshot::StoreSnapshot;
use segstore_core::{LogRecord, OperationLog};
use segstore_storage::InMemoryBackend;
use serde::Serialize;
use std::path::Path;

/// Journal record representation for output.
#[derive(Debug, Serialize)]
pub struct LogEntryInfo {
    /// Offset in the journal file.
    pub offset: u64,
    /// Record type.
    pub record_type: &'static str,
    /// Segment the record changes; the target for merges.
    pub segment_id: u64,
    /// Segment name (creates only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Segment offset the record applies at (appends and truncations).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment_offset: Option<u64>,
    /// Bytes carried or moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// Merge source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<u64>,
    /// Number of attribute values committed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<usize>,
}

impl LogEntryInfo {
    fn new(offset: u64, record: &LogRecord) -> Self {
        let mut info = Self {
            offset,
            record_type: record.record_type().name(),
            segment_id: record.segment_id().as_u64(),
            name: None,
            segment_offset: None,
            length: None,
            source_id: None,
            attributes: None,
        };
        match record {
            LogRecord::CreateSegment { name, attributes, .. } => {
                info.name = Some(name.clone());
                info.attributes = Some(attributes.len());
            }
            LogRecord::Append {
                offset, data, attributes, ..
            } => {
                info.segment_offset = Some(*offset);
                info.length = Some(data.len() as u64);
                info.attributes = Some(attributes.len());
            }
            LogRecord::UpdateAttributes { attributes, .. } => info.attributes = Some(attributes.len()),
            LogRecord::Seal { length, .. } => info.length = Some(*length),
            LogRecord::Merge {
                source_id,
                source_length,
                target_offset,
                ..
            } => {
                info.source_id = Some(source_id.as_u64());
                info.length = Some(*source_length);
                info.segment_offset = Some(*target_offset);
            }
            LogRecord::Truncate { offset, .. } => info.segment_offset = Some(*offset),
            LogRecord::Delete { .. } => {}
        }
        info
    }
}

/// Dumped records plus the reason the dump stopped early, if any.
#[derive(Debug, Serialize)]
pub struct LogDump {
    /// Records in journal order.
    pub records: Vec<LogEntryInfo>,
    /// Error that ended iteration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the dump-log command.
pub fn run(path: &Path, limit: Option<usize>, start_offset: u64, format: &str) -> CliResult<()> {
    let dump = dump(path, limit, start_offset)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&dump)?),
        _ => print_text_output(&dump),
    }
    Ok(())
}

/// Reads records at or after `start_offset`, up to `limit` of them.
pub fn dump(path: &Path, limit: Option<usize>, start_offset: u64) -> CliResult<LogDump> {
    let snapshot = StoreSnapshot::load(path)?;
    let log = OperationLog::new(Box::new(InMemoryBackend::with_data(snapshot.journal)), false);
    let max_records = limit.unwrap_or(usize::MAX);

    let mut records = Vec::new();
    let mut error = None;
    for item in log.iter()? {
        if records.len() >= max_records {
            break;
        }
        match item {
            Ok((offset, _)) if offset < start_offset => {}
            Ok((offset, record)) => records.push(LogEntryInfo::new(offset, &record)),
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        }
    }
    Ok(LogDump { records, error })
}

fn print_text_output(dump: &LogDump) {
    println!("Journal Records ({} total)", dump.records.len());
    println!("=====================");
    println!();

    for record in &dump.records {
        print!(
            "[{:08}] {:17} segment={}",
            record.offset, record.record_type, record.segment_id
        );
        if let Some(name) = &record.name {
            print!(" name={name}");
        }
        if let Some(source) = record.source_id {
            print!(" source={source}");
        }
        if let Some(offset) = record.segment_offset {
            print!(" at={offset}");
        }
        if let Some(length) = record.length {
            print!(" length={length}");
        }
        if let Some(count) = record.attributes {
            print!(" attributes={count}");
        }
        println!();
    }

    if let Some(error) = &dump.error {
        println!();
        println!("Stopped: {error}");
    }
}
