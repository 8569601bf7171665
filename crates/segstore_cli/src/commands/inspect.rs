//! Inspect command implementation.

use crate::error::CliResult;
use crate::snapshot::{runtime, StoreSnapshot};
use segstore_core::{AttributeId, OperationLog, PersistentAttributeStore, SegmentStore};
use segstore_storage::InMemoryBackend;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

const INFO_TIMEOUT: Duration = Duration::from_secs(30);

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Journal size in bytes.
    pub journal_size: u64,
    /// Attribute index size in bytes.
    pub attributes_size: u64,
    /// Number of complete journal records.
    pub journal_records: usize,
    /// Live extended attribute entries in the index.
    pub attribute_entries: usize,
    /// Segment summaries, sorted by name.
    pub segments: Vec<SegmentSummary>,
}

/// Summary of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Segment name.
    pub name: String,
    /// Segment id.
    pub id: u64,
    /// Length in bytes.
    pub length: u64,
    /// Truncation offset.
    pub truncation_offset: u64,
    /// Sealed flag.
    pub sealed: bool,
    /// Merged flag.
    pub merged: bool,
    /// Event count attribute, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_count: Option<i64>,
    /// Cached attributes, if requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<(String, i64)>>,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_attributes: bool, format: &str) -> CliResult<()> {
    let result = inspect(path, show_attributes)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

/// Replays a copy of the store and summarizes it.
pub fn inspect(path: &Path, show_attributes: bool) -> CliResult<InspectResult> {
    let snapshot = StoreSnapshot::load(path)?;
    let journal_records = OperationLog::new(Box::new(InMemoryBackend::with_data(snapshot.journal.clone())), false)
        .iter()?
        .take_while(Result::is_ok)
        .count();
    let attribute_entries =
        PersistentAttributeStore::open(Box::new(InMemoryBackend::with_data(snapshot.attributes.clone())), false)?
            .live_entries();

    let segments = runtime()?.block_on(async {
        let store = snapshot.open_store()?;
        summarize(&store, show_attributes).await
    })?;

    Ok(InspectResult {
        path: path.display().to_string(),
        journal_size: snapshot.journal.len() as u64,
        attributes_size: snapshot.attributes.len() as u64,
        journal_records,
        attribute_entries,
        segments,
    })
}

async fn summarize(store: &SegmentStore, show_attributes: bool) -> CliResult<Vec<SegmentSummary>> {
    let mut segments = Vec::new();
    for name in store.segment_names() {
        let info = store
            .get_stream_segment_info(&name, false, INFO_TIMEOUT)?
            .await?;
        let attributes = show_attributes.then(|| {
            let mut attributes: Vec<(String, i64)> =
                info.attributes.iter().map(|(id, value)| (id.to_string(), *value)).collect();
            attributes.sort();
            attributes
        });
        segments.push(SegmentSummary {
            event_count: info.attribute(AttributeId::EVENT_COUNT),
            name: info.name,
            id: info.id.as_u64(),
            length: info.length,
            truncation_offset: info.truncation_offset,
            sealed: info.sealed,
            merged: info.merged,
            attributes,
        });
    }
    Ok(segments)
}

fn print_text_output(result: &InspectResult) {
    println!("Segment Store Inspection");
    println!("========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Journal size:    {}", format_size(result.journal_size));
    println!("  Attribute index: {}", format_size(result.attributes_size));
    println!();
    println!("Records:");
    println!("  Journal records:   {}", result.journal_records);
    println!("  Attribute entries: {}", result.attribute_entries);
    println!();
    println!("Segments ({}):", result.segments.len());
    for segment in &result.segments {
        let state = if segment.merged {
            "merged"
        } else if segment.sealed {
            "sealed"
        } else {
            "active"
        };
        print!(
            "  [{}] {} {} length={} truncated_at={}",
            segment.id, segment.name, state, segment.length, segment.truncation_offset
        );
        if let Some(count) = segment.event_count {
            print!(" events={count}");
        }
        println!();
        for (id, value) in segment.attributes.iter().flatten() {
            println!("      {id} = {value}");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
