//! Verify command implementation.

use crate::error::{CliError, CliResult};
use crate::snapshot::{runtime, StoreSnapshot};
use segstore_core::{OperationLog, PersistentAttributeStore};
use segstore_storage::InMemoryBackend;
use std::path::Path;

/// Verification result for one file.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of records checked.
    pub records_checked: usize,
    /// Damage that would stop the store from opening.
    pub problems: Vec<String>,
    /// Findings that replay repairs on its own.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, check_journal: bool, check_attributes: bool) -> CliResult<()> {
    let snapshot = StoreSnapshot::load(path)?;
    println!("Verifying segment store at {}", snapshot.path.display());
    println!();

    let mut problems = 0;

    if check_journal {
        println!("Checking journal...");
        let result = verify_journal(&snapshot)?;
        print_result("Journal", &result);
        problems += result.problems.len();
    }

    if check_attributes {
        println!("Checking attribute index...");
        let result = verify_attributes(&snapshot)?;
        print_result("Attribute index", &result);
        problems += result.problems.len();
    }

    println!();
    if problems == 0 {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed");
        Err(CliError::VerificationFailed(problems))
    }
}

/// Checks record framing and checksums, then replays the journal.
pub fn verify_journal(snapshot: &StoreSnapshot) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let log = OperationLog::new(Box::new(InMemoryBackend::with_data(snapshot.journal.clone())), false);

    let mut records = log.iter()?;
    for item in records.by_ref() {
        match item {
            Ok(_) => result.records_checked += 1,
            Err(e) => {
                result.problems.push(e.to_string());
                break;
            }
        }
    }

    if result.is_ok() {
        let torn = records.total_size() - records.position();
        if torn > 0 {
            result.warnings.push(format!(
                "{torn} trailing byte(s) at offset {} belong to an incomplete record",
                records.position()
            ));
        }
        drop(records);

        // Framing is intact; replay catches records that contradict each other.
        let replay = runtime()?.block_on(async {
            let store = snapshot.open_store()?;
            store.shutdown()?;
            Ok::<_, CliError>(())
        });
        if let Err(e) = replay {
            result.problems.push(format!("replay failed: {e}"));
        }
    }

    Ok(result)
}

/// Checks that every attribute index record decodes.
pub fn verify_attributes(snapshot: &StoreSnapshot) -> CliResult<VerifyResult> {
    let mut result = VerifyResult::default();
    let original = snapshot.attributes.len() as u64;

    match PersistentAttributeStore::open(Box::new(InMemoryBackend::with_data(snapshot.attributes.clone())), false) {
        Ok(store) => {
            result.records_checked = store.live_entries();
            let kept = store.log_size()?;
            if kept < original {
                result
                    .warnings
                    .push(format!("{} trailing byte(s) belong to an incomplete record", original - kept));
            }
        }
        Err(e) => result.problems.push(e.to_string()),
    }

    Ok(result)
}

fn print_result(name: &str, result: &VerifyResult) {
    let status = if result.is_ok() { "✓" } else { "✗" };
    println!("  {status} {name}: {} record(s) checked", result.records_checked);
    for warning in &result.warnings {
        println!("    warning: {warning}");
    }
    for problem in &result.problems {
        println!("    error: {problem}");
    }
}
