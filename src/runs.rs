//! Run discovery and dispatch.
//!
//! A run is one `.jsonl` event log paired with the `.stderr` trace log
//! sharing its filename stem. Runs are independent: each one is parsed,
//! derived, and rendered on a worker pool with no shared state, and a
//! failing run never aborts its siblings.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::thread;

use anyhow::{bail, Context, Result};
use tracing::{error, info};
use workerpool::thunk::{Thunk, ThunkWorker};
use workerpool::Pool;

use crate::chart::render_chart;
use crate::event_log::read_event_log;
use crate::series::RunSeries;
use crate::trace_log::read_trace_log;

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPair {
    pub name: String,
    pub event_log: PathBuf,
    pub trace_log: PathBuf,
}

/// Enumerate `.jsonl` and `.stderr` files in `input` and pair them by
/// filename stem, sorted by name. Every file must have a partner; unpaired
/// stems fail discovery before any work is dispatched.
pub fn discover_runs(input: &Path) -> Result<Vec<RunPair>> {
    let mut event_logs: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut trace_logs: BTreeMap<String, PathBuf> = BTreeMap::new();

    let entries =
        fs::read_dir(input).with_context(|| format!("failed to list {}", input.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("failed to list {}", input.display()))?
            .path();
        let stem = path.file_stem().and_then(OsStr::to_str);
        let ext = path.extension().and_then(OsStr::to_str);
        let (Some(stem), Some(ext)) = (stem, ext) else {
            continue;
        };
        match ext {
            "jsonl" => {
                event_logs.insert(stem.to_owned(), path);
            }
            "stderr" => {
                trace_logs.insert(stem.to_owned(), path);
            }
            _ => {}
        }
    }

    let unpaired: Vec<&str> = event_logs
        .keys()
        .filter(|stem| !trace_logs.contains_key(*stem))
        .chain(trace_logs.keys().filter(|stem| !event_logs.contains_key(*stem)))
        .map(String::as_str)
        .collect();
    if !unpaired.is_empty() {
        bail!(
            "unpaired log files in {}: {}",
            input.display(),
            unpaired.join(", ")
        );
    }

    let mut trace_logs = trace_logs;
    Ok(event_logs
        .into_iter()
        .map(|(name, event_log)| {
            let trace_log = trace_logs
                .remove(&name)
                .expect("every event log stem has a trace log");
            RunPair {
                name,
                event_log,
                trace_log,
            }
        })
        .collect())
}

/// Parse both logs, derive the panel series, and render one image.
fn process_run(pair: &RunPair, output: &Path) -> Result<()> {
    let events = read_event_log(&pair.event_log)?;
    let trace = read_trace_log(&pair.trace_log)?;
    let series = RunSeries::derive(&events, &trace)?;
    let image = render_chart(&events.name, &series, output)?;
    info!(run = %pair.name, image = %image.display(), "rendered");
    Ok(())
}

/// Process every discovered run on a fixed-size worker pool sized to the
/// available CPU parallelism. All runs are submitted up front and run to
/// completion; per-run failures are logged and reported collectively once
/// the pool has drained.
pub fn plot_all(input: &Path, output: &Path) -> Result<()> {
    let runs = discover_runs(input)?;
    if runs.is_empty() {
        info!(input = %input.display(), "no runs found");
        return Ok(());
    }
    fs::create_dir_all(output)
        .with_context(|| format!("failed to create {}", output.display()))?;

    let workers = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1);
    let pool = Pool::<ThunkWorker<(String, Result<()>)>>::new(workers);
    let (tx, rx) = channel();

    let total = runs.len();
    info!(runs = total, workers, "dispatching");
    for pair in runs {
        let output = output.to_path_buf();
        pool.execute_to(
            tx.clone(),
            Thunk::of(move || {
                let result = process_run(&pair, &output);
                (pair.name, result)
            }),
        );
    }

    let mut failed = 0usize;
    for (name, result) in rx.iter().take(total) {
        if let Err(err) = result {
            failed += 1;
            error!(run = %name, "run failed: {err:#}");
        }
    }
    pool.join();

    if failed > 0 {
        bail!("{failed} of {total} runs failed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").unwrap();
    }

    #[test]
    fn test_discovery_pairs_by_stem() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "b.jsonl");
        touch(dir.path(), "a.jsonl");
        touch(dir.path(), "a.stderr");
        touch(dir.path(), "b.stderr");
        touch(dir.path(), "notes.txt");

        let runs = discover_runs(dir.path()).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].name, "a");
        assert_eq!(runs[1].name, "b");
        assert_eq!(runs[0].event_log, dir.path().join("a.jsonl"));
        assert_eq!(runs[0].trace_log, dir.path().join("a.stderr"));
    }

    #[test]
    fn test_unpaired_files_fail_discovery() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.jsonl");
        touch(dir.path(), "a.stderr");
        touch(dir.path(), "orphan.jsonl");

        let err = discover_runs(dir.path()).unwrap_err();
        assert!(err.to_string().contains("orphan"));
    }

    #[test]
    fn test_empty_directory_discovers_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(discover_runs(dir.path()).unwrap().is_empty());
    }
}
