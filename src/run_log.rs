// src/run_log.rs
//! Run artifacts: a JSON report per run plus a plain-text append-only log,
//! both addressed by run id under the data directory. These are the only
//! durable operator-facing outputs the pipeline owns.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::types::RunReport;

#[derive(Debug, Clone)]
pub struct RunHandle {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub log_path: PathBuf,
    pub report_path: PathBuf,
}

/// Create the run directories, allocate a run id, and write the opening
/// log line.
pub fn start_run(data_dir: &Path) -> Result<RunHandle> {
    let runs_dir = data_dir.join("runs");
    let logs_dir = data_dir.join("logs");
    fs::create_dir_all(&runs_dir)
        .with_context(|| format!("creating {}", runs_dir.display()))?;
    fs::create_dir_all(&logs_dir)
        .with_context(|| format!("creating {}", logs_dir.display()))?;

    let started_at = Utc::now();
    let run_id = format!("signals_{}", started_at.timestamp_millis());
    let log_path = logs_dir.join(format!("{run_id}.log"));
    let report_path = runs_dir.join(format!("{run_id}.json"));
    fs::write(
        &log_path,
        format!("[{}] run_start {run_id}\n", started_at.to_rfc3339()),
    )
    .with_context(|| format!("writing {}", log_path.display()))?;

    Ok(RunHandle {
        run_id,
        started_at,
        log_path,
        report_path,
    })
}

/// Append one lifecycle line. Log trouble is reported, never fatal: the
/// run's correctness does not depend on its narration.
pub fn append(run: &RunHandle, message: &str) {
    let line = format!("[{}] {message}\n", Utc::now().to_rfc3339());
    let appended = fs::OpenOptions::new()
        .append(true)
        .open(&run.log_path)
        .and_then(|mut f| f.write_all(line.as_bytes()));
    if let Err(err) = appended {
        tracing::warn!(error = %err, path = %run.log_path.display(), "run log append failed");
    }
}

/// Write the final JSON report.
pub fn finalize(run: &RunHandle, report: &RunReport) -> Result<()> {
    let payload = serde_json::to_string_pretty(report).context("serializing run report")?;
    fs::write(&run.report_path, payload)
        .with_context(|| format!("writing {}", run.report_path.display()))?;
    Ok(())
}

/// Read a stored report back (operator tooling, tests).
pub fn load_report(path: &Path) -> Result<RunReport> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).context("parsing run report")
}
