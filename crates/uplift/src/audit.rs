//! Per-run audit records.
//!
//! Every run writes one JSON record carrying the full workflow report.
//! The name is deterministic per (platform, variant, build id) so a re-run
//! of the same build overwrites its own record instead of piling up files.
//! Writes go through a tmp-then-rename so a crash never leaves a partial
//! record behind.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::{WorkflowError, WorkflowReport};

/// Write the audit record for the run and return its path.
pub fn record(dir: &Path, report: &WorkflowReport) -> Result<PathBuf, WorkflowError> {
    fs::create_dir_all(dir).map_err(|e| {
        WorkflowError::Permission(format!(
            "cannot create audit directory {}: {e}",
            dir.display()
        ))
    })?;

    let path = dir.join(format!(
        "audit-trail-{}-{}-{}.json",
        report.request.platform, report.request.app_variant, report.request.build_id
    ));
    atomic_write_json(&path, report)?;
    Ok(path)
}

fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), WorkflowError> {
    let tmp = path.with_extension("tmp");
    let data = serde_json::to_vec_pretty(value).map_err(|e| {
        WorkflowError::Configuration(format!("cannot serialize audit record: {e}"))
    })?;

    {
        let mut f = fs::File::create(&tmp).map_err(|e| {
            WorkflowError::Permission(format!("cannot create tmp file {}: {e}", tmp.display()))
        })?;
        f.write_all(&data).map_err(|e| {
            WorkflowError::Permission(format!("cannot write tmp file {}: {e}", tmp.display()))
        })?;
        f.sync_all().ok();
    }

    fs::rename(&tmp, path).map_err(|e| {
        WorkflowError::Permission(format!(
            "cannot rename tmp file {} to {}: {e}",
            tmp.display(),
            path.display()
        ))
    })?;

    fsync_parent_dir(path);

    Ok(())
}

/// Errors are ignored because not every platform supports opening a
/// directory for sync.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent)
    {
        let _ = dir.sync_all();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::types::{StepOutcome, WorkflowReport, WorkflowRequest, WorkflowStep};

    fn report() -> WorkflowReport {
        let request = WorkflowRequest {
            platform: "android".to_string(),
            environment: "staging".to_string(),
            build_type: "Release".to_string(),
            app_variant: "agent".to_string(),
            version: "1.2.3".to_string(),
            build_id: "b42".to_string(),
            source_build_url: "https://ci/42".to_string(),
            src_folder: None,
        };
        let mut report = WorkflowReport::new(request);
        report.mark(WorkflowStep::Validate, StepOutcome::Success);
        report
    }

    #[test]
    fn writes_a_deterministically_named_record() {
        let td = tempdir().expect("tempdir");
        let path = record(td.path(), &report()).expect("record");
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some("audit-trail-android-agent-b42.json")
        );
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn record_round_trips_the_report() {
        let td = tempdir().expect("tempdir");
        let path = record(td.path(), &report()).expect("record");

        let content = std::fs::read_to_string(&path).expect("read record");
        let parsed: WorkflowReport = serde_json::from_str(&content).expect("parse record");
        assert_eq!(parsed.request.build_id, "b42");
        assert_eq!(
            parsed.outcome(WorkflowStep::Validate),
            Some(StepOutcome::Success)
        );
    }

    #[test]
    fn rerun_overwrites_the_same_record() {
        let td = tempdir().expect("tempdir");
        let first = record(td.path(), &report()).expect("first record");
        let second = record(td.path(), &report()).expect("second record");
        assert_eq!(first, second);
        assert_eq!(std::fs::read_dir(td.path()).expect("dir").count(), 1);
    }

    #[test]
    fn creates_missing_audit_directory() {
        let td = tempdir().expect("tempdir");
        let nested = td.path().join("audit/records");
        let path = record(&nested, &report()).expect("record");
        assert!(path.starts_with(&nested));
    }
}
