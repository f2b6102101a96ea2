//! Workflow orchestrator.
//!
//! [`run_workflow`] drives the nine-step pipeline and always returns a fully
//! populated [`WorkflowReport`], never an error: every failure mode ends up
//! inside the report as a status, a per-step marker, and an error detail.
//! Steps one through seven are fatal, aborting the remainder of the
//! pipeline. Notification and the audit record are best-effort; on a fatal
//! failure the notification is skipped but the audit record is still
//! attempted so failed runs leave a trace too.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::audit;
use crate::config::UpliftConfig;
use crate::documents::DocumentSet;
use crate::git::ChangePublisher;
use crate::storage::{resolve_artifact_path, verify_artifact};
use crate::types::{
    ErrorDetail, NOT_SET, RequestTarget, StepOutcome, WorkflowError, WorkflowReport,
    WorkflowRequest, WorkflowStatus, WorkflowStep,
};
use crate::upload::UploadClient;
use crate::validate::validate_request;
use crate::webhook::{self, NotifyContext};

/// Progress sink injected by the caller. The CLI writes prefixed lines to
/// stderr; tests collect messages in memory.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Run the full upload-and-publish workflow.
pub fn run_workflow(
    cfg: &UpliftConfig,
    request: WorkflowRequest,
    reporter: &mut dyn Reporter,
) -> WorkflowReport {
    let mut report = WorkflowReport::new(request);

    match execute(cfg, &mut report, reporter) {
        Ok(target) => {
            report.status = WorkflowStatus::Success;
            run_notify(cfg, &target, &mut report, reporter);
        }
        Err(err) => {
            reporter.error(&format!("workflow failed: {err}"));
            report.status = WorkflowStatus::Failed;
            report.error = Some(ErrorDetail::from(&err));
            report.mark(WorkflowStep::Notify, StepOutcome::Skipped);
        }
    }

    report.finished_at = Some(Utc::now());

    // the record captures its own step marker, so mark before writing
    report.mark(WorkflowStep::Audit, StepOutcome::Success);
    match audit::record(&cfg.audit_dir, &report) {
        Ok(path) => {
            reporter.info(&format!("audit record written to {}", path.display()));
            report.audit_path = Some(path);
        }
        Err(e) => {
            reporter.warn(&format!("could not write audit record: {e}"));
            report.mark(WorkflowStep::Audit, StepOutcome::Failed);
        }
    }

    report
}

/// The fatal portion of the pipeline, steps one through seven.
fn execute(
    cfg: &UpliftConfig,
    report: &mut WorkflowReport,
    reporter: &mut dyn Reporter,
) -> Result<RequestTarget, WorkflowError> {
    let version = report.request.version.clone();
    let build_id = report.request.build_id.clone();
    let source_build_url = report.request.source_build_url.clone();
    let src_folder = report.request.src_folder.clone();

    // 1. validate
    let violations = validate_request(&report.request);
    if !violations.is_empty() {
        report.mark(WorkflowStep::Validate, StepOutcome::Failed);
        return Err(WorkflowError::Validation(violations));
    }
    let target = match RequestTarget::from_request(&report.request) {
        Ok(t) => t,
        Err(e) => {
            report.mark(WorkflowStep::Validate, StepOutcome::Failed);
            return Err(e);
        }
    };
    report.mark(WorkflowStep::Validate, StepOutcome::Success);
    reporter.info(&format!(
        "request validated: {}/{}/{}/{} {}",
        target.platform.as_str(),
        target.app_variant.as_str(),
        target.environment.as_str(),
        target.build_type.as_str(),
        version
    ));

    // 2. verify artifact
    let result = resolve_artifact_path(&cfg.storage, &target, src_folder.as_deref())
        .and_then(|path| verify_artifact(&cfg.storage, &target, &path));
    let artifact = step(report, WorkflowStep::VerifyArtifact, result)?;
    reporter.info(&format!(
        "artifact verified: {} ({} bytes, sha256 {})",
        artifact.path.display(),
        artifact.size_bytes,
        artifact.sha256
    ));
    report.artifact = Some(artifact.clone());

    // 3. upload
    let correlation = correlation_id(&target, &version, Utc::now());
    let result = UploadClient::new(&cfg.browserstack, reporter).and_then(|client| {
        client.upload(
            &artifact.path,
            &correlation,
            &correlation,
            &cfg.retry,
            reporter,
        )
    });
    let upload = step(report, WorkflowStep::Upload, result)?;
    reporter.info(&format!("uploaded as {}", upload.remote_id));
    let remote_id = upload.remote_id.clone();
    report.upload = Some(upload);

    // 4. clone and branch
    let mut publisher = ChangePublisher::new(cfg.git.clone(), cfg.github.clone());
    let result = publisher
        .clone_repo(reporter)
        .and_then(|repo| publisher.prepare_branch(&target, &build_id, reporter).map(|_| repo));
    let repo = step(report, WorkflowStep::PrepareRepo, result)?;

    let docs = DocumentSet::new(cfg.documents.clone(), &repo);
    let prior = docs.read_current(&target);
    reporter.info(&format!("current remote id: {prior}"));
    report.prior_remote_id = Some(prior.clone());

    // 5. mutate documents
    let result = docs.apply(&target, &remote_id, &version, &build_id);
    let touched = step(report, WorkflowStep::UpdateDocuments, result)?;
    for path in &touched {
        reporter.info(&format!("updated {path}"));
    }
    report.touched_paths = touched.clone();

    // 6. commit and push
    let message = commit_message(&target, &version, &build_id);
    let result = publisher.commit_and_push(&touched, &message, reporter);
    step(report, WorkflowStep::CommitPush, result)?;

    // 7. change request
    let title = change_request_title(&target);
    let body = change_request_body(&target, &version, &build_id, &prior, &remote_id, &touched, &source_build_url);
    let result = publisher.create_change_request(
        &title,
        &body,
        &["browserstack", "auto-generated"],
        reporter,
    );
    let change_request = step(report, WorkflowStep::ChangeRequest, result)?;
    if change_request.is_none() {
        report.mark(WorkflowStep::ChangeRequest, StepOutcome::Skipped);
    }
    report.change_request = change_request;

    Ok(target)
}

fn run_notify(
    cfg: &UpliftConfig,
    target: &RequestTarget,
    report: &mut WorkflowReport,
    reporter: &mut dyn Reporter,
) {
    if cfg.notifications.webhook_url.is_none() {
        report.mark(WorkflowStep::Notify, StepOutcome::Skipped);
        return;
    }

    let document_file = cfg.documents.file_for(target.platform, target.app_variant);
    let old_remote_id = report.prior_remote_id.clone().unwrap_or_else(|| NOT_SET.to_string());
    let new_remote_id = report
        .upload
        .as_ref()
        .map(|u| u.remote_id.clone())
        .unwrap_or_default();
    let change_request_url = report.change_request.as_ref().map(|cr| cr.url.clone());
    let source_build_url = report.request.source_build_url.clone();
    let version = report.request.version.clone();

    let sent = webhook::notify(
        &cfg.notifications,
        &NotifyContext {
            target,
            version: &version,
            document_file: &document_file,
            old_remote_id: &old_remote_id,
            new_remote_id: &new_remote_id,
            change_request_url: change_request_url.as_deref(),
            source_build_url: &source_build_url,
        },
        reporter,
    );
    report.notified = Some(sent);
    report.mark(
        WorkflowStep::Notify,
        if sent { StepOutcome::Success } else { StepOutcome::Failed },
    );
}

fn step<T>(
    report: &mut WorkflowReport,
    which: WorkflowStep,
    result: Result<T, WorkflowError>,
) -> Result<T, WorkflowError> {
    match &result {
        Ok(_) => report.mark(which, StepOutcome::Success),
        Err(_) => report.mark(which, StepOutcome::Failed),
    }
    result
}

/// One id ties the run together across the upload, the documents, and the
/// audit record.
pub fn correlation_id(target: &RequestTarget, version: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}-{}-{}-{}",
        target.platform.as_str(),
        target.app_variant.as_str(),
        target.environment.as_str(),
        target.build_type.as_str(),
        version,
        at.format("%Y%m%d%H%M%S")
    )
}

fn commit_message(target: &RequestTarget, version: &str, build_id: &str) -> String {
    format!(
        "Update BrowserStack app ID for {}/{} {} {}\n\nBuild: {}\nVersion: {}",
        target.platform.as_str(),
        target.app_variant.as_str(),
        target.environment.as_str(),
        target.build_type.as_str(),
        build_id,
        version
    )
}

fn change_request_title(target: &RequestTarget) -> String {
    format!(
        "[BrowserStack] Update {}: {} {} {}",
        target.app_variant.as_str(),
        target.platform.as_str(),
        target.environment.as_str(),
        target.build_type.as_str()
    )
}

fn change_request_body(
    target: &RequestTarget,
    version: &str,
    build_id: &str,
    old_remote_id: &str,
    new_remote_id: &str,
    touched: &[String],
    source_build_url: &str,
) -> String {
    let mut body = format!(
        "## BrowserStack App Update\n\n\
         ### Build Information\n\
         - **Platform**: {}\n\
         - **Application**: {}\n\
         - **Environment**: {}\n\
         - **Build Type**: {}\n\
         - **Version**: {}\n\
         - **Build ID**: {}\n\n\
         ### App ID Change\n\
         - **Old App ID**: {}\n\
         - **New App ID**: {}\n\n\
         ### Files Updated\n",
        target.platform.as_str(),
        target.app_variant.as_str(),
        target.environment.as_str(),
        target.build_type.as_str(),
        version,
        build_id,
        old_remote_id,
        new_remote_id
    );
    for path in touched {
        body.push_str(&format!("- {path}\n"));
    }
    body.push_str(&format!(
        "\n### Links\n\
         - [Source Build]({source_build_url})\n\
         - [BrowserStack Dashboard](https://app-live.browserstack.com)\n\n\
         **Auto-generated by DevOps Automation**\n"
    ));
    body
}

/// Persist the result document. Attempted on failure too.
pub fn write_report(path: &Path, report: &WorkflowReport) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            WorkflowError::Permission(format!(
                "cannot create output directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    let data = serde_json::to_vec_pretty(report).map_err(|e| {
        WorkflowError::Configuration(format!("cannot serialize result document: {e}"))
    })?;
    std::fs::write(path, data).map_err(|e| {
        WorkflowError::Permission(format!("cannot write result document {}: {e}", path.display()))
    })
}
