use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Sentinel returned when a document holds no remote id for a target yet.
pub const NOT_SET: &str = "NOT_SET";

/// Mobile platform the artifact was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    AndroidHw,
    Ios,
}

impl Platform {
    pub const ALL: [&'static str; 3] = ["android", "android_hw", "ios"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::AndroidHw => "android_hw",
            Platform::Ios => "ios",
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "android" => Ok(Platform::Android),
            "android_hw" => Ok(Platform::AndroidHw),
            "ios" => Ok(Platform::Ios),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

/// Deployment environment the artifact targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    pub const ALL: [&'static str; 2] = ["production", "staging"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Environment::Production),
            "staging" => Ok(Environment::Staging),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// Build type, kept in its canonical capitalised spelling (`Debug`/`Release`)
/// because that is how the build system names output directories and how the
/// documents key their leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildType {
    Debug,
    Release,
}

impl BuildType {
    pub const ALL: [&'static str; 2] = ["Debug", "Release"];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Debug => "Debug",
            BuildType::Release => "Release",
        }
    }

    pub fn as_lower(&self) -> &'static str {
        match self {
            BuildType::Debug => "debug",
            BuildType::Release => "release",
        }
    }
}

impl FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Debug" => Ok(BuildType::Debug),
            "Release" => Ok(BuildType::Release),
            other => Err(format!("unknown build type: {other}")),
        }
    }
}

/// Application flavour shipped from the same source tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppVariant {
    Agent,
    Retail,
    Wallet,
}

impl AppVariant {
    pub const ALL: [&'static str; 3] = ["agent", "retail", "wallet"];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppVariant::Agent => "agent",
            AppVariant::Retail => "retail",
            AppVariant::Wallet => "wallet",
        }
    }
}

impl FromStr for AppVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(AppVariant::Agent),
            "retail" => Ok(AppVariant::Retail),
            "wallet" => Ok(AppVariant::Wallet),
            other => Err(format!("unknown app variant: {other}")),
        }
    }
}

/// Raw workflow invocation input.
///
/// Fields stay as strings so [`crate::validate::validate_request`] can report
/// out-of-enumeration values instead of failing at parse time; downstream
/// code converts to the typed enums exactly once, after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub platform: String,
    pub environment: String,
    pub build_type: String,
    pub app_variant: String,
    pub version: String,
    pub build_id: String,
    pub source_build_url: String,
    /// Optional override for the artifact base path (e.g. an NFS mount).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_folder: Option<String>,
}

/// Request fields after successful validation, parsed once into enums.
#[derive(Debug, Clone, Copy)]
pub struct RequestTarget {
    pub platform: Platform,
    pub environment: Environment,
    pub build_type: BuildType,
    pub app_variant: AppVariant,
}

impl RequestTarget {
    /// Parse the enum-valued fields of a request.
    ///
    /// Intended to be called only after `validate_request` returned no
    /// violations; a parse failure here still surfaces as a validation error
    /// rather than a panic.
    pub fn from_request(req: &WorkflowRequest) -> Result<Self, WorkflowError> {
        let parse = || -> Result<Self, String> {
            Ok(Self {
                platform: req.platform.parse()?,
                environment: req.environment.parse()?,
                build_type: req.build_type.parse()?,
                app_variant: req.app_variant.parse()?,
            })
        };
        parse().map_err(|e| WorkflowError::Validation(vec![e]))
    }
}

/// Metadata for a verified local artifact. Derived once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 over the full file content. The algorithm is fixed
    /// system-wide; audit records store it for later integrity comparison.
    pub sha256: String,
    pub extension: String,
    pub modified_at: Option<DateTime<Utc>>,
}

/// Outcome of a successful artifact upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResult {
    /// Opaque remote handle (e.g. `bs://1a2b3c...`).
    pub remote_id: String,
    pub correlation_id: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Reference to the review request opened for the config change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub branch: String,
    pub commit: String,
    pub number: u64,
    pub url: String,
}

/// Terminal workflow status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowStatus {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

/// Per-step completion marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failed,
    Skipped,
}

/// The nine pipeline steps, with stable keys for the result document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    Validate,
    VerifyArtifact,
    Upload,
    PrepareRepo,
    UpdateDocuments,
    CommitPush,
    ChangeRequest,
    Notify,
    Audit,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::Validate => "validate",
            WorkflowStep::VerifyArtifact => "verify_artifact",
            WorkflowStep::Upload => "upload",
            WorkflowStep::PrepareRepo => "prepare_repo",
            WorkflowStep::UpdateDocuments => "update_documents",
            WorkflowStep::CommitPush => "commit_push",
            WorkflowStep::ChangeRequest => "change_request",
            WorkflowStep::Notify => "notify",
            WorkflowStep::Audit => "audit",
        }
    }
}

/// Error category surfaced in the result document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Configuration,
    NotFound,
    Permission,
    Format,
    Transport,
    InvalidResponse,
    GitOperation,
    Notification,
}

/// Workflow error taxonomy. Every fatal category aborts the pipeline at the
/// step it occurs; non-fatal categories (notification) are downgraded to
/// warnings by the orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("parameter validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("artifact not found: {0}")]
    NotFound(String),
    #[error("artifact not readable: {0}")]
    Permission(String),
    #[error("invalid artifact format: {0}")]
    Format(String),
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },
    #[error("invalid remote response: {0}")]
    InvalidResponse(String),
    #[error("git operation failed: {0}")]
    GitOperation(String),
    #[error("notification failed: {0}")]
    Notification(String),
}

impl WorkflowError {
    pub fn transport(message: impl Into<String>, retryable: bool) -> Self {
        WorkflowError::Transport {
            message: message.into(),
            retryable,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            WorkflowError::Validation(_) => ErrorCategory::Validation,
            WorkflowError::Configuration(_) => ErrorCategory::Configuration,
            WorkflowError::NotFound(_) => ErrorCategory::NotFound,
            WorkflowError::Permission(_) => ErrorCategory::Permission,
            WorkflowError::Format(_) => ErrorCategory::Format,
            WorkflowError::Transport { .. } => ErrorCategory::Transport,
            WorkflowError::InvalidResponse(_) => ErrorCategory::InvalidResponse,
            WorkflowError::GitOperation(_) => ErrorCategory::GitOperation,
            WorkflowError::Notification(_) => ErrorCategory::Notification,
        }
    }

    /// Whether the retry helper may re-attempt the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::Transport { retryable: true, .. })
    }
}

/// Error detail embedded in a FAILED result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&WorkflowError> for ErrorDetail {
    fn from(err: &WorkflowError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// The sole externally observable output of the orchestrator.
///
/// Always fully populated: a failed run still carries every marker and
/// whatever artifacts were produced before the failing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub request: WorkflowRequest,
    pub steps: BTreeMap<String, StepOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_remote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_request: Option<ChangeRequest>,
    #[serde(default)]
    pub touched_paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

impl WorkflowReport {
    pub fn new(request: WorkflowRequest) -> Self {
        Self {
            status: WorkflowStatus::Failed,
            started_at: Utc::now(),
            finished_at: None,
            request,
            steps: BTreeMap::new(),
            artifact: None,
            upload: None,
            prior_remote_id: None,
            change_request: None,
            touched_paths: Vec::new(),
            audit_path: None,
            notified: None,
            error: None,
        }
    }

    pub fn mark(&mut self, step: WorkflowStep, outcome: StepOutcome) {
        self.steps.insert(step.as_str().to_string(), outcome);
    }

    pub fn outcome(&self, step: WorkflowStep) -> Option<StepOutcome> {
        self.steps.get(step.as_str()).copied()
    }
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trips_through_str() {
        for s in Platform::ALL {
            let p: Platform = s.parse().expect("parse");
            assert_eq!(p.as_str(), s);
        }
        assert!("windows".parse::<Platform>().is_err());
    }

    #[test]
    fn build_type_keeps_canonical_capitalisation() {
        let bt: BuildType = "Release".parse().expect("parse");
        assert_eq!(bt.as_str(), "Release");
        assert_eq!(bt.as_lower(), "release");
        assert!("release".parse::<BuildType>().is_err());
    }

    #[test]
    fn error_categories_serialize_snake_case() {
        let err = WorkflowError::NotFound("missing.apk".to_string());
        let detail = ErrorDetail::from(&err);
        let json = serde_json::to_string(&detail).expect("serialize");
        assert!(json.contains("\"category\":\"not_found\""));
    }

    #[test]
    fn only_retryable_transport_errors_are_retryable() {
        assert!(WorkflowError::transport("503", true).is_retryable());
        assert!(!WorkflowError::transport("401", false).is_retryable());
        assert!(!WorkflowError::GitOperation("push failed".into()).is_retryable());
    }

    #[test]
    fn report_marks_steps_by_stable_key() {
        let req = WorkflowRequest {
            platform: "android".into(),
            environment: "staging".into(),
            build_type: "Release".into(),
            app_variant: "agent".into(),
            version: "1.2.0".into(),
            build_id: "b-42".into(),
            source_build_url: "https://x/42".into(),
            src_folder: None,
        };
        let mut report = WorkflowReport::new(req);
        report.mark(WorkflowStep::Upload, StepOutcome::Success);
        assert_eq!(report.outcome(WorkflowStep::Upload), Some(StepOutcome::Success));
        let json = serde_json::to_string(&report).expect("serialize");
        assert!(json.contains("\"upload\":\"success\""));
        assert!(json.contains("\"status\":\"FAILED\""));
    }

    #[test]
    fn workflow_report_round_trips_json() {
        let req = WorkflowRequest {
            platform: "ios".into(),
            environment: "production".into(),
            build_type: "Debug".into(),
            app_variant: "wallet".into(),
            version: "2.0.0".into(),
            build_id: "b-7".into(),
            source_build_url: "https://ci/7".into(),
            src_folder: Some("/mnt/builds".into()),
        };
        let mut report = WorkflowReport::new(req);
        report.status = WorkflowStatus::Success;
        report.upload = Some(UploadResult {
            remote_id: "bs://abc".into(),
            correlation_id: "ios-wallet".into(),
            uploaded_at: Utc::now(),
        });

        let json = serde_json::to_string_pretty(&report).expect("serialize");
        let parsed: WorkflowReport = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.status, WorkflowStatus::Success);
        assert_eq!(parsed.upload.expect("upload").remote_id, "bs://abc");
    }

    #[test]
    fn duration_helpers_accept_humantime_strings() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(
                deserialize_with = "deserialize_duration",
                serialize_with = "serialize_duration"
            )]
            d: Duration,
        }

        let w: Wrapper = serde_json::from_str(r#"{"d":"5m"}"#).expect("deserialize");
        assert_eq!(w.d, Duration::from_secs(300));
        let json = serde_json::to_string(&w).expect("serialize");
        assert!(json.contains("5m"));
    }
}
