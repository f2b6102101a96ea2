//! Typed configuration loaded from a YAML file.
//!
//! Secret-shaped values are late-bound from the process environment: any
//! string of the form `${VAR}` is replaced at load time, and a reference to
//! an unset variable is a hard configuration error. After substitution the
//! document is parsed into typed sections and validated once; components
//! receive their section by value instead of traversing key paths at runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::types::{
    AppVariant, Platform, WorkflowError, deserialize_duration, serialize_duration,
};

/// BrowserStack App Automate upload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub username: String,
    pub access_key: String,
    /// Upload endpoint; lookups and deletes append `/{id}` to it.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Total upload timeout.
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout: Duration,
    /// TLS certificate verification. Disabling this is a security-relevant
    /// choice and is flagged as such at client construction.
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    /// Custom trust bundle (PEM) for corporate proxies.
    #[serde(default)]
    pub tls_ca_bundle: Option<PathBuf>,
}

/// Artifact location settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub artifact_base_path: String,
    /// Per-platform path templates with `{base}`, `{platform}`,
    /// `{environment}`, `{build_type}`, `{build_type_lower}` and
    /// `{app_variant}` placeholders.
    pub path_templates: BTreeMap<String, String>,
    /// Per-platform accepted artifact extensions (with or without the dot).
    pub accepted_extensions: BTreeMap<String, Vec<String>>,
}

impl StorageConfig {
    pub fn template_for(&self, platform: Platform) -> Option<&str> {
        self.path_templates.get(platform.as_str()).map(String::as_str)
    }

    pub fn extensions_for(&self, platform: Platform) -> Vec<String> {
        self.accepted_extensions
            .get(platform.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

/// Document naming inside the configuration repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// (platform → variant → file name) lookup table. Missing entries fall
    /// back to `{platform}_{variant}.yml`.
    #[serde(default)]
    pub files: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default = "default_shared_file")]
    pub shared_file: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            files: BTreeMap::new(),
            shared_file: default_shared_file(),
        }
    }
}

impl DocumentConfig {
    pub fn file_for(&self, platform: Platform, variant: AppVariant) -> String {
        self.files
            .get(platform.as_str())
            .and_then(|m| m.get(variant.as_str()))
            .cloned()
            .unwrap_or_else(|| format!("{}_{}.yml", platform.as_str(), variant.as_str()))
    }
}

/// Workflow mode for the configuration repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// Feature branch + review request.
    #[default]
    Review,
    /// Fast-forward an existing target branch and push directly.
    Direct,
}

/// Git repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    #[serde(default = "default_user_name")]
    pub user_name: String,
    #[serde(default = "default_user_email")]
    pub user_email: String,
    #[serde(default)]
    pub mode: PublishMode,
    /// Target branch for direct mode. Required when `mode: direct`.
    #[serde(default)]
    pub target_branch: Option<String>,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

/// GitHub API settings for opening the review request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    #[serde(default)]
    pub token: Option<String>,
    pub org: String,
    pub repo: String,
    #[serde(default = "default_github_api")]
    pub api_base: String,
}

/// Team-channel notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    #[serde(default = "default_notify_timeout")]
    pub timeout: Duration,
    /// Group mentioned in the notification body (e.g. "QA Team").
    #[serde(default)]
    pub mention_group: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: default_notify_timeout(),
            mention_group: None,
        }
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpliftConfig {
    pub browserstack: UploadConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub documents: DocumentConfig,
    pub git: GitConfig,
    pub github: GithubConfig,
    #[serde(default)]
    pub notifications: NotifyConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Directory audit records are written to.
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,
}

impl UpliftConfig {
    /// Load, substitute environment references, parse, and validate.
    pub fn load_from_file(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::Configuration(format!(
                "failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, WorkflowError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| WorkflowError::Configuration(format!("invalid config YAML: {e}")))?;
        let substituted = substitute_env(raw)?;
        let config: UpliftConfig = serde_yaml::from_value(substituted)
            .map_err(|e| WorkflowError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.browserstack.username.is_empty() || self.browserstack.access_key.is_empty() {
            return Err(WorkflowError::Configuration(
                "browserstack.username and browserstack.access_key are required".into(),
            ));
        }
        if self.browserstack.endpoint.is_empty() {
            return Err(WorkflowError::Configuration(
                "browserstack.endpoint must not be empty".into(),
            ));
        }
        if self.storage.path_templates.is_empty() {
            return Err(WorkflowError::Configuration(
                "storage.path_templates must configure at least one platform".into(),
            ));
        }
        if self.git.repo_url.is_empty() {
            return Err(WorkflowError::Configuration(
                "git.repo_url is required".into(),
            ));
        }
        if self.git.mode == PublishMode::Direct
            && self.git.target_branch.as_deref().unwrap_or("").is_empty()
        {
            return Err(WorkflowError::Configuration(
                "git.target_branch is required when git.mode is direct".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(WorkflowError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.base_delay.is_zero() {
            return Err(WorkflowError::Configuration(
                "retry.base_delay must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(WorkflowError::Configuration(
                "retry.jitter must be between 0.0 and 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Starter config, with secrets referenced via environment variables.
    pub fn sample_yaml_template() -> String {
        r#"browserstack:
  username: ${BROWSERSTACK_USER}
  access_key: ${BROWSERSTACK_KEY}
  upload_timeout: 5m

storage:
  artifact_base_path: /shared/builds
  path_templates:
    android: "{base}/{platform}/{environment}/{build_type}/{app_variant}/app-{build_type_lower}.apk"
    android_hw: "{base}/{platform}/{environment}/{build_type}/{app_variant}/app-{build_type_lower}.apk"
    ios: "{base}/{platform}/{environment}/{build_type}/{app_variant}/app.ipa"
  accepted_extensions:
    android: [.apk, .aab]
    android_hw: [.apk, .aab]
    ios: [.ipa]

documents:
  shared_file: shared.yml
  files:
    android:
      agent: android/agent.yml

git:
  repo_url: https://github.com/example/device-config
  default_branch: main
  mode: review

github:
  token: ${GITHUB_TOKEN}
  org: example
  repo: device-config

notifications:
  webhook_url: ${TEAMS_WEBHOOK_URL}

retry:
  max_attempts: 3
  base_delay: 2s
  backoff_factor: 2.0
"#
        .to_string()
    }
}

/// Recursively replace `${VAR}` strings with environment values.
fn substitute_env(value: serde_yaml::Value) -> Result<serde_yaml::Value, WorkflowError> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k, substitute_env(v)?);
            }
            Value::Mapping(out)
        }
        Value::Sequence(seq) => Value::Sequence(
            seq.into_iter()
                .map(substitute_env)
                .collect::<Result<_, _>>()?,
        ),
        Value::String(s) if s.starts_with("${") && s.ends_with('}') => {
            let var = &s[2..s.len() - 1];
            let resolved = std::env::var(var).map_err(|_| {
                WorkflowError::Configuration(format!("environment variable not set: {var}"))
            })?;
            Value::String(resolved)
        }
        other => other,
    })
}

fn default_endpoint() -> String {
    "https://api-cloud.browserstack.com/app-automate/upload".to_string()
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_true() -> bool {
    true
}

fn default_shared_file() -> String {
    "shared.yml".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_user_name() -> String {
    "DevOps Automation".to_string()
}

fn default_user_email() -> String {
    "devops@example.com".to_string()
}

fn default_branch_prefix() -> String {
    "browserstack-update".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_notify_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_audit_dir() -> PathBuf {
    PathBuf::from(".")
}
