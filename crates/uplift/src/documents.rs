//! YAML configuration document mutator.
//!
//! Each (platform, variant) pair owns its own document so concurrent
//! pipelines do not collide on merge. The leaf record at
//! `apps.{variant}.{environment}.{build_type}` is replaced wholesale; a
//! shared metadata document additionally tracks the latest update per
//! target. Unrelated keys keep their original order so review diffs stay
//! minimal.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_yaml::{Mapping, Value};

use crate::config::DocumentConfig;
use crate::types::{NOT_SET, RequestTarget, WorkflowError};

const UPDATED_BY: &str = "devops-automation";

pub struct DocumentSet {
    config: DocumentConfig,
    repo_root: PathBuf,
}

impl DocumentSet {
    pub fn new(config: DocumentConfig, repo_root: &Path) -> Self {
        Self {
            config,
            repo_root: repo_root.to_path_buf(),
        }
    }

    /// Read the remote id currently recorded for the target.
    ///
    /// Any missing link in the chain, an unreadable file included, yields
    /// the sentinel rather than an error: a fresh repository simply has
    /// nothing recorded yet.
    pub fn read_current(&self, target: &RequestTarget) -> String {
        let file = self.variant_file(target);
        let content = match std::fs::read_to_string(&file) {
            Ok(c) => c,
            Err(_) => return NOT_SET.to_string(),
        };
        let doc: Value = match serde_yaml::from_str(&content) {
            Ok(d) => d,
            Err(_) => return NOT_SET.to_string(),
        };

        doc.get("apps")
            .and_then(|v| v.get(target.app_variant.as_str()))
            .and_then(|v| v.get(target.environment.as_str()))
            .and_then(|v| v.get(target.build_type.as_str()))
            .and_then(|v| v.get("remote_id"))
            .and_then(|v| v.as_str())
            .unwrap_or(NOT_SET)
            .to_string()
    }

    /// Write the new remote id into the variant document and refresh the
    /// shared metadata document. Returns the repo-relative paths touched,
    /// variant file first.
    pub fn apply(
        &self,
        target: &RequestTarget,
        remote_id: &str,
        version: &str,
        build_id: &str,
    ) -> Result<Vec<String>, WorkflowError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let variant_file = self.variant_file(target);
        self.update_variant_file(&variant_file, target, remote_id, version, build_id, &timestamp)?;

        let shared_file = self.repo_root.join(&self.config.shared_file);
        self.update_shared_file(&shared_file, target, build_id, &timestamp)?;

        Ok(vec![
            self.relative(&variant_file),
            self.relative(&shared_file),
        ])
    }

    fn variant_file(&self, target: &RequestTarget) -> PathBuf {
        self.repo_root
            .join(self.config.file_for(target.platform, target.app_variant))
    }

    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.repo_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn update_variant_file(
        &self,
        file: &Path,
        target: &RequestTarget,
        remote_id: &str,
        version: &str,
        build_id: &str,
        timestamp: &str,
    ) -> Result<(), WorkflowError> {
        let mut doc = load_document(file)?;

        let apps = child_mapping(&mut doc, "apps")?;
        let variant = child_mapping(apps, target.app_variant.as_str())?;
        let environment = child_mapping(variant, target.environment.as_str())?;

        let mut leaf = Mapping::new();
        leaf.insert("remote_id".into(), remote_id.into());
        // kept alongside remote_id for consumers that read the raw URL
        leaf.insert("app_url".into(), remote_id.into());
        leaf.insert("version".into(), version.into());
        leaf.insert("build_id".into(), build_id.into());
        leaf.insert("build_type".into(), target.build_type.as_str().into());
        leaf.insert("environment".into(), target.environment.as_str().into());
        leaf.insert("updated_at".into(), timestamp.into());
        environment.insert(target.build_type.as_str().into(), Value::Mapping(leaf));

        write_document(file, &doc)
    }

    fn update_shared_file(
        &self,
        file: &Path,
        target: &RequestTarget,
        build_id: &str,
        timestamp: &str,
    ) -> Result<(), WorkflowError> {
        let mut doc = load_document(file)?;

        let browserstack = child_mapping(&mut doc, "browserstack")?;
        if browserstack.is_empty() {
            browserstack.insert("dashboard".into(), "https://app-live.browserstack.com".into());
            browserstack.insert("api_version".into(), "v1".into());
            browserstack.insert("retention_days".into(), 30.into());
        }
        browserstack.insert("last_updated".into(), timestamp.into());

        let artifacts = child_mapping(&mut doc, "artifacts")?;
        let platform = child_mapping(artifacts, target.platform.as_str())?;

        let mut summary = Mapping::new();
        summary.insert("last_updated".into(), timestamp.into());
        summary.insert("last_updated_by".into(), UPDATED_BY.into());
        summary.insert("last_build_id".into(), build_id.into());
        summary.insert(
            "updated_targets".into(),
            Value::Sequence(vec![
                format!(
                    "{}/{}",
                    target.environment.as_str(),
                    target.build_type.as_str()
                )
                .into(),
            ]),
        );
        platform.insert(target.app_variant.as_str().into(), Value::Mapping(summary));

        write_document(file, &doc)
    }
}

/// Load a document as a root mapping, starting empty when absent.
fn load_document(file: &Path) -> Result<Mapping, WorkflowError> {
    let content = match std::fs::read_to_string(file) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Mapping::new()),
        Err(e) => {
            return Err(WorkflowError::Permission(format!(
                "cannot read document {}: {e}",
                file.display()
            )));
        }
    };
    if content.trim().is_empty() {
        return Ok(Mapping::new());
    }
    let value: Value = serde_yaml::from_str(&content).map_err(|e| {
        WorkflowError::Configuration(format!("document {} is not valid YAML: {e}", file.display()))
    })?;
    match value {
        Value::Mapping(map) => Ok(map),
        other => Err(WorkflowError::Configuration(format!(
            "document {} must be a mapping at the top level, found {}",
            file.display(),
            node_kind(&other)
        ))),
    }
}

/// Navigate to a child mapping, inserting an empty one when missing. An
/// existing non-mapping node is a configuration error, not something to
/// silently overwrite.
fn child_mapping<'a>(parent: &'a mut Mapping, key: &str) -> Result<&'a mut Mapping, WorkflowError> {
    let entry = parent
        .entry(Value::String(key.to_string()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    match entry {
        Value::Mapping(map) => Ok(map),
        other => Err(WorkflowError::Configuration(format!(
            "document node {key:?} holds a {} where a mapping was expected",
            node_kind(other)
        ))),
    }
}

fn node_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

fn write_document(file: &Path, doc: &Mapping) -> Result<(), WorkflowError> {
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            WorkflowError::Permission(format!(
                "cannot create document directory {}: {e}",
                parent.display()
            ))
        })?;
    }
    let content = serde_yaml::to_string(doc).map_err(|e| {
        WorkflowError::Configuration(format!(
            "cannot serialize document {}: {e}",
            file.display()
        ))
    })?;
    std::fs::write(file, content).map_err(|e| {
        WorkflowError::Permission(format!("cannot write document {}: {e}", file.display()))
    })
}
