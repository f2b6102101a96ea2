//! Artifact location and verification.
//!
//! Artifacts live on a shared filesystem laid out per platform, environment,
//! build type and app variant. [`resolve_artifact_path`] expands the
//! configured path template for the request, and [`verify_artifact`] gates
//! the upload: the file must exist, be readable, carry an accepted extension
//! and start with the ZIP magic bytes (both APK/AAB and IPA are ZIP
//! containers). Verification also captures the size, content digest and
//! mtime that end up in the workflow report.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::config::StorageConfig;
use crate::types::{ArtifactInfo, RequestTarget, WorkflowError};

/// ZIP local-file-header magic; shared by APK, AAB and IPA containers.
const ZIP_MAGIC: [u8; 2] = *b"PK";

const DIGEST_CHUNK: usize = 8 * 1024;

/// Expand the platform's path template for this request.
///
/// An explicit `src_folder` on the request overrides the configured base
/// path, which lets CI jobs point at a workspace-local build directory.
pub fn resolve_artifact_path(
    storage: &StorageConfig,
    target: &RequestTarget,
    src_folder: Option<&str>,
) -> Result<PathBuf, WorkflowError> {
    let template = storage.template_for(target.platform).ok_or_else(|| {
        WorkflowError::Configuration(format!(
            "no storage.path_templates entry for platform {}",
            target.platform.as_str()
        ))
    })?;

    let base = src_folder.unwrap_or(&storage.artifact_base_path);
    let path = template
        .replace("{base}", base)
        .replace("{platform}", target.platform.as_str())
        .replace("{environment}", target.environment.as_str())
        .replace("{build_type}", target.build_type.as_str())
        .replace("{build_type_lower}", target.build_type.as_lower())
        .replace("{app_variant}", target.app_variant.as_str());

    Ok(PathBuf::from(path))
}

/// Verify the artifact and collect its metadata.
///
/// Checks run in order and the first failure wins: existence, readability,
/// extension, container magic. The digest is streamed so large builds do
/// not get pulled into memory.
pub fn verify_artifact(
    storage: &StorageConfig,
    target: &RequestTarget,
    path: &Path,
) -> Result<ArtifactInfo, WorkflowError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WorkflowError::NotFound(format!(
                "artifact not found: {}",
                path.display()
            )));
        }
        Err(e) => {
            return Err(WorkflowError::Permission(format!(
                "cannot stat artifact {}: {e}",
                path.display()
            )));
        }
    };
    if !metadata.is_file() {
        return Err(WorkflowError::NotFound(format!(
            "artifact is not a regular file: {}",
            path.display()
        )));
    }

    let mut file = File::open(path).map_err(|e| {
        WorkflowError::Permission(format!("cannot read artifact {}: {e}", path.display()))
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_ascii_lowercase()))
        .unwrap_or_default();
    let accepted = storage.extensions_for(target.platform);
    let accepted_normalized: Vec<String> = accepted
        .iter()
        .map(|e| {
            let e = e.to_ascii_lowercase();
            if e.starts_with('.') { e } else { format!(".{e}") }
        })
        .collect();
    if !accepted_normalized.contains(&extension) {
        return Err(WorkflowError::Format(format!(
            "unexpected artifact extension {:?} for platform {}, accepted: {}",
            extension,
            target.platform.as_str(),
            accepted_normalized.join(", ")
        )));
    }

    let mut header = [0u8; 2];
    file.read_exact(&mut header).map_err(|e| {
        WorkflowError::Format(format!(
            "artifact too short to be a valid package {}: {e}",
            path.display()
        ))
    })?;
    if header != ZIP_MAGIC {
        return Err(WorkflowError::Format(format!(
            "artifact {} is not a valid package container (bad magic bytes)",
            path.display()
        )));
    }

    let mut hasher = Sha256::new();
    hasher.update(header);
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| {
            WorkflowError::Permission(format!("error reading artifact {}: {e}", path.display()))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let modified_at: Option<DateTime<Utc>> = metadata.modified().ok().map(DateTime::from);

    Ok(ArtifactInfo {
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        sha256: hex::encode(hasher.finalize()),
        extension,
        modified_at,
    })
}
