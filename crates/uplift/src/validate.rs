//! Workflow input validation.
//!
//! Pure checks over a [`WorkflowRequest`]; all violations are collected
//! rather than short-circuited so the caller can report everything at once.

use crate::types::{AppVariant, BuildType, Environment, Platform, WorkflowRequest};

/// Validate a workflow request.
///
/// Returns an empty list iff the request is usable. No network or file
/// system access happens here.
pub fn validate_request(req: &WorkflowRequest) -> Vec<String> {
    let mut errors = Vec::new();

    let required = [
        ("platform", &req.platform),
        ("environment", &req.environment),
        ("build_type", &req.build_type),
        ("app_variant", &req.app_variant),
        ("version", &req.version),
        ("build_id", &req.build_id),
        ("source_build_url", &req.source_build_url),
    ];
    for (name, value) in required {
        if value.is_empty() {
            errors.push(format!("missing required parameter: {name}"));
        }
    }

    check_enum(&mut errors, "platform", &req.platform, &Platform::ALL);
    check_enum(&mut errors, "environment", &req.environment, &Environment::ALL);
    check_enum(&mut errors, "build_type", &req.build_type, &BuildType::ALL);
    check_enum(&mut errors, "app_variant", &req.app_variant, &AppVariant::ALL);

    if !req.version.is_empty() && !is_valid_version(&req.version) {
        errors.push(format!(
            "invalid version format: {} (expected semantic version, e.g. 1.2.0 or 1.3.0-beta)",
            req.version
        ));
    }

    if !req.source_build_url.is_empty()
        && !req.source_build_url.starts_with("http://")
        && !req.source_build_url.starts_with("https://")
    {
        errors.push(format!(
            "invalid source_build_url: {} (must be an http(s) URL)",
            req.source_build_url
        ));
    }

    errors
}

fn check_enum(errors: &mut Vec<String>, name: &str, value: &str, allowed: &[&str]) {
    if !value.is_empty() && !allowed.contains(&value) {
        errors.push(format!(
            "invalid {name}: {value} (must be one of {})",
            allowed.join(", ")
        ));
    }
}

/// `MAJOR.MINOR.PATCH` with an optional `-prerelease` suffix limited to
/// alphanumerics and dots.
pub fn is_valid_version(version: &str) -> bool {
    let (core, prerelease) = match version.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (version, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    if !parts
        .iter()
        .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    {
        return false;
    }

    match prerelease {
        None => true,
        Some("") => false,
        Some(pre) => pre.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.'),
    }
}
