//! # Uplift
//!
//! A publish pipeline for mobile build artifacts.
//!
//! Uplift takes a freshly built APK/AAB/IPA, uploads it to the BrowserStack
//! App Automate device cloud, and propagates the returned remote identifier
//! into a version-controlled YAML configuration repository through a
//! reviewed change. It replaces a pile of per-team shell scripts with one
//! auditable workflow.
//!
//! ## Features
//!
//! - **Fail-fast validation** — Every request field is checked up front and
//!   all violations are reported together, not one at a time.
//! - **Artifact verification** — Existence, readability, extension, and
//!   container magic bytes are checked before any network traffic, and a
//!   SHA-256 digest is captured for the audit trail.
//! - **Resilient uploads** — Transient transport failures and gateway
//!   statuses are retried with exponential backoff; auth and client errors
//!   fail immediately.
//! - **Low-conflict documents** — Each (platform, variant) pair owns its own
//!   YAML file, and unrelated keys keep their order so review diffs stay
//!   minimal.
//! - **Reviewed or direct publishing** — Review mode pushes a feature branch
//!   and opens a change request; direct mode fast-forwards a configured
//!   target branch.
//! - **Evidence capture** — Every run, failed ones included, writes an audit
//!   record and a fully populated result document.
//!
//! ## Pipeline
//!
//! The core flow is **validate → verify → upload → publish → notify →
//! audit**:
//!
//! 1. [`validate::validate_request`] collects every violation in the
//!    request.
//! 2. [`storage::verify_artifact`] gates the upload on the local file.
//! 3. [`upload::UploadClient`] pushes the artifact to the device cloud
//!    under the retry policy.
//! 4. [`documents::DocumentSet`] rewrites the configuration documents in a
//!    fresh clone, [`git::ChangePublisher`] commits, pushes, and opens the
//!    change request.
//! 5. [`webhook::notify`] tells the team channel, best-effort.
//! 6. [`audit::record`] persists the run's evidence.
//!
//! [`engine::run_workflow`] drives all of it and always returns a
//! [`types::WorkflowReport`]; the CLI maps its status to the exit code.
//!
//! ## Key Types
//!
//! - `WorkflowRequest` — Raw invocation input (strings, validated as a whole)
//! - `RequestTarget` — The same request after parsing into typed enums
//! - `UpliftConfig` — Typed configuration with environment late-binding
//! - `WorkflowReport` — The sole externally observable output of a run
//! - `WorkflowError` — Error taxonomy with stable snake_case categories

pub mod audit;
pub mod config;
pub mod documents;
pub mod engine;
pub mod git;
pub mod retry;
pub mod storage;
pub mod types;
pub mod upload;
pub mod validate;
pub mod webhook;
