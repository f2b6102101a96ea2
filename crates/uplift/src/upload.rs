//! BrowserStack App Automate upload client.
//!
//! Uploads go out as multipart POSTs with HTTP basic auth. The service
//! answers with a JSON body whose `app_url` field is the opaque remote
//! handle (`bs://...`) the rest of the workflow records. Transient
//! failures (connect errors, 429 and 5xx gateway statuses) are retried
//! under the configured policy; auth and client errors are terminal.

use std::path::Path;

use chrono::Utc;
use reqwest::blocking::multipart;

use crate::config::UploadConfig;
use crate::engine::Reporter;
use crate::retry::{RetryPolicy, run_with_retry};
use crate::types::{UploadResult, WorkflowError};

/// Statuses worth re-attempting: rate limits and gateway-side failures.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub struct UploadClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    username: String,
    access_key: String,
}

impl UploadClient {
    pub fn new(config: &UploadConfig, reporter: &mut dyn Reporter) -> Result<Self, WorkflowError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(config.upload_timeout);

        if !config.tls_verify {
            reporter.warn("TLS certificate verification is disabled for uploads");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(bundle) = &config.tls_ca_bundle {
            let pem = std::fs::read(bundle).map_err(|e| {
                WorkflowError::Configuration(format!(
                    "cannot read TLS CA bundle {}: {e}",
                    bundle.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                WorkflowError::Configuration(format!(
                    "invalid TLS CA bundle {}: {e}",
                    bundle.display()
                ))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        let http = builder
            .build()
            .map_err(|e| WorkflowError::Configuration(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            access_key: config.access_key.clone(),
        })
    }

    /// Upload the artifact, retrying transient failures.
    ///
    /// `custom_id` is the stable name the device cloud files the build
    /// under; `correlation_id` ties this upload to the workflow run.
    pub fn upload(
        &self,
        artifact: &Path,
        custom_id: &str,
        correlation_id: &str,
        policy: &RetryPolicy,
        reporter: &mut dyn Reporter,
    ) -> Result<UploadResult, WorkflowError> {
        let body = run_with_retry(
            policy,
            "upload",
            reporter,
            WorkflowError::is_retryable,
            || self.upload_once(artifact, custom_id),
        )?;

        let remote_id = body
            .get("app_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                WorkflowError::InvalidResponse(format!(
                    "upload response is missing the app_url field: {body}"
                ))
            })?
            .to_string();

        Ok(UploadResult {
            remote_id,
            correlation_id: correlation_id.to_string(),
            uploaded_at: Utc::now(),
        })
    }

    fn upload_once(
        &self,
        artifact: &Path,
        custom_id: &str,
    ) -> Result<serde_json::Value, WorkflowError> {
        // multipart forms are single-use, so each attempt rebuilds one
        let form = multipart::Form::new()
            .file("file", artifact)
            .map_err(|e| {
                WorkflowError::Permission(format!(
                    "cannot open artifact {} for upload: {e}",
                    artifact.display()
                ))
            })?
            .text("custom_id", custom_id.to_string());

        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.access_key))
            .multipart(form)
            .send()
            .map_err(|e| WorkflowError::transport(format!("upload request failed: {e}"), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = RETRYABLE_STATUSES.contains(&status.as_u16());
            let body = response.text().unwrap_or_default();
            return Err(WorkflowError::transport(
                format!("upload rejected with status {status}: {body}"),
                retryable,
            ));
        }

        response
            .json()
            .map_err(|e| WorkflowError::InvalidResponse(format!("upload response is not JSON: {e}")))
    }

    /// Fetch the service-side record for a previously uploaded build.
    ///
    /// Returns `None` when the remote id is unknown to the service. Used
    /// before overwriting a document entry, purely informationally.
    pub fn lookup(
        &self,
        remote_id: &str,
        policy: &RetryPolicy,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<serde_json::Value>, WorkflowError> {
        let url = self.id_url(remote_id);
        run_with_retry(policy, "lookup", reporter, WorkflowError::is_retryable, || {
            let response = self
                .http
                .get(&url)
                .basic_auth(&self.username, Some(&self.access_key))
                .send()
                .map_err(|e| {
                    WorkflowError::transport(format!("lookup request failed: {e}"), true)
                })?;

            let status = response.status();
            if status.as_u16() == 404 {
                return Ok(None);
            }
            if !status.is_success() {
                let retryable = RETRYABLE_STATUSES.contains(&status.as_u16());
                return Err(WorkflowError::transport(
                    format!("lookup rejected with status {status}"),
                    retryable,
                ));
            }
            response.json().map(Some).map_err(|e| {
                WorkflowError::InvalidResponse(format!("lookup response is not JSON: {e}"))
            })
        })
    }

    /// Remove a build from the service. Idempotent: a 404 counts as done.
    pub fn delete(
        &self,
        remote_id: &str,
        policy: &RetryPolicy,
        reporter: &mut dyn Reporter,
    ) -> Result<(), WorkflowError> {
        let url = self.id_url(remote_id);
        run_with_retry(policy, "delete", reporter, WorkflowError::is_retryable, || {
            let response = self
                .http
                .delete(&url)
                .basic_auth(&self.username, Some(&self.access_key))
                .send()
                .map_err(|e| {
                    WorkflowError::transport(format!("delete request failed: {e}"), true)
                })?;

            let status = response.status();
            if status.is_success() || status.as_u16() == 404 {
                return Ok(());
            }
            let retryable = RETRYABLE_STATUSES.contains(&status.as_u16());
            Err(WorkflowError::transport(
                format!("delete rejected with status {status}"),
                retryable,
            ))
        })
    }

    fn id_url(&self, remote_id: &str) -> String {
        let id = remote_id.strip_prefix("bs://").unwrap_or(remote_id);
        format!("{}/{id}", self.endpoint)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tempfile::tempdir;
    use tiny_http::{Response, Server, StatusCode};

    use super::*;

    struct NullReporter;

    impl Reporter for NullReporter {
        fn info(&mut self, _msg: &str) {}
        fn warn(&mut self, _msg: &str) {}
        fn error(&mut self, _msg: &str) {}
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        }
    }

    fn upload_config(endpoint: String) -> UploadConfig {
        UploadConfig {
            username: "user".to_string(),
            access_key: "key".to_string(),
            endpoint,
            upload_timeout: Duration::from_secs(5),
            tls_verify: true,
            tls_ca_bundle: None,
        }
    }

    /// Serve scripted (status, body) responses, counting requests.
    fn spawn_scripted_server(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, Arc<AtomicUsize>, std::thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").expect("bind");
        let endpoint = format!("http://{}", server.server_addr());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();

        let handle = std::thread::spawn(move || {
            for (status, body) in responses {
                let request = match server.recv() {
                    Ok(r) => r,
                    Err(_) => return,
                };
                hits_clone.fetch_add(1, Ordering::SeqCst);
                let response = Response::from_string(body).with_status_code(StatusCode(status));
                let _ = request.respond(response);
            }
        });

        (endpoint, hits, handle)
    }

    fn write_artifact(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("app.apk");
        let mut f = std::fs::File::create(&path).expect("create");
        f.write_all(b"PK\x03\x04artifact").expect("write");
        path
    }

    #[test]
    fn upload_retries_gateway_errors_until_success() {
        let (endpoint, hits, handle) = spawn_scripted_server(vec![
            (503, "busy"),
            (503, "busy"),
            (200, r#"{"app_url":"bs://abc123"}"#),
        ]);
        let td = tempdir().expect("tempdir");
        let artifact = write_artifact(td.path());

        let client =
            UploadClient::new(&upload_config(endpoint), &mut NullReporter).expect("client");
        let result = client
            .upload(&artifact, "agent-staging", "corr-1", &fast_policy(), &mut NullReporter)
            .expect("upload");

        assert_eq!(result.remote_id, "bs://abc123");
        assert_eq!(result.correlation_id, "corr-1");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        handle.join().expect("server thread");
    }

    #[test]
    fn upload_does_not_retry_auth_failures() {
        let (endpoint, hits, handle) = spawn_scripted_server(vec![(401, "unauthorized")]);
        let td = tempdir().expect("tempdir");
        let artifact = write_artifact(td.path());

        let client =
            UploadClient::new(&upload_config(endpoint), &mut NullReporter).expect("client");
        let err = client
            .upload(&artifact, "agent-staging", "corr-1", &fast_policy(), &mut NullReporter)
            .expect_err("must fail");

        assert!(matches!(err, WorkflowError::Transport { retryable: false, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.join().expect("server thread");
    }

    #[test]
    fn missing_app_url_is_invalid_response() {
        let (endpoint, _hits, handle) =
            spawn_scripted_server(vec![(200, r#"{"message":"uploaded"}"#)]);
        let td = tempdir().expect("tempdir");
        let artifact = write_artifact(td.path());

        let client =
            UploadClient::new(&upload_config(endpoint), &mut NullReporter).expect("client");
        let err = client
            .upload(&artifact, "agent-staging", "corr-1", &fast_policy(), &mut NullReporter)
            .expect_err("must fail");

        assert!(matches!(err, WorkflowError::InvalidResponse(_)));
        handle.join().expect("server thread");
    }

    #[test]
    fn lookup_strips_scheme_prefix_from_remote_id() {
        let server = Server::http("127.0.0.1:0").expect("bind");
        let endpoint = format!("http://{}", server.server_addr());

        let handle = std::thread::spawn(move || {
            let request = server.recv().expect("request");
            assert_eq!(request.url(), "/abc123");
            let _ = request.respond(Response::from_string(r#"{"app_url":"bs://abc123"}"#));
        });

        let client =
            UploadClient::new(&upload_config(endpoint), &mut NullReporter).expect("client");
        let found = client
            .lookup("bs://abc123", &fast_policy(), &mut NullReporter)
            .expect("lookup");

        assert!(found.is_some());
        handle.join().expect("server thread");
    }

    #[test]
    fn lookup_maps_not_found_to_none() {
        let (endpoint, _hits, handle) = spawn_scripted_server(vec![(404, "gone")]);

        let client =
            UploadClient::new(&upload_config(endpoint), &mut NullReporter).expect("client");
        let found = client
            .lookup("bs://missing", &fast_policy(), &mut NullReporter)
            .expect("lookup");

        assert!(found.is_none());
        handle.join().expect("server thread");
    }

    #[test]
    fn delete_treats_not_found_as_done() {
        let (endpoint, _hits, handle) = spawn_scripted_server(vec![(404, "gone")]);

        let client =
            UploadClient::new(&upload_config(endpoint), &mut NullReporter).expect("client");
        client
            .delete("bs://missing", &fast_policy(), &mut NullReporter)
            .expect("delete");
        handle.join().expect("server thread");
    }
}
