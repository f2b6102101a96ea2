//! Team-channel notification for completed publishes.
//!
//! Delivery is strictly best-effort: a missing webhook URL or any transport
//! failure degrades to a warning and `false`. The orchestrator records the
//! flag but never fails a run over it.

use serde_json::json;

use crate::config::NotifyConfig;
use crate::engine::Reporter;
use crate::types::RequestTarget;

const DASHBOARD_URL: &str = "https://app-live.browserstack.com";

/// Everything the notification card displays.
pub struct NotifyContext<'a> {
    pub target: &'a RequestTarget,
    pub version: &'a str,
    pub document_file: &'a str,
    pub old_remote_id: &'a str,
    pub new_remote_id: &'a str,
    pub change_request_url: Option<&'a str>,
    pub source_build_url: &'a str,
}

/// Post a MessageCard to the configured webhook. Returns whether the
/// notification went out.
pub fn notify(config: &NotifyConfig, context: &NotifyContext<'_>, reporter: &mut dyn Reporter) -> bool {
    let url = match &config.webhook_url {
        Some(url) if !url.is_empty() => url,
        _ => {
            reporter.warn("no webhook URL configured, skipping notification");
            return false;
        }
    };

    let card = build_card(config, context);

    let client = match reqwest::blocking::Client::builder()
        .timeout(config.timeout)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            reporter.warn(&format!("cannot build notification client: {e}"));
            return false;
        }
    };

    match client.post(url).json(&card).send() {
        Ok(response) if response.status().is_success() => {
            reporter.info("notification sent");
            true
        }
        Ok(response) => {
            reporter.warn(&format!(
                "notification rejected with status {}",
                response.status()
            ));
            false
        }
        Err(e) => {
            reporter.warn(&format!("notification delivery failed: {e}"));
            false
        }
    }
}

fn build_card(config: &NotifyConfig, context: &NotifyContext<'_>) -> serde_json::Value {
    let target = context.target;
    let timestamp = chrono::Utc::now().to_rfc3339();

    let mut facts = vec![
        fact("Platform:", target.platform.as_str()),
        fact("Application:", target.app_variant.as_str()),
        fact("Environment:", target.environment.as_str()),
        fact("Build Type:", target.build_type.as_str()),
        fact("Version:", context.version),
        fact("Document:", context.document_file),
        fact("Old Remote ID:", context.old_remote_id),
        fact("New Remote ID:", context.new_remote_id),
    ];
    facts.push(json!({ "name": "Updated At:", "value": timestamp }));

    let mut actions = Vec::new();
    if let Some(cr_url) = context.change_request_url {
        actions.push(open_uri("View Change Request", cr_url));
    }
    actions.push(open_uri("Source Build", context.source_build_url));
    actions.push(open_uri("BrowserStack Dashboard", DASHBOARD_URL));

    let mut section = json!({
        "activityTitle": format!(
            "BrowserStack Update - {}",
            target.app_variant.as_str()
        ),
        "activitySubtitle": format!(
            "{} | {}",
            target.environment.as_str().to_uppercase(),
            target.build_type.as_str()
        ),
        "facts": facts,
    });
    if let Some(group) = &config.mention_group {
        section["text"] = json!(format!("cc: @{group}"));
    }

    json!({
        "@type": "MessageCard",
        "@context": "https://schema.org/extensions",
        "summary": format!(
            "BrowserStack Update - {}/{}/{}/{}",
            target.platform.as_str(),
            target.app_variant.as_str(),
            target.environment.as_str(),
            target.build_type.as_str()
        ),
        "themeColor": "0078D4",
        "sections": [section],
        "potentialAction": actions,
    })
}

fn fact(name: &str, value: &str) -> serde_json::Value {
    json!({ "name": name, "value": format!("`{value}`") })
}

fn open_uri(name: &str, uri: &str) -> serde_json::Value {
    json!({
        "@type": "OpenUri",
        "name": name,
        "targets": [{ "os": "default", "uri": uri }],
    })
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::time::Duration;

    use tiny_http::{Response, Server, StatusCode};

    use super::*;
    use crate::types::{NOT_SET, WorkflowRequest};

    struct NullReporter;

    impl Reporter for NullReporter {
        fn info(&mut self, _msg: &str) {}
        fn warn(&mut self, _msg: &str) {}
        fn error(&mut self, _msg: &str) {}
    }

    fn target() -> RequestTarget {
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
        RequestTarget::from_request(&request).expect("valid target")
    }

    fn notify_config(url: Option<String>) -> NotifyConfig {
        NotifyConfig {
            webhook_url: url,
            timeout: Duration::from_secs(5),
            mention_group: Some("QA Team".to_string()),
        }
    }

    fn context<'a>(target: &'a RequestTarget) -> NotifyContext<'a> {
        NotifyContext {
            target,
            version: "1.2.3",
            document_file: "android_agent.yml",
            old_remote_id: NOT_SET,
            new_remote_id: "bs://abc123",
            change_request_url: Some("https://github.com/example/device-config/pull/7"),
            source_build_url: "https://ci/42",
        }
    }

    #[test]
    fn missing_webhook_url_returns_false() {
        let t = target();
        assert!(!notify(&notify_config(None), &context(&t), &mut NullReporter));
    }

    #[test]
    fn successful_delivery_returns_true_and_posts_the_card() {
        let server = Server::http("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", server.server_addr());
        let handle = std::thread::spawn(move || {
            let mut request = server.recv().expect("request");
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).expect("body");
            let _ = request.respond(Response::from_string("1"));
            body
        });

        let t = target();
        assert!(notify(&notify_config(Some(url)), &context(&t), &mut NullReporter));

        let body = handle.join().expect("server thread");
        let card: serde_json::Value = serde_json::from_str(&body).expect("card is JSON");
        assert_eq!(card["@type"], "MessageCard");
        assert_eq!(card["sections"][0]["text"], "cc: @QA Team");
        let facts = card["sections"][0]["facts"].as_array().expect("facts");
        assert!(facts.iter().any(|f| f["value"] == "`bs://abc123`"));
        let actions = card["potentialAction"].as_array().expect("actions");
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0]["name"], "View Change Request");
    }

    #[test]
    fn rejected_delivery_returns_false() {
        let server = Server::http("127.0.0.1:0").expect("bind");
        let url = format!("http://{}", server.server_addr());
        let handle = std::thread::spawn(move || {
            let request = server.recv().expect("request");
            let _ = request.respond(Response::from_string("nope").with_status_code(StatusCode(500)));
        });

        let t = target();
        assert!(!notify(&notify_config(Some(url)), &context(&t), &mut NullReporter));
        handle.join().expect("server thread");
    }

    #[test]
    fn direct_mode_card_has_no_change_request_action() {
        let t = target();
        let mut ctx = context(&t);
        ctx.change_request_url = None;
        let card = build_card(&notify_config(None), &ctx);
        let actions = card["potentialAction"].as_array().expect("actions");
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0]["name"], "Source Build");
    }
}
