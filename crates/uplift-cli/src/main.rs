use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use uplift::config::UpliftConfig;
use uplift::engine::{self, Reporter};
use uplift::types::{WorkflowRequest, WorkflowStatus};

#[derive(Parser, Debug)]
#[command(name = "uplift", version, disable_version_flag = true)]
#[command(about = "Upload a mobile build to BrowserStack and publish the config-repo change")]
struct Cli {
    /// Target platform (android, android_hw, ios)
    #[arg(long)]
    platform: String,

    /// Deployment environment (production, staging)
    #[arg(long)]
    environment: String,

    /// Build type (Debug, Release)
    #[arg(long)]
    build_type: String,

    /// Application variant (agent, retail, wallet)
    #[arg(long)]
    app_variant: String,

    /// App version, e.g. 1.2.0 or 1.3.0-beta
    #[arg(long)]
    version: String,

    /// CI build identifier
    #[arg(long)]
    build_id: String,

    /// URL of the CI run that produced the artifact
    #[arg(long)]
    source_build_url: String,

    /// Override the configured artifact base path
    #[arg(long)]
    src_folder: Option<String>,

    /// Path to the configuration file
    #[arg(long, default_value = "config.yaml")]
    config_file: PathBuf,

    /// Write the result document to this path
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// Print the full result document to stdout
    #[arg(long)]
    verbose: bool,
}

struct CliReporter;

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        eprintln!("[info] {msg}");
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(status) => match status {
            WorkflowStatus::Success => ExitCode::SUCCESS,
            WorkflowStatus::Failed => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("[error] {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<WorkflowStatus> {
    let cli = Cli::parse();
    let mut reporter = CliReporter;

    let cfg = UpliftConfig::load_from_file(&cli.config_file)
        .with_context(|| format!("cannot load config {}", cli.config_file.display()))?;

    let request = WorkflowRequest {
        platform: cli.platform,
        environment: cli.environment,
        build_type: cli.build_type,
        app_variant: cli.app_variant,
        version: cli.version,
        build_id: cli.build_id,
        source_build_url: cli.source_build_url,
        src_folder: cli.src_folder,
    };

    let report = engine::run_workflow(&cfg, request, &mut reporter);

    if let Some(path) = &cli.output_file
        && let Err(e) = engine::write_report(path, &report)
    {
        reporter.warn(&format!("could not write result document: {e}"));
    }

    if cli.verbose {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("cannot render result document")?
        );
    }

    Ok(report.status)
}
