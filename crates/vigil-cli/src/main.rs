use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use url::Url;
use vigil_core::api::{BackendClient, SourceType, DEFAULT_ALERT_LIMIT, DEFAULT_API_URL};
use vigil_core::ObjectType;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "vigil")]
#[command(about = "Surveillance backend control", long_about = None)]
struct Cli {
    /// Backend base url (env VIGIL_API_URL)
    #[arg(long, global = true, default_value = "")]
    api_url: String,
    #[arg(long, global = true, default_value_t = 5000)]
    timeout_ms: u64,
    /// Print raw JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configure or test the camera source
    Camera {
        #[command(subcommand)]
        action: CameraCommands,
    },
    /// Start or stop detection on the configured source
    Stream {
        #[command(subcommand)]
        action: StreamCommands,
    },
    /// Manage alert rules
    Rules {
        #[command(subcommand)]
        action: RuleCommands,
    },
    /// Manage alert email recipients
    Recipients {
        #[command(subcommand)]
        action: RecipientCommands,
    },
    /// Show recent alerts, newest first
    Alerts {
        #[arg(long, default_value_t = DEFAULT_ALERT_LIMIT)]
        limit: u32,
    },
    /// Show current detection counts
    Detections,
    /// Show backend health
    Health,
}

#[derive(Subcommand, Debug)]
enum CameraCommands {
    Configure(CameraArgs),
    Test(CameraArgs),
}

#[derive(Args, Debug, Clone)]
struct CameraArgs {
    /// rtsp, webcam or upload
    #[arg(long)]
    source: SourceType,
    #[arg(long)]
    rtsp_url: Option<String>,
    #[arg(long)]
    video_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum StreamCommands {
    Start,
    Stop,
}

#[derive(Subcommand, Debug)]
enum RuleCommands {
    List,
    Create {
        #[arg(long)]
        name: String,
        /// person, animal or vehicle
        #[arg(long)]
        object: ObjectType,
        #[arg(long, default_value_t = 1)]
        threshold: u32,
    },
    Delete {
        rule_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum RecipientCommands {
    Set {
        #[arg(required = true)]
        emails: Vec<String>,
    },
    Test {
        #[arg(required = true)]
        emails: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let api_url = resolve_api_url(&cli.api_url, std::env::var("VIGIL_API_URL").ok())?;
    let client = BackendClient::new(api_url, Duration::from_millis(cli.timeout_ms.max(1)))
        .context("Failed to build HTTP client")?;

    commands::run(&client, cli.command, cli.json).await
}

fn resolve_api_url(flag: &str, env: Option<String>) -> Result<Url> {
    let raw = [Some(flag.to_string()), env]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    Url::parse(&raw).with_context(|| format!("Invalid api url '{raw}'"))
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
