//! AlertRelay CLI
//!
//! Command-line interface for the AlertRelay incident notification service.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;

use alertrelay::config::LoggingConfig;
use alertrelay::models::{ChannelType, NotificationType, TemplateInput};
use alertrelay::notify::TemplateRenderer;
use alertrelay::Config;

/// AlertRelay - Alert correlation and incident notifications
#[derive(Parser)]
#[command(name = "alertrelay")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "ALERTRELAY_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the AlertRelay server
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// HTTP API port
        #[arg(long, env = "ALERTRELAY_HTTP_PORT")]
        http_port: Option<u16>,
    },

    /// Print the effective configuration as JSON
    Config,

    /// Render a template file against the sample incident
    ValidateTemplate {
        /// Template body file
        file: PathBuf,

        /// Notification type (incident_created, incident_acknowledged, ...)
        #[arg(long, value_parser = parse_kind)]
        kind: NotificationType,

        /// Channel type (chat, email, bot)
        #[arg(long, value_parser = parse_channel)]
        channel: ChannelType,

        /// Subject template (the built-in subject when omitted)
        #[arg(long)]
        subject: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging, cli.verbose);

    // Execute command
    let result = match cli.command {
        Commands::Serve { host, http_port } => run_serve(config, host, http_port).await,
        Commands::Config => print_config(&config),
        Commands::ValidateTemplate {
            file,
            kind,
            channel,
            subject,
        } => validate_template(&config, &file, kind, channel, subject),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.pretty().init();
    }
}

async fn run_serve(mut config: Config, host: Option<String>, http_port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = http_port {
        config.server.http_port = port;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            signal.cancel();
        }
    });

    alertrelay::app::run(config, shutdown).await?;
    Ok(())
}

fn print_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn validate_template(
    config: &Config,
    file: &Path,
    kind: NotificationType,
    channel: ChannelType,
    subject: Option<String>,
) -> anyhow::Result<()> {
    let body = std::fs::read_to_string(file)?;
    let name = file
        .file_stem()
        .map_or_else(|| "template".to_string(), |s| s.to_string_lossy().into_owned());

    let renderer = TemplateRenderer::new(
        config.notifications.system_name.clone(),
        config.notifications.system_url.clone(),
    );
    let input = TemplateInput {
        name,
        kind,
        channel,
        subject,
        body,
        is_default: false,
    };
    let rendered = renderer.preview(&input, None, "cli")?;

    println!("Template is valid.\n");
    println!("Subject: {}\n", rendered.subject);
    println!("{}", rendered.content);
    Ok(())
}

fn parse_kind(raw: &str) -> Result<NotificationType, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown notification type '{raw}'"))
}

fn parse_channel(raw: &str) -> Result<ChannelType, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| format!("unknown channel type '{raw}'"))
}
