#![forbid(unsafe_code)]

//! `yate-extmodule`: command-line front end for the external module client.
//!
//! Loads the client configuration, connects to the engine, runs one request
//! and reports the answer through the log. Logs go to stderr so that the
//! stdio transport keeps stdout for protocol traffic.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use yate_extmodule::config::TransportConfig;
use yate_extmodule::{Client, ClientConfig, ClientError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "yate-extmodule",
    about = "Yate external module client",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the engine host (TCP transport).
    #[arg(long)]
    host: Option<String>,

    /// Override the engine port (TCP transport).
    #[arg(long)]
    port: Option<u16>,

    /// Talk to the engine over stdin/stdout instead of TCP.
    #[arg(long, conflicts_with_all = ["host", "port"])]
    stdio: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Read an engine local parameter.
    GetLocal {
        /// Parameter name, e.g. `engine.version`.
        name: String,
    },
    /// Change an engine local parameter.
    SetLocal {
        /// Parameter name.
        name: String,
        /// New value.
        value: String,
    },
    /// Send a message and report the engine's answer.
    Message {
        /// Message name, e.g. `engine.status`.
        name: String,
        /// Default return value.
        #[arg(long, default_value = "")]
        result: String,
        /// Message parameters as `key=value`.
        #[arg(value_parser = parse_key_value)]
        parameters: Vec<(String, String)>,
    },
    /// Watch messages and report them until the engine disconnects.
    Watch {
        /// Message names to watch.
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| ClientError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => ClientConfig::load_from_path(path)?,
        None => ClientConfig::default(),
    };

    if args.stdio {
        config.transport = TransportConfig::Stdio;
    } else if args.host.is_some() || args.port.is_some() {
        let (default_host, default_port) = match &config.transport {
            TransportConfig::Tcp { host, port } => (host.clone(), *port),
            TransportConfig::Stdio => {
                ("127.0.0.1".to_owned(), yate_extmodule::config::DEFAULT_PORT)
            }
        };
        config.transport = TransportConfig::Tcp {
            host: args.host.unwrap_or(default_host),
            port: args.port.unwrap_or(default_port),
        };
    }
    info!(transport = ?config.transport, "configuration loaded");

    // ── Connect ─────────────────────────────────────────
    let client = Client::builder(config.options())
        .on_disconnect(|| info!("engine disconnected"))
        .connect(&config.transport)
        .await?;

    // ── Run the command ─────────────────────────────────
    let outcome = run_command(&client, args.command).await;
    if let Err(err) = &outcome {
        warn!(error = %err, "command failed");
    }
    client.close().await?;
    outcome
}

async fn run_command(client: &Client, command: Command) -> Result<()> {
    match command {
        Command::GetLocal { name } => {
            let value = client.get_local(&name).await?;
            info!(%name, %value, "local parameter");
        }
        Command::SetLocal { name, value } => {
            let setting = client.set_local(&name, &value).await?;
            info!(%name, value = %setting.value, success = setting.success, "local parameter set");
        }
        Command::Message {
            name,
            result,
            parameters,
        } => {
            let response = client.send_message(&name, &result, &parameters).await?;
            info!(
                name = %response.name,
                handled = response.handled,
                result = %response.result,
                "message answered"
            );
            for (key, value) in &response.parameters {
                info!(%key, %value, "parameter");
            }
        }
        Command::Watch { names } => {
            client.on_watch(|event| {
                info!(
                    name = %event.name,
                    id = %event.id,
                    handled = event.handled,
                    result = %event.result,
                    parameters = ?event.parameters,
                    "watched message"
                );
                Ok(())
            });
            for name in &names {
                let accepted = client.watch(name).await?;
                info!(%name, accepted, "watch requested");
            }
            client.closed().await;
        }
    }
    Ok(())
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| ClientError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| ClientError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
