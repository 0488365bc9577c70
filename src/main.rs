//! `cisip2` - command line control for CIS-IP2 receivers.
//!
//! Thin wrapper over the `sony_cisip2` library: one connection per
//! invocation, one command, then shutdown.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use sony_cisip2::template::{self, VARIABLE_DOMAINS};
use sony_cisip2::{ClientConfig, FeatureClient, Message};

// CLI
#[derive(Parser)]
#[command(name = "cisip2")]
#[command(version)]
#[command(about = "Control a Sony receiver over CIS-IP2")]
struct Cli {
    /// Receiver hostname or IP address
    #[arg(long, global = true)]
    host: Option<String>,
    /// Receiver control port
    #[arg(long, global = true)]
    port: Option<u16>,
    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Maximum requests awaiting a reply at once
    #[arg(long, global = true)]
    max_in_flight: Option<usize>,
    /// Seconds to wait for each reply
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current value of a feature
    Get {
        /// Feature name, e.g. "main.volumestep"
        feature: String,
    },
    /// Set a feature and print ACK, NAK, ERR or "Unknown Response"
    Set {
        /// Feature name, e.g. "power"
        feature: String,
        /// New value; may contain {{NAME}} placeholders. Numbers are sent as numbers.
        value: String,
        /// Placeholder substitution NAME=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,
    },
    /// Print notifications as JSON lines until interrupted
    Listen {
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// List placeholder variables and their legal values
    Vars {
        /// Only show this variable
        name: Option<String>,
    },
}

fn parse_var(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{s}'"))?;
    if name.is_empty() {
        return Err(format!("empty variable name in '{s}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Numbers go on the wire as JSON numbers, everything else as a string.
fn parse_cli_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(number @ Value::Number(_)) => number,
        _ => Value::String(raw.to_string()),
    }
}

/// Reject `--var` values outside a known variable's legal set.
///
/// Names without a known domain are substituted as given.
fn check_vars(vars: &[(String, String)]) -> Result<()> {
    for (name, value) in vars {
        if let Some(domain) = template::variable_domain(name) {
            if !domain.contains(value) {
                bail!(
                    "'{value}' is not a legal {name} value (expected one of: {})",
                    domain.values.join(", ")
                );
            }
        }
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(cli.config.as_deref())?;
    if let Some(host) = &cli.host {
        config.host.clone_from(host);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(max) = cli.max_in_flight {
        config.max_in_flight = max;
    }
    if let Some(timeout) = cli.timeout {
        config.request_timeout_secs = (timeout > 0).then_some(timeout);
    }
    Ok(config)
}

fn print_vars(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => {
            let Some(domain) = template::variable_domain(name) else {
                bail!("Unknown variable '{name}'");
            };
            println!("{}: {}", domain.name, domain.values.join(", "));
        }
        None => {
            for domain in VARIABLE_DOMAINS {
                println!("{}: {}", domain.name, domain.values.join(", "));
            }
        }
    }
    Ok(())
}

async fn listen(client: &FeatureClient, seconds: Option<u64>) {
    client.register_notification_callback(|message: &Message| match serde_json::to_string(message) {
        Ok(line) => println!("{line}"),
        Err(e) => log::warn!("Could not print notification: {e}"),
    });

    let deadline = async {
        match seconds {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        () = deadline => {}
        () = client.closed() => eprintln!("Receiver closed the connection"),
    }
    client.clear_notification_callback();
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    if let Commands::Vars { name } = &cli.command {
        return print_vars(name.as_deref());
    }

    if let Commands::Set { vars, .. } = &cli.command {
        check_vars(vars)?;
    }

    let config = build_config(&cli)?;
    let client = FeatureClient::connect(&config)
        .await
        .with_context(|| format!("connect to receiver at {}:{}", config.host, config.port))?;

    let outcome = match &cli.command {
        Commands::Get { feature } => client
            .get(feature)
            .await
            .map(|value| println!("{value}"))
            .with_context(|| format!("get {feature}")),
        Commands::Set { feature, value, vars } => {
            let value = template::replace_placeholders(value, vars.iter().map(|(k, v)| (k, v)));
            client
                .set(feature, parse_cli_value(&value))
                .await
                .map(|result| println!("{result}"))
                .with_context(|| format!("set {feature}"))
        }
        Commands::Listen { seconds } => {
            listen(&client, *seconds).await;
            Ok(())
        }
        Commands::Vars { .. } => Ok(()),
    };

    client.shutdown().await;
    outcome
}
