//! sysguard Control Tool
//!
//! CLI for querying the sysguard daemon.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sysguard_client::SensorClient;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sysguardctl")]
#[command(about = "Query tool for the sysguard daemon")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Daemon address
    #[arg(short, long, default_value_t = default_address())]
    address: String,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read sensor values
    Get {
        /// Sensor paths (e.g., cpu/loadavg1)
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Show sensor metadata
    Info {
        /// Sensor path
        path: String,
    },
    /// List registered sensors
    List {
        /// Only list sensors under this prefix
        prefix: Option<String>,
    },
    /// Poll sensor values
    Watch {
        /// Sensor paths
        #[arg(required = true)]
        paths: Vec<String>,

        /// Poll interval in milliseconds
        #[arg(short, long, default_value = "2000")]
        interval: u64,

        /// Stop after this many rounds
        #[arg(short, long)]
        count: Option<u64>,
    },
}

fn default_address() -> String {
    format!("127.0.0.1:{}", sysguard_core::DEFAULT_PORT)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Connect to daemon
    let mut client = SensorClient::connect(&cli.address)
        .await
        .context("Failed to connect to daemon. Is sysguardd running?")?;

    match cli.command {
        Commands::Get { paths } => handle_get(&paths, cli.json, &mut client).await?,
        Commands::Info { path } => handle_info(&path, cli.json, &mut client).await?,
        Commands::List { prefix } => handle_list(prefix.as_deref(), cli.json, &mut client).await?,
        Commands::Watch {
            paths,
            interval,
            count,
        } => handle_watch(&paths, interval, count, cli.json, &mut client).await?,
    }

    client.quit().await
}

async fn handle_get(paths: &[String], as_json: bool, client: &mut SensorClient) -> Result<()> {
    let mut values = serde_json::Map::new();
    for path in paths {
        let value = client.value(path).await?;
        if as_json {
            values.insert(path.clone(), json_value(&value));
        } else if paths.len() == 1 {
            println!("{}", value);
        } else {
            println!("{}: {}", path, value);
        }
    }

    if as_json {
        println!("{}", serde_json::Value::Object(values));
    }
    Ok(())
}

async fn handle_info(path: &str, as_json: bool, client: &mut SensorClient) -> Result<()> {
    let info = client.info(path).await?;

    if as_json {
        let value = json!({
            "path": path,
            "label": info.label,
            "min": info.min,
            "max": info.max,
            "unit": info.unit,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}:", path);
        println!("  Label: {}", info.label);
        if info.max == 0.0 {
            println!("  Range: auto");
        } else {
            println!("  Range: {} - {}", info.min, info.max);
        }
        if !info.unit.is_empty() {
            println!("  Unit: {}", info.unit);
        }
    }
    Ok(())
}

async fn handle_list(prefix: Option<&str>, as_json: bool, client: &mut SensorClient) -> Result<()> {
    let monitors: Vec<_> = client
        .monitors()
        .await?
        .into_iter()
        .filter(|(path, _)| prefix.map_or(true, |prefix| path.starts_with(prefix)))
        .collect();

    if as_json {
        let list: Vec<_> = monitors
            .iter()
            .map(|(path, sensor_type)| {
                json!({
                    "path": path,
                    "type": sensor_type.to_string(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else if monitors.is_empty() {
        println!("No sensors registered");
    } else {
        for (path, sensor_type) in &monitors {
            println!("{:<40} {}", path, sensor_type);
        }
    }
    Ok(())
}

async fn handle_watch(
    paths: &[String],
    interval: u64,
    count: Option<u64>,
    as_json: bool,
    client: &mut SensorClient,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval.max(1)));
    let mut rounds = 0;

    while count.map_or(true, |count| rounds < count) {
        ticker.tick().await;
        rounds += 1;

        let mut values = serde_json::Map::new();
        let mut line = Vec::new();
        for path in paths {
            // A sensor may come and go between rounds.
            let value = match client.value(path).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("{}", e);
                    "-".to_string()
                }
            };
            if as_json {
                values.insert(path.clone(), json_value(&value));
            } else {
                line.push(format!("{}={}", path, value));
            }
        }

        if client.take_reconfigure() {
            eprintln!("Sensor set changed");
        }

        if as_json {
            println!("{}", serde_json::Value::Object(values));
        } else {
            println!("{}", line.join(" "));
        }
    }
    Ok(())
}

/// Numeric values become JSON numbers; anything else stays a string.
fn json_value(value: &str) -> serde_json::Value {
    if let Ok(integer) = value.parse::<i64>() {
        return json!(integer);
    }
    match value.parse::<f64>() {
        Ok(float) if float.is_finite() => json!(float),
        _ => json!(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_value() {
        assert_eq!(json_value("1048576"), json!(1048576));
        assert_eq!(json_value("0.250000"), json!(0.25));
        assert_eq!(json_value("-"), json!("-"));
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from(["sysguardctl", "--json", "watch", "cpu/loadavg1", "-c", "3"])
            .unwrap();
        assert!(cli.json);
        assert_eq!(cli.address, "127.0.0.1:3112");
        match cli.command {
            Commands::Watch {
                paths,
                interval,
                count,
            } => {
                assert_eq!(paths, vec!["cpu/loadavg1"]);
                assert_eq!(interval, 2000);
                assert_eq!(count, Some(3));
            }
            _ => panic!("expected watch"),
        }

        assert!(Cli::try_parse_from(["sysguardctl", "get"]).is_err());
    }
}
