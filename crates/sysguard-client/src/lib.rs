//! Client library for communicating with the sysguard daemon.
//!
//! This crate provides a unified client for the CLI and for tests.

use anyhow::{bail, Context, Result};
use sysguard_core::protocol::{RECONFIGURE, UNAVAILABLE, UNKNOWN_COMMAND};
use sysguard_core::{SensorInfo, SensorType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Protocol client for one daemon connection.
pub struct SensorClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    reconfigure: bool,
}

impl SensorClient {
    /// Connects to the daemon at `addr` (e.g., "127.0.0.1:3112").
    pub async fn connect(addr: &str) -> Result<Self> {
        debug!("Connecting to {}", addr);
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("Failed to connect to {}", addr))?;
        let (reader, writer) = stream.into_split();

        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            reconfigure: false,
        })
    }

    /// Returns whether the daemon asked for re-enumeration since the last
    /// call, and clears the flag.
    pub fn take_reconfigure(&mut self) -> bool {
        std::mem::take(&mut self.reconfigure)
    }

    /// Reads a sensor's current value as sent by the daemon.
    pub async fn value(&mut self, path: &str) -> Result<String> {
        self.send(path).await?;
        let reply = self.reply_line().await?;
        check_reply(path, reply)
    }

    /// Reads a sensor's value as a number.
    pub async fn reading(&mut self, path: &str) -> Result<f64> {
        let value = self.value(path).await?;
        value
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", path, value))
    }

    /// Gets a sensor's metadata.
    pub async fn info(&mut self, path: &str) -> Result<SensorInfo> {
        self.send(&format!("{}?", path)).await?;
        let reply = self.reply_line().await?;
        check_reply(path, reply)?
            .parse()
            .map_err(anyhow::Error::msg)
    }

    /// Lists every registered sensor with its type.
    pub async fn monitors(&mut self) -> Result<Vec<(String, SensorType)>> {
        self.send("monitors").await?;

        let mut monitors = Vec::new();
        loop {
            let line = self.reply_line().await?;
            if line.is_empty() {
                break;
            }
            let (path, sensor_type) = line
                .split_once('\t')
                .with_context(|| format!("Malformed monitor line: {:?}", line))?;
            let sensor_type = sensor_type.parse().map_err(anyhow::Error::msg)?;
            monitors.push((path.to_string(), sensor_type));
        }
        Ok(monitors)
    }

    /// Ends the session.
    pub async fn quit(mut self) -> Result<()> {
        self.send("quit").await?;
        // The daemon closes its side in response.
        while self.lines.next_line().await?.is_some() {}
        Ok(())
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .context("Failed to send request")?;
        Ok(())
    }

    /// Next line that answers a request. Reconfigure notifications can
    /// arrive at any point and are recorded instead.
    async fn reply_line(&mut self) -> Result<String> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                bail!("Daemon closed the connection");
            };
            if line == RECONFIGURE.trim_end() {
                debug!("Daemon requested reconfiguration");
                self.reconfigure = true;
                continue;
            }
            return Ok(line);
        }
    }
}

fn check_reply(path: &str, reply: String) -> Result<String> {
    if reply == UNKNOWN_COMMAND.trim_end() {
        bail!("Unknown sensor: {}", path);
    }
    if reply == UNAVAILABLE.trim_end() {
        bail!("Sensor unavailable: {}", path);
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serves one connection with canned replies, pushing a reconfigure
    /// notification before the first one.
    async fn fake_daemon() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            writer.write_all(RECONFIGURE.as_bytes()).await.unwrap();

            while let Some(line) = lines.next_line().await.unwrap() {
                let reply = match line.as_str() {
                    "cpu/loadavg1" => "0.250000\n".to_string(),
                    "cpu/loadavg1?" => "Load average 1 min\t0\t0\t\n".to_string(),
                    "SoftRaid/md0/NumBlocks" => UNAVAILABLE.to_string(),
                    "monitors" => "cpu/loadavg1\tfloat\nSoftRaid/md0/NumBlocks\tinteger\n\n"
                        .to_string(),
                    "quit" => break,
                    _ => UNKNOWN_COMMAND.to_string(),
                };
                writer.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_requests() {
        let addr = fake_daemon().await;
        let mut client = SensorClient::connect(&addr).await.unwrap();

        assert_eq!(client.value("cpu/loadavg1").await.unwrap(), "0.250000");
        assert!(client.take_reconfigure());
        assert!(!client.take_reconfigure());

        assert_eq!(client.reading("cpu/loadavg1").await.unwrap(), 0.25);

        let info = client.info("cpu/loadavg1").await.unwrap();
        assert_eq!(info.label, "Load average 1 min");
        assert_eq!(info.unit, "");

        assert_eq!(
            client.monitors().await.unwrap(),
            vec![
                ("cpu/loadavg1".to_string(), SensorType::Float),
                ("SoftRaid/md0/NumBlocks".to_string(), SensorType::Integer),
            ]
        );

        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_replies() {
        let addr = fake_daemon().await;
        let mut client = SensorClient::connect(&addr).await.unwrap();

        let err = client.value("SoftRaid/md0/NumBlocks").await.unwrap_err();
        assert!(err.to_string().contains("unavailable"));

        let err = client.info("nope").await.unwrap_err();
        assert!(err.to_string().contains("Unknown sensor"));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(SensorClient::connect(&addr).await.is_err());
    }
}
