//! TCP protocol server.
//!
//! Connections never touch the registry themselves: each request line is
//! forwarded to the daemon loop and the reply written back in order.

use anyhow::Result;
use sysguard_core::protocol::{Response, RECONFIGURE};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::daemon::{DaemonSignal, Request};

/// Longest accepted request line, excluding the line terminator.
pub const MAX_REQUEST_LINE: usize = 1024;

/// Accepts clients until the listener fails.
pub async fn serve(
    listener: TcpListener,
    requests: mpsc::Sender<Request>,
    signal_tx: broadcast::Sender<DaemonSignal>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "Client connected");

        let requests = requests.clone();
        let signals = signal_tx.subscribe();
        tokio::spawn(async move {
            match handle_connection(stream, requests, signals).await {
                Ok(()) => info!(%peer, "Client disconnected"),
                Err(e) => warn!(%peer, error = %e, "Client connection failed"),
            }
        });
    }
}

/// Serves one client until it quits, hangs up, or the daemon goes away.
pub async fn handle_connection<S>(
    stream: S,
    requests: mpsc::Sender<Request>,
    mut signals: broadcast::Receiver<DaemonSignal>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut pending = Vec::new();

    loop {
        tokio::select! {
            line = read_request(&mut reader, &mut pending, MAX_REQUEST_LINE) => {
                let Some(line) = line? else {
                    break;
                };

                let (reply, reply_rx) = oneshot::channel();
                if requests.send(Request { line, reply }).await.is_err() {
                    debug!("Daemon loop stopped, closing connection");
                    break;
                }
                let Ok(response) = reply_rx.await else {
                    break;
                };

                match response {
                    Response::Reply(text) => writer.write_all(text.as_bytes()).await?,
                    Response::Silent => {}
                    Response::Close => break,
                }
                writer.flush().await?;
            }
            signal = signals.recv() => {
                match signal {
                    Ok(DaemonSignal::Reconfigure) => {
                        writer.write_all(RECONFIGURE.as_bytes()).await?;
                        writer.flush().await?;
                    }
                    // The newest signals are still queued and arrive next.
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Collapsing missed reconfigure signals");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    writer.shutdown().await?;
    Ok(())
}

/// Reads one request line of at most `limit` bytes, without its terminator.
///
/// Bytes read so far are kept in `pending`, so a call dropped by `select!`
/// resumes where it left off. Returns `None` at end of input.
async fn read_request<R>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    limit: usize,
) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let budget = (limit + 1).saturating_sub(pending.len()) as u64;
    let read = (&mut *reader).take(budget).read_until(b'\n', pending).await?;

    let terminated = pending.last() == Some(&b'\n');
    if !terminated && pending.len() > limit {
        return Err(sysguard_core::Error::BufferOverflow {
            source_name: "request line".to_string(),
            limit,
        }
        .into());
    }
    if read == 0 && pending.is_empty() {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(pending)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    pending.clear();
    Ok(Some(line))
}
