//! Control socket: newline-delimited JSON requests in, one JSON reply out
//! per answered request.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

use crate::error::{CoinError, Result};
use crate::event::{CoinEvent, EventSender};

/// Longest request line accepted.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    events: EventSender,
}

impl ControlServer {
    /// Binds the socket; with `force_bind` a leftover socket file is removed
    /// first.
    pub fn bind(path: &Path, force_bind: bool, events: EventSender) -> Result<Self> {
        if path.exists() {
            if !force_bind {
                return Err(CoinError::Config(format!(
                    "Control socket {} exists, use force bind to replace it",
                    path.display()
                )));
            }
            std::fs::remove_file(path)?;
            info!(path = %path.display(), "Removed stale control socket");
        }
        let listener = UnixListener::bind(path)?;
        info!(path = %path.display(), "Listening for control clients");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_client(stream, self.events.clone()));
                }
                Err(e) => warn!(error = %e, "Control accept failed"),
            }
            if self.events.is_closed() {
                break;
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Serves one control client until it disconnects.
pub async fn serve_client<S>(stream: S, events: EventSender)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Control client read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed control request");
                continue;
            }
        };

        let (reply, reply_rx) = oneshot::channel();
        if events.send(CoinEvent::Control { request, reply }).is_err() {
            break;
        }
        match reply_rx.await {
            Ok(Some(response)) => {
                if let Err(e) = lines.send(response.to_string()).await {
                    warn!(error = %e, "Control client write failed");
                    break;
                }
            }
            Ok(None) => debug!("Request produced no reply"),
            Err(_) => break,
        }
    }
    debug!("Control client disconnected");
}
