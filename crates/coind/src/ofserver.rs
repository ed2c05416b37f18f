//! OpenFlow transport: accepts switch connections and shuttles frames
//! between each socket and the dispatch task.

use bytes::Bytes;
use coin_openflow::OfpFrameCodec;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::event::{CoinEvent, EventSender, SessionId};

/// Hands out session ids, starting from 1.
#[derive(Debug, Default)]
pub struct SessionIds(AtomicU64);

impl SessionIds {
    pub fn next(&self) -> SessionId {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct OpenFlowServer {
    listener: TcpListener,
    events: EventSender,
    ids: Arc<SessionIds>,
}

impl OpenFlowServer {
    pub async fn bind(addr: SocketAddr, events: EventSender) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Listening for switches");
        Ok(Self {
            listener,
            events,
            ids: Arc::new(SessionIds::default()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts switches until the dispatch task goes away.
    pub async fn run(self) {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(%peer, error = %e, "Could not disable Nagle");
            }
            let session = self.ids.next();
            info!(session, %peer, "Accepted switch connection");

            let (reader, writer) = stream.into_split();
            tokio::spawn(serve_session(session, reader, writer, self.events.clone()));
            if self.events.is_closed() {
                break;
            }
        }
    }
}

/// Runs one session over any byte stream.
pub async fn serve_session<R, W>(session: SessionId, reader: R, writer: W, events: EventSender)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Bytes>();
    if events
        .send(CoinEvent::SessionOpened { session, outbound })
        .is_err()
    {
        return;
    }

    let mut frames = FramedRead::new(reader, OfpFrameCodec);
    let mut sink = FramedWrite::new(writer, OfpFrameCodec);

    loop {
        tokio::select! {
            inbound = frames.next() => match inbound {
                Some(Ok(frame)) => {
                    if events.send(CoinEvent::SessionFrame { session, frame }).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    warn!(session, error = %e, "Dropping connection on framing error");
                    break;
                }
                None => {
                    debug!(session, "Switch closed the connection");
                    break;
                }
            },
            outbound = outbound_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(session, error = %e, "Write to switch failed");
                        break;
                    }
                }
                // The registry forgot the session
                None => break,
            },
        }
    }

    let _ = events.send(CoinEvent::SessionClosed { session });
}

/// Posts [`CoinEvent::EchoTick`] every `interval`.
pub fn spawn_echo_ticker(interval: Duration, events: EventSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if events.send(CoinEvent::EchoTick).is_err() {
                break;
            }
        }
    })
}
