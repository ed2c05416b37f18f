//! OpenFlow session registry.
//!
//! Owns every [`Session`] and its [`SwitchState`]. Frames coming off a
//! transport are fed to [`ConnectionRegistry::on_frame`], which runs the
//! handshake, answers echoes and turns the rest into [`Notification`]s.

use bytes::Bytes;
use coin_openflow::consts::OFP_DEFAULT_MISS_SEND_LEN;
use coin_openflow::{next_xid, Message, SwitchConfig};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{CoinError, Result};
use crate::event::{Notification, SessionId};
use crate::switch_state::SwitchState;

/// One OpenFlow connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::UnboundedSender<Bytes>,
    handshake_done: bool,
    last_echo: Instant,
    switch: SwitchState,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn handshake_done(&self) -> bool {
        self.handshake_done
    }

    pub fn last_echo(&self) -> Instant {
        self.last_echo
    }

    pub fn switch(&self) -> &SwitchState {
        &self.switch
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: BTreeMap<SessionId, Session>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and greets the switch with HELLO.
    pub fn open(
        &mut self,
        id: SessionId,
        outbound: mpsc::UnboundedSender<Bytes>,
        now: Instant,
    ) -> Result<()> {
        info!(session = id, "Switch connected");
        self.sessions.insert(
            id,
            Session {
                id,
                outbound,
                handshake_done: false,
                last_echo: now,
                switch: SwitchState::new(),
            },
        );
        self.send(id, &Message::Hello)
    }

    /// Processes one frame from `id`.
    ///
    /// Undecodable frames are logged and dropped; the session stays up.
    #[instrument(skip(self, frame, now), fields(len = frame.len()))]
    pub fn on_frame(&mut self, id: SessionId, frame: &[u8], now: Instant) -> Vec<Notification> {
        let (header, message) = match Message::decode(frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(session = id, error = %e, "Dropping undecodable frame");
                return Vec::new();
            }
        };

        let Some(session) = self.sessions.get_mut(&id) else {
            debug!(session = id, "Frame for unknown session");
            return Vec::new();
        };

        if !session.handshake_done {
            session.handshake_done = true;
            debug!(session = id, "Handshake with switch");
            let config = Message::SetConfig(SwitchConfig {
                flags: 0,
                miss_send_len: OFP_DEFAULT_MISS_SEND_LEN,
            });
            if let Err(e) = Self::send_to(session, &Message::FeaturesRequest)
                .and_then(|()| Self::send_to(session, &config))
            {
                warn!(session = id, error = %e, "Handshake failed");
            }
            if message == Message::Hello {
                return Vec::new();
            }
        }

        let mut notifications = Vec::new();
        match message {
            Message::EchoRequest(data) => {
                session.last_echo = now;
                let reply = Message::EchoReply(data);
                if let Err(e) = Self::send_with_xid(session, &reply, header.xid) {
                    warn!(session = id, error = %e, "Failed to answer echo request");
                }
            }
            Message::EchoReply(_) => {
                trace!(session = id, "Echo reply");
                session.last_echo = now;
            }
            Message::FeaturesReply(features) => {
                info!(
                    session = id,
                    datapath_id = format_args!("{:#x}", features.datapath_id),
                    ports = features.ports.len(),
                    "Switch features received"
                );
                session.switch.apply_features(&features);
                notifications.push(Notification::FeaturesReceived {
                    session: id,
                    datapath_id: features.datapath_id,
                });
            }
            Message::PortStatus(status) => {
                if session.switch.apply_port_status(&status) {
                    debug!(
                        session = id,
                        port_no = status.desc.port_no,
                        reason = ?status.reason,
                        "Port status"
                    );
                    notifications.push(Notification::PortStatusChanged {
                        session: id,
                        reason: status.reason,
                        port_no: status.desc.port_no,
                    });
                } else {
                    // The FEATURES_REPLY still to come carries the full port set
                    debug!(
                        session = id,
                        port_no = status.desc.port_no,
                        "Port status before features, dropped"
                    );
                }
            }
            Message::Error(err) => {
                warn!(
                    session = id,
                    "Error of type {} code {}", err.err_type, err.code
                );
            }
            Message::PacketIn(packet) => {
                notifications.push(Notification::PacketIn { session: id, packet });
            }
            Message::FlowRemoved(removed) => {
                debug!(session = id, priority = removed.priority, "Flow removed");
            }
            Message::BarrierReply => trace!(session = id, "Barrier reply"),
            Message::Hello => debug!(session = id, "Ignoring repeated hello"),
            other => {
                debug!(session = id, msg_type = ?other.msg_type(), "Unexpected message from switch");
            }
        }
        notifications
    }

    /// Forgets `id` and everything known about its switch.
    ///
    /// Returns `SwitchLeft` when the switch had sent its features.
    pub fn close(&mut self, id: SessionId) -> Option<Notification> {
        let session = self.sessions.remove(&id)?;
        match session.switch.datapath_id() {
            Some(datapath_id) => {
                info!(
                    session = id,
                    datapath_id = format_args!("{:#x}", datapath_id),
                    "Datapath leaves"
                );
                Some(Notification::SwitchLeft {
                    session: id,
                    datapath_id,
                })
            }
            None => {
                info!(session = id, "Switch disconnected before handshake completed");
                None
            }
        }
    }

    /// Sends `message` to `id` under a fresh transaction id.
    pub fn send(&self, id: SessionId, message: &Message) -> Result<()> {
        let session = self.sessions.get(&id).ok_or(CoinError::UnknownSession(id))?;
        Self::send_to(session, message)
    }

    /// Sends an already encoded frame.
    pub fn send_frame(&self, id: SessionId, frame: Bytes) -> Result<()> {
        let session = self.sessions.get(&id).ok_or(CoinError::UnknownSession(id))?;
        session
            .outbound
            .send(frame)
            .map_err(|_| CoinError::UnknownSession(id))
    }

    fn send_to(session: &Session, message: &Message) -> Result<()> {
        Self::send_with_xid(session, message, next_xid())
    }

    fn send_with_xid(session: &Session, message: &Message, xid: u32) -> Result<()> {
        let frame = message.encode(xid)?;
        session
            .outbound
            .send(frame)
            .map_err(|_| CoinError::UnknownSession(session.id))
    }

    /// Sends ECHO_REQUEST to every handshaken session.
    pub fn send_echo_requests(&self) {
        for session in self.sessions.values().filter(|s| s.handshake_done) {
            if let Err(e) = Self::send_to(session, &Message::EchoRequest(Vec::new())) {
                debug!(session = session.id, error = %e, "Echo request not sent");
            }
        }
    }

    /// Sessions silent for longer than `timeout`.
    pub fn stale_sessions(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        self.sessions
            .values()
            .filter(|s| now.saturating_duration_since(s.last_echo) > timeout)
            .map(|s| s.id)
            .collect()
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn switch(&self, id: SessionId) -> Option<&SwitchState> {
        self.sessions.get(&id).map(|s| &s.switch)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Sessions whose switch has sent its features.
    pub fn switches(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.switch.has_features())
    }

    /// The switch the mode drivers program: the oldest one with features.
    pub fn primary(&self) -> Option<&Session> {
        self.switches().next()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
