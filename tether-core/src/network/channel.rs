//! The agent's long-lived link to the controller.
//!
//! A [`Channel`] owns the endpoint, the reconnect policy, and the cipher
//! slot. [`Channel::run`] keeps a connection alive until cancelled, answers
//! liveness probes itself, opens sealed payloads, and hands everything else
//! to the consumer through [`ChannelEvents`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::check_frame;
use crate::crypto::{CipherSlot, EncryptionKey};
use crate::envelope::Envelope;
use crate::error::{CryptoError, TetherError};
use crate::network::backoff::ReconnectPolicy;
use crate::network::connection::{Connection, ConnectionInfo, ConnectionSender};
use crate::state::ConnectionPhase;

const EVENT_QUEUE_DEPTH: usize = 128;

/// What the channel reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A connection to the controller was established.
    Connected,
    /// An inbound envelope, already opened when the channel is encrypted.
    Envelope(Envelope),
    /// The connection was lost; the channel will retry.
    Disconnected,
}

pub type ChannelEvents = mpsc::Receiver<ChannelEvent>;

// ── EnvelopeSink ─────────────────────────────────────────────────

/// Anything outbound envelopes can be pushed into.
#[async_trait]
pub trait EnvelopeSink: Send + Sync {
    /// Send `payload` under `tag`, sealing it when the link is encrypted.
    async fn send(&self, tag: &str, payload: Bytes) -> Result<(), TetherError>;

    fn is_connected(&self) -> bool;
}

// ── Shared state ─────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Shared {
    cipher: CipherSlot,
    outbound: Mutex<Option<ConnectionSender>>,
    phase: Mutex<ConnectionPhase>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn seal(&self, tag: &str, payload: Bytes) -> Result<Envelope, TetherError> {
        if self.cipher.is_key_set() {
            Ok(Envelope::sealed(tag, self.cipher.seal(&payload)?))
        } else {
            Ok(Envelope::new(tag, payload))
        }
    }

    /// Turn a wire envelope into the plaintext the consumer sees.
    fn open(&self, envelope: Envelope) -> Result<Envelope, TetherError> {
        match (self.cipher.is_key_set(), envelope.is_sealed()) {
            (true, true) => {
                let plaintext = self.cipher.open(&envelope.payload)?;
                Ok(Envelope::new(envelope.tag, plaintext))
            }
            (true, false) if envelope.payload.is_empty() => Ok(envelope),
            (true, false) => Err(TetherError::InvalidState(
                "plaintext payload on an encrypted channel",
            )),
            (false, true) => Err(CryptoError::KeyNotSet.into()),
            (false, false) => Ok(envelope),
        }
    }

    fn outbound(&self) -> Option<ConnectionSender> {
        lock(&self.outbound).clone()
    }

    fn set_outbound(&self, sender: Option<ConnectionSender>) {
        *lock(&self.outbound) = sender;
    }
}

// ── ChannelSender ────────────────────────────────────────────────

/// Cloneable send handle onto whatever connection is currently live.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    shared: Arc<Shared>,
}

impl ChannelSender {
    /// Send `payload` under `tag`. Fails with `NotConnected` between
    /// connections; nothing is queued for later.
    pub async fn send(&self, tag: &str, payload: impl Into<Bytes>) -> Result<(), TetherError> {
        let envelope = self.shared.seal(tag, payload.into())?;
        self.send_envelope(envelope).await
    }

    /// Send an envelope as-is, bypassing the cipher. Envelopes over the
    /// frame limits fail with `PayloadTooLarge`/`TagTooLong` and leave the
    /// connection untouched.
    pub async fn send_envelope(&self, envelope: Envelope) -> Result<(), TetherError> {
        check_frame(&envelope)?;
        let tx = self.shared.outbound().ok_or(TetherError::NotConnected)?;
        tx.send(envelope)
            .await
            .map_err(|_| TetherError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.outbound().is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl EnvelopeSink for ChannelSender {
    async fn send(&self, tag: &str, payload: Bytes) -> Result<(), TetherError> {
        ChannelSender::send(self, tag, payload).await
    }

    fn is_connected(&self) -> bool {
        ChannelSender::is_connected(self)
    }
}

// ── Channel ──────────────────────────────────────────────────────

pub struct Channel {
    info: ConnectionInfo,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    events: mpsc::Sender<ChannelEvent>,
}

impl Channel {
    pub fn new(info: ConnectionInfo, policy: ReconnectPolicy) -> (Self, ChannelEvents) {
        let (events, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let channel = Self {
            info,
            policy,
            shared: Arc::new(Shared::default()),
            events,
        };
        (channel, rx)
    }

    /// Switch the channel to encrypted mode. Allowed once.
    pub fn set_key(&self, key: &EncryptionKey) -> Result<(), TetherError> {
        self.shared.cipher.set_key(key)?;
        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.shared.cipher.is_key_set()
    }

    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        *lock(&self.shared.phase)
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Connect, pump, and reconnect until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = self.policy.backoff();
        info!(endpoint = %self.info, encrypted = self.is_encrypted(), "channel started");

        while !cancel.is_cancelled() {
            self.transition(|p| p.begin_connect());

            let attempt = tokio::select! {
                _ = cancel.cancelled() => break,
                r = Connection::connect(&self.info) => r,
            };

            match attempt {
                Ok(conn) => {
                    backoff.reset();
                    self.transition(|p| p.complete_connect());
                    self.shared.set_outbound(Some(conn.sender()));
                    info!(endpoint = %self.info, "connected to controller");
                    let _ = self.events.send(ChannelEvent::Connected).await;

                    self.pump(conn, &cancel).await;

                    self.shared.set_outbound(None);
                    lock(&self.shared.phase).force_disconnect();
                    let _ = self.events.send(ChannelEvent::Disconnected).await;
                    info!(endpoint = %self.info, "disconnected from controller");
                }
                Err(e) => {
                    lock(&self.shared.phase).force_disconnect();
                    warn!(endpoint = %self.info, error = %e, "connect failed");
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, attempt = backoff.attempt(), "waiting before reconnect");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.shared.set_outbound(None);
        lock(&self.shared.phase).force_disconnect();
        info!("channel stopped");
    }

    async fn pump(&self, mut conn: Connection, cancel: &CancellationToken) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                e = conn.recv() => e,
            };
            let Some(envelope) = next else {
                return;
            };

            if envelope.is_ping() {
                if let Err(e) = conn.send(Envelope::pong()).await {
                    warn!(error = %e, "failed to answer ping");
                    return;
                }
                continue;
            }

            match self.shared.open(envelope) {
                Ok(envelope) => {
                    if self.events.send(ChannelEvent::Envelope(envelope)).await.is_err() {
                        debug!("event consumer gone");
                    }
                }
                Err(e) => warn!(error = %e, "dropping inbound envelope"),
            }
        }
    }

    fn transition(&self, f: impl Fn(&mut ConnectionPhase) -> Result<(), TetherError>) {
        let mut phase = lock(&self.shared.phase);
        if let Err(e) = f(&mut phase) {
            debug!(error = %e, phase = %*phase, "unexpected phase transition");
            phase.force_disconnect();
            let _ = f(&mut phase);
        }
    }
}
