use std::fmt;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{EnvelopeCodec, check_frame};
use crate::envelope::Envelope;
use crate::error::TetherError;

/// Outbound queue into a connection's writer task.
pub type ConnectionSender = mpsc::Sender<Envelope>;

const QUEUE_DEPTH: usize = 100;

/// One framed TCP stream to the controller.
///
/// A background writer task owns the sink, so every envelope sent on this
/// connection is written whole and in queue order no matter how many
/// producers hold a [`ConnectionSender`]. A failed write closes the
/// connection: [`recv`](Connection::recv) then returns `None`.
#[derive(Debug)]
pub struct Connection {
    // Channel to the background writer task
    tx: ConnectionSender,
    // Channel from the background reader task
    rx: mpsc::Receiver<Envelope>,
    reader: JoinHandle<()>,
    // Fired by the writer when the stream can no longer be written
    broken: CancellationToken,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, EnvelopeCodec::new()).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Envelope>(QUEUE_DEPTH);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(QUEUE_DEPTH);

        let broken = CancellationToken::new();

        // Writer task: drains until every sender is dropped
        let writer_broken = broken.clone();
        tokio::spawn(async move {
            while let Some(envelope) = network_rx.recv().await {
                if let Err(e) = net_writer.send(envelope).await {
                    warn!(error = %e, "network write failed");
                    writer_broken.cancel();
                    return;
                }
            }
            let _ = net_writer.close().await;
        });

        // Reader task: stops on codec error, EOF, or when the user side is gone
        let reader = tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(envelope) => {
                        if network_tx.send(envelope).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "network read failed");
                        break;
                    }
                }
            }
            debug!("reader task finished");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
            reader,
            broken,
        }
    }

    pub async fn connect(info: &ConnectionInfo) -> Result<Self, TetherError> {
        let stream = TcpStream::connect(info.to_string()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Queue `envelope` for the writer. Envelopes that exceed the frame
    /// limits are refused here and never reach the stream.
    pub async fn send(&self, envelope: Envelope) -> Result<(), TetherError> {
        check_frame(&envelope)?;
        self.tx
            .send(envelope)
            .await
            .map_err(|_| TetherError::NotConnected)
    }

    /// Next inbound envelope; `None` once the stream is closed or broken.
    pub async fn recv(&mut self) -> Option<Envelope> {
        tokio::select! {
            e = self.rx.recv() => e,
            _ = self.broken.cancelled() => None,
        }
    }

    pub fn is_broken(&self) -> bool {
        self.broken.is_cancelled()
    }

    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Controller endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
