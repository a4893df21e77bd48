//! # Slave Transport Layer
//!
//! Wraps one accepted TCP socket for use by a session: the read half is
//! handed to the pipeline control loop, response writes go through an async
//! lock, and a shared liveness flag backs the session's non-destructive
//! [`probe`](TcpSlaveTransport::probe).
//!
//! The probe never touches the socket. The control loop is the only reader;
//! it marks the transport dead when the peer closes the stream or a read
//! fails, and the session's polling loop observes that flag. This keeps the
//! liveness check free of side effects on in-flight frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ModbusError, ModbusResult};
use crate::utils::format::bytes_to_hex;

/// Maximum frame size for Modbus TCP (MBAP header + PDU).
pub const MAX_TCP_FRAME_SIZE: usize = 260;

/// Log a packet with direction at trace level.
fn log_packet(direction: &str, peer: SocketAddr, data: &[u8]) {
    debug!("[MODBUS-TCP] {} {} {}", direction, peer, bytes_to_hex(data));
}

/// One accepted connection, split for concurrent read and write.
///
/// The pipeline control loop takes exclusive ownership of the read half via
/// [`take_reader`](Self::take_reader); writes and close are shared through
/// the transport handle.
pub struct TcpSlaveTransport {
    peer: SocketAddr,
    reader: StdMutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    alive: Arc<AtomicBool>,
}

impl TcpSlaveTransport {
    /// Wire a transport around an accepted stream.
    ///
    /// Failure here (the peer vanished between accept and wiring) is fatal to
    /// the session being created.
    pub fn new(stream: TcpStream) -> ModbusResult<Self> {
        let peer = stream
            .peer_addr()
            .map_err(|e| ModbusError::init(format!("failed to resolve peer address: {}", e)))?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            peer,
            reader: StdMutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Hand the read half to the control loop. Can succeed only once.
    pub fn take_reader(&self) -> ModbusResult<OwnedReadHalf> {
        let mut slot = self
            .reader
            .lock()
            .map_err(|_| ModbusError::internal("transport reader lock poisoned"))?;
        slot.take()
            .ok_or_else(|| ModbusError::internal("transport read half already taken"))
    }

    /// Write a complete response frame to the peer.
    pub async fn write(&self, data: &[u8]) -> ModbusResult<()> {
        let mut slot = self.writer.lock().await;
        let writer = slot
            .as_mut()
            .ok_or_else(|| ModbusError::connection("transport already closed"))?;

        log_packet("SEND", self.peer, data);
        writer.write_all(data).await.map_err(|e| {
            self.alive.store(false, Ordering::SeqCst);
            ModbusError::io(format!("write to {} failed: {}", self.peer, e))
        })?;
        writer
            .flush()
            .await
            .map_err(|e| ModbusError::io(format!("flush to {} failed: {}", self.peer, e)))
    }

    /// Non-destructive liveness check. Reads no socket data and has no side
    /// effects; reflects what the control loop last observed.
    pub fn probe(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the peer as gone. Called by the control loop on EOF or read
    /// error.
    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Shared handle to the liveness flag for the control loop.
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Shut down and drop the write half. Idempotent; the first failure is
    /// returned but the transport still ends up closed.
    pub async fn close(&self) -> ModbusResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        let mut slot = self.writer.lock().await;
        if let Some(mut writer) = slot.take() {
            writer
                .shutdown()
                .await
                .map_err(|e| ModbusError::io(format!("close of {} failed: {}", self.peer, e)))?;
        }
        Ok(())
    }

    /// Trace an inbound frame. Exposed for the control loop, which owns the
    /// read half and bypasses the transport for reads.
    pub fn log_received(&self, data: &[u8]) {
        log_packet("RECV", self.peer, data);
    }
}

impl std::fmt::Debug for TcpSlaveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSlaveTransport")
            .field("peer", &self.peer)
            .field("alive", &self.probe())
            .finish()
    }
}
