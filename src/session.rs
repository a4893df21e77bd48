//! # Connection Sessions
//!
//! One [`TcpSession`] per accepted socket. A session owns its transport and
//! pipeline control loop and moves through four states:
//!
//! Created -> Running -> Draining -> Closed
//!
//! While running, the session polls the transport's non-destructive liveness
//! probe every poll interval (default 500 ms); a failed probe is the sole
//! peer-closed trigger. A kill signal (server shutdown or explicit close)
//! moves it to draining immediately.
//!
//! Draining is strictly ordered: pre-close hook, stop the control loop,
//! close the socket (a close failure is reported and teardown continues),
//! post-close hook, remove from the registry. The whole sequence runs at
//! most once per session no matter how many triggers race.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use log::{debug, info};
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::ModbusResult;
use crate::pipeline::{
    default_handler, default_parser, HandlerFactory, MessageControl, ParserFactory,
};
use crate::register_bank::ModbusRegisterBank;
use crate::server::{ExceptionSink, SessionRegistry};
use crate::transport::TcpSlaveTransport;

/// Default liveness poll interval.
pub const LIVENESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Draining,
    Closed,
}

/// Hook invoked with the pipeline control handle just before teardown stops
/// the control loop.
pub type PreCloseHook = Arc<dyn Fn(&MessageControl) + Send + Sync>;

/// Hook invoked with the peer address after the socket is closed.
pub type PostCloseHook = Arc<dyn Fn(SocketAddr) + Send + Sync>;

/// Per-session configuration, derived from the server config at accept time.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Selects the encapsulated (RTU-over-TCP) default pipeline instead of
    /// MBAP.
    pub encapsulated: bool,
    /// Liveness poll interval; `None` uses [`LIVENESS_POLL_INTERVAL`].
    pub poll_interval: Option<Duration>,
    /// Replaces the default parser for this session's mode.
    pub parser_factory: Option<ParserFactory>,
    /// Replaces the default bank-backed handler.
    pub handler_factory: Option<HandlerFactory>,
    pub pre_close: Option<PreCloseHook>,
    pub post_close: Option<PostCloseHook>,
}

/// One live connection.
pub struct TcpSession {
    id: u64,
    peer: SocketAddr,
    transport: Arc<TcpSlaveTransport>,
    control: MessageControl,
    state: StdMutex<SessionState>,
    kill: CancellationToken,
    done: CancellationToken,
    torn_down: AtomicBool,
    config: SessionConfig,
    bank: Arc<ModbusRegisterBank>,
    sink: Arc<dyn ExceptionSink>,
}

impl TcpSession {
    /// Wire a session around an accepted stream.
    ///
    /// Transport wiring failure here is fatal to the session; the caller
    /// reports it and drops the stream.
    pub fn new(
        id: u64,
        stream: TcpStream,
        config: SessionConfig,
        bank: Arc<ModbusRegisterBank>,
        sink: Arc<dyn ExceptionSink>,
    ) -> ModbusResult<Arc<Self>> {
        let transport = Arc::new(TcpSlaveTransport::new(stream)?);
        let peer = transport.peer_addr();

        Ok(Arc::new(Self {
            id,
            peer,
            transport,
            control: MessageControl::new(),
            state: StdMutex::new(SessionState::Created),
            kill: CancellationToken::new(),
            done: CancellationToken::new(),
            torn_down: AtomicBool::new(false),
            config,
            bank,
            sink,
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state.lock().map(|s| *s).unwrap_or(SessionState::Closed)
    }

    fn set_state(&self, state: SessionState) {
        if let Ok(mut slot) = self.state.lock() {
            *slot = state;
        }
    }

    /// Request teardown. Returns immediately; the session task drains.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Resolves once the session has fully closed.
    pub async fn wait_closed(&self) {
        self.done.cancelled().await;
    }

    /// Run the session to completion: start the pipeline, poll liveness,
    /// drain. Spawned by the server, one task per session (the pipeline
    /// control loop is the second).
    pub async fn run(self: Arc<Self>, registry: Arc<SessionRegistry>) {
        info!("session {} started for {}", self.id, self.peer);
        self.set_state(SessionState::Running);

        let parser = match &self.config.parser_factory {
            Some(factory) => factory(self.config.encapsulated),
            None => default_parser(self.config.encapsulated),
        };
        let handler = match &self.config.handler_factory {
            Some(factory) => factory(self.config.encapsulated),
            None => default_handler(Arc::clone(&self.bank)),
        };

        match self
            .control
            .start(Arc::clone(&self.transport), parser, handler, Arc::clone(&self.sink))
            .await
        {
            Ok(()) => {
                let interval = self.config.poll_interval.unwrap_or(LIVENESS_POLL_INTERVAL);
                loop {
                    tokio::select! {
                        _ = self.kill.cancelled() => {
                            debug!("session {} killed", self.id);
                            break;
                        }
                        _ = sleep(interval) => {
                            if !self.transport.probe() {
                                debug!("session {} peer {} gone", self.id, self.peer);
                                break;
                            }
                        }
                    }
                }
            }
            Err(error) => {
                // Fatal at creation: report and fall straight into teardown.
                self.sink.report(&error);
            }
        }

        self.teardown(&registry).await;
    }

    /// Ordered, at-most-once teardown.
    async fn teardown(&self, registry: &SessionRegistry) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Draining);

        if let Some(hook) = &self.config.pre_close {
            hook(&self.control);
        }

        self.control.close().await;

        if let Err(error) = self.transport.close().await {
            self.sink.report(&error);
        }

        if let Some(hook) = &self.config.post_close {
            hook(self.peer);
        }

        registry.remove(self.id);
        self.set_state(SessionState::Closed);
        self.done.cancel();
        info!("session {} for {} closed", self.id, self.peer);
    }
}

impl std::fmt::Debug for TcpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSession")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .finish()
    }
}
