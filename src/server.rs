//! # Slave Server
//!
//! [`TcpSlave`] binds a listener, accepts connections without limit, and
//! tracks one [`TcpSession`] per connection in a [`SessionRegistry`].
//!
//! Shutdown is strictly ordered: stop the accept loop and close the
//! listener, kill every tracked session, clear the registry, then wait a
//! bounded grace period (default 3 s) for in-flight teardown to drain. A
//! drain timeout is reported through the exception sink and never retried.
//!
//! All non-fatal reportable errors (socket close failures, frame errors,
//! drain timeouts) flow through one process-wide [`ExceptionSink`] handle;
//! the default [`LoggingSink`] forwards to the `log` crate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{ModbusError, ModbusResult};
use crate::register_bank::ModbusRegisterBank;
use crate::session::{SessionConfig, TcpSession};

/// Default Modbus TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default shutdown grace period.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

/// Receiver for non-fatal reportable errors.
///
/// Implementations must be cheap and non-blocking; sessions call `report`
/// inline from their tasks.
pub trait ExceptionSink: Send + Sync {
    fn report(&self, error: &ModbusError);
}

/// Default sink: transport errors at warn level, everything else at error.
pub struct LoggingSink;

impl ExceptionSink for LoggingSink {
    fn report(&self, error: &ModbusError) {
        if error.is_transport_error() {
            warn!("{}", error);
        } else {
            error!("{}", error);
        }
    }
}

/// Tracks live sessions. Every mutating method takes the single internal
/// lock; there is no other synchronization point for session tracking.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: StdMutex<HashMap<u64, Arc<TcpSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<TcpSession>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(session.id(), session);
        }
    }

    /// Remove a session by id. Idempotent.
    pub fn remove(&self, id: u64) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&id);
        }
    }

    /// Snapshot the live sessions.
    pub fn snapshot(&self) -> Vec<Arc<TcpSession>> {
        self.sessions
            .lock()
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every tracked session.
    pub fn clear(&self) -> Vec<Arc<TcpSession>> {
        self.sessions
            .lock()
            .map(|mut sessions| sessions.drain().map(|(_, s)| s).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Server counters.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub accepted_connections: u64,
    pub active_sessions: usize,
}

/// TCP slave configuration.
#[derive(Clone)]
pub struct TcpSlaveConfig {
    pub bind_address: SocketAddr,
    /// Session pipeline mode and hooks, applied to every accepted
    /// connection.
    pub session: SessionConfig,
    /// Grace period for the shutdown drain.
    pub shutdown_grace: Duration,
    pub register_bank: Option<Arc<ModbusRegisterBank>>,
    pub exception_sink: Option<Arc<dyn ExceptionSink>>,
}

impl Default for TcpSlaveConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], DEFAULT_TCP_PORT)),
            session: SessionConfig::default(),
            shutdown_grace: SHUTDOWN_GRACE,
            register_bank: None,
            exception_sink: None,
        }
    }
}

/// Slave server interface.
#[async_trait]
pub trait ModbusSlave: Send + Sync {
    /// Bind and start accepting connections.
    async fn start(&mut self) -> ModbusResult<()>;

    /// Ordered shutdown; see the module docs.
    async fn stop(&mut self) -> ModbusResult<()>;

    fn is_running(&self) -> bool;

    fn stats(&self) -> ServerStats;

    fn register_bank(&self) -> Arc<ModbusRegisterBank>;
}

/// Modbus TCP slave.
pub struct TcpSlave {
    config: TcpSlaveConfig,
    bank: Arc<ModbusRegisterBank>,
    sink: Arc<dyn ExceptionSink>,
    registry: Arc<SessionRegistry>,
    accepted: Arc<AtomicU64>,
    next_session_id: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Option<SocketAddr>,
}

impl std::fmt::Debug for TcpSlave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpSlave")
            .field("local_addr", &self.local_addr)
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

impl TcpSlave {
    /// Create a slave listening on `bind_address`.
    pub fn new(bind_address: &str) -> ModbusResult<Self> {
        let addr = bind_address
            .parse()
            .map_err(|e| ModbusError::configuration(format!("invalid bind address: {}", e)))?;
        Self::with_config(TcpSlaveConfig { bind_address: addr, ..Default::default() })
    }

    pub fn with_config(config: TcpSlaveConfig) -> ModbusResult<Self> {
        let bank = config
            .register_bank
            .clone()
            .unwrap_or_else(|| Arc::new(ModbusRegisterBank::new()));
        let sink: Arc<dyn ExceptionSink> =
            config.exception_sink.clone().unwrap_or_else(|| Arc::new(LoggingSink));

        Ok(Self {
            config,
            bank,
            sink,
            registry: Arc::new(SessionRegistry::new()),
            accepted: Arc::new(AtomicU64::new(0)),
            next_session_id: Arc::new(AtomicU64::new(1)),
            running: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            accept_task: Mutex::new(None),
            local_addr: None,
        })
    }

    /// Address the listener is actually bound to. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Registry handle, exposed for tests and monitoring.
    pub fn session_registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    async fn accept_loop(
        listener: TcpListener,
        config: TcpSlaveConfig,
        bank: Arc<ModbusRegisterBank>,
        sink: Arc<dyn ExceptionSink>,
        registry: Arc<SessionRegistry>,
        accepted: Arc<AtomicU64>,
        next_session_id: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("accept loop stopping, closing listener");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let id = next_session_id.fetch_add(1, Ordering::SeqCst);
                            accepted.fetch_add(1, Ordering::SeqCst);
                            info!("accepted connection from {} as session {}", addr, id);

                            match TcpSession::new(
                                id,
                                stream,
                                config.session.clone(),
                                Arc::clone(&bank),
                                Arc::clone(&sink),
                            ) {
                                Ok(session) => {
                                    registry.add(Arc::clone(&session));
                                    tokio::spawn(session.run(Arc::clone(&registry)));
                                }
                                Err(error) => {
                                    // Fatal to this session only.
                                    sink.report(&error);
                                }
                            }
                        }
                        Err(e) => {
                            let error = ModbusError::init(format!("accept failed: {}", e));
                            sink.report(&error);
                            break;
                        }
                    }
                }
            }
        }
        // Listener drops here; no new connections from this point.
        running.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModbusSlave for TcpSlave {
    async fn start(&mut self) -> ModbusResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ModbusError::configuration("slave is already running"));
        }

        info!("starting Modbus TCP slave on {}", self.config.bind_address);

        let listener = TcpListener::bind(self.config.bind_address).await.map_err(|e| {
            self.running.store(false, Ordering::SeqCst);
            ModbusError::init(format!("failed to bind {}: {}", self.config.bind_address, e))
        })?;
        self.local_addr = listener.local_addr().ok();

        self.shutdown = CancellationToken::new();
        let handle = tokio::spawn(Self::accept_loop(
            listener,
            self.config.clone(),
            Arc::clone(&self.bank),
            Arc::clone(&self.sink),
            Arc::clone(&self.registry),
            Arc::clone(&self.accepted),
            Arc::clone(&self.next_session_id),
            Arc::clone(&self.running),
            self.shutdown.clone(),
        ));
        *self.accept_task.lock().await = Some(handle);

        info!("Modbus TCP slave listening on {:?}", self.local_addr);
        Ok(())
    }

    async fn stop(&mut self) -> ModbusResult<()> {
        info!("stopping Modbus TCP slave");

        // 1. Close the listener: cancel the accept loop and wait for it to
        //    drop the socket.
        self.shutdown.cancel();
        if let Some(handle) = self.accept_task.lock().await.take() {
            if let Err(e) = handle.await {
                error!("accept loop join failed: {}", e);
            }
        }

        // 2. Kill every tracked session, then 3. clear the registry. The
        //    sessions drain on their own tasks.
        let sessions = self.registry.snapshot();
        for session in &sessions {
            session.kill();
        }
        self.registry.clear();

        // 4. Bounded drain of in-flight teardown.
        let drain = async {
            for session in &sessions {
                session.wait_closed().await;
            }
        };
        if timeout(self.config.shutdown_grace, drain).await.is_err() {
            let error = ModbusError::timeout(
                "session drain during shutdown",
                self.config.shutdown_grace.as_millis() as u64,
            );
            self.sink.report(&error);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Modbus TCP slave stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stats(&self) -> ServerStats {
        ServerStats {
            accepted_connections: self.accepted.load(Ordering::SeqCst),
            active_sessions: self.registry.len(),
        }
    }

    fn register_bank(&self) -> Arc<ModbusRegisterBank> {
        Arc::clone(&self.bank)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_bind_address() {
        let err = TcpSlave::new("not an address").unwrap_err();
        assert!(matches!(err, ModbusError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let mut slave = TcpSlave::new("127.0.0.1:0").unwrap();
        assert!(!slave.is_running());

        slave.start().await.unwrap();
        assert!(slave.is_running());
        assert!(slave.local_addr().is_some());

        // Double start is rejected.
        assert!(slave.start().await.is_err());

        slave.stop().await.unwrap();
        assert!(!slave.is_running());
        assert_eq!(slave.stats().active_sessions, 0);
    }

    #[tokio::test]
    async fn test_bind_failure_is_init_error() {
        let mut first = TcpSlave::new("127.0.0.1:0").unwrap();
        first.start().await.unwrap();
        let addr = first.local_addr().unwrap();

        let mut second = TcpSlave::new(&addr.to_string()).unwrap();
        let err = second.start().await.unwrap_err();
        assert!(matches!(err, ModbusError::Init { .. }));
        assert!(!second.is_running());

        first.stop().await.unwrap();
    }

    #[test]
    fn test_registry_operations() {
        let registry = SessionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.snapshot().len(), 0);
        registry.remove(99);
        assert!(registry.clear().is_empty());
    }
}
