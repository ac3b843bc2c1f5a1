//! Debug Adapter Protocol driver bridge.
//!
//! Presents a synchronous, stateful driver interface to a host debugging
//! engine on top of an asynchronous DAP peer running in a child process.
//! Host calls enter the session and block on a peer round trip; peer events
//! flow the other way, reconciling the breakpoint and module registries and
//! pushing notifications to the host.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::sync::{mpsc, watch};

pub mod breakpoints;
pub mod commands;
pub mod communication;
pub mod disasm;
pub mod events;
pub mod memory;
pub mod modules;
pub mod process;
pub mod protocol;
pub mod transport;
pub mod types;
pub mod variables;

pub use commands::StepGranularity;
pub use disasm::{AnnotatedInstruction, FileSourceLookup, NoSourceLookup, SourceLookup};
pub use memory::MemoryChunk;
pub use process::AdapterLaunch;
pub use protocol::{Capabilities, StackFrame, Thread};
pub use types::{
    BreakpointKind, BreakpointOrigin, DriverEvent, MappedBreakpoint, MappedModule,
    OutputChannel, StopNotification,
};
pub use variables::{
    NoRegisterViewSettings, RegisterGroup, RegisterViewSettings, VariableHandle,
};

use breakpoints::BreakpointRegistry;
use communication::DapCommunication;
use events::EventDispatcher;
use modules::ModuleRegistry;
use process::AdapterProcess;
use transport::BridgeWriter;
use variables::FrameVariableCache;

#[derive(Error, Debug)]
pub enum DapError {
    #[error("adapter i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} is not supported by the debug adapter")]
    UnsupportedByPeer(&'static str),
    #[error("adapter rejected '{command}': {message}")]
    PeerRejected { command: String, message: String },
    #[error("transport closed")]
    TransportClosed,
    #[error("'{0}' timed out")]
    Timeout(&'static str),
    #[error("not implemented by this debug driver: {0}")]
    NotImplemented(&'static str),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for DapError {
    fn from(err: serde_json::Error) -> Self {
        DapError::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DapError>;

/// Hard timeout for the narrow set of simple host queries. Everything else
/// is unbounded and relies on transport teardown for cancellation.
pub(crate) const QUERY_TIMEOUT: Duration = Duration::from_secs(4);

/// Session configuration supplied by the host's configuration layer.
pub struct DriverConfig {
    pub adapter_id: String,
    pub client_id: String,
    pub client_name: String,
    /// Architecture/backend key for register view preferences.
    pub arch: String,
    /// Extra fields merged into the initialize request arguments.
    pub extra_initialize: serde_json::Map<String, Value>,
    pub source_lookup: Arc<dyn SourceLookup>,
    pub register_settings: Arc<dyn RegisterViewSettings>,
}

impl DriverConfig {
    pub fn new(adapter_id: impl Into<String>) -> Self {
        let adapter_id = adapter_id.into();
        DriverConfig {
            arch: adapter_id.clone(),
            adapter_id,
            client_id: "dapdbg".to_string(),
            client_name: "dapdbg".to_string(),
            extra_initialize: serde_json::Map::new(),
            source_lookup: Arc::new(NoSourceLookup),
            register_settings: Arc::new(NoRegisterViewSettings),
        }
    }
}

/// State shared between host calls and the event dispatch context. The
/// registries are mutated by events on the dispatch task and by explicit
/// host mutations; the mutex serializes both.
pub(crate) struct Shared {
    pub comm: Arc<DapCommunication>,
    pub capabilities: OnceLock<Capabilities>,
    pub breakpoints: Mutex<BreakpointRegistry>,
    pub modules: Mutex<ModuleRegistry>,
    pub frame: Mutex<Option<FrameVariableCache>>,
    pub notifier: mpsc::UnboundedSender<DriverEvent>,
    pub initialized: watch::Sender<bool>,
}

impl Shared {
    pub fn notify(&self, event: DriverEvent) {
        let _ = self.notifier.send(event);
    }
}

/// One debugging session: the adapter process, its wire plumbing, and the
/// reconciled registries. Dropping the session (or calling `close`) tears
/// the transport down; pending requests fail rather than being cancelled
/// one by one.
pub struct DapSession {
    shared: Arc<Shared>,
    process: tokio::sync::Mutex<Option<AdapterProcess>>,
    config: DriverConfig,
}

impl DapSession {
    /// Spawn the adapter process and wire transport, correlation and
    /// dispatch. Must run inside a tokio runtime. The returned receiver
    /// carries host notifications for the session's lifetime.
    pub fn spawn(
        launch: &AdapterLaunch,
        config: DriverConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<DriverEvent>)> {
        let mut process = AdapterProcess::start(launch)?;
        let stdin = process
            .take_stdin()
            .ok_or_else(|| DapError::Protocol("adapter stdin unavailable".into()))?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| DapError::Protocol("adapter stdout unavailable".into()))?;
        let stderr = process
            .take_stderr()
            .ok_or_else(|| DapError::Protocol("adapter stderr unavailable".into()))?;

        let (bridge_writer, bridge_reader, bridge_control) = transport::bridge();
        let comm = Arc::new(DapCommunication::new(stdin, bridge_control));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let _reader = comm.spawn_reader(bridge_reader, dispatch_tx);
        spawn_stdout_pump(stdout, bridge_writer);
        spawn_stderr_pump(stderr, notify_tx.clone());

        let shared = Arc::new(Shared {
            comm,
            capabilities: OnceLock::new(),
            breakpoints: Mutex::new(BreakpointRegistry::new()),
            modules: Mutex::new(ModuleRegistry::new()),
            frame: Mutex::new(None),
            notifier: notify_tx,
            initialized: watch::channel(false).0,
        });

        tokio::spawn(EventDispatcher::new(shared.clone()).run(dispatch_rx));

        Ok((
            DapSession {
                shared,
                process: tokio::sync::Mutex::new(Some(process)),
                config,
            },
            notify_rx,
        ))
    }

    /// The initialize handshake: client identification, fixed feature flags
    /// (1-based lines and columns, memory references, no variable type
    /// hints) plus the caller's extra arguments. Capabilities are stored
    /// once and gate optional operations for the rest of the session.
    pub async fn initialize(&self) -> Result<Capabilities> {
        let mut arguments = json!({
            "clientID": self.config.client_id,
            "clientName": self.config.client_name,
            "adapterID": self.config.adapter_id,
            "linesStartAt1": true,
            "columnsStartAt1": true,
            "pathFormat": "path",
            "supportsMemoryReferences": true,
            "supportsVariableType": false,
        });
        if let Value::Object(map) = &mut arguments {
            for (key, value) in &self.config.extra_initialize {
                map.insert(key.clone(), value.clone());
            }
        }

        let body = self.shared.comm.request("initialize", arguments).await?;
        let capabilities: Capabilities = serde_json::from_value(body)?;
        if self.shared.capabilities.set(capabilities.clone()).is_err() {
            log::warn!("initialize called twice; keeping first capability set");
        }
        Ok(capabilities)
    }

    /// The post-initialize step for launch sessions: send the launch
    /// request, wait for the peer's initialized event, signal the end of
    /// configuration, then collect the launch response (some adapters only
    /// answer it after configurationDone).
    pub async fn launch(&self, arguments: Value) -> Result<()> {
        let pending = self.shared.comm.begin_request("launch", arguments).await?;
        self.wait_initialized().await?;
        if self.capabilities()?.supports_configuration_done_request {
            self.shared
                .comm
                .request("configurationDone", json!({}))
                .await?;
        }
        DapCommunication::finish_request("launch", pending).await?;
        Ok(())
    }

    async fn wait_initialized(&self) -> Result<()> {
        let mut rx = self.shared.initialized.subscribe();
        loop {
            if *rx.borrow() {
                return Ok(());
            }
            rx.changed().await.map_err(|_| DapError::TransportClosed)?;
        }
    }

    pub fn capabilities(&self) -> Result<&Capabilities> {
        self.shared
            .capabilities
            .get()
            .ok_or_else(|| DapError::Protocol("session is not initialized".into()))
    }

    /// Fail fast with a descriptive error before sending a request the peer
    /// cannot service.
    pub(crate) fn require(&self, flag: bool, operation: &'static str) -> Result<()> {
        if flag {
            Ok(())
        } else {
            Err(DapError::UnsupportedByPeer(operation))
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    pub(crate) fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.shared.comm.is_open()
    }

    /// Tear the session down: best-effort disconnect, close the transport
    /// (waking any blocked reader), fail pending requests, kill the child.
    pub async fn close(&self) {
        let disconnect = self
            .shared
            .comm
            .request("disconnect", json!({ "terminateDebuggee": true }));
        if tokio::time::timeout(Duration::from_secs(2), disconnect)
            .await
            .is_err()
        {
            log::debug!("disconnect request timed out during close");
        }
        self.shared.comm.shutdown().await;
        if let Some(mut process) = self.process.lock().await.take() {
            let _ = process.kill().await;
        }
    }
}

/// Pump adapter stdout into the transport bridge. The bounded bridge
/// provides the backpressure; a full buffer blocks this writer.
fn spawn_stdout_pump(mut stdout: ChildStdout, writer: BridgeWriter) {
    tokio::spawn(async move {
        log::debug!("adapter stdout pump started");
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if writer.push(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::debug!("adapter stdout read failed: {err}");
                    break;
                }
            }
        }
        log::debug!("adapter stdout pump finished");
    });
}

/// Adapter stderr is not protocol traffic; forward it line-wise on the
/// debugger channel.
fn spawn_stderr_pump(stderr: ChildStderr, notifier: mpsc::UnboundedSender<DriverEvent>) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        log::debug!("adapter stderr: {trimmed}");
                        let _ = notifier.send(DriverEvent::Output {
                            channel: OutputChannel::Debugger,
                            text: trimmed.to_string(),
                        });
                    }
                }
                Err(_) => break,
            }
        }
    });
}
