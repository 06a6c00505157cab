//! IPC server module for local control clients.
//!
//! A Unix domain socket carrying newline-delimited JSON. Every request gets
//! exactly one JSON line back; failures are reported in the reply and never
//! close the server.

use crate::attributes::AttributeRegistry;
use crate::backend::{Frequency, FrequencyBackend};
use crate::config::ConfigManager;
use crate::error::{DaemonError, IpcError};
use crate::framework::{FreqFramework, HwContext};
use crate::governor::{GovernorSnapshot, On3demand, GOVERNOR_NAME};
use crate::metrics::MetricsCollector;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/on3demand.sock";

/// Commands that can be received via IPC.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum IpcCommand {
    GetStatus,
    GetMetrics,
    ListAttributes,
    ReadAttribute {
        group: String,
        attribute: String,
    },
    WriteAttribute {
        group: String,
        attribute: String,
        value: String,
    },
    /// Inject an idle->busy event
    Active,
    /// Inject a frame completion event
    FrameDone,
    SelectGovernor {
        name: String,
    },
}

/// One published attribute.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AttributeEntry {
    pub group: String,
    pub attribute: String,
}

/// Status response sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusResponse {
    pub active_governor: Option<String>,
    pub governors: Vec<String>,
    pub on3demand: GovernorSnapshot,
    /// `None` when the backend could not be read
    pub load: Option<u32>,
    pub current_frequency: Option<Frequency>,
    pub min_frequency: Option<Frequency>,
    pub max_frequency: Option<Frequency>,
}

/// Shared daemon state accessible by the IPC server.
pub struct DaemonState {
    pub framework: Arc<FreqFramework>,
    pub governor: On3demand,
    pub backend: Arc<dyn FrequencyBackend>,
    pub metrics: Arc<MetricsCollector>,
    pub config_manager: Arc<ConfigManager>,
}

impl DaemonState {
    pub fn new(
        framework: Arc<FreqFramework>,
        governor: On3demand,
        backend: Arc<dyn FrequencyBackend>,
        metrics: Arc<MetricsCollector>,
        config_manager: Arc<ConfigManager>,
    ) -> Self {
        Self {
            framework,
            governor,
            backend,
            metrics,
            config_manager,
        }
    }

    pub fn attributes(&self) -> &Arc<AttributeRegistry> {
        self.framework.attributes()
    }

    /// Hardware context as seen right now.
    pub fn hw_context(&self) -> HwContext {
        HwContext {
            active: self.backend.load().map(|load| load > 0).unwrap_or(false),
        }
    }

    /// Select a governor and apply its configured tunables.
    /// With `persist`, the selection is also written to the config file.
    pub async fn select_governor(&self, name: &str, persist: bool) -> Result<(), DaemonError> {
        self.framework.select(name, &self.hw_context()).await?;

        let mut config = self.config_manager.get();
        if name == GOVERNOR_NAME {
            self.governor.apply_tunables(&config.tunables);
        }

        if persist && config.governor != name {
            config.governor = name.to_string();
            self.config_manager.update(config)?;
        }
        Ok(())
    }

    pub fn get_status(&self) -> StatusResponse {
        StatusResponse {
            active_governor: self.framework.active_name().map(str::to_string),
            governors: self
                .framework
                .governor_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            on3demand: self.governor.snapshot(),
            load: self.backend.load().ok(),
            current_frequency: self.backend.frequency().ok(),
            min_frequency: self.backend.frequency_min().ok(),
            max_frequency: self.backend.frequency_max().ok(),
        }
    }

    /// Write the governor's current tunables back to the config file.
    fn persist_tunables(&self) {
        let mut config = self.config_manager.get();
        config.tunables = self.governor.snapshot().tunables;
        if let Err(e) = self.config_manager.update(config) {
            warn!("Failed to persist tunables: {}", e);
        }
    }
}

fn failure(error: impl Display) -> serde_json::Value {
    serde_json::json!({ "success": false, "error": error.to_string() })
}

/// Unix Domain Socket server for IPC.
#[cfg(unix)]
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    /// Bind a new server at `path`, replacing any stale socket file.
    pub async fn new(path: &str) -> Result<Self, IpcError> {
        let socket_path = PathBuf::from(path);

        Self::cleanup_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| IpcError::SocketBindFailed {
            path: path.to_string(),
            source: e,
        })?;

        Ok(Self {
            socket_path,
            listener,
        })
    }

    pub async fn new_default() -> Result<Self, IpcError> {
        Self::new(DEFAULT_SOCKET_PATH).await
    }

    fn cleanup_socket(path: &Path) -> Result<(), IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| IpcError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per client.
    pub async fn run(&self, state: Arc<DaemonState>) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, state).await {
                            warn!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting IPC connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(stream: UnixStream, state: Arc<DaemonState>) -> Result<(), IpcError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            let response = match serde_json::from_str::<IpcCommand>(trimmed) {
                Ok(command) => Self::handle_command(command, &state).await,
                Err(e) => failure(format!("Invalid command: {}", e)),
            };

            let response_str = serde_json::to_string(&response)?;
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            line.clear();
        }

        Ok(())
    }

    /// Handle a single IPC command and return the response.
    pub async fn handle_command(command: IpcCommand, state: &Arc<DaemonState>) -> serde_json::Value {
        match command {
            IpcCommand::GetStatus => match serde_json::to_value(state.get_status()) {
                Ok(status) => status,
                Err(e) => failure(format!("Failed to serialize status: {}", e)),
            },

            IpcCommand::GetMetrics => match serde_json::to_value(state.metrics.get_metrics()) {
                Ok(metrics) => metrics,
                Err(e) => failure(format!("Failed to serialize metrics: {}", e)),
            },

            IpcCommand::ListAttributes => {
                let attributes: Vec<AttributeEntry> = state
                    .attributes()
                    .list()
                    .into_iter()
                    .map(|(group, attribute)| AttributeEntry {
                        group,
                        attribute: attribute.to_string(),
                    })
                    .collect();
                serde_json::json!({ "success": true, "attributes": attributes })
            }

            IpcCommand::ReadAttribute { group, attribute } => {
                match state.attributes().show(&group, &attribute) {
                    Ok(value) => serde_json::json!({ "success": true, "value": value.trim_end() }),
                    Err(e) => failure(e),
                }
            }

            IpcCommand::WriteAttribute {
                group,
                attribute,
                value,
            } => match state.attributes().store(&group, &attribute, &value) {
                Ok(()) => {
                    info!("Attribute {}/{} written via IPC: {:?}", group, attribute, value);
                    if group == GOVERNOR_NAME {
                        state.persist_tunables();
                    }
                    serde_json::json!({ "success": true })
                }
                Err(e) => {
                    warn!("Attribute write via IPC rejected: {}", e);
                    failure(e)
                }
            },

            IpcCommand::Active => {
                state.framework.on_active();
                serde_json::json!({ "success": true })
            }

            IpcCommand::FrameDone => {
                state.framework.on_frame_done();
                serde_json::json!({ "success": true })
            }

            IpcCommand::SelectGovernor { name } => match state.select_governor(&name, true).await {
                Ok(()) => {
                    info!("Governor '{}' selected via IPC", name);
                    serde_json::json!({ "success": true, "governor": name })
                }
                Err(e) => {
                    warn!("Governor selection via IPC failed: {}", e);
                    failure(e)
                }
            },
        }
    }
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
