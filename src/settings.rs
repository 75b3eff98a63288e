use std::{path::PathBuf, time::Duration};

use crate::assistance::AssistanceKind;

/// Shortest polling or refresh period
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Control plane [Settings]
#[derive(Debug, Clone)]
pub struct ControlSettings {
    /// Pipeline status polling period, while running
    pub poll_period: Duration,

    /// Pipeline status polling period, while stopping
    pub stop_poll_period: Duration,

    /// Grace period granted to producers once the bus is closed
    pub producer_grace: Duration,

    /// Initial network assistance timeout
    pub fetch_timeout: Duration,

    /// Assistance kinds requested at startup
    pub kinds: Vec<AssistanceKind>,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(500),
            stop_poll_period: Duration::from_millis(100),
            producer_grace: Duration::from_secs(2),
            fetch_timeout: Duration::from_secs(10),
            kinds: AssistanceKind::ALL.to_vec(),
        }
    }
}

/// Background assistance refresh mode
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub enum Refresh {
    /// No background collection
    #[default]
    Disabled,
    /// Single collection, one request timeout after startup
    Once,
    /// Periodic collection
    Periodic(Duration),
}

/// Assistance [Settings]
#[derive(Debug, Clone)]
pub struct AssistanceSettings {
    /// Assistance server (host:port). Offline when not defined.
    pub server: Option<String>,

    /// Cache directory
    pub directory: PathBuf,

    /// Gzip compressed cache
    pub gzip: bool,

    /// Single request timeout
    pub request_timeout: Duration,

    /// Background [Refresh] mode
    pub refresh: Refresh,
}

impl Default for AssistanceSettings {
    fn default() -> Self {
        Self {
            server: None,
            directory: PathBuf::from("."),
            gzip: false,
            request_timeout: Duration::from_secs(5),
            refresh: Refresh::Disabled,
        }
    }
}

/// Producer [Settings]
#[derive(Debug, Default, Clone)]
pub struct ProducerSettings {
    /// Listen to operator (keyboard) input
    pub keyboard: bool,

    /// Inter process message endpoint
    pub ipc_socket: Option<PathBuf>,
}

/// Pipeline [Settings]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Number of tracking channels
    pub channels: u16,

    /// Run for this long, then stop
    pub duration: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            channels: 12,
            duration: None,
        }
    }
}
