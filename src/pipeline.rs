//! Signal processing pipeline, as seen from the control plane:
//! a passive command target and a running status.
use std::time::{Duration, Instant};

use log::{debug, info};

use thiserror::Error;

use crate::{
    assistance::AssistanceRecord,
    bus::Publisher,
    command::{ChannelState, Solution},
};

/// Action applied to the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum ActionCommand {
    /// React to a channel state change (reassign, restart acquisition..)
    ChannelState { channel: u16, state: ChannelState },
    /// Publish a new navigation solution
    Solution(Solution),
    /// Provide assistance data prior to acquisition
    InjectAssistance(AssistanceRecord),
}

impl std::fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelState { channel, state } => write!(f, "channel #{} {}", channel, state),
            Self::Solution(solution) => write!(f, "solution {}", solution),
            Self::InjectAssistance(record) => write!(f, "inject {}", record),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    #[error("pipeline is not running")]
    NotRunning,

    #[error("invalid channel #{0}")]
    InvalidChannel(u16),

    #[error("action rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("connection failure: {0}")]
    Connection(String),

    #[error("start failure: {0}")]
    Start(String),

    #[error("stop failure: {0}")]
    Stop(String),
}

/// External signal processing pipeline
pub trait Pipeline: Send {
    /// Connects the processing blocks. Notifications are published through [Publisher].
    fn connect(&mut self, publisher: Publisher) -> Result<(), PipelineError>;

    /// Starts processing
    fn start(&mut self) -> Result<(), PipelineError>;

    /// True while processing
    fn is_running(&self) -> bool;

    /// Requests the pipeline to stop. It may keep running for a little while.
    fn stop(&mut self) -> Result<(), PipelineError>;

    /// Applies an [ActionCommand]
    fn apply_action(&mut self, action: &ActionCommand) -> Result<(), ActionError>;
}

/// [Pipeline] that only logs what it is asked to do.
/// Optionally stops on its own after a given duration.
#[derive(Debug)]
pub struct DryRun {
    /// Number of tracking channels
    channels: u16,
    /// Stops on its own after this [Duration]
    duration: Option<Duration>,
    /// Processing blocks connected
    connected: bool,
    /// Start [Instant]
    started: Option<Instant>,
    /// Stop requested
    stopped: bool,
}

impl DryRun {
    pub fn new(channels: u16, duration: Option<Duration>) -> Self {
        Self {
            channels,
            duration,
            connected: false,
            started: None,
            stopped: false,
        }
    }
}

impl Pipeline for DryRun {
    fn connect(&mut self, publisher: Publisher) -> Result<(), PipelineError> {
        if self.channels == 0 {
            return Err(PipelineError::Connection(
                "no tracking channel".to_string(),
            ));
        }
        info!(
            "dry-run pipeline connected: {} channels (notifications as \"{}\")",
            self.channels,
            publisher.origin()
        );
        self.connected = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        self.started = Some(Instant::now());
        self.stopped = false;
        info!("dry-run pipeline started");
        Ok(())
    }

    fn is_running(&self) -> bool {
        match (self.started, self.duration) {
            (None, _) => false,
            (Some(_), _) if self.stopped => false,
            (Some(started), Some(duration)) => started.elapsed() < duration,
            (Some(_), None) => true,
        }
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        self.stopped = true;
        info!("dry-run pipeline stopped");
        Ok(())
    }

    fn apply_action(&mut self, action: &ActionCommand) -> Result<(), ActionError> {
        match action {
            // assistance may be injected prior start
            ActionCommand::InjectAssistance(_) => {
                if !self.connected || self.stopped {
                    return Err(ActionError::NotRunning);
                }
            },
            ActionCommand::ChannelState { channel, .. } => {
                if !self.is_running() {
                    return Err(ActionError::NotRunning);
                }
                if *channel >= self.channels {
                    return Err(ActionError::InvalidChannel(*channel));
                }
            },
            ActionCommand::Solution(_) => {
                if !self.is_running() {
                    return Err(ActionError::NotRunning);
                }
            },
        }

        debug!("dry-run pipeline: {}", action);
        Ok(())
    }
}
