//! Scripted collaborators for tests.
use std::{
    collections::HashMap,
    io::ErrorKind,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    assistance::{AssistanceKind, AssistanceRecord, AssistanceService, FetchError},
    bus::{ProducerId, Publisher},
    pipeline::{ActionCommand, ActionError, Pipeline, PipelineError},
};

/// Scripted reply of the [FakeService]
#[derive(Debug, Clone)]
pub enum Reply {
    Record(AssistanceRecord),
    Unavailable,
    Unreachable,
    Delayed(Duration, Box<Reply>),
}

#[derive(Debug, Clone)]
pub struct FakeService {
    replies: HashMap<AssistanceKind, Reply>,
    fallback: Reply,
    requests: Arc<AtomicUsize>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            replies: HashMap::new(),
            fallback: Reply::Unavailable,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FakeService {
    /// Service that can't be reached, whatever the kind
    pub fn unreachable() -> Self {
        Self {
            fallback: Reply::Unreachable,
            ..Default::default()
        }
    }

    pub fn with(mut self, kind: AssistanceKind, reply: Reply) -> Self {
        self.replies.insert(kind, reply);
        self
    }

    /// Request counter
    pub fn requests(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.requests)
    }
}

impl AssistanceService for FakeService {
    async fn request(&self, kind: AssistanceKind) -> Result<AssistanceRecord, FetchError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let mut reply = self
            .replies
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());

        loop {
            match reply {
                Reply::Delayed(delay, next) => {
                    tokio::time::sleep(delay).await;
                    reply = *next;
                },
                Reply::Record(record) => return Ok(record),
                Reply::Unavailable => return Err(FetchError::Unavailable),
                Reply::Unreachable => {
                    return Err(FetchError::Io(std::io::Error::new(
                        ErrorKind::ConnectionRefused,
                        "connection refused",
                    )));
                },
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineState {
    pub connected: Option<ProducerId>,
    pub started: bool,
    pub stop_requested: Option<Instant>,
    pub stop_calls: usize,
    pub halted: bool,
    pub actions: Vec<ActionCommand>,
    pub publisher: Option<Publisher>,

    /// Keeps running for this long after the stop request
    pub stop_delay: Duration,
    pub fail_connect: bool,
    pub fail_start: bool,
    pub fail_stop: bool,
    /// Actions on this channel are rejected
    pub reject_channel: Option<u16>,
}

/// Scripted [Pipeline]. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct FakePipeline {
    state: Arc<Mutex<PipelineState>>,
}

impl FakePipeline {
    pub fn configure<F: FnOnce(&mut PipelineState)>(self, f: F) -> Self {
        f(&mut self.state.lock().unwrap());
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap()
    }

    /// Stops on its own
    pub fn halt(&self) {
        self.state().halted = true;
    }

    /// Actions applied in response to bus commands
    pub fn commanded_actions(&self) -> Vec<ActionCommand> {
        self.state()
            .actions
            .iter()
            .filter(|action| !matches!(action, ActionCommand::InjectAssistance(_)))
            .cloned()
            .collect()
    }

    /// Assistance injected at startup
    pub fn injected(&self) -> Vec<AssistanceRecord> {
        self.state()
            .actions
            .iter()
            .filter_map(|action| match action {
                ActionCommand::InjectAssistance(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Pipeline for FakePipeline {
    fn connect(&mut self, publisher: Publisher) -> Result<(), PipelineError> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(PipelineError::Connection("scripted".to_string()));
        }
        state.connected = Some(publisher.origin());
        state.publisher = Some(publisher);
        Ok(())
    }

    fn start(&mut self) -> Result<(), PipelineError> {
        let mut state = self.state();
        if state.fail_start {
            return Err(PipelineError::Start("scripted".to_string()));
        }
        state.started = true;
        Ok(())
    }

    fn is_running(&self) -> bool {
        let state = self.state();
        if !state.started || state.halted {
            return false;
        }
        match state.stop_requested {
            Some(t) => t.elapsed() < state.stop_delay,
            None => true,
        }
    }

    fn stop(&mut self) -> Result<(), PipelineError> {
        let mut state = self.state();
        state.stop_calls += 1;
        state.stop_requested.get_or_insert_with(Instant::now);
        if state.fail_stop {
            return Err(PipelineError::Stop("scripted".to_string()));
        }
        Ok(())
    }

    fn apply_action(&mut self, action: &ActionCommand) -> Result<(), ActionError> {
        let mut state = self.state();

        if let ActionCommand::ChannelState { channel, .. } = action {
            if state.reject_channel == Some(*channel) {
                return Err(ActionError::InvalidChannel(*channel));
            }
        }

        state.actions.push(action.clone());
        Ok(())
    }
}
