//! Receiver control plane: connects and starts the pipeline, then reads
//! and applies control messages until the receiver stops.
use std::sync::Arc;

use itertools::Itertools;

use log::{debug, error, info, trace, warn};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    assistance::{AssistanceClient, AssistanceService, AssistanceSet, Source},
    bus::{BusClosed, ControlBus, Event, ProducerId, Publisher},
    command::{Command, decode},
    lifecycle::{ReceiverState, Status, StatusWriter},
    pipeline::{ActionCommand, Pipeline},
    producer::Producer,
    runtime::Runtime,
    settings::{ControlSettings, MIN_PERIOD},
};

/// Pipeline shutdown is reported every so many polls
const STOP_REPORT_POLLS: u32 = 50;

pub struct ControlPlane<P: Pipeline, S: AssistanceService> {
    /// [ControlSettings]
    settings: ControlSettings,

    /// External processing [Pipeline]
    pipeline: P,

    /// Shared [AssistanceClient]
    client: Arc<AssistanceClient<S>>,

    /// [ControlBus], we are the only consumer
    bus: ControlBus,

    /// Producers to deploy
    producers: Vec<Box<dyn Producer>>,

    /// Deployed producers
    handles: Vec<(&'static str, JoinHandle<()>)>,

    /// Lifecycle state & counters
    status: StatusWriter,

    /// Assistance retained at startup
    assistance: AssistanceSet,

    /// [Runtime] clock
    runtime: Runtime,
}

impl<P: Pipeline, S: AssistanceService> ControlPlane<P, S> {
    /// Builds a new [ControlPlane]
    pub fn new(settings: ControlSettings, pipeline: P, client: Arc<AssistanceClient<S>>) -> Self {
        Self {
            settings,
            pipeline,
            client,
            bus: ControlBus::new(),
            producers: Vec::new(),
            handles: Vec::new(),
            status: StatusWriter::new(),
            assistance: AssistanceSet::default(),
            runtime: Runtime::now(),
        }
    }

    /// Adds a [Producer], deployed during initialization
    pub fn with_producer(mut self, producer: Box<dyn Producer>) -> Self {
        self.producers.push(producer);
        self
    }

    /// Obtain a [Publisher] on our [ControlBus]
    pub fn publisher(&self, origin: ProducerId) -> Publisher {
        self.bus.publisher(origin)
    }

    /// Read only [Status], shareable with other threads
    pub fn status(&self) -> Status {
        self.status.status()
    }

    pub fn state(&self) -> ReceiverState {
        self.status.state()
    }

    /// Assistance retained at startup
    pub fn assistance(&self) -> &AssistanceSet {
        &self.assistance
    }

    /// Runs the receiver until it stops
    pub async fn run(&mut self) {
        self.initialize().await;

        if self.state() == ReceiverState::Running {
            self.running().await;
        }

        self.stopping().await;
        self.join_producers().await;

        self.runtime.tick();

        info!(
            "{} - receiver stopped after {}: {} message(s) processed, {} action(s) applied",
            self.runtime.utc_time(),
            self.runtime.uptime,
            self.status().processed_messages(),
            self.status().applied_actions(),
        );
    }

    fn transition(&mut self, next: ReceiverState) {
        let current = self.state();
        if self.status.transition(next) {
            debug!("{} - {} -> {}", self.runtime.utc_time(), current, next);
        } else {
            error!(
                "{} - invalid transition {} -> {}",
                self.runtime.utc_time(),
                current,
                next
            );
        }
    }

    async fn initialize(&mut self) {
        self.runtime.tick();

        info!(
            "{} - initializing receiver (GPST week {})",
            self.runtime.utc_time(),
            self.runtime.gpst_time().to_time_of_week().0
        );

        self.assist().await;

        let publisher = self.bus.publisher(ProducerId::Pipeline);

        if let Err(e) = self.pipeline.connect(publisher) {
            error!("{} - pipeline connection: {}", self.runtime.utc_time(), e);
            self.begin_stop();
            return;
        }

        for record in self.assistance.records() {
            let action = ActionCommand::InjectAssistance(record.clone());
            if let Err(e) = self.pipeline.apply_action(&action) {
                error!(
                    "{} - {} injection failed: {}",
                    self.runtime.utc_time(),
                    record.kind(),
                    e
                );
            }
        }

        if let Err(e) = self.pipeline.start() {
            error!("{} - pipeline start: {}", self.runtime.utc_time(), e);
            self.begin_stop();
            return;
        }

        for producer in self.producers.drain(..) {
            let name = producer.name();
            let publisher = self.bus.publisher(producer.origin());
            debug!("{} - deploying {} producer", self.runtime.utc_time(), name);
            self.handles.push((name, producer.spawn(publisher)));
        }

        self.transition(ReceiverState::Running);
        info!("{} - receiver running", self.runtime.utc_time());
    }

    /// Gathers startup assistance: network first, cache as fallback.
    async fn assist(&mut self) {
        let cached = self.client.load_cached();

        let network = self
            .client
            .fetch(&self.settings.kinds, self.settings.fetch_timeout)
            .await;

        let missing = network.missing(&self.settings.kinds);

        if !missing.is_empty() {
            warn!(
                "{} - degraded mode: no network assistance for {}",
                self.runtime.utc_time(),
                missing.iter().join(", ")
            );
        }

        let merged = AssistanceSet::merge(network, cached);

        for kind in self.settings.kinds.iter() {
            match merged.get(*kind) {
                Some(record) if record.source == Source::Cache => {
                    info!("{} - using cached {}", self.runtime.utc_time(), record);
                },
                Some(_) => {},
                None => {
                    warn!(
                        "{} - no {} assistance: cold acquisition",
                        self.runtime.utc_time(),
                        kind
                    );
                },
            }
        }

        self.assistance = merged;
    }

    async fn running(&mut self) {
        let mut poll = tokio::time::interval(self.settings.poll_period.max(MIN_PERIOD));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state() == ReceiverState::Running {
            tokio::select! {
                event = self.bus.receive() => match event {
                    Ok(event) => self.process(event),
                    Err(BusClosed) => {
                        // we never close the bus while running
                        error!("{} - control bus closed unexpectedly", self.runtime.utc_time());
                        self.begin_stop();
                    },
                },
                _ = poll.tick() => {
                    if !self.pipeline.is_running() {
                        self.runtime.tick();
                        warn!("{} - pipeline stopped on its own", self.runtime.utc_time());
                        self.begin_stop();
                    }
                },
            }
        }
    }

    /// Processes one [Event]
    fn process(&mut self, event: Event) {
        self.status.message_processed();
        self.runtime.tick();

        let command = decode(&event);
        trace!("{} - {} -> {}", self.runtime.utc_time(), event, command);

        match (self.state(), command) {
            (ReceiverState::Running, Command::StopReceiver) => {
                info!(
                    "{} - stop requested ({})",
                    self.runtime.utc_time(),
                    event.origin
                );
                self.begin_stop();
            },
            (ReceiverState::Running, Command::ChannelStateChanged { channel, state }) => {
                self.apply(ActionCommand::ChannelState { channel, state });
            },
            (ReceiverState::Running, Command::SolutionUpdated(solution)) => {
                self.apply(ActionCommand::Solution(solution));
            },
            (_, Command::AssistanceUpdated { kind }) => {
                info!(
                    "{} - {} assistance refreshed",
                    self.runtime.utc_time(),
                    kind
                );
            },
            (_, Command::Unknown { raw_code }) => {
                debug!(
                    "{} - unknown code {} ({}): ignored",
                    self.runtime.utc_time(),
                    raw_code,
                    event.origin
                );
            },
            (state, command) => {
                debug!(
                    "{} - {} ignored while {}",
                    self.runtime.utc_time(),
                    command,
                    state
                );
            },
        }
    }

    /// Applies an [ActionCommand]. Failures are reported, never propagated.
    fn apply(&mut self, action: ActionCommand) {
        match self.pipeline.apply_action(&action) {
            Ok(()) => {
                self.status.action_applied();
                trace!("{} - applied {}", self.runtime.utc_time(), action);
            },
            Err(e) => {
                error!(
                    "{} - failed to apply {}: {}",
                    self.runtime.utc_time(),
                    action,
                    e
                );
            },
        }
    }

    /// Enters [ReceiverState::Stopping]: closes the bus, then requests the pipeline to stop.
    /// A failed stop request still leaves us stopping.
    fn begin_stop(&mut self) {
        if self.state() == ReceiverState::Stopping {
            return;
        }

        self.transition(ReceiverState::Stopping);
        self.bus.close();

        if let Err(e) = self.pipeline.stop() {
            error!("{} - pipeline stop: {}", self.runtime.utc_time(), e);
        }
    }

    async fn stopping(&mut self) {
        // drain what producers published before closure
        while let Ok(event) = self.bus.receive().await {
            self.process(event);
        }

        let mut poll = tokio::time::interval(self.settings.stop_poll_period.max(MIN_PERIOD));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polls = 0u32;

        while self.pipeline.is_running() {
            poll.tick().await;
            polls += 1;

            if polls % STOP_REPORT_POLLS == 0 {
                self.runtime.tick();
                warn!(
                    "{} - waiting for pipeline to stop",
                    self.runtime.utc_time()
                );
            }
        }

        self.transition(ReceiverState::Stopped);
    }

    async fn join_producers(&mut self) {
        let deadline = Instant::now() + self.settings.producer_grace;

        for (name, handle) in self.handles.drain(..) {
            let abort = handle.abort_handle();

            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => debug!("{} producer terminated", name),
                Ok(Err(e)) if e.is_panic() => error!("{} producer crashed", name),
                Ok(Err(e)) => warn!("{} producer: {}", name, e),
                Err(_) => {
                    warn!("{} producer did not terminate in time: aborted", name);
                    abort.abort();
                },
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        assistance::{
            AssistanceKind, AssistanceStore,
            test::{ephemeris_record, iono_record, ref_time_record},
        },
        command::{ChannelState, Solution, channel_payload, code},
        fake::{FakePipeline, FakeService, Reply},
    };
    use std::time::Duration;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: AssistanceStore,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = AssistanceStore::new(dir.path(), false);
            Self { _dir: dir, store }
        }

        fn control(
            &self,
            pipeline: FakePipeline,
            service: FakeService,
        ) -> ControlPlane<FakePipeline, FakeService> {
            let client = Arc::new(AssistanceClient::new(service, self.store.clone()));

            let settings = ControlSettings {
                poll_period: Duration::from_millis(10),
                stop_poll_period: Duration::from_millis(5),
                producer_grace: Duration::from_millis(500),
                fetch_timeout: Duration::from_millis(200),
                kinds: AssistanceKind::ALL.to_vec(),
            };

            ControlPlane::new(settings, pipeline, client)
        }
    }

    fn solution() -> Solution {
        Solution {
            latitude_ddeg: 43.6,
            longitude_ddeg: 1.44,
            height_m: 150.0,
        }
    }

    /// Producer that crashes right away
    struct Crashing;

    impl Producer for Crashing {
        fn name(&self) -> &'static str {
            "crashing"
        }

        fn origin(&self) -> ProducerId {
            ProducerId::Ipc
        }

        fn spawn(self: Box<Self>, _: Publisher) -> JoinHandle<()> {
            tokio::spawn(async {
                panic!("producer crash");
            })
        }
    }

    /// Producer publishing a channel notification, then a stop request
    struct Scripted;

    impl Producer for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn origin(&self) -> ProducerId {
            ProducerId::Ipc
        }

        fn spawn(self: Box<Self>, publisher: Publisher) -> JoinHandle<()> {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                publisher
                    .publish(code::CHANNEL_ACQUISITION_SUCCESS, channel_payload(2))
                    .unwrap();
                publisher.publish(code::STOP, vec![]).unwrap();
                publisher.closed().await;
            })
        }
    }

    #[tokio::test]
    async fn stop_scenario() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();
        let mut control = fixture.control(pipeline.clone(), FakeService::default());

        let a = control.publisher(ProducerId::Pipeline);
        let b = control.publisher(ProducerId::Ipc);

        a.publish(code::SOLUTION_UPDATED, solution().to_payload())
            .unwrap();
        b.publish(99, vec![]).unwrap();
        a.publish(code::STOP, vec![]).unwrap();

        control.run().await;

        let status = control.status();
        assert_eq!(status.processed_messages(), 3);
        assert_eq!(status.applied_actions(), 1);
        assert_eq!(status.state(), ReceiverState::Stopped);

        assert_eq!(
            pipeline.commanded_actions(),
            vec![ActionCommand::Solution(solution())]
        );
        assert_eq!(pipeline.state().stop_calls, 1);

        // closed bus
        assert!(a.publish(code::STOP, vec![]).is_err());
    }

    #[tokio::test]
    async fn zero_polling_periods() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default().configure(|state| {
            state.stop_delay = Duration::from_millis(20);
        });

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        control.settings.poll_period = Duration::ZERO;
        control.settings.stop_poll_period = Duration::ZERO;

        let publisher = control.publisher(ProducerId::Pipeline);
        publisher
            .publish(code::SOLUTION_UPDATED, solution().to_payload())
            .unwrap();
        publisher.publish(code::STOP, vec![]).unwrap();

        tokio::time::timeout(Duration::from_secs(5), control.run())
            .await
            .expect("control plane did not stop");

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().applied_actions(), 1);
    }

    #[tokio::test]
    async fn per_producer_order() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();
        let mut control = fixture.control(pipeline.clone(), FakeService::default());

        let publisher = control.publisher(ProducerId::Pipeline);

        for channel in 0..32 {
            publisher
                .publish(code::CHANNEL_TRACKING_LOST, channel_payload(channel))
                .unwrap();
        }
        publisher.publish(code::STOP, vec![]).unwrap();

        control.run().await;

        let channels = pipeline
            .commanded_actions()
            .into_iter()
            .map(|action| match action {
                ActionCommand::ChannelState { channel, state } => {
                    assert_eq!(state, ChannelState::TrackingLost);
                    channel
                },
                action => panic!("unexpected action {}", action),
            })
            .collect::<Vec<_>>();

        assert_eq!(channels, (0..32).collect::<Vec<_>>());
        assert_eq!(control.status().applied_actions(), 32);
        assert_eq!(control.status().processed_messages(), 33);
    }

    #[tokio::test]
    async fn events_after_stop_are_drained_not_applied() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();
        let mut control = fixture.control(pipeline.clone(), FakeService::default());

        let publisher = control.publisher(ProducerId::Pipeline);
        publisher.publish(code::STOP, vec![]).unwrap();

        for channel in 0..10 {
            publisher
                .publish(code::CHANNEL_ACQUISITION_FAILED, channel_payload(channel))
                .unwrap();
        }
        publisher.publish(code::STOP, vec![]).unwrap();

        control.run().await;

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().processed_messages(), 12);
        assert_eq!(control.status().applied_actions(), 0);
        assert!(pipeline.commanded_actions().is_empty());
        assert_eq!(pipeline.state().stop_calls, 1);
    }

    #[tokio::test]
    async fn unknown_commands_are_counted_only() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();
        let mut control = fixture.control(pipeline.clone(), FakeService::default());

        let operator = control.publisher(ProducerId::Operator);

        for line in ["hello", "status", "help"] {
            operator
                .publish(code::OPERATOR_INPUT, line.as_bytes().to_vec())
                .unwrap();
        }
        operator.publish(code::STOP, vec![]).unwrap();

        control.run().await;

        assert_eq!(control.status().processed_messages(), 4);
        assert_eq!(control.status().applied_actions(), 0);
    }

    #[tokio::test]
    async fn action_failures_do_not_stop_the_loop() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default().configure(|state| {
            state.reject_channel = Some(9);
        });

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        let publisher = control.publisher(ProducerId::Pipeline);

        for channel in [1, 9, 3] {
            publisher
                .publish(code::CHANNEL_ACQUISITION_SUCCESS, channel_payload(channel))
                .unwrap();
        }
        publisher.publish(code::STOP, vec![]).unwrap();

        control.run().await;

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().processed_messages(), 4);
        assert_eq!(control.status().applied_actions(), 2);
    }

    #[tokio::test]
    async fn waits_for_pipeline_shutdown() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default().configure(|state| {
            state.stop_delay = Duration::from_millis(150);
        });

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        control
            .publisher(ProducerId::Operator)
            .publish(code::STOP, vec![])
            .unwrap();

        let status = control.status();

        let handle = tokio::spawn(async move {
            control.run().await;
            control
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(status.state(), ReceiverState::Stopping);

        let control = handle.await.unwrap();
        assert_eq!(control.state(), ReceiverState::Stopped);
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn failed_stop_still_stops() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default().configure(|state| {
            state.fail_stop = true;
        });

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        control
            .publisher(ProducerId::Ipc)
            .publish(code::STOP, vec![])
            .unwrap();

        control.run().await;

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(pipeline.state().stop_calls, 1);
    }

    #[tokio::test]
    async fn pipeline_stopping_on_its_own() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        let status = control.status();

        let handle = tokio::spawn(async move {
            control.run().await;
            control
        });

        while status.state() != ReceiverState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        pipeline.halt();

        let control = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("control plane did not stop")
            .unwrap();

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().processed_messages(), 0);
    }

    #[tokio::test]
    async fn start_failure() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default().configure(|state| {
            state.fail_start = true;
        });

        let mut control = fixture
            .control(pipeline.clone(), FakeService::default())
            .with_producer(Box::new(Scripted));

        control.run().await;

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().processed_messages(), 0);
        assert_eq!(pipeline.state().stop_calls, 1);
    }

    #[tokio::test]
    async fn connect_failure() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default().configure(|state| {
            state.fail_connect = true;
        });

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        control.run().await;

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert!(pipeline.injected().is_empty());
    }

    #[tokio::test]
    async fn producer_crash_is_isolated() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();

        let mut control = fixture
            .control(pipeline.clone(), FakeService::default())
            .with_producer(Box::new(Crashing))
            .with_producer(Box::new(Scripted));

        tokio::time::timeout(Duration::from_secs(5), control.run())
            .await
            .expect("control plane did not stop");

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().processed_messages(), 2);
        assert_eq!(control.status().applied_actions(), 1);
    }

    #[tokio::test]
    async fn pipeline_notifications() {
        let fixture = Fixture::new();
        let pipeline = FakePipeline::default();

        let mut control = fixture.control(pipeline.clone(), FakeService::default());
        let status = control.status();

        let handle = tokio::spawn(async move {
            control.run().await;
        });

        while status.state() != ReceiverState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let publisher = pipeline.state().publisher.clone().unwrap();
        assert_eq!(publisher.origin(), ProducerId::Pipeline);

        publisher
            .publish(code::SOLUTION_UPDATED, solution().to_payload())
            .unwrap();
        publisher.publish(code::STOP, vec![]).unwrap();

        handle.await.unwrap();

        assert_eq!(status.state(), ReceiverState::Stopped);
        assert_eq!(status.applied_actions(), 1);
    }

    #[tokio::test]
    async fn degraded_mode_uses_cache() {
        let fixture = Fixture::new();

        // previous session
        fixture
            .store
            .save_cached(&ref_time_record(Source::Network))
            .unwrap();

        let pipeline = FakePipeline::default();
        let mut control = fixture.control(pipeline.clone(), FakeService::unreachable());

        control
            .publisher(ProducerId::Operator)
            .publish(code::STOP, vec![])
            .unwrap();

        control.run().await;

        let assistance = control.assistance();
        assert_eq!(assistance.len(), 1);

        let reference = assistance.get(AssistanceKind::ReferenceTime).unwrap();
        assert_eq!(reference.source, Source::Cache);
        assert_eq!(reference.data, ref_time_record(Source::Cache).data);

        let injected = pipeline.injected();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].kind(), AssistanceKind::ReferenceTime);

        assert_eq!(control.state(), ReceiverState::Stopped);
        assert_eq!(control.status().applied_actions(), 0);
    }

    #[tokio::test]
    async fn network_assistance_is_preferred_and_cached() {
        let fixture = Fixture::new();

        fixture
            .store
            .save_cached(&iono_record(Source::Network))
            .unwrap();

        let mut fresher = iono_record(Source::Network);
        fresher.epoch = fresher.epoch + hifitime::prelude::Duration::from_hours(1.0);

        let service = FakeService::default()
            .with(
                AssistanceKind::Ephemeris,
                Reply::Record(ephemeris_record(Source::Network)),
            )
            .with(AssistanceKind::Iono, Reply::Record(fresher.clone()))
            .with(
                AssistanceKind::UtcModel,
                Reply::Delayed(Duration::from_secs(60), Box::new(Reply::Unavailable)),
            );

        let mut control = fixture.control(FakePipeline::default(), service);
        control
            .publisher(ProducerId::Operator)
            .publish(code::STOP, vec![])
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), control.run())
            .await
            .expect("fetch timeout not honored");

        let assistance = control.assistance();

        let iono = assistance.get(AssistanceKind::Iono).unwrap();
        assert_eq!(iono.source, Source::Network);
        assert_eq!(iono.epoch, fresher.epoch);

        assert_eq!(
            assistance.get(AssistanceKind::Ephemeris).unwrap().source,
            Source::Network
        );
        assert!(!assistance.contains(AssistanceKind::UtcModel));

        // persisted for the next session
        let reloaded = AssistanceStore::new(fixture.store.directory(), false).load_cached();
        assert_eq!(
            reloaded.get(AssistanceKind::Ephemeris).unwrap().data,
            ephemeris_record(Source::Network).data
        );
        assert_eq!(
            reloaded.get(AssistanceKind::Iono).unwrap().epoch,
            fresher.epoch
        );
    }
}
