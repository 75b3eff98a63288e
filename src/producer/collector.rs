use std::{sync::Arc, time::Duration};

use log::{debug, info};

use tokio::{task::JoinHandle, time::Instant};

use crate::{
    assistance::{AssistanceClient, AssistanceKind, AssistanceService},
    bus::{ProducerId, Publisher},
    command::code,
    producer::Producer,
    settings::{MIN_PERIOD, Refresh},
};

/// Background assistance collection.
/// Every record obtained is cached by the client, and summarized on the bus.
pub struct Collector<S: AssistanceService> {
    client: Arc<AssistanceClient<S>>,
    kinds: Vec<AssistanceKind>,
    refresh: Refresh,
    timeout: Duration,
}

impl<S: AssistanceService> Collector<S> {
    pub fn new(
        client: Arc<AssistanceClient<S>>,
        kinds: Vec<AssistanceKind>,
        refresh: Refresh,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            kinds,
            refresh,
            timeout,
        }
    }

    /// Runs one collection. Returns false once the bus is closed.
    async fn collect(&self, publisher: &Publisher) -> bool {
        let set = tokio::select! {
            _ = publisher.closed() => return false,
            set = self.client.fetch(&self.kinds, self.timeout) => set,
        };

        for kind in set.kinds() {
            if publisher
                .publish(code::ASSISTANCE_UPDATED, vec![kind.id()])
                .is_err()
            {
                return false;
            }
        }

        true
    }

    pub async fn run(self, publisher: Publisher) {
        match self.refresh {
            Refresh::Disabled => {},
            Refresh::Once => {
                // startup just fetched everything
                tokio::select! {
                    _ = publisher.closed() => {},
                    _ = tokio::time::sleep(self.timeout) => {
                        self.collect(&publisher).await;
                    },
                }
            },
            Refresh::Periodic(period) => {
                let period = period.max(MIN_PERIOD);
                info!("assistance refresh every {:?}", period);

                let mut interval = tokio::time::interval_at(Instant::now() + period, period);

                loop {
                    tokio::select! {
                        _ = publisher.closed() => break,
                        _ = interval.tick() => {
                            if !self.collect(&publisher).await {
                                break;
                            }
                        },
                    }
                }
            },
        }

        debug!("assistance collector terminated");
    }
}

impl<S: AssistanceService> Producer for Collector<S> {
    fn name(&self) -> &'static str {
        "assistance-collector"
    }

    fn origin(&self) -> ProducerId {
        ProducerId::Assistance
    }

    fn spawn(self: Box<Self>, publisher: Publisher) -> JoinHandle<()> {
        tokio::spawn((*self).run(publisher))
    }
}
