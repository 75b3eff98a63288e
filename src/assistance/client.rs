//! Assistance client: network acquisition with local cache fallback.
use std::{future::Future, sync::Arc, time::Duration};

use itertools::Itertools;

use log::{debug, error, info, warn};

use thiserror::Error;

use tokio::{task::JoinSet, time::Instant};

use crate::assistance::{AssistanceKind, AssistanceRecord, AssistanceSet, AssistanceStore, Source};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("assistance unavailable")]
    Unavailable,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Remote assistance service: one request/response exchange per [AssistanceKind].
pub trait AssistanceService: Send + Sync + 'static {
    /// Requests a record of this kind. Reports [FetchError::Unavailable]
    /// when the service has nothing to offer.
    fn request(
        &self,
        kind: AssistanceKind,
    ) -> impl Future<Output = Result<AssistanceRecord, FetchError>> + Send;
}

/// Acquires [AssistanceRecord]s from an [AssistanceService],
/// and is the only writer of the [AssistanceStore].
pub struct AssistanceClient<S: AssistanceService> {
    service: Arc<S>,
    store: AssistanceStore,
}

impl<S: AssistanceService> AssistanceClient<S> {
    pub fn new(service: S, store: AssistanceStore) -> Self {
        Self {
            service: Arc::new(service),
            store,
        }
    }

    /// Reads the local cache. Missing kinds are absent.
    pub fn load_cached(&self) -> AssistanceSet {
        self.store.load_cached()
    }

    /// Fetches fresh records, never waiting past `timeout`.
    /// Kinds that failed, were unavailable or did not complete in time are absent
    /// from the result. Every obtained record is [Source::Network] and gets cached.
    pub async fn fetch(&self, kinds: &[AssistanceKind], timeout: Duration) -> AssistanceSet {
        let deadline = Instant::now() + timeout;

        let mut tasks = JoinSet::new();

        for kind in kinds.iter().copied().unique() {
            let service = Arc::clone(&self.service);
            tasks.spawn(async move { (kind, service.request(kind).await) });
        }

        let mut set = AssistanceSet::default();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((kind, Ok(record))))) => {
                    if record.kind() != kind {
                        warn!(
                            "{} - service replied with {} content: dropped",
                            kind,
                            record.kind()
                        );
                        continue;
                    }

                    let record = record.with_source(Source::Network);

                    if let Err(e) = self.store.save_cached(&record) {
                        error!("{} - failed to cache record: {}", kind, e);
                    }

                    debug!("fetched {}", record);
                    set.insert(record);
                },
                Ok(Some(Ok((kind, Err(e))))) => {
                    warn!("{} - assistance fetch failed: {}", kind, e);
                },
                Ok(Some(Err(e))) => {
                    error!("assistance request aborted: {}", e);
                },
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "assistance fetch timed out after {:?}: {} request(s) pending",
                        timeout,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                },
            }
        }

        if set.is_empty() {
            info!("no assistance obtained from network");
        } else {
            info!("assistance obtained from network: {}", set.kinds().join(", "));
        }

        set
    }
}
