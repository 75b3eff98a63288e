use hifitime::prelude::{Duration, Epoch, TimeScale};

#[derive(Debug, Copy, Clone)]
pub struct Runtime {
    /// Current [Epoch]
    pub epoch: Epoch,

    /// Epoch of deployment
    deploy_time: Epoch,

    /// Uptime as [Duration]
    pub uptime: Duration,

    /// Rounding applied to logged epochs
    precision: Duration,
}

impl Runtime {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch,
            deploy_time: epoch,
            uptime: Default::default(),
            precision: Duration::from_seconds(1.0),
        }
    }

    /// Deploys at system time
    pub fn now() -> Self {
        Self::new(Epoch::now().unwrap_or_else(|_| Epoch::from_gpst_seconds(0.0)))
    }

    /// Update latest epoch
    pub fn new_epoch(&mut self, epoch: Epoch) {
        self.epoch = epoch.to_time_scale(TimeScale::UTC);
        self.uptime = epoch - self.deploy_time;
    }

    /// Latch system time. Keeps the previous epoch when system time is not available.
    pub fn tick(&mut self) {
        if let Ok(now) = Epoch::now() {
            self.new_epoch(now);
        }
    }

    /// Returns current epoch in [TimeScale::UTC], rounded for logging
    pub fn utc_time(&self) -> Epoch {
        self.epoch.to_time_scale(TimeScale::UTC).round(self.precision)
    }

    /// Returns current epoch in [TimeScale::GPST]
    pub fn gpst_time(&self) -> Epoch {
        self.epoch.to_time_scale(TimeScale::GPST)
    }
}
