//! Producers: independent tasks publishing raw events on the control bus.
//! A producer handles its own errors (log then terminate) and stops
//! on its own once the bus is closed.
use tokio::task::JoinHandle;

use crate::bus::{ProducerId, Publisher};

pub mod collector;
pub mod ipc;
pub mod operator;

pub use collector::Collector;
pub use ipc::IpcListener;
pub use operator::OperatorListener;

pub trait Producer: Send {
    /// Name, for logging purposes
    fn name(&self) -> &'static str;

    /// [ProducerId] stamped on published events
    fn origin(&self) -> ProducerId;

    /// Deploys this producer in its own task.
    /// A crash stays contained in the returned [JoinHandle].
    fn spawn(self: Box<Self>, publisher: Publisher) -> JoinHandle<()>;
}
