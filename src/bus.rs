//! Control bus: ordered, closable, multi producer / single consumer event channel.
use log::debug;

use thiserror::Error;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Raw control code, as emitted by a producer
pub type RawCode = u32;

/// Identifies the producer of an [Event]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProducerId {
    /// The signal processing pipeline (channel and solution notifications)
    Pipeline,
    /// Operator (keyboard) input
    Operator,
    /// Inter process message endpoint
    Ipc,
    /// Background assistance collection
    Assistance,
}

impl std::fmt::Display for ProducerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pipeline => write!(f, "pipeline"),
            Self::Operator => write!(f, "operator"),
            Self::Ipc => write!(f, "ipc"),
            Self::Assistance => write!(f, "assistance"),
        }
    }
}

/// Raw [Event] published on the [ControlBus]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// [ProducerId] of the publisher
    pub origin: ProducerId,
    /// Raw control code
    pub code: RawCode,
    /// Opaque payload
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(origin: ProducerId, code: RawCode, payload: Vec<u8>) -> Self {
        Self {
            origin,
            code,
            payload,
        }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} code={} ({} bytes)",
            self.origin,
            self.code,
            self.payload.len()
        )
    }
}

/// The bus no longer accepts nor delivers events.
/// This is the expected terminal signal for producers and the consumer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("control bus closed")]
pub struct BusClosed;

/// Publishing handle, bound to a single [ProducerId].
/// Events published through one [Publisher] are delivered in publication order.
#[derive(Debug, Clone)]
pub struct Publisher {
    origin: ProducerId,
    tx: UnboundedSender<Event>,
}

impl Publisher {
    /// [ProducerId] stamped on every published [Event]
    pub fn origin(&self) -> ProducerId {
        self.origin
    }

    /// Publish a new [Event]. Never blocks, only fails once the bus is closed.
    pub fn publish(&self, code: RawCode, payload: Vec<u8>) -> Result<(), BusClosed> {
        self.tx
            .send(Event::new(self.origin, code, payload))
            .map_err(|_| BusClosed)
    }

    /// Resolves once the consumer closed the bus.
    /// Producers select on this next to their blocking source.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Consumer side of the control bus.
/// Buffering is unbounded: producers are low rate control sources.
#[derive(Debug)]
pub struct ControlBus {
    tx: UnboundedSender<Event>,
    rx: UnboundedReceiver<Event>,
    closed: bool,
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlBus {
    /// Builds a new, open [ControlBus]
    pub fn new() -> Self {
        let (tx, rx) = unbounded_channel();
        Self {
            tx,
            rx,
            closed: false,
        }
    }

    /// Obtain a new [Publisher] for this producer
    pub fn publisher(&self, origin: ProducerId) -> Publisher {
        Publisher {
            origin,
            tx: self.tx.clone(),
        }
    }

    /// Waits for the next [Event].
    /// Once closed, remaining buffered events are still delivered,
    /// then [BusClosed] is reported.
    pub async fn receive(&mut self) -> Result<Event, BusClosed> {
        self.rx.recv().await.ok_or(BusClosed)
    }

    /// Closes the bus. Idempotent.
    /// Any following publication fails with [BusClosed].
    pub fn close(&mut self) {
        if !self.closed {
            self.rx.close();
            self.closed = true;
            debug!("control bus closed ({} events pending)", self.rx.len());
        }
    }
}
