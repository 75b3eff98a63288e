use log::{debug, error, info};

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin},
    task::JoinHandle,
};

use crate::{
    bus::{ProducerId, Publisher, RawCode},
    command::code,
    producer::Producer,
};

/// Operator input listener: one event per input line.
/// "q", "quit" or "stop" request the receiver to stop,
/// anything else is forwarded as free form input.
pub struct OperatorListener<R> {
    reader: R,
}

impl OperatorListener<BufReader<Stdin>> {
    /// Listens to standard input
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> OperatorListener<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Converts one input line. Blank lines are skipped.
    pub fn parse(line: &str) -> Option<(RawCode, Vec<u8>)> {
        let line = line.trim();

        if line.is_empty() {
            return None;
        }

        match line.to_lowercase().as_str() {
            "q" | "quit" | "stop" => Some((code::STOP, Vec::new())),
            _ => Some((code::OPERATOR_INPUT, line.as_bytes().to_vec())),
        }
    }

    pub async fn run(self, publisher: Publisher) {
        let mut lines = self.reader.lines();

        loop {
            tokio::select! {
                _ = publisher.closed() => {
                    debug!("operator listener: bus closed");
                    return;
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        let Some((raw_code, payload)) = Self::parse(&line) else {
                            continue;
                        };

                        if raw_code == code::STOP {
                            info!("stop requested by operator");
                        }

                        if publisher.publish(raw_code, payload).is_err() {
                            debug!("operator listener: bus closed");
                            return;
                        }
                    },
                    Ok(None) => {
                        debug!("operator input closed");
                        return;
                    },
                    Err(e) => {
                        error!("operator input error: {}", e);
                        return;
                    },
                },
            }
        }
    }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> Producer for OperatorListener<R> {
    fn name(&self) -> &'static str {
        "operator"
    }

    fn origin(&self) -> ProducerId {
        ProducerId::Operator
    }

    fn spawn(self: Box<Self>, publisher: Publisher) -> JoinHandle<()> {
        tokio::spawn((*self).run(publisher))
    }
}
