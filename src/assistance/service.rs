//! [AssistanceService] implementations.
use std::time::Duration;

use log::trace;

use serde::{Deserialize, Serialize};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use crate::assistance::{AssistanceKind, AssistanceRecord, AssistanceService, FetchError};

#[derive(Debug, Serialize)]
struct Request {
    kind: AssistanceKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Response {
    Ok { record: AssistanceRecord },
    Unavailable,
    Error { message: String },
}

/// JSON lines exchange over TCP: one connection per request,
/// `{"kind":"ephemeris"}` answered by `{"status":"ok","record":{..}}`
/// or `{"status":"unavailable"}`.
#[derive(Debug, Clone)]
pub struct TcpService {
    address: String,
    timeout: Duration,
}

impl TcpService {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    async fn exchange(&self, kind: AssistanceKind) -> Result<AssistanceRecord, FetchError> {
        let stream = TcpStream::connect(&self.address).await?;
        let (rd, mut wr) = stream.into_split();

        let mut request = serde_json::to_string(&Request { kind })
            .map_err(|e| FetchError::Protocol(e.to_string()))?;

        request.push('\n');

        wr.write_all(request.as_bytes()).await?;
        wr.flush().await?;

        let mut reader = BufReader::new(rd);
        let mut line = String::new();

        if reader.read_line(&mut line).await? == 0 {
            return Err(FetchError::Protocol(
                "connection closed before reply".to_string(),
            ));
        }

        trace!("{} - {} replied {}", kind, self.address, line.trim_end());

        match serde_json::from_str::<Response>(&line) {
            Ok(Response::Ok { record }) => Ok(record),
            Ok(Response::Unavailable) => Err(FetchError::Unavailable),
            Ok(Response::Error { message }) => Err(FetchError::Protocol(message)),
            Err(e) => Err(FetchError::Protocol(e.to_string())),
        }
    }
}

impl AssistanceService for TcpService {
    async fn request(&self, kind: AssistanceKind) -> Result<AssistanceRecord, FetchError> {
        tokio::time::timeout(self.timeout, self.exchange(kind))
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

/// No assistance service: every kind is unavailable, the receiver runs on cached data.
#[derive(Debug, Default, Copy, Clone)]
pub struct Offline;

impl AssistanceService for Offline {
    async fn request(&self, _: AssistanceKind) -> Result<AssistanceRecord, FetchError> {
        Err(FetchError::Unavailable)
    }
}
