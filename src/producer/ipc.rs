use std::{
    io::{Error, ErrorKind},
    os::unix::fs::FileTypeExt,
    path::{Path, PathBuf},
};

use log::{debug, error, info, warn};

use tokio::{net::UnixDatagram, task::JoinHandle};

use crate::{
    bus::{ProducerId, Publisher, RawCode},
    producer::Producer,
};

/// Largest accepted message
const MAX_MESSAGE_SIZE: usize = 4096;

/// Inter process message endpoint, on a unix datagram socket.
/// Each message is a control code (u32 LE) followed by an opaque payload.
pub struct IpcListener {
    path: PathBuf,
    socket: UnixDatagram,
}

impl IpcListener {
    /// Binds the endpoint. A stale socket left at this location is replaced,
    /// any other file is preserved and binding fails.
    pub fn bind<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                debug!("replacing stale socket {}", path.display());
                std::fs::remove_file(&path)?;
            },
            Ok(_) => {
                return Err(Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                ));
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => return Err(e),
        }

        let socket = UnixDatagram::bind(&path)?;
        info!("ipc endpoint listening on {}", path.display());

        Ok(Self { path, socket })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Splits a message into (code, payload)
    pub fn parse(message: &[u8]) -> Option<(RawCode, Vec<u8>)> {
        if message.len() < 4 {
            return None;
        }

        let mut code = [0u8; 4];
        code.copy_from_slice(&message[..4]);

        Some((RawCode::from_le_bytes(code), message[4..].to_vec()))
    }

    /// Encodes a message
    pub fn message(code: RawCode, payload: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(4 + payload.len());
        message.extend_from_slice(&code.to_le_bytes());
        message.extend_from_slice(payload);
        message
    }

    pub async fn run(self, publisher: Publisher) {
        // one extra byte to detect truncated messages
        let mut buf = vec![0u8; MAX_MESSAGE_SIZE + 1];

        loop {
            tokio::select! {
                _ = publisher.closed() => {
                    debug!("ipc listener: bus closed");
                    break;
                },
                received = self.socket.recv(&mut buf) => match received {
                    Ok(size) if size > MAX_MESSAGE_SIZE => {
                        warn!("ipc: message exceeds {} bytes: dropped", MAX_MESSAGE_SIZE);
                    },
                    Ok(size) => match Self::parse(&buf[..size]) {
                        Some((code, payload)) => {
                            debug!("ipc message code={} ({} bytes)", code, payload.len());
                            if publisher.publish(code, payload).is_err() {
                                debug!("ipc listener: bus closed");
                                break;
                            }
                        },
                        None => {
                            warn!("ipc: invalid message ({} bytes): dropped", size);
                        },
                    },
                    Err(e) => {
                        error!("ipc endpoint error: {}", e);
                        break;
                    },
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to remove {}: {}", self.path.display(), e);
        }
    }
}

impl Producer for IpcListener {
    fn name(&self) -> &'static str {
        "ipc"
    }

    fn origin(&self) -> ProducerId {
        ProducerId::Ipc
    }

    fn spawn(self: Box<Self>, publisher: Publisher) -> JoinHandle<()> {
        tokio::spawn((*self).run(publisher))
    }
}
