//! Client side of the command channel, used by the short-lived `gopher -j/-m/-x/-a`
//! invocations.

use std::io;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::endpoint::{self, Namespace};
use crate::protocol::WireMessage;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not a socket")]
    NotSocket,
    #[error("cannot inspect endpoint: {0}")]
    Stat(io::Error),
    #[error("cannot connect: {0}")]
    Connect(io::Error),
    #[error("cannot encode command: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("cannot write command: {0}")]
    Write(io::Error),
}

/// How a command is spread over the discovered instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Every instance, concurrently.
    Broadcast,
    /// Exactly one instance, picked at random among the reachable ones.
    Race,
}

#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, TransportError)>,
}

/// Send one command to one endpoint. A connect failure means nobody is
/// listening any more, so the endpoint's registration is removed.
#[cfg(unix)]
pub async fn deliver(path: &Path, message: &WireMessage) -> Result<(), TransportError> {
    use tokio::net::UnixStream;

    if !endpoint::is_socket(path).map_err(TransportError::Stat)? {
        return Err(TransportError::NotSocket);
    }
    let mut stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(e) => {
            if let Err(remove) = endpoint::remove_stale(path) {
                debug!("could not remove stale endpoint {}: {remove}", path.display());
            }
            return Err(TransportError::Connect(e));
        }
    };
    write_and_close(&mut stream, message).await
}

#[cfg(windows)]
pub async fn deliver(path: &Path, message: &WireMessage) -> Result<(), TransportError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let mut pipe = ClientOptions::new()
        .open(path)
        .map_err(TransportError::Connect)?;
    write_and_close(&mut pipe, message).await
}

async fn write_and_close<S: AsyncWrite + Unpin>(
    stream: &mut S,
    message: &WireMessage,
) -> Result<(), TransportError> {
    let payload = message.encode()?;
    stream
        .write_all(&payload)
        .await
        .map_err(TransportError::Write)?;
    stream.shutdown().await.map_err(TransportError::Write)
}

/// Deliver to every endpoint concurrently. Failures are reported per endpoint
/// and never abort the others.
pub async fn broadcast(endpoints: Vec<PathBuf>, message: &WireMessage) -> BroadcastReport {
    let mut tasks = JoinSet::new();
    for path in endpoints {
        let message = message.clone();
        tasks.spawn(async move {
            let result = deliver(&path, &message).await;
            (path, result)
        });
    }

    let mut report = BroadcastReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((path, Ok(()))) => report.delivered.push(path),
            Ok((path, Err(e))) => {
                warn!("{}: Cannot send message to Gopher instance: {}", path.display(), e);
                report.failed.push((path, e));
            }
            Err(e) => warn!("delivery task failed: {e}"),
        }
    }
    report
}

/// Try endpoints one by one in random order and stop at the first success,
/// so exactly one reachable instance gets the command.
pub async fn race(
    mut endpoints: Vec<PathBuf>,
    message: &WireMessage,
    rng: &mut impl Rng,
) -> Option<PathBuf> {
    endpoints.shuffle(rng);
    for path in endpoints {
        match deliver(&path, message).await {
            Ok(()) => return Some(path),
            Err(e) => warn!("{}: Cannot send message to Gopher instance: {}", path.display(), e),
        }
    }
    None
}

/// Discover instances in `namespace` and deliver `message` with `mode`.
/// Unreachable instances are logged; only a failing discovery is an error.
pub async fn send(
    namespace: &Namespace,
    message: &WireMessage,
    mode: DeliveryMode,
    rng: &mut impl Rng,
) -> io::Result<usize> {
    let endpoints = namespace.discover()?;
    if endpoints.is_empty() {
        info!("no running Gopher instance found in {}", namespace.dir().display());
        return Ok(0);
    }
    let delivered = match mode {
        DeliveryMode::Broadcast => broadcast(endpoints, message).await.delivered.len(),
        DeliveryMode::Race => usize::from(race(endpoints, message, rng).await.is_some()),
    };
    if delivered == 0 {
        warn!("no Gopher instance accepted the command");
    }
    Ok(delivered)
}
