//! Command channel: a local listener that turns one connection into at most
//! one queued command.
//!
//! The listener runs on its own thread with a private tokio runtime, like any
//! other background service of the app. Valid commands go into the crossbeam
//! queue drained by the behavior tick; `close` bypasses the queue and asks the
//! app to exit. Nothing is ever written back to the peer.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bevy::prelude::*;
use crossbeam_channel::{Receiver, Sender};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;

use crate::endpoint;
use crate::protocol::{self, ChannelCommand, Command, ProtocolError};
use crate::schedule::TickSchedule;

/// Upper bound on one command payload.
const MAX_PAYLOAD_BYTES: u64 = 64 * 1024;
/// Peers that neither send nor half-close are dropped after this.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ChannelPlugin;

impl Plugin for ChannelPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(First, exit_on_shutdown_request)
            .add_systems(Last, release_endpoint_on_exit);
    }
}

/// Receiving end of shutdown requests raised by `close` commands.
#[derive(Resource)]
pub struct ShutdownRequests(pub Receiver<()>);

/// Fires once; later `close` commands are no-ops.
struct ShutdownSignal {
    fired: AtomicBool,
    stop: watch::Sender<bool>,
    requests: Sender<()>,
}

impl ShutdownSignal {
    fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.stop.send(true);
        let _ = self.requests.try_send(());
        true
    }
}

/// Owned by the app while the listener runs. Releasing stops the accept loop
/// and removes the endpoint so senders no longer discover it.
#[derive(Resource)]
pub struct ChannelHandle {
    endpoint: PathBuf,
    stop: watch::Sender<bool>,
    released: bool,
}

impl ChannelHandle {
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.stop.send(true);
        match endpoint::remove_stale(&self.endpoint) {
            Ok(()) => info!("[Gopher channel] Released {}", self.endpoint.display()),
            Err(e) => warn!(
                "[Gopher channel] Failed to remove {}: {}",
                self.endpoint.display(),
                e
            ),
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Bind `endpoint` and start serving on a background thread. Returns once the
/// endpoint is bound (or binding failed).
pub fn start(
    endpoint: PathBuf,
    queue: Sender<Command>,
    shutdown_requests: Sender<()>,
) -> Result<ChannelHandle> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let signal = Arc::new(ShutdownSignal {
        fired: AtomicBool::new(false),
        stop: stop_tx.clone(),
        requests: shutdown_requests,
    });
    let (bound_tx, bound_rx) = crossbeam_channel::bounded::<std::io::Result<()>>(1);

    let thread_endpoint = endpoint.clone();
    std::thread::Builder::new()
        .name("gopher-channel".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = bound_tx.send(Err(e));
                    return;
                }
            };
            rt.block_on(serve(thread_endpoint, queue, signal, stop_rx, bound_tx));
        })
        .context("spawning channel thread")?;

    match bound_rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(e).with_context(|| format!("binding {}", endpoint.display()));
        }
        Err(_) => return Err(anyhow!("channel thread exited before binding")),
    }

    Ok(ChannelHandle {
        endpoint,
        stop: stop_tx,
        released: false,
    })
}

#[cfg(unix)]
async fn serve(
    path: PathBuf,
    queue: Sender<Command>,
    signal: Arc<ShutdownSignal>,
    mut stop: watch::Receiver<bool>,
    bound: crossbeam_channel::Sender<std::io::Result<()>>,
) {
    use tokio::net::UnixListener;

    // a previous process with our pid left its socket behind
    let _ = endpoint::remove_stale(&path);
    let listener = match UnixListener::bind(&path) {
        Ok(listener) => {
            let _ = bound.send(Ok(()));
            listener
        }
        Err(e) => {
            let _ = bound.send(Err(e));
            return;
        }
    };

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let queue = queue.clone();
                    let signal = signal.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, &queue, &signal).await;
                    });
                }
                Err(e) => warn!("[Gopher channel] Accept failed: {}", e),
            }
        }
    }

    drop(listener);
    let _ = endpoint::remove_stale(&path);
    debug!("[Gopher channel] Accept loop stopped");
}

#[cfg(windows)]
async fn serve(
    path: PathBuf,
    queue: Sender<Command>,
    signal: Arc<ShutdownSignal>,
    mut stop: watch::Receiver<bool>,
    bound: crossbeam_channel::Sender<std::io::Result<()>>,
) {
    use tokio::net::windows::named_pipe::ServerOptions;

    let mut server = match ServerOptions::new().first_pipe_instance(true).create(&path) {
        Ok(server) => {
            let _ = bound.send(Ok(()));
            server
        }
        Err(e) => {
            let _ = bound.send(Err(e));
            return;
        }
    };

    loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            connected = server.connect() => {
                if let Err(e) = connected {
                    warn!("[Gopher channel] Pipe connect failed: {}", e);
                    continue;
                }
                let next = match ServerOptions::new().create(&path) {
                    Ok(next) => next,
                    Err(e) => {
                        warn!("[Gopher channel] Cannot create next pipe instance: {}", e);
                        break;
                    }
                };
                let conn = std::mem::replace(&mut server, next);
                let queue = queue.clone();
                let signal = signal.clone();
                tokio::spawn(async move {
                    handle_connection(conn, &queue, &signal).await;
                });
            }
        }
    }
    debug!("[Gopher channel] Accept loop stopped");
}

/// What a single connection amounted to.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Queued,
    Shutdown,
    AlreadyShuttingDown,
}

async fn handle_connection<S: AsyncRead + Unpin>(
    stream: S,
    queue: &Sender<Command>,
    signal: &ShutdownSignal,
) {
    let mut payload = Vec::new();
    let mut limited = stream.take(MAX_PAYLOAD_BYTES + 1);
    match tokio::time::timeout(READ_TIMEOUT, limited.read_to_end(&mut payload)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!("[Gopher channel] Read failed: {}", e);
            return;
        }
        Err(_) => {
            warn!("[Gopher channel] Peer never finished sending; dropping");
            return;
        }
    }
    if payload.len() as u64 > MAX_PAYLOAD_BYTES {
        warn!("[Gopher channel] Payload over {} bytes; dropping", MAX_PAYLOAD_BYTES);
        return;
    }
    match dispatch(&payload, queue, signal) {
        Ok(outcome) => debug!("[Gopher channel] {:?}", outcome),
        Err(e) => warn!("[Gopher channel] Dropping connection: {}", e),
    }
}

fn dispatch(
    payload: &[u8],
    queue: &Sender<Command>,
    signal: &ShutdownSignal,
) -> Result<Outcome, ProtocolError> {
    match protocol::decode(payload)? {
        ChannelCommand::Close => {
            if signal.fire() {
                info!("[Gopher channel] Close received; shutting down");
                Ok(Outcome::Shutdown)
            } else {
                Ok(Outcome::AlreadyShuttingDown)
            }
        }
        ChannelCommand::Queued(command) => {
            // The receiver lives as long as the app; a send error only happens
            // during teardown, when dropping the command is correct.
            let _ = queue.send(command);
            Ok(Outcome::Queued)
        }
    }
}

fn exit_on_shutdown_request(
    requests: Res<ShutdownRequests>,
    mut schedule: ResMut<TickSchedule>,
    handle: Option<ResMut<ChannelHandle>>,
    mut exit: EventWriter<AppExit>,
) {
    if requests.0.try_recv().is_err() {
        return;
    }
    schedule.cancel();
    if let Some(mut handle) = handle {
        handle.release();
    }
    exit.send(AppExit::Success);
}

fn release_endpoint_on_exit(
    mut exits: EventReader<AppExit>,
    handle: Option<ResMut<ChannelHandle>>,
) {
    if exits.read().next().is_none() {
        return;
    }
    if let Some(mut handle) = handle {
        handle.release();
    }
}
