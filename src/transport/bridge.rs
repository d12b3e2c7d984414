//! Cross-origin transport over a correlated request/response bridge.

use crate::error::{Result, SyncError};
use crate::types::Song;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::protocol::{BridgeFrame, BridgeMessage, RequestId};
use super::{RemoteUpdateFn, SnapshotFn, Transport, TransportStatus};

/// Default bound on a bridge round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Bridge identity and timing.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Origin stamped on outbound frames.
    pub local_origin: String,
    /// The only origin accepted on inbound frames.
    pub peer_origin: String,
    /// Bound on each request/response exchange.
    pub request_timeout: Duration,
}

impl BridgeConfig {
    pub fn new(local_origin: impl Into<String>, peer_origin: impl Into<String>) -> Self {
        Self {
            local_origin: local_origin.into(),
            peer_origin: peer_origin.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// One side of a bridge: a frame channel to the peer and one from it.
pub struct BridgeEndpoint {
    tx: Sender<BridgeFrame>,
    rx: Receiver<BridgeFrame>,
}

impl BridgeEndpoint {
    /// Send a frame to the peer.
    pub fn send(&self, frame: BridgeFrame) -> Result<()> {
        self.tx.send(frame).map_err(|_| SyncError::TransportClosed)
    }

    /// Receive the next frame from the peer, bounded by `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<BridgeFrame> {
        self.rx
            .recv_timeout(timeout)
            .map_err(|_| SyncError::TransportClosed)
    }
}

/// Create a connected pair of endpoints.
pub fn pair() -> (BridgeEndpoint, BridgeEndpoint) {
    let (a_tx, b_rx) = unbounded();
    let (b_tx, a_rx) = unbounded();
    (
        BridgeEndpoint { tx: a_tx, rx: a_rx },
        BridgeEndpoint { tx: b_tx, rx: b_rx },
    )
}

struct BridgeShared {
    config: BridgeConfig,
    tx: Sender<BridgeFrame>,
    /// Waiters for in-flight requests, keyed by correlation id.
    pending: Mutex<HashMap<RequestId, Sender<BridgeMessage>>>,
    next_request: AtomicU64,
    /// Set once the peer announces itself with BRIDGE_READY.
    ready: AtomicBool,
    snapshot: SnapshotFn,
    on_remote: RwLock<Option<RemoteUpdateFn>>,
    status: RwLock<TransportStatus>,
}

impl BridgeShared {
    fn send(&self, request_id: Option<RequestId>, message: BridgeMessage) -> Result<()> {
        self.tx
            .send(BridgeFrame {
                origin: self.config.local_origin.clone(),
                request_id,
                message,
            })
            .map_err(|_| SyncError::TransportClosed)
    }

    /// Send a request and wait (bounded) for its correlated response.
    ///
    /// Overlapping in-flight requests are fine: each gets its own id and
    /// waiter, and a response routes only to its own caller. A timed-out
    /// request removes its waiter so a late response is discarded, not
    /// misdelivered.
    fn request(&self, message: BridgeMessage) -> Result<BridgeMessage> {
        let id = RequestId(self.next_request.fetch_add(1, Ordering::SeqCst));
        let (reply_tx, reply_rx) = bounded(1);
        self.pending.lock().insert(id, reply_tx);

        if let Err(e) = self.send(Some(id), message) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match reply_rx.recv_timeout(self.config.request_timeout) {
            Ok(reply) => Ok(reply),
            Err(_) => {
                self.pending.lock().remove(&id);
                debug!(request = %id, "bridge request timed out");
                Err(SyncError::PeerUnreachable(self.config.request_timeout))
            }
        }
    }

    fn pull_snapshot(&self) -> Result<Option<Vec<Song>>> {
        if !self.ready.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match self.request(BridgeMessage::RequestSongs)? {
            BridgeMessage::ResponseSongs(songs) => Ok(Some(songs)),
            other => Err(SyncError::UnexpectedResponse(other.kind().to_string())),
        }
    }

    fn deliver_remote(&self, songs: Vec<Song>) {
        if let Some(on_remote) = self.on_remote.read().clone() {
            on_remote(songs);
        }
    }

    fn handle_frame(self: &Arc<Self>, frame: BridgeFrame) {
        if frame.origin != self.config.peer_origin {
            let err = SyncError::OriginMismatch {
                expected: self.config.peer_origin.clone(),
                got: frame.origin,
            };
            warn!(error = %err, "rejecting bridge frame");
            return;
        }

        match frame.message {
            BridgeMessage::BridgeReady => {
                self.ready.store(true, Ordering::SeqCst);
                *self.status.write() = TransportStatus::Connected;
                debug!(peer = %self.config.peer_origin, "bridge peer ready");

                // Pull the peer's collection right away. Done off-thread so
                // the dispatcher stays free to route the response.
                let shared = Arc::clone(self);
                thread::spawn(move || match shared.pull_snapshot() {
                    Ok(Some(songs)) => shared.deliver_remote(songs),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "initial bridge snapshot failed"),
                });
            }
            BridgeMessage::RequestSongs => {
                let songs = (self.snapshot)();
                if let Err(e) = self.send(frame.request_id, BridgeMessage::ResponseSongs(songs)) {
                    debug!(error = %e, "failed to answer REQUEST_SONGS");
                }
            }
            BridgeMessage::UpdateSongs(songs) => {
                self.deliver_remote(songs);
                if let Err(e) = self.send(frame.request_id, BridgeMessage::AckUpdate) {
                    debug!(error = %e, "failed to ack UPDATE_SONGS");
                }
            }
            reply @ (BridgeMessage::ResponseSongs(_) | BridgeMessage::AckUpdate) => {
                let waiter = frame
                    .request_id
                    .and_then(|id| self.pending.lock().remove(&id));
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.try_send(reply);
                    }
                    None => {
                        debug!(
                            kind = reply.kind(),
                            request = ?frame.request_id,
                            "discarding unmatched bridge response"
                        );
                    }
                }
            }
        }
    }
}

/// Cross-origin transport over a [`BridgeEndpoint`].
///
/// Outbound calls carry a unique correlation id and are satisfied or timed
/// out, so a caller awaiting a response is never left hanging. Requests are
/// gated on the peer's `BRIDGE_READY` announcement; before that,
/// [`Transport::request_snapshot`] yields `Ok(None)` and pushes report the
/// peer unreachable.
pub struct BridgeTransport {
    shared: Arc<BridgeShared>,
    rx: Mutex<Option<Receiver<BridgeFrame>>>,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeTransport {
    /// Build over one side of a bridge pair. `snapshot` supplies the local
    /// collection when the peer asks for it.
    pub fn new(endpoint: BridgeEndpoint, config: BridgeConfig, snapshot: SnapshotFn) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        Self {
            shared: Arc::new(BridgeShared {
                config,
                tx: endpoint.tx,
                pending: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(1),
                ready: AtomicBool::new(false),
                snapshot,
                on_remote: RwLock::new(None),
                status: RwLock::new(TransportStatus::Connecting),
            }),
            rx: Mutex::new(Some(endpoint.rx)),
            stop_tx,
            stop_rx,
            handle: Mutex::new(None),
        }
    }
}

impl Transport for BridgeTransport {
    fn start(&self, on_remote: RemoteUpdateFn) -> Result<()> {
        let rx = match self.rx.lock().take() {
            Some(rx) => rx,
            None => return Ok(()),
        };
        *self.shared.on_remote.write() = Some(on_remote);

        let shared = Arc::clone(&self.shared);
        let stop_rx = self.stop_rx.clone();
        let handle = thread::spawn(move || loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(rx) -> frame => {
                    match frame {
                        Ok(frame) => shared.handle_frame(frame),
                        Err(_) => break,
                    }
                }
            }
        });
        *self.handle.lock() = Some(handle);

        // Announce ourselves; the peer answers with its own BRIDGE_READY
        // path by requesting our collection.
        self.shared.send(None, BridgeMessage::BridgeReady)?;
        Ok(())
    }

    fn request_snapshot(&self) -> Result<Option<Vec<Song>>> {
        self.shared.pull_snapshot()
    }

    fn push_update(&self, songs: &[Song]) -> Result<()> {
        if !self.shared.ready.load(Ordering::SeqCst) {
            return Err(SyncError::PeerUnreachable(
                self.shared.config.request_timeout,
            ));
        }
        match self
            .shared
            .request(BridgeMessage::UpdateSongs(songs.to_vec()))?
        {
            BridgeMessage::AckUpdate => Ok(()),
            other => Err(SyncError::UnexpectedResponse(other.kind().to_string())),
        }
    }

    fn status(&self) -> TransportStatus {
        *self.shared.status.read()
    }

    fn shutdown(&self) {
        *self.shared.status.write() = TransportStatus::Closed;
        self.shared.ready.store(false, Ordering::SeqCst);
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BridgeTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
