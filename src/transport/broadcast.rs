//! Cross-context transport over a named broadcast channel.

use crate::error::{Result, SyncError};
use crate::types::Song;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

use super::protocol::BroadcastMessage;
use super::{RemoteUpdateFn, SnapshotFn, Transport, TransportStatus};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct MemberId(u64);

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberId({})", self.0)
    }
}

/// Registry of named broadcast channels.
///
/// Posting on a channel delivers to every *other* member of the same name;
/// the poster never receives its own message.
pub struct BroadcastHub {
    channels: RwLock<HashMap<String, HashMap<MemberId, Sender<BroadcastMessage>>>>,
    next_member: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            next_member: AtomicU64::new(1),
        }
    }

    /// Join the channel named `name`.
    pub fn join(self: &Arc<Self>, name: impl Into<String>) -> BroadcastChannel {
        let name = name.into();
        let id = MemberId(self.next_member.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = unbounded();

        self.channels
            .write()
            .entry(name.clone())
            .or_default()
            .insert(id, sender);

        BroadcastChannel {
            inner: Arc::new(ChannelInner {
                hub: Arc::clone(self),
                name,
                id,
                messages: Mutex::new(Some(receiver)),
            }),
        }
    }

    fn post(&self, name: &str, from: MemberId, message: &BroadcastMessage) {
        let channels = self.channels.read();
        if let Some(members) = channels.get(name) {
            for (id, sender) in members.iter() {
                if *id == from {
                    continue;
                }
                let _ = sender.send(message.clone());
            }
        }
    }

    fn leave(&self, name: &str, id: MemberId) {
        let mut channels = self.channels.write();
        if let Some(members) = channels.get_mut(name) {
            members.remove(&id);
            if members.is_empty() {
                channels.remove(name);
            }
        }
    }

    /// Number of members currently on `name`.
    pub fn member_count(&self, name: &str) -> usize {
        self.channels.read().get(name).map_or(0, HashMap::len)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

struct ChannelInner {
    hub: Arc<BroadcastHub>,
    name: String,
    id: MemberId,
    messages: Mutex<Option<Receiver<BroadcastMessage>>>,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.hub.leave(&self.name, self.id);
    }
}

/// One membership on a named broadcast channel. Cheap to clone; clones share
/// the membership.
#[derive(Clone)]
pub struct BroadcastChannel {
    inner: Arc<ChannelInner>,
}

impl BroadcastChannel {
    /// Deliver `message` to every other member.
    pub fn post(&self, message: &BroadcastMessage) {
        self.inner.hub.post(&self.inner.name, self.inner.id, message);
    }

    /// Take the inbound message receiver. Can only be taken once.
    pub fn take_messages(&self) -> Option<Receiver<BroadcastMessage>> {
        self.inner.messages.lock().take()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

/// Transport over a [`BroadcastChannel`].
///
/// `REQUEST_SONGS` prompts this context to answer with its current
/// collection tagged `SYNC_SONGS`, broadcast to all channel members (not
/// just the requester). Inbound `SYNC_SONGS`/`DATA_READY` collections are
/// delivered as remote updates.
pub struct BroadcastTransport {
    channel: BroadcastChannel,
    snapshot: SnapshotFn,
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
    status: RwLock<TransportStatus>,
}

impl BroadcastTransport {
    pub fn new(channel: BroadcastChannel, snapshot: SnapshotFn) -> Self {
        let (stop_tx, stop_rx) = bounded(1);
        Self {
            channel,
            snapshot,
            stop_tx,
            stop_rx,
            handle: Mutex::new(None),
            status: RwLock::new(TransportStatus::Connecting),
        }
    }
}

impl Transport for BroadcastTransport {
    fn start(&self, on_remote: RemoteUpdateFn) -> Result<()> {
        let messages = match self.channel.take_messages() {
            Some(messages) => messages,
            None => return Ok(()),
        };

        let channel = self.channel.clone();
        let snapshot = Arc::clone(&self.snapshot);
        let stop_rx = self.stop_rx.clone();
        let handle = thread::spawn(move || loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(messages) -> message => {
                    let message = match message {
                        Ok(message) => message,
                        Err(_) => break,
                    };
                    match message {
                        BroadcastMessage::RequestSongs => {
                            debug!(channel = %channel.name(), "answering REQUEST_SONGS");
                            channel.post(&BroadcastMessage::SyncSongs(snapshot()));
                        }
                        BroadcastMessage::SyncSongs(songs)
                        | BroadcastMessage::DataReady(songs) => {
                            on_remote(songs);
                        }
                    }
                }
            }
        });

        *self.handle.lock() = Some(handle);
        *self.status.write() = TransportStatus::Connected;
        Ok(())
    }

    fn request_snapshot(&self) -> Result<Option<Vec<Song>>> {
        if *self.status.read() == TransportStatus::Closed {
            return Err(SyncError::TransportClosed);
        }
        // Answers arrive asynchronously as SYNC_SONGS broadcasts; there is
        // no correlated response to wait for.
        self.channel.post(&BroadcastMessage::RequestSongs);
        Ok(None)
    }

    fn push_update(&self, songs: &[Song]) -> Result<()> {
        if *self.status.read() == TransportStatus::Closed {
            return Err(SyncError::TransportClosed);
        }
        self.channel.post(&BroadcastMessage::SyncSongs(songs.to_vec()));
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        *self.status.read()
    }

    fn shutdown(&self) {
        *self.status.write() = TransportStatus::Closed;
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SongId, SongInput};
    use std::time::Duration;

    #[test]
    fn test_post_skips_sender() {
        let hub = Arc::new(BroadcastHub::new());
        let a = hub.join("songs");
        let b = hub.join("songs");
        let a_rx = a.take_messages().unwrap();
        let b_rx = b.take_messages().unwrap();

        a.post(&BroadcastMessage::RequestSongs);
        assert!(matches!(
            b_rx.recv_timeout(Duration::from_millis(200)).unwrap(),
            BroadcastMessage::RequestSongs
        ));
        assert!(a_rx.try_recv().is_err());
    }

    #[test]
    fn test_request_answered_to_all_members() {
        let hub = Arc::new(BroadcastHub::new());
        let responder_channel = hub.join("songs");
        let requester = hub.join("songs");
        let observer = hub.join("songs");

        let songs = vec![SongInput::new("Imagine", "John Lennon").into_song(SongId(3))];
        let canned = songs.clone();
        let responder = BroadcastTransport::new(
            responder_channel,
            Arc::new(move || canned.clone()),
        );
        responder.start(Arc::new(|_| {})).unwrap();

        let requester_rx = requester.take_messages().unwrap();
        let observer_rx = observer.take_messages().unwrap();
        requester.post(&BroadcastMessage::RequestSongs);

        // Both the requester and a bystander receive the answer. The
        // bystander also saw the original request; skip past it.
        for rx in [&requester_rx, &observer_rx] {
            loop {
                match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
                    BroadcastMessage::SyncSongs(received) => {
                        assert_eq!(received, songs);
                        break;
                    }
                    BroadcastMessage::RequestSongs => continue,
                    other => panic!("expected SYNC_SONGS, got {other:?}"),
                }
            }
        }

        responder.shutdown();
    }

    #[test]
    fn test_membership_drops_on_channel_drop() {
        let hub = Arc::new(BroadcastHub::new());
        let a = hub.join("songs");
        assert_eq!(hub.member_count("songs"), 1);
        drop(a);
        assert_eq!(hub.member_count("songs"), 0);
    }
}
