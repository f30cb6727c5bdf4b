//! Client side of a room: keeps a local [`Canvas`] in step with the server.
//!
//! Local edits reach the wire as the deltas the canvas queues; remote
//! deltas are merged straight into the canvas. After every (re)join the
//! client also pushes its full state, which is how edits made while
//! disconnected get delivered.
//!
//! [`Canvas`]: gridcanvas_core::Canvas

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use gridcanvas_core::{Canvas, LockSweeper, SharedCanvas};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Error, Result, MALFORMED_UPDATE};
use crate::presence::{CursorPresence, PresenceManager};
use crate::protocol::{recv_frame, send_frame, ClientFrame, RoomId, ServerFrame};

/// How often stale remote cursors are pruned
pub const PRESENCE_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

const CURSOR_QUEUE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    /// Received the room's full state
    Joined,
    Disconnected,
}

/// Reconnect delays: start at `initial`, double per failure, cap at `max`
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

/// The UI's view of a running session. Dropping every handle ends it.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    cursor_tx: mpsc::Sender<CursorPresence>,
    presence: Arc<Mutex<PresenceManager>>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ClientHandle {
    /// Queue our cursor for the room. Cursors are lossy: returns false if
    /// the previous ones have not gone out yet.
    pub fn publish_cursor(&self, cursor: CursorPresence) -> bool {
        self.cursor_tx.try_send(cursor).is_ok()
    }

    /// Everyone else's cursor, ordered by holder
    pub async fn remote_cursors(&self) -> Vec<CursorPresence> {
        let mut cursors: Vec<CursorPresence> =
            self.presence.lock().await.active_peers().cloned().collect();
        cursors.sort_by(|a, b| a.holder.cmp(&b.holder));
        cursors
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub async fn wait_for(&mut self, wanted: ConnectionStatus) -> Result<()> {
        self.status
            .wait_for(|status| *status == wanted)
            .await
            .map(|_| ())
            .map_err(|_| Error::ConnectionLost("session ended".into()))
    }
}

/// One user's membership in one room, across reconnects
pub struct ClientSession {
    canvas: SharedCanvas,
    room: RoomId,
    presence: Arc<Mutex<PresenceManager>>,
    cursor_rx: mpsc::Receiver<CursorPresence>,
    status: watch::Sender<ConnectionStatus>,
    _sweeper: LockSweeper,
}

impl ClientSession {
    /// Create the session and start the canvas's lock sweeper, which
    /// lives as long as the session does
    pub async fn start(canvas: SharedCanvas, room: RoomId) -> (Self, ClientHandle) {
        let holder = canvas.lock().await.holder().clone();
        let sweeper = Canvas::start_sweeper(&canvas).await;
        let presence = Arc::new(Mutex::new(PresenceManager::new(holder)));
        let (cursor_tx, cursor_rx) = mpsc::channel(CURSOR_QUEUE);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let session = Self {
            canvas,
            room,
            presence: presence.clone(),
            cursor_rx,
            status: status_tx,
            _sweeper: sweeper,
        };
        let handle = ClientHandle {
            cursor_tx,
            presence,
            status: status_rx,
        };
        (session, handle)
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn canvas(&self) -> &SharedCanvas {
        &self.canvas
    }

    /// Run over one established stream until it drops.
    ///
    /// Returns `Ok` when every [`ClientHandle`] is gone, and
    /// `ConnectionLost` when the server goes away.
    pub async fn run<S, R>(&mut self, mut send: S, mut recv: R) -> Result<()>
    where
        S: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let Self {
            canvas,
            room,
            presence,
            cursor_rx,
            status,
            ..
        } = self;
        let canvas: &SharedCanvas = canvas;
        let room: &RoomId = room;
        let presence: &Arc<Mutex<PresenceManager>> = presence;
        let status: &watch::Sender<ConnectionStatus> = status;

        status.send_replace(ConnectionStatus::Connecting);
        send_frame(&mut send, &ClientFrame::Join { room: room.clone() }).await?;

        // Queued deltas are covered by the full state
        let (full, mut changes) = {
            let mut canvas = canvas.lock().await;
            canvas.take_outbound();
            (canvas.encode_full(), canvas.subscribe())
        };
        send_frame(&mut send, &ClientFrame::Update(full)).await?;

        let inbound = async {
            loop {
                let Some(frame) = recv_frame::<_, ServerFrame>(&mut recv).await? else {
                    let closed = Error::ConnectionLost("server closed the stream".into());
                    return Err::<(), Error>(closed);
                };
                match frame {
                    ServerFrame::Sync(bytes) => {
                        apply_remote(canvas, &bytes).await;
                        status.send_replace(ConnectionStatus::Joined);
                        info!(room = %room, bytes = bytes.len(), "joined room");
                    }
                    ServerFrame::Update(bytes) => apply_remote(canvas, &bytes).await,
                    ServerFrame::Awareness { from, payload } => {
                        match CursorPresence::decode(&payload) {
                            Ok(cursor) => presence.lock().await.update_peer(from, cursor),
                            Err(e) => debug!(%from, error = %e, "ignoring unreadable cursor"),
                        }
                    }
                    ServerFrame::AwarenessRemoved { from } => {
                        presence.lock().await.remove_peer(from)
                    }
                    ServerFrame::Error { code, message } if code == MALFORMED_UPDATE => {
                        warn!(room = %room, %message, "server dropped one of our updates");
                    }
                    ServerFrame::Error { code, message } => {
                        warn!(room = %room, %code, %message, "server rejected session");
                        return Err(Error::Protocol(format!("{code}: {message}")));
                    }
                }
            }
        };

        let outbound = async {
            let mut prune = tokio::time::interval(PRESENCE_PRUNE_INTERVAL);
            prune.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            return Ok::<(), Error>(());
                        }
                        let deltas = canvas.lock().await.take_outbound();
                        for delta in deltas {
                            send_frame(&mut send, &ClientFrame::Update(delta)).await?;
                        }
                    }
                    cursor = cursor_rx.recv() => {
                        let Some(cursor) = cursor else {
                            debug!(room = %room, "all handles dropped, leaving");
                            return Ok(());
                        };
                        send_frame(&mut send, &ClientFrame::Awareness(cursor.encode()?)).await?;
                    }
                    _ = prune.tick() => presence.lock().await.prune_stale(),
                }
            }
        };

        let result: Result<()> = tokio::select! {
            r = inbound => r,
            r = outbound => r,
        };

        presence.lock().await.clear();
        status.send_replace(ConnectionStatus::Disconnected);
        result
    }

    /// Connect, run, and on a recoverable failure reconnect after a
    /// growing delay. `connect` is called once per attempt.
    pub async fn run_with_reconnect<C, F, S, R>(
        &mut self,
        mut connect: C,
        backoff: Backoff,
    ) -> Result<()>
    where
        C: FnMut() -> F,
        F: Future<Output = Result<(S, R)>>,
        S: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let mut delay = backoff.initial;
        loop {
            match connect().await {
                Ok((send, recv)) => {
                    delay = backoff.initial;
                    match self.run(send, recv).await {
                        Ok(()) => return Ok(()),
                        Err(e) if e.is_recoverable() => {
                            warn!(
                                room = %self.room,
                                error = %e,
                                ?delay,
                                "connection lost, reconnecting"
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(room = %self.room, error = %e, ?delay, "connect failed, retrying");
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(delay).await;
            delay = backoff.next(delay);
        }
    }
}

async fn apply_remote(canvas: &SharedCanvas, bytes: &[u8]) {
    match canvas.lock().await.apply_remote(bytes) {
        Ok(events) => debug!(events = events.len(), "merged remote changes"),
        Err(e) => warn!(error = %e, "dropping malformed update from server"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let backoff = Backoff::default();
        let mut delay = backoff.initial;
        let mut seen = vec![delay];
        for _ in 0..8 {
            delay = backoff.next(delay);
            seen.push(delay);
        }
        assert_eq!(seen[1], Duration::from_millis(500));
        assert_eq!(seen[2], Duration::from_secs(1));
        assert_eq!(*seen.last().unwrap(), Duration::from_secs(10));
    }
}
