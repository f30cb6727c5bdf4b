//! Server-side rooms: one authoritative document per room id, relayed to
//! every connection that joined it.
//!
//! Rooms are created lazily on first join (hydrated from the latest
//! snapshot), flushed on a timer while dirty, and evicted after sitting
//! empty for the idle grace period. A join that races an eviction either
//! cancels it or waits for it to finish and then rehydrates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use gridcanvas_core::CanvasDoc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{ConnectionId, RoomId, ServerFrame};
use crate::snapshot::{save_with_retry, Snapshot, SnapshotStore};

/// Idle rooms are kept loaded this long before eviction
pub const IDLE_GRACE: Duration = Duration::from_secs(30);

/// Dirty rooms are snapshotted this often
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Frames buffered per member before it is treated as too slow
pub const SEND_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub idle_grace: Duration,
    pub flush_interval: Duration,
    pub send_queue: usize,
    /// Tries per snapshot save before giving up
    pub save_attempts: u32,
    /// First retry delay; doubles after each failure
    pub save_backoff: Duration,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            idle_grace: IDLE_GRACE,
            flush_interval: FLUSH_INTERVAL,
            send_queue: SEND_QUEUE,
            save_attempts: 3,
            save_backoff: Duration::from_millis(200),
        }
    }
}

/// What a successful join hands back to the connection task
#[derive(Debug)]
pub struct Membership {
    pub room: RoomId,
    pub conn: ConnectionId,
    /// Frames for this member, starting with the full-state `Sync`
    pub outbound: mpsc::Receiver<ServerFrame>,
}

#[derive(Debug)]
struct Member {
    tx: mpsc::Sender<ServerFrame>,
    /// Last awareness payload, replayed to members who join later
    cursor: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct RoomState {
    /// `None` only once the room is closed
    doc: Option<CanvasDoc>,
    members: HashMap<ConnectionId, Member>,
    /// Changed since the last snapshot
    dirty: bool,
    /// Bumped by every join and by every leave that empties the room;
    /// an eviction timer only fires if nothing happened since it was armed
    generation: u64,
    closed: bool,
}

#[derive(Debug)]
struct Room {
    id: RoomId,
    state: Mutex<RoomState>,
    /// Held for the whole of a snapshot write; taken before `state`
    saving: Mutex<()>,
}

#[derive(Debug)]
struct Inner {
    config: RoomConfig,
    store: Arc<dyn SnapshotStore>,
    rooms: StdMutex<HashMap<RoomId, Arc<Room>>>,
    flusher: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let flusher = self.flusher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = flusher.take() {
            handle.abort();
        }
    }
}

/// Registry of live rooms. Cheap to clone; clones share the registry.
#[derive(Debug, Clone)]
pub struct RoomManager {
    inner: Arc<Inner>,
}

impl RoomManager {
    pub fn new(config: RoomConfig, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                rooms: StdMutex::new(HashMap::new()),
                flusher: StdMutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.inner.config
    }

    /// Start the periodic snapshot task. It stops on its own once the
    /// last manager handle is dropped.
    pub fn spawn_flusher(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let every = self.inner.config.flush_interval;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = RoomManager { inner };
                if let Err(e) = manager.flush_all().await {
                    warn!(error = %e, "periodic flush incomplete");
                }
            }
        });
        if let Some(old) = self.flusher().replace(handle) {
            old.abort();
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        let mut ids: Vec<RoomId> = self.rooms().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn member_count(&self, room_id: &RoomId) -> usize {
        match self.room(room_id) {
            Some(room) => room.state.lock().await.members.len(),
            None => 0,
        }
    }

    /// Add a connection to a room, creating and hydrating the room if needed
    pub async fn join(&self, room_id: &RoomId) -> Result<Membership> {
        loop {
            let room = self.room_entry(room_id);
            let mut state = room.state.lock().await;
            if state.closed {
                // Lost a race with eviction, which has already unregistered
                // this room; the next lookup creates a fresh one
                continue;
            }

            if state.doc.is_none() {
                match self.hydrate(room_id).await {
                    Ok(doc) => state.doc = Some(doc),
                    Err(e) => {
                        if state.members.is_empty() {
                            state.closed = true;
                            self.forget(&room);
                        }
                        return Err(e);
                    }
                }
            }

            state.generation += 1;
            let conn = ConnectionId::next();
            let (tx, outbound) = mpsc::channel(self.inner.config.send_queue.max(1));

            let full = state.doc.as_ref().map(CanvasDoc::save).unwrap_or_default();
            let _ = tx.try_send(ServerFrame::Sync(full));
            for (other, member) in &state.members {
                if let Some(payload) = &member.cursor {
                    let frame = ServerFrame::Awareness {
                        from: *other,
                        payload: payload.clone(),
                    };
                    if tx.try_send(frame).is_err() {
                        break;
                    }
                }
            }

            state.members.insert(conn, Member { tx, cursor: None });
            info!(room = %room_id, %conn, members = state.members.len(), "member joined");
            return Ok(Membership {
                room: room_id.clone(),
                conn,
                outbound,
            });
        }
    }

    /// Merge a member's change buffer into the room and relay it to
    /// everyone else. A buffer the document rejects leaves the room
    /// untouched, is answered with an `Error` frame to the sender alone,
    /// and is returned as `MalformedUpdate`.
    pub async fn handle_update(
        &self,
        room_id: &RoomId,
        conn: ConnectionId,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let Some(room) = self.room(room_id) else {
            return Err(Error::Protocol(format!("room {room_id} is not open")));
        };
        let mut state = room.state.lock().await;
        if !state.members.contains_key(&conn) {
            debug!(room = %room_id, %conn, "update from departed member ignored");
            return Ok(());
        }
        let Some(doc) = state.doc.as_mut() else {
            return Ok(());
        };

        let changed = match doc.merge_bytes(&bytes) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(room = %room_id, %conn, error = %e, "dropping malformed update");
                let err = Error::MalformedUpdate(e.to_string());
                // Tell the sender only; a full queue just loses the notice
                if let Some(member) = state.members.get(&conn) {
                    let _ = member.tx.try_send(ServerFrame::error(&err));
                }
                return Err(err);
            }
        };
        if !changed {
            debug!(room = %room_id, %conn, "update carried nothing new");
            return Ok(());
        }

        state.dirty = true;
        debug!(room = %room_id, %conn, bytes = bytes.len(), "relaying update");
        broadcast(room_id, &mut state, Some(conn), ServerFrame::Update(bytes));
        Ok(())
    }

    /// Remember and relay a member's presence payload
    pub async fn handle_awareness(&self, room_id: &RoomId, conn: ConnectionId, payload: Vec<u8>) {
        let Some(room) = self.room(room_id) else {
            return;
        };
        let mut state = room.state.lock().await;
        let Some(member) = state.members.get_mut(&conn) else {
            return;
        };
        member.cursor = Some(payload.clone());
        broadcast(
            room_id,
            &mut state,
            Some(conn),
            ServerFrame::Awareness { from: conn, payload },
        );
    }

    /// Remove a connection. Its cursor is withdrawn from everyone else and,
    /// if the room is now empty, eviction is armed.
    pub async fn leave(&self, room_id: &RoomId, conn: ConnectionId) {
        let Some(room) = self.room(room_id) else {
            return;
        };
        let mut state = room.state.lock().await;
        if state.members.remove(&conn).is_some() {
            info!(room = %room_id, %conn, members = state.members.len(), "member left");
            broadcast(
                room_id,
                &mut state,
                Some(conn),
                ServerFrame::AwarenessRemoved { from: conn },
            );
        }

        if state.members.is_empty() && !state.closed {
            state.generation += 1;
            let generation = state.generation;
            drop(state);
            self.schedule_eviction(room, generation);
        }
    }

    /// Snapshot every dirty room now. Returns how many were written;
    /// on failure the remaining rooms are still attempted.
    pub async fn flush_all(&self) -> Result<usize> {
        let rooms: Vec<Arc<Room>> = self.rooms().values().cloned().collect();
        let mut flushed = 0;
        let mut first_err = None;
        for room in rooms {
            match self.flush_room(&room).await {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(room = %room.id, error = %e, "snapshot flush failed");
                    first_err.get_or_insert(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Flush and close every room, disconnecting all members
    pub async fn shutdown(&self) -> Result<usize> {
        if let Some(handle) = self.flusher().take() {
            handle.abort();
        }
        let rooms: Vec<Arc<Room>> = self.rooms().drain().map(|(_, room)| room).collect();

        let mut flushed = 0;
        let mut first_err = None;
        for room in rooms {
            let _saving = room.saving.lock().await;
            let mut state = room.state.lock().await;
            // Final snapshot of every loaded room, dirty or not
            state.dirty = state.doc.is_some();
            match self.persist(&room.id, &mut state).await {
                Ok(true) => flushed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(room = %room.id, error = %e, "snapshot flush failed during shutdown");
                    first_err.get_or_insert(e);
                }
            }
            state.closed = true;
            state.doc = None;
            // Dropping the senders ends every member's connection task
            state.members.clear();
        }
        info!(flushed, "room manager shut down");
        match first_err {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    async fn hydrate(&self, room_id: &RoomId) -> Result<CanvasDoc> {
        let Some(snapshot) = self.inner.store.load(room_id).await? else {
            debug!(room = %room_id, "no snapshot, starting empty");
            return Ok(CanvasDoc::new());
        };
        match CanvasDoc::load(&snapshot.bytes) {
            Ok(doc) => {
                info!(
                    room = %room_id,
                    bytes = snapshot.bytes.len(),
                    saved_at_ms = snapshot.saved_at_ms,
                    "room rehydrated from snapshot"
                );
                Ok(doc)
            }
            Err(e) => {
                error!(room = %room_id, error = %e, "snapshot unreadable, starting empty");
                Ok(CanvasDoc::new())
            }
        }
    }

    /// Copy the document under the room lock, then write it without
    /// holding up relaying. A failed write marks the room dirty again.
    async fn flush_room(&self, room: &Room) -> Result<bool> {
        let _saving = room.saving.lock().await;
        let snapshot = {
            let mut state = room.state.lock().await;
            if state.closed || !state.dirty {
                return Ok(false);
            }
            let Some(doc) = state.doc.as_ref() else {
                return Ok(false);
            };
            let snapshot = Snapshot::new(room.id.clone(), doc.save());
            state.dirty = false;
            snapshot
        };

        if let Err(e) = self.save(&snapshot).await {
            room.state.lock().await.dirty = true;
            return Err(e);
        }
        debug!(room = %room.id, bytes = snapshot.bytes.len(), "room flushed");
        Ok(true)
    }

    /// Save the room if dirty, with the room locked throughout
    async fn persist(&self, room_id: &RoomId, state: &mut RoomState) -> Result<bool> {
        if !state.dirty {
            return Ok(false);
        }
        let snapshot = match state.doc.as_ref() {
            Some(doc) => Snapshot::new(room_id.clone(), doc.save()),
            None => return Ok(false),
        };
        self.save(&snapshot).await?;
        state.dirty = false;
        debug!(room = %room_id, bytes = snapshot.bytes.len(), "room flushed");
        Ok(true)
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        save_with_retry(
            self.inner.store.as_ref(),
            snapshot,
            self.inner.config.save_attempts,
            self.inner.config.save_backoff,
        )
        .await
    }

    fn schedule_eviction(&self, room: Arc<Room>, generation: u64) {
        let manager = self.clone();
        let grace = self.inner.config.idle_grace;
        debug!(room = %room.id, ?grace, "room idle, eviction armed");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            manager.evict(room, generation).await;
        });
    }

    async fn evict(&self, room: Arc<Room>, generation: u64) {
        let saving = room.saving.lock().await;
        let mut state = room.state.lock().await;
        if state.closed || state.generation != generation || !state.members.is_empty() {
            return;
        }

        if let Err(e) = self.persist(&room.id, &mut state).await {
            error!(room = %room.id, error = %e, "final flush failed, keeping room loaded");
            drop(state);
            drop(saving);
            self.schedule_eviction(room, generation);
            return;
        }

        state.closed = true;
        state.doc = None;
        // Unregister while still holding the room lock so a waiting joiner
        // never finds this closed room again
        self.forget(&room);
        info!(room = %room.id, "room evicted");
    }

    fn room(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms().get(room_id).cloned()
    }

    fn room_entry(&self, room_id: &RoomId) -> Arc<Room> {
        self.rooms()
            .entry(room_id.clone())
            .or_insert_with(|| {
                Arc::new(Room {
                    id: room_id.clone(),
                    state: Mutex::new(RoomState::default()),
                    saving: Mutex::new(()),
                })
            })
            .clone()
    }

    fn forget(&self, room: &Arc<Room>) {
        let mut rooms = self.rooms();
        if rooms.get(&room.id).is_some_and(|r| Arc::ptr_eq(r, room)) {
            rooms.remove(&room.id);
        }
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<RoomId, Arc<Room>>> {
        self.inner.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn flusher(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.inner.flusher.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Queue `frame` for every member except `from`. Members whose queue is
/// full are disconnected, and their departure is broadcast in turn.
fn broadcast(
    room_id: &RoomId,
    state: &mut RoomState,
    from: Option<ConnectionId>,
    frame: ServerFrame,
) {
    let mut pending = vec![(from, frame)];
    while let Some((from, frame)) = pending.pop() {
        let mut dropped = Vec::new();
        for (id, member) in &state.members {
            if Some(*id) == from {
                continue;
            }
            match member.tx.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        room = %room_id,
                        conn = %id,
                        "send queue full, disconnecting slow member"
                    );
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }
        for id in dropped {
            state.members.remove(&id);
            pending.push((Some(id), ServerFrame::AwarenessRemoved { from: id }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MemorySnapshotStore;
    use gridcanvas_core::{Shape, ShapeId, ShapeStore, ShapeUpdate};

    fn manager(store: Arc<MemorySnapshotStore>) -> RoomManager {
        RoomManager::new(RoomConfig::default(), store)
    }

    fn add_rect(store: &mut ShapeStore, id: &str) -> Vec<u8> {
        store.add(Shape::rect(id, 10.0, 10.0, 50.0, 50.0)).unwrap();
        store.take_outbound().concat()
    }

    #[tokio::test]
    async fn test_join_starts_with_sync() {
        let rooms = manager(Arc::new(MemorySnapshotStore::new()));
        let mut member = rooms.join(&"r".into()).await.unwrap();
        assert!(matches!(member.outbound.recv().await, Some(ServerFrame::Sync(_))));
        assert_eq!(rooms.member_count(&"r".into()).await, 1);
        assert_eq!(rooms.room_count(), 1);
    }

    #[tokio::test]
    async fn test_update_relayed_to_others_only() {
        let rooms = manager(Arc::new(MemorySnapshotStore::new()));
        let room = RoomId::from("r");
        let mut a = rooms.join(&room).await.unwrap();
        let mut b = rooms.join(&room).await.unwrap();
        a.outbound.recv().await.unwrap();
        b.outbound.recv().await.unwrap();

        let mut local = ShapeStore::new();
        let delta = add_rect(&mut local, "s1");
        rooms.handle_update(&room, a.conn, delta.clone()).await.unwrap();

        assert_eq!(b.outbound.recv().await, Some(ServerFrame::Update(delta.clone())));
        assert!(a.outbound.try_recv().is_err());

        // The same bytes again add nothing and are not relayed
        rooms.handle_update(&room, a.conn, delta).await.unwrap();
        assert!(b.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_update_leaves_room_untouched() {
        let rooms = manager(Arc::new(MemorySnapshotStore::new()));
        let room = RoomId::from("r");
        let a = rooms.join(&room).await.unwrap();
        let mut b = rooms.join(&room).await.unwrap();
        b.outbound.recv().await.unwrap();

        let err = rooms
            .handle_update(&room, a.conn, vec![0xde, 0xad, 0xbe, 0xef])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedUpdate(_)));
        assert!(err.is_recoverable());
        assert!(b.outbound.try_recv().is_err());
        assert_eq!(rooms.member_count(&room).await, 2);
    }

    #[tokio::test]
    async fn test_partly_valid_update_rejected_in_populated_room() {
        let rooms = manager(Arc::new(MemorySnapshotStore::new()));
        let room = RoomId::from("r");
        let mut a = rooms.join(&room).await.unwrap();
        let mut b = rooms.join(&room).await.unwrap();
        a.outbound.recv().await.unwrap();
        b.outbound.recv().await.unwrap();

        let mut local = ShapeStore::new();
        let added = add_rect(&mut local, "s1");
        rooms.handle_update(&room, a.conn, added).await.unwrap();
        b.outbound.recv().await.unwrap();

        let id = ShapeId::from("s1");
        let update = ShapeUpdate {
            rotation: Some(45.0),
            ..Default::default()
        };
        local.update(&id, &update).unwrap();
        let mut tainted = local.take_outbound().concat();
        tainted.extend_from_slice(b"trailing garbage bytes");

        for bytes in [b"definitely not automerge".to_vec(), tainted] {
            let err = rooms.handle_update(&room, a.conn, bytes).await.unwrap_err();
            assert!(matches!(err, Error::MalformedUpdate(_)));
            match a.outbound.try_recv() {
                Ok(ServerFrame::Error { code, .. }) => assert_eq!(code, "malformed_update"),
                other => panic!("expected error frame, got {other:?}"),
            }
        }
        assert!(b.outbound.try_recv().is_err());

        let mut c = rooms.join(&room).await.unwrap();
        let Some(ServerFrame::Sync(full)) = c.outbound.recv().await else {
            panic!("expected sync");
        };
        let state = ShapeStore::from_bytes(&full).unwrap();
        assert_eq!(state.get(&id).unwrap().rotation, 0.0);
    }

    #[tokio::test]
    async fn test_slow_member_is_disconnected() {
        let config = RoomConfig {
            send_queue: 2,
            ..RoomConfig::default()
        };
        let rooms = RoomManager::new(config, Arc::new(MemorySnapshotStore::new()));
        let room = RoomId::from("r");
        let mut a = rooms.join(&room).await.unwrap();
        let mut slow = rooms.join(&room).await.unwrap();
        a.outbound.recv().await.unwrap();

        let mut local = ShapeStore::new();
        for id in ["s1", "s2", "s3"] {
            let delta = add_rect(&mut local, id);
            rooms.handle_update(&room, a.conn, delta).await.unwrap();
        }

        assert_eq!(rooms.member_count(&room).await, 1);
        assert_eq!(
            a.outbound.recv().await,
            Some(ServerFrame::AwarenessRemoved { from: slow.conn })
        );
        // The slow member gets what fit in its queue, then the stream ends
        assert!(matches!(slow.outbound.recv().await, Some(ServerFrame::Sync(_))));
        assert!(matches!(slow.outbound.recv().await, Some(ServerFrame::Update(_))));
        assert_eq!(slow.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_cursor_replayed_then_removed() {
        let rooms = manager(Arc::new(MemorySnapshotStore::new()));
        let room = RoomId::from("r");
        let a = rooms.join(&room).await.unwrap();
        rooms.handle_awareness(&room, a.conn, vec![1, 2, 3]).await;

        let mut b = rooms.join(&room).await.unwrap();
        assert!(matches!(b.outbound.recv().await, Some(ServerFrame::Sync(_))));
        assert_eq!(
            b.outbound.recv().await,
            Some(ServerFrame::Awareness { from: a.conn, payload: vec![1, 2, 3] })
        );

        rooms.leave(&room, a.conn).await;
        assert_eq!(
            b.outbound.recv().await,
            Some(ServerFrame::AwarenessRemoved { from: a.conn })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_room_flushed_evicted_and_rehydrated() {
        let store = Arc::new(MemorySnapshotStore::new());
        let rooms = manager(store.clone());
        let room = RoomId::from("r");

        let a = rooms.join(&room).await.unwrap();
        let mut local = ShapeStore::new();
        let delta = add_rect(&mut local, "s1");
        rooms.handle_update(&room, a.conn, delta).await.unwrap();
        rooms.leave(&room, a.conn).await;

        tokio::time::sleep(IDLE_GRACE - Duration::from_secs(1)).await;
        assert_eq!(rooms.room_count(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rooms.room_count(), 0);
        assert_eq!(store.save_count(), 1);

        let mut b = rooms.join(&room).await.unwrap();
        let Some(ServerFrame::Sync(full)) = b.outbound.recv().await else {
            panic!("expected sync");
        };
        let restored = ShapeStore::from_bytes(&full).unwrap();
        assert!(restored.contains(&"s1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_within_grace_cancels_eviction() {
        let rooms = manager(Arc::new(MemorySnapshotStore::new()));
        let room = RoomId::from("r");

        let a = rooms.join(&room).await.unwrap();
        rooms.leave(&room, a.conn).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let _b = rooms.join(&room).await.unwrap();

        tokio::time::sleep(IDLE_GRACE * 2).await;
        assert_eq!(rooms.room_count(), 1);
        assert_eq!(rooms.member_count(&room).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_only_when_dirty() {
        let store = Arc::new(MemorySnapshotStore::new());
        let rooms = manager(store.clone());
        rooms.spawn_flusher();
        let room = RoomId::from("r");

        let a = rooms.join(&room).await.unwrap();
        tokio::time::sleep(FLUSH_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(store.save_count(), 0);

        let mut local = ShapeStore::new();
        let delta = add_rect(&mut local, "s1");
        rooms.handle_update(&room, a.conn, delta).await.unwrap();
        tokio::time::sleep(FLUSH_INTERVAL).await;
        assert_eq!(store.save_count(), 1);
        assert!(store.get(&room).is_some());

        tokio::time::sleep(FLUSH_INTERVAL * 3).await;
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_disconnects() {
        let store = Arc::new(MemorySnapshotStore::new());
        let rooms = manager(store.clone());
        let room = RoomId::from("r");

        let mut a = rooms.join(&room).await.unwrap();
        a.outbound.recv().await.unwrap();
        let mut local = ShapeStore::new();
        rooms
            .handle_update(&room, a.conn, add_rect(&mut local, "s1"))
            .await
            .unwrap();

        assert_eq!(rooms.shutdown().await.unwrap(), 1);
        assert_eq!(rooms.room_count(), 0);
        assert_eq!(a.outbound.recv().await, None);
    }
}
