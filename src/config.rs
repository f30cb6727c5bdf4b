//! Command-line configuration for the server and client tools

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use gridcanvas_core::HolderId;
use gridcanvas_sync::{FileSnapshotStore, RoomConfig, RoomId};

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Directory for room snapshots [default: platform data dir]
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,

    /// Seconds an empty room stays loaded before it is evicted
    #[arg(long, default_value_t = 30)]
    pub idle_grace_secs: u64,

    /// Seconds between snapshots of rooms with unsaved changes
    #[arg(long, default_value_t = 10)]
    pub flush_interval_secs: u64,

    /// Frames queued per member before it is disconnected as too slow
    #[arg(long, default_value_t = 256)]
    pub send_queue: usize,
}

impl ServeArgs {
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            idle_grace: Duration::from_secs(self.idle_grace_secs),
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            send_queue: self.send_queue.max(1),
            ..RoomConfig::default()
        }
    }

    pub fn snapshot_store(&self) -> FileSnapshotStore {
        let dir = self
            .snapshot_dir
            .clone()
            .unwrap_or_else(FileSnapshotStore::default_dir);
        FileSnapshotStore::new(dir)
    }
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Server ticket (or bare endpoint id)
    #[arg(value_name = "TICKET")]
    pub ticket: String,

    /// Room to join
    #[arg(long, default_value = "default")]
    pub room: String,

    /// Lock holder id to act as [default: random]
    #[arg(long)]
    pub holder: Option<String>,
}

impl WatchArgs {
    pub fn room_id(&self) -> RoomId {
        RoomId::from(self.room.as_str())
    }

    pub fn holder_id(&self) -> HolderId {
        self.holder
            .as_deref()
            .map(HolderId::from)
            .unwrap_or_else(HolderId::random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct Serve {
        #[command(flatten)]
        args: ServeArgs,
    }

    #[derive(Parser, Debug)]
    struct Watch {
        #[command(flatten)]
        args: WatchArgs,
    }

    #[test]
    fn test_serve_defaults_match_room_defaults() {
        let serve = Serve::try_parse_from(["serve"]).unwrap();
        let config = serve.args.room_config();
        let defaults = RoomConfig::default();
        assert_eq!(config.idle_grace, defaults.idle_grace);
        assert_eq!(config.flush_interval, defaults.flush_interval);
        assert_eq!(config.send_queue, defaults.send_queue);
    }

    #[test]
    fn test_serve_flags() {
        let dir = tempfile::tempdir().unwrap();
        let serve = Serve::try_parse_from([
            "serve",
            "--snapshot-dir",
            dir.path().to_str().unwrap(),
            "--idle-grace-secs",
            "5",
            "--send-queue",
            "0",
        ])
        .unwrap();
        let config = serve.args.room_config();
        assert_eq!(config.idle_grace, Duration::from_secs(5));
        assert_eq!(config.send_queue, 1);
        assert_eq!(serve.args.snapshot_store().dir(), dir.path());
    }

    #[test]
    fn test_watch_args() {
        let watch =
            Watch::try_parse_from(["watch", "gridcanvas1abc", "--holder", "alice"]).unwrap();
        assert_eq!(watch.args.room_id(), RoomId::from("default"));
        assert_eq!(watch.args.holder_id(), HolderId::from("alice"));

        let anonymous = Watch::try_parse_from(["watch", "t"]).unwrap();
        assert_ne!(anonymous.args.holder_id(), anonymous.args.holder_id());
    }
}
