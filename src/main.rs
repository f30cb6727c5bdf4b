//! gridcanvas: room server and tools for the shared design canvas.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gridcanvas_core::{Canvas, ShapeStore};
use gridcanvas_sync::{
    bind_endpoint, connect_room, decode_ticket, encode_ticket, Backoff, ClientSession, RoomManager,
    RoomProtocol, Snapshot, ALPN,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{ServeArgs, WatchArgs};

/// Multi-user design canvas: room server and tools
#[derive(Parser, Debug)]
#[command(name = "gridcanvas")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host rooms and print the ticket clients connect with
    Serve(ServeArgs),
    /// Join a room headless and log its activity
    Watch(WatchArgs),
    /// Print the shapes in a snapshot file as JSON
    Inspect {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                // automerge logs every delta merged into the room doc at ERROR
                .unwrap_or_else(|_| "info,automerge=off".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Watch(args) => watch(args).await,
        Command::Inspect { file } => inspect(file).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let store = args.snapshot_store();
    info!(dir = %store.dir().display(), "snapshot directory");
    let manager = RoomManager::new(args.room_config(), Arc::new(store));
    manager.spawn_flusher();

    let endpoint = bind_endpoint().await?;
    let ticket = encode_ticket(&endpoint.addr())?;
    let router = iroh::protocol::Router::builder(endpoint)
        .accept(ALPN, RoomProtocol::new(manager.clone()))
        .spawn();

    // Stdout carries only the ticket so it can be piped
    println!("{ticket}");
    info!("room server ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    match manager.shutdown().await {
        Ok(flushed) => info!(flushed, "rooms flushed"),
        Err(e) => warn!(error = %e, "some rooms could not be flushed"),
    }
    router.shutdown().await?;
    Ok(())
}

async fn watch(args: WatchArgs) -> Result<()> {
    let addr = decode_ticket(&args.ticket)?;
    let holder = args.holder_id();
    let room = args.room_id();
    info!(%room, %holder, "joining");

    let canvas = Canvas::new(holder).into_shared();
    let mut changes = canvas.lock().await.subscribe();
    let (mut session, handle) = ClientSession::start(canvas.clone(), room).await;

    let endpoint = bind_endpoint().await?;
    let session_task = tokio::spawn(async move {
        session
            .run_with_reconnect(|| connect_room(endpoint.clone(), addr.clone()), Backoff::default())
            .await
    });

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                let (shapes, locked) = {
                    let canvas = canvas.lock().await;
                    let shapes = canvas.shapes();
                    let locked = shapes.iter().filter(|s| s.lock.is_some()).count();
                    (shapes.len(), locked)
                };
                let cursors = handle.remote_cursors().await.len();
                info!(shapes, locked, cursors, status = ?handle.status(), "canvas changed");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session_task.abort();
    Ok(())
}

async fn inspect(file: PathBuf) -> Result<()> {
    let snapshot = Snapshot::read_from(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let store = ShapeStore::from_bytes(&snapshot.bytes).context("decoding snapshot document")?;
    let report = serde_json::json!({
        "docId": snapshot.doc_id,
        "savedAtMs": snapshot.saved_at_ms,
        "shapes": store.all(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
