//! Per-connection server loop and the iroh protocol handler around it.

use std::future::Future;

use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{recv_frame, send_frame, ClientFrame, ServerFrame};
use crate::room::RoomManager;

/// Drive one client connection.
///
/// The first frame must be `Join`; anything else gets an `Error` frame and
/// the connection is closed. Once joined, inbound frames and the member's
/// outbound queue are pumped concurrently until either side ends. The
/// member always leaves its room on the way out.
pub async fn serve_connection<S, R>(manager: RoomManager, mut send: S, mut recv: R) -> Result<()>
where
    S: AsyncWrite + Unpin + Send,
    R: AsyncRead + Unpin + Send,
{
    let room = match recv_frame::<_, ClientFrame>(&mut recv).await? {
        Some(ClientFrame::Join { room }) => room,
        Some(_) => {
            let err = Error::Protocol("first frame must be Join".into());
            send_frame(&mut send, &ServerFrame::error(&err)).await?;
            return Err(err);
        }
        None => {
            debug!("connection closed before joining");
            return Ok(());
        }
    };

    let mut membership = match manager.join(&room).await {
        Ok(membership) => membership,
        Err(e) => {
            warn!(%room, error = %e, "join failed");
            send_frame(&mut send, &ServerFrame::error(&e)).await?;
            return Err(e);
        }
    };
    let conn = membership.conn;

    let inbound = async {
        loop {
            match recv_frame::<_, ClientFrame>(&mut recv).await? {
                None => return Ok::<(), Error>(()),
                Some(ClientFrame::Update(bytes)) => {
                    match manager.handle_update(&room, conn, bytes).await {
                        Ok(()) => {}
                        Err(e) if e.is_recoverable() => {}
                        Err(e) => return Err(e),
                    }
                }
                Some(ClientFrame::Awareness(payload)) => {
                    manager.handle_awareness(&room, conn, payload).await;
                }
                Some(ClientFrame::Join { room: other }) => {
                    warn!(%room, %conn, %other, "ignoring second join on one connection");
                }
            }
        }
    };

    let outbound = async {
        while let Some(frame) = membership.outbound.recv().await {
            send_frame(&mut send, &frame).await?;
        }
        // The room dropped us: slow consumer or shutdown
        debug!(%room, %conn, "member queue closed");
        Ok::<(), Error>(())
    };

    let result: Result<()> = tokio::select! {
        r = inbound => r,
        r = outbound => r,
    };

    manager.leave(&room, conn).await;
    match &result {
        Ok(()) => info!(%room, %conn, "connection closed"),
        Err(e) => info!(%room, %conn, error = %e, "connection ended with error"),
    }
    result
}

/// Accepts room connections on [`crate::ALPN`]
#[derive(Debug, Clone)]
pub struct RoomProtocol {
    manager: RoomManager,
}

impl RoomProtocol {
    pub fn new(manager: RoomManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &RoomManager {
        &self.manager
    }

    async fn handle(&self, conn: Connection) -> Result<()> {
        let (send, recv) = conn
            .accept_bi()
            .await
            .map_err(|e| Error::ConnectionLost(e.to_string()))?;
        serve_connection(self.manager.clone(), send, recv).await
    }
}

impl ProtocolHandler for RoomProtocol {
    fn accept(
        &self,
        conn: Connection,
    ) -> impl Future<Output = std::result::Result<(), AcceptError>> + Send {
        let this = self.clone();
        async move {
            this.handle(conn)
                .await
                .map_err(|e| AcceptError::from_err(std::io::Error::other(e.to_string())))
        }
    }
}
