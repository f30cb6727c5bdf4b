//! Iroh endpoint setup and connection tickets.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use iroh::discovery::{dns::DnsDiscovery, pkarr::PkarrPublisher};
use iroh::endpoint::Connection;
use iroh::Endpoint;
use iroh_base::EndpointAddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::ALPN;

const TICKET_PREFIX: &str = "gridcanvas1";

/// Bind an endpoint that is discoverable through the n0 DNS and pkarr
/// services
pub async fn bind_endpoint() -> Result<Endpoint> {
    Endpoint::builder()
        .discovery(DnsDiscovery::n0_dns())
        .discovery(PkarrPublisher::n0_dns())
        .bind()
        .await
        .map_err(|e| Error::Transport(e.to_string()))
}

/// Encode an endpoint address (relay URL and direct addresses included) as
/// a copy-pasteable ticket
pub fn encode_ticket(addr: &EndpointAddr) -> Result<String> {
    let bytes = postcard::to_stdvec(addr).map_err(|e| Error::InvalidTicket(e.to_string()))?;
    Ok(format!("{TICKET_PREFIX}{}", data_encoding::BASE32_NOPAD.encode(&bytes)))
}

/// Decode a ticket. A bare endpoint id is accepted too and resolved
/// through discovery.
pub fn decode_ticket(ticket: &str) -> Result<EndpointAddr> {
    let ticket = ticket.trim();
    if let Some(data) = ticket.strip_prefix(TICKET_PREFIX) {
        let bytes = data_encoding::BASE32_NOPAD
            .decode(data.as_bytes())
            .map_err(|e| Error::InvalidTicket(format!("bad encoding: {e}")))?;
        postcard::from_bytes(&bytes).map_err(|e| Error::InvalidTicket(format!("bad payload: {e}")))
    } else {
        let id: iroh_base::PublicKey = ticket
            .parse()
            .map_err(|e| Error::InvalidTicket(format!("not a ticket or endpoint id: {e}")))?;
        Ok(EndpointAddr::new(id))
    }
}

/// Receive half of a room stream that also owns its connection, so the
/// connection lives exactly as long as someone is reading from it
#[derive(Debug)]
pub struct KeepAlive<R> {
    inner: R,
    _conn: Connection,
}

impl<R: AsyncRead + Unpin> AsyncRead for KeepAlive<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Dial a room server and open the stream the room protocol runs on
pub async fn connect_room(
    endpoint: Endpoint,
    addr: EndpointAddr,
) -> Result<(impl AsyncWrite + Unpin + Send + 'static, impl AsyncRead + Unpin + Send + 'static)> {
    let conn = endpoint
        .connect(addr, ALPN)
        .await
        .map_err(|e| Error::ConnectionLost(format!("connect failed: {e}")))?;
    let (send, recv) = conn
        .open_bi()
        .await
        .map_err(|e| Error::ConnectionLost(format!("open stream failed: {e}")))?;
    debug!("room stream open");
    Ok((send, KeepAlive { inner: recv, _conn: conn }))
}
