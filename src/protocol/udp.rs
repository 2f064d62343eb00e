use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, trace};

use crate::error::{DnsError, Result};

use super::response::Transport;
use super::serve::{ServeContext, serve_request};
use super::{stopped, with_deadline};

/// Receive loop over one shared socket. Every datagram is served on its own
/// task; receive errors never end the loop, only the shutdown signal does.
pub(crate) async fn serve_udp(
    socket: Arc<UdpSocket>,
    ctx: Arc<ServeContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local = socket.local_addr()?;
    info!("DNS server listening on UDP {}", local);

    let mut buf = vec![0u8; ctx.udp_size];
    loop {
        let received = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            received = with_deadline(ctx.read_timeout, socket.recv_from(&mut buf)) => received,
        };

        match received {
            Ok((0, peer)) => {
                trace!("Empty datagram from {}", peer);
            }
            Ok((len, peer)) => {
                let data = buf[..len].to_vec();
                let ctx = ctx.clone();
                let transport = Transport::Udp {
                    socket: socket.clone(),
                    peer,
                };
                tokio::spawn(async move {
                    let w = ctx.response(transport, peer);
                    serve_request(ctx.handler.as_ref(), w, &data).await;
                });
            }
            Err(DnsError::Timeout) => {}
            Err(e) => {
                debug!("UDP receive error on {}: {}", local, e);
            }
        }
    }

    info!("UDP listener on {} stopped", local);
    Ok(())
}
