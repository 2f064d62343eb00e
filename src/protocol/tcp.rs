use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dns::MAX_MSG_SIZE;
use crate::error::{DnsError, Result};

use super::response::Transport;
use super::serve::{ServeContext, serve_request};
use super::{stopped, with_deadline};

/// Reads one length-prefixed message. A zero length prefix yields `None`.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await?;

    let msg_len = u16::from_be_bytes(len_buf) as usize;
    if msg_len == 0 {
        return Ok(None);
    }

    // read_exact keeps reading until the buffer is full
    let mut msg_buf = vec![0u8; msg_len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Writes `msg` behind a two byte length prefix. Messages above
/// [`MAX_MSG_SIZE`] are rejected before anything is written.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &[u8]) -> Result<()> {
    if msg.len() > MAX_MSG_SIZE {
        return Err(DnsError::MessageTooLarge {
            size: msg.len(),
            max: MAX_MSG_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(2 + msg.len());
    frame.extend_from_slice(&(msg.len() as u16).to_be_bytes());
    frame.extend_from_slice(msg);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop. Returns once the shutdown signal fires; accept errors are
/// logged and skipped.
pub(crate) async fn serve_tcp(
    listener: TcpListener,
    ctx: Arc<ServeContext>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!("DNS server listening on TCP {}", local);

    loop {
        let accepted = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    handle_connection(ctx, stream, peer).await;
                });
            }
            Err(e) => {
                warn!("TCP accept error on {}: {}", local, e);
                if accept_backoff(&mut shutdown).await {
                    break;
                }
            }
        }
    }

    info!("TCP listener on {} stopped", local);
    Ok(())
}

/// Sleeps for [`ACCEPT_BACKOFF`] so persistent errors such as EMFILE don't
/// spin the loop. Returns `true` if shutdown fired meanwhile.
async fn accept_backoff(shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = stopped(shutdown) => true,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}

/// One request, one reply, then close.
async fn handle_connection(ctx: Arc<ServeContext>, mut stream: TcpStream, peer: SocketAddr) {
    let raw = match with_deadline(ctx.read_timeout, read_frame(&mut stream)).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!("Zero length message from {}, closing", peer);
            return;
        }
        Err(e) => {
            debug!("Failed to read TCP message from {}: {}", peer, e);
            return;
        }
    };

    let w = ctx.response(Transport::Tcp(stream), peer);
    serve_request(ctx.handler.as_ref(), w, &raw).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_accept_backoff_waits_unless_stopped() {
        let (tx, mut rx) = watch::channel(false);
        let start = tokio::time::Instant::now();
        assert!(!accept_backoff(&mut rx).await);
        assert!(start.elapsed() >= ACCEPT_BACKOFF);

        tx.send_replace(true);
        let start = tokio::time::Instant::now();
        assert!(accept_backoff(&mut rx).await);
        assert!(start.elapsed() < ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_frame_at_max_size() {
        let (mut client, mut server) = duplex(2 * MAX_MSG_SIZE);
        let msg = vec![0x5A; MAX_MSG_SIZE];
        write_frame(&mut client, &msg).await.unwrap();

        let read = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(read.len(), MAX_MSG_SIZE);
    }

    #[tokio::test]
    async fn test_frame_over_max_size_is_not_written() {
        let (mut client, mut server) = duplex(2 * MAX_MSG_SIZE);
        let msg = vec![0u8; MAX_MSG_SIZE + 1];
        let err = write_frame(&mut client, &msg).await.unwrap_err();
        assert!(matches!(
            err,
            DnsError::MessageTooLarge {
                size,
                max: MAX_MSG_SIZE
            } if size == MAX_MSG_SIZE + 1
        ));

        drop(client);
        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_read_frame_assembles_partial_writes() {
        let (mut client, mut server) = duplex(64);
        let writer = tokio::spawn(async move {
            client.write_all(&[0x00]).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(&[0x05, b'h', b'e']).await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"llo").await.unwrap();
        });

        let msg = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(msg, b"hello");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_length_frame() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 0]).await.unwrap();
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_fails() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0, 10, 1, 2, 3]).await.unwrap();
        drop(client);
        assert!(matches!(
            read_frame(&mut server).await,
            Err(DnsError::Io(_))
        ));
    }
}
