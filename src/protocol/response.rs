use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::dns::DNSPacket;
use crate::error::{DnsError, Result};
use crate::tsig::{self, TsigError, TsigRecord, TsigSecrets};

use super::tcp::write_frame;
use super::with_deadline;

/// The write side of a request, as seen by a [`super::Handler`].
#[async_trait]
pub trait ResponseWriter: Send {
    /// Address of the client that sent the request.
    fn remote_addr(&self) -> SocketAddr;

    /// Encodes and writes `msg`. When TSIG secrets are configured and `msg`
    /// ends with a TSIG record, the message is signed first.
    async fn write_msg(&mut self, msg: &DNSPacket) -> Result<()>;

    /// Writes already encoded bytes. On TCP the length prefix is added.
    async fn write_buf(&mut self, buf: &[u8]) -> Result<()>;

    /// Closes the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;

    /// Outcome of verifying the request's TSIG, if it had one.
    fn tsig_status(&self) -> std::result::Result<(), TsigError>;

    /// Sign subsequent messages with the timers-only TSIG variables.
    fn set_tsig_timers_only(&mut self, timers_only: bool);

    /// Takes the connection away from the server. The caller is then
    /// responsible for closing it; the server will not.
    fn hijack(&mut self) -> Option<Transport>;
}

/// The connection a request arrived on.
#[derive(Debug)]
pub enum Transport {
    /// The listener's socket plus the client address
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
    Tcp(TcpStream),
}

impl Transport {
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match self {
            Transport::Udp { peer, .. } => Ok(*peer),
            Transport::Tcp(stream) => Ok(stream.peer_addr()?),
        }
    }

    /// One datagram on UDP, one length-prefixed frame on TCP.
    pub async fn write_buf(&mut self, buf: &[u8], deadline: Option<Duration>) -> Result<()> {
        match self {
            Transport::Udp { socket, peer } => {
                let sent = with_deadline(deadline, socket.send_to(buf, *peer)).await?;
                trace!("Sent {} of {} bytes to {}", sent, buf.len(), peer);
                Ok(())
            }
            Transport::Tcp(stream) => with_deadline(deadline, write_frame(stream, buf)).await,
        }
    }

    /// Shuts down a TCP stream. The UDP socket is shared and stays open.
    pub async fn close(self) -> Result<()> {
        match self {
            Transport::Udp { .. } => Ok(()),
            Transport::Tcp(mut stream) => {
                stream.shutdown().await?;
                Ok(())
            }
        }
    }
}

/// [`ResponseWriter`] used by the TCP and UDP servers.
#[derive(Debug)]
pub struct Response {
    transport: Option<Transport>,
    remote: SocketAddr,
    hijacked: bool,
    write_timeout: Option<Duration>,
    tsig_secrets: Option<Arc<TsigSecrets>>,
    tsig_status: std::result::Result<(), TsigError>,
    tsig_timers_only: bool,
    /// MAC the next signature chains from
    tsig_request_mac: Vec<u8>,
}

impl Response {
    pub fn new(transport: Transport, remote: SocketAddr) -> Self {
        Self {
            transport: Some(transport),
            remote,
            hijacked: false,
            write_timeout: None,
            tsig_secrets: None,
            tsig_status: Ok(()),
            tsig_timers_only: false,
            tsig_request_mac: Vec::new(),
        }
    }

    pub fn with_tsig_secrets(mut self, secrets: Option<Arc<TsigSecrets>>) -> Self {
        self.tsig_secrets = secrets;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn is_hijacked(&self) -> bool {
        self.hijacked
    }

    /// Checks the TSIG on an incoming request and remembers its MAC so the
    /// reply can chain from it. An unknown key is recorded as such without
    /// attempting verification.
    pub(crate) fn verify_tsig(&mut self, raw: &[u8], request: &DNSPacket) {
        let Some(secrets) = &self.tsig_secrets else {
            return;
        };
        let Some(tsig_rr) = request.tsig() else {
            return;
        };

        let key_name = tsig_rr.name();
        self.tsig_status = match secrets.get(&key_name) {
            None => Err(TsigError::UnknownKey(key_name)),
            Some(secret) => tsig::verify(
                raw,
                secret,
                &self.tsig_request_mac,
                self.tsig_timers_only,
            ),
        };
        if let Err(e) = &self.tsig_status {
            debug!("TSIG verification failed for {}: {}", self.remote, e);
        }

        match TsigRecord::parse(&tsig_rr.rdata) {
            Ok(record) => self.tsig_request_mac = record.mac,
            Err(e) => debug!("Unreadable TSIG record from {}: {}", self.remote, e),
        }
    }
}

#[async_trait]
impl ResponseWriter for Response {
    fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn write_msg(&mut self, msg: &DNSPacket) -> Result<()> {
        let wire = match (&self.tsig_secrets, msg.tsig()) {
            (Some(secrets), Some(tsig_rr)) => {
                let key_name = tsig_rr.name();
                let secret = secrets
                    .get(&key_name)
                    .ok_or(TsigError::UnknownKey(key_name))?;
                let (wire, mac) = tsig::generate(
                    msg,
                    secret,
                    &self.tsig_request_mac,
                    self.tsig_timers_only,
                )?;
                self.tsig_request_mac = mac;
                wire
            }
            _ => msg.serialize()?,
        };
        self.write_buf(&wire).await
    }

    async fn write_buf(&mut self, buf: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(DnsError::ConnectionClosed)?;
        transport.write_buf(buf, self.write_timeout).await
    }

    async fn close(&mut self) -> Result<()> {
        match self.transport.take() {
            Some(transport) => transport.close().await,
            None => Ok(()),
        }
    }

    fn tsig_status(&self) -> std::result::Result<(), TsigError> {
        self.tsig_status.clone()
    }

    fn set_tsig_timers_only(&mut self, timers_only: bool) {
        self.tsig_timers_only = timers_only;
    }

    fn hijack(&mut self) -> Option<Transport> {
        self.hijacked = true;
        self.transport.take()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::enums::{DNSResourceClass, DNSResourceType};
    use crate::tsig::{DEFAULT_FUDGE, TsigAlgorithm};
    use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    fn secrets() -> Arc<TsigSecrets> {
        let mut secrets = TsigSecrets::new();
        secrets.insert("axfr.", BASE64.encode(b"response test secret"));
        Arc::new(secrets)
    }

    fn signed_request(key: &str) -> DNSPacket {
        let mut query =
            DNSPacket::query(9, "miek.nl.", DNSResourceType::SOA, DNSResourceClass::IN).unwrap();
        let placeholder = TsigRecord::placeholder(TsigAlgorithm::HmacSha256, DEFAULT_FUDGE);
        query.resources.push(placeholder.to_resource(key).unwrap());
        query
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let mut w = Response::new(Transport::Tcp(server), peer);
        w.close().await.unwrap();
        w.close().await.unwrap();
        assert!(matches!(
            w.write_buf(b"late").await,
            Err(DnsError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_hijack_hands_over_connection() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let mut w = Response::new(Transport::Tcp(server), peer);
        assert!(!w.is_hijacked());

        let transport = w.hijack();
        assert!(w.is_hijacked());
        assert!(matches!(transport, Some(Transport::Tcp(_))));
        assert!(w.hijack().is_none());
        w.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_unknown_key_short_circuits() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let mut w = Response::new(Transport::Tcp(server), peer).with_tsig_secrets(Some(secrets()));

        let request = signed_request("other.");
        let raw = request.serialize().unwrap();
        w.verify_tsig(&raw, &request);
        assert_eq!(
            w.tsig_status(),
            Err(TsigError::UnknownKey("other.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_verify_records_success_and_mac() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let secrets = secrets();
        let mut w =
            Response::new(Transport::Tcp(server), peer).with_tsig_secrets(Some(secrets.clone()));

        let secret = secrets.get("axfr.").unwrap();
        let (raw, mac) = tsig::generate(&signed_request("axfr."), secret, &[], false).unwrap();
        let request = DNSPacket::parse(&raw).unwrap();
        w.verify_tsig(&raw, &request);
        assert_eq!(w.tsig_status(), Ok(()));
        assert_eq!(w.tsig_request_mac, mac);
    }

    #[tokio::test]
    async fn test_without_secrets_nothing_is_verified() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let mut w = Response::new(Transport::Tcp(server), peer);
        let request = signed_request("axfr.");
        w.verify_tsig(&request.serialize().unwrap(), &request);
        assert_eq!(w.tsig_status(), Ok(()));
    }

    #[tokio::test]
    async fn test_write_msg_fails_for_unknown_signing_key() {
        let (_client, server) = tcp_pair().await;
        let peer = server.peer_addr().unwrap();
        let mut w = Response::new(Transport::Tcp(server), peer).with_tsig_secrets(Some(secrets()));
        let request = signed_request("nobody.");
        let mut reply = DNSPacket::reply_to(&request);
        reply.resources = request.resources.clone();
        assert!(matches!(
            w.write_msg(&reply).await,
            Err(DnsError::Tsig(TsigError::UnknownKey(_)))
        ));
    }
}
