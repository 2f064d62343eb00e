use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket, lookup_host};
use tokio::sync::watch;
use tracing::info;

use crate::config::{Network, ServerConfig};
use crate::error::{DnsError, Result};
use crate::mux::ServeMux;
use crate::protocol::serve::ServeContext;
use crate::protocol::{Handler, tcp, udp};
use crate::tsig::TsigSecrets;

/// A DNS server bound to one transport.
///
/// The configuration is fixed at construction. The serve methods run until
/// [`Server::shutdown`] is called; shutting down before serving starts
/// makes them return immediately.
pub struct Server {
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    tsig_secrets: Option<Arc<TsigSecrets>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Arc<dyn Handler>) -> Self {
        let tsig_secrets = config.tsig_secrets();
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            handler,
            tsig_secrets,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds the configured address and serves on it.
    pub async fn listen_and_serve(&self) -> Result<()> {
        if self.config.network().is_tcp() {
            let listener = self.bind_tcp().await?;
            self.serve_tcp(listener).await
        } else {
            let socket = self.bind_udp().await?;
            self.serve_udp(socket).await
        }
    }

    pub async fn bind_tcp(&self) -> Result<TcpListener> {
        let addr = self.resolve_addr().await?;
        Ok(TcpListener::bind(addr).await?)
    }

    pub async fn bind_udp(&self) -> Result<UdpSocket> {
        let addr = self.resolve_addr().await?;
        Ok(UdpSocket::bind(addr).await?)
    }

    /// Serves TCP connections accepted on `listener`.
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<()> {
        tcp::serve_tcp(listener, self.context(), self.shutdown_tx.subscribe()).await
    }

    /// Serves datagrams received on `socket`.
    pub async fn serve_udp(&self, socket: UdpSocket) -> Result<()> {
        udp::serve_udp(
            Arc::new(socket),
            self.context(),
            self.shutdown_tx.subscribe(),
        )
        .await
    }

    /// Stops the accept and receive loops. Requests already being served
    /// run to completion.
    pub fn shutdown(&self) {
        info!(
            "Shutting down {} server on {}",
            self.config.network(),
            self.config.listen_addr()
        );
        self.shutdown_tx.send_replace(true);
    }

    fn context(&self) -> Arc<ServeContext> {
        Arc::new(ServeContext {
            handler: self.handler.clone(),
            tsig_secrets: self.tsig_secrets.clone(),
            read_timeout: self.config.read_timeout,
            write_timeout: self.config.write_timeout,
            udp_size: self.config.udp_buffer_size(),
        })
    }

    /// First address for the configured host that fits the network's
    /// address family.
    async fn resolve_addr(&self) -> Result<SocketAddr> {
        let network = self.config.network();
        let host = self.config.listen_addr();
        lookup_host(host)
            .await?
            .find(|addr| network.accepts(addr))
            .ok_or_else(|| DnsError::Io(format!("no {} address for {}", network, host)))
    }
}

/// Serves `handler` on `addr` over `network` until the process exits.
///
/// An empty `addr` binds the standard DNS port on all interfaces; a missing
/// handler serves an empty [`ServeMux`], which answers SERVFAIL to
/// everything.
pub async fn listen_and_serve(
    addr: &str,
    network: &str,
    handler: Option<Arc<dyn Handler>>,
) -> Result<()> {
    let network: Network = network.parse()?;
    let handler = handler.unwrap_or_else(|| Arc::new(ServeMux::new()) as Arc<dyn Handler>);
    let server = Server::new(ServerConfig::new(addr, network), handler);
    server.listen_and_serve().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::FailedHandler;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bad_network_fails_immediately() {
        let err = listen_and_serve("127.0.0.1:0", "sctp", None).await.unwrap_err();
        assert!(matches!(err, DnsError::BadNetwork(_)));
    }

    #[tokio::test]
    async fn test_shutdown_before_serve_returns() {
        let config = ServerConfig::new("127.0.0.1:0", Network::Tcp);
        let server = Server::new(config, Arc::new(FailedHandler));
        server.shutdown();

        let listener = server.bind_tcp().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), server.serve_tcp(listener))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_address_family_filter() {
        let config = ServerConfig::new("127.0.0.1:0", Network::Udp6);
        let server = Server::new(config, Arc::new(FailedHandler));
        assert!(matches!(server.bind_udp().await, Err(DnsError::Io(_))));
    }
}
