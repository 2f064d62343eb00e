use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::dns::DNSPacket;
use crate::tsig::TsigSecrets;

use super::handler::Handler;
use super::response::{Response, ResponseWriter, Transport};

/// Everything a transport loop hands to each request it serves.
pub(crate) struct ServeContext {
    pub handler: Arc<dyn Handler>,
    pub tsig_secrets: Option<Arc<TsigSecrets>>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub udp_size: usize,
}

impl ServeContext {
    pub fn response(&self, transport: Transport, remote: SocketAddr) -> Response {
        Response::new(transport, remote)
            .with_tsig_secrets(self.tsig_secrets.clone())
            .with_write_timeout(self.write_timeout)
    }
}

/// Decodes `raw`, verifies its TSIG and dispatches it to `handler`.
///
/// Undecodable messages get a FORMERR reply when their header is readable.
/// The connection is closed afterwards unless the handler hijacked it.
pub(crate) async fn serve_request(handler: &dyn Handler, mut w: Response, raw: &[u8]) {
    let request = match DNSPacket::parse(raw) {
        Ok(request) => request,
        Err(e) => {
            debug!("Malformed message from {}: {}", w.remote_addr(), e);
            if let Some(reply) = DNSPacket::format_error(raw) {
                if let Err(e) = w.write_msg(&reply).await {
                    debug!("Failed to send FORMERR to {}: {}", w.remote_addr(), e);
                }
            }
            let _ = w.close().await;
            return;
        }
    };

    trace!(
        "Request id={} from {} with {} question(s)",
        request.header.id,
        w.remote_addr(),
        request.questions.len()
    );
    w.verify_tsig(raw, &request);
    handler.serve_dns(&mut w, &request).await;

    if !w.is_hijacked() {
        if let Err(e) = w.close().await {
            debug!("Failed to close connection to {}: {}", w.remote_addr(), e);
        }
    }
}
