//! Zone multiplexer: routes each request to the handler registered for the
//! closest enclosing zone of its question name.

pub mod name_key;
pub mod radix;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::dns::DNSPacket;
use crate::dns::enums::DNSResourceType;
use crate::dns::name::fqdn;
use crate::error::{DnsError, Result};
use crate::handlers::{ChaosTxtHandler, FailedHandler};
use crate::protocol::{Handler, HandlerFunc, ResponseWriter};

use name_key::{SEPARATOR, to_key};
use radix::RadixTree;

/// Handler registry keyed by zone.
///
/// Names compare case-insensitively. A query for a DS record at the apex
/// of a registered zone is sent to the closest registered parent zone
/// instead, since DS records are served by the parent side of a delegation.
pub struct ServeMux {
    zones: RwLock<RadixTree<Arc<dyn Handler>>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(RadixTree::new(SEPARATOR)),
        }
    }

    /// A mux answering the `version.bind.`/`authors.bind.` CHAOS queries
    /// and their `.server.` equivalents.
    pub fn with_builtin<T: Into<String>>(
        version: impl Into<String>,
        authors: impl IntoIterator<Item = T>,
    ) -> Self {
        let mux = Self::new();
        let version: Arc<dyn Handler> = Arc::new(ChaosTxtHandler::version(version));
        let authors: Arc<dyn Handler> = Arc::new(ChaosTxtHandler::authors(authors));
        let mut zones = mux.zones.write();
        for pattern in ["version.bind.", "version.server."] {
            zones.insert(&zone_key(pattern), version.clone());
        }
        for pattern in ["authors.bind.", "authors.server."] {
            zones.insert(&zone_key(pattern), authors.clone());
        }
        drop(zones);
        mux
    }

    /// Registers `handler` for `pattern` and every name below it,
    /// replacing any handler already registered there.
    pub fn handle<H: Handler + 'static>(&self, pattern: &str, handler: H) -> Result<()> {
        self.handle_shared(pattern, Arc::new(handler))
    }

    pub fn handle_shared(&self, pattern: &str, handler: Arc<dyn Handler>) -> Result<()> {
        if pattern.is_empty() {
            return Err(DnsError::InvalidPattern(pattern.to_string()));
        }
        debug!("Registering handler for {}", fqdn(pattern));
        self.zones.write().insert(&zone_key(pattern), handler);
        Ok(())
    }

    /// Registers a closure as the handler for `pattern`.
    pub fn handle_func<F>(&self, pattern: &str, f: F) -> Result<()>
    where
        F: for<'a> Fn(&'a mut dyn ResponseWriter, &'a DNSPacket) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    {
        self.handle(pattern, HandlerFunc(f))
    }

    /// Unregisters `pattern`. Returns whether a handler was removed.
    pub fn remove_handler(&self, pattern: &str) -> bool {
        self.zones.write().remove(&zone_key(pattern)).is_some()
    }

    /// Handler for a query of `qtype` at `qname`, if any zone encloses it.
    pub fn resolve(&self, qname: &str, qtype: DNSResourceType) -> Option<Arc<dyn Handler>> {
        let zones = self.zones.read();
        let (entry, exact) = zones.find(&zone_key(qname))?;
        if exact && qtype == DNSResourceType::DS {
            if let Some(parent) = entry.up() {
                trace!("DS query for {} routed to parent zone", qname);
                return Some(parent.value().clone());
            }
        }
        Some(entry.value().clone())
    }

    /// Registered zone names in key order.
    pub fn patterns(&self) -> Vec<String> {
        self.zones
            .read()
            .iter()
            .filter_map(|(key, _)| String::from_utf8(key).ok())
            .map(|key| name_key::from_key(&key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.zones.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.read().is_empty()
    }
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServeMux")
            .field("patterns", &self.patterns())
            .finish()
    }
}

#[async_trait]
impl Handler for ServeMux {
    async fn serve_dns(&self, w: &mut dyn ResponseWriter, request: &DNSPacket) {
        let handler = match request.questions.as_slice() {
            [question] => self.resolve(&question.name(), question.qtype),
            _ => None,
        };
        match handler {
            Some(handler) => handler.serve_dns(w, request).await,
            None => FailedHandler.serve_dns(w, request).await,
        }
    }
}

fn zone_key(name: &str) -> Vec<u8> {
    to_key(&fqdn(name).to_ascii_lowercase()).into_bytes()
}
