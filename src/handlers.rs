//! Built-in handlers: the SERVFAIL fallback and CHAOS class TXT responders
//! for server identification queries such as `version.bind. CH TXT`.

use async_trait::async_trait;
use tracing::debug;

use crate::dns::DNSPacket;
use crate::dns::enums::{DNSRcode, DNSResourceClass, DNSResourceType};
use crate::dns::resource::DNSResource;
use crate::protocol::{Handler, ResponseWriter};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Answers every request with SERVFAIL.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailedHandler;

#[async_trait]
impl Handler for FailedHandler {
    async fn serve_dns(&self, w: &mut dyn ResponseWriter, request: &DNSPacket) {
        let reply = DNSPacket::with_rcode(request, DNSRcode::SERVFAIL);
        if let Err(e) = w.write_msg(&reply).await {
            debug!("Failed to send SERVFAIL to {}: {}", w.remote_addr(), e);
        }
    }
}

/// Answers `CH TXT` queries for a fixed set of names with fixed text.
#[derive(Debug, Clone)]
pub struct ChaosTxtHandler {
    names: Vec<String>,
    texts: Vec<String>,
}

impl ChaosTxtHandler {
    pub fn new<N, T>(names: N, texts: T) -> Self
    where
        N: IntoIterator,
        N::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_lowercase())
                .collect(),
            texts: texts.into_iter().map(Into::into).collect(),
        }
    }

    /// Responder for `version.bind.` and `version.server.`.
    pub fn version(text: impl Into<String>) -> Self {
        Self::new(["version.bind.", "version.server."], [text.into()])
    }

    /// Responder for `authors.bind.` and `authors.server.`.
    pub fn authors<T: Into<String>>(authors: impl IntoIterator<Item = T>) -> Self {
        Self::new(["authors.bind.", "authors.server."], authors)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn accepts(&self, request: &DNSPacket) -> bool {
        let [question] = request.questions.as_slice() else {
            return false;
        };
        question.qclass == DNSResourceClass::CH
            && question.qtype == DNSResourceType::TXT
            && self
                .names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&question.name()))
    }
}

#[async_trait]
impl Handler for ChaosTxtHandler {
    async fn serve_dns(&self, w: &mut dyn ResponseWriter, request: &DNSPacket) {
        if !self.accepts(request) {
            FailedHandler.serve_dns(w, request).await;
            return;
        }

        let labels = request.questions[0].labels.clone();
        let mut reply = DNSPacket::reply_to(request);
        reply.header.aa = true;
        reply.answers = self
            .texts
            .iter()
            .map(|text| {
                DNSResource::txt(labels.clone(), DNSResourceClass::CH, 0, &[text.as_str()])
            })
            .collect();

        if let Err(e) = w.write_msg(&reply).await {
            debug!("Failed to send CHAOS reply to {}: {}", w.remote_addr(), e);
        }
    }
}
