use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::dns::DNSPacket;

use super::response::ResponseWriter;

/// Something that answers DNS requests.
///
/// Implementations write zero or more messages to `w`. Unless the
/// connection is hijacked it is closed once `serve_dns` returns.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn serve_dns(&self, w: &mut dyn ResponseWriter, request: &DNSPacket);
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn serve_dns(&self, w: &mut dyn ResponseWriter, request: &DNSPacket) {
        (**self).serve_dns(w, request).await
    }
}

/// Adapter that lets a closure act as a [`Handler`].
pub struct HandlerFunc<F>(pub F);

#[async_trait]
impl<F> Handler for HandlerFunc<F>
where
    F: for<'a> Fn(&'a mut dyn ResponseWriter, &'a DNSPacket) -> BoxFuture<'a, ()> + Send + Sync,
{
    async fn serve_dns(&self, w: &mut dyn ResponseWriter, request: &DNSPacket) {
        (self.0)(w, request).await
    }
}
