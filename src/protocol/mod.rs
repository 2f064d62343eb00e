pub mod handler;
pub mod response;
pub mod serve;
pub mod tcp;
pub mod udp;

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::{DnsError, Result};

pub use handler::{Handler, HandlerFunc};
pub use response::{Response, ResponseWriter, Transport};
pub use tcp::{read_frame, write_frame};

/// Runs `fut`, failing with [`DnsError::Timeout`] once `deadline` passes.
pub(crate) async fn with_deadline<F, T, E>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    DnsError: From<E>,
{
    match deadline {
        Some(limit) => Ok(timeout(limit, fut).await??),
        None => Ok(fut.await?),
    }
}

/// Resolves once the server has been told to stop.
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
