pub mod config;
pub mod dns;
pub mod error;
pub mod handlers;
pub mod mux;
pub mod protocol;
pub mod server;
pub mod tsig;

pub use config::{Network, ServerConfig};
pub use dns::DNSPacket;
pub use error::{DnsError, Result};
pub use mux::ServeMux;
pub use protocol::{Handler, HandlerFunc, Response, ResponseWriter, Transport};
pub use server::{Server, listen_and_serve};
