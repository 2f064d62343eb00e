use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::dns::{DEFAULT_UDP_SIZE, MAX_MSG_SIZE};
use crate::error::{DnsError, Result};
use crate::tsig::TsigSecrets;

/// Binds every interface on the standard DNS port
pub const DEFAULT_ADDR: &str = "0.0.0.0:53";

/// Transport a server listens on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Network {
    #[default]
    Udp,
    Udp4,
    Udp6,
    Tcp,
    Tcp4,
    Tcp6,
}

impl Network {
    pub fn is_tcp(&self) -> bool {
        matches!(self, Network::Tcp | Network::Tcp4 | Network::Tcp6)
    }

    /// Whether `addr` belongs to the address family this network allows.
    pub fn accepts(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp | Network::Udp => true,
            Network::Tcp4 | Network::Udp4 => addr.is_ipv4(),
            Network::Tcp6 | Network::Udp6 => addr.is_ipv6(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Udp => "udp",
            Network::Udp4 => "udp4",
            Network::Udp6 => "udp6",
            Network::Tcp => "tcp",
            Network::Tcp4 => "tcp4",
            Network::Tcp6 => "tcp6",
        }
    }
}

impl FromStr for Network {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "udp" => Ok(Network::Udp),
            "udp4" => Ok(Network::Udp4),
            "udp6" => Ok(Network::Udp6),
            "tcp" => Ok(Network::Tcp),
            "tcp4" => Ok(Network::Tcp4),
            "tcp6" => Ok(Network::Tcp6),
            other => Err(DnsError::BadNetwork(other.to_string())),
        }
    }
}

impl TryFrom<String> for Network {
    type Error = DnsError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on; empty means [`DEFAULT_ADDR`]
    pub addr: String,

    /// Transport; unset means [`Network::Udp`] for a single [`Server`] and
    /// both UDP and TCP for the binary
    ///
    /// [`Server`]: crate::server::Server
    pub network: Option<Network>,

    /// Receive buffer for UDP datagrams (0 = default)
    pub udp_size: usize,

    #[serde(rename = "read_timeout_ms", deserialize_with = "millis")]
    pub read_timeout: Option<Duration>,

    #[serde(rename = "write_timeout_ms", deserialize_with = "millis")]
    pub write_timeout: Option<Duration>,

    /// TSIG key name to base64 secret
    pub tsig_secrets: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            network: None,
            udp_size: DEFAULT_UDP_SIZE,
            read_timeout: None,
            write_timeout: None,
            tsig_secrets: HashMap::new(),
        }
    }
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

impl ServerConfig {
    pub fn new(addr: impl Into<String>, network: Network) -> Self {
        Self {
            addr: addr.into(),
            network: Some(network),
            ..Default::default()
        }
    }

    /// Create a ServerConfig from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("ZONEMUX_ADDR") {
            config.addr = addr;
        }

        if let Ok(network) = std::env::var("ZONEMUX_NET") {
            config.network = Some(network.parse()?);
        }

        if let Ok(udp_size) = std::env::var("ZONEMUX_UDP_SIZE") {
            config.udp_size = udp_size
                .parse()
                .map_err(|_| DnsError::Config(format!("invalid UDP size: {}", udp_size)))?;
        }

        if let Ok(timeout) = std::env::var("ZONEMUX_READ_TIMEOUT_MS") {
            config.read_timeout = Some(parse_millis(&timeout)?);
        }

        if let Ok(timeout) = std::env::var("ZONEMUX_WRITE_TIMEOUT_MS") {
            config.write_timeout = Some(parse_millis(&timeout)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| DnsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DnsError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.udp_size > MAX_MSG_SIZE {
            return Err(DnsError::Config(format!(
                "UDP size too large: {} (max {})",
                self.udp_size, MAX_MSG_SIZE
            )));
        }

        for (name, secret) in &self.tsig_secrets {
            if name.is_empty() {
                return Err(DnsError::Config("empty TSIG key name".to_string()));
            }
            if BASE64.decode(secret).is_err() {
                return Err(DnsError::Config(format!(
                    "TSIG secret for {} is not valid base64",
                    name
                )));
            }
        }

        Ok(())
    }

    pub fn network(&self) -> Network {
        self.network.unwrap_or_default()
    }

    /// Transports to serve when no explicit list is given: the configured
    /// network alone, or UDP and TCP when none is configured.
    pub fn networks(&self) -> Vec<Network> {
        match self.network {
            Some(network) => vec![network],
            None => vec![Network::Udp, Network::Tcp],
        }
    }

    pub fn listen_addr(&self) -> &str {
        if self.addr.is_empty() {
            DEFAULT_ADDR
        } else {
            &self.addr
        }
    }

    pub fn udp_buffer_size(&self) -> usize {
        if self.udp_size == 0 {
            DEFAULT_UDP_SIZE
        } else {
            self.udp_size
        }
    }

    /// Secrets table for signing and verification; `None` when no keys are
    /// configured.
    pub fn tsig_secrets(&self) -> Option<Arc<TsigSecrets>> {
        if self.tsig_secrets.is_empty() {
            None
        } else {
            Some(Arc::new(TsigSecrets::from(self.tsig_secrets.clone())))
        }
    }
}

fn parse_millis(value: &str) -> Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| DnsError::Config(format!("invalid timeout: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_network_parse() {
        assert_eq!("tcp6".parse::<Network>().unwrap(), Network::Tcp6);
        assert_eq!("udp".parse::<Network>().unwrap(), Network::Udp);
        assert!(matches!(
            "sctp".parse::<Network>(),
            Err(DnsError::BadNetwork(n)) if n == "sctp"
        ));
        assert_eq!(Network::Udp4.to_string(), "udp4");
    }

    #[test]
    fn test_network_address_family() {
        let v4: SocketAddr = "127.0.0.1:53".parse().unwrap();
        let v6: SocketAddr = "[::1]:53".parse().unwrap();
        assert!(Network::Tcp.accepts(&v4) && Network::Tcp.accepts(&v6));
        assert!(Network::Udp4.accepts(&v4) && !Network::Udp4.accepts(&v6));
        assert!(!Network::Tcp6.accepts(&v4) && Network::Tcp6.accepts(&v6));
        assert!(Network::Tcp4.is_tcp());
        assert!(!Network::Udp6.is_tcp());
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr(), "0.0.0.0:53");
        assert_eq!(config.network, None);
        assert_eq!(config.network(), Network::Udp);
        assert_eq!(config.networks(), vec![Network::Udp, Network::Tcp]);
        assert_eq!(config.udp_buffer_size(), DEFAULT_UDP_SIZE);
        assert!(config.tsig_secrets().is_none());

        let config = ServerConfig {
            addr: String::new(),
            udp_size: 0,
            ..Default::default()
        };
        assert_eq!(config.listen_addr(), DEFAULT_ADDR);
        assert_eq!(config.udp_buffer_size(), DEFAULT_UDP_SIZE);
    }

    #[test]
    fn test_from_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            addr = "127.0.0.1:5353"
            network = "tcp4"
            udp_size = 4096
            read_timeout_ms = 2000

            [tsig_secrets]
            "axfr." = "c2VjcmV0"
            "#,
        )
        .unwrap();
        assert_eq!(config.addr, "127.0.0.1:5353");
        assert_eq!(config.network(), Network::Tcp4);
        assert_eq!(config.networks(), vec![Network::Tcp4]);
        assert_eq!(config.udp_size, 4096);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.write_timeout, None);

        let secrets = config.tsig_secrets().unwrap();
        assert_eq!(secrets.get("AXFR"), Some("c2VjcmV0"));
    }

    #[test]
    fn test_toml_without_network_serves_both() {
        let config = ServerConfig::from_toml_str("addr = \"127.0.0.1:5353\"").unwrap();
        assert_eq!(config.network, None);
        assert_eq!(config.networks(), vec![Network::Udp, Network::Tcp]);
    }

    #[test]
    fn test_from_toml_rejects_bad_values() {
        assert!(ServerConfig::from_toml_str("network = \"sctp\"").is_err());
        assert!(matches!(
            ServerConfig::from_toml_str("udp_size = 70000"),
            Err(DnsError::Config(_))
        ));
        assert!(matches!(
            ServerConfig::from_toml_str("[tsig_secrets]\n\"k.\" = \"not base64!\""),
            Err(DnsError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "addr = \"[::1]:8053\"\nnetwork = \"udp6\"").unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.addr, "[::1]:8053");
        assert_eq!(config.networks(), vec![Network::Udp6]);

        assert!(ServerConfig::from_file("/nonexistent/zonemux.toml").is_err());
    }
}
